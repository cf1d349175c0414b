//! Configuration-driven graphs resolved through registries.

use super::{GraphDescriptor, PipeEdge, StageDescriptor};
use crate::core::StageRole;
use crate::errors::DuctworkError;
use crate::registry::{AdapterRegistry, ControlRegistry};
use crate::stages::StageOptions;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Declarative description of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageSpec {
    /// The node name.
    pub name: String,
    /// The node role.
    pub role: StageRole,
    /// The control type, looked up in the role's control registry.
    pub control: String,
    /// The adapter name, looked up in the adapter registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,
    /// Options handed to the control factory and the stage context.
    #[serde(default)]
    pub options: StageOptions,
    /// Consumers of this node, in forwarding order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub send_to: Vec<String>,
}

/// Declarative description of a dataflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphSpec {
    /// The graph name.
    pub name: String,
    /// The stages, in declaration order.
    pub stages: Vec<StageSpec>,
}

impl GraphSpec {
    /// Parses a graph spec from JSON.
    pub fn from_json_str(json: &str) -> Result<Self, DuctworkError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Resolves controls and adapters, then validates the graph.
    ///
    /// Every registry lookup happens before any stage body is built, so an
    /// unknown type fails the whole graph up front.
    pub fn resolve(
        &self,
        adapters: &AdapterRegistry,
        controls: &ControlRegistry,
    ) -> Result<GraphDescriptor, DuctworkError> {
        let mut resolved = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            let factory = controls.find(stage.role, &stage.control)?;
            let adapter = match &stage.adapter {
                Some(name) => Some((name.clone(), adapters.find(name)?.clone())),
                None => None,
            };
            resolved.push((stage, factory, adapter));
        }

        let mut stages = Vec::with_capacity(resolved.len());
        let mut pipes = Vec::new();
        for (stage, factory, adapter) in resolved {
            let body = factory(&stage.options)
                .map_err(|e| DuctworkError::stage(stage.name.clone(), e))?;
            let mut descriptor = StageDescriptor::new(stage.name.clone(), stage.role, body)
                .with_options(stage.options.clone());
            if let Some((name, adapter)) = adapter {
                descriptor = descriptor.with_adapter(name, adapter);
            }
            stages.push(descriptor);

            if !stage.send_to.is_empty() {
                pipes.push(PipeEdge::new(stage.name.clone(), stage.send_to.iter().cloned()));
            }
        }

        debug!(graph = %self.name, stages = stages.len(), "Resolved graph spec");
        Ok(GraphDescriptor::new(self.name.clone(), stages, pipes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::adapter_registry;
    use crate::stages::{FnDestination, IterSource, StageBody};
    use crate::testing::CountingAdapter;
    use serde_json::json;
    use std::sync::Arc;

    const SPEC: &str = r#"{
        "name": "users",
        "stages": [
            {"name": "read", "role": "source", "control": "numbers",
             "adapter": "db", "options": {"total": 2}, "send_to": ["write"]},
            {"name": "write", "role": "destination", "control": "discard"}
        ]
    }"#;

    fn controls() -> ControlRegistry {
        let mut controls = ControlRegistry::new();
        controls.add(StageRole::Source, "numbers", |options: &StageOptions| {
            let total = options.get_usize("total").unwrap_or(0);
            Ok(StageBody::source(IterSource::new((0..total).map(|n| json!(n)))))
        });
        controls.add(StageRole::Destination, "discard", |_: &StageOptions| {
            Ok(StageBody::destination(FnDestination::new(|_row| Ok(()))))
        });
        controls
    }

    #[test]
    fn test_resolve_spec() {
        let mut adapters = adapter_registry();
        adapters.add("db", Arc::new(CountingAdapter::new()));

        let spec = GraphSpec::from_json_str(SPEC).unwrap();
        let graph = spec.resolve(&adapters, &controls()).unwrap();

        assert_eq!(graph.name(), "users");
        assert_eq!(graph.stages()[0].adapter().map(|a| a.name.as_str()), Some("db"));
        assert_eq!(graph.stages()[0].options().get_usize("total"), Some(2));
        assert_eq!(graph.downstream_of("read"), ["write".to_string()]);
    }

    #[test]
    fn test_unknown_adapter_fails_fast() {
        let spec = GraphSpec::from_json_str(SPEC).unwrap();
        let err = spec.resolve(&adapter_registry(), &controls()).unwrap_err();

        assert!(matches!(err, DuctworkError::NotFoundInRegistry(_)));
        assert_eq!(err.to_string(), "The adapter of type \"db\" does not exist");
    }

    #[test]
    fn test_unknown_control_fails_fast() {
        let mut spec = GraphSpec::from_json_str(SPEC).unwrap();
        spec.stages[1].control = "upsert".to_string();
        let mut adapters = adapter_registry();
        adapters.add("db", Arc::new(CountingAdapter::new()));

        let err = spec.resolve(&adapters, &controls()).unwrap_err();
        assert_eq!(err.to_string(), "The destination of type \"upsert\" does not exist");
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = GraphSpec::from_json_str(r#"{"name": "g", "stages": [], "extra": 1}"#);
        assert!(matches!(err, Err(DuctworkError::Serialization(_))));
    }
}
