//! Stage descriptors, pipes and graph validation.

use crate::adapters::Adapter;
use crate::core::StageRole;
use crate::errors::{ContractErrorInfo, GraphValidationError};
use crate::stages::{Destination, Source, StageBody, StageOptions, Transform};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// An adapter bound to a stage, with the name it was registered under.
#[derive(Clone)]
pub struct AdapterBinding {
    /// The registered adapter name.
    pub name: String,
    /// The adapter.
    pub adapter: Arc<dyn Adapter>,
}

impl std::fmt::Debug for AdapterBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterBinding").field("name", &self.name).finish()
    }
}

/// One node of a dataflow graph.
#[derive(Debug)]
pub struct StageDescriptor {
    name: String,
    role: StageRole,
    body: StageBody,
    adapter: Option<AdapterBinding>,
    options: StageOptions,
}

impl StageDescriptor {
    /// Creates a descriptor from a role and a body.
    ///
    /// Role and body are checked against each other when the graph is built.
    #[must_use]
    pub fn new(name: impl Into<String>, role: StageRole, body: StageBody) -> Self {
        Self {
            name: name.into(),
            role,
            body,
            adapter: None,
            options: StageOptions::new(),
        }
    }

    /// A source node.
    pub fn source(name: impl Into<String>, source: impl Source + 'static) -> Self {
        Self::new(name, StageRole::Source, StageBody::source(source))
    }

    /// A transform node.
    pub fn transform(name: impl Into<String>, transform: impl Transform + 'static) -> Self {
        Self::new(name, StageRole::Transform, StageBody::transform(transform))
    }

    /// A lookup node.
    pub fn lookup(name: impl Into<String>, lookup: impl Transform + 'static) -> Self {
        Self::new(name, StageRole::Lookup, StageBody::transform(lookup))
    }

    /// A destination node.
    pub fn destination(name: impl Into<String>, destination: impl Destination + 'static) -> Self {
        Self::new(name, StageRole::Destination, StageBody::destination(destination))
    }

    /// Binds an adapter.
    #[must_use]
    pub fn with_adapter(mut self, name: impl Into<String>, adapter: Arc<dyn Adapter>) -> Self {
        self.adapter = Some(AdapterBinding {
            name: name.into(),
            adapter,
        });
        self
    }

    /// Sets one option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key, value);
        self
    }

    /// Replaces the options.
    #[must_use]
    pub fn with_options(mut self, options: StageOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the node name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the node role.
    #[must_use]
    pub const fn role(&self) -> StageRole {
        self.role
    }

    /// Returns the bound adapter, if any.
    #[must_use]
    pub const fn adapter(&self) -> Option<&AdapterBinding> {
        self.adapter.as_ref()
    }

    /// Returns the options.
    #[must_use]
    pub const fn options(&self) -> &StageOptions {
        &self.options
    }

    /// Splits the descriptor into its parts.
    #[must_use]
    pub fn into_parts(self) -> (String, StageBody, Option<AdapterBinding>, StageOptions) {
        (self.name, self.body, self.adapter, self.options)
    }
}

/// A forwarding edge from one producer to an ordered set of consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeEdge {
    /// The producing node.
    pub from: String,
    /// The consuming nodes, in forwarding order.
    pub to: Vec<String>,
}

impl PipeEdge {
    /// Creates a pipe.
    #[must_use]
    pub fn new<I, S>(from: impl Into<String>, to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            from: from.into(),
            to: to.into_iter().map(Into::into).collect(),
        }
    }
}

/// A validated dataflow graph.
#[derive(Debug)]
pub struct GraphDescriptor {
    name: String,
    stages: Vec<StageDescriptor>,
    pipes: Vec<PipeEdge>,
}

impl GraphDescriptor {
    /// Validates and creates a graph.
    pub fn new(
        name: impl Into<String>,
        stages: Vec<StageDescriptor>,
        pipes: Vec<PipeEdge>,
    ) -> Result<Self, GraphValidationError> {
        validate(&stages, &pipes)?;
        Ok(Self {
            name: name.into(),
            stages,
            pipes,
        })
    }

    /// Returns the graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stages in declaration order.
    #[must_use]
    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    /// Returns the pipes.
    #[must_use]
    pub fn pipes(&self) -> &[PipeEdge] {
        &self.pipes
    }

    /// Returns the consumers of `node`, in forwarding order.
    #[must_use]
    pub fn downstream_of(&self, node: &str) -> &[String] {
        self.pipes
            .iter()
            .find(|pipe| pipe.from == node)
            .map(|pipe| pipe.to.as_slice())
            .unwrap_or_default()
    }

    /// Returns the producers feeding `node`, in declaration order.
    #[must_use]
    pub fn upstream_of(&self, node: &str) -> Vec<&str> {
        self.pipes
            .iter()
            .filter(|pipe| pipe.to.iter().any(|to| to == node))
            .map(|pipe| pipe.from.as_str())
            .collect()
    }

    /// Splits the graph into name, stages and pipes.
    #[must_use]
    pub fn into_parts(self) -> (String, Vec<StageDescriptor>, Vec<PipeEdge>) {
        (self.name, self.stages, self.pipes)
    }
}

fn invalid(code: &str, message: String, nodes: Vec<String>) -> GraphValidationError {
    let mut info = ContractErrorInfo::new(code, message.clone());
    if let Some(node) = nodes.first() {
        info = info.with_context_entry("node", node.clone());
    }
    GraphValidationError::new(message)
        .with_nodes(nodes)
        .with_error_info(info)
}

fn validate(stages: &[StageDescriptor], pipes: &[PipeEdge]) -> Result<(), GraphValidationError> {
    if stages.is_empty() {
        return Err(invalid("GRAPH-001-EMPTY", "Graph has no stages".to_string(), Vec::new()));
    }
    if !stages.iter().any(|s| s.role == StageRole::Source) {
        return Err(invalid("GRAPH-001-EMPTY", "Graph has no source".to_string(), Vec::new()));
    }

    let mut roles: HashMap<&str, StageRole> = HashMap::new();
    for stage in stages {
        if roles.insert(stage.name.as_str(), stage.role).is_some() {
            return Err(invalid(
                "GRAPH-002-DUPLICATE",
                format!("Duplicate stage name '{}'", stage.name),
                vec![stage.name.clone()],
            ));
        }
        if !stage.body.fits(stage.role) {
            return Err(invalid(
                "GRAPH-004-ROLE",
                format!(
                    "Stage '{}' is declared as {} but bound to a {} body",
                    stage.name,
                    stage.role,
                    stage.body.kind()
                ),
                vec![stage.name.clone()],
            ));
        }
    }

    let mut producers: HashSet<&str> = HashSet::new();
    let mut fed: HashSet<&str> = HashSet::new();
    for pipe in pipes {
        let from_role = roles.get(pipe.from.as_str()).copied().ok_or_else(|| {
            invalid(
                "GRAPH-003-UNKNOWN_NODE",
                format!("Pipe from unknown stage '{}'", pipe.from),
                vec![pipe.from.clone()],
            )
        })?;
        if !from_role.is_producer() {
            return Err(invalid(
                "GRAPH-004-ROLE",
                format!("Destination '{}' cannot send rows", pipe.from),
                vec![pipe.from.clone()],
            ));
        }
        if !producers.insert(pipe.from.as_str()) {
            return Err(invalid(
                "GRAPH-006-DUPLICATE_PIPE",
                format!("Stage '{}' declares more than one pipe", pipe.from),
                vec![pipe.from.clone()],
            ));
        }

        let mut consumers: HashSet<&str> = HashSet::new();
        for to in &pipe.to {
            let to_role = roles.get(to.as_str()).copied().ok_or_else(|| {
                invalid(
                    "GRAPH-003-UNKNOWN_NODE",
                    format!("Pipe from '{}' to unknown stage '{to}'", pipe.from),
                    vec![to.clone()],
                )
            })?;
            if !to_role.is_consumer() {
                return Err(invalid(
                    "GRAPH-004-ROLE",
                    format!("Source '{to}' cannot receive rows"),
                    vec![to.clone()],
                ));
            }
            if !consumers.insert(to.as_str()) {
                return Err(invalid(
                    "GRAPH-006-DUPLICATE_PIPE",
                    format!("Pipe from '{}' lists '{to}' twice", pipe.from),
                    vec![pipe.from.clone(), to.clone()],
                ));
            }
            fed.insert(to.as_str());
        }
    }

    let orphans: Vec<String> = stages
        .iter()
        .filter(|s| s.role.is_consumer() && !fed.contains(s.name.as_str()))
        .map(|s| s.name.clone())
        .collect();
    if !orphans.is_empty() {
        return Err(invalid(
            "GRAPH-005-ORPHAN",
            format!("Stages without upstream: {}", orphans.join(", ")),
            orphans,
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Emitter;
    use crate::stages::{FnDestination, FnTransform, IterSource};
    use serde_json::json;

    fn numbers() -> StageDescriptor {
        StageDescriptor::source("numbers", IterSource::new(vec![json!(1)]))
    }

    fn double() -> StageDescriptor {
        StageDescriptor::transform(
            "double",
            FnTransform::new(|row, out: &mut Emitter| {
                out.emit(json!(row.as_i64().unwrap_or_default() * 2));
                Ok(())
            }),
        )
    }

    fn sink(name: &str) -> StageDescriptor {
        StageDescriptor::destination(name, FnDestination::new(|_row| Ok(())))
    }

    fn code(result: Result<GraphDescriptor, GraphValidationError>) -> String {
        result.unwrap_err().code().unwrap_or_default().to_string()
    }

    #[test]
    fn test_valid_graph() {
        let graph = GraphDescriptor::new(
            "etl",
            vec![numbers(), double(), sink("out")],
            vec![
                PipeEdge::new("numbers", ["double"]),
                PipeEdge::new("double", ["out"]),
            ],
        )
        .unwrap();

        assert_eq!(graph.name(), "etl");
        assert_eq!(graph.stages().len(), 3);
        assert_eq!(graph.downstream_of("numbers"), ["double".to_string()]);
        assert!(graph.downstream_of("out").is_empty());
        assert_eq!(graph.upstream_of("out"), vec!["double"]);
    }

    #[test]
    fn test_empty_graph() {
        assert_eq!(code(GraphDescriptor::new("g", vec![], vec![])), "GRAPH-001-EMPTY");
    }

    #[test]
    fn test_duplicate_names() {
        let result = GraphDescriptor::new(
            "g",
            vec![numbers(), sink("out"), sink("out")],
            vec![PipeEdge::new("numbers", ["out"])],
        );
        assert_eq!(code(result), "GRAPH-002-DUPLICATE");
    }

    #[test]
    fn test_unknown_node() {
        let result = GraphDescriptor::new(
            "g",
            vec![numbers(), sink("out")],
            vec![PipeEdge::new("numbers", ["missing"])],
        );
        let err = result.unwrap_err();
        assert_eq!(err.code(), Some("GRAPH-003-UNKNOWN_NODE"));
        assert_eq!(err.nodes, vec!["missing".to_string()]);
        assert!(err.error_info.unwrap().fix_hint.is_some());
    }

    #[test]
    fn test_role_mismatches() {
        let into_source = GraphDescriptor::new(
            "g",
            vec![numbers(), double()],
            vec![
                PipeEdge::new("numbers", ["double"]),
                PipeEdge::new("double", ["numbers"]),
            ],
        );
        assert_eq!(code(into_source), "GRAPH-004-ROLE");

        let from_destination = GraphDescriptor::new(
            "g",
            vec![numbers(), sink("a"), sink("b")],
            vec![PipeEdge::new("numbers", ["a"]), PipeEdge::new("a", ["b"])],
        );
        assert_eq!(code(from_destination), "GRAPH-004-ROLE");
    }

    #[test]
    fn test_body_must_fit_role() {
        let wrong = StageDescriptor::new(
            "load",
            StageRole::Destination,
            StageBody::source(IterSource::new(vec![json!(1)])),
        );
        let result = GraphDescriptor::new("g", vec![numbers(), wrong], vec![]);
        assert_eq!(code(result), "GRAPH-004-ROLE");
    }

    #[test]
    fn test_orphan_consumer() {
        let result = GraphDescriptor::new(
            "g",
            vec![numbers(), double(), sink("out")],
            vec![PipeEdge::new("numbers", ["double"])],
        );
        let err = result.unwrap_err();
        assert_eq!(err.code(), Some("GRAPH-005-ORPHAN"));
        assert_eq!(err.nodes, vec!["out".to_string()]);
    }

    #[test]
    fn test_duplicate_pipes() {
        let twice = GraphDescriptor::new(
            "g",
            vec![numbers(), sink("out")],
            vec![PipeEdge::new("numbers", ["out"]), PipeEdge::new("numbers", ["out"])],
        );
        assert_eq!(code(twice), "GRAPH-006-DUPLICATE_PIPE");

        let repeated = GraphDescriptor::new(
            "g",
            vec![numbers(), sink("out")],
            vec![PipeEdge::new("numbers", ["out", "out"])],
        );
        assert_eq!(code(repeated), "GRAPH-006-DUPLICATE_PIPE");
    }

    #[test]
    fn test_source_without_consumers_is_allowed() {
        assert!(GraphDescriptor::new("g", vec![numbers()], vec![]).is_ok());
    }
}
