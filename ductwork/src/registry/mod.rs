//! Explicit registries of adapters and stage controls.
//!
//! Registries are plain values constructed once at startup and passed by
//! reference into graph resolution. Lookups fail with
//! [`NotFoundInRegistryError`] before any stage runs.

use crate::adapters::Adapter;
use crate::core::StageRole;
use crate::errors::{NotFoundInRegistryError, StageError};
use crate::stages::{StageBody, StageOptions};
use std::collections::HashMap;
use std::sync::Arc;

/// A named map from type names to items.
pub struct Registry<T> {
    name: String,
    items: HashMap<String, T>,
}

impl<T> Registry<T> {
    /// Creates an empty registry. `name` appears in lookup errors.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: HashMap::new(),
        }
    }

    /// Registers `item` under `kind`, replacing any previous entry.
    pub fn add(&mut self, kind: impl Into<String>, item: T) {
        self.items.insert(kind.into(), item);
    }

    /// Finds the item registered under `kind`.
    pub fn find(&self, kind: &str) -> Result<&T, NotFoundInRegistryError> {
        self.items
            .get(kind)
            .ok_or_else(|| NotFoundInRegistryError::new(&self.name, kind))
    }

    /// Returns true if `kind` is registered.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.items.contains_key(kind)
    }

    /// Returns the registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.items.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Returns the registry name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Registry of named adapter instances.
pub type AdapterRegistry = Registry<Arc<dyn Adapter>>;

/// Creates an empty adapter registry.
#[must_use]
pub fn adapter_registry() -> AdapterRegistry {
    Registry::new("adapter")
}

/// Builds a fresh stage body from the stage's options.
pub type ControlFactory = Box<dyn Fn(&StageOptions) -> Result<StageBody, StageError> + Send + Sync>;

/// Registry of stage control factories, one namespace per role.
#[derive(Debug)]
pub struct ControlRegistry {
    sources: Registry<ControlFactory>,
    transforms: Registry<ControlFactory>,
    lookups: Registry<ControlFactory>,
    destinations: Registry<ControlFactory>,
}

impl Default for ControlRegistry {
    fn default() -> Self {
        Self {
            sources: Registry::new(StageRole::Source.to_string()),
            transforms: Registry::new(StageRole::Transform.to_string()),
            lookups: Registry::new(StageRole::Lookup.to_string()),
            destinations: Registry::new(StageRole::Destination.to_string()),
        }
    }
}

impl ControlRegistry {
    /// Creates an empty control registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a control factory for `role`.
    pub fn add<F>(&mut self, role: StageRole, kind: impl Into<String>, factory: F)
    where
        F: Fn(&StageOptions) -> Result<StageBody, StageError> + Send + Sync + 'static,
    {
        self.registry_mut(role).add(kind, Box::new(factory));
    }

    /// Finds the factory registered for `role` under `kind`.
    pub fn find(
        &self,
        role: StageRole,
        kind: &str,
    ) -> Result<&ControlFactory, NotFoundInRegistryError> {
        self.registry(role).find(kind)
    }

    /// Returns the registry of one role.
    #[must_use]
    pub const fn registry(&self, role: StageRole) -> &Registry<ControlFactory> {
        match role {
            StageRole::Source => &self.sources,
            StageRole::Transform => &self.transforms,
            StageRole::Lookup => &self.lookups,
            StageRole::Destination => &self.destinations,
        }
    }

    fn registry_mut(&mut self, role: StageRole) -> &mut Registry<ControlFactory> {
        match role {
            StageRole::Source => &mut self.sources,
            StageRole::Transform => &mut self.transforms,
            StageRole::Lookup => &mut self.lookups,
            StageRole::Destination => &mut self.destinations,
        }
    }
}
