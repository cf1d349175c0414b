//! Per-stage execution context.

use super::StageOptions;
use crate::adapters::AdapterScope;
use crate::errors::{AdapterError, StageError};

/// What a stage body sees of its node: its name, options and adapter handle.
///
/// Each stage instance owns its context exclusively. The runner opens the
/// adapter before the first call into the stage and releases it once the
/// stage has finished.
#[derive(Debug)]
pub struct StageContext {
    node: String,
    options: StageOptions,
    adapter: AdapterScope,
}

impl StageContext {
    /// Creates a context.
    #[must_use]
    pub fn new(node: impl Into<String>, options: StageOptions, adapter: AdapterScope) -> Self {
        Self {
            node: node.into(),
            options,
            adapter,
        }
    }

    /// A context without adapter, for driving stages directly.
    #[must_use]
    pub fn detached(node: impl Into<String>, options: StageOptions) -> Self {
        Self::new(node, options, AdapterScope::unbound())
    }

    /// Returns the node name.
    #[must_use]
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Returns the stage options.
    #[must_use]
    pub const fn options(&self) -> &StageOptions {
        &self.options
    }

    /// Returns the name of the bound adapter, if any.
    #[must_use]
    pub fn adapter_name(&self) -> Option<&str> {
        self.adapter.name()
    }

    /// Returns the open adapter handle as `T`.
    ///
    /// Fails with a contract violation when the stage has no adapter, the
    /// adapter is not open, or the handle is not a `T`.
    pub fn handle<T: 'static>(&mut self) -> Result<&mut T, StageError> {
        let node = self.node.clone();
        let handle = self.adapter.handle_mut().ok_or_else(|| {
            StageError::contract(format!("stage '{node}' has no open adapter handle"))
        })?;
        handle.downcast_mut::<T>().ok_or_else(|| {
            StageError::contract(format!(
                "adapter handle of stage '{node}' is not a {}",
                std::any::type_name::<T>()
            ))
        })
    }

    pub(crate) async fn open_adapter(&mut self) -> Result<(), AdapterError> {
        self.adapter.open().await
    }

    pub(crate) async fn release_adapter(&mut self) -> Result<(), AdapterError> {
        self.adapter.release().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CountingAdapter;
    use std::sync::Arc;

    #[test]
    fn test_detached_context_has_no_handle() {
        let mut ctx = StageContext::detached("load", StageOptions::new());
        assert_eq!(ctx.node(), "load");
        assert!(ctx.adapter_name().is_none());
        assert!(matches!(ctx.handle::<String>(), Err(StageError::Contract(_))));
    }

    #[tokio::test]
    async fn test_handle_downcast() {
        let adapter = Arc::new(CountingAdapter::new());
        let mut ctx = StageContext::new(
            "load",
            StageOptions::new(),
            AdapterScope::bound("db", adapter.clone()),
        );
        ctx.open_adapter().await.unwrap();

        ctx.handle::<Vec<String>>().unwrap().push("SELECT 1".to_string());
        assert!(matches!(ctx.handle::<u32>(), Err(StageError::Contract(_))));

        ctx.release_adapter().await.unwrap();
        assert_eq!(adapter.closed(), 1);
    }
}
