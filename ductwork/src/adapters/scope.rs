//! Open/close lifecycle of one stage's adapter.

use super::{Adapter, AdapterHandle};
use crate::errors::AdapterError;
use std::sync::Arc;
use tracing::{debug, warn};

/// Holds the adapter bound to a stage and, while open, its handle.
///
/// `release` is idempotent so runners can call it on every exit path.
#[derive(Default)]
pub struct AdapterScope {
    adapter: Option<(String, Arc<dyn Adapter>)>,
    handle: Option<AdapterHandle>,
}

impl AdapterScope {
    /// A scope for a stage without an adapter.
    #[must_use]
    pub fn unbound() -> Self {
        Self::default()
    }

    /// A scope for a stage bound to `adapter`, registered as `name`.
    #[must_use]
    pub fn bound(name: impl Into<String>, adapter: Arc<dyn Adapter>) -> Self {
        Self {
            adapter: Some((name.into(), adapter)),
            handle: None,
        }
    }

    /// Returns the adapter name, if bound.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.adapter.as_ref().map(|(name, _)| name.as_str())
    }

    /// Returns true if an adapter is bound.
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        self.adapter.is_some()
    }

    /// Returns true while the handle is open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Opens the adapter. No-op when unbound or already open.
    pub async fn open(&mut self) -> Result<(), AdapterError> {
        if self.handle.is_some() {
            return Ok(());
        }
        if let Some((name, adapter)) = &self.adapter {
            debug!(adapter = %name, "Opening adapter");
            self.handle = Some(adapter.open().await?);
        }
        Ok(())
    }

    /// Returns the open handle.
    pub fn handle_mut(&mut self) -> Option<&mut AdapterHandle> {
        self.handle.as_mut()
    }

    /// Closes the handle if it is open. Later calls are no-ops.
    pub async fn release(&mut self) -> Result<(), AdapterError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        match &self.adapter {
            Some((name, adapter)) => {
                debug!(adapter = %name, "Closing adapter");
                adapter.close(handle).await
            }
            None => Ok(()),
        }
    }
}

impl Drop for AdapterScope {
    fn drop(&mut self) {
        if self.handle.is_some() {
            warn!(
                adapter = self.name().unwrap_or("unknown"),
                "Adapter scope dropped while still open"
            );
        }
    }
}

impl std::fmt::Debug for AdapterScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterScope")
            .field("adapter", &self.name())
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CountingAdapter;

    #[tokio::test]
    async fn test_unbound_scope_is_inert() {
        let mut scope = AdapterScope::unbound();
        scope.open().await.unwrap();
        assert!(!scope.is_bound());
        assert!(!scope.is_open());
        scope.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_once_release_once() {
        let adapter = Arc::new(CountingAdapter::new());
        let mut scope = AdapterScope::bound("db", adapter.clone());

        scope.open().await.unwrap();
        scope.open().await.unwrap();
        assert!(scope.is_open());
        assert_eq!(scope.name(), Some("db"));

        scope.release().await.unwrap();
        scope.release().await.unwrap();
        assert!(!scope.is_open());

        assert_eq!(adapter.opened(), 1);
        assert_eq!(adapter.closed(), 1);
    }

    #[tokio::test]
    async fn test_handle_is_downcastable() {
        let mut scope = AdapterScope::bound("db", Arc::new(CountingAdapter::new()));
        scope.open().await.unwrap();

        let handle = scope.handle_mut().unwrap();
        assert!(handle.downcast_mut::<Vec<String>>().is_some());

        scope.release().await.unwrap();
    }
}
