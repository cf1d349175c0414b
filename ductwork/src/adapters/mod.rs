//! External resource adapters.
//!
//! An adapter owns how a resource (a database pool, an HTTP client, a file)
//! is opened and closed. Stages bound to an adapter receive the opened handle
//! through their [`StageContext`](crate::stages::StageContext); the runner
//! opens it before the stage's first call and closes it exactly once after
//! the stage finishes, whether it succeeded or not.

mod scope;

pub use scope::AdapterScope;

use crate::errors::AdapterError;
use async_trait::async_trait;
use std::any::Any;

/// An opened adapter resource. Stages downcast it to the concrete type.
pub type AdapterHandle = Box<dyn Any + Send>;

/// Opens and closes an external resource.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Opens the resource.
    async fn open(&self) -> Result<AdapterHandle, AdapterError>;

    /// Closes a handle previously returned by [`Adapter::open`].
    async fn close(&self, handle: AdapterHandle) -> Result<(), AdapterError>;
}
