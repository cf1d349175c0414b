//! An adapter counting its opens and closes.

use crate::adapters::{Adapter, AdapterHandle};
use crate::errors::AdapterError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// An adapter whose handle is a `Vec<String>` query log.
#[derive(Debug, Default)]
pub struct CountingAdapter {
    opened: AtomicUsize,
    closed: AtomicUsize,
    fail_open: bool,
}

impl CountingAdapter {
    /// Creates an adapter that opens successfully.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an adapter whose `open` always fails.
    #[must_use]
    pub fn failing_open() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    /// Returns the number of successful opens.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Returns the number of closes.
    #[must_use]
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Adapter for CountingAdapter {
    async fn open(&self) -> Result<AdapterHandle, AdapterError> {
        if self.fail_open {
            return Err(AdapterError::open("counting", "connection refused"));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Vec::<String>::new()))
    }

    async fn close(&self, _handle: AdapterHandle) -> Result<(), AdapterError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
