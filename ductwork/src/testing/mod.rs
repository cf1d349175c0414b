//! Testing utilities for ductwork graphs and step DAGs.
//!
//! This module provides:
//! - Recording and failing stages
//! - A page fetcher over an in-memory table
//! - An adapter counting opens and closes

mod adapter;
mod mocks;

pub use adapter::CountingAdapter;
pub use mocks::{
    EndlessSource, FailingSource, FailingTransform, PassThrough, Recorder,
    RecordingDestination, RecordingFlush, VecPageFetcher,
};

pub use crate::events::CollectingEventSink;
