//! Lifecycle event sinks.
//!
//! Runners and the step scheduler report lifecycle events (`dataflow.started`,
//! `step.finished`, ...) to an injected sink. There is no process-wide sink: each
//! component holds the sink it was built with.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, SharedEventSink};

use std::sync::Arc;

/// Returns a sink that discards every event.
#[must_use]
pub fn noop_sink() -> SharedEventSink {
    Arc::new(NoOpEventSink)
}
