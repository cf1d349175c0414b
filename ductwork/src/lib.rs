//! # Ductwork
//!
//! Typed dataflow pipelines and dependency-ordered step orchestration.
//!
//! Ductwork has two layers:
//!
//! - **Dataflow**: graphs of sources, transforms, lookups and destinations
//!   connected by pipes. The same [`GraphDescriptor`](graph::GraphDescriptor)
//!   runs on a deterministic single-task runner or on a parallel runner that
//!   gives every stage its own task and channel.
//! - **Orchestration**: a step DAG whose steps submit background jobs and
//!   finish once those jobs are terminal. Job and pipeline status is
//!   published to a status store.
//!
//! Buffered transforms and destinations, paginated sources and match lookups
//! are provided as reusable stage policies. Stages reach external systems
//! through adapters, which every runner opens and closes around the stage.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ductwork::prelude::*;
//! use serde_json::json;
//!
//! let graph = GraphBuilder::new("copy")
//!     .source("numbers", IterSource::new((1..=5).map(|i| json!(i))))
//!     .transform("double", FnTransform::new(|row, out| {
//!         out.emit(json!(row.as_i64().unwrap_or_default() * 2));
//!         Ok(())
//!     }))
//!     .destination("print", FnDestination::new(|row| {
//!         println!("{row}");
//!         Ok(())
//!     }))
//!     .send_to("numbers", &["double"])
//!     .send_to("double", &["print"])
//!     .build()?;
//!
//! let report = CoroutineRunner::new().run(graph).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod adapters;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod dataflow;
pub mod errors;
pub mod events;
pub mod graph;
pub mod jobs;
pub mod observability;
pub mod registry;
pub mod scheduler;
pub mod stages;
pub mod store;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::adapters::{Adapter, AdapterHandle, AdapterScope};
    pub use crate::cancellation::{CancellationToken, TaskGroup};
    pub use crate::config::{
        DataflowConfig, DuctworkConfig, LoggingConfig, SchedulerConfig, StoreConfig,
    };
    pub use crate::core::{merge_rows, Emitter, JobStatus, Row, StageRole};
    pub use crate::dataflow::{
        run_graph, CoroutineRunner, DataflowReport, DataflowRunner, ParallelRunner, RunnerKind,
    };
    pub use crate::errors::{
        AdapterError, ContractErrorInfo, CycleDetectedError, DuctworkError,
        GraphValidationError, InconsistentPaginationError, NotFoundInRegistryError, StageError,
        StoreError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, SharedEventSink};
    pub use crate::graph::{GraphBuilder, GraphDescriptor, GraphSpec, PipeEdge, StageDescriptor};
    pub use crate::jobs::{
        perform, DataflowJob, FnJob, Job, JobHandle, JobQueue, LocalJobQueue, PerformMode,
    };
    pub use crate::observability::{init_tracing, SpanTimer};
    pub use crate::registry::{adapter_registry, AdapterRegistry, ControlRegistry, Registry};
    pub use crate::scheduler::{Pipeline, StepContext, StepScheduler, StepSpec};
    pub use crate::stages::{
        BufferedDestination, BufferedTransform, Destination, FlushDestination, FlushTransform,
        FnDestination, FnTransform, IterSource, MatchLookup, PageCursor, PageFetcher,
        PaginatedSource, Source, StageBody, StageContext, StageOptions, Transform,
    };
    pub use crate::store::{InMemoryStatusStore, JobStore, StatusStore};
}
