//! Static description of a dataflow graph.
//!
//! A [`GraphDescriptor`] is an ordered list of stage descriptors plus the
//! forwarding edges between them. It is validated once when built and then
//! consumed by one of the dataflow runners. Graphs are assumed acyclic; that
//! is not checked.

mod builder;
mod descriptor;
mod spec;

pub use builder::GraphBuilder;
pub use descriptor::{AdapterBinding, GraphDescriptor, PipeEdge, StageDescriptor};
pub use spec::{GraphSpec, StageSpec};
