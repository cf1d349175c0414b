//! Cooperative cancellation and structured task groups.
//!
//! This module provides:
//! - `CancellationToken` for cooperative, awaitable cancellation
//! - `TaskGroup` for running sibling tasks that fail together

mod task_group;
mod token;

pub use task_group::TaskGroup;
pub use token::CancellationToken;
