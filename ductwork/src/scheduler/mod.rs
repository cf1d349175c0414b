//! Dependency-ordered step orchestration.
//!
//! A [`StepScheduler`] runs named steps once every step they are declared
//! `after` has finished. Step bodies submit jobs through their
//! [`StepContext`], either waiting for each one (`submit_sync`) or not
//! (`submit_async`); a step only counts as finished once all its jobs are
//! terminal. Failed jobs are terminal too, so a failing job never blocks the
//! steps after it.
//!
//! The scheduler polls: each pass resumes every unfinished step once, then
//! sleeps for `tick`.

mod pipeline;
mod runner;
mod step;


pub use pipeline::Pipeline;
pub use runner::StepScheduler;
pub use step::{StepBody, StepContext, StepFuture, StepSpec};
