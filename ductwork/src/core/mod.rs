//! Core domain model types for ductwork.
//!
//! This module contains the fundamental types used throughout the framework:
//! - Rows and the emitter stages push output rows into
//! - Stage role and job status enums

mod row;
mod status;

pub use row::{merge_rows, Emitter, Row};
pub use status::{JobStatus, StageRole};
