//! Stage role and job status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The role a stage plays in a dataflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageRole {
    /// Produces rows from an external system.
    Source,
    /// Turns input rows into zero, one or many output rows.
    Transform,
    /// A transform that enriches rows from an adapter.
    Lookup,
    /// Writes rows to an external system.
    Destination,
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Transform => write!(f, "transform"),
            Self::Lookup => write!(f, "lookup"),
            Self::Destination => write!(f, "destination"),
        }
    }
}

impl StageRole {
    /// Returns true if the stage can send rows downstream.
    #[must_use]
    pub const fn is_producer(self) -> bool {
        !matches!(self, Self::Destination)
    }

    /// Returns true if the stage can receive rows from upstream.
    #[must_use]
    pub const fn is_consumer(self) -> bool {
        !matches!(self, Self::Source)
    }
}

/// The status of a background job or pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted, not yet picked up.
    #[default]
    Queued,
    /// Currently running.
    Working,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Working => write!(f, "working"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl JobStatus {
    /// Returns true if the status represents a terminal state.
    ///
    /// A failed job is terminal: it unblocks dependents like a completed one.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_role_display() {
        assert_eq!(StageRole::Source.to_string(), "source");
        assert_eq!(StageRole::Transform.to_string(), "transform");
        assert_eq!(StageRole::Lookup.to_string(), "lookup");
        assert_eq!(StageRole::Destination.to_string(), "destination");
    }

    #[test]
    fn test_stage_role_direction() {
        assert!(StageRole::Source.is_producer());
        assert!(!StageRole::Source.is_consumer());
        assert!(StageRole::Lookup.is_producer());
        assert!(StageRole::Lookup.is_consumer());
        assert!(!StageRole::Destination.is_producer());
    }

    #[test]
    fn test_job_status_is_terminal() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Working.is_terminal());
    }

    #[test]
    fn test_job_status_serialize() {
        let json = serde_json::to_string(&JobStatus::Working).unwrap();
        assert_eq!(json, r#""working""#);

        let deserialized: JobStatus = serde_json::from_str(r#""failed""#).unwrap();
        assert_eq!(deserialized, JobStatus::Failed);
    }

    #[test]
    fn test_stage_role_serialize() {
        let json = serde_json::to_string(&StageRole::Lookup).unwrap();
        assert_eq!(json, r#""lookup""#);
    }
}
