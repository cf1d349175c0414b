//! Job and pipeline status records.

use crate::core::JobStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of one submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    /// The job id.
    pub id: Uuid,
    /// The job name.
    pub name: String,
    /// The current status.
    pub status: JobStatus,
    /// The captured error of a failed job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Creates a queued record.
    #[must_use]
    pub fn queued(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            status: JobStatus::Queued,
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Moves the record to `status`.
    #[must_use]
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self.updated_at = Utc::now();
        self
    }

    /// Marks the record failed with `error`.
    #[must_use]
    pub fn failed(self, error: impl Into<String>) -> Self {
        let mut record = self.with_status(JobStatus::Failed);
        record.error = Some(error.into());
        record
    }

    /// Returns true if the job will not change status again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Progress of one step inside a pipeline record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// The step name.
    pub name: String,
    /// Whether the step finished.
    pub done: bool,
    /// Jobs the step submitted.
    #[serde(default)]
    pub jobs: Vec<Uuid>,
}

/// Status of a step pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRecord {
    /// The pipeline id.
    pub id: Uuid,
    /// The pipeline name.
    pub name: String,
    /// The current status.
    pub status: JobStatus,
    /// Per-step progress, in declaration order.
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl PipelineRecord {
    /// Creates a queued record with every step pending.
    #[must_use]
    pub fn queued<I, S>(id: Uuid, name: impl Into<String>, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id,
            name: name.into(),
            status: JobStatus::Queued,
            steps: steps
                .into_iter()
                .map(|name| StepRecord {
                    name: name.into(),
                    done: false,
                    jobs: Vec::new(),
                })
                .collect(),
            updated_at: Utc::now(),
        }
    }

    /// Sets the status and touches `updated_at`.
    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Records a finished step and its jobs. Unknown steps are ignored.
    pub fn finish_step(&mut self, name: &str, jobs: Vec<Uuid>) {
        if let Some(step) = self.steps.iter_mut().find(|s| s.name == name) {
            step.done = true;
            step.jobs = jobs;
            self.updated_at = Utc::now();
        }
    }

    /// Returns the steps that have not finished.
    #[must_use]
    pub fn pending_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| !s.done)
            .map(|s| s.name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_job_record_lifecycle() {
        let id = Uuid::new_v4();
        let record = JobRecord::queued(id, "load");
        assert_eq!(record.status, JobStatus::Queued);
        assert!(!record.is_terminal());

        let record = record.with_status(JobStatus::Working);
        assert!(!record.is_terminal());

        let record = record.failed("disk full");
        assert!(record.is_terminal());
        assert_eq!(record.error.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_job_record_serializes_status_lowercase() {
        let record = JobRecord::queued(Uuid::nil(), "load").with_status(JobStatus::Completed);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], json!("completed"));
        assert!(value.get("error").is_none());

        let back: JobRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_pipeline_record_steps() {
        let mut record = PipelineRecord::queued(Uuid::nil(), "nightly", ["extract", "load"]);
        assert_eq!(record.pending_steps(), vec!["extract", "load"]);

        let job = Uuid::new_v4();
        record.finish_step("extract", vec![job]);
        record.finish_step("missing", Vec::new());

        assert_eq!(record.pending_steps(), vec!["load"]);
        assert_eq!(record.steps[0].jobs, vec![job]);
    }
}
