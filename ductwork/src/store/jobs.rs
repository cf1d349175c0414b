//! Key layout of job and pipeline status in a [`StatusStore`].
//!
//! ```text
//! <ns>:job:<id>             JobRecord
//! <ns>:pipeline:<id>        PipelineRecord
//! <ns>:job_registry         [id, ...]
//! <ns>:pipeline_registry    [id, ...]
//! ```

use super::{InMemoryStatusStore, JobRecord, PipelineRecord, StatusStore};
use crate::config::StoreConfig;
use crate::errors::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Typed access to job and pipeline status.
#[derive(Clone)]
pub struct JobStore {
    store: Arc<dyn StatusStore>,
    namespace: String,
    expiration: Duration,
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore")
            .field("namespace", &self.namespace)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

impl JobStore {
    /// Creates a job store over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn StatusStore>, config: &StoreConfig) -> Self {
        Self {
            store,
            namespace: config.namespace.clone(),
            expiration: config.expiration(),
        }
    }

    /// Creates a job store over a fresh [`InMemoryStatusStore`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStatusStore::new()), &StoreConfig::default())
    }

    /// Returns the underlying status store.
    #[must_use]
    pub fn status_store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }

    /// Returns the key namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the key of a job record.
    #[must_use]
    pub fn job_key(&self, id: Uuid) -> String {
        format!("{}:job:{id}", self.namespace)
    }

    /// Returns the key of a pipeline record.
    #[must_use]
    pub fn pipeline_key(&self, id: Uuid) -> String {
        format!("{}:pipeline:{id}", self.namespace)
    }

    fn job_registry_key(&self) -> String {
        format!("{}:job_registry", self.namespace)
    }

    fn pipeline_registry_key(&self) -> String {
        format!("{}:pipeline_registry", self.namespace)
    }

    /// Registers a job and writes it as queued.
    pub async fn track_job(&self, id: Uuid, name: &str) -> Result<JobRecord, StoreError> {
        self.store
            .register(&self.job_registry_key(), &id.to_string(), Some(self.expiration))
            .await?;
        let record = JobRecord::queued(id, name);
        self.write_job(&record).await?;
        Ok(record)
    }

    /// Writes a job record.
    pub async fn write_job(&self, record: &JobRecord) -> Result<(), StoreError> {
        self.write_record(&self.job_key(record.id), record).await
    }

    /// Reads a job record.
    pub async fn read_job(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        let key = self.job_key(id);
        match self.store.read(&key).await? {
            Some(value) => decode(&key, value).map(Some),
            None => Ok(None),
        }
    }

    /// Reads several job records. Missing ones are absent from the result.
    pub async fn read_jobs(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, JobRecord>, StoreError> {
        let keys: Vec<String> = ids.iter().map(|id| self.job_key(*id)).collect();
        let values = self.store.read_multi(&keys).await?;

        let mut records = HashMap::with_capacity(values.len());
        for (key, value) in values {
            let record: JobRecord = decode(&key, value)?;
            records.insert(record.id, record);
        }
        Ok(records)
    }

    /// Returns the ids of every registered job.
    pub async fn job_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        self.registry_ids(&self.job_registry_key()).await
    }

    /// Returns every registered job that still has a record.
    pub async fn all_jobs(&self) -> Result<Vec<JobRecord>, StoreError> {
        let ids = self.job_ids().await?;
        let mut records = self.read_jobs(&ids).await?;
        Ok(ids.iter().filter_map(|id| records.remove(id)).collect())
    }

    /// Registers a pipeline and writes its initial record.
    pub async fn register_pipeline(&self, record: &PipelineRecord) -> Result<(), StoreError> {
        self.store
            .register(
                &self.pipeline_registry_key(),
                &record.id.to_string(),
                Some(self.expiration),
            )
            .await?;
        self.write_pipeline(record).await
    }

    /// Writes a pipeline record.
    pub async fn write_pipeline(&self, record: &PipelineRecord) -> Result<(), StoreError> {
        self.write_record(&self.pipeline_key(record.id), record).await
    }

    /// Reads a pipeline record.
    pub async fn read_pipeline(&self, id: Uuid) -> Result<Option<PipelineRecord>, StoreError> {
        let key = self.pipeline_key(id);
        match self.store.read(&key).await? {
            Some(value) => decode(&key, value).map(Some),
            None => Ok(None),
        }
    }

    /// Returns every registered pipeline that still has a record.
    pub async fn all_pipelines(&self) -> Result<Vec<PipelineRecord>, StoreError> {
        let ids = self.registry_ids(&self.pipeline_registry_key()).await?;
        let keys: Vec<String> = ids.iter().map(|id| self.pipeline_key(*id)).collect();
        let values = self.store.read_multi(&keys).await?;

        let mut records = Vec::with_capacity(values.len());
        for key in &keys {
            if let Some(value) = values.get(key) {
                records.push(decode(key, value.clone())?);
            }
        }
        Ok(records)
    }

    /// Returns true when every registered job and pipeline is terminal.
    ///
    /// A registered id whose record has expired counts as terminal.
    pub async fn all_done(&self) -> Result<bool, StoreError> {
        let jobs_done = self.all_jobs().await?.iter().all(JobRecord::is_terminal);
        if !jobs_done {
            return Ok(false);
        }
        Ok(self
            .all_pipelines()
            .await?
            .iter()
            .all(|p| p.status.is_terminal()))
    }

    async fn write_record<T: Serialize + Sync>(
        &self,
        key: &str,
        record: &T,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(record).map_err(|source| StoreError::Decode {
            key: key.to_string(),
            source,
        })?;
        self.store.write(key, value, Some(self.expiration)).await
    }

    async fn registry_ids(&self, key: &str) -> Result<Vec<Uuid>, StoreError> {
        match self.store.read(key).await? {
            Some(value) => decode(key, value),
            None => Ok(Vec::new()),
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|source| StoreError::Decode {
        key: key.to_string(),
        source,
    })
}
