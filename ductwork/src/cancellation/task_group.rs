//! Structured task group for running sibling tasks that fail together.

use super::CancellationToken;
use crate::errors::DuctworkError;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::debug;

/// A group of related tasks sharing one cancellation token.
///
/// The first task that fails cancels the token so its siblings can stop. The
/// group only returns once every task has finished.
pub struct TaskGroup {
    /// The cancellation token shared by the group.
    cancel_token: Arc<CancellationToken>,
    /// Spawned tasks, tagged with their names.
    tasks: JoinSet<(String, Result<(), DuctworkError>)>,
}

impl TaskGroup {
    /// Creates a new task group with a fresh token.
    #[must_use]
    pub fn new() -> Self {
        Self::with_token(Arc::new(CancellationToken::new()))
    }

    /// Creates a task group bound to an existing token.
    #[must_use]
    pub fn with_token(cancel_token: Arc<CancellationToken>) -> Self {
        Self {
            cancel_token,
            tasks: JoinSet::new(),
        }
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel_token
    }

    /// Spawns a named task in the group.
    pub fn spawn<Fut>(&mut self, name: impl Into<String>, task: Fut)
    where
        Fut: Future<Output = Result<(), DuctworkError>> + Send + 'static,
    {
        let name = name.into();
        self.tasks.spawn(async move { (name, task.await) });
    }

    /// Returns the number of tasks not yet joined.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Waits for every task.
    ///
    /// Returns the first non-cancellation error. When tasks only report
    /// cancellation, the first of those is returned instead.
    pub async fn wait(mut self) -> Result<(), DuctworkError> {
        let mut first_error: Option<DuctworkError> = None;
        let mut first_cancellation: Option<DuctworkError> = None;

        while let Some(joined) = self.tasks.join_next().await {
            let (name, error) = match joined {
                Ok((_, Ok(()))) => continue,
                Ok((name, Err(e))) => (name, e),
                Err(join_error) => (
                    "task".to_string(),
                    DuctworkError::Internal(format!("Task join error: {join_error}")),
                ),
            };

            if error.is_cancellation() {
                debug!(task = %name, "Task stopped on cancellation");
                first_cancellation.get_or_insert(error);
            } else if first_error.is_none() {
                self.cancel_token.cancel(format!("{name} failed: {error}"));
                first_error = Some(error);
            }
        }

        match first_error.or(first_cancellation) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("task_count", &self.task_count())
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_task_group_success() {
        let mut group = TaskGroup::new();
        group.spawn("task1", async { Ok(()) });
        group.spawn("task2", async { Ok(()) });

        assert_eq!(group.task_count(), 2);
        assert!(group.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_first_error_cancels_siblings() {
        let mut group = TaskGroup::new();
        let token = group.cancel_token().clone();
        let counter = Arc::new(AtomicUsize::new(0));

        let sibling_token = token.clone();
        let sibling_counter = counter.clone();
        group.spawn("long_task", async move {
            for _ in 0..100 {
                if sibling_token.is_cancelled() {
                    return Err(DuctworkError::Cancelled("sibling failed".to_string()));
                }
                sibling_counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok(())
        });
        group.spawn("failure", async {
            tokio::time::sleep(Duration::from_millis(15)).await;
            Err(DuctworkError::Internal("boom".to_string()))
        });

        let err = group.wait().await.unwrap_err();
        assert!(matches!(err, DuctworkError::Internal(ref m) if m == "boom"));
        assert!(token.is_cancelled());
        assert!(counter.load(Ordering::SeqCst) < 100);
    }

    fn group_should_panic() -> bool {
        true
    }

    #[tokio::test]
    async fn test_panicking_task_is_reported() {
        let mut group = TaskGroup::new();
        group.spawn("panics", async {
            if group_should_panic() {
                panic!("Intentional panic");
            }
            Ok(())
        });

        let err = group.wait().await.unwrap_err();
        assert!(matches!(err, DuctworkError::Internal(_)));
    }

    #[tokio::test]
    async fn test_only_cancellations_returns_cancellation() {
        let token = Arc::new(CancellationToken::new());
        token.cancel("manual");
        let mut group = TaskGroup::with_token(token);
        group.spawn("stopped", async {
            Err(DuctworkError::Cancelled("manual".to_string()))
        });

        assert!(group.wait().await.unwrap_err().is_cancellation());
    }
}
