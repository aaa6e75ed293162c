//! Annotation run lifecycle. The transition matrix lives on
//! [`RunStatus`]; this service enforces it against the store.

use std::sync::Arc;

use tracing::info;

use skein_common::{AnnotationRun, Result, RunCreate, RunStatus, SkeinError};
use skein_store::Store;

pub struct RunService {
    store: Arc<dyn Store>,
}

impl RunService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create_run(&self, create: RunCreate) -> Result<AnnotationRun> {
        let run = self.store.create_run(create).await?;
        info!(run_id = run.id, name = %run.name, "created annotation run");
        Ok(run)
    }

    pub async fn get_run(&self, run_id: i64) -> Result<AnnotationRun> {
        self.store
            .get_run(run_id)
            .await?
            .ok_or_else(|| SkeinError::NotFound(format!("run {run_id}")))
    }

    /// Move a run to `next`, rejecting transitions outside the lifecycle
    /// DAG.
    pub async fn transition(
        &self,
        run_id: i64,
        next: RunStatus,
        error_message: Option<String>,
    ) -> Result<AnnotationRun> {
        let run = self.get_run(run_id).await?;
        if !run.status.can_transition(next) {
            return Err(SkeinError::InvalidStatusTransition {
                from: run.status,
                to: next,
            });
        }
        self.store
            .update_run_status(run_id, next, error_message)
            .await?;
        info!(run_id, from = %run.status, to = %next, "run status transition");
        self.get_run(run_id).await
    }

    pub async fn pause(&self, run_id: i64) -> Result<AnnotationRun> {
        self.transition(run_id, RunStatus::Paused, None).await
    }

    pub async fn resume(&self, run_id: i64) -> Result<AnnotationRun> {
        self.transition(run_id, RunStatus::Running, None).await
    }

    /// Retry a failed run: back to PENDING with the error cleared.
    pub async fn retry(&self, run_id: i64) -> Result<AnnotationRun> {
        self.transition(run_id, RunStatus::Pending, None).await
    }

    /// Deleting a run cascades to its annotations.
    pub async fn delete_run(&self, run_id: i64) -> Result<()> {
        self.store.delete_run(run_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_store::MemoryStore;

    async fn service_with_run() -> (RunService, i64) {
        let service = RunService::new(Arc::new(MemoryStore::new()));
        let run = service
            .create_run(RunCreate {
                infospace_id: 1,
                user_id: 1,
                name: "run".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        (service, run.id)
    }

    #[tokio::test]
    async fn test_lifecycle_happy_path() {
        let (service, run_id) = service_with_run().await;
        service
            .transition(run_id, RunStatus::Running, None)
            .await
            .unwrap();
        let paused = service.pause(run_id).await.unwrap();
        assert_eq!(paused.status, RunStatus::Paused);
        let resumed = service.resume(run_id).await.unwrap();
        assert_eq!(resumed.status, RunStatus::Running);
        let done = service
            .transition(run_id, RunStatus::Completed, None)
            .await
            .unwrap();
        assert_eq!(done.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_illegal_transition_rejected() {
        let (service, run_id) = service_with_run().await;
        let err = service
            .transition(run_id, RunStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SkeinError::InvalidStatusTransition { .. }));
    }

    #[tokio::test]
    async fn test_retry_clears_error() {
        let (service, run_id) = service_with_run().await;
        service
            .transition(run_id, RunStatus::Running, None)
            .await
            .unwrap();
        let failed = service
            .transition(run_id, RunStatus::Failed, Some("provider down".into()))
            .await
            .unwrap();
        assert_eq!(failed.error_message.as_deref(), Some("provider down"));

        let retried = service.retry(run_id).await.unwrap();
        assert_eq!(retried.status, RunStatus::Pending);
        assert!(retried.error_message.is_none());
    }

    #[tokio::test]
    async fn test_terminal_states_are_final() {
        let (service, run_id) = service_with_run().await;
        service
            .transition(run_id, RunStatus::Running, None)
            .await
            .unwrap();
        service
            .transition(run_id, RunStatus::CompletedWithErrors, None)
            .await
            .unwrap();
        assert!(service.retry(run_id).await.is_err());
        assert!(service.pause(run_id).await.is_err());
    }
}
