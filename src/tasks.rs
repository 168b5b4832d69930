use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ApiError;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Downloading,
    Processing,
    Finished,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Error)
    }
}

/// One tracked download job. The registry key equals `id` and equals the
/// base name of the output file on disk.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub progress: String,
    pub speed: String,
    pub eta: String,
    pub quality: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    fn new(id: &str, quality: &str) -> Self {
        Self {
            id: id.to_string(),
            status: TaskStatus::Pending,
            progress: "0".to_string(),
            speed: "0".to_string(),
            eta: "0".to_string(),
            quality: quality.to_string(),
            created_at: Utc::now(),
            error: None,
        }
    }
}

/// In-memory store of all tasks. Rows are created by the submitting handler
/// and from then on mutated only through the transition methods below, by the
/// single worker that owns the row. Rows are never evicted: the registry grows
/// for the life of the process and is lost on restart.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<Mutex<HashMap<String, Task>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, id: &str, quality: &str) -> Result<(), ApiError> {
        let mut tasks = self.inner.lock().await;
        if tasks.contains_key(id) {
            return Err(ApiError::internal(format!(
                "Ya existe una tarea con el identificador {id}."
            )));
        }

        tasks.insert(id.to_string(), Task::new(id, quality));
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Task> {
        self.inner.lock().await.get(id).cloned()
    }

    pub async fn snapshot(&self) -> HashMap<String, Task> {
        self.inner.lock().await.clone()
    }

    /// Last event wins: every tick overwrites the previous metrics.
    pub async fn set_downloading(&self, id: &str, progress: &str, speed: &str, eta: &str) {
        self.transition(id, |task| {
            if matches!(task.status, TaskStatus::Pending | TaskStatus::Downloading) {
                task.status = TaskStatus::Downloading;
                task.progress = progress.to_string();
                task.speed = speed.to_string();
                task.eta = eta.to_string();
                true
            } else {
                false
            }
        })
        .await;
    }

    /// Download phase complete; post-processing emits no further ticks.
    pub async fn set_processing(&self, id: &str) {
        self.transition(id, |task| {
            if matches!(task.status, TaskStatus::Pending | TaskStatus::Downloading) {
                task.status = TaskStatus::Processing;
                task.progress = "100".to_string();
                true
            } else {
                false
            }
        })
        .await;
    }

    /// Success is only reachable through `processing`; the worker forces that
    /// transition before finishing even when no post-processor ran.
    pub async fn set_finished(&self, id: &str) {
        self.transition(id, |task| {
            if matches!(task.status, TaskStatus::Processing) {
                task.status = TaskStatus::Finished;
                true
            } else {
                false
            }
        })
        .await;
    }

    pub async fn set_error(&self, id: &str, message: String) {
        self.transition(id, |task| {
            task.status = TaskStatus::Error;
            task.error = Some(message);
            true
        })
        .await;
    }

    /// Terminal rows are frozen: no transition ever leaves `finished` or
    /// `error`, regardless of what the caller asks for.
    async fn transition(&self, id: &str, apply: impl FnOnce(&mut Task) -> bool) {
        let mut tasks = self.inner.lock().await;
        match tasks.get_mut(id) {
            Some(task) if !task.status.is_terminal() => {
                if !apply(task) {
                    debug!("Transicion ignorada para la tarea {id}");
                }
            }
            Some(task) => {
                debug!(
                    "Tarea {id} ya es terminal ({:?}); transicion ignorada",
                    task.status
                );
            }
            None => {
                debug!("Transicion sobre tarea desconocida {id}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_returns_pending_row() {
        let registry = TaskRegistry::new();
        registry.create("t1", "720p").await.unwrap();

        let task = registry.get("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, "0");
        assert_eq!(task.quality, "720p");
        assert!(task.error.is_none());
    }

    #[tokio::test]
    async fn duplicate_create_fails() {
        let registry = TaskRegistry::new();
        registry.create("t1", "best").await.unwrap();
        assert!(registry.create("t1", "mp3").await.is_err());
    }

    #[tokio::test]
    async fn unknown_task_is_absent_not_an_error() {
        let registry = TaskRegistry::new();
        assert!(registry.get("nope").await.is_none());
        assert!(registry.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn happy_path_follows_state_machine() {
        let registry = TaskRegistry::new();
        registry.create("t1", "best").await.unwrap();

        for progress in ["10", "55", "99"] {
            registry
                .set_downloading("t1", progress, "1.2MiB/s", "00:30")
                .await;
            let task = registry.get("t1").await.unwrap();
            assert_eq!(task.status, TaskStatus::Downloading);
            assert_eq!(task.progress, progress);
        }

        registry.set_processing("t1").await;
        let task = registry.get("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.progress, "100");

        registry.set_finished("t1").await;
        assert_eq!(
            registry.get("t1").await.unwrap().status,
            TaskStatus::Finished
        );
    }

    #[tokio::test]
    async fn error_is_reachable_before_any_progress() {
        let registry = TaskRegistry::new();
        registry.create("t1", "mp3").await.unwrap();

        registry.set_error("t1", "fallo de red".to_string()).await;
        let task = registry.get("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.error.as_deref(), Some("fallo de red"));
    }

    #[tokio::test]
    async fn terminal_states_are_frozen() {
        let registry = TaskRegistry::new();
        registry.create("ok", "best").await.unwrap();
        registry.create("bad", "best").await.unwrap();

        registry.set_processing("ok").await;
        registry.set_finished("ok").await;
        registry.set_downloading("ok", "50", "1MiB/s", "00:10").await;
        registry.set_error("ok", "tarde".to_string()).await;
        let task = registry.get("ok").await.unwrap();
        assert_eq!(task.status, TaskStatus::Finished);
        assert!(task.error.is_none());

        registry.set_error("bad", "boom".to_string()).await;
        registry.set_processing("bad").await;
        registry.set_finished("bad").await;
        let task = registry.get("bad").await.unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn finished_is_only_reachable_from_processing() {
        let registry = TaskRegistry::new();
        registry.create("t1", "best").await.unwrap();

        registry.set_finished("t1").await;
        assert_eq!(registry.get("t1").await.unwrap().status, TaskStatus::Pending);

        registry.set_downloading("t1", "50", "1MiB/s", "00:10").await;
        registry.set_finished("t1").await;
        assert_eq!(
            registry.get("t1").await.unwrap().status,
            TaskStatus::Downloading
        );

        registry.set_processing("t1").await;
        registry.set_finished("t1").await;
        assert_eq!(
            registry.get("t1").await.unwrap().status,
            TaskStatus::Finished
        );
    }

    #[tokio::test]
    async fn processing_never_goes_back_to_downloading() {
        let registry = TaskRegistry::new();
        registry.create("t1", "1080p").await.unwrap();

        registry.set_downloading("t1", "99", "2MiB/s", "00:01").await;
        registry.set_processing("t1").await;
        registry.set_downloading("t1", "10", "1MiB/s", "00:50").await;

        let task = registry.get("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.progress, "100");
    }
}
