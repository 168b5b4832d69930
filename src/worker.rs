use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    app::AppState,
    error::ApiError,
    tasks::TaskRegistry,
    ytdlp::{self, ProgressEvent},
};

/// Fire-and-forget worker for one submitted job. The spawned task is the sole
/// mutator of its registry row; the submitting handler returns immediately and
/// never writes to the row again.
pub fn spawn_download(state: AppState, task_id: String, url: String, quality: String) {
    tokio::spawn(async move {
        run(state, task_id, url, quality).await;
    });
}

async fn run(state: AppState, task_id: String, url: String, quality: String) {
    let permit = match state.download_semaphore.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            state
                .registry
                .set_error(
                    &task_id,
                    "No se pudo reservar capacidad de descarga.".to_string(),
                )
                .await;
            return;
        }
    };

    info!("Iniciando descarga {task_id} ({quality}) de {url}");

    let output_template = state
        .config
        .download_dir
        .join(format!("{task_id}.%(ext)s"))
        .to_string_lossy()
        .into_owned();
    let mut args = ytdlp::build_download_args(
        &quality,
        &output_template,
        state.config.ffmpeg_path.as_deref(),
    );
    args.push(url);

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let engine = tokio::spawn(ytdlp::run_download(args, events_tx));

    while let Some(event) = events_rx.recv().await {
        apply_event(&state.registry, &task_id, event).await;
    }

    let result = match engine.await {
        Ok(result) => result,
        Err(error) => Err(ApiError::internal(format!(
            "El proceso de descarga se interrumpio: {error}"
        ))),
    };

    finalize(&state.registry, &task_id, result).await;
    drop(permit);
}

/// Streams one engine event into the registry. Last event wins; no smoothing.
pub(crate) async fn apply_event(registry: &TaskRegistry, task_id: &str, event: ProgressEvent) {
    match event {
        ProgressEvent::Downloading {
            percent,
            speed,
            eta,
        } => {
            registry
                .set_downloading(task_id, &percent, &speed, &eta)
                .await;
        }
        ProgressEvent::PostProcessing => {
            registry.set_processing(task_id).await;
        }
    }
}

/// Terminal transition. A successful engine run always passes through
/// `processing`, even when no post-processor line was observed.
pub(crate) async fn finalize(
    registry: &TaskRegistry,
    task_id: &str,
    result: Result<(), ApiError>,
) {
    match result {
        Ok(()) => {
            registry.set_processing(task_id).await;
            registry.set_finished(task_id).await;
            info!("Descarga {task_id} finalizada");
        }
        Err(error) => {
            debug!("Descarga {task_id} fallo: {}", error.message);
            registry.set_error(task_id, error.message).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskStatus;

    fn downloading(percent: &str) -> ProgressEvent {
        ProgressEvent::Downloading {
            percent: percent.to_string(),
            speed: "1.2MiB/s".to_string(),
            eta: "00:30".to_string(),
        }
    }

    #[tokio::test]
    async fn simulated_engine_drives_full_lifecycle() {
        let registry = TaskRegistry::new();
        registry.create("t1", "best").await.unwrap();

        for percent in ["10", "55", "99"] {
            apply_event(&registry, "t1", downloading(percent)).await;
            let task = registry.get("t1").await.unwrap();
            assert_eq!(task.status, TaskStatus::Downloading);
            assert_eq!(task.progress, percent);
        }

        apply_event(&registry, "t1", ProgressEvent::PostProcessing).await;
        let task = registry.get("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.progress, "100");

        finalize(&registry, "t1", Ok(())).await;
        assert_eq!(
            registry.get("t1").await.unwrap().status,
            TaskStatus::Finished
        );
    }

    #[tokio::test]
    async fn success_without_postprocessor_still_passes_through_processing() {
        let registry = TaskRegistry::new();
        registry.create("t1", "best").await.unwrap();

        apply_event(&registry, "t1", downloading("100")).await;
        finalize(&registry, "t1", Ok(())).await;

        let task = registry.get("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Finished);
        assert_eq!(task.progress, "100");
    }

    #[tokio::test]
    async fn engine_failure_captures_message_verbatim() {
        let registry = TaskRegistry::new();
        registry.create("t1", "mp3").await.unwrap();

        apply_event(&registry, "t1", downloading("42")).await;
        finalize(
            &registry,
            "t1",
            Err(ApiError::internal("ERROR: Video unavailable")),
        )
        .await;

        let task = registry.get("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.error.as_deref(), Some("ERROR: Video unavailable"));
        assert_eq!(task.progress, "42");
    }

    #[tokio::test]
    async fn immediate_failure_skips_downloading_entirely() {
        let registry = TaskRegistry::new();
        registry.create("t1", "720p").await.unwrap();

        finalize(
            &registry,
            "t1",
            Err(ApiError::internal("yt-dlp no esta instalado en el sistema.")),
        )
        .await;

        let task = registry.get("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.progress, "0");
    }
}
