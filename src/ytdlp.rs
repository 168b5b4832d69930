use std::{io::ErrorKind, path::Path, process::Stdio};

use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::Command,
    sync::mpsc,
    time::{Duration, timeout},
};
use tracing::warn;

use crate::error::ApiError;

const YT_DLP_BIN: &str = "yt-dlp";
const INFO_TIMEOUT_SECONDS: u64 = 180;
const AUDIO_BITRATE: &str = "192K";

/// Each progress line is rendered by yt-dlp as
/// `[progress] <percent>|<speed>|<eta>`, which keeps parsing trivial.
const PROGRESS_TEMPLATE: &str =
    "download:[progress] %(progress._percent_str)s|%(progress._speed_str)s|%(progress._eta_str)s";

/// Discrete lifecycle events drained from the engine's stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Downloading {
        percent: String,
        speed: String,
        eta: String,
    },
    PostProcessing,
}

/// The output container extension expected for a quality token. `mp3` is the
/// only token that changes it; everything else is merged into mp4.
pub fn expected_extension(quality: &str) -> &'static str {
    if quality == "mp3" { "mp3" } else { "mp4" }
}

/// Translates a quality token into engine directives. Unrecognized tokens fall
/// through to the best-available branch instead of failing.
pub fn build_download_args(
    quality: &str,
    output_template: &str,
    ffmpeg_path: Option<&str>,
) -> Vec<String> {
    let mut args = vec![
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        "--newline".to_string(),
        "--progress-template".to_string(),
        PROGRESS_TEMPLATE.to_string(),
        "-o".to_string(),
        output_template.to_string(),
    ];

    if let Some(location) = ffmpeg_path {
        args.push("--ffmpeg-location".to_string());
        args.push(location.to_string());
    }

    match quality {
        "mp3" => {
            args.push("-f".to_string());
            args.push("bestaudio/best".to_string());
            args.push("-x".to_string());
            args.push("--audio-format".to_string());
            args.push("mp3".to_string());
            args.push("--audio-quality".to_string());
            args.push(AUDIO_BITRATE.to_string());
        }
        "1080p" | "720p" => {
            let height = if quality == "1080p" { 1080 } else { 720 };
            args.push("-f".to_string());
            args.push(format!(
                "bestvideo[height<={height}][ext=mp4]+bestaudio[ext=m4a]/bestvideo[height<={height}]+bestaudio/best"
            ));
            args.push("--merge-output-format".to_string());
            args.push("mp4".to_string());
        }
        _ => {
            args.push("-f".to_string());
            args.push("bestvideo+bestaudio/best".to_string());
            args.push("--merge-output-format".to_string());
            args.push("mp4".to_string());
        }
    }

    args
}

/// Maps one stdout line to a lifecycle event, if it is one.
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix("[progress]") {
        let mut fields = rest.split('|');
        let percent = fields.next()?.trim().trim_end_matches('%').trim();
        let speed = fields.next().unwrap_or("N/A").trim();
        let eta = fields.next().unwrap_or("N/A").trim();

        return Some(ProgressEvent::Downloading {
            percent: percent.to_string(),
            speed: speed.to_string(),
            eta: eta.to_string(),
        });
    }

    const POSTPROCESSOR_TAGS: [&str; 3] = ["[Merger]", "[ExtractAudio]", "[ffmpeg]"];
    if POSTPROCESSOR_TAGS.iter().any(|tag| line.starts_with(tag)) {
        return Some(ProgressEvent::PostProcessing);
    }

    None
}

/// Runs the engine to completion, draining its stdout into the progress sink.
/// The call blocks its task for the full extraction + transcode span; there is
/// deliberately no timeout and no cancellation here.
pub async fn run_download(
    args: Vec<String>,
    events: mpsc::UnboundedSender<ProgressEvent>,
) -> Result<(), ApiError> {
    let mut child = Command::new(YT_DLP_BIN)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_error)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ApiError::internal("No se pudo capturar la salida de yt-dlp."))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| ApiError::internal("No se pudo capturar los errores de yt-dlp."))?;

    let reader_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(event) = parse_progress_line(&line)
                && events.send(event).is_err()
            {
                break;
            }
        }
    });

    let stderr_task = tokio::spawn(async move {
        let mut buffer = String::new();
        if let Err(error) = stderr.read_to_string(&mut buffer).await {
            warn!("No se pudo leer stderr de yt-dlp: {error}");
        }
        buffer
    });

    let status = child
        .wait()
        .await
        .map_err(|error| ApiError::internal(format!("No se pudo esperar a yt-dlp: {error}")))?;

    let _ = reader_task.await;
    let stderr_output = stderr_task.await.unwrap_or_default();

    if !status.success() {
        return Err(ApiError::internal(run_error_message(
            stderr_output.as_bytes(),
        )));
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct VideoInfo {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
}

/// Metadata probe for the synchronous `/api/info` path; unlike downloads this
/// one carries a timeout, because a request handler is waiting on it.
pub async fn fetch_video_info(url: &str) -> Result<VideoInfo, ApiError> {
    let command_future = Command::new(YT_DLP_BIN)
        .args(["-J", "--no-playlist", "--no-warnings", url])
        .output();

    let output = timeout(Duration::from_secs(INFO_TIMEOUT_SECONDS), command_future)
        .await
        .map_err(|_| {
            ApiError::bad_request("La consulta de metadatos excedio el tiempo limite.")
        })?
        .map_err(spawn_error)?;

    if !output.status.success() {
        return Err(ApiError::bad_request(run_error_message(&output.stderr)));
    }

    serde_json::from_slice(&output.stdout).map_err(|error| {
        ApiError::internal(format!("No se pudo interpretar JSON de yt-dlp: {error}"))
    })
}

/// Diagnostic probe for `/api/check_ffmpeg`. `ffmpeg_path` is the directory
/// yt-dlp is pointed at; the system `ffmpeg` is used when unset.
pub async fn ffmpeg_version(ffmpeg_path: Option<&str>) -> Option<String> {
    let binary = match ffmpeg_path {
        Some(dir) => Path::new(dir).join("ffmpeg"),
        None => Path::new("ffmpeg").to_path_buf(),
    };

    let output = Command::new(binary)
        .arg("-version")
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
}

fn spawn_error(error: std::io::Error) -> ApiError {
    if error.kind() == ErrorKind::NotFound {
        ApiError::internal(
            "yt-dlp no esta instalado en el sistema. Instala yt-dlp y reinicia el backend.",
        )
    } else {
        ApiError::internal(format!("No se pudo ejecutar yt-dlp: {error}"))
    }
}

fn run_error_message(stderr: &[u8]) -> String {
    let message = String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp no pudo completar la operacion")
        .to_string();

    if message.to_ascii_lowercase().contains("unsupported url") {
        "URL no soportada o invalida para descarga.".to_string()
    } else {
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mp3_selects_audio_extraction() {
        let args = build_download_args("mp3", "downloads/t.%(ext)s", None);
        assert!(args.contains(&"bestaudio/best".to_string()));
        assert!(args.contains(&"-x".to_string()));
        assert!(args.contains(&"--audio-format".to_string()));
        assert!(!args.contains(&"--merge-output-format".to_string()));
    }

    #[test]
    fn resolution_tokens_cap_height_and_merge() {
        for (token, height) in [("1080p", 1080), ("720p", 720)] {
            let args = build_download_args(token, "downloads/t.%(ext)s", None);
            let selector = args
                .iter()
                .find(|arg| arg.contains("bestvideo"))
                .expect("format selector");
            assert!(selector.contains(&format!("height<={height}")));
            assert!(args.contains(&"--merge-output-format".to_string()));
        }
    }

    #[test]
    fn unknown_tokens_fall_through_to_best() {
        for token in ["best", "4k", ""] {
            let args = build_download_args(token, "downloads/t.%(ext)s", None);
            assert!(args.contains(&"bestvideo+bestaudio/best".to_string()));
            assert!(!args.contains(&"-x".to_string()));
        }
    }

    #[test]
    fn ffmpeg_location_is_forwarded_when_configured() {
        let args = build_download_args("best", "downloads/t.%(ext)s", Some("/opt/ffmpeg"));
        let position = args
            .iter()
            .position(|arg| arg == "--ffmpeg-location")
            .expect("ffmpeg location flag");
        assert_eq!(args[position + 1], "/opt/ffmpeg");

        let args = build_download_args("best", "downloads/t.%(ext)s", None);
        assert!(!args.contains(&"--ffmpeg-location".to_string()));
    }

    #[test]
    fn expected_extension_is_mp3_only_for_mp3() {
        assert_eq!(expected_extension("mp3"), "mp3");
        for token in ["best", "1080p", "720p", "flac"] {
            assert_eq!(expected_extension(token), "mp4");
        }
    }

    #[test]
    fn progress_lines_strip_the_percent_sign() {
        let event = parse_progress_line("[progress]  10.0%|1.21MiB/s|00:30").unwrap();
        assert_eq!(
            event,
            ProgressEvent::Downloading {
                percent: "10.0".to_string(),
                speed: "1.21MiB/s".to_string(),
                eta: "00:30".to_string(),
            }
        );
    }

    #[test]
    fn postprocessor_lines_map_to_post_processing() {
        for line in [
            "[Merger] Merging formats into \"downloads/t.mp4\"",
            "[ExtractAudio] Destination: downloads/t.mp3",
            "[ffmpeg] Correcting container",
        ] {
            assert_eq!(parse_progress_line(line), Some(ProgressEvent::PostProcessing));
        }
    }

    #[test]
    fn unrelated_lines_are_ignored() {
        assert_eq!(parse_progress_line("[youtube] abc: Downloading webpage"), None);
        assert_eq!(parse_progress_line("[download] Destination: downloads/t.mp4"), None);
        assert_eq!(parse_progress_line(""), None);
    }
}
