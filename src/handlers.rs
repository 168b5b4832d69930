use std::{collections::HashMap, io::ErrorKind, path::Path};

use axum::{
    Json,
    body::Body,
    extract::{Path as UrlPath, State},
    http::{
        HeaderMap, HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{Html, IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::{
    app::AppState,
    config::non_empty,
    error::ApiError,
    tasks::{Task, TaskStatus},
    worker, ytdlp,
};

const YOUTUBE_SEARCH_URL: &str = "https://www.googleapis.com/youtube/v3/search";
const SUGGESTIONS_URL: &str = "http://suggestqueries.google.com/complete/search";
const SEARCH_MAX_RESULTS: &str = "10";
const DEFAULT_QUALITY: &str = "best";

pub async fn index() -> Html<&'static str> {
    Html(
        "<!DOCTYPE html><html><head><title>tubefetch</title></head>\
         <body><h1>tubefetch</h1><p>Backend de descargas. Usa los endpoints /api/*.</p></body></html>",
    )
}

pub async fn get_tasks(State(state): State<AppState>) -> Json<HashMap<String, Task>> {
    Json(state.registry.snapshot().await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    results: Vec<SearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResult {
    id: String,
    title: String,
    thumbnail: Option<String>,
    url: String,
}

#[derive(Debug, Deserialize)]
struct YoutubeSearchPage {
    #[serde(default)]
    items: Vec<YoutubeSearchItem>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YoutubeSearchItem {
    #[serde(default)]
    id: YoutubeVideoId,
    snippet: YoutubeSnippet,
}

#[derive(Debug, Deserialize, Default)]
struct YoutubeVideoId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YoutubeSnippet {
    title: String,
    #[serde(default)]
    thumbnails: YoutubeThumbnails,
}

#[derive(Debug, Deserialize, Default)]
struct YoutubeThumbnails {
    high: Option<YoutubeThumbnail>,
}

#[derive(Debug, Deserialize)]
struct YoutubeThumbnail {
    url: String,
}

pub async fn search(
    State(state): State<AppState>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let query = payload
        .query
        .as_deref()
        .and_then(non_empty)
        .ok_or_else(ApiError::missing_query)?
        .to_string();

    let api_key = state
        .config
        .youtube_api_key
        .as_deref()
        .ok_or_else(|| ApiError::internal("YOUTUBE_API_KEY no esta configurado."))?;

    let mut params = vec![
        ("part", "snippet".to_string()),
        ("maxResults", SEARCH_MAX_RESULTS.to_string()),
        ("q", query),
        ("type", "video".to_string()),
        ("key", api_key.to_string()),
    ];
    if let Some(page_token) = payload.page_token.as_deref().and_then(non_empty) {
        params.push(("pageToken", page_token.to_string()));
    }

    let page = state
        .http_client
        .get(YOUTUBE_SEARCH_URL)
        .query(&params)
        .send()
        .await
        .map_err(|error| ApiError::upstream(format!("Fallo la busqueda de videos: {error}")))?
        .json::<YoutubeSearchPage>()
        .await
        .map_err(|error| {
            ApiError::upstream(format!("Respuesta invalida de la API de busqueda: {error}"))
        })?;

    let results = page
        .items
        .into_iter()
        .filter_map(|item| {
            let video_id = item.id.video_id?;
            Some(SearchResult {
                url: format!("https://www.youtube.com/watch?v={video_id}"),
                id: video_id,
                title: item.snippet.title,
                thumbnail: item.snippet.thumbnails.high.map(|thumb| thumb.url),
            })
        })
        .collect();

    Ok(Json(SearchResponse {
        results,
        next_page_token: page.next_page_token,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SuggestionsRequest {
    #[serde(default)]
    query: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SuggestionsResponse {
    results: Vec<String>,
}

/// Unlike search, an empty query here is answered with an empty list, not a
/// validation error.
pub async fn suggestions(
    State(state): State<AppState>,
    Json(payload): Json<SuggestionsRequest>,
) -> Result<Json<SuggestionsResponse>, ApiError> {
    let Some(query) = payload.query.as_deref().and_then(non_empty) else {
        return Ok(Json(SuggestionsResponse { results: vec![] }));
    };

    let body = state
        .http_client
        .get(SUGGESTIONS_URL)
        .query(&[("client", "firefox"), ("ds", "yt"), ("q", query)])
        .send()
        .await
        .map_err(|error| ApiError::upstream(format!("Fallo la consulta de sugerencias: {error}")))?
        .json::<serde_json::Value>()
        .await
        .map_err(|error| {
            ApiError::upstream(format!("Respuesta invalida de sugerencias: {error}"))
        })?;

    let results = parse_suggestions(&body)?;

    Ok(Json(SuggestionsResponse { results }))
}

/// Upstream shape is `[query, [suggestion, ...], ...]`. Anything else is an
/// upstream failure, not an empty result.
fn parse_suggestions(body: &serde_json::Value) -> Result<Vec<String>, ApiError> {
    let entries = body.get(1).and_then(|value| value.as_array()).ok_or_else(|| {
        ApiError::upstream("Respuesta invalida de sugerencias: forma inesperada.")
    })?;

    Ok(entries
        .iter()
        .filter_map(|entry| entry.as_str().map(ToString::to_string))
        .collect())
}

#[derive(Debug, Deserialize)]
pub struct InfoRequest {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    title: Option<String>,
    thumbnail: Option<String>,
    duration: Option<f64>,
    formats: Vec<FormatOption>,
}

#[derive(Debug, Serialize)]
pub struct FormatOption {
    id: &'static str,
    label: &'static str,
}

fn format_catalog() -> Vec<FormatOption> {
    vec![
        FormatOption {
            id: "mp3",
            label: "Audio (MP3)",
        },
        FormatOption {
            id: "best",
            label: "Mejor calidad",
        },
        FormatOption {
            id: "1080p",
            label: "1080p",
        },
        FormatOption {
            id: "720p",
            label: "720p",
        },
    ]
}

pub async fn video_info(
    State(_state): State<AppState>,
    Json(payload): Json<InfoRequest>,
) -> Result<Json<InfoResponse>, ApiError> {
    let url = require_media_url(payload.url.as_deref())?;
    let info = ytdlp::fetch_video_info(&url).await?;

    Ok(Json(InfoResponse {
        title: info.title,
        thumbnail: info.thumbnail,
        duration: info.duration,
        formats: format_catalog(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    quality: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DownloadResponse {
    task_id: String,
}

/// Submission only validates that a URL is present. A malformed URL still
/// gets a task: the engine rejects it asynchronously and the failure lands in
/// the row's `error` field, observable by polling.
pub async fn start_download(
    State(state): State<AppState>,
    Json(payload): Json<DownloadRequest>,
) -> Result<Json<DownloadResponse>, ApiError> {
    let url = payload
        .url
        .as_deref()
        .and_then(non_empty)
        .ok_or_else(ApiError::missing_url)?
        .to_string();
    let quality = payload
        .quality
        .as_deref()
        .and_then(non_empty)
        .unwrap_or(DEFAULT_QUALITY)
        .to_string();

    let task_id = Uuid::new_v4().to_string();
    state.registry.create(&task_id, &quality).await?;
    worker::spawn_download(state, task_id.clone(), url, quality);

    Ok(Json(DownloadResponse { task_id }))
}

pub async fn get_file(
    State(state): State<AppState>,
    UrlPath(task_id): UrlPath<String>,
) -> Result<Response, ApiError> {
    let task = state
        .registry
        .get(&task_id)
        .await
        .filter(|task| task.status == TaskStatus::Finished)
        .ok_or_else(ApiError::file_not_ready)?;

    // The path is always recomputed from id + quality; nothing is stored.
    let extension = ytdlp::expected_extension(&task.quality);
    let filename = format!("{task_id}.{extension}");
    let file_path = state.config.download_dir.join(&filename);

    let file = match tokio::fs::File::open(&file_path).await {
        Ok(file) => file,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            return Err(ApiError::file_missing());
        }
        Err(error) => {
            return Err(ApiError::internal(format!(
                "No se pudo abrir el archivo descargado: {error}"
            )));
        }
    };

    let metadata = file.metadata().await.map_err(|error| {
        ApiError::internal(format!("No se pudo leer metadata del archivo: {error}"))
    })?;

    // Unlink before streaming: the open descriptor keeps the content readable
    // for this transfer, and the file is gone for any later fetch. Deletion
    // failure is swallowed.
    if let Err(error) = tokio::fs::remove_file(&file_path).await {
        debug!("No se pudo eliminar {filename}: {error}");
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_filename(&filename)),
    );
    headers.insert(
        CONTENT_LENGTH,
        HeaderValue::from_str(&metadata.len().to_string())
            .map_err(|_| ApiError::internal("No se pudo crear el tamano de descarga."))?,
    );
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(&filename))
            .map_err(|_| ApiError::internal("No se pudo crear la cabecera de descarga."))?,
    );

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((headers, body).into_response())
}

#[derive(Debug, Serialize)]
pub struct FfmpegResponse {
    installed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

pub async fn check_ffmpeg(State(state): State<AppState>) -> Json<FfmpegResponse> {
    let version = ytdlp::ffmpeg_version(state.config.ffmpeg_path.as_deref()).await;
    Json(FfmpegResponse {
        installed: version.is_some(),
        version,
    })
}

/// Guard for the synchronous `/api/info` probe, where a blocked handler is
/// waiting on the engine and a junk URL is worth rejecting up front.
fn require_media_url(url: Option<&str>) -> Result<String, ApiError> {
    let url = url.and_then(non_empty).ok_or_else(ApiError::missing_url)?;

    let parsed = Url::parse(url).map_err(|_| ApiError::missing_url())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ApiError::missing_url());
    }

    Ok(url.to_string())
}

fn content_type_for_filename(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        _ => "application/octet-stream",
    }
}

fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

fn sanitize_ascii_filename(value: &str) -> String {
    let mut sanitized = String::with_capacity(value.len());

    for character in value.chars() {
        if character.is_ascii_alphanumeric() || matches!(character, '.' | '-' | '_') {
            sanitized.push(character);
        } else {
            sanitized.push('_');
        }
    }

    let compact = sanitized.trim();
    if compact.is_empty() {
        "download.bin".to_string()
    } else {
        compact.to_string()
    }
}
