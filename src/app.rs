use std::{collections::HashSet, sync::Arc};

use axum::{
    Router,
    http::{HeaderValue, Method, header::CONTENT_DISPOSITION},
    routing::{get, post},
};
use tokio::{
    sync::Semaphore,
    time::Duration,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{config::Config, error::ApiError, handlers, tasks::TaskRegistry};

const UPSTREAM_TIMEOUT_SECONDS: u64 = 10;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: TaskRegistry,
    pub download_semaphore: Arc<Semaphore>,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECONDS))
            .build()
            .map_err(|error| {
                ApiError::internal(format!("No se pudo crear cliente HTTP: {error}"))
            })?;

        Ok(Self {
            download_semaphore: Arc::new(Semaphore::new(config.max_concurrent_downloads)),
            registry: TaskRegistry::new(),
            http_client,
            config,
        })
    }
}

pub fn build_router(state: AppState) -> Result<Router, ApiError> {
    let cors = build_cors_layer()?;

    Ok(Router::new()
        .route("/", get(handlers::index))
        .route("/api/tasks", get(handlers::get_tasks))
        .route("/api/search", post(handlers::search))
        .route("/api/suggestions", post(handlers::suggestions))
        .route("/api/info", post(handlers::video_info))
        .route("/api/download", post(handlers::start_download))
        .route("/api/get_file/{task_id}", get(handlers::get_file))
        .route("/api/check_ffmpeg", get(handlers::check_ffmpeg))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}

fn build_cors_layer() -> Result<CorsLayer, ApiError> {
    let configured = std::env::var("ALLOWED_ORIGINS")
        .ok()
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(ToString::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let origins = if configured.is_empty() {
        warn!("ALLOWED_ORIGINS no esta configurado. Se usaran origenes de desarrollo por defecto.");
        vec![
            "http://127.0.0.1:5173".to_string(),
            "http://localhost:5173".to_string(),
        ]
    } else {
        configured
    };

    let normalized_origins = origins
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "Origen invalido en ALLOWED_ORIGINS: {origin}. Usa valores tipo https://dominio.com"
                ))
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;
    let allowed_origins = Arc::new(normalized_origins);
    let allow_origin = AllowOrigin::predicate({
        let allowed_origins = Arc::clone(&allowed_origins);
        move |origin: &HeaderValue, _| {
            let normalized = origin.to_str().ok().and_then(normalize_origin);
            let allowed = normalized
                .as_ref()
                .is_some_and(|value| allowed_origins.contains(value));
            debug!(
                "CORS origin check raw={:?} normalized={:?} allowed={}",
                origin, normalized, allowed
            );
            allowed
        }
    });
    info!(
        "CORS allow-list cargada con {} origen(es)",
        allowed_origins.len()
    );

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([CONTENT_DISPOSITION]))
}

fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };
    let port = parsed.port();

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    let include_port = port.is_some_and(|explicit| explicit != default_port);

    if include_port {
        Some(format!("{scheme}://{host}:{}", port?))
    } else {
        Some(format!("{scheme}://{host}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_origin_drops_default_ports() {
        assert_eq!(
            normalize_origin("https://example.com:443"),
            Some("https://example.com".to_string())
        );
        assert_eq!(
            normalize_origin("http://localhost:5173"),
            Some("http://localhost:5173".to_string())
        );
        assert_eq!(normalize_origin("https://example.com/path"), None);
        assert_eq!(normalize_origin("not-a-url"), None);
    }
}
