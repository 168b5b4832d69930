use tokio::net::TcpListener;
use tracing::{info, warn};

use tubefetch::{
    app::{AppState, build_router},
    config::{Config, resolve_bind_addr},
    error::ApiError,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "tubefetch=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let config = Config::from_env();

    tokio::fs::create_dir_all(&config.download_dir)
        .await
        .map_err(|error| {
            ApiError::internal(format!("No se pudo crear la carpeta de descargas: {error}"))
        })?;

    if config.youtube_api_key.is_none() {
        warn!("YOUTUBE_API_KEY no esta configurado. El endpoint de busqueda respondera con error.");
    }
    if config.ffmpeg_path.is_none() {
        info!("FFMPEG_PATH no configurado. yt-dlp usara el ffmpeg del sistema.");
    }

    let state = AppState::new(config)?;
    let app = build_router(state)?;

    let addr = resolve_bind_addr();
    let listener = TcpListener::bind(&addr).await.map_err(|error| {
        ApiError::internal(format!("No se pudo iniciar el puerto {addr}: {error}"))
    })?;

    info!("Backend listo en http://{addr}");

    axum::serve(listener, app)
        .await
        .map_err(|error| ApiError::internal(format!("Error del servidor HTTP: {error}")))
}
