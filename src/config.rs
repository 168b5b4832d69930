use std::path::PathBuf;

pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;
pub const DEFAULT_DOWNLOAD_DIR: &str = "downloads";

/// Runtime configuration, fully resolved from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub youtube_api_key: Option<String>,
    pub ffmpeg_path: Option<String>,
    pub download_dir: PathBuf,
    pub max_concurrent_downloads: usize,
}

impl Config {
    pub fn from_env() -> Self {
        let youtube_api_key = std::env::var("YOUTUBE_API_KEY")
            .ok()
            .and_then(|value| non_empty(&value).map(ToString::to_string));
        let ffmpeg_path = std::env::var("FFMPEG_PATH")
            .ok()
            .and_then(|value| non_empty(&value).map(ToString::to_string));
        let download_dir = std::env::var("DOWNLOAD_DIR")
            .ok()
            .and_then(|value| non_empty(&value).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR));
        let max_concurrent_downloads = read_usize_env("MAX_CONCURRENT_DOWNLOADS")
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_CONCURRENT_DOWNLOADS);

        Self {
            youtube_api_key,
            ffmpeg_path,
            download_dir,
            max_concurrent_downloads,
        }
    }
}

pub fn read_usize_env(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
}

pub fn resolve_bind_addr() -> String {
    if let Some(configured) = std::env::var("APP_ADDR")
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
    {
        return configured;
    }

    if let Some(port) = std::env::var("PORT")
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
    {
        return format!("0.0.0.0:{port}");
    }

    "127.0.0.1:8787".to_string()
}

pub fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_rejects_blank_values() {
        assert_eq!(non_empty("  "), None);
        assert_eq!(non_empty(""), None);
        assert_eq!(non_empty(" mp3 "), Some("mp3"));
    }
}
