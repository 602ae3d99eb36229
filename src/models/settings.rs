// Settings Model
// Application-wide configuration

use serde::{Deserialize, Serialize};

fn default_media_dir() -> String {
    "media".to_string()
}

fn default_backend_host() -> String {
    "127.0.0.1".to_string()
}

fn default_backend_port() -> u16 {
    8008
}

fn default_ffmpeg_path() -> String {
    String::new()
}

fn default_queue_concurrency() -> usize {
    1
}

fn default_log_retention_days() -> u32 {
    30
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Root directory containing downloaded media, one entry per content id
    #[serde(default = "default_media_dir")]
    pub media_dir: String,

    /// Host the HTTP server binds to
    #[serde(default = "default_backend_host")]
    pub backend_host: String,

    /// Port the HTTP server binds to
    #[serde(default = "default_backend_port")]
    pub backend_port: u16,

    /// Explicit FFmpeg binary path; empty means discover on PATH
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Worker count for the archival transcode queue.
    /// Kept at 1 so background jobs never compete with each other for
    /// the encoder while viewers are streaming.
    #[serde(default = "default_queue_concurrency")]
    pub queue_concurrency: usize,

    /// Days to keep server log files before pruning
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            media_dir: default_media_dir(),
            backend_host: default_backend_host(),
            backend_port: default_backend_port(),
            ffmpeg_path: default_ffmpeg_path(),
            queue_concurrency: default_queue_concurrency(),
            log_retention_days: default_log_retention_days(),
        }
    }
}
