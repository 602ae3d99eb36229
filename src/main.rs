use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Json, Path, Query, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    env,
    fs::OpenOptions,
    io::Write,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use seedstream_server::models::{ArchiveJob, Settings};
use seedstream_server::services::{
    is_direct_play, is_video_file, list_entries, notify_alert, prune_logs, resolve_ffmpeg_path,
    resolve_within, serve_file, ArchiveRunner, ContentCatalog, DiskCatalog, EventSink,
    HwAccelDetector, NoopSeedEngine, SettingsManager, StreamTranscoder, TranscodeError,
    TranscodeQueue,
};

// ============================================================================
// Event System
// ============================================================================

#[derive(Clone, Serialize)]
struct ServerEvent {
    event: String,
    payload: Value,
}

#[derive(Clone)]
struct EventBus {
    sender: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: &str, payload: Value) {
        let _ = self.sender.send(ServerEvent {
            event: event.to_string(),
            payload,
        });
    }
}

// ============================================================================
// Application State
// ============================================================================

#[derive(Clone)]
struct AppState {
    catalog: Arc<DiskCatalog>,
    detector: Arc<HwAccelDetector>,
    transcoder: Arc<StreamTranscoder>,
    queue: Arc<TranscodeQueue>,
    event_bus: EventBus,
}

// ============================================================================
// Logging
// ============================================================================

struct ServerLogger {
    file: Mutex<std::fs::File>,
    event_bus: EventBus,
    level: LevelFilter,
}

impl ServerLogger {
    fn new(log_dir: &std::path::Path, event_bus: EventBus) -> Result<Self, Box<dyn std::error::Error>> {
        let log_path = log_dir.join("seedstream-server.log");
        let file = OpenOptions::new().create(true).append(true).open(log_path)?;
        Ok(Self {
            file: Mutex::new(file),
            event_bus,
            level: LevelFilter::Info,
        })
    }
}

impl Log for ServerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp = Local::now();
        let date = timestamp.format("%Y-%m-%d");
        let time = timestamp.format("%H:%M:%S");
        let target = record.target();
        let level = record.level();
        let message = format!("{}", record.args());
        let line = format!("[{date}][{time}][{target}][{level}] {message}");

        if let Ok(mut file) = self.file.try_lock() {
            let _ = writeln!(file, "{line}");
        }

        let level_number = match level {
            Level::Error => 1,
            Level::Warn => 2,
            Level::Info => 3,
            Level::Debug => 4,
            Level::Trace => 5,
        };

        self.event_bus.emit(
            "log://log",
            json!({ "level": level_number, "message": message, "target": target }),
        );
    }

    fn flush(&self) {}
}

fn init_logger(
    log_dir: &std::path::Path,
    event_bus: EventBus,
) -> Result<(), Box<dyn std::error::Error>> {
    let logger = ServerLogger::new(log_dir, event_bus)?;
    let level = logger.level;
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(level);
    Ok(())
}

// ============================================================================
// Request Helpers
// ============================================================================

#[derive(Deserialize)]
struct FileQuery {
    file: Option<String>,
}

/// Map pipeline errors to HTTP responses
fn error_response(error: TranscodeError) -> Response {
    let status = match &error {
        TranscodeError::ContentNotFound(_) | TranscodeError::NoVideoFiles(_) => {
            StatusCode::NOT_FOUND
        }
        TranscodeError::PathTraversal(_) => StatusCode::FORBIDDEN,
        TranscodeError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    log::warn!("Request failed: {error}");
    (status, error.to_string()).into_response()
}

/// Resolve a content id plus optional `file` parameter to a concrete file on
/// disk. The file name is validated lexically against the content's base
/// directory before anything is opened.
fn resolve_media(
    state: &AppState,
    id: &str,
    file: Option<&str>,
) -> Result<(PathBuf, String), TranscodeError> {
    let item = state
        .catalog
        .lookup(id)
        .ok_or_else(|| TranscodeError::ContentNotFound(id.to_string()))?;

    match file {
        Some(name) => {
            let base = if item.path.is_dir() {
                item.path.clone()
            } else {
                item.path
                    .parent()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| item.path.clone())
            };
            let path = resolve_within(&base, name)?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.to_string());
            Ok((path, file_name))
        }
        None if item.path.is_dir() => {
            // No explicit file: play the first video in the directory
            let video = list_entries(&item.path)?
                .into_iter()
                .find(|p| is_video_file(p))
                .ok_or_else(|| TranscodeError::NoVideoFiles(item.path.clone()))?;
            let file_name = video
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| item.name.clone());
            Ok((video, file_name))
        }
        None => Ok((item.path.clone(), item.name.clone())),
    }
}

fn range_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::RANGE).and_then(|v| v.to_str().ok())
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn ready() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

/// GET /stream/:id?file=name - play a content item.
/// Directly-streamable formats are served from disk with byte-range support;
/// everything else goes through a live transcode session.
async fn stream_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
) -> Response {
    let (path, file_name) = match resolve_media(&state, &id, query.file.as_deref()) {
        Ok(resolved) => resolved,
        Err(e) => return error_response(e),
    };

    if is_direct_play(&path) {
        return match serve_file(&path, range_header(&headers), None).await {
            Ok(response) => response,
            Err(e) => error_response(e),
        };
    }

    match state.transcoder.open_stream(path, file_name).await {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "video/mp4")
            .header(header::CACHE_CONTROL, "no-cache")
            // A live transcode has no known length and cannot seek
            .header(header::ACCEPT_RANGES, "none")
            .body(body)
            .expect("static headers"),
        Err(e) => error_response(e),
    }
}

/// GET /download/:id?file=name - download the raw resolved file, never
/// transcoded
async fn download_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
) -> Response {
    let (path, file_name) = match resolve_media(&state, &id, query.file.as_deref()) {
        Ok(resolved) => resolved,
        Err(e) => return error_response(e),
    };

    match serve_file(&path, range_header(&headers), Some(&file_name)).await {
        Ok(response) => response,
        Err(e) => error_response(e),
    }
}

/// POST /api/transcode/:id - enqueue an archival conversion job
async fn transcode_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let item = match state.catalog.lookup(&id) {
        Some(item) => item,
        None => return error_response(TranscodeError::ContentNotFound(id)),
    };

    notify_alert(
        &state.event_bus,
        "Conversion queued",
        &format!("{} has been queued for conversion", item.name),
    );
    state.queue.enqueue(ArchiveJob::new(item.id, item.path, item.name));

    (StatusCode::ACCEPTED, Json(json!({ "ok": true }))).into_response()
}

/// GET /api/hwaccel - the cached hardware probe result
async fn hwaccel_handler(State(state): State<AppState>) -> Response {
    let profile = state.detector.detect().await;
    Json(json!({
        "installed": state.detector.encoder_installed(),
        "profile": profile,
    }))
    .into_response()
}

/// GET /ws - event bus fan-out (alerts, progress, log records)
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.event_bus.subscribe()))
}

async fn handle_socket(mut socket: WebSocket, mut receiver: broadcast::Receiver<ServerEvent>) {
    while let Ok(event) = receiver.recv().await {
        if let Ok(payload) = serde_json::to_string(&event) {
            if socket.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    }
}

// ============================================================================
// Server Setup
// ============================================================================

fn build_cors_layer() -> CorsLayer {
    let cors_origins = env::var("SEEDSTREAM_CORS_ORIGINS").unwrap_or_default();
    if cors_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = cors_origins
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

fn parse_host(host: &str) -> IpAddr {
    host.parse()
        .unwrap_or_else(|_| IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Graceful shutdown signal handler: waits for Ctrl+C or SIGTERM.
/// Active encode subprocesses are kill_on_drop children of request bodies
/// and queue workers, so dropping the runtime tears them down.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::info!("Shutdown signal received, server shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration from environment
    let data_dir = env::var("SEEDSTREAM_DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let log_dir = env::var("SEEDSTREAM_LOG_DIR").unwrap_or_else(|_| format!("{data_dir}/logs"));

    let app_data_dir = PathBuf::from(&data_dir);
    let log_dir_path = PathBuf::from(&log_dir);
    std::fs::create_dir_all(&app_data_dir)?;
    std::fs::create_dir_all(&log_dir_path)?;

    let settings_manager = SettingsManager::new(app_data_dir.clone());
    let settings = settings_manager.load().unwrap_or_else(|e| {
        eprintln!("Failed to load settings, using defaults: {e}");
        Settings::default()
    });

    let event_bus = EventBus::new();
    init_logger(&log_dir_path, event_bus.clone())?;
    let _ = prune_logs(&log_dir_path, settings.log_retention_days);

    // Env vars override settings for host/port/media dir
    let host = env::var("SEEDSTREAM_HOST").unwrap_or_else(|_| settings.backend_host.clone());
    let port: u16 = env::var("SEEDSTREAM_PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(settings.backend_port);
    let media_dir = env::var("SEEDSTREAM_MEDIA_DIR").unwrap_or_else(|_| settings.media_dir.clone());
    let media_dir_path = PathBuf::from(&media_dir);
    std::fs::create_dir_all(&media_dir_path)?;

    // Resolve ffmpeg once; a missing binary is surfaced per-request rather
    // than refusing to start, so the server still serves direct-play files
    let custom_ffmpeg = if settings.ffmpeg_path.is_empty() {
        None
    } else {
        Some(settings.ffmpeg_path.as_str())
    };
    let ffmpeg_path = match resolve_ffmpeg_path(custom_ffmpeg) {
        Some(path) => {
            log::info!("Using FFmpeg at {path:?}");
            path
        }
        None => {
            log::warn!("FFmpeg not found; transcoding endpoints will fail until it is installed");
            PathBuf::from("ffmpeg")
        }
    };

    let events: Arc<dyn EventSink> = Arc::new(event_bus.clone());
    let detector = Arc::new(HwAccelDetector::new(
        ffmpeg_path.to_string_lossy().into_owned(),
    ));
    let transcoder = Arc::new(StreamTranscoder::new(detector.clone(), events.clone()));
    let runner = Arc::new(ArchiveRunner::new(
        detector.clone(),
        Arc::new(NoopSeedEngine),
        events.clone(),
    ));
    let queue = Arc::new(TranscodeQueue::new(
        settings.queue_concurrency,
        runner,
        events.clone(),
    ));
    let catalog = Arc::new(DiskCatalog::new(media_dir_path.clone()));

    let state = AppState {
        catalog,
        detector,
        transcoder,
        queue,
        event_bus,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/ws", get(ws_handler))
        .route("/stream/:id", get(stream_handler))
        .route("/download/:id", get(download_handler))
        .route("/api/transcode/:id", post(transcode_handler))
        .route("/api/hwaccel", get(hwaccel_handler))
        .with_state(state)
        .layer(build_cors_layer());

    let address = SocketAddr::new(parse_host(&host), port);
    log::info!("SeedStream backend listening on http://{address}");
    log::info!("  Media directory: {media_dir_path:?}");

    let listener = tokio::net::TcpListener::bind(address).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
