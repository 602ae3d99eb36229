// Streaming Transcode Session
// Per-request orchestration: spawn ffmpeg, pipe its stdout straight into the
// HTTP response body, and retry once in software when a hardware encode
// fails. The body stream is the session's lifetime: when the client
// disconnects axum drops it, and kill_on_drop children make teardown a
// single idempotent path for both the primary and fallback subprocess.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use axum::body::Body;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

use crate::models::TranscodeStatus;
use crate::services::hwaccel::{HardwareProfile, HwAccelDetector};
use crate::services::progress::pump_progress;
use crate::services::transcode_args::{stream_args, OutputTarget};
use crate::services::{notify_alert, notify_progress, EventSink, TranscodeError};

const STDOUT_CHUNK: usize = 64 * 1024;

/// Encode attempt currently feeding the response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// First attempt with a validated hardware profile
    EncodingHardware,
    /// First attempt with no hardware in play; a failure here is final
    EncodingSoftwareOnly,
    /// Second attempt after a hardware failure; a failure here is final
    EncodingSoftwareFallback,
}

/// Spawns per-request streaming transcode sessions
pub struct StreamTranscoder {
    detector: Arc<HwAccelDetector>,
    events: Arc<dyn EventSink>,
}

impl StreamTranscoder {
    pub fn new(detector: Arc<HwAccelDetector>, events: Arc<dyn EventSink>) -> Self {
        Self { detector, events }
    }

    /// Start a live transcode of `source` and return the response body.
    ///
    /// Errors here surface as a server error because no headers have been
    /// sent yet; once the body is returned, failures can only end the stream.
    pub async fn open_stream(
        &self,
        source: PathBuf,
        file_name: String,
    ) -> Result<Body, TranscodeError> {
        if !self.detector.encoder_installed() {
            notify_alert(
                &*self.events,
                "Transcoding unavailable",
                "FFmpeg is not installed, cannot transcode for playback",
            );
            return Err(TranscodeError::EncoderNotInstalled);
        }

        let profile = self.detector.detect().await;
        let state = if profile.is_some() {
            SessionState::EncodingHardware
        } else {
            SessionState::EncodingSoftwareOnly
        };

        let mut session = StreamSession {
            ffmpeg_path: self.detector.ffmpeg_path().to_string(),
            events: self.events.clone(),
            source,
            file_name,
            profile,
            state,
        };

        let first = session.spawn_encode(false)?;
        Ok(session.into_body(first))
    }
}

struct ActiveEncode {
    child: Child,
    stdout: ChildStdout,
}

/// One viewer's session. Owned by the response body stream; destroyed when
/// the stream ends or the connection closes.
struct StreamSession {
    ffmpeg_path: String,
    events: Arc<dyn EventSink>,
    source: PathBuf,
    file_name: String,
    profile: Option<HardwareProfile>,
    state: SessionState,
}

impl StreamSession {
    fn spawn_encode(&self, force_software: bool) -> Result<ActiveEncode, TranscodeError> {
        let args = stream_args(
            &self.source,
            OutputTarget::Stream,
            self.profile.as_ref(),
            force_software,
        );
        log::info!(
            "Starting stream transcode of {:?}: ffmpeg {}",
            self.file_name,
            args.join(" ")
        );

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(TranscodeError::Spawn)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            TranscodeError::Spawn(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "encoder stdout not captured",
            ))
        })?;

        if let Some(stderr) = child.stderr.take() {
            pump_progress(stderr, self.events.clone(), self.file_name.clone());
        }

        Ok(ActiveEncode { child, stdout })
    }

    /// Turn the session into a response body. The generator below is the
    /// session state machine: it drains one encode's stdout, inspects the
    /// exit status, and either finishes, falls back to software once, or
    /// ends the stream.
    fn into_body(mut self, first: ActiveEncode) -> Body {
        let stream = async_stream::stream! {
            let mut encode = first;
            let mut buf = vec![0u8; STDOUT_CHUNK];
            loop {
                loop {
                    match encode.stdout.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => yield Ok::<_, std::io::Error>(Bytes::copy_from_slice(&buf[..n])),
                        Err(e) => {
                            log::warn!("Encoder stdout read failed for {:?}: {e}", self.file_name);
                            break;
                        }
                    }
                }

                let code = match encode.child.wait().await {
                    Ok(status) if status.success() => {
                        log::info!("Stream transcode of {:?} completed", self.file_name);
                        notify_progress(
                            &*self.events,
                            &self.file_name,
                            100,
                            TranscodeStatus::Completed,
                        );
                        return;
                    }
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(e) => {
                        log::error!("Failed to reap encoder for {:?}: {e}", self.file_name);
                        return;
                    }
                };

                match self.state {
                    SessionState::EncodingHardware => {
                        self.state = SessionState::EncodingSoftwareFallback;
                        log::warn!(
                            "Hardware encode of {:?} exited with status {code}, retrying in software",
                            self.file_name
                        );
                        notify_alert(
                            &*self.events,
                            "Hardware transcoding failed",
                            &format!("Falling back to software encoding for {}", self.file_name),
                        );
                        match self.spawn_encode(true) {
                            Ok(next) => encode = next,
                            Err(e) => {
                                log::error!("Software fallback failed to start: {e}");
                                return;
                            }
                        }
                    }
                    SessionState::EncodingSoftwareOnly | SessionState::EncodingSoftwareFallback => {
                        // Headers are long gone; all we can do is stop.
                        log::error!(
                            "Transcode of {:?} failed with status {code}, ending stream",
                            self.file_name
                        );
                        return;
                    }
                }
            }
        };

        Body::from_stream(stream)
    }
}
