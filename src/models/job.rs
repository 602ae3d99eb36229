// Job Model
// Batch archival transcode jobs and the notification payloads they emit.
// Jobs are ephemeral, in-memory state; nothing here is ever persisted.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// A queued "convert to archival format" job.
///
/// Created on enqueue, owned by the queue until the worker finishes with it,
/// then discarded. The source may be a single video file or a directory of
/// downloaded files.
#[derive(Debug, Clone)]
pub struct ArchiveJob {
    /// Unique id for log correlation
    pub id: Uuid,

    /// Content identifier, used for best-effort seeding-engine removal
    pub content_id: String,

    /// Source file or directory on disk
    pub source: PathBuf,

    /// Display name for notifications
    pub name: String,
}

impl ArchiveJob {
    pub fn new(content_id: impl Into<String>, source: PathBuf, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content_id: content_id.into(),
            source,
            name: name.into(),
        }
    }
}

/// Phase of a transcode reported through the notification channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscodeStatus {
    Transcoding,
    Completed,
}

/// Progress sample broadcast while a file is being transcoded.
/// Broadcast-only and never stored; percent is clamped to 0..=100.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeProgress {
    pub file_name: String,
    pub progress: u8,
    pub status: TranscodeStatus,
}

/// Generic user-facing alert
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub title: String,
    pub message: String,
}
