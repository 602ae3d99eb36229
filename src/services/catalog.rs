// Content Catalog and Seeding Engine Collaborators
// The download catalog and torrent engine live outside this server; these
// traits are their contracts, with disk-backed/no-op defaults so the server
// runs standalone.

use std::path::{Path, PathBuf};

use crate::models::ContentItem;
use crate::services::path_validator::resolve_within;
use crate::services::TranscodeError;

/// Extensions the transcode pipeline treats as video
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "ts",
];

/// Extensions browsers can play directly, served as byte ranges
/// instead of going through the encoder
pub const DIRECT_PLAY_EXTENSIONS: &[&str] = &["mp4", "m4v", "webm", "mov"];

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

pub fn is_direct_play(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| DIRECT_PLAY_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Resolves a content identifier to a location on disk
pub trait ContentCatalog: Send + Sync {
    fn lookup(&self, id: &str) -> Option<ContentItem>;
}

/// Torrent engine hook: stop seeding a content item so its files can be
/// rewritten or deleted. Best-effort; failures are reported but never fatal.
pub trait SeedEngine: Send + Sync {
    fn remove(&self, content_id: &str) -> Result<(), String>;
}

/// Catalog backed by a flat media directory: each entry (file or directory)
/// directly under the root is addressable by its name.
pub struct DiskCatalog {
    root: PathBuf,
}

impl DiskCatalog {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl ContentCatalog for DiskCatalog {
    fn lookup(&self, id: &str) -> Option<ContentItem> {
        // The id doubles as a path segment, so it gets the same lexical
        // containment check as any caller-supplied name
        let path = resolve_within(&self.root, id).ok()?;
        if !path.exists() {
            return None;
        }
        Some(ContentItem::new(id, path, id))
    }
}

/// Stand-in for the torrent engine when none is wired up
pub struct NoopSeedEngine;

impl SeedEngine for NoopSeedEngine {
    fn remove(&self, content_id: &str) -> Result<(), String> {
        log::debug!("No seeding engine attached, skipping removal of {content_id}");
        Ok(())
    }
}

/// Directory-listing collaborator: entries of a content directory, in the
/// order the filesystem yields them.
pub fn list_entries(dir: &Path) -> Result<Vec<PathBuf>, TranscodeError> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        entries.push(entry?.path());
    }
    Ok(entries)
}
