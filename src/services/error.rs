// Transcode Error Taxonomy
// Failure modes of the streaming and batch transcode pipelines

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The ffmpeg binary could not be found. Fatal for both the streaming
    /// and batch paths: software encoding needs the same missing binary.
    #[error("ffmpeg is not installed or could not be found")]
    EncoderNotInstalled,

    #[error("content not found: {0}")]
    ContentNotFound(String),

    /// A caller-supplied file name escaped the content's base directory.
    /// Raised before any filesystem or subprocess access.
    #[error("path traversal detected: {0:?}")]
    PathTraversal(String),

    #[error("failed to spawn encoder process: {0}")]
    Spawn(std::io::Error),

    #[error("encoder exited with status {0}")]
    ExitStatus(i32),

    /// A directory job contained no files with a known video extension
    #[error("no convertible video files in {0:?}")]
    NoVideoFiles(PathBuf),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
