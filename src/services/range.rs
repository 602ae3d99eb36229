// Range Streamer
// Serves already-compatible files straight from disk with HTTP byte-range
// support, bypassing the encoder entirely.

use std::io::SeekFrom;
use std::path::Path;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::services::TranscodeError;

const FILE_CHUNK: usize = 64 * 1024;

/// A single satisfiable byte range, inclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Outcome of interpreting a `Range` request header against a file length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// No header, or one too malformed to honor: serve the whole file
    Full,
    /// A well-formed satisfiable range
    Partial(ByteRange),
    /// Well-formed but outside the file
    Unsatisfiable,
}

/// Parse a `Range: bytes=<start>-<end>` header. Only the first range of a
/// multi-range request is honored; malformed input degrades to a whole-file
/// response rather than an error.
pub fn parse_range(header: Option<&str>, total: u64) -> RangeOutcome {
    let header = match header {
        Some(h) => h.trim(),
        None => return RangeOutcome::Full,
    };

    let spec = match header.strip_prefix("bytes=") {
        Some(s) => s,
        None => return RangeOutcome::Full,
    };

    // Multi-range: honor the first range only
    let first = spec.split(',').next().unwrap_or("").trim();

    let (start_str, end_str) = match first.split_once('-') {
        Some(parts) => parts,
        None => return RangeOutcome::Full,
    };

    if total == 0 {
        return RangeOutcome::Unsatisfiable;
    }

    let (start, end) = if start_str.is_empty() {
        // Suffix form: last N bytes
        let suffix: u64 = match end_str.parse() {
            Ok(n) => n,
            Err(_) => return RangeOutcome::Full,
        };
        if suffix == 0 {
            return RangeOutcome::Unsatisfiable;
        }
        (total.saturating_sub(suffix), total - 1)
    } else {
        let start: u64 = match start_str.parse() {
            Ok(n) => n,
            Err(_) => return RangeOutcome::Full,
        };
        let end: u64 = if end_str.is_empty() {
            total - 1
        } else {
            match end_str.parse() {
                Ok(n) => n,
                Err(_) => return RangeOutcome::Full,
            }
        };
        (start, end)
    };

    if start >= total || start > end {
        return RangeOutcome::Unsatisfiable;
    }

    RangeOutcome::Partial(ByteRange {
        start,
        end: end.min(total - 1),
    })
}

/// MIME type for a served file, from its extension
pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

/// Serve a file from disk, honoring an optional `Range` header.
/// `attachment_name` forces a download disposition (the /download surface).
pub async fn serve_file(
    path: &Path,
    range_header: Option<&str>,
    attachment_name: Option<&str>,
) -> Result<Response, TranscodeError> {
    let mut file = tokio::fs::File::open(path).await?;
    let total = file.metadata().await?.len();

    let (status, range) = match parse_range(range_header, total) {
        RangeOutcome::Full => (
            StatusCode::OK,
            ByteRange {
                start: 0,
                end: total.saturating_sub(1),
            },
        ),
        RangeOutcome::Partial(range) => (StatusCode::PARTIAL_CONTENT, range),
        RangeOutcome::Unsatisfiable => {
            let response = Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{total}"))
                .body(Body::empty())
                .expect("static response");
            return Ok(response);
        }
    };

    let length = if total == 0 { 0 } else { range.len() };
    file.seek(SeekFrom::Start(range.start)).await?;

    let body_stream = async_stream::stream! {
        let mut remaining = length;
        let mut buf = vec![0u8; FILE_CHUNK];
        while remaining > 0 {
            let want = (remaining as usize).min(FILE_CHUNK);
            match file.read(&mut buf[..want]).await {
                Ok(0) => break,
                Ok(n) => {
                    remaining -= n as u64;
                    yield Ok::<_, std::io::Error>(Bytes::copy_from_slice(&buf[..n]));
                }
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type_for(path))
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, length);

    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{total}", range.start, range.end),
        );
    }

    if let Some(name) = attachment_name {
        let disposition = format!("attachment; filename=\"{}\"", name.replace('"', ""));
        builder = builder.header(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_str(&disposition)
                .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
        );
    }

    Ok(builder.body(Body::from_stream(body_stream)).expect("valid response"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_parse_plain_range() {
        assert_eq!(
            parse_range(Some("bytes=100-199"), 1000),
            RangeOutcome::Partial(ByteRange { start: 100, end: 199 })
        );
    }

    #[test]
    fn test_parse_open_ended_and_suffix_ranges() {
        assert_eq!(
            parse_range(Some("bytes=500-"), 1000),
            RangeOutcome::Partial(ByteRange { start: 500, end: 999 })
        );
        assert_eq!(
            parse_range(Some("bytes=-200"), 1000),
            RangeOutcome::Partial(ByteRange { start: 800, end: 999 })
        );
    }

    #[test]
    fn test_parse_clamps_overlong_end() {
        assert_eq!(
            parse_range(Some("bytes=900-2000"), 1000),
            RangeOutcome::Partial(ByteRange { start: 900, end: 999 })
        );
    }

    #[test]
    fn test_multi_range_honors_first_only() {
        assert_eq!(
            parse_range(Some("bytes=0-99,200-299"), 1000),
            RangeOutcome::Partial(ByteRange { start: 0, end: 99 })
        );
    }

    #[test]
    fn test_absent_or_malformed_header_serves_full() {
        assert_eq!(parse_range(None, 1000), RangeOutcome::Full);
        assert_eq!(parse_range(Some("items=0-99"), 1000), RangeOutcome::Full);
        assert_eq!(parse_range(Some("bytes=abc-def"), 1000), RangeOutcome::Full);
    }

    #[test]
    fn test_out_of_bounds_is_unsatisfiable() {
        assert_eq!(parse_range(Some("bytes=1000-1099"), 1000), RangeOutcome::Unsatisfiable);
        assert_eq!(parse_range(Some("bytes=200-100"), 1000), RangeOutcome::Unsatisfiable);
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_serves_whole_file_without_range() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("movie.mp4");
        fs::write(&path, vec![7u8; 1000]).unwrap();

        let response = serve_file(&path, None, None).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "1000");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
        assert_eq!(body_bytes(response).await.len(), 1000);
    }

    #[tokio::test]
    async fn test_serves_exact_sub_range() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("movie.mp4");
        let data: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).unwrap();

        let response = serve_file(&path, Some("bytes=100-199"), None).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 100-199/1000");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "100");
        assert_eq!(body_bytes(response).await, data[100..200].to_vec());
    }

    #[tokio::test]
    async fn test_unsatisfiable_range_is_416() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("movie.mp4");
        fs::write(&path, vec![0u8; 100]).unwrap();

        let response = serve_file(&path, Some("bytes=500-600"), None).await.unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */100");
    }

    #[tokio::test]
    async fn test_attachment_disposition() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("movie.mkv");
        fs::write(&path, b"x").unwrap();

        let response = serve_file(&path, None, Some("movie.mkv")).await.unwrap();
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"movie.mkv\""
        );
    }
}
