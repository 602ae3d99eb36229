// Transcode Progress Parser
// Scrapes duration and elapsed-time markers out of ffmpeg's human-readable
// stderr. Chunk-tolerant: stderr arrives in arbitrary slices that rarely
// align to line boundaries, so a trailing partial line is carried between
// pushes.

use regex::Regex;
use std::sync::OnceLock;

fn duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Duration:\s*(\d{2,}):(\d{2}):(\d{2})\.(\d+)").unwrap())
}

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"time=(\d{2,}):(\d{2}):(\d{2})\.(\d+)").unwrap())
}

/// Accumulates ffmpeg stderr chunks and yields monotonic percent-complete
/// values. The stream's total duration is captured at most once; until it is
/// known, elapsed markers produce nothing.
pub struct ProgressParser {
    duration_secs: Option<f64>,
    last_percent: Option<u8>,
    tail: String,
}

impl Default for ProgressParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressParser {
    pub fn new() -> Self {
        Self {
            duration_secs: None,
            last_percent: None,
            tail: String::new(),
        }
    }

    /// Total stream duration in seconds, once parsed
    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_secs
    }

    /// Feed one stderr chunk; returns the percent values to emit, in arrival
    /// order. Values never decrease and never exceed 100.
    pub fn push(&mut self, chunk: &str) -> Vec<u8> {
        let mut emitted = Vec::new();

        let buffer = format!("{}{}", self.tail, chunk);
        // ffmpeg terminates progress lines with \r and everything else
        // with \n; treat both as line breaks
        let complete_end = match buffer.rfind(['\r', '\n']) {
            Some(pos) => pos + 1,
            None => {
                self.tail = buffer;
                return emitted;
            }
        };
        let (complete, rest) = buffer.split_at(complete_end);
        self.tail = rest.to_string();

        for line in complete.split(['\r', '\n']).filter(|l| !l.is_empty()) {
            if self.duration_secs.is_none() {
                if let Some(caps) = duration_re().captures(line) {
                    self.duration_secs = Some(timestamp_secs(&caps));
                }
            }

            let duration = match self.duration_secs {
                Some(d) if d > 0.0 => d,
                _ => continue,
            };

            for caps in time_re().captures_iter(line) {
                let elapsed = timestamp_secs(&caps);
                let percent = ((elapsed / duration * 100.0).round() as u64).min(100) as u8;
                let percent = percent.max(self.last_percent.unwrap_or(0));
                self.last_percent = Some(percent);
                emitted.push(percent);
            }
        }

        emitted
    }
}

/// Drain an encoder's stderr in the background, feeding chunks through a
/// parser and publishing each sample to the notification channel. Reads raw
/// chunks rather than lines so the parser's chunk tolerance is exercised for
/// real: ffmpeg's progress output is not newline-terminated.
pub(crate) fn pump_progress(
    mut stderr: tokio::process::ChildStderr,
    events: std::sync::Arc<dyn crate::services::EventSink>,
    file_name: String,
) -> tokio::task::JoinHandle<()> {
    use tokio::io::AsyncReadExt;

    use crate::models::TranscodeStatus;
    use crate::services::notify_progress;

    tokio::spawn(async move {
        let mut parser = ProgressParser::new();
        let mut buf = [0u8; 4096];
        loop {
            match stderr.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let text = String::from_utf8_lossy(&buf[..n]);
                    for percent in parser.push(&text) {
                        notify_progress(&*events, &file_name, percent, TranscodeStatus::Transcoding);
                    }
                }
            }
        }
    })
}

/// Convert captured HH:MM:SS.ff groups to seconds
fn timestamp_secs(caps: &regex::Captures<'_>) -> f64 {
    let hours: f64 = caps[1].parse().unwrap_or(0.0);
    let minutes: f64 = caps[2].parse().unwrap_or(0.0);
    let seconds: f64 = caps[3].parse().unwrap_or(0.0);
    let frac_digits = caps[4].len() as i32;
    let frac: f64 = caps[4].parse().unwrap_or(0.0);
    hours * 3600.0 + minutes * 60.0 + seconds + frac / 10f64.powi(frac_digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Shape of real ffmpeg stderr, abbreviated
    const HEADER: &str = "Input #0, matroska,webm, from 'e1.mkv':\n  Duration: 00:01:40.00, start: 0.000000, bitrate: 4521 kb/s\n";

    fn progress_line(time: &str) -> String {
        format!("frame=  240 fps= 60 q=28.0 size=    1024kB time={time} bitrate=1234.5kbits/s speed=1.0x\r")
    }

    #[test]
    fn test_no_samples_before_duration() {
        let mut parser = ProgressParser::new();
        let emitted = parser.push(&progress_line("00:00:10.00"));
        assert!(emitted.is_empty());
        assert_eq!(parser.duration_secs(), None);
    }

    #[test]
    fn test_percent_computed_after_duration() {
        let mut parser = ProgressParser::new();
        assert!(parser.push(HEADER).is_empty());
        assert_eq!(parser.duration_secs(), Some(100.0));

        assert_eq!(parser.push(&progress_line("00:00:25.00")), vec![25]);
        assert_eq!(parser.push(&progress_line("00:00:50.00")), vec![50]);
    }

    #[test]
    fn test_percent_never_exceeds_100() {
        let mut parser = ProgressParser::new();
        parser.push(HEADER);
        assert_eq!(parser.push(&progress_line("00:02:30.00")), vec![100]);
    }

    #[test]
    fn test_percent_never_decreases() {
        let mut parser = ProgressParser::new();
        parser.push(HEADER);
        assert_eq!(parser.push(&progress_line("00:01:00.00")), vec![60]);
        // A stale marker must not walk progress backwards
        assert_eq!(parser.push(&progress_line("00:00:30.00")), vec![60]);
    }

    #[test]
    fn test_duration_captured_at_most_once() {
        let mut parser = ProgressParser::new();
        parser.push(HEADER);
        // A second Duration (e.g. from an output section) is ignored
        parser.push("  Duration: 00:00:10.00, start: 0.000000\n");
        assert_eq!(parser.duration_secs(), Some(100.0));
    }

    #[test]
    fn test_tolerates_chunks_split_mid_marker() {
        let mut parser = ProgressParser::new();
        parser.push(HEADER);

        let line = progress_line("00:00:40.00");
        let (a, b) = line.split_at(line.find("time=").unwrap() + 7);
        assert!(parser.push(a).is_empty());
        assert_eq!(parser.push(b), vec![40]);
    }

    #[test]
    fn test_duration_split_across_chunks() {
        let mut parser = ProgressParser::new();
        let (a, b) = HEADER.split_at(HEADER.find("Duration").unwrap() + 11);
        parser.push(a);
        parser.push(b);
        assert_eq!(parser.duration_secs(), Some(100.0));
    }

    #[test]
    fn test_multiple_markers_in_one_chunk() {
        let mut parser = ProgressParser::new();
        parser.push(HEADER);
        let chunk = format!(
            "{}{}",
            progress_line("00:00:10.00"),
            progress_line("00:00:20.00")
        );
        assert_eq!(parser.push(&chunk), vec![10, 20]);
    }
}
