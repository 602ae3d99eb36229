// Batch Transcode Queue
// FIFO archival re-encode jobs over a bounded channel with dedicated
// workers. Concurrency is a constructor parameter and defaults to 1: viewer
// streaming sessions are deliberately unbounded, background jobs are
// deliberately serialized, and the queue never halts on a single job's
// failure.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::process::Command;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};

use crate::models::{ArchiveJob, TranscodeStatus};
use crate::services::catalog::{is_video_file, list_entries, SeedEngine};
use crate::services::hwaccel::HwAccelDetector;
use crate::services::progress::pump_progress;
use crate::services::transcode_args::archive_args;
use crate::services::{notify_alert, notify_progress, EventSink, TranscodeError};

/// Pending jobs the channel will hold before enqueue starts failing
const QUEUE_CAPACITY: usize = 64;

/// Executes one archival job to completion. Split out as a trait so the
/// queue's ordering and concurrency contract can be tested without ffmpeg.
pub trait JobRunner: Send + Sync {
    fn run<'a>(&'a self, job: &'a ArchiveJob) -> BoxFuture<'a, Result<(), TranscodeError>>;
}

/// Fire-and-forget archival transcode queue
pub struct TranscodeQueue {
    tx: mpsc::Sender<ArchiveJob>,
    events: Arc<dyn EventSink>,
}

impl TranscodeQueue {
    pub fn new(concurrency: usize, runner: Arc<dyn JobRunner>, events: Arc<dyn EventSink>) -> Self {
        let (tx, rx) = mpsc::channel::<ArchiveJob>(QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));

        let workers = concurrency.max(1);
        for worker in 0..workers {
            let rx = rx.clone();
            let runner = runner.clone();
            let events = events.clone();
            tokio::spawn(async move {
                loop {
                    // Hold the receiver lock only while waiting for the next
                    // job, so workers pull in channel order
                    let job = { rx.lock().await.recv().await };
                    let job = match job {
                        Some(job) => job,
                        None => break,
                    };

                    log::info!("[worker {worker}] Starting archive job {} ({:?})", job.id, job.name);
                    match runner.run(&job).await {
                        Ok(()) => {
                            log::info!("[worker {worker}] Archive job {} finished", job.id);
                            notify_alert(
                                &*events,
                                "Conversion finished",
                                &format!("{} has been converted", job.name),
                            );
                        }
                        Err(e) => {
                            log::error!("[worker {worker}] Archive job {} failed: {e}", job.id);
                            notify_alert(
                                &*events,
                                "Conversion failed",
                                &format!("{}: {e}", job.name),
                            );
                        }
                    }
                }
            });
        }

        Self { tx, events }
    }

    /// Enqueue a job and return immediately; the outcome, including a
    /// rejected enqueue, is only observable through the notification channel.
    pub fn enqueue(&self, job: ArchiveJob) {
        if let Err(e) = self.tx.try_send(job) {
            let job = match e {
                TrySendError::Full(job) | TrySendError::Closed(job) => job,
            };
            log::error!("Archive queue full or closed, dropping job {} ({:?})", job.id, job.name);
            notify_alert(
                &*self.events,
                "Conversion failed to queue",
                &format!("{} was not queued for conversion, try again later", job.name),
            );
        }
    }
}

/// Production job runner: re-encodes a file or a directory of files into the
/// archival Matroska format via ffmpeg.
pub struct ArchiveRunner {
    detector: Arc<HwAccelDetector>,
    seed_engine: Arc<dyn SeedEngine>,
    events: Arc<dyn EventSink>,
}

impl ArchiveRunner {
    pub fn new(
        detector: Arc<HwAccelDetector>,
        seed_engine: Arc<dyn SeedEngine>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            detector,
            seed_engine,
            events,
        }
    }

    async fn run_job(&self, job: &ArchiveJob) -> Result<(), TranscodeError> {
        if !self.detector.encoder_installed() {
            notify_alert(
                &*self.events,
                "Conversion unavailable",
                "FFmpeg is not installed, cannot convert downloads",
            );
            return Err(TranscodeError::EncoderNotInstalled);
        }

        // Stop seeding before we rewrite or delete the source files.
        // Best-effort: the torrent engine being unreachable is not fatal.
        if let Err(e) = self.seed_engine.remove(&job.content_id) {
            log::warn!("Failed to remove {} from seeding engine: {e}", job.content_id);
        }

        let files = if job.source.is_dir() {
            let matched: Vec<PathBuf> = list_entries(&job.source)?
                .into_iter()
                .filter(|p| is_video_file(p))
                .collect();
            if matched.is_empty() {
                return Err(TranscodeError::NoVideoFiles(job.source.clone()));
            }
            matched
        } else {
            vec![job.source.clone()]
        };

        for file in files {
            // First failure aborts the remainder of this job
            self.transcode_file(&file).await?;

            if let Err(e) = std::fs::remove_file(&file) {
                log::warn!("Failed to delete original {file:?}: {e}");
            }
        }

        Ok(())
    }

    async fn transcode_file(&self, input: &Path) -> Result<(), TranscodeError> {
        let profile = self.detector.detect().await;
        let output = archive_output_path(input);
        let args = archive_args(input, &output, profile.as_ref(), false);

        let file_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| input.to_string_lossy().into_owned());
        log::info!("Archiving {file_name:?}: ffmpeg {}", args.join(" "));

        let mut child = Command::new(self.detector.ffmpeg_path())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(TranscodeError::Spawn)?;

        if let Some(stderr) = child.stderr.take() {
            pump_progress(stderr, self.events.clone(), file_name.clone());
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(TranscodeError::ExitStatus(status.code().unwrap_or(-1)));
        }

        notify_progress(&*self.events, &file_name, 100, TranscodeStatus::Completed);
        Ok(())
    }
}

impl JobRunner for ArchiveRunner {
    fn run<'a>(&'a self, job: &'a ArchiveJob) -> BoxFuture<'a, Result<(), TranscodeError>> {
        Box::pin(self.run_job(job))
    }
}

/// Archival target path for a source file. A `.mkv` source would collide
/// with its own output, so those get an `-archive` stem suffix.
fn archive_output_path(input: &Path) -> PathBuf {
    let output = input.with_extension("mkv");
    if output != input {
        return output;
    }
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("{stem}-archive.mkv"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{NoopEventSink, EVENT_ALERT};
    use std::sync::Mutex as StdMutex;
    use std::time::{Duration, Instant};

    /// Sink that records every emitted event for assertions
    #[derive(Default)]
    struct RecordingSink {
        events: StdMutex<Vec<(String, serde_json::Value)>>,
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: &str, payload: serde_json::Value) {
            self.events.lock().unwrap().push((event.to_string(), payload));
        }
    }

    /// Runner whose jobs never complete, so the channel can only fill up
    struct BlockingRunner;

    impl JobRunner for BlockingRunner {
        fn run<'a>(&'a self, _job: &'a ArchiveJob) -> BoxFuture<'a, Result<(), TranscodeError>> {
            Box::pin(std::future::pending())
        }
    }

    /// Runner that records when each job ran, for ordering assertions
    struct RecordingRunner {
        spans: StdMutex<Vec<(String, Instant, Instant)>>,
        fail_ids: Vec<String>,
    }

    impl RecordingRunner {
        fn new(fail_ids: Vec<String>) -> Self {
            Self {
                spans: StdMutex::new(Vec::new()),
                fail_ids,
            }
        }
    }

    impl JobRunner for RecordingRunner {
        fn run<'a>(&'a self, job: &'a ArchiveJob) -> BoxFuture<'a, Result<(), TranscodeError>> {
            Box::pin(async move {
                let start = Instant::now();
                tokio::time::sleep(Duration::from_millis(20)).await;
                let end = Instant::now();
                self.spans
                    .lock()
                    .unwrap()
                    .push((job.content_id.clone(), start, end));
                if self.fail_ids.contains(&job.content_id) {
                    Err(TranscodeError::ExitStatus(1))
                } else {
                    Ok(())
                }
            })
        }
    }

    fn job(id: &str) -> ArchiveJob {
        ArchiveJob::new(id, PathBuf::from(format!("/m/{id}")), id)
    }

    #[tokio::test]
    async fn test_jobs_run_fifo_without_overlap() {
        let runner = Arc::new(RecordingRunner::new(vec![]));
        let queue = TranscodeQueue::new(1, runner.clone(), Arc::new(NoopEventSink));

        queue.enqueue(job("a"));
        queue.enqueue(job("b"));
        queue.enqueue(job("c"));

        tokio::time::sleep(Duration::from_millis(250)).await;

        let spans = runner.spans.lock().unwrap();
        let order: Vec<&str> = spans.iter().map(|(id, _, _)| id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);

        // No job starts before the previous one has finished
        for pair in spans.windows(2) {
            assert!(pair[1].1 >= pair[0].2, "jobs {:?} and {:?} overlapped", pair[0].0, pair[1].0);
        }
    }

    #[tokio::test]
    async fn test_queue_continues_past_a_failed_job() {
        let runner = Arc::new(RecordingRunner::new(vec!["b".to_string()]));
        let queue = TranscodeQueue::new(1, runner.clone(), Arc::new(NoopEventSink));

        queue.enqueue(job("a"));
        queue.enqueue(job("b"));
        queue.enqueue(job("c"));

        tokio::time::sleep(Duration::from_millis(250)).await;

        let spans = runner.spans.lock().unwrap();
        assert_eq!(spans.len(), 3, "failure of b must not halt the queue");
        assert_eq!(spans[2].0, "c");
    }

    #[tokio::test]
    async fn test_rejected_enqueue_emits_an_alert() {
        let sink = Arc::new(RecordingSink::default());
        let queue = TranscodeQueue::new(1, Arc::new(BlockingRunner), sink.clone());

        // The enqueue loop never yields, so the worker cannot drain: the
        // first QUEUE_CAPACITY sends fill the channel and the last one is
        // rejected
        for i in 0..=QUEUE_CAPACITY {
            queue.enqueue(job(&format!("j{i}")));
        }

        let events = sink.events.lock().unwrap();
        let alerts: Vec<_> = events.iter().filter(|(e, _)| e == EVENT_ALERT).collect();
        assert_eq!(alerts.len(), 1, "exactly one job should have been rejected");
        assert_eq!(alerts[0].1["title"], "Conversion failed to queue");
        assert!(alerts[0].1["message"]
            .as_str()
            .unwrap()
            .contains(&format!("j{QUEUE_CAPACITY}")));
    }

    #[test]
    fn test_archive_output_path_avoids_collision() {
        assert_eq!(
            archive_output_path(Path::new("/m/e1.avi")),
            PathBuf::from("/m/e1.mkv")
        );
        assert_eq!(
            archive_output_path(Path::new("/m/e1.mkv")),
            PathBuf::from("/m/e1-archive.mkv")
        );
    }

    #[cfg(unix)]
    mod runner_tests {
        use super::*;
        use crate::services::catalog::NoopSeedEngine;
        use crate::services::hwaccel::HwAccelDetector;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::tempdir;

        fn stub_ffmpeg(dir: &Path, exit_code: i32) -> PathBuf {
            let script = dir.join("ffmpeg-stub.sh");
            fs::write(&script, format!("#!/bin/sh\nexit {exit_code}\n")).unwrap();
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
            script
        }

        fn runner_with(script: PathBuf) -> ArchiveRunner {
            let detector =
                HwAccelDetector::with_profile(script.to_string_lossy().into_owned(), None);
            ArchiveRunner::new(
                Arc::new(detector),
                Arc::new(NoopSeedEngine),
                Arc::new(NoopEventSink),
            )
        }

        #[tokio::test]
        async fn test_directory_with_no_videos_fails() {
            let temp = tempdir().unwrap();
            let media = temp.path().join("job");
            fs::create_dir(&media).unwrap();
            fs::write(media.join("notes.txt"), b"x").unwrap();

            let runner = runner_with(stub_ffmpeg(temp.path(), 0));
            let result = runner.run_job(&ArchiveJob::new("job", media, "job")).await;
            assert!(matches!(result, Err(TranscodeError::NoVideoFiles(_))));
        }

        #[tokio::test]
        async fn test_successful_job_deletes_originals() {
            let temp = tempdir().unwrap();
            let media = temp.path().join("job");
            fs::create_dir(&media).unwrap();
            let video = media.join("e1.avi");
            fs::write(&video, b"x").unwrap();
            fs::write(media.join("notes.txt"), b"x").unwrap();

            let runner = runner_with(stub_ffmpeg(temp.path(), 0));
            runner
                .run_job(&ArchiveJob::new("job", media.clone(), "job"))
                .await
                .unwrap();

            assert!(!video.exists(), "original should be deleted after success");
            assert!(media.join("notes.txt").exists(), "non-video entries are skipped");
        }

        #[tokio::test]
        async fn test_encode_failure_aborts_remaining_files() {
            let temp = tempdir().unwrap();
            let media = temp.path().join("job");
            fs::create_dir(&media).unwrap();
            fs::write(media.join("e1.avi"), b"x").unwrap();
            fs::write(media.join("e2.avi"), b"x").unwrap();

            let runner = runner_with(stub_ffmpeg(temp.path(), 1));
            let result = runner.run_job(&ArchiveJob::new("job", media.clone(), "job")).await;
            assert!(matches!(result, Err(TranscodeError::ExitStatus(1))));

            // Nothing was deleted: the failing encode aborted the job
            assert!(media.join("e1.avi").exists());
            assert!(media.join("e2.avi").exists());
        }
    }
}
