// Event Sink
// Notification channel contract: the pipeline publishes alerts and progress
// samples here, the server decides how they reach clients.

use serde::Serialize;
use serde_json::Value;

use crate::models::{Alert, TranscodeProgress, TranscodeStatus};

/// Event name for generic `{title, message}` alerts
pub const EVENT_ALERT: &str = "notify://alert";

/// Event name for `{fileName, progress, status}` batch-job progress
pub const EVENT_PROGRESS: &str = "transcode://progress";

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: Value);
}

pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &str, _payload: Value) {}
}

pub fn emit_event<T: Serialize>(sink: &dyn EventSink, event: &str, payload: &T) {
    if let Ok(value) = serde_json::to_value(payload) {
        sink.emit(event, value);
    }
}

/// Publish a generic alert
pub fn notify_alert(sink: &dyn EventSink, title: &str, message: &str) {
    emit_event(
        sink,
        EVENT_ALERT,
        &Alert {
            title: title.to_string(),
            message: message.to_string(),
        },
    );
}

/// Publish a progress sample for one file of a transcode
pub fn notify_progress(sink: &dyn EventSink, file_name: &str, progress: u8, status: TranscodeStatus) {
    emit_event(
        sink,
        EVENT_PROGRESS,
        &TranscodeProgress {
            file_name: file_name.to_string(),
            progress: progress.min(100),
            status,
        },
    );
}
