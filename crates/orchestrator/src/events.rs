use serde::Serialize;

use crate::model::TaskId;

/// Which half of the pipeline an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Cover,
    Content,
}

/// One state transition in the pipeline, suitable for streaming to a client.
/// `kind()` is the SSE `event:` line; the payload (via `serde_json`) is the
/// `data:` line.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ProgressEvent {
    Progress(ProgressData),
    Complete(CompleteData),
    Error(ErrorData),
    Finish(FinishData),
    RetryStart(RetryStartData),
    RetryFinish(RetryFinishData),
}

impl ProgressEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Progress(_) => "progress",
            ProgressEvent::Complete(_) => "complete",
            ProgressEvent::Error(_) => "error",
            ProgressEvent::Finish(_) => "finish",
            ProgressEvent::RetryStart(_) => "retry_start",
            ProgressEvent::RetryFinish(_) => "retry_finish",
        }
    }

    /// The `data:` line payload, serialized standalone (not wrapped in the
    /// enum's own tag).
    pub fn data_json(&self) -> serde_json::Value {
        match self {
            ProgressEvent::Progress(d) => serde_json::to_value(d),
            ProgressEvent::Complete(d) => serde_json::to_value(d),
            ProgressEvent::Error(d) => serde_json::to_value(d),
            ProgressEvent::Finish(d) => serde_json::to_value(d),
            ProgressEvent::RetryStart(d) => serde_json::to_value(d),
            ProgressEvent::RetryFinish(d) => serde_json::to_value(d),
        }
        .expect("event payload is always representable as JSON")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompleteData {
    pub index: u32,
    pub status: &'static str,
    pub image_url: String,
    pub phase: Phase,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorData {
    pub index: u32,
    pub status: &'static str,
    pub message: String,
    pub retryable: bool,
    pub phase: Phase,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinishData {
    pub success: bool,
    pub task_id: TaskId,
    pub images: Vec<String>,
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub failed_indices: Vec<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryStartData {
    pub total: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryFinishData {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub success: bool,
}
