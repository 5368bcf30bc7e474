use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "submissionstatus", rename_all = "snake_case")]
pub(crate) enum SubmissionStatus {
    Uploaded,
    Processing,
    PendingReview,
    Approved,
    Error,
}

/// Sub-status within `processing`, persisted so a stuck submission shows
/// where the pipeline stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "processingstage", rename_all = "snake_case")]
pub(crate) enum ProcessingStage {
    Preprocessing,
    Segmentation,
    Grading,
    FactCheck,
}
