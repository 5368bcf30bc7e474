use serde::Deserialize;
use validator::Validate;

use crate::services::approval::ScoreOverride;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ApprovalRequest {
    #[serde(alias = "teacherId")]
    #[validate(length(min = 1, message = "teacher_id must not be empty"))]
    pub(crate) teacher_id: String,
    #[serde(default)]
    pub(crate) overrides: Vec<ScoreOverride>,
}
