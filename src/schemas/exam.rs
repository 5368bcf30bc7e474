use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::core::time::format_primitive;
use crate::db::models::Exam;
use crate::pipeline::types::AnswerKey;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ExamCreate {
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub(crate) title: String,
    #[validate(length(min = 1, message = "subject must not be empty"))]
    pub(crate) subject: String,
    #[serde(alias = "gradeLevel")]
    #[validate(length(min = 1, message = "grade_level must not be empty"))]
    pub(crate) grade_level: String,
    #[serde(alias = "teacherId")]
    #[validate(length(min = 1, message = "teacher_id must not be empty"))]
    pub(crate) teacher_id: String,
    #[serde(alias = "answerKey")]
    #[validate(custom(function = "validate_answer_key"))]
    pub(crate) answer_key: AnswerKey,
    #[serde(default)]
    pub(crate) instructions: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AnswerKeyUpdate {
    #[serde(alias = "teacherId")]
    #[validate(length(min = 1, message = "teacher_id must not be empty"))]
    pub(crate) teacher_id: String,
    #[serde(alias = "answerKey")]
    #[validate(custom(function = "validate_answer_key"))]
    pub(crate) answer_key: AnswerKey,
}

fn validate_answer_key(answer_key: &AnswerKey) -> Result<(), ValidationError> {
    fn invalid(code: &'static str, message: String) -> ValidationError {
        let mut error = ValidationError::new(code);
        error.message = Some(message.into());
        error
    }

    if answer_key.is_empty() {
        return Err(invalid(
            "answer_key_empty",
            "answer key must contain at least one question".to_string(),
        ));
    }
    for (question, entry) in answer_key {
        if *question == 0 {
            return Err(invalid("question_number_zero", "question numbers start at 1".to_string()));
        }
        if !(entry.max_score.is_finite() && entry.max_score > 0.0) {
            return Err(invalid(
                "max_score_invalid",
                format!("question {question} needs a positive max_score"),
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub(crate) struct ExamResponse {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) subject: String,
    pub(crate) grade_level: String,
    pub(crate) teacher_id: String,
    pub(crate) answer_key: AnswerKey,
    pub(crate) instructions: Option<String>,
    pub(crate) question_count: usize,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl From<Exam> for ExamResponse {
    fn from(exam: Exam) -> Self {
        Self {
            id: exam.id,
            title: exam.title,
            subject: exam.subject,
            grade_level: exam.grade_level,
            teacher_id: exam.teacher_id,
            question_count: exam.answer_key.0.len(),
            answer_key: exam.answer_key.0,
            instructions: exam.instructions,
            created_at: format_primitive(exam.created_at),
            updated_at: format_primitive(exam.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{AnswerKeyEntry, QuestionType};
    use std::collections::BTreeMap;

    fn key_with(max_score: f64) -> AnswerKey {
        let mut key = BTreeMap::new();
        key.insert(
            1,
            AnswerKeyEntry {
                question_text: "What is 2 + 2?".to_string(),
                expected_answer: "4".to_string(),
                max_score,
                question_type: QuestionType::ShortAnswer,
            },
        );
        key
    }

    #[test]
    fn rejects_empty_answer_key() {
        assert!(validate_answer_key(&BTreeMap::new()).is_err());
    }

    #[test]
    fn rejects_non_positive_max_score() {
        assert!(validate_answer_key(&key_with(0.0)).is_err());
        assert!(validate_answer_key(&key_with(-1.0)).is_err());
        assert!(validate_answer_key(&key_with(2.0)).is_ok());
    }

    #[test]
    fn exam_create_validates_fields() {
        let create = ExamCreate {
            title: String::new(),
            subject: "math".to_string(),
            grade_level: "3".to_string(),
            teacher_id: "teacher-1".to_string(),
            answer_key: key_with(1.0),
            instructions: None,
        };
        assert!(create.validate().is_err());
    }
}
