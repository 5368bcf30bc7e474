//! Best-effort parsing of AI responses.
//!
//! The scoring model is asked for strict JSON but does not always comply;
//! the fact-check model replies in free text. Both parsers implement a
//! narrow, documented grammar (JSON-first, then line/token scanning) and
//! are kept separate from the stage logic so they can be swapped for
//! structured-output parsing without touching orchestration.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::pipeline::types::{clamp, AnswerKeyEntry, FactCheckAnnotation, FactCheckStatus};

#[derive(Debug, Error)]
pub(crate) enum ParseError {
    #[error("response contains no parsable score")]
    NoScore,
}

/// Validated scoring outcome: every numeric field already clamped to its
/// documented range.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScoredAnswer {
    pub(crate) student_answer: String,
    pub(crate) score: f64,
    pub(crate) feedback: String,
    pub(crate) partial_credit: f64,
    pub(crate) confidence: f64,
}

#[derive(Debug, Deserialize)]
struct RawScoredAnswer {
    #[serde(default)]
    student_answer: Option<String>,
    score: Option<f64>,
    #[serde(default)]
    feedback: Option<String>,
    #[serde(default)]
    partial_credit: Option<f64>,
    #[serde(default)]
    confidence: Option<f64>,
}

fn embedded_json_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("embedded json regex"))
}

fn score_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)score[:\s]+(\d+(?:\.\d+)?)").expect("score token regex"))
}

fn confidence_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)confidence[:\s]+(\d+(?:\.\d+)?)").expect("confidence token regex")
    })
}

/// Parse a scoring response: strict JSON, then JSON embedded in prose,
/// then a `score:` / `confidence:` token scan over the raw text.
pub(crate) fn parse_scoring_response(
    raw: &str,
    key: &AnswerKeyEntry,
) -> Result<ScoredAnswer, ParseError> {
    if let Some(parsed) = try_parse_json(raw) {
        if parsed.score.is_some() {
            return Ok(validate(parsed, key));
        }
    }

    extract_from_text(raw, key)
}

fn try_parse_json(raw: &str) -> Option<RawScoredAnswer> {
    if let Ok(parsed) = serde_json::from_str::<RawScoredAnswer>(raw) {
        return Some(parsed);
    }

    let embedded = embedded_json_re().find(raw)?;
    serde_json::from_str::<RawScoredAnswer>(embedded.as_str()).ok()
}

fn validate(raw: RawScoredAnswer, key: &AnswerKeyEntry) -> ScoredAnswer {
    ScoredAnswer {
        student_answer: raw.student_answer.unwrap_or_default(),
        score: clamp(raw.score.unwrap_or(0.0), 0.0, key.max_score),
        feedback: raw.feedback.unwrap_or_else(|| "Good effort!".to_string()),
        partial_credit: clamp(raw.partial_credit.unwrap_or(0.0), 0.0, 1.0),
        confidence: clamp(raw.confidence.unwrap_or(0.8), 0.0, 1.0),
    }
}

fn extract_from_text(raw: &str, key: &AnswerKeyEntry) -> Result<ScoredAnswer, ParseError> {
    let score = score_token_re()
        .captures(raw)
        .and_then(|captures| captures.get(1))
        .and_then(|capture| capture.as_str().parse::<f64>().ok())
        .ok_or(ParseError::NoScore)?;

    let confidence = confidence_token_re()
        .captures(raw)
        .and_then(|captures| captures.get(1))
        .and_then(|capture| capture.as_str().parse::<f64>().ok())
        .unwrap_or(0.8);

    Ok(ScoredAnswer {
        student_answer: "Unable to transcribe".to_string(),
        score: clamp(score, 0.0, key.max_score),
        feedback: "Please review manually".to_string(),
        partial_credit: 0.0,
        confidence: clamp(confidence, 0.0, 1.0),
    })
}

const MAX_ALTERNATIVES: usize = 3;
const MAX_INSIGHTS: usize = 5;
const MAX_SUGGESTIONS: usize = 3;

/// Segment a free-text fact-check reply by line-prefix keywords:
/// accuracy cues, alternative-answer cues, suggestion cues; remaining
/// substantive lines become insights. List lengths are capped.
pub(crate) fn parse_fact_check_text(text: &str) -> FactCheckAnnotation {
    let mut accuracy_assessment = None;
    let mut alternative_answers = Vec::new();
    let mut insights = Vec::new();
    let mut suggestions = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_lowercase();

        if accuracy_assessment.is_none() && (lower.contains("correct") || lower.contains("accurate"))
        {
            accuracy_assessment = Some(line.to_string());
        } else if lower.contains("alternative") || lower.contains("other") {
            if alternative_answers.len() < MAX_ALTERNATIVES {
                alternative_answers.push(line.to_string());
            }
        } else if lower.contains("suggest") || lower.contains("improve") {
            if suggestions.len() < MAX_SUGGESTIONS {
                suggestions.push(line.to_string());
            }
        } else if line.len() > 10 && insights.len() < MAX_INSIGHTS {
            insights.push(line.to_string());
        }
    }

    FactCheckAnnotation {
        status: FactCheckStatus::Success,
        accuracy_assessment,
        alternative_answers,
        insights,
        suggestions,
        confidence: 0.8,
        reason: None,
    }
}
