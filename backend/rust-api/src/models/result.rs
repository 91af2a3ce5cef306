use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

/// Caller-supplied learner identity. Trusted, but required to be present.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct LearnerIdentity {
    #[validate(
        required(message = "learner_id is required"),
        custom(function = "not_blank", message = "learner_id must not be empty")
    )]
    pub learner_id: Option<String>,

    #[validate(
        required(message = "learner_name is required"),
        custom(function = "not_blank", message = "learner_name must not be empty")
    )]
    pub learner_name: Option<String>,
}

impl LearnerIdentity {
    pub fn new(learner_id: impl Into<String>, learner_name: impl Into<String>) -> Self {
        Self {
            learner_id: Some(learner_id.into()),
            learner_name: Some(learner_name.into()),
        }
    }

    pub fn id(&self) -> &str {
        self.learner_id.as_deref().unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.learner_name.as_deref().unwrap_or_default()
    }
}

/// Where a recorded attempt came from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GameMeta {
    pub game: Option<String>,
    pub subject: Option<String>,
    pub quiz_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionTrace {
    pub question_number: u32,
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub selected_option: String,
    pub answer: String,
    #[serde(default)]
    pub difficulty: Option<String>,
    pub is_correct: bool,
}

/// Persisted, append-only record of a finished attempt (`quizResults`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizResult {
    #[serde(rename = "_id")]
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub game: Option<String>,
    pub subject: Option<String>,
    pub quiz_id: Option<String>,
    pub score: u32,
    pub total: u32,
    pub correct_answers: u32,
    pub attempted_on: DateTime<Utc>,
    pub questions: Vec<QuestionTrace>,
}

/// Body of `POST /api/v1/results/submit`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResultRequest {
    #[validate(
        required(message = "Missing studentId or studentName"),
        custom(function = "not_blank", message = "Missing studentId or studentName")
    )]
    pub student_id: Option<String>,

    #[validate(
        required(message = "Missing studentId or studentName"),
        custom(function = "not_blank", message = "Missing studentId or studentName")
    )]
    pub student_name: Option<String>,

    pub game: Option<String>,
    pub subject: Option<String>,
    pub quiz_id: Option<String>,
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub correct_answers: u32,
    pub attempted_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub questions: Vec<QuestionTrace>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResultResponse {
    pub message: String,
    pub result_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListResultsQuery {
    pub learner_id: String,
    pub limit: Option<u32>,
}
