use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::game::Difficulty;
use super::question::Question;

/// Order of the affect features sent to the prediction service.
pub const AFFECT_LABELS: [&str; 5] = ["angry", "happy", "neutral", "sad", "surprise"];

/// Emotion name → probability. Missing labels count as 0 and the values are
/// passed through as given (no renormalization).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AffectDistribution(pub BTreeMap<String, f64>);

impl AffectDistribution {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, f64)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(label, value)| (label.to_string(), value))
                .collect(),
        )
    }

    pub fn probability(&self, label: &str) -> f64 {
        self.0.get(label).copied().unwrap_or(0.0)
    }

    /// `[angry, happy, neutral, sad, surprise, score]`
    pub fn feature_vector(&self, score: f64) -> [f64; 6] {
        let mut features = [0.0; 6];
        for (slot, label) in features.iter_mut().zip(AFFECT_LABELS) {
            *slot = self.probability(label);
        }
        features[5] = score;
        features
    }
}

/// Ordered difficulty tiers, one per adaptive step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DifficultyPath(pub Vec<Difficulty>);

impl DifficultyPath {
    pub fn ordinals(&self) -> Vec<u8> {
        self.0.iter().map(Difficulty::ordinal).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Wire body sent to the prediction service.
#[derive(Debug, Serialize)]
pub struct PredictionServiceRequest {
    pub emotions: Vec<f64>,
}

/// `predictions` is either the path itself or a batch of paths whose first
/// row is the one requested.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PredictionRows {
    Flat(Vec<i64>),
    Nested(Vec<Vec<i64>>),
}

#[derive(Debug, Deserialize)]
pub struct PredictionServiceResponse {
    pub predictions: PredictionRows,
}

impl PredictionServiceResponse {
    pub fn into_path(self) -> Vec<i64> {
        match self.predictions {
            PredictionRows::Flat(path) => path,
            PredictionRows::Nested(rows) => rows.into_iter().next().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PredictPathRequest {
    pub score: f64,
    #[serde(alias = "emotionProbabilities", alias = "emotions", default)]
    pub emotion_probabilities: AffectDistribution,
    #[serde(default)]
    pub scope_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PredictPathResponse {
    pub path: Vec<u8>,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct PredictWithQuestionsResponse {
    pub predictions: Vec<u8>,
    pub questions: Vec<Question>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct QuestionsByPathQuery {
    pub path: String,
    pub scope_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QuestionsResponse {
    pub questions: Vec<Question>,
    pub status: &'static str,
    pub warnings: Vec<String>,
}
