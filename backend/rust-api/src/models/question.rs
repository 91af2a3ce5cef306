use mongodb::bson::{doc, Bson, Document};
use serde::{Deserialize, Deserializer, Serialize};

use super::game::{AnswerValue, Challenge, Difficulty};

/// Difficulty as persisted in the question collection: adaptive questions
/// carry a numeric tier, quiz questions a capitalized name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredDifficulty {
    Tier(i64),
    Label(String),
}

impl StoredDifficulty {
    pub fn difficulty(&self) -> Option<Difficulty> {
        match self {
            StoredDifficulty::Tier(value) => Difficulty::from_ordinal(*value),
            StoredDifficulty::Label(value) => value.parse().ok(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "_id", deserialize_with = "deserialize_id")]
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(rename = "correctAnswer", alias = "correct_answer")]
    pub correct_answer: AnswerValue,
    pub difficulty: StoredDifficulty,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub quiz_id: Option<String>,
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Bson::deserialize(deserializer)? {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(value) => value,
        other => other.to_string(),
    })
}

impl Question {
    pub fn to_challenge(&self, points: u32) -> Challenge {
        Challenge {
            id: self.id.clone(),
            question: self.question.clone(),
            options: if self.options.is_empty() {
                None
            } else {
                Some(self.options.clone())
            },
            correct_answer: self.correct_answer.clone(),
            points,
            hint: None,
            difficulty: self.difficulty.difficulty(),
        }
    }
}

/// How a tier is matched against the `difficulty` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierMatch {
    /// `{ difficulty: 1 }`
    Ordinal(Difficulty),
    /// `{ difficulty: "Medium" }`
    Label(Difficulty),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionFilter {
    pub tier: TierMatch,
    pub scope_id: Option<String>,
}

impl QuestionFilter {
    pub fn ordinal(tier: Difficulty, scope_id: Option<String>) -> Self {
        Self {
            tier: TierMatch::Ordinal(tier),
            scope_id,
        }
    }

    pub fn label(tier: Difficulty, scope_id: Option<String>) -> Self {
        Self {
            tier: TierMatch::Label(tier),
            scope_id,
        }
    }

    pub fn to_document(&self) -> Document {
        let mut filter = match self.tier {
            TierMatch::Ordinal(tier) => doc! { "difficulty": tier.ordinal() as i32 },
            TierMatch::Label(tier) => doc! { "difficulty": tier.label() },
        };
        if let Some(scope_id) = &self.scope_id {
            filter.insert("quiz_id", scope_id.as_str());
        }
        filter
    }

    pub fn matches(&self, question: &Question) -> bool {
        let tier_matches = match (self.tier, &question.difficulty) {
            (TierMatch::Ordinal(tier), StoredDifficulty::Tier(value)) => {
                i64::from(tier.ordinal()) == *value
            }
            (TierMatch::Label(tier), StoredDifficulty::Label(value)) => tier.label() == value,
            _ => false,
        };
        let scope_matches = match &self.scope_id {
            Some(scope_id) => question.quiz_id.as_deref() == Some(scope_id.as_str()),
            None => true,
        };
        tier_matches && scope_matches
    }
}
