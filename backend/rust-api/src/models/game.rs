use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Difficulty tier shared by authored levels and stored questions.
///
/// The prediction service and the question store address tiers by ordinal
/// (`0` = easy, `1` = medium, `2` = hard); authored levels may also use the
/// two upper tiers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Expert,
    Master,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
            Difficulty::Expert => "expert",
            Difficulty::Master => "master",
        }
    }

    /// Capitalized form used by the categorical question collection ("Easy").
    pub fn label(&self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
            Difficulty::Expert => "Expert",
            Difficulty::Master => "Master",
        }
    }

    pub fn ordinal(&self) -> u8 {
        match self {
            Difficulty::Easy => 0,
            Difficulty::Medium => 1,
            Difficulty::Hard => 2,
            Difficulty::Expert => 3,
            Difficulty::Master => 4,
        }
    }

    pub fn from_ordinal(value: i64) -> Option<Self> {
        match value {
            0 => Some(Difficulty::Easy),
            1 => Some(Difficulty::Medium),
            2 => Some(Difficulty::Hard),
            3 => Some(Difficulty::Expert),
            4 => Some(Difficulty::Master),
            _ => None,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    /// Accepts names in any case as well as ordinals ("0".."4").
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        match normalized.as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            "expert" => Ok(Difficulty::Expert),
            "master" => Ok(Difficulty::Master),
            other => other
                .parse::<i64>()
                .ok()
                .and_then(Difficulty::from_ordinal)
                .ok_or_else(|| format!("Invalid difficulty: {}", value)),
        }
    }
}

/// Correct or submitted answer. Equality is kind-matched: a text answer
/// never equals a numeric one even if they print the same.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Boolean(bool),
    Number(f64),
    Text(String),
}

impl AnswerValue {
    pub fn kind(&self) -> &'static str {
        match self {
            AnswerValue::Boolean(_) => "boolean",
            AnswerValue::Number(_) => "number",
            AnswerValue::Text(_) => "text",
        }
    }

    pub fn matches(&self, submitted: &AnswerValue) -> bool {
        match (self, submitted) {
            (AnswerValue::Boolean(a), AnswerValue::Boolean(b)) => a == b,
            (AnswerValue::Number(a), AnswerValue::Number(b)) => a == b,
            (AnswerValue::Text(a), AnswerValue::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerValue::Boolean(value) => write!(f, "{}", value),
            AnswerValue::Number(value) if value.fract() == 0.0 && value.is_finite() => {
                write!(f, "{}", *value as i64)
            }
            AnswerValue::Number(value) => write!(f, "{}", value),
            AnswerValue::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Challenge {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub options: Option<Vec<String>>,
    pub correct_answer: AnswerValue,
    pub points: u32,
    #[serde(default)]
    pub hint: Option<String>,
    /// Set for challenges drawn from the question store.
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Level {
    /// Ordinal; defines unlock order.
    pub id: u32,
    pub title: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub instructions: String,
    pub challenges: Vec<Challenge>,
    pub points_to_pass: u32,
    #[serde(default)]
    pub time_limit: Option<u32>,
}

impl Level {
    /// Sum of every challenge's points, answered or not.
    pub fn max_score(&self) -> u32 {
        self.challenges
            .iter()
            .fold(0u32, |total, challenge| total.saturating_add(challenge.points))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Game {
    #[serde(alias = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub levels: Vec<Level>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub age_range: Option<(u8, u8)>,
}

impl Game {
    pub fn level(&self, level_id: u32) -> Option<&Level> {
        self.levels.iter().find(|level| level.id == level_id)
    }

    pub fn next_level(&self, level_id: u32) -> Option<&Level> {
        self.level(level_id + 1)
    }

    /// Subject recorded on results; the first skill tag, else the title.
    pub fn subject(&self) -> String {
        self.skills
            .first()
            .cloned()
            .unwrap_or_else(|| self.title.clone())
    }
}
