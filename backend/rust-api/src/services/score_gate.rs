//! Pass/fail decision for a finished level attempt. Pure: progress mutation
//! is done by the session machine.

use serde::{Deserialize, Serialize};

use crate::models::game::Challenge;

/// Score at or above which a passed attempt earns the excellence flag.
pub const EXCELLENCE_PERCENTAGE: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub pass: bool,
    pub max_score: u32,
    pub percentage: f64,
}

impl GateOutcome {
    pub fn is_excellent(&self) -> bool {
        self.pass && self.percentage >= EXCELLENCE_PERCENTAGE
    }
}

pub fn evaluate(score: u32, points_to_pass: u32, challenges: &[Challenge]) -> GateOutcome {
    let max_score = challenges
        .iter()
        .fold(0u32, |total, challenge| total.saturating_add(challenge.points));
    let percentage = if max_score == 0 {
        0.0
    } else {
        f64::from(score) / f64::from(max_score) * 100.0
    };

    GateOutcome {
        pass: score >= points_to_pass,
        max_score,
        percentage,
    }
}
