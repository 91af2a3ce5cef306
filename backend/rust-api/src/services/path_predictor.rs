//! Affect + score → ordered difficulty tiers, via the external prediction
//! service. Fail-closed: any failure surfaces as `UpstreamUnavailable` and no
//! default path is ever substituted.

use std::{sync::Arc, time::Duration, time::Instant};

use async_trait::async_trait;

use crate::error::{EngineError, EngineResult};
use crate::metrics::{PREDICTOR_CALLS_TOTAL, PREDICTOR_CALL_DURATION_SECONDS};
use crate::models::game::Difficulty;
use crate::models::prediction::{
    AffectDistribution, DifficultyPath, PredictionServiceRequest, PredictionServiceResponse,
};
use crate::utils::retry::with_timeout;

/// Raw prediction call: six features in, tier ordinals out.
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, features: [f64; 6]) -> EngineResult<Vec<i64>>;
}

pub struct HttpPredictor {
    url: String,
    client: reqwest::Client,
}

impl HttpPredictor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::upstream(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl Predictor for HttpPredictor {
    async fn predict(&self, features: [f64; 6]) -> EngineResult<Vec<i64>> {
        let body = PredictionServiceRequest {
            emotions: features.to_vec(),
        };

        tracing::debug!("Calling prediction service: {}", self.url);

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::upstream(format!("Failed to call prediction service: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EngineError::upstream(format!(
                "Prediction service returned error {}: {}",
                status, error_text
            )));
        }

        let parsed: PredictionServiceResponse = response.json().await.map_err(|e| {
            EngineError::upstream(format!("Failed to parse prediction response: {}", e))
        })?;

        Ok(parsed.into_path())
    }
}

/// Domain wrapper: builds the feature vector, enforces the call timeout and
/// validates the returned ordinals.
#[derive(Clone)]
pub struct PathPredictor {
    predictor: Arc<dyn Predictor>,
    timeout: Duration,
}

impl PathPredictor {
    pub fn new(predictor: Arc<dyn Predictor>, timeout: Duration) -> Self {
        Self { predictor, timeout }
    }

    pub async fn predict(
        &self,
        score: f64,
        affect: &AffectDistribution,
    ) -> EngineResult<DifficultyPath> {
        if !score.is_finite() {
            return Err(EngineError::validation("score must be a finite number"));
        }

        let features = affect.feature_vector(score);
        let start = Instant::now();
        let result = with_timeout(
            "prediction service",
            self.timeout,
            self.predictor.predict(features),
        )
        .await
        .and_then(to_path);

        let outcome = match &result {
            Ok(_) => "success",
            Err(_) => "unavailable",
        };
        PREDICTOR_CALLS_TOTAL.with_label_values(&[outcome]).inc();
        PREDICTOR_CALL_DURATION_SECONDS
            .with_label_values(&[outcome])
            .observe(start.elapsed().as_secs_f64());

        match &result {
            Ok(path) => tracing::info!(
                score,
                path = ?path.ordinals(),
                "Predicted difficulty path"
            ),
            Err(e) => tracing::error!(score, error = %e, "Difficulty path prediction failed"),
        }

        result
    }
}

fn to_path(ordinals: Vec<i64>) -> EngineResult<DifficultyPath> {
    ordinals
        .into_iter()
        .map(|ordinal| {
            Difficulty::from_ordinal(ordinal).ok_or_else(|| {
                EngineError::upstream(format!(
                    "Prediction service returned unknown tier {}",
                    ordinal
                ))
            })
        })
        .collect::<EngineResult<Vec<_>>>()
        .map(DifficultyPath)
}
