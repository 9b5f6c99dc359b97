use crate::errors::AppError;
use crate::models::{RiskScoreRequest, RiskScoreResult};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

/// Path of the risk scoring boundary on a remote instance.
pub const CALCULATE_RISK_SCORE_PATH: &str = "/functions/v1/calculate-risk-score";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Client for calling the risk scoring boundary of another instance.
#[derive(Clone)]
pub struct ScoringClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ScoringClient {
    /// Creates a new `ScoringClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Root URL of the remote service, without a trailing path.
    /// * `api_key` - Sent as a bearer token.
    pub fn new(base_url: String, api_key: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AppError::ExternalApi(format!("Failed to create scoring client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Scores a client, optionally against one of their loans.
    ///
    /// Non-2xx answers become [`AppError::ExternalApi`] carrying the status and
    /// the `error` field of the body (or the raw body when it is not JSON).
    pub async fn calculate_risk_score(
        &self,
        client_id: Uuid,
        loan_id: Option<Uuid>,
    ) -> Result<RiskScoreResult, AppError> {
        let url = format!("{}{}", self.base_url, CALCULATE_RISK_SCORE_PATH);
        tracing::info!("Requesting risk score for client {} from {}", client_id, url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&RiskScoreRequest { client_id, loan_id })
            .send()
            .await
            .map_err(|e| AppError::ExternalApi(format!("Scoring request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = serde_json::from_str::<ErrorBody>(&error_text)
                .map(|body| body.error)
                .unwrap_or(error_text);
            return Err(AppError::ExternalApi(format!(
                "Scoring service returned {}: {}",
                status, message
            )));
        }

        let result: RiskScoreResult = response.json().await.map_err(|e| {
            AppError::ExternalApi(format!("Failed to parse scoring response: {}", e))
        })?;

        tracing::debug!(
            "Client {} scored {} ({})",
            client_id,
            result.score,
            result.risk_category
        );
        Ok(result)
    }
}
