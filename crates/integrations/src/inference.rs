//! HTTP inference client

use async_trait::async_trait;
use realtime_pipeline_config::InferenceSettings;
use realtime_pipeline_types::{InferenceBackend, PipelineError, Prediction, Result};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::USER_AGENT;

#[derive(Serialize)]
struct PredictRequest {
    input: Value,
}

/// Inference backend posting records to `{base_url}/models/{model_id}/predict`
#[derive(Clone)]
pub struct HttpInferenceClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpInferenceClient {
    /// Create a new inference client
    pub fn new(settings: &InferenceSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PipelineError::InvalidConfig(format!("Failed to create HTTP client: {}", e)))?;

        info!("Initialized inference client for: {}", settings.base_url);

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        })
    }

    /// Prediction endpoint of a model
    pub fn predict_url(&self, model_id: &str) -> String {
        format!("{}/models/{}/predict", self.base_url, model_id)
    }

    fn parse_prediction(model_id: &str, body: Value) -> Prediction {
        let confidence = body.get("confidence").and_then(Value::as_f64);
        let output = match body {
            Value::Object(mut map) if map.contains_key("output") => {
                map.remove("output").unwrap_or(Value::Null)
            }
            other => other,
        };

        let prediction = Prediction::new(model_id, output);
        match confidence {
            Some(confidence) => prediction.with_confidence(confidence),
            None => prediction,
        }
    }
}

#[async_trait]
impl InferenceBackend for HttpInferenceClient {
    async fn predict(&self, model_id: &str, input: &str) -> Result<Prediction> {
        let url = self.predict_url(model_id);
        // Records are sent as JSON when they parse, as a string otherwise
        let input = serde_json::from_str(input).unwrap_or_else(|_| Value::String(input.to_string()));

        debug!("Requesting prediction from {}", url);

        let mut request = self.client.post(&url).json(&PredictRequest { input });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::Inference(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Inference API error ({}): {}", status, error_text);
            return Err(PipelineError::Inference(format!(
                "model {} returned {}: {}",
                model_id, status, error_text
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Inference(format!("invalid prediction response: {}", e)))?;

        Ok(Self::parse_prediction(model_id, body))
    }
}
