// src/classifier.rs
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::error::PipelineError;
use crate::models::{ClassificationResult, FeatureVector, TransactionRecord};

/// Derives the classifier inputs from a record. Pure and deterministic.
pub fn extract_features(record: &TransactionRecord) -> FeatureVector {
    let hex = record.input_data.trim_start_matches("0x");
    FeatureVector {
        value: record.value.clone(),
        gas_limit: record.gas_limit,
        input_data_size: hex.len() / 2,
    }
}

/// External anomaly scorer.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, features: &FeatureVector) -> Result<ClassificationResult, PipelineError>;
}

/// Single POST per transaction, no retries. Any failure is a `Classifier` error.
pub struct HttpClassifier {
    client: Client,
    endpoint: String,
}

impl HttpClassifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Classifier(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, features: &FeatureVector) -> Result<ClassificationResult, PipelineError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(features)
            .send()
            .await
            .map_err(|e| PipelineError::Classifier(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(PipelineError::Classifier(format!("HTTP {}", resp.status())));
        }

        resp.json::<ClassificationResult>()
            .await
            .map_err(|e| PipelineError::Classifier(format!("malformed response: {e}")))
    }
}
