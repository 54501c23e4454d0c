use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classification request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("classification service returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("classification response was not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Department classification service. Given an issue id it looks the issue
/// up on its own side and writes the department back to the store.
#[derive(Clone)]
pub struct ClassifierClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct ClassifyRequest {
    issue_id: Uuid,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Classification {
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl Classification {
    /// Parse a success body. Some deployments answer 200 with an empty body,
    /// which means no department was found.
    pub fn from_body(bytes: &[u8]) -> Result<Self, ClassifierError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl ClassifierClient {
    pub fn new(endpoint: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, ClassifierError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key,
        })
    }

    pub async fn classify(&self, issue_id: Uuid) -> Result<Classification, ClassifierError> {
        let mut request = self.client.post(&self.endpoint).json(&ClassifyRequest { issue_id });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Rejected { status: status.as_u16(), body });
        }

        let bytes = response.bytes().await?;
        let classification = Classification::from_body(&bytes)?;

        tracing::debug!(issue_id = %issue_id, "issue classified");
        Ok(classification)
    }
}
