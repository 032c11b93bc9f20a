/*!
Image classifier client.

The classifier is an opaque text oracle: it receives the JPEG bytes and an
instruction prompt and returns free text. Decoding the text into a material
code happens in the trigger, not here.
*/

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ClassifierConfig;

/// Classifier failures; never fatal to the capture loop
#[derive(Error, Debug)]
pub enum ClassifierError {
    /// Transport or decoding failure talking to the service
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Service answered with a non-success status
    #[error("classifier returned {status}: {body}")]
    Api { status: u16, body: String },

    /// Service answered without any text
    #[error("classifier response contained no text")]
    EmptyResponse,

    /// API key environment variable not set
    #[error("environment variable {0} is not set")]
    MissingApiKey(String),
}

/// Image -> text classification service
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, image: Bytes, prompt: &str) -> Result<String, ClassifierError>;
}

/// Google Gemini `generateContent` client with inline image data
pub struct GeminiClassifier {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl GeminiClassifier {
    /// Build a client from configuration, reading the API key from the environment
    pub fn from_config(config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ClassifierError::MissingApiKey(config.api_key_env.clone()))?;
        Self::new(
            &config.endpoint,
            &config.model,
            api_key,
            Duration::from_secs(config.request_timeout_seconds),
        )
    }

    /// Create a client for an explicit endpoint and key
    pub fn new(
        endpoint: &str,
        model: &str,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, ClassifierError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let url = format!(
            "{}/models/{}:generateContent",
            endpoint.trim_end_matches('/'),
            model
        );
        Ok(Self { client, url, api_key })
    }
}

#[async_trait]
impl Classifier for GeminiClassifier {
    async fn classify(&self, image: Bytes, prompt: &str) -> Result<String, ClassifierError> {
        let request = GenerateRequest::with_image(&image, prompt);
        debug!("Sending {} byte image to {}", image.len(), self.url);

        let resp = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ClassifierError::Api { status, body });
        }

        let response: GenerateResponse = resp.json().await?;
        response.text()
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

impl GenerateRequest {
    fn with_image(image: &[u8], prompt: &str) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: "image/jpeg".to_string(),
                            data: BASE64.encode(image),
                        },
                    },
                    Part::Text {
                        text: prompt.to_string(),
                    },
                ],
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize, Deserialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateResponse {
    /// Concatenated text parts of the first candidate
    fn text(&self) -> Result<String, ClassifierError> {
        let text: String = self
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| match part {
                        Part::Text { text } => Some(text.as_str()),
                        Part::InlineData { .. } => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            Err(ClassifierError::EmptyResponse)
        } else {
            Ok(text)
        }
    }
}
