//! JSON-over-HTTP model provider

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::{
    error::ProviderError,
    models::{GenerateOptions, ProviderDescriptor},
    provider::ModelProvider,
};

#[derive(Debug, Serialize)]
struct GenerateRequestBody<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponseBody {
    text: String,
}

/// Provider that POSTs `{prompt, max_tokens, temperature}` to its endpoint
/// and reads `{text}` back
pub struct HttpProvider {
    descriptor: ProviderDescriptor,
    client: Client,
}

impl HttpProvider {
    /// Create a new HTTP provider
    pub fn new(descriptor: ProviderDescriptor) -> Result<Self, ProviderError> {
        Self::with_client(descriptor, Client::new())
    }

    /// Create a provider sharing an existing client
    pub fn with_client(descriptor: ProviderDescriptor, client: Client) -> Result<Self, ProviderError> {
        if descriptor.endpoint.trim().is_empty() {
            return Err(ProviderError::ConfigError(format!(
                "Provider '{}' has no endpoint",
                descriptor.id
            )));
        }
        Ok(Self { descriptor, client })
    }

    fn retry_after(response: &reqwest::Response) -> u64 {
        response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ModelProvider for HttpProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, ProviderError> {
        debug!(provider = %self.descriptor.id, endpoint = %self.descriptor.endpoint, "Sending generate request");

        let body = GenerateRequestBody {
            prompt,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };

        let response = self
            .client
            .post(&self.descriptor.endpoint)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited(Self::retry_after(&response)));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(provider = %self.descriptor.id, %status, "Provider API error: {}", error_text);
            return Err(ProviderError::ProviderError(format!(
                "{} returned {}",
                self.descriptor.id, status
            )));
        }

        let parsed: GenerateResponseBody = response.json().await.map_err(|e| {
            ProviderError::SerializationError(format!("Failed to parse response: {}", e))
        })?;
        Ok(parsed.text)
    }
}
