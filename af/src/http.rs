//! HTTP producer - fetches a JSON document from a URL

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::HttpConfig;
use crate::coordinator::{DependencyKey, Producer};

/// Errors from the HTTP producer
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl HttpError {
    /// Check if a later attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpError::Network(_) => true,
            HttpError::Status { status, .. } => *status >= 500 || *status == 429,
            HttpError::InvalidResponse(_) => false,
        }
    }
}

/// Longest response body kept in a status error message
const MAX_ERROR_BODY: usize = 200;

/// Producer issuing `GET url` and decoding the body as JSON
///
/// Each named parameter takes its value from the dependency key element at
/// the same position, so `params = ["page", "lot"]` with key `[2, "A"]`
/// requests `url?page=2&lot=A`.
pub struct HttpProducer {
    client: Client,
    url: String,
    params: Vec<String>,
}

impl HttpProducer {
    pub fn new(url: impl Into<String>, params: Vec<String>, config: &HttpConfig) -> Result<Self, HttpError> {
        let url = url.into();
        debug!(%url, ?params, "HttpProducer::new: called");
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self { client, url, params })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn get(&self, key: &[Value]) -> Result<Value, HttpError> {
        let query = build_query(&self.params, key);
        debug!(url = %self.url, ?query, "HttpProducer::get: called");

        let response = self.client.get(&self.url).query(&query).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HttpError::Status {
                status: status.as_u16(),
                message: truncate(&text, MAX_ERROR_BODY),
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| HttpError::InvalidResponse(format!("body is not JSON: {}", e)))
    }
}

#[async_trait]
impl Producer<Value> for HttpProducer {
    async fn produce(&self, key: DependencyKey) -> eyre::Result<Value> {
        Ok(self.get(&key).await?)
    }
}

/// Pair parameter names with dependency key values
///
/// Extra names without a value and extra values without a name are dropped.
/// Null becomes an empty value; strings are sent without quotes.
pub fn build_query(params: &[String], key: &[Value]) -> Vec<(String, String)> {
    params
        .iter()
        .zip(key)
        .map(|(name, value)| (name.clone(), query_value(value)))
        .collect()
}

fn query_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
