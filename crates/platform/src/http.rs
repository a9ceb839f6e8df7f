//! REST client for the remote modeling platform

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

use crate::api::ModelingPlatform;
use crate::documents::{status_code, STATUS_FAULTY, STATUS_FINISHED, STATUS_UNKNOWN};
use crate::errors::PlatformError;
use crate::types::{ResourceId, ResourceKind};

/// Connection settings for [`HttpPlatform`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpPlatformConfig {
    /// API root, e.g. `https://platform.example.com/andromeda`
    pub url: String,
    pub username: String,
    pub api_key: String,
    /// Delay between status polls while waiting for a resource
    pub poll_interval_ms: u64,
    /// Give up waiting for a single resource after this long
    pub wait_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for HttpPlatformConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            username: String::new(),
            api_key: String::new(),
            poll_interval_ms: 1_000,
            wait_timeout_secs: 3_600,
            request_timeout_secs: 60,
        }
    }
}

/// Modeling platform client speaking JSON over HTTP
pub struct HttpPlatform {
    config: HttpPlatformConfig,
    base: Url,
    client: reqwest::Client,
}

impl HttpPlatform {
    pub fn new(config: HttpPlatformConfig) -> Result<Self, PlatformError> {
        let mut root = config.url.trim_end_matches('/').to_string();
        root.push('/');
        let base = Url::parse(&root)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            config,
            base,
            client,
        })
    }

    /// Authenticated URL for `path` (a kind or a resource id).
    pub fn endpoint(&self, path: &str) -> Result<Url, PlatformError> {
        let mut url = self.base.join(path)?;
        url.query_pairs_mut()
            .append_pair("username", &self.config.username)
            .append_pair("api_key", &self.config.api_key);
        Ok(url)
    }

    async fn read_json(response: reqwest::Response, id: &str) -> Result<Value, PlatformError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PlatformError::NotFound(id.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ModelingPlatform for HttpPlatform {
    async fn create(
        &self,
        kind: ResourceKind,
        args: &Map<String, Value>,
    ) -> Result<ResourceId, PlatformError> {
        let response = self
            .client
            .post(self.endpoint(kind.as_str())?)
            .json(args)
            .send()
            .await?;
        let document = Self::read_json(response, kind.as_str()).await?;

        let resource = document
            .get("resource")
            .and_then(Value::as_str)
            .ok_or_else(|| PlatformError::Malformed("creation response has no resource".to_string()))?;
        let id = ResourceId::parse(resource)
            .map_err(|err| PlatformError::Malformed(err.to_string()))?;
        debug!("created {}", id);
        Ok(id)
    }

    async fn fetch(&self, id: &ResourceId) -> Result<Value, PlatformError> {
        let response = self
            .client
            .get(self.endpoint(&id.to_string())?)
            .send()
            .await?;
        Self::read_json(response, &id.to_string()).await
    }

    async fn delete(&self, id: &ResourceId) -> Result<(), PlatformError> {
        let response = self
            .client
            .delete(self.endpoint(&id.to_string())?)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PlatformError::NotFound(id.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn wait(&self, id: &ResourceId) -> Result<(), PlatformError> {
        let started = Instant::now();
        let timeout = Duration::from_secs(self.config.wait_timeout_secs);
        let poll = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            let document = self.fetch(id).await?;
            match status_code(&document) {
                Some(STATUS_FINISHED) => return Ok(()),
                Some(code) if code == STATUS_FAULTY || code == STATUS_UNKNOWN => {
                    let message = document
                        .pointer("/status/message")
                        .and_then(Value::as_str)
                        .unwrap_or("no status message")
                        .to_string();
                    return Err(PlatformError::Faulty {
                        id: id.to_string(),
                        message,
                    });
                }
                _ => {}
            }

            if started.elapsed() >= timeout {
                return Err(PlatformError::Timeout(id.to_string()));
            }
            tokio::time::sleep(poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_carry_credentials() {
        let platform = HttpPlatform::new(HttpPlatformConfig {
            url: "https://platform.example.com/andromeda/".to_string(),
            username: "alice".to_string(),
            api_key: "secret".to_string(),
            ..HttpPlatformConfig::default()
        })
        .unwrap();

        let url = platform.endpoint("dataset/5af59f9cc7736e6b33005697").unwrap();
        assert_eq!(
            url.as_str(),
            "https://platform.example.com/andromeda/dataset/5af59f9cc7736e6b33005697?username=alice&api_key=secret"
        );
        assert_eq!(
            platform.endpoint("evaluation").unwrap().path(),
            "/andromeda/evaluation"
        );
    }

    #[test]
    fn rejects_invalid_base_url() {
        let result = HttpPlatform::new(HttpPlatformConfig {
            url: "not a url".to_string(),
            ..HttpPlatformConfig::default()
        });
        assert!(matches!(result, Err(PlatformError::Request(_))));
    }

    #[test]
    fn config_defaults_fill_missing_keys() {
        let config: HttpPlatformConfig =
            serde_json::from_value(serde_json::json!({"username": "bob"})).unwrap();
        assert_eq!(config.username, "bob");
        assert_eq!(config.poll_interval_ms, 1_000);
    }
}
