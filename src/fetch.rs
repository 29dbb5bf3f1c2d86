use std::future::Future;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{FetchError, StartupError};
use crate::record::EntityKey;

/// Anything that can turn a URL into document text.
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, FetchError>> + Send;
}

/// A URL with a single `{key}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate(String);

impl UrlTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self, StartupError> {
        let template = template.into();
        if !template.contains("{key}") {
            return Err(StartupError::Config(format!(
                "url template '{}' has no {{key}} placeholder",
                template
            )));
        }
        Ok(UrlTemplate(template))
    }

    pub fn url_for(&self, key: &EntityKey) -> String {
        self.0.replace("{key}", key.as_str())
    }
}

/// Shared `reqwest` client, built once and handed to the driver.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, StartupError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(StartupError::Client)?;
        Ok(HttpFetcher { client })
    }
}

impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let http = |source| FetchError::Http {
            url: url.to_string(),
            source,
        };

        let start = Instant::now();
        let response = self.client.get(url).send().await.map_err(http)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.text().await.map_err(http)?;
        debug!(url, bytes = body.len(), latency_ms = start.elapsed().as_millis() as u64, "fetched");
        Ok(body)
    }
}
