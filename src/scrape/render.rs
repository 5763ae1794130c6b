//! Client for an external headless-browser rendering service.
//!
//! Pages that build their content with JavaScript come back nearly empty
//! from a plain GET. When a rendering service is configured, the scraper
//! asks it for the post-script DOM instead. The wire contract is the common
//! "content" endpoint shape: `POST {endpoint}` with `{"url": "..."}`,
//! answered with the rendered HTML as the response body.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::FetchError;

/// Produces the rendered HTML of a page.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str, timeout: Duration) -> Result<RenderedPage, FetchError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    pub html: String,
    pub status: u16,
}

/// [`PageRenderer`] backed by an HTTP rendering service.
pub struct RenderService {
    client: reqwest::Client,
    endpoint: String,
}

impl RenderService {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl PageRenderer for RenderService {
    async fn render(&self, url: &str, timeout: Duration) -> Result<RenderedPage, FetchError> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&json!({ "url": url }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(timeout.as_millis() as u64)
                } else {
                    FetchError::Render(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Render(format!(
                "rendering service answered HTTP {}",
                status.as_u16()
            )));
        }
        let html = response
            .text()
            .await
            .map_err(|e| FetchError::Render(e.to_string()))?;
        if html.trim().is_empty() {
            return Err(FetchError::Render("rendering service returned an empty page".to_string()));
        }
        Ok(RenderedPage {
            html,
            status: status.as_u16(),
        })
    }
}
