//! API client for the metric-watch agent

use anyhow::{Context, Result};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

/// API client for the agent's HTTP API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    async fn send(&self, path: &str) -> Result<Response> {
        let url = self.base_url.join(path).context("Invalid path")?;

        self.client
            .get(url)
            .send()
            .await
            .context("Failed to reach the metric-watch agent")
    }

    async fn api_error<T>(response: Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("API error ({}): {}", status, body)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(path).await?;

        if !response.status().is_success() {
            return Self::api_error(response).await;
        }

        response.json().await.context("Failed to parse response")
    }

    /// GET that also accepts a 503 body, which `/healthz` returns when unhealthy
    pub async fn get_lenient<T: DeserializeOwned>(&self, path: &str) -> Result<(StatusCode, T)> {
        let response = self.send(path).await?;
        let status = response.status();

        if !status.is_success() && status != StatusCode::SERVICE_UNAVAILABLE {
            return Self::api_error(response).await;
        }

        let body = response.json().await.context("Failed to parse response")?;
        Ok((status, body))
    }

    /// GET where 404 means "nothing yet"
    pub async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let response = self.send(path).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Self::api_error(response).await;
        }

        response
            .json()
            .await
            .map(Some)
            .context("Failed to parse response")
    }
}
