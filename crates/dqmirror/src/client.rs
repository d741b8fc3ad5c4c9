use std::time::Duration;

use anyhow::Context;
use dqmirror_core::config::Mirror;

use crate::protocol::{ApiRequest, ApiResponse};

/// Talks to a running `dqmirror run` over its HTTP query API.
pub struct QueryClient {
    http: reqwest::Client,
    base: String,
}

impl QueryClient {
    pub fn connect(addr: Option<String>, fallback: &str) -> anyhow::Result<Self> {
        let addr = addr
            .or_else(|| std::env::var("DQMIRROR_QUERY_HTTP_ADDR").ok())
            .unwrap_or_else(|| fallback.to_string());
        let base = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{addr}")
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("build query http client")?;
        Ok(Self { http, base })
    }

    pub async fn request(&self, mirror: Mirror, req: &ApiRequest) -> anyhow::Result<ApiResponse> {
        let resp = self
            .http
            .get(format!("{}/api", self.base))
            .query(&req.to_params(mirror))
            .send()
            .await
            .with_context(|| format!("connect query server {}", self.base))?;
        // error bodies are ApiResponse::Error as well
        resp.json::<ApiResponse>()
            .await
            .context("decode query response")
    }
}
