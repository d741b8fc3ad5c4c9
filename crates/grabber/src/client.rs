use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use dqmirror_core::config::{Config, Mirror};
use dqmirror_core::error::{MirrorError, Result};
use dqmirror_core::host::MonitoredHost;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue};
use reqwest::{Client, Identity, RequestBuilder};
use serde_json::Value;
use tracing::debug;

use crate::protocol::{DocumentsResponse, Envelope, RemoteRequest, SyncResponse};

/// Source of remote telemetry. The scheduler talks to the gateway through
/// [`RemoteClient`]; tests substitute their own.
pub trait TelemetrySource: Send + Sync {
    /// Headers newer than `known_rev` on `host`.
    fn sync(
        &self,
        host: &MonitoredHost,
        known_rev: i64,
    ) -> impl Future<Output = Result<SyncResponse>> + Send;

    /// Full documents for `ids`, in request order.
    fn documents(
        &self,
        host: &MonitoredHost,
        ids: &[String],
    ) -> impl Future<Output = Result<Vec<Value>>> + Send;

    /// Raw up/down report for every machine of one cluster.
    fn cluster_status(&self, mirror: Mirror) -> impl Future<Output = Result<Value>> + Send;
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub proxy_url: String,
    pub gateway_host: String,
    pub fff_port: u16,
    pub secret_name: String,
    pub secret: Option<String>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub tls_insecure: bool,
    pub timeout: Duration,
}

impl From<&Config> for RemoteConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            proxy_url: cfg.proxy_url.trim_end_matches('/').to_string(),
            gateway_host: cfg.gateway_host.clone(),
            fff_port: cfg.fff_port,
            secret_name: cfg.secret_name.clone(),
            secret: cfg.secret.clone(),
            client_cert: cfg.client_cert.clone(),
            client_key: cfg.client_key.clone(),
            tls_insecure: cfg.tls_insecure,
            timeout: cfg.request_timeout,
        }
    }
}

#[derive(Clone)]
pub struct RemoteClient {
    http: Client,
    cfg: RemoteConfig,
}

impl RemoteClient {
    pub fn new(cfg: RemoteConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        match &cfg.secret {
            Some(secret) => {
                let cookie = HeaderValue::from_str(&format!("{}={}", cfg.secret_name, secret))
                    .map_err(|e| MirrorError::Config(format!("invalid secret cookie: {e}")))?;
                headers.insert(COOKIE, cookie);
            }
            None => tracing::warn!("no gateway secret configured; requests will be anonymous"),
        }

        let mut builder = Client::builder()
            .timeout(cfg.timeout)
            .default_headers(headers)
            .danger_accept_invalid_certs(cfg.tls_insecure);
        if let Some(identity) = load_identity(&cfg)? {
            builder = builder.identity(identity);
        }
        let http = builder
            .build()
            .map_err(|e| MirrorError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self { http, cfg })
    }

    /// The gateway machine is reached directly, every other host through the
    /// proxy redirect.
    fn host_request(&self, host: &MonitoredHost) -> RequestBuilder {
        if host.name == self.cfg.gateway_host {
            self.http.post(format!("{}/sync_proxy", self.cfg.proxy_url))
        } else {
            self.http
                .post(format!("{}/redirect", self.cfg.proxy_url))
                .query(&[
                    ("path", host.name.clone()),
                    ("port", self.cfg.fff_port.to_string()),
                ])
        }
    }

    async fn exchange(&self, host: &MonitoredHost, request: &RemoteRequest) -> Result<Envelope> {
        let body = Envelope::wrap(request)?;
        let resp = self
            .host_request(host)
            .json(&body)
            .send()
            .await
            .map_err(|e| MirrorError::Transport(format!("request to {} failed: {e}", host.name)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(MirrorError::Transport(format!(
                "{} answered with status {status}",
                host.name
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| MirrorError::Transport(format!("reading {} failed: {e}", host.name)))?;
        debug!(host = %host.name, bytes = bytes.len(), "received response");
        serde_json::from_slice(&bytes)
            .map_err(|e| MirrorError::Payload(format!("bad envelope from {}: {e}", host.name)))
    }
}

impl TelemetrySource for RemoteClient {
    async fn sync(&self, host: &MonitoredHost, known_rev: i64) -> Result<SyncResponse> {
        self.exchange(host, &RemoteRequest::SyncRequest { known_rev })
            .await?
            .open()
    }

    async fn documents(&self, host: &MonitoredHost, ids: &[String]) -> Result<Vec<Value>> {
        let request = RemoteRequest::RequestDocuments { ids: ids.to_vec() };
        let resp: DocumentsResponse = self.exchange(host, &request).await?.open()?;
        Ok(resp.documents)
    }

    async fn cluster_status(&self, mirror: Mirror) -> Result<Value> {
        let cluster = mirror.as_str();
        let resp = self
            .http
            .get(format!("{}/cr/exe", self.cfg.proxy_url))
            .query(&[("cluster", cluster), ("what", "get_cluster_status")])
            .send()
            .await
            .map_err(|e| MirrorError::Transport(format!("{cluster} status request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(MirrorError::Transport(format!(
                "failed to fetch {cluster} status: ({status}) {text}"
            )));
        }

        resp.json::<Value>()
            .await
            .map_err(|e| MirrorError::Payload(format!("failed to parse {cluster} status: {e}")))
    }
}

/// rustls wants certificate and key in one PEM bundle.
fn load_identity(cfg: &RemoteConfig) -> Result<Option<Identity>> {
    let Some(cert_path) = &cfg.client_cert else {
        return Ok(None);
    };
    let mut pem = fs::read(cert_path).map_err(|e| {
        MirrorError::Config(format!("failed reading {}: {e}", cert_path.display()))
    })?;
    if let Some(key_path) = &cfg.client_key {
        let key = fs::read(key_path).map_err(|e| {
            MirrorError::Config(format!("failed reading {}: {e}", key_path.display()))
        })?;
        pem.push(b'\n');
        pem.extend_from_slice(&key);
    }
    Identity::from_pem(&pem)
        .map(Some)
        .map_err(|e| MirrorError::Config(format!("invalid client certificate: {e}")))
}
