//! HTTP client for the analytics platform: contract publication and
//! measurement upload.

use std::time::Duration;

use async_trait::async_trait;
use meterlink_core::{
    ContractDocument, ContractsApi, MeasurementPayload, MeasurementUploader, RemoteError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const CONTRACTS: &str = "v1/contracts";
const MEASURES: &str = "v1/amon_measures";
const SESSION_COOKIE: &str = "iPlanetDirectoryPro";

/// Upload retries after the first attempt.
const UPLOAD_RETRIES: u32 = 5;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);
const RETRY_STATUSES: [u16; 4] = [500, 502, 503, 504];

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("login rejected: {0}")]
    Login(String),
}

impl From<SyncError> for RemoteError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Server { status, body } => RemoteError::Rejected { status, body },
            other => RemoteError::Transport(other.to_string()),
        }
    }
}

/// Connection settings for the analytics platform.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsConfig {
    pub base_url: String,
    pub company_id: String,
    pub username: String,
    pub password: String,
    /// PEM client certificate followed by its private key.
    pub identity_pem: Option<Vec<u8>>,
    /// Accept any server certificate.
    pub insecure: bool,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: Option<String>,
}

#[derive(Deserialize)]
struct EtagResponse {
    #[serde(rename = "_etag")]
    etag: Option<String>,
}

/// HTTP client for the analytics platform's contract and measure endpoints.
///
/// Logs in on first use and reuses the session token for every later call.
pub struct AnalyticsClient {
    client: reqwest::Client,
    base_url: String,
    company_id: String,
    username: String,
    password: String,
    token: OnceCell<String>,
}

impl AnalyticsClient {
    /// `base_url` should be like `https://api.example.org` (trailing slash is trimmed).
    pub fn new(config: AnalyticsConfig) -> Result<Self, SyncError> {
        let mut builder = reqwest::Client::builder().danger_accept_invalid_certs(config.insecure);
        if let Some(pem) = &config.identity_pem {
            builder = builder.identity(reqwest::Identity::from_pem(pem)?);
        }
        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            company_id: config.company_id,
            username: config.username,
            password: config.password,
            token: OnceCell::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn login(&self) -> Result<String, SyncError> {
        let url = self.url("authn/login");
        info!(url = %url, "logging in to analytics platform");
        let resp = self
            .client
            .post(&url)
            .header("X-CompanyId", &self.company_id)
            .json(&LoginRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Server {
                status: status.as_u16(),
                body,
            });
        }
        let login: LoginResponse = serde_json::from_str(&resp.text().await?)?;
        login
            .token
            .ok_or_else(|| SyncError::Login("no token in login response".into()))
    }

    async fn session(&self) -> Result<&str, SyncError> {
        let token = self.token.get_or_try_init(|| self.login()).await?;
        Ok(token.as_str())
    }

    /// Request builder carrying the company header and session cookie.
    async fn request(
        &self,
        method: reqwest::Method,
        url: &str,
    ) -> Result<reqwest::RequestBuilder, SyncError> {
        let token = self.session().await?;
        Ok(self
            .client
            .request(method, url)
            .header("X-CompanyId", &self.company_id)
            .header(reqwest::header::COOKIE, format!("{SESSION_COOKIE}={token}")))
    }

    /// Map a response to its status, or to `SyncError::Server` unless it is `expected`.
    async fn expect_status(resp: reqwest::Response, expected: u16) -> Result<u16, SyncError> {
        let status = resp.status().as_u16();
        if status == expected {
            return Ok(status);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(SyncError::Server { status, body })
    }

    pub async fn contract_exists(&self, contract_id: &str) -> Result<bool, SyncError> {
        let url = self.url(&format!("{CONTRACTS}/{contract_id}"));
        let resp = self.request(reqwest::Method::GET, &url).await?.send().await?;
        match resp.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(SyncError::Server { status, body })
            }
        }
    }

    pub async fn create_contract(&self, document: &ContractDocument) -> Result<u16, SyncError> {
        let url = self.url(CONTRACTS);
        info!(contract = %document.contract_id, "creating contract");
        let resp = self
            .request(reqwest::Method::POST, &url)
            .await?
            .json(document)
            .send()
            .await?;
        Self::expect_status(resp, 201).await
    }

    /// PATCH the contract against its current `_etag`; creates it when the
    /// platform returns no etag.
    pub async fn update_contract(&self, document: &ContractDocument) -> Result<u16, SyncError> {
        let url = self.url(&format!("{CONTRACTS}/{}", document.contract_id));
        let resp = self.request(reqwest::Method::GET, &url).await?.send().await?;
        let etag = if resp.status().is_success() {
            let current: EtagResponse = serde_json::from_str(&resp.text().await?)?;
            current.etag
        } else {
            None
        };

        let Some(etag) = etag else {
            warn!(contract = %document.contract_id, "no etag for contract, creating it instead");
            return self.create_contract(document).await;
        };

        info!(contract = %document.contract_id, "updating contract");
        let resp = self
            .request(reqwest::Method::PATCH, &url)
            .await?
            .header(reqwest::header::IF_MATCH, etag)
            .json(document)
            .send()
            .await?;
        Self::expect_status(resp, 200).await
    }

    /// POST measurements, retrying transient server errors with exponential backoff.
    pub async fn upload_measures(&self, payload: &MeasurementPayload) -> Result<u16, SyncError> {
        let url = self.url(MEASURES);
        let mut attempt = 0;
        loop {
            let sent = self
                .request(reqwest::Method::POST, &url)
                .await?
                .json(payload)
                .send()
                .await;

            let retryable = match &sent {
                Ok(resp) => RETRY_STATUSES.contains(&resp.status().as_u16()),
                Err(e) => e.is_connect() || e.is_timeout(),
            };
            if retryable && attempt < UPLOAD_RETRIES {
                let delay = RETRY_BACKOFF * 2u32.pow(attempt);
                attempt += 1;
                warn!(attempt, delay_ms = delay.as_millis() as u64, "measure upload failed, retrying");
                tokio::time::sleep(delay).await;
                continue;
            }

            let resp = sent?;
            debug!(measures = payload.len(), status = resp.status().as_u16(), "measure upload answered");
            return Self::expect_status(resp, 200).await;
        }
    }
}

#[async_trait]
impl ContractsApi for AnalyticsClient {
    async fn exists(&self, contract_id: &str) -> Result<bool, RemoteError> {
        Ok(self.contract_exists(contract_id).await?)
    }

    async fn create(&self, document: &ContractDocument) -> Result<u16, RemoteError> {
        Ok(self.create_contract(document).await?)
    }

    async fn update(&self, document: &ContractDocument) -> Result<u16, RemoteError> {
        Ok(self.update_contract(document).await?)
    }
}

#[async_trait]
impl MeasurementUploader for AnalyticsClient {
    async fn upload(&self, payload: &MeasurementPayload) -> Result<u16, RemoteError> {
        Ok(self.upload_measures(payload).await?)
    }
}
