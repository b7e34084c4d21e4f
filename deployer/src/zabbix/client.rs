//! JSON-RPC client for the monitoring server's frontend API

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::{header, Client};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::errors::DeployError;

/// Frontend path of the JSON-RPC endpoint
pub const API_PATH: &str = "api_jsonrpc.php";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    method: &'a str,
    params: P,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,

    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,

    #[serde(default)]
    data: Option<String>,
}

/// Monitoring server API client
pub struct ZabbixClient {
    client: Client,
    endpoint: Url,
    token: SecretString,
    next_id: AtomicU64,
}

impl ZabbixClient {
    /// Create a client for the frontend at `base_url`
    pub fn new(base_url: &str, token: SecretString) -> Result<Self, DeployError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let endpoint = endpoint_url(base_url)?;

        Ok(Self {
            client,
            endpoint,
            token,
            next_id: AtomicU64::new(1),
        })
    }

    /// JSON-RPC endpoint URL
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Call an API method
    pub async fn call<P, T>(&self, method: &str, params: P) -> Result<T, DeployError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        debug!("POST {} ({})", self.endpoint, method);

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.token.expose_secret()),
            )
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("{} failed: {} - {}", method, status, body);
            return Err(DeployError::ApiError(format!("{}: {}", status, body)));
        }

        let body: RpcResponse<T> = response.json().await?;
        match (body.result, body.error) {
            (_, Some(e)) => Err(DeployError::ApiError(format!(
                "{} failed ({}): {}{}",
                method,
                e.code,
                e.message,
                e.data.map(|d| format!(" {}", d)).unwrap_or_default()
            ))),
            (Some(result), None) => Ok(result),
            (None, None) => Err(DeployError::ApiError(format!(
                "{} returned neither result nor error",
                method
            ))),
        }
    }
}

/// `<base_url>/api_jsonrpc.php`, accepting a base with or without the path
pub fn endpoint_url(base_url: &str) -> Result<Url, DeployError> {
    let trimmed = base_url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(API_PATH).unwrap_or(trimmed);
    let base = Url::parse(&format!("{}/", trimmed.trim_end_matches('/'))).map_err(|e| {
        DeployError::ConfigError(format!("Invalid monitoring server URL {}: {}", base_url, e))
    })?;
    base.join(API_PATH)
        .map_err(|e| DeployError::ConfigError(format!("Invalid monitoring server URL {}: {}", base_url, e)))
}
