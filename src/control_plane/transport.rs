//! HTTP seam for the management API
use crate::config::BrokerCredentials;
use crate::errors::{BrokerError, BrokerResult};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, Method};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Why a request did not produce a usable JSON body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpFailure {
    /// The API answered with a non-2xx status
    Response { status: u16, body: String },
    /// Refused, reset, timed out, DNS failure
    NoResponse(String),
    /// The request could not be built
    Setup(String),
    /// 2xx with a body that is not JSON
    Decode(String),
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpFailure::Response { status, body } => write!(f, "HTTP {}: {}", status, body),
            HttpFailure::NoResponse(reason) => write!(f, "no response: {}", reason),
            HttpFailure::Setup(reason) => write!(f, "request setup failed: {}", reason),
            HttpFailure::Decode(reason) => write!(f, "undecodable response: {}", reason),
        }
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send one request; `endpoint` is relative to the API base and starts with `/`
    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value, HttpFailure>;
}

pub struct ReqwestTransport {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl ReqwestTransport {
    pub fn new(credentials: &BrokerCredentials, timeout: Duration) -> BrokerResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!credentials.tls_verify())
            .build()
            .map_err(|e| BrokerError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: credentials.control_plane_base_url(),
            username: credentials.username().to_string(),
            password: credentials.password().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value, HttpFailure> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut request = self
            .client
            .request(method, &url)
            .basic_auth(&self.username, Some(&self.password))
            .header(ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(classify_send_error)?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| HttpFailure::NoResponse(e.to_string()))?;

        if !status.is_success() {
            return Err(HttpFailure::Response {
                status: status.as_u16(),
                body: text,
            });
        }

        // 201/204 from write endpoints carry no body
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| HttpFailure::Decode(e.to_string()))
    }
}

fn classify_send_error(err: reqwest::Error) -> HttpFailure {
    if err.is_builder() {
        HttpFailure::Setup(err.to_string())
    } else if let Some(status) = err.status() {
        HttpFailure::Response {
            status: status.as_u16(),
            body: err.to_string(),
        }
    } else {
        HttpFailure::NoResponse(err.to_string())
    }
}
