//! Loki HTTP probes.
//!
//! Plain HTTP/1 over a fresh TCP connection, bounded by a single timeout
//! covering connect, handshake, request and body.

use std::time::Duration;

use http_body_util::BodyExt;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const RULES_PATH: &str = "/loki/api/v1/rules";
pub const BUILD_INFO_PATH: &str = "/loki/api/v1/status/buildinfo";

const NO_RULE_GROUPS: &str = "no rule groups found";

/// Outcome of a ruler probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RulerProbe {
    Healthy,
    /// Loki answered but rejected the rules.
    RuleError { status: u16, body: String },
    /// Loki could not be reached; retry on the next pass.
    Transient { reason: String },
}

impl RulerProbe {
    pub fn is_healthy(&self) -> bool {
        matches!(self, RulerProbe::Healthy)
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("request to {uri} failed: {reason}")]
    Request { uri: String, reason: String },

    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("unexpected status {status} from {uri}")]
    Status { uri: String, status: u16 },

    #[error("invalid response body: {0}")]
    Body(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BuildInfo {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub branch: String,
}

/// Map a ruler API response onto a probe outcome.
pub fn classify_ruler_response(status: u16, body: &str) -> RulerProbe {
    match status {
        200 => RulerProbe::Healthy,
        404 if body.contains(NO_RULE_GROUPS) => RulerProbe::Healthy,
        _ => RulerProbe::RuleError {
            status,
            body: body.trim().to_string(),
        },
    }
}

/// Probe the Loki ruler at `address` (`host:port`).
pub async fn probe_ruler(address: &str, timeout: Duration) -> RulerProbe {
    match http_get(address, RULES_PATH, timeout).await {
        Ok((status, body)) => {
            let outcome = classify_ruler_response(status, &body);
            debug!(%address, status, healthy = outcome.is_healthy(), "ruler probe");
            outcome
        }
        Err(e) => {
            debug!(%address, error = %e, "ruler probe failed");
            RulerProbe::Transient {
                reason: e.to_string(),
            }
        }
    }
}

pub async fn fetch_build_info(address: &str, timeout: Duration) -> Result<BuildInfo, ProbeError> {
    let (status, body) = http_get(address, BUILD_INFO_PATH, timeout).await?;
    if status != 200 {
        return Err(ProbeError::Status {
            uri: format!("http://{address}{BUILD_INFO_PATH}"),
            status,
        });
    }
    serde_json::from_str(&body).map_err(|e| ProbeError::Body(e.to_string()))
}

/// GET `http://{address}{path}` and return status plus body text.
pub async fn http_get(address: &str, path: &str, timeout: Duration) -> Result<(u16, String), ProbeError> {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = tokio::net::TcpStream::connect(address)
            .await
            .map_err(|e| ProbeError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ProbeError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "logplane-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .map_err(|e| ProbeError::Request {
                uri: uri.clone(),
                reason: e.to_string(),
            })?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ProbeError::Request {
                uri: uri.clone(),
                reason: e.to_string(),
            })?;
        let status = resp.status().as_u16();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ProbeError::Body(e.to_string()))?
            .to_bytes();
        Ok((status, String::from_utf8_lossy(&body).into_owned()))
    })
    .await;

    match result {
        Ok(inner) => inner,
        Err(_) => Err(ProbeError::Timeout(uri)),
    }
}
