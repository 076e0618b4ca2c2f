//! Collaborator seams for the transport, history source and liveness probe.
//!
//! DESIGN
//! ======
//! Each external dependency is an `async_trait` so the session driver can run
//! against in-memory fakes in tests. Production implementations:
//! - [`WsTransport`]: IRC-over-WebSocket via `tokio-tungstenite`
//! - [`HttpHistory`]: recent-history endpoint, JSON `{"messages": [raw, ...]}`
//! - [`HttpProbe`]: liveness endpoint, JSON `{"live": bool}`
//!
//! HTTP endpoints are URL templates; `{channel}` is replaced by the channel
//! name. Response parsing lives in pure functions for testability.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};

use crate::connection::SourceStatus;
use crate::error::{CollaboratorError, TransportError};
use crate::wire;

const HTTP_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// TRAITS
// =============================================================================

/// What an open session yields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Closed { abnormal: bool, reason: String },
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open a session joined to `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if the socket or login handshake fails.
    async fn open(&self, channel: &str) -> Result<Box<dyn TransportSession>, TransportError>;
}

#[async_trait::async_trait]
pub trait TransportSession: Send {
    /// Next inbound frame or the closure. Must be cancel-safe.
    async fn recv(&mut self) -> Inbound;

    /// Write one outbound line.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Write`] if the socket rejects the write.
    async fn send(&mut self, line: &str) -> Result<(), TransportError>;

    async fn close(&mut self);
}

#[async_trait::async_trait]
pub trait HistorySource: Send + Sync {
    /// Recent raw payloads for `channel`, oldest first.
    async fn recent(&self, channel: &str) -> Result<Vec<String>, CollaboratorError>;
}

#[async_trait::async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn status(&self, channel: &str) -> Result<SourceStatus, CollaboratorError>;
}

// =============================================================================
// WEBSOCKET TRANSPORT
// =============================================================================

pub struct WsTransport {
    url: String,
    nick: String,
    token: Option<String>,
}

impl WsTransport {
    /// Without a nick the session logs in anonymously (read-only).
    #[must_use]
    pub fn new(url: impl Into<String>, nick: Option<String>, token: Option<String>) -> Self {
        Self {
            url: url.into(),
            nick: nick.map_or_else(anonymous_nick, |nick| nick.to_lowercase()),
            token,
        }
    }

    #[must_use]
    pub fn nick(&self) -> &str {
        &self.nick
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.token.is_none()
    }
}

/// `justinfan<digits>`: the conventional read-only login.
#[must_use]
pub fn anonymous_nick() -> String {
    format!("justinfan{}", rand::rng().random_range(10_000..100_000_u32))
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn open(&self, channel: &str) -> Result<Box<dyn TransportSession>, TransportError> {
        let (mut stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        for line in wire::login_lines(channel, &self.nick, self.token.as_deref()) {
            stream
                .send(WsMessage::Text(line.into()))
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
        }
        info!(url = %self.url, %channel, nick = %self.nick, "transport: websocket open");
        Ok(Box::new(WsSession { stream }))
    }
}

struct WsSession {
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

#[async_trait::async_trait]
impl TransportSession for WsSession {
    async fn recv(&mut self) -> Inbound {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => return Inbound::Text(text.to_string()),
                Some(Ok(WsMessage::Close(frame))) => {
                    let (abnormal, reason) = close_outcome(frame.as_ref());
                    return Inbound::Closed { abnormal, reason };
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Inbound::Closed { abnormal: true, reason: err.to_string() },
                None => return Inbound::Closed { abnormal: true, reason: "stream ended".to_owned() },
            }
        }
    }

    async fn send(&mut self, line: &str) -> Result<(), TransportError> {
        self.stream
            .send(WsMessage::Text(line.into()))
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            debug!(error = %err, "transport: close handshake failed");
        }
    }
}

/// Only an explicit normal-closure code counts as a graceful close.
fn close_outcome(frame: Option<&CloseFrame>) -> (bool, String) {
    match frame {
        Some(frame) => (frame.code != CloseCode::Normal, format!("{} {}", u16::from(frame.code), frame.reason.as_str())),
        None => (true, "closed without status".to_owned()),
    }
}

// =============================================================================
// HTTP COLLABORATORS
// =============================================================================

fn http_client() -> Result<reqwest::Client, CollaboratorError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
        .map_err(|e| CollaboratorError::Request(e.to_string()))
}

async fn get_text(http: &reqwest::Client, url: &str) -> Result<String, CollaboratorError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| CollaboratorError::Request(e.to_string()))?;
    let status = response.status().as_u16();
    if status != 200 {
        return Err(CollaboratorError::Status { status });
    }
    response
        .text()
        .await
        .map_err(|e| CollaboratorError::Request(e.to_string()))
}

fn expand(template: &str, channel: &str) -> String {
    template.replace("{channel}", channel)
}

pub struct HttpHistory {
    http: reqwest::Client,
    url_template: String,
}

impl HttpHistory {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url_template: impl Into<String>) -> Result<Self, CollaboratorError> {
        Ok(Self { http: http_client()?, url_template: url_template.into() })
    }
}

#[async_trait::async_trait]
impl HistorySource for HttpHistory {
    async fn recent(&self, channel: &str) -> Result<Vec<String>, CollaboratorError> {
        let text = get_text(&self.http, &expand(&self.url_template, channel)).await?;
        parse_history(&text)
    }
}

pub struct HttpProbe {
    http: reqwest::Client,
    url_template: String,
}

impl HttpProbe {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url_template: impl Into<String>) -> Result<Self, CollaboratorError> {
        Ok(Self { http: http_client()?, url_template: url_template.into() })
    }
}

#[async_trait::async_trait]
impl LivenessProbe for HttpProbe {
    async fn status(&self, channel: &str) -> Result<SourceStatus, CollaboratorError> {
        let text = get_text(&self.http, &expand(&self.url_template, channel)).await?;
        parse_probe(&text)
    }
}

#[derive(serde::Deserialize)]
struct HistoryResponse {
    messages: Vec<String>,
}

#[derive(serde::Deserialize)]
struct ProbeResponse {
    live: bool,
}

fn parse_history(json: &str) -> Result<Vec<String>, CollaboratorError> {
    let response: HistoryResponse =
        serde_json::from_str(json).map_err(|e| CollaboratorError::Decode(e.to_string()))?;
    Ok(response.messages)
}

fn parse_probe(json: &str) -> Result<SourceStatus, CollaboratorError> {
    let response: ProbeResponse = serde_json::from_str(json).map_err(|e| CollaboratorError::Decode(e.to_string()))?;
    Ok(if response.live { SourceStatus::Active } else { SourceStatus::Ended })
}

// =============================================================================
// NULL COLLABORATORS
// =============================================================================

/// No history endpoint configured.
pub struct NoHistory;

#[async_trait::async_trait]
impl HistorySource for NoHistory {
    async fn recent(&self, _channel: &str) -> Result<Vec<String>, CollaboratorError> {
        Ok(Vec::new())
    }
}

/// No probe configured: always report the source as active, so silence only
/// ever cycles the transport.
pub struct NoProbe;

#[async_trait::async_trait]
impl LivenessProbe for NoProbe {
    async fn status(&self, _channel: &str) -> Result<SourceStatus, CollaboratorError> {
        Ok(SourceStatus::Active)
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
