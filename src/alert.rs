// src/alert.rs
//
// Alert transports for the on-site warning light.
//
//   rpi      plain UTF-8 command over a persistent TCP connection,
//            reconnected on demand
//   webhook  HTTP GET to a fully resolved URL; non-2xx is a failure
//   none     alerts disabled
//
// Delivery runs inline in the detection loop; callers bound it with a
// timeout and only log failures.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::WarningTransport;

/// Command understood by the light controller.
pub const LIGHT_ON: &str = "LIGHT_ON";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Failed to connect to warning server {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out connecting to warning server {0}")]
    ConnectTimeout(String),

    #[error("Failed to send signal: {0}")]
    Send(#[source] std::io::Error),

    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook returned HTTP {0}")]
    HttpStatus(reqwest::StatusCode),
}

#[async_trait]
pub trait AlertClient: Send {
    fn kind(&self) -> &'static str;

    async fn connect(&mut self) -> Result<(), AlertError>;

    async fn send_signal(&mut self, signal: &str) -> Result<(), AlertError>;

    async fn close(&mut self);
}

// ============================================================================
// SOCKET (rpi)
// ============================================================================

pub struct SocketAlertClient {
    addr: String,
    stream: Option<TcpStream>,
}

impl SocketAlertClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
            stream: None,
        }
    }

    #[cfg(test)]
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

#[async_trait]
impl AlertClient for SocketAlertClient {
    fn kind(&self) -> &'static str {
        "rpi"
    }

    async fn connect(&mut self) -> Result<(), AlertError> {
        let attempt = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.addr)).await;
        match attempt {
            Ok(Ok(stream)) => {
                info!("✅ Connected to warning server {}", self.addr);
                self.stream = Some(stream);
                Ok(())
            }
            Ok(Err(source)) => {
                self.stream = None;
                Err(AlertError::Connect {
                    addr: self.addr.clone(),
                    source,
                })
            }
            Err(_) => {
                self.stream = None;
                Err(AlertError::ConnectTimeout(self.addr.clone()))
            }
        }
    }

    async fn send_signal(&mut self, signal: &str) -> Result<(), AlertError> {
        if self.stream.is_none() {
            debug!("Warning socket not connected, reconnecting");
            self.connect().await?;
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(AlertError::ConnectTimeout(self.addr.clone()));
        };

        let written = stream.write_all(signal.as_bytes()).await;
        match written {
            Ok(()) => {
                info!("💡 Signal '{}' sent to {}", signal, self.addr);
                Ok(())
            }
            Err(e) => {
                // Next send reconnects.
                self.stream = None;
                Err(AlertError::Send(e))
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Warning socket shutdown failed: {}", e);
            }
            info!("Warning server connection closed");
        }
    }
}

// ============================================================================
// WEBHOOK
// ============================================================================

pub struct WebhookAlertClient {
    http_client: reqwest::Client,
    url: String,
}

impl WebhookAlertClient {
    pub fn new(url: String, timeout: Duration) -> Result<Self, AlertError> {
        // Controllers on the farm LAN commonly serve self-signed certificates.
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self { http_client, url })
    }
}

#[async_trait]
impl AlertClient for WebhookAlertClient {
    fn kind(&self) -> &'static str {
        "webhook"
    }

    async fn connect(&mut self) -> Result<(), AlertError> {
        info!("✅ Webhook alerts configured ({})", self.url);
        Ok(())
    }

    async fn send_signal(&mut self, signal: &str) -> Result<(), AlertError> {
        // The signal name is not part of the request; the URL selects the action.
        debug!("Webhook signal '{}' -> {}", signal, self.url);
        let response = self.http_client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::HttpStatus(status));
        }
        info!("💡 Webhook signal sent ({})", status);
        Ok(())
    }

    async fn close(&mut self) {}
}

// ============================================================================
// NONE
// ============================================================================

pub struct NoopAlertClient;

#[async_trait]
impl AlertClient for NoopAlertClient {
    fn kind(&self) -> &'static str {
        "none"
    }

    async fn connect(&mut self) -> Result<(), AlertError> {
        Ok(())
    }

    async fn send_signal(&mut self, signal: &str) -> Result<(), AlertError> {
        debug!("Alerts disabled, dropping '{}'", signal);
        Ok(())
    }

    async fn close(&mut self) {}
}

pub fn build_alert_client(
    transport: &WarningTransport,
    timeout: Duration,
) -> Result<Box<dyn AlertClient>, AlertError> {
    let client: Box<dyn AlertClient> = match transport {
        WarningTransport::None => Box::new(NoopAlertClient),
        WarningTransport::Socket { host, port } => Box::new(SocketAlertClient::new(host, *port)),
        WarningTransport::Webhook { url } => Box::new(WebhookAlertClient::new(url.clone(), timeout)?),
    };
    Ok(client)
}

/// Initial connection at start-up. A failure is not fatal; sends reconnect.
pub async fn connect_or_warn(client: &mut dyn AlertClient) {
    if let Err(e) = client.connect().await {
        warn!("⚠️  Alert transport '{}' not connected yet: {}", client.kind(), e);
    }
}
