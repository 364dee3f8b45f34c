//! Client for the companion element protocol
//!
//! One JSON request per `\n`-terminated line, answered by one JSON response
//! line carrying the same `id`. Every connect and round-trip is bounded by a
//! timeout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::traits::CompanionClient;
use crate::error::{Error, Result};
use crate::parser::types::CompanionRequest;

/// Longest accepted response line
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Serialize)]
struct RequestEnvelope<'a> {
    id: u64,
    #[serde(flatten)]
    request: &'a CompanionRequest,
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

pub struct TcpCompanionClient {
    addr: String,
    timeout: Duration,
    next_id: AtomicU64,
    conn: Mutex<Option<BufReader<TcpStream>>>,
}

impl TcpCompanionClient {
    pub fn new(addr: &str, timeout: Duration) -> Self {
        Self {
            addr: addr.to_string(),
            timeout,
            next_id: AtomicU64::new(1),
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    async fn connect(&self) -> Result<BufReader<TcpStream>> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| Error::timeout(format!("Companion connect to {}", self.addr), self.timeout_ms()))?
            .map_err(|e| Error::Companion(format!("Cannot connect to {}: {}", self.addr, e)))?;
        stream.set_nodelay(true).ok();
        Ok(BufReader::new(stream))
    }

    async fn round_trip(
        conn: &mut BufReader<TcpStream>,
        line: &str,
        id: u64,
    ) -> Result<ResponseEnvelope> {
        conn.get_mut().write_all(line.as_bytes()).await?;
        conn.get_mut().write_all(b"\n").await?;
        conn.get_mut().flush().await?;

        loop {
            // Never buffer more than one byte past the limit
            let mut buf = Vec::new();
            let read = (&mut *conn)
                .take(MAX_LINE_BYTES as u64 + 1)
                .read_until(b'\n', &mut buf)
                .await?;
            if read == 0 {
                return Err(Error::Companion("Connection closed by companion".to_string()));
            }
            if buf.len() > MAX_LINE_BYTES {
                return Err(Error::Companion(format!(
                    "Response exceeds {} bytes",
                    MAX_LINE_BYTES
                )));
            }
            let text = std::str::from_utf8(&buf)
                .map_err(|e| Error::Companion(format!("Response is not UTF-8: {}", e)))?;
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            let response: ResponseEnvelope = serde_json::from_str(trimmed)
                .map_err(|e| Error::Companion(format!("Malformed response: {}", e)))?;
            // Late answers to timed-out requests are discarded
            if response.id == id {
                return Ok(response);
            }
            log::debug!("Discarding companion response {} (waiting for {})", response.id, id);
        }
    }
}

#[async_trait]
impl CompanionClient for TcpCompanionClient {
    async fn request(&self, request: CompanionRequest) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = serde_json::to_string(&RequestEnvelope {
            id,
            request: &request,
        })?;

        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(Error::Companion("No connection".to_string()));
        };

        let outcome = tokio::time::timeout(self.timeout, Self::round_trip(conn, &line, id)).await;
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                *guard = None;
                return Err(e);
            }
            Err(_) => {
                *guard = None;
                return Err(Error::timeout(
                    format!("Companion {}", request.name()),
                    self.timeout_ms(),
                ));
            }
        };

        if response.ok {
            Ok(response.result)
        } else {
            Err(Error::Companion(response.error.unwrap_or_else(|| {
                format!("{} rejected by companion", request.name())
            })))
        }
    }
}
