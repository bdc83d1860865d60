//! Request/response transport over HTTP.
//!
//! Each `write` posts one request and queues the response body; `read` pops the
//! queue. Transient failures (connection errors, timeouts, 429/5xx) are retried with
//! exponential backoff, honoring Retry-After.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::Transport;
use crate::client::RpcConfig;
use crate::error::RpcError;
use crate::types::RpcRequest;

pub struct HttpTransport {
    http: reqwest::Client,
    url: String,
    config: RpcConfig,
    responses_tx: Mutex<Option<mpsc::Sender<String>>>,
    responses_rx: tokio::sync::Mutex<mpsc::Receiver<String>>,
}

impl HttpTransport {
    pub fn new(url: &str, config: &RpcConfig) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(config.call_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| RpcError::ConnectionFailed {
                url: url.to_string(),
                cause: e.to_string(),
            })?;
        let (tx, rx) = mpsc::channel(config.queue_capacity);

        Ok(Self {
            http,
            url: url.to_string(),
            config: config.clone(),
            responses_tx: Mutex::new(Some(tx)),
            responses_rx: tokio::sync::Mutex::new(rx),
        })
    }

    fn sender(&self) -> Result<mpsc::Sender<String>, RpcError> {
        self.responses_tx
            .lock()
            .map_err(|e| RpcError::WriteFailed(format!("lock: {e}")))?
            .clone()
            .ok_or(RpcError::Closed)
    }

    async fn post(&self, request: &RpcRequest) -> Result<String, RpcError> {
        let max_attempts = self.config.max_retries + 1; // 1 initial + N retries
        let mut attempt = 0;

        loop {
            match self.post_once(request).await {
                Ok(body) => return Ok(body),
                Err(err) if !err.is_retryable() || attempt + 1 >= max_attempts => {
                    if attempt > 0 {
                        return Err(RpcError::RetryExhausted {
                            method: request.method.clone(),
                            attempts: attempt + 1,
                            last_error: Box::new(err),
                        });
                    }
                    return Err(err);
                }
                Err(err) => {
                    // Exponential backoff: base * 2^attempt
                    let backoff = err.retry_after_secs().map(Duration::from_secs).unwrap_or_else(
                        || self.config.base_backoff * 2u32.saturating_pow(attempt),
                    );
                    debug!(method = %request.method, attempt, ?backoff, "retrying request: {err}");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Single attempt at a request (no retry).
    async fn post_once(&self, request: &RpcRequest) -> Result<String, RpcError> {
        let response = self
            .http
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RpcError::Timeout {
                        method: request.method.clone(),
                        elapsed_ms: u64::try_from(self.config.call_timeout.as_millis())
                            .unwrap_or(u64::MAX),
                    }
                } else {
                    RpcError::ConnectionFailed {
                        url: self.url.clone(),
                        cause: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            // Extract Retry-After header for 429 responses
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(|v| format!("retry-after:{v}"))
                .unwrap_or_default();

            let body_text = response.text().await.unwrap_or_default();
            let display_body = if retry_after.is_empty() {
                body_text
            } else {
                retry_after
            };

            return Err(RpcError::HttpError {
                method: request.method.clone(),
                status: status.as_u16(),
                body: display_body,
            });
        }

        response
            .text()
            .await
            .map_err(|e| RpcError::parse(&request.method, "response_body", e))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn write(&self, request: &RpcRequest) -> Result<(), RpcError> {
        let sender = self.sender()?;
        let body = self.post(request).await?;
        sender.send(body).await.map_err(|_| RpcError::Closed)
    }

    async fn read(&self) -> Result<Option<String>, RpcError> {
        Ok(self.responses_rx.lock().await.recv().await)
    }

    async fn close(&self) {
        if let Ok(mut tx) = self.responses_tx.lock() {
            tx.take();
        }
    }
}
