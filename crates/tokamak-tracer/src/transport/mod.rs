//! Duplex connections to a node.
//!
//! A transport only moves frames: `write` sends one request, `read` yields the next
//! raw inbound frame. Correlation lives in [`crate::client::RpcClient`].

mod http;
mod socket;

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

pub use http::HttpTransport;
pub use socket::SocketTransport;

use crate::client::RpcConfig;
use crate::error::RpcError;
use crate::types::RpcRequest;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request. Errors surface to the caller of the pending call.
    async fn write(&self, request: &RpcRequest) -> Result<(), RpcError>;

    /// Next inbound frame, `Ok(None)` at end of stream.
    async fn read(&self) -> Result<Option<String>, RpcError>;

    /// Stop accepting writes and end the inbound stream.
    async fn close(&self);
}

/// Open a transport for `url`.
///
/// `http(s)://` posts each request; `ipc://<path>` and `tcp://<host:port>` keep one
/// newline-delimited socket open for the connection's lifetime.
pub async fn dial(url: &str, config: &RpcConfig) -> Result<Arc<dyn Transport>, RpcError> {
    let parsed = Url::parse(url).map_err(|e| RpcError::ConnectionFailed {
        url: url.to_string(),
        cause: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(Arc::new(HttpTransport::new(url, config)?)),
        "ipc" => {
            let path = format!("{}{}", parsed.host_str().unwrap_or_default(), parsed.path());
            Ok(Arc::new(SocketTransport::connect_ipc(&path).await?))
        }
        "tcp" => {
            let host = parsed.host_str().unwrap_or("127.0.0.1");
            let port = parsed.port().unwrap_or(8546);
            Ok(Arc::new(
                SocketTransport::connect_tcp(&format!("{host}:{port}")).await?,
            ))
        }
        _ => Err(RpcError::UnrecognizedProtocol {
            url: url.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dial_rejects_unknown_scheme() {
        let err = dial("ftp://127.0.0.1:21", &RpcConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RpcError::UnrecognizedProtocol { .. }));
    }

    #[tokio::test]
    async fn dial_rejects_garbage() {
        let err = dial("not a url", &RpcConfig::default()).await.err().unwrap();
        assert!(matches!(err, RpcError::ConnectionFailed { .. }));
    }
}
