//! Persistent duplex transport: newline-delimited JSON over a Unix socket or TCP.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::Mutex;

use super::Transport;
use crate::error::RpcError;
use crate::types::RpcRequest;

type Reader = Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

pub struct SocketTransport {
    reader: Mutex<Reader>,
    writer: Mutex<Option<Writer>>,
}

impl SocketTransport {
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let read_half: Box<dyn AsyncRead + Send + Unpin> = Box::new(read_half);
        Self {
            reader: Mutex::new(BufReader::new(read_half).lines()),
            writer: Mutex::new(Some(Box::new(write_half))),
        }
    }

    #[cfg(unix)]
    pub async fn connect_ipc(path: &str) -> Result<Self, RpcError> {
        let stream = tokio::net::UnixStream::connect(path)
            .await
            .map_err(|e| RpcError::ConnectionFailed {
                url: format!("ipc://{path}"),
                cause: e.to_string(),
            })?;
        Ok(Self::new(stream))
    }

    #[cfg(not(unix))]
    pub async fn connect_ipc(path: &str) -> Result<Self, RpcError> {
        Err(RpcError::UnrecognizedProtocol {
            url: format!("ipc://{path}"),
        })
    }

    pub async fn connect_tcp(addr: &str) -> Result<Self, RpcError> {
        let stream = tokio::net::TcpStream::connect(addr)
            .await
            .map_err(|e| RpcError::ConnectionFailed {
                url: format!("tcp://{addr}"),
                cause: e.to_string(),
            })?;
        Ok(Self::new(stream))
    }
}

#[async_trait]
impl Transport for SocketTransport {
    async fn write(&self, request: &RpcRequest) -> Result<(), RpcError> {
        let mut frame = serde_json::to_vec(request)
            .map_err(|e| RpcError::WriteFailed(e.to_string()))?;
        frame.push(b'\n');

        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(RpcError::Closed)?;
        writer
            .write_all(&frame)
            .await
            .map_err(|e| RpcError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| RpcError::WriteFailed(e.to_string()))
    }

    async fn read(&self) -> Result<Option<String>, RpcError> {
        let mut reader = self.reader.lock().await;
        loop {
            match reader.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(line) => return Ok(line),
                Err(e) => {
                    return Err(RpcError::ConnectionFailed {
                        url: "socket".to_string(),
                        cause: e.to_string(),
                    });
                }
            }
        }
    }

    async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}
