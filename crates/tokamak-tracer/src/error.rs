//! Error types for the tracing proxy.

use ethereum_types::H256;

#[derive(Debug, thiserror::Error)]
pub enum TracerError {
    #[error("{0}")]
    Rpc(#[from] RpcError),

    #[error("Replay error: {0}")]
    Replay(#[from] ReplayError),

    #[error("Stack trace error: {0}")]
    StackTrace(#[from] StackTraceError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Structured RPC error types for programmatic handling.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    #[error("Connection to {url} failed: {cause}")]
    ConnectionFailed { url: String, cause: String },

    #[error("unrecognized protocol: {url}")]
    UnrecognizedProtocol { url: String },

    #[error("{method} timed out after {elapsed_ms}ms")]
    Timeout { method: String, elapsed_ms: u64 },

    #[error("{method} HTTP {status}: {body}")]
    HttpError {
        method: String,
        status: u16,
        body: String,
    },

    #[error("request failed: [ {code} ] {message}")]
    JsonRpcError { code: i64, message: String },

    #[error("{method} response parse error in {field}: {cause}")]
    ParseError {
        method: String,
        field: String,
        cause: String,
    },

    #[error("{method} failed after {attempts} attempt(s): {last_error}")]
    RetryExhausted {
        method: String,
        attempts: u32,
        last_error: Box<RpcError>,
    },

    #[error("transport write failed: {0}")]
    WriteFailed(String),

    #[error("connection closed")]
    Closed,

    #[error("subscription {0} already exists")]
    SubscriptionExists(String),

    #[error("subscription {0} does not exist")]
    SubscriptionNotFound(String),
}

impl RpcError {
    /// Whether this error is likely transient and retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::ConnectionFailed { .. } => true,
            RpcError::Timeout { .. } => true,
            RpcError::HttpError { status, .. } => {
                // 429 = rate limited, 502/503/504 = server issues
                matches!(*status, 429 | 502 | 503 | 504)
            }
            _ => false,
        }
    }

    /// For HTTP 429, extract Retry-After header value (if available).
    pub fn retry_after_secs(&self) -> Option<u64> {
        // Retry-After is captured in the body field as a hint
        if let RpcError::HttpError {
            status: 429, body, ..
        } = self
        {
            body.strip_prefix("retry-after:")
                .and_then(|s| s.trim().parse().ok())
        } else {
            None
        }
    }

    pub(crate) fn parse(method: &str, field: &str, cause: impl ToString) -> Self {
        RpcError::ParseError {
            method: method.to_string(),
            field: field.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Errors raised while reconstructing and re-executing a block.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("{0}")]
    Rpc(#[from] RpcError),

    #[error("transaction {0:#x} not found")]
    TransactionNotFound(H256),

    #[error("receipt for transaction {0:#x} not found")]
    ReceiptNotFound(H256),

    #[error("block {0} not found")]
    BlockNotFound(u64),

    #[error("transaction {hash:#x} is not part of block {block_number}")]
    NotInBlock { hash: H256, block_number: u64 },

    #[error(
        "missing block base fee parameter for block {0}, london hard fork is probably not activated"
    )]
    MissingBaseFee(u64),

    #[error("state fetch failed: {0}")]
    State(#[from] StateError),

    #[error("execution of transaction {hash:#x} failed: {cause}")]
    Execution { hash: H256, cause: String },

    #[error(
        "rerun gas mismatch for transaction {hash:#x} (receipt {expected}, replay {actual}). \
         This can happen when the chain config is incorrect, rerun with force to accept it"
    )]
    GasMismatch {
        hash: H256,
        expected: u64,
        actual: u64,
    },

    #[error("clique signer recovery failed: {0}")]
    Author(String),

    #[error("replay task failed: {0}")]
    Join(String),
}

/// First error recorded by the state replica while lazily loading state.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StateError {
    #[error("fetching {field} of {address:#x} failed: {cause}")]
    Fetch {
        address: ethereum_types::Address,
        field: &'static str,
        cause: RpcError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum StackTraceError {
    #[error("contract does not exist: {0}")]
    ContractNotFound(String),

    #[error("invalid source map: {0}")]
    InvalidSourceMap(String),

    #[error("invalid bytecode: {0}")]
    InvalidBytecode(String),

    #[error("failed reading build artifacts: {0}")]
    Artifacts(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed reading config {path}: {cause}")]
    Read { path: String, cause: String },

    #[error("failed parsing config: {0}")]
    Parse(String),

    #[error("{0}")]
    Invalid(String),
}
