//! JSON-RPC proxy that annotates failed transactions with stack traces.
//!
//! Every request is forwarded to the node unchanged. Two kinds of responses are
//! rewritten: a receipt with status `0x0` gets the trace appended to its status
//! and a JSON-RPC error carrying it, and a failed `eth_sendTransaction` or
//! `eth_sendRawTransaction` gets the trace as its error message once the
//! transaction is mined.

mod trace;

pub use trace::{Tracer, wait_for_receipt};

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use ethereum_types::H256;
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::config::ProxyConfig;
use crate::error::TracerError;
use crate::types::{JSONRPC_VERSION, RpcErrorObject, RpcMessage, TransactionReceipt};

/// Error code of a receipt rewritten with its trace.
pub const TRACED_FAILURE_CODE: i64 = -32000;
const PARSE_ERROR_CODE: i64 = -32700;
const INTERNAL_ERROR_CODE: i64 = -32603;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyOptions {
    pub receipt_poll_attempts: u32,
    pub receipt_poll_interval: Duration,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self::from(&ProxyConfig::default())
    }
}

impl From<&ProxyConfig> for ProxyOptions {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            receipt_poll_attempts: config.receipt_poll_attempts,
            receipt_poll_interval: config.receipt_poll_interval(),
        }
    }
}

/// Shared by every request. Only the client inside the tracer is stateful.
#[derive(Clone)]
pub struct ProxyState {
    tracer: Tracer,
    options: ProxyOptions,
}

impl ProxyState {
    pub fn new(tracer: Tracer, options: ProxyOptions) -> Self {
        Self { tracer, options }
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }
}

pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/", post(handle_http_request).get(handle_get))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the proxy on `addr` until Ctrl+C.
pub async fn start_proxy(addr: SocketAddr, state: ProxyState) -> Result<(), TracerError> {
    let listener = TcpListener::bind(addr).await?;
    info!("Starting tracing proxy at {addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to install Ctrl+C handler: {e}");
        std::future::pending::<()>().await;
    }
}

async fn handle_get() -> &'static str {
    "tokamak-tracer proxy"
}

async fn handle_http_request(
    State(state): State<ProxyState>,
    body: String,
) -> Result<Json<Value>, StatusCode> {
    let response = handle_body(&state, &body).await;
    serde_json::to_value(response)
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Response body for `body`: a batch answers with an array in request order, a
/// single message with a single response.
#[derive(Debug, serde::Serialize)]
#[serde(untagged)]
pub enum ProxyResponse {
    Single(RpcMessage),
    Batch(Vec<RpcMessage>),
}

fn is_batch(body: &str) -> bool {
    body.trim_start().starts_with('[')
}

pub async fn handle_body(state: &ProxyState, body: &str) -> ProxyResponse {
    if is_batch(body) {
        let requests: Vec<RpcMessage> = match serde_json::from_str(body) {
            Ok(requests) => requests,
            Err(e) => {
                warn!(error = %e, "invalid batch request");
                return ProxyResponse::Single(error_response(None, PARSE_ERROR_CODE, e.to_string()));
            }
        };
        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            responses.push(handle_message(state, request).await);
        }
        return ProxyResponse::Batch(responses);
    }

    match serde_json::from_str::<RpcMessage>(body) {
        Ok(request) => ProxyResponse::Single(handle_message(state, request).await),
        Err(e) => {
            warn!(error = %e, "invalid request");
            ProxyResponse::Single(error_response(None, PARSE_ERROR_CODE, e.to_string()))
        }
    }
}

fn error_response(id: Option<Value>, code: i64, message: String) -> RpcMessage {
    RpcMessage {
        id,
        jsonrpc: JSONRPC_VERSION.to_string(),
        error: Some(RpcErrorObject {
            code,
            message,
            data: None,
        }),
        ..Default::default()
    }
}

async fn handle_message(state: &ProxyState, request: RpcMessage) -> RpcMessage {
    let caller_id = request.id.clone();
    let mut response = match state.tracer.client().forward(&request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(method = request.method(), error = %e, "forwarding failed");
            return error_response(caller_id, INTERNAL_ERROR_CODE, e.to_string());
        }
    };
    response.id = caller_id;

    match request.method() {
        "eth_getTransactionReceipt" => rewrite_receipt(state, &mut response).await,
        "eth_sendTransaction" | "eth_sendRawTransaction" => {
            rewrite_send_error(state, &mut response).await
        }
        _ => {}
    }
    response
}

async fn rewrite_receipt(state: &ProxyState, response: &mut RpcMessage) {
    if response.error.is_some() {
        return;
    }
    let Some(result) = response.result.as_ref().filter(|result| !result.is_null()) else {
        return;
    };
    let mut receipt: TransactionReceipt = match serde_json::from_value(result.clone()) {
        Ok(receipt) => receipt,
        Err(e) => {
            warn!(error = %e, "unreadable receipt, passing it through");
            return;
        }
    };
    if !receipt.is_failed() {
        return;
    }

    let hash = receipt.transaction_hash;
    let text = match state.tracer.trace(hash).await {
        Ok(Some(text)) => text,
        Ok(None) => {
            debug!(tx = ?hash, "no stack frames for failed transaction");
            return;
        }
        Err(e) => {
            warn!(tx = ?hash, error = %e, "tracing failed transaction");
            return;
        }
    };

    receipt.set_status(&text);
    match serde_json::to_value(&receipt) {
        Ok(rewritten) => {
            response.result = Some(rewritten);
            response.error = Some(RpcErrorObject {
                code: TRACED_FAILURE_CODE,
                message: receipt.status().to_string(),
                data: None,
            });
        }
        Err(e) => warn!(tx = ?hash, error = %e, "failed encoding rewritten receipt"),
    }
}

/// Hash of a transaction the node rejected during execution. Nodes report it as
/// the result, in `error.data.hash`, or as the key of `error.data`.
fn sent_transaction_hash(response: &RpcMessage) -> Option<H256> {
    let parse = |value: &str| value.parse::<H256>().ok();

    if let Some(hash) = response.result.as_ref().and_then(Value::as_str).and_then(parse) {
        return Some(hash);
    }
    match response.error.as_ref()?.data.as_ref()? {
        Value::String(hash) => parse(hash),
        Value::Object(data) => data
            .get("hash")
            .and_then(Value::as_str)
            .and_then(parse)
            .or_else(|| data.keys().find_map(|key| parse(key))),
        _ => None,
    }
}

async fn rewrite_send_error(state: &ProxyState, response: &mut RpcMessage) {
    if response.error.is_none() {
        return;
    }
    let Some(hash) = sent_transaction_hash(response) else {
        debug!("send failed without a transaction hash");
        return;
    };

    let client = state.tracer.client();
    let options = &state.options;
    let Some(receipt) = wait_for_receipt(
        client,
        hash,
        options.receipt_poll_attempts,
        options.receipt_poll_interval,
    )
    .await
    else {
        return;
    };
    if !receipt.is_failed() {
        debug!(tx = ?hash, "sent transaction succeeded, error left as is");
        return;
    }

    match state.tracer.trace(hash).await {
        Ok(Some(text)) => {
            if let Some(error) = response.error.as_mut() {
                error.message = text;
            }
        }
        Ok(None) => debug!(tx = ?hash, "no stack frames for failed transaction"),
        Err(e) => warn!(tx = ?hash, error = %e, "tracing failed transaction"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(value: Value) -> RpcMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn batch_detection_skips_whitespace() {
        assert!(is_batch("  \n[{}]"));
        assert!(!is_batch(" {\"id\": 1}"));
        assert!(!is_batch(""));
    }

    #[test]
    fn hash_from_result_or_error_data() {
        let hash = format!("0x{}", "ab".repeat(32));
        let expected: H256 = hash.parse().unwrap();

        let from_result = message(json!({"jsonrpc": "2.0", "id": 1, "result": hash,
            "error": {"code": -32000, "message": "revert"}}));
        assert_eq!(sent_transaction_hash(&from_result), Some(expected));

        let from_data_hash = message(json!({"jsonrpc": "2.0", "id": 1,
            "error": {"code": -32000, "message": "revert", "data": {"hash": hash}}}));
        assert_eq!(sent_transaction_hash(&from_data_hash), Some(expected));

        let mut data = serde_json::Map::new();
        data.insert(hash.clone(), json!({"error": "revert"}));
        data.insert("name".to_string(), json!("RuntimeError"));
        let from_data_key = message(json!({"jsonrpc": "2.0", "id": 1,
            "error": {"code": -32000, "message": "revert", "data": data}}));
        assert_eq!(sent_transaction_hash(&from_data_key), Some(expected));

        let without = message(json!({"jsonrpc": "2.0", "id": 1,
            "error": {"code": -32000, "message": "nonce too low"}}));
        assert_eq!(sent_transaction_hash(&without), None);
    }
}
