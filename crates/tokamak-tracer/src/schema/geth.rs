//! Schema A: flat structured logs from `debug_traceTransaction`.

use serde::Deserialize;
use serde_json::Value;

use super::{ExecutionTrace, TraceStep, pad_word};
use crate::error::RpcError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StructLogTrace {
    #[serde(default)]
    gas: u64,
    #[serde(default)]
    failed: bool,
    #[serde(default)]
    return_value: String,
    #[serde(default)]
    struct_logs: Vec<StructLog>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StructLog {
    pc: u64,
    op: String,
    #[serde(default)]
    gas: u64,
    #[serde(default)]
    gas_cost: u64,
    #[serde(default)]
    depth: u64,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    stack: Option<Vec<String>>,
}

pub(super) fn decode_trace(method: &'static str, result: Value) -> Result<ExecutionTrace, RpcError> {
    let raw: StructLogTrace =
        serde_json::from_value(result).map_err(|e| RpcError::parse(method, "structLogs", e))?;

    let mut steps: Vec<TraceStep> = raw
        .struct_logs
        .into_iter()
        .map(|log| TraceStep {
            pc: log.pc,
            op: log.op,
            depth: log.depth,
            gas: log.gas,
            gas_cost: log.gas_cost,
            stack: log
                .stack
                .map(|stack| stack.iter().map(|word| pad_word(word)).collect()),
            error: log.error.and_then(error_text),
            terminating: false,
        })
        .collect();

    // A step is the last of its frame when the next one is shallower.
    for i in 1..steps.len() {
        if steps[i].depth < steps[i - 1].depth {
            steps[i - 1].terminating = true;
        }
    }
    if let Some(last) = steps.last_mut() {
        last.terminating = true;
    }

    Ok(ExecutionTrace {
        gas: raw.gas,
        failed: raw.failed,
        return_value: raw.return_value,
        steps,
    })
}

/// Older nodes report step errors as objects, newer ones as strings.
fn error_text(error: Value) -> Option<String> {
    match error {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
