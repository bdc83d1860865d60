//! Schema B: nested vmTrace from `trace_replayTransaction`, flattened pre-order.

use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;

use super::{ExecutionTrace, TraceStep, pad_word};
use crate::error::RpcError;
use crate::opcodes;
use crate::serde_utils::hex_bytes;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplayResult {
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    vm_trace: Option<VmTrace>,
}

#[derive(Debug, Deserialize)]
struct VmTrace {
    #[serde(default, with = "hex_bytes")]
    code: Bytes,
    #[serde(default)]
    ops: Vec<VmOp>,
}

#[derive(Debug, Deserialize)]
struct VmOp {
    pc: u64,
    #[serde(default)]
    cost: u64,
    #[serde(default)]
    ex: Option<VmEx>,
    #[serde(default)]
    sub: Option<VmTrace>,
}

#[derive(Debug, Default, Deserialize)]
struct VmEx {
    #[serde(default)]
    push: Vec<String>,
    #[serde(default)]
    used: u64,
}

pub(super) fn decode_trace(method: &'static str, result: Value) -> Result<ExecutionTrace, RpcError> {
    let raw: ReplayResult =
        serde_json::from_value(result).map_err(|e| RpcError::parse(method, "vmTrace", e))?;

    let steps = raw
        .vm_trace
        .map(|trace| walk(&trace, 1))
        .unwrap_or_default();
    let gas = steps.last().map(|step| step.gas).unwrap_or_default();

    Ok(ExecutionTrace {
        gas,
        failed: false,
        return_value: raw.output.unwrap_or_default(),
        steps,
    })
}

fn op_at(code: &[u8], pc: u64) -> String {
    let byte = usize::try_from(pc)
        .ok()
        .and_then(|pc| code.get(pc).copied())
        .unwrap_or(opcodes::STOP);
    opcodes::name(byte).to_string()
}

/// Flatten one call frame and its nested frames.
///
/// The node reports neither mnemonics nor stacks, so both are reconstructed:
/// mnemonics from the frame's code, stacks by carrying the previous step's stack
/// forward. A CALL clears the carried stack; a step followed by EXTCODESIZE takes
/// its pushed values as its stack so the callee address is visible.
fn walk(trace: &VmTrace, depth: u64) -> Vec<TraceStep> {
    let ops = &trace.ops;
    let mut steps = Vec::with_capacity(ops.len());
    let mut carried: Option<Vec<String>> = None;
    let mut prev_op = String::new();

    for (i, op) in ops.iter().enumerate() {
        let name = op_at(&trace.code, op.pc);
        let ex = op.ex.as_ref();

        let mut stack = if i > 0 && prev_op != "CALL" {
            carried.take()
        } else {
            None
        };
        if let Some(next) = ops.get(i + 1) {
            if op_at(&trace.code, next.pc) == "EXTCODESIZE" {
                stack = Some(
                    ex.map(|ex| ex.push.iter().map(|word| pad_word(word)).collect())
                        .unwrap_or_default(),
                );
            }
        }

        steps.push(TraceStep {
            pc: op.pc,
            op: name.clone(),
            depth,
            gas: ex.map(|ex| ex.used).unwrap_or_default(),
            gas_cost: op.cost,
            stack: stack.clone(),
            error: None,
            terminating: false,
        });

        if let Some(sub) = &op.sub {
            let mut nested = walk(sub, depth + 1);
            if let Some(last) = nested.last_mut() {
                last.terminating = true;
            }
            steps.extend(nested);
        }

        carried = stack;
        prev_op = name;
    }

    if let Some(last) = steps.last_mut() {
        last.terminating = true;
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(pc: u64, push: &[&str], sub: Option<Value>) -> Value {
        json!({"pc": pc, "cost": 3, "ex": {"mem": null, "push": push, "used": 100 - pc}, "sub": sub})
    }

    #[test]
    fn nested_trace_is_flattened_pre_order() {
        let callee = json!({
            // PUSH1 0x00, REVERT
            "code": "0x6000fd",
            "ops": [op(0, &["0x0"], None), op(2, &[], None)]
        });
        let result = json!({
            "output": "0x",
            "vmTrace": {
                // PUSH1 0x2a, CALL, STOP
                "code": "0x602af100",
                "ops": [
                    op(0, &["0x2a"], None),
                    op(2, &["0x0"], Some(callee)),
                    op(3, &[], None)
                ]
            }
        });

        let trace = decode_trace("trace_replayTransaction", result).unwrap();
        let ops: Vec<&str> = trace.steps.iter().map(|s| s.op.as_str()).collect();
        assert_eq!(ops, ["PUSH1", "CALL", "PUSH1", "REVERT", "STOP"]);

        let depths: Vec<u64> = trace.steps.iter().map(|s| s.depth).collect();
        assert_eq!(depths, [1, 1, 2, 2, 1]);

        let terminating: Vec<bool> = trace.steps.iter().map(|s| s.terminating).collect();
        assert_eq!(terminating, [false, false, false, true, true]);

        assert_eq!(trace.steps[0].gas, 100);
        assert_eq!(trace.steps[0].gas_cost, 3);
    }

    #[test]
    fn extcodesize_exposes_pushed_address() {
        let result = json!({
            "vmTrace": {
                // PUSH20 <addr>, EXTCODESIZE, POP, CALL, STOP
                "code": format!("0x73{}3b50f100", "11".repeat(20)),
                "ops": [
                    op(0, &[&format!("0x{}", "11".repeat(20))], None),
                    op(21, &["0x1"], None),
                    op(22, &[], None),
                    op(23, &[], None),
                    op(24, &[], None)
                ]
            }
        });

        let trace = decode_trace("trace_replayTransaction", result).unwrap();
        let expected = format!("{}{}", "0".repeat(24), "11".repeat(20));
        assert_eq!(trace.steps[0].stack, Some(vec![expected.clone()]));
        // Carried forward until the CALL clears it.
        assert_eq!(trace.steps[1].stack, Some(vec![expected.clone()]));
        assert_eq!(trace.steps[3].stack, Some(vec![expected]));
        assert_eq!(trace.steps[3].op, "CALL");
        assert_eq!(trace.steps[4].stack, None);
    }

    #[test]
    fn missing_vm_trace_is_empty() {
        let trace = decode_trace("trace_replayTransaction", json!({"output": "0x"})).unwrap();
        assert!(trace.steps.is_empty());
    }

    #[test]
    fn pc_past_code_reads_stop() {
        assert_eq!(op_at(&[0x60], 5), "STOP");
        assert_eq!(op_at(&[0x60], 0), "PUSH1");
    }
}
