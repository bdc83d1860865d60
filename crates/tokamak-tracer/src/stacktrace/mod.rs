//! Source-level stack traces for failed transactions.
//!
//! Walks a normalized execution trace while keeping a stack of the contracts in
//! the active call frames. Once a REVERT or an invalid opcode is seen, every
//! following step is mapped through its contract's source map into a
//! [`StackFrame`].

mod artifacts;
mod contract;
mod source_map;

pub use artifacts::{ArtifactContracts, load_artifacts};
pub use contract::{ContractDetails, ContractSource, ContractStack, MemoryContracts};
pub use source_map::{InstructionMapping, SourceMap, parse as parse_source_map, parse_instructions};

use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::StackTraceError;
use crate::opcodes;
use crate::schema::TraceStep;

/// One source location of a failed execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    #[serde(rename = "contract")]
    pub contract_address: String,
    #[serde(rename = "name")]
    pub contract_name: String,
    pub line: usize,
    pub code: String,
    pub op: String,
    pub start: usize,
    pub length: usize,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\n\tat {}\n\t\tin {}:{}\n", self.code, self.contract_name, self.line)
    }
}

/// A mapped step, logged while walking the trace.
#[derive(Debug, Clone)]
struct Frame<'a> {
    file: &'a str,
    line: usize,
    jump: &'a str,
    text: &'a str,
    op: &'static str,
}

impl fmt::Display for Frame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "at {}:{:03} {} {} // {}",
            self.file, self.line, self.jump, self.text, self.op
        )
    }
}

/// Callee of a CALL: the address word second from the top of the stack.
fn call_target(stack: &[String]) -> Option<String> {
    let word = stack.len().checked_sub(2).and_then(|i| stack.get(i))?;
    let start = word.len().checked_sub(40)?;
    word.get(start..).map(|address| format!("0x{}", address.to_lowercase()))
}

/// Map `steps` of a transaction sent to `root` onto source frames, in trace order.
pub async fn generate_stack_trace(
    contracts: &dyn ContractSource,
    root: &str,
    steps: &[TraceStep],
) -> Result<Vec<StackFrame>, StackTraceError> {
    let root_contract = contracts
        .get(&root.to_lowercase())
        .await
        .ok_or_else(|| StackTraceError::ContractNotFound(root.to_string()))?;
    let mut stack = ContractStack::new(root_contract);

    let mut frames = Vec::new();
    let mut recording = false;

    for step in steps {
        let contract = stack.current().clone();
        let mut op = contract.opcode_at(step.pc);

        if step.terminating && !opcodes::is_terminator(op) {
            debug!(op = opcodes::name(op), pc = step.pc, "frame ended without terminator, treating as INVALID");
            op = opcodes::INVALID;
        }

        match op {
            opcodes::CALL => match step.stack.as_deref() {
                None => {
                    warn!(contract = %contract.address, pc = step.pc, "missing stack on CALL");
                    stack.push(contract.clone());
                }
                Some(words) => {
                    let Some(callee) = call_target(words) else {
                        return Err(StackTraceError::ContractNotFound(format!(
                            "callee of {} at pc {}",
                            contract.address, step.pc
                        )));
                    };
                    let callee_contract = contracts
                        .get(&callee)
                        .await
                        .ok_or(StackTraceError::ContractNotFound(callee))?;
                    stack.push(callee_contract);
                }
            },
            opcodes::RETURN | opcodes::INVALID | opcodes::REVERT | opcodes::STOP => stack.pop(),
            _ => {}
        }

        if op == opcodes::REVERT || op == opcodes::INVALID {
            recording = true;
        }

        let Some(mapping) = usize::try_from(step.pc)
            .ok()
            .and_then(|pc| contract.source_map.get(pc))
        else {
            warn!(contract = %contract.address, pc = step.pc, "missing source mapping");
            continue;
        };
        if mapping.is_internal() {
            continue;
        }

        let code = mapping.snippet(&contract.source);
        let frame = Frame {
            file: &contract.name,
            line: mapping.line,
            jump: &mapping.jump,
            text: code.lines().next().unwrap_or_default(),
            op: opcodes::name(op),
        };
        debug!(pc = step.pc, "{frame}");

        if recording {
            frames.push(StackFrame {
                contract_address: contract.address.clone(),
                contract_name: contract.name.clone(),
                line: mapping.line,
                code: code.to_string(),
                op: opcodes::name(op).to_string(),
                start: mapping.start,
                length: mapping.length,
            });
        }
    }

    Ok(frames)
}

/// Human readable trace: the failing opcode followed by every frame.
pub fn trace_text(frames: &[StackFrame]) -> Option<String> {
    let first = frames.first()?;
    let mut text = format!("Error: {}, execution stopped", first.op);
    for frame in frames {
        text.push_str(&frame.to_string());
    }
    Some(text)
}
