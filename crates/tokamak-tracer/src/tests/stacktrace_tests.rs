use serde_json::json;

use super::helpers::{MockTransport, first_param, mock_client, rpc_error};
use crate::error::StackTraceError;
use crate::schema::TraceStep;
use crate::schema::pad_word;
use crate::stacktrace::{
    ArtifactContracts, ContractDetails, MemoryContracts, StackFrame, generate_stack_trace, trace_text,
};

const CALLER: &str = "0x00000000000000000000000000000000000000aa";
const CALLEE: &str = "0x00000000000000000000000000000000000000bb";

/// PUSH1 0, PUSH1 0, CALL, PUSH1 0, PUSH1 0, REVERT
const CALLER_CODE: &str = "0x60006000f160006000fd";
const CALLER_SOURCE: &str = "contract A {\n  function f() {\n    b.g();\n    revert();\n  }\n}";

/// PUSH1 0, PUSH1 0, REVERT
const CALLEE_CODE: &str = "0x60006000fd";
const CALLEE_SOURCE: &str = "contract B {\n  function g() {\n    revert();\n  }\n}";

fn contracts() -> MemoryContracts {
    let call = CALLER_SOURCE.find("b.g()").unwrap();
    let revert = CALLER_SOURCE.find("revert()").unwrap();
    let caller_map = format!("0:{}:0:-;;{call}:5:0:i;;;{revert}:8:0:-", CALLER_SOURCE.len());

    let callee_revert = CALLEE_SOURCE.find("revert()").unwrap();
    let callee_map = format!("0:{}:0:-;;{callee_revert}:8:0:-", CALLEE_SOURCE.len());

    let mut contracts = MemoryContracts::new();
    contracts.insert(
        ContractDetails::from_sources("A", CALLER, CALLER_CODE, &caller_map, CALLER_SOURCE)
            .unwrap(),
    );
    contracts.insert(
        ContractDetails::from_sources("B", CALLEE, CALLEE_CODE, &callee_map, CALLEE_SOURCE)
            .unwrap(),
    );
    contracts
}

fn step(pc: u64, op: &str, depth: u64) -> TraceStep {
    TraceStep {
        pc,
        op: op.to_string(),
        depth,
        stack: Some(Vec::new()),
        ..Default::default()
    }
}

fn call_step(pc: u64, callee: &str) -> TraceStep {
    TraceStep {
        stack: Some(vec![pad_word(callee), pad_word("0xffff")]),
        ..step(pc, "CALL", 1)
    }
}

fn nested_revert_trace() -> Vec<TraceStep> {
    vec![
        step(0, "PUSH1", 1),
        step(2, "PUSH1", 1),
        call_step(4, CALLEE),
        step(0, "PUSH1", 2),
        step(2, "PUSH1", 2),
        TraceStep {
            terminating: true,
            ..step(4, "REVERT", 2)
        },
        step(5, "PUSH1", 1),
        step(7, "PUSH1", 1),
        TraceStep {
            terminating: true,
            ..step(9, "REVERT", 1)
        },
    ]
}

fn summary(frames: &[StackFrame]) -> Vec<(&str, usize, &str, &str)> {
    frames
        .iter()
        .map(|frame| {
            (
                frame.contract_name.as_str(),
                frame.line,
                frame.code.as_str(),
                frame.op.as_str(),
            )
        })
        .collect()
}

fn reverting(pc: u64, depth: u64) -> TraceStep {
    TraceStep {
        terminating: true,
        ..step(pc, "REVERT", depth)
    }
}

#[tokio::test]
async fn frames_follow_the_call_stack() {
    let frames = generate_stack_trace(&contracts(), CALLER, &nested_revert_trace())
        .await
        .unwrap();

    assert_eq!(
        summary(&frames),
        vec![
            ("B", 3, "revert()", "REVERT"),
            ("A", 3, "b.g()", "PUSH1"),
            ("A", 3, "b.g()", "PUSH1"),
            ("A", 4, "revert()", "REVERT"),
        ]
    );
    assert_eq!(frames[0].contract_address, CALLEE);
    assert_eq!(frames[3].contract_address, CALLER);

    let text = trace_text(&frames).unwrap();
    assert!(text.starts_with("Error: REVERT, execution stopped\n\tat revert()\n\t\tin B:3\n"));
}

#[tokio::test]
async fn nothing_is_recorded_before_a_failure() {
    let trace = vec![
        step(0, "PUSH1", 1),
        step(2, "PUSH1", 1),
        TraceStep {
            terminating: true,
            ..step(4, "REVERT", 1)
        },
    ];
    let contracts = contracts();

    let frames = generate_stack_trace(&contracts, CALLEE, &trace[..2]).await.unwrap();
    assert!(frames.is_empty());
    assert!(trace_text(&frames).is_none());

    let frames = generate_stack_trace(&contracts, CALLEE, &trace).await.unwrap();
    assert_eq!(frames.len(), 1);
}

#[tokio::test]
async fn frame_ending_without_terminator_reads_as_invalid() {
    let trace = vec![
        step(0, "PUSH1", 1),
        TraceStep {
            error: Some("out of gas".to_string()),
            terminating: true,
            ..step(2, "PUSH1", 1)
        },
    ];

    let frames = generate_stack_trace(&contracts(), CALLEE, &trace).await.unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].op, "INVALID");
}

#[tokio::test]
async fn unknown_contracts_are_errors() {
    let err = generate_stack_trace(&contracts(), "0x00000000000000000000000000000000000000cc", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, StackTraceError::ContractNotFound(_)));

    let trace = vec![call_step(4, "0xcc")];
    let err = generate_stack_trace(&contracts(), CALLER, &trace).await.unwrap_err();
    assert!(matches!(err, StackTraceError::ContractNotFound(address) if address.ends_with("cc")));
}

#[tokio::test]
async fn call_to_account_without_code_continues_in_the_caller() {
    const EOA: &str = "0x00000000000000000000000000000000000000ee";
    let transport = MockTransport::new(|method, params| match method {
        "eth_getCode" if first_param(params) == EOA => Ok(json!("0x")),
        _ => Err(rpc_error(-32601, "method not found")),
    });
    let contracts = ArtifactContracts::new(contracts(), mock_client(transport));

    // The value transfer to the EOA runs no code, so the next step is back in A.
    let trace = vec![
        step(0, "PUSH1", 1),
        step(2, "PUSH1", 1),
        call_step(4, EOA),
        step(5, "PUSH1", 1),
        step(7, "PUSH1", 1),
        reverting(9, 1),
    ];
    let frames = generate_stack_trace(&contracts, CALLER, &trace).await.unwrap();

    assert_eq!(summary(&frames), vec![("A", 4, "revert()", "REVERT")]);
    assert_eq!(frames[0].contract_address, CALLER);
}

#[tokio::test]
async fn returning_calls_leave_the_stack_balanced() {
    const ROOT: &str = "0x00000000000000000000000000000000000000a0";
    const HELPER: &str = "0x00000000000000000000000000000000000000a1";
    // Three times PUSH1 0, PUSH1 0, CALL; then PUSH1 0, PUSH1 0, REVERT.
    const ROOT_CODE: &str = "0x60006000f160006000f160006000f160006000fd";
    const ROOT_SOURCE: &str = "contract R {\n  function f() {\n    h.a(); h.b(); h.c();\n    revert();\n  }\n}";
    // PUSH1 0, PUSH1 0, RETURN
    const HELPER_CODE: &str = "0x60006000f3";
    const HELPER_SOURCE: &str = "contract H {\n  function a() {\n    return;\n  }\n}";

    let revert = ROOT_SOURCE.find("revert()").unwrap();
    let root_map = format!("0:{}:0:-{};{revert}:8:0:-", ROOT_SOURCE.len(), ";".repeat(10));
    let ret = HELPER_SOURCE.find("return").unwrap();
    let helper_map = format!("0:{}:0:-;;{ret}:6:0:o", HELPER_SOURCE.len());

    let mut contracts = MemoryContracts::new();
    contracts.insert(ContractDetails::from_sources("R", ROOT, ROOT_CODE, &root_map, ROOT_SOURCE).unwrap());
    contracts.insert(
        ContractDetails::from_sources("H", HELPER, HELPER_CODE, &helper_map, HELPER_SOURCE).unwrap(),
    );

    let mut trace = Vec::new();
    for call in 0..3 {
        let base = call * 5;
        trace.push(step(base, "PUSH1", 1));
        trace.push(step(base + 2, "PUSH1", 1));
        trace.push(TraceStep {
            stack: Some(vec![pad_word(HELPER), pad_word("0xffff")]),
            ..step(base + 4, "CALL", 1)
        });
        trace.push(step(0, "PUSH1", 2));
        trace.push(step(2, "PUSH1", 2));
        trace.push(TraceStep {
            terminating: true,
            ..step(4, "RETURN", 2)
        });
    }
    trace.push(step(15, "PUSH1", 1));
    trace.push(step(17, "PUSH1", 1));
    trace.push(reverting(19, 1));

    let frames = generate_stack_trace(&contracts, ROOT, &trace).await.unwrap();
    assert_eq!(summary(&frames), vec![("R", 4, "revert()", "REVERT")]);
    assert_eq!(frames[0].contract_address, ROOT);
}

#[tokio::test]
async fn call_without_stack_keeps_the_caller_for_its_frame() {
    let trace = vec![
        step(0, "PUSH1", 1),
        step(2, "PUSH1", 1),
        TraceStep {
            stack: None,
            ..step(4, "CALL", 1)
        },
        step(0, "PUSH1", 2),
        step(2, "PUSH1", 2),
        reverting(9, 2),
        step(5, "PUSH1", 1),
        step(7, "PUSH1", 1),
        reverting(9, 1),
    ];

    let frames = generate_stack_trace(&contracts(), CALLER, &trace).await.unwrap();
    assert_eq!(
        summary(&frames),
        vec![
            ("A", 4, "revert()", "REVERT"),
            ("A", 3, "b.g()", "PUSH1"),
            ("A", 3, "b.g()", "PUSH1"),
            ("A", 4, "revert()", "REVERT"),
        ]
    );
    assert!(frames.iter().all(|frame| frame.contract_address == CALLER));
}

#[tokio::test]
async fn callee_running_out_of_gas_leaves_its_frame() {
    let trace = vec![
        step(0, "PUSH1", 1),
        step(2, "PUSH1", 1),
        call_step(4, CALLEE),
        step(0, "PUSH1", 2),
        TraceStep {
            error: Some("out of gas".to_string()),
            terminating: true,
            ..step(2, "PUSH1", 2)
        },
        step(5, "PUSH1", 1),
        step(7, "PUSH1", 1),
        reverting(9, 1),
    ];

    let frames = generate_stack_trace(&contracts(), CALLER, &trace).await.unwrap();
    let path: Vec<(&str, &str)> = frames
        .iter()
        .map(|frame| (frame.contract_name.as_str(), frame.op.as_str()))
        .collect();
    assert_eq!(
        path,
        vec![("B", "INVALID"), ("A", "PUSH1"), ("A", "PUSH1"), ("A", "REVERT")]
    );
}
