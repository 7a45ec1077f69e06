use serde_json::{json, Value};
use tether_dap::mock::{ContinueBehavior, MockAdapterConfig};
use tether_debug::{dispatch, ToolCall};

use crate::harness::{stopped_at_entry, PROGRAM};

fn call(name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        id: Some(json!(name)),
        name: name.to_string(),
        arguments,
    }
}

#[tokio::test]
async fn tools_drive_a_live_session() {
    let (_mock, controller) = stopped_at_entry(MockAdapterConfig::default()).await;

    let response = dispatch(
        &controller,
        call("set_breakpoint", json!({"path": PROGRAM, "line": 5})),
    )
    .await;
    assert!(response.ok, "{response:?}");
    assert_eq!(response.result.unwrap()["breakpoint"]["verified"], true);

    let response = dispatch(&controller, call("continue", Value::Null)).await;
    let result = response.result.expect("continue result");
    assert_eq!(result["outcome"], "stopped");
    assert_eq!(result["reason"], "breakpoint");
    assert_eq!(result["frame"]["line"], 5);

    let response = dispatch(
        &controller,
        call("get_variables", json!({"scope": "locals"})),
    )
    .await;
    let result = response.result.expect("variables result");
    assert_eq!(result["scopes"][0]["variables"][0]["name"], "x");

    let response = dispatch(&controller, call("evaluate", json!({"expression": "missing"}))).await;
    assert!(!response.ok);
    assert_eq!(response.id, Some(json!("evaluate")));
    let error = serde_json::to_value(response.error.unwrap()).unwrap();
    assert_eq!(error["kind"], "AdapterRejected");

    let response = dispatch(&controller, call("quit", Value::Null)).await;
    assert!(response.ok);
    assert!(!controller.has_session());
}

#[tokio::test]
async fn timeout_ms_bounds_a_blocking_tool() {
    let (_mock, controller) = stopped_at_entry(MockAdapterConfig {
        continue_behavior: ContinueBehavior::Hang,
        ..Default::default()
    })
    .await;

    let response = dispatch(&controller, call("continue", json!({"timeout_ms": 100}))).await;
    assert!(!response.ok);
    let error = serde_json::to_value(response.error.unwrap()).unwrap();
    assert_eq!(error["kind"], "Timeout");

    let response = dispatch(&controller, call("pause", json!({"timeout_ms": 1000}))).await;
    assert!(response.ok, "{response:?}");
    assert_eq!(response.result.unwrap()["reason"], "pause");
}
