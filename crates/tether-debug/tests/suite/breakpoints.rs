use serde_json::json;
use tether_dap::mock::{MockAdapter, MockAdapterConfig};
use tether_debug::{
    BreakpointAttributes, ErrorKind, ExecutionOutcome, Location, RemoveOutcome, SetOutcome,
};

use crate::harness::{
    controller_for, launch_config, stopped_at_entry, wait_until_stopped, PROGRAM,
};

fn sent_lines(mock: &MockAdapter) -> Vec<i64> {
    let requests = mock.requests_for("setBreakpoints");
    let last = requests.last().expect("a setBreakpoints request");
    last.arguments["breakpoints"]
        .as_array()
        .expect("breakpoints array")
        .iter()
        .map(|bp| bp["line"].as_i64().expect("line"))
        .collect()
}

#[tokio::test]
async fn breakpoints_set_before_launch_are_pushed_and_verified() {
    let mock = MockAdapter::spawn().await.unwrap();
    let controller = controller_for(&mock);

    let report = controller
        .set_breakpoint(&Location::new(PROGRAM, 5), BreakpointAttributes::default())
        .await
        .unwrap();
    assert_eq!(report.outcome, SetOutcome::Created);
    assert!(!report.breakpoint.verified);
    assert!(mock.requests_for("setBreakpoints").is_empty());

    let launched = controller.launch(launch_config(false)).await.unwrap();
    assert_eq!(launched.breakpoint_files, 1);
    assert_eq!(sent_lines(&mock), vec![5]);

    wait_until_stopped(&controller).await;
    let stack = controller.stack_trace().unwrap();
    assert_eq!(stack.reason.as_deref(), Some("breakpoint"));
    assert_eq!(stack.frames[0].line, 5);

    let listed = controller.list_active_breakpoints().await;
    assert_eq!(listed.len(), 1);
    assert!(listed[0].verified);
    assert!(listed[0].adapter_id.is_some());
}

#[tokio::test]
async fn disabled_breakpoints_are_withheld_from_the_adapter() {
    let (mock, controller) = stopped_at_entry(MockAdapterConfig::default()).await;

    for line in [5, 8] {
        controller
            .set_breakpoint(&Location::new(PROGRAM, line), BreakpointAttributes::default())
            .await
            .unwrap();
    }
    assert_eq!(sent_lines(&mock), vec![5, 8]);

    let disabled = controller
        .disable_breakpoint(&Location::new(PROGRAM, 5))
        .await
        .unwrap();
    assert!(!disabled.enabled);
    assert_eq!(sent_lines(&mock), vec![8]);

    let listed = controller.list_active_breakpoints().await;
    assert_eq!(listed.len(), 2, "disabled breakpoints stay in the registry");

    controller
        .enable_breakpoint(&Location::new(PROGRAM, 5))
        .await
        .unwrap();
    assert_eq!(sent_lines(&mock), vec![5, 8]);
}

#[tokio::test]
async fn attributes_are_transmitted_with_the_breakpoint() {
    let (mock, controller) = stopped_at_entry(MockAdapterConfig::default()).await;

    controller
        .set_breakpoint(
            &Location::new(PROGRAM, 4),
            BreakpointAttributes {
                condition: Some("x > 5".to_string()),
                ignore_count: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    controller
        .set_breakpoint(
            &Location::new(PROGRAM, 9),
            BreakpointAttributes {
                log_message: Some("x is {x}".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let last = mock.requests_for("setBreakpoints").pop().unwrap();
    assert_eq!(
        last.arguments["breakpoints"],
        json!([
            { "line": 4, "condition": "x > 5", "hitCondition": ">3" },
            { "line": 9, "logMessage": "x is {x}" },
        ])
    );

    controller
        .set_hit_condition(&Location::new(PROGRAM, 4), Some("%2".to_string()))
        .await
        .unwrap();
    let last = mock.requests_for("setBreakpoints").pop().unwrap();
    assert_eq!(last.arguments["breakpoints"][0]["hitCondition"], "%2");

    controller
        .set_condition(&Location::new(PROGRAM, 4), Some("  ".to_string()))
        .await
        .unwrap();
    let last = mock.requests_for("setBreakpoints").pop().unwrap();
    assert!(last.arguments["breakpoints"][0].get("condition").is_none());
}

#[tokio::test]
async fn temporary_breakpoint_is_removed_once_hit() {
    let (mock, controller) = stopped_at_entry(MockAdapterConfig::default()).await;

    controller
        .set_temporary_breakpoint(&Location::new(PROGRAM, 6), BreakpointAttributes::default())
        .await
        .unwrap();
    assert_eq!(sent_lines(&mock), vec![6]);

    let outcome = controller.r#continue().await.unwrap();
    let ExecutionOutcome::Stopped(stop) = outcome else {
        panic!("expected a stop, got {outcome:?}");
    };
    assert_eq!(stop.reason, "breakpoint");
    assert_eq!(stop.frame.as_ref().map(|frame| frame.line), Some(6));

    assert!(controller.list_active_breakpoints().await.is_empty());
    assert!(sent_lines(&mock).is_empty());
}

#[tokio::test]
async fn stepping_onto_a_temporary_breakpoint_keeps_it() {
    let (mock, controller) = stopped_at_entry(MockAdapterConfig::default()).await;

    controller
        .set_temporary_breakpoint(&Location::new(PROGRAM, 2), BreakpointAttributes::default())
        .await
        .unwrap();

    let outcome = controller.next().await.unwrap();
    let ExecutionOutcome::Stopped(stop) = outcome else {
        panic!("expected a stop, got {outcome:?}");
    };
    assert_eq!(stop.reason, "step");
    assert_eq!(stop.frame.as_ref().map(|frame| frame.line), Some(2));

    let active = controller.list_active_breakpoints().await;
    assert_eq!(active.len(), 1);
    assert!(active[0].temporary);
    assert_eq!(sent_lines(&mock), vec![2]);
}

#[tokio::test]
async fn removing_and_clearing() {
    let (mock, controller) = stopped_at_entry(MockAdapterConfig::default()).await;
    for line in [3, 7, 11] {
        controller
            .set_breakpoint(&Location::new(PROGRAM, line), BreakpointAttributes::default())
            .await
            .unwrap();
    }

    let removed = controller
        .remove_breakpoint(&Location::new(PROGRAM, 7))
        .await
        .unwrap();
    assert!(matches!(removed, RemoveOutcome::Removed { .. }));
    assert_eq!(sent_lines(&mock), vec![3, 11]);

    let missing = controller
        .remove_breakpoint(&Location::new(PROGRAM, 7))
        .await
        .unwrap();
    assert!(matches!(missing, RemoveOutcome::NotFound { line: 7, .. }));

    let err = controller
        .enable_breakpoint(&Location::new(PROGRAM, 7))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    assert_eq!(controller.clear_breakpoints(None).await.unwrap(), 2);
    assert!(sent_lines(&mock).is_empty());
}

#[tokio::test]
async fn adapter_rejection_surfaces_and_keeps_the_registry() {
    let (_mock, controller) = stopped_at_entry(MockAdapterConfig {
        reject_set_breakpoints: true,
        ..Default::default()
    })
    .await;

    let err = controller
        .set_breakpoint(&Location::new(PROGRAM, 5), BreakpointAttributes::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AdapterRejected);

    let listed = controller.list_active_breakpoints().await;
    assert_eq!(listed.len(), 1);
    assert!(!listed[0].verified);
}

#[tokio::test]
async fn unverified_breakpoints_report_the_adapter_state() {
    let (_mock, controller) = stopped_at_entry(MockAdapterConfig {
        verify_breakpoints: false,
        ..Default::default()
    })
    .await;

    let report = controller
        .set_breakpoint(&Location::new(PROGRAM, 5), BreakpointAttributes::default())
        .await
        .unwrap();
    assert!(!report.breakpoint.verified);
    assert!(report.breakpoint.adapter_id.is_some());
}
