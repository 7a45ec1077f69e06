use std::time::Duration;

use tokio::time::Instant;

use tether_dap::mock::{ContinueBehavior, MockAdapter, MockAdapterConfig};
use tether_debug::{
    BreakpointAttributes, DebugController, ErrorKind, ExecutionOutcome, Location, StopSummary,
};

use crate::harness::{
    controller_for, controller_with, launch_config, stopped_at_entry, wait_until,
    wait_until_ended, wait_until_stopped, PROGRAM,
};

fn stopped(outcome: ExecutionOutcome) -> StopSummary {
    match outcome {
        ExecutionOutcome::Stopped(stop) => stop,
        other => panic!("expected a stop, got {other:?}"),
    }
}

async fn breakpoint_at(controller: &DebugController, line: i64) {
    controller
        .set_breakpoint(&Location::new(PROGRAM, line), BreakpointAttributes::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn step_refreshes_the_stack_and_resets_the_cursor() {
    let (_mock, controller) = stopped_at_entry(MockAdapterConfig::default()).await;

    let before = controller.stack_trace().unwrap();
    assert_eq!(before.reason.as_deref(), Some("entry"));
    controller.up().unwrap();
    assert_eq!(controller.stack_trace().unwrap().cursor, 1);

    let stop = stopped(controller.next().await.unwrap());
    assert_eq!(stop.reason, "step");
    assert_eq!(stop.thread_id, Some(1));
    assert_eq!(stop.frame.as_ref().map(|frame| frame.line), Some(2));

    let after = controller.stack_trace().unwrap();
    assert_eq!(after.frames.len(), 3);
    assert_eq!(after.cursor, 0);
    assert_eq!(controller.current_top_frame_id(), Some(after.frames[0].id));
    for frame in &after.frames {
        assert!(
            before.frames.iter().all(|old| old.id != frame.id),
            "frame ids from the previous stop must not survive: {after:?}"
        );
    }
    assert!(after.text.starts_with("-> #0 inner"), "{}", after.text);
}

#[tokio::test]
async fn frame_navigation_stops_at_the_ends() {
    let (_mock, controller) = stopped_at_entry(MockAdapterConfig::default()).await;

    let caller = controller.up().unwrap();
    assert_eq!(caller.name, "caller_1");
    controller.up().unwrap();
    let err = controller.up().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FrameUnavailable);
    assert_eq!(controller.stack_trace().unwrap().cursor, 2);

    controller.down().unwrap();
    let inner = controller.down().unwrap();
    assert_eq!(inner.name, "inner");
    assert_eq!(controller.down().unwrap_err().kind(), ErrorKind::FrameUnavailable);
}

#[tokio::test]
async fn stop_before_the_control_response_is_not_taken_as_the_result() {
    let (_mock, controller) = stopped_at_entry(MockAdapterConfig {
        stale_stop_before_response: true,
        ..Default::default()
    })
    .await;
    breakpoint_at(&controller, 7).await;

    let stop = stopped(controller.r#continue().await.unwrap());
    assert_eq!(stop.reason, "breakpoint");
    assert_eq!(stop.frame.as_ref().map(|frame| frame.line), Some(7));
    assert_eq!(stop.hit_breakpoint_ids.len(), 1);
}

#[tokio::test]
async fn continue_to_program_end_reports_the_exit_code() {
    let (_mock, controller) = stopped_at_entry(MockAdapterConfig {
        exit_code: 3,
        ..Default::default()
    })
    .await;

    let outcome = controller.r#continue().await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::Exited { exit_code: Some(3) });

    wait_until_ended(&controller).await;
    assert_eq!(
        controller.next().await.unwrap_err().kind(),
        ErrorKind::NoActiveSession
    );
}

#[tokio::test]
async fn stepping_past_the_last_line_exits() {
    let (_mock, controller) = stopped_at_entry(MockAdapterConfig {
        program_lines: 2,
        ..Default::default()
    })
    .await;

    stopped(controller.next().await.unwrap());
    let outcome = controller.step_in().await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Exited { .. }), "{outcome:?}");
}

#[tokio::test]
async fn adapter_dropping_the_connection_terminates_the_session() {
    let (_mock, controller) = stopped_at_entry(MockAdapterConfig {
        continue_behavior: ContinueBehavior::Disconnect,
        ..Default::default()
    })
    .await;

    let err = controller.r#continue().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionTerminated);
    wait_until_ended(&controller).await;
    assert!(controller.stack_trace().is_err());
}

#[tokio::test]
async fn a_second_execution_operation_is_busy() {
    let (mock, controller) = stopped_at_entry(MockAdapterConfig {
        stop_delay: Some(Duration::from_millis(300)),
        ..Default::default()
    })
    .await;
    breakpoint_at(&controller, 5).await;

    let running = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.r#continue().await })
    };
    wait_until("continue to be sent", || {
        !mock.requests_for("continue").is_empty()
    })
    .await;

    let err = controller.next().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Busy);
    assert!(mock.requests_for("next").is_empty());

    let stop = stopped(running.await.unwrap().unwrap());
    assert_eq!(stop.frame.map(|frame| frame.line), Some(5));
}

#[tokio::test]
async fn missing_stop_times_out() {
    let mock = MockAdapter::spawn_with_config(MockAdapterConfig {
        stop_on_entry: true,
        continue_behavior: ContinueBehavior::Hang,
        ..Default::default()
    })
    .await
    .unwrap();
    let controller = controller_with(&mock, |config| config.timeouts.stop_ms = 300);
    controller.launch(launch_config(true)).await.unwrap();
    wait_until_stopped(&controller).await;

    let err = controller.r#continue().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(controller.has_session());

    let stop = stopped(controller.pause().await.unwrap());
    assert_eq!(stop.reason, "pause");
}

#[tokio::test]
async fn per_call_timeout_fires_before_the_configured_one() {
    let (mock, controller) = stopped_at_entry(MockAdapterConfig {
        continue_behavior: ContinueBehavior::Hang,
        ..Default::default()
    })
    .await;
    assert_eq!(controller.config().timeouts.stop(), Duration::from_secs(2));

    let started = Instant::now();
    let err = controller
        .with_timeout(Duration::from_millis(100))
        .r#continue()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
    assert_eq!(mock.requests_for("continue").len(), 1);

    let stop = stopped(controller.pause().await.unwrap());
    assert_eq!(stop.reason, "pause");
}

#[tokio::test]
async fn inspection_deadline_covers_the_wait_behind_execution() {
    let (mock, controller) = stopped_at_entry(MockAdapterConfig {
        continue_behavior: ContinueBehavior::Hang,
        ..Default::default()
    })
    .await;

    let running = {
        let controller = controller.with_timeout(Duration::from_millis(600));
        tokio::spawn(async move { controller.r#continue().await })
    };
    wait_until("continue to be sent", || {
        !mock.requests_for("continue").is_empty()
    })
    .await;

    let started = Instant::now();
    let err = controller
        .with_timeout(Duration::from_millis(100))
        .evaluate("x", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(mock.requests_for("evaluate").is_empty());

    let err = running.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn inspection_queues_behind_a_pending_execution_operation() {
    let (mock, controller) = stopped_at_entry(MockAdapterConfig {
        stop_delay: Some(Duration::from_millis(300)),
        ..Default::default()
    })
    .await;
    breakpoint_at(&controller, 5).await;
    let entry_frame = controller.current_top_frame_id().unwrap();

    let running = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.r#continue().await })
    };
    wait_until("continue to be sent", || {
        !mock.requests_for("continue").is_empty()
    })
    .await;

    let inspecting = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.evaluate("x", None, None).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(mock.requests_for("evaluate").is_empty());

    let stop = stopped(running.await.unwrap().unwrap());
    let evaluation = inspecting.await.unwrap().unwrap();
    let new_top = stop.frame.map(|frame| frame.id).unwrap();
    assert_ne!(new_top, entry_frame);
    assert_eq!(evaluation.frame_id, new_top);
    assert_eq!(evaluation.result, "7");

    let commands: Vec<String> = mock
        .requests()
        .into_iter()
        .map(|request| request.command)
        .collect();
    let continued = commands.iter().position(|c| c == "continue").unwrap();
    let refreshed = continued
        + commands[continued..]
            .iter()
            .position(|c| c == "stackTrace")
            .unwrap();
    let evaluated = commands.iter().position(|c| c == "evaluate").unwrap();
    assert!(evaluated > refreshed, "{commands:?}");
}

#[tokio::test]
async fn pause_interrupts_a_running_program() {
    let mock = MockAdapter::spawn_with_config(MockAdapterConfig {
        continue_behavior: ContinueBehavior::Hang,
        ..Default::default()
    })
    .await
    .unwrap();
    let controller = controller_for(&mock);
    controller.launch(launch_config(false)).await.unwrap();
    assert_eq!(controller.current_top_frame_id(), None);

    let stop = stopped(controller.pause().await.unwrap());
    assert_eq!(stop.reason, "pause");
    assert_eq!(mock.requests_for("threads").len(), 1);
    assert!(controller.current_top_frame_id().is_some());
}

#[tokio::test]
async fn run_until_places_and_removes_a_helper_breakpoint() {
    let (mock, controller) = stopped_at_entry(MockAdapterConfig::default()).await;

    let stop = stopped(controller.run_until(9, None).await.unwrap());
    assert_eq!(stop.frame.as_ref().map(|frame| frame.line), Some(9));
    assert!(controller.list_active_breakpoints().await.is_empty());
    let last = mock.requests_for("setBreakpoints").pop().unwrap();
    assert_eq!(last.arguments["breakpoints"], serde_json::json!([]));
}

#[tokio::test]
async fn run_until_keeps_user_breakpoints() {
    let (_mock, controller) = stopped_at_entry(MockAdapterConfig::default()).await;
    breakpoint_at(&controller, 4).await;
    breakpoint_at(&controller, 12).await;

    let stop = stopped(controller.run_until(10, None).await.unwrap());
    assert_eq!(stop.frame.as_ref().map(|frame| frame.line), Some(4));
    let lines: Vec<i64> = controller
        .list_active_breakpoints()
        .await
        .iter()
        .map(|spec| spec.line)
        .collect();
    assert_eq!(lines, vec![4, 12], "helper at 10 is gone, user breakpoints stay");

    let stop = stopped(controller.run_until(12, None).await.unwrap());
    assert_eq!(stop.frame.as_ref().map(|frame| frame.line), Some(12));
    assert_eq!(controller.list_active_breakpoints().await.len(), 2);
}

#[tokio::test]
async fn jump_moves_to_a_valid_target() {
    let (mock, controller) = stopped_at_entry(MockAdapterConfig {
        goto_rejects_lines: vec![15],
        ..Default::default()
    })
    .await;

    let stop = stopped(controller.jump(8, None).await.unwrap());
    assert_eq!(stop.reason, "goto");
    assert_eq!(stop.frame.as_ref().map(|frame| frame.line), Some(8));

    let err = controller.jump(15, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AdapterRejected);
    assert_eq!(mock.requests_for("goto").len(), 1);
    assert_eq!(controller.stack_trace().unwrap().frames[0].line, 8);
}

#[tokio::test]
async fn jump_without_adapter_support_is_rejected_locally() {
    let (mock, controller) = stopped_at_entry(MockAdapterConfig {
        supports_goto: false,
        ..Default::default()
    })
    .await;

    let err = controller.jump(3, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AdapterRejected);
    assert!(mock.requests_for("gotoTargets").is_empty());
}

#[tokio::test]
async fn invalid_lines_are_rejected_before_the_session_check() {
    let mock = MockAdapter::spawn().await.unwrap();
    let controller = controller_for(&mock);

    assert_eq!(
        controller.run_until(0, None).await.unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    assert_eq!(
        controller.jump(-1, None).await.unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    assert_eq!(
        controller.run_until(3, None).await.unwrap_err().kind(),
        ErrorKind::NoActiveSession
    );
}
