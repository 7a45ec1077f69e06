use tether_dap::mock::{MockAdapter, MockAdapterConfig};
use tether_debug::supervisor::PYTEST_RAISE_ENV;
use tether_debug::{
    BreakpointAttributes, ControllerConfig, DebugController, ErrorKind, LaunchConfig, Location,
};

use crate::harness::{controller_for, launch_config, stopped_at_entry, wait_until_stopped, PROGRAM};

#[tokio::test]
async fn launch_forwards_the_program_settings() {
    let mock = MockAdapter::spawn().await.unwrap();
    let controller = controller_for(&mock);

    let mut config = launch_config(true);
    config.args = vec!["--fast".to_string()];
    config.env.insert("MODE".to_string(), "test".to_string());
    config.cwd = Some("/work".to_string());
    let report = controller.launch(config.clone()).await.unwrap();
    assert_eq!(report.program, PROGRAM);
    assert!(report.supports_goto);

    let launch = mock.requests_for("launch").pop().unwrap();
    assert_eq!(launch.arguments["program"], PROGRAM);
    assert_eq!(launch.arguments["args"], serde_json::json!(["--fast"]));
    assert_eq!(launch.arguments["env"]["MODE"], "test");
    assert_eq!(launch.arguments["cwd"], "/work");
    assert_eq!(launch.arguments["stopOnEntry"], true);

    let commands: Vec<String> = mock
        .requests()
        .into_iter()
        .map(|request| request.command)
        .take(3)
        .collect();
    assert_eq!(commands, ["initialize", "launch", "configurationDone"]);
    assert_eq!(controller.last_launch(), Some(config));
}

#[tokio::test]
async fn raising_test_exceptions_sets_the_plugin_variable() {
    let mock = MockAdapter::spawn().await.unwrap();
    let controller = controller_for(&mock);

    let config = LaunchConfig {
        raise_test_exceptions: true,
        ..launch_config(false)
    };
    controller.launch(config).await.unwrap();
    let launch = mock.requests_for("launch").pop().unwrap();
    assert_eq!(launch.arguments["env"][PYTEST_RAISE_ENV], "1");

    let mut config = launch_config(false);
    config.raise_test_exceptions = true;
    config.env.insert(PYTEST_RAISE_ENV.to_string(), "0".to_string());
    controller.launch(config).await.unwrap();
    let launch = mock.requests_for("launch").pop().unwrap();
    assert_eq!(launch.arguments["env"][PYTEST_RAISE_ENV], "0");

    controller.launch(launch_config(false)).await.unwrap();
    let launch = mock.requests_for("launch").pop().unwrap();
    assert!(launch.arguments.get("env").is_none());
}

#[tokio::test]
async fn launch_argument_errors() {
    let mock = MockAdapter::spawn().await.unwrap();
    let controller = controller_for(&mock);
    let err = controller.launch(LaunchConfig::new("  ")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let unconfigured = DebugController::standalone(ControllerConfig::default());
    let err = unconfigured.launch(launch_config(true)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(mock.connections(), 0);
}

#[tokio::test]
async fn restart_without_a_prior_launch_has_nothing_to_restart() {
    let controller = DebugController::standalone(ControllerConfig::default());
    let err = controller.restart().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoActiveSession);
}

#[tokio::test]
async fn restart_relaunches_with_the_same_breakpoints() {
    let (mock, controller) = stopped_at_entry(MockAdapterConfig::default()).await;
    controller
        .set_breakpoint(&Location::new(PROGRAM, 6), BreakpointAttributes::default())
        .await
        .unwrap();
    let first = mock.requests_for("launch").len();
    mock.clear_requests();

    let report = controller.restart().await.unwrap();
    assert_eq!(first, 1);
    assert_eq!(report.breakpoint_files, 1);
    assert_eq!(mock.connections(), 2);
    assert_eq!(mock.requests_for("disconnect").len(), 1);
    assert_eq!(mock.requests_for("launch").len(), 1);

    wait_until_stopped(&controller).await;
    let listed = controller.list_active_breakpoints().await;
    assert_eq!(listed.len(), 1);
    assert!(listed[0].verified);
}

#[tokio::test]
async fn quit_ends_the_session_but_keeps_breakpoints() {
    let (mock, controller) = stopped_at_entry(MockAdapterConfig::default()).await;
    controller
        .set_breakpoint(&Location::new(PROGRAM, 6), BreakpointAttributes::default())
        .await
        .unwrap();

    controller.quit().await.unwrap();
    assert!(!controller.has_session());
    let disconnect = mock.requests_for("disconnect").pop().unwrap();
    assert_eq!(disconnect.arguments["terminateDebuggee"], true);

    let listed = controller.list_active_breakpoints().await;
    assert_eq!(listed.len(), 1);
    assert!(!listed[0].verified);
    assert_eq!(controller.current_top_frame_id(), None);

    assert_eq!(
        controller.quit().await.unwrap_err().kind(),
        ErrorKind::NoActiveSession
    );
    assert_eq!(
        controller.evaluate("x", None, None).await.unwrap_err().kind(),
        ErrorKind::NoActiveSession
    );

    controller.restart().await.unwrap();
    assert!(controller.has_session());
}

#[tokio::test]
async fn attach_adopts_an_existing_connection() {
    let mock = MockAdapter::spawn().await.unwrap();
    let client = tether_dap::DapClient::connect_tcp(mock.addr(), Default::default())
        .await
        .unwrap();
    let controller = DebugController::standalone(ControllerConfig::default());

    let report = controller.attach(client, launch_config(true)).await.unwrap();
    assert_eq!(report.session, 1);
    wait_until_stopped(&controller).await;
    assert_eq!(controller.stack_trace().unwrap().reason.as_deref(), Some("entry"));
    assert_eq!(
        mock.requests_for("initialize")[0].arguments["adapterID"],
        "tether"
    );
}
