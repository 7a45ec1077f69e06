use std::time::Duration;

use tether_config::{AdapterConfig, TimeoutsConfig};
use tether_dap::mock::{MockAdapter, MockAdapterConfig};
use tether_debug::{ControllerConfig, DebugController, LaunchConfig};

pub const PROGRAM: &str = "/work/a.py";

pub fn timeouts() -> TimeoutsConfig {
    TimeoutsConfig {
        request_ms: 2_000,
        stop_ms: 2_000,
        initialize_ms: 2_000,
        disconnect_ms: 1_000,
    }
}

pub fn controller_for(mock: &MockAdapter) -> DebugController {
    controller_with(mock, |_| {})
}

pub fn controller_with(
    mock: &MockAdapter,
    configure: impl FnOnce(&mut ControllerConfig),
) -> DebugController {
    let mut config = ControllerConfig {
        timeouts: timeouts(),
        adapter: Some(AdapterConfig::tcp(mock.addr())),
        ..Default::default()
    };
    configure(&mut config);
    DebugController::standalone(config)
}

pub fn launch_config(stop_on_entry: bool) -> LaunchConfig {
    LaunchConfig {
        stop_on_entry,
        ..LaunchConfig::new(PROGRAM)
    }
}

/// Spawn a mock adapter, launch against it with stop-on-entry and wait for
/// the entry stop to be recorded.
pub async fn stopped_at_entry(config: MockAdapterConfig) -> (MockAdapter, DebugController) {
    let mock = MockAdapter::spawn_with_config(config)
        .await
        .expect("spawn mock adapter");
    let controller = controller_for(&mock);
    controller
        .launch(launch_config(true))
        .await
        .expect("launch");
    wait_until_stopped(&controller).await;
    (mock, controller)
}

pub async fn wait_until_stopped(controller: &DebugController) {
    wait_until("a recorded stop", || controller.current_top_frame_id().is_some()).await;
}

pub async fn wait_until_ended(controller: &DebugController) {
    wait_until("the session to end", || !controller.has_session()).await;
}

pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
