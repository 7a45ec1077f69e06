use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tether_config::AdapterConfig;
use tether_dap::types::{DisconnectArguments, InitializeArguments};
use tether_dap::{AdapterEvent, Capabilities, DapClient, DapClientConfig};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::controller::{sync_file_with, DebugController};
use crate::error::{DebugError, Result};
use crate::session::{spawn_event_pump, ActiveSession};

/// Environment variable the pytest raise plugin checks before re-raising
/// test failures.
pub const PYTEST_RAISE_ENV: &str = "_PYTEST_RAISE";

/// Parameters of a launch, remembered for `restart`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub stop_on_entry: bool,
    /// Let a pytest run re-raise test failures so the debugger stops on them
    /// instead of pytest reporting them. Sets [`PYTEST_RAISE_ENV`] unless
    /// `env` already does.
    #[serde(default)]
    pub raise_test_exceptions: bool,
}

impl LaunchConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    fn to_arguments(&self) -> Value {
        let mut arguments = json!({
            "request": "launch",
            "program": self.program,
            "args": self.args,
            "stopOnEntry": self.stop_on_entry,
            "console": "internalConsole",
        });
        let mut env = self.env.clone();
        if self.raise_test_exceptions {
            env.entry(PYTEST_RAISE_ENV.to_string())
                .or_insert_with(|| "1".to_string());
        }
        if !env.is_empty() {
            arguments["env"] = json!(env);
        }
        if let Some(cwd) = &self.cwd {
            arguments["cwd"] = json!(cwd);
        }
        arguments
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchReport {
    pub session: u64,
    pub program: String,
    pub breakpoint_files: usize,
    pub supports_goto: bool,
}

impl DebugController {
    /// Connect to the configured adapter and launch `config`.
    ///
    /// An existing session is ended first. The configuration is remembered
    /// for `restart` only once the launch succeeded.
    pub async fn launch(&self, config: LaunchConfig) -> Result<LaunchReport> {
        if config.program.trim().is_empty() {
            return Err(DebugError::InvalidArgument(
                "launch needs a program".to_string(),
            ));
        }
        let adapter = self.shared.config.adapter.clone().ok_or_else(|| {
            DebugError::InvalidArgument("no debug adapter is configured".to_string())
        })?;

        self.end_active_session("relaunch").await;
        let client = self.connect(&adapter).await?;
        self.start_session(client, &adapter.adapter_id, config).await
    }

    /// Adopt an already-connected adapter and launch `config` through it.
    pub async fn attach(&self, client: DapClient, config: LaunchConfig) -> Result<LaunchReport> {
        let adapter_id = self
            .shared
            .config
            .adapter
            .as_ref()
            .map(|adapter| adapter.adapter_id.clone())
            .unwrap_or_else(|| "tether".to_string());
        self.end_active_session("attach").await;
        self.start_session(client, &adapter_id, config).await
    }

    /// End the current session, if any, and launch the last configuration
    /// again.
    pub async fn restart(&self) -> Result<LaunchReport> {
        let last = self
            .shared
            .last_launch
            .lock()
            .clone()
            .ok_or(DebugError::NothingToRestart)?;
        tracing::info!(target: "tether.debug", program = %last.program, "restarting");
        self.launch(last).await
    }

    /// Terminate the debuggee and drop the session. The last launch
    /// configuration is kept.
    pub async fn quit(&self) -> Result<()> {
        let session = self.shared.require_session()?;
        let disconnect = session
            .client
            .disconnect(
                DisconnectArguments {
                    restart: None,
                    terminate_debuggee: Some(true),
                },
                self.shared.config.timeouts.disconnect(),
            )
            .await;
        if let Err(err) = disconnect {
            tracing::debug!(target: "tether.debug", session = session.id, error = %err, "disconnect failed; closing anyway");
        }
        self.shared.end_session(session.id, "quit").await;
        Ok(())
    }

    pub fn last_launch(&self) -> Option<LaunchConfig> {
        self.shared.last_launch.lock().clone()
    }

    async fn end_active_session(&self, reason: &str) {
        if let Some(session) = self.shared.current_session() {
            tracing::debug!(target: "tether.debug", session = session.id, reason, "replacing active session");
            let _ = session
                .client
                .disconnect(
                    DisconnectArguments {
                        restart: None,
                        terminate_debuggee: Some(true),
                    },
                    self.shared.config.timeouts.disconnect(),
                )
                .await;
            self.shared.end_session(session.id, reason).await;
        }
    }

    async fn connect(&self, adapter: &AdapterConfig) -> Result<DapClient> {
        let client_config = DapClientConfig {
            request_timeout: self.shared.config.timeouts.request(),
            ..Default::default()
        };
        let client = match (&adapter.tcp, &adapter.command) {
            (Some(addr), _) => DapClient::connect_tcp(*addr, client_config).await,
            (None, Some(command)) => {
                DapClient::spawn_command(command, &adapter.args, client_config).await
            }
            (None, None) => {
                return Err(DebugError::InvalidArgument(
                    "adapter config needs either `tcp` or `command`".to_string(),
                ))
            }
        };
        client.map_err(|err| DebugError::from_dap("launch", err))
    }

    async fn start_session(
        &self,
        client: DapClient,
        adapter_id: &str,
        config: LaunchConfig,
    ) -> Result<LaunchReport> {
        match self.handshake(client.clone(), adapter_id, &config).await {
            Ok(report) => {
                *self.shared.last_launch.lock() = Some(config);
                Ok(report)
            }
            Err(err) => {
                tracing::warn!(target: "tether.debug", program = %config.program, error = %err, "launch failed");
                client.shutdown();
                Err(err)
            }
        }
    }

    /// initialize, launch, wait for `initialized`, push breakpoints,
    /// configurationDone.
    async fn handshake(
        &self,
        client: DapClient,
        adapter_id: &str,
        config: &LaunchConfig,
    ) -> Result<LaunchReport> {
        let timeout = self.shared.config.timeouts.initialize();
        let mut events = client.subscribe_events();

        let capabilities = tokio::time::timeout(
            timeout,
            client.initialize(&InitializeArguments::new(adapter_id)),
        )
        .await
        .map_err(|_| DebugError::Timeout {
            operation: "initialize".to_string(),
        })?
        .map_err(|err| DebugError::from_dap("initialize", err))?;

        // Some adapters only answer `launch` after `configurationDone`.
        let launch = {
            let client = client.clone();
            let arguments = config.to_arguments();
            tokio::spawn(async move { client.launch(arguments, timeout).await })
        };

        wait_for_initialized(&mut events, timeout).await?;

        let session = self.install_session(client.clone(), capabilities, events);
        match self.configure(&session, launch, config).await {
            Ok(report) => Ok(report),
            Err(err) => {
                self.shared.end_session(session.id, "launch failed").await;
                Err(err)
            }
        }
    }

    /// Push every registry file, finish configuration and wait for the
    /// `launch` response.
    async fn configure(
        &self,
        session: &Arc<ActiveSession>,
        launch: tokio::task::JoinHandle<tether_dap::Result<tether_dap::types::Response>>,
        config: &LaunchConfig,
    ) -> Result<LaunchReport> {
        let breakpoint_files = {
            let mut registry = self.shared.registry.lock().await;
            let files = registry.files();
            for path in &files {
                sync_file_with(session, &mut registry, path, "launch").await?;
            }
            files.len()
        };

        if session.capabilities.supports_configuration_done_request {
            session
                .client
                .configuration_done()
                .await
                .map_err(|err| DebugError::from_dap("configurationDone", err))?;
        }

        match launch.await {
            Ok(Ok(_response)) => {}
            Ok(Err(err)) => return Err(DebugError::from_dap("launch", err)),
            Err(join) => return Err(DebugError::Transport(join.to_string())),
        }

        tracing::info!(
            target: "tether.debug",
            session = session.id,
            program = %config.program,
            breakpoint_files,
            "debug session started"
        );
        Ok(LaunchReport {
            session: session.id,
            program: config.program.clone(),
            breakpoint_files,
            supports_goto: session.capabilities.supports_goto_targets_request,
        })
    }

    fn install_session(
        &self,
        client: DapClient,
        capabilities: Capabilities,
        events: broadcast::Receiver<AdapterEvent>,
    ) -> Arc<ActiveSession> {
        let session = ActiveSession::new(self.shared.allocate_session_id(), client, capabilities);
        self.shared.tracker.write().clear();
        *self.shared.session.lock() = Some(session.clone());
        spawn_event_pump(Arc::downgrade(&self.shared), session.clone(), events);
        session
    }
}

async fn wait_for_initialized(
    events: &mut broadcast::Receiver<AdapterEvent>,
    timeout: std::time::Duration,
) -> Result<()> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(AdapterEvent::Initialized { .. }) => return Ok(()),
                Ok(AdapterEvent::Disconnected) | Err(RecvError::Closed) => {
                    return Err(DebugError::SessionTerminated)
                }
                Ok(AdapterEvent::Terminated { .. }) | Ok(AdapterEvent::Exited { .. }) => {
                    return Err(DebugError::rejected(
                        "launch",
                        "the program ended before the adapter was initialized",
                    ))
                }
                Ok(other) => {
                    tracing::trace!(target: "tether.debug", ?other, "event before initialized");
                }
                Err(RecvError::Lagged(_)) => {}
            }
        }
    };
    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| DebugError::Timeout {
            operation: "initialize".to_string(),
        })?
}
