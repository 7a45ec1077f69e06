//! Configuration for the Tether debug controller.
//!
//! The controller is configured from a single TOML document. Every section is
//! optional; missing keys fall back to the defaults documented on each field.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Environment variable consulted when no explicit config path is supplied.
pub const CONFIG_ENV_VAR: &str = "TETHER_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TetherConfig {
    /// Global logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Deadlines applied to blocking adapter exchanges.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Variable listing and value rendering limits.
    #[serde(default)]
    pub inspection: InspectionConfig,

    /// Adapter used by `launch` when the caller does not name one.
    #[serde(default)]
    pub adapter: Option<AdapterConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Toml(sanitize_toml_error_message(err.message()))
    }
}

/// Redact quoted scalars from TOML diagnostics. Launch environments routinely
/// carry tokens and those must not end up in logs.
fn sanitize_toml_error_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut rest = message;
    while let Some(start) = rest.find('"') {
        out.push_str(&rest[..start + 1]);
        rest = &rest[start + 1..];
        let Some(end) = rest.find('"') else {
            out.push_str(rest);
            return out;
        };
        out.push_str("<redacted>\"");
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    out
}

impl TetherConfig {
    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    /// Resolve the config path from an explicit argument or `TETHER_CONFIG`.
    ///
    /// Returns defaults when neither is set. A file that fails to load is
    /// reported to the caller instead of being silently replaced.
    pub fn discover(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit.or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));
        match path {
            Some(path) => Self::load_from_path(path),
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Either a simple level (`info`, `debug`, ...) or a full `EnvFilter`
    /// directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,

    /// Mirror logs to stderr. Stdout is reserved for tool responses.
    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to the given file path.
    ///
    /// If the file cannot be opened, file logging is disabled while other sinks
    /// remain active.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    /// Map the configured level onto `EnvFilter` directives. Bare level names
    /// are case-insensitive; anything else is passed through as a directive
    /// string.
    pub(crate) fn directives(level: &str) -> String {
        let level = level.trim();
        if level.is_empty() {
            return Self::default_level();
        }
        let lower = level.to_ascii_lowercase();
        match lower.as_str() {
            "warning" => "warn".to_owned(),
            "trace" | "debug" | "info" | "warn" | "error" | "off" => lower,
            _ => level.to_owned(),
        }
    }

    /// The effective filter: configured directives, with `RUST_LOG` appended
    /// so it can refine them. Unparseable input falls back to `info`.
    pub fn env_filter(&self) -> EnvFilter {
        let configured = Self::directives(&self.level);
        let from_env = std::env::var("RUST_LOG")
            .ok()
            .filter(|value| !value.trim().is_empty());

        let candidates = match from_env {
            Some(env) => vec![format!("{configured},{}", env.trim()), env, configured],
            None => vec![configured],
        };
        candidates
            .into_iter()
            .find_map(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::default().add_directive(LevelFilter::INFO.into()))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutsConfig {
    /// Deadline for a single request/response exchange.
    #[serde(default = "TimeoutsConfig::default_request_ms")]
    pub request_ms: u64,

    /// Deadline for an execution-control operation to observe its stop event.
    #[serde(default = "TimeoutsConfig::default_stop_ms")]
    pub stop_ms: u64,

    /// Deadline for the initialize/launch handshake.
    #[serde(default = "TimeoutsConfig::default_initialize_ms")]
    pub initialize_ms: u64,

    /// Deadline for the `disconnect` request sent on quit.
    #[serde(default = "TimeoutsConfig::default_disconnect_ms")]
    pub disconnect_ms: u64,
}

impl TimeoutsConfig {
    fn default_request_ms() -> u64 {
        10_000
    }

    fn default_stop_ms() -> u64 {
        60_000
    }

    fn default_initialize_ms() -> u64 {
        15_000
    }

    fn default_disconnect_ms() -> u64 {
        3_000
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn stop(&self) -> Duration {
        Duration::from_millis(self.stop_ms)
    }

    pub fn initialize(&self) -> Duration {
        Duration::from_millis(self.initialize_ms)
    }

    pub fn disconnect(&self) -> Duration {
        Duration::from_millis(self.disconnect_ms)
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            request_ms: Self::default_request_ms(),
            stop_ms: Self::default_stop_ms(),
            initialize_ms: Self::default_initialize_ms(),
            disconnect_ms: Self::default_disconnect_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InspectionConfig {
    /// Rows listed per scope before the remaining names are elided.
    #[serde(default = "InspectionConfig::default_max_variables_per_scope")]
    pub max_variables_per_scope: usize,

    /// Rendered values longer than this are cut and suffixed with `...`.
    #[serde(default = "InspectionConfig::default_max_value_chars")]
    pub max_value_chars: usize,

    /// Expression used by `get_source`; `{expression}` is substituted.
    #[serde(default = "InspectionConfig::default_source_template")]
    pub source_template: String,
}

impl InspectionConfig {
    fn default_max_variables_per_scope() -> usize {
        100
    }

    fn default_max_value_chars() -> usize {
        200
    }

    fn default_source_template() -> String {
        "__import__('inspect').getsource({expression})".to_owned()
    }
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            max_variables_per_scope: Self::default_max_variables_per_scope(),
            max_value_chars: Self::default_max_value_chars(),
            source_template: Self::default_source_template(),
        }
    }
}

/// How to reach a debug adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdapterConfig {
    /// Value sent as `adapterID` in the `initialize` request.
    #[serde(default = "AdapterConfig::default_adapter_id")]
    pub adapter_id: String,

    /// Connect to an adapter that is already listening on this address.
    #[serde(default)]
    pub tcp: Option<SocketAddr>,

    /// Spawn the adapter and speak DAP over its stdio.
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,
}

impl AdapterConfig {
    fn default_adapter_id() -> String {
        "tether".to_owned()
    }

    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            adapter_id: Self::default_adapter_id(),
            tcp: Some(addr),
            command: None,
            args: Vec::new(),
        }
    }

    pub fn command(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            adapter_id: Self::default_adapter_id(),
            tcp: None,
            command: Some(program.into()),
            args,
        }
    }
}

static TRACING_INIT: Once = Once::new();

struct FileMakeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl<'a> MakeWriter<'a> for FileMakeWriter {
    type Writer = FileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriter {
            guard: self.file.lock(),
        }
    }
}

struct FileWriter<'a> {
    guard: MutexGuard<'a, std::fs::File>,
}

impl Write for FileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.guard.flush()
    }
}

/// Initializes structured `tracing` logging.
///
/// Safe to call multiple times; only the first call installs a global
/// subscriber.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();

        let file = config
            .file
            .as_ref()
            .and_then(|path| {
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .ok()
            })
            .map(|file| Arc::new(Mutex::new(file)));
        let file_open_failed = config.file.is_some() && file.is_none();

        let mut make_writer = BoxMakeWriter::new(io::sink);
        if config.stderr {
            make_writer = BoxMakeWriter::new(make_writer.and(io::stderr));
        }
        if let Some(file) = file {
            make_writer = BoxMakeWriter::new(make_writer.and(FileMakeWriter { file }));
        }

        let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        if tracing::subscriber::set_global_default(subscriber).is_ok() && file_open_failed {
            if let Some(path) = config.file.as_ref() {
                tracing::warn!(
                    target: "tether.config",
                    path = %path.display(),
                    "failed to open log file; file logging disabled"
                );
            }
        }
    });
}
