use crate::error::ControllerError;
use crate::ledger::ResetSchedule;
use crate::reconcile::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Listen address of the status API
    #[serde(default = "default_api_addr")]
    pub api_addr: String,

    /// SQLite database file; records are kept in memory when unset
    #[serde(default)]
    pub database_path: Option<String>,

    /// TOML file with tunnels, speed rules and grants applied at startup
    #[serde(default)]
    pub seed_path: Option<String>,

    /// Seconds between full reconcile sweeps
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,

    /// Seconds to wait for a node to acknowledge a command
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Days before expiry at which a grant is flagged as expiring soon
    #[serde(default = "default_expiry_warning_days")]
    pub expiry_warning_days: u32,

    #[serde(default)]
    pub reset_schedule: ResetSchedule,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log directory for file-based logging; logs go to stdout when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    #[serde(default = "default_log_file")]
    pub log_file: String,

    /// Number of Tokio runtime worker threads (defaults to CPU cores)
    #[serde(default)]
    pub runtime_threads: Option<usize>,
}

fn default_api_addr() -> String {
    "127.0.0.1:8444".to_string()
}

fn default_reconcile_interval_secs() -> u64 {
    30
}

fn default_command_timeout_secs() -> u64 {
    10
}

fn default_expiry_warning_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "controller.log".to_string()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            api_addr: default_api_addr(),
            database_path: None,
            seed_path: None,
            reconcile_interval_secs: default_reconcile_interval_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            expiry_warning_days: default_expiry_warning_days(),
            reset_schedule: ResetSchedule::default(),
            retry: RetryConfig::default(),
            log_level: default_log_level(),
            log_dir: None,
            log_file: default_log_file(),
            runtime_threads: None,
        }
    }
}

impl ControllerConfig {
    /// Loads the file at `path` (if any), then applies `FLOWGATE__*` environment
    /// overrides, e.g. `FLOWGATE__RECONCILE_INTERVAL_SECS=10`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::new(&path.to_string_lossy(), config::FileFormat::Toml).required(true),
            );
        }
        let config: ControllerConfig = builder
            .add_source(
                config::Environment::with_prefix("FLOWGATE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.reconcile_interval_secs == 0 {
            return Err(ControllerError::Configuration(
                "reconcile_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.command_timeout_secs == 0 {
            return Err(ControllerError::Configuration(
                "command_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if !self.reset_schedule.is_valid() {
            return Err(ControllerError::Configuration(format!(
                "invalid reset_schedule: {:?}",
                self.reset_schedule
            )));
        }
        Ok(())
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}
