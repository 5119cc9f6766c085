//! Agent configuration
//!
//! The bootstrap file named by `DYNPOOL_CONFIG` (default `dynpool.yaml`) is
//! layered with `DYNPOOL_*` environment variables. Nested keys use a double
//! underscore, e.g. `DYNPOOL_MONITOR__COLLECT_INTERVAL_SECS=10`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dynpool_lib::BootstrapConfig;

pub const CONFIG_PATH_ENV: &str = "DYNPOOL_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "dynpool.yaml";
const DEFAULT_API_PORT: u16 = 8080;

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Bootstrap file the pools are declared in
    pub config_path: PathBuf,

    /// API server port for health, metrics and pool endpoints
    pub api_port: u16,

    /// Re-apply the bootstrap file whenever it changes
    pub watch_config: bool,

    pub bootstrap: BootstrapConfig,
}

impl AgentConfig {
    /// Load configuration from the environment and the bootstrap file
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = settings(path)?;

        let api_port = settings.get::<u16>("api_port").unwrap_or(DEFAULT_API_PORT);
        let watch_config = settings.get::<bool>("watch_config").unwrap_or(true);
        let bootstrap = settings
            .try_deserialize::<BootstrapConfig>()
            .with_context(|| format!("Invalid bootstrap configuration in {}", path.display()))?;

        Ok(Self {
            config_path: path.to_path_buf(),
            api_port,
            watch_config,
            bootstrap,
        })
    }
}

/// Re-read only the bootstrap part, used when the file changes
pub fn load_bootstrap(path: &Path) -> Result<BootstrapConfig> {
    settings(path)?
        .try_deserialize()
        .with_context(|| format!("Invalid bootstrap configuration in {}", path.display()))
}

fn settings(path: &Path) -> Result<config::Config> {
    config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix("DYNPOOL")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynpool_lib::QueueKind;
    use std::io::Write;

    #[test]
    fn test_load_yaml_bootstrap() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
api_port: 9191
application_name: billing
notify_platforms:
  platform: LOG
monitor:
  collect_interval_secs: 3
executors:
  - pool_id: invoices
    core_pool_size: 2
    maximum_pool_size: 6
    queue_kind: ResizableCapacityLinkedBlockingQueue
    queue_capacity: 500
    alarm:
      queue_threshold: 70
"#
        )
        .unwrap();

        let config = AgentConfig::load_from(file.path()).unwrap();
        assert_eq!(config.api_port, 9191);
        assert!(config.watch_config);
        assert_eq!(config.bootstrap.application_name, "billing");
        assert_eq!(config.bootstrap.monitor.collect_interval_secs, 3);

        let pool = &config.bootstrap.executors[0];
        assert_eq!(pool.pool_id, "invoices");
        assert_eq!(pool.queue_kind, QueueKind::ResizableLinkedBlocking);
        assert_eq!(pool.queue_capacity, Some(500));
        assert_eq!(pool.alarm.queue_threshold, 70);
        assert_eq!(pool.alarm.active_threshold, 80);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::load_from(&dir.path().join("absent.yaml")).unwrap();

        assert_eq!(config.api_port, DEFAULT_API_PORT);
        assert!(config.bootstrap.enable);
        assert!(config.bootstrap.executors.is_empty());
    }
}
