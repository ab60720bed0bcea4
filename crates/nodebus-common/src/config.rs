//! ---
//! nb_section: "01-core-functionality"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "TOML configuration for a bus node."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use nodebus_can::{BusOptions, Filter, FilterSet};
use nodebus_msg::{Mtu, NodeId};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use thiserror::Error;
use tracing::debug;

use crate::logging::LogFormat;

fn default_axes() -> Vec<NodeId> {
    vec![NodeId::GantryX]
}

fn default_firmware_version() -> u32 {
    1
}

fn default_eeprom_address() -> u16 {
    0x50
}

fn default_receive_timeout() -> Duration {
    Duration::from_millis(50)
}

fn default_max_groups() -> u8 {
    6
}

fn default_queue_send_timeout() -> Duration {
    Duration::from_millis(10)
}

fn default_presence_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for a nodebus node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub can: CanConfig,
    #[serde(default)]
    pub move_group: MoveGroupConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "NODEBUS_CONFIG";

    /// Load configuration from disk, respecting the `NODEBUS_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Read and validate one file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Axes the move-group coordinator waits for before arming.
    pub fn expected_axes(&self) -> Vec<NodeId> {
        self.move_group
            .expected_axes
            .clone()
            .unwrap_or_else(|| self.node.axes.clone())
    }

    /// Acceptance filters for this node.
    pub fn filter_set(&self) -> Result<FilterSet> {
        match &self.can.filters {
            Some(filters) => FilterSet::from_filters(filters.clone())
                .context("invalid [can] filter configuration"),
            None => Ok(FilterSet::for_nodes(&self.node.axes)),
        }
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.node.axes.is_empty() {
            return Err(ConfigError::NoAxes.into());
        }
        for (index, axis) in self.node.axes.iter().enumerate() {
            if matches!(axis, NodeId::Broadcast | NodeId::Host) {
                return Err(ConfigError::NotADevice(*axis).into());
            }
            if self.node.axes[..index].contains(axis) {
                return Err(ConfigError::DuplicateAxis(*axis).into());
            }
        }
        if let Some(expected) = &self.move_group.expected_axes {
            if let Some(stray) = expected.iter().find(|axis| !self.node.axes.contains(axis)) {
                return Err(ConfigError::StrayExpectedAxis(*stray).into());
            }
        }
        if self.move_group.max_groups == 0 {
            return Err(ConfigError::NoGroups.into());
        }
        self.filter_set()?;
        self.can.validate()?;
        Ok(())
    }
}

/// Structural problems found by [`AppConfig::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("[node] must declare at least one axis")]
    NoAxes,
    #[error("[node] axis {0:?} is not a device address")]
    NotADevice(NodeId),
    #[error("[node] axis {0:?} is listed more than once")]
    DuplicateAxis(NodeId),
    #[error("[move_group] expects axis {0:?} which this node does not drive")]
    StrayExpectedAxis(NodeId),
    #[error("[move_group] max_groups must be greater than zero")]
    NoGroups,
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Identity of this node on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Axis node ids driven by this board. The first one is the node's own address.
    #[serde(default = "default_axes")]
    pub axes: Vec<NodeId>,
    #[serde(default = "default_firmware_version")]
    pub firmware_version: u32,
    /// Peripheral bus address of the configuration EEPROM.
    #[serde(default = "default_eeprom_address")]
    pub eeprom_address: u16,
}

impl NodeConfig {
    /// Address used as originator for node-level traffic.
    pub fn primary(&self) -> NodeId {
        self.axes.first().copied().unwrap_or(NodeId::Broadcast)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            axes: default_axes(),
            firmware_version: default_firmware_version(),
            eeprom_address: default_eeprom_address(),
        }
    }
}

/// Which transport carries bus frames.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Loopback,
    Socket,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanConfig {
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub socket_addr: Option<SocketAddr>,
    #[serde(default)]
    pub mtu: Mtu,
    #[serde(default = "default_receive_timeout", rename = "receive_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub receive_timeout: Duration,
    #[serde(default)]
    pub loopback_echo: bool,
    /// Explicit acceptance filters. Absent means the standard node filters;
    /// an empty list accepts nothing.
    #[serde(default)]
    pub filters: Option<Vec<Filter>>,
}

impl CanConfig {
    pub fn bus_options(&self) -> BusOptions {
        BusOptions {
            mtu: self.mtu,
            receive_timeout: self.receive_timeout,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.transport == TransportKind::Socket && self.socket_addr.is_none() {
            return Err(anyhow!("[can] socket transport requires socket_addr"));
        }
        if self.receive_timeout.is_zero() {
            return Err(anyhow!("[can] receive_timeout_ms must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            socket_addr: None,
            mtu: Mtu::default(),
            receive_timeout: default_receive_timeout(),
            loopback_echo: false,
            filters: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveGroupConfig {
    #[serde(default = "default_max_groups")]
    pub max_groups: u8,
    /// Axes that must hold a move before a group can arm. Defaults to every node axis.
    #[serde(default)]
    pub expected_axes: Option<Vec<NodeId>>,
}

impl Default for MoveGroupConfig {
    fn default() -> Self {
        Self {
            max_groups: default_max_groups(),
            expected_axes: None,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default = "default_queue_send_timeout", rename = "queue_send_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub queue_send_timeout: Duration,
    #[serde(
        default = "default_presence_poll_interval",
        rename = "presence_poll_interval_ms"
    )]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub presence_poll_interval: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            queue_send_timeout: default_queue_send_timeout(),
            presence_poll_interval: default_presence_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HEAD: &str = r#"
        [node]
        axes = ["head-left", "head-right"]
        firmware_version = 7

        [can]
        transport = "socket"
        socket_addr = "127.0.0.1:9898"
        mtu = "classic"
        receive_timeout_ms = 20

        [move_group]
        max_groups = 3

        [tasks]
        queue_send_timeout_ms = 5
    "#;

    #[test]
    fn parses_a_full_node_config() {
        let config: AppConfig = HEAD.parse().expect("valid config");
        assert_eq!(config.node.primary(), NodeId::HeadLeft);
        assert_eq!(config.node.firmware_version, 7);
        assert_eq!(config.can.mtu, Mtu::Classic);
        assert_eq!(config.can.receive_timeout, Duration::from_millis(20));
        assert_eq!(config.tasks.queue_send_timeout, Duration::from_millis(5));
        assert_eq!(
            config.tasks.presence_poll_interval,
            default_presence_poll_interval()
        );
        assert_eq!(config.expected_axes(), vec![NodeId::HeadLeft, NodeId::HeadRight]);
    }

    #[test]
    fn default_filters_cover_axes_and_broadcast() {
        let config: AppConfig = HEAD.parse().expect("valid config");
        let filters = config.filter_set().expect("filters");
        assert_eq!(filters.len(), 3);
    }

    #[test]
    fn explicit_empty_filter_list_accepts_nothing() {
        let config: AppConfig = "[can]\nfilters = []\n".parse().expect("valid config");
        let filters = config.filter_set().expect("filters");
        assert!(filters.is_empty());
        assert!(!filters.accepts(0));
    }

    #[test]
    fn rejects_inverted_range_filters() {
        let err = r#"
            [[can.filters]]
            kind = "range"
            min = 10
            max = 2
        "#
        .parse::<AppConfig>()
        .unwrap_err();
        assert!(format!("{err:#}").contains("inverted"));
    }

    #[test]
    fn rejects_socket_transport_without_address() {
        assert!("[can]\ntransport = \"socket\"\n".parse::<AppConfig>().is_err());
    }

    #[test]
    fn rejects_expected_axes_outside_node() {
        let err = r#"
            [node]
            axes = ["gantry-x"]
            [move_group]
            expected_axes = ["gantry-y"]
        "#
        .parse::<AppConfig>()
        .unwrap_err();
        assert!(err.to_string().contains("GantryY"));
    }

    #[test]
    fn rejects_zero_groups_and_empty_axes() {
        assert!("[move_group]\nmax_groups = 0\n".parse::<AppConfig>().is_err());
        assert!("[node]\naxes = []\n".parse::<AppConfig>().is_err());
        assert!("[node]\naxes = [\"host\"]\n".parse::<AppConfig>().is_err());
    }

    #[test]
    fn rejects_an_axis_listed_twice() {
        let err = r#"
            [node]
            axes = ["gantry-x", "gantry-y", "gantry-x"]
        "#
        .parse::<AppConfig>()
        .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::DuplicateAxis(NodeId::GantryX))
        );
    }

    #[test]
    fn loads_first_existing_candidate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("node.toml");
        let mut file = fs::File::create(&path).expect("create");
        file.write_all(HEAD.as_bytes()).expect("write");

        let missing = dir.path().join("missing.toml");
        let loaded = AppConfig::load_with_source(&[missing, path.clone()]).expect("load");
        assert_eq!(loaded.source, path);
        assert_eq!(loaded.config.move_group.max_groups, 3);
    }

    #[test]
    fn reports_all_inspected_paths_when_nothing_exists() {
        let err = AppConfig::load(&["does/not/exist.toml"]).unwrap_err();
        assert!(err.to_string().contains("does/not/exist.toml"));
    }
}
