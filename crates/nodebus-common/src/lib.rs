//! ---
//! nb_section: "01-core-functionality"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Shared configuration and logging."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! Shared primitives for the nodebus workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the node runtime and the daemon.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, CanConfig, ConfigError, LoadedAppConfig, LoggingConfig, MoveGroupConfig,
    NodeConfig, TaskConfig, TransportKind,
};
pub use logging::{init_basic, init_tracing, log_file_name, node_label, LogFormat};
