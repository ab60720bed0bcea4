//! ---
//! nb_section: "01-core-functionality"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Tracing subscriber setup."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! A node logs to stdout and to a daily rolling JSON file named after the
//! axes it serves. [`init_tracing`] hands back the node's root span; task
//! threads started inside it inherit the `node` field.
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, Span};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::AppConfig;

const LOG_ENV: &str = "NODEBUS_LOG";

static GUARDS: OnceCell<(WorkerGuard, WorkerGuard)> = OnceCell::new();

/// Stdout format. The log file is always JSON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

fn env_filter() -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(directive).unwrap_or_else(|err| {
            eprintln!("invalid {LOG_ENV} directive ({err}); defaulting to debug logging");
            EnvFilter::new("debug")
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
    }
}

/// Axes served by the node, joined with `+` (`gantry-x+gantry-y`).
pub fn node_label(config: &AppConfig) -> String {
    config
        .node
        .axes
        .iter()
        .map(|axis| {
            serde_json::to_value(axis)
                .ok()
                .and_then(|value| value.as_str().map(str::to_owned))
                .unwrap_or_else(|| format!("{axis:?}"))
        })
        .collect::<Vec<_>>()
        .join("+")
}

/// Base name of the rolling log file: `<prefix>-<node>.log`, the prefix
/// falling back to `service` when `[logging] file_prefix` is unset.
pub fn log_file_name(service: &str, config: &AppConfig) -> String {
    let prefix = config.logging.file_prefix.as_deref().unwrap_or(service);
    format!("{prefix}-{}.log", node_label(config))
}

/// Install the node's subscriber and return its root span.
///
/// `NODEBUS_LOG` overrides the filter (e.g. `info`, `debug,nodebus_can=trace`);
/// when unset `RUST_LOG` is honoured, finally defaulting to `debug`.
/// A second call keeps the first subscriber and only builds a new span.
pub fn init_tracing(service: &str, config: &AppConfig) -> Result<Span> {
    let logging = &config.logging;
    std::fs::create_dir_all(&logging.directory)?;
    let file_name = log_file_name(service, config);

    if GUARDS.get().is_none() {
        let (file_writer, file_guard) =
            tracing_appender::non_blocking(daily(&logging.directory, &file_name));
        let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

        let stdout_layer = match logging.format {
            LogFormat::StructuredJson => fmt::layer()
                .with_target(false)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .with_writer(stdout_writer)
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_writer(stdout_writer)
                .boxed(),
        };
        let file_layer = fmt::layer()
            .with_thread_names(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_current_span(true)
            .with_writer(file_writer)
            .boxed();

        let installed = tracing_subscriber::registry()
            .with(env_filter())
            .with(stdout_layer)
            .with(file_layer)
            .try_init()
            .is_ok();
        if installed {
            let _ = GUARDS.set((file_guard, stdout_guard));
        }
    }

    let node = node_label(config);
    let span = info_span!("node", service, node = %node);
    span.in_scope(|| {
        info!(
            log_dir = %logging.directory.display(),
            file = %file_name,
            format = ?logging.format,
            firmware_version = config.node.firmware_version,
            "tracing initialised"
        );
    });
    Ok(span)
}

/// Plain stderr subscriber for tools and tests. Later calls are no-ops.
pub fn init_basic() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}
