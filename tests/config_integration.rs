//! ---
//! nb_section: "05-testing"
//! nb_subsection: "integration-tests"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Shipped configuration files load and boot a node."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use nodebus_can::LoopbackHub;
use nodebus_common::{AppConfig, LogFormat, TransportKind};
use nodebus_core::{open_transport, Node, NodeHardware};
use nodebus_msg::NodeId;

fn shipped(path: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join(path)
}

#[test]
fn shipped_daemon_config_is_valid() {
    let config = AppConfig::load(&[shipped("configs/nodebusd.toml")]).expect("load");
    assert_eq!(config.node.axes, vec![NodeId::GantryX, NodeId::GantryY]);
    assert_eq!(config.node.eeprom_address, 0x50);
    assert_eq!(config.can.transport, TransportKind::Loopback);
    assert_eq!(config.logging.format, LogFormat::Pretty);
}

#[test]
fn shipped_config_files_carry_frontmatter() {
    let content = fs::read_to_string(shipped("configs/nodebusd.toml")).expect("read");
    assert!(
        content.starts_with("# ---"),
        "configs/nodebusd.toml must include frontmatter header"
    );
}

#[test]
fn node_boots_from_a_config_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("node.toml");
    fs::write(
        &path,
        r#"
[node]
axes = ["head-left", "head-right"]

[move_group]
max_groups = 2
expected_axes = ["head-left"]

[tasks]
presence_poll_interval_ms = 60000
"#,
    )
    .expect("write");

    let loaded = AppConfig::load_with_source(&[dir.path().join("absent.toml"), path.clone()])
        .expect("load");
    assert_eq!(loaded.source, path);

    let config = loaded.config;
    let hub = LoopbackHub::new();
    let transport = open_transport(&config, &hub).expect("transport");
    let (hardware, _sim) = NodeHardware::simulated(&config);
    let node = Node::spawn(&config, transport, hardware).expect("node");
    assert_eq!(node.node(), NodeId::HeadLeft);
    assert_eq!(node.coordinator().max_groups(), 2);
    assert!(node.motor_status(NodeId::HeadRight).is_some());
    assert!(node.motor_status(NodeId::GantryX).is_none());
    node.shutdown().expect("clean shutdown");
}
