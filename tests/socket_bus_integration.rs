//! ---
//! nb_section: "05-testing"
//! nb_subsection: "integration-tests"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "End-to-end tests of a node joined to the socket relay."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nodebus_can::{BusOptions, BusTransport, LoopbackHub, ReceiveError, SocketBus, SocketRelay};
use nodebus_common::AppConfig;
use nodebus_core::{open_transport, Node, NodeHardware};
use nodebus_msg::catalog::*;
use nodebus_msg::{ArbitrationId, Frame, Message, Mtu, NodeId};

fn config_for(relay: SocketAddr) -> AppConfig {
    format!(
        r#"
[node]
axes = ["gantry-x", "gantry-y"]
firmware_version = 3

[can]
transport = "socket"
socket_addr = "{relay}"
receive_timeout_ms = 20

[tasks]
presence_poll_interval_ms = 60000
"#
    )
    .parse()
    .expect("config")
}

fn host(relay: SocketAddr) -> SocketBus {
    SocketBus::open(
        relay,
        BusOptions {
            mtu: Mtu::Fd,
            receive_timeout: Duration::from_millis(20),
        },
    )
    .expect("host endpoint")
}

fn send(host: &SocketBus, destination: NodeId, message: impl Into<Message>) {
    let frame = Frame::from_message(&message.into(), destination, NodeId::Host).expect("frame");
    host.send(frame.arbitration_id(), frame.payload())
        .expect("send");
}

fn next_reply(host: &SocketBus, within: Duration) -> Option<(NodeId, Message)> {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        match host.receive() {
            Ok(frame) => {
                let header = ArbitrationId::from_raw(frame.arbitration_id());
                if header.destination() == Ok(NodeId::Host) {
                    let origin = header.origin().expect("known origin");
                    return Some((origin, frame.decode().expect("decode")));
                }
            }
            Err(ReceiveError::Empty) => {}
            Err(err) => panic!("host endpoint failed: {err}"),
        }
    }
    None
}

fn expect_reply(host: &SocketBus) -> (NodeId, Message) {
    next_reply(host, Duration::from_secs(2)).expect("no reply within deadline")
}

/// Ping until the relay has registered both endpoints.
fn wait_until_joined(host: &SocketBus) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        send(host, NodeId::GantryX, HeartbeatRequest {});
        if let Some(reply) = next_reply(host, Duration::from_millis(200)) {
            assert_eq!(
                reply,
                (NodeId::GantryX, Message::HeartbeatResponse(HeartbeatResponse {}))
            );
            // Late answers to earlier pings.
            while next_reply(host, Duration::from_millis(250)).is_some() {}
            return;
        }
    }
    panic!("node never answered over the relay");
}

#[test]
fn node_serves_requests_through_relay() {
    let relay = SocketRelay::bind("127.0.0.1:0".parse().expect("addr"))
        .expect("bind")
        .spawn()
        .expect("relay");
    let config = config_for(relay.local_addr());
    let transport = open_transport(&config, &LoopbackHub::new()).expect("transport");
    assert_eq!(transport.name(), "socket");
    let (hardware, sim) = NodeHardware::simulated(&config);
    let node = Node::spawn(&config, transport, hardware).expect("node");
    let host = host(relay.local_addr());
    wait_until_joined(&host);

    send(&host, NodeId::GantryY, DeviceInfoRequest {});
    assert_eq!(
        expect_reply(&host),
        (
            NodeId::GantryY,
            Message::DeviceInfoResponse(DeviceInfoResponse { version: 3 })
        )
    );

    send(
        &host,
        NodeId::GantryX,
        WriteToEepromRequest {
            address: 0x10,
            data: 0xCAFE_F00D,
        },
    );
    send(&host, NodeId::GantryX, ReadFromEepromRequest { address: 0x10 });
    assert_eq!(
        expect_reply(&host).1,
        Message::ReadFromEepromResponse(ReadFromEepromResponse {
            address: 0x10,
            data: 0xCAFE_F00D
        })
    );
    assert_eq!(sim.eeprom.peek(0x10, 4), vec![0xCA, 0xFE, 0xF0, 0x0D]);

    sim.z_motor.set_millivolts(1800);
    sim.gripper.set_millivolts(2700);
    send(&host, NodeId::GantryX, ReadPresenceSensingVoltageRequest {});
    assert_eq!(
        expect_reply(&host).1,
        Message::ReadPresenceSensingVoltageResponse(ReadPresenceSensingVoltageResponse {
            z_motor: 1800,
            a_motor: 0,
            gripper: 2700
        })
    );
    send(&host, NodeId::GantryX, AttachedToolsRequest {});
    assert_eq!(
        expect_reply(&host).1,
        Message::ToolsDetectedNotification(ToolsDetectedNotification {
            z_motor: 1,
            a_motor: 0,
            gripper: 2
        })
    );

    node.shutdown().expect("clean shutdown");
    host.close();
    relay.shutdown().expect("relay shutdown");
}

#[test]
fn driver_register_access_reaches_the_axis_device() {
    let relay = SocketRelay::bind("127.0.0.1:0".parse().expect("addr"))
        .expect("bind")
        .spawn()
        .expect("relay");
    let config = config_for(relay.local_addr());
    let transport = open_transport(&config, &LoopbackHub::new()).expect("transport");
    let (hardware, sim) = NodeHardware::simulated(&config);
    let node = Node::spawn(&config, Arc::clone(&transport), hardware).expect("node");
    let host = host(relay.local_addr());
    wait_until_joined(&host);

    send(
        &host,
        NodeId::GantryY,
        WriteMotorDriverRegister {
            reg_address: 0x6C,
            data: 0x0001_0203,
        },
    );
    send(&host, NodeId::GantryY, ReadMotorDriverRegister { reg_address: 0x6C });
    assert_eq!(
        expect_reply(&host),
        (
            NodeId::GantryY,
            Message::ReadMotorDriverRegisterResponse(ReadMotorDriverRegisterResponse {
                reg_address: 0x6C,
                data: 0x0001_0203
            })
        )
    );
    let driver = sim.drivers.get(&NodeId::GantryY).expect("driver");
    assert_eq!(driver.register(0x6C), 0x0001_0203);

    node.shutdown().expect("clean shutdown");
    host.close();
    relay.shutdown().expect("relay shutdown");
}
