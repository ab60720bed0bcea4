//! ---
//! nb_section: "03-can-bus"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "CAN filters and bus transports."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! Bus access for nodebus nodes.
//!
//! [`BusTransport`] is the seam between the firmware tasks and whatever
//! carries frames: a real controller ([`HardwareBus`]), an in-process hub
//! ([`LoopbackBus`]) or a TCP relay ([`SocketBus`]).
#![warn(missing_docs)]

pub mod filter;
pub mod hardware;
pub mod loopback;
pub mod metrics;
pub mod socket;
pub mod transport;
pub mod wire;

pub use filter::{Filter, FilterError, FilterSet};
pub use hardware::{CanController, ControllerFault, HardwareBus, SimCanController};
pub use loopback::{LoopbackBus, LoopbackHub};
pub use metrics::{BusCounters, BusMetricsExporter};
pub use socket::{RelayHandle, SocketBus, SocketRelay};
pub use transport::{BusOptions, BusTransport, OpenError, ReceiveError, SendError};
