//! ---
//! nb_section: "03-can-bus"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Bus transport trait and error types."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::time::Duration;

use nodebus_msg::{Frame, Mtu};
use thiserror::Error;

/// Failure to bring a transport up.
#[derive(Debug, Error)]
pub enum OpenError {
    /// Could not reach the simulated bus.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Relay address.
        addr: SocketAddr,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },
    /// Requested MTU exceeds what the controller supports.
    #[error("controller supports {supported:?} frames, {requested:?} requested")]
    UnsupportedMtu {
        /// Configured MTU.
        requested: Mtu,
        /// Controller limit.
        supported: Mtu,
    },
    /// The controller refused initialisation.
    #[error("controller fault: {0}")]
    ControllerFault(String),
}

/// Failure to put a frame on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The transport has been closed.
    #[error("transport closed")]
    Closed,
    /// Payload does not fit the transport MTU.
    #[error("payload of {len} bytes exceeds the {max} byte MTU")]
    PayloadTooLong {
        /// Payload length.
        len: usize,
        /// MTU capacity.
        max: usize,
    },
    /// The controller or socket failed.
    #[error("transmit fault: {0}")]
    Fault(String),
}

/// Failure to take a frame off the bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiveError {
    /// Nothing arrived within the receive timeout.
    #[error("no frame within the receive timeout")]
    Empty,
    /// The transport has been closed.
    #[error("transport closed")]
    Closed,
    /// The controller or socket failed.
    #[error("receive fault: {0}")]
    Fault(String),
}

/// Settings shared by every transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusOptions {
    /// Largest payload accepted by `send`.
    pub mtu: Mtu,
    /// How long `receive` blocks before returning [`ReceiveError::Empty`].
    pub receive_timeout: Duration,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            mtu: Mtu::Fd,
            receive_timeout: Duration::from_millis(50),
        }
    }
}

impl BusOptions {
    /// Reject payloads that do not fit the MTU.
    pub fn check_len(&self, len: usize) -> Result<(), SendError> {
        let max = self.mtu.capacity();
        if len > max {
            return Err(SendError::PayloadTooLong { len, max });
        }
        Ok(())
    }
}

/// A bus endpoint carrying raw `(arbitration id, payload)` frames.
///
/// Methods take `&self` so one endpoint can be shared by the reader and
/// writer tasks.
pub trait BusTransport: Send + Sync {
    /// Put one frame on the bus.
    fn send(&self, arbitration_id: u32, payload: &[u8]) -> Result<(), SendError>;

    /// Wait up to the configured timeout for the next frame.
    fn receive(&self) -> Result<Frame, ReceiveError>;

    /// Detach from the bus. Calling it again has no effect.
    fn close(&self);

    /// Short name for logs and metrics.
    fn name(&self) -> &'static str;
}

impl<T: BusTransport + ?Sized> BusTransport for std::sync::Arc<T> {
    fn send(&self, arbitration_id: u32, payload: &[u8]) -> Result<(), SendError> {
        (**self).send(arbitration_id, payload)
    }

    fn receive(&self) -> Result<Frame, ReceiveError> {
        (**self).receive()
    }

    fn close(&self) {
        (**self).close()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
