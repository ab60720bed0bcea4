//! ---
//! nb_section: "03-can-bus"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "In-memory simulated bus."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! In-process bus: every endpoint attached to a [`LoopbackHub`] sees the
//! frames sent by every other endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use nodebus_msg::Frame;
use parking_lot::Mutex;
use tracing::warn;

use crate::transport::{BusOptions, BusTransport, ReceiveError, SendError};

/// Frames buffered per endpoint before the bus counts an overrun.
pub const ENDPOINT_DEPTH: usize = 256;

struct Endpoint {
    id: usize,
    echo: bool,
    tx: Sender<Frame>,
}

#[derive(Default)]
struct HubInner {
    next_id: usize,
    endpoints: Vec<Endpoint>,
}

/// Shared wire connecting loopback endpoints.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<Mutex<HubInner>>,
}

impl LoopbackHub {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new endpoint. With `echo` set the endpoint also receives its own frames.
    pub fn open(&self, options: BusOptions, echo: bool) -> LoopbackBus {
        let (tx, rx) = bounded(ENDPOINT_DEPTH);
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.endpoints.push(Endpoint { id, echo, tx });
        LoopbackBus {
            id,
            hub: self.clone(),
            rx,
            options,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of attached endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.inner.lock().endpoints.len()
    }

    fn broadcast(&self, from: usize, frame: Frame) {
        let inner = self.inner.lock();
        for endpoint in &inner.endpoints {
            if endpoint.id == from && !endpoint.echo {
                continue;
            }
            match endpoint.tx.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(endpoint = endpoint.id, "loopback endpoint overrun, frame dropped");
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }

    fn detach(&self, id: usize) {
        self.inner.lock().endpoints.retain(|endpoint| endpoint.id != id);
    }
}

/// One endpoint on a [`LoopbackHub`].
pub struct LoopbackBus {
    id: usize,
    hub: LoopbackHub,
    rx: Receiver<Frame>,
    options: BusOptions,
    closed: AtomicBool,
}

impl BusTransport for LoopbackBus {
    fn send(&self, arbitration_id: u32, payload: &[u8]) -> Result<(), SendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::Closed);
        }
        self.options.check_len(payload.len())?;
        let frame =
            Frame::new(arbitration_id, payload).map_err(|err| SendError::Fault(err.to_string()))?;
        self.hub.broadcast(self.id, frame);
        Ok(())
    }

    fn receive(&self) -> Result<Frame, ReceiveError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ReceiveError::Closed);
        }
        match self.rx.recv_timeout(self.options.receive_timeout) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => {
                if self.closed.load(Ordering::Acquire) {
                    Err(ReceiveError::Closed)
                } else {
                    Err(ReceiveError::Empty)
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(ReceiveError::Closed),
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.hub.detach(self.id);
        }
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

impl Drop for LoopbackBus {
    fn drop(&mut self) {
        self.close();
    }
}
