//! ---
//! nb_section: "03-can-bus"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Controller-backed bus and a simulated controller."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use nodebus_msg::{Frame, Mtu};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::filter::FilterSet;
use crate::transport::{BusOptions, BusTransport, OpenError, ReceiveError, SendError};

/// Unrecoverable controller failure (bus-off, peripheral error).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("controller fault: {0}")]
pub struct ControllerFault(pub String);

/// CAN peripheral capability provided by the board support layer.
pub trait CanController: Send + Sync {
    /// Largest frame the peripheral handles.
    fn mtu(&self) -> Mtu;

    /// Program hardware acceptance filters.
    fn configure_filters(&self, filters: &FilterSet) -> Result<(), ControllerFault>;

    /// Queue a frame for transmission.
    fn transmit(&self, frame: &Frame) -> Result<(), ControllerFault>;

    /// Wait up to `timeout` for a received frame.
    fn receive(&self, timeout: Duration) -> Result<Option<Frame>, ControllerFault>;
}

/// Transport over a physical CAN controller.
pub struct HardwareBus<C> {
    controller: C,
    options: BusOptions,
    closed: AtomicBool,
}

impl<C: CanController> HardwareBus<C> {
    /// Program `filters` into the controller and start using it.
    pub fn open(
        controller: C,
        filters: &FilterSet,
        options: BusOptions,
    ) -> Result<Self, OpenError> {
        let supported = controller.mtu();
        if options.mtu > supported {
            return Err(OpenError::UnsupportedMtu {
                requested: options.mtu,
                supported,
            });
        }
        controller
            .configure_filters(filters)
            .map_err(|fault| OpenError::ControllerFault(fault.0))?;
        info!(filters = filters.len(), mtu = ?options.mtu, "hardware bus opened");
        Ok(Self {
            controller,
            options,
            closed: AtomicBool::new(false),
        })
    }

    /// Underlying controller.
    pub fn controller(&self) -> &C {
        &self.controller
    }
}

impl<C: CanController> BusTransport for HardwareBus<C> {
    fn send(&self, arbitration_id: u32, payload: &[u8]) -> Result<(), SendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::Closed);
        }
        self.options.check_len(payload.len())?;
        let frame =
            Frame::new(arbitration_id, payload).map_err(|err| SendError::Fault(err.to_string()))?;
        self.controller
            .transmit(&frame)
            .map_err(|fault| SendError::Fault(fault.0))
    }

    fn receive(&self) -> Result<Frame, ReceiveError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ReceiveError::Closed);
        }
        match self.controller.receive(self.options.receive_timeout) {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(ReceiveError::Empty),
            Err(fault) => Err(ReceiveError::Fault(fault.0)),
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("hardware bus closed");
        }
    }

    fn name(&self) -> &'static str {
        "hardware"
    }
}

/// Software stand-in for a CAN peripheral.
///
/// Frames injected with [`SimCanController::inject`] pass through the
/// programmed filters like they would in silicon; transmitted frames are
/// captured for inspection.
pub struct SimCanController {
    mtu: Mtu,
    filters: Mutex<Option<FilterSet>>,
    rx_tx: Sender<Frame>,
    rx: Receiver<Frame>,
    transmitted: Mutex<Vec<Frame>>,
    fault: Mutex<Option<String>>,
}

impl SimCanController {
    /// Controller supporting frames up to `mtu`.
    pub fn new(mtu: Mtu) -> Self {
        let (rx_tx, rx) = unbounded();
        Self {
            mtu,
            filters: Mutex::new(None),
            rx_tx,
            rx,
            transmitted: Mutex::new(Vec::new()),
            fault: Mutex::new(None),
        }
    }

    /// Present a frame on the wire. Returns whether the filters admitted it.
    pub fn inject(&self, frame: Frame) -> bool {
        let admitted = self
            .filters
            .lock()
            .as_ref()
            .is_some_and(|filters| filters.accepts(frame.arbitration_id()));
        if admitted {
            let _ = self.rx_tx.send(frame);
        }
        admitted
    }

    /// Frames transmitted so far, oldest first.
    pub fn transmitted(&self) -> Vec<Frame> {
        self.transmitted.lock().clone()
    }

    /// Make every following operation fail.
    pub fn trip(&self, reason: impl Into<String>) {
        *self.fault.lock() = Some(reason.into());
    }

    fn check_fault(&self) -> Result<(), ControllerFault> {
        match self.fault.lock().as_ref() {
            Some(reason) => Err(ControllerFault(reason.clone())),
            None => Ok(()),
        }
    }
}

impl CanController for SimCanController {
    fn mtu(&self) -> Mtu {
        self.mtu
    }

    fn configure_filters(&self, filters: &FilterSet) -> Result<(), ControllerFault> {
        self.check_fault()?;
        *self.filters.lock() = Some(filters.clone());
        Ok(())
    }

    fn transmit(&self, frame: &Frame) -> Result<(), ControllerFault> {
        self.check_fault()?;
        self.transmitted.lock().push(*frame);
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Frame>, ControllerFault> {
        self.check_fault()?;
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ControllerFault("receive fifo gone".into())),
        }
    }
}

impl<C: CanController + ?Sized> CanController for std::sync::Arc<C> {
    fn mtu(&self) -> Mtu {
        (**self).mtu()
    }

    fn configure_filters(&self, filters: &FilterSet) -> Result<(), ControllerFault> {
        (**self).configure_filters(filters)
    }

    fn transmit(&self, frame: &Frame) -> Result<(), ControllerFault> {
        (**self).transmit(frame)
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Frame>, ControllerFault> {
        (**self).receive(timeout)
    }
}
