//! ---
//! nb_section: "01-core-functionality"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "EEPROM task over the raw peripheral bus."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::Result;
use nodebus_hal::RawBus;
use nodebus_msg::catalog::{ReadFromEepromResponse, WriteToEepromRequest};
use nodebus_msg::{ErrorCode, ErrorSeverity, NodeId};
use nodebus_rt::ShutdownSignal;
use tracing::{debug, info, warn};

use super::{report_error, EepromQueue, PERIPHERAL_TIMEOUT, QUEUE_POLL};
use crate::clients::CanWriterClient;
use crate::messages::{CanWriterTaskMessage, EepromTaskMessage};

/// Reads and writes 32-bit words; `address` is the first byte of the word.
pub struct EepromTask<C> {
    queue: EepromQueue,
    bus: Arc<dyn RawBus>,
    device_address: u16,
    node: NodeId,
    client: C,
}

impl<C: CanWriterClient> EepromTask<C> {
    /// `device_address` selects the EEPROM on `bus`; replies go out as `node`.
    pub fn new(
        queue: EepromQueue,
        bus: Arc<dyn RawBus>,
        device_address: u16,
        node: NodeId,
        client: C,
    ) -> Self {
        Self {
            queue,
            bus,
            device_address,
            node,
            client,
        }
    }

    /// Serve requests until `shutdown` triggers.
    pub fn run(self, shutdown: ShutdownSignal) -> Result<()> {
        info!(device_address = self.device_address, "eeprom task started");
        while !shutdown.is_triggered() {
            if let Some(message) = self.queue.receive(QUEUE_POLL) {
                self.handle(message);
            }
        }
        Ok(())
    }

    pub(crate) fn handle(&self, message: EepromTaskMessage) {
        match message {
            EepromTaskMessage::WriteToEepromRequest(WriteToEepromRequest { address, data }) => {
                let mut transfer = [0u8; 5];
                transfer[0] = address;
                transfer[1..].copy_from_slice(&data.to_be_bytes());
                if self
                    .bus
                    .transmit(self.device_address, &transfer, PERIPHERAL_TIMEOUT)
                {
                    debug!(address, data, "eeprom word written");
                } else {
                    self.fault(address);
                }
            }
            EepromTaskMessage::ReadFromEepromRequest(request) => {
                let address = request.address;
                let mut word = [0u8; 4];
                let ok = self
                    .bus
                    .transmit(self.device_address, &[address], PERIPHERAL_TIMEOUT)
                    && self
                        .bus
                        .receive(self.device_address, &mut word, PERIPHERAL_TIMEOUT);
                if !ok {
                    self.fault(address);
                    return;
                }
                let response = ReadFromEepromResponse {
                    address,
                    data: u32::from_be_bytes(word),
                };
                if !self
                    .client
                    .send_can_writer_queue(CanWriterTaskMessage::reply_from(self.node, response))
                {
                    warn!(address, "eeprom reply dropped");
                }
            }
        }
    }

    fn fault(&self, address: u8) {
        warn!(device_address = self.device_address, address, "eeprom transfer failed");
        report_error(
            &self.client,
            self.node,
            ErrorSeverity::Recoverable,
            ErrorCode::HardwareFault,
        );
    }
}
