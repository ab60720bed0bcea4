//! ---
//! nb_section: "04-hardware-collaborators"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Peripheral capability traits."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! Peripheral capabilities the firmware tasks consume.
//!
//! Register-level initialisation belongs to the board support package; the
//! tasks only see these narrow traits. [`sim`] provides in-memory devices for
//! host builds and tests.
#![warn(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod sim;

pub use sim::{SimAdcChannel, SimGpio, SimMemoryDevice, SimRegisterDevice};

/// Byte-oriented peripheral bus (I2C or SPI).
///
/// Both calls return `false` when the transfer did not complete within
/// `timeout` or the device did not acknowledge.
pub trait RawBus: Send + Sync {
    /// Write `data` to the device at `address`.
    fn transmit(&self, address: u16, data: &[u8], timeout: Duration) -> bool;

    /// Fill `buffer` from the device at `address`.
    fn receive(&self, address: u16, buffer: &mut [u8], timeout: Duration) -> bool;
}

/// One analog input.
pub trait AdcChannel: Send + Sync {
    /// Current reading in millivolts.
    fn read_millivolts(&self) -> u16;
}

/// Electrical level that means "asserted".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActiveLevel {
    /// Asserted when driven high.
    #[default]
    High,
    /// Asserted when driven low.
    Low,
}

/// A GPIO line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PinConfig {
    /// Port index (A = 0).
    pub port: u8,
    /// Pin number within the port.
    pub pin: u8,
    /// Level treated as set.
    #[serde(default)]
    pub active_level: ActiveLevel,
}

impl PinConfig {
    /// Active-high pin.
    pub const fn new(port: u8, pin: u8) -> Self {
        Self {
            port,
            pin,
            active_level: ActiveLevel::High,
        }
    }
}

/// Digital output and input lines.
pub trait Gpio: Send + Sync {
    /// Drive the pin to its active level.
    fn set_pin(&self, pin: PinConfig);

    /// Drive the pin to its inactive level.
    fn clear_pin(&self, pin: PinConfig);

    /// Whether the pin currently reads as active.
    fn is_pin_set(&self, pin: PinConfig) -> bool;
}

impl<T: RawBus + ?Sized> RawBus for Arc<T> {
    fn transmit(&self, address: u16, data: &[u8], timeout: Duration) -> bool {
        (**self).transmit(address, data, timeout)
    }

    fn receive(&self, address: u16, buffer: &mut [u8], timeout: Duration) -> bool {
        (**self).receive(address, buffer, timeout)
    }
}

impl<T: AdcChannel + ?Sized> AdcChannel for Arc<T> {
    fn read_millivolts(&self) -> u16 {
        (**self).read_millivolts()
    }
}

impl<T: Gpio + ?Sized> Gpio for Arc<T> {
    fn set_pin(&self, pin: PinConfig) {
        (**self).set_pin(pin)
    }

    fn clear_pin(&self, pin: PinConfig) {
        (**self).clear_pin(pin)
    }

    fn is_pin_set(&self, pin: PinConfig) -> bool {
        (**self).is_pin_set(pin)
    }
}
