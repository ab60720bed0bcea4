//! ---
//! nb_section: "04-hardware-collaborators"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "In-memory peripherals for host builds and tests."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::{ActiveLevel, AdcChannel, Gpio, PinConfig, RawBus};

/// Size of the simulated memory array.
pub const MEMORY_SIZE: usize = 256;

/// EEPROM-style memory behind a one-byte address pointer.
///
/// A transmit sets the pointer from its first byte and writes any remaining
/// bytes from there; a receive reads from the pointer. The pointer advances
/// and wraps at [`MEMORY_SIZE`].
pub struct SimMemoryDevice {
    address: u16,
    state: Mutex<MemoryState>,
    failing: AtomicBool,
}

struct MemoryState {
    pointer: usize,
    cells: [u8; MEMORY_SIZE],
}

impl SimMemoryDevice {
    /// Device answering at `address`, erased to `0xFF`.
    pub fn new(address: u16) -> Self {
        Self {
            address,
            state: Mutex::new(MemoryState {
                pointer: 0,
                cells: [0xFF; MEMORY_SIZE],
            }),
            failing: AtomicBool::new(false),
        }
    }

    /// Copy of `len` bytes starting at `offset`, wrapping at the end.
    pub fn peek(&self, offset: u8, len: usize) -> Vec<u8> {
        let state = self.state.lock();
        (0..len)
            .map(|i| state.cells[(usize::from(offset) + i) % MEMORY_SIZE])
            .collect()
    }

    /// Stop acknowledging transfers.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    fn responds(&self, address: u16) -> bool {
        address == self.address && !self.failing.load(Ordering::Acquire)
    }
}

impl RawBus for SimMemoryDevice {
    fn transmit(&self, address: u16, data: &[u8], _timeout: Duration) -> bool {
        if !self.responds(address) {
            return false;
        }
        let Some((&pointer, bytes)) = data.split_first() else {
            return false;
        };
        let mut state = self.state.lock();
        state.pointer = usize::from(pointer);
        for &byte in bytes {
            let at = state.pointer;
            state.cells[at] = byte;
            state.pointer = (at + 1) % MEMORY_SIZE;
        }
        trace!(address, pointer, written = bytes.len(), "sim memory write");
        true
    }

    fn receive(&self, address: u16, buffer: &mut [u8], _timeout: Duration) -> bool {
        if !self.responds(address) {
            return false;
        }
        let mut state = self.state.lock();
        for slot in buffer.iter_mut() {
            let at = state.pointer;
            *slot = state.cells[at];
            state.pointer = (at + 1) % MEMORY_SIZE;
        }
        true
    }
}

/// Bit marking a register write in the first SPI byte.
pub const REGISTER_WRITE_BIT: u8 = 0x80;

/// SPI-style motor driver exposing 32-bit registers.
///
/// Writes are `[reg | 0x80, data BE]`. A read is a `[reg]` transmit
/// followed by a four-byte receive of the big-endian value.
pub struct SimRegisterDevice {
    address: u16,
    registers: Mutex<HashMap<u8, u32>>,
    selected: Mutex<Option<u8>>,
}

impl SimRegisterDevice {
    /// Device selected by `address`.
    pub fn new(address: u16) -> Self {
        Self {
            address,
            registers: Mutex::new(HashMap::new()),
            selected: Mutex::new(None),
        }
    }

    /// Current register value, zero when never written.
    pub fn register(&self, reg: u8) -> u32 {
        self.registers.lock().get(&reg).copied().unwrap_or(0)
    }

    /// Preload a register.
    pub fn set_register(&self, reg: u8, value: u32) {
        self.registers.lock().insert(reg, value);
    }
}

impl RawBus for SimRegisterDevice {
    fn transmit(&self, address: u16, data: &[u8], _timeout: Duration) -> bool {
        if address != self.address {
            return false;
        }
        match data {
            [head, value @ ..] if head & REGISTER_WRITE_BIT != 0 => {
                let Ok(raw) = <[u8; 4]>::try_from(value) else {
                    return false;
                };
                let reg = head & !REGISTER_WRITE_BIT;
                self.registers.lock().insert(reg, u32::from_be_bytes(raw));
                trace!(reg, "sim register write");
                true
            }
            [reg] => {
                *self.selected.lock() = Some(*reg);
                true
            }
            _ => false,
        }
    }

    fn receive(&self, address: u16, buffer: &mut [u8], _timeout: Duration) -> bool {
        if address != self.address || buffer.len() != 4 {
            return false;
        }
        let Some(reg) = self.selected.lock().take() else {
            return false;
        };
        buffer.copy_from_slice(&self.register(reg).to_be_bytes());
        true
    }
}

/// Analog input whose reading is set from the outside.
#[derive(Clone, Default)]
pub struct SimAdcChannel {
    millivolts: Arc<AtomicU16>,
}

impl SimAdcChannel {
    /// Channel reading `millivolts`.
    pub fn new(millivolts: u16) -> Self {
        Self {
            millivolts: Arc::new(AtomicU16::new(millivolts)),
        }
    }

    /// Change the reading. Clones observe the new value.
    pub fn set_millivolts(&self, millivolts: u16) {
        self.millivolts.store(millivolts, Ordering::Release);
    }
}

impl AdcChannel for SimAdcChannel {
    fn read_millivolts(&self) -> u16 {
        self.millivolts.load(Ordering::Acquire)
    }
}

/// GPIO bank tracking physical line levels.
#[derive(Default)]
pub struct SimGpio {
    levels: Mutex<HashMap<(u8, u8), bool>>,
}

impl SimGpio {
    /// All lines low.
    pub fn new() -> Self {
        Self::default()
    }

    /// Physical level of a line, `true` for high.
    pub fn level(&self, port: u8, pin: u8) -> bool {
        self.levels.lock().get(&(port, pin)).copied().unwrap_or(false)
    }

    fn drive(&self, pin: PinConfig, active: bool) {
        let high = match pin.active_level {
            ActiveLevel::High => active,
            ActiveLevel::Low => !active,
        };
        self.levels.lock().insert((pin.port, pin.pin), high);
    }
}

impl Gpio for SimGpio {
    fn set_pin(&self, pin: PinConfig) {
        self.drive(pin, true);
    }

    fn clear_pin(&self, pin: PinConfig) {
        self.drive(pin, false);
    }

    fn is_pin_set(&self, pin: PinConfig) -> bool {
        let high = self.level(pin.port, pin.pin);
        match pin.active_level {
            ActiveLevel::High => high,
            ActiveLevel::Low => !high,
        }
    }
}
