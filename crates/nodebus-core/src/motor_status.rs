//! ---
//! nb_section: "01-core-functionality"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Atomic motor position status flags."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! Motion-state flags shared between a motor task, interrupt handlers and
//! status readers.
//!
//! Every accessor is one atomic read-modify-write on a single word, so
//! concurrent writers touching different flags never lose each other's bits.
//! [`MotorFlags::LIMIT_HIT`] is latched: [`MotorPositionStatus::clear_flag`]
//! leaves it alone and only [`MotorPositionStatus::reset_flag`] removes it.

use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Motion-state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MotorFlags: u32 {
        /// Axis at rest.
        const STOPPED = 1 << 0;
        /// Axis executing a move.
        const MOVING = 1 << 1;
        /// Limit switch tripped. Latched.
        const LIMIT_HIT = 1 << 2;
        /// Encoder position agrees with the commanded position.
        const ENCODER_SYNCED = 1 << 3;
        /// Stepper position counter is trustworthy.
        const STEPPER_POSITION_OK = 1 << 4;
    }
}

const LATCHED: MotorFlags = MotorFlags::LIMIT_HIT;

/// One atomic word of [`MotorFlags`].
#[derive(Debug)]
pub struct MotorPositionStatus {
    word: AtomicU32,
}

impl MotorPositionStatus {
    /// Status of an axis at rest with no other flag set.
    pub fn new() -> Self {
        Self::with_flags(MotorFlags::STOPPED)
    }

    /// Status starting from `flags`.
    pub fn with_flags(flags: MotorFlags) -> Self {
        Self {
            word: AtomicU32::new(flags.bits()),
        }
    }

    /// Set `flags`, leaving the others untouched.
    pub fn set_flag(&self, flags: MotorFlags) {
        self.word.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    /// Clear `flags` except latched ones.
    pub fn clear_flag(&self, flags: MotorFlags) {
        let clearable = flags.difference(LATCHED);
        self.word.fetch_and(!clearable.bits(), Ordering::AcqRel);
    }

    /// Clear `flags`, latched ones included.
    pub fn reset_flag(&self, flags: MotorFlags) {
        self.word.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Whether every bit in `flags` is set.
    pub fn check_flag(&self, flags: MotorFlags) -> bool {
        self.get_flags().contains(flags)
    }

    /// Snapshot of the whole word.
    pub fn get_flags(&self) -> MotorFlags {
        MotorFlags::from_bits_truncate(self.word.load(Ordering::Acquire))
    }

    /// Record a limit-switch trip from interrupt context: latch
    /// `LIMIT_HIT`, drop `MOVING` and mark the axis stopped in one update.
    pub fn on_limit_switch_interrupt(&self) {
        let _ = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let flags = MotorFlags::from_bits_retain(bits)
                    .difference(MotorFlags::MOVING)
                    .union(MotorFlags::LIMIT_HIT | MotorFlags::STOPPED);
                Some(flags.bits())
            });
    }

    /// Transition into motion.
    pub fn start_motion(&self) {
        let _ = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let flags = MotorFlags::from_bits_retain(bits)
                    .difference(MotorFlags::STOPPED)
                    .union(MotorFlags::MOVING);
                Some(flags.bits())
            });
    }

    /// Transition out of motion.
    pub fn finish_motion(&self) {
        let _ = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let flags = MotorFlags::from_bits_retain(bits)
                    .difference(MotorFlags::MOVING)
                    .union(MotorFlags::STOPPED);
                Some(flags.bits())
            });
    }

    /// Low byte of the word as carried in status replies.
    pub fn wire_status(&self) -> u8 {
        (self.get_flags().bits() & 0xFF) as u8
    }
}

impl Default for MotorPositionStatus {
    fn default() -> Self {
        Self::new()
    }
}
