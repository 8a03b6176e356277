// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Register map of the K510 CPU/DSP mailbox block.
//!
//! Offsets are bytes from the mailbox base. Each direction owns one register
//! bank; both banks share the 16-pair status encoding where pair `i` (bits
//! `2i..2i+2`) latches status index `i`.

use crate::{Error, Result, CHANNEL_COUNT, MESSAGE_LEN};

/// Interrupt registers of one signalling direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterBank {
    pub enable: usize,
    pub set: usize,
    pub clear: usize,
    pub status: usize,
    pub error: usize,
}

/// CPU rings the DSP.
pub const CPU2DSP: RegisterBank = RegisterBank {
    enable: 0x00,
    set: 0x04,
    clear: 0x08,
    status: 0x0c,
    error: 0x10,
};

/// DSP rings the CPU.
pub const DSP2CPU: RegisterBank = RegisterBank {
    enable: 0x1c,
    set: 0x14,
    clear: 0x18,
    status: 0x20,
    error: 0x24,
};

/// First of the sixteen word-wide data registers.
pub const DATA_REGS: usize = 0xb0;
/// End of the register window (exclusive).
pub const REGISTER_WINDOW_END: usize = DATA_REGS + CHANNEL_COUNT * 4;

/// Default start of the message-buffer window.
pub const DEFAULT_BUFFER_OFFSET: usize = 0x100;

/// Bits per channel in a status word.
pub const STATUS_PAIR_WIDTH: usize = 2;
/// Mask of one status pair.
pub const STATUS_PAIR_MASK: u32 = 0b11;

/// The latch does not reliably drop on a single clear write; the hardware needs
/// the index written this many times.
pub const CLEAR_RETRY_COUNT: usize = 3;

bitflags::bitflags! {
    /// Interrupt-enable register layout (both banks).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IntEnable: u32 {
        /// Global interrupt enable.
        const INT_EN = 1 << 0;
        /// Interrupt logic reset.
        const INT_RST = 1 << 1;
        /// Raw per-channel enables.
        const RAW_EN = 0xffff << 16;
    }
}

/// Placement of the sixteen 32-byte message buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    buffer_offset: usize,
}

impl Layout {
    pub const fn new(buffer_offset: usize) -> Self {
        Self { buffer_offset }
    }

    pub const fn buffer_offset(&self) -> usize {
        self.buffer_offset
    }

    /// Rejects windows that overlap registers, are unaligned, or overflow.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_offset < REGISTER_WINDOW_END {
            return Err(Error::Config(format!(
                "buffer window {:#x} overlaps registers (end {:#x})",
                self.buffer_offset, REGISTER_WINDOW_END
            )));
        }
        if self.buffer_offset % 4 != 0 {
            return Err(Error::Config(format!(
                "buffer window {:#x} is not word aligned",
                self.buffer_offset
            )));
        }
        if self.buffer_offset.checked_add(CHANNEL_COUNT * MESSAGE_LEN).is_none() {
            return Err(Error::Config(format!(
                "buffer window {:#x} overflows the address space",
                self.buffer_offset
            )));
        }
        Ok(())
    }

    /// Start of the buffer for global channel `index`.
    pub const fn buffer_addr(&self, index: usize) -> usize {
        self.buffer_offset + index * MESSAGE_LEN
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_OFFSET)
    }
}
