// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Interrupt demultiplexing: status word to typed event.

use nexus_hal::Bus;

use crate::channel::{ChannelId, Lane};
use crate::regs::{CLEAR_RETRY_COUNT, DSP2CPU, STATUS_PAIR_MASK, STATUS_PAIR_WIDTH};
use crate::{Error, Result, CHANNELS_PER_DIRECTION, CHANNEL_COUNT};

/// Value written to the clear register when no pair decoded; names no latch.
pub const SPURIOUS_CLEAR_VALUE: u32 = CHANNEL_COUNT as u32;

/// What the DSP signalled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// The DSP consumed the message on this TX channel.
    TxAck(ChannelId),
    /// A message waits in this RX channel's buffer.
    Arrived(ChannelId),
}

impl Event {
    /// Upper half of the status space acknowledges TX lanes, lower half carries arrivals.
    pub fn from_status_index(index: usize) -> Result<Self> {
        if index >= CHANNEL_COUNT {
            return Err(Error::InvalidChannel(index));
        }
        Ok(if index >= CHANNELS_PER_DIRECTION {
            Self::TxAck(ChannelId::Tx(lane(index - CHANNELS_PER_DIRECTION)))
        } else {
            Self::Arrived(ChannelId::Rx(lane(index)))
        })
    }

    pub fn channel(self) -> ChannelId {
        match self {
            Self::TxAck(id) | Self::Arrived(id) => id,
        }
    }
}

fn lane(n: usize) -> Lane {
    match Lane::new(n) {
        Some(lane) => lane,
        None => unreachable!("status index bounded by CHANNEL_COUNT"),
    }
}

/// Finds the lowest status pair that is set.
///
/// Only one channel is reported even when several pairs are latched; the
/// remaining latches keep the interrupt line asserted.
pub fn decode_status(status: u32) -> Result<usize> {
    (0..CHANNEL_COUNT)
        .find(|i| (status >> (i * STATUS_PAIR_WIDTH)) & STATUS_PAIR_MASK != 0)
        .ok_or(Error::SpuriousInterrupt(status))
}

/// Writes `value` to the DSP-to-CPU clear register `CLEAR_RETRY_COUNT` times.
pub fn clear_latch<B: Bus + ?Sized>(bus: &B, value: u32) {
    for _ in 0..CLEAR_RETRY_COUNT {
        bus.write(DSP2CPU.clear, value);
    }
}

/// Outcome of one interrupt invocation. The interrupt is always handled; any
/// error here was logged and is reported for diagnostics only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IrqReport {
    /// Raw DSP-to-CPU status read at entry.
    pub status: u32,
    /// Decoded event, absent for spurious interrupts.
    pub event: Option<Event>,
    pub error: Option<Error>,
}

impl IrqReport {
    pub(crate) fn dispatched(status: u32, event: Event) -> Self {
        Self { status, event: Some(event), error: None }
    }

    pub(crate) fn rejected(status: u32, event: Option<Event>, error: Error) -> Self {
        Self { status, event, error: Some(error) }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
