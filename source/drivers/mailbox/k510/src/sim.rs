// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Simulated K510 mailbox block and DSP peer for host testing
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable (test support)
//!
//! PUBLIC API:
//!   - SimMailbox: `Bus` over a RamBus with latch semantics on the interrupt registers
//!   - Doorbell: what the CPU rang on the DSP side
//!   - IrqPump: background thread standing in for the interrupt line
//!
//! MODEL:
//!   - A write of index `i < 16` to a bank's set register latches pair `i` in
//!     that bank's status word; a write to the clear register drops it. Larger
//!     values are recorded but latch nothing.
//!   - The DSP side acts through the `dsp_*` methods and never goes through
//!     the CPU's `Bus` view.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nexus_hal::host::RamBus;
use nexus_hal::Bus;
use parking_lot::Mutex;

use crate::channel::ChannelId;
use crate::irq::decode_status;
use crate::mailbox::Mailbox;
use crate::regs::{Layout, CPU2DSP, DSP2CPU, STATUS_PAIR_MASK, STATUS_PAIR_WIDTH};
use crate::{Message, CHANNEL_COUNT, MESSAGE_LEN};

fn pair(index: u32) -> u32 {
    STATUS_PAIR_MASK << (index as usize * STATUS_PAIR_WIDTH)
}

#[derive(Default)]
struct Latches {
    /// What the CPU raised for the DSP.
    cpu2dsp: u32,
    /// What the DSP raised for the CPU.
    dsp2cpu: u32,
    doorbells: Vec<u32>,
    clear_writes: Vec<u32>,
}

struct Inner {
    layout: Layout,
    ram: RamBus,
    latches: Mutex<Latches>,
}

/// Doorbell taken off the CPU-to-DSP status word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Doorbell {
    /// The CPU staged a message on this TX channel.
    Message { channel: ChannelId, payload: Message },
    /// The CPU copied out the arrival on this RX channel.
    Rearm(ChannelId),
}

#[derive(Clone)]
pub struct SimMailbox {
    inner: Arc<Inner>,
}

impl Default for SimMailbox {
    fn default() -> Self {
        Self::new(Layout::default())
    }
}

impl SimMailbox {
    pub fn new(layout: Layout) -> Self {
        Self {
            inner: Arc::new(Inner { layout, ram: RamBus::new(), latches: Mutex::new(Latches::default()) }),
        }
    }

    /// Whether any DSP-to-CPU pair is latched (the CPU interrupt line).
    pub fn cpu_irq_pending(&self) -> bool {
        self.inner.latches.lock().dsp2cpu != 0
    }

    /// Overwrites the DSP-to-CPU status word.
    pub fn force_status(&self, status: u32) {
        self.inner.latches.lock().dsp2cpu = status;
    }

    /// Latches status index `index` towards the CPU.
    pub fn raise(&self, index: usize) {
        assert!(index < CHANNEL_COUNT, "status index {index} out of range");
        self.inner.latches.lock().dsp2cpu |= pair(index as u32);
    }

    /// Values written to the CPU-to-DSP set register, oldest first.
    pub fn doorbells(&self) -> Vec<u32> {
        self.inner.latches.lock().doorbells.clone()
    }

    /// Values written to the DSP-to-CPU clear register, oldest first.
    pub fn clear_writes(&self) -> Vec<u32> {
        self.inner.latches.lock().clear_writes.clone()
    }

    /// Current contents of a channel's message buffer.
    pub fn dsp_buffer(&self, channel: ChannelId) -> Message {
        let mut message = [0u8; MESSAGE_LEN];
        self.inner.ram.read_block(self.inner.layout.buffer_addr(channel.index()), &mut message);
        message
    }

    /// Takes the lowest doorbell the CPU rang, as the DSP's handler would.
    pub fn dsp_take_doorbell(&self) -> Option<Doorbell> {
        let index = {
            let mut latches = self.inner.latches.lock();
            let index = decode_status(latches.cpu2dsp).ok()?;
            latches.cpu2dsp &= !pair(index as u32);
            index
        };
        let channel = ChannelId::from_index(index).ok()?;
        Some(match channel {
            ChannelId::Tx(_) => Doorbell::Message { channel, payload: self.dsp_buffer(channel) },
            ChannelId::Rx(_) => Doorbell::Rearm(channel),
        })
    }

    /// Acknowledges the message on TX `channel`.
    pub fn dsp_ack(&self, channel: ChannelId) {
        self.raise(channel.status_index());
    }

    /// Places `payload` in RX `channel`'s buffer and signals its arrival.
    pub fn dsp_post(&self, channel: ChannelId, payload: &Message) {
        self.inner.ram.write_block(self.inner.layout.buffer_addr(channel.index()), payload);
        self.raise(channel.status_index());
    }

    /// Loopback peer: every staged TX message is posted back on the RX channel
    /// of the same lane, then acknowledged. Returns the doorbells consumed.
    pub fn dsp_echo(&self) -> usize {
        let mut handled = 0;
        while let Some(doorbell) = self.dsp_take_doorbell() {
            if let Doorbell::Message { channel, payload } = doorbell {
                self.dsp_post(channel.paired(), &payload);
                self.dsp_ack(channel);
            }
            handled += 1;
        }
        handled
    }
}

impl Bus for SimMailbox {
    fn read(&self, addr: usize) -> u32 {
        let latches = self.inner.latches.lock();
        match addr {
            a if a == CPU2DSP.status => latches.cpu2dsp,
            a if a == DSP2CPU.status => latches.dsp2cpu,
            _ => {
                drop(latches);
                self.inner.ram.read(addr)
            }
        }
    }

    fn write(&self, addr: usize, value: u32) {
        let mut latches = self.inner.latches.lock();
        let latches = &mut *latches;
        let in_range = (value as usize) < CHANNEL_COUNT;
        match addr {
            a if a == CPU2DSP.set => {
                latches.doorbells.push(value);
                if in_range {
                    latches.cpu2dsp |= pair(value);
                }
            }
            a if a == CPU2DSP.clear => {
                if in_range {
                    latches.cpu2dsp &= !pair(value);
                }
            }
            a if a == DSP2CPU.set => {
                if in_range {
                    latches.dsp2cpu |= pair(value);
                }
            }
            a if a == DSP2CPU.clear => {
                latches.clear_writes.push(value);
                if in_range {
                    latches.dsp2cpu &= !pair(value);
                }
            }
            _ => self.inner.ram.write(addr, value),
        }
    }
}

/// Background thread that plays the interrupt line (and optionally the
/// loopback DSP) until stopped or dropped.
pub struct IrqPump {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl IrqPump {
    pub fn spawn(mailbox: Arc<Mailbox<SimMailbox>>, echo: bool) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let sim = mailbox.bus().clone();
                while !stop.load(Ordering::Acquire) {
                    if echo {
                        sim.dsp_echo();
                    } else {
                        // Rearm doorbells still have to be drained by someone.
                        while sim.dsp_take_doorbell().is_some() {}
                    }
                    while sim.cpu_irq_pending() {
                        mailbox.handle_irq();
                    }
                    thread::sleep(Duration::from_micros(200));
                }
            })
        };
        Self { stop, handle: Some(handle) }
    }

    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for IrqPump {
    fn drop(&mut self) {
        self.halt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear_drive_the_latches() {
        let sim = SimMailbox::default();
        sim.write(DSP2CPU.set, 4);
        assert_eq!(sim.read(DSP2CPU.status), 0b11 << 8);
        sim.write(DSP2CPU.clear, 4);
        assert_eq!(sim.read(DSP2CPU.status), 0);
        sim.write(DSP2CPU.clear, 16);
        assert_eq!(sim.clear_writes(), vec![4, 16]);
    }

    #[test]
    fn doorbells_are_taken_lowest_first() {
        let sim = SimMailbox::default();
        sim.write(CPU2DSP.set, 12);
        sim.write(CPU2DSP.set, 2);
        let tx = ChannelId::tx(2).unwrap();
        assert_eq!(
            sim.dsp_take_doorbell(),
            Some(Doorbell::Message { channel: tx, payload: [0; MESSAGE_LEN] })
        );
        assert_eq!(sim.dsp_take_doorbell(), Some(Doorbell::Rearm(ChannelId::rx(4).unwrap())));
        assert_eq!(sim.dsp_take_doorbell(), None);
    }

    #[test]
    fn buffers_outside_registers_are_plain_memory() {
        let sim = SimMailbox::default();
        let rx = ChannelId::rx(7).unwrap();
        sim.dsp_post(rx, &[0x5a; MESSAGE_LEN]);
        assert_eq!(sim.dsp_buffer(rx), [0x5a; MESSAGE_LEN]);
        assert_eq!(sim.read(DSP2CPU.status), 0b11 << 14);
    }
}
