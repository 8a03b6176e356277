// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Mailbox controller and client protocol.
//!
//! `handle_irq` is the interrupt context: it must be called once per asserted
//! mailbox interrupt and never blocks on anything a consumer can hold for an
//! unbounded time. Everything else runs in consumer context and may block,
//! always with a bound or a cancellation path.

use std::sync::Arc;
use std::time::Duration;

use nexus_hal::Bus;

use crate::channel::{ChannelId, ChannelInfo, ChannelTable, Direction};
use crate::command::Request;
use crate::config::MailboxConfig;
use crate::irq::{clear_latch, decode_status, Event, IrqReport, SPURIOUS_CLEAR_VALUE};
use crate::notify::{Bridge, ListenerId};
use crate::regs::{IntEnable, CPU2DSP, DSP2CPU};
use crate::tx::{Ack, Ticket, TxSlot};
use crate::{Error, Message, Result, Wait, CHANNELS_PER_DIRECTION, MESSAGE_LEN};

/// CPU-side view of the K510 mailbox block.
pub struct Mailbox<B: Bus> {
    bus: B,
    table: ChannelTable,
    send_timeout: Duration,
    tx: [TxSlot; CHANNELS_PER_DIRECTION],
    bridge: Bridge,
}

impl<B: Bus> Mailbox<B> {
    /// Validates `config`, binds its channels and enables both interrupt directions.
    pub fn new(bus: B, config: &MailboxConfig) -> Result<Self> {
        config.validate()?;
        let mailbox = Self {
            bus,
            table: ChannelTable::new(config.layout()),
            send_timeout: config.send_timeout(),
            tx: core::array::from_fn(|_| TxSlot::new()),
            bridge: Bridge::new(),
        };
        for id in config.channel_ids()? {
            mailbox.bind(id, config.client.as_str())?;
        }
        mailbox.enable_interrupts();
        log::info!("mailbox-k510: enabled ({} channels bound)", config.channels.len());
        Ok(mailbox)
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    fn enable_interrupts(&self) {
        let word = (IntEnable::RAW_EN | IntEnable::INT_EN).bits();
        self.bus.write(CPU2DSP.enable, word);
        self.bus.write(DSP2CPU.enable, word);
    }

    /// Unbinds every channel (waking blocked callers with `Closed`) and masks
    /// both interrupt directions.
    pub fn shutdown(&self) {
        for id in ChannelId::all() {
            self.unbind(id);
        }
        self.bus.write(CPU2DSP.enable, 0);
        self.bus.write(DSP2CPU.enable, 0);
        log::info!("mailbox-k510: disabled");
    }

    /// Latched error words of the CPU-to-DSP and DSP-to-CPU banks.
    pub fn error_status(&self) -> (u32, u32) {
        (self.bus.read(CPU2DSP.error), self.bus.read(DSP2CPU.error))
    }

    pub fn channel(&self, index: usize) -> Result<ChannelInfo> {
        self.table.lookup(index)
    }

    pub fn bind(&self, id: ChannelId, client: impl Into<String>) -> Result<()> {
        self.table.bind(id, client)?;
        match id.direction() {
            Direction::Tx => self.tx[id.lane()].open(),
            Direction::Rx => self.bridge.open(id),
        }
        Ok(())
    }

    /// Detaches the client. Blocked senders and receivers on the channel return `Closed`.
    pub fn unbind(&self, id: ChannelId) -> bool {
        let was_bound = self.table.unbind(id).is_some();
        match id.direction() {
            Direction::Tx => self.tx[id.lane()].close(),
            Direction::Rx => self.bridge.close(id),
        }
        was_bound
    }

    pub fn is_bound(&self, id: ChannelId) -> bool {
        self.table.is_bound(id)
    }

    fn bound(&self, id: ChannelId, direction: Direction) -> Result<ChannelId> {
        if id.direction() != direction {
            return Err(Error::InvalidChannel(id.index()));
        }
        if !self.table.is_bound(id) {
            return Err(Error::ChannelUnbound(id));
        }
        Ok(id)
    }

    /// Stages `message` and rings the DSP without waiting for the ack.
    pub fn submit(&self, id: ChannelId, message: &Message) -> Result<Ticket> {
        let id = self.bound(id, Direction::Tx)?;
        let ticket = self.tx[id.lane()].begin(id)?;
        self.bus.write_block(self.table.buffer_addr(id), message);
        // The DSP reads the buffer as soon as it sees the doorbell.
        self.bus.barrier();
        self.bus.write(CPU2DSP.set, id.index() as u32);
        log::debug!("mailbox-k510: doorbell {id}");
        Ok(ticket)
    }

    /// Blocks until `ticket` is acknowledged or the send timeout expires.
    /// Unbinding the channel meanwhile ends the wait with `Closed`.
    pub fn wait_ack(&self, id: ChannelId, ticket: Ticket) -> Result<()> {
        if id.direction() != Direction::Tx {
            return Err(Error::InvalidChannel(id.index()));
        }
        self.tx[id.lane()].wait(id, ticket, self.send_timeout)
    }

    /// Sends one message and returns once the DSP acknowledged it.
    pub fn send(&self, id: ChannelId, message: &Message) -> Result<()> {
        let ticket = self.submit(id, message)?;
        match self.wait_ack(id, ticket) {
            Err(err @ Error::SendTimeout { .. }) => {
                log::warn!("mailbox-k510: {err}");
                Err(err)
            }
            other => other,
        }
    }

    /// `send` for a caller-supplied slice, which must hold exactly one message.
    pub fn send_bytes(&self, id: ChannelId, payload: &[u8]) -> Result<()> {
        let message: Message = payload
            .try_into()
            .map_err(|_| Error::CopyFault { expected: MESSAGE_LEN, actual: payload.len() })?;
        self.send(id, &message)
    }

    pub fn is_tx_pending(&self, id: ChannelId) -> bool {
        id.direction() == Direction::Tx && self.tx[id.lane()].is_pending()
    }

    pub fn receive(&self, id: ChannelId, wait: Wait) -> Result<Message> {
        let id = self.bound(id, Direction::Rx)?;
        self.bridge.take(id, wait)
    }

    /// Copies the next message into `out`. A buffer shorter than a message is
    /// rejected before anything is consumed.
    pub fn receive_into(&self, id: ChannelId, out: &mut [u8], wait: Wait) -> Result<usize> {
        if out.len() < MESSAGE_LEN {
            return Err(Error::CopyFault { expected: MESSAGE_LEN, actual: out.len() });
        }
        let message = self.receive(id, wait)?;
        out[..MESSAGE_LEN].copy_from_slice(&message);
        Ok(MESSAGE_LEN)
    }

    /// Whether a message waits on `id`. Always `false` for TX channels.
    pub fn poll_ready(&self, id: ChannelId) -> bool {
        id.direction() == Direction::Rx && self.bridge.poll_ready(id)
    }

    /// Attaches `callback` to the events of `id`. It runs in interrupt context.
    pub fn register_listener<F>(&self, id: ChannelId, callback: F) -> ListenerId
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.bridge.register(id, Arc::new(callback))
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.bridge.unregister(id)
    }

    /// Executes a character-device request against `buf`.
    pub fn ioctl(&self, cmd: u32, buf: &mut [u8]) -> Result<()> {
        match Request::decode(cmd)? {
            Request::Send(id) => self.send_bytes(id, buf),
            Request::Receive(id) => self.receive_into(id, buf, Wait::NonBlocking).map(|_| ()),
        }
    }

    /// Services one mailbox interrupt.
    pub fn handle_irq(&self) -> IrqReport {
        let status = self.bus.read(DSP2CPU.status);
        let index = match decode_status(status) {
            Ok(index) => index,
            Err(err) => {
                clear_latch(&self.bus, SPURIOUS_CLEAR_VALUE);
                log::warn!("mailbox-k510: {err}");
                return IrqReport::rejected(status, None, err);
            }
        };
        clear_latch(&self.bus, index as u32);

        let event = match Event::from_status_index(index) {
            Ok(event) => event,
            Err(err) => return IrqReport::rejected(status, None, err),
        };
        match self.dispatch(event) {
            Ok(()) => IrqReport::dispatched(status, event),
            Err(err) => IrqReport::rejected(status, Some(event), err),
        }
    }

    fn dispatch(&self, event: Event) -> Result<()> {
        match event {
            Event::TxAck(id) => {
                if !self.table.is_bound(id) {
                    log::error!("mailbox-k510: illegal tx channel {id}");
                    return Err(Error::ChannelUnbound(id));
                }
                match self.tx[id.lane()].complete() {
                    Ack::Delivered => log::debug!("mailbox-k510: {id} acknowledged"),
                    Ack::Late => {
                        log::warn!("mailbox-k510: late ack on {id} for a timed-out message")
                    }
                    Ack::Stray => log::warn!("mailbox-k510: ack on {id} with nothing in flight"),
                }
                self.bridge.fan_out(event);
            }
            Event::Arrived(id) => {
                if !self.table.is_bound(id) {
                    log::error!("mailbox-k510: illegal rx channel {id}");
                    return Err(Error::ChannelUnbound(id));
                }
                let mut message = [0u8; MESSAGE_LEN];
                self.bus.read_block(self.table.buffer_addr(id), &mut message);
                if self.bridge.deliver(id, &message) {
                    log::warn!("mailbox-k510: unread message on {id} overwritten");
                }
                log::debug!("mailbox-k510: message on {id}");
                // Re-arm: tells the DSP the buffer has been copied out.
                self.bus.write(CPU2DSP.set, id.index() as u32);
                self.bridge.fan_out(event);
            }
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::sim::SimMailbox;

    fn mailbox() -> (Mailbox<SimMailbox>, SimMailbox) {
        let sim = SimMailbox::default();
        let mailbox = Mailbox::new(sim.clone(), &MailboxConfig::default()).unwrap();
        (mailbox, sim)
    }

    #[test]
    fn construction_enables_both_directions() {
        let (mailbox, sim) = mailbox();
        assert_eq!(sim.read(CPU2DSP.enable), 0xffff_0001);
        assert_eq!(sim.read(DSP2CPU.enable), 0xffff_0001);
        mailbox.shutdown();
        assert_eq!(sim.read(CPU2DSP.enable), 0);
        assert!(!mailbox.is_bound(ChannelId::tx(0).unwrap()));
    }

    #[test]
    fn direction_mismatch_is_invalid_channel() {
        let (mailbox, _sim) = mailbox();
        let rx = ChannelId::rx(1).unwrap();
        let tx = ChannelId::tx(1).unwrap();
        assert_eq!(mailbox.submit(rx, &[0; MESSAGE_LEN]), Err(Error::InvalidChannel(9)));
        assert_eq!(mailbox.receive(tx, Wait::NonBlocking), Err(Error::InvalidChannel(1)));
        assert!(!mailbox.poll_ready(tx));
    }

    #[test]
    fn unbound_channel_rejects_traffic() {
        let (mailbox, _sim) = mailbox();
        let tx = ChannelId::tx(2).unwrap();
        let rx = ChannelId::rx(2).unwrap();
        assert!(mailbox.unbind(tx));
        assert!(mailbox.unbind(rx));
        assert_eq!(mailbox.send(tx, &[0; MESSAGE_LEN]), Err(Error::ChannelUnbound(tx)));
        assert_eq!(mailbox.receive(rx, Wait::NonBlocking), Err(Error::ChannelUnbound(rx)));
    }

    #[test]
    fn doorbell_follows_staged_payload() {
        let (mailbox, sim) = mailbox();
        let tx = ChannelId::tx(3).unwrap();
        let message: Message = core::array::from_fn(|i| 0xa0 + i as u8);
        mailbox.submit(tx, &message).unwrap();
        assert_eq!(sim.dsp_buffer(tx), message);
        assert_eq!(sim.doorbells(), vec![3]);
    }

    #[test]
    fn copy_faults_leave_state_untouched() {
        let (mailbox, sim) = mailbox();
        let tx = ChannelId::tx(0).unwrap();
        let rx = ChannelId::rx(0).unwrap();
        assert_eq!(
            mailbox.send_bytes(tx, &[1; 31]),
            Err(Error::CopyFault { expected: MESSAGE_LEN, actual: 31 })
        );
        assert!(!mailbox.is_tx_pending(tx));

        sim.dsp_post(rx, &[9; MESSAGE_LEN]);
        mailbox.handle_irq();
        let mut short = [0u8; 16];
        assert_eq!(
            mailbox.receive_into(rx, &mut short, Wait::NonBlocking),
            Err(Error::CopyFault { expected: MESSAGE_LEN, actual: 16 })
        );
        assert!(mailbox.poll_ready(rx));
    }

    #[test]
    fn spurious_interrupt_still_clears() {
        let (mailbox, sim) = mailbox();
        let report = mailbox.handle_irq();
        assert_eq!(report.error, Some(Error::SpuriousInterrupt(0)));
        assert_eq!(report.event, None);
        assert_eq!(sim.clear_writes(), vec![SPURIOUS_CLEAR_VALUE; 3]);
    }
}
