// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hand-off of received messages from interrupt context to consumers.
//!
//! Each RX lane owns a `PendingReceipt` behind its own lock and condition
//! variable. The interrupt path stores the bytes and sets `ready` under the
//! lock; a consumer copies the bytes and clears `ready` under the same lock, so
//! a reader that sees `ready` also sees the whole message. Waits release the
//! lock while parked.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::channel::ChannelId;
use crate::irq::Event;
use crate::{Error, Message, Result, Wait, CHANNELS_PER_DIRECTION, MESSAGE_LEN};

/// Callback invoked from interrupt context. Must not block.
pub type Listener = Arc<dyn Fn(Event) + Send + Sync>;

/// Handle returned by listener registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct PendingReceipt {
    buffer: Message,
    ready: bool,
    closed: bool,
}

struct RxSlot {
    receipt: Mutex<PendingReceipt>,
    arrived: Condvar,
}

impl RxSlot {
    fn new() -> Self {
        Self {
            receipt: Mutex::new(PendingReceipt { buffer: [0; MESSAGE_LEN], ready: false, closed: true }),
            arrived: Condvar::new(),
        }
    }
}

struct ListenerEntry {
    id: ListenerId,
    channel: ChannelId,
    callback: Listener,
}

pub(crate) struct Bridge {
    rx: [RxSlot; CHANNELS_PER_DIRECTION],
    listeners: RwLock<Vec<ListenerEntry>>,
    next_listener: AtomicU64,
}

impl Bridge {
    pub(crate) fn new() -> Self {
        Self {
            rx: core::array::from_fn(|_| RxSlot::new()),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Stores an arrival and wakes waiters. Returns `true` when an unread
    /// message was overwritten.
    pub(crate) fn deliver(&self, channel: ChannelId, message: &Message) -> bool {
        let slot = &self.rx[channel.lane()];
        let overwrote = {
            let mut receipt = slot.receipt.lock();
            let overwrote = receipt.ready;
            receipt.buffer = *message;
            receipt.ready = true;
            overwrote
        };
        slot.arrived.notify_all();
        overwrote
    }

    /// Takes the pending message, waiting as `wait` allows.
    pub(crate) fn take(&self, channel: ChannelId, wait: Wait) -> Result<Message> {
        let slot = &self.rx[channel.lane()];
        let deadline = wait.timeout().map(|timeout| Instant::now() + timeout);
        let mut receipt = slot.receipt.lock();
        loop {
            if receipt.ready {
                receipt.ready = false;
                return Ok(receipt.buffer);
            }
            if receipt.closed {
                return Err(Error::Closed(channel));
            }
            if wait.is_non_blocking() {
                return Err(Error::WouldBlock(channel));
            }
            match deadline {
                None => slot.arrived.wait(&mut receipt),
                Some(deadline) => {
                    let timed_out = slot.arrived.wait_until(&mut receipt, deadline).timed_out();
                    if timed_out && !receipt.ready {
                        return Err(Error::ReceiveTimeout(channel));
                    }
                }
            }
        }
    }

    pub(crate) fn poll_ready(&self, channel: ChannelId) -> bool {
        self.rx[channel.lane()].receipt.lock().ready
    }

    pub(crate) fn open(&self, channel: ChannelId) {
        let mut receipt = self.rx[channel.lane()].receipt.lock();
        receipt.closed = false;
        receipt.ready = false;
    }

    /// Marks the lane closed and wakes every waiter with `Closed`.
    pub(crate) fn close(&self, channel: ChannelId) {
        let slot = &self.rx[channel.lane()];
        {
            let mut receipt = slot.receipt.lock();
            receipt.closed = true;
            receipt.ready = false;
        }
        slot.arrived.notify_all();
    }

    pub(crate) fn register(&self, channel: ChannelId, callback: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push(ListenerEntry { id, channel, callback });
        id
    }

    pub(crate) fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        listeners.len() != before
    }

    /// Calls every listener of the event's channel. The registry lock is
    /// released before any callback runs.
    pub(crate) fn fan_out(&self, event: Event) -> usize {
        let targets: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .filter(|entry| entry.channel == event.channel())
            .map(|entry| Arc::clone(&entry.callback))
            .collect();
        for callback in &targets {
            callback(event);
        }
        targets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    fn rx(lane: usize) -> ChannelId {
        ChannelId::rx(lane).unwrap()
    }

    fn open_bridge(lanes: &[usize]) -> Bridge {
        let bridge = Bridge::new();
        for &lane in lanes {
            bridge.open(rx(lane));
        }
        bridge
    }

    #[test]
    fn ready_flags_are_per_channel() {
        let bridge = open_bridge(&[1, 2]);
        bridge.deliver(rx(1), &[7; MESSAGE_LEN]);
        assert!(bridge.poll_ready(rx(1)));
        assert!(!bridge.poll_ready(rx(2)));
        assert_eq!(bridge.take(rx(2), Wait::NonBlocking), Err(Error::WouldBlock(rx(2))));
    }

    #[test]
    fn take_consumes_exactly_once() {
        let bridge = open_bridge(&[0]);
        assert!(!bridge.deliver(rx(0), &[1; MESSAGE_LEN]));
        assert_eq!(bridge.take(rx(0), Wait::NonBlocking), Ok([1; MESSAGE_LEN]));
        assert!(!bridge.poll_ready(rx(0)));
        assert_eq!(bridge.take(rx(0), Wait::NonBlocking), Err(Error::WouldBlock(rx(0))));
    }

    #[test]
    fn second_delivery_reports_overwrite() {
        let bridge = open_bridge(&[3]);
        bridge.deliver(rx(3), &[1; MESSAGE_LEN]);
        assert!(bridge.deliver(rx(3), &[2; MESSAGE_LEN]));
        assert_eq!(bridge.take(rx(3), Wait::NonBlocking), Ok([2; MESSAGE_LEN]));
    }

    #[test]
    fn bounded_wait_expires() {
        let bridge = open_bridge(&[4]);
        let started = Instant::now();
        let err = bridge.take(rx(4), Wait::Timeout(Duration::from_millis(20))).unwrap_err();
        assert_eq!(err, Error::ReceiveTimeout(rx(4)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn close_wakes_blocked_reader() {
        let bridge = Arc::new(open_bridge(&[5]));
        let reader = {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || bridge.take(rx(5), Wait::Blocking))
        };
        thread::sleep(Duration::from_millis(20));
        bridge.close(rx(5));
        assert_eq!(reader.join().unwrap(), Err(Error::Closed(rx(5))));
    }

    #[test]
    fn listeners_only_see_their_channel() {
        let bridge = Bridge::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = {
            let hits = Arc::clone(&hits);
            bridge.register(rx(6), Arc::new(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            }))
        };
        assert_eq!(bridge.fan_out(Event::Arrived(rx(6))), 1);
        assert_eq!(bridge.fan_out(Event::Arrived(rx(7))), 0);
        assert!(bridge.unregister(id));
        assert!(!bridge.unregister(id));
        assert_eq!(bridge.fan_out(Event::Arrived(rx(6))), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
