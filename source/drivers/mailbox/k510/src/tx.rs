// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! One-outstanding-message state of a TX lane.
//!
//! Every accepted submission takes a ticket. The TX-ack completes the ticket in
//! flight; a sender waits for its own ticket or gives up at the deadline, which
//! frees the lane for the next submission. The peer still owes an ack for a
//! message whose sender gave up, and that ack must not complete a newer ticket,
//! so each abandoned message is counted until its ack drains. Rebinding the lane
//! forgets the count.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::channel::ChannelId;
use crate::{Error, Result};

/// Ticket of an accepted submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

/// What a TX-ack was matched against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Ack {
    /// Completed the ticket in flight.
    Delivered,
    /// Belonged to a message whose sender timed out.
    Late,
    /// Nothing was outstanding.
    Stray,
}

#[derive(Default)]
struct TxState {
    in_flight: bool,
    submitted: u64,
    completed: u64,
    abandoned: u64,
    closed: bool,
}

pub(crate) struct TxSlot {
    state: Mutex<TxState>,
    done: Condvar,
}

impl TxSlot {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TxState { closed: true, ..TxState::default() }),
            done: Condvar::new(),
        }
    }

    /// Claims the lane, or reports `Busy` while a message is unacknowledged.
    pub(crate) fn begin(&self, channel: ChannelId) -> Result<Ticket> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::ChannelUnbound(channel));
        }
        if state.in_flight {
            return Err(Error::Busy(channel));
        }
        state.in_flight = true;
        state.submitted += 1;
        Ok(Ticket(state.submitted))
    }

    /// Matches one TX-ack. Acks owed to abandoned messages drain first, in
    /// submission order.
    pub(crate) fn complete(&self) -> Ack {
        {
            let mut state = self.state.lock();
            if state.abandoned > 0 {
                state.abandoned -= 1;
                return Ack::Late;
            }
            if !state.in_flight {
                return Ack::Stray;
            }
            state.in_flight = false;
            state.completed = state.submitted;
        }
        self.done.notify_all();
        Ack::Delivered
    }

    pub(crate) fn wait(&self, channel: ChannelId, ticket: Ticket, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.completed >= ticket.0 {
                return Ok(());
            }
            if state.closed {
                return Err(Error::Closed(channel));
            }
            if self.done.wait_until(&mut state, deadline).timed_out() {
                if state.completed >= ticket.0 {
                    return Ok(());
                }
                if state.in_flight && state.submitted == ticket.0 {
                    state.in_flight = false;
                    state.abandoned += 1;
                }
                return Err(Error::SendTimeout { channel, timeout });
            }
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.state.lock().in_flight
    }

    pub(crate) fn open(&self) {
        let mut state = self.state.lock();
        state.closed = false;
        state.in_flight = false;
        state.abandoned = 0;
    }

    pub(crate) fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.in_flight = false;
        }
        self.done.notify_all();
    }
}
