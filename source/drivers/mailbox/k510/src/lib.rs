// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: CPU-side driver for the K510 CPU/DSP hardware mailbox
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests per module, integration tests in tests/
//!
//! PUBLIC API:
//!   - Mailbox: channel binding, send/receive, interrupt dispatch
//!   - ChannelId / ChannelTable: the 8 TX + 8 RX channel descriptors
//!   - MailboxConfig: TOML configuration
//!   - Request: character-device request numbers
//!   - Event / IrqReport: interrupt outcomes delivered to listeners and callers
//!   - sim::SimMailbox (feature `sim`): simulated block and DSP peer
//!
//! DEPENDENCIES:
//!   - nexus-hal: register access through `Bus`
//!   - parking_lot: lane state and wakeups
//!   - thiserror / log / serde / toml: errors, logging, configuration
//!
//! Each direction owns 8 lanes of one 32-byte message. Channel indices 0..8
//! are TX, 8..16 are RX. The DSP-to-CPU status word carries one two-bit pair
//! per status index: index `n < 8` signals an arrival on RX lane `n`, index
//! `n >= 8` acknowledges TX lane `n - 8`.

#![forbid(unsafe_code)]

use core::time::Duration;

pub mod channel;
pub mod command;
pub mod config;
pub mod error;
pub mod irq;
pub mod mailbox;
pub mod notify;
pub mod regs;
#[cfg(feature = "sim")]
pub mod sim;
pub mod tx;

pub use channel::{Binding, ChannelId, ChannelInfo, ChannelTable, Direction, Lane};
pub use command::Request;
pub use config::MailboxConfig;
pub use error::{Error, Result};
pub use irq::{Event, IrqReport};
pub use mailbox::Mailbox;
pub use notify::{Listener, ListenerId};
pub use regs::Layout;
pub use tx::Ticket;

/// Lanes per direction.
pub const CHANNELS_PER_DIRECTION: usize = 8;
/// Total channel descriptors (TX then RX).
pub const CHANNEL_COUNT: usize = 2 * CHANNELS_PER_DIRECTION;
/// Size of one mailbox message in bytes.
pub const MESSAGE_LEN: usize = 32;

/// One mailbox message.
pub type Message = [u8; MESSAGE_LEN];

/// Wait behaviour for receive operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    /// Block until a message arrives or the channel is unbound.
    Blocking,
    /// Return immediately if no message is pending.
    NonBlocking,
    /// Block until either a message arrives or the timeout expires.
    Timeout(Duration),
}

impl Wait {
    /// Returns `true` when the caller requested a non-blocking attempt.
    pub const fn is_non_blocking(self) -> bool {
        matches!(self, Self::NonBlocking)
    }

    /// Converts a [`Wait::Timeout`] variant into its [`Duration`].
    pub const fn timeout(self) -> Option<Duration> {
        match self {
            Self::Timeout(duration) => Some(duration),
            Self::Blocking | Self::NonBlocking => None,
        }
    }
}
