// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::channel::ChannelId;

/// Result alias for mailbox operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors produced by the mailbox driver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Channel index is out of range or names the wrong direction for the operation.
    #[error("invalid channel index {0}")]
    InvalidChannel(usize),
    /// No client is attached to the channel.
    #[error("{0} has no bound client")]
    ChannelUnbound(ChannelId),
    /// Another client already owns the channel.
    #[error("{channel} already bound to {client}")]
    AlreadyBound { channel: ChannelId, client: String },
    /// The previous message on the channel has not been acknowledged yet.
    #[error("{0} busy: previous message not acknowledged")]
    Busy(ChannelId),
    /// The peer never acknowledged the message.
    #[error("peer did not acknowledge {channel} within {timeout:?}")]
    SendTimeout { channel: ChannelId, timeout: Duration },
    /// Non-blocking receive found nothing pending.
    #[error("no message pending on {0}")]
    WouldBlock(ChannelId),
    /// Bounded receive expired without an arrival.
    #[error("timed out waiting for a message on {0}")]
    ReceiveTimeout(ChannelId),
    /// The channel was unbound while the caller waited on it.
    #[error("{0} closed")]
    Closed(ChannelId),
    /// Caller buffer has the wrong size for a message.
    #[error("copy fault: expected {expected} bytes, caller supplied {actual}")]
    CopyFault { expected: usize, actual: usize },
    /// Status register decoded to no channel.
    #[error("spurious interrupt (status {0:#010x})")]
    SpuriousInterrupt(u32),
    /// Request number does not encode a mailbox command.
    #[error("unknown mailbox command {0:#010x}")]
    UnknownCommand(u32),
    /// Configuration or layout rejected.
    #[error("invalid configuration: {0}")]
    Config(String),
}
