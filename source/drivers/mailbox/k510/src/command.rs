// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Request numbers of the character-device transport.
//!
//! Lane `n` is addressed as `_IOW('m', n, unsigned long)` for a send and
//! `_IOR('m', n, unsigned long)` for a receive, in the generic Linux ioctl
//! encoding `dir << 30 | size << 16 | type << 8 | nr`.

use crate::channel::{ChannelId, Direction};
use crate::{Error, Result, CHANNELS_PER_DIRECTION};

const IOC_NRBITS: u32 = 8;
const IOC_TYPEBITS: u32 = 8;
const IOC_SIZEBITS: u32 = 14;

const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;

const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

/// Ioctl type byte of the mailbox device.
pub const MAILBOX_IOC_MAGIC: u8 = b'm';
/// Argument size encoded in every request (`unsigned long` on the 64-bit host).
pub const MAILBOX_IOC_ARG_SIZE: u32 = 8;

const fn ioc(dir: u32, nr: u32) -> u32 {
    (dir << IOC_DIRSHIFT)
        | (MAILBOX_IOC_ARG_SIZE << IOC_SIZESHIFT)
        | ((MAILBOX_IOC_MAGIC as u32) << IOC_TYPESHIFT)
        | (nr << IOC_NRSHIFT)
}

/// A decoded mailbox request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Request {
    /// Copy a caller message out on a TX channel.
    Send(ChannelId),
    /// Copy the pending message of an RX channel to the caller.
    Receive(ChannelId),
}

impl Request {
    pub fn decode(cmd: u32) -> Result<Self> {
        let nr = (cmd >> IOC_NRSHIFT) & ((1 << IOC_NRBITS) - 1);
        let ty = (cmd >> IOC_TYPESHIFT) & ((1 << IOC_TYPEBITS) - 1);
        let size = (cmd >> IOC_SIZESHIFT) & ((1 << IOC_SIZEBITS) - 1);
        let dir = cmd >> IOC_DIRSHIFT;
        if ty != MAILBOX_IOC_MAGIC as u32
            || size != MAILBOX_IOC_ARG_SIZE
            || nr as usize >= CHANNELS_PER_DIRECTION
        {
            return Err(Error::UnknownCommand(cmd));
        }
        let lane = nr as usize;
        match dir {
            IOC_WRITE => ChannelId::tx(lane).map(Self::Send),
            IOC_READ => ChannelId::rx(lane).map(Self::Receive),
            _ => Err(Error::UnknownCommand(cmd)),
        }
    }

    pub fn encode(self) -> u32 {
        match self {
            Self::Send(id) => ioc(IOC_WRITE, id.lane() as u32),
            Self::Receive(id) => ioc(IOC_READ, id.lane() as u32),
        }
    }

    pub fn channel(self) -> ChannelId {
        match self {
            Self::Send(id) | Self::Receive(id) => id,
        }
    }

    /// Builds the request that matches a channel's direction.
    pub fn for_channel(id: ChannelId) -> Self {
        match id.direction() {
            Direction::Tx => Self::Send(id),
            Direction::Rx => Self::Receive(id),
        }
    }
}
