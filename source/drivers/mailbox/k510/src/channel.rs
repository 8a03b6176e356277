// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Channel identity and the fixed 16-entry channel table.
//!
//! Global indices 0..8 are TX (CPU to DSP) and 8..16 are RX (DSP to CPU). A
//! channel's *status index* is where its event latches in the DSP-to-CPU status
//! word: TX lane `n` is acknowledged at `n + 8`, RX lane `n` arrives at `n`.

use core::fmt;
use core::str::FromStr;

use parking_lot::RwLock;

use crate::regs::{Layout, RegisterBank, CPU2DSP, DSP2CPU};
use crate::{Error, Result, CHANNELS_PER_DIRECTION, CHANNEL_COUNT};

/// Which way a channel carries messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Tx,
    Rx,
}

/// Position of a channel within its direction, always `< CHANNELS_PER_DIRECTION`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Lane(u8);

impl Lane {
    pub const fn new(lane: usize) -> Option<Self> {
        if lane < CHANNELS_PER_DIRECTION {
            Some(Self(lane as u8))
        } else {
            None
        }
    }

    pub const fn get(self) -> usize {
        self.0 as usize
    }
}

/// Typed handle of a logical channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelId {
    Tx(Lane),
    Rx(Lane),
}

impl ChannelId {
    pub fn tx(lane: usize) -> Result<Self> {
        Lane::new(lane).map(Self::Tx).ok_or(Error::InvalidChannel(lane))
    }

    pub fn rx(lane: usize) -> Result<Self> {
        Lane::new(lane)
            .map(Self::Rx)
            .ok_or(Error::InvalidChannel(lane.saturating_add(CHANNELS_PER_DIRECTION)))
    }

    /// Maps a global index in `0..16` to its channel.
    pub fn from_index(index: usize) -> Result<Self> {
        if index < CHANNELS_PER_DIRECTION {
            Self::tx(index)
        } else if index < CHANNEL_COUNT {
            Self::rx(index - CHANNELS_PER_DIRECTION)
        } else {
            Err(Error::InvalidChannel(index))
        }
    }

    pub const fn index(self) -> usize {
        match self {
            Self::Tx(lane) => lane.get(),
            Self::Rx(lane) => lane.get() + CHANNELS_PER_DIRECTION,
        }
    }

    pub const fn lane(self) -> usize {
        match self {
            Self::Tx(lane) | Self::Rx(lane) => lane.get(),
        }
    }

    pub const fn direction(self) -> Direction {
        match self {
            Self::Tx(_) => Direction::Tx,
            Self::Rx(_) => Direction::Rx,
        }
    }

    /// Register bank the channel's traffic is signalled through.
    pub const fn bank(self) -> &'static RegisterBank {
        match self {
            Self::Tx(_) => &CPU2DSP,
            Self::Rx(_) => &DSP2CPU,
        }
    }

    /// Position of this channel's event in the DSP-to-CPU status word.
    pub const fn status_index(self) -> usize {
        match self {
            Self::Tx(lane) => lane.get() + CHANNELS_PER_DIRECTION,
            Self::Rx(lane) => lane.get(),
        }
    }

    /// The opposite-direction channel on the same lane.
    pub const fn paired(self) -> Self {
        match self {
            Self::Tx(lane) => Self::Rx(lane),
            Self::Rx(lane) => Self::Tx(lane),
        }
    }

    /// All sixteen channels in index order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..CHANNEL_COUNT).filter_map(|index| Self::from_index(index).ok())
    }
}

impl TryFrom<usize> for ChannelId {
    type Error = Error;

    fn try_from(index: usize) -> Result<Self> {
        Self::from_index(index)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tx(lane) => write!(f, "tx_chan_{}", lane.get()),
            Self::Rx(lane) => write!(f, "rx_chan_{}", lane.get()),
        }
    }
}

impl FromStr for ChannelId {
    type Err = Error;

    /// Parses the device-tree channel names `tx_chan_N` / `rx_chan_N`.
    fn from_str(name: &str) -> Result<Self> {
        let unknown = || Error::Config(format!("unknown channel name {name:?}"));
        let (ctor, lane): (fn(usize) -> Result<Self>, &str) =
            if let Some(lane) = name.strip_prefix("tx_chan_") {
                (Self::tx, lane)
            } else if let Some(lane) = name.strip_prefix("rx_chan_") {
                (Self::rx, lane)
            } else {
                return Err(unknown());
            };
        let lane: usize = lane.parse().map_err(|_| unknown())?;
        ctor(lane).map_err(|_| unknown())
    }
}

/// Owner of a bound channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    client: String,
}

impl Binding {
    pub fn client(&self) -> &str {
        &self.client
    }
}

/// Resolved view of one table entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub bank: &'static RegisterBank,
    pub buffer: usize,
    pub binding: Option<Binding>,
}

/// Fixed registry of the sixteen channels and their bindings.
pub struct ChannelTable {
    layout: Layout,
    bindings: RwLock<[Option<Binding>; CHANNEL_COUNT]>,
}

impl ChannelTable {
    pub fn new(layout: Layout) -> Self {
        Self { layout, bindings: RwLock::new(Default::default()) }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn buffer_addr(&self, id: ChannelId) -> usize {
        self.layout.buffer_addr(id.index())
    }

    pub fn lookup(&self, index: usize) -> Result<ChannelInfo> {
        let id = ChannelId::from_index(index)?;
        Ok(ChannelInfo {
            id,
            bank: id.bank(),
            buffer: self.buffer_addr(id),
            binding: self.binding(id),
        })
    }

    pub fn bind(&self, id: ChannelId, client: impl Into<String>) -> Result<()> {
        let mut bindings = self.bindings.write();
        let slot = &mut bindings[id.index()];
        if let Some(existing) = slot {
            return Err(Error::AlreadyBound { channel: id, client: existing.client.clone() });
        }
        *slot = Some(Binding { client: client.into() });
        Ok(())
    }

    pub fn unbind(&self, id: ChannelId) -> Option<Binding> {
        self.bindings.write()[id.index()].take()
    }

    pub fn is_bound(&self, id: ChannelId) -> bool {
        self.bindings.read()[id.index()].is_some()
    }

    pub fn binding(&self, id: ChannelId) -> Option<Binding> {
        self.bindings.read()[id.index()].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_roundtrip_covers_both_directions() {
        for index in 0..CHANNEL_COUNT {
            let id = ChannelId::from_index(index).unwrap();
            assert_eq!(id.index(), index);
            let expected = if index < 8 { Direction::Tx } else { Direction::Rx };
            assert_eq!(id.direction(), expected);
        }
        assert_eq!(ChannelId::from_index(16), Err(Error::InvalidChannel(16)));
        assert_eq!(ChannelId::rx(8), Err(Error::InvalidChannel(16)));
    }

    #[test]
    fn status_index_encodes_the_cross_pairing() {
        assert_eq!(ChannelId::tx(5).unwrap().status_index(), 13);
        assert_eq!(ChannelId::rx(5).unwrap().status_index(), 5);
        assert_eq!(ChannelId::rx(5).unwrap().index(), 13);
        assert_eq!(ChannelId::tx(5).unwrap().paired(), ChannelId::rx(5).unwrap());
    }

    #[test]
    fn names_parse_and_print() {
        for id in ChannelId::all() {
            assert_eq!(id.to_string().parse::<ChannelId>().unwrap(), id);
        }
        assert!("tx_chan_8".parse::<ChannelId>().is_err());
        assert!("rx_chan_x".parse::<ChannelId>().is_err());
        assert!("chan_0".parse::<ChannelId>().is_err());
        assert!(matches!(
            "rx_chan_18446744073709551615".parse::<ChannelId>(),
            Err(Error::Config(_))
        ));
        assert_eq!(ChannelId::rx(usize::MAX), Err(Error::InvalidChannel(usize::MAX)));
    }

    #[test]
    fn banks_follow_direction() {
        assert_eq!(ChannelId::tx(0).unwrap().bank(), &CPU2DSP);
        assert_eq!(ChannelId::rx(0).unwrap().bank(), &DSP2CPU);
    }

    #[test]
    fn binding_is_exclusive() {
        let table = ChannelTable::new(Layout::default());
        let id = ChannelId::tx(2).unwrap();
        table.bind(id, "client-a").unwrap();
        assert_eq!(
            table.bind(id, "client-b"),
            Err(Error::AlreadyBound { channel: id, client: "client-a".into() })
        );
        assert_eq!(table.unbind(id).map(|b| b.client().to_string()), Some("client-a".into()));
        assert!(!table.is_bound(id));
        assert_eq!(table.binding(id), None);
        table.bind(id, "client-b").unwrap();
        assert_eq!(table.binding(id).as_ref().map(Binding::client), Some("client-b"));
        assert_eq!(table.lookup(2).unwrap().binding.unwrap().client(), "client-b");
    }
}
