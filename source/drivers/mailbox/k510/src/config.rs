// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Driver configuration, loaded from TOML.
//!
//! ```toml
//! buffer_offset = 0x100
//! send_timeout_ms = 50
//! client = "mailbox-client"
//! channels = ["tx_chan_0", "rx_chan_0"]
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelId;
use crate::regs::{Layout, DEFAULT_BUFFER_OFFSET};
use crate::{Error, Result};

/// Time a blocking send waits for the peer's ack unless configured otherwise.
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 50;
/// Client name used for channels bound from configuration.
pub const DEFAULT_CLIENT: &str = "mailbox-client";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MailboxConfig {
    /// Start of the message-buffer window, bytes from the mailbox base.
    pub buffer_offset: usize,
    pub send_timeout_ms: u64,
    /// Owner recorded on every configured binding.
    pub client: String,
    /// Channel names (`tx_chan_N` / `rx_chan_N`) bound at construction.
    pub channels: Vec<String>,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            buffer_offset: DEFAULT_BUFFER_OFFSET,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            client: DEFAULT_CLIENT.to_string(),
            channels: ChannelId::all().map(|id| id.to_string()).collect(),
        }
    }
}

impl MailboxConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.layout().validate()?;
        if self.send_timeout_ms == 0 {
            return Err(Error::Config("send_timeout_ms must be non-zero".into()));
        }
        self.channel_ids().map(|_| ())
    }

    pub fn layout(&self) -> Layout {
        Layout::new(self.buffer_offset)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Parsed channel list; duplicates are rejected.
    pub fn channel_ids(&self) -> Result<Vec<ChannelId>> {
        let mut seen = HashSet::new();
        self.channels
            .iter()
            .map(|name| {
                let id: ChannelId = name.parse()?;
                if !seen.insert(id) {
                    return Err(Error::Config(format!("channel {name} listed twice")));
                }
                Ok(id)
            })
            .collect()
    }
}
