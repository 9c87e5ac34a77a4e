//! Session configuration

use std::time::Duration;

use crate::codec::{additive_checksum, ChecksumFn, CommandTable, FrameCodec};

/// Device constants and timing for a [`Session`](crate::Session).
///
/// The defaults match a TR3 reader on its factory address.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub address: u8,
    pub commands: CommandTable,
    pub checksum: ChecksumFn,
    /// Upper bound for version, mode and buzzer exchanges
    pub response_timeout: Duration,
    /// Upper bound for one inventory exchange
    pub inventory_timeout: Duration,
    /// Inventory ends early once UIDs stop arriving for this long
    pub settle_window: Duration,
    /// Pause between controller cycles
    pub cycle_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: 0x00,
            commands: CommandTable::TR3,
            checksum: additive_checksum,
            response_timeout: Duration::from_millis(600),
            inventory_timeout: Duration::from_millis(2000),
            settle_window: Duration::from_millis(120),
            cycle_interval: Duration::from_millis(100),
        }
    }
}

impl SessionConfig {
    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    pub fn with_commands(mut self, commands: CommandTable) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_checksum(mut self, checksum: ChecksumFn) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_inventory_timeout(mut self, timeout: Duration) -> Self {
        self.inventory_timeout = timeout;
        self
    }

    pub fn with_settle_window(mut self, window: Duration) -> Self {
        self.settle_window = window;
        self
    }

    pub fn with_cycle_interval(mut self, interval: Duration) -> Self {
        self.cycle_interval = interval;
        self
    }

    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.address, self.commands, self.checksum)
    }
}
