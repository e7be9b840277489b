//! Driver configuration.

use std::time::Duration;

use snafu::{ensure, ResultExt, Snafu};

use crate::frame::Checksum;
use crate::types::{self, Address, IntoAddress, Mode};

/// Error type for this module
#[derive(Debug, Snafu, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Invalid device address: {}", source))]
    Device { source: types::Error },
    #[snafu(display("Inbox capacity must be at least one frame"))]
    InboxCapacity,
}

/// Settings shared by the bus session and the application session.
#[derive(Debug, Clone, PartialEq)]
pub struct BusConfig {
    device: Address,
    mode: Mode,
    checksum: Checksum,
    poll_reply: bool,
    max_retries: u8,
    inbox_capacity: usize,
    idle_timeout: Duration,
    exchange_timeout: Duration,
}

impl BusConfig {
    pub const DEFAULT_MAX_RETRIES: u8 = 3;
    pub const DEFAULT_INBOX_CAPACITY: usize = 32;
    pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(500);
    pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_millis(125);

    /// Configuration for the device with bus address `device`, in participate
    /// mode with default settings.
    /// # Errors
    /// [`Error::Device`] if `device` is not a usable device address.
    ///
    /// ```
    /// use emsbus_proto::{BusConfig, Mode};
    /// let config = BusConfig::new(0x0b).unwrap().with_mode(Mode::Mixed);
    /// assert_eq!(config.device(), 0x0b);
    /// assert!(BusConfig::new(0x00).is_err());
    /// ```
    pub fn new(device: impl IntoAddress) -> Result<Self, Error> {
        let device = device
            .into_address()
            .and_then(Address::check_device)
            .context(DeviceSnafu)?;
        Ok(Self {
            device,
            mode: Mode::Participate,
            checksum: Checksum::default(),
            poll_reply: true,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            inbox_capacity: Self::DEFAULT_INBOX_CAPACITY,
            idle_timeout: Self::DEFAULT_IDLE_TIMEOUT,
            exchange_timeout: Self::DEFAULT_EXCHANGE_TIMEOUT,
        })
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = checksum;
        self
    }

    /// Answer polls with a poll reply when there is nothing to send.
    pub fn with_poll_reply(mut self, poll_reply: bool) -> Self {
        self.poll_reply = poll_reply;
        self
    }

    /// Collisions tolerated on one frame before it is dropped.
    pub fn with_max_retries(mut self, max_retries: u8) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Number of delivered frames kept for later reads.
    /// # Errors
    /// [`Error::InboxCapacity`] for a zero capacity.
    pub fn with_inbox_capacity(mut self, capacity: usize) -> Result<Self, Error> {
        ensure!(capacity > 0, InboxCapacitySnafu);
        self.inbox_capacity = capacity;
        Ok(self)
    }

    /// Bus silence after which a partial frame is dropped and a pending read fails.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Bus silence after which a read or write request is taken to be unanswered.
    pub fn with_exchange_timeout(mut self, exchange_timeout: Duration) -> Self {
        self.exchange_timeout = exchange_timeout;
        self
    }

    pub fn device(&self) -> Address {
        self.device
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    pub fn poll_reply(&self) -> bool {
        self.poll_reply
    }

    pub fn max_retries(&self) -> u8 {
        self.max_retries
    }

    pub fn inbox_capacity(&self) -> usize {
        self.inbox_capacity
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn exchange_timeout(&self) -> Duration {
        self.exchange_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BusConfig::new(0x0b).unwrap();
        assert_eq!(config.device(), 0x0b);
        assert_eq!(config.mode(), Mode::Participate);
        assert_eq!(config.checksum(), Checksum::Ems);
        assert!(config.poll_reply());
        assert_eq!(config.max_retries(), 3);
        assert_eq!(config.inbox_capacity(), 32);
        assert!(config.exchange_timeout() < config.idle_timeout());
    }

    #[test]
    fn test_invalid_settings() {
        assert_eq!(
            BusConfig::new(0x01),
            Err(Error::Device {
                source: types::Error::InvalidDevice { address: 1 }
            })
        );
        assert_eq!(
            BusConfig::new(0x80),
            Err(Error::Device {
                source: types::Error::InvalidAddress
            })
        );
        let config = BusConfig::new(0x0b).unwrap();
        assert_eq!(
            config.with_inbox_capacity(0),
            Err(Error::InboxCapacity)
        );
    }
}
