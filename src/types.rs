//! This module defines range-checked types for EMS bus addresses and the
//! driver operating mode, meant to simplify correct usage of the API.

use snafu::{ensure, OptionExt, Snafu};

use core::convert::{TryFrom, TryInto};
use core::fmt;
use core::ops::Deref;

/// Error type for this module
#[derive(Debug, Snafu, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The value isn't a valid 7-bit bus address.
    #[snafu(display("Invalid address"))]
    InvalidAddress,
    /// The address can't be used as the address of this device.
    #[snafu(display("Invalid device address {:#04x}", address))]
    InvalidDevice { address: u8 },
}

const fn invalid_address() -> InvalidAddressSnafu {
    InvalidAddressSnafu
}

/// Bit 7 of the destination octet marks a read request, and of a
/// single-octet frame a poll request.
pub(crate) const READ_FLAG: u8 = 0x80;

/// Write reply codes. These never appear as device addresses.
pub const WRITE_ACK: u8 = 0x01;
pub const WRITE_NAK: u8 = 0x04;

/// Address is a range-checked [0x00, 0x7f] integer, representing a bus participant.
///
/// Address 0x00 is the broadcast address.
///
/// ## Example
/// ```
/// use emsbus_proto::Address;
/// use std::convert::TryInto;
/// let boiler = Address::new(0x08).unwrap();
/// let thermostat: Address = 0x10.try_into().unwrap();
/// assert!(Address::new(0x80).is_err());
/// ```
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct Address(u8);

/// Create a new [`Address`], panics if it is out of range.
pub const fn addr(a: u8) -> Address {
    if a <= 0x7f {
        return Address(a);
    }
    panic!("Invalid address.")
}

impl Address {
    /// The broadcast address.
    pub const BROADCAST: Address = Address(0x00);

    /// Create a new address, checking that the address is in \[0x00, 0x7f\].
    /// # Errors
    /// Returns [`Error::InvalidAddress`] if `address` is out of range.
    pub fn new(address: impl TryInto<u8>) -> Result<Self, Error> {
        let address = address.try_into().ok().with_context(invalid_address)?;
        ensure!(address <= 0x7f, invalid_address());
        Ok(Self(address))
    }

    /// Strip the read-request flag from a destination or poll octet.
    pub(crate) const fn from_octet(octet: u8) -> Self {
        Self(octet & !READ_FLAG)
    }

    /// Returns true for the broadcast address 0x00.
    pub const fn is_broadcast(self) -> bool {
        self.0 == 0
    }

    /// The octet a bus master sends to poll this address.
    pub const fn poll_octet(self) -> u8 {
        self.0 | READ_FLAG
    }

    /// Validate that this address may be used by a participating device.
    /// # Errors
    /// Returns [`Error::InvalidDevice`] for the broadcast address and for the
    /// values used as write reply codes.
    pub fn check_device(self) -> Result<Self, Error> {
        ensure!(
            !self.is_broadcast() && self.0 != WRITE_ACK && self.0 != WRITE_NAK,
            InvalidDeviceSnafu { address: self.0 }
        );
        Ok(self)
    }
}

impl Deref for Address {
    type Target = u8;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PartialEq<u8> for Address {
    fn eq(&self, other: &u8) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Trait to convert `T: TryInto<u8>` into an [`Address`].
pub trait IntoAddress {
    /// Convert self to an Address.
    /// # Errors
    /// Returns `Error:InvalidAddress` if self isn't a valid address.
    fn into_address(self) -> Result<Address, Error>;
}

impl IntoAddress for Address {
    fn into_address(self) -> Result<Address, Error> {
        Ok(self)
    }
}

impl<T> IntoAddress for T
where
    T: TryInto<u8>,
{
    fn into_address(self) -> Result<Address, Error> {
        Address::new(self)
    }
}

impl TryFrom<usize> for Address {
    type Error = Error;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// How the driver takes part in bus traffic.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Read-only: every valid frame is forwarded, nothing is ever transmitted.
    Monitor,
    /// Only frames for this device and broadcasts are forwarded; queued frames
    /// are transmitted when this device is polled.
    Participate,
    /// Forward every frame like `Monitor`, transmit like `Participate`.
    Mixed,
}

impl Mode {
    /// Returns true if frames addressed to other devices are forwarded.
    pub const fn forwards_all(self) -> bool {
        matches!(self, Mode::Monitor | Mode::Mixed)
    }

    /// Returns true if this mode may write to the bus.
    pub const fn transmits(self) -> bool {
        matches!(self, Mode::Participate | Mode::Mixed)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Monitor => "Monitor",
            Mode::Participate => "Participate",
            Mode::Mixed => "Participate & monitor",
        })
    }
}
