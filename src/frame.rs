//! EMS bus frames.
//!
//! A data frame on the wire looks like
//!
//! ```text
//! [source] [destination] [type] [offset] [data ...] [checksum] <BREAK>
//! ```
//!
//! Poll requests, poll replies and write replies are a single octet followed
//! by a break, and carry no checksum.
//!
//! [`Frame`] holds everything but the checksum. [`WireFrame`] is the
//! immutable on-wire form with the checksum appended.

use arrayvec::ArrayVec;
use core::fmt;
use core::ops::Deref;
use snafu::{ensure, Snafu};

use crate::types::{Address, READ_FLAG, WRITE_ACK, WRITE_NAK};

/// Largest frame, excluding the checksum.
pub const MAX_FRAME: usize = 34;
/// Smallest data frame, excluding the checksum.
pub const MIN_FRAME: usize = 4;
/// Size of the header: source, destination, type and offset.
pub const HEADER: usize = 4;

pub(crate) const SOURCE: usize = 0;
pub(crate) const DESTINATION: usize = 1;
pub(crate) const TYPE: usize = 2;
pub(crate) const OFFSET: usize = 3;

/// Type octets from 0xf0 up announce the EMS+ format.
const EMS_PLUS: u8 = 0xf0;

/// Error type for this module
#[derive(Debug, Snafu, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Frame of {} octets is too short", len))]
    TooShort { len: usize },
    #[snafu(display("Frame of {} octets is too long", len))]
    TooLong { len: usize },
    #[snafu(display("Checksum mismatch: received {:#04x}, computed {:#04x}", received, computed))]
    ChecksumMismatch { received: u8, computed: u8 },
}

/// Checksum algorithm used on the bus.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Checksum {
    /// The EMS algorithm: shift left, folding bit 7 back in with mask 0x0c,
    /// then xor the octet.
    Ems,
    /// Plain xor of all octets.
    Xor,
    /// Sum of all octets modulo 256.
    Additive,
}

impl Default for Checksum {
    fn default() -> Self {
        Checksum::Ems
    }
}

impl Checksum {
    /// Compute the checksum over `data`, which must not include the checksum octet.
    pub fn compute(self, data: &[u8]) -> u8 {
        match self {
            Checksum::Ems => data.iter().fold(0u8, |crc, &octet| {
                let crc = if crc & 0x80 != 0 {
                    ((crc ^ 0x0c) << 1) | 0x01
                } else {
                    crc << 1
                };
                crc ^ octet
            }),
            Checksum::Xor => data.iter().fold(0, |crc, &octet| crc ^ octet),
            Checksum::Additive => data.iter().fold(0u8, |crc, &octet| crc.wrapping_add(octet)),
        }
    }

    /// Check a frame whose last octet is the checksum.
    pub fn verify(self, frame: &[u8]) -> Result<(), Error> {
        ensure!(frame.len() >= 2, TooShortSnafu { len: frame.len() });
        let (data, received) = frame.split_at(frame.len() - 1);
        let computed = self.compute(data);
        ensure!(
            computed == received[0],
            ChecksumMismatchSnafu {
                received: received[0],
                computed
            }
        );
        Ok(())
    }
}

pub(crate) type FrameBytes = ArrayVec<u8, MAX_FRAME>;
pub(crate) type WireBytes = ArrayVec<u8, { MAX_FRAME + 1 }>;

/// A frame without its checksum.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Frame {
    data: FrameBytes,
}

impl Frame {
    /// Build a data frame. `payload` starts with the offset octet.
    /// # Errors
    /// [`Error::TooShort`] if the payload is empty, [`Error::TooLong`] if the
    /// frame exceeds [`MAX_FRAME`] octets.
    pub fn new(source: Address, destination: u8, frame_type: u8, payload: &[u8]) -> Result<Self, Error> {
        let len = 3 + payload.len();
        ensure!(len >= MIN_FRAME, TooShortSnafu { len });
        ensure!(len <= MAX_FRAME, TooLongSnafu { len });
        let mut data = FrameBytes::new();
        data.push(*source);
        data.push(destination);
        data.push(frame_type);
        data.try_extend_from_slice(payload)
            .map_err(|_| Error::TooLong { len })?;
        Ok(Self { data })
    }

    /// A read request for `length` octets from `offset` of register block `frame_type`.
    pub fn read_request(
        source: Address,
        destination: Address,
        frame_type: u8,
        offset: u8,
        length: u8,
    ) -> Result<Self, Error> {
        Self::new(source, destination.poll_octet(), frame_type, &[offset, length])
    }

    /// A write request (or unsolicited read reply) carrying `data` at `offset`.
    pub fn write_request(
        source: Address,
        destination: Address,
        frame_type: u8,
        offset: u8,
        data: &[u8],
    ) -> Result<Self, Error> {
        let mut payload = ArrayVec::<u8, MAX_FRAME>::new();
        payload.push(offset);
        payload
            .try_extend_from_slice(data)
            .map_err(|_| Error::TooLong { len: data.len() + HEADER })?;
        Self::new(source, *destination, frame_type, &payload)
    }

    /// A single-octet frame: poll request, poll reply or write reply.
    pub fn single(octet: u8) -> Self {
        let mut data = FrameBytes::new();
        data.push(octet);
        Self { data }
    }

    /// Wrap raw octets received from the bus, checksum already removed.
    pub(crate) fn from_received(data: &[u8]) -> Result<Self, Error> {
        ensure!(!data.is_empty(), TooShortSnafu { len: 0usize });
        let mut bytes = FrameBytes::new();
        bytes
            .try_extend_from_slice(data)
            .map_err(|_| Error::TooLong { len: data.len() })?;
        Ok(Self { data: bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_single(&self) -> bool {
        self.data.len() == 1
    }

    pub fn source(&self) -> Address {
        Address::from_octet(self.data[SOURCE])
    }

    /// The destination with the read flag stripped. `None` for single-octet frames.
    pub fn destination(&self) -> Option<Address> {
        self.data.get(DESTINATION).map(|&d| Address::from_octet(d))
    }

    pub fn frame_type(&self) -> Option<u8> {
        self.data.get(TYPE).copied()
    }

    /// Register offset of the first data octet.
    pub fn offset(&self) -> Option<u8> {
        self.data.get(OFFSET).copied()
    }

    /// The data block following the offset octet.
    pub fn data(&self) -> &[u8] {
        self.data.get(HEADER..).unwrap_or(&[])
    }

    /// Everything after the type octet, starting with the offset.
    pub fn payload(&self) -> &[u8] {
        self.data.get(OFFSET..).unwrap_or(&[])
    }

    pub fn is_read_request(&self) -> bool {
        !self.is_single() && self.data[DESTINATION] & READ_FLAG != 0
    }

    pub fn is_ems_plus(&self) -> bool {
        self.frame_type().map_or(false, |t| t >= EMS_PLUS)
    }

    /// Append the checksum, producing the on-wire form.
    /// Single-octet frames are sent as they are.
    pub fn to_wire(&self, checksum: Checksum) -> WireFrame {
        let mut bytes = WireBytes::new();
        bytes.extend(self.data.iter().copied());
        if !self.is_single() {
            bytes.push(checksum.compute(&self.data));
        }
        WireFrame { bytes }
    }

    /// Classify the frame by its first octets, see [`FrameKind`].
    pub fn kind(&self) -> FrameKind {
        let first = self.data[SOURCE];
        if self.is_single() {
            if first & READ_FLAG != 0 {
                FrameKind::PollRequest(Address::from_octet(first))
            } else if first == WRITE_ACK || first == WRITE_NAK {
                FrameKind::WriteReply(first == WRITE_ACK)
            } else {
                FrameKind::PollReply(Address::from_octet(first))
            }
        } else {
            let destination = self.data[DESTINATION];
            if destination == 0 {
                FrameKind::Broadcast
            } else if destination & READ_FLAG != 0 {
                FrameKind::ReadRequest
            } else {
                FrameKind::ReplyOrWrite
            }
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame[")?;
        for (i, octet) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02x}", octet)?;
        }
        write!(f, "]")
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

/// The kind of a frame, as far as it can be told from the frame alone.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// The bus master invites the given device to transmit.
    PollRequest(Address),
    /// A device answers a poll with nothing to send.
    PollReply(Address),
    /// Answer to a write request, `true` for success.
    WriteReply(bool),
    /// Destination with bit 7 set.
    ReadRequest,
    /// Destination 0x00, an unsolicited read reply.
    Broadcast,
    /// A read reply to a specific device or a write request. The two can only
    /// be told apart from the preceding traffic.
    ReplyOrWrite,
}

/// A frame with its checksum appended, ready to be written to the bus.
#[derive(Clone, PartialEq, Eq)]
pub struct WireFrame {
    bytes: WireBytes,
}

impl WireFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Deref for WireFrame {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.bytes
    }
}

impl fmt::Debug for WireFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.bytes.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::addr;

    const SAMPLE: [u8; 6] = [0x08, 0x0b, 0x18, 0x00, 0x01, 0x02];

    #[test]
    fn test_checksum_reference() {
        // Worked by hand: 08 -> 10^0b=1b -> 36^18=2e -> 5c^00=5c -> b8^01=b9
        // -> b9 has bit 7: ((b9^0c)<<1)|1 = 6b, 6b^02 = 69
        assert_eq!(Checksum::Ems.compute(&SAMPLE), 0x69);
        assert_eq!(Checksum::Xor.compute(&SAMPLE), 0x18);
        assert_eq!(Checksum::Additive.compute(&SAMPLE), 0x2e);
    }

    #[test]
    fn test_single_octet_corruption_is_detected() {
        for &algorithm in [Checksum::Ems, Checksum::Xor, Checksum::Additive].iter() {
            let mut wire = SAMPLE.to_vec();
            wire.push(algorithm.compute(&SAMPLE));
            assert!(algorithm.verify(&wire).is_ok());
            for pos in 0..SAMPLE.len() {
                for flip in [0x01u8, 0x10, 0x80, 0xff].iter() {
                    let mut corrupt = wire.clone();
                    corrupt[pos] ^= flip;
                    assert!(
                        algorithm.verify(&corrupt).is_err(),
                        "{:?} missed corruption at {}",
                        algorithm,
                        pos
                    );
                }
            }
        }
    }

    #[test]
    fn test_frame_wire_form() {
        let frame = Frame::new(addr(0x08), 0x0b, 0x18, &[0x00, 0x01, 0x02]).unwrap();
        assert_eq!(frame.as_bytes(), &SAMPLE);
        assert_eq!(frame.source(), addr(0x08));
        assert_eq!(frame.destination(), Some(addr(0x0b)));
        assert_eq!(frame.frame_type(), Some(0x18));
        assert_eq!(frame.offset(), Some(0));
        assert_eq!(frame.data(), &[0x01, 0x02]);
        assert_eq!(frame.payload(), &[0x00, 0x01, 0x02]);
        let wire = frame.to_wire(Checksum::Ems);
        assert_eq!(wire.as_bytes(), &[0x08, 0x0b, 0x18, 0x00, 0x01, 0x02, 0x69]);

        let poll = Frame::single(0x8b);
        assert_eq!(poll.to_wire(Checksum::Ems).as_bytes(), &[0x8b]);
    }

    #[test]
    fn test_frame_limits() {
        assert_eq!(
            Frame::new(addr(0x0b), 0x08, 0x18, &[]),
            Err(Error::TooShort { len: 3 })
        );
        assert!(Frame::new(addr(0x0b), 0x08, 0x18, &[0; 31]).is_ok());
        assert_eq!(
            Frame::new(addr(0x0b), 0x08, 0x18, &[0; 32]),
            Err(Error::TooLong { len: 35 })
        );
    }

    #[test]
    fn test_frame_kind() {
        assert_eq!(Frame::single(0x8b).kind(), FrameKind::PollRequest(addr(0x0b)));
        assert_eq!(Frame::single(0x0b).kind(), FrameKind::PollReply(addr(0x0b)));
        assert_eq!(Frame::single(0x01).kind(), FrameKind::WriteReply(true));
        assert_eq!(Frame::single(0x04).kind(), FrameKind::WriteReply(false));

        let request = Frame::read_request(addr(0x0b), addr(0x08), 0x18, 0, 20).unwrap();
        assert_eq!(request.as_bytes(), &[0x0b, 0x88, 0x18, 0x00, 0x14]);
        assert_eq!(request.kind(), FrameKind::ReadRequest);
        assert!(request.is_read_request());
        assert_eq!(request.destination(), Some(addr(0x08)));

        let broadcast = Frame::new(addr(0x10), 0x00, 0x06, &[0x00, 0x12]).unwrap();
        assert_eq!(broadcast.kind(), FrameKind::Broadcast);

        let write = Frame::write_request(addr(0x0b), addr(0x10), 0x3d, 0x02, &[0x2a]).unwrap();
        assert_eq!(write.kind(), FrameKind::ReplyOrWrite);
        assert!(!write.is_ems_plus());
        let plus = Frame::new(addr(0x10), 0x00, 0xff, &[0x00, 0x01]).unwrap();
        assert!(plus.is_ems_plus());
    }
}
