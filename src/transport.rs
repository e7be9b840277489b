//! The byte-level interface to the serial line.
//!
//! The driver core never opens devices itself. A [`Transport`] implementation
//! delivers what the line saw as [`Signal`]s and writes octets and breaks.

use std::io;

/// One observation on the bus line.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Signal {
    Byte(u8),
    /// A break: end of frame.
    Break,
    /// An octet received with a framing or parity error.
    FramingError,
}

pub trait Transport {
    /// Fetch the next signal, or `None` if nothing is available right now.
    fn read(&mut self) -> io::Result<Option<Signal>>;

    /// Write a single octet to the bus.
    fn write_byte(&mut self, byte: u8) -> io::Result<()>;

    /// Put a break condition on the bus, ending the current frame.
    fn send_break(&mut self) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn read(&mut self) -> io::Result<Option<Signal>> {
        (**self).read()
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        (**self).write_byte(byte)
    }

    fn send_break(&mut self) -> io::Result<()> {
        (**self).send_break()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read(&mut self) -> io::Result<Option<Signal>> {
        (**self).read()
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        (**self).write_byte(byte)
    }

    fn send_break(&mut self) -> io::Result<()> {
        (**self).send_break()
    }
}
