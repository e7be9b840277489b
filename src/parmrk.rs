//! Decoding of a termios `PARMRK` input stream.
//!
//! With `PARMRK` set (and `IGNPAR`, `IGNBRK` cleared) the tty marks line
//! conditions in-band:
//!
//! * a break arrives as `ff 00 00`,
//! * an octet `x` with a framing or parity error arrives as `ff 00 x`,
//! * a genuine `ff` octet arrives doubled, `ff ff`.
//!
//! [`ParmrkDecoder`] turns such a stream back into [`Signal`]s.

use crate::transport::Signal;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    Plain,
    Escape,
    Marked,
}

#[derive(Debug)]
pub struct ParmrkDecoder {
    state: State,
}

impl Default for ParmrkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ParmrkDecoder {
    pub const fn new() -> Self {
        Self { state: State::Plain }
    }

    /// Feed one raw octet, returning a signal once one is complete.
    pub fn push(&mut self, octet: u8) -> Option<Signal> {
        let (state, signal) = match (self.state, octet) {
            (State::Plain, 0xff) => (State::Escape, None),
            (State::Plain, b) => (State::Plain, Some(Signal::Byte(b))),
            (State::Escape, 0xff) => (State::Plain, Some(Signal::Byte(0xff))),
            (State::Escape, 0x00) => (State::Marked, None),
            // stray escape, dropped
            (State::Escape, b) => (State::Plain, Some(Signal::Byte(b))),
            (State::Marked, 0x00) => (State::Plain, Some(Signal::Break)),
            (State::Marked, _) => (State::Plain, Some(Signal::FramingError)),
        };
        self.state = state;
        signal
    }

    /// Decode a whole buffer.
    pub fn decode<'a>(&'a mut self, raw: &'a [u8]) -> impl Iterator<Item = Signal> + 'a {
        raw.iter().filter_map(move |&octet| self.push(octet))
    }

    /// True if the decoder is in the middle of an escape sequence.
    pub fn is_pending(&self) -> bool {
        self.state != State::Plain
    }
}

/// Escape octets and breaks the way the tty presents them.
pub fn encode(signals: &[Signal]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(signals.len() + 4);
    for signal in signals {
        match *signal {
            Signal::Byte(0xff) => raw.extend_from_slice(&[0xff, 0xff]),
            Signal::Byte(b) => raw.push(b),
            Signal::Break => raw.extend_from_slice(&[0xff, 0x00, 0x00]),
            Signal::FramingError => raw.extend_from_slice(&[0xff, 0x00, 0x55]),
        }
    }
    raw
}
