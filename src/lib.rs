//! Sans-io driver core for the EMS bus, the two-wire half-duplex bus heating
//! appliances use to exchange status and control frames.
//!
//! The crate turns the octets and breaks seen on the line into validated
//! [`Frame`]s, decides when this device may write to the bus, and decodes the
//! typed values carried in frame payloads. Reading from and writing to the
//! serial device is left to a [`Transport`] implementation supplied by the
//! caller; [`parmrk`] helps with Linux ttys.
//!
//! The pieces, leaf first:
//!
//! * [`fsm`]: a table-driven state machine engine.
//! * [`bus::BusSession`]: the half-duplex side. Delimits and checks frames,
//!   answers polls and transmits queued frames with echo-based collision
//!   detection.
//! * [`session::Session`]: the full-duplex application side, with read and
//!   write requests.
//! * [`Driver`]: both sessions and a transport, driven by [`Driver::poll`].
//! * [`field`]: decoding and encoding of typed fields in frame payloads.
//!
//! # Example
//!
//! ```
//! use emsbus_proto::{BusConfig, Driver, Filter, Mode, Signal, Transport};
//! use std::collections::VecDeque;
//! use std::io;
//! use std::time::Instant;
//!
//! // A recorded stretch of bus traffic
//! struct Replay(VecDeque<Signal>);
//!
//! impl Transport for Replay {
//!     fn read(&mut self) -> io::Result<Option<Signal>> {
//!         Ok(self.0.pop_front())
//!     }
//!     fn write_byte(&mut self, _: u8) -> io::Result<()> {
//!         Ok(())
//!     }
//!     fn send_break(&mut self) -> io::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let traffic = [0x08, 0x00, 0x07, 0x00, 0x0b, 0x80, 0x00, 0x77]
//!     .iter()
//!     .map(|&b| Signal::Byte(b))
//!     .chain(Some(Signal::Break))
//!     .collect();
//!
//! let config = BusConfig::new(0x0b)?.with_mode(Mode::Monitor);
//! let mut driver = Driver::new(Replay(traffic), config)?;
//! driver.request_read(Filter::any())?;
//! driver.poll(Instant::now())?;
//! assert!(driver.take_completion().is_some());
//! assert_eq!(driver.statistics().frames_seen, 1);
//! # Ok(()) }
//! ```

mod nom_parser;

pub mod bus;
pub mod config;
pub mod driver;
pub mod field;
pub mod frame;
pub mod fsm;
pub mod parmrk;
pub mod session;
pub mod stats;
pub mod transport;
pub mod types;

pub use bus::{BusSession, BusState, Output, TxReport};
pub use config::BusConfig;
pub use driver::{Driver, Error};
pub use field::{Field, Layout, Value};
pub use frame::{Checksum, Frame, FrameKind, WireFrame};
pub use session::{Completion, Filter, Session};
pub use stats::Statistics;
pub use transport::{Signal, Transport};
pub use types::{addr, Address, IntoAddress, Mode};
