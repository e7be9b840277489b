//! Ties a [`Transport`] to a bus session and an application session.
//!
//! The [`Driver`] is driven by calling [`poll`](Driver::poll) from the host's
//! loop. Each call drains the transport, feeds the bus session, writes
//! whatever it wants on the bus and moves frames and reports between the two
//! sessions. When a request on the bus has gone unanswered for the exchange
//! timeout the bus session is told so, and when the bus has been silent for
//! the idle timeout both sessions are.

use std::io;
use std::thread;
use std::time::Instant;

use log::{debug, info};
use snafu::{ensure, ResultExt, Snafu};

use crate::bus::{BusSession, Output};
use crate::config::BusConfig;
use crate::frame::{self, Frame, FrameKind};
use crate::fsm;
use crate::session::{self, Completion, Filter, Session};
use crate::stats::Statistics;
use crate::transport::Transport;
use crate::types::Address;

/// Error type for this module
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("State machine failure: {}", source))]
    Fsm { source: fsm::Error },
    #[snafu(display("Transport failure: {}", source))]
    Io { source: io::Error },
    #[snafu(display("Transmission of {:?} failed after repeated collisions", frame))]
    TransmissionFailed { frame: Frame },
    #[snafu(display("Timed out"))]
    TimedOut,
    #[snafu(display("Write of {:?} refused by its destination", frame))]
    Refused { frame: Frame },
    #[snafu(display("Another request is outstanding"))]
    Busy,
    #[snafu(display("Monitor mode does not transmit"))]
    ReadOnly,
    #[snafu(display("Invalid frame: {}", source))]
    Frame { source: frame::Error },
}

impl From<session::Error> for Error {
    fn from(e: session::Error) -> Self {
        match e {
            session::Error::Busy => Error::Busy,
            session::Error::Machine { source } => Error::Fsm { source },
        }
    }
}

pub struct Driver<T> {
    transport: T,
    bus: BusSession,
    session: Session,
    last_activity: Instant,
}

impl<T: Transport> Driver<T> {
    /// # Errors
    /// Only if a transition matrix is inconsistent, which is a bug.
    pub fn new(transport: T, config: BusConfig) -> Result<Self, Error> {
        info!(
            "EMS bus driver for device {}, mode {}",
            config.device(),
            config.mode()
        );
        let session = Session::new(config.inbox_capacity()).context(FsmSnafu)?;
        let bus = BusSession::new(config).context(FsmSnafu)?;
        Ok(Self {
            transport,
            bus,
            session,
            last_activity: Instant::now(),
        })
    }

    /// Handle everything the transport has to offer, returning the number of
    /// signals read.
    /// # Errors
    /// Transport errors, and state machine errors which indicate a bug.
    pub fn poll(&mut self, now: Instant) -> Result<usize, Error> {
        let mut handled = 0;
        while let Some(signal) = self.transport.read().context(IoSnafu)? {
            handled += 1;
            self.bus.feed(signal).context(FsmSnafu)?;
            self.pump()?;
        }

        let silence = now.saturating_duration_since(self.last_activity);
        if handled > 0 {
            self.last_activity = now;
        } else if self.bus.awaiting_reply() && silence >= self.bus.config().exchange_timeout() {
            self.bus.exchange_timeout().context(FsmSnafu)?;
            self.pump()?;
        } else if silence >= self.bus.config().idle_timeout() {
            self.last_activity = now;
            self.bus.idle_timeout().context(FsmSnafu)?;
            self.session.idle_timeout().context(FsmSnafu)?;
            self.pump()?;
        }
        Ok(handled)
    }

    /// Move frames and reports between the sessions and write pending output.
    fn pump(&mut self) -> Result<(), Error> {
        while let Some(frame) = self.bus.take_delivered() {
            self.session.deliver(frame).context(FsmSnafu)?;
        }
        while let Some(report) = self.bus.take_report() {
            self.session.write_reported(report).context(FsmSnafu)?;
        }
        while let Some(frame) = self.session.take_withdrawn() {
            if !self.bus.withdraw(&frame) {
                debug!("{:?} already left the outbox", frame);
            }
        }
        while let Some(frame) = self.session.take_outgoing() {
            self.bus.transmit(frame).context(FsmSnafu)?;
        }
        while let Some(output) = self.bus.next_output() {
            let written = match output {
                Output::Byte(octet) => self.transport.write_byte(octet),
                Output::Break => self.transport.send_break(),
            };
            written.context(IoSnafu)?;
        }
        Ok(())
    }

    /// Queue `frame` for transmission on the next poll of this device.
    /// The outcome is reported by [`take_completion`](Self::take_completion).
    /// # Errors
    /// [`Error::ReadOnly`] in monitor mode, [`Error::Busy`] if another request
    /// is outstanding.
    pub fn request_write(&mut self, frame: Frame) -> Result<(), Error> {
        ensure!(self.bus.config().mode().transmits(), ReadOnlySnafu);
        self.session.request_write(frame)?;
        self.pump()
    }

    /// Ask for the next frame matching `filter`.
    /// # Errors
    /// [`Error::Busy`] if another request is outstanding.
    pub fn request_read(&mut self, filter: Filter) -> Result<(), Error> {
        self.session.request_read(filter)?;
        self.pump()
    }

    pub fn take_completion(&mut self) -> Option<Completion> {
        self.session.take_completion()
    }

    /// Write `frame` and poll until it is on the bus or `deadline` passes.
    /// A write still queued at the deadline, or when the bus goes idle, is
    /// withdrawn.
    /// # Errors
    /// [`Error::TransmissionFailed`] after too many collisions,
    /// [`Error::TimedOut`] at the deadline or when the bus went idle, and any
    /// error of [`request_write`](Self::request_write) or [`poll`](Self::poll).
    pub fn write(&mut self, frame: Frame, deadline: Instant) -> Result<Frame, Error> {
        self.request_write(frame)?;
        loop {
            match self.wait(deadline) {
                Ok(Completion::Written(frame)) => return Ok(frame),
                Ok(Completion::WriteFailed(frame)) => {
                    return TransmissionFailedSnafu { frame }.fail()
                }
                Ok(Completion::WriteTimedOut(_)) => return TimedOutSnafu.fail(),
                Ok(other) => debug!("Discarded stale completion {:?}", other),
                Err(Error::TimedOut) => {
                    self.cancel()?;
                    return TimedOutSnafu.fail();
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Poll until a frame matching `filter` arrives or `deadline` passes.
    /// # Errors
    /// [`Error::TimedOut`] at the deadline or when the bus went idle, and any
    /// error of [`request_read`](Self::request_read) or [`poll`](Self::poll).
    pub fn read(&mut self, filter: Filter, deadline: Instant) -> Result<Frame, Error> {
        self.request_read(filter)?;
        loop {
            match self.wait(deadline) {
                Ok(Completion::Read(frame)) => return Ok(frame),
                Ok(Completion::ReadTimedOut(_)) => return TimedOutSnafu.fail(),
                Ok(other) => debug!("Discarded stale completion {:?}", other),
                Err(Error::TimedOut) => {
                    self.cancel()?;
                    return TimedOutSnafu.fail();
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Ask `destination` for `length` octets of register block `frame_type`
    /// from `offset`, and wait for its reply.
    /// # Errors
    /// [`Error::Frame`] for an invalid request, and any error of
    /// [`write`](Self::write) or [`read`](Self::read).
    pub fn read_register(
        &mut self,
        destination: Address,
        frame_type: u8,
        offset: u8,
        length: u8,
        deadline: Instant,
    ) -> Result<Frame, Error> {
        let device = self.bus.config().device();
        let request = Frame::read_request(device, destination, frame_type, offset, length)
            .context(FrameSnafu)?;
        self.write(request, deadline)?;
        let reply = Filter::any()
            .with_source(destination)
            .with_destination(device)
            .with_type(frame_type);
        self.read(reply, deadline)
    }

    /// Write `data` at `offset` of register block `frame_type` of `destination`
    /// and wait for its acknowledgement.
    /// # Errors
    /// [`Error::Frame`] for an invalid request, [`Error::Refused`] when the
    /// destination answers with a NAK, and any error of [`write`](Self::write)
    /// or [`read`](Self::read).
    pub fn write_register(
        &mut self,
        destination: Address,
        frame_type: u8,
        offset: u8,
        data: &[u8],
        deadline: Instant,
    ) -> Result<Frame, Error> {
        let device = self.bus.config().device();
        let request = Frame::write_request(device, destination, frame_type, offset, data)
            .context(FrameSnafu)?;
        let frame = self.write(request, deadline)?;
        match self.read(Filter::write_reply(), deadline)?.kind() {
            FrameKind::WriteReply(true) => Ok(frame),
            _ => RefusedSnafu { frame }.fail(),
        }
    }

    /// End the pending request, withdrawing a write that is still queued.
    fn cancel(&mut self) -> Result<(), Error> {
        self.session.idle_timeout().context(FsmSnafu)?;
        while self.session.take_completion().is_some() {}
        self.pump()
    }

    fn wait(&mut self, deadline: Instant) -> Result<Completion, Error> {
        loop {
            let now = Instant::now();
            let handled = self.poll(now)?;
            if let Some(completion) = self.session.take_completion() {
                return Ok(completion);
            }
            ensure!(now < deadline, TimedOutSnafu);
            if handled == 0 {
                thread::yield_now();
            }
        }
    }

    pub fn statistics(&self) -> Statistics {
        self.bus.statistics()
    }

    pub fn reset_statistics(&mut self) {
        self.bus.reset_statistics();
    }

    pub fn bus(&self) -> &BusSession {
        &self.bus
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }
}
