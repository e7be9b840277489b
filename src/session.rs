//! The application side of the driver.
//!
//! [`Session`] gives the application a full-duplex view of the bus: it can ask
//! for a frame to be written or for the next frame matching a [`Filter`], and
//! learns the outcome as a [`Completion`]. Frames to be written are handed to
//! the bus session with [`Session::take_outgoing`]; frames and transmit
//! reports from the bus session come back through [`Session::deliver`] and
//! [`Session::write_reported`]. One request may be outstanding at a time.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, trace, warn};
use snafu::{ResultExt, Snafu};

use crate::bus::TxReport;
use crate::frame::{Frame, FrameKind};
use crate::fsm::{self, Flow, Fsm, Matrix, Scope};
use crate::types::Address;

/// Error type for this module
#[derive(Debug, Snafu, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Another request is outstanding"))]
    Busy,
    #[snafu(display("Session state machine: {}", source))]
    Machine { source: fsm::Error },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    AwaitingRead,
    AwaitingWrite,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    ReadRequested,
    WriteRequested,
    FrameDelivered,
    WriteAcknowledged,
    WriteFailed,
    IdleTimeout,
}

const STATES: [SessionState; 3] = [
    SessionState::Idle,
    SessionState::AwaitingRead,
    SessionState::AwaitingWrite,
];

const EVENTS: [SessionEvent; 6] = [
    SessionEvent::ReadRequested,
    SessionEvent::WriteRequested,
    SessionEvent::FrameDelivered,
    SessionEvent::WriteAcknowledged,
    SessionEvent::WriteFailed,
    SessionEvent::IdleTimeout,
];

/// Selects frames for a read. Parts left `None` match anything.
///
/// ```
/// use emsbus_proto::{addr, Filter, Frame};
/// let filter = Filter::any().with_source(addr(0x10)).with_type(0x06);
/// let datetime = Frame::new(addr(0x10), 0x00, 0x06, &[0x00, 0x12]).unwrap();
/// assert!(filter.matches(&datetime));
/// assert!(!filter.with_destination(addr(0x0b)).matches(&datetime));
/// ```
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Filter {
    pub source: Option<Address>,
    pub destination: Option<Address>,
    pub frame_type: Option<u8>,
    pub write_reply: bool,
}

impl Filter {
    /// Match every frame.
    pub fn any() -> Self {
        Self::default()
    }

    /// Match only the single-octet answers to a write request.
    pub fn write_reply() -> Self {
        Self {
            write_reply: true,
            ..Self::default()
        }
    }

    pub fn with_source(mut self, source: Address) -> Self {
        self.source = Some(source);
        self
    }

    /// Destinations are compared without the read request flag.
    pub fn with_destination(mut self, destination: Address) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_type(mut self, frame_type: u8) -> Self {
        self.frame_type = Some(frame_type);
        self
    }

    pub fn matches(&self, frame: &Frame) -> bool {
        if self.write_reply {
            return matches!(frame.kind(), FrameKind::WriteReply(_));
        }
        self.source.map_or(true, |s| frame.source() == s)
            && self.destination.map_or(true, |d| frame.destination() == Some(d))
            && self.frame_type.map_or(true, |t| frame.frame_type() == Some(t))
    }
}

/// Outcome of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// The frame was put on the bus.
    Written(Frame),
    /// The frame was dropped after repeated collisions.
    WriteFailed(Frame),
    /// A frame matching the read filter.
    Read(Frame),
    /// The bus went idle before a matching frame arrived.
    ReadTimedOut(Filter),
    /// The bus went idle before the frame could be sent. It has been taken
    /// back from the bus session.
    WriteTimedOut(Frame),
}

#[derive(Debug)]
struct Desk {
    inbox: VecDeque<Frame>,
    capacity: usize,
    filter: Option<Filter>,
    requested_filter: Option<Filter>,
    requested_write: Option<Frame>,
    pending_write: Option<Frame>,
    incoming: Option<Frame>,
    reported: Option<Frame>,
    rejected: bool,
    outgoing: VecDeque<Frame>,
    withdrawn: VecDeque<Frame>,
    completions: VecDeque<Completion>,
}

type SessionScope<'a> = Scope<'a, SessionState, SessionEvent>;

impl Desk {
    fn store(&mut self, frame: Frame) {
        if self.inbox.len() >= self.capacity {
            if let Some(old) = self.inbox.pop_front() {
                warn!("Inbox full, dropped {:?}", old);
            }
        }
        self.inbox.push_back(frame);
    }

    fn take_matching(&mut self, filter: &Filter) -> Option<Frame> {
        let index = self.inbox.iter().position(|frame| filter.matches(frame))?;
        self.inbox.remove(index)
    }
}

/// Idle state action: a read is served from the inbox if it can be.
fn serve_from_inbox(desk: &mut Desk, scope: &mut SessionScope<'_>) -> Flow {
    if scope.event != SessionEvent::ReadRequested {
        return Flow::Proceed;
    }
    let filter = desk.requested_filter.unwrap_or_default();
    match desk.take_matching(&filter) {
        Some(frame) => {
            debug!("Read served from inbox: {:?}", frame);
            desk.requested_filter = None;
            desk.completions.push_back(Completion::Read(frame));
            Flow::Skip
        }
        None => Flow::Proceed,
    }
}

/// AwaitingRead state action: frames the read isn't waiting for go to the inbox.
fn screen_delivery(desk: &mut Desk, scope: &mut SessionScope<'_>) -> Flow {
    if scope.event != SessionEvent::FrameDelivered {
        return Flow::Proceed;
    }
    let wanted = match (&desk.filter, &desk.incoming) {
        (Some(filter), Some(frame)) => filter.matches(frame),
        _ => false,
    };
    if wanted {
        Flow::Proceed
    } else {
        if let Some(frame) = desk.incoming.take() {
            desk.store(frame);
        }
        Flow::Skip
    }
}

/// AwaitingWrite state action: only the report on our own frame ends the write.
fn screen_report(desk: &mut Desk, scope: &mut SessionScope<'_>) -> Flow {
    match scope.event {
        SessionEvent::WriteAcknowledged | SessionEvent::WriteFailed => {}
        _ => return Flow::Proceed,
    }
    if desk.reported.is_some() && desk.reported == desk.pending_write {
        Flow::Proceed
    } else {
        warn!("Stray transmit report for {:?}", desk.reported.take());
        Flow::Skip
    }
}

fn start_read(desk: &mut Desk, _: &mut SessionScope<'_>) {
    let filter = desk.requested_filter.take().unwrap_or_default();
    trace!("Awaiting frame matching {:?}", filter);
    desk.filter = Some(filter);
}

fn start_write(desk: &mut Desk, _: &mut SessionScope<'_>) {
    if let Some(frame) = desk.requested_write.take() {
        trace!("Awaiting transmission of {:?}", frame);
        desk.outgoing.push_back(frame.clone());
        desk.pending_write = Some(frame);
    }
}

fn reject(desk: &mut Desk, scope: &mut SessionScope<'_>) {
    debug!("{:?} rejected in state {:?}", scope.event, scope.state);
    desk.requested_filter = None;
    desk.requested_write = None;
    desk.rejected = true;
}

fn keep(desk: &mut Desk, _: &mut SessionScope<'_>) {
    if let Some(frame) = desk.incoming.take() {
        desk.store(frame);
    }
}

fn complete_read(desk: &mut Desk, _: &mut SessionScope<'_>) {
    desk.filter = None;
    if let Some(frame) = desk.incoming.take() {
        desk.completions.push_back(Completion::Read(frame));
    }
}

fn time_out(desk: &mut Desk, _: &mut SessionScope<'_>) {
    let filter = desk.filter.take().unwrap_or_default();
    debug!("Read of {:?} timed out", filter);
    desk.completions.push_back(Completion::ReadTimedOut(filter));
}

fn complete_write(desk: &mut Desk, scope: &mut SessionScope<'_>) {
    desk.reported = None;
    if let Some(frame) = desk.pending_write.take() {
        desk.completions.push_back(if scope.event == SessionEvent::WriteAcknowledged {
            Completion::Written(frame)
        } else {
            Completion::WriteFailed(frame)
        });
    }
}

fn abandon_write(desk: &mut Desk, _: &mut SessionScope<'_>) {
    if let Some(frame) = desk.pending_write.take() {
        debug!("Write of {:?} timed out", frame);
        desk.outgoing.retain(|queued| *queued != frame);
        desk.withdrawn.push_back(frame.clone());
        desk.completions.push_back(Completion::WriteTimedOut(frame));
    }
}

fn stray_report(desk: &mut Desk, _: &mut SessionScope<'_>) {
    warn!("Stray transmit report for {:?}", desk.reported.take());
}

fn ignore(_: &mut Desk, _: &mut SessionScope<'_>) {}

fn session_matrix() -> Result<Matrix<Desk, SessionState, SessionEvent>, fsm::Error> {
    use SessionEvent::*;
    use SessionState::*;

    Matrix::builder(&STATES, &EVENTS)
        .stay(&[AwaitingRead, AwaitingWrite], ReadRequested, reject)
        .stay(&[AwaitingRead, AwaitingWrite], WriteRequested, reject)
        .stay(&[Idle, AwaitingRead], WriteAcknowledged, stray_report)
        .stay(&[Idle, AwaitingRead], WriteFailed, stray_report)
        .stay(&[Idle, AwaitingWrite], FrameDelivered, keep)
        .stay(&[Idle], IdleTimeout, ignore)
        .on(Idle, ReadRequested, AwaitingRead, start_read)
        .on(Idle, WriteRequested, AwaitingWrite, start_write)
        .state_action(Idle, serve_from_inbox)
        .on(AwaitingRead, FrameDelivered, Idle, complete_read)
        .on(AwaitingRead, IdleTimeout, Idle, time_out)
        .state_action(AwaitingRead, screen_delivery)
        .on(AwaitingWrite, WriteAcknowledged, Idle, complete_write)
        .on(AwaitingWrite, WriteFailed, Idle, complete_write)
        .on(AwaitingWrite, IdleTimeout, Idle, abandon_write)
        .state_action(AwaitingWrite, screen_report)
        .build()
}

/// The application's view of the bus.
#[derive(Debug)]
pub struct Session {
    fsm: Fsm<Desk, SessionState, SessionEvent>,
    desk: Desk,
}

impl Session {
    /// Create an idle session keeping up to `inbox_capacity` unrequested frames.
    /// # Errors
    /// Only if the transition matrix is inconsistent, which is a bug.
    pub fn new(inbox_capacity: usize) -> Result<Self, fsm::Error> {
        let matrix = Arc::new(session_matrix()?);
        Ok(Self {
            fsm: Fsm::new(matrix, SessionState::Idle)?,
            desk: Desk {
                inbox: VecDeque::new(),
                capacity: inbox_capacity.max(1),
                filter: None,
                requested_filter: None,
                requested_write: None,
                pending_write: None,
                incoming: None,
                reported: None,
                rejected: false,
                outgoing: VecDeque::new(),
                withdrawn: VecDeque::new(),
                completions: VecDeque::new(),
            },
        })
    }

    fn dispatch(&mut self, event: SessionEvent) -> Result<(), fsm::Error> {
        self.fsm.report(event)?;
        self.fsm.run(&mut self.desk)?;
        Ok(())
    }

    fn request(&mut self, event: SessionEvent) -> Result<(), Error> {
        self.desk.rejected = false;
        self.dispatch(event).context(MachineSnafu)?;
        if self.desk.rejected {
            return BusySnafu.fail();
        }
        Ok(())
    }

    /// Ask for the next frame matching `filter`. Frames already in the inbox
    /// complete the read at once.
    /// # Errors
    /// [`Error::Busy`] if another request is outstanding.
    pub fn request_read(&mut self, filter: Filter) -> Result<(), Error> {
        self.desk.requested_filter = Some(filter);
        self.request(SessionEvent::ReadRequested)
    }

    /// Ask for `frame` to be written to the bus.
    /// # Errors
    /// [`Error::Busy`] if another request is outstanding.
    pub fn request_write(&mut self, frame: Frame) -> Result<(), Error> {
        self.desk.requested_write = Some(frame);
        self.request(SessionEvent::WriteRequested)
    }

    /// A validated frame from the bus session.
    pub fn deliver(&mut self, frame: Frame) -> Result<(), fsm::Error> {
        self.desk.incoming = Some(frame);
        self.dispatch(SessionEvent::FrameDelivered)
    }

    /// The bus session's verdict on a frame it was given.
    pub fn write_reported(&mut self, report: TxReport) -> Result<(), fsm::Error> {
        let (frame, event) = match report {
            TxReport::Sent(frame) => (frame, SessionEvent::WriteAcknowledged),
            TxReport::Failed(frame) => (frame, SessionEvent::WriteFailed),
        };
        self.desk.reported = Some(frame);
        self.dispatch(event)
    }

    /// Fail a pending read or write; the bus has gone quiet.
    pub fn idle_timeout(&mut self) -> Result<(), fsm::Error> {
        self.dispatch(SessionEvent::IdleTimeout)
    }

    /// Next frame to hand to the bus session.
    pub fn take_outgoing(&mut self) -> Option<Frame> {
        self.desk.outgoing.pop_front()
    }

    /// Next frame to take back from the bus session, its write having timed out.
    pub fn take_withdrawn(&mut self) -> Option<Frame> {
        self.desk.withdrawn.pop_front()
    }

    pub fn take_completion(&mut self) -> Option<Completion> {
        self.desk.completions.pop_front()
    }

    pub fn state(&self) -> SessionState {
        self.fsm.state()
    }

    pub fn is_busy(&self) -> bool {
        self.fsm.state() != SessionState::Idle
    }

    /// Number of delivered frames waiting for a read.
    pub fn inbox_len(&self) -> usize {
        self.desk.inbox.len()
    }
}
