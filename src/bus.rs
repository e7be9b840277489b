//! The half-duplex side of the driver.
//!
//! [`BusSession`] is fed the [`Signal`]s seen on the line and decides what
//! this device writes to the bus. It never touches the transport itself: octets
//! and breaks to be written are queued as [`Output`] and must be written by the
//! caller, in order, as soon as they appear.
//!
//! Frames are delimited by breaks and checked before they are forwarded.
//! Queued frames are only put on the bus after a poll for this device, one
//! octet at a time, each octet waiting for its echo. An echo that differs from
//! what was sent is a collision: the frame is put back at the head of the queue
//! and sent again on the next poll.
//!
//! Read and write requests on the bus open an exchange that the addressed
//! device is expected to answer. The open exchange tells read replies from
//! write requests. Once the exchange of a frame sent by this device is
//! answered, or times out, the device hands the bus back to the master with a
//! poll reply.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::config::BusConfig;
use crate::frame::{Frame, FrameKind, WireBytes, WireFrame};
use crate::fsm::{self, Flow, Fsm, Matrix, Scope};
use crate::nom_parser::{parse_frame, FrameToken};
use crate::stats::Statistics;
use crate::transport::Signal;
use crate::types::Address;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BusState {
    Idle,
    Receiving,
    ValidatingChecksum,
    Transmitting,
    CollisionBackoff,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BusEvent {
    ByteReceived,
    FrameBoundaryDetected,
    PollReceived,
    TransmitRequested,
    /// The delimited frame is valid and can be routed.
    ChecksumOk,
    /// The delimited frame was rejected, for whatever reason.
    ChecksumFail,
    BusIdleTimeout,
    EchoMismatch,
    TransmitComplete,
    /// A read or write request went unanswered.
    ExchangeTimeout,
}

const STATES: [BusState; 5] = [
    BusState::Idle,
    BusState::Receiving,
    BusState::ValidatingChecksum,
    BusState::Transmitting,
    BusState::CollisionBackoff,
];

const EVENTS: [BusEvent; 10] = [
    BusEvent::ByteReceived,
    BusEvent::FrameBoundaryDetected,
    BusEvent::PollReceived,
    BusEvent::TransmitRequested,
    BusEvent::ChecksumOk,
    BusEvent::ChecksumFail,
    BusEvent::BusIdleTimeout,
    BusEvent::EchoMismatch,
    BusEvent::TransmitComplete,
    BusEvent::ExchangeTimeout,
];

/// Something to be written to the bus.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Output {
    Byte(u8),
    Break,
}

/// Fate of a frame handed to [`BusSession::transmit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxReport {
    /// Every octet was echoed correctly and the closing break was sent.
    Sent(Frame),
    /// Dropped after too many collisions.
    Failed(Frame),
}

#[derive(Debug)]
struct Outgoing {
    frame: Frame,
    collisions: u8,
}

#[derive(Debug)]
struct Transmission {
    outgoing: Outgoing,
    wire: WireFrame,
    /// Index of the octet waiting for its echo.
    pos: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Request {
    Read,
    Write,
}

/// A request on the bus waiting for the addressed device to answer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Exchange {
    request: Request,
    target: Address,
    /// Sent by this device.
    ours: bool,
}

/// The role of a frame on the bus, taking the open exchange into account.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Traffic {
    PollRequest(Address),
    PollReply(Address),
    WriteReply(bool),
    ReadRequest,
    ReadReply,
    WriteRequest,
    Broadcast,
}

#[derive(Debug)]
struct Link {
    config: BusConfig,
    /// Last octet received, `None` if it had a framing error.
    rx: Option<u8>,
    rx_frame: WireBytes,
    rx_len: usize,
    rx_erred: bool,
    candidate: Option<Frame>,
    /// Our own frames, in the order their echo should come back.
    expected_echo: VecDeque<WireBytes>,
    exchange: Option<Exchange>,
    requests: VecDeque<Frame>,
    outbox: VecDeque<Outgoing>,
    tx: Option<Transmission>,
    egress: VecDeque<Output>,
    delivered: VecDeque<Frame>,
    reports: VecDeque<TxReport>,
    stats: Statistics,
}

type BusScope<'a> = Scope<'a, BusState, BusEvent>;

impl Link {
    fn new(config: BusConfig) -> Self {
        Self {
            config,
            rx: None,
            rx_frame: WireBytes::new(),
            rx_len: 0,
            rx_erred: false,
            candidate: None,
            expected_echo: VecDeque::new(),
            exchange: None,
            requests: VecDeque::new(),
            outbox: VecDeque::new(),
            tx: None,
            egress: VecDeque::new(),
            delivered: VecDeque::new(),
            reports: VecDeque::new(),
            stats: Statistics::new(),
        }
    }

    fn clear_rx(&mut self) {
        self.rx_frame.clear();
        self.rx_len = 0;
        self.rx_erred = false;
    }

    /// Check the frame just delimited, leaving it in `candidate` if it is good.
    fn validate(&mut self) -> bool {
        let len = self.rx_len;
        if let Some(echo) = self.expected_echo.pop_front() {
            if len == echo.len() && echo[..] == self.rx_frame[..] {
                trace!("Echo of our own frame suppressed");
                self.stats.echo_frames += 1;
                return false;
            }
        }

        self.stats.frame_seen(len);
        if self.rx_erred {
            warn!("Dropped frame with framing errors: {:02x?}", &self.rx_frame[..]);
            self.stats.erred_frames += 1;
            self.stats.erred_octets += len as u64 + 1;
            return false;
        }
        if len > self.rx_frame.len() {
            warn!("Dropped overlong frame of {} octets", len);
            self.stats.long_frames += 1;
            return false;
        }

        match parse_frame(&self.rx_frame, self.config.checksum()) {
            FrameToken::Empty => {
                self.stats.empty_frames += 1;
                false
            }
            FrameToken::Single(octet) => {
                self.candidate = Some(Frame::single(octet));
                true
            }
            FrameToken::Data(body) => match Frame::from_received(body) {
                Ok(frame) => {
                    if frame.is_ems_plus() {
                        self.stats.ems_plus_frames += 1;
                    }
                    self.candidate = Some(frame);
                    true
                }
                Err(e) => {
                    warn!("Dropped frame: {}", e);
                    self.stats.long_frames += 1;
                    false
                }
            },
            FrameToken::Short(len) => {
                warn!("Dropped short frame of {} octets", len);
                self.stats.short_frames += 1;
                false
            }
            FrameToken::TooLong(len) => {
                warn!("Dropped overlong frame of {} octets", len);
                self.stats.long_frames += 1;
                false
            }
            FrameToken::BadChecksum { received, computed } => {
                warn!(
                    "Checksum mismatch: received {:#04x}, computed {:#04x}",
                    received, computed
                );
                self.stats.checksum_failures += 1;
                false
            }
        }
    }

    fn deliver(&mut self, frame: Frame) {
        if self.delivered.len() >= self.config.inbox_capacity() {
            if let Some(old) = self.delivered.pop_front() {
                warn!("Delivery queue full, dropped {:?}", old);
            }
        }
        self.delivered.push_back(frame);
    }

    fn send_poll_reply(&mut self) {
        let octet = *self.config.device();
        trace!("Poll reply {:02x}", octet);
        self.egress.push_back(Output::Byte(octet));
        self.egress.push_back(Output::Break);
        let mut echo = WireBytes::new();
        echo.push(octet);
        self.expected_echo.push_back(echo);
        self.stats.egress_poll_replies += 1;
        self.stats.frame_sent(1);
    }

    /// Hand the bus back to the master once our exchange is over.
    fn release(&mut self) {
        if self.config.poll_reply() {
            self.send_poll_reply();
        }
    }

    /// Tell read replies from write requests by the open exchange.
    fn classify(&self, frame: &Frame) -> Traffic {
        match frame.kind() {
            FrameKind::PollRequest(address) => Traffic::PollRequest(address),
            FrameKind::PollReply(address) => Traffic::PollReply(address),
            FrameKind::WriteReply(ack) => Traffic::WriteReply(ack),
            FrameKind::ReadRequest => Traffic::ReadRequest,
            FrameKind::Broadcast => Traffic::Broadcast,
            FrameKind::ReplyOrWrite => match self.exchange {
                Some(Exchange {
                    request: Request::Read,
                    target,
                    ..
                }) if frame.source() == target => Traffic::ReadReply,
                _ => Traffic::WriteRequest,
            },
        }
    }

    /// Follow request and reply on the bus, returning the exchange `traffic` answers.
    fn track(&mut self, frame: &Frame, traffic: Traffic) -> Option<Exchange> {
        let open = self.exchange.take();
        let answers = |request| open.filter(|exchange: &Exchange| exchange.request == request);
        let (answered, expected) = match traffic {
            Traffic::ReadReply => (answers(Request::Read), true),
            Traffic::WriteReply(_) => {
                let answered = answers(Request::Write);
                (answered, answered.is_some())
            }
            // a broadcast may carry the answer to a read
            Traffic::Broadcast if open.is_some() => {
                let answered = answers(Request::Read);
                (answered, answered.is_some())
            }
            _ => (None, open.is_none()),
        };
        // other traffic ends an open exchange, ours included, without a poll reply
        if !expected {
            warn!("Unexpected {:?}, open exchange {:?}", traffic, open);
            self.stats.protocol_errors += 1;
        }

        let request = match traffic {
            Traffic::ReadRequest => Some(Request::Read),
            Traffic::WriteRequest => Some(Request::Write),
            _ => None,
        };
        self.exchange = request
            .zip(frame.destination())
            .map(|(request, target)| Exchange {
                request,
                target,
                ours: false,
            });
        answered
    }

    /// Give up on the open exchange.
    fn expire_exchange(&mut self) {
        if let Some(exchange) = self.exchange.take() {
            debug!("No answer to {:?}", exchange);
            self.stats.exchange_timeouts += 1;
            if exchange.ours {
                self.release();
            }
        }
    }
}

fn accumulate(link: &mut Link, _: &mut BusScope<'_>) {
    let octet = match link.rx {
        Some(octet) => octet,
        None => {
            link.rx_erred = true;
            0
        }
    };
    trace!("rx {:02x}", octet);
    if link.rx_frame.try_push(octet).is_err() {
        // validate() drops the frame, judging by rx_len
        trace!("Frame overflow at octet {}", link.rx_len);
    }
    link.rx_len += 1;
}

fn delimit(link: &mut Link, scope: &mut BusScope<'_>) {
    let valid = link.validate();
    link.clear_rx();
    scope.queue.augment(if valid {
        BusEvent::ChecksumOk
    } else {
        BusEvent::ChecksumFail
    });
}

fn empty_frame(link: &mut Link, _: &mut BusScope<'_>) {
    match link.expected_echo.pop_front() {
        Some(echo) if echo.is_empty() => {
            trace!("Echo of our own break suppressed");
            link.stats.echo_frames += 1;
        }
        _ => {
            link.stats.frame_seen(0);
            link.stats.empty_frames += 1;
        }
    }
}

fn route(link: &mut Link, scope: &mut BusScope<'_>) {
    let frame = match link.candidate.take() {
        Some(frame) => frame,
        None => return,
    };
    let device = link.config.device();
    let mode = link.config.mode();
    let addressed = frame.destination() == Some(device);

    let traffic = link.classify(&frame);
    let mut for_us = false;
    match traffic {
        Traffic::PollRequest(address) => {
            link.stats.poll_requests += 1;
            if address == device {
                link.stats.polls_for_us += 1;
                if mode.transmits() {
                    scope.queue.augment(BusEvent::PollReceived);
                }
            }
        }
        Traffic::PollReply(address) => {
            link.stats.poll_replies += 1;
            if address == device && mode.transmits() {
                warn!("Poll reply from {} seen, another device uses our address", address);
                link.stats.address_conflicts += 1;
            }
        }
        Traffic::WriteReply(_) => link.stats.write_replies += 1,
        Traffic::ReadRequest => {
            link.stats.read_requests += 1;
            for_us = addressed;
        }
        Traffic::ReadReply => {
            link.stats.read_replies += 1;
            for_us = addressed;
        }
        Traffic::WriteRequest => {
            link.stats.write_requests += 1;
            for_us = addressed;
        }
        Traffic::Broadcast => {
            link.stats.broadcasts += 1;
            for_us = true;
        }
    }

    if let Some(exchange) = link.track(&frame, traffic) {
        if exchange.ours {
            debug!("{:?} answers our {:?} request", traffic, exchange.request);
            for_us = true;
            link.release();
        }
    }

    if for_us {
        link.stats.frames_for_us += 1;
    }
    if for_us || mode.forwards_all() {
        debug!("Delivering {:?}", frame);
        link.deliver(frame);
    } else {
        trace!("Ignoring {:?}", frame);
    }
}

fn discard(link: &mut Link, _: &mut BusScope<'_>) {
    link.candidate = None;
}

fn accept_request(link: &mut Link, _: &mut BusScope<'_>) {
    let frame = match link.requests.pop_front() {
        Some(frame) => frame,
        None => return,
    };
    if link.config.mode().transmits() {
        debug!("Queued {:?}", frame);
        link.outbox.push_back(Outgoing {
            frame,
            collisions: 0,
        });
    } else {
        debug!("Monitor mode, discarded {:?}", frame);
        link.stats.discarded_requests += 1;
    }
}

/// Idle state action: a poll with nothing queued is answered right here.
fn poll_guard(link: &mut Link, scope: &mut BusScope<'_>) -> Flow {
    if scope.event != BusEvent::PollReceived || !link.outbox.is_empty() {
        return Flow::Proceed;
    }
    if link.config.poll_reply() {
        trace!("Nothing to send");
        link.send_poll_reply();
    }
    Flow::Skip
}

fn start_transmission(link: &mut Link, scope: &mut BusScope<'_>) {
    let outgoing = match link.outbox.pop_front() {
        Some(outgoing) => outgoing,
        None => {
            scope.queue.augment(BusEvent::TransmitComplete);
            return;
        }
    };
    let wire = outgoing.frame.to_wire(link.config.checksum());
    debug!("Polled, transmitting {:?}", outgoing.frame);
    if let Some(&first) = wire.first() {
        link.egress.push_back(Output::Byte(first));
    }
    link.tx = Some(Transmission {
        outgoing,
        wire,
        pos: 0,
    });
}

fn check_echo(link: &mut Link, scope: &mut BusScope<'_>) {
    let tx = match link.tx.as_mut() {
        Some(tx) => tx,
        None => {
            scope.queue.augment(BusEvent::EchoMismatch);
            return;
        }
    };
    let expected = tx.wire.get(tx.pos).copied();
    if link.rx.is_none() || link.rx != expected {
        warn!(
            "Collision at octet {}: sent {:02x?}, echo {:02x?}",
            tx.pos, expected, link.rx
        );
        scope.queue.augment(BusEvent::EchoMismatch);
        return;
    }

    tx.pos += 1;
    match tx.wire.get(tx.pos) {
        Some(&next) => link.egress.push_back(Output::Byte(next)),
        None => {
            link.egress.push_back(Output::Break);
            scope.queue.augment(BusEvent::TransmitComplete);
        }
    }
}

/// A break or bus silence while waiting for an echo.
fn abort(_: &mut Link, scope: &mut BusScope<'_>) {
    warn!("{:?} during transmission", scope.event);
    scope.queue.augment(BusEvent::EchoMismatch);
    if scope.event == BusEvent::FrameBoundaryDetected {
        // the break still ends the foreign frame after backing off
        scope.queue.augment(BusEvent::FrameBoundaryDetected);
    }
}

fn collide(link: &mut Link, _: &mut BusScope<'_>) {
    link.stats.collisions += 1;
    let mut outgoing = match link.tx.take() {
        Some(tx) => tx.outgoing,
        None => return,
    };
    outgoing.collisions = outgoing.collisions.saturating_add(1);
    if outgoing.collisions > link.config.max_retries() {
        warn!(
            "Giving up on {:?} after {} collisions",
            outgoing.frame, outgoing.collisions
        );
        link.stats.transmission_failures += 1;
        link.reports.push_back(TxReport::Failed(outgoing.frame));
    } else {
        debug!("Requeued {:?}", outgoing.frame);
        link.outbox.push_front(outgoing);
    }
}

fn complete(link: &mut Link, _: &mut BusScope<'_>) {
    let frame = match link.tx.take() {
        Some(tx) => {
            link.stats.frame_sent(tx.wire.len());
            tx.outgoing.frame
        }
        None => return,
    };
    debug!("Sent {:?}", frame);
    link.expected_echo.push_back(WireBytes::new());

    let request = match frame.kind() {
        FrameKind::ReadRequest => {
            link.stats.egress_read_requests += 1;
            Some(Request::Read)
        }
        FrameKind::ReplyOrWrite => {
            link.stats.egress_write_requests += 1;
            Some(Request::Write)
        }
        FrameKind::Broadcast => {
            link.stats.egress_broadcasts += 1;
            None
        }
        _ => None,
    };
    link.exchange = request
        .zip(frame.destination())
        .map(|(request, target)| Exchange {
            request,
            target,
            ours: true,
        });
    if link.exchange.is_none() {
        // nobody answers
        link.release();
    }
    link.reports.push_back(TxReport::Sent(frame));
}

fn ignore_octet(link: &mut Link, _: &mut BusScope<'_>) {
    trace!("Backing off, ignored {:02x?}", link.rx);
}

fn recover(link: &mut Link, _: &mut BusScope<'_>) {
    link.clear_rx();
}

fn timeout(link: &mut Link, _: &mut BusScope<'_>) {
    warn!("Bus idle, dropped partial frame of {} octets", link.rx_len);
    link.stats.timeouts += 1;
    link.clear_rx();
}

fn settle(link: &mut Link, _: &mut BusScope<'_>) {
    link.expected_echo.clear();
    link.expire_exchange();
}

fn expire(link: &mut Link, _: &mut BusScope<'_>) {
    link.expire_exchange();
}

fn defer(_: &mut Link, scope: &mut BusScope<'_>) {
    trace!("{:?} deferred in state {:?}", scope.event, scope.state);
}

fn protocol_error(link: &mut Link, scope: &mut BusScope<'_>) {
    warn!("Unexpected {:?} in state {:?}", scope.event, scope.state);
    link.stats.protocol_errors += 1;
}

fn bus_matrix() -> Result<Matrix<Link, BusState, BusEvent>, fsm::Error> {
    use BusEvent::*;
    use BusState::*;

    Matrix::builder(&STATES, &EVENTS)
        .stay(&STATES, TransmitRequested, accept_request)
        .stay(&[ValidatingChecksum, Transmitting, CollisionBackoff], PollReceived, protocol_error)
        .stay(&[Idle, Receiving, Transmitting, CollisionBackoff], ChecksumOk, protocol_error)
        .stay(&[Idle, Receiving, Transmitting, CollisionBackoff], ChecksumFail, protocol_error)
        .stay(&[Idle, Receiving, ValidatingChecksum, CollisionBackoff], EchoMismatch, protocol_error)
        .stay(&[Idle, Receiving, ValidatingChecksum, CollisionBackoff], TransmitComplete, protocol_error)
        .stay(&[ValidatingChecksum], ByteReceived, protocol_error)
        .stay(&[ValidatingChecksum], FrameBoundaryDetected, protocol_error)
        .stay(&[ValidatingChecksum], BusIdleTimeout, protocol_error)
        .stay(&[Receiving, ValidatingChecksum, Transmitting, CollisionBackoff], ExchangeTimeout, defer)
        .on(Idle, ByteReceived, Receiving, accumulate)
        .on(Idle, FrameBoundaryDetected, Idle, empty_frame)
        .on(Idle, PollReceived, Transmitting, start_transmission)
        .on(Idle, BusIdleTimeout, Idle, settle)
        .on(Idle, ExchangeTimeout, Idle, expire)
        .state_action(Idle, poll_guard)
        .on(Receiving, ByteReceived, Receiving, accumulate)
        .on(Receiving, FrameBoundaryDetected, ValidatingChecksum, delimit)
        .on(Receiving, PollReceived, Receiving, protocol_error)
        .on(Receiving, BusIdleTimeout, Idle, timeout)
        .on(ValidatingChecksum, ChecksumOk, Idle, route)
        .on(ValidatingChecksum, ChecksumFail, Idle, discard)
        .on(Transmitting, ByteReceived, Transmitting, check_echo)
        .on(Transmitting, FrameBoundaryDetected, Transmitting, abort)
        .on(Transmitting, BusIdleTimeout, Transmitting, abort)
        .on(Transmitting, EchoMismatch, CollisionBackoff, collide)
        .on(Transmitting, TransmitComplete, Idle, complete)
        .on(CollisionBackoff, ByteReceived, CollisionBackoff, ignore_octet)
        .on(CollisionBackoff, FrameBoundaryDetected, Idle, recover)
        .on(CollisionBackoff, BusIdleTimeout, Idle, recover)
        .build()
}

/// The bus access state machine of one device.
///
/// # Example
///
/// ```
/// use emsbus_proto::bus::{BusSession, BusState, Output};
/// use emsbus_proto::{addr, BusConfig, Frame, Signal};
///
/// let mut bus = BusSession::new(BusConfig::new(0x0b).unwrap()).unwrap();
/// let frame = Frame::write_request(addr(0x0b), addr(0x10), 0x3d, 0x02, &[0x2a]).unwrap();
/// bus.transmit(frame).unwrap();
///
/// // The bus master polls us
/// bus.feed(Signal::Byte(0x8b)).unwrap();
/// bus.feed(Signal::Break).unwrap();
/// assert_eq!(bus.state(), BusState::Transmitting);
/// assert_eq!(bus.next_output(), Some(Output::Byte(0x0b)));
/// ```
#[derive(Debug)]
pub struct BusSession {
    fsm: Fsm<Link, BusState, BusEvent>,
    link: Link,
}

impl BusSession {
    /// Create a session in the `Idle` state.
    /// # Errors
    /// Only if the transition matrix is inconsistent, which is a bug.
    pub fn new(config: BusConfig) -> Result<Self, fsm::Error> {
        let matrix = Arc::new(bus_matrix()?);
        Ok(Self {
            fsm: Fsm::new(matrix, BusState::Idle)?,
            link: Link::new(config),
        })
    }

    /// Handle one signal from the line.
    pub fn feed(&mut self, signal: Signal) -> Result<(), fsm::Error> {
        let event = match signal {
            Signal::Byte(octet) => {
                self.link.rx = Some(octet);
                BusEvent::ByteReceived
            }
            Signal::FramingError => {
                self.link.rx = None;
                BusEvent::ByteReceived
            }
            Signal::Break => BusEvent::FrameBoundaryDetected,
        };
        self.dispatch(event)
    }

    /// Queue a frame for transmission on the next poll. Discarded in monitor mode.
    pub fn transmit(&mut self, frame: Frame) -> Result<(), fsm::Error> {
        self.link.requests.push_back(frame);
        self.dispatch(BusEvent::TransmitRequested)
    }

    /// The bus has been silent for the configured idle timeout.
    pub fn idle_timeout(&mut self) -> Result<(), fsm::Error> {
        self.dispatch(BusEvent::BusIdleTimeout)
    }

    /// The bus has been silent for the configured exchange timeout.
    pub fn exchange_timeout(&mut self) -> Result<(), fsm::Error> {
        self.dispatch(BusEvent::ExchangeTimeout)
    }

    /// True while a read or write request on the bus waits for its answer.
    pub fn awaiting_reply(&self) -> bool {
        self.link.exchange.is_some()
    }

    /// Take back a frame still waiting for a poll. Returns `false` if it isn't
    /// queued, because it is already on the bus or was never handed over.
    pub fn withdraw(&mut self, frame: &Frame) -> bool {
        match self.link.outbox.iter().position(|outgoing| outgoing.frame == *frame) {
            Some(index) => {
                debug!("Withdrawn {:?}", frame);
                self.link.outbox.remove(index);
                true
            }
            None => false,
        }
    }

    fn dispatch(&mut self, event: BusEvent) -> Result<(), fsm::Error> {
        self.fsm.report(event)?;
        self.fsm.run(&mut self.link)?;
        Ok(())
    }

    /// Next octet or break to write to the bus.
    pub fn next_output(&mut self) -> Option<Output> {
        self.link.egress.pop_front()
    }

    pub fn has_output(&self) -> bool {
        !self.link.egress.is_empty()
    }

    /// Next validated frame for the application.
    pub fn take_delivered(&mut self) -> Option<Frame> {
        self.link.delivered.pop_front()
    }

    /// Next report on a frame handed to [`transmit`](Self::transmit).
    pub fn take_report(&mut self) -> Option<TxReport> {
        self.link.reports.pop_front()
    }

    /// Frames waiting for a poll, in transmission order.
    pub fn queued(&self) -> impl Iterator<Item = &Frame> + '_ {
        self.link.outbox.iter().map(|outgoing| &outgoing.frame)
    }

    /// A snapshot of the counters.
    pub fn statistics(&self) -> Statistics {
        self.link.stats.snapshot()
    }

    pub fn reset_statistics(&mut self) {
        self.link.stats.reset();
    }

    pub fn state(&self) -> BusState {
        self.fsm.state()
    }

    pub fn config(&self) -> &BusConfig {
        &self.link.config
    }
}
