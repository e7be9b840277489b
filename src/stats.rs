//! Bus performance counters.
//!
//! The counters are owned and updated by the bus session. A reporting
//! frontend reads them with [`BusSession::statistics`](crate::bus::BusSession::statistics),
//! which returns a copy.

use std::time::SystemTime;

/// Counters of bus traffic seen and generated by this driver.
///
/// All counters are monotonic until [`reset`](Self::reset).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statistics {
    /// Start of collection.
    pub since: SystemTime,

    /// Frames delimited on the bus, excluding echoes of our own transmissions.
    pub frames_seen: u64,
    /// Octets in those frames, counting the break as one octet.
    pub octets_seen: u64,
    /// Data frames addressed to this device, including broadcasts.
    pub frames_for_us: u64,
    pub checksum_failures: u64,
    pub collisions: u64,
    /// Echoes of our own transmissions, suppressed.
    pub echo_frames: u64,

    /// Nothing between two breaks.
    pub empty_frames: u64,
    /// More than one octet but less than a header.
    pub short_frames: u64,
    pub long_frames: u64,
    /// Frames containing octets with framing errors.
    pub erred_frames: u64,
    pub erred_octets: u64,
    /// Partial frames dropped because the bus went idle.
    pub timeouts: u64,
    /// Events that make no sense in the current state.
    pub protocol_errors: u64,

    pub poll_requests: u64,
    pub polls_for_us: u64,
    pub poll_replies: u64,
    pub write_replies: u64,
    pub read_requests: u64,
    /// Data frames answering a read request.
    pub read_replies: u64,
    /// Data frames not answering a read request, broadcasts excluded.
    pub write_requests: u64,
    pub broadcasts: u64,
    pub ems_plus_frames: u64,
    /// Poll replies carrying our own address, seen while participating.
    pub address_conflicts: u64,
    /// Read and write requests left unanswered.
    pub exchange_timeouts: u64,

    pub egress_frames: u64,
    pub egress_octets: u64,
    pub egress_poll_replies: u64,
    pub egress_read_requests: u64,
    pub egress_write_requests: u64,
    pub egress_broadcasts: u64,
    /// Frames dropped after too many collisions.
    pub transmission_failures: u64,
    /// Transmit requests discarded in monitor mode.
    pub discarded_requests: u64,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            since: SystemTime::now(),
            frames_seen: 0,
            octets_seen: 0,
            frames_for_us: 0,
            checksum_failures: 0,
            collisions: 0,
            echo_frames: 0,
            empty_frames: 0,
            short_frames: 0,
            long_frames: 0,
            erred_frames: 0,
            erred_octets: 0,
            timeouts: 0,
            protocol_errors: 0,
            poll_requests: 0,
            polls_for_us: 0,
            poll_replies: 0,
            write_replies: 0,
            read_requests: 0,
            read_replies: 0,
            write_requests: 0,
            broadcasts: 0,
            ems_plus_frames: 0,
            address_conflicts: 0,
            exchange_timeouts: 0,
            egress_frames: 0,
            egress_octets: 0,
            egress_poll_replies: 0,
            egress_read_requests: 0,
            egress_write_requests: 0,
            egress_broadcasts: 0,
            transmission_failures: 0,
            discarded_requests: 0,
        }
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the counters, for a reporting frontend.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Zero all counters and restart collection.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Account for a frame of `len` octets, plus its break.
    pub(crate) fn frame_seen(&mut self, len: usize) {
        self.frames_seen += 1;
        self.octets_seen += len as u64 + 1;
    }

    pub(crate) fn frame_sent(&mut self, len: usize) {
        self.egress_frames += 1;
        self.egress_octets += len as u64 + 1;
    }

    /// Fraction of delimited frames that failed the checksum.
    pub fn checksum_failure_rate(&self) -> f64 {
        if self.frames_seen == 0 {
            0.0
        } else {
            self.checksum_failures as f64 / self.frames_seen as f64
        }
    }
}
