mod common;

use anyhow::Result;
use common::{init_logging, wire, BusLine, SimPort};
use std::time::{Duration, Instant};

use emsbus_proto::bus::BusState;
use emsbus_proto::session::SessionState;
use emsbus_proto::{
    addr, BusConfig, Completion, Driver, Error, Filter, Frame, Signal,
};

const DEVICE: u8 = 0x0b;

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(5)
}

fn thermostat_write() -> Frame {
    // Set the room temperature set point of HC1 to 21.5 degrees
    Frame::write_request(addr(DEVICE), addr(0x10), 0x3d, 0x02, &[0x2b]).unwrap()
}

fn with_break(octets: &[u8]) -> Vec<Signal> {
    octets
        .iter()
        .map(|&octet| Signal::Byte(octet))
        .chain(Some(Signal::Break))
        .collect()
}

#[test]
fn write_is_sent_when_polled() -> Result<()> {
    init_logging();
    let line = BusLine::new();
    let mut driver = Driver::new(SimPort::new(&line), BusConfig::new(DEVICE)?)?;

    // Polls for other devices don't get us talking
    line.borrow_mut().poll(0x08);
    line.borrow_mut().poll(DEVICE);

    let frame = thermostat_write();
    let sent = driver.write(frame.clone(), deadline())?;
    assert_eq!(sent, frame);
    assert_eq!(line.borrow().written(), with_break(&wire(&frame)).as_slice());

    assert_eq!(driver.bus().state(), BusState::Idle);
    assert_eq!(driver.session().state(), SessionState::Idle);
    let stats = driver.statistics();
    assert_eq!(stats.poll_requests, 2);
    assert_eq!(stats.polls_for_us, 1);
    assert_eq!(stats.egress_frames, 1);
    assert_eq!(stats.echo_frames, 1);
    assert_eq!(stats.frames_seen, 2);
    Ok(())
}

#[test]
fn empty_queue_poll_gets_poll_reply() -> Result<()> {
    init_logging();
    let line = BusLine::new();
    let mut driver = Driver::new(SimPort::new(&line), BusConfig::new(DEVICE)?)?;

    line.borrow_mut().poll(DEVICE);
    driver.poll(Instant::now())?;

    assert_eq!(line.borrow().written(), with_break(&[DEVICE]).as_slice());
    assert!(line.borrow().is_drained());
    let stats = driver.statistics();
    assert_eq!(stats.egress_poll_replies, 1);
    assert_eq!(stats.address_conflicts, 0);
    assert_eq!(driver.bus().state(), BusState::Idle);
    Ok(())
}

#[test]
fn collision_retransmits_whole_frame() -> Result<()> {
    init_logging();
    let line = BusLine::new();
    let mut driver = Driver::new(SimPort::new(&line), BusConfig::new(DEVICE)?)?;
    let frame = thermostat_write();
    let octets = wire(&frame);

    {
        let mut line = line.borrow_mut();
        line.collide_after(2);
        line.poll(DEVICE);
        // The other talker finishes its frame
        line.send(&[0x33, 0x44]);
        line.poll(DEVICE);
    }

    driver.write(frame.clone(), deadline())?;

    let written = line.borrow().written_frames();
    assert_eq!(written.len(), 1);
    let mut expected = octets[..3].to_vec();
    expected.extend_from_slice(&octets);
    assert_eq!(written[0], expected);

    let stats = driver.statistics();
    assert_eq!(stats.collisions, 1);
    assert_eq!(stats.egress_frames, 1);
    assert_eq!(stats.transmission_failures, 0);
    Ok(())
}

#[test]
fn write_fails_after_retries() -> Result<()> {
    init_logging();
    let line = BusLine::new();
    let config = BusConfig::new(DEVICE)?.with_max_retries(0);
    let mut driver = Driver::new(SimPort::new(&line), config)?;
    let frame = thermostat_write();

    {
        let mut line = line.borrow_mut();
        line.collide_after(0);
        line.poll(DEVICE);
        line.send_signal(Signal::Break);
    }

    match driver.write(frame.clone(), deadline()) {
        Err(Error::TransmissionFailed { frame: failed }) => assert_eq!(failed, frame),
        other => panic!("Unexpected result {:?}", other),
    }
    assert_eq!(driver.statistics().transmission_failures, 1);
    assert_eq!(driver.bus().queued().count(), 0);
    assert!(!driver.session().is_busy());
    Ok(())
}

#[test]
fn read_register_round_trip() -> Result<()> {
    init_logging();
    let line = BusLine::new();
    let mut driver = Driver::new(SimPort::new(&line), BusConfig::new(DEVICE)?)?;

    let reply = Frame::new(addr(0x08), DEVICE, 0x18, &[0x00, 0x02, 0x1c, 0x37])?;
    {
        let mut line = line.borrow_mut();
        line.poll(DEVICE);
        line.send_frame(&reply);
    }

    let received = driver.read_register(addr(0x08), 0x18, 0x00, 3, deadline())?;
    assert_eq!(received, reply);

    let request = wire(&Frame::read_request(addr(DEVICE), addr(0x08), 0x18, 0x00, 3)?);
    assert_eq!(&request[..5], &[DEVICE, 0x88, 0x18, 0x00, 0x03]);
    // The answered request hands the bus back with a poll reply
    assert_eq!(line.borrow().written_frames(), vec![request, vec![DEVICE]]);
    let stats = driver.statistics();
    assert_eq!(stats.egress_read_requests, 1);
    assert_eq!(stats.read_replies, 1);
    assert_eq!(stats.egress_poll_replies, 1);
    assert_eq!(stats.protocol_errors, 0);
    Ok(())
}

#[test]
fn write_register_is_acknowledged() -> Result<()> {
    init_logging();
    let line = BusLine::new();
    let mut driver = Driver::new(SimPort::new(&line), BusConfig::new(DEVICE)?)?;
    {
        let mut line = line.borrow_mut();
        line.poll(DEVICE);
        line.send(&[0x01]);
    }

    let sent = driver.write_register(addr(0x10), 0x3d, 0x02, &[0x2b], deadline())?;
    assert_eq!(sent, thermostat_write());
    assert_eq!(
        line.borrow().written_frames(),
        vec![wire(&thermostat_write()), vec![DEVICE]]
    );
    assert!(!driver.bus().awaiting_reply());
    let stats = driver.statistics();
    assert_eq!(stats.egress_write_requests, 1);
    assert_eq!(stats.write_replies, 1);
    assert_eq!(stats.egress_poll_replies, 1);
    assert_eq!(stats.echo_frames, 2);
    Ok(())
}

#[test]
fn write_register_is_refused() -> Result<()> {
    init_logging();
    let line = BusLine::new();
    let mut driver = Driver::new(SimPort::new(&line), BusConfig::new(DEVICE)?)?;
    {
        let mut line = line.borrow_mut();
        line.poll(DEVICE);
        line.send(&[0x04]);
    }

    match driver.write_register(addr(0x10), 0x3d, 0x02, &[0x2b], deadline()) {
        Err(Error::Refused { frame }) => assert_eq!(frame, thermostat_write()),
        other => panic!("Unexpected result {:?}", other),
    }
    assert!(!driver.session().is_busy());
    Ok(())
}

#[test]
fn unanswered_write_hands_bus_back() -> Result<()> {
    init_logging();
    let line = BusLine::new();
    let mut driver = Driver::new(SimPort::new(&line), BusConfig::new(DEVICE)?)?;
    line.borrow_mut().poll(DEVICE);

    driver.write(thermostat_write(), deadline())?;
    assert!(driver.bus().awaiting_reply());

    let later = Instant::now() + Duration::from_millis(200);
    driver.poll(later)?;
    driver.poll(later)?;
    assert!(!driver.bus().awaiting_reply());
    assert_eq!(
        line.borrow().written_frames(),
        vec![wire(&thermostat_write()), vec![DEVICE]]
    );
    assert!(line.borrow().is_drained());
    let stats = driver.statistics();
    assert_eq!(stats.exchange_timeouts, 1);
    assert_eq!(stats.echo_frames, 2);
    assert_eq!(stats.address_conflicts, 0);
    Ok(())
}

#[test]
fn frames_not_for_us_are_not_delivered() -> Result<()> {
    init_logging();
    let line = BusLine::new();
    let mut driver = Driver::new(SimPort::new(&line), BusConfig::new(DEVICE)?)?;
    let foreign = Frame::new(addr(0x08), 0x10, 0x18, &[0x00, 0x01])?;
    let broadcast = Frame::new(addr(0x10), 0x00, 0x06, &[0x00, 0x17, 0x0a, 0x0c, 0x13, 0x2d, 0x00])?;
    {
        let mut line = line.borrow_mut();
        line.send_frame(&foreign);
        line.send_frame(&broadcast);
    }

    driver.request_read(Filter::any())?;
    driver.poll(Instant::now())?;
    assert_eq!(driver.take_completion(), Some(Completion::Read(broadcast)));
    assert_eq!(driver.take_completion(), None);
    assert_eq!(driver.statistics().frames_for_us, 1);
    Ok(())
}

#[test]
fn idle_bus_ends_read() -> Result<()> {
    init_logging();
    let line = BusLine::new();
    let mut driver = Driver::new(SimPort::new(&line), BusConfig::new(DEVICE)?)?;

    let filter = Filter::any().with_type(0x06);
    driver.request_read(filter)?;
    assert!(matches!(driver.request_read(Filter::any()), Err(Error::Busy)));

    driver.poll(Instant::now() + Duration::from_secs(1))?;
    assert_eq!(driver.take_completion(), Some(Completion::ReadTimedOut(filter)));
    assert!(!driver.session().is_busy());
    Ok(())
}

#[test]
fn idle_bus_ends_write() -> Result<()> {
    init_logging();
    let line = BusLine::new();
    let mut driver = Driver::new(SimPort::new(&line), BusConfig::new(DEVICE)?)?;

    let frame = thermostat_write();
    driver.request_write(frame.clone())?;
    assert_eq!(driver.bus().queued().count(), 1);

    driver.poll(Instant::now() + Duration::from_secs(1))?;
    assert_eq!(driver.take_completion(), Some(Completion::WriteTimedOut(frame)));
    assert_eq!(driver.bus().queued().count(), 0);
    assert!(!driver.session().is_busy());

    // A later poll gets a poll reply, not the stale frame
    line.borrow_mut().poll(DEVICE);
    driver.poll(Instant::now())?;
    assert_eq!(line.borrow().written(), with_break(&[DEVICE]).as_slice());
    Ok(())
}

#[test]
fn blocking_write_times_out() -> Result<()> {
    init_logging();
    let line = BusLine::new();
    let config = BusConfig::new(DEVICE)?.with_idle_timeout(Duration::from_secs(60));
    let mut driver = Driver::new(SimPort::new(&line), config)?;

    let result = driver.write(thermostat_write(), Instant::now() + Duration::from_millis(20));
    assert!(matches!(result, Err(Error::TimedOut)));
    assert!(!driver.session().is_busy());
    assert_eq!(driver.bus().queued().count(), 0);
    driver.request_read(Filter::any())?;
    Ok(())
}

#[test]
fn blocking_read_times_out() -> Result<()> {
    init_logging();
    let line = BusLine::new();
    let config = BusConfig::new(DEVICE)?.with_idle_timeout(Duration::from_secs(60));
    let mut driver = Driver::new(SimPort::new(&line), config)?;

    let result = driver.read(Filter::any(), Instant::now() + Duration::from_millis(20));
    assert!(matches!(result, Err(Error::TimedOut)));
    assert!(!driver.session().is_busy());
    Ok(())
}

#[test]
fn transport_errors_are_reported() -> Result<()> {
    init_logging();
    let line = BusLine::new();
    let mut driver = Driver::new(SimPort::new(&line), BusConfig::new(DEVICE)?)?;

    line.borrow_mut().trigger_read_error();
    assert!(matches!(driver.poll(Instant::now()), Err(Error::Io { .. })));

    line.borrow_mut().trigger_write_error();
    line.borrow_mut().poll(DEVICE);
    assert!(matches!(driver.poll(Instant::now()), Err(Error::Io { .. })));
    Ok(())
}
