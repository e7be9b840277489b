mod common;

use anyhow::Result;
use common::{init_logging, wire, BusLine, SimPort};
use std::time::Instant;

use emsbus_proto::parmrk::{self, ParmrkDecoder};
use emsbus_proto::{
    addr, BusConfig, BusSession, Checksum, Completion, Driver, Error, Filter, Frame, FrameKind,
    Mode, Signal,
};

fn monitor_config() -> BusConfig {
    BusConfig::new(0x0b).unwrap().with_mode(Mode::Monitor)
}

#[test]
fn monitor_never_writes() -> Result<()> {
    init_logging();
    let line = BusLine::new();
    let mut driver = Driver::new(SimPort::new(&line), monitor_config())?;

    let frame = Frame::write_request(addr(0x0b), addr(0x10), 0x3d, 0x02, &[0x2b])?;
    assert!(matches!(driver.request_write(frame), Err(Error::ReadOnly)));

    line.borrow_mut().poll(0x0b);
    line.borrow_mut().poll(0x0b);
    driver.poll(Instant::now())?;

    assert!(line.borrow().written().is_empty());
    assert_eq!(driver.statistics().polls_for_us, 2);
    assert_eq!(driver.statistics().egress_frames, 0);
    Ok(())
}

#[test]
fn monitor_reads_all_traffic() -> Result<()> {
    init_logging();
    let line = BusLine::new();
    let mut driver = Driver::new(SimPort::new(&line), monitor_config())?;

    let request = Frame::read_request(addr(0x10), addr(0x08), 0x18, 0x00, 0x1b)?;
    let reply = Frame::new(addr(0x08), 0x10, 0x18, &[0x00, 0x02, 0x1c])?;
    {
        let mut line = line.borrow_mut();
        line.poll(0x10);
        line.send_frame(&request);
        line.send_frame(&reply);
        line.send(&[0x10]);
    }

    let mut seen = Vec::new();
    driver.request_read(Filter::any())?;
    driver.poll(Instant::now())?;
    while let Some(Completion::Read(frame)) = driver.take_completion() {
        seen.push(frame.kind());
        driver.request_read(Filter::any())?;
    }

    assert_eq!(
        seen,
        vec![
            FrameKind::PollRequest(addr(0x10)),
            FrameKind::ReadRequest,
            FrameKind::ReplyOrWrite,
            FrameKind::PollReply(addr(0x10)),
        ]
    );
    let stats = driver.statistics();
    assert_eq!(stats.frames_seen, 4);
    assert_eq!(stats.frames_for_us, 0);
    assert_eq!(stats.octets_seen, 2 + 7 + 8 + 2);
    assert_eq!(stats.read_requests, 1);
    assert_eq!(stats.read_replies, 1);
    assert_eq!(stats.write_requests, 0);
    assert_eq!(stats.protocol_errors, 0);
    Ok(())
}

#[test]
fn corrupted_frame_is_dropped() -> Result<()> {
    init_logging();
    let line = BusLine::new();
    let mut driver = Driver::new(SimPort::new(&line), monitor_config())?;

    let frame = Frame::new(addr(0x08), 0x00, 0x07, &[0x00, 0x0b, 0x80, 0x00])?;
    let mut octets = wire(&frame);
    octets[3] ^= 0x01;
    {
        let mut line = line.borrow_mut();
        line.send(&octets);
        line.send_frame(&frame);
    }

    driver.request_read(Filter::any())?;
    driver.poll(Instant::now())?;
    assert_eq!(driver.take_completion(), Some(Completion::Read(frame)));
    assert_eq!(driver.take_completion(), None);
    assert_eq!(driver.statistics().checksum_failures, 1);
    Ok(())
}

#[test]
fn replay_parmrk_capture() -> Result<()> {
    init_logging();
    // Two frames as a tty with PARMRK presents them: the boiler's
    // UBAMonitorWWMessage carries a literal ff, which the tty doubles.
    let boiler = Frame::new(addr(0x08), 0x00, 0x34, &[0x00, 0x37, 0xff, 0x02])?;
    let poll = Frame::single(0x88);
    let mut signals: Vec<Signal> = Vec::new();
    for frame in [&boiler, &poll].iter() {
        signals.extend(
            frame
                .to_wire(Checksum::Ems)
                .iter()
                .map(|&octet| Signal::Byte(octet)),
        );
        signals.push(Signal::Break);
    }
    let capture = parmrk::encode(&signals);
    assert!(capture.windows(2).any(|pair| pair == [0xff, 0xff]));

    let mut bus = BusSession::new(monitor_config())?;
    let mut decoder = ParmrkDecoder::new();
    for signal in decoder.decode(&capture) {
        bus.feed(signal)?;
    }

    assert_eq!(bus.take_delivered(), Some(boiler));
    assert_eq!(bus.take_delivered(), Some(poll));
    assert_eq!(bus.take_delivered(), None);
    Ok(())
}
