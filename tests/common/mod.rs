#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{Error, ErrorKind};
use std::rc::Rc;

use emsbus_proto::{Checksum, Frame, Signal, Transport};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// On-wire octets of a frame, EMS checksum included.
pub fn wire(frame: &Frame) -> Vec<u8> {
    frame.to_wire(Checksum::Ems).to_vec()
}

/// A simulated bus segment: scripted traffic from the other devices, plus the
/// echo of everything our device writes.
pub struct BusLine {
    script: VecDeque<Signal>,
    echo: VecDeque<Signal>,
    written: Vec<Signal>,
    collide_after: Option<usize>,
    do_read_error: bool,
    do_write_error: bool,
}

impl BusLine {
    pub fn new() -> Rc<RefCell<BusLine>> {
        Rc::new(RefCell::new(BusLine {
            script: VecDeque::new(),
            echo: VecDeque::new(),
            written: Vec::new(),
            collide_after: None,
            do_read_error: false,
            do_write_error: false,
        }))
    }

    /// Another device puts `octets` and a break on the bus.
    pub fn send(&mut self, octets: &[u8]) {
        self.script
            .extend(octets.iter().map(|&octet| Signal::Byte(octet)));
        self.script.push_back(Signal::Break);
    }

    pub fn send_frame(&mut self, frame: &Frame) {
        self.send(&wire(frame));
    }

    /// The bus master polls `address`.
    pub fn poll(&mut self, address: u8) {
        self.send(&[address | 0x80]);
    }

    pub fn send_signal(&mut self, signal: Signal) {
        self.script.push_back(signal);
    }

    /// Garble the echo of the octet written after `n` more clean ones.
    pub fn collide_after(&mut self, n: usize) {
        self.collide_after = Some(n);
    }

    pub fn trigger_read_error(&mut self) {
        self.do_read_error = true;
    }

    pub fn trigger_write_error(&mut self) {
        self.do_write_error = true;
    }

    pub fn written(&self) -> &[Signal] {
        &self.written
    }

    /// Octets written by our device, one vector per break-terminated frame.
    pub fn written_frames(&self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        let mut current = Vec::new();
        for signal in &self.written {
            match signal {
                Signal::Byte(octet) => current.push(*octet),
                _ => frames.push(std::mem::take(&mut current)),
            }
        }
        frames
    }

    pub fn is_drained(&self) -> bool {
        self.script.is_empty() && self.echo.is_empty()
    }
}

/// Our device's port on a [`BusLine`].
pub struct SimPort(Rc<RefCell<BusLine>>);

impl SimPort {
    pub fn new(line: &Rc<RefCell<BusLine>>) -> SimPort {
        SimPort(Rc::clone(line))
    }
}

impl Transport for SimPort {
    fn read(&mut self) -> std::io::Result<Option<Signal>> {
        let mut line = self.0.borrow_mut();
        if line.do_read_error {
            line.do_read_error = false;
            return Err(Error::new(ErrorKind::PermissionDenied, "read error"));
        }
        match line.echo.pop_front() {
            Some(signal) => Ok(Some(signal)),
            None => Ok(line.script.pop_front()),
        }
    }

    fn write_byte(&mut self, byte: u8) -> std::io::Result<()> {
        let mut line = self.0.borrow_mut();
        if line.do_write_error {
            line.do_write_error = false;
            return Err(Error::new(ErrorKind::PermissionDenied, "write error"));
        }
        line.written.push(Signal::Byte(byte));
        let echo = match line.collide_after {
            Some(0) => {
                line.collide_after = None;
                Signal::Byte(byte ^ 0x5a)
            }
            Some(n) => {
                line.collide_after = Some(n - 1);
                Signal::Byte(byte)
            }
            None => Signal::Byte(byte),
        };
        line.echo.push_back(echo);
        Ok(())
    }

    fn send_break(&mut self) -> std::io::Result<()> {
        let mut line = self.0.borrow_mut();
        line.written.push(Signal::Break);
        line.echo.push_back(Signal::Break);
        Ok(())
    }
}
