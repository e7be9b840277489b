//! Watch an EMS bus through a serial adapter.
//!
//! ```text
//! cargo run --example ems_monitor -- /dev/ttyUSB0 0x0b monitor
//! ```
//!
//! Without `PARMRK` the serial port reports a break as a NUL octet, so a NUL
//! followed by silence is taken as the end of a frame.

use anyhow::{bail, Context, Result};
use log::{info, warn};
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use emsbus_proto::field::{Field, Layout};
use emsbus_proto::{BusConfig, Completion, Driver, Filter, Mode, Signal, Transport};

struct SerialLine {
    port: Box<dyn SerialPort>,
    held: Option<u8>,
    in_frame: bool,
    break_due: bool,
}

impl SerialLine {
    fn new(port: Box<dyn SerialPort>) -> Self {
        Self {
            port,
            held: None,
            in_frame: false,
            break_due: false,
        }
    }

    fn end_frame(&mut self) -> Option<Signal> {
        self.in_frame = false;
        Some(Signal::Break)
    }
}

impl Transport for SerialLine {
    fn read(&mut self) -> io::Result<Option<Signal>> {
        if self.break_due {
            self.break_due = false;
            return Ok(self.end_frame());
        }
        let mut octet = [0];
        match self.port.read(&mut octet) {
            Ok(1) => {
                self.in_frame = true;
                Ok(self.held.replace(octet[0]).map(Signal::Byte))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                if !self.in_frame {
                    return Ok(None);
                }
                match self.held.take() {
                    Some(octet) if octet != 0x00 => {
                        self.break_due = true;
                        Ok(Some(Signal::Byte(octet)))
                    }
                    _ => Ok(self.end_frame()),
                }
            }
            Err(e) => Err(e),
        }
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.port.write_all(&[byte])
    }

    fn send_break(&mut self) -> io::Result<()> {
        self.port.set_break().map_err(io::Error::from)?;
        std::thread::sleep(Duration::from_millis(1));
        self.port.clear_break().map_err(io::Error::from)
    }
}

fn parse_mode(arg: &str) -> Result<Mode> {
    Ok(match arg {
        "monitor" => Mode::Monitor,
        "participate" => Mode::Participate,
        "mixed" => Mode::Mixed,
        _ => bail!("Unknown mode {}", arg),
    })
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args();
    args.next(); // Skip program name
    let port = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let device = match args.next() {
        Some(arg) => u8::from_str_radix(arg.trim_start_matches("0x"), 16)
            .with_context(|| format!("Invalid device address {}", arg))?,
        None => 0x0b,
    };
    let mode = parse_mode(&args.next().unwrap_or_else(|| "monitor".to_string()))?;

    let serial = serialport::new(&port, 9600)
        .timeout(Duration::from_millis(2))
        .open()
        .with_context(|| format!("Failed to open serial port {}", port))?;

    let config = BusConfig::new(device)?.with_mode(mode);
    let mut driver = Driver::new(SerialLine::new(serial), config)?;

    // The thermostat broadcasts date and time in type 0x06
    let mut clock = Field::new(0, Layout::Timestamp)?;
    let mut report_at = Instant::now() + Duration::from_secs(60);

    loop {
        if !driver.session().is_busy() {
            driver.request_read(Filter::any())?;
        }
        driver.poll(Instant::now())?;

        while let Some(completion) = driver.take_completion() {
            if let Completion::Read(frame) = completion {
                println!("{:?}", frame);
                if frame.frame_type() == Some(0x06) {
                    match clock.extract(&frame) {
                        Ok(Some(time)) => info!("Bus time {}", time),
                        Ok(None) => {}
                        Err(e) => warn!("Bad date frame: {}", e),
                    }
                }
            }
        }

        if Instant::now() >= report_at {
            report_at += Duration::from_secs(60);
            let stats = driver.statistics();
            info!(
                "{} frames, {} checksum failures, {} collisions",
                stats.frames_seen, stats.checksum_failures, stats.collisions
            );
        }
    }
}
