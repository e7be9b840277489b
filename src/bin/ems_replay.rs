//! Replay a captured EMS bus stream.
//!
//! Reads raw tty input captured with `PARMRK` set from stdin, and prints every
//! valid frame followed by the bus statistics.
//!
//! ```text
//! ems_replay [device] < capture.bin
//! ```

use std::error::Error;
use std::io::{self, Read, Write};

use emsbus_proto::parmrk::ParmrkDecoder;
use emsbus_proto::{BusConfig, BusSession, Mode, Statistics};

fn print_statistics(out: &mut impl Write, stats: &Statistics) -> io::Result<()> {
    writeln!(out, "frames seen       {}", stats.frames_seen)?;
    writeln!(out, "octets seen       {}", stats.octets_seen)?;
    writeln!(out, "frames for device {}", stats.frames_for_us)?;
    writeln!(out, "checksum failures {}", stats.checksum_failures)?;
    writeln!(out, "empty frames      {}", stats.empty_frames)?;
    writeln!(out, "short frames      {}", stats.short_frames)?;
    writeln!(out, "long frames       {}", stats.long_frames)?;
    writeln!(out, "erred frames      {}", stats.erred_frames)?;
    writeln!(out, "poll requests     {}", stats.poll_requests)?;
    writeln!(out, "poll replies      {}", stats.poll_replies)?;
    writeln!(out, "write replies     {}", stats.write_replies)?;
    writeln!(out, "read requests     {}", stats.read_requests)?;
    writeln!(out, "read replies      {}", stats.read_replies)?;
    writeln!(out, "write requests    {}", stats.write_requests)?;
    writeln!(out, "no answer         {}", stats.exchange_timeouts)?;
    writeln!(out, "protocol errors   {}", stats.protocol_errors)?;
    writeln!(out, "broadcasts        {}", stats.broadcasts)?;
    writeln!(out, "EMS+ frames       {}", stats.ems_plus_frames)
}

fn replay_main_loop(device: u8) -> Result<(), Box<dyn Error>> {
    let mut bus = BusSession::new(BusConfig::new(device)?.with_mode(Mode::Monitor))?;
    let mut decoder = ParmrkDecoder::new();

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let mut buf = [0; 256];
    loop {
        let len = input.read(&mut buf)?;
        if len == 0 {
            break;
        }
        for signal in decoder.decode(&buf[..len]) {
            bus.feed(signal)?;
            while let Some(frame) = bus.take_delivered() {
                writeln!(out, "{:<20} {:?}", format!("{:?}", frame.kind()), frame)?;
            }
        }
    }

    writeln!(out)?;
    print_statistics(&mut out, &bus.statistics())?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let device = match std::env::args().nth(1) {
        Some(arg) => u8::from_str_radix(arg.trim_start_matches("0x"), 16)?,
        None => 0x0b,
    };
    replay_main_loop(device)
}
