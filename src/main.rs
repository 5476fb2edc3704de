// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

// Bytelink protocol implementation
mod checksum;
mod protocol;
mod receiver;
mod sampler;
mod sender;
mod serial;
mod session;

use clap::Parser;
use serialport::{DataBits, Parity, StopBits};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use sampler::RateSink;
use serial::RealSerialPort;
use session::SessionConfig;

#[derive(Parser)]
#[command(name = "bytelink")]
#[command(about = "Reliable byte-at-a-time serial transfer with CRC-8 acknowledgment", long_about = None)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM3)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "2400")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name="BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name="BITS")]
    stop_bits: u8,

    /// Throughput sampling interval in seconds
    #[arg(long, default_value = "1", value_name = "SECS")]
    interval: u64,

    /// Give up when the peer sends nothing for this long (default: wait forever)
    #[arg(long, value_name = "SECS")]
    read_timeout: Option<u64>,

    /// Give up after this many consecutive retransmissions of one byte
    /// (default: retry forever)
    #[arg(long, value_name = "COUNT")]
    max_retries: Option<usize>,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    /// File whose bytes are streamed to the peer
    file: PathBuf,
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

/// Prints each sampler tick on the console
struct ConsoleRate;

impl RateSink for ConsoleRate {
    fn report(&mut self, _timestamp: SystemTime, bits_per_second: f64) {
        println!("Transmission speed (bits/sec) = {}", bits_per_second);
    }
}

fn main() {
    let cli = Cli::parse();

    let data_bits = match parse_data_bits(cli.data_bits) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let parity = match parse_parity(&cli.parity) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let stop_bits = match parse_stop_bits(cli.stop_bits) {
        Ok(sb) => sb,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if cli.interval == 0 {
        eprintln!("Error: sampling interval must be at least 1 second");
        std::process::exit(1);
    }

    let payload = match std::fs::read(&cli.file) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Failed to read {}: {}", cli.file.display(), e);
            std::process::exit(1);
        }
    };

    println!("Opening serial port: {}", cli.port);
    println!("Settings: {} baud, {:?}, {:?}, {:?}", cli.baud, data_bits, parity, stop_bits);

    let mut serial_port = match RealSerialPort::open(
        &cli.port,
        cli.baud,
        data_bits,
        parity,
        stop_bits,
        cli.read_timeout.map(Duration::from_secs),
    ) {
        Ok(port) => port,
        Err(e) => {
            eprintln!("Failed to open serial port: {}", e);
            std::process::exit(1);
        }
    };

    let config = SessionConfig {
        sample_interval: Duration::from_secs(cli.interval),
        retry_limit: cli.max_retries,
        debug: cli.debug,
    };

    println!("\nSending {} bytes from {}...", payload.len(), cli.file.display());

    let reply = match session::run(
        &mut serial_port,
        Box::new(payload.into_iter()),
        Box::new(ConsoleRate),
        &config,
    ) {
        Ok(reply) => reply,
        Err(e) => {
            eprintln!("Transfer failed: {}", e);
            std::process::exit(1);
        }
    };

    println!("\nReceiving done!");
    println!("\nData received:");
    println!("{}", String::from_utf8_lossy(&reply));
}
