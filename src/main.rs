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

use clap::{Parser, Subcommand};
use serialport::{DataBits, Parity, StopBits};
use std::path::PathBuf;
use xmlink::config::TransferConfig;
use xmlink::format::{parse_hex, DisplayMode};
use xmlink::logging;
use xmlink::rate_limit::RateLimitConfig;
use xmlink::serial::{self, Inbound, Link, RealSerialPort};
use xmlink::session::Session;
use xmlink::storage::FileStorage;

#[derive(Parser)]
#[command(name = "xmlink")]
#[command(about = "XMODEM file transfer over a serial port", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
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

    /// Split every write into chunks with a pause in between
    #[arg(long)]
    rate_limit: bool,

    /// Bytes per chunk when rate limiting
    #[arg(long, default_value = "64", value_name = "BYTES", value_parser = clap::value_parser!(u16).range(1..))]
    chunk_size: u16,

    /// Pause in milliseconds between chunks when rate limiting
    #[arg(long, default_value = "10", value_name = "MS")]
    chunk_delay: u64,

    /// Show received traffic as hex instead of text
    #[arg(long)]
    hex: bool,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file using XMODEM
    Send {
        /// File to send
        file: PathBuf,
    },
    /// Receive a file using XMODEM (CRC mode)
    Receive {
        /// Where to save the received file (default: ./received_file.bin)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Send raw data through the rate limiter (no XMODEM framing)
    SendText {
        /// Text to send, or hex pairs with --hex
        data: String,

        /// Parse DATA as hex pairs (e.g. "AA BB CC")
        #[arg(long)]
        hex: bool,
    },
    /// Send CAN until the remote side responds
    Cancel,
    /// Log everything received on the port
    Monitor,
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

fn transfer_config(cli: &Cli) -> TransferConfig {
    TransferConfig {
        rate_limit: RateLimitConfig {
            enabled: cli.rate_limit,
            chunk_size: cli.chunk_size as usize,
            delay_ms: cli.chunk_delay,
        },
        ..TransferConfig::default()
    }
}

fn exit_with(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.debug);

    let data_bits = parse_data_bits(cli.data_bits).unwrap_or_else(|e| exit_with(e));
    let parity = parse_parity(&cli.parity).unwrap_or_else(|e| exit_with(e));
    let stop_bits = parse_stop_bits(cli.stop_bits).unwrap_or_else(|e| exit_with(e));

    println!("Opening serial port: {}", cli.port);
    println!("Settings: {} baud, {:?}, {:?}, {:?}", cli.baud, data_bits, parity, stop_bits);

    let serial_port = match RealSerialPort::open(&cli.port, cli.baud, data_bits, parity, stop_bits) {
        Ok(port) => port,
        Err(e) => exit_with(format!("Failed to open serial port: {}", e)),
    };

    let display = if cli.hex { DisplayMode::Hex } else { DisplayMode::Ascii };
    let inbound = Inbound::new(display);
    let reader = serial_port
        .reader()
        .map_err(|e| e.to_string())
        .and_then(|port| serial::spawn_reader(port, inbound.clone()).map_err(|e| e.to_string()))
        .unwrap_or_else(|e| exit_with(format!("Failed to start serial reader: {}", e)));

    let link = Link::new(Box::new(serial_port), inbound);
    let session = Session::new(link, transfer_config(&cli));

    match cli.command {
        Commands::Send { file } => {
            println!("\nSending file: {}", file.display());
            let data = std::fs::read(&file)
                .unwrap_or_else(|e| exit_with(format!("Cannot read {}: {}", file.display(), e)));
            match session.upload(data) {
                Ok(report) => println!(
                    "\nFile sent successfully! {} blocks ({} mode)",
                    report.blocks, report.verify
                ),
                Err(e) => exit_with(format!("Send failed: {}", e)),
            }
        }
        Commands::Receive { output } => {
            let mut storage = FileStorage::new(output, ".");
            match session.download(&mut storage) {
                Ok(report) => println!(
                    "\nReceived {} blocks ({} bytes), saved to {}",
                    report.blocks,
                    report.bytes,
                    report.saved_to.display()
                ),
                Err(e) => exit_with(format!("Receive failed: {}", e)),
            }
        }
        Commands::SendText { data, hex } => {
            let bytes = if hex {
                parse_hex(&data).unwrap_or_else(|e| exit_with(e))
            } else {
                data.into_bytes()
            };
            let result = session.send_raw(&bytes, &mut |sent: usize, total: usize| {
                eprint!("\rSent {}/{} bytes ({}%)", sent, total, sent * 100 / total);
            });
            eprintln!();
            match result {
                Ok(sent) => println!("Sent {} bytes", sent),
                Err(e) => exit_with(format!("Send failed: {}", e)),
            }
        }
        Commands::Cancel => match session.cancel_sequence() {
            Ok(outcome) if outcome.responded => println!("Remote responded after {} CAN", outcome.sent),
            Ok(outcome) => println!("No response to {} CAN", outcome.sent),
            Err(e) => exit_with(format!("Cancel failed: {}", e)),
        },
        Commands::Monitor => {
            println!("Monitoring {} (Ctrl-C to quit)", cli.port);
            if reader.join().is_err() {
                exit_with("Serial reader panicked");
            }
        }
    }
}
