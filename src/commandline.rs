use crate::config::Config;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use enginemon_lib::protocol::DecodedEntry;
use enginemon_lib::settings::{Parity, StopBits};
use std::path::PathBuf;
use std::time::Duration;

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    /// One line per reading with label and value
    Text,
    /// One JSON object per accepted message
    Json,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum ParityArg {
    None,
    Odd,
    Even,
}

impl From<ParityArg> for Parity {
    fn from(parity: ParityArg) -> Self {
        match parity {
            ParityArg::None => Parity::None,
            ParityArg::Odd => Parity::Odd,
            ParityArg::Even => Parity::Even,
        }
    }
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum StopBitsArg {
    #[value(name = "1")]
    One,
    #[value(name = "2")]
    Two,
}

impl From<StopBitsArg> for StopBits {
    fn from(stop_bits: StopBitsArg) -> Self {
        match stop_bits {
            StopBitsArg::One => StopBits::One,
            StopBitsArg::Two => StopBits::Two,
        }
    }
}

/// Serial line parameters; each one overrides the configuration file
#[derive(clap::Args, Debug, Clone, PartialEq)]
pub struct PortArgs {
    /// Serial port device path (e.g., /dev/ttyUSB0 on Linux, COM1 on Windows)
    #[arg(short, long)]
    pub device: Option<String>,
    /// Baud rate of the controller link
    #[arg(short, long)]
    pub baud_rate: Option<u32>,
    /// Parity of the controller link
    #[arg(long, value_enum)]
    pub parity: Option<ParityArg>,
    /// Number of stop bits
    #[arg(long, value_enum)]
    pub stop_bits: Option<StopBitsArg>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// List the available serial ports
    Ports,
    /// Read frames from the serial port, show the readings and append them to the CSV file
    ///
    /// Runs until Ctrl-C; pending CSV records are flushed before exiting.
    Monitor {
        #[command(flatten)]
        port: PortArgs,
        /// CSV file the accepted messages are appended to
        #[arg(long)]
        csv_file: Option<PathBuf>,
        /// Do not write a CSV file
        #[arg(long, conflicts_with = "csv_file")]
        no_csv: bool,
        /// Interval for flushing the CSV file (e.g., "1s", "500ms")
        #[arg(long, value_parser = humantime::parse_duration)]
        flush_interval: Option<Duration>,
        /// Timeout for a single serial read (e.g., "100ms", "1s")
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Decode hex encoded frames in order, as if they arrived on the serial port
    Decode {
        /// Frames as hex strings (e.g., a5a5a5a5000101006400000...55)
        #[arg(required = true)]
        frames: Vec<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print the hex encoded frame for the given readings
    Encode {
        /// Sequence counter of the frame
        #[arg(short, long, default_value_t = 0)]
        sequence: u8,
        /// Readings as ID=VALUE or ID=VALUE/FACTOR, ID in decimal or 0x hex (e.g., 0x01=1005/10)
        #[arg(value_parser = parse_reading)]
        readings: Vec<DecodedEntry>,
    },
}

const fn about_text() -> &'static str {
    "engine monitor telemetry command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// The configuration file, optional unless given explicitly
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommands,
}

impl CliArgs {
    pub fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => Config::load(path),
            None => Config::load_default(),
        }
    }
}

fn parse_u8(text: &str) -> Result<u8> {
    let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => text.parse(),
    };
    value.with_context(|| format!("Invalid channel id '{text}'"))
}

pub fn parse_reading(text: &str) -> Result<DecodedEntry> {
    let Some((id, value)) = text.split_once('=') else {
        bail!("Expected ID=VALUE[/FACTOR], got '{text}'");
    };
    let (value, factor) = value.split_once('/').unwrap_or((value, "0"));
    Ok(DecodedEntry::new(
        parse_u8(id.trim())?,
        value
            .trim()
            .parse()
            .with_context(|| format!("Invalid raw value '{value}'"))?,
        factor
            .trim()
            .parse()
            .with_context(|| format!("Invalid scale factor '{factor}'"))?,
    ))
}
