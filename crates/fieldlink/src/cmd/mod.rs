use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use fieldlink_frame::{Delimited, Framer, LengthField, LengthPrefixed};
use fieldlink_transport::Parity;

use crate::exit::{CliError, CliResult};
use crate::output::OutputFormat;

pub mod serve;
pub mod transact;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one request to a device and print the framed response.
    Transact(TransactArgs),
    /// Run a DTU server and print registration events.
    Serve(ServeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Transact(args) => transact::run(args, format),
        Command::Serve(args) => serve::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    Tcp,
    Udp,
    Serial,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
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

/// Response framing presets.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum FramerKind {
    Crlf,
    Cr,
    Lf,
    Etx,
    ModbusTcp,
    FinsTcp,
    McBinary,
}

impl FramerKind {
    /// `trailer` counts checksum bytes after the terminator of delimited
    /// framers; length-prefixed presets ignore it.
    pub fn build(self, trailer: usize) -> Arc<dyn Framer> {
        match self {
            Self::Crlf => Arc::new(Delimited::crlf().with_trailer(trailer)),
            Self::Cr => Arc::new(Delimited::cr().with_trailer(trailer)),
            Self::Lf => Arc::new(Delimited::lf().with_trailer(trailer)),
            Self::Etx => Arc::new(Delimited::etx(trailer)),
            Self::ModbusTcp => Arc::new(LengthPrefixed::new(LengthField::modbus_tcp())),
            Self::FinsTcp => Arc::new(LengthPrefixed::new(LengthField::fins_tcp())),
            Self::McBinary => Arc::new(LengthPrefixed::new(LengthField::mc_binary())),
        }
    }
}

#[derive(Args, Debug)]
pub struct TransactArgs {
    /// `host:port` for TCP/UDP, port name for serial.
    pub target: String,
    #[arg(long, short = 't', value_enum, default_value = "tcp")]
    pub transport: TransportKind,
    /// Serial baud rate.
    #[arg(long, default_value = "9600")]
    pub baud: u32,
    #[arg(long, default_value = "8")]
    pub data_bits: u8,
    #[arg(long, default_value = "1")]
    pub stop_bits: u8,
    #[arg(long, value_enum, default_value = "none")]
    pub parity: ParityArg,
    /// How the response is delimited.
    #[arg(long, value_enum, default_value = "crlf")]
    pub framer: FramerKind,
    /// Checksum bytes following the terminator.
    #[arg(long, default_value = "0")]
    pub trailer: usize,
    /// Text request; `\r`, `\n`, `\t`, `\\` and `\xHH` escapes are decoded.
    #[arg(long, conflicts_with_all = ["hex", "file"])]
    pub data: Option<String>,
    /// Hex request, whitespace ignored (e.g. "00 01 00 00 00 06 01 03 00 00 00 02").
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub hex: Option<String>,
    /// Read the request from a file.
    #[arg(long, conflicts_with_all = ["data", "hex"])]
    pub file: Option<PathBuf>,
    /// Receive timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Connect timeout.
    #[arg(long, default_value = "10s")]
    pub connect_timeout: String,
    /// Pause between sending the request and reading the response.
    #[arg(long, default_value = "0ms")]
    pub delay: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum RegistrationKind {
    /// Binary `Hsn` handshake with status reply.
    Hs,
    /// Identifier on one text line, no reply.
    Line,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// JSON server configuration; flags override its fields.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Listen address.
    #[arg(long)]
    pub bind: Option<String>,
    /// Trusted identifiers (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub trust: Option<Vec<String>>,
    #[arg(long, value_enum, default_value = "hs")]
    pub registration: RegistrationKind,
    /// Registration window (e.g. 10s).
    #[arg(long)]
    pub registration_timeout: Option<String>,
    /// Exit after printing N events.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `5s`, `500ms` or a bare number of seconds.
pub fn parse_duration(input: &str, allow_zero: bool) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;
    if value == 0 && !allow_zero {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
