use std::fs;
use std::time::Instant;

use fieldlink_engine::TransactionEngine;
use fieldlink_transport::{Channel, ChannelOptions, Endpoint, SerialSettings};

use crate::cmd::{parse_duration, TransactArgs, TransportKind};
use crate::exit::{engine_error, io_error, CliError, CliResult, SUCCESS};
use crate::output::{print_response, OutputFormat};

pub fn run(args: TransactArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint = endpoint(&args)?;
    let options = ChannelOptions {
        connect_timeout: parse_duration(&args.connect_timeout, false)?,
        receive_timeout: parse_duration(&args.timeout, false)?,
        request_delay: parse_duration(&args.delay, true)?,
        persistent: false,
    };
    let request = resolve_request(&args)?;
    if request.is_empty() {
        return Err(CliError::usage(
            "a request is required (--data, --hex or --file)",
        ));
    }

    let engine = TransactionEngine::from_arc(args.framer.build(args.trailer));
    let channel = Channel::new(endpoint, options);
    let started = Instant::now();
    let frame = engine
        .transact(&channel, &request)
        .map_err(|err| engine_error("transaction failed", err))?;
    print_response(
        &frame,
        &channel.dialer().to_string(),
        started.elapsed(),
        format,
    );
    Ok(SUCCESS)
}

fn endpoint(args: &TransactArgs) -> CliResult<Endpoint> {
    let endpoint = match args.transport {
        TransportKind::Serial => Endpoint::serial(SerialSettings {
            port: args.target.clone(),
            baud_rate: args.baud,
            data_bits: args.data_bits,
            stop_bits: args.stop_bits,
            parity: args.parity.into(),
        }),
        kind => {
            let (host, port) = split_host_port(&args.target)?;
            if kind == TransportKind::Udp {
                Endpoint::udp(host, port)
            } else {
                Endpoint::tcp(host, port)
            }
        }
    };
    endpoint
        .validate()
        .map_err(|err| CliError::usage(format!("invalid target: {err}")))?;
    Ok(endpoint)
}

fn split_host_port(target: &str) -> CliResult<(&str, u16)> {
    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| CliError::usage(format!("expected host:port, got {target}")))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let port = port
        .parse()
        .map_err(|_| CliError::usage(format!("invalid port in {target}")))?;
    Ok((host, port))
}

fn resolve_request(args: &TransactArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return unescape(data);
    }
    if let Some(hex) = &args.hex {
        return parse_hex(hex);
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}

fn unescape(input: &str) -> CliResult<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len());
    let mut bytes = input.bytes();
    while let Some(byte) = bytes.next() {
        if byte != b'\\' {
            out.push(byte);
            continue;
        }
        match bytes.next() {
            Some(b'r') => out.push(b'\r'),
            Some(b'n') => out.push(b'\n'),
            Some(b't') => out.push(b'\t'),
            Some(b'\\') => out.push(b'\\'),
            Some(b'x') => {
                let digits: Vec<u8> = bytes.by_ref().take(2).collect();
                let value = std::str::from_utf8(&digits)
                    .ok()
                    .filter(|digits| digits.len() == 2)
                    .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                    .ok_or_else(|| CliError::usage("\\x must be followed by two hex digits"))?;
                out.push(value);
            }
            Some(other) => {
                return Err(CliError::usage(format!(
                    "unknown escape \\{}",
                    char::from(other)
                )))
            }
            None => return Err(CliError::usage("trailing backslash in --data")),
        }
    }
    Ok(out)
}

fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&digits).map_err(|err| CliError::usage(format!("invalid --hex: {err}")))
}
