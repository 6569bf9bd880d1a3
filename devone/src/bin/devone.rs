//! Readiness device demo client.
//!
//! Opens one session and waits for it the way a `poll(2)` or `select(2)`
//! client would, in 30 second rounds, then reads 64 bytes and dumps them.
//!
//! # Usage
//!
//! ```sh
//! devone --timeout 5 --mode select --count 3
//! RUST_LOG=devone=trace devone --tick-ms 1   # with --features tracing
//! ```

use std::fmt::Write as _;
use std::io::{self, Write};
use std::num::ParseIntError;
use std::time::Duration;

use devone::{
    DeviceConfig, DeviceError, File, FileOperations, OpenFlags, PollFd, PollMask,
    ReadinessController, poll, select_read,
};
use thiserror::Error;

/// Length of one wait round.
const ROUND: Duration = Duration::from_secs(30);

/// Bytes read per ready event.
const READ_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Poll,
    Select,
    Read,
}

impl Mode {
    const fn wait_banner(self) -> &'static str {
        match self {
            Self::Select => "select() ...",
            Self::Poll | Self::Read => "poll()...",
        }
    }

    const fn read_banner(self) -> &'static str {
        match self {
            Self::Select => "reading...",
            Self::Poll | Self::Read => "read()...",
        }
    }
}

#[derive(Debug)]
struct Args {
    config: DeviceConfig,
    count: u64,
    mode: Mode,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("missing value for {0}")]
    MissingValue(&'static str),
    #[error("invalid value for {flag}: {source}")]
    InvalidNumber {
        flag: &'static str,
        #[source]
        source: ParseIntError,
    },
    #[error("unknown mode: {0} (expected poll, select or read)")]
    UnknownMode(String),
    #[error("unknown argument: {0}")]
    UnknownArgument(String),
    #[error("--tick-ms must be at least 1")]
    ZeroTick,
    #[error("failed to start device: {0}")]
    Start(#[from] devone::runtime::timer::TimerError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn main() {
    devone::init_tracing();
    if let Err(e) = run() {
        eprintln!("devone: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let args: Vec<String> = std::env::args().collect();
    let Some(args) = parse_args(&args)? else {
        print_usage();
        return Ok(());
    };

    let dev = ReadinessController::new(args.config)?;
    let mut file = dev.open(OpenFlags::NONE)?;
    eprintln!(
        "devone: opened session, readable every {:?}",
        dev.config().timeout
    );

    let mut stdout = io::stdout().lock();
    let mut served = 0;
    while served < args.count {
        if args.mode != Mode::Read {
            wait_readable(&dev, &file, args.mode, &mut stdout)?;
        }
        writeln!(stdout, "{}", args.mode.read_banner())?;
        stdout.flush()?;

        let mut buf = [0u8; READ_LEN];
        let n = match dev.read(&file, &mut buf[..], READ_LEN) {
            Ok(n) => n,
            Err(err) if err.is_retryable() => {
                eprintln!("devone: read: {err}, retrying");
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        writeln!(stdout, "{}", hex(&buf[..n]))?;
        stdout.flush()?;
        served += 1;
    }

    dev.release(&mut file)?;
    Ok(())
}

fn wait_readable(
    dev: &ReadinessController,
    file: &File,
    mode: Mode,
    out: &mut impl Write,
) -> Result<(), CliError> {
    loop {
        writeln!(out, "{}", mode.wait_banner())?;
        out.flush()?;
        let ready = match mode {
            Mode::Select => !select_read(dev, &[file], Some(ROUND))?.is_empty(),
            _ => {
                let mut fds = [PollFd::new(file, PollMask::IN)];
                poll(dev, &mut fds, Some(ROUND))? > 0 && fds[0].revents.contains(PollMask::IN)
            }
        };
        if ready {
            return Ok(());
        }
        eprint!("devone: waiter ");
        dev.write_status(&mut io::stderr())?;
    }
}

/// Contiguous lowercase hex, two digits per byte.
fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Returns `None` when `--help` was asked for.
fn parse_args(args: &[String]) -> Result<Option<Args>, CliError> {
    let mut config = DeviceConfig::default();
    let mut count = 1;
    let mut mode = Mode::Poll;

    let mut it = args.iter().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--timeout" | "-t" => {
                let secs = number(it.next(), "--timeout")?;
                config = config.with_timeout(Duration::from_secs(secs));
            }
            "--tick-ms" => {
                let ms = number(it.next(), "--tick-ms")?;
                if ms == 0 {
                    return Err(CliError::ZeroTick);
                }
                config = config.with_tick(Duration::from_millis(ms));
            }
            "--count" | "-n" => count = number(it.next(), "--count")?,
            "--mode" | "-m" => {
                let value = it.next().ok_or(CliError::MissingValue("--mode"))?;
                mode = match value.as_str() {
                    "poll" => Mode::Poll,
                    "select" => Mode::Select,
                    "read" => Mode::Read,
                    other => return Err(CliError::UnknownMode(other.to_owned())),
                };
            }
            "--help" | "-h" => return Ok(None),
            other => return Err(CliError::UnknownArgument(other.to_owned())),
        }
    }

    Ok(Some(Args {
        config,
        count,
        mode,
    }))
}

fn number(value: Option<&String>, flag: &'static str) -> Result<u64, CliError> {
    value
        .ok_or(CliError::MissingValue(flag))?
        .parse()
        .map_err(|source| CliError::InvalidNumber { flag, source })
}

fn print_usage() {
    println!(
        "\
devone - timer-armed readiness device demo

USAGE:
    devone [OPTIONS]

OPTIONS:
    -t, --timeout <SECS>   Readiness period [default: 20]
        --tick-ms <MS>     Timer resolution [default: 10]
    -n, --count <N>        Reads before exiting [default: 1]
    -m, --mode <MODE>      poll, select or read [default: poll]
    -h, --help             Print this help
"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("devone")
            .chain(args.iter().copied())
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn defaults() {
        let args = parse_args(&argv(&[])).unwrap().unwrap();
        assert_eq!(args.mode, Mode::Poll);
        assert_eq!(args.count, 1);
        assert_eq!(args.config.timeout, Duration::from_secs(20));
    }

    #[test]
    fn all_flags() {
        let args = parse_args(&argv(&[
            "--timeout", "3", "--tick-ms", "2", "-n", "4", "--mode", "select",
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(args.config.timeout, Duration::from_secs(3));
        assert_eq!(args.config.tick, Duration::from_millis(2));
        assert_eq!(args.count, 4);
        assert_eq!(args.mode, Mode::Select);
    }

    #[test]
    fn help_and_errors() {
        assert!(parse_args(&argv(&["--help"])).unwrap().is_none());
        assert!(matches!(
            parse_args(&argv(&["--timeout"])),
            Err(CliError::MissingValue("--timeout"))
        ));
        assert!(matches!(
            parse_args(&argv(&["--count", "x"])),
            Err(CliError::InvalidNumber { flag: "--count", .. })
        ));
        assert!(matches!(
            parse_args(&argv(&["--mode", "epoll"])),
            Err(CliError::UnknownMode(_))
        ));
        assert!(matches!(
            parse_args(&argv(&["--tick-ms", "0"])),
            Err(CliError::ZeroTick)
        ));
        assert!(matches!(
            parse_args(&argv(&["--bogus"])),
            Err(CliError::UnknownArgument(_))
        ));
    }

    #[test]
    fn banners_follow_the_wait_style() {
        assert_eq!(Mode::Poll.wait_banner(), "poll()...");
        assert_eq!(Mode::Poll.read_banner(), "read()...");
        assert_eq!(Mode::Select.wait_banner(), "select() ...");
        assert_eq!(Mode::Select.read_banner(), "reading...");
    }

    #[test]
    fn hex_dump() {
        assert_eq!(hex(&[0xff, 0x0a]), "ff0a");
        assert_eq!(hex(&[0xff; 64]).len(), 128);
        assert_eq!(hex(&[]), "");
    }
}
