//! telemux client.
//!
//! Streams one JSON record per window to stdout; diagnostics go to stderr.
//!
//! # Usage
//!
//! ```sh
//! telemux                                   # 100ms monitor on 127.0.0.1:4001-4003
//! telemux --control --threshold 2.5         # 20ms window, retune out1 via 127.0.0.1:4000
//! telemux -s 10.0.0.5:4001 -s 10.0.0.5:4002 -s 10.0.0.5:4003
//! ```

use std::sync::atomic::AtomicBool;

use telemux::config::SOURCE_COUNT;
use telemux::net::Endpoint;
use telemux::{JsonLines, Session, SessionConfig, SessionError, WindowSize};

/// Never set; Ctrl+C terminates the process.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Command line errors.
#[derive(Debug, thiserror::Error)]
enum ArgError {
    #[error("missing value for {0}")]
    MissingValue(String),
    #[error("invalid value for {flag}: {value:?}")]
    InvalidValue { flag: String, value: String },
    #[error("expected exactly 3 --source addresses, got {0}")]
    SourceCount(usize),
    #[error("{0} requires --control")]
    RequiresControl(String),
    #[error("unknown argument: {0}")]
    Unknown(String),
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Args(#[from] ArgError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

fn main() {
    if let Err(e) = run() {
        eprintln!("telemux: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let config = parse_args(std::env::args().skip(1))?;

    telemux::init_tracing();

    let mut session = Session::new(&config, JsonLines::stdout())?;
    session.run(&SHUTDOWN_REQUESTED);
    Ok(())
}

/// Parses command line arguments (program name excluded).
fn parse_args(args: impl IntoIterator<Item = String>) -> Result<SessionConfig, ArgError> {
    let mut control = false;
    let mut window: Option<WindowSize> = None;
    let mut sources: Vec<Endpoint> = Vec::new();
    let mut control_addr: Option<Endpoint> = None;
    let mut threshold: Option<f64> = None;
    let mut verify = true;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--control" | "-c" => control = true,
            "--window" | "-w" => {
                let value = next_value(&mut args, &arg)?;
                window = Some(
                    value
                        .parse()
                        .ok()
                        .and_then(WindowSize::from_millis)
                        .ok_or_else(|| invalid(&arg, &value))?,
                );
            }
            "--source" | "-s" => {
                let value = next_value(&mut args, &arg)?;
                sources.push(value.parse().map_err(|_| invalid(&arg, &value))?);
            }
            "--control-addr" | "-a" => {
                let value = next_value(&mut args, &arg)?;
                control_addr = Some(value.parse().map_err(|_| invalid(&arg, &value))?);
            }
            "--threshold" | "-t" => {
                let value = next_value(&mut args, &arg)?;
                let parsed = value
                    .parse::<f64>()
                    .ok()
                    .filter(|t| t.is_finite())
                    .ok_or_else(|| invalid(&arg, &value))?;
                threshold = Some(parsed);
            }
            "--no-verify" => verify = false,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            _ => return Err(ArgError::Unknown(arg)),
        }
    }

    let mut config = if control {
        SessionConfig::control()
    } else {
        SessionConfig::monitor()
    };

    if let Some(window) = window {
        config = config.with_window(window);
    }

    if !sources.is_empty() {
        let sources: [Endpoint; SOURCE_COUNT] = sources
            .try_into()
            .map_err(|v: Vec<Endpoint>| ArgError::SourceCount(v.len()))?;
        config = config.with_sources(sources);
    }

    match config.control.as_mut() {
        Some(ctl) => {
            if let Some(addr) = control_addr {
                ctl.destination = addr;
            }
            if let Some(threshold) = threshold {
                ctl.threshold = threshold;
            }
            ctl.verify = verify;
        }
        None => {
            let flag = if control_addr.is_some() {
                Some("--control-addr")
            } else if threshold.is_some() {
                Some("--threshold")
            } else if !verify {
                Some("--no-verify")
            } else {
                None
            };
            if let Some(flag) = flag {
                return Err(ArgError::RequiresControl(flag.to_owned()));
            }
        }
    }

    Ok(config)
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, ArgError> {
    args.next()
        .ok_or_else(|| ArgError::MissingValue(flag.to_owned()))
}

fn invalid(flag: &str, value: &str) -> ArgError {
    ArgError::InvalidValue {
        flag: flag.to_owned(),
        value: value.to_owned(),
    }
}

fn print_usage() {
    eprintln!(
        r#"telemux - three-source telemetry client

USAGE:
    telemux [OPTIONS]

OPTIONS:
    -c, --control              20ms window with threshold control of out1
    -w, --window <MS>          Record spacing in milliseconds (default: 100, or 20 with --control)
    -s, --source <ADDR>        Source address; give exactly three, in out1..out3 order
                               (default: 127.0.0.1:4001, :4002, :4003)
    -a, --control-addr <ADDR>  Control endpoint (default: 127.0.0.1:4000)
    -t, --threshold <VALUE>    Threshold applied to out3 (default: 3.0)
        --no-verify            Do not follow writes with verification reads
    -h, --help                 Print this help message

OUTPUT:
    One JSON object per line on stdout:
    {{"timestamp":<epoch ms>,"out1":"<value>","out2":"<value>","out3":"<value>"}}
    A source with no new value in the window reports "--".

ENVIRONMENT:
    RUST_LOG                   Log filter for stderr diagnostics (default: telemux=info)
"#
    );
}
