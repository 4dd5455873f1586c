//! termrun - run shell commands and stream their styled output
//!
//! Each line read from standard input is either the `cd` built-in or a
//! command handed to the system shell (`/bin/sh -c` or `cmd /C`). While a
//! command runs, further lines are sent to its standard input. Output of the
//! command is decoded from ANSI escape sequences into styled text.
//!
//! # Quick Start
//!
//! ```text
//! termrun                  # Start in the current directory
//! termrun -d /tmp          # Start in /tmp
//! termrun -s /bin/bash     # Run commands with bash
//! ```

mod config;
mod core;
mod ui;

use std::env;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::thread;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::Config;
use crate::core::cwd::WorkingDirectory;
use crate::core::session::{Session, SessionEvent};
use crate::ui::ConsoleSink;

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable holding a tracing filter that overrides the log level
const LOG_ENV: &str = "TERMRUN_LOG";

/// Command line options
#[derive(Debug, Default, PartialEq)]
struct Args {
    shell: Option<String>,
    dir: Option<PathBuf>,
    log_level: Option<String>,
}

fn print_version() {
    eprintln!("termrun {}", VERSION);
}

fn print_help() {
    eprintln!("termrun {} - run shell commands and stream their styled output", VERSION);
    eprintln!();
    eprintln!("Usage: termrun [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -s, --shell <PATH>    Shell used to run commands");
    eprintln!("  -d, --dir <PATH>      Initial working directory");
    eprintln!("      --log-level <L>   error, warn, info, debug or trace");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Built-in: cd <path>");
    eprintln!("Configuration: ~/.termrun/config.toml");
    eprintln!("Log file: ~/.termrun/termrun.log ({} overrides the filter)", LOG_ENV);
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args::default();
    let mut iter = args.iter().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-s" | "--shell" => {
                let shell = iter.next().ok_or("Missing shell argument")?;
                parsed.shell = Some(shell.clone());
            }
            "-d" | "--dir" => {
                let dir = iter.next().ok_or("Missing directory argument")?;
                parsed.dir = Some(PathBuf::from(dir));
            }
            "--log-level" => {
                let level = iter.next().ok_or("Missing log level argument")?;
                parsed.log_level = Some(level.clone());
            }
            other => return Err(format!("Unknown option: {}", other)),
        }
    }

    Ok(parsed)
}

/// Log to `~/.termrun/termrun.log`; the terminal is reserved for output.
/// Without a home directory logging stays off.
fn init_logging(level: &str) {
    let Some(log_path) = config::data_dir().map(|dir| dir.join("termrun.log")) else {
        return;
    };

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

/// Input source: forward stdin lines to the session until end of input
fn spawn_input_reader(events: Sender<SessionEvent>) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name("input".to_string()).spawn(move || {
        let stdin = io::stdin();
        let mut reader = stdin.lock();
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buffer).into_owned();
                    if events.send(SessionEvent::Input(line)).is_err() {
                        return;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("Input read error: {}", e);
                    break;
                }
            }
        }
        let _ = events.send(SessionEvent::InputClosed);
    })
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let args = match parse_args(&args) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    // Command line overrides the config file
    let (mut config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    if let Some(shell) = args.shell {
        config.shell = Some(shell);
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    init_logging(&config.log_level);
    info!("termrun {} starting...", VERSION);
    if let Some(e) = config_error {
        warn!("{}; using defaults", e);
    }

    let cwd = match &args.dir {
        Some(dir) => WorkingDirectory::new(dir),
        None => WorkingDirectory::from_process(),
    }
    .context("Cannot use initial directory")?;

    let options = config.session_options();
    info!("Shell: {} {}", options.shell, options.shell_flag);
    info!("Directory: {}", cwd.current().display());

    let (tx, rx) = mpsc::channel();
    spawn_input_reader(tx.clone()).context("Failed to start input reader")?;

    let mut session = Session::new(cwd, options, ConsoleSink::stdout(), tx);
    session.run(&rx);
    info!("Exiting in {}", session.current_directory().display());

    Ok(())
}
