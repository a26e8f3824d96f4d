//! log-event - record broker rule events through the tracing event sink
//!
//! Reads rule output (a JSON document, a JSON array or JSON Lines) from a file
//! or stdin and logs each event under its `rule_type` banner.

use clap::Parser;
use devicelink::observability::init_default_logging;
use devicelink::sink::{parse_events, EventSink, TracingEventSink};
use std::io::Read;
use std::path::PathBuf;
use std::process;
use tracing::{error, Level};

/// Log rule events the way the downstream rule handler does
#[derive(Parser)]
#[command(name = "log-event")]
#[command(about = "Log broker rule events tagged with rule_type")]
#[command(version)]
struct Args {
    /// Event file (reads stdin when omitted)
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,
}

fn read_input(path: Option<&PathBuf>) -> std::io::Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path),
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        }
    }
}

fn main() {
    let args = Args::parse();
    if let Err(e) = init_default_logging(Level::INFO) {
        eprintln!("Warning: logging not initialised: {e}");
    }

    let input = match read_input(args.input.as_ref()) {
        Ok(input) => input,
        Err(e) => {
            error!("Failed to read events: {}", e);
            process::exit(1);
        }
    };

    let events = match parse_events(&input) {
        Ok(events) => events,
        Err(e) => {
            error!("Failed to parse events: {}", e);
            process::exit(1);
        }
    };

    let sink = TracingEventSink::new();
    for event in &events {
        sink.record(event);
    }
}
