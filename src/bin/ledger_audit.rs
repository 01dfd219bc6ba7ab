//! Ledger audit tool
//!
//! Reads a persisted (sled) event log and prints the matching events of one
//! token as JSON lines, oldest first.

use clap::Parser;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use token_ledger::api::EventView;
use token_ledger::clock::SystemClock;
use token_ledger::config::{EventBackend, LedgerConfig};
use token_ledger::events::{EventFilter, EventKind, EventLog, SledEventStore};

/// Audit command-line arguments
#[derive(Parser, Debug)]
#[clap(name = "ledger_audit", version)]
struct Args {
    /// Ledger configuration file
    #[clap(long, default_value = "ledger.toml")]
    config: String,

    /// Token whose events are printed
    #[clap(long)]
    token: String,

    /// Only events of this kind (repeatable), e.g. --kind transfer --kind mint
    #[clap(long = "kind")]
    kinds: Vec<String>,

    /// Only events where this address is the actor or counterparty
    #[clap(long)]
    address: Option<String>,

    /// Print the number of matching events instead of the events
    #[clap(long)]
    count: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = LedgerConfig::load_or_default(&args.config);

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    if config.events.backend != EventBackend::Sled {
        warn!("events.backend is not sled; reading {} anyway", config.events.path);
    }
    let store = SledEventStore::open(&config.events.path)?;
    let log = EventLog::new(Arc::new(store), Arc::new(SystemClock));

    let mut filter = EventFilter::all();
    for kind in &args.kinds {
        filter = filter.kind(EventKind::from_str(kind)?);
    }
    if let Some(address) = &args.address {
        filter = filter.address(address);
    }

    let query = log.query(&args.token, filter)?;
    info!(token = %args.token, head = query.upper_bound(), "scanning event log");

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut matched = 0u64;
    for event in query {
        let event = event?;
        matched += 1;
        if !args.count {
            writeln!(out, "{}", serde_json::to_string(&EventView::from(event))?)?;
        }
    }
    if args.count {
        writeln!(out, "{}", matched)?;
    }
    info!(matched, "audit complete");
    Ok(())
}
