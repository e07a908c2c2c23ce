//! Chatframe client binary.
//!
//! # Usage
//!
//! ```bash
//! chatframe-client 127.0.0.1 9000 session.txt
//! ```
//!
//! The script file holds one command per line in the wire verb grammar,
//! with `DELAY ms` pausing issuance between commands.

use std::net::SocketAddr;
use std::path::PathBuf;

use chatframe_client::{ClientReactor, parse_script};
use chatframe_core::{client::ClientEngine, store::DirBlobStore};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Scripted chatframe client
#[derive(Parser, Debug)]
#[command(name = "chatframe-client")]
#[command(about = "Replays a command script against a chatframe server")]
#[command(version)]
struct Args {
    /// Server IP address
    host: std::net::IpAddr,

    /// Server TCP port
    port: u16,

    /// Input script file
    script: PathBuf,

    /// Directory for sent and received files
    #[arg(long, default_value = ".")]
    files: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let script = parse_script(&std::fs::read_to_string(&args.script)?)?;
    let engine = ClientEngine::new(DirBlobStore::new(&args.files)?);
    let addr = SocketAddr::new(args.host, args.port);

    let mut reactor = ClientReactor::connect(addr, engine, script)?;
    reactor.run()?;
    Ok(())
}
