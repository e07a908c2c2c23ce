//! Chatframe server binary.
//!
//! # Usage
//!
//! ```bash
//! # Listen on port 9000
//! chatframe-server 9000
//!
//! # Delete the account database and exit
//! chatframe-server reset
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use chatframe_core::{
    server::{ServerConfig, ServerEngine},
    store::{DirBlobStore, FileUserStore},
};
use chatframe_server::Server;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Chatframe chat and file-relay server
#[derive(Parser, Debug)]
#[command(name = "chatframe-server")]
#[command(about = "Fixed-frame chat server with server-relayed file transfer")]
#[command(version)]
struct Args {
    /// TCP port to listen on, or the literal `reset` to delete the account
    /// database and exit
    port: String,

    /// Account database file
    #[arg(long, default_value = "registered_accounts.txt")]
    accounts: PathBuf,

    /// Directory for relayed files
    #[arg(long, default_value = "files")]
    files: PathBuf,

    /// Maximum concurrent connections, auxiliary legs included
    #[arg(long, default_value = "18")]
    max_connections: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    if args.port == "reset" {
        FileUserStore::reset(&args.accounts)?;
        tracing::info!(path = %args.accounts.display(), "account database reset");
        return Ok(());
    }

    let port: u16 = args.port.parse()?;
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);

    let engine = ServerEngine::new(
        FileUserStore::new(&args.accounts),
        DirBlobStore::new(&args.files)?,
        ServerConfig { max_connections: args.max_connections, ..ServerConfig::default() },
    );

    let mut server = Server::bind(addr, engine)?;
    tracing::info!(addr = %server.local_addr()?, "chatframe server listening");
    server.run()?;
    Ok(())
}
