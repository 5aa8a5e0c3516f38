//! Freat server binary
//!
//! Binds the TCP listener over the Linux procfs backend.

use clap::Parser;
use freat_common::{init_logging, Result};
use freat_procfs::ProcfsBackend;
use freat_server::{Server, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "freat-server")]
#[command(about = "Multi-client process memory scanning server")]
#[command(version)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.verbose {
        config.log.level = "debug".to_string();
    }

    init_logging(&config.log);

    let server = Server::new(config, Arc::new(ProcfsBackend::new()));
    server.run().await
}
