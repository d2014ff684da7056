//! The peer engine entry point.
//!
//! Joins the swarm described by a `.torrent` file, downloads until complete,
//! and seeds until Ctrl-C.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use lanbit::{Engine, EngineConfig, Metainfo};

#[derive(Debug, Parser)]
#[command(name = "lanbit-peer")]
#[command(about = "LAN BitTorrent peer: download and seed a torrent", long_about = None)]
struct Args {
    /// Path to the .torrent file
    #[arg(value_name = "TORRENT_FILE")]
    torrent: PathBuf,

    /// Directory the payload file lives in (created if missing)
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Listening port for incoming peers (0 = ephemeral)
    #[arg(short, long, default_value_t = 0)]
    port: u16,

    /// Maximum number of peer connections
    #[arg(long, default_value_t = 50)]
    max_peers: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let metainfo = match Metainfo::from_file(&args.torrent) {
        Ok(metainfo) => metainfo,
        Err(e) => {
            eprintln!("failed to read {}: {}", args.torrent.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = tokio::fs::create_dir_all(&args.data_dir).await {
        eprintln!("data directory {}: {}", args.data_dir.display(), e);
        return ExitCode::FAILURE;
    }

    let config = EngineConfig {
        listen_port: args.port,
        max_peers: args.max_peers,
        ..EngineConfig::default()
    };

    let engine = match Engine::start(metainfo, &args.data_dir, config).await {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("engine failed to start: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match engine.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("engine failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
