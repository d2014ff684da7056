//! The tracker entry point.
//!
//! Serves `/announce` and `/stats` on the given port until Ctrl-C.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use lanbit::TrackerServer;

#[derive(Debug, Parser)]
#[command(name = "lanbit-tracker")]
#[command(about = "LAN BitTorrent tracker", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(value_name = "PORT")]
    port: u16,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let server = match TrackerServer::bind(args.port).await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("failed to bind port {}: {}", args.port, e);
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("announce URL: http://localhost:{}/announce", args.port);
    tracing::info!("stats URL:    http://localhost:{}/stats", args.port);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                eprintln!("tracker failed: {}", e);
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            ExitCode::SUCCESS
        }
    }
}
