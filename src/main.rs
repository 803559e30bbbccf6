//! Entry point for `gbn-over-udp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client**
//! mode.  All actual protocol work is delegated to library modules; `main.rs`
//! owns only process setup (logging, argument parsing, name resolution).

use std::net::SocketAddr;

use anyhow::Context;
use clap::{Parser, Subcommand};

use gbn_over_udp::client::{Client, ClientConfig};
use gbn_over_udp::server::{Server, ServerConfig};

/// A miniature TCP: Go-Back-N reliable transport over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run as a server: accept connections, simulate loss, reassemble data.
    Server {
        /// Local address to bind.
        #[arg(short, long, default_value = "127.0.0.1:11111")]
        bind: SocketAddr,
        /// Probability of dropping an established-phase datagram.
        #[arg(long, default_value_t = 0.3)]
        loss_rate: f64,
        /// Fixed seed for the loss model, for reproducible runs.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Run as a client: connect, stream the data segments, print statistics.
    Client {
        /// Server host name or address.
        host: String,
        /// Server port.
        port: u16,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    match cli.mode {
        Mode::Server {
            bind,
            loss_rate,
            seed,
        } => {
            anyhow::ensure!(
                (0.0..=1.0).contains(&loss_rate),
                "--loss-rate must lie in [0, 1]"
            );
            let server = Server::bind(ServerConfig {
                bind_addr: bind,
                loss_rate,
                loss_seed: seed,
                ..ServerConfig::default()
            })
            .await?;
            server.run().await?;
        }
        Mode::Client { host, port } => {
            let server: SocketAddr = tokio::net::lookup_host((host.as_str(), port))
                .await
                .with_context(|| format!("cannot resolve {host}:{port}"))?
                .next()
                .with_context(|| format!("no address for {host}:{port}"))?;
            let client = Client::connect(server, ClientConfig::default()).await?;
            let report = client.run().await?;
            println!("{report}");
        }
    }
    Ok(())
}
