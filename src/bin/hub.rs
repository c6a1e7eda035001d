//! RRP hub - Reliable Relay Protocol
//!
//! Accepts frames from any number of clients, ACKs or NAKs each one, and
//! relays every accepted message to all other connected clients.
//!
//! Usage:
//!   cargo run --release --bin rrp-hub -- [OPTIONS]
//!
//! Examples:
//!   cargo run --release --bin rrp-hub -- --port 9876
//!   cargo run --release --bin rrp-hub -- -b 0.0.0.0:9000 --retries 8 --timeout-ms 3000

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rrp::{Config, Hub, DEFAULT_PORT};

/// Hub settings
struct HubConfig {
    bind_addr: SocketAddr,
    config: Config,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            config: Config::default(),
        }
    }
}

fn parse_args() -> HubConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = HubConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    config.bind_addr.set_port(args[i + 1].parse().expect("valid port required"));
                    i += 1;
                }
            }
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.bind_addr = args[i + 1].parse().expect("valid address required");
                    i += 1;
                }
            }
            "--window" | "-w" => {
                if i + 1 < args.len() {
                    config.config.window_size = args[i + 1].parse().expect("valid number required");
                    i += 1;
                }
            }
            "--retries" | "-r" => {
                if i + 1 < args.len() {
                    config.config.max_retries = args[i + 1].parse().expect("valid number required");
                    i += 1;
                }
            }
            "--timeout-ms" | "-t" => {
                if i + 1 < args.len() {
                    config.config.retransmit_timeout_ms =
                        args[i + 1].parse().expect("valid number required");
                    i += 1;
                }
            }
            "--lossy" => {
                config.config = Config::lossy_network();
            }
            "--help" | "-h" => {
                println!(
                    r#"RRP Hub - Reliable Relay Protocol

Relays every message a client sends to all other connected clients.

Usage:
  cargo run --release --bin rrp-hub -- [OPTIONS]

Options:
  -p, --port <PORT>        Listen port (default: {port})
  -b, --bind <ADDR>        Bind address (default: 0.0.0.0:{port})
  -w, --window <N>         Sender window size per client (default: 5)
  -r, --retries <N>        Retransmissions per frame (default: 3)
  -t, --timeout-ms <MS>    Retransmission timeout (default: 1000)
  --lossy                  Presets for lossy links
  -h, --help               Print this help

Logging is controlled with RUST_LOG (default: info).
"#,
                    port = DEFAULT_PORT
                );
                std::process::exit(0);
            }
            other => warn!("ignoring unknown argument {}", other),
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let hub_config = parse_args();

    info!("RRP hub starting...");
    info!(
        "window {}, max retries {}, timeout {}ms",
        hub_config.config.window_size,
        hub_config.config.max_retries,
        hub_config.config.retransmit_timeout_ms
    );

    let hub = Arc::new(Hub::bind(hub_config.config, hub_config.bind_addr).await?);

    let mut runner = {
        let hub = hub.clone();
        tokio::spawn(async move { hub.run().await })
    };

    tokio::select! {
        result = &mut runner => {
            result??;
            return Ok(());
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("shutting down");
            hub.stop();
        }
    }

    runner.await??;
    Ok(())
}
