//! RRP client - Reliable Relay Protocol
//!
//! Reads lines from stdin and sends each one to the hub as
//! `<name>: <line>`. Messages relayed by the hub are printed to stdout.
//! `/quit` or end of input disconnects.
//!
//! Usage:
//!   cargo run --release --bin rrp-client -- [OPTIONS]
//!
//! Examples:
//!   cargo run --release --bin rrp-client -- --server 127.0.0.1:9876 --name alice
//!   cargo run --release --bin rrp-client -- -s 10.0.0.2:9876 -n bob --timeout-ms 3000

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rrp::{Client, ClientEvent, Config, DEFAULT_PORT};

/// Client settings
struct ClientConfig {
    bind_addr: SocketAddr,
    server_addr: SocketAddr,
    name: String,
    config: Config,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            server_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            name: "anonymous".to_string(),
            config: Config::default(),
        }
    }
}

fn parse_args() -> ClientConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--server" | "-s" => {
                if i + 1 < args.len() {
                    config.server_addr = args[i + 1].parse().expect("valid address required");
                    i += 1;
                }
            }
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.bind_addr = args[i + 1].parse().expect("valid address required");
                    i += 1;
                }
            }
            "--name" | "-n" => {
                if i + 1 < args.len() {
                    config.name = args[i + 1].clone();
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
                    r#"RRP Client - Reliable Relay Protocol

Sends stdin lines to the hub and prints what other clients say.

Usage:
  cargo run --release --bin rrp-client -- [OPTIONS]

Options:
  -s, --server <ADDR>      Hub address (default: 127.0.0.1:{port})
  -b, --bind <ADDR>        Local bind address (default: 0.0.0.0:0)
  -n, --name <NAME>        Name prefixed to every message (default: anonymous)
  -w, --window <N>         Sender window size (default: 5)
  -r, --retries <N>        Retransmissions per frame (default: 3)
  -t, --timeout-ms <MS>    Retransmission timeout (default: 1000)
  --lossy                  Presets for lossy links
  -h, --help               Print this help

Type /quit to leave. Logging is controlled with RUST_LOG (default: info).
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

    let client_config = parse_args();

    info!("RRP client starting...");
    info!("Server address: {}", client_config.server_addr);

    let (client, mut events) = Client::connect(
        client_config.config,
        client_config.bind_addr,
        client_config.server_addr,
    )
    .await?;
    info!("Bound to local address: {}", client.local_addr()?);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) if line.trim() == "/quit" => break,
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        let message = format!("{}: {}", client_config.name, line);
                        if let Err(e) = client.send(message).await {
                            warn!("send failed: {}", e);
                            break;
                        }
                    }
                    None => break,
                }
            }
            event = events.recv() => match event {
                Some(ClientEvent::Message(payload)) => {
                    println!("{}", String::from_utf8_lossy(&payload));
                }
                Some(ClientEvent::DeliveryFailed { seq }) => {
                    warn!("message {} was not delivered", seq);
                }
                Some(ClientEvent::Closed) | None => {
                    warn!("connection closed");
                    return Ok(());
                }
            },
        }
    }

    client.disconnect().await?;
    info!("disconnected: {}", client.stats().summary());
    Ok(())
}
