//! # Secure Exchange CLI
//!
//! Runs one side of the exchange over TCP, or both sides over loopback.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, info};

use secure_exchange::config::{self, Config};
use secure_exchange::{
    DomainParameters, ExchangeSummary, NamedGroup, Session, Transport, TransportListener,
};

/// Diffie-Hellman key agreement followed by one AES-256-CBC message
#[derive(Parser)]
#[command(name = "secure-exchange")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Diffie-Hellman group, overrides the configuration file
    #[arg(short, long, value_enum, global = true)]
    group: Option<NamedGroup>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept one client and receive its encrypted message
    Server {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Connect to a server and send an encrypted message
    Client {
        /// Server host
        #[arg(long)]
        host: Option<String>,

        /// Server port
        #[arg(short, long)]
        port: Option<u16>,

        /// Message to send
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Run server and client against each other over loopback
    Demo {
        /// Message to send
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Print a sample configuration file
    InitConfig,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => {
            debug!("Loading config from {:?}", path);
            config::load(path).context("Failed to load configuration")?
        }
        None => Config::default(),
    };

    if let Some(group) = cli.group {
        config.exchange.group = group;
    }

    match cli.command {
        Commands::Server { port } => {
            if let Some(port) = port {
                config.network.port = port;
            }
            run_server(&config).await
        }
        Commands::Client {
            host,
            port,
            message,
        } => {
            if let Some(host) = host {
                config.network.host = host;
            }
            if let Some(port) = port {
                config.network.port = port;
            }
            if let Some(message) = message {
                config.exchange.message = message;
            }
            let addr = resolve(&config.network.host, config.network.port).await?;
            run_client(&config, addr).await
        }
        Commands::Demo { message } => {
            if let Some(message) = message {
                config.exchange.message = message;
            }
            run_demo(&config).await
        }
        Commands::InitConfig => {
            print!("{}", config::generate_sample());
            Ok(())
        }
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    lookup_host((host, port))
        .await
        .with_context(|| format!("Failed to resolve {}:{}", host, port))?
        .next()
        .with_context(|| format!("No address for {}:{}", host, port))
}

/// Wire payload: the message bytes with a trailing NUL
fn message_payload(config: &Config) -> Vec<u8> {
    let mut payload = config.exchange.message.as_bytes().to_vec();
    payload.push(0);
    payload
}

async fn run_server(config: &Config) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.network.port));
    let listener = TransportListener::bind(addr)
        .await
        .context("Failed to bind socket")?;
    info!("Listening on port {}...", listener.local_addr().port());

    serve_one(config, listener).await
}

async fn serve_one(config: &Config, listener: TransportListener) -> Result<()> {
    info!("Waiting for a connection...");
    let (transport, peer) = listener
        .accept()
        .await
        .context("Failed to accept client connection")?;
    info!("Client connected from {}", peer);

    let params = DomainParameters::named(config.exchange.group);
    let transport = transport.with_io_timeout(config.network.io_timeout());
    let mut session =
        Session::responder(params, transport).with_secret_logging(config.exchange.log_secret);

    let summary = session
        .run_responder()
        .await
        .with_context(|| format!("Exchange failed in state {}", session.state()))?;

    report(&summary);
    Ok(())
}

async fn run_client(config: &Config, addr: SocketAddr) -> Result<()> {
    info!("Connecting to {}...", addr);
    let transport: Transport<TcpStream> = Transport::connect(addr, config.network.connect_timeout())
        .await
        .context("Failed to connect to server")?;
    info!("Connected to server at {}", transport.peer_addr()?);

    let params = DomainParameters::named(config.exchange.group);
    let transport = transport.with_io_timeout(config.network.io_timeout());
    let mut session =
        Session::initiator(params, transport).with_secret_logging(config.exchange.log_secret);

    let summary = session
        .run_initiator(&message_payload(config))
        .await
        .with_context(|| format!("Exchange failed in state {}", session.state()))?;

    report(&summary);
    Ok(())
}

async fn run_demo(config: &Config) -> Result<()> {
    let listener = TransportListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
    let addr = listener.local_addr();
    info!("Demo server on {}", addr);

    run_pair(config, listener, addr).await?;

    println!("{} Demo complete", "[+]".green());
    Ok(())
}

/// Serve on `listener` while a client connects to `addr`. Either side
/// failing ends both.
async fn run_pair(config: &Config, listener: TransportListener, addr: SocketAddr) -> Result<()> {
    tokio::try_join!(serve_one(config, listener), run_client(config, addr))?;
    Ok(())
}

fn report(summary: &ExchangeSummary) {
    println!(
        "{} Shared secret fingerprint ({}): {}",
        "[+]".green(),
        summary.role,
        summary.secret_fingerprint
    );

    if let Some(message) = &summary.message {
        let text = message.strip_suffix(b"\0").unwrap_or(message.as_slice());
        println!(
            "{} Decrypted message: {}",
            "[+]".green(),
            String::from_utf8_lossy(text).bold()
        );
    } else {
        println!("{} Sent encrypted message to server", "[+]".green());
    }

    debug!(
        "{} bytes sent, {} bytes received",
        summary.bytes_sent, summary.bytes_received
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_over_loopback() {
        let mut config = Config::default();
        config.exchange.group = NamedGroup::Modp1536;
        config.network.io_timeout_secs = 10;

        run_demo(&config).await.unwrap();
    }

    #[tokio::test]
    async fn test_client_fails_without_server() {
        let listener = TransportListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = listener.local_addr();
        drop(listener);

        let config = Config::default();
        assert!(run_client(&config, addr).await.is_err());
    }

    #[tokio::test]
    async fn test_client_failure_ends_waiting_server() {
        let listener = TransportListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();

        // Nothing listens here, so the client fails before the server accepts
        let dead = TransportListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let dead_addr = dead.local_addr();
        drop(dead);

        let config = Config::default();
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            run_pair(&config, listener, dead_addr),
        )
        .await;
        assert!(result.expect("server must not wait forever").is_err());
    }

    #[test]
    fn test_message_payload_is_nul_terminated() {
        let config = Config::default();
        assert_eq!(message_payload(&config), secure_exchange::DEFAULT_MESSAGE);
    }

    #[test]
    fn test_cli_parses_group_override() {
        let cli = Cli::try_parse_from(["secure-exchange", "-g", "modp1536", "server", "-p", "9000"]).unwrap();
        assert_eq!(cli.group, Some(NamedGroup::Modp1536));
        assert!(matches!(cli.command, Commands::Server { port: Some(9000) }));
    }
}
