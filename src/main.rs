use crate::config::{Config, ListenerConfig};
use crate::protocol::{PeerStat, StatsReport};
use crate::report::Reporter;
use crate::transport::Listener;
use std::net::SocketAddr;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod protocol;
mod report;
mod transport;

use clap::{Parser, Subcommand};

/// Sense stats: prints per-peer RTT/loss reports received over UDP
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Listen for stats reports and print them
    Listen {
        /// Path to an optional configuration file
        #[arg(short, long)]
        config: Option<String>,
        /// IP/interface to bind (default: 0.0.0.0)
        #[arg(long)]
        host: Option<String>,
        /// UDP port to bind (default: 9998)
        #[arg(short, long)]
        port: Option<u16>,
        /// Reject reports whose peer list does not match the declared count
        #[arg(long)]
        strict: bool,
    },
    /// Validate configuration file
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "sense-stats.toml")]
        config: String,
    },
    /// Encode one stats report and send it as a single datagram
    Send {
        /// Listener address, e.g. 127.0.0.1:9998
        #[arg(short, long)]
        target: SocketAddr,
        /// Reporting node id
        #[arg(long, default_value_t = 1)]
        src_id: u32,
        /// Sequence number
        #[arg(long, default_value_t = 0)]
        seq: u64,
        /// Peer record as ID:RTT_US:LOSS (RTT_US may be "n/a"); repeatable
        #[arg(long = "peer", value_parser = parse_peer)]
        peers: Vec<PeerStat>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Listen {
        config: None,
        host: None,
        port: None,
        strict: false,
    }) {
        Commands::Listen {
            config,
            host,
            port,
            strict,
        } => {
            let mut listener_cfg = match config {
                Some(path) => Config::load(&path)?.listener,
                None => ListenerConfig::default(),
            };
            if let Some(host) = host {
                listener_cfg.host = host;
            }
            if let Some(port) = port {
                listener_cfg.port = port;
            }
            listener_cfg.strict |= strict;
            run_listener(&listener_cfg).await
        }
        Commands::Validate { config } => validate_config(&config),
        Commands::Send {
            target,
            src_id,
            seq,
            peers,
        } => {
            let report = StatsReport::new(src_id, seq, peers)?;
            let sent = transport::send_report(target, &report).await?;
            info!(
                "Sent report seq={} ({} peers, {} bytes) to {}",
                seq,
                report.peers().len(),
                sent,
                target
            );
            Ok(())
        }
    }
}

fn validate_config(path: &str) -> anyhow::Result<()> {
    match Config::load(path).and_then(|cfg| cfg.listener.bind_addr().map(|addr| (cfg, addr))) {
        Ok((cfg, addr)) => {
            info!("Configuration '{}' is valid.", path);
            info!("Listen: {}", addr);
            info!("Strict peer count: {}", cfg.listener.strict);
            Ok(())
        }
        Err(e) => {
            error!("Configuration '{}' is INVALID: {}", path, e);
            Err(anyhow::anyhow!("Invalid config"))
        }
    }
}

async fn run_listener(config: &ListenerConfig) -> anyhow::Result<()> {
    let listener = Listener::bind(config)?;
    info!("Listening for Sense stats on {} ...", listener.local_addr()?);

    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let shutdown = async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    };

    let mut reporter = Reporter::stdout();
    listener.run(&mut reporter, shutdown).await?;

    info!("Interrupted, exiting.");
    Ok(())
}

fn parse_peer(s: &str) -> Result<PeerStat, String> {
    let parts: Vec<&str> = s.split(':').collect();
    let [id, rtt, loss] = parts.as_slice() else {
        return Err(format!("expected ID:RTT_US:LOSS, got '{}'", s));
    };
    let peer_id = id
        .parse::<u32>()
        .map_err(|e| format!("bad peer id '{}': {}", id, e))?;
    let loss_count = loss
        .parse::<u32>()
        .map_err(|e| format!("bad loss count '{}': {}", loss, e))?;
    if rtt.eq_ignore_ascii_case("n/a") {
        return Ok(PeerStat::unknown_rtt(peer_id, loss_count));
    }
    let avg_rtt_us = rtt
        .parse::<f32>()
        .map_err(|e| format!("bad rtt '{}': {}", rtt, e))?;
    Ok(PeerStat::new(peer_id, avg_rtt_us, loss_count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peer() {
        assert_eq!(parse_peer("1:10.5:0").unwrap(), PeerStat::new(1, 10.5, 0));
        assert_eq!(parse_peer("2:n/a:3").unwrap(), PeerStat::unknown_rtt(2, 3));
        assert!(parse_peer("2:n/a").is_err());
        assert!(parse_peer("x:1.0:0").is_err());
        assert!(parse_peer("1:fast:0").is_err());
        assert!(parse_peer("1:1.0:-4").is_err());
    }

    #[test]
    fn test_cli_defaults_and_overrides() {
        let cli = Cli::parse_from(["sense-stats"]);
        assert!(cli.command.is_none());

        let cli = Cli::parse_from(["sense-stats", "listen", "--port", "7000", "--strict"]);
        match cli.command {
            Some(Commands::Listen {
                port, strict, host, ..
            }) => {
                assert_eq!(port, Some(7000));
                assert!(strict);
                assert!(host.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let cli = Cli::parse_from([
            "sense-stats",
            "send",
            "--target",
            "127.0.0.1:9998",
            "--peer",
            "1:10.5:0",
            "--peer",
            "2:n/a:3",
        ]);
        match cli.command {
            Some(Commands::Send { peers, seq, .. }) => {
                assert_eq!(peers.len(), 2);
                assert_eq!(seq, 0);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
