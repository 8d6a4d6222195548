//! Thin CLI exerciser around the `torrent-core` library: parse a `.torrent`
//! file, start its tracker and peer managers, and print events until
//! interrupted.
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use torrent_core::{open_torrent, ClientConfig, ClientEvent};

#[derive(Parser, Debug)]
#[command(name = "torrentd", about = "Runs the BitTorrent client core against a .torrent file")]
struct Cli {
    /// Path to a .torrent file.
    torrent_path: PathBuf,

    /// Local port advertised to trackers and peers.
    #[arg(long, default_value_t = 6881)]
    listen_port: u16,

    /// Maximum number of simultaneously admitted peers.
    #[arg(long)]
    max_peers: Option<usize>,

    /// Number of concurrent dial workers.
    #[arg(long)]
    dial_workers: Option<usize>,

    /// Peers requested per tracker announce.
    #[arg(long)]
    num_want: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let torrent_bytes = std::fs::read(&cli.torrent_path)?;

    let mut config = ClientConfig {
        listen_port: cli.listen_port,
        ..Default::default()
    };
    if let Some(max_peers) = cli.max_peers {
        config.peer.max_peers = max_peers;
    }
    if let Some(dial_workers) = cli.dial_workers {
        config.peer.dial_workers = dial_workers;
    }
    if let Some(num_want) = cli.num_want {
        config.tracker.num_want = num_want;
    }

    let mut handle = open_torrent(&torrent_bytes, config)?;
    let mut events = handle.events().expect("events receiver taken exactly once");
    handle.start();

    tracing::info!("torrent started, listening for events (ctrl-c to stop)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
            event = events.recv() => {
                match event {
                    Some(event) => log_event(&event),
                    None => break,
                }
            }
        }
    }

    handle.stop().await;
    Ok(())
}

fn log_event(event: &ClientEvent) {
    match event {
        ClientEvent::TrackerAnnounce { url, peers_count, interval, .. } => {
            tracing::info!(%url, peers_count, interval = ?interval_display(*interval), "tracker announce");
        }
        ClientEvent::TrackerScrape { url, seeders, leechers } => {
            tracing::info!(%url, ?seeders, ?leechers, "tracker scrape");
        }
        ClientEvent::PeerStarted { addr } => tracing::info!(%addr, "peer connected"),
        ClientEvent::PeerStopped { addr } => tracing::info!(%addr, "peer disconnected"),
        ClientEvent::PeerMessage { addr, kind } => tracing::debug!(%addr, kind, "peer message"),
    }
}

fn interval_display(interval: Duration) -> String {
    format!("{}s", interval.as_secs())
}
