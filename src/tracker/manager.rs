//! Runs one announce loop per tracker (plus an optional scrape loop),
//! applying backoff, jitter and the started/none/completed/stopped event
//! lifecycle, and forwards results to the host event stream.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, instrument, warn};

use crate::config::TrackerManagerConfig;
use crate::event::{self, ClientEvent};

use super::transport::TrackerTransport;
use super::{AnnounceEvent, AnnounceRequest};

/// Stats the host mutates concurrently; read atomically before each
/// announce.
#[derive(Debug, Default)]
pub struct TransferStats {
    pub uploaded: AtomicU64,
    pub downloaded: AtomicU64,
    pub left: AtomicU64,
}

/// Receives peer addresses as they arrive from announces, independent of
/// which tracker produced them.
pub type PeerSink = mpsc::Sender<Vec<SocketAddr>>;

/// Owns one tracker transport per announce URL and drives an announce loop
/// (and optionally a scrape loop) for each, until [`TrackerManager::stop`].
pub struct TrackerManager {
    stop: Arc<Notify>,
    stopped: std::sync::atomic::AtomicBool,
}

impl TrackerManager {
    /// Spawns one announce loop (and optional scrape loop) per tracker URL.
    pub fn spawn(
        announce_urls: Vec<String>,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
        port: u16,
        stats: Arc<TransferStats>,
        config: TrackerManagerConfig,
        peer_sink: PeerSink,
        events: mpsc::Sender<ClientEvent>,
    ) -> Self {
        let stop = Arc::new(Notify::new());

        for url in announce_urls {
            match TrackerTransport::from_url(&url) {
                Ok(transport) => {
                    let transport = Arc::new(transport);
                    tokio::spawn(announce_loop(
                        Arc::clone(&transport),
                        info_hash,
                        peer_id,
                        port,
                        Arc::clone(&stats),
                        config.clone(),
                        peer_sink.clone(),
                        events.clone(),
                        Arc::clone(&stop),
                    ));
                    if config.scrape_every > Duration::ZERO && transport.supports_scrape() {
                        tokio::spawn(scrape_loop(
                            transport,
                            info_hash,
                            config.clone(),
                            events.clone(),
                            Arc::clone(&stop),
                        ));
                    }
                }
                Err(err) => warn!(%url, %err, "skipping tracker with unusable announce URL"),
            }
        }

        Self {
            stop,
            stopped: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Broadcasts the stop signal; each loop makes one best-effort
    /// `stopped` announce before exiting.
    pub fn stop(&self) {
        if self.stopped.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            self.stop.notify_waiters();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Starting,
    Running,
    Stopping,
}

#[instrument(level = "debug", skip_all, fields(url = %transport.url()))]
async fn announce_loop(
    transport: Arc<TrackerTransport>,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    port: u16,
    stats: Arc<TransferStats>,
    config: TrackerManagerConfig,
    peer_sink: PeerSink,
    events: mpsc::Sender<ClientEvent>,
    stop: Arc<Notify>,
) {
    let mut state = LoopState::Starting;
    let mut backoff = config.initial_backoff;
    let mut completed_sent = false;

    loop {
        let left = stats.left.load(Ordering::SeqCst);
        let event = match state {
            LoopState::Starting => AnnounceEvent::Started,
            LoopState::Running if left == 0 && !completed_sent => AnnounceEvent::Completed,
            LoopState::Running => AnnounceEvent::None,
            LoopState::Stopping => AnnounceEvent::Stopped,
        };

        let request = AnnounceRequest {
            info_hash,
            peer_id,
            port,
            uploaded: stats.uploaded.load(Ordering::SeqCst),
            downloaded: stats.downloaded.load(Ordering::SeqCst),
            left,
            num_want: config.num_want,
            event,
        };

        let deadline = if state == LoopState::Stopping {
            config.stopped_timeout
        } else {
            config.announce_timeout
        };

        match transport.announce(&request, deadline).await {
            Ok(response) => {
                if event == AnnounceEvent::Completed {
                    completed_sent = true;
                }
                backoff = config.initial_backoff;

                event::emit(
                    &events,
                    ClientEvent::TrackerAnnounce {
                        url: transport.url().to_string(),
                        seeders: response.complete,
                        leechers: response.incomplete,
                        interval: response.interval,
                        min_interval: response.min_interval,
                        peers_count: response.peers.len(),
                    },
                );

                if !response.peers.is_empty() {
                    let _ = peer_sink.try_send(response.peers);
                }

                if state == LoopState::Stopping {
                    return;
                }
                state = LoopState::Running;

                let mut sleep_for = response.interval;
                if config.respect_min_interval {
                    if let Some(min_interval) = response.min_interval {
                        if min_interval > sleep_for {
                            sleep_for = min_interval;
                        }
                    }
                }
                if sleep_for.is_zero() {
                    sleep_for = config.fallback_interval;
                }

                if wait_or_stop(jitter(sleep_for, config.jitter_fraction), &stop).await {
                    state = LoopState::Stopping;
                }
            }
            Err(err) => {
                debug!(%err, "announce failed");
                if state == LoopState::Stopping {
                    return;
                }
                // Event reverts to none on retry: a failed `started` must
                // never be replayed on the next attempt.
                state = LoopState::Running;
                backoff = (backoff * 2).min(config.max_backoff);
                if wait_or_stop(jitter(backoff, config.jitter_fraction), &stop).await {
                    state = LoopState::Stopping;
                }
            }
        }
    }
}

#[instrument(level = "debug", skip_all, fields(url = %transport.url()))]
async fn scrape_loop(
    transport: Arc<TrackerTransport>,
    info_hash: [u8; 20],
    config: TrackerManagerConfig,
    events: mpsc::Sender<ClientEvent>,
    stop: Arc<Notify>,
) {
    loop {
        if wait_or_stop(config.scrape_every, &stop).await {
            return;
        }

        match transport.scrape(&[info_hash], config.announce_timeout).await {
            Ok(entries) => {
                for (_, entry) in entries {
                    event::emit(
                        &events,
                        ClientEvent::TrackerScrape {
                            url: transport.url().to_string(),
                            seeders: entry.seeders,
                            leechers: entry.leechers,
                        },
                    );
                }
            }
            Err(err) => debug!(%err, "scrape failed"),
        }
    }
}

/// Sleeps for `duration` unless `stop` fires first. Returns `true` if the
/// stop signal won the race.
async fn wait_or_stop(duration: Duration, stop: &Notify) -> bool {
    tokio::select! {
        biased;
        _ = stop.notified() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

/// Multiplies `duration` by a uniform random factor in `[1-f, 1+f]`.
fn jitter(duration: Duration, fraction: f64) -> Duration {
    if fraction <= 0.0 {
        return duration;
    }
    let factor = rand::rng().random_range((1.0 - fraction)..=(1.0 + fraction));
    Duration::from_secs_f64((duration.as_secs_f64() * factor).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_secs(100);
        for _ in 0..100 {
            let jittered = jitter(base, 0.10);
            assert!(jittered >= Duration::from_secs(90));
            assert!(jittered <= Duration::from_secs(110));
        }
    }

    #[test]
    fn zero_jitter_fraction_is_a_no_op() {
        let base = Duration::from_secs(42);
        assert_eq!(jitter(base, 0.0), base);
    }
}
