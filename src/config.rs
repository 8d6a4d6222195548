//! Tunable defaults for the tracker manager and peer manager (§4.5, §4.7),
//! aggregated into one configuration an embedding host or the CLI binary can
//! override field-by-field.
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TrackerManagerConfig {
    pub num_want: i64,
    pub announce_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub fallback_interval: Duration,
    pub respect_min_interval: bool,
    pub jitter_fraction: f64,
    pub stopped_timeout: Duration,
    pub scrape_every: Duration,
}

impl Default for TrackerManagerConfig {
    fn default() -> Self {
        Self {
            num_want: 80,
            announce_timeout: Duration::from_secs(12),
            initial_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(15 * 60),
            fallback_interval: Duration::from_secs(30 * 60),
            respect_min_interval: true,
            jitter_fraction: 0.10,
            stopped_timeout: Duration::from_secs(5),
            scrape_every: Duration::from_secs(0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeerManagerConfig {
    pub max_peers: usize,
    pub dial_workers: usize,
    pub candidate_queue_capacity: usize,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub handshake_timeout: Duration,
    pub keep_alive: Duration,
    pub mailbox_capacity: usize,
}

impl Default for PeerManagerConfig {
    fn default() -> Self {
        Self {
            max_peers: 100,
            dial_workers: 50,
            candidate_queue_capacity: 1000,
            read_timeout: Duration::from_secs(2 * 60),
            write_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            keep_alive: Duration::from_secs(30),
            mailbox_capacity: 128,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub tracker: TrackerManagerConfig,
    pub peer: PeerManagerConfig,
    pub listen_port: u16,
}
