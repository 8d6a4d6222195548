//! The push event stream exposed to an embedding host. Internal tracker and
//! peer code paths never call into host code directly: they post a
//! [`ClientEvent`] onto a bounded channel and move on, so a slow or absent
//! consumer never stalls a tracker loop or a peer session.
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    TrackerAnnounce {
        url: String,
        seeders: Option<i64>,
        leechers: Option<i64>,
        interval: Duration,
        min_interval: Option<Duration>,
        peers_count: usize,
    },
    TrackerScrape {
        url: String,
        seeders: Option<i64>,
        leechers: Option<i64>,
    },
    PeerStarted {
        addr: SocketAddr,
    },
    PeerStopped {
        addr: SocketAddr,
    },
    PeerMessage {
        addr: SocketAddr,
        kind: &'static str,
    },
}

/// Capacity of the event channel handed to embedding hosts (§4.8).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Sends an event without blocking; drops it on a full channel rather than
/// ever stalling the caller. A host that cannot keep up loses events, not
/// progress.
pub fn emit(tx: &tokio::sync::mpsc::Sender<ClientEvent>, event: ClientEvent) {
    if let Err(err) = tx.try_send(event) {
        tracing::debug!(?err, "dropping client event: channel full or closed");
    }
}
