//! Tracker protocols (HTTP and UDP) and the manager that runs an announce
//! loop per tracker, with optional scrape, backoff and jitter.
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

pub mod http;
pub mod manager;
pub mod transport;
pub mod udp;

pub use manager::TrackerManager;
pub use transport::TrackerTransport;

/// The event value a tracker sends with an announce. `None` corresponds to
/// BEP-3's `event=none` (or the field omitted).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceEvent {
    None,
    Started,
    Completed,
    Stopped,
}

impl AnnounceEvent {
    fn as_query_str(self) -> Option<&'static str> {
        match self {
            AnnounceEvent::None => None,
            AnnounceEvent::Started => Some("started"),
            AnnounceEvent::Completed => Some("completed"),
            AnnounceEvent::Stopped => Some("stopped"),
        }
    }

    fn as_udp_code(self) -> u32 {
        match self {
            AnnounceEvent::None => 0,
            AnnounceEvent::Completed => 1,
            AnnounceEvent::Started => 2,
            AnnounceEvent::Stopped => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub num_want: i64,
    pub event: AnnounceEvent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnounceResponse {
    pub interval: Duration,
    pub min_interval: Option<Duration>,
    pub complete: Option<i64>,
    pub incomplete: Option<i64>,
    pub peers: Vec<SocketAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrapeEntry {
    pub seeders: Option<i64>,
    pub leechers: Option<i64>,
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("url error: {0}")]
    Url(#[from] url::ParseError),

    #[error("tracker returned failure: {0}")]
    Failure(String),

    #[error("tracker response missing required field: {0}")]
    MissingField(&'static str),

    #[error("tracker response had an unexpected shape for field: {0}")]
    MalformedField(&'static str),

    #[error("unsupported tracker URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("non-200 response ({status}): {body}")]
    BadStatus { status: u16, body: String },

    #[error("transport does not support scrape")]
    ScrapeUnsupported,

    #[error("timed out waiting for tracker")]
    Timeout,

    #[error("udp response action/transaction id mismatch")]
    ProtocolMismatch,

    #[error("udp tracker returned an error packet: {0}")]
    UdpError(String),

    #[error("exhausted retransmit attempts")]
    RetriesExhausted,
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;
