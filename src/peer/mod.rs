//! Peer wire protocol: handshake, message framing, per-peer sessions and
//! the peer manager that admits and supervises them.
use thiserror::Error;

pub mod handshake;
pub mod manager;
pub mod message;
pub mod session;

pub use handshake::Handshake;
pub use manager::PeerManager;
pub use message::Message;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake protocol string length was not 19")]
    PstrLenZero,

    #[error("handshake protocol identifier was not \"BitTorrent protocol\"")]
    BadProtocol,

    #[error("handshake info-hash did not match the expected torrent")]
    InfoHashMismatch,

    #[error("handshake peer-id did not match the expected peer")]
    PeerIdMismatch,

    #[error("timed out waiting for peer")]
    Timeout,

    #[error("message payload was truncated for id {0}")]
    TruncatedPayload(u8),
}

pub type PeerResult<T> = std::result::Result<T, PeerError>;
