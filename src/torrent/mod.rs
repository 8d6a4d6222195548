//! Torrent metainfo: parsing `.torrent` file bytes into a typed descriptor,
//! plus the 20-byte identifiers that key a swarm and a peer.
use thiserror::Error;

pub mod info_hash;
pub mod metainfo;

pub use info_hash::InfoHash;
pub use metainfo::{FileEntry, Info, Metainfo, Mode};

#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("bencode decoding error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("top-level value is not a dictionary")]
    NotADictionary,

    #[error("missing required \"info\" dictionary")]
    MissingInfo,

    #[error("missing or invalid field: {0}")]
    MissingField(String),

    #[error("invalid data type for field: {0}")]
    InvalidFieldType(String),

    #[error("\"pieces\" length {0} is not a multiple of 20")]
    InvalidPiecesLength(usize),

    #[error("file path element is empty or path list is empty")]
    InvalidPath,
}

pub type TorrentResult<T> = std::result::Result<T, TorrentError>;
