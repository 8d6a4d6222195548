//! The 20-byte SHA-1 identifier of a torrent's info dictionary.
use sha1::{Digest, Sha1};
use std::fmt;

use crate::bencode::Value;

/// Swarm identifier, stable for the lifetime of the torrent. Two torrents
/// with equal info-hashes describe the same swarm even if other metainfo
/// fields (trackers, comment, ...) differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    /// Computes the info-hash as SHA-1 of the canonical bencoding of `info`.
    /// This is the central invariant tying the bencode codec's determinism
    /// to the torrent descriptor's identity: any conformant re-encoding of
    /// the same decoded value must hash to the same bytes.
    pub fn of(info: &Value) -> Self {
        let encoded = crate::bencode::encode(info);
        let mut hasher = Sha1::new();
        hasher.update(&encoded);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::{decode, Dict};

    #[test]
    fn hash_is_stable_across_encode_decode_encode() {
        let mut info = Dict::new();
        info.insert(b"name".to_vec(), Value::String(b"x".to_vec()));
        info.insert(b"piece length".to_vec(), Value::Integer(1));
        info.insert(b"pieces".to_vec(), Value::String(vec![0u8; 20]));
        info.insert(b"length".to_vec(), Value::Integer(1));
        let info_value = Value::Dict(info);

        let direct_hash = InfoHash::of(&info_value);

        let mut top = Dict::new();
        top.insert(b"info".to_vec(), info_value.clone());
        top.insert(
            b"announce".to_vec(),
            Value::String(b"http://t/".to_vec()),
        );
        let top_bytes = crate::bencode::encode(&Value::Dict(top));

        let decoded_top = decode(&top_bytes).unwrap();
        let decoded_info = decoded_top.as_dict().unwrap().get(b"info").unwrap();
        let reencoded = crate::bencode::encode(decoded_info);
        let rehashed = InfoHash::of(&decode(&reencoded).unwrap());

        assert_eq!(direct_hash, rehashed);
        assert_eq!(crate::bencode::encode(&info_value), reencoded);
    }
}
