//! 20-byte locally generated peer identifier: an 8-byte client prefix
//! followed by 12 cryptographically random bytes, chosen once per
//! torrent session.
use rand::Rng;

pub const CLIENT_PREFIX: &[u8; 8] = b"-TC0001-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 20];
        bytes[..8].copy_from_slice(CLIENT_PREFIX);
        rand::rng().fill(&mut bytes[8..]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_the_client_prefix_and_differ() {
        let a = PeerId::generate();
        let b = PeerId::generate();
        assert_eq!(&a.0[..8], CLIENT_PREFIX);
        assert_ne!(a.0, b.0);
    }
}
