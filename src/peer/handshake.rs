//! This module implements the BitTorrent peer handshake protocol.
//!
//! The handshake is the first message exchanged between two peers. It
//! verifies that both peers are participating in the same torrent (via
//! info_hash) and establishes basic protocol compatibility.
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::instrument;

use super::{PeerError, PeerResult};

pub const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

/// The fixed 68-byte handshake message that opens every peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    /// Serializes into the wire format:
    /// `[pstrlen=19][pstr][reserved: 8 zeros][info_hash: 20][peer_id: 20]`.
    pub fn serialize(&self) -> [u8; 68] {
        let mut buf = [0u8; 68];
        buf[0] = 19;
        buf[1..20].copy_from_slice(PROTOCOL);
        // buf[20..28] reserved, already zeroed.
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    #[instrument(level = "trace", skip(stream))]
    pub async fn write(&self, stream: &mut TcpStream) -> PeerResult<()> {
        stream.write_all(&self.serialize()).await?;
        Ok(())
    }

    /// Reads and validates a peer's handshake, under `deadline`.
    #[instrument(level = "trace", skip(stream))]
    pub async fn read(stream: &mut TcpStream, deadline: Duration) -> PeerResult<Self> {
        timeout(deadline, Self::read_inner(stream))
            .await
            .map_err(|_| PeerError::Timeout)?
    }

    async fn read_inner(stream: &mut TcpStream) -> PeerResult<Self> {
        let mut pstrlen = [0u8; 1];
        stream.read_exact(&mut pstrlen).await?;
        if pstrlen[0] != 19 {
            return Err(PeerError::PstrLenZero);
        }

        let mut rest = [0u8; 67];
        stream.read_exact(&mut rest).await?;

        if &rest[0..19] != PROTOCOL {
            return Err(PeerError::BadProtocol);
        }

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&rest[27..47]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&rest[47..67]);

        Ok(Self { info_hash, peer_id })
    }

    /// Checks the received handshake's info-hash against the torrent we
    /// expect. Does not check `peer_id` -- callers that only admit peers
    /// pinned by id should call [`Handshake::validate_peer_id`] too.
    pub fn validate_info_hash(&self, expected: &[u8; 20]) -> PeerResult<()> {
        if &self.info_hash != expected {
            return Err(PeerError::InfoHashMismatch);
        }
        Ok(())
    }

    pub fn validate_peer_id(&self, expected: &[u8; 20]) -> PeerResult<()> {
        if &self.peer_id != expected {
            return Err(PeerError::PeerIdMismatch);
        }
        Ok(())
    }

    /// Performs the full outbound handshake: write ours, then read and
    /// validate the remote's against `info_hash`.
    #[instrument(level = "debug", skip(stream))]
    pub async fn perform(
        stream: &mut TcpStream,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
        deadline: Duration,
    ) -> PeerResult<Handshake> {
        let ours = Handshake::new(info_hash, peer_id);
        ours.write(stream).await?;
        let theirs = Handshake::read(stream, deadline).await?;
        theirs.validate_info_hash(&info_hash)?;
        Ok(theirs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn serializes_to_68_bytes_with_correct_layout() {
        let hs = Handshake::new([1u8; 20], [2u8; 20]);
        let bytes = hs.serialize();
        assert_eq!(bytes.len(), 68);
        assert_eq!(bytes[0], 19);
        assert_eq!(&bytes[1..20], PROTOCOL);
        assert_eq!(&bytes[20..28], &[0u8; 8]);
        assert_eq!(&bytes[28..48], &[1u8; 20]);
        assert_eq!(&bytes[48..68], &[2u8; 20]);
    }

    #[tokio::test]
    async fn full_handshake_round_trips_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let info_hash = [7u8; 20];
        let server_peer_id = [9u8; 20];

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let their_hs = Handshake::read(&mut socket, Duration::from_secs(2))
                .await
                .unwrap();
            assert_eq!(their_hs.info_hash, info_hash);
            let ours = Handshake::new(info_hash, server_peer_id);
            ours.write(&mut socket).await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let client_peer_id = [3u8; 20];
        let theirs = Handshake::perform(
            &mut client,
            info_hash,
            client_peer_id,
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        assert_eq!(theirs.peer_id, server_peer_id);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_mismatched_info_hash() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _ = Handshake::read(&mut socket, Duration::from_secs(2)).await;
            let ours = Handshake::new([0xAA; 20], [9u8; 20]);
            let _ = ours.write(&mut socket).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let result = Handshake::perform(
            &mut client,
            [0xBB; 20],
            [3u8; 20],
            Duration::from_secs(2),
        )
        .await;
        assert!(matches!(result, Err(PeerError::InfoHashMismatch)));
        server.await.unwrap();
    }
}
