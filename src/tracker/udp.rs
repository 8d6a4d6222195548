//! UDP tracker transport (BEP-15): connect/announce/scrape over a
//! connected socket, with exponential retransmit and a cached connection id.
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{AnnounceEvent, AnnounceRequest, AnnounceResponse, ScrapeEntry, TrackerError, TrackerResult};

const PROTOCOL_ID: u64 = 0x41727101980;
const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_SCRAPE: u32 = 2;
const ACTION_ERROR: u32 = 3;
const CONNECTION_ID_TTL: Duration = Duration::from_secs(60);
const RETRANSMIT_BASE: Duration = Duration::from_secs(15);
const MAX_RETRIES: u32 = 8;

struct CachedConnection {
    id: u64,
    obtained_at: Instant,
}

/// One UDP tracker, addressed by `host:port` from the announce URL.
pub struct UdpTracker {
    url: String,
    addr: SocketAddr,
    key: u32,
    connection: Mutex<Option<CachedConnection>>,
    retransmit_base: Duration,
    max_retries: u32,
}

impl UdpTracker {
    pub fn new(url: String, addr: SocketAddr) -> Self {
        Self {
            url,
            addr,
            key: rand::rng().random(),
            connection: Mutex::new(None),
            retransmit_base: RETRANSMIT_BASE,
            max_retries: MAX_RETRIES,
        }
    }

    /// Same as [`UdpTracker::new`] but with injectable retransmit timing, so
    /// tests can exercise the retry/backoff behavior without waiting on
    /// real minutes-long timeouts.
    #[cfg(test)]
    fn new_for_test(url: String, addr: SocketAddr, retransmit_base: Duration, max_retries: u32) -> Self {
        Self {
            url,
            addr,
            key: rand::rng().random(),
            connection: Mutex::new(None),
            retransmit_base,
            max_retries,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn supports_scrape(&self) -> bool {
        true
    }

    #[instrument(level = "debug", skip(self, request), fields(url = %self.url))]
    pub async fn announce(
        &self,
        request: &AnnounceRequest,
        deadline: Duration,
    ) -> TrackerResult<AnnounceResponse> {
        let socket = self.connect_socket(deadline).await?;

        with_retransmit(deadline, self.retransmit_base, self.max_retries, |txn| {
            let socket = &socket;
            async move {
                let connection_id = self.connection_id(socket, deadline).await?;
                let packet = build_announce_packet(connection_id, txn, self.key, request);
                socket.send(&packet).await?;
                let mut buf = [0u8; 1024];
                let n = socket.recv(&mut buf).await?;
                self.check_mismatch(parse_announce_packet(&buf[..n], txn)).await
            }
        })
        .await
    }

    #[instrument(level = "debug", skip(self, info_hashes), fields(url = %self.url))]
    pub async fn scrape(
        &self,
        info_hashes: &[[u8; 20]],
        deadline: Duration,
    ) -> TrackerResult<Vec<([u8; 20], ScrapeEntry)>> {
        let socket = self.connect_socket(deadline).await?;

        with_retransmit(deadline, self.retransmit_base, self.max_retries, |txn| {
            let socket = &socket;
            async move {
                let connection_id = self.connection_id(socket, deadline).await?;
                let packet = build_scrape_packet(connection_id, txn, info_hashes);
                socket.send(&packet).await?;
                let mut buf = [0u8; 1024];
                let n = socket.recv(&mut buf).await?;
                self.check_mismatch(parse_scrape_packet(&buf[..n], txn, info_hashes)).await
            }
        })
        .await
    }

    /// On an action/txn mismatch the cached connection id may be stale (the
    /// tracker may have expired or never recognized it); drop it so the next
    /// retransmit attempt re-runs the connect exchange instead of resending
    /// against a connection id that will only mismatch again.
    async fn check_mismatch<T>(&self, result: TrackerResult<T>) -> TrackerResult<T> {
        if let Err(TrackerError::ProtocolMismatch) = &result {
            self.connection.lock().await.take();
        }
        result
    }

    async fn connect_socket(&self, deadline: Duration) -> TrackerResult<UdpSocket> {
        let local = if self.addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local).await?;
        tokio::time::timeout(deadline, socket.connect(self.addr))
            .await
            .map_err(|_| TrackerError::Timeout)??;
        Ok(socket)
    }

    async fn connection_id(&self, socket: &UdpSocket, deadline: Duration) -> TrackerResult<u64> {
        {
            let cached = self.connection.lock().await;
            if let Some(conn) = cached.as_ref() {
                if conn.obtained_at.elapsed() < CONNECTION_ID_TTL {
                    return Ok(conn.id);
                }
            }
        }

        let id = with_retransmit(deadline, self.retransmit_base, self.max_retries, |txn| {
            let socket = socket;
            async move {
                let mut packet = Vec::with_capacity(16);
                packet.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
                packet.extend_from_slice(&ACTION_CONNECT.to_be_bytes());
                packet.extend_from_slice(&txn.to_be_bytes());
                socket.send(&packet).await?;

                let mut buf = [0u8; 16];
                let n = socket.recv(&mut buf).await?;
                parse_connect_packet(&buf[..n], txn)
            }
        })
        .await?;

        *self.connection.lock().await = Some(CachedConnection {
            id,
            obtained_at: Instant::now(),
        });
        Ok(id)
    }
}

/// Runs `attempt` with exponentially growing per-try timeouts, giving up
/// the whole operation once `deadline` has elapsed or `max_retries` tries
/// have been made, whichever comes first. Every retry gets a fresh
/// transaction id.
async fn with_retransmit<T, F, Fut>(
    deadline: Duration,
    base: Duration,
    max_retries: u32,
    mut attempt: F,
) -> TrackerResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = TrackerResult<T>>,
{
    let overall_deadline = Instant::now() + deadline;
    for try_index in 0..max_retries {
        let txn: u32 = rand::rng().random();
        let per_try_timeout = base * 2u32.pow(try_index);
        let remaining = overall_deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let bounded_timeout = per_try_timeout.min(remaining);

        match tokio::time::timeout(bounded_timeout, attempt(txn)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(TrackerError::ProtocolMismatch)) => {
                debug!(try_index, "udp txn/action mismatch, retrying");
                continue;
            }
            Ok(Err(err)) => return Err(err),
            Err(_) => continue,
        }
    }
    Err(TrackerError::RetriesExhausted)
}

fn build_announce_packet(connection_id: u64, txn: u32, key: u32, request: &AnnounceRequest) -> [u8; 98] {
    let mut buf = [0u8; 98];
    buf[0..8].copy_from_slice(&connection_id.to_be_bytes());
    buf[8..12].copy_from_slice(&ACTION_ANNOUNCE.to_be_bytes());
    buf[12..16].copy_from_slice(&txn.to_be_bytes());
    buf[16..36].copy_from_slice(&request.info_hash);
    buf[36..56].copy_from_slice(&request.peer_id);
    buf[56..64].copy_from_slice(&request.downloaded.to_be_bytes());
    buf[64..72].copy_from_slice(&request.left.to_be_bytes());
    buf[72..80].copy_from_slice(&request.uploaded.to_be_bytes());
    buf[80..84].copy_from_slice(&request.event.as_udp_code().to_be_bytes());
    buf[84..88].copy_from_slice(&0u32.to_be_bytes()); // ip = 0 (use socket's source)
    buf[88..92].copy_from_slice(&key.to_be_bytes());
    let num_want = if request.num_want < 0 { -1i32 } else { request.num_want as i32 };
    buf[92..96].copy_from_slice(&num_want.to_be_bytes());
    buf[96..98].copy_from_slice(&request.port.to_be_bytes());
    buf
}

fn build_scrape_packet(connection_id: u64, txn: u32, info_hashes: &[[u8; 20]]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + info_hashes.len() * 20);
    buf.extend_from_slice(&connection_id.to_be_bytes());
    buf.extend_from_slice(&ACTION_SCRAPE.to_be_bytes());
    buf.extend_from_slice(&txn.to_be_bytes());
    for hash in info_hashes {
        buf.extend_from_slice(hash);
    }
    buf
}

fn parse_connect_packet(bytes: &[u8], expected_txn: u32) -> TrackerResult<u64> {
    if bytes.len() < 16 {
        return Err(TrackerError::ProtocolMismatch);
    }
    let action = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
    let txn = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
    if action == ACTION_ERROR {
        return Err(TrackerError::UdpError(String::from_utf8_lossy(&bytes[8..]).into_owned()));
    }
    if action != ACTION_CONNECT || txn != expected_txn {
        return Err(TrackerError::ProtocolMismatch);
    }
    Ok(u64::from_be_bytes(bytes[8..16].try_into().unwrap()))
}

fn parse_announce_packet(bytes: &[u8], expected_txn: u32) -> TrackerResult<AnnounceResponse> {
    if bytes.len() < 8 {
        return Err(TrackerError::ProtocolMismatch);
    }
    let action = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
    let txn = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
    if action == ACTION_ERROR {
        return Err(TrackerError::UdpError(String::from_utf8_lossy(&bytes[8..]).into_owned()));
    }
    if action != ACTION_ANNOUNCE || txn != expected_txn || bytes.len() < 20 {
        return Err(TrackerError::ProtocolMismatch);
    }

    let interval = u32::from_be_bytes(bytes[8..12].try_into().unwrap());
    let incomplete = u32::from_be_bytes(bytes[12..16].try_into().unwrap());
    let complete = u32::from_be_bytes(bytes[16..20].try_into().unwrap());
    let peer_bytes = &bytes[20..];

    let addr_len = if peer_bytes.len() % 18 == 0 && peer_bytes.len() % 6 != 0 { 16 } else { 4 };
    let stride = addr_len + 2;
    let peers = peer_bytes
        .chunks_exact(stride)
        .filter_map(|chunk| {
            let port = u16::from_be_bytes([chunk[addr_len], chunk[addr_len + 1]]);
            let ip: IpAddr = if addr_len == 4 {
                Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]).into()
            } else {
                let octets: [u8; 16] = chunk[..16].try_into().ok()?;
                Ipv6Addr::from(octets).into()
            };
            Some(SocketAddr::new(ip, port))
        })
        .collect();

    Ok(AnnounceResponse {
        interval: Duration::from_secs(interval as u64),
        min_interval: None,
        complete: Some(complete as i64),
        incomplete: Some(incomplete as i64),
        peers,
    })
}

fn parse_scrape_packet(
    bytes: &[u8],
    expected_txn: u32,
    requested: &[[u8; 20]],
) -> TrackerResult<Vec<([u8; 20], ScrapeEntry)>> {
    if bytes.len() < 8 {
        return Err(TrackerError::ProtocolMismatch);
    }
    let action = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
    let txn = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
    if action == ACTION_ERROR {
        return Err(TrackerError::UdpError(String::from_utf8_lossy(&bytes[8..]).into_owned()));
    }
    if action != ACTION_SCRAPE || txn != expected_txn {
        return Err(TrackerError::ProtocolMismatch);
    }

    let entries = &bytes[8..];
    Ok(entries
        .chunks_exact(12)
        .zip(requested.iter())
        .map(|(chunk, hash)| {
            let seeders = u32::from_be_bytes(chunk[0..4].try_into().unwrap());
            let leechers = u32::from_be_bytes(chunk[8..12].try_into().unwrap());
            (
                *hash,
                ScrapeEntry {
                    seeders: Some(seeders as i64),
                    leechers: Some(leechers as i64),
                },
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announce_packet_is_98_bytes_with_expected_layout() {
        let request = AnnounceRequest {
            info_hash: [1u8; 20],
            peer_id: [2u8; 20],
            port: 6881,
            uploaded: 10,
            downloaded: 20,
            left: 30,
            num_want: 50,
            event: AnnounceEvent::Started,
        };
        let packet = build_announce_packet(0xABCD, 0x1234, 0x5678, &request);
        assert_eq!(packet.len(), 98);
        assert_eq!(&packet[0..8], &0xABCDu64.to_be_bytes());
        assert_eq!(&packet[8..12], &ACTION_ANNOUNCE.to_be_bytes());
        assert_eq!(&packet[16..36], &[1u8; 20]);
        assert_eq!(&packet[36..56], &[2u8; 20]);
        assert_eq!(&packet[96..98], &6881u16.to_be_bytes());
    }

    #[test]
    fn parses_connect_response_matching_txn() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&ACTION_CONNECT.to_be_bytes());
        bytes.extend_from_slice(&0x42u32.to_be_bytes());
        bytes.extend_from_slice(&999u64.to_be_bytes());
        assert_eq!(parse_connect_packet(&bytes, 0x42).unwrap(), 999);
    }

    #[test]
    fn rejects_connect_response_with_wrong_txn() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&ACTION_CONNECT.to_be_bytes());
        bytes.extend_from_slice(&0x42u32.to_be_bytes());
        bytes.extend_from_slice(&999u64.to_be_bytes());
        assert!(matches!(
            parse_connect_packet(&bytes, 0x99),
            Err(TrackerError::ProtocolMismatch)
        ));
    }

    #[test]
    fn error_packet_surfaces_message() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&ACTION_ERROR.to_be_bytes());
        bytes.extend_from_slice(&0x42u32.to_be_bytes());
        bytes.extend_from_slice(b"bad info_hash");
        let err = parse_connect_packet(&bytes, 0x42).unwrap_err();
        assert!(matches!(err, TrackerError::UdpError(msg) if msg == "bad info_hash"));
    }

    /// A fake tracker that silently drops the first two connect packets it
    /// sees and answers the third, recording the txn and arrival time of
    /// every packet so the test can check both distinctness and backoff
    /// growth.
    async fn drop_first_two_connects(socket: UdpSocket) -> (Vec<u32>, Vec<Instant>) {
        let mut buf = [0u8; 32];
        let mut txns = Vec::new();
        let mut times = Vec::new();
        loop {
            let (_n, peer) = socket.recv_from(&mut buf).await.unwrap();
            let txn = u32::from_be_bytes(buf[12..16].try_into().unwrap());
            txns.push(txn);
            times.push(Instant::now());
            if txns.len() == 3 {
                let mut response = [0u8; 16];
                response[0..4].copy_from_slice(&ACTION_CONNECT.to_be_bytes());
                response[4..8].copy_from_slice(&txn.to_be_bytes());
                response[8..16].copy_from_slice(&4242u64.to_be_bytes());
                socket.send_to(&response, peer).await.unwrap();
                return (txns, times);
            }
        }
    }

    #[tokio::test]
    async fn connect_retries_with_distinct_txns_and_growing_timeouts() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let server = tokio::spawn(drop_first_two_connects(server));

        let tracker = UdpTracker::new_for_test(
            format!("udp://{server_addr}"),
            server_addr,
            Duration::from_millis(20),
            5,
        );
        let client_socket = tracker.connect_socket(Duration::from_secs(2)).await.unwrap();
        let id = tracker
            .connection_id(&client_socket, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(id, 4242);

        let (txns, times) = server.await.unwrap();
        assert_eq!(txns.len(), 3);
        let distinct: std::collections::HashSet<_> = txns.iter().collect();
        assert_eq!(distinct.len(), 3, "each retry must use a fresh transaction id");

        let first_gap = times[1].duration_since(times[0]);
        let second_gap = times[2].duration_since(times[1]);
        assert!(
            second_gap > first_gap,
            "retransmit timeout should grow between attempts: {first_gap:?} then {second_gap:?}"
        );
    }
}
