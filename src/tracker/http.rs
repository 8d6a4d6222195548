//! HTTP(S) tracker transport (BEP-3).
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tracing::{instrument, warn};
use url::Url;

use crate::bencode::{self, Value};

use super::{AnnounceRequest, AnnounceResponse, ScrapeEntry, TrackerError, TrackerResult};

const MAX_ERROR_BODY: usize = 1024;

/// One HTTP(S) tracker, addressed by its announce URL.
#[derive(Debug, Clone)]
pub struct HttpTracker {
    announce_url: Url,
    client: reqwest::Client,
}

impl HttpTracker {
    pub fn new(announce_url: Url) -> Self {
        Self {
            announce_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        self.announce_url.as_str()
    }

    /// Scrape is only possible when the announce URL's final path segment
    /// starts with "announce".
    pub fn supports_scrape(&self) -> bool {
        self.scrape_url().is_some()
    }

    fn scrape_url(&self) -> Option<Url> {
        let mut url = self.announce_url.clone();
        let new_last_segment = {
            let mut segments = url.path_segments()?;
            let last = segments.next_back()?;
            if !last.starts_with("announce") {
                return None;
            }
            last.replacen("announce", "scrape", 1)
        };
        {
            let mut segments = url.path_segments_mut().ok()?;
            segments.pop();
            segments.push(&new_last_segment);
        }
        Some(url)
    }

    #[instrument(level = "debug", skip(self, request), fields(url = %self.url()))]
    pub async fn announce(
        &self,
        request: &AnnounceRequest,
        deadline: Duration,
    ) -> TrackerResult<AnnounceResponse> {
        let mut url = self.announce_url.clone();
        build_announce_query(&mut url, request);

        let body = get_body(&self.client, url, deadline).await?;
        parse_announce_response(&body)
    }

    #[instrument(level = "debug", skip(self, info_hashes), fields(url = %self.url()))]
    pub async fn scrape(
        &self,
        info_hashes: &[[u8; 20]],
        deadline: Duration,
    ) -> TrackerResult<Vec<([u8; 20], ScrapeEntry)>> {
        let mut url = self.scrape_url().ok_or(TrackerError::ScrapeUnsupported)?;
        {
            let mut pairs = url.query_pairs_mut();
            for hash in info_hashes {
                pairs.append_pair("info_hash", &percent_encode_bytes(hash));
            }
        }

        let body = get_body(&self.client, url, deadline).await?;
        parse_scrape_response(&body, info_hashes)
    }
}

async fn get_body(client: &reqwest::Client, url: Url, deadline: Duration) -> TrackerResult<Vec<u8>> {
    let response = tokio::time::timeout(deadline, client.get(url).send())
        .await
        .map_err(|_| TrackerError::Timeout)??;

    let status = response.status();
    if !status.is_success() {
        let bytes = response.bytes().await.unwrap_or_default();
        let truncated = &bytes[..bytes.len().min(MAX_ERROR_BODY)];
        return Err(TrackerError::BadStatus {
            status: status.as_u16(),
            body: String::from_utf8_lossy(truncated).into_owned(),
        });
    }

    Ok(response.bytes().await?.to_vec())
}

fn build_announce_query(url: &mut Url, request: &AnnounceRequest) {
    let mut pairs = url.query_pairs_mut();
    pairs.append_pair("info_hash", &percent_encode_bytes(&request.info_hash));
    pairs.append_pair("peer_id", &percent_encode_bytes(&request.peer_id));
    pairs.append_pair("port", &request.port.to_string());
    pairs.append_pair("uploaded", &request.uploaded.to_string());
    pairs.append_pair("downloaded", &request.downloaded.to_string());
    pairs.append_pair("left", &request.left.to_string());
    pairs.append_pair("compact", "1");
    if request.num_want >= 0 {
        pairs.append_pair("numwant", &request.num_want.to_string());
    }
    if let Some(event) = request.event.as_query_str() {
        pairs.append_pair("event", event);
    }
}

/// Percent-encodes raw bytes per RFC 3986's unreserved set; `info_hash` and
/// `peer_id` must travel as raw bytes, never hex, so this bypasses `url`'s
/// string-oriented query encoder.
fn percent_encode_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for &byte in bytes {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn parse_announce_response(body: &[u8]) -> TrackerResult<AnnounceResponse> {
    let value = bencode::decode(body)?;
    let dict = value.as_dict().ok_or(TrackerError::MalformedField("response"))?;

    if let Some(reason) = dict.get(b"failure reason").and_then(Value::as_bytes) {
        return Err(TrackerError::Failure(String::from_utf8_lossy(reason).into_owned()));
    }
    if let Some(warning) = dict.get(b"warning message").and_then(Value::as_bytes) {
        warn!(message = %String::from_utf8_lossy(warning), "tracker warning");
    }

    let interval = dict
        .get(b"interval")
        .and_then(Value::as_integer)
        .ok_or(TrackerError::MissingField("interval"))?;
    let min_interval = dict
        .get(b"min interval")
        .and_then(Value::as_integer)
        .map(|secs| Duration::from_secs(secs.max(0) as u64));
    let complete = dict.get(b"complete").and_then(Value::as_integer);
    let incomplete = dict.get(b"incomplete").and_then(Value::as_integer);

    let mut peers = Vec::new();
    match dict.get(b"peers") {
        Some(Value::String(bytes)) => peers.extend(decode_compact_peers(bytes, 4)),
        Some(Value::List(entries)) => peers.extend(decode_dict_peers(entries)),
        _ => {}
    }
    if let Some(Value::String(bytes)) = dict.get(b"peers6") {
        peers.extend(decode_compact_peers(bytes, 16));
    }

    Ok(AnnounceResponse {
        interval: Duration::from_secs(interval.max(0) as u64),
        min_interval,
        complete,
        incomplete,
        peers,
    })
}

fn decode_compact_peers(bytes: &[u8], addr_len: usize) -> Vec<SocketAddr> {
    let stride = addr_len + 2;
    bytes
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
        .collect()
}

fn decode_dict_peers(entries: &[Value]) -> Vec<SocketAddr> {
    entries
        .iter()
        .filter_map(|entry| {
            let dict = entry.as_dict()?;
            let ip_bytes = dict.get(b"ip")?.as_bytes()?;
            let ip: IpAddr = std::str::from_utf8(ip_bytes).ok()?.parse().ok()?;
            let port = dict.get(b"port")?.as_integer()? as u16;
            Some(SocketAddr::new(ip, port))
        })
        .collect()
}

fn parse_scrape_response(
    body: &[u8],
    requested: &[[u8; 20]],
) -> TrackerResult<Vec<([u8; 20], ScrapeEntry)>> {
    let value = bencode::decode(body)?;
    let dict = value.as_dict().ok_or(TrackerError::MalformedField("response"))?;
    let files = dict
        .get(b"files")
        .and_then(Value::as_dict)
        .ok_or(TrackerError::MissingField("files"))?;

    let mut results = Vec::with_capacity(requested.len());
    for (key, entry) in files.iter() {
        let Ok(hash): Result<[u8; 20], _> = key.as_slice().try_into() else {
            continue;
        };
        let Some(entry_dict) = entry.as_dict() else {
            continue;
        };
        results.push((
            hash,
            ScrapeEntry {
                seeders: entry_dict.get(b"complete").and_then(Value::as_integer),
                leechers: entry_dict.get(b"incomplete").and_then(Value::as_integer),
            },
        ));
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_encodes_info_hash_bytes() {
        let encoded = percent_encode_bytes(&[0x00, 0x41, 0x2d, 0xff]);
        assert_eq!(encoded, "%00A-%FF");
    }

    #[test]
    fn scrape_url_replaces_final_announce_segment() {
        let tracker = HttpTracker::new(Url::parse("http://t.example/x/announce").unwrap());
        assert_eq!(tracker.scrape_url().unwrap().as_str(), "http://t.example/x/scrape");
    }

    #[test]
    fn scrape_unsupported_when_path_lacks_announce() {
        let tracker = HttpTracker::new(Url::parse("http://t.example/x/foo").unwrap());
        assert!(!tracker.supports_scrape());
    }

    #[test]
    fn parses_compact_ipv4_peer_list() {
        let body = b"d8:intervali1800e5:peers6:\x7f\x00\x00\x01\x1a\xe1e";
        let response = parse_announce_response(body).unwrap();
        assert_eq!(response.interval, Duration::from_secs(1800));
        assert_eq!(response.peers, vec!["127.0.0.1:6881".parse().unwrap()]);
    }

    #[test]
    fn failure_reason_becomes_an_error() {
        let body = b"d14:failure reason11:bad requeste";
        let err = parse_announce_response(body).unwrap_err();
        assert!(matches!(err, TrackerError::Failure(msg) if msg == "bad request"));
    }

    #[test]
    fn skips_malformed_dict_peers_but_keeps_valid_ones() {
        let body = b"d8:intervali900e5:peersl\
d2:ip9:127.0.0.14:porti6881eed2:ip6:bad-ip4:porti1eeee";
        let response = parse_announce_response(body).unwrap();
        assert_eq!(response.peers.len(), 1);
    }
}
