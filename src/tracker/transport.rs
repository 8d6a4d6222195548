//! Closed-set transport dispatch: a tagged enum rather than a trait object,
//! since the only two transports BEP-3/BEP-15 define are known at compile
//! time.
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use url::Url;

use super::http::HttpTracker;
use super::udp::UdpTracker;
use super::{AnnounceRequest, AnnounceResponse, ScrapeEntry, TrackerError, TrackerResult};

pub enum TrackerTransport {
    Http(HttpTracker),
    Udp(UdpTracker),
}

impl TrackerTransport {
    /// Builds the right transport for an announce URL's scheme.
    pub fn from_url(url: &str) -> TrackerResult<Self> {
        let parsed = Url::parse(url)?;
        match parsed.scheme() {
            "http" | "https" => Ok(TrackerTransport::Http(HttpTracker::new(parsed))),
            "udp" => {
                let host = parsed.host_str().ok_or(TrackerError::MalformedField("host"))?;
                let port = parsed.port().ok_or(TrackerError::MalformedField("port"))?;
                let addr: SocketAddr = (host, port)
                    .to_socket_addrs()?
                    .next()
                    .ok_or(TrackerError::MalformedField("host"))?;
                Ok(TrackerTransport::Udp(UdpTracker::new(url.to_string(), addr)))
            }
            other => Err(TrackerError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            TrackerTransport::Http(t) => t.url(),
            TrackerTransport::Udp(t) => t.url(),
        }
    }

    pub fn supports_scrape(&self) -> bool {
        match self {
            TrackerTransport::Http(t) => t.supports_scrape(),
            TrackerTransport::Udp(t) => t.supports_scrape(),
        }
    }

    pub async fn announce(
        &self,
        request: &AnnounceRequest,
        deadline: Duration,
    ) -> TrackerResult<AnnounceResponse> {
        match self {
            TrackerTransport::Http(t) => t.announce(request, deadline).await,
            TrackerTransport::Udp(t) => t.announce(request, deadline).await,
        }
    }

    pub async fn scrape(
        &self,
        info_hashes: &[[u8; 20]],
        deadline: Duration,
    ) -> TrackerResult<Vec<([u8; 20], ScrapeEntry)>> {
        match self {
            TrackerTransport::Http(t) => t.scrape(info_hashes, deadline).await,
            TrackerTransport::Udp(t) => t.scrape(info_hashes, deadline).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_scheme_builds_http_transport() {
        let transport = TrackerTransport::from_url("http://tracker.example/announce").unwrap();
        assert!(matches!(transport, TrackerTransport::Http(_)));
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(TrackerTransport::from_url("ftp://tracker.example/announce").is_err());
    }
}
