//! Host-facing API: open a parsed torrent, start its tracker and peer
//! managers, and observe progress through an event channel.
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::config::ClientConfig;
use crate::event::{ClientEvent, EVENT_CHANNEL_CAPACITY};
use crate::peer::manager::PeerManager;
use crate::peer_id::PeerId;
use crate::torrent::Metainfo;
use crate::tracker::manager::{PeerSink, TrackerManager, TransferStats};

/// A torrent, constructed but not yet driving any I/O until [`TorrentHandle::start`]
/// is called.
pub struct TorrentHandle {
    metainfo: Metainfo,
    config: ClientConfig,
    peer_id: PeerId,
    stats: Arc<TransferStats>,
    events_tx: mpsc::Sender<ClientEvent>,
    events_rx: Option<mpsc::Receiver<ClientEvent>>,
    running: Option<Running>,
}

struct Running {
    tracker_manager: TrackerManager,
    peer_manager: PeerManager,
}

/// Parses `.torrent` bytes and constructs a [`TorrentHandle`] without
/// starting any tracker or peer activity.
#[instrument(skip(torrent_bytes, config), level = "info")]
pub fn open_torrent(torrent_bytes: &[u8], config: ClientConfig) -> anyhow::Result<TorrentHandle> {
    let metainfo = crate::torrent::metainfo::parse(torrent_bytes)?;
    Ok(open_metainfo(metainfo, config))
}

/// Same as [`open_torrent`] but for an already-parsed [`Metainfo`].
pub fn open_metainfo(metainfo: Metainfo, config: ClientConfig) -> TorrentHandle {
    let peer_id = PeerId::generate();
    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let stats = Arc::new(TransferStats::default());
    stats
        .left
        .store(metainfo.total_size().max(0) as u64, Ordering::SeqCst);

    TorrentHandle {
        metainfo,
        config,
        peer_id,
        stats,
        events_tx,
        events_rx: Some(events_rx),
        running: None,
    }
}

impl TorrentHandle {
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Begins the tracker announce loops and the peer manager's dial
    /// workers. Idempotent beyond the first call, which returns the join
    /// handle of the internal candidate-forwarding task; later calls return
    /// a handle to an already-finished no-op task.
    #[instrument(skip(self), level = "info")]
    pub fn start(&mut self) -> JoinHandle<()> {
        if let Some(running) = &self.running {
            let peer_manager = running.peer_manager.clone();
            return tokio::spawn(async move {
                let _ = peer_manager;
            });
        }

        let (peer_sink, mut peer_candidates): (PeerSink, _) = mpsc::channel(64);

        let tracker_manager = TrackerManager::spawn(
            self.metainfo.announce_urls.clone(),
            *self.metainfo.info.hash.as_bytes(),
            *self.peer_id.as_bytes(),
            self.config.listen_port,
            Arc::clone(&self.stats),
            self.config.tracker.clone(),
            peer_sink,
            self.events_tx.clone(),
        );

        let peer_manager = PeerManager::spawn(
            *self.metainfo.info.hash.as_bytes(),
            self.peer_id,
            self.metainfo.info.num_pieces(),
            self.config.peer.clone(),
            self.events_tx.clone(),
        );

        let forwarder_manager = peer_manager.clone();
        let forward_task = tokio::spawn(async move {
            while let Some(peers) = peer_candidates.recv().await {
                for addr in peers {
                    forwarder_manager.submit_candidate(addr);
                }
            }
        });

        self.running = Some(Running {
            tracker_manager,
            peer_manager,
        });

        forward_task
    }

    /// Takes ownership of the event receiver. Only the first caller gets
    /// `Some`; subsequent calls get `None`.
    pub fn events(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.events_rx.take()
    }

    /// Updates transfer stats the tracker manager reports on the next
    /// announce.
    pub fn update_stats(&self, uploaded: u64, downloaded: u64, left: u64) {
        self.stats.uploaded.store(uploaded, Ordering::SeqCst);
        self.stats.downloaded.store(downloaded, Ordering::SeqCst);
        self.stats.left.store(left, Ordering::SeqCst);
    }

    pub async fn peer_count(&self) -> usize {
        match &self.running {
            Some(running) => running.peer_manager.admitted_count().await,
            None => 0,
        }
    }

    /// Coordinated, idempotent shutdown: stops tracker loops (each makes a
    /// best-effort `stopped` announce) and the peer manager (stops every
    /// session and waits for its tasks). A no-op if [`TorrentHandle::start`]
    /// was never called.
    #[instrument(skip(self), level = "info")]
    pub async fn stop(&self) {
        if let Some(running) = &self.running {
            running.tracker_manager.stop();
            running.peer_manager.stop().await;
        }
    }
}
