//! Admission and lifecycle of peer connections: a bounded candidate queue
//! feeding a fixed pool of dial workers, and an admission table guarding
//! against duplicate or over-budget connections.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::config::PeerManagerConfig;
use crate::event::ClientEvent;
use crate::peer_id::PeerId;

use super::handshake::Handshake;
use super::session::{self, PeerHandle};

/// An admitted peer, plus the task handles its session owns. Shutdown
/// awaits these so the admission table never outlives its sockets.
struct Slot {
    handle: Option<Arc<PeerHandle>>,
    tasks: Option<(JoinHandle<()>, JoinHandle<()>)>,
}

/// Admits, dials, and supervises peer connections for one torrent. Dropping
/// the last clone does not stop the manager; call [`PeerManager::stop`]
/// explicitly for a coordinated shutdown.
#[derive(Clone)]
pub struct PeerManager {
    inner: Arc<Inner>,
}

struct Inner {
    info_hash: [u8; 20],
    our_peer_id: PeerId,
    piece_count: usize,
    config: PeerManagerConfig,
    events: mpsc::Sender<ClientEvent>,
    admitted: Mutex<HashMap<SocketAddr, Slot>>,
    candidate_tx: mpsc::Sender<SocketAddr>,
    candidate_rx: Mutex<mpsc::Receiver<SocketAddr>>,
    stop: Notify,
    stopped: AtomicBool,
    dial_worker_handles: StdMutex<Vec<JoinHandle<()>>>,
}

impl PeerManager {
    /// Builds the manager and spawns its fixed pool of dial workers.
    pub fn spawn(
        info_hash: [u8; 20],
        our_peer_id: PeerId,
        piece_count: usize,
        config: PeerManagerConfig,
        events: mpsc::Sender<ClientEvent>,
    ) -> Self {
        let (candidate_tx, candidate_rx) = mpsc::channel(config.candidate_queue_capacity);
        let inner = Arc::new(Inner {
            info_hash,
            our_peer_id,
            piece_count,
            config: config.clone(),
            events,
            admitted: Mutex::new(HashMap::new()),
            candidate_tx,
            candidate_rx: Mutex::new(candidate_rx),
            stop: Notify::new(),
            stopped: AtomicBool::new(false),
            dial_worker_handles: StdMutex::new(Vec::new()),
        });

        let handles: Vec<JoinHandle<()>> = (0..config.dial_workers)
            .map(|worker_id| tokio::spawn(dial_worker(worker_id, Arc::clone(&inner))))
            .collect();
        *inner
            .dial_worker_handles
            .lock()
            .expect("dial worker handle list poisoned") = handles;

        Self { inner }
    }

    /// Offers a dial candidate. Dropped silently if the queue is full or
    /// the address is already admitted -- candidates are opportunistic, not
    /// guaranteed delivery.
    pub fn submit_candidate(&self, addr: SocketAddr) -> bool {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return false;
        }
        self.inner.candidate_tx.try_send(addr).is_ok()
    }

    pub async fn admitted_count(&self) -> usize {
        self.inner.admitted.lock().await.len()
    }

    /// Closes the candidate queue, waits for every dial worker to drain its
    /// current attempt, then signals stop on every admitted session. Closing
    /// the queue first means a worker blocked on `rx.recv()` wakes on the
    /// close rather than depending on `stop.notify_waiters()` having caught
    /// it mid-wait; waiting for workers before draining `admitted` means a
    /// worker that just finished a handshake has already inserted its
    /// session (or backed it out) before we decide which sessions to stop.
    #[instrument(level = "debug", skip(self))]
    pub async fn stop(&self) {
        if self.inner.stopped.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return;
        }
        self.inner.candidate_rx.lock().await.close();
        self.inner.stop.notify_waiters();

        let handles = {
            let mut guard = self
                .inner
                .dial_worker_handles
                .lock()
                .expect("dial worker handle list poisoned");
            std::mem::take(&mut *guard)
        };
        for (worker_id, handle) in handles.into_iter().enumerate() {
            if handle.await.is_err() {
                warn!(worker_id, "dial worker task panicked during shutdown");
            }
        }

        let mut slots = self.inner.admitted.lock().await;
        for (addr, slot) in slots.drain() {
            if let Some(handle) = &slot.handle {
                handle.stop();
            }
            if let Some((reader, writer)) = slot.tasks {
                if reader.await.is_err() {
                    warn!(%addr, "peer reader task panicked during shutdown");
                }
                if writer.await.is_err() {
                    warn!(%addr, "peer writer task panicked during shutdown");
                }
            }
        }
    }
}

async fn dial_worker(worker_id: usize, inner: Arc<Inner>) {
    loop {
        let candidate = {
            let mut rx = inner.candidate_rx.lock().await;
            tokio::select! {
                biased;
                _ = inner.stop.notified() => return,
                item = rx.recv() => item,
            }
        };
        let Some(addr) = candidate else { return };
        handle_candidate(worker_id, &inner, addr).await;
    }
}

#[instrument(level = "debug", skip(inner), fields(worker_id))]
async fn handle_candidate(worker_id: usize, inner: &Arc<Inner>, addr: SocketAddr) {
    if !reserve(inner, addr).await {
        return;
    }

    match dial_and_handshake(inner, addr).await {
        Ok(stream) => {
            let (handle, reader, writer) = session::spawn(
                stream,
                addr,
                inner.piece_count,
                inner.config.clone(),
                inner.events.clone(),
            );
            let mut slots = inner.admitted.lock().await;
            if let Some(slot) = slots.get_mut(&addr) {
                slot.handle = Some(handle);
                slot.tasks = Some((reader, writer));
            }
        }
        Err(err) => {
            debug!(%addr, %err, "dial or handshake failed");
            inner.admitted.lock().await.remove(&addr);
        }
    }
}

/// Check-then-insert under a single lock: admits `addr` as a reserved,
/// not-yet-connected slot unless it is already present or the table is at
/// capacity.
async fn reserve(inner: &Arc<Inner>, addr: SocketAddr) -> bool {
    let mut slots = inner.admitted.lock().await;
    if slots.contains_key(&addr) {
        return false;
    }
    if slots.len() >= inner.config.max_peers {
        return false;
    }
    slots.insert(addr, Slot { handle: None, tasks: None });
    true
}

async fn dial_and_handshake(inner: &Arc<Inner>, addr: SocketAddr) -> anyhow::Result<TcpStream> {
    let mut stream = timeout(inner.config.handshake_timeout, TcpStream::connect(addr)).await??;
    Handshake::perform(
        &mut stream,
        inner.info_hash,
        *inner.our_peer_id.as_bytes(),
        inner.config.handshake_timeout,
    )
    .await?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer_id::PeerId;
    use tokio::net::TcpListener;

    fn test_config() -> PeerManagerConfig {
        PeerManagerConfig {
            max_peers: 2,
            dial_workers: 2,
            candidate_queue_capacity: 4,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn duplicate_candidates_are_admitted_at_most_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (events_tx, _events_rx) = mpsc::channel(16);
        let manager = PeerManager::spawn(
            [1u8; 20],
            PeerId::generate(),
            0,
            test_config(),
            events_tx,
        );

        assert!(manager.submit_candidate(addr));
        assert!(manager.submit_candidate(addr));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(manager.admitted_count().await <= 1);
        manager.stop().await;
    }
}
