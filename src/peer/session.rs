//! A single peer connection: two tasks sharing one socket. The reader owns
//! the read half and is the only party that reads; the writer owns the
//! write half, multiplexes outbound frames from a mailbox, and is the only
//! party that writes. A single stop flag closes both down.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::bitfield::Bitfield;
use crate::config::PeerManagerConfig;
use crate::event::{self, ClientEvent};

use super::message::Message;

/// Observable, shared state of one peer session. Owned by the admission
/// table; the manager only ever signals `stop` on this handle and reads its
/// flags -- it never touches the socket, which belongs exclusively to the
/// reader/writer tasks spawned alongside it.
pub struct PeerHandle {
    pub remote_addr: SocketAddr,
    pub am_choking: AtomicBool,
    pub am_interested: AtomicBool,
    pub peer_choking: AtomicBool,
    pub peer_interested: AtomicBool,
    pub remote_bitfield: Mutex<Bitfield>,
    mailbox_tx: mpsc::Sender<Message>,
    stopped: AtomicBool,
    stop_notify: Notify,
}

impl PeerHandle {
    /// Idempotent. Closing the mailbox and notifying wakes both tasks out
    /// of whatever they are selecting on.
    pub fn stop(&self) {
        if self.stopped.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            self.stop_notify.notify_waiters();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Enqueues an outbound frame. Returns `false` if the mailbox is full or
    /// the session already stopped -- callers should treat this as a
    /// best-effort send, not escalate it.
    pub fn try_send(&self, message: Message) -> bool {
        self.mailbox_tx.try_send(message).is_ok()
    }

    pub fn set_am_interested(&self, value: bool) {
        self.am_interested.store(value, Ordering::SeqCst);
    }
}

/// Spawns the reader and writer tasks for a freshly handshaken connection
/// and returns the shared handle the peer manager's admission table keeps.
#[instrument(level = "debug", skip(socket, config, events))]
pub fn spawn(
    socket: TcpStream,
    remote_addr: SocketAddr,
    piece_count: usize,
    config: PeerManagerConfig,
    events: mpsc::Sender<ClientEvent>,
) -> (Arc<PeerHandle>, JoinHandle<()>, JoinHandle<()>) {
    let (mailbox_tx, mailbox_rx) = mpsc::channel(config.mailbox_capacity);
    let handle = Arc::new(PeerHandle {
        remote_addr,
        am_choking: AtomicBool::new(true),
        am_interested: AtomicBool::new(false),
        peer_choking: AtomicBool::new(true),
        peer_interested: AtomicBool::new(false),
        remote_bitfield: Mutex::new(Bitfield::new(piece_count)),
        mailbox_tx,
        stopped: AtomicBool::new(false),
        stop_notify: Notify::new(),
    });

    let (read_half, write_half) = socket.into_split();

    event::emit(&events, ClientEvent::PeerStarted { addr: remote_addr });

    let reader = tokio::spawn(reader_loop(
        read_half,
        Arc::clone(&handle),
        config.clone(),
        events.clone(),
    ));
    let writer = tokio::spawn(writer_loop(write_half, Arc::clone(&handle), mailbox_rx, config));

    (handle, reader, writer)
}

async fn reader_loop(
    mut read_half: OwnedReadHalf,
    handle: Arc<PeerHandle>,
    config: PeerManagerConfig,
    events: mpsc::Sender<ClientEvent>,
) {
    loop {
        let read = timeout(config.read_timeout, Message::read(&mut read_half));
        tokio::select! {
            biased;
            _ = handle.stop_notify.notified() => break,
            outcome = read => {
                match outcome {
                    Ok(Ok(message)) => {
                        if !handle_message(&handle, &message, &events) {
                            break;
                        }
                    }
                    Ok(Err(err)) => {
                        debug!(addr = %handle.remote_addr, %err, "peer read error, closing session");
                        break;
                    }
                    Err(_) => {
                        debug!(addr = %handle.remote_addr, "peer read timed out, closing session");
                        break;
                    }
                }
            }
        }
    }
    finish(&handle, &events).await;
}

/// Applies a received frame's effect on session state and forwards it to
/// the host event stream. Returns `false` if the session should close.
fn handle_message(
    handle: &PeerHandle,
    message: &Message,
    events: &mpsc::Sender<ClientEvent>,
) -> bool {
    match message {
        Message::KeepAlive => {}
        Message::Choke => handle.peer_choking.store(true, Ordering::SeqCst),
        Message::Unchoke => handle.peer_choking.store(false, Ordering::SeqCst),
        Message::Interested => handle.peer_interested.store(true, Ordering::SeqCst),
        Message::NotInterested => handle.peer_interested.store(false, Ordering::SeqCst),
        Message::Have { piece_index } => {
            if let Ok(mut bitfield) = handle.remote_bitfield.try_lock() {
                bitfield.set(*piece_index as usize);
            }
        }
        Message::Bitfield(bits) => {
            if let Ok(mut bitfield) = handle.remote_bitfield.try_lock() {
                let len = bitfield.len();
                *bitfield = Bitfield::from_bytes(bits, len);
            }
        }
        // Piece selection and on-disk assembly are out of scope for this
        // core; parsing and dispatching the frame without blocking the
        // reader is all that is required here.
        Message::Request { .. } | Message::Piece { .. } | Message::Cancel { .. } => {}
        Message::Unknown { id } => {
            warn!(addr = %handle.remote_addr, id, "discarding frame with unknown message id");
        }
    }

    event::emit(
        events,
        ClientEvent::PeerMessage {
            addr: handle.remote_addr,
            kind: message.kind_name(),
        },
    );
    true
}

async fn writer_loop(
    mut write_half: OwnedWriteHalf,
    handle: Arc<PeerHandle>,
    mut mailbox_rx: mpsc::Receiver<Message>,
    config: PeerManagerConfig,
) {
    loop {
        tokio::select! {
            biased;
            _ = handle.stop_notify.notified() => break,
            outgoing = mailbox_rx.recv() => {
                match outgoing {
                    Some(message) => {
                        if write_one(&mut write_half, &message, config.write_timeout).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::time::sleep(config.keep_alive) => {
                if write_one(&mut write_half, &Message::KeepAlive, config.write_timeout).await.is_err() {
                    break;
                }
            }
        }
    }
    handle.stop();
    let _ = write_half.shutdown().await;
}

async fn write_one(
    write_half: &mut OwnedWriteHalf,
    message: &Message,
    write_timeout: Duration,
) -> super::PeerResult<()> {
    match timeout(write_timeout, message.write(write_half)).await {
        Ok(result) => result,
        Err(_) => Err(super::PeerError::Timeout),
    }
}

async fn finish(handle: &PeerHandle, events: &mpsc::Sender<ClientEvent>) {
    handle.stop();
    event::emit(
        events,
        ClientEvent::PeerStopped {
            addr: handle.remote_addr,
        },
    );
}
