// src/core/stream/adapter.rs

//! Implements `StreamAdapter`, which presents a split reader/writer channel as one
//! duplex connection with socket-like lifecycle semantics.
//!
//! Inbound chunks are delivered through a bounded event queue in arrival order. The
//! read loop stalls while the queue is full, which propagates backpressure to the
//! transport. A failed write latches the connection closed: from then on no write
//! reaches the transport again.

use super::link_state::{LinkState, ReadyState};
use crate::companion::{ChannelReader, ChannelWriter, CompanionChannel};
use crate::core::GateError;
use crate::core::metrics;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Maximum number of undelivered events before the read loop stops pulling from the transport.
const EVENT_QUEUE_DEPTH: usize = 32;
/// How long `destroy` waits for an in-flight write or open to release its half.
const WRITER_RELEASE_GRACE: Duration = Duration::from_secs(1);

/// Something that happened on the readable side of the connection.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    /// One chunk, exactly as the transport produced it.
    Data(Bytes),
    /// The peer closed its side. Sent once.
    End,
    /// The connection failed. Sent at most once.
    Error(GateError),
}

/// The receiving end of an adapter's event queue.
///
/// `next` returns `None` once the adapter has been destroyed and every queued
/// event has been drained.
#[derive(Debug)]
pub struct AdapterEvents {
    rx: mpsc::Receiver<AdapterEvent>,
}

impl AdapterEvents {
    pub async fn next(&mut self) -> Option<AdapterEvent> {
        self.rx.recv().await
    }
}

/// Recorded socket tuning requests. The channel has no socket to apply them to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketOptions {
    pub no_delay: bool,
    pub keep_alive: Option<Duration>,
    pub timeout: Option<Duration>,
}

/// State shared between the adapter handle and its read loop task.
struct Shared {
    id: Uuid,
    connected: AtomicBool,
    destroyed: AtomicBool,
    write_error_latched: AtomicBool,
    error_signaled: AtomicBool,
    end_signaled: AtomicBool,
    link: Mutex<LinkState>,
    /// Dropped on destroy so that readers observe the end of the queue.
    events: Mutex<Option<mpsc::Sender<AdapterEvent>>>,
}

impl Shared {
    fn sender(&self) -> Option<mpsc::Sender<AdapterEvent>> {
        self.events.lock().clone()
    }

    fn transition(&self, f: impl FnOnce(LinkState) -> LinkState) -> LinkState {
        let mut link = self.link.lock();
        *link = f(*link);
        *link
    }

    /// Queues an `Error` event without waiting, at most once per adapter.
    fn signal_error_now(&self, err: GateError) {
        if self.error_signaled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(tx) = self.sender()
            && tx.try_send(AdapterEvent::Error(err)).is_err()
        {
            debug!(adapter = %self.id, "Event queue full or closed; error event dropped");
        }
    }
}

/// A duplex connection over a split companion channel.
pub struct StreamAdapter {
    shared: Arc<Shared>,
    peer: String,
    open_started: AtomicBool,
    channel: AsyncMutex<Option<Box<dyn CompanionChannel>>>,
    writer: AsyncMutex<Option<ChannelWriter>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    options: Mutex<SocketOptions>,
}

impl StreamAdapter {
    /// Wraps `channel`. Nothing happens on the transport until `open` is called.
    pub fn new(channel: Box<dyn CompanionChannel>, peer: impl Into<String>) -> (Self, AdapterEvents) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            connected: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            write_error_latched: AtomicBool::new(false),
            error_signaled: AtomicBool::new(false),
            end_signaled: AtomicBool::new(false),
            link: Mutex::new(LinkState::Opening),
            events: Mutex::new(Some(tx)),
        });
        let adapter = Self {
            shared,
            peer: peer.into(),
            open_started: AtomicBool::new(false),
            channel: AsyncMutex::new(Some(channel)),
            writer: AsyncMutex::new(None),
            read_task: Mutex::new(None),
            options: Mutex::new(SocketOptions::default()),
        };
        (adapter, AdapterEvents { rx })
    }

    /// Waits for the channel's readiness signal, then takes its halves and starts
    /// the read loop. Succeeds at most once per adapter.
    pub async fn open(&self) -> Result<(), GateError> {
        if self.open_started.swap(true, Ordering::AcqRel) {
            return Err(GateError::InvalidState("adapter was already opened".into()));
        }
        if self.is_destroyed() {
            return Err(GateError::NotConnected);
        }

        let (reader, writer) = {
            let mut channel = self.channel.lock().await;
            let Some(channel) = channel.as_mut() else {
                return Err(GateError::NotConnected);
            };
            if let Err(e) = channel.opened().await {
                self.shared.signal_error_now(e.clone());
                return Err(e);
            }
            match channel.take_halves() {
                Some(halves) => halves,
                None => {
                    let e = GateError::Connectivity("channel opened without a reader/writer".into());
                    self.shared.signal_error_now(e.clone());
                    return Err(e);
                }
            }
        };

        let Some(events) = self.shared.sender() else {
            return Err(GateError::NotConnected);
        };
        if self.is_destroyed() {
            return Err(GateError::NotConnected);
        }

        *self.writer.lock().await = Some(writer);
        {
            let mut link = self.shared.link.lock();
            *link = link.on_opened()?;
        }
        self.shared.connected.store(true, Ordering::Release);

        let handle = tokio::spawn(read_loop(self.shared.clone(), reader, events));
        *self.read_task.lock() = Some(handle);
        // A destroy that raced the spawn above found no task to abort.
        if self.is_destroyed()
            && let Some(task) = self.read_task.lock().take()
        {
            task.abort();
        }

        debug!(adapter = %self.shared.id, peer = %self.peer, "Stream adapter connected");
        Ok(())
    }

    /// Writes `data` and resolves once the writer has flushed it.
    ///
    /// Fails with `NotConnected` without touching the transport if the adapter is
    /// destroyed, not yet open, finalized, or has latched a previous write failure.
    pub async fn write(&self, data: Bytes) -> Result<(), GateError> {
        if self.write_blocked() {
            return Err(GateError::NotConnected);
        }
        let mut guard = self.writer.lock().await;
        // Another write may have latched while this one was queued.
        if self.write_blocked() {
            return Err(GateError::NotConnected);
        }
        let Some(writer) = guard.as_mut() else {
            return Err(GateError::NotConnected);
        };

        let result = async {
            writer.write_all(&data).await?;
            writer.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                trace!(adapter = %self.shared.id, len = data.len(), "Write flushed");
                Ok(())
            }
            Err(e) => {
                self.shared.write_error_latched.store(true, Ordering::Release);
                self.shared.transition(LinkState::on_closed);
                metrics::WRITE_ERRORS_TOTAL.inc();
                warn!(adapter = %self.shared.id, peer = %self.peer, "Write failed, connection latched closed: {}", e);
                let err = GateError::write(e);
                self.shared.signal_error_now(err.clone());
                Err(err)
            }
        }
    }

    /// Closes the writable half. Reads keep flowing until the peer ends its side.
    pub async fn finalize_write(&self) -> Result<(), GateError> {
        if self.is_destroyed() {
            return Ok(());
        }
        let mut guard = self.writer.lock().await;
        if let Some(mut writer) = guard.take() {
            writer.shutdown().await?;
            self.shared.transition(LinkState::on_write_end);
        }
        Ok(())
    }

    /// Tears the connection down and returns `cause` back to the caller.
    ///
    /// Idempotent: only the first call has any effect. Failures while closing the
    /// halves are logged and swallowed.
    pub async fn destroy(&self, cause: Option<GateError>) -> Option<GateError> {
        if self.shared.destroyed.swap(true, Ordering::AcqRel) {
            return cause;
        }
        self.shared.connected.store(false, Ordering::Release);
        self.shared.transition(LinkState::on_closed);
        self.shared.events.lock().take();

        if let Some(task) = self.read_task.lock().take() {
            task.abort();
        }

        match tokio::time::timeout(WRITER_RELEASE_GRACE, self.writer.lock()).await {
            Ok(mut guard) => {
                if let Some(mut writer) = guard.take()
                    && let Err(e) = writer.shutdown().await
                {
                    debug!(adapter = %self.shared.id, "Ignoring writer close failure: {}", e);
                }
            }
            Err(_) => warn!(adapter = %self.shared.id, "Writer still busy; dropping it without shutdown"),
        }

        // A pending `open` holds the channel until its readiness signal resolves.
        match tokio::time::timeout(WRITER_RELEASE_GRACE, self.channel.lock()).await {
            Ok(mut guard) => {
                if let Some(mut channel) = guard.take()
                    && let Err(e) = channel.close().await
                {
                    warn!(adapter = %self.shared.id, "Ignoring channel close failure: {}", e);
                }
            }
            Err(_) => warn!(adapter = %self.shared.id, "Channel still opening; leaving it to the open call"),
        }

        match &cause {
            Some(e) => debug!(adapter = %self.shared.id, peer = %self.peer, "Stream adapter destroyed: {}", e),
            None => debug!(adapter = %self.shared.id, peer = %self.peer, "Stream adapter destroyed"),
        }
        cause
    }

    fn write_blocked(&self) -> bool {
        self.is_destroyed()
            || self.write_error_latched()
            || !self.shared.link.lock().can_write()
    }

    // --- Socket-compatible surface ---

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::Acquire)
    }

    pub fn write_error_latched(&self) -> bool {
        self.shared.write_error_latched.load(Ordering::Acquire)
    }

    /// True until the adapter opens, fails or is destroyed.
    pub fn connecting(&self) -> bool {
        self.ready_state() == ReadyState::Opening
    }

    pub fn ready_state(&self) -> ReadyState {
        if self.is_destroyed() || self.write_error_latched() || self.link_state() == LinkState::Closed {
            ReadyState::Closed
        } else if self.is_connected() {
            ReadyState::Open
        } else {
            ReadyState::Opening
        }
    }

    pub fn link_state(&self) -> LinkState {
        *self.shared.link.lock()
    }

    /// The address this adapter was opened towards.
    pub fn peer_addr(&self) -> &str {
        &self.peer
    }

    pub fn set_no_delay(&self, no_delay: bool) -> &Self {
        self.options.lock().no_delay = no_delay;
        self
    }

    pub fn set_keep_alive(&self, enable: bool, initial_delay: Duration) -> &Self {
        self.options.lock().keep_alive = enable.then_some(initial_delay);
        self
    }

    pub fn set_timeout(&self, timeout: Option<Duration>) -> &Self {
        self.options.lock().timeout = timeout;
        self
    }

    pub fn socket_options(&self) -> SocketOptions {
        *self.options.lock()
    }
}

impl Drop for StreamAdapter {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.lock().take() {
            task.abort();
        }
    }
}

/// Pulls chunks off the reader until end-of-stream, an error, or destruction.
async fn read_loop(shared: Arc<Shared>, reader: ChannelReader, events: mpsc::Sender<AdapterEvent>) {
    let mut chunks = ReaderStream::new(reader);

    while let Some(next) = chunks.next().await {
        if shared.destroyed.load(Ordering::Acquire) {
            return;
        }
        match next {
            Ok(chunk) => {
                trace!(adapter = %shared.id, len = chunk.len(), "Chunk received");
                if events.send(AdapterEvent::Data(chunk)).await.is_err() {
                    debug!(adapter = %shared.id, "Event receiver dropped; stopping read loop");
                    return;
                }
            }
            Err(e) => {
                if shared.destroyed.load(Ordering::Acquire) {
                    return;
                }
                // A failed read leaves the connection unusable in both directions.
                shared.connected.store(false, Ordering::Release);
                shared.transition(LinkState::on_closed);
                if !shared.error_signaled.swap(true, Ordering::AcqRel) {
                    warn!(adapter = %shared.id, "Read failed, connection closed: {}", e);
                    let _ = events.send(AdapterEvent::Error(e.into())).await;
                }
                // Readers see the end of the queue once the error is drained.
                shared.events.lock().take();
                return;
            }
        }
    }

    if shared.destroyed.load(Ordering::Acquire) {
        return;
    }
    shared.transition(LinkState::on_read_end);
    if !shared.end_signaled.swap(true, Ordering::AcqRel) {
        debug!(adapter = %shared.id, "Peer closed the readable side");
        let _ = events.send(AdapterEvent::End).await;
    }
}
