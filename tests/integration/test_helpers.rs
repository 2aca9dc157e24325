// tests/integration/test_helpers.rs

//! Test helpers: in-memory companion channels, a fake key-value server speaking RESP,
//! and a scriptable companion process.
//!
//! **Note:** not every helper is used by every test crate that includes this file.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use spinelgate::companion::{
    ChannelReader, ChannelWriter, CompanionAddr, CompanionChannel, CompanionProcess,
    CompanionProvider,
};
use spinelgate::core::GateError;
use spinelgate::core::manager::{AttemptTimeouts, ConnectionManager, RetryPolicy};
use spinelgate::core::protocol::{RespFrame, RespFrameCodec};
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Decoder;
use tracing_subscriber::EnvFilter;

pub const TEST_ADDR_HOST: &str = "127.0.0.1";
pub const TEST_ADDR_PORT: u16 = 7878;
const DUPLEX_CAPACITY: usize = 64 * 1024;

/// Installs a quiet test subscriber. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_test_writer()
        .try_init();
}

pub fn test_addr() -> CompanionAddr {
    CompanionAddr {
        host: TEST_ADDR_HOST.to_string(),
        port: TEST_ADDR_PORT,
    }
}

// ===== Channels =====

/// How a `ScriptedChannel` answers `opened()`.
#[derive(Debug, Clone)]
pub enum OpenBehavior {
    Ready,
    Fail(String),
    /// Never signals readiness.
    Never,
}

/// A `CompanionChannel` over arbitrary reader/writer halves.
pub struct ScriptedChannel {
    open: OpenBehavior,
    halves: Option<(ChannelReader, ChannelWriter)>,
    closes: Arc<AtomicUsize>,
}

impl ScriptedChannel {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            open: OpenBehavior::Ready,
            halves: Some((Box::new(reader), Box::new(writer))),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            open: OpenBehavior::Fail(reason.to_string()),
            halves: None,
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn never_ready() -> Self {
        Self {
            open: OpenBehavior::Never,
            halves: None,
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counts calls to `close()`.
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        self.closes.clone()
    }
}

#[async_trait]
impl CompanionChannel for ScriptedChannel {
    async fn opened(&mut self) -> Result<(), GateError> {
        match &self.open {
            OpenBehavior::Ready => Ok(()),
            OpenBehavior::Fail(reason) => Err(GateError::Connectivity(reason.clone())),
            OpenBehavior::Never => futures::future::pending::<Result<(), GateError>>().await,
        }
    }

    fn take_halves(&mut self) -> Option<(ChannelReader, ChannelWriter)> {
        self.halves.take()
    }

    async fn close(&mut self) -> Result<(), GateError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.halves = None;
        Ok(())
    }
}

/// Returns a ready channel and the peer end of its in-memory pipe.
pub fn duplex_channel() -> (ScriptedChannel, DuplexStream) {
    let (local, peer) = tokio::io::duplex(DUPLEX_CAPACITY);
    let (reader, writer) = tokio::io::split(local);
    (ScriptedChannel::new(reader, writer), peer)
}

/// A writer whose every write fails, counting how often it was touched.
pub struct FailingWriter {
    pub calls: Arc<AtomicUsize>,
}

impl FailingWriter {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl AsyncWrite for FailingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

// ===== Fake key-value server =====

/// How the fake server answers `HELLO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelloReply {
    Map,
    UnknownCommand,
    Rejected,
}

/// How the fake server answers `PING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingReply {
    Simple,
    Bulk,
    Wrong,
}

#[derive(Debug, Clone, Copy)]
pub struct ServerBehavior {
    pub hello: HelloReply,
    pub ping: PingReply,
}

impl Default for ServerBehavior {
    fn default() -> Self {
        Self {
            hello: HelloReply::Map,
            ping: PingReply::Simple,
        }
    }
}

#[derive(Debug, Default)]
pub struct Store {
    values: HashMap<String, String>,
    ttls: HashMap<String, i64>,
}

pub type SharedStore = Arc<Mutex<Store>>;

/// Serves RESP commands on `stream` until the peer goes away.
pub async fn serve_kv(mut stream: DuplexStream, behavior: ServerBehavior, store: SharedStore) {
    let mut codec = RespFrameCodec;
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(frame)) => {
                    let reply = respond(&frame, behavior, &store);
                    if stream.write_all(&reply.encode_to_bytes()).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }
        match stream.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

fn respond(frame: &RespFrame, behavior: ServerBehavior, store: &SharedStore) -> RespFrame {
    let RespFrame::Array(items) = frame else {
        return RespFrame::Error("ERR expected array".into());
    };
    let parts: Vec<String> = items.iter().filter_map(|f| f.as_text()).collect();
    let Some((name, args)) = parts.split_first() else {
        return RespFrame::Error("ERR empty command".into());
    };
    let mut store = store.lock().unwrap();

    match name.to_ascii_uppercase().as_str() {
        "HELLO" => match behavior.hello {
            HelloReply::Map => RespFrame::Map(vec![
                (bulk("server"), bulk("fake")),
                (bulk("proto"), RespFrame::Integer(3)),
            ]),
            HelloReply::UnknownCommand => {
                RespFrame::Error("ERR unknown command 'HELLO', with args beginning with: '3'".into())
            }
            HelloReply::Rejected => RespFrame::Error("NOPROTO unsupported protocol version".into()),
        },
        "PING" => match behavior.ping {
            PingReply::Simple => RespFrame::SimpleString("PONG".into()),
            PingReply::Bulk => bulk("PONG"),
            PingReply::Wrong => RespFrame::SimpleString("PANG".into()),
        },
        "ECHO" => bulk(&args[0]),
        "GET" => match store.values.get(&args[0]) {
            Some(v) => bulk(v),
            None => RespFrame::Null,
        },
        "SET" => {
            store.values.insert(args[0].clone(), args[1].clone());
            store.ttls.remove(&args[0]);
            RespFrame::SimpleString("OK".into())
        }
        "DEL" => {
            let removed = args
                .iter()
                .filter(|k| store.values.remove(*k).is_some())
                .count();
            RespFrame::Integer(removed as i64)
        }
        "EXISTS" => RespFrame::Integer(store.values.contains_key(&args[0]) as i64),
        "INCR" => add(&mut store, &args[0], 1),
        "DECR" => add(&mut store, &args[0], -1),
        "INCRBY" => match args[1].parse::<i64>() {
            Ok(delta) => add(&mut store, &args[0], delta),
            Err(_) => not_an_integer(),
        },
        "EXPIRE" => {
            if store.values.contains_key(&args[0]) {
                let secs = args[1].parse().unwrap_or(0);
                store.ttls.insert(args[0].clone(), secs);
                RespFrame::Integer(1)
            } else {
                RespFrame::Integer(0)
            }
        }
        "TTL" => {
            if !store.values.contains_key(&args[0]) {
                RespFrame::Integer(-2)
            } else {
                RespFrame::Integer(store.ttls.get(&args[0]).copied().unwrap_or(-1))
            }
        }
        other => RespFrame::Error(format!("ERR unknown command '{}'", other.to_lowercase())),
    }
}

fn bulk(s: &str) -> RespFrame {
    RespFrame::BulkString(Bytes::from(s.to_string()))
}

fn not_an_integer() -> RespFrame {
    RespFrame::Error("ERR value is not an integer or out of range".into())
}

fn add(store: &mut Store, key: &str, delta: i64) -> RespFrame {
    let current = match store.values.get(key) {
        Some(v) => match v.parse::<i64>() {
            Ok(n) => n,
            Err(_) => return not_an_integer(),
        },
        None => 0,
    };
    let next = current + delta;
    store.values.insert(key.to_string(), next.to_string());
    RespFrame::Integer(next)
}

// ===== Companion process =====

/// A companion that hands out in-memory channels to a fake server.
pub struct MockCompanion {
    behavior: ServerBehavior,
    failures_left: AtomicU32,
    never_ready: bool,
    connect_delay: Duration,
    running: AtomicBool,
    pub connects: AtomicU32,
    pub starts: AtomicU32,
    store: SharedStore,
    servers: Mutex<Vec<JoinHandle<()>>>,
}

impl MockCompanion {
    pub fn new() -> Self {
        Self {
            behavior: ServerBehavior::default(),
            failures_left: AtomicU32::new(0),
            never_ready: false,
            connect_delay: Duration::ZERO,
            running: AtomicBool::new(true),
            connects: AtomicU32::new(0),
            starts: AtomicU32::new(0),
            store: SharedStore::default(),
            servers: Mutex::new(Vec::new()),
        }
    }

    /// The first `n` connects are refused.
    pub fn failing_first(self, n: u32) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Every channel handed out never becomes ready.
    pub fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn with_behavior(mut self, behavior: ServerBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn stopped(self) -> Self {
        self.running.store(false, Ordering::SeqCst);
        self
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    /// Drops the server side of every connection handed out so far.
    pub async fn kill_connections(&self) {
        let servers: Vec<JoinHandle<()>> = self.servers.lock().unwrap().drain(..).collect();
        for server in servers {
            server.abort();
            let _ = server.await;
        }
    }
}

#[async_trait]
impl CompanionProcess for MockCompanion {
    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn start(&self) -> Result<(), GateError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), GateError> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn connect(&self, _addr: &CompanionAddr) -> Result<Box<dyn CompanionChannel>, GateError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        let refused = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(GateError::Connectivity("connection refused".into()));
        }
        if self.never_ready {
            return Ok(Box::new(ScriptedChannel::never_ready()));
        }

        let (channel, peer) = duplex_channel();
        let server = tokio::spawn(serve_kv(peer, self.behavior, self.store.clone()));
        self.servers.lock().unwrap().push(server);
        Ok(Box::new(channel))
    }
}

/// Hands every shard the same companion and records the lookups.
pub struct MockProvider {
    pub companion: Arc<MockCompanion>,
    pub lookups: Mutex<Vec<(String, String)>>,
}

impl MockProvider {
    pub fn new(companion: Arc<MockCompanion>) -> Self {
        Self {
            companion,
            lookups: Mutex::new(Vec::new()),
        }
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.lock().unwrap().len()
    }
}

impl CompanionProvider for MockProvider {
    fn companion_for(&self, namespace: &str, shard_key: &str) -> Arc<dyn CompanionProcess> {
        self.lookups
            .lock()
            .unwrap()
            .push((namespace.to_string(), shard_key.to_string()));
        self.companion.clone()
    }
}

/// Short timeouts so failing tests fail fast.
pub fn test_timeouts() -> AttemptTimeouts {
    AttemptTimeouts {
        open: Duration::from_millis(300),
        handshake: Duration::from_millis(500),
    }
}

/// A manager for `companion` with `max_attempts` tries `delay` apart.
pub fn manager_for(
    companion: Arc<MockCompanion>,
    max_attempts: u32,
    delay: Duration,
) -> ConnectionManager {
    ConnectionManager::new(
        "kv/test",
        companion,
        test_addr(),
        RetryPolicy::new(max_attempts, delay),
        test_timeouts(),
    )
}
