//! Shared mock providers for integration tests.
//!
//! The relay is exercised against in-memory duplex streams: the test holds
//! one end and plays the remote peer, the relay drives the other end
//! through its normal background tasks.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use gridway_core::{
    HostResolver, MsgId, NetListener, NetworkProvider, NodeAddress, PayloadCodec, Providers,
    ResolveError, TimeError, TimeProvider, TokioTaskProvider,
};
use gridway_relay::{try_decode_frame, Command, PendingRequest, Reply, ReplyCallback};
use tokio::io::{AsyncReadExt, DuplexStream};

pub const DUPLEX_CAPACITY: usize = 64 * 1024;

/// A test address; the mock network ignores it.
pub fn test_addr(port: u16) -> NodeAddress {
    NodeAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

// ---- mock network ----

struct MockNetState {
    queued: VecDeque<io::Result<DuplexStream>>,
    connects: Vec<String>,
    fail_all: Option<io::ErrorKind>,
}

/// Network provider handing out pre-queued in-memory streams.
#[derive(Clone)]
pub struct MockNet {
    inner: Rc<RefCell<MockNetState>>,
}

impl MockNet {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(MockNetState {
                queued: VecDeque::new(),
                connects: Vec::new(),
                fail_all: None,
            })),
        }
    }

    /// Queue one stream for the next connect; returns the test's end.
    pub fn queue_stream(&self) -> DuplexStream {
        let (ours, theirs) = tokio::io::duplex(DUPLEX_CAPACITY);
        self.inner.borrow_mut().queued.push_back(Ok(theirs));
        ours
    }

    /// Make every connect fail with the given error kind.
    pub fn fail_all(&self, kind: io::ErrorKind) {
        self.inner.borrow_mut().fail_all = Some(kind);
    }

    /// Number of connect attempts observed.
    pub fn connect_count(&self) -> usize {
        self.inner.borrow().connects.len()
    }

    /// Addresses passed to connect, in order.
    pub fn connect_log(&self) -> Vec<String> {
        self.inner.borrow().connects.clone()
    }
}

pub struct MockListener;

#[async_trait(?Send)]
impl NetListener for MockListener {
    type Stream = DuplexStream;

    async fn accept(&self) -> io::Result<(Self::Stream, String)> {
        Err(io::Error::other("accept not supported in mock"))
    }

    fn local_addr(&self) -> io::Result<String> {
        Err(io::Error::other("local_addr not supported in mock"))
    }
}

#[async_trait(?Send)]
impl NetworkProvider for MockNet {
    type Stream = DuplexStream;
    type Listener = MockListener;

    async fn bind(&self, _addr: &str) -> io::Result<Self::Listener> {
        Err(io::Error::other("bind not supported in mock"))
    }

    async fn connect(&self, addr: &str) -> io::Result<Self::Stream> {
        let mut state = self.inner.borrow_mut();
        state.connects.push(addr.to_string());
        if let Some(kind) = state.fail_all {
            return Err(io::Error::new(kind, "mock connect failure"));
        }
        match state.queued.pop_front() {
            Some(result) => result,
            None => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "no stream queued",
            )),
        }
    }
}

// ---- mock time ----

/// Virtual clock: `sleep` advances it instantly, `timeout` never fires.
#[derive(Clone)]
pub struct MockTime {
    now: Rc<Cell<Duration>>,
}

impl MockTime {
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Duration::ZERO)),
        }
    }
}

#[async_trait(?Send)]
impl TimeProvider for MockTime {
    async fn sleep(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
        tokio::task::yield_now().await;
    }

    fn now(&self) -> Duration {
        self.now.get()
    }

    async fn timeout<F, T>(&self, _duration: Duration, future: F) -> Result<T, TimeError>
    where
        F: std::future::Future<Output = T>,
    {
        Ok(future.await)
    }
}

// ---- mock resolver ----

struct MockResolverState {
    answers: HashMap<String, Result<NodeAddress, ResolveError>>,
    calls: Vec<String>,
}

#[derive(Clone)]
pub struct MockResolver {
    inner: Rc<RefCell<MockResolverState>>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(MockResolverState {
                answers: HashMap::new(),
                calls: Vec::new(),
            })),
        }
    }

    pub fn set_ok(&self, name: &str, address: NodeAddress) {
        self.inner
            .borrow_mut()
            .answers
            .insert(name.to_string(), Ok(address));
    }

    pub fn set_fatal(&self, name: &str) {
        self.inner.borrow_mut().answers.insert(
            name.to_string(),
            Err(ResolveError::Fatal {
                name: name.to_string(),
            }),
        );
    }

    pub fn set_retryable(&self, name: &str) {
        self.inner.borrow_mut().answers.insert(
            name.to_string(),
            Err(ResolveError::Retryable {
                name: name.to_string(),
                detail: "resolver unavailable".to_string(),
            }),
        );
    }

    pub fn call_count(&self) -> usize {
        self.inner.borrow().calls.len()
    }

    pub fn call_log(&self) -> Vec<String> {
        self.inner.borrow().calls.clone()
    }
}

impl HostResolver for MockResolver {
    fn resolve(&self, name: &str, _default_port: u16) -> Result<NodeAddress, ResolveError> {
        let mut state = self.inner.borrow_mut();
        state.calls.push(name.to_string());
        match state.answers.get(name) {
            Some(answer) => answer.clone(),
            None => Err(ResolveError::Fatal {
                name: name.to_string(),
            }),
        }
    }
}

// ---- provider bundle ----

#[derive(Clone)]
pub struct TestProviders {
    pub net: MockNet,
    pub time: MockTime,
    pub task: TokioTaskProvider,
    pub resolver: MockResolver,
}

impl TestProviders {
    pub fn new() -> Self {
        Self {
            net: MockNet::new(),
            time: MockTime::new(),
            task: TokioTaskProvider,
            resolver: MockResolver::new(),
        }
    }
}

impl Providers for TestProviders {
    type Network = MockNet;
    type Time = MockTime;
    type Task = TokioTaskProvider;
    type Resolver = MockResolver;

    fn network(&self) -> &Self::Network {
        &self.net
    }

    fn time(&self) -> &Self::Time {
        &self.time
    }

    fn task(&self) -> &Self::Task {
        &self.task
    }

    fn resolver(&self) -> &Self::Resolver {
        &self.resolver
    }
}

// ---- helpers ----

/// Completion log shared between the test and its callbacks.
pub type CompletionLog = Rc<RefCell<Vec<PendingRequest>>>;

pub fn completion_log() -> CompletionLog {
    Rc::new(RefCell::new(Vec::new()))
}

/// A callback pushing the finished record into the log.
pub fn record_into(log: &CompletionLog) -> ReplyCallback {
    let log = log.clone();
    Box::new(move |task| log.borrow_mut().push(task))
}

/// Serialize a reply into a frame carrying `msg_id`.
pub fn reply_frame(msg_id: MsgId, reply: &Reply) -> Vec<u8> {
    let payload = gridway_core::JsonCodec.encode(reply).expect("encode reply");
    gridway_relay::encode_frame(msg_id, &payload).expect("frame reply")
}

/// Incremental frame parser over the test's end of a stream.
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Read the next complete frame.
    pub async fn next(&mut self, stream: &mut DuplexStream) -> (MsgId, Vec<u8>) {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some((msg_id, payload, consumed)) =
                try_decode_frame(&self.buf).expect("well-formed frame")
            {
                self.buf.drain(..consumed);
                return (msg_id, payload);
            }
            let n = stream.read(&mut chunk).await.expect("read frame");
            assert!(n > 0, "stream closed while awaiting a frame");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Read the next frame and decode its payload as a command.
    pub async fn next_command(&mut self, stream: &mut DuplexStream) -> (MsgId, Command) {
        let (msg_id, payload) = self.next(stream).await;
        let command: Command = serde_json::from_slice(&payload).expect("command payload");
        (msg_id, command)
    }
}

/// Yield until the condition holds; panics if it never does.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached after 10000 yields");
}
