//! The relay: request dispatch and reply correlation.
//!
//! [`Relay`] owns the task registry, the peer table, and the open
//! single-request connections, all behind `RefCell` for the
//! single-threaded runtime. Every mutation of shared state happens in a
//! synchronous section with no suspension inside the borrow; background
//! tasks (stream drivers, reply readers, retry timers) re-enter through
//! the event entry points.
//!
//! Dispatch paths:
//! - **local** — the command goes to the registered [`LocalDispatcher`];
//!   completion arrives through [`Relay::complete_local`] on the same
//!   registry path as remote replies.
//! - **stream** — agents are reached over their persistent multiplexed
//!   stream; the reply is correlated by reserved msg id.
//! - **socket** — servers are reached over a dedicated connection per
//!   request; the reply is correlated by connection handle.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use gridway_core::{
    ConnId, JobId, MsgId, NetworkProvider, NodeAddress, PayloadCodec, Providers, TaskProvider,
    TimeProvider,
};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::command::{Command, CommandKind};
use crate::config::RelayConfig;
use crate::driver;
use crate::encode::EncoderTable;
use crate::error::RelayError;
use crate::peer::{PeerId, PeerKind, PeerTable};
use crate::registry::{Destination, PendingRequest, ReplyCallback, TaskHandle, TaskRegistry};
use crate::reply::{FailReason, Reply};
use crate::retry::FailoverConfig;
use crate::wire;

/// The stream type produced by a provider bundle's network provider.
pub(crate) type NetStream<P> = <<P as Providers>::Network as NetworkProvider>::Stream;

/// Where to issue a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// This node; handled by the local dispatcher.
    Local,
    /// An open single-request connection (see [`Relay::connect_server`]).
    Conn(ConnId),
    /// An agent peer with a live stream (see [`Relay::connect_agent`]).
    Peer(PeerId),
}

/// An immediately rejected issue attempt.
///
/// Ownership of the command and the callback reverts to the caller; the
/// request was never tracked.
pub struct IssueRejected {
    /// Why the request was not posted.
    pub error: RelayError,
    /// The caller's command, returned unchanged.
    pub command: Command,
    /// The caller's callback, never invoked.
    pub callback: ReplyCallback,
}

impl std::fmt::Debug for IssueRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssueRejected")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Executor for commands issued to this node itself.
///
/// Dispatch is asynchronous: the implementation runs the command however it
/// likes and finishes the tracking record via [`Relay::complete_local`].
pub trait LocalDispatcher {
    /// Handle a locally issued command.
    fn dispatch(&self, handle: TaskHandle, command: &Command);
}

struct ConnEntry<S> {
    write: Option<tokio::io::WriteHalf<S>>,
    read: Option<tokio::io::ReadHalf<S>>,
}

/// The inter-node request/reply relay.
pub struct Relay<P: Providers, C: PayloadCodec> {
    providers: P,
    codec: C,
    config: RelayConfig,
    encoders: EncoderTable<C>,
    registry: RefCell<TaskRegistry>,
    peers: RefCell<PeerTable>,
    conns: RefCell<HashMap<ConnId, ConnEntry<NetStream<P>>>>,
    next_conn: Cell<u64>,
    local: RefCell<Option<Rc<dyn LocalDispatcher>>>,
    failover: RefCell<Option<FailoverConfig>>,
    orphan_replies: Cell<u64>,
}

impl<P: Providers> Relay<P, gridway_core::JsonCodec> {
    /// Create a relay with the JSON codec, the standard encoder table, and
    /// default configuration.
    pub fn with_defaults(providers: P) -> Rc<Self> {
        Self::new(
            providers,
            gridway_core::JsonCodec,
            RelayConfig::default(),
            EncoderTable::standard(),
        )
    }
}

impl<P: Providers, C: PayloadCodec> Relay<P, C> {
    /// Create a relay with explicit codec, configuration, and encoder
    /// table.
    pub fn new(providers: P, codec: C, config: RelayConfig, encoders: EncoderTable<C>) -> Rc<Self> {
        Rc::new(Self {
            providers,
            codec,
            config,
            encoders,
            registry: RefCell::new(TaskRegistry::new()),
            peers: RefCell::new(PeerTable::new()),
            conns: RefCell::new(HashMap::new()),
            next_conn: Cell::new(1),
            local: RefCell::new(None),
            failover: RefCell::new(None),
            orphan_replies: Cell::new(0),
        })
    }

    /// Register the executor for commands issued to this node.
    pub fn set_local_dispatcher(&self, dispatcher: Rc<dyn LocalDispatcher>) {
        *self.local.borrow_mut() = Some(dispatcher);
    }

    /// Install the failover redirect policy.
    pub fn set_failover(&self, config: FailoverConfig) {
        *self.failover.borrow_mut() = Some(config);
    }

    /// Relay configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub(crate) fn providers(&self) -> &P {
        &self.providers
    }

    pub(crate) fn redirect_host(&self, host: &str) -> String {
        match self.failover.borrow().as_ref() {
            Some(f) => f.redirect(host).to_string(),
            None => host.to_string(),
        }
    }

    // ---- peers ----

    /// Find or create a peer entry.
    pub fn add_peer(&self, name: &str, address: NodeAddress, kind: PeerKind) -> PeerId {
        self.peers.borrow_mut().intern(name, address, kind)
    }

    /// Look up a peer by name.
    pub fn lookup_peer(&self, name: &str) -> Option<PeerId> {
        self.peers.borrow().lookup(name)
    }

    /// Whether a peer currently has a live stream.
    pub fn stream_live(&self, peer: PeerId) -> bool {
        self.peers
            .borrow()
            .get(peer)
            .map(|p| p.stream_live())
            .unwrap_or(false)
    }

    /// Reserve a msg id on a peer's live stream for externally written
    /// traffic; pair with [`Relay::track_deferred`].
    pub fn reserve_msg_id(&self, peer: PeerId) -> Result<MsgId, RelayError> {
        let mut peers = self.peers.borrow_mut();
        let p = peers.get_mut(peer).ok_or(RelayError::UnknownPeer {
            name: peer.to_string(),
        })?;
        p.reserve_msg_id()
    }

    /// Ensure the agent peer has a live stream, connecting if necessary.
    ///
    /// Returns the epoch of the live stream.
    ///
    /// # Errors
    ///
    /// Returns `ConnectFailed` (classified retryable/fatal) when the
    /// connection cannot be established, `NoRelay` for a peer that does
    /// not speak the multiplexed protocol.
    pub async fn connect_agent(self: &Rc<Self>, peer: PeerId) -> Result<u64, RelayError> {
        let address = {
            let peers = self.peers.borrow();
            let p = peers.get(peer).ok_or(RelayError::UnknownPeer {
                name: peer.to_string(),
            })?;
            if !p.supports_stream() {
                return Err(RelayError::NoRelay);
            }
            if let Some(epoch) = p.stream_epoch() {
                return Ok(epoch);
            }
            p.address.clone()
        };

        let stream = self.open_stream(&address).await?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (sd_tx, sd_rx) = mpsc::unbounded_channel();
        let epoch = {
            let mut peers = self.peers.borrow_mut();
            match peers.get_mut(peer) {
                Some(p) => p.attach_stream(out_tx, sd_tx),
                None => return Err(RelayError::NoRelay),
            }
        };

        tracing::debug!(peer = %peer, epoch, "agent stream attached");
        let _ = self.providers.task().spawn(
            "stream_task",
            driver::stream_task(Rc::downgrade(self), peer, epoch, stream, out_rx, sd_rx),
        );
        Ok(epoch)
    }

    /// Deliberately drop a peer's live stream.
    ///
    /// Pending requests on it resolve through the purge path when the
    /// driver observes the closure.
    pub fn disconnect_agent(&self, peer: PeerId) {
        let mut peers = self.peers.borrow_mut();
        if let Some(p) = peers.get_mut(peer) {
            if let Some(epoch) = p.stream_epoch() {
                p.detach_stream(epoch);
            }
        }
    }

    // ---- single-request connections ----

    /// Open a dedicated connection for one request/reply exchange.
    pub async fn connect_server(self: &Rc<Self>, address: &NodeAddress) -> Result<ConnId, RelayError> {
        let stream = self.open_stream(address).await?;
        let (read, write) = tokio::io::split(stream);

        let id = ConnId(self.next_conn.get());
        self.next_conn.set(id.0 + 1);
        self.conns.borrow_mut().insert(
            id,
            ConnEntry {
                write: Some(write),
                read: Some(read),
            },
        );
        tracing::debug!(conn = %id, %address, "connection opened");
        Ok(id)
    }

    /// Close a single-request connection.
    ///
    /// Callers own teardown of connections they opened; the standard
    /// [`Relay::discard_reply`] callback does this for internally
    /// generated requests.
    pub fn close_conn(&self, conn: ConnId) {
        if self.conns.borrow_mut().remove(&conn).is_some() {
            tracing::debug!(conn = %conn, "connection closed");
        }
    }

    async fn open_stream(&self, address: &NodeAddress) -> Result<NetStream<P>, RelayError> {
        match self
            .providers
            .time()
            .timeout(
                self.config.connect_timeout,
                self.providers.network().connect(&address.to_string()),
            )
            .await
        {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(RelayError::from_connect_error(e)),
            Err(_) => Err(RelayError::ConnectFailed {
                detail: "connect timed out".to_string(),
                retryable: true,
            }),
        }
    }

    // ---- dispatch ----

    /// Issue a command and track it until completion.
    ///
    /// On success the returned handle identifies the tracking record; the
    /// callback fires exactly once when the request completes, whether by
    /// reply, purge, or failure. On immediate failure nothing is tracked
    /// and ownership of the command and callback reverts to the caller in
    /// the [`IssueRejected`].
    ///
    /// `job` links the record to a job so [`Relay::cancel_job`] can reach
    /// it.
    pub async fn issue(
        self: &Rc<Self>,
        target: Target,
        command: Command,
        job: Option<JobId>,
        callback: ReplyCallback,
    ) -> Result<TaskHandle, IssueRejected> {
        match target {
            Target::Local => Ok(self.issue_local(command, job, callback)),
            Target::Peer(peer) => self.issue_stream(peer, command, job, callback),
            Target::Conn(conn) => self.issue_socket(conn, command, job, callback).await,
        }
    }

    fn issue_local(
        self: &Rc<Self>,
        command: Command,
        job: Option<JobId>,
        callback: ReplyCallback,
    ) -> TaskHandle {
        let kind = command.kind;
        let dispatch_copy = command.clone();
        let handle = {
            let mut registry = self.registry.borrow_mut();
            let handle = registry.create(kind, Destination::Local, Some(command), job, callback);
            registry.set_awaiting(handle);
            handle
        };

        let dispatcher = self.local.borrow().clone();
        match dispatcher {
            Some(d) => {
                tracing::debug!(task = %handle, ?kind, "dispatching locally");
                d.dispatch(handle, &dispatch_copy);
            }
            None => {
                tracing::error!(?kind, "no local dispatcher registered");
                self.finish(handle, Reply::synthesized(FailReason::Rejected.reply_code()),
                    Some(FailReason::Rejected));
            }
        }
        handle
    }

    fn issue_stream(
        self: &Rc<Self>,
        peer: PeerId,
        command: Command,
        job: Option<JobId>,
        callback: ReplyCallback,
    ) -> Result<TaskHandle, IssueRejected> {
        let kind = command.kind;

        let payload = match self.encode_command(&command) {
            Ok(p) => p,
            Err(error) => {
                return Err(IssueRejected {
                    error,
                    command,
                    callback,
                })
            }
        };

        // Reserve the id before any bytes exist for this command; the
        // reply correlates by nothing else.
        let msg_id = {
            let mut peers = self.peers.borrow_mut();
            let p = match peers.get_mut(peer) {
                Some(p) => p,
                None => {
                    return Err(IssueRejected {
                        error: RelayError::UnknownPeer {
                            name: peer.to_string(),
                        },
                        command,
                        callback,
                    })
                }
            };
            let msg_id = match p.reserve_msg_id() {
                Ok(id) => id,
                Err(error) => {
                    return Err(IssueRejected {
                        error,
                        command,
                        callback,
                    })
                }
            };
            let frame = match wire::encode_frame(msg_id, &payload) {
                Ok(f) => f,
                Err(e) => {
                    return Err(IssueRejected {
                        error: e.into(),
                        command,
                        callback,
                    })
                }
            };
            if let Err(error) = p.post_frame(frame) {
                return Err(IssueRejected {
                    error,
                    command,
                    callback,
                });
            }
            msg_id
        };

        // The frame sits in the driver's queue until this executor turn
        // yields, so the record is linked before bytes reach the wire and
        // the reply cannot race the registration.
        let handle = {
            let mut registry = self.registry.borrow_mut();
            let handle = registry.create(
                kind,
                Destination::Stream { peer, msg_id },
                Some(command),
                job,
                callback,
            );
            registry.bind_stream(handle);
            handle
        };
        tracing::debug!(task = %handle, peer = %peer, msg_id = %msg_id, ?kind, "issued on stream");
        Ok(handle)
    }

    async fn issue_socket(
        self: &Rc<Self>,
        conn: ConnId,
        command: Command,
        job: Option<JobId>,
        callback: ReplyCallback,
    ) -> Result<TaskHandle, IssueRejected> {
        let kind = command.kind;

        let payload = match self.encode_command(&command) {
            Ok(p) => p,
            Err(error) => {
                return Err(IssueRejected {
                    error,
                    command,
                    callback,
                })
            }
        };
        let frame = match wire::encode_frame(MsgId::NONE, &payload) {
            Ok(f) => f,
            Err(e) => {
                return Err(IssueRejected {
                    error: e.into(),
                    command,
                    callback,
                })
            }
        };

        let mut write = {
            let mut conns = self.conns.borrow_mut();
            let entry = match conns.get_mut(&conn) {
                Some(e) => e,
                None => {
                    return Err(IssueRejected {
                        error: RelayError::UnknownConn(conn),
                        command,
                        callback,
                    })
                }
            };
            match entry.write.take() {
                Some(w) => w,
                None => {
                    return Err(IssueRejected {
                        error: RelayError::Io("connection already carries a request".to_string()),
                        command,
                        callback,
                    })
                }
            }
        };

        let write_result = self
            .providers
            .time()
            .timeout(self.config.io_timeout, async {
                write.write_all(&frame).await?;
                write.flush().await
            })
            .await;

        // Hand the write half back; on failure the caller owns teardown.
        {
            let mut conns = self.conns.borrow_mut();
            if let Some(entry) = conns.get_mut(&conn) {
                entry.write = Some(write);
            }
        }

        let error = match write_result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(RelayError::Io(e.to_string())),
            Err(_) => Some(RelayError::Io("request write timed out".to_string())),
        };
        if let Some(error) = error {
            tracing::warn!(conn = %conn, ?kind, %error, "request send failed");
            return Err(IssueRejected {
                error,
                command,
                callback,
            });
        }

        // Sent and flushed: track it, then start the reply reader. The
        // reader starts after registration, so the reply cannot race it.
        let handle = {
            let mut registry = self.registry.borrow_mut();
            let handle = registry.create(kind, Destination::Socket(conn), Some(command), job, callback);
            registry.mark_sent(handle);
            registry.set_awaiting(handle);
            handle
        };

        let read = self
            .conns
            .borrow_mut()
            .get_mut(&conn)
            .and_then(|e| e.read.take());
        if let Some(read) = read {
            let _ = self.providers.task().spawn(
                "reply_reader",
                driver::reply_reader(
                    Rc::downgrade(self),
                    conn,
                    read,
                    self.providers.time().clone(),
                    self.config.reply_read_timeout,
                ),
            );
        }

        tracing::debug!(task = %handle, conn = %conn, ?kind, "issued on connection");
        Ok(handle)
    }

    fn encode_command(&self, command: &Command) -> Result<Vec<u8>, RelayError> {
        let encode = match self.encoders.get(command.kind) {
            Some(f) => f,
            None => {
                // The table is closed at init and covers every kind; a
                // miss is a caller contract violation.
                debug_assert!(false, "no encoder registered for {:?}", command.kind);
                tracing::error!(kind = ?command.kind, "no encoder registered");
                return Err(RelayError::UnsupportedCommand { kind: command.kind });
            }
        };
        encode(command, &self.codec).map_err(RelayError::Encode)
    }

    // ---- deferred commands ----

    /// Track a command whose bytes were written on a peer's stream by an
    /// external subsystem.
    ///
    /// The record has no command payload; at completion the callback
    /// receives a reply holder decoded (or synthesized) by the
    /// correlator, which is dropped with the record when the callback
    /// returns.
    pub fn track_deferred(
        &self,
        peer: PeerId,
        msg_id: MsgId,
        kind: CommandKind,
        callback: ReplyCallback,
    ) -> TaskHandle {
        let mut registry = self.registry.borrow_mut();
        let handle = registry.create(
            kind,
            Destination::Stream { peer, msg_id },
            None,
            None,
            callback,
        );
        registry.bind_stream(handle);
        handle
    }

    // ---- completion paths ----

    /// Complete a locally dispatched command.
    ///
    /// Called by the [`LocalDispatcher`] implementation when execution
    /// finishes; runs the original callback on the same path as remote
    /// completions.
    pub fn complete_local(&self, handle: TaskHandle, reply: Reply) {
        self.finish(handle, reply, None);
    }

    /// Force-complete every outstanding request linked to a job.
    pub fn cancel_job(&self, job: &JobId) {
        let cancelled = self
            .registry
            .borrow_mut()
            .cancel_job(job, FailReason::Cancelled);
        if !cancelled.is_empty() {
            tracing::debug!(%job, count = cancelled.len(), "cancelling outstanding requests");
        }
        for mut task in cancelled {
            if let Some(cb) = task.take_callback() {
                cb(task);
            }
        }
    }

    /// The standard callback for internally generated requests whose reply
    /// needs no inspection: drops the record and closes the connection it
    /// rode on. Stream connections are shared and stay open.
    ///
    /// Must not be used when an external client's request was relayed; the
    /// record is still needed to answer the client.
    pub fn discard_reply(self: &Rc<Self>) -> ReplyCallback {
        let relay = Rc::downgrade(self);
        Box::new(move |task: PendingRequest| {
            if let Destination::Socket(conn) = task.destination {
                if let Some(relay) = relay.upgrade() {
                    relay.close_conn(conn);
                }
            }
        })
    }

    fn finish(&self, handle: TaskHandle, reply: Reply, fail: Option<FailReason>) {
        let task = self.registry.borrow_mut().complete(handle, reply, fail);
        if let Some(mut task) = task {
            if let Some(cb) = task.take_callback() {
                cb(task);
            }
        }
    }

    /// Complete a request that failed before reaching any transport,
    /// through the same registry/callback path as everything else.
    pub(crate) fn fail_unrouted(
        &self,
        command: Command,
        callback: ReplyCallback,
        reason: FailReason,
        error: &RelayError,
    ) {
        tracing::warn!(kind = ?command.kind, %error, "request failed before dispatch");
        let job = command.job_id();
        let handle = self.registry.borrow_mut().create(
            command.kind,
            Destination::Unrouted,
            Some(command),
            job,
            callback,
        );
        self.finish(handle, Reply::synthesized(reason.reply_code()), Some(reason));
    }

    // ---- correlation entry points ----

    /// Reply (or failure) for a single-request connection, delivered by
    /// its reply reader.
    pub(crate) fn on_socket_reply(&self, conn: ConnId, outcome: Result<Vec<u8>, FailReason>) {
        let handle = self.registry.borrow().find_socket(conn);
        let handle = match handle {
            Some(h) => h,
            None => {
                // An unexpected reply must never complete an unrelated
                // record; drop the data and the connection.
                tracing::warn!(conn = %conn, "reply on a connection with no pending request");
                self.orphan_replies.set(self.orphan_replies.get() + 1);
                self.close_conn(conn);
                return;
            }
        };

        let (reply, fail) = match outcome {
            Ok(payload) => match self.codec.decode::<Reply>(&payload) {
                Ok(reply) => (reply, None),
                Err(e) => {
                    tracing::warn!(conn = %conn, error = %e, "reply decode failed");
                    (
                        Reply::synthesized(FailReason::Decode.reply_code()),
                        Some(FailReason::Decode),
                    )
                }
            },
            Err(reason) => (Reply::synthesized(reason.reply_code()), Some(reason)),
        };

        self.finish(handle, reply, fail);
    }

    /// Inbound message on a peer's stream, delivered by its driver.
    pub(crate) fn on_stream_message(&self, peer: PeerId, msg_id: MsgId, payload: &[u8]) {
        let handle = self.registry.borrow().find_stream(peer, msg_id);
        let handle = match handle {
            Some(h) => h,
            None => {
                // Orphan: a protocol defect or a double reply. Dropped
                // after counting; there is no caller to notify.
                tracing::warn!(peer = %peer, msg_id = %msg_id, "orphan reply dropped");
                self.orphan_replies.set(self.orphan_replies.get() + 1);
                return;
            }
        };

        let (reply, fail) = match self.codec.decode::<Reply>(payload) {
            Ok(reply) => (reply, None),
            Err(e) => {
                tracing::warn!(peer = %peer, msg_id = %msg_id, error = %e, "reply decode failed");
                (
                    Reply::synthesized(FailReason::NoRelay.reply_code()),
                    Some(FailReason::NoRelay),
                )
            }
        };

        self.finish(handle, reply, fail);
    }

    /// Stream closure, delivered by the driver exactly once per stream
    /// incarnation. Purges every request still pending on that
    /// incarnation as a single batch.
    pub(crate) fn on_stream_closed(&self, peer: PeerId, epoch: u64) {
        {
            let mut peers = self.peers.borrow_mut();
            if let Some(p) = peers.get_mut(peer) {
                p.detach_stream(epoch);
            }
        }

        let purged = self
            .registry
            .borrow_mut()
            .purge_peer(peer, Some(epoch), FailReason::NoRelay);
        if !purged.is_empty() {
            tracing::warn!(peer = %peer, epoch, count = purged.len(), "stream closed; purging pending requests");
        }
        for mut task in purged {
            if let Some(cb) = task.take_callback() {
                cb(task);
            }
        }
    }

    // ---- observability ----

    /// Replies that matched no pending request and were dropped.
    pub fn orphan_reply_count(&self) -> u64 {
        self.orphan_replies.get()
    }

    /// Number of tracked requests.
    pub fn pending_count(&self) -> usize {
        self.registry.borrow().pending_count()
    }

    /// Number of requests pending on a peer's stream.
    pub fn deferred_count(&self, peer: PeerId) -> usize {
        self.registry.borrow().deferred_count(peer)
    }
}
