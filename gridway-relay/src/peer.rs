//! Peer table and per-peer stream state.
//!
//! A [`Peer`] is a named remote node: another server or a per-node
//! execution agent. Peers are created on first contact and retained for the
//! process lifetime. Agents speak the persistent multiplexed stream
//! protocol; a peer's stream state is replaced on reconnect (new epoch)
//! while the peer itself, and the deferred requests tracked against it,
//! survive until the old stream's death is confirmed.

use gridway_core::{MsgId, NodeAddress};
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::error::RelayError;

/// Handle of a peer in the [`PeerTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub(crate) u32);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// What role a peer plays, which decides its transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerKind {
    /// Another batch server; one connection per request.
    Server,
    /// A per-node execution agent; one multiplexed stream, many requests.
    Agent,
}

/// Live stream state for an agent peer.
///
/// Owned by the peer entry; the socket itself is owned by the background
/// stream task, reachable through the outbound frame channel.
pub(crate) struct StreamState {
    /// Incarnation counter, embedded in every msg id reserved on this
    /// stream.
    pub(crate) epoch: u64,
    /// Next sequence number for msg id reservation.
    next_seq: u64,
    /// Outbound frames to the stream task.
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    /// Shutdown signal for the stream task.
    pub(crate) shutdown: mpsc::UnboundedSender<()>,
}

/// A named remote node.
pub struct Peer {
    /// Peer name as used by callers ("node017", "svr02", ...).
    pub name: String,
    /// Network address of the peer.
    pub address: NodeAddress,
    /// Role, deciding the transport used to reach it.
    pub kind: PeerKind,
    /// Live stream, if one is attached.
    pub(crate) stream: Option<StreamState>,
    /// Next stream epoch to hand out.
    next_epoch: u64,
}

impl Peer {
    fn new(name: String, address: NodeAddress, kind: PeerKind) -> Self {
        Self {
            name,
            address,
            kind,
            stream: None,
            next_epoch: 1,
        }
    }

    /// Whether this peer speaks the persistent multiplexed protocol.
    pub fn supports_stream(&self) -> bool {
        self.kind == PeerKind::Agent
    }

    /// Whether a stream is currently attached.
    pub fn stream_live(&self) -> bool {
        self.stream.is_some()
    }

    /// Epoch of the attached stream, if any.
    pub fn stream_epoch(&self) -> Option<u64> {
        self.stream.as_ref().map(|s| s.epoch)
    }

    /// Reserve a fresh message identifier on the live stream.
    ///
    /// Must happen before any bytes for the command are posted, so a reply
    /// can never race the registration of the identifier.
    pub(crate) fn reserve_msg_id(&mut self) -> Result<MsgId, RelayError> {
        let stream = self.stream.as_mut().ok_or(RelayError::NoRelay)?;
        stream.next_seq += 1;
        Ok(MsgId::new(stream.epoch, stream.next_seq))
    }

    /// Post a serialized frame to the stream task's outbound queue.
    ///
    /// Failure means the stream task is gone; the caller treats this like
    /// an encode failure (the request is not tracked).
    pub(crate) fn post_frame(&self, frame: Vec<u8>) -> Result<(), RelayError> {
        let stream = self.stream.as_ref().ok_or(RelayError::NoRelay)?;
        stream
            .outbound
            .send(frame)
            .map_err(|_| RelayError::NoRelay)
    }

    /// Attach a new stream, replacing any previous one. Returns the new
    /// epoch.
    pub(crate) fn attach_stream(
        &mut self,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        shutdown: mpsc::UnboundedSender<()>,
    ) -> u64 {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        if let Some(old) = self.stream.take() {
            // Ask the superseded task to exit; its close event will be
            // recognized as stale by epoch.
            let _ = old.shutdown.send(());
        }
        self.stream = Some(StreamState {
            epoch,
            next_seq: 0,
            outbound,
            shutdown,
        });
        epoch
    }

    /// Drop the stream state if `epoch` is still the live incarnation.
    ///
    /// Returns true when the live stream was detached; false means the
    /// epoch was stale (a newer stream already took its place).
    pub(crate) fn detach_stream(&mut self, epoch: u64) -> bool {
        match &self.stream {
            Some(s) if s.epoch == epoch => {
                self.stream = None;
                true
            }
            _ => false,
        }
    }
}

/// Table of every peer this process has talked to.
#[derive(Default)]
pub struct PeerTable {
    peers: Vec<Peer>,
    by_name: HashMap<String, PeerId>,
}

impl PeerTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Find an existing peer or create it on first contact.
    pub fn intern(&mut self, name: &str, address: NodeAddress, kind: PeerKind) -> PeerId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = PeerId(self.peers.len() as u32);
        self.peers.push(Peer::new(name.to_string(), address, kind));
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Look up a peer by name.
    pub fn lookup(&self, name: &str) -> Option<PeerId> {
        self.by_name.get(name).copied()
    }

    /// Get a peer by id.
    pub fn get(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(id.0 as usize)
    }

    /// Get a peer mutably by id.
    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(id.0 as usize)
    }

    /// Number of known peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
