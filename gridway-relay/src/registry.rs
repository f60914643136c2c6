//! Task registry: tracking records for outstanding requests.
//!
//! The registry is an arena of [`PendingRequest`] records addressed by
//! generational [`TaskHandle`]s, plus the membership lists the correlator
//! searches:
//!
//! - the **event list**, holding local and single-connection requests
//! - one **deferred list per peer**, holding multiplexed-stream requests
//! - one **list per job**, holding requests issued on a job's behalf
//!
//! A record sits in at most one of the event/deferred lists at a time;
//! the arena stores the current membership on the record itself, so
//! insert and remove are O(1) (swap-remove with position patching) and
//! double membership is structurally impossible. The per-job link is
//! orthogonal and tracked the same way.
//!
//! Completion detaches the record from the arena before the callback ever
//! sees it, so a callback fires exactly once per record by construction; a
//! second completion attempt finds a stale handle, which is asserted in
//! test builds and logged in release.

use gridway_core::{ConnId, JobId, MsgId};
use std::collections::HashMap;

use crate::command::{Command, CommandKind};
use crate::peer::PeerId;
use crate::reply::{FailReason, Reply};

/// Completion callback, invoked exactly once with the finished record.
///
/// Ownership of the record, including the caller's command payload and the
/// reply, moves to the callback.
pub type ReplyCallback = Box<dyn FnOnce(PendingRequest)>;

/// Generational handle of a tracked request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    index: u32,
    gen: u32,
}

impl std::fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task#{}.{}", self.index, self.gen)
    }
}

/// Where a request was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// This node; handled by the local dispatcher.
    Local,
    /// A single-request connection; the reply is correlated by handle.
    Socket(ConnId),
    /// A peer's multiplexed stream; the reply is correlated by msg id.
    Stream {
        /// The destination peer.
        peer: PeerId,
        /// Identifier reserved for this request.
        msg_id: MsgId,
    },
    /// Never sent; used for requests that failed before reaching any
    /// transport (terminal retry failures surfaced through the callback).
    Unrouted,
}

/// Lifecycle state of a tracked request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Being encoded; not yet on the wire.
    Encoding,
    /// Bytes handed to the transport.
    Sent,
    /// Awaiting the reply.
    AwaitingReply,
    /// Reply arrived and was decoded; see `reply.code` for the remote
    /// verdict.
    Completed,
    /// Failed at the transport level; the reply is synthesized.
    Failed(FailReason),
}

impl TaskState {
    /// Whether this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed(_))
    }
}

/// Which list currently holds a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Membership {
    Detached,
    Event { pos: usize },
    Deferred { peer: PeerId, pos: usize },
}

/// One outstanding request.
pub struct PendingRequest {
    /// Command kind.
    pub kind: CommandKind,
    /// Where the request went.
    pub destination: Destination,
    /// The caller's command; `None` for deferred commands whose traffic
    /// was written by an external subsystem.
    pub command: Option<Command>,
    /// Job the request belongs to, if any.
    pub job: Option<JobId>,
    /// Lifecycle state.
    pub state: TaskState,
    /// Reply slot, filled exactly once at completion.
    pub reply: Option<Reply>,
    callback: Option<ReplyCallback>,
    membership: Membership,
    job_pos: Option<usize>,
}

impl PendingRequest {
    /// Take the completion callback out of the record.
    ///
    /// Returns `None` if it was already taken; the relay calls this once,
    /// right before invoking it.
    pub fn take_callback(&mut self) -> Option<ReplyCallback> {
        self.callback.take()
    }

    /// The msg id this request reserved, if Stream-Keyed.
    pub fn msg_id(&self) -> Option<MsgId> {
        match self.destination {
            Destination::Stream { msg_id, .. } => Some(msg_id),
            _ => None,
        }
    }
}

struct Slot {
    gen: u32,
    task: Option<PendingRequest>,
}

/// Arena of pending requests plus their membership lists.
#[derive(Default)]
pub struct TaskRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    event_list: Vec<TaskHandle>,
    deferred: HashMap<PeerId, Vec<TaskHandle>>,
    job_index: HashMap<JobId, Vec<TaskHandle>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            event_list: Vec::new(),
            deferred: HashMap::new(),
            job_index: HashMap::new(),
        }
    }

    /// Allocate a tracking record.
    ///
    /// The record starts in state `Encoding` and joins the event list
    /// unless the destination is Stream-Keyed; stream requests live on
    /// their peer's deferred list instead, which they join via
    /// [`bind_stream`](Self::bind_stream).
    pub fn create(
        &mut self,
        kind: CommandKind,
        destination: Destination,
        command: Option<Command>,
        job: Option<JobId>,
        callback: ReplyCallback,
    ) -> TaskHandle {
        let task = PendingRequest {
            kind,
            destination,
            command,
            job: job.clone(),
            state: TaskState::Encoding,
            reply: None,
            callback: Some(callback),
            membership: Membership::Detached,
            job_pos: None,
        };

        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.task = Some(task);
                TaskHandle {
                    index,
                    gen: slot.gen,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    gen: 0,
                    task: Some(task),
                });
                TaskHandle { index, gen: 0 }
            }
        };

        if !matches!(destination, Destination::Stream { .. }) {
            let pos = self.event_list.len();
            self.event_list.push(handle);
            if let Some(task) = self.task_mut(handle) {
                task.membership = Membership::Event { pos };
            }
        }

        if let Some(job) = job {
            let list = self.job_index.entry(job).or_default();
            let pos = list.len();
            list.push(handle);
            if let Some(task) = self.task_mut(handle) {
                task.job_pos = Some(pos);
            }
        }

        handle
    }

    /// Link a Stream-Keyed record onto its peer's deferred list and move
    /// it to `AwaitingReply`.
    ///
    /// The record must be detached (it never joins the event list), and
    /// its destination names the peer.
    pub fn bind_stream(&mut self, handle: TaskHandle) {
        let (peer, detached) = match self.task(handle) {
            Some(task) => match task.destination {
                Destination::Stream { peer, .. } => {
                    (peer, task.membership == Membership::Detached)
                }
                _ => {
                    debug_assert!(false, "bind_stream on a non-stream task");
                    return;
                }
            },
            None => {
                debug_assert!(false, "bind_stream on a dead handle");
                return;
            }
        };
        debug_assert!(detached, "task already belongs to a list");
        if !detached {
            return;
        }

        let list = self.deferred.entry(peer).or_default();
        let pos = list.len();
        list.push(handle);
        if let Some(task) = self.task_mut(handle) {
            task.membership = Membership::Deferred { peer, pos };
            task.state = TaskState::AwaitingReply;
        }
    }

    /// Mark a record's bytes as handed to the transport.
    pub fn mark_sent(&mut self, handle: TaskHandle) {
        if let Some(task) = self.task_mut(handle) {
            task.state = TaskState::Sent;
        }
    }

    /// Move a record to `AwaitingReply`.
    pub fn set_awaiting(&mut self, handle: TaskHandle) {
        if let Some(task) = self.task_mut(handle) {
            task.state = TaskState::AwaitingReply;
        }
    }

    /// Complete a record: fill its reply, set the terminal state, unlink
    /// it from every list, and hand the detached record back.
    ///
    /// Returns `None` for a stale handle, which means the record was
    /// already completed: a correlation defect. Test builds assert on it.
    pub fn complete(
        &mut self,
        handle: TaskHandle,
        reply: Reply,
        fail: Option<FailReason>,
    ) -> Option<PendingRequest> {
        if self.task(handle).is_none() {
            debug_assert!(false, "double completion for {}", handle);
            tracing::error!(task = %handle, "completion attempt for a task that no longer exists");
            return None;
        }

        let mut task = self.detach(handle)?;
        task.reply = Some(reply);
        task.state = match fail {
            Some(reason) => TaskState::Failed(reason),
            None => TaskState::Completed,
        };
        Some(task)
    }

    /// Unlink and drop a record without completing it.
    ///
    /// Used by the dispatcher when a send fails before the request was
    /// really issued: ownership of the command and callback reverts to the
    /// caller through the returned record.
    pub fn discard(&mut self, handle: TaskHandle) -> Option<PendingRequest> {
        self.detach(handle)
    }

    /// Force-complete every deferred record of a peer whose msg id belongs
    /// to `epoch` (all of them when `epoch` is `None`).
    ///
    /// Each returned record is `Failed(reason)` with a synthesized,
    /// body-less reply. Afterward none of them remain on the deferred
    /// list.
    pub fn purge_peer(
        &mut self,
        peer: PeerId,
        epoch: Option<u64>,
        reason: FailReason,
    ) -> Vec<PendingRequest> {
        let list = self.deferred.remove(&peer).unwrap_or_default();
        let mut kept: Vec<TaskHandle> = Vec::new();
        let mut purged = Vec::new();

        for handle in list {
            let matches = match (epoch, self.task(handle).and_then(|t| t.msg_id())) {
                (None, _) => true,
                (Some(e), Some(id)) => id.epoch == e,
                (Some(_), None) => false,
            };

            if matches {
                if let Some(mut task) = self.remove_slot(handle) {
                    Self::unlink_job(&mut self.job_index, &mut self.slots, &mut task);
                    task.reply = Some(Reply::synthesized(reason.reply_code()));
                    task.state = TaskState::Failed(reason);
                    purged.push(task);
                }
            } else {
                let pos = kept.len();
                kept.push(handle);
                if let Some(task) = self.task_mut(handle) {
                    task.membership = Membership::Deferred { peer, pos };
                }
            }
        }

        if !kept.is_empty() {
            self.deferred.insert(peer, kept);
        }
        purged
    }

    /// Force-complete every record linked to a job.
    pub fn cancel_job(&mut self, job: &JobId, reason: FailReason) -> Vec<PendingRequest> {
        let handles = self.job_index.remove(job).unwrap_or_default();
        let mut cancelled = Vec::new();
        for handle in handles {
            // job_pos is already invalid; clear it before detaching so the
            // job unlink is not re-attempted against the drained list.
            if let Some(task) = self.task_mut(handle) {
                task.job_pos = None;
                task.job = None;
            }
            if let Some(mut task) = self.detach(handle) {
                task.reply = Some(Reply::synthesized(reason.reply_code()));
                task.state = TaskState::Failed(reason);
                cancelled.push(task);
            }
        }
        cancelled
    }

    /// Find the single event-list record sent on a connection handle.
    ///
    /// A linear scan: the event list holds one entry per in-flight
    /// single-request connection, which is bounded by the connection
    /// budget.
    pub fn find_socket(&self, conn: ConnId) -> Option<TaskHandle> {
        self.event_list
            .iter()
            .copied()
            .find(|h| match self.task(*h) {
                Some(task) => task.destination == Destination::Socket(conn),
                None => false,
            })
    }

    /// Find the deferred record of `peer` that reserved `msg_id`.
    pub fn find_stream(&self, peer: PeerId, msg_id: MsgId) -> Option<TaskHandle> {
        self.deferred
            .get(&peer)?
            .iter()
            .copied()
            .find(|h| match self.task(*h) {
                Some(task) => task.msg_id() == Some(msg_id),
                None => false,
            })
    }

    /// Borrow a record.
    pub fn get(&self, handle: TaskHandle) -> Option<&PendingRequest> {
        self.task(handle)
    }

    /// Number of live records.
    pub fn pending_count(&self) -> usize {
        self.slots.iter().filter(|s| s.task.is_some()).count()
    }

    /// Number of records on a peer's deferred list.
    pub fn deferred_count(&self, peer: PeerId) -> usize {
        self.deferred.get(&peer).map(Vec::len).unwrap_or(0)
    }

    /// Number of records on the event list.
    pub fn event_count(&self) -> usize {
        self.event_list.len()
    }

    /// Number of records linked to a job.
    pub fn job_count(&self, job: &JobId) -> usize {
        self.job_index.get(job).map(Vec::len).unwrap_or(0)
    }

    // ---- internals ----

    fn task(&self, handle: TaskHandle) -> Option<&PendingRequest> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.gen != handle.gen {
            return None;
        }
        slot.task.as_ref()
    }

    fn task_mut(&mut self, handle: TaskHandle) -> Option<&mut PendingRequest> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.gen != handle.gen {
            return None;
        }
        slot.task.as_mut()
    }

    /// Remove the record from the arena, bumping the slot generation.
    fn remove_slot(&mut self, handle: TaskHandle) -> Option<PendingRequest> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.gen != handle.gen {
            return None;
        }
        let task = slot.task.take()?;
        slot.gen = slot.gen.wrapping_add(1);
        self.free.push(handle.index);
        Some(task)
    }

    /// Unlink from membership and job lists, then remove from the arena.
    fn detach(&mut self, handle: TaskHandle) -> Option<PendingRequest> {
        let membership = self.task(handle)?.membership;
        match membership {
            Membership::Detached => {}
            Membership::Event { pos } => {
                Self::swap_remove_membership(&mut self.event_list, &mut self.slots, pos, None);
            }
            Membership::Deferred { peer, pos } => {
                if let Some(list) = self.deferred.get_mut(&peer) {
                    Self::swap_remove_membership(list, &mut self.slots, pos, Some(peer));
                    if list.is_empty() {
                        self.deferred.remove(&peer);
                    }
                }
            }
        }

        let mut task = self.remove_slot(handle)?;
        task.membership = Membership::Detached;
        Self::unlink_job(&mut self.job_index, &mut self.slots, &mut task);
        Some(task)
    }

    /// Swap-remove `pos` from a membership list and patch the moved
    /// record's stored position.
    fn swap_remove_membership(
        list: &mut Vec<TaskHandle>,
        slots: &mut [Slot],
        pos: usize,
        peer: Option<PeerId>,
    ) {
        list.swap_remove(pos);
        if pos < list.len() {
            let moved = list[pos];
            if let Some(slot) = slots.get_mut(moved.index as usize) {
                if slot.gen == moved.gen {
                    if let Some(task) = slot.task.as_mut() {
                        task.membership = match peer {
                            None => Membership::Event { pos },
                            Some(peer) => Membership::Deferred { peer, pos },
                        };
                    }
                }
            }
        }
    }

    /// Swap-remove a record from its job list and patch the moved record's
    /// stored position.
    fn unlink_job(
        job_index: &mut HashMap<JobId, Vec<TaskHandle>>,
        slots: &mut [Slot],
        task: &mut PendingRequest,
    ) {
        let job = match task.job.as_ref() {
            Some(job) => job.clone(),
            None => return,
        };
        let pos = match task.job_pos.take() {
            Some(pos) => pos,
            None => return,
        };
        if let Some(list) = job_index.get_mut(&job) {
            list.swap_remove(pos);
            if pos < list.len() {
                let moved = list[pos];
                if let Some(slot) = slots.get_mut(moved.index as usize) {
                    if slot.gen == moved.gen {
                        if let Some(moved_task) = slot.task.as_mut() {
                            moved_task.job_pos = Some(pos);
                        }
                    }
                }
            }
            if list.is_empty() {
                job_index.remove(&job);
            }
        }
    }
}
