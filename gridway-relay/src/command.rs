//! Command kinds and payloads.
//!
//! A [`Command`] is the unit of work issued to another node. The relay
//! treats the payload as opaque: it selects an encoder by [`CommandKind`],
//! hands the payload to it, and returns the payload to the caller at
//! completion. Payload contents are only ever interpreted by the encoder
//! strategy and by the receiving node.

use gridway_core::JobId;
use serde::{Deserialize, Serialize};

/// The closed set of command types the relay can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// Delete a job on the destination.
    DeleteJob,
    /// Place a hold on a job.
    HoldJob,
    /// Write a message into a job's output streams.
    MessageJob,
    /// Release sister nodes from a running job.
    ReleaseNodes,
    /// Spawn a process within a job's session.
    Spawn,
    /// Modify job attributes.
    ModifyJob,
    /// Modify job attributes without waiting for the change to land.
    ModifyJobAsync,
    /// Requeue a job for a fresh run.
    Rerun,
    /// Register a job dependency with the job's home server.
    RegisterDependency,
    /// Deliver a signal to a job.
    SignalJob,
    /// Query job status.
    StatusJob,
    /// Record a job's current location while it migrates.
    TrackJob,
    /// Stage files in or out for a job.
    CopyFiles,
    /// Stage files with an attached credential.
    CopyFilesCred,
    /// Delete staged files for a job.
    DeleteFiles,
    /// Delete staged files with an attached credential.
    DeleteFilesCred,
    /// Failover state exchange between primary and secondary servers.
    Failover,
    /// Push a renewed credential to an execution node.
    CredentialPush,
}

impl CommandKind {
    /// Every kind, in declaration order. The encoder table registers a
    /// strategy for each of these at initialization.
    pub const ALL: [CommandKind; 18] = [
        CommandKind::DeleteJob,
        CommandKind::HoldJob,
        CommandKind::MessageJob,
        CommandKind::ReleaseNodes,
        CommandKind::Spawn,
        CommandKind::ModifyJob,
        CommandKind::ModifyJobAsync,
        CommandKind::Rerun,
        CommandKind::RegisterDependency,
        CommandKind::SignalJob,
        CommandKind::StatusJob,
        CommandKind::TrackJob,
        CommandKind::CopyFiles,
        CommandKind::CopyFilesCred,
        CommandKind::DeleteFiles,
        CommandKind::DeleteFilesCred,
        CommandKind::Failover,
        CommandKind::CredentialPush,
    ];
}

/// Direction of a file staging operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageDirection {
    /// Stage files onto the execution node.
    In,
    /// Stage files off the execution node.
    Out,
}

/// Command payload, one shape per family of commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandBody {
    /// Object management (delete/hold/modify): target object plus
    /// attribute updates.
    Manage {
        /// Name of the managed object (usually a job id).
        object: String,
        /// Attribute name/value pairs to apply.
        attrs: Vec<(String, String)>,
    },
    /// Text to append to a job's output streams.
    Message {
        /// Target job.
        job: String,
        /// Which stream (stdout/stderr bit mask).
        stream: u8,
        /// Message text.
        text: String,
    },
    /// Nodes to release from a running job.
    ReleaseNodes {
        /// Target job.
        job: String,
        /// Space-separated node list, empty to release all free sisters.
        node_list: String,
    },
    /// Process to spawn inside a job's session.
    Spawn {
        /// Target job.
        job: String,
        /// Argument vector.
        argv: Vec<String>,
        /// Environment vector.
        envp: Vec<String>,
    },
    /// A bare job reference (rerun).
    JobRef {
        /// Target job.
        job: String,
    },
    /// Dependency registration.
    Register {
        /// Owner of the dependency.
        owner: String,
        /// Parent job.
        parent: String,
        /// Child job.
        child: String,
        /// Dependency type.
        dependency: String,
        /// Operation (register/release/ready).
        op: u8,
    },
    /// Signal delivery.
    Signal {
        /// Target job.
        job: String,
        /// Signal name ("SIGTERM", ...).
        signame: String,
    },
    /// Status query.
    Status {
        /// Object id to query, empty for all.
        id: String,
    },
    /// Job location tracking record.
    Track {
        /// Tracked job.
        job: String,
        /// Current location (server name).
        location: String,
        /// Migration hop count.
        hops: u32,
    },
    /// File staging (copy or delete).
    FileOp {
        /// Owning job.
        job: String,
        /// (local, remote) path pairs.
        pairs: Vec<(String, String)>,
        /// Staging direction.
        direction: StageDirection,
    },
    /// File staging with an attached credential.
    FileOpCred {
        /// Owning job.
        job: String,
        /// (local, remote) path pairs.
        pairs: Vec<(String, String)>,
        /// Staging direction.
        direction: StageDirection,
        /// Opaque credential bytes.
        credential: Vec<u8>,
    },
    /// Failover state exchange.
    Failover {
        /// Handshake state value.
        state: u32,
    },
    /// Credential push.
    Credential {
        /// Credential identifier.
        cred_id: String,
        /// Owning job.
        job: String,
        /// Credential type tag.
        cred_type: u8,
        /// Opaque credential bytes.
        data: Vec<u8>,
        /// Seconds of validity remaining.
        validity: u64,
    },
}

/// A command to issue to another node (or to this one).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Which command this is; selects the encoder.
    pub kind: CommandKind,
    /// Requesting user, carried in the wire header.
    pub user: String,
    /// Kind-specific payload.
    pub body: CommandBody,
    /// Free-form extension field, command-specific.
    pub extend: Option<String>,
}

impl Command {
    /// Build a command for `kind` with the given body.
    pub fn new(kind: CommandKind, user: impl Into<String>, body: CommandBody) -> Self {
        Self {
            kind,
            user: user.into(),
            body,
            extend: None,
        }
    }

    /// Attach an extension string.
    pub fn with_extend(mut self, extend: impl Into<String>) -> Self {
        self.extend = Some(extend.into());
        self
    }

    /// The job this command refers to, if its payload names one.
    pub fn job_id(&self) -> Option<JobId> {
        let job = match &self.body {
            CommandBody::Manage { object, .. } => object,
            CommandBody::Message { job, .. } => job,
            CommandBody::ReleaseNodes { job, .. } => job,
            CommandBody::Spawn { job, .. } => job,
            CommandBody::JobRef { job } => job,
            CommandBody::Register { child, .. } => child,
            CommandBody::Signal { job, .. } => job,
            CommandBody::Track { job, .. } => job,
            CommandBody::FileOp { job, .. } => job,
            CommandBody::FileOpCred { job, .. } => job,
            CommandBody::Credential { job, .. } => job,
            CommandBody::Status { .. } | CommandBody::Failover { .. } => return None,
        };
        Some(JobId::new(job.clone()))
    }
}
