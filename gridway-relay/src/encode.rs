//! Command encoder registration table.
//!
//! Each [`CommandKind`] maps to an encode strategy that turns a [`Command`]
//! into payload bytes for the frame. The table is built once at
//! initialization and immutable afterward; the dispatcher looks strategies
//! up by kind and treats a missing entry as a contract violation by the
//! caller.

use std::collections::HashMap;
use std::rc::Rc;

use gridway_core::{CodecError, PayloadCodec};

use crate::command::{Command, CommandBody, CommandKind};

/// An encode strategy: command in, frame payload bytes out.
pub type EncodeFn<C> = Rc<dyn Fn(&Command, &C) -> Result<Vec<u8>, CodecError>>;

/// Builder for an [`EncoderTable`]. Registration is only possible here;
/// once built, the table cannot change.
pub struct EncoderTableBuilder<C: PayloadCodec> {
    entries: HashMap<CommandKind, EncodeFn<C>>,
}

impl<C: PayloadCodec> EncoderTableBuilder<C> {
    /// Start an empty builder.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register the encode strategy for a command kind. A later
    /// registration for the same kind replaces the earlier one.
    pub fn register(mut self, kind: CommandKind, f: EncodeFn<C>) -> Self {
        self.entries.insert(kind, f);
        self
    }

    /// Freeze the table.
    pub fn build(self) -> EncoderTable<C> {
        EncoderTable {
            entries: self.entries,
        }
    }
}

impl<C: PayloadCodec> Default for EncoderTableBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable map from command kind to encode strategy.
pub struct EncoderTable<C: PayloadCodec> {
    entries: HashMap<CommandKind, EncodeFn<C>>,
}

impl<C: PayloadCodec> EncoderTable<C> {
    /// The standard table covering every [`CommandKind`].
    ///
    /// Each strategy checks that the payload shape matches the kind, then
    /// serializes the whole command through the codec.
    pub fn standard() -> Self {
        let mut builder = EncoderTableBuilder::new();
        for kind in CommandKind::ALL {
            builder = builder.register(
                kind,
                Rc::new(move |cmd: &Command, codec: &C| {
                    check_body_shape(kind, &cmd.body)?;
                    codec.encode(cmd)
                }),
            );
        }
        builder.build()
    }

    /// Look up the strategy for a kind.
    pub fn get(&self, kind: CommandKind) -> Option<&EncodeFn<C>> {
        self.entries.get(&kind)
    }

    /// Number of registered strategies.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Verify the payload variant matches what the kind's wire format expects.
fn check_body_shape(kind: CommandKind, body: &CommandBody) -> Result<(), CodecError> {
    let ok = match kind {
        CommandKind::DeleteJob
        | CommandKind::HoldJob
        | CommandKind::ModifyJob
        | CommandKind::ModifyJobAsync => matches!(body, CommandBody::Manage { .. }),
        CommandKind::MessageJob => matches!(body, CommandBody::Message { .. }),
        CommandKind::ReleaseNodes => matches!(body, CommandBody::ReleaseNodes { .. }),
        CommandKind::Spawn => matches!(body, CommandBody::Spawn { .. }),
        CommandKind::Rerun => matches!(body, CommandBody::JobRef { .. }),
        CommandKind::RegisterDependency => matches!(body, CommandBody::Register { .. }),
        CommandKind::SignalJob => matches!(body, CommandBody::Signal { .. }),
        CommandKind::StatusJob => matches!(body, CommandBody::Status { .. }),
        CommandKind::TrackJob => matches!(body, CommandBody::Track { .. }),
        CommandKind::CopyFiles | CommandKind::DeleteFiles => {
            matches!(body, CommandBody::FileOp { .. })
        }
        CommandKind::CopyFilesCred | CommandKind::DeleteFilesCred => {
            matches!(body, CommandBody::FileOpCred { .. })
        }
        CommandKind::Failover => matches!(body, CommandBody::Failover { .. }),
        CommandKind::CredentialPush => matches!(body, CommandBody::Credential { .. }),
    };

    if ok {
        Ok(())
    } else {
        Err(CodecError::Encode(
            format!("payload shape does not match command kind {:?}", kind).into(),
        ))
    }
}
