use std::collections::BTreeSet;

use chunkferry_protocol::{AssembledFile, FileDescriptor, SessionStatus};

use crate::TransferError;

/// Why a session ended in [`SessionStatus::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailReason {
    UserCancelled,
    Error(String),
}

impl std::fmt::Display for FailReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserCancelled => f.write_str("cancelled by user"),
            Self::Error(msg) => f.write_str(msg),
        }
    }
}

/// Client-side state of a single upload attempt.
///
/// Owned by exactly one driver task; every mutation goes through `&mut self`.
///
/// Lifecycle:
/// `Initiated -> Registered -> Uploading -> Completing -> Completed`,
/// with `Completing -> Uploading` when the assembler reports gaps and
/// `* -> Failed` from any non-terminal state.
#[derive(Debug)]
pub struct UploadSession {
    descriptor: FileDescriptor,
    status: SessionStatus,
    acked: BTreeSet<u32>,
    pending_resend: BTreeSet<u32>,
    failure: Option<FailReason>,
    assembled: Option<AssembledFile>,
}

impl UploadSession {
    pub fn new(descriptor: FileDescriptor) -> Self {
        Self {
            descriptor,
            status: SessionStatus::Initiated,
            acked: BTreeSet::new(),
            pending_resend: BTreeSet::new(),
            failure: None,
            assembled: None,
        }
    }

    pub fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    pub fn file_id(&self) -> &str {
        &self.descriptor.file_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn total_chunks(&self) -> u32 {
        self.descriptor.total_chunks
    }

    pub fn acked_count(&self) -> u32 {
        self.acked.len() as u32
    }

    pub fn is_acked(&self, index: u32) -> bool {
        self.acked.contains(&index)
    }

    /// Returns `true` once every index in `[0, total_chunks)` is acknowledged
    /// and no reported gap is waiting for a resend.
    pub fn is_complete(&self) -> bool {
        self.acked_count() == self.total_chunks() && self.pending_resend.is_empty()
    }

    /// Indexes not yet acknowledged, ascending.
    pub fn unacked(&self) -> Vec<u32> {
        (0..self.total_chunks())
            .filter(|i| !self.acked.contains(i))
            .collect()
    }

    /// Indexes the assembler reported missing in the last completion round.
    pub fn pending_resend(&self) -> Vec<u32> {
        self.pending_resend.iter().copied().collect()
    }

    pub fn failure(&self) -> Option<&FailReason> {
        self.failure.as_ref()
    }

    pub fn assembled(&self) -> Option<&AssembledFile> {
        self.assembled.as_ref()
    }

    fn guard(&self, allowed: &[SessionStatus], action: &'static str) -> Result<(), TransferError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(TransferError::InvalidTransition {
                status: self.status,
                action,
            })
        }
    }

    /// Marks the registration as accepted.
    ///
    /// `already_received` lists indexes the assembler holds from an earlier
    /// attempt with the same id; they count as acknowledged immediately.
    pub fn register(&mut self, already_received: &[u32]) -> Result<(), TransferError> {
        self.guard(&[SessionStatus::Initiated], "register")?;
        for &index in already_received {
            self.check_range(index)?;
        }
        self.acked.extend(already_received.iter().copied());
        self.status = SessionStatus::Registered;
        Ok(())
    }

    fn check_range(&self, index: u32) -> Result<(), TransferError> {
        if index >= self.total_chunks() {
            return Err(TransferError::ChunkOutOfRange {
                index,
                total: self.total_chunks(),
            });
        }
        Ok(())
    }

    /// Records a positive acknowledgement for `index`.
    ///
    /// Idempotent: returns `true` if the index was newly acknowledged and
    /// `false` if it already was. Either way a pending resend of `index` is
    /// satisfied. The first acknowledgement moves the session from
    /// `Registered` to `Uploading`.
    pub fn acknowledge(&mut self, index: u32) -> Result<bool, TransferError> {
        self.guard(
            &[SessionStatus::Registered, SessionStatus::Uploading],
            "acknowledge",
        )?;
        self.check_range(index)?;

        self.status = SessionStatus::Uploading;
        self.pending_resend.remove(&index);
        Ok(self.acked.insert(index))
    }

    /// Enters `Completing` ahead of a completion request.
    pub fn begin_completion(&mut self) -> Result<(), TransferError> {
        self.guard(
            &[SessionStatus::Registered, SessionStatus::Uploading],
            "complete",
        )?;
        self.status = SessionStatus::Completing;
        Ok(())
    }

    /// The assembler produced the final artifact.
    pub fn completion_succeeded(&mut self, file: AssembledFile) -> Result<(), TransferError> {
        self.guard(&[SessionStatus::Completing], "finish")?;
        self.status = SessionStatus::Completed;
        self.pending_resend.clear();
        self.assembled = Some(file);
        Ok(())
    }

    /// The assembler reported `missing` indexes; they are queued for resend.
    ///
    /// Acknowledgements are never withdrawn, so `acked_count` and the derived
    /// percentage do not move backwards across a gap round.
    pub fn completion_incomplete(&mut self, missing: &[u32]) -> Result<(), TransferError> {
        self.guard(&[SessionStatus::Completing], "resume uploading")?;
        for &index in missing {
            self.check_range(index)?;
        }
        self.pending_resend.extend(missing.iter().copied());
        self.status = SessionStatus::Uploading;
        Ok(())
    }

    /// Moves the session to `Failed`. No-op if already terminal.
    pub fn fail(&mut self, reason: FailReason) {
        if self.status.is_terminal() {
            return;
        }
        self.status = SessionStatus::Failed;
        self.failure = Some(reason);
    }
}
