use chunkferry_protocol::SessionStatus;

use crate::UploadSession;

/// Snapshot delivered to progress callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub file_id: String,
    /// Completion percentage, 0..=100.
    pub percent: u8,
    pub acked: u32,
    pub total: u32,
    pub status: SessionStatus,
}

/// Callback invoked with upload progress.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Derives a monotonic completion percentage from an [`UploadSession`].
///
/// The percentage only reaches 100 once the session is `Completed`; a file
/// whose chunks are all acknowledged but not yet assembled reports 99.
/// Acknowledgements only grow, so values never decrease, including across
/// a completion round that reports missing chunks.
#[derive(Default)]
pub struct ProgressTracker {
    callbacks: Vec<ProgressCallback>,
    last: u8,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a progress callback.
    pub fn on_progress(&mut self, callback: ProgressCallback) {
        self.callbacks.push(callback);
    }

    /// Percentage for the session's current state.
    pub fn percent(session: &UploadSession) -> u8 {
        if session.status() == SessionStatus::Completed {
            return 100;
        }
        let total = session.total_chunks();
        if total == 0 {
            return 0;
        }
        let acked = u64::from(session.acked_count());
        let pct = (acked * 100 + u64::from(total) / 2) / u64::from(total);
        pct.min(99) as u8
    }

    /// Last reported percentage.
    pub fn last(&self) -> u8 {
        self.last
    }

    /// Recomputes progress and notifies callbacks when it advanced.
    ///
    /// Returns the reported (monotonic) percentage.
    pub fn observe(&mut self, session: &UploadSession) -> u8 {
        let pct = Self::percent(session);
        let advanced = pct > self.last || session.status() == SessionStatus::Completed;
        self.last = pct;

        if advanced {
            let update = ProgressUpdate {
                file_id: session.file_id().to_string(),
                percent: pct,
                acked: session.acked_count(),
                total: session.total_chunks(),
                status: session.status(),
            };
            for cb in &self.callbacks {
                cb(update.clone());
            }
        }
        pct
    }
}
