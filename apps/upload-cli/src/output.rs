//! Human-readable rendering of upload events and results.

use chunkferry_uploader::{UploadEvent, UploadOutcome, UploadResult};

/// Renders one event as a status line. Progress is printed every 10%.
pub fn format_event(event: &UploadEvent) -> Option<String> {
    match event {
        UploadEvent::Registered {
            source,
            file_id,
            total_chunks,
            already_received,
        } => {
            if *already_received > 0 {
                Some(format!(
                    "{source}: resuming {file_id} ({already_received}/{total_chunks} chunks on server)"
                ))
            } else {
                Some(format!("{source}: registered {file_id} ({total_chunks} chunks)"))
            }
        }
        UploadEvent::Progress {
            source, percent, ..
        } => (*percent % 10 == 0 || *percent == 99).then(|| format!("{source}: {percent}%")),
        UploadEvent::ChunkRetry {
            source,
            index,
            attempt,
            error,
            ..
        } => Some(format!(
            "{source}: chunk {index} attempt {attempt} failed: {error}"
        )),
        UploadEvent::Completed { source, file } => Some(format!(
            "{source}: done, {} bytes, sha256 {}",
            file.file_size, file.sha256
        )),
        UploadEvent::Failed { source, error } => Some(format!("{source}: FAILED: {error}")),
        UploadEvent::Cancelled { source } => Some(format!("{source}: cancelled")),
    }
}

/// One-line tally of the results.
pub fn summary(results: &[UploadResult]) -> String {
    let mut completed = 0;
    let mut failed = 0;
    let mut cancelled = 0;
    for result in results {
        match result.outcome {
            UploadOutcome::Completed(_) => completed += 1,
            UploadOutcome::Failed(_) => failed += 1,
            UploadOutcome::Cancelled => cancelled += 1,
        }
    }
    format!("{completed} completed, {failed} failed, {cancelled} cancelled")
}
