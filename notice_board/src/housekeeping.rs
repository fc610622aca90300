use crate::{api::AppState, attachments};
use anyhow::Result;
use tokio::time::{interval, Duration};

/// Delete stored objects no notice references. Objects of a notice whose
/// upload is still running are left alone. Returns the removed keys.
pub async fn sweep_orphans(state: &AppState) -> Result<Vec<String>> {
    let stored = state.attachments.keys().await?;
    let refs = state.board.lock().attachment_refs();
    let mut removed = Vec::new();
    for key in stored {
        if refs.keys.contains(&key) {
            continue;
        }
        if attachments::notice_id_of(&key).map_or(false, |id| refs.uploading.contains(&id)) {
            continue;
        }
        match state.attachments.delete(&key).await {
            Ok(()) => removed.push(key),
            Err(e) => tracing::warn!(%key, error = %e, "failed to remove orphaned attachment"),
        }
    }
    if !removed.is_empty() {
        tracing::info!(count = removed.len(), "removed orphaned attachments");
    }
    Ok(removed)
}

/// Periodically remove orphaned attachments.
pub fn run_housekeeping(state: AppState) {
    tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(300));
        loop {
            tick.tick().await;
            if let Err(e) = sweep_orphans(&state).await {
                tracing::warn!(error = %e, "attachment sweep failed");
            }
        }
    });
}
