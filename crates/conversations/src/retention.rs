use chrono::{Duration, Utc};

use pr_domain::error::Result;
use pr_domain::trace::TraceEvent;

use crate::store::{ConversationStore, Removed};

/// Delete conversations idle for more than `retention_days`, with their turns.
pub async fn prune_expired(store: &dyn ConversationStore, retention_days: u32) -> Result<Removed> {
    let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
    let removed = store.prune_idle_since(cutoff).await?;

    if removed != Removed::default() {
        TraceEvent::RetentionSweep {
            conversations_deleted: removed.conversations,
            turns_deleted: removed.turns,
        }
        .emit();
    }
    Ok(removed)
}
