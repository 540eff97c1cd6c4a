use crate::error::Result;
use crate::storage::Storage;
use chrono::Utc;
use rusqlite::params;
use std::future::Future;
use uuid::Uuid;

/// Whether a guarded operation ran, or was skipped because the lease
/// was held elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome<T> {
    Completed(T),
    Skipped,
}

impl<T> LockOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            LockOutcome::Completed(value) => Some(value),
            LockOutcome::Skipped => None,
        }
    }
}

/// Advisory leases persisted in SQLite. Expired leases are reaped lazily
/// by the next acquirer; there is no background sweeper.
pub struct LockStore<'a> {
    storage: &'a Storage,
}

impl<'a> LockStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Try to take the lease on `resource` for `ttl_secs`. Returns the
    /// holder token on success, `None` if a live lease exists. Never blocks
    /// waiting for the current holder.
    pub async fn try_acquire(&self, resource: &str, ttl_secs: u64) -> Result<Option<String>> {
        let conn = self.storage.get_connection().await;
        let now = Utc::now().timestamp();

        // Reap an expired lease before contending for the slot
        conn.execute(
            "DELETE FROM locks WHERE resource = ?1 AND expires_at <= ?2",
            params![resource, now],
        )?;

        let holder = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT OR IGNORE INTO locks (resource, holder, expires_at) VALUES (?1, ?2, ?3)",
            params![resource, holder, now + ttl_secs as i64],
        )?;

        if conn.changes() == 0 {
            return Ok(None);
        }

        Ok(Some(holder))
    }

    /// Release a lease, but only if `holder` still owns it. Releasing a
    /// lease that expired and was re-acquired by someone else is a no-op.
    pub async fn release(&self, resource: &str, holder: &str) -> Result<()> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "DELETE FROM locks WHERE resource = ?1 AND holder = ?2",
            params![resource, holder],
        )?;

        Ok(())
    }

    /// Run `op` under the lease on `resource`, releasing on every exit path.
    /// The TTL must exceed the worst-case duration of `op`; an overrun lease
    /// can be reclaimed mid-flight, so guarded code must stay idempotent.
    pub async fn run_exclusive<T, F, Fut>(
        &self,
        resource: &str,
        ttl_secs: u64,
        op: F,
    ) -> Result<LockOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some(holder) = self.try_acquire(resource, ttl_secs).await? else {
            tracing::debug!("Lease on {} held elsewhere, skipping", resource);
            return Ok(LockOutcome::Skipped);
        };

        let result = op().await;

        if let Err(e) = self.release(resource, &holder).await {
            tracing::warn!("Failed to release lease on {}: {}", resource, e);
        }

        result.map(LockOutcome::Completed)
    }
}
