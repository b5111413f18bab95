use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::OptionalExtension;

use super::MemoryStore;

/// Per-user, per-day message counters backing the free quota.
#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn messages_on(&self, user_id: u64, day: NaiveDate) -> Result<u32>;
    /// Take one slot if fewer than `limit` are used. Returns false when the
    /// quota is already exhausted; check and increment are a single statement.
    async fn try_reserve(&self, user_id: u64, day: NaiveDate, limit: u32) -> Result<bool>;
    /// Give back a slot taken by `try_reserve`.
    async fn release(&self, user_id: u64, day: NaiveDate) -> Result<()>;
}

#[async_trait]
impl UsageLedger for MemoryStore {
    async fn messages_on(&self, user_id: u64, day: NaiveDate) -> Result<u32> {
        let conn = self.conn.lock().await;
        let count: Option<u32> = conn
            .query_row(
                "SELECT messages FROM usage WHERE user_id = ?1 AND day = ?2",
                rusqlite::params![user_id, day.to_string()],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read usage")?;
        Ok(count.unwrap_or(0))
    }

    async fn try_reserve(&self, user_id: u64, day: NaiveDate, limit: u32) -> Result<bool> {
        if limit == 0 {
            return Ok(false);
        }
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "INSERT INTO usage (user_id, day, messages) VALUES (?1, ?2, 1)
                 ON CONFLICT(user_id, day) DO UPDATE SET messages = messages + 1
                 WHERE messages < ?3",
                rusqlite::params![user_id, day.to_string(), limit],
            )
            .context("Failed to reserve usage")?;
        Ok(changed > 0)
    }

    async fn release(&self, user_id: u64, day: NaiveDate) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE usage SET messages = messages - 1
             WHERE user_id = ?1 AND day = ?2 AND messages > 0",
            rusqlite::params![user_id, day.to_string()],
        )
        .context("Failed to release usage")?;
        Ok(())
    }
}
