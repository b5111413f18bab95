use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};

use super::MemoryStore;

/// A person talking to the bot, keyed by their Telegram user id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub full_name: String,
    pub telegram_id: u64,
}

impl User {
    /// New record with the platform id mirrored into both id fields.
    pub fn new(id: u64, full_name: impl Into<String>) -> Self {
        Self {
            id,
            full_name: full_name.into(),
            telegram_id: id,
        }
    }
}

/// Lookup and lazy creation of user records.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get(&self, id: u64) -> Result<Option<User>>;

    /// Store `user` unless a record with the same id exists; returns the stored record.
    async fn create(&self, user: User) -> Result<User>;

    async fn all(&self) -> Result<Vec<User>>;
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn get(&self, id: u64) -> Result<Option<User>> {
        let conn = self.conn.lock().await;
        select_user(&conn, id)
    }

    async fn create(&self, user: User) -> Result<User> {
        let conn = self.conn.lock().await;

        // Concurrent first messages from one user collapse onto a single row.
        conn.execute(
            "INSERT INTO users (id, full_name, telegram_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO NOTHING",
            rusqlite::params![user.id, &user.full_name, user.telegram_id],
        )
        .context("Failed to create user")?;

        select_user(&conn, user.id)?
            .with_context(|| format!("User {} missing after insert", user.id))
    }

    async fn all(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT id, full_name, telegram_id FROM users ORDER BY created_at ASC, id ASC")
            .context("Failed to prepare users query")?;
        let users = stmt
            .query_map([], parse_user_row)
            .context("Failed to query users")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to collect users")?;
        Ok(users)
    }
}

fn select_user(conn: &Connection, id: u64) -> Result<Option<User>> {
    conn.query_row(
        "SELECT id, full_name, telegram_id FROM users WHERE id = ?1",
        rusqlite::params![id],
        parse_user_row,
    )
    .optional()
    .with_context(|| format!("Failed to load user {}", id))
}

fn parse_user_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        full_name: row.get(1)?,
        telegram_id: row.get(2)?,
    })
}
