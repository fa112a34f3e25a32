use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::error::{ApiError, ApiResult};
use crate::{db, DbPool};

pub const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;
const PURGE_EVERY: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Verify,
    Reset,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Verify => "verify",
            Self::Reset => "reset",
        }
    }
}

/// Issues a token for `email`. A new verify token replaces any pending one;
/// reset tokens accumulate until one is used.
pub fn create(conn: &mut Connection, email: &str, intent: Intent) -> ApiResult<String> {
    let token = uuid::Uuid::new_v4().to_string();
    let expires_at = Utc::now().timestamp() + TOKEN_TTL_SECS;

    let tx = db::write_tx(conn)?;
    if intent == Intent::Verify {
        tx.execute(
            "DELETE FROM verification_tokens WHERE email = ?1 AND intent = ?2",
            params![email, intent.as_str()],
        )?;
    }
    tx.execute(
        "INSERT INTO verification_tokens (token, email, intent, expires_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![token, email, intent.as_str(), expires_at],
    )?;
    tx.commit()?;

    Ok(token)
}

/// Consumes `token`: `effect` runs for the bound email inside the same
/// transaction, then every token for that email and intent is dropped.
pub fn consume<F>(conn: &mut Connection, token: &str, intent: Intent, effect: F) -> ApiResult<String>
where
    F: FnOnce(&Transaction<'_>, &str) -> ApiResult<()>,
{
    let tx = db::write_tx(conn)?;
    let email: Option<String> = tx
        .query_row(
            "SELECT email FROM verification_tokens
             WHERE token = ?1 AND intent = ?2 AND expires_at > ?3",
            params![token, intent.as_str(), Utc::now().timestamp()],
            |row| row.get(0),
        )
        .optional()?;
    let email = email.ok_or_else(|| ApiError::validation("invalid or expired token"))?;

    effect(&tx, &email)?;
    tx.execute(
        "DELETE FROM verification_tokens WHERE email = ?1 AND intent = ?2",
        params![email, intent.as_str()],
    )?;
    tx.commit()?;

    Ok(email)
}

pub fn purge_expired(conn: &Connection) -> ApiResult<usize> {
    let removed = conn.execute(
        "DELETE FROM verification_tokens WHERE expires_at <= ?1",
        [Utc::now().timestamp()],
    )?;
    Ok(removed)
}

/// Deletes expired tokens once an hour for the life of the process.
pub fn spawn_purge(pool: DbPool) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_EVERY);
        loop {
            ticker.tick().await;
            match db::run(&pool, |conn| purge_expired(conn)).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "expired tokens purged"),
                Err(e) => tracing::warn!(error = %e, "token purge failed"),
            }
        }
    })
}
