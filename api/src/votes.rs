use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::db;
use crate::error::ApiResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteAction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Post(i64),
    Comment(i64),
}

impl Subject {
    fn table(self) -> (&'static str, &'static str, i64) {
        match self {
            Self::Post(id) => ("post_votes", "post_id", id),
            Self::Comment(id) => ("comment_votes", "comment_id", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub upvotes: i64,
    pub downvotes: i64,
    pub my_vote: i64,
}

/// Vote transition table. Repeating the current vote clears it; the opposite
/// vote replaces it.
pub fn next(current: i64, action: VoteAction) -> i64 {
    match (current, action) {
        (1, VoteAction::Up) => 0,
        (-1, VoteAction::Down) => 0,
        (_, VoteAction::Up) => 1,
        (_, VoteAction::Down) => -1,
    }
}

/// Applies `action` for `user_id` inside one write transaction and returns
/// the subject's tally after the change.
pub fn apply(
    conn: &mut Connection,
    subject: Subject,
    user_id: i64,
    action: VoteAction,
) -> ApiResult<Tally> {
    let (table, column, id) = subject.table();
    let tx = db::write_tx(conn)?;

    let current: i64 = tx
        .query_row(
            &format!("SELECT value FROM {table} WHERE {column} = ?1 AND user_id = ?2"),
            params![id, user_id],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);

    let value = next(current, action);
    if value != current {
        if value == 0 {
            tx.execute(
                &format!("DELETE FROM {table} WHERE {column} = ?1 AND user_id = ?2"),
                params![id, user_id],
            )?;
        } else {
            tx.execute(
                &format!(
                    "INSERT INTO {table} ({column}, user_id, value) VALUES (?1, ?2, ?3)
                     ON CONFLICT({column}, user_id) DO UPDATE SET value = excluded.value"
                ),
                params![id, user_id, value],
            )?;
        }
    }

    let tally = tally(&tx, subject, Some(user_id))?;
    tx.commit()?;
    tracing::debug!(?subject, user_id, from = current, to = value, "vote applied");
    Ok(tally)
}

pub fn tally(conn: &Connection, subject: Subject, viewer: Option<i64>) -> ApiResult<Tally> {
    let (table, column, id) = subject.table();
    let tally = conn.query_row(
        &format!(
            "SELECT COALESCE(SUM(value = 1), 0),
                    COALESCE(SUM(value = -1), 0),
                    COALESCE(SUM(CASE WHEN user_id = ?2 THEN value END), 0)
             FROM {table} WHERE {column} = ?1"
        ),
        params![id, viewer],
        |row| {
            Ok(Tally {
                upvotes: row.get(0)?,
                downvotes: row.get(1)?,
                my_vote: row.get(2)?,
            })
        },
    )?;
    Ok(tally)
}
