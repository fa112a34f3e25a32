use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::{ApiError, ApiResult};
use crate::DbPool;

/// Opens the pool; every connection enforces foreign keys and waits on the
/// writer lock instead of failing with SQLITE_BUSY.
pub fn open_pool(path: &Path) -> Result<DbPool, r2d2::Error> {
    let manager = r2d2_sqlite::SqliteConnectionManager::file(path).with_init(|conn| {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "foreign_keys", "ON")
    });
    r2d2::Pool::builder().max_size(8).build(manager)
}

/// Runs `f` on a pooled connection off the async runtime.
pub async fn run<T, F>(pool: &DbPool, f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> ApiResult<T> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        f(&mut conn)
    })
    .await
    .map_err(ApiError::from)?
}

/// Starts a write transaction that takes the writer lock up front, so the
/// reads it performs cannot be invalidated before it commits.
pub fn write_tx(conn: &mut Connection) -> rusqlite::Result<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
}

pub fn run_migrations(pool: &DbPool) -> Result<(), Box<dyn std::error::Error>> {
    let conn = pool.get()?;
    migrate(&conn)?;
    Ok(())
}

pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS media_links (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            kind        TEXT NOT NULL,
            filename    TEXT NOT NULL UNIQUE,
            post_id     INTEGER REFERENCES posts(id) ON DELETE CASCADE,
            ordinal     INTEGER,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );
        CREATE INDEX IF NOT EXISTS idx_media_post ON media_links(post_id);

        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            email           TEXT UNIQUE NOT NULL,
            username        TEXT UNIQUE NOT NULL,
            first_name      TEXT NOT NULL,
            last_name       TEXT NOT NULL,
            password_hash   TEXT,
            verified        INTEGER NOT NULL DEFAULT 0,
            oauth_provider  TEXT,
            oauth_id        TEXT,
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS user_configs (
            user_id         INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
            lang            TEXT NOT NULL,
            theme           TEXT NOT NULL,
            avatar_media_id INTEGER REFERENCES media_links(id) ON DELETE SET NULL
        );

        CREATE TABLE IF NOT EXISTS verification_tokens (
            token       TEXT PRIMARY KEY,
            email       TEXT NOT NULL,
            intent      TEXT NOT NULL,
            expires_at  INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tokens_email ON verification_tokens(email, intent);

        CREATE TABLE IF NOT EXISTS threads (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT UNIQUE NOT NULL,
            owner_id    INTEGER NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS thread_configs (
            thread_id           INTEGER PRIMARY KEY REFERENCES threads(id) ON DELETE CASCADE,
            description         TEXT NOT NULL DEFAULT '',
            icon_media_id       INTEGER REFERENCES media_links(id) ON DELETE SET NULL,
            banner_media_id     INTEGER REFERENCES media_links(id) ON DELETE SET NULL,
            open_to_non_members INTEGER NOT NULL DEFAULT 1,
            open_to_anonymous   INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS thread_members (
            thread_id   INTEGER NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            rank        INTEGER NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            PRIMARY KEY (thread_id, user_id)
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_one_owner
            ON thread_members(thread_id) WHERE rank = 3;

        CREATE TABLE IF NOT EXISTS tags (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_id   INTEGER NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
            name        TEXT NOT NULL,
            color       TEXT NOT NULL,
            UNIQUE(thread_id, name)
        );

        CREATE TABLE IF NOT EXISTS posts (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_id   INTEGER NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            title       TEXT NOT NULL,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );
        CREATE INDEX IF NOT EXISTS idx_posts_thread ON posts(thread_id, created_at);

        CREATE TABLE IF NOT EXISTS post_tags (
            post_id     INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            tag_id      INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
            PRIMARY KEY (post_id, tag_id)
        );

        CREATE TABLE IF NOT EXISTS comments (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            post_id     INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );
        CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id, created_at);

        CREATE TABLE IF NOT EXISTS post_votes (
            post_id     INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            value       INTEGER NOT NULL CHECK (value IN (-1, 1)),
            PRIMARY KEY (post_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS comment_votes (
            comment_id  INTEGER NOT NULL REFERENCES comments(id) ON DELETE CASCADE,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            value       INTEGER NOT NULL CHECK (value IN (-1, 1)),
            PRIMARY KEY (comment_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS reports (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_id    INTEGER NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
            subject_kind TEXT NOT NULL,
            subject_id   INTEGER NOT NULL,
            reporter_id  INTEGER NOT NULL REFERENCES users(id),
            kind         TEXT NOT NULL,
            reason       TEXT NOT NULL,
            resolved     INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );
        CREATE INDEX IF NOT EXISTS idx_reports_thread ON reports(thread_id, resolved);
        ",
    )
}

/// Fresh in-memory database with the full schema, for unit tests.
#[cfg(test)]
pub fn test_connection() -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory db");
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .expect("enable foreign keys");
    migrate(&conn).expect("schema");
    conn
}
