use axum::{extract::State, http::HeaderMap, Json};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{json, Value};

use agora_shared::{CreateThread, EditThreadConfig, ThreadInfo, ThreadSummary};

use crate::authz::{Rank, Visibility};
use crate::error::{ApiError, ApiResult};
use crate::{accounts, db, media, posts, session, validate, AppState};

#[derive(Debug, Clone)]
pub struct ThreadRow {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    pub visibility: Visibility,
    pub created_at: String,
}

// ── Registry ──

/// Creates the thread, its configuration and the owner's membership in one
/// transaction.
pub fn create(
    conn: &mut Connection,
    owner_id: i64,
    name: &str,
    description: &str,
    visibility: Visibility,
) -> ApiResult<i64> {
    let tx = db::write_tx(conn)?;

    let exists: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM threads WHERE name = ?1)",
        [name],
        |row| row.get(0),
    )?;
    if exists {
        return Err(ApiError::conflict("a thread with this name already exists"));
    }

    tx.execute(
        "INSERT INTO threads (name, owner_id) VALUES (?1, ?2)",
        params![name, owner_id],
    )?;
    let id = tx.last_insert_rowid();
    tx.execute(
        "INSERT INTO thread_configs (thread_id, description, open_to_non_members, open_to_anonymous)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            id,
            description,
            visibility.open_to_non_members,
            visibility.open_to_anonymous
        ],
    )?;
    tx.execute(
        "INSERT INTO thread_members (thread_id, user_id, rank) VALUES (?1, ?2, ?3)",
        params![id, owner_id, Rank::Owner.as_i64()],
    )?;
    tx.commit()?;

    tracing::info!(thread_id = id, name, owner_id, "thread created");
    Ok(id)
}

/// Exact, case-sensitive lookup.
pub fn by_name(conn: &Connection, name: &str) -> ApiResult<Option<ThreadRow>> {
    let thread = conn
        .query_row(
            "SELECT t.id, t.name, t.owner_id, c.open_to_non_members, c.open_to_anonymous, t.created_at
             FROM threads t
             JOIN thread_configs c ON c.thread_id = t.id
             WHERE t.name = ?1",
            [name],
            |row| {
                Ok(ThreadRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    owner_id: row.get(2)?,
                    visibility: Visibility {
                        open_to_non_members: row.get(3)?,
                        open_to_anonymous: row.get(4)?,
                    },
                    created_at: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(thread)
}

pub fn require_by_name(conn: &Connection, name: &str) -> ApiResult<ThreadRow> {
    by_name(conn, name)?.ok_or_else(|| ApiError::not_found("thread not found"))
}

pub fn rank_of(conn: &Connection, thread_id: i64, user_id: i64) -> ApiResult<Rank> {
    let raw: Option<i64> = conn
        .query_row(
            "SELECT rank FROM thread_members WHERE thread_id = ?1 AND user_id = ?2",
            params![thread_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        None => Ok(Rank::None),
        Some(value) => Rank::from_i64(value)
            .ok_or_else(|| ApiError::internal(format!("corrupt rank {value} in thread {thread_id}"))),
    }
}

// ── Membership ──

pub fn join(conn: &mut Connection, thread_id: i64, user_id: i64) -> ApiResult<()> {
    let tx = db::write_tx(conn)?;
    match rank_of(&tx, thread_id, user_id)? {
        Rank::Banned => return Err(ApiError::forbidden("you are banned from this thread")),
        rank if rank.is_member() => return Err(ApiError::conflict("already a member")),
        _ => {}
    }
    tx.execute(
        "INSERT INTO thread_members (thread_id, user_id, rank) VALUES (?1, ?2, ?3)",
        params![thread_id, user_id, Rank::Member.as_i64()],
    )?;
    tx.commit()?;
    tracing::info!(thread_id, user_id, "member joined");
    Ok(())
}

pub fn leave(conn: &mut Connection, thread: &ThreadRow, user_id: i64) -> ApiResult<()> {
    if thread.owner_id == user_id {
        return Err(ApiError::validation("the owner cannot leave their thread"));
    }
    let tx = db::write_tx(conn)?;
    match rank_of(&tx, thread.id, user_id)? {
        Rank::Banned => return Err(ApiError::forbidden("you are banned from this thread")),
        rank if !rank.is_member() => return Err(ApiError::validation("not a member")),
        _ => {}
    }
    tx.execute(
        "DELETE FROM thread_members WHERE thread_id = ?1 AND user_id = ?2",
        params![thread.id, user_id],
    )?;
    tx.commit()?;
    tracing::info!(thread_id = thread.id, user_id, "member left");
    Ok(())
}

/// Bans `target_id`. Banning twice is a no-op; the owner and the caller
/// themselves cannot be banned.
pub fn ban(conn: &mut Connection, thread: &ThreadRow, by: i64, target_id: i64) -> ApiResult<()> {
    if by == target_id {
        return Err(ApiError::validation("you cannot ban yourself"));
    }
    if target_id == thread.owner_id {
        return Err(ApiError::forbidden("the owner cannot be banned"));
    }
    let tx = db::write_tx(conn)?;
    if rank_of(&tx, thread.id, by)? < Rank::Moderator {
        return Err(ApiError::forbidden("moderators only"));
    }
    tx.execute(
        "INSERT INTO thread_members (thread_id, user_id, rank) VALUES (?1, ?2, ?3)
         ON CONFLICT(thread_id, user_id) DO UPDATE SET rank = excluded.rank",
        params![thread.id, target_id, Rank::Banned.as_i64()],
    )?;
    tx.commit()?;
    tracing::info!(thread_id = thread.id, by, target_id, "user banned");
    Ok(())
}

/// Moves a member between member and moderator. The owner row never changes.
pub fn set_moderator(
    conn: &mut Connection,
    thread: &ThreadRow,
    target_id: i64,
    moderator: bool,
) -> ApiResult<()> {
    if target_id == thread.owner_id {
        return Err(ApiError::validation("the owner's rank cannot change"));
    }
    let tx = db::write_tx(conn)?;
    let (from, to) = if moderator {
        (Rank::Member, Rank::Moderator)
    } else {
        (Rank::Moderator, Rank::Member)
    };
    let current = rank_of(&tx, thread.id, target_id)?;
    if current != from {
        return Err(ApiError::validation(format!("user is {current}, expected {from}")));
    }
    tx.execute(
        "UPDATE thread_members SET rank = ?3 WHERE thread_id = ?1 AND user_id = ?2",
        params![thread.id, target_id, to.as_i64()],
    )?;
    tx.commit()?;
    tracing::info!(thread_id = thread.id, target_id, rank = %to, "rank changed");
    Ok(())
}

// ── Configuration ──

/// All requested fields change together or not at all.
pub fn edit_config(conn: &mut Connection, thread_id: i64, edit: &EditThreadConfig) -> ApiResult<()> {
    let description = edit
        .description
        .as_deref()
        .map(validate::description)
        .transpose()?;

    let tx = db::write_tx(conn)?;
    if let Some(description) = description {
        tx.execute(
            "UPDATE thread_configs SET description = ?2 WHERE thread_id = ?1",
            params![thread_id, description],
        )?;
    }
    if let Some(open) = edit.open_to_non_members {
        tx.execute(
            "UPDATE thread_configs SET open_to_non_members = ?2 WHERE thread_id = ?1",
            params![thread_id, open],
        )?;
    }
    if let Some(open) = edit.open_to_anonymous {
        tx.execute(
            "UPDATE thread_configs SET open_to_anonymous = ?2 WHERE thread_id = ?1",
            params![thread_id, open],
        )?;
    }
    tx.commit()?;
    Ok(())
}

pub fn set_icon(conn: &Connection, thread_id: i64, media_id: i64) -> ApiResult<()> {
    conn.execute(
        "UPDATE thread_configs SET icon_media_id = ?2 WHERE thread_id = ?1",
        params![thread_id, media_id],
    )?;
    Ok(())
}

pub fn set_banner(conn: &Connection, thread_id: i64, media_id: i64) -> ApiResult<()> {
    conn.execute(
        "UPDATE thread_configs SET banner_media_id = ?2 WHERE thread_id = ?1",
        params![thread_id, media_id],
    )?;
    Ok(())
}

pub fn info(conn: &Connection, thread: &ThreadRow, viewer_rank: Rank) -> ApiResult<ThreadInfo> {
    let (description, icon, banner, member_count) = conn.query_row(
        "SELECT c.description, i.filename, b.filename,
                (SELECT COUNT(*) FROM thread_members m WHERE m.thread_id = c.thread_id AND m.rank > 0)
         FROM thread_configs c
         LEFT JOIN media_links i ON i.id = c.icon_media_id
         LEFT JOIN media_links b ON b.id = c.banner_media_id
         WHERE c.thread_id = ?1",
        [thread.id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
            ))
        },
    )?;

    Ok(ThreadInfo {
        id: thread.id,
        name: thread.name.clone(),
        owner: accounts::summary(conn, thread.owner_id)?,
        description,
        open_to_non_members: thread.visibility.open_to_non_members,
        open_to_anonymous: thread.visibility.open_to_anonymous,
        icon_url: icon.map(|f| media::url_for(&f)),
        banner_url: banner.map(|f| media::url_for(&f)),
        member_count,
        viewer_rank: viewer_rank.as_i64(),
        created_at: thread.created_at.clone(),
    })
}

// ── Directory ──

/// `?1` is the user whose rank each row carries.
const SUMMARY_SELECT: &str = "SELECT t.id, t.name, c.description, i.filename,
        (SELECT COUNT(*) FROM thread_members m WHERE m.thread_id = t.id AND m.rank > 0),
        COALESCE((SELECT r.rank FROM thread_members r WHERE r.thread_id = t.id AND r.user_id = ?1), 0)
 FROM threads t
 JOIN thread_configs c ON c.thread_id = t.id
 LEFT JOIN media_links i ON i.id = c.icon_media_id";

fn summary_row(row: &Row<'_>) -> rusqlite::Result<ThreadSummary> {
    Ok(ThreadSummary {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        icon_url: row.get::<_, Option<String>>(3)?.map(|f| media::url_for(&f)),
        member_count: row.get(4)?,
        rank: row.get(5)?,
    })
}

/// Every thread, newest first, a page at a time.
pub fn directory(conn: &Connection, offset: i64, viewer: Option<i64>) -> ApiResult<Vec<ThreadSummary>> {
    let mut stmt = conn.prepare(&format!(
        "{SUMMARY_SELECT} ORDER BY t.created_at DESC, t.id DESC LIMIT ?2 OFFSET ?3"
    ))?;
    let rows = stmt
        .query_map(params![viewer, posts::PAGE_SIZE, offset], summary_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Threads the user owns, moderates or has joined.
pub fn of_user(conn: &Connection, user_id: i64) -> ApiResult<Vec<ThreadSummary>> {
    let mut stmt = conn.prepare(&format!(
        "{SUMMARY_SELECT}
         WHERE t.id IN (SELECT thread_id FROM thread_members WHERE user_id = ?1 AND rank > 0)
         ORDER BY t.name"
    ))?;
    let rows = stmt
        .query_map([user_id], summary_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Handlers ──

/// POST /api/threads
pub async fn create_thread(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateThread>,
) -> ApiResult<Json<Value>> {
    let email = session::email_from_headers(&headers, &state.config.session_secret);
    validate::thread_name(&payload.name)?;
    let description = validate::description(&payload.description)?;
    let visibility = Visibility {
        open_to_non_members: payload.open_to_non_members.unwrap_or(true),
        open_to_anonymous: payload.open_to_anonymous.unwrap_or(true),
    };

    let name = payload.name.clone();
    let id = db::run(&state.db, move |conn| {
        let viewer = session::require_verified(session::load_viewer(conn, email.as_deref())?)?;
        create(conn, viewer.id, &name, &description, visibility)
    })
    .await?;

    Ok(Json(json!({
        "status": "success",
        "threadId": id.to_string(),
        "name": payload.name,
    })))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::test_connection;

    pub(crate) const OPEN: Visibility = Visibility {
        open_to_non_members: true,
        open_to_anonymous: true,
    };

    pub(crate) fn user(conn: &Connection, username: &str) -> i64 {
        conn.execute(
            "INSERT INTO users (email, username, first_name, last_name, verified)
             VALUES (?1, ?2, 'First', 'Last', 1)",
            params![format!("{username}@example.org"), username],
        )
        .unwrap();
        let id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO user_configs (user_id, lang, theme) VALUES (?1, 'en', 'light')",
            [id],
        )
        .unwrap();
        id
    }

    pub(crate) fn thread(conn: &mut Connection, owner: i64, name: &str) -> ThreadRow {
        create(conn, owner, name, "", OPEN).unwrap();
        by_name(conn, name).unwrap().unwrap()
    }

    fn owner_rows(conn: &Connection, thread_id: i64) -> Vec<i64> {
        let mut stmt = conn
            .prepare("SELECT user_id FROM thread_members WHERE thread_id = ?1 AND rank = 3")
            .unwrap();
        stmt.query_map([thread_id], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn creation_installs_exactly_one_owner() {
        let mut conn = test_connection();
        let owner = user(&conn, "olga");
        let t = thread(&mut conn, owner, "general");
        assert_eq!(owner_rows(&conn, t.id), vec![owner]);
        assert_eq!(t.owner_id, owner);
        assert_eq!(rank_of(&conn, t.id, owner).unwrap(), Rank::Owner);
    }

    #[test]
    fn names_are_unique_and_case_sensitive() {
        let mut conn = test_connection();
        let owner = user(&conn, "olga");
        thread(&mut conn, owner, "general");
        assert!(matches!(
            create(&mut conn, owner, "general", "", OPEN),
            Err(ApiError::Conflict(_))
        ));
        assert!(by_name(&conn, "General").unwrap().is_none());
    }

    #[test]
    fn join_and_leave() {
        let mut conn = test_connection();
        let owner = user(&conn, "olga");
        let member = user(&conn, "mike");
        let t = thread(&mut conn, owner, "general");

        join(&mut conn, t.id, member).unwrap();
        assert!(matches!(join(&mut conn, t.id, member), Err(ApiError::Conflict(_))));
        leave(&mut conn, &t, member).unwrap();
        assert_eq!(rank_of(&conn, t.id, member).unwrap(), Rank::None);
        assert!(matches!(leave(&mut conn, &t, member), Err(ApiError::Validation(_))));
    }

    #[test]
    fn owner_cannot_leave_or_be_banned() {
        let mut conn = test_connection();
        let owner = user(&conn, "olga");
        let moderator = user(&conn, "max");
        let t = thread(&mut conn, owner, "general");
        join(&mut conn, t.id, moderator).unwrap();
        set_moderator(&mut conn, &t, moderator, true).unwrap();

        assert!(leave(&mut conn, &t, owner).is_err());
        assert!(ban(&mut conn, &t, moderator, owner).is_err());
        assert!(ban(&mut conn, &t, owner, owner).is_err());
        assert_eq!(rank_of(&conn, t.id, owner).unwrap(), Rank::Owner);
        assert_eq!(owner_rows(&conn, t.id), vec![owner]);
    }

    #[test]
    fn ban_is_idempotent_and_blocks_rejoining() {
        let mut conn = test_connection();
        let owner = user(&conn, "olga");
        let member = user(&conn, "mike");
        let t = thread(&mut conn, owner, "general");
        join(&mut conn, t.id, member).unwrap();

        ban(&mut conn, &t, owner, member).unwrap();
        ban(&mut conn, &t, owner, member).unwrap();
        assert_eq!(rank_of(&conn, t.id, member).unwrap(), Rank::Banned);
        assert!(matches!(join(&mut conn, t.id, member), Err(ApiError::Forbidden(_))));
    }

    #[test]
    fn members_cannot_ban() {
        let mut conn = test_connection();
        let owner = user(&conn, "olga");
        let a = user(&conn, "anna");
        let b = user(&conn, "bert");
        let t = thread(&mut conn, owner, "general");
        join(&mut conn, t.id, a).unwrap();
        join(&mut conn, t.id, b).unwrap();
        assert!(matches!(ban(&mut conn, &t, a, b), Err(ApiError::Forbidden(_))));
        assert_eq!(rank_of(&conn, t.id, b).unwrap(), Rank::Member);
    }

    #[test]
    fn promotion_round_trip() {
        let mut conn = test_connection();
        let owner = user(&conn, "olga");
        let member = user(&conn, "mike");
        let t = thread(&mut conn, owner, "general");
        join(&mut conn, t.id, member).unwrap();

        set_moderator(&mut conn, &t, member, true).unwrap();
        assert_eq!(rank_of(&conn, t.id, member).unwrap(), Rank::Moderator);
        assert!(set_moderator(&mut conn, &t, member, true).is_err());
        set_moderator(&mut conn, &t, member, false).unwrap();
        assert_eq!(rank_of(&conn, t.id, member).unwrap(), Rank::Member);
        assert!(set_moderator(&mut conn, &t, owner, false).is_err());
    }

    #[test]
    fn config_edits_show_in_info() {
        let mut conn = test_connection();
        let owner = user(&conn, "olga");
        let t = thread(&mut conn, owner, "general");
        edit_config(
            &mut conn,
            t.id,
            &EditThreadConfig {
                description: Some("All things".into()),
                open_to_non_members: Some(false),
                open_to_anonymous: None,
            },
        )
        .unwrap();
        let t = by_name(&conn, "general").unwrap().unwrap();
        let info = info(&conn, &t, Rank::Owner).unwrap();
        assert_eq!(info.description, "All things");
        assert!(!info.open_to_non_members);
        assert!(info.open_to_anonymous);
        assert_eq!(info.member_count, 1);
        assert_eq!(info.owner.username, "olga");
        assert_eq!(info.viewer_rank, 3);
    }

    #[test]
    fn config_edits_are_all_or_nothing() {
        let mut conn = test_connection();
        let owner = user(&conn, "olga");
        let t = thread(&mut conn, owner, "general");
        conn.execute_batch(
            "CREATE TRIGGER no_anonymous BEFORE UPDATE OF open_to_anonymous ON thread_configs
             WHEN NEW.open_to_anonymous = 0
             BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
        )
        .unwrap();

        let edit = EditThreadConfig {
            description: Some("Changed".into()),
            open_to_non_members: Some(false),
            open_to_anonymous: Some(false),
        };
        assert!(edit_config(&mut conn, t.id, &edit).is_err());

        let t = by_name(&conn, "general").unwrap().unwrap();
        let info = info(&conn, &t, Rank::Owner).unwrap();
        assert_eq!(info.description, "");
        assert!(info.open_to_non_members);
        assert!(info.open_to_anonymous);

        let too_long = EditThreadConfig {
            description: Some("x".repeat(501)),
            open_to_non_members: Some(false),
            open_to_anonymous: None,
        };
        assert!(matches!(
            edit_config(&mut conn, t.id, &too_long),
            Err(ApiError::Validation(_))
        ));
        assert!(by_name(&conn, "general").unwrap().unwrap().visibility.open_to_non_members);
    }

    #[test]
    fn directory_pages_and_user_threads() {
        let mut conn = test_connection();
        let owner = user(&conn, "olga");
        let member = user(&conn, "mike");
        let general = thread(&mut conn, owner, "general");
        let offtopic = thread(&mut conn, owner, "offtopic");
        join(&mut conn, offtopic.id, member).unwrap();

        let rows = directory(&conn, 0, Some(member)).unwrap();
        let names: Vec<_> = rows.iter().map(|r| (r.name.as_str(), r.rank, r.member_count)).collect();
        assert_eq!(names, vec![("offtopic", 1, 2), ("general", 0, 1)]);
        assert_eq!(directory(&conn, 1, None).unwrap().len(), 1);
        assert!(directory(&conn, 0, None).unwrap().iter().all(|r| r.rank == 0));

        let mine: Vec<_> = of_user(&conn, owner).unwrap().into_iter().map(|r| (r.name, r.rank)).collect();
        assert_eq!(mine, vec![("general".to_string(), 3), ("offtopic".to_string(), 3)]);
        assert_eq!(of_user(&conn, member).unwrap().len(), 1);

        ban(&mut conn, &general, owner, member).unwrap();
        ban(&mut conn, &offtopic, owner, member).unwrap();
        assert!(of_user(&conn, member).unwrap().is_empty());
    }
}
