use rusqlite::{params, Connection, OptionalExtension};

use agora_shared::{CommentDto, UserSummary};

use crate::error::{ApiError, ApiResult};
use crate::posts::PAGE_SIZE;
use crate::{media, validate};

pub fn create(conn: &Connection, post_id: i64, author_id: i64, content: &str) -> ApiResult<i64> {
    let content = validate::content(content)?;
    conn.execute(
        "INSERT INTO comments (post_id, user_id, content) VALUES (?1, ?2, ?3)",
        params![post_id, author_id, content],
    )?;
    let id = conn.last_insert_rowid();
    tracing::info!(post_id, comment_id = id, author_id, "comment created");
    Ok(id)
}

/// Author of a comment, provided it sits under a post of `thread_id`. When
/// `post_id` is given the comment must also belong to that post.
pub fn author_in_thread(
    conn: &Connection,
    thread_id: i64,
    comment_id: i64,
    post_id: Option<i64>,
) -> ApiResult<i64> {
    conn.query_row(
        "SELECT c.user_id
         FROM comments c JOIN posts p ON p.id = c.post_id
         WHERE c.id = ?1 AND p.thread_id = ?2 AND (?3 IS NULL OR c.post_id = ?3)",
        params![comment_id, thread_id, post_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| ApiError::not_found("comment not found"))
}

pub fn edit(conn: &Connection, comment_id: i64, content: &str) -> ApiResult<()> {
    let content = validate::content(content)?;
    conn.execute(
        "UPDATE comments SET content = ?2 WHERE id = ?1",
        params![comment_id, content],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, comment_id: i64) -> ApiResult<()> {
    conn.execute("DELETE FROM comments WHERE id = ?1", [comment_id])?;
    tracing::info!(comment_id, "comment deleted");
    Ok(())
}

/// Newest first, one page at `offset`.
pub fn list(conn: &Connection, post_id: i64, offset: i64, viewer: Option<i64>) -> ApiResult<Vec<CommentDto>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.post_id, c.content, c.created_at, u.id, u.username, am.filename,
                COALESCE((SELECT SUM(value = 1) FROM comment_votes WHERE comment_id = c.id), 0),
                COALESCE((SELECT SUM(value = -1) FROM comment_votes WHERE comment_id = c.id), 0),
                COALESCE((SELECT value FROM comment_votes WHERE comment_id = c.id AND user_id = ?2), 0)
         FROM comments c
         JOIN users u ON u.id = c.user_id
         LEFT JOIN user_configs uc ON uc.user_id = u.id
         LEFT JOIN media_links am ON am.id = uc.avatar_media_id
         WHERE c.post_id = ?1
         ORDER BY c.created_at DESC, c.id DESC
         LIMIT ?3 OFFSET ?4",
    )?;
    let comments = stmt
        .query_map(params![post_id, viewer, PAGE_SIZE, offset], |row| {
            Ok(CommentDto {
                id: row.get(0)?,
                post_id: row.get(1)?,
                content: row.get(2)?,
                created_at: row.get(3)?,
                author: UserSummary {
                    id: row.get(4)?,
                    username: row.get(5)?,
                    avatar_url: row.get::<_, Option<String>>(6)?.map(|f| media::url_for(&f)),
                },
                upvotes: row.get(7)?,
                downvotes: row.get(8)?,
                my_vote: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(comments)
}
