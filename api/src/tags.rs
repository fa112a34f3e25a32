use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use agora_shared::TagDto;

use crate::error::{ApiError, ApiResult};
use crate::{db, validate};

fn name_taken(conn: &Connection, thread_id: i64, name: &str, except: i64) -> ApiResult<bool> {
    let taken = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM tags WHERE thread_id = ?1 AND name = ?2 AND id != ?3)",
        params![thread_id, name, except],
        |row| row.get(0),
    )?;
    Ok(taken)
}

/// The UNIQUE(thread_id, name) index is the last word on duplicates.
fn duplicate_name(err: rusqlite::Error) -> ApiError {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            ApiError::conflict("tag already exists")
        }
        other => other.into(),
    }
}

pub fn create(conn: &mut Connection, thread_id: i64, name: &str, color: &str) -> ApiResult<TagDto> {
    validate::tag_name(name)?;
    validate::tag_color(color)?;

    let tx = db::write_tx(conn)?;
    if name_taken(&tx, thread_id, name, 0)? {
        return Err(ApiError::conflict("tag already exists"));
    }
    tx.execute(
        "INSERT INTO tags (thread_id, name, color) VALUES (?1, ?2, ?3)",
        params![thread_id, name, color],
    )
    .map_err(duplicate_name)?;
    let id = tx.last_insert_rowid();
    tx.commit()?;
    Ok(TagDto {
        id,
        name: name.to_string(),
        color: color.to_string(),
    })
}

pub fn get(conn: &Connection, thread_id: i64, tag_id: i64) -> ApiResult<TagDto> {
    conn.query_row(
        "SELECT id, name, color FROM tags WHERE id = ?1 AND thread_id = ?2",
        params![tag_id, thread_id],
        |row| {
            Ok(TagDto {
                id: row.get(0)?,
                name: row.get(1)?,
                color: row.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| ApiError::not_found("tag not found"))
}

/// Post-tag rows go with it through the foreign key cascade.
pub fn delete(conn: &Connection, thread_id: i64, tag_id: i64) -> ApiResult<()> {
    let removed = conn.execute(
        "DELETE FROM tags WHERE id = ?1 AND thread_id = ?2",
        params![tag_id, thread_id],
    )?;
    if removed == 0 {
        return Err(ApiError::not_found("tag not found"));
    }
    Ok(())
}

/// Empty strings count as "leave unchanged".
pub fn update(
    conn: &mut Connection,
    thread_id: i64,
    tag_id: i64,
    name: Option<&str>,
    color: Option<&str>,
) -> ApiResult<TagDto> {
    let name = name.filter(|n| !n.is_empty());
    let color = color.filter(|c| !c.is_empty());
    if name.is_none() && color.is_none() {
        return Err(ApiError::validation("nothing to update"));
    }

    if let Some(name) = name {
        validate::tag_name(name)?;
    }
    if let Some(color) = color {
        validate::tag_color(color)?;
    }

    let tx = db::write_tx(conn)?;
    let current = get(&tx, thread_id, tag_id)?;
    if let Some(name) = name {
        if name_taken(&tx, thread_id, name, tag_id)? {
            return Err(ApiError::conflict("tag already exists"));
        }
    }

    let updated = TagDto {
        id: tag_id,
        name: name.map_or(current.name, |n| n.to_string()),
        color: color.map_or(current.color, |c| c.to_string()),
    };
    tx.execute(
        "UPDATE tags SET name = ?2, color = ?3 WHERE id = ?1",
        params![tag_id, updated.name, updated.color],
    )
    .map_err(duplicate_name)?;
    tx.commit()?;
    Ok(updated)
}

pub fn list(conn: &Connection, thread_id: i64) -> ApiResult<Vec<TagDto>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, color FROM tags WHERE thread_id = ?1 ORDER BY name, id",
    )?;
    let tags = stmt
        .query_map([thread_id], |row| {
            Ok(TagDto {
                id: row.get(0)?,
                name: row.get(1)?,
                color: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tags)
}

/// Tags attached to one post.
pub fn for_post(conn: &Connection, post_id: i64) -> ApiResult<Vec<TagDto>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.name, t.color
         FROM post_tags pt JOIN tags t ON t.id = pt.tag_id
         WHERE pt.post_id = ?1
         ORDER BY t.name, t.id",
    )?;
    let tags = stmt
        .query_map([post_id], |row| {
            Ok(TagDto {
                id: row.get(0)?,
                name: row.get(1)?,
                color: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tags)
}
