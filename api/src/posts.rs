use std::str::FromStr;

use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension, Row};

use agora_shared::{MediaDto, PostDto, UserSummary};

use crate::error::{ApiError, ApiResult};
use crate::{db, media, tags, validate};

pub const PAGE_SIZE: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    New,
    Old,
    Top,
    Controversial,
}

impl FromStr for Order {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "old" => Ok(Self::Old),
            "top" => Ok(Self::Top),
            "controversial" => Ok(Self::Controversial),
            other => Err(ApiError::validation(format!("unknown order {other:?}"))),
        }
    }
}

impl Order {
    fn sql(self) -> &'static str {
        match self {
            Self::New => "p.created_at DESC, p.id DESC",
            Self::Old => "p.created_at ASC, p.id DESC",
            Self::Top => "(COALESCE(v.up, 0) - COALESCE(v.down, 0)) DESC, p.id DESC",
            Self::Controversial => {
                "CAST(MIN(COALESCE(v.up, 0), COALESCE(v.down, 0)) AS REAL)
                    / MAX(COALESCE(v.up, 0), COALESCE(v.down, 0), 1) DESC, p.id DESC"
            }
        }
    }
}

/// Validated input for a new post.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub medias: Vec<i64>,
    pub tags: Vec<i64>,
}

impl NewPost {
    pub fn new(title: &str, content: &str, medias: Vec<i64>, tags: Vec<i64>) -> ApiResult<Self> {
        Ok(Self {
            title: validate::title(title)?,
            content: validate::content(content)?,
            medias,
            tags,
        })
    }
}

/// Creates a post. Media are claimed in the same transaction and any failure
/// there undoes everything. Tags are attached afterwards one by one: the
/// first tag that does not belong to the thread stops the loop, but the post
/// and the tags attached before it are kept.
pub fn create(conn: &mut Connection, thread_id: i64, author_id: i64, post: &NewPost) -> ApiResult<i64> {
    let tx = db::write_tx(conn)?;
    tx.execute(
        "INSERT INTO posts (thread_id, user_id, title, content) VALUES (?1, ?2, ?3, ?4)",
        params![thread_id, author_id, post.title, post.content],
    )?;
    let post_id = tx.last_insert_rowid();

    media::attach_to_post(&tx, post_id, &post.medias)?;

    let mut bad_tag = None;
    for &tag_id in &post.tags {
        let attached = tx.execute(
            "INSERT OR IGNORE INTO post_tags (post_id, tag_id)
             SELECT ?1, id FROM tags WHERE id = ?2 AND thread_id = ?3",
            params![post_id, tag_id, thread_id],
        )?;
        if attached == 0 && !has_tag(&tx, post_id, tag_id)? {
            bad_tag = Some(tag_id);
            break;
        }
    }
    tx.commit()?;

    tracing::info!(thread_id, post_id, author_id, "post created");
    match bad_tag {
        Some(tag_id) => {
            tracing::warn!(post_id, tag_id, "post created with an unknown tag");
            Err(ApiError::validation(format!("tag {tag_id} does not belong to this thread")))
        }
        None => Ok(post_id),
    }
}

fn has_tag(conn: &Connection, post_id: i64, tag_id: i64) -> ApiResult<bool> {
    let found = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM post_tags WHERE post_id = ?1 AND tag_id = ?2)",
        params![post_id, tag_id],
        |row| row.get(0),
    )?;
    Ok(found)
}

/// Author of a post, provided it lives in `thread_id`.
pub fn author_in_thread(conn: &Connection, thread_id: i64, post_id: i64) -> ApiResult<i64> {
    conn.query_row(
        "SELECT user_id FROM posts WHERE id = ?1 AND thread_id = ?2",
        params![post_id, thread_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| ApiError::not_found("message not found"))
}

/// Replaces title and content; media and tags are untouched.
pub fn edit(conn: &Connection, post_id: i64, title: &str, content: &str) -> ApiResult<()> {
    let title = validate::title(title)?;
    let content = validate::content(content)?;
    conn.execute(
        "UPDATE posts SET title = ?2, content = ?3 WHERE id = ?1",
        params![post_id, title, content],
    )?;
    Ok(())
}

/// Comments, votes, media links and tag links go with the post.
pub fn delete(conn: &Connection, post_id: i64) -> ApiResult<()> {
    conn.execute("DELETE FROM posts WHERE id = ?1", [post_id])?;
    tracing::info!(post_id, "post deleted");
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub offset: i64,
    pub order: Order,
    pub viewer: Option<i64>,
    /// Keep posts carrying any of these tag names.
    pub tag_names: Vec<String>,
    /// Keep posts by this author.
    pub author: Option<i64>,
}

/// Columns every post read selects. `?1` is the thread, `?2` the viewer.
const POST_SELECT: &str = "SELECT p.id, p.title, p.content, p.created_at, u.id, u.username, am.filename,
        COALESCE(v.up, 0), COALESCE(v.down, 0),
        COALESCE((SELECT value FROM post_votes WHERE post_id = p.id AND user_id = ?2), 0),
        (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id)
 FROM posts p
 JOIN users u ON u.id = p.user_id
 LEFT JOIN user_configs uc ON uc.user_id = u.id
 LEFT JOIN media_links am ON am.id = uc.avatar_media_id
 LEFT JOIN (SELECT post_id, SUM(value = 1) AS up, SUM(value = -1) AS down
            FROM post_votes GROUP BY post_id) v ON v.post_id = p.id
 WHERE p.thread_id = ?1";

fn post_row(row: &Row<'_>) -> rusqlite::Result<PostDto> {
    Ok(PostDto {
        id: row.get(0)?,
        title: row.get(1)?,
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
        comment_count: row.get(10)?,
        tags: Vec::new(),
        medias: Vec::new(),
    })
}

fn attach(conn: &Connection, post: &mut PostDto) -> ApiResult<()> {
    post.tags = tags::for_post(conn, post.id)?;
    post.medias = medias(conn, post.id)?;
    Ok(())
}

pub fn list(conn: &Connection, thread_id: i64, query: &ListQuery) -> ApiResult<Vec<PostDto>> {
    let mut sql = String::from(POST_SELECT);
    let mut values = vec![
        Value::Integer(thread_id),
        query.viewer.map_or(Value::Null, Value::Integer),
    ];

    if let Some(author) = query.author {
        values.push(Value::Integer(author));
        sql.push_str(&format!(" AND p.user_id = ?{}", values.len()));
    }
    if !query.tag_names.is_empty() {
        let mut slots = Vec::with_capacity(query.tag_names.len());
        for name in &query.tag_names {
            values.push(Value::Text(name.clone()));
            slots.push(format!("?{}", values.len()));
        }
        sql.push_str(&format!(
            " AND EXISTS (SELECT 1 FROM post_tags pt JOIN tags t ON t.id = pt.tag_id
                          WHERE pt.post_id = p.id AND t.name IN ({}))",
            slots.join(", ")
        ));
    }

    values.push(Value::Integer(PAGE_SIZE));
    let limit = values.len();
    values.push(Value::Integer(query.offset));
    let offset = values.len();
    sql.push_str(&format!(
        " ORDER BY {} LIMIT ?{limit} OFFSET ?{offset}",
        query.order.sql()
    ));

    let mut stmt = conn.prepare(&sql)?;
    let mut posts = stmt
        .query_map(params_from_iter(values), post_row)?
        .collect::<Result<Vec<_>, _>>()?;

    for post in &mut posts {
        attach(conn, post)?;
    }
    Ok(posts)
}

/// One post with the viewer's vote, 404 when it is not in this thread.
pub fn get(conn: &Connection, thread_id: i64, post_id: i64, viewer: Option<i64>) -> ApiResult<PostDto> {
    let sql = format!("{POST_SELECT} AND p.id = ?3");
    let mut post = conn
        .query_row(&sql, params![thread_id, viewer, post_id], post_row)
        .optional()?
        .ok_or_else(|| ApiError::not_found("message not found"))?;
    attach(conn, &mut post)?;
    Ok(post)
}

fn medias(conn: &Connection, post_id: i64) -> ApiResult<Vec<MediaDto>> {
    let mut stmt = conn.prepare(
        "SELECT id, filename FROM media_links WHERE post_id = ?1 ORDER BY ordinal, id",
    )?;
    let medias = stmt
        .query_map([post_id], |row| {
            Ok(MediaDto {
                id: row.get(0)?,
                url: media::url_for(&row.get::<_, String>(1)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(medias)
}
