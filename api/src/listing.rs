//! Read endpoints: thread contents under `/api/thread/*`, the thread
//! directory and public profiles. The viewer is optional; when present
//! listings carry their personal vote or rank on every row.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use rusqlite::Connection;
use serde::Deserialize;

use agora_shared::{CommentDto, PostDto, PublicProfile, ReportDto, TagDto, ThreadInfo, ThreadSummary};

use crate::authz::{Access, Rank};
use crate::error::{ApiError, ApiResult};
use crate::posts::{ListQuery, Order};
use crate::session::{self, Viewer};
use crate::threads::{self, ThreadRow};
use crate::{accounts, comments, db, posts, reports, tags, AppState};

#[derive(Debug, Deserialize)]
pub struct ThreadQuery {
    #[serde(default)]
    thread: String,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(default)]
    thread: String,
    offset: Option<String>,
    order: Option<String>,
    /// Author username.
    viewfrom: Option<String>,
    /// JSON array of tag names.
    tags: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default)]
    thread: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
pub struct DirectoryQuery {
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommentsQuery {
    #[serde(default)]
    thread: String,
    #[serde(default)]
    message: String,
    offset: Option<String>,
}

/// A resolved reader: who they are and what they may see.
struct Reader {
    thread: ThreadRow,
    viewer: Option<Viewer>,
    access: Access,
}

fn open_thread(conn: &Connection, name: &str, email: Option<&str>) -> ApiResult<Reader> {
    if name.is_empty() {
        return Err(ApiError::validation("thread is required"));
    }
    let thread = threads::require_by_name(conn, name)?;
    let viewer = session::load_viewer(conn, email)?;
    let rank = match &viewer {
        Some(v) => threads::rank_of(conn, thread.id, v.id)?,
        None => Rank::None,
    };
    if rank.is_banned() {
        return Err(ApiError::forbidden("you are banned from this thread"));
    }
    let access = Access::new(viewer.as_ref().map(Viewer::actor), rank, thread.visibility);
    if !access.can_read() {
        return Err(match viewer {
            None => ApiError::unauthorized("login required to read this thread"),
            Some(_) => ApiError::forbidden("members only"),
        });
    }
    Ok(Reader {
        thread,
        viewer,
        access,
    })
}

fn parse_offset(raw: Option<&str>) -> ApiResult<i64> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(0),
        Some(s) => match s.parse::<i64>() {
            Ok(n) if n >= 0 => Ok(n),
            _ => Err(ApiError::validation("offset must be a non-negative number")),
        },
    }
}

fn parse_message(raw: &str) -> ApiResult<i64> {
    match raw.trim().parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ApiError::validation("message is required")),
    }
}

/// GET /api/thread/messages?thread=&offset=&order=&viewfrom=&tags=
pub async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<MessagesQuery>,
) -> ApiResult<Json<Vec<PostDto>>> {
    let email = session::email_from_headers(&headers, &state.config.session_secret);
    let offset = parse_offset(q.offset.as_deref())?;
    let order = match q.order.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => raw.parse::<Order>()?,
        None => Order::default(),
    };
    let tag_names = match q.tags.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => serde_json::from_str::<Vec<String>>(raw)
            .map_err(|_| ApiError::validation("tags must be a JSON array of names"))?,
        None => Vec::new(),
    };

    let posts = db::run(&state.db, move |conn| {
        let reader = open_thread(conn, &q.thread, email.as_deref())?;
        let author = match q.viewfrom.as_deref().filter(|s| !s.is_empty()) {
            Some(username) => Some(
                accounts::id_by_username(conn, username)?
                    .ok_or_else(|| ApiError::not_found("user not found"))?,
            ),
            None => None,
        };
        let query = ListQuery {
            offset,
            order,
            viewer: reader.viewer.as_ref().map(|v| v.id),
            tag_names,
            author,
        };
        posts::list(conn, reader.thread.id, &query)
    })
    .await?;

    Ok(Json(posts))
}

/// GET /api/thread/message?thread=&message=
pub async fn get_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<MessageQuery>,
) -> ApiResult<Json<PostDto>> {
    let email = session::email_from_headers(&headers, &state.config.session_secret);
    let post_id = parse_message(&q.message)?;
    let post = db::run(&state.db, move |conn| {
        let reader = open_thread(conn, &q.thread, email.as_deref())?;
        posts::get(conn, reader.thread.id, post_id, reader.viewer.as_ref().map(|v| v.id))
    })
    .await?;
    Ok(Json(post))
}

/// GET /api/thread/comments?thread=&message=&offset=
pub async fn list_comments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<CommentsQuery>,
) -> ApiResult<Json<Vec<CommentDto>>> {
    let email = session::email_from_headers(&headers, &state.config.session_secret);
    let offset = parse_offset(q.offset.as_deref())?;
    let post_id = parse_message(&q.message)?;

    let comments = db::run(&state.db, move |conn| {
        let reader = open_thread(conn, &q.thread, email.as_deref())?;
        posts::author_in_thread(conn, reader.thread.id, post_id)?;
        comments::list(conn, post_id, offset, reader.viewer.as_ref().map(|v| v.id))
    })
    .await?;

    Ok(Json(comments))
}

/// GET /api/thread/tags?thread=
pub async fn list_tags(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ThreadQuery>,
) -> ApiResult<Json<Vec<TagDto>>> {
    let email = session::email_from_headers(&headers, &state.config.session_secret);
    let tags = db::run(&state.db, move |conn| {
        let reader = open_thread(conn, &q.thread, email.as_deref())?;
        tags::list(conn, reader.thread.id)
    })
    .await?;
    Ok(Json(tags))
}

/// GET /api/thread/info?thread=
pub async fn thread_info(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ThreadQuery>,
) -> ApiResult<Json<ThreadInfo>> {
    let email = session::email_from_headers(&headers, &state.config.session_secret);
    let info = db::run(&state.db, move |conn| {
        let reader = open_thread(conn, &q.thread, email.as_deref())?;
        threads::info(conn, &reader.thread, reader.access.rank)
    })
    .await?;
    Ok(Json(info))
}

/// GET /api/thread/reports?thread=
pub async fn list_reports(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ThreadQuery>,
) -> ApiResult<Json<Vec<ReportDto>>> {
    let email = session::email_from_headers(&headers, &state.config.session_secret);
    let reports = db::run(&state.db, move |conn| {
        let reader = open_thread(conn, &q.thread, email.as_deref())?;
        if reader.viewer.is_none() {
            return Err(ApiError::unauthorized("login required"));
        }
        if !reader.access.can_list_reports() {
            return Err(ApiError::forbidden("moderators only"));
        }
        reports::list(conn, reader.thread.id)
    })
    .await?;
    Ok(Json(reports))
}

/// GET /api/threads?offset=
pub async fn list_threads(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<DirectoryQuery>,
) -> ApiResult<Json<Vec<ThreadSummary>>> {
    let email = session::email_from_headers(&headers, &state.config.session_secret);
    let offset = parse_offset(q.offset.as_deref())?;
    let rows = db::run(&state.db, move |conn| {
        let viewer = session::load_viewer(conn, email.as_deref())?;
        threads::directory(conn, offset, viewer.map(|v| v.id))
    })
    .await?;
    Ok(Json(rows))
}

/// GET /api/user/{username}
pub async fn user_profile(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<PublicProfile>> {
    let profile = db::run(&state.db, move |conn| {
        let mut profile = accounts::public_profile(conn, &username)?;
        profile.threads = threads::of_user(conn, profile.id)?;
        Ok(profile)
    })
    .await?;
    Ok(Json(profile))
}
