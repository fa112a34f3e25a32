//! `/api/thread/{name}/{action}`: every mutation scoped to one thread.

use std::str::FromStr;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, Method},
    Json,
};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use agora_shared::{
    CommentRef, CreateTag, EditComment, EditMessage, EditTag, EditThreadConfig, MessageRef,
    RemoveMedia, ReportContent, ReportRef, SendComment, SendMessage, TagRef, UserRef,
};

use crate::authz::Access;
use crate::error::{ApiError, ApiResult};
use crate::posts::NewPost;
use crate::reports::{ReportKind, SubjectKind};
use crate::session::{self, Viewer};
use crate::threads::{self, ThreadRow};
use crate::votes::{self, Subject, VoteAction};
use crate::{accounts, comments, db, media, posts, reports, tags, validate, AppState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadAction {
    SendMessage,
    EditMessage,
    DeleteMessage,
    RemoveMedia,
    ReportMessage,
    UpvoteMessage,
    DownvoteMessage,
    SendComment,
    EditComment,
    DeleteComment,
    UpvoteComment,
    DownvoteComment,
    ReportComment,
    JoinThread,
    LeaveThread,
    BanUser,
    PromoteUser,
    DemoteUser,
    SetReportToResolved,
    CreateThreadTag,
    DeleteThreadTag,
    EditThreadTag,
    GetThreadTags,
    EditThreadConfig,
}

impl FromStr for ThreadAction {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let action = match s {
            "sendMessage" => Self::SendMessage,
            "editMessage" => Self::EditMessage,
            "deleteMessage" => Self::DeleteMessage,
            "removeMedia" => Self::RemoveMedia,
            "reportMessage" => Self::ReportMessage,
            "upvoteMessage" => Self::UpvoteMessage,
            "downvoteMessage" => Self::DownvoteMessage,
            "sendComment" => Self::SendComment,
            "editComment" => Self::EditComment,
            "deleteComment" => Self::DeleteComment,
            "upvoteComment" => Self::UpvoteComment,
            "downvoteComment" => Self::DownvoteComment,
            "reportComment" => Self::ReportComment,
            "joinThread" => Self::JoinThread,
            "leaveThread" => Self::LeaveThread,
            "banUser" => Self::BanUser,
            "promoteUser" => Self::PromoteUser,
            "demoteUser" => Self::DemoteUser,
            "setReportToResolved" => Self::SetReportToResolved,
            "createThreadTag" => Self::CreateThreadTag,
            "deleteThreadTag" => Self::DeleteThreadTag,
            "editThreadTag" => Self::EditThreadTag,
            "getThreadTags" => Self::GetThreadTags,
            "editThreadConfig" => Self::EditThreadConfig,
            other => return Err(ApiError::not_found(format!("unknown action {other:?}"))),
        };
        Ok(action)
    }
}

/// Everything an action knows about its caller.
struct Ctx<'a> {
    thread: &'a ThreadRow,
    viewer: &'a Viewer,
    access: Access,
}

impl Ctx<'_> {
    fn require(&self, allowed: bool, msg: &str) -> ApiResult<()> {
        if allowed {
            Ok(())
        } else {
            Err(ApiError::forbidden(msg))
        }
    }

    fn require_write(&self) -> ApiResult<()> {
        self.require(self.access.can_write(), "you must be a member of this thread")
    }
}

fn success() -> Value {
    json!({ "status": "success" })
}

/// An empty body reads as `{}`.
fn parse<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}".as_slice()
    } else {
        body
    };
    serde_json::from_slice(body).map_err(|e| ApiError::validation(format!("invalid body: {e}")))
}

/// ANY /api/thread/{name}/{action}
#[tracing::instrument(skip_all, fields(thread = %name, action = %action))]
pub async fn thread_action(
    State(state): State<AppState>,
    Path((name, action)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let email = session::email_from_headers(&headers, &state.config.session_secret);

    let response = db::run(&state.db, move |conn| {
        let thread = threads::require_by_name(conn, &name)?;
        let action: ThreadAction = action.parse()?;
        if method != Method::POST {
            return Err(ApiError::MethodNotAllowed);
        }
        let viewer = session::require_verified(session::load_viewer(conn, email.as_deref())?)?;
        let rank = threads::rank_of(conn, thread.id, viewer.id)?;
        if rank.is_banned() {
            return Err(ApiError::forbidden("you are banned from this thread"));
        }

        let ctx = Ctx {
            thread: &thread,
            viewer: &viewer,
            access: Access::new(Some(viewer.actor()), rank, thread.visibility),
        };
        execute(conn, &ctx, action, &body)
    })
    .await?;

    Ok(Json(response))
}

fn execute(conn: &mut Connection, ctx: &Ctx<'_>, action: ThreadAction, body: &[u8]) -> ApiResult<Value> {
    match action {
        ThreadAction::SendMessage => send_message(conn, ctx, parse(body)?),
        ThreadAction::EditMessage => edit_message(conn, ctx, parse(body)?),
        ThreadAction::DeleteMessage => delete_message(conn, ctx, parse(body)?),
        ThreadAction::RemoveMedia => remove_media(conn, ctx, parse(body)?),
        ThreadAction::ReportMessage => report(conn, ctx, SubjectKind::Post, parse(body)?),
        ThreadAction::UpvoteMessage => vote_message(conn, ctx, parse(body)?, VoteAction::Up),
        ThreadAction::DownvoteMessage => vote_message(conn, ctx, parse(body)?, VoteAction::Down),
        ThreadAction::SendComment => send_comment(conn, ctx, parse(body)?),
        ThreadAction::EditComment => edit_comment(conn, ctx, parse(body)?),
        ThreadAction::DeleteComment => delete_comment(conn, ctx, parse(body)?),
        ThreadAction::UpvoteComment => vote_comment(conn, ctx, parse(body)?, VoteAction::Up),
        ThreadAction::DownvoteComment => vote_comment(conn, ctx, parse(body)?, VoteAction::Down),
        ThreadAction::ReportComment => report(conn, ctx, SubjectKind::Comment, parse(body)?),
        ThreadAction::JoinThread => {
            threads::join(conn, ctx.thread.id, ctx.viewer.id)?;
            Ok(success())
        }
        ThreadAction::LeaveThread => {
            threads::leave(conn, ctx.thread, ctx.viewer.id)?;
            Ok(success())
        }
        ThreadAction::BanUser => ban_user(conn, ctx, parse(body)?),
        ThreadAction::PromoteUser => set_moderator(conn, ctx, parse(body)?, true),
        ThreadAction::DemoteUser => set_moderator(conn, ctx, parse(body)?, false),
        ThreadAction::SetReportToResolved => resolve_report(conn, ctx, parse(body)?),
        ThreadAction::CreateThreadTag => create_tag(conn, ctx, parse(body)?),
        ThreadAction::DeleteThreadTag => delete_tag(conn, ctx, parse(body)?),
        ThreadAction::EditThreadTag => edit_tag(conn, ctx, parse(body)?),
        ThreadAction::GetThreadTags => {
            ctx.require(ctx.access.can_read(), "you cannot read this thread")?;
            Ok(json!({ "status": "success", "tags": tags::list(conn, ctx.thread.id)? }))
        }
        ThreadAction::EditThreadConfig => edit_config(conn, ctx, parse(body)?),
    }
}

// ── Posts ──

fn send_message(conn: &mut Connection, ctx: &Ctx<'_>, msg: SendMessage) -> ApiResult<Value> {
    ctx.require_write()?;
    if msg.medias.iter().chain(&msg.tags).any(|&id| id <= 0) {
        return Err(ApiError::validation("ids must be positive"));
    }
    let post = NewPost::new(&msg.title, &msg.content, msg.medias, msg.tags)?;
    let id = posts::create(conn, ctx.thread.id, ctx.viewer.id, &post)?;
    Ok(json!({ "status": "success", "messageId": id.to_string() }))
}

fn edit_message(conn: &mut Connection, ctx: &Ctx<'_>, msg: EditMessage) -> ApiResult<Value> {
    let post_id = validate::id(msg.message_id, "messageId")?;
    let author = posts::author_in_thread(conn, ctx.thread.id, post_id)?;
    ctx.require(ctx.access.can_edit_post(author), "you cannot edit this message")?;
    posts::edit(conn, post_id, &msg.title, &msg.content)?;
    Ok(success())
}

fn delete_message(conn: &mut Connection, ctx: &Ctx<'_>, msg: MessageRef) -> ApiResult<Value> {
    let post_id = validate::id(msg.message_id, "messageId")?;
    let author = posts::author_in_thread(conn, ctx.thread.id, post_id)?;
    ctx.require(ctx.access.can_delete_post(author), "you cannot delete this message")?;
    posts::delete(conn, post_id)?;
    Ok(success())
}

fn remove_media(conn: &mut Connection, ctx: &Ctx<'_>, msg: RemoveMedia) -> ApiResult<Value> {
    let post_id = validate::id(msg.message_id, "messageId")?;
    let media_id = validate::id(msg.media_id, "mediaId")?;
    let author = posts::author_in_thread(conn, ctx.thread.id, post_id)?;
    ctx.require(ctx.access.can_edit_post(author), "you cannot edit this message")?;
    media::remove_from_post(conn, post_id, media_id)?;
    Ok(success())
}

fn vote_message(conn: &mut Connection, ctx: &Ctx<'_>, msg: MessageRef, action: VoteAction) -> ApiResult<Value> {
    let post_id = validate::id(msg.message_id, "messageId")?;
    posts::author_in_thread(conn, ctx.thread.id, post_id)?;
    ctx.require_write()?;
    let tally = votes::apply(conn, Subject::Post(post_id), ctx.viewer.id, action)?;
    Ok(json!({
        "status": "success",
        "upvotes": tally.upvotes,
        "downvotes": tally.downvotes,
        "myVote": tally.my_vote,
    }))
}

// ── Comments ──

fn send_comment(conn: &mut Connection, ctx: &Ctx<'_>, msg: SendComment) -> ApiResult<Value> {
    let post_id = validate::id(msg.message_id, "messageId")?;
    posts::author_in_thread(conn, ctx.thread.id, post_id)?;
    ctx.require_write()?;
    let id = comments::create(conn, post_id, ctx.viewer.id, &msg.content)?;
    Ok(json!({ "status": "success", "commentId": id.to_string() }))
}

fn comment_author(conn: &Connection, ctx: &Ctx<'_>, comment_id: i64, message_id: i64) -> ApiResult<i64> {
    let comment_id = validate::id(comment_id, "commentId")?;
    let post = (message_id > 0).then_some(message_id);
    comments::author_in_thread(conn, ctx.thread.id, comment_id, post)
}

fn edit_comment(conn: &mut Connection, ctx: &Ctx<'_>, msg: EditComment) -> ApiResult<Value> {
    let author = comment_author(conn, ctx, msg.comment_id, msg.message_id)?;
    ctx.require(ctx.access.can_edit_comment(author), "you cannot edit this comment")?;
    comments::edit(conn, msg.comment_id, &msg.content)?;
    Ok(success())
}

fn delete_comment(conn: &mut Connection, ctx: &Ctx<'_>, msg: CommentRef) -> ApiResult<Value> {
    let author = comment_author(conn, ctx, msg.comment_id, msg.message_id)?;
    ctx.require(ctx.access.can_delete_comment(author), "you cannot delete this comment")?;
    comments::delete(conn, msg.comment_id)?;
    Ok(success())
}

fn vote_comment(conn: &mut Connection, ctx: &Ctx<'_>, msg: CommentRef, action: VoteAction) -> ApiResult<Value> {
    comment_author(conn, ctx, msg.comment_id, msg.message_id)?;
    ctx.require_write()?;
    let tally = votes::apply(conn, Subject::Comment(msg.comment_id), ctx.viewer.id, action)?;
    Ok(json!({
        "status": "success",
        "upvotes": tally.upvotes,
        "downvotes": tally.downvotes,
        "myVote": tally.my_vote,
    }))
}

// ── Reports ──

fn report(conn: &mut Connection, ctx: &Ctx<'_>, subject: SubjectKind, msg: ReportContent) -> ApiResult<Value> {
    let subject_id = validate::id(msg.content_to_report_id, "contentToReportID")?;
    let kind: ReportKind = msg.report_type.parse()?;
    match subject {
        SubjectKind::Post => {
            posts::author_in_thread(conn, ctx.thread.id, subject_id)?;
        }
        SubjectKind::Comment => {
            comments::author_in_thread(conn, ctx.thread.id, subject_id, None)?;
        }
    }
    ctx.require_write()?;
    let id = reports::create(
        conn,
        ctx.thread.id,
        subject,
        subject_id,
        ctx.viewer.id,
        kind,
        &msg.content,
    )?;
    Ok(json!({ "status": "success", "reportId": id.to_string() }))
}

fn resolve_report(conn: &mut Connection, ctx: &Ctx<'_>, msg: ReportRef) -> ApiResult<Value> {
    let report_id = validate::id(msg.report_id, "reportId")?;
    ctx.require(ctx.access.can_resolve_report(), "moderators only")?;
    reports::resolve(conn, ctx.thread.id, report_id)?;
    Ok(success())
}

// ── Membership ──

fn target_user(conn: &Connection, msg: &UserRef) -> ApiResult<i64> {
    let username = msg.username.trim();
    if username.is_empty() {
        return Err(ApiError::validation("username is required"));
    }
    accounts::id_by_username(conn, username)?.ok_or_else(|| ApiError::not_found("user not found"))
}

fn ban_user(conn: &mut Connection, ctx: &Ctx<'_>, msg: UserRef) -> ApiResult<Value> {
    ctx.require(ctx.access.can_ban(), "moderators only")?;
    let target = target_user(conn, &msg)?;
    threads::ban(conn, ctx.thread, ctx.viewer.id, target)?;
    Ok(success())
}

fn set_moderator(conn: &mut Connection, ctx: &Ctx<'_>, msg: UserRef, moderator: bool) -> ApiResult<Value> {
    ctx.require(ctx.access.can_manage_moderators(), "owner only")?;
    let target = target_user(conn, &msg)?;
    threads::set_moderator(conn, ctx.thread, target, moderator)?;
    Ok(success())
}

fn edit_config(conn: &mut Connection, ctx: &Ctx<'_>, msg: EditThreadConfig) -> ApiResult<Value> {
    ctx.require(ctx.access.can_edit_thread_config(), "owner only")?;
    threads::edit_config(conn, ctx.thread.id, &msg)?;
    Ok(success())
}

// ── Tags ──

fn create_tag(conn: &mut Connection, ctx: &Ctx<'_>, msg: CreateTag) -> ApiResult<Value> {
    ctx.require(ctx.access.can_manage_tags(), "owner only")?;
    let tag = tags::create(conn, ctx.thread.id, &msg.tag_name, &msg.tag_color)?;
    Ok(json!({ "status": "success", "tag": tag }))
}

fn delete_tag(conn: &mut Connection, ctx: &Ctx<'_>, msg: TagRef) -> ApiResult<Value> {
    ctx.require(ctx.access.can_manage_tags(), "owner only")?;
    let tag_id = validate::id(msg.tag_id, "tagId")?;
    tags::delete(conn, ctx.thread.id, tag_id)?;
    Ok(success())
}

fn edit_tag(conn: &mut Connection, ctx: &Ctx<'_>, msg: EditTag) -> ApiResult<Value> {
    ctx.require(ctx.access.can_manage_tags(), "owner only")?;
    let tag_id = validate::id(msg.tag_id, "tagId")?;
    let tag = tags::update(
        conn,
        ctx.thread.id,
        tag_id,
        msg.tag_name.as_deref(),
        msg.tag_color.as_deref(),
    )?;
    Ok(json!({ "status": "success", "tag": tag }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_action_name_parses() {
        for name in [
            "sendMessage",
            "editMessage",
            "deleteMessage",
            "removeMedia",
            "reportMessage",
            "upvoteMessage",
            "downvoteMessage",
            "sendComment",
            "editComment",
            "deleteComment",
            "upvoteComment",
            "downvoteComment",
            "reportComment",
            "joinThread",
            "leaveThread",
            "banUser",
            "promoteUser",
            "demoteUser",
            "setReportToResolved",
            "createThreadTag",
            "deleteThreadTag",
            "editThreadTag",
            "getThreadTags",
            "editThreadConfig",
        ] {
            assert!(name.parse::<ThreadAction>().is_ok(), "{name}");
        }
    }

    #[test]
    fn unknown_actions_are_not_found() {
        assert!(matches!(
            "dropThread".parse::<ThreadAction>(),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn empty_bodies_read_as_empty_objects() {
        let msg: UserRef = parse(b"").unwrap();
        assert!(msg.username.is_empty());
        assert!(parse::<UserRef>(b"not json").is_err());
    }
}
