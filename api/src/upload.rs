//! `POST /api/upload/{kind}`: multipart image uploads.

use std::io::Write;
use std::path::PathBuf;

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};
use tempfile::NamedTempFile;

use crate::authz::{self, Access, MediaKind};
use crate::error::{ApiError, ApiResult};
use crate::{accounts, db, media, session, threads, AppState};

pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Parts of the form the endpoint reads.
#[derive(Default)]
struct Form {
    image: Option<Vec<u8>>,
    thread: Option<String>,
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::validation(format!("malformed upload: {}", err.body_text()))
    }
}

async fn read_form(mut multipart: Multipart) -> ApiResult<Form> {
    let mut form = Form::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("image") => {
                let bytes = field.bytes().await.map_err(multipart_error)?;
                if bytes.len() > MAX_UPLOAD_BYTES {
                    return Err(ApiError::PayloadTooLarge);
                }
                form.image = Some(bytes.to_vec());
            }
            Some("thread") => {
                form.thread = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }
    Ok(form)
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// POST /api/upload/{kind}
#[tracing::instrument(skip_all, fields(kind = %kind))]
pub async fn upload(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let kind = MediaKind::from_route(&kind)
        .ok_or_else(|| ApiError::not_found(format!("unknown upload kind {kind:?}")))?;
    if declared_length(&headers).is_some_and(|len| len > MAX_UPLOAD_BYTES) {
        return Err(ApiError::PayloadTooLarge);
    }

    // Authenticate before reading anything else.
    let email = session::email_from_headers(&headers, &state.config.session_secret);
    let viewer = db::run(&state.db, move |conn| {
        session::require_verified(session::load_viewer(conn, email.as_deref())?)
    })
    .await?;
    let actor = viewer.actor();

    let form = read_form(multipart).await?;
    let thread_name = form.thread.filter(|t| !t.trim().is_empty());
    if kind.needs_thread() && thread_name.is_none() {
        return Err(ApiError::validation("thread is required"));
    }
    let image = form
        .image
        .ok_or_else(|| ApiError::validation("image is required"))?;

    // Permission comes before content checks.
    let thread_id = db::run(&state.db, move |conn| {
        let access = match &thread_name {
            Some(name) if kind != MediaKind::Avatar => {
                let thread = threads::require_by_name(conn, name)?;
                let rank = threads::rank_of(conn, thread.id, actor.id)?;
                Some((thread.id, Access::new(Some(actor), rank, thread.visibility)))
            }
            _ => None,
        };
        if !authz::can_upload_as(kind, Some(actor), access.as_ref().map(|(_, a)| a)) {
            return Err(ApiError::forbidden("you cannot upload this kind of media"));
        }
        Ok(access.map(|(thread_id, _)| thread_id))
    })
    .await?;

    let ext = media::sniff_extension(&image).ok_or(ApiError::UnsupportedMedia)?;

    let dir = state.config.img_upload_dir.clone();
    let (id, filename) = db::run(&state.db, move |conn| {
        let filename = format!("{}{ext}", uuid::Uuid::new_v4());
        let mut temp = NamedTempFile::new_in(&dir)?;
        temp.write_all(&image)?;
        temp.as_file().sync_all()?;

        let tx = db::write_tx(conn)?;
        let id = media::insert(&tx, kind, &filename)?;
        match (kind, thread_id) {
            (MediaKind::Avatar, _) => accounts::set_avatar(&tx, actor.id, id)?,
            (MediaKind::Icon, Some(thread_id)) => threads::set_icon(&tx, thread_id, id)?,
            (MediaKind::Banner, Some(thread_id)) => threads::set_banner(&tx, thread_id, id)?,
            _ => {}
        }
        let target: PathBuf = dir.join(&filename);
        temp.persist(&target).map_err(|e| ApiError::from(e.error))?;
        if let Err(e) = tx.commit() {
            let _ = std::fs::remove_file(&target);
            return Err(e.into());
        }

        tracing::info!(media_id = id, kind = kind.as_str(), %filename, "media stored");
        Ok((id, filename))
    })
    .await?;

    Ok(Json(json!({
        "status": "success",
        "url": media::url_for(&filename),
        "id": id.to_string(),
    })))
}
