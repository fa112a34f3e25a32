use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::accounts;
use crate::authz::Actor;
use crate::error::{ApiError, ApiResult};

pub const COOKIE_NAME: &str = "session";
pub const SESSION_TTL_SECS: i64 = 24 * 60 * 60;

// ── Claims ──

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Email of the signed-in user.
    pub sub: String,
    pub exp: usize,
}

impl Claims {
    pub fn new(email: &str) -> Self {
        let exp = chrono::Utc::now().timestamp() + SESSION_TTL_SECS;
        Self {
            sub: email.to_string(),
            exp: exp.max(0) as usize,
        }
    }
}

pub fn issue(email: &str, secret: &str) -> ApiResult<String> {
    encode(
        &Header::default(),
        &Claims::new(email),
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::internal(format!("session signing: {e}")))
}

fn decode_email(token: &str, secret: &str) -> Option<String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims.sub)
}

// ── Transport ──

pub fn set_cookie(token: &str) -> String {
    format!("{COOKIE_NAME}={token}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={SESSION_TTL_SECS}")
}

pub fn clear_cookie() -> String {
    format!("{COOKIE_NAME}=; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age=0")
}

fn cookie_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == COOKIE_NAME)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Email carried by a valid session, cookie first, then bearer token.
pub fn email_from_headers(headers: &HeaderMap, secret: &str) -> Option<String> {
    cookie_token(headers)
        .or_else(|| bearer_token(headers))
        .and_then(|token| decode_email(token, secret))
}

pub fn require_email(headers: &HeaderMap, secret: &str) -> ApiResult<String> {
    email_from_headers(headers, secret).ok_or_else(|| ApiError::unauthorized("login required"))
}

// ── Viewer ──

/// The signed-in user behind a request.
#[derive(Debug, Clone)]
pub struct Viewer {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub verified: bool,
}

impl Viewer {
    pub fn actor(&self) -> Actor {
        Actor {
            id: self.id,
            verified: self.verified,
        }
    }
}

/// Sessions naming a user that no longer exists resolve to an anonymous
/// viewer.
pub fn load_viewer(conn: &Connection, email: Option<&str>) -> ApiResult<Option<Viewer>> {
    let Some(email) = email else {
        return Ok(None);
    };
    Ok(accounts::by_email(conn, email)?.map(|user| Viewer {
        id: user.id,
        email: user.email,
        username: user.username,
        verified: user.verified,
    }))
}

/// Mutations need a verified account; anything less is a 401.
pub fn require_verified(viewer: Option<Viewer>) -> ApiResult<Viewer> {
    match viewer {
        None => Err(ApiError::unauthorized("login required")),
        Some(v) if !v.verified => Err(ApiError::unauthorized("email address is not verified")),
        Some(v) => Ok(v),
    }
}
