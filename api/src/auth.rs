use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Redirect},
    Json,
};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Value};

use agora_shared::{ForgotPassword, Login, Profile, Register, ResetPassword, TokenBody};

use crate::accounts::{self, NewUser};
use crate::error::{ApiError, ApiResult};
use crate::mail::Mail;
use crate::tokens::{self, Intent};
use crate::{db, session, validate, AppState};

fn with_session(cookie: String, body: Value) -> impl IntoResponse {
    ([(header::SET_COOKIE, cookie)], Json(body))
}

// ── Password accounts ──

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<Register>,
) -> ApiResult<impl IntoResponse> {
    let email = payload.email.trim().to_lowercase();
    validate::email(&email)?;
    validate::username(&payload.username)?;
    validate::person_name(&payload.first_name, "firstName")?;
    validate::person_name(&payload.last_name, "lastName")?;
    validate::password(&payload.password)?;

    let config = state.config.clone();
    let (user_id, token) = {
        let email = email.clone();
        db::run(&state.db, move |conn| {
            let hash = accounts::hash_password(&payload.password)?;
            let user = NewUser {
                email: &email,
                username: &payload.username,
                first_name: payload.first_name.trim(),
                last_name: payload.last_name.trim(),
                password_hash: Some(&hash),
                verified: false,
            };
            let id = accounts::create(conn, &user, &config.default_lang, &config.default_theme)?;
            let token = tokens::create(conn, &email, Intent::Verify)?;
            Ok((id, token))
        })
        .await?
    };

    state
        .mailer
        .send(Mail::verification(&email, &state.config.cors_origin, &token))
        .await;

    let cookie = session::set_cookie(&session::issue(&email, &state.config.session_secret)?);
    Ok(with_session(
        cookie,
        json!({ "status": "success", "userId": user_id.to_string() }),
    ))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<Login>,
) -> ApiResult<impl IntoResponse> {
    let identifier = payload.identifier.trim().to_string();
    let user = db::run(&state.db, move |conn| {
        let user = accounts::by_identifier(conn, &identifier)?;
        let valid = user.as_ref().is_some_and(|u| {
            u.password_hash
                .as_deref()
                .is_some_and(|hash| accounts::verify_password(&payload.password, hash))
        });
        match user {
            Some(user) if valid => Ok(user),
            _ => Err(ApiError::unauthorized("invalid credentials")),
        }
    })
    .await?;

    tracing::info!(user_id = user.id, "login");
    let cookie = session::set_cookie(&session::issue(&user.email, &state.config.session_secret)?);
    Ok(with_session(
        cookie,
        json!({ "status": "success", "userId": user.id.to_string(), "verified": user.verified }),
    ))
}

/// POST /api/auth/logout
pub async fn logout() -> impl IntoResponse {
    with_session(session::clear_cookie(), json!({ "status": "success" }))
}

/// GET /api/auth/me
pub async fn me(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Profile>> {
    let email = session::require_email(&headers, &state.config.session_secret)?;
    let profile = db::run(&state.db, move |conn| {
        let user = accounts::by_email(conn, &email)?
            .ok_or_else(|| ApiError::unauthorized("login required"))?;
        accounts::profile(conn, user.id)
    })
    .await?;
    Ok(Json(profile))
}

// ── Tokens ──

/// POST /api/auth/verify
pub async fn verify(
    State(state): State<AppState>,
    Json(payload): Json<TokenBody>,
) -> ApiResult<Json<Value>> {
    let email = db::run(&state.db, move |conn| {
        tokens::consume(conn, payload.token.trim(), Intent::Verify, |tx, email| {
            accounts::mark_verified(tx, email)
        })
    })
    .await?;
    tracing::info!(%email, "email verified");
    Ok(Json(json!({ "status": "success" })))
}

/// POST /api/auth/resend-verification
pub async fn resend_verification(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let email = session::require_email(&headers, &state.config.session_secret)?;
    let (email, token) = db::run(&state.db, move |conn| {
        let user = accounts::by_email(conn, &email)?
            .ok_or_else(|| ApiError::unauthorized("login required"))?;
        if user.verified {
            return Err(ApiError::validation("email address is already verified"));
        }
        let token = tokens::create(conn, &user.email, Intent::Verify)?;
        Ok((user.email, token))
    })
    .await?;

    state
        .mailer
        .send(Mail::verification(&email, &state.config.cors_origin, &token))
        .await;
    Ok(Json(json!({ "status": "success" })))
}

/// POST /api/auth/forgot-password. Answers the same way whether or not the
/// address is known.
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPassword>,
) -> ApiResult<Json<Value>> {
    let email = payload.email.trim().to_lowercase();
    let issued = db::run(&state.db, move |conn| {
        match accounts::by_email(conn, &email)? {
            Some(user) if user.password_hash.is_some() => {
                let token = tokens::create(conn, &user.email, Intent::Reset)?;
                Ok(Some((user.email, token)))
            }
            _ => Ok(None),
        }
    })
    .await?;

    if let Some((email, token)) = issued {
        state
            .mailer
            .send(Mail::password_reset(&email, &state.config.cors_origin, &token))
            .await;
    }
    Ok(Json(json!({ "status": "success" })))
}

/// POST /api/auth/reset-password
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPassword>,
) -> ApiResult<Json<Value>> {
    validate::password(&payload.password)?;
    let email = db::run(&state.db, move |conn| {
        let hash = accounts::hash_password(&payload.password)?;
        tokens::consume(conn, payload.token.trim(), Intent::Reset, |tx, email| {
            accounts::set_password_hash(tx, email, &hash)
        })
    })
    .await?;
    tracing::info!(%email, "password reset");
    Ok(Json(json!({ "status": "success" })))
}

// ── GitHub OAuth ──

#[derive(Deserialize)]
pub struct LoginParams {
    redirect: Option<String>,
}

#[derive(Deserialize)]
pub struct CallbackParams {
    code: String,
    state: Option<String>,
}

#[derive(Deserialize)]
struct GitHubTokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct GitHubUser {
    id: i64,
    login: String,
    name: Option<String>,
    email: Option<String>,
}

#[derive(Deserialize)]
struct GitHubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

fn upstream(err: reqwest::Error) -> ApiError {
    ApiError::BadGateway(err.to_string())
}

/// GET /api/auth/github: redirect to GitHub OAuth
pub async fn github_login(
    State(state): State<AppState>,
    Query(params): Query<LoginParams>,
) -> ApiResult<Redirect> {
    if !state.config.github_enabled() {
        return Err(ApiError::not_found("GitHub sign-in is not configured"));
    }
    let redirect_after = safe_redirect(params.redirect, &state.config.cors_origin);

    let url = format!(
        "https://github.com/login/oauth/authorize?client_id={}&redirect_uri={}/api/auth/callback&scope=user:email&state={}",
        state.config.github_client_id,
        state.config.api_url,
        urlencoding::encode(&redirect_after),
    );
    Ok(Redirect::temporary(&url))
}

async fn github_identity(state: &AppState, code: &str) -> ApiResult<(GitHubUser, String)> {
    let client = reqwest::Client::new();
    let token = client
        .post("https://github.com/login/oauth/access_token")
        .header("Accept", "application/json")
        .json(&json!({
            "client_id": state.config.github_client_id,
            "client_secret": state.config.github_client_secret,
            "code": code,
        }))
        .send()
        .await
        .map_err(upstream)?
        .json::<GitHubTokenResponse>()
        .await
        .map_err(upstream)?;

    let gh_user = client
        .get("https://api.github.com/user")
        .header("Authorization", format!("Bearer {}", token.access_token))
        .header("User-Agent", "agora-api")
        .send()
        .await
        .map_err(upstream)?
        .json::<GitHubUser>()
        .await
        .map_err(upstream)?;

    if let Some(email) = gh_user.email.clone().filter(|e| !e.is_empty()) {
        return Ok((gh_user, email));
    }

    // Private addresses only show up on the emails endpoint.
    let emails = client
        .get("https://api.github.com/user/emails")
        .header("Authorization", format!("Bearer {}", token.access_token))
        .header("User-Agent", "agora-api")
        .send()
        .await
        .map_err(upstream)?
        .json::<Vec<GitHubEmail>>()
        .await
        .map_err(upstream)?;
    let email = emails
        .into_iter()
        .find(|e| e.primary && e.verified)
        .map(|e| e.email)
        .ok_or_else(|| ApiError::BadGateway("GitHub account has no verified email".into()))?;
    Ok((gh_user, email))
}

/// GET /api/auth/callback: exchange the code, find or create the user, set the
/// session and redirect back to the frontend.
pub async fn github_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> ApiResult<impl IntoResponse> {
    let (gh_user, email) = github_identity(&state, &params.code).await?;
    let email = email.trim().to_lowercase();

    let config = state.config.clone();
    let user_email = email.clone();
    db::run(&state.db, move |conn| {
        github_account(conn, &user_email, &gh_user, &config.default_lang, &config.default_theme)
    })
    .await?;

    let cookie = session::set_cookie(&session::issue(&email, &state.config.session_secret)?);
    let redirect_to = safe_redirect(params.state, &state.config.cors_origin);
    Ok(([(header::SET_COOKIE, cookie)], Redirect::temporary(&redirect_to)))
}

/// Finds or creates the account behind a GitHub identity. GitHub only hands
/// out verified addresses, so an existing account becomes verified too.
fn github_account(
    conn: &mut Connection,
    email: &str,
    gh_user: &GitHubUser,
    lang: &str,
    theme: &str,
) -> ApiResult<i64> {
    let gh_id = gh_user.id.to_string();
    if let Some(user) = accounts::by_email(conn, email)? {
        let tx = db::write_tx(conn)?;
        accounts::link_oauth(&tx, user.id, "github", &gh_id)?;
        if !user.verified {
            accounts::mark_verified(&tx, &user.email)?;
        }
        tx.commit()?;
        return Ok(user.id);
    }

    let username = if accounts::username_taken(conn, &gh_user.login)? {
        format!("{}-{}", gh_user.login, gh_user.id)
    } else {
        gh_user.login.clone()
    };
    let display = gh_user.name.clone().unwrap_or_else(|| gh_user.login.clone());
    let (first, last) = display.split_once(' ').unwrap_or((display.as_str(), ""));
    let user = NewUser {
        email,
        username: &username,
        first_name: first,
        last_name: last,
        password_hash: None,
        verified: true,
    };
    let id = accounts::create(conn, &user, lang, theme)?;
    accounts::link_oauth(conn, id, "github", &gh_id)?;
    Ok(id)
}

/// Keeps post-login redirects on the frontend origin.
fn safe_redirect(target: Option<String>, origin: &str) -> String {
    let origin = origin.trim_end_matches('/');
    let on_origin = |t: &str| {
        t == origin || t.strip_prefix(origin).is_some_and(|rest| rest.starts_with('/'))
    };
    match target {
        Some(t) if on_origin(&t) => t,
        _ => origin.to_string(),
    }
}
