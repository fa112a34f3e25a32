pub mod accounts;
pub mod auth;
pub mod authz;
pub mod comments;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod listing;
pub mod mail;
pub mod media;
pub mod posts;
pub mod reports;
pub mod session;
pub mod tags;
pub mod threads;
pub mod tokens;
pub mod upload;
pub mod validate;
pub mod votes;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{any, get, post},
    Router,
};
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::config::Config;
use crate::mail::Mailer;

pub type DbPool = r2d2::Pool<r2d2_sqlite::SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub mailer: Mailer,
}

/// Room for multipart boundaries and the `thread` field on top of the image.
const UPLOAD_FORM_SLACK: usize = 64 * 1024;

/// Every route the server answers. CORS is layered on by the binary.
pub fn router(state: AppState) -> Router {
    let uploads = ServeDir::new(&state.config.img_upload_dir);

    Router::new()
        .route("/api/health", get(|| async { "ok" }))
        // Auth
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/verify", post(auth::verify))
        .route("/api/auth/resend-verification", post(auth::resend_verification))
        .route("/api/auth/forgot-password", post(auth::forgot_password))
        .route("/api/auth/reset-password", post(auth::reset_password))
        .route("/api/auth/github", get(auth::github_login))
        .route("/api/auth/callback", get(auth::github_callback))
        .route("/api/user/settings", post(accounts::settings))
        .route("/api/user/{username}", get(listing::user_profile))
        // Threads
        .route(
            "/api/threads",
            get(listing::list_threads).post(threads::create_thread),
        )
        .route("/api/thread/messages", get(listing::list_messages))
        .route("/api/thread/message", get(listing::get_message))
        .route("/api/thread/comments", get(listing::list_comments))
        .route("/api/thread/tags", get(listing::list_tags))
        .route("/api/thread/info", get(listing::thread_info))
        .route("/api/thread/reports", get(listing::list_reports))
        .route("/api/thread/{name}/{action}", any(dispatch::thread_action))
        // Media
        .route(
            "/api/upload/{kind}",
            post(upload::upload)
                .layer(DefaultBodyLimit::max(upload::MAX_UPLOAD_BYTES + UPLOAD_FORM_SLACK)),
        )
        .nest_service("/upload", uploads)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
