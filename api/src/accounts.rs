use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{extract::State, http::HeaderMap, Json};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{json, Value};

use agora_shared::{Profile, PublicProfile, UserSettings, UserSummary};

use crate::error::{ApiError, ApiResult};
use crate::{db, media, session, validate, AppState};

// ── Storage ──

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub password_hash: Option<String>,
    pub verified: bool,
}

const USER_COLUMNS: &str = "id, email, username, password_hash, verified";

fn user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        password_hash: row.get(3)?,
        verified: row.get(4)?,
    })
}

pub struct NewUser<'a> {
    pub email: &'a str,
    pub username: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub password_hash: Option<&'a str>,
    pub verified: bool,
}

/// Inserts the user and its configuration row.
pub fn create(conn: &mut Connection, user: &NewUser<'_>, lang: &str, theme: &str) -> ApiResult<i64> {
    let tx = db::write_tx(conn)?;

    let taken: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1 OR username = ?2)",
        params![user.email, user.username],
        |row| row.get(0),
    )?;
    if taken {
        return Err(ApiError::conflict("email or username already in use"));
    }

    tx.execute(
        "INSERT INTO users (email, username, first_name, last_name, password_hash, verified)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user.email,
            user.username,
            user.first_name,
            user.last_name,
            user.password_hash,
            user.verified
        ],
    )?;
    let id = tx.last_insert_rowid();
    tx.execute(
        "INSERT INTO user_configs (user_id, lang, theme) VALUES (?1, ?2, ?3)",
        params![id, lang, theme],
    )?;
    tx.commit()?;

    tracing::info!(user_id = id, username = user.username, "user created");
    Ok(id)
}

pub fn by_email(conn: &Connection, email: &str) -> ApiResult<Option<UserRow>> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
            [email],
            user_row,
        )
        .optional()?;
    Ok(user)
}

/// Looks a user up by email or username.
pub fn by_identifier(conn: &Connection, identifier: &str) -> ApiResult<Option<UserRow>> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1 OR username = ?1"),
            [identifier],
            user_row,
        )
        .optional()?;
    Ok(user)
}

pub fn id_by_username(conn: &Connection, username: &str) -> ApiResult<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM users WHERE username = ?1",
            [username],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn username_taken(conn: &Connection, username: &str) -> ApiResult<bool> {
    Ok(id_by_username(conn, username)?.is_some())
}

pub fn mark_verified(conn: &Connection, email: &str) -> ApiResult<()> {
    conn.execute("UPDATE users SET verified = 1 WHERE email = ?1", [email])?;
    Ok(())
}

pub fn set_password_hash(conn: &Connection, email: &str, hash: &str) -> ApiResult<()> {
    conn.execute(
        "UPDATE users SET password_hash = ?2 WHERE email = ?1",
        params![email, hash],
    )?;
    Ok(())
}

pub fn link_oauth(conn: &Connection, user_id: i64, provider: &str, oauth_id: &str) -> ApiResult<()> {
    conn.execute(
        "UPDATE users SET oauth_provider = ?2, oauth_id = ?3 WHERE id = ?1",
        params![user_id, provider, oauth_id],
    )?;
    Ok(())
}

pub fn set_avatar(conn: &Connection, user_id: i64, media_id: i64) -> ApiResult<()> {
    conn.execute(
        "UPDATE user_configs SET avatar_media_id = ?2 WHERE user_id = ?1",
        params![user_id, media_id],
    )?;
    Ok(())
}

pub fn update_settings(conn: &Connection, user_id: i64, settings: &UserSettings) -> ApiResult<()> {
    if let Some(lang) = &settings.lang {
        conn.execute(
            "UPDATE user_configs SET lang = ?2 WHERE user_id = ?1",
            params![user_id, lang],
        )?;
    }
    if let Some(theme) = &settings.theme {
        conn.execute(
            "UPDATE user_configs SET theme = ?2 WHERE user_id = ?1",
            params![user_id, theme],
        )?;
    }
    Ok(())
}

pub fn summary(conn: &Connection, user_id: i64) -> ApiResult<UserSummary> {
    let summary = conn.query_row(
        "SELECT u.id, u.username, m.filename
         FROM users u
         LEFT JOIN user_configs c ON c.user_id = u.id
         LEFT JOIN media_links m ON m.id = c.avatar_media_id
         WHERE u.id = ?1",
        [user_id],
        |row| {
            Ok(UserSummary {
                id: row.get(0)?,
                username: row.get(1)?,
                avatar_url: row.get::<_, Option<String>>(2)?.map(|f| media::url_for(&f)),
            })
        },
    )?;
    Ok(summary)
}

/// What anyone may see of an account. Threads are filled in by the caller.
pub fn public_profile(conn: &Connection, username: &str) -> ApiResult<PublicProfile> {
    conn.query_row(
        "SELECT u.id, u.username, m.filename, u.created_at
         FROM users u
         LEFT JOIN user_configs c ON c.user_id = u.id
         LEFT JOIN media_links m ON m.id = c.avatar_media_id
         WHERE u.username = ?1",
        [username],
        |row| {
            Ok(PublicProfile {
                id: row.get(0)?,
                username: row.get(1)?,
                avatar_url: row.get::<_, Option<String>>(2)?.map(|f| media::url_for(&f)),
                created_at: row.get(3)?,
                threads: Vec::new(),
            })
        },
    )
    .optional()?
    .ok_or_else(|| ApiError::not_found("user not found"))
}

pub fn profile(conn: &Connection, user_id: i64) -> ApiResult<Profile> {
    let profile = conn
        .query_row(
            "SELECT u.id, u.username, u.email, u.first_name, u.last_name, u.verified,
                    c.lang, c.theme, m.filename, u.created_at
             FROM users u
             JOIN user_configs c ON c.user_id = u.id
             LEFT JOIN media_links m ON m.id = c.avatar_media_id
             WHERE u.id = ?1",
            [user_id],
            |row| {
                Ok(Profile {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    email: row.get(2)?,
                    first_name: row.get(3)?,
                    last_name: row.get(4)?,
                    verified: row.get(5)?,
                    lang: row.get(6)?,
                    theme: row.get(7)?,
                    avatar_url: row.get::<_, Option<String>>(8)?.map(|f| media::url_for(&f)),
                    created_at: row.get(9)?,
                })
            },
        )
        .optional()?;
    profile.ok_or_else(|| ApiError::not_found("user not found"))
}

// ── Passwords ──

pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::encode_b64(uuid::Uuid::new_v4().as_bytes())
        .map_err(|e| ApiError::internal(format!("salt: {e}")))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ApiError::internal(format!("password hash: {e}")))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

// ── Handlers ──

/// POST /api/user/settings
pub async fn settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UserSettings>,
) -> ApiResult<Json<Value>> {
    let email = session::require_email(&headers, &state.config.session_secret)?;
    if let Some(lang) = &payload.lang {
        validate::lang(lang)?;
    }
    if let Some(theme) = &payload.theme {
        validate::theme(theme)?;
    }

    db::run(&state.db, move |conn| {
        let user = by_email(conn, &email)?
            .ok_or_else(|| ApiError::unauthorized("login required"))?;
        update_settings(conn, user.id, &payload)
    })
    .await?;

    Ok(Json(json!({ "status": "success" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_connection;

    fn ann() -> NewUser<'static> {
        NewUser {
            email: "ann@example.org",
            username: "ann",
            first_name: "Ann",
            last_name: "Lee",
            password_hash: None,
            verified: false,
        }
    }

    #[test]
    fn duplicate_email_or_username_conflicts() {
        let mut conn = test_connection();
        create(&mut conn, &ann(), "en", "light").unwrap();
        let same_name = NewUser {
            email: "other@example.org",
            ..ann()
        };
        assert!(matches!(
            create(&mut conn, &same_name, "en", "light"),
            Err(ApiError::Conflict(_))
        ));
    }

    #[test]
    fn lookup_by_email_or_username() {
        let mut conn = test_connection();
        let id = create(&mut conn, &ann(), "en", "light").unwrap();
        assert_eq!(by_identifier(&conn, "ann").unwrap().map(|u| u.id), Some(id));
        assert_eq!(
            by_identifier(&conn, "ann@example.org").unwrap().map(|u| u.id),
            Some(id)
        );
        assert!(by_email(&conn, "nobody@example.org").unwrap().is_none());
    }

    #[test]
    fn profile_reflects_settings_and_verification() {
        let mut conn = test_connection();
        let id = create(&mut conn, &ann(), "en", "light").unwrap();
        mark_verified(&conn, "ann@example.org").unwrap();
        update_settings(
            &conn,
            id,
            &UserSettings {
                lang: Some("fr".into()),
                theme: None,
            },
        )
        .unwrap();
        let profile = profile(&conn, id).unwrap();
        assert!(profile.verified);
        assert_eq!(profile.lang, "fr");
        assert_eq!(profile.theme, "light");
        assert_eq!(profile.avatar_url, None);
    }

    #[test]
    fn password_hashes_verify() {
        let hash = hash_password("Secr3tPass").unwrap();
        assert!(verify_password("Secr3tPass", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("Secr3tPass", "not a hash"));
    }
}
