use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ApiError, ApiResult};

pub const TITLE_MAX_CHARS: usize = 140;
pub const CONTENT_MAX_CHARS: usize = 20_000;
pub const DESCRIPTION_MAX_CHARS: usize = 500;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap());
static USERNAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]{3,20}$").unwrap());
static THREAD_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]{5,50}$").unwrap());
static TAG_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9 _-]{1,32}$").unwrap());
static TAG_COLOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#[0-9a-fA-F]{6}$").unwrap());
static LANG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]{2}$").unwrap());

pub const THEMES: &[&str] = &["light", "dark"];

pub fn email(value: &str) -> ApiResult<()> {
    if EMAIL.is_match(value) {
        Ok(())
    } else {
        Err(ApiError::validation("invalid email address"))
    }
}

pub fn username(value: &str) -> ApiResult<()> {
    if USERNAME.is_match(value) {
        Ok(())
    } else {
        Err(ApiError::validation(
            "username must be 3 to 20 letters, digits, '_' or '-'",
        ))
    }
}

/// 8..64 characters with at least one lower-case letter, one upper-case
/// letter and one digit.
pub fn password(value: &str) -> ApiResult<()> {
    let len = value.chars().count();
    let strong = (8..=64).contains(&len)
        && value.chars().any(|c| c.is_ascii_lowercase())
        && value.chars().any(|c| c.is_ascii_uppercase())
        && value.chars().any(|c| c.is_ascii_digit());
    if strong {
        Ok(())
    } else {
        Err(ApiError::validation(
            "password must be 8 to 64 characters with upper-case, lower-case and a digit",
        ))
    }
}

pub fn person_name(value: &str, field: &str) -> ApiResult<()> {
    let len = value.trim().chars().count();
    if (1..=50).contains(&len) {
        Ok(())
    } else {
        Err(ApiError::validation(format!("{field} must be 1 to 50 characters")))
    }
}

pub fn thread_name(value: &str) -> ApiResult<()> {
    if THREAD_NAME.is_match(value) {
        Ok(())
    } else {
        Err(ApiError::validation(
            "thread name must be 5 to 50 letters, digits, '_' or '-'",
        ))
    }
}

pub fn description(value: &str) -> ApiResult<String> {
    if value.chars().count() > DESCRIPTION_MAX_CHARS {
        return Err(ApiError::validation("description is too long"));
    }
    Ok(ammonia::clean(value))
}

pub fn tag_name(value: &str) -> ApiResult<()> {
    if TAG_NAME.is_match(value) {
        Ok(())
    } else {
        Err(ApiError::validation("invalid tag name"))
    }
}

pub fn tag_color(value: &str) -> ApiResult<()> {
    if TAG_COLOR.is_match(value) {
        Ok(())
    } else {
        Err(ApiError::validation("tag color must look like #RRGGBB"))
    }
}

pub fn lang(value: &str) -> ApiResult<()> {
    if LANG.is_match(value) {
        Ok(())
    } else {
        Err(ApiError::validation("lang must be a two-letter code"))
    }
}

pub fn theme(value: &str) -> ApiResult<()> {
    if THEMES.contains(&value) {
        Ok(())
    } else {
        Err(ApiError::validation("unknown theme"))
    }
}

/// Returns the sanitised title.
pub fn title(value: &str) -> ApiResult<String> {
    if value.contains(['\n', '\r']) {
        return Err(ApiError::validation("title must be a single line"));
    }
    let len = value.chars().count();
    if len == 0 || len > TITLE_MAX_CHARS || value.trim().is_empty() {
        return Err(ApiError::validation(format!(
            "title must be 1 to {TITLE_MAX_CHARS} characters"
        )));
    }
    Ok(ammonia::clean(value))
}

/// Post bodies, comments and report reasons share this rule. Returns the
/// sanitised text.
pub fn content(value: &str) -> ApiResult<String> {
    let len = value.chars().count();
    if len == 0 || len > CONTENT_MAX_CHARS {
        return Err(ApiError::validation(format!(
            "content must be 1 to {CONTENT_MAX_CHARS} characters"
        )));
    }
    let cleaned = ammonia::clean(value);
    if cleaned.trim().is_empty() {
        return Err(ApiError::validation("content must not be blank"));
    }
    Ok(cleaned)
}

/// Ids arrive as strings; `0` means the field was absent or empty.
pub fn id(value: i64, field: &str) -> ApiResult<i64> {
    if value > 0 {
        Ok(value)
    } else {
        Err(ApiError::validation(format!("{field} is required")))
    }
}
