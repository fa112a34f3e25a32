use std::path::PathBuf;

use thiserror::Error;

const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("SESSION_SECRET must be at least {MIN_SECRET_LEN} bytes")]
    WeakSecret,

    #[error("unsupported DB_URL driver {0:?}, only sqlite is available")]
    UnsupportedDriver(String),

    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Sender address, `SMTP_FROM` or the login name.
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub session_secret: String,
    pub database_path: PathBuf,
    pub upload_dir: PathBuf,
    pub img_upload_dir: PathBuf,
    pub smtp: Option<SmtpConfig>,
    pub cert_file: Option<String>,
    pub cert_key_file: Option<String>,
    pub default_lang: String,
    pub default_theme: String,
    pub port: u16,
    pub cors_origin: String,
    pub api_url: String,
    pub github_client_id: String,
    pub github_client_secret: String,
}

impl Config {
    /// Reads the process environment. `.env` is loaded by the caller.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let session_secret = var("SESSION_SECRET").ok_or(ConfigError::Missing("SESSION_SECRET"))?;
        if session_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::WeakSecret);
        }

        if let Some(driver) = var("DB_URL") {
            if !matches!(driver.as_str(), "sqlite" | "sqlite3") {
                return Err(ConfigError::UnsupportedDriver(driver));
            }
        }
        let database_path = PathBuf::from(var("DB_NAME").unwrap_or_else(|| "forum.db".into()));

        let upload_dir = PathBuf::from(var("UPLOAD_FOLDER").unwrap_or_else(|| "uploads".into()));
        let img_upload_dir =
            upload_dir.join(var("IMG_UPLOAD_FOLDER").unwrap_or_else(|| "img".into()));

        let smtp = match (var("SMTP_HOST"), var("SMTP_USER"), var("SMTP_PASSWORD")) {
            (Some(host), Some(user), Some(password)) => {
                let raw_port = var("SMTP_PORT").unwrap_or_else(|| "587".into());
                let port = raw_port.parse().map_err(|_| ConfigError::Invalid {
                    name: "SMTP_PORT",
                    value: raw_port.clone(),
                })?;
                let from = var("SMTP_FROM").unwrap_or_else(|| user.clone());
                Some(SmtpConfig {
                    host,
                    port,
                    user,
                    password,
                    from,
                })
            }
            _ => None,
        };

        let port = match var("PORT") {
            Some(raw) => match raw.parse::<u16>() {
                Ok(p) if p > 0 => p,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "PORT",
                        value: raw,
                    })
                }
            },
            None => 8080,
        };

        let cors_origin = var("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:8080".into());
        let api_url = var("API_URL").unwrap_or_else(|| format!("http://localhost:{port}"));

        Ok(Self {
            session_secret,
            database_path,
            upload_dir,
            img_upload_dir,
            smtp,
            cert_file: var("CERT_FILE"),
            cert_key_file: var("CERT_KEY_FILE"),
            default_lang: var("DEFAULT_LANG").unwrap_or_else(|| "en".into()),
            default_theme: var("DEFAULT_THEME").unwrap_or_else(|| "light".into()),
            port,
            cors_origin,
            api_url,
            github_client_id: var("GITHUB_CLIENT_ID").unwrap_or_default(),
            github_client_secret: var("GITHUB_CLIENT_SECRET").unwrap_or_default(),
        })
    }

    pub fn github_enabled(&self) -> bool {
        !self.github_client_id.is_empty() && !self.github_client_secret.is_empty()
    }
}
