//! Outgoing mail. Handlers enqueue on a bounded channel and move on; a
//! single worker hands each message to the configured transport.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::SmtpConfig;

const QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Mail {
    pub fn verification(to: &str, site: &str, token: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "Confirm your email address".to_string(),
            body: format!(
                "Welcome!\n\nConfirm your address by opening:\n{site}/verify?token={token}\n\nThe link expires in 24 hours."
            ),
        }
    }

    pub fn password_reset(to: &str, site: &str, token: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "Reset your password".to_string(),
            body: format!(
                "Someone asked to reset your password.\n\nChoose a new one at:\n{site}/reset-password?token={token}\n\nIgnore this message if it was not you."
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("cannot build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("smtp: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("transport failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait MailTransport: Send + Sync + 'static {
    async fn deliver(&self, mail: &Mail) -> Result<(), MailError>;
}

/// Sends through an authenticated SMTP relay. Port 465 gets implicit TLS,
/// anything else STARTTLS.
pub struct SmtpTransport {
    relay: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpTransport {
    pub fn new(smtp: &SmtpConfig) -> Result<Self, MailError> {
        let builder = if smtp.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)?
        };
        let relay = builder
            .port(smtp.port)
            .credentials(Credentials::new(smtp.user.clone(), smtp.password.clone()))
            .build();
        Ok(Self {
            relay,
            from: smtp.from.parse()?,
        })
    }

    fn message(&self, mail: &Mail) -> Result<Message, MailError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(mail.to.parse()?)
            .subject(mail.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone())?;
        Ok(message)
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn deliver(&self, mail: &Mail) -> Result<(), MailError> {
        let message = self.message(mail)?;
        self.relay.send(message).await?;
        tracing::info!(to = %mail.to, subject = %mail.subject, "mail sent");
        Ok(())
    }
}

/// Writes the envelope to the log instead of sending. Used when SMTP is not
/// configured.
#[derive(Default)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn deliver(&self, mail: &Mail) -> Result<(), MailError> {
        tracing::info!(to = %mail.to, subject = %mail.subject, "mail not sent, no smtp relay");
        Ok(())
    }
}

/// Keeps every delivered message in memory.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    sent: Arc<Mutex<Vec<Mail>>>,
}

impl MemoryTransport {
    pub fn sent(&self) -> Vec<Mail> {
        self.sent.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MailTransport for MemoryTransport {
    async fn deliver(&self, mail: &Mail) -> Result<(), MailError> {
        self.sent
            .lock()
            .map_err(|_| MailError::Transport("mailbox poisoned".into()))?
            .push(mail.clone());
        Ok(())
    }
}

#[derive(Clone)]
pub struct Mailer {
    tx: mpsc::Sender<Mail>,
}

impl Mailer {
    /// Starts the delivery worker on the current runtime.
    pub fn spawn(transport: Arc<dyn MailTransport>) -> Self {
        let (tx, mut rx) = mpsc::channel::<Mail>(QUEUE_DEPTH);
        tokio::spawn(async move {
            while let Some(mail) = rx.recv().await {
                if let Err(e) = transport.deliver(&mail).await {
                    tracing::warn!(to = %mail.to, error = %e, "mail delivery failed");
                }
            }
            tracing::debug!("mail queue closed");
        });
        Self { tx }
    }

    /// Waits for room in the queue, never for delivery.
    pub async fn send(&self, mail: Mail) {
        if let Err(e) = self.tx.send(mail).await {
            tracing::warn!(to = %e.0.to, "mail queue is closed, message dropped");
        }
    }
}
