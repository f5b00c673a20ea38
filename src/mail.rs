//! Outgoing account mail: address verification and password reset.
//!
//! [`SmtpMailer`] delivers over SMTP. [`OutboxMailer`] keeps messages in
//! memory and logs them, for development and tests.

use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use serde::Deserialize;
use std::sync::Mutex;
use thiserror::Error;

/// SMTP settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// Optional for local testing.
    #[serde(default)]
    pub smtp_user: Option<String>,
    #[serde(default)]
    pub smtp_pass: Option<String>,
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_name() -> String {
    "Site Services".to_string()
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Failed to build email: {0}")]
    MessageError(String),
    #[error("Failed to send email: {0}")]
    TransportError(String),
}

/// A rendered message ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// The action link embedded in the body.
    pub link: String,
}

impl OutgoingMail {
    pub fn verification(to: &str, name: Option<&str>, link: &str) -> Self {
        let body = format!(
            r#"{greeting}

Please confirm your email address by opening the link below:

{link}

If you didn't create an account, you can ignore this email."#,
            greeting = greeting(name)
        );

        Self {
            to: to.to_string(),
            subject: "Verify your email address".to_string(),
            body,
            link: link.to_string(),
        }
    }

    pub fn password_reset(to: &str, name: Option<&str>, link: &str) -> Self {
        let body = format!(
            r#"{greeting}

Open the link below to choose a new password:

{link}

If you didn't ask to reset your password, you can ignore this email."#,
            greeting = greeting(name)
        );

        Self {
            to: to.to_string(),
            subject: "Reset your password".to_string(),
            body,
            link: link.to_string(),
        }
    }
}

fn greeting(name: Option<&str>) -> String {
    match name {
        Some(n) if !n.is_empty() => format!("Hi {},", n),
        _ => "Hi,".to_string(),
    }
}

/// Delivers account mail.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError>;
}

/// SMTP delivery.
#[derive(Clone)]
pub struct SmtpMailer {
    config: EmailConfig,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn build_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, MailError> {
        let mut builder = if self.config.smtp_port == 465 {
            // SSL/TLS on port 465
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.smtp_host)
                .map_err(|e| MailError::TransportError(e.to_string()))?
                .port(465)
        } else {
            // STARTTLS on port 587 or plain for local testing
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)
                .map_err(|e| MailError::TransportError(e.to_string()))?
                .port(self.config.smtp_port)
        };

        if let (Some(user), Some(pass)) = (&self.config.smtp_user, &self.config.smtp_pass) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError> {
        let from = format!("{} <{}>", self.config.from_name, self.config.from_email);

        let message = Message::builder()
            .from(
                from.parse()
                    .map_err(|e| MailError::MessageError(format!("{}", e)))?,
            )
            .to(mail
                .to
                .parse()
                .map_err(|e| MailError::MessageError(format!("{}", e)))?)
            .subject(mail.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body)
            .map_err(|e| MailError::MessageError(e.to_string()))?;

        let transport = self.build_transport()?;

        transport
            .send(message)
            .await
            .map_err(|e| MailError::TransportError(e.to_string()))?;

        tracing::info!("Sent mail to {}", mail.to);
        Ok(())
    }
}

impl std::fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpMailer")
            .field("smtp_host", &self.config.smtp_host)
            .field("smtp_port", &self.config.smtp_port)
            .field("from_email", &self.config.from_email)
            .finish()
    }
}

/// Keeps sent mail in memory.
#[derive(Debug, Default)]
pub struct OutboxMailer {
    sent: Mutex<Vec<OutgoingMail>>,
}

impl OutboxMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, oldest first.
    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The most recent message sent to `to`.
    pub fn last_to(&self, to: &str) -> Option<OutgoingMail> {
        self.sent().into_iter().rev().find(|m| m.to == to)
    }
}

#[async_trait]
impl Mailer for OutboxMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError> {
        tracing::info!("Outbox mail to {}: {} ({})", mail.to, mail.subject, mail.link);
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(mail);
        Ok(())
    }
}
