//! Outbound e-mail for password recovery.
//!
//! The gate never talks SMTP itself. Messages are handed to a [`Mailer`]: in production the
//! [`NatsMailer`] publishes them on a subject that a mail relay subscribes to, and for local
//! development the [`LogMailer`] just logs them.

use std::future::Future;

use anyhow::Context;
use async_nats::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

pub const DEFAULT_MAIL_SUBJECT: &str = "quill.mail.send";
pub const CONTENT_TYPE: &str = "text/plain; charset=UTF-8";

/// A plain text e-mail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

impl MailMessage {
    pub fn new(
        to: impl Into<String>,
        from: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let from = from.into();
        Self {
            to: to.into(),
            headers: vec![
                ("From".to_string(), from.clone()),
                ("Content-Type".to_string(), CONTENT_TYPE.to_string()),
            ],
            from,
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Delivery of e-mail. An error means the message was not handed off.
pub trait Mailer: Send + Sync {
    fn send(&self, message: &MailMessage) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Publishes messages as JSON on a NATS subject for a mail relay to pick up
#[derive(Clone)]
pub struct NatsMailer {
    client: Client,
    subject: String,
}

impl NatsMailer {
    /// Creates a new mailer, publishing on [`DEFAULT_MAIL_SUBJECT`] unless a subject is given
    pub fn new(client: Client, subject: Option<String>) -> Self {
        Self {
            client,
            subject: subject.unwrap_or_else(|| DEFAULT_MAIL_SUBJECT.to_string()),
        }
    }
}

impl Mailer for NatsMailer {
    #[instrument(level = "debug", skip_all, fields(subject = %self.subject))]
    async fn send(&self, message: &MailMessage) -> anyhow::Result<()> {
        let body = serde_json::to_vec(message).context("Unable to serialize mail message")?;
        self.client
            .publish(self.subject.clone(), body.into())
            .await
            .context("Unable to publish mail message")?;
        // Make sure the message actually left before telling the user it was sent
        self.client
            .flush()
            .await
            .context("Unable to flush mail message")?;
        Ok(())
    }
}

/// Local dev mailer that logs the message instead of sending it
#[derive(Clone, Debug, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    async fn send(&self, message: &MailMessage) -> anyhow::Result<()> {
        info!(
            to = %message.to,
            from = %message.from,
            subject = %message.subject,
            body = %message.body,
            "mail send stub"
        );
        Ok(())
    }
}

/// The message carrying a recovery link
pub fn recovery_request(to: &str, from: &str, user_id: &str, link: &str) -> MailMessage {
    MailMessage::new(
        to,
        from,
        "Password reset",
        format!(
            "Someone has requested to reset the password for the following site and username.\n\n\
             Username: {user_id}\n\n\
             To reset your password visit the following address, otherwise just ignore this e-mail \
             and nothing will happen.\n\n\
             {link}\n"
        ),
    )
}

/// The message carrying a freshly generated password
pub fn recovery_credentials(
    to: &str,
    from: &str,
    user_id: &str,
    password: &str,
    login_url: &str,
) -> MailMessage {
    MailMessage::new(
        to,
        from,
        "Your new password",
        format!(
            "Username: {user_id}\n\
             Password: {password}\n\n\
             You will be asked to choose a new password when you log in at\n\
             {login_url}\n"
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers() {
        let message = recovery_request(
            "alice@example.org",
            "noreply@example.org",
            "alice",
            "https://example.org/admin/auth?akey=abc",
        );
        assert!(message
            .headers
            .contains(&("Content-Type".to_string(), CONTENT_TYPE.to_string())));
        assert!(message
            .headers
            .contains(&("From".to_string(), "noreply@example.org".to_string())));
        assert!(message.body.contains("akey=abc"));
        assert!(message.body.contains("Username: alice"));
    }
}
