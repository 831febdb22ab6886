use std::sync::Arc;

use anyhow::Context;
use quill_tokens::ServerSecret;

pub const DEFAULT_MAIL_FROM: &str = "noreply@localhost";
pub const DEFAULT_ADMIN_URL: &str = "http://localhost:8080/auth";
pub const DEFAULT_HOME_PATH: &str = "/";

/// Site wide settings the login gate runs with. These are read only once the gate is built.
#[derive(Clone, Debug)]
pub struct GateConfig {
    /// The master secret everything handed to browsers is derived from
    pub secret: Arc<ServerSecret>,
    /// Whether cookies should only be sent over HTTPS
    pub secure_cookies: bool,
    /// Address recovery e-mails are sent from
    pub mail_from: String,
    /// Absolute URL of the login page, used in links sent by e-mail
    pub admin_url: String,
    /// Where users are redirected after logging in
    pub home_path: String,
}

impl GateConfig {
    /// Creates a config with defaults for everything but the secret. Fails if the secret is too
    /// short to be used.
    pub fn new(secret: impl AsRef<[u8]>) -> anyhow::Result<Self> {
        let secret = ServerSecret::new(secret).context("Invalid server secret")?;
        Ok(GateConfig {
            secret: Arc::new(secret),
            secure_cookies: false,
            mail_from: DEFAULT_MAIL_FROM.to_string(),
            admin_url: DEFAULT_ADMIN_URL.to_string(),
            home_path: DEFAULT_HOME_PATH.to_string(),
        })
    }

    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    pub fn with_mail_from(mut self, from: impl Into<String>) -> anyhow::Result<Self> {
        let from = from.into();
        if !from.contains('@') {
            anyhow::bail!("Mail from address {from:?} is not an e-mail address");
        }
        self.mail_from = from;
        Ok(self)
    }

    pub fn with_admin_url(mut self, url: impl Into<String>) -> anyhow::Result<Self> {
        let url = url.into();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("Admin URL {url:?} must be an absolute http(s) URL");
        }
        self.admin_url = url;
        Ok(self)
    }

    pub fn with_home_path(mut self, path: impl Into<String>) -> anyhow::Result<Self> {
        let path = path.into();
        // Only local redirects
        if !path.starts_with('/') || path.starts_with("//") {
            anyhow::bail!("Home path {path:?} must be an absolute local path");
        }
        self.home_path = path;
        Ok(self)
    }

    /// The link mailed out for a recovery request
    pub fn recovery_link(&self, key: &str) -> String {
        let separator = if self.admin_url.contains('?') { '&' } else { '?' };
        format!("{}{separator}akey={key}", self.admin_url)
    }
}
