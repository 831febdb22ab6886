use std::fmt::Display;
use std::str::FromStr;

use base64::{engine::general_purpose::URL_SAFE, Engine as _};

use crate::remember::RememberToken;
use crate::secret::ServerSecret;

const FIELD_SEPARATOR: char = '/';
const FIELD_COUNT: usize = 3;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum BundleError {
    #[error("expected {n} fields, got {0}", n = FIELD_COUNT)]
    FieldCount(usize),
    #[error("user id is not valid base64")]
    UserId,
    #[error("user id is not valid utf-8")]
    Utf8,
    #[error("token is not a {len} character hex digest", len = crate::DIGEST_HEX_LEN)]
    Token,
    #[error("remember flag must be 0 or 1")]
    RememberFlag,
}

/// The state carried through the browser while a user who must change their password fills in
/// the change form. Nothing of it is stored server side, so the token is re-checked on submit.
///
/// The wire form is `base64(user_id)/token/flag`. The url-safe base64 alphabet is used so the
/// encoded user id can never contain the separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub user_id: String,
    pub token: RememberToken,
    pub remember: bool,
}

impl PendingChange {
    /// Creates a bundle for the given user with a freshly derived token
    pub fn new(secret: &ServerSecret, user_id: &str, remember: bool) -> Self {
        Self {
            user_id: user_id.to_owned(),
            token: RememberToken::derive(secret, user_id),
            remember,
        }
    }

    pub fn encode(&self) -> String {
        format!(
            "{}{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{}",
            URL_SAFE.encode(self.user_id.as_bytes()),
            self.token.as_str(),
            if self.remember { "1" } else { "0" }
        )
    }

    /// Decodes the bundle as a single unit. Any malformed field fails the whole bundle.
    pub fn decode(raw: &str) -> Result<Self, BundleError> {
        let fields: Vec<&str> = raw.split(FIELD_SEPARATOR).collect();
        let [user_id, token, remember] = fields.as_slice() else {
            return Err(BundleError::FieldCount(fields.len()));
        };
        let user_id = URL_SAFE.decode(user_id).map_err(|_| BundleError::UserId)?;
        let user_id = String::from_utf8(user_id).map_err(|_| BundleError::Utf8)?;
        let token = RememberToken::parse(token).ok_or(BundleError::Token)?;
        let remember = match *remember {
            "1" => true,
            "0" => false,
            _ => return Err(BundleError::RememberFlag),
        };
        Ok(Self {
            user_id,
            token,
            remember,
        })
    }

    /// Whether the token in this bundle was issued by this server for its user id
    pub fn verify(&self, secret: &ServerSecret) -> bool {
        self.token.verify(secret, &self.user_id)
    }
}

impl Display for PendingChange {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for PendingChange {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}
