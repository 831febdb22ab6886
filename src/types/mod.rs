use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::time::Duration;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

pub mod form;
mod secure;

pub use secure::*;

/// Everything stored about a user: their credentials and which blogs they can administer
#[derive(Debug, Clone, Encode, Decode)]
pub struct UserInfo {
    pub hashed_password: SecureString,
    /// Set by an administrator (or by password recovery). The user cannot log in until they pick
    /// a new password.
    pub must_change_password: bool,
    pub email: Option<String>,
    pub super_admin: bool,
    /// Blog id to the permissions the user holds on it
    pub blogs: BTreeMap<String, BTreeSet<String>>,
    pub recover: Option<RecoverKey>,
}

impl UserInfo {
    /// The public view of this user, without any credential material
    pub fn account(&self, user_id: &str) -> Account {
        Account {
            user_id: user_id.to_owned(),
            email: self.email.clone(),
            super_admin: self.super_admin,
            must_change_password: self.must_change_password,
            blogs: self.blogs.clone(),
        }
    }
}

/// A pending password recovery. Only the hash of the key is kept, the key itself is mailed out.
#[derive(Debug, Clone, Encode, Decode)]
pub struct RecoverKey {
    /// Lowercase hex SHA-256 of the key
    pub key_hash: String,
    /// Measured in seconds since the unix epoch
    pub expires_at: Duration,
}

/// What the login gate gets to know about a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: String,
    pub email: Option<String>,
    pub super_admin: bool,
    pub must_change_password: bool,
    pub blogs: BTreeMap<String, BTreeSet<String>>,
}

impl Account {
    /// Whether this account can work on the given blog. Super administrators can use any blog.
    pub fn can_use_blog(&self, blog_id: &str) -> bool {
        self.super_admin
            || self
                .blogs
                .get(blog_id)
                .map(|perms| !perms.is_empty())
                .unwrap_or(false)
    }

    /// The first blog (by id) this account holds at least one permission on
    pub fn default_blog(&self) -> Option<&str> {
        self.blogs
            .iter()
            .find(|(_, perms)| !perms.is_empty())
            .map(|(id, _)| id.as_str())
    }

    /// Whether there is anything at all this account could administer
    pub fn has_usable_blog(&self) -> bool {
        self.super_admin || self.default_blog().is_some()
    }
}

/// Server side state of a logged in admin session
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: String,
    /// See [`quill_tokens::browser_fingerprint`]
    pub browser_fingerprint: String,
    pub blog_id: Option<String>,
    pub safe_mode: bool,
    /// Measured in seconds since the unix epoch
    pub created_at: Duration,
}
