use std::{
    collections::BTreeSet,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::Context;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, instrument};

use crate::{
    credentials::{CredentialStore, Recovered},
    error::{AuthError, Result},
    storage::UserRepository,
    types::{Account, RecoverKey, SecureString, UserInfo},
};

/// Passwords shorter than this (in characters) are refused
pub const MIN_PASSWORD_LEN: usize = 6;

/// How long a recovery key stays redeemable unless configured otherwise
pub const DEFAULT_RECOVER_KEY_TTL: Duration = Duration::from_secs(60 * 60 * 24);
const RECOVER_KEY_LEN: usize = 32;
const GENERATED_PASSWORD_LEN: usize = 12;

/// A new user to create through the admin tooling
#[derive(Debug, Clone)]
pub struct NewUser {
    pub user_id: String,
    pub password: SecureString,
    pub email: Option<String>,
    pub super_admin: bool,
    pub force_password_change: bool,
}

/// Credential handling on top of a [`UserRepository`]: hashing, verification, forced changes and
/// password recovery.
pub struct Accounts<R> {
    store: Arc<R>,
    allow_password_change: bool,
    recover_key_ttl: Duration,
}

impl<R> Clone for Accounts<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            allow_password_change: self.allow_password_change,
            recover_key_ttl: self.recover_key_ttl,
        }
    }
}

impl<R: UserRepository> Accounts<R> {
    /// Configures the accounts with the given store. When `allow_password_change` is false users
    /// can neither change nor recover their own password.
    pub fn new(store: R, allow_password_change: bool) -> Accounts<R> {
        Accounts {
            store: Arc::new(store),
            allow_password_change,
            recover_key_ttl: DEFAULT_RECOVER_KEY_TTL,
        }
    }

    /// Sets how long issued recovery keys can be redeemed for
    pub fn with_recover_key_ttl(mut self, ttl: Duration) -> Self {
        self.recover_key_ttl = ttl;
        self
    }

    /// Add the given user to the system. This is meant to be used by admins only
    #[instrument(level = "debug", skip_all, fields(user_id = %user.user_id))]
    pub async fn add_user(&self, user: NewUser) -> Result<()> {
        check_password_policy(&user.password)?;

        let info = UserInfo {
            hashed_password: hash_password(&user.password)?,
            must_change_password: user.force_password_change,
            email: user.email,
            super_admin: user.super_admin,
            blogs: Default::default(),
            recover: None,
        };
        if !self.store.create_user(&user.user_id, info).await? {
            return Err(AuthError::UsernameTaken);
        }
        info!("User added");
        Ok(())
    }

    /// Grants permissions on a blog. Returns the complete set of permissions the user holds on it
    /// after the change.
    pub async fn grant_blog(
        &self,
        user_id: &str,
        blog_id: &str,
        permissions: BTreeSet<String>,
    ) -> Result<BTreeSet<String>> {
        self.update_existing(user_id, |user| {
            let perms = user.blogs.entry(blog_id.to_owned()).or_default();
            perms.extend(permissions.iter().cloned());
            Ok(perms.clone())
        })
        .await
    }

    /// Removes all permissions the user holds on a blog
    pub async fn revoke_blog(&self, user_id: &str, blog_id: &str) -> Result<()> {
        self.update_existing(user_id, |user| {
            user.blogs.remove(blog_id);
            Ok(())
        })
        .await
    }

    /// Flags the user so they have to pick a new password at their next login
    pub async fn require_password_change(&self, user_id: &str) -> Result<()> {
        self.update_existing(user_id, |user| {
            user.must_change_password = true;
            Ok(())
        })
        .await
    }

    /// Delete the given user
    pub async fn delete_user(&self, user_id: &str) -> Result<()> {
        self.store
            .delete_user(user_id)
            .await
            .map_err(AuthError::from)
    }

    /// Get all user ids
    pub async fn list_users(&self) -> Result<Vec<String>> {
        self.store.list_users().await.map_err(AuthError::from)
    }

    async fn update_existing<T, F>(&self, user_id: &str, update: F) -> Result<T>
    where
        T: Send,
        F: FnMut(&mut UserInfo) -> Result<T> + Send,
    {
        self.store
            .update_user(user_id, update)
            .await?
            .ok_or(AuthError::UsernameDoesNotExist)
    }

    /// Finds the user holding the given recovery key hash. The key is not checked for expiry here.
    async fn find_recover_key_owner(&self, key_hash: &str) -> Result<Option<String>> {
        for user_id in self.store.list_users().await? {
            let Some(user) = self.store.get_user(&user_id).await else {
                continue;
            };
            if user
                .recover
                .as_ref()
                .is_some_and(|recover| recover.key_hash == key_hash)
            {
                return Ok(Some(user_id));
            }
        }
        Ok(None)
    }
}

impl<R: UserRepository> CredentialStore for Accounts<R> {
    async fn account(&self, user_id: &str) -> Result<Option<Account>> {
        Ok(self
            .store
            .get_user(user_id)
            .await
            .map(|user| user.account(user_id)))
    }

    #[instrument(level = "debug", skip(self, password))]
    async fn verify_password(&self, user_id: &str, password: &SecureString) -> Result<bool> {
        let Some(user) = self.store.get_user(user_id).await else {
            debug!("Password check for unknown user");
            return Ok(false);
        };
        verify_password(&user, password)
    }

    fn password_change_allowed(&self) -> bool {
        self.allow_password_change
    }

    #[instrument(level = "debug", skip(self, new_password))]
    async fn set_password(&self, user_id: &str, new_password: SecureString) -> Result<()> {
        check_password_policy(&new_password)?;
        let hashed = hash_password(&new_password)?;
        self.update_existing(user_id, |user| {
            user.hashed_password = hashed.clone();
            user.must_change_password = false;
            user.recover = None;
            Ok(())
        })
        .await?;
        info!("Password changed");
        Ok(())
    }

    #[instrument(level = "debug", skip(self, email))]
    async fn issue_recover_key(&self, user_id: &str, email: &str) -> Result<SecureString> {
        let key: SecureString = random_alphanumeric(RECOVER_KEY_LEN).into();
        let recover = RecoverKey {
            key_hash: hash_recover_key(key.as_ref()),
            expires_at: current_time()? + self.recover_key_ttl,
        };
        // Checked against the record being written
        self.store
            .update_user(user_id, |user| {
                if !email_matches(user.email.as_deref(), email) {
                    return Err(AuthError::RecoverMismatch);
                }
                user.recover = Some(recover.clone());
                Ok(())
            })
            .await?
            .ok_or(AuthError::RecoverMismatch)?;
        info!("Issued password recovery key");
        Ok(key)
    }

    #[instrument(level = "debug", skip_all)]
    async fn redeem_recover_key(&self, key: &str) -> Result<Recovered> {
        let key_hash = hash_recover_key(key);
        let now = current_time()?;

        let Some(user_id) = self.find_recover_key_owner(&key_hash).await? else {
            return Err(AuthError::InvalidRecoverKey);
        };

        let new_password: SecureString = random_alphanumeric(GENERATED_PASSWORD_LEN).into();
        let hashed = hash_password(&new_password)?;
        // The key is checked again against the record being written
        let email = self
            .store
            .update_user(&user_id, |user| {
                let recover = user.recover.take().ok_or(AuthError::InvalidRecoverKey)?;
                if recover.key_hash != key_hash || now >= recover.expires_at {
                    debug!("Recovery key is used or expired");
                    return Err(AuthError::InvalidRecoverKey);
                }
                let email = user.email.clone().ok_or(AuthError::InvalidRecoverKey)?;
                user.hashed_password = hashed.clone();
                // The generated password is only good for getting back in
                user.must_change_password = true;
                Ok(email)
            })
            .await?
            .ok_or(AuthError::InvalidRecoverKey)?;
        info!(%user_id, "Recovery key redeemed");

        Ok(Recovered {
            user_id,
            email,
            new_password,
        })
    }
}

fn email_matches(on_file: Option<&str>, submitted: &str) -> bool {
    on_file
        .map(|on_file| on_file.trim().eq_ignore_ascii_case(submitted.trim()))
        .unwrap_or(false)
}

fn check_password_policy(password: &SecureString) -> Result<()> {
    if password.char_count() < MIN_PASSWORD_LEN {
        return Err(AuthError::PasswordTooShort(MIN_PASSWORD_LEN));
    }
    Ok(())
}

fn hash_password(password: &SecureString) -> Result<SecureString> {
    let salt = SaltString::generate(&mut OsRng);
    let argon = Argon2::default();
    let password: &[u8] = password.as_ref();
    argon
        .hash_password(password, &salt)
        .map_err(|err| {
            error!(%err, "Error occurred when hashing password");
            AuthError::SystemError(anyhow::anyhow!("Error when hashing"))
        })
        .map(|hashed| hashed.to_string().into())
}

// Verifies the given password against the stored hash. Only a corrupt stored hash is an error, a
// wrong password is just `false`.
fn verify_password(user: &UserInfo, password: &SecureString) -> Result<bool> {
    let password_hash = match PasswordHash::new(user.hashed_password.as_ref()) {
        Ok(hash) => hash,
        Err(err) => {
            error!(%err, "Error occurred when parsing password hash. This is likely a data corruption issue!");
            return Err(AuthError::SystemError(anyhow::anyhow!(
                "Error when reading user"
            )));
        }
    };
    let password: &[u8] = password.as_ref();
    Ok(Argon2::default()
        .verify_password(password, &password_hash)
        .is_ok())
}

fn hash_recover_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn random_alphanumeric(len: usize) -> String {
    std::iter::repeat(())
        .map(|()| OsRng.sample(Alphanumeric))
        .map(char::from)
        .take(len)
        .collect()
}

fn current_time() -> anyhow::Result<Duration> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("Unable to calculate current system time")
}
