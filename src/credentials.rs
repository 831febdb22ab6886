use std::future::Future;

use crate::{error::Result, types::Account, SecureString};

/// The outcome of redeeming a recovery key
#[derive(Debug, Clone)]
pub struct Recovered {
    pub user_id: String,
    pub email: String,
    /// The freshly generated password, to be mailed to the user
    pub new_password: SecureString,
}

/// Everything the login gate needs to know and change about user credentials. Implementations
/// must treat each call as atomic for a single user id.
pub trait CredentialStore: Send + Sync {
    /// Fetches the account for the given user id. Returns `None` if the user doesn't exist.
    fn account(&self, user_id: &str) -> impl Future<Output = Result<Option<Account>>> + Send;

    /// Checks the password of the given user. Unknown users are simply not verified.
    fn verify_password(
        &self,
        user_id: &str,
        password: &SecureString,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Whether users may change (and therefore recover) their own passwords
    fn password_change_allowed(&self) -> bool;

    /// Replaces the user's password and clears any forced change flag
    fn set_password(
        &self,
        user_id: &str,
        new_password: SecureString,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Issues a recovery key if the e-mail matches the one on file. Fails with
    /// [`AuthError::RecoverMismatch`](crate::error::AuthError::RecoverMismatch) whether the user
    /// or the e-mail was wrong.
    fn issue_recover_key(
        &self,
        user_id: &str,
        email: &str,
    ) -> impl Future<Output = Result<SecureString>> + Send;

    /// Redeems a recovery key for a new generated password. A key can only be redeemed once.
    fn redeem_recover_key(&self, key: &str) -> impl Future<Output = Result<Recovered>> + Send;
}
