//! The login state machine of the admin interface.
//!
//! A [`Gate`] takes one decoded [`AuthRequest`], works out the single [`Intent`] it carries and
//! returns a [`GateOutcome`] describing what should happen next. It never sees HTTP and never
//! writes cookies or sessions itself, so it can be driven directly from tests.

use quill_tokens::{browser_fingerprint, PendingChange, RememberCookie};
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    config::GateConfig,
    credentials::CredentialStore,
    error::{AuthError, ErrorKind, Result},
    mail::{self, Mailer},
    types::{Account, SecureString},
};

mod intent;
mod outcome;

pub use intent::{AuthRequest, Credential, Intent, IntentKind};
pub use outcome::{CookieDirective, GateOutcome, Notice, SessionGrant, View};

pub struct Gate<C, M> {
    credentials: C,
    mailer: M,
    config: GateConfig,
}

impl<C: CredentialStore, M: Mailer> Gate<C, M> {
    pub fn new(credentials: C, mailer: M, config: GateConfig) -> Self {
        Gate {
            credentials,
            mailer,
            config,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn credentials(&self) -> &C {
        &self.credentials
    }

    /// Handles a single request. Every failure ends up as an error notice on the outcome, nothing
    /// is returned as an error.
    pub async fn handle(&self, req: AuthRequest) -> GateOutcome {
        let intent = Intent::detect(&req, self.credentials.password_change_allowed());
        debug!(intent = ?intent.kind(), "Handling auth request");
        match intent {
            Intent::RecoverRequest { user_id, email } => self.recover_request(user_id, email).await,
            Intent::RecoverRedeem { key } => self.recover_redeem(&key).await,
            Intent::ForcedChangeSubmit {
                login_data,
                new_password,
                confirm,
            } => {
                self.forced_change(login_data, new_password, confirm, &req)
                    .await
            }
            Intent::DirectLogin {
                user_id,
                credential,
                cookie_present,
            } => {
                self.direct_login(user_id, credential, cookie_present, &req)
                    .await
            }
            Intent::NoAction { prefill, recover } => GateOutcome::new(
                IntentKind::NoAction,
                View::Login {
                    user_id: prefill,
                    recover,
                },
            ),
        }
    }

    #[instrument(level = "debug", skip(self, email))]
    async fn recover_request(&self, user_id: String, email: String) -> GateOutcome {
        match self.send_recovery_link(&user_id, &email).await {
            Ok(()) => GateOutcome::login(IntentKind::RecoverRequest, Some(user_id))
                .success(format!("The e-mail was sent successfully to {email}.")),
            Err(err) => {
                log_failure(&err, "Password recovery request failed");
                GateOutcome::new(
                    IntentKind::RecoverRequest,
                    View::Login {
                        user_id: Some(user_id),
                        recover: true,
                    },
                )
                .error(&err)
            }
        }
    }

    async fn send_recovery_link(&self, user_id: &str, email: &str) -> Result<()> {
        let key = self.credentials.issue_recover_key(user_id, email).await?;
        let link = self.config.recovery_link(key.as_ref());
        let message = mail::recovery_request(email, &self.config.mail_from, user_id, &link);
        self.mailer.send(&message).await?;
        Ok(())
    }

    #[instrument(level = "debug", skip_all)]
    async fn recover_redeem(&self, key: &str) -> GateOutcome {
        match self.send_new_password(key).await {
            Ok(user_id) => GateOutcome::login(IntentKind::RecoverRedeem, Some(user_id))
                .success("Your new password is in your mailbox."),
            Err(err) => {
                log_failure(&err, "Password recovery redemption failed");
                GateOutcome::login(IntentKind::RecoverRedeem, None).error(&err)
            }
        }
    }

    async fn send_new_password(&self, key: &str) -> Result<String> {
        let recovered = self.credentials.redeem_recover_key(key).await?;
        let message = mail::recovery_credentials(
            &recovered.email,
            &self.config.mail_from,
            &recovered.user_id,
            recovered.new_password.as_ref(),
            &self.config.admin_url,
        );
        self.mailer.send(&message).await?;
        Ok(recovered.user_id)
    }

    #[instrument(level = "debug", skip_all)]
    async fn forced_change(
        &self,
        login_data: String,
        new_password: SecureString,
        confirm: SecureString,
        req: &AuthRequest,
    ) -> GateOutcome {
        const KIND: IntentKind = IntentKind::ForcedChangeSubmit;

        let pending = match self.check_pending_change(&login_data).await {
            Ok(pending) => pending,
            Err(err) => {
                log_failure(&err, "Rejected password change");
                // Garbage bundles get the same answer as forged ones
                let shown = match err.kind() {
                    ErrorKind::Malformed => AuthError::ChangeRejected,
                    _ => err,
                };
                return GateOutcome::login(KIND, None).error(&shown);
            }
        };
        // From here on the user can fix their input and try again with the same bundle
        let retry = |err: &AuthError| {
            GateOutcome::new(
                KIND,
                View::ChangePassword {
                    login_data: login_data.clone(),
                },
            )
            .error(err)
        };

        if new_password != confirm {
            return retry(&AuthError::PasswordMismatch);
        }
        match self
            .credentials
            .verify_password(&pending.user_id, &new_password)
            .await
        {
            Ok(false) => {}
            Ok(true) => return retry(&AuthError::PasswordUnchanged),
            Err(err) => {
                log_failure(&err, "Unable to check current password");
                return retry(&err);
            }
        }
        if let Err(err) = self
            .credentials
            .set_password(&pending.user_id, new_password)
            .await
        {
            log_failure(&err, "Unable to set new password");
            return retry(&err);
        }
        info!(user_id = %pending.user_id, "Forced password change completed");

        let account = match self.credentials.account(&pending.user_id).await {
            Ok(Some(account)) => account,
            Ok(None) => return GateOutcome::login(KIND, None).error(&AuthError::ChangeRejected),
            Err(err) => {
                log_failure(&err, "Unable to load account after password change");
                return GateOutcome::login(KIND, Some(pending.user_id)).error(&err);
            }
        };
        self.logged_in(KIND, &account, pending.remember, None, false, req)
    }

    /// Decodes and checks a submitted bundle. A bundle that does not decode is
    /// [`AuthError::Malformed`], every other failure is [`AuthError::ChangeRejected`].
    async fn check_pending_change(&self, login_data: &str) -> Result<PendingChange> {
        let pending = PendingChange::decode(login_data).map_err(|err| {
            debug!(%err, "Malformed password change bundle");
            AuthError::Malformed
        })?;
        if !pending.verify(&self.config.secret) {
            warn!(user_id = %pending.user_id, "Password change bundle does not verify");
            return Err(AuthError::ChangeRejected);
        }
        if !self.credentials.password_change_allowed() {
            return Err(AuthError::ChangeRejected);
        }
        match self.credentials.account(&pending.user_id).await? {
            Some(account) if account.must_change_password => Ok(pending),
            _ => Err(AuthError::ChangeRejected),
        }
    }

    #[instrument(level = "debug", skip(self, credential, req))]
    async fn direct_login(
        &self,
        user_id: String,
        credential: Credential,
        cookie_present: bool,
        req: &AuthRequest,
    ) -> GateOutcome {
        const KIND: IntentKind = IntentKind::DirectLogin;

        let account = match self.check_credentials(&user_id, &credential).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                let (err, outcome) = if cookie_present {
                    (
                        AuthError::SessionExpired,
                        GateOutcome::login(KIND, Some(user_id))
                            .cookie(CookieDirective::ClearRemember),
                    )
                } else {
                    (
                        AuthError::InvalidCredentials,
                        GateOutcome::login(KIND, Some(user_id)),
                    )
                };
                info!("Login failed");
                return outcome.error(&err);
            }
            Err(err) => {
                log_failure(&err, "Unable to check credentials");
                return GateOutcome::login(KIND, Some(user_id)).error(&err);
            }
        };

        if !account.has_usable_blog() {
            info!("Login refused, no usable blog");
            return GateOutcome::login(KIND, Some(user_id)).error(&AuthError::NoBlogAccess);
        }

        if account.must_change_password {
            if !self.credentials.password_change_allowed() {
                return GateOutcome::login(KIND, Some(user_id))
                    .error(&AuthError::ChangeDisallowed);
            }
            let pending = PendingChange::new(&self.config.secret, &user_id, req.remember);
            debug!("Password change required");
            return GateOutcome::new(
                KIND,
                View::ChangePassword {
                    login_data: pending.encode(),
                },
            );
        }

        if req.safe_mode && !account.super_admin {
            warn!("Safe mode requested by a regular user");
            return GateOutcome::login(KIND, Some(user_id)).error(&AuthError::SafeModeDenied);
        }

        self.logged_in(
            KIND,
            &account,
            req.remember,
            req.blog.as_deref(),
            req.safe_mode,
            req,
        )
    }

    /// Returns the account if the credential is good for it
    async fn check_credentials(
        &self,
        user_id: &str,
        credential: &Credential,
    ) -> Result<Option<Account>> {
        let valid = match credential {
            Credential::Password(password) => {
                self.credentials.verify_password(user_id, password).await?
            }
            Credential::Token(token) => token.verify(&self.config.secret, user_id),
        };
        if !valid {
            return Ok(None);
        }
        self.credentials.account(user_id).await
    }

    fn logged_in(
        &self,
        kind: IntentKind,
        account: &Account,
        remember: bool,
        requested_blog: Option<&str>,
        safe_mode: bool,
        req: &AuthRequest,
    ) -> GateOutcome {
        let blog_id = requested_blog
            .filter(|blog| account.can_use_blog(blog))
            .or_else(|| account.default_blog())
            .map(ToOwned::to_owned);
        let grant = SessionGrant {
            user_id: account.user_id.clone(),
            fingerprint: browser_fingerprint(&self.config.secret, &req.client_signal),
            blog_id,
            safe_mode,
        };
        info!(user_id = %account.user_id, safe_mode, "Login succeeded");

        let outcome = GateOutcome::new(kind, View::Redirect(self.config.home_path.clone()))
            .session(grant);
        if remember {
            outcome.cookie(CookieDirective::SetRemember(RememberCookie::build(
                &self.config.secret,
                &account.user_id,
            )))
        } else {
            outcome
        }
    }
}

fn log_failure(err: &AuthError, msg: &str) {
    match err.kind() {
        ErrorKind::Downstream => warn!(%err, "{msg}"),
        ErrorKind::Malformed => trace!(%err, "{msg}"),
        _ => debug!(%err, "{msg}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        accounts::{Accounts, NewUser},
        mail::LogMailer,
        storage::MemoryStore,
    };

    async fn gate() -> Gate<Accounts<MemoryStore>, LogMailer> {
        let accounts = Accounts::new(MemoryStore::new(), true);
        accounts
            .add_user(NewUser {
                user_id: "bob".to_string(),
                password: "bobsecret".into(),
                email: None,
                super_admin: false,
                force_password_change: true,
            })
            .await
            .unwrap();
        let config = GateConfig::new("a test secret that is long enough").unwrap();
        Gate::new(accounts, LogMailer, config)
    }

    #[tokio::test]
    async fn test_pending_change_errors() {
        let gate = gate().await;
        for garbage in ["not a bundle", "Ym9i/abc/0", "Ym9i/x/y/z"] {
            let err = gate
                .check_pending_change(garbage)
                .await
                .expect_err("Garbage bundles should fail");
            assert_eq!(err.kind(), ErrorKind::Malformed, "{garbage}");
        }

        let other = quill_tokens::ServerSecret::new("some other secret entirely").unwrap();
        let forged = PendingChange::new(&other, "bob", false).encode();
        let err = gate
            .check_pending_change(&forged)
            .await
            .expect_err("Forged bundles should fail");
        assert!(matches!(err, AuthError::ChangeRejected));

        let real = PendingChange::new(&gate.config.secret, "bob", true).encode();
        let pending = gate
            .check_pending_change(&real)
            .await
            .expect("A genuine bundle should pass");
        assert_eq!(pending.user_id, "bob");
        assert!(pending.remember);
    }
}
