use quill_tokens::{RememberCookie, RememberToken};

use crate::types::{
    form::{flag, non_empty, AuthForm},
    SecureString,
};

/// A decoded request to the login endpoint
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    pub user_id: Option<String>,
    pub password: Option<SecureString>,
    pub new_password: Option<SecureString>,
    pub new_password_confirm: Option<SecureString>,
    /// The pending password change bundle, as submitted
    pub login_data: Option<String>,
    pub recover: bool,
    pub email: Option<String>,
    pub recover_key: Option<String>,
    pub safe_mode: bool,
    pub blog: Option<String>,
    pub remember: bool,
    /// Query string override of the user id shown in the login form
    pub prefill_user: Option<String>,
    /// Only set for a well formed cookie, a malformed one is the same as none
    pub remember_cookie: Option<RememberCookie>,
    /// What the browser fingerprint is derived from, usually the user agent
    pub client_signal: String,
}

impl AuthRequest {
    pub fn from_form(
        form: AuthForm,
        remember_cookie: Option<&str>,
        client_signal: impl Into<String>,
    ) -> Self {
        AuthRequest {
            recover: flag(&form.recover),
            safe_mode: flag(&form.safe_mode),
            remember: flag(&form.user_remember),
            user_id: non_empty(form.user_id),
            password: form.user_pwd.and_then(SecureString::non_empty),
            // Presence matters for these, not content
            new_password: form.new_pwd,
            new_password_confirm: form.new_pwd_c,
            login_data: form.login_data,
            email: non_empty(form.user_email),
            recover_key: non_empty(form.akey),
            blog: non_empty(form.blog),
            prefill_user: non_empty(form.user),
            remember_cookie: remember_cookie.and_then(RememberCookie::parse),
            client_signal: client_signal.into(),
        }
    }
}

/// How a direct login proves who the user is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Password(SecureString),
    Token(RememberToken),
}

/// The one action a request asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    RecoverRequest {
        user_id: String,
        email: String,
    },
    RecoverRedeem {
        key: String,
    },
    ForcedChangeSubmit {
        login_data: String,
        new_password: SecureString,
        confirm: SecureString,
    },
    DirectLogin {
        user_id: String,
        credential: Credential,
        cookie_present: bool,
    },
    /// Nothing to act on. `recover` asks for the recovery form, as the "forgot password" link does.
    NoAction {
        prefill: Option<String>,
        recover: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    RecoverRequest,
    RecoverRedeem,
    ForcedChangeSubmit,
    DirectLogin,
    NoAction,
}

impl IntentKind {
    /// The order intents are tried in. The first one the request carries wins.
    pub const PRECEDENCE: [IntentKind; 5] = [
        IntentKind::RecoverRequest,
        IntentKind::RecoverRedeem,
        IntentKind::ForcedChangeSubmit,
        IntentKind::DirectLogin,
        IntentKind::NoAction,
    ];

    /// Returns the intent of this kind if the request carries it. Recovery is only offered when
    /// users may change their own password.
    fn extract(self, req: &AuthRequest, recovery_enabled: bool) -> Option<Intent> {
        match self {
            IntentKind::RecoverRequest => {
                if !recovery_enabled || !req.recover {
                    return None;
                }
                Some(Intent::RecoverRequest {
                    user_id: req.user_id.clone()?,
                    email: req.email.clone()?,
                })
            }
            IntentKind::RecoverRedeem => {
                if !recovery_enabled {
                    return None;
                }
                Some(Intent::RecoverRedeem {
                    key: req.recover_key.clone()?,
                })
            }
            IntentKind::ForcedChangeSubmit => Some(Intent::ForcedChangeSubmit {
                login_data: req.login_data.clone()?,
                new_password: req.new_password.clone()?,
                confirm: req.new_password_confirm.clone()?,
            }),
            IntentKind::DirectLogin => {
                // A typed password wins over a remember cookie
                if let (Some(user_id), Some(password)) = (&req.user_id, &req.password) {
                    return Some(Intent::DirectLogin {
                        user_id: user_id.clone(),
                        credential: Credential::Password(password.clone()),
                        cookie_present: req.remember_cookie.is_some(),
                    });
                }
                let (user_id, token) = req.remember_cookie.clone()?.into_parts();
                Some(Intent::DirectLogin {
                    user_id,
                    credential: Credential::Token(token),
                    cookie_present: true,
                })
            }
            IntentKind::NoAction => Some(Intent::NoAction {
                prefill: req
                    .prefill_user
                    .clone()
                    .or_else(|| req.user_id.clone())
                    .or_else(|| {
                        req.remember_cookie
                            .as_ref()
                            .map(|cookie| cookie.user_id().to_owned())
                    }),
                recover: recovery_enabled && req.recover,
            }),
        }
    }
}

impl Intent {
    /// Works out what the request asks for, trying each kind in [`IntentKind::PRECEDENCE`] order
    pub fn detect(req: &AuthRequest, recovery_enabled: bool) -> Intent {
        for kind in IntentKind::PRECEDENCE {
            if let Some(intent) = kind.extract(req, recovery_enabled) {
                return intent;
            }
        }
        Intent::NoAction {
            prefill: None,
            recover: false,
        }
    }

    pub fn kind(&self) -> IntentKind {
        match self {
            Intent::RecoverRequest { .. } => IntentKind::RecoverRequest,
            Intent::RecoverRedeem { .. } => IntentKind::RecoverRedeem,
            Intent::ForcedChangeSubmit { .. } => IntentKind::ForcedChangeSubmit,
            Intent::DirectLogin { .. } => IntentKind::DirectLogin,
            Intent::NoAction { .. } => IntentKind::NoAction,
        }
    }
}

#[cfg(test)]
mod tests {
    use quill_tokens::ServerSecret;

    use super::*;

    fn secret() -> ServerSecret {
        ServerSecret::new("a very secret master key").unwrap()
    }

    fn form() -> AuthForm {
        AuthForm::default()
    }

    #[test]
    fn test_precedence_order() {
        assert_eq!(
            IntentKind::PRECEDENCE,
            [
                IntentKind::RecoverRequest,
                IntentKind::RecoverRedeem,
                IntentKind::ForcedChangeSubmit,
                IntentKind::DirectLogin,
                IntentKind::NoAction,
            ]
        );
    }

    #[test]
    fn test_everything_at_once_is_recover_request() {
        let req = AuthRequest::from_form(
            AuthForm {
                user_id: Some("alice".to_string()),
                user_pwd: Some("hunter2".into()),
                recover: Some("1".to_string()),
                user_email: Some("alice@example.org".to_string()),
                akey: Some("key".to_string()),
                login_data: Some("bundle".to_string()),
                new_pwd: Some("a".into()),
                new_pwd_c: Some("a".into()),
                ..form()
            },
            None,
            "test",
        );
        assert_eq!(
            Intent::detect(&req, true).kind(),
            IntentKind::RecoverRequest
        );
        // Without recovery the forced change is next in line
        assert_eq!(
            Intent::detect(&req, false).kind(),
            IntentKind::ForcedChangeSubmit
        );
    }

    #[test]
    fn test_recover_needs_both_fields() {
        let req = AuthRequest::from_form(
            AuthForm {
                user_id: Some("alice".to_string()),
                recover: Some("1".to_string()),
                ..form()
            },
            None,
            "test",
        );
        assert_eq!(
            Intent::detect(&req, true),
            Intent::NoAction {
                prefill: Some("alice".to_string()),
                recover: true,
            }
        );
        assert_eq!(
            Intent::detect(&req, false),
            Intent::NoAction {
                prefill: Some("alice".to_string()),
                recover: false,
            },
            "No recovery form when password changes are disabled"
        );
    }

    #[test]
    fn test_forced_change_needs_all_fields() {
        let req = AuthRequest::from_form(
            AuthForm {
                login_data: Some("bundle".to_string()),
                new_pwd: Some("".into()),
                ..form()
            },
            None,
            "test",
        );
        assert_eq!(Intent::detect(&req, true).kind(), IntentKind::NoAction);

        let req = AuthRequest::from_form(
            AuthForm {
                login_data: Some("bundle".to_string()),
                new_pwd: Some("".into()),
                new_pwd_c: Some("".into()),
                ..form()
            },
            None,
            "test",
        );
        assert_eq!(
            Intent::detect(&req, true).kind(),
            IntentKind::ForcedChangeSubmit,
            "Empty fields still count as submitted"
        );
    }

    #[test]
    fn test_password_wins_over_cookie() {
        let cookie = RememberCookie::build(&secret(), "bob").encode();
        let req = AuthRequest::from_form(
            AuthForm {
                user_id: Some("alice".to_string()),
                user_pwd: Some("hunter2".into()),
                ..form()
            },
            Some(&cookie),
            "test",
        );
        match Intent::detect(&req, true) {
            Intent::DirectLogin {
                user_id,
                credential: Credential::Password(_),
                cookie_present,
            } => {
                assert_eq!(user_id, "alice");
                assert!(cookie_present);
            }
            other => panic!("Expected a password login, got {other:?}"),
        }
    }

    #[test]
    fn test_cookie_login() {
        let cookie = RememberCookie::build(&secret(), "bob").encode();
        let req = AuthRequest::from_form(form(), Some(&cookie), "test");
        match Intent::detect(&req, true) {
            Intent::DirectLogin {
                user_id,
                credential: Credential::Token(token),
                cookie_present,
            } => {
                assert_eq!(user_id, "bob");
                assert!(token.verify(&secret(), "bob"));
                assert!(cookie_present);
            }
            other => panic!("Expected a cookie login, got {other:?}"),
        }
    }

    #[test]
    fn test_short_cookie_is_no_cookie() {
        let cookie = RememberCookie::build(&secret(), "bob").encode();
        let req = AuthRequest::from_form(form(), Some(&cookie[..103]), "test");
        assert!(req.remember_cookie.is_none());
        assert_eq!(
            Intent::detect(&req, true),
            Intent::NoAction {
                prefill: None,
                recover: false,
            }
        );
    }

    #[test]
    fn test_prefill_override() {
        let cookie = RememberCookie::build(&secret(), "bob").encode();
        let req = AuthRequest::from_form(
            AuthForm {
                user: Some("carol".to_string()),
                ..form()
            },
            None,
            "test",
        );
        assert_eq!(
            Intent::detect(&req, true),
            Intent::NoAction {
                prefill: Some("carol".to_string()),
                recover: false,
            }
        );

        let req = AuthRequest::from_form(
            AuthForm {
                user_id: Some("alice".to_string()),
                user: Some("carol".to_string()),
                ..form()
            },
            Some(&cookie[..50]),
            "test",
        );
        assert_eq!(
            Intent::detect(&req, true),
            Intent::NoAction {
                prefill: Some("carol".to_string()),
                recover: false,
            },
            "The query override beats everything else"
        );
    }
}
