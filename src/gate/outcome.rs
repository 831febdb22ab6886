use quill_tokens::RememberCookie;

use super::intent::IntentKind;
use crate::error::AuthError;

/// The single message shown to the user after a request. Errors and successes share the slot so
/// a request can never produce both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Error(String),
    Success(String),
}

/// What to do with the remember-me cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieDirective {
    /// Set the cookie to this value for the remember period
    SetRemember(RememberCookie),
    /// Overwrite the cookie with an empty, already expired value
    ClearRemember,
}

/// A session the caller should open for the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGrant {
    pub user_id: String,
    pub fingerprint: String,
    pub blog_id: Option<String>,
    pub safe_mode: bool,
}

/// What the browser gets to see next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Redirect(String),
    /// The login form, prefilled with the user id. `recover` shows the recovery form instead.
    Login {
        user_id: Option<String>,
        recover: bool,
    },
    /// The forced password change form carrying the pending change bundle
    ChangePassword { login_data: String },
}

/// Everything a request to the gate resulted in. The gate itself never touches cookies or
/// sessions, the caller applies this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOutcome {
    pub intent: IntentKind,
    pub notice: Option<Notice>,
    pub cookie: Option<CookieDirective>,
    pub session: Option<SessionGrant>,
    pub view: View,
}

impl GateOutcome {
    pub(crate) fn new(intent: IntentKind, view: View) -> Self {
        Self {
            intent,
            notice: None,
            cookie: None,
            session: None,
            view,
        }
    }

    pub(crate) fn login(intent: IntentKind, user_id: Option<String>) -> Self {
        Self::new(
            intent,
            View::Login {
                user_id,
                recover: false,
            },
        )
    }

    pub(crate) fn error(mut self, err: &AuthError) -> Self {
        self.notice = Some(Notice::Error(err.to_string()));
        self
    }

    pub(crate) fn success(mut self, message: impl Into<String>) -> Self {
        self.notice = Some(Notice::Success(message.into()));
        self
    }

    pub(crate) fn cookie(mut self, directive: CookieDirective) -> Self {
        self.cookie = Some(directive);
        self
    }

    pub(crate) fn session(mut self, grant: SessionGrant) -> Self {
        self.session = Some(grant);
        self
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.notice {
            Some(Notice::Error(msg)) => Some(msg),
            _ => None,
        }
    }

    pub fn success_message(&self) -> Option<&str> {
        match &self.notice {
            Some(Notice::Success(msg)) => Some(msg),
            _ => None,
        }
    }
}
