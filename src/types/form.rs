use serde::Deserialize;

use crate::types::SecureString;

/// The fields the login endpoint understands. The same shape is read from the query string and
/// the form body, see [`merge`](Self::merge).
#[derive(Deserialize, Debug, Clone, Default)]
pub struct AuthForm {
    pub user_id: Option<String>,
    pub user_pwd: Option<SecureString>,
    pub new_pwd: Option<SecureString>,
    pub new_pwd_c: Option<SecureString>,
    /// The pending password change bundle
    pub login_data: Option<String>,
    pub recover: Option<String>,
    pub user_email: Option<String>,
    /// A recovery key from a recovery e-mail link
    pub akey: Option<String>,
    pub safe_mode: Option<String>,
    pub blog: Option<String>,
    pub user_remember: Option<String>,
    /// Prefills the login form. Only honoured from the query string.
    pub user: Option<String>,
}

impl AuthForm {
    /// Combines a form body with the query string. Body fields win, except for `user` which is a
    /// query only override.
    pub fn merge(self, query: AuthForm) -> AuthForm {
        AuthForm {
            user_id: self.user_id.or(query.user_id),
            user_pwd: self.user_pwd.or(query.user_pwd),
            new_pwd: self.new_pwd.or(query.new_pwd),
            new_pwd_c: self.new_pwd_c.or(query.new_pwd_c),
            login_data: self.login_data.or(query.login_data),
            recover: self.recover.or(query.recover),
            user_email: self.user_email.or(query.user_email),
            akey: self.akey.or(query.akey),
            safe_mode: self.safe_mode.or(query.safe_mode),
            blog: self.blog.or(query.blog),
            user_remember: self.user_remember.or(query.user_remember),
            user: query.user,
        }
    }
}

/// Checkbox style flags: set when present, non-empty and not `0`
pub fn flag(value: &Option<String>) -> bool {
    matches!(value.as_deref(), Some(v) if !v.is_empty() && v != "0")
}

/// Blank text fields count as missing
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        assert!(!flag(&None));
        assert!(!flag(&Some(String::new())));
        assert!(!flag(&Some("0".to_string())));
        assert!(flag(&Some("1".to_string())));
        assert!(flag(&Some("on".to_string())));
    }

    #[test]
    fn test_merge() {
        let body = AuthForm {
            user_id: Some("alice".to_string()),
            user: Some("ignored".to_string()),
            ..Default::default()
        };
        let query = AuthForm {
            user_id: Some("bob".to_string()),
            akey: Some("key".to_string()),
            user: Some("carol".to_string()),
            ..Default::default()
        };
        let merged = body.merge(query);
        assert_eq!(merged.user_id.as_deref(), Some("alice"));
        assert_eq!(merged.akey.as_deref(), Some("key"));
        assert_eq!(merged.user.as_deref(), Some("carol"));
    }
}
