pub type Result<T> = std::result::Result<T, AuthError>;

/// The broad classes of failure the login gate distinguishes between. Callers decide how to
/// present an error from its kind, never from its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Garbage input such as a bad cookie or bundle. Treated as if the input was absent.
    Malformed,
    /// Bad password, bad token or unknown user. Deliberately vague.
    Authentication,
    /// The user proved who they are but is not allowed in
    Authorization,
    /// A rule about passwords or recovery was not met
    Policy,
    /// A store, mailer or other collaborator failed
    Downstream,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Input that could not be decoded. Never shown to the user as such.
    #[error("Malformed request data")]
    Malformed,
    /// The username and password (or token) did not match
    #[error("Wrong username or password")]
    InvalidCredentials,
    /// A remember-me cookie was sent but no longer logs the user in
    #[error("Administration session expired")]
    SessionExpired,
    /// Valid credentials, but the user cannot use any blog
    #[error("Insufficient permissions")]
    NoBlogAccess,
    /// Safe mode was requested by someone other than a super administrator
    #[error("Safe mode can only be used by super administrators.")]
    SafeModeDenied,
    /// The account is flagged for a password change that the site does not allow
    #[error("You must change your password but password changes are disabled.")]
    ChangeDisallowed,
    /// A submitted password change could not be validated
    #[error("Unable to change your password.")]
    ChangeRejected,
    /// The new password and its confirmation differ
    #[error("Passwords don't match.")]
    PasswordMismatch,
    /// The new password is the current one
    #[error("You didn't change your password.")]
    PasswordUnchanged,
    /// The new password is below the minimum length
    #[error("Password must contain at least {0} characters.")]
    PasswordTooShort(usize),
    /// The username and e-mail pair given for recovery does not exist. The message must not say
    /// which half was wrong.
    #[error("Wrong username or e-mail address.")]
    RecoverMismatch,
    /// The recovery key is unknown, used or expired
    #[error("Invalid or expired recovery key.")]
    InvalidRecoverKey,
    /// The user id requested for creation already exists
    #[error("Username already exists")]
    UsernameTaken,
    /// The user id sent for an administrative operation does not exist
    #[error("Username does not exist")]
    UsernameDoesNotExist,
    /// Errors that occur when interacting with storage or other parts of the system
    #[error(transparent)]
    SystemError(#[from] anyhow::Error),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Malformed => ErrorKind::Malformed,
            AuthError::InvalidCredentials | AuthError::SessionExpired => {
                ErrorKind::Authentication
            }
            AuthError::NoBlogAccess | AuthError::SafeModeDenied => ErrorKind::Authorization,
            AuthError::ChangeDisallowed
            | AuthError::ChangeRejected
            | AuthError::PasswordMismatch
            | AuthError::PasswordUnchanged
            | AuthError::PasswordTooShort(_)
            | AuthError::RecoverMismatch
            | AuthError::InvalidRecoverKey
            | AuthError::UsernameTaken
            | AuthError::UsernameDoesNotExist => ErrorKind::Policy,
            AuthError::SystemError(_) => ErrorKind::Downstream,
        }
    }
}
