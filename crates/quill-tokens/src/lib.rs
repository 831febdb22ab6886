//! Codecs for the small tokens the admin login gate hands to browsers: the remember-me cookie,
//! the pending password change bundle and the session browser fingerprint. Everything here is
//! pure and deterministic for a given [`ServerSecret`], so other admin pages can re-check a value
//! without talking to any store.

mod bundle;
mod fingerprint;
mod remember;
mod secret;

pub use bundle::{BundleError, PendingChange};
pub use fingerprint::{browser_fingerprint, verify_fingerprint};
pub use remember::{legacy_hash, RememberCookie, RememberToken};
pub use remember::{DIGEST_HEX_LEN, REMEMBER_COOKIE_LEN, REMEMBER_MAX_AGE};
pub use secret::{SecretError, ServerSecret, MIN_SECRET_LEN};
