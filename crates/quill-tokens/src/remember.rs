use std::fmt::{Debug, Display};
use std::time::Duration;

use crate::secret::{ServerSecret, DERIVED_LEN};

/// Length of the hex digest at the start of a remember cookie
pub const DIGEST_HEX_LEN: usize = DERIVED_LEN * 2;
/// Exact length of a well formed remember cookie value
pub const REMEMBER_COOKIE_LEN: usize = DIGEST_HEX_LEN + PACKED_ID_LEN * 2;
/// How long a remember cookie is kept by the browser
pub const REMEMBER_MAX_AGE: Duration = Duration::from_secs(60 * 60 * 24 * 15);

/// User ids are packed into a fixed width, NUL padded field
const PACKED_ID_LEN: usize = 32;

const REMEMBER_LABEL: &str = "remember";
const LEGACY_LABEL: &str = "legacy";

/// Returns the 40 character legacy hash of the user id. The remember digest covers the user id
/// followed by this value.
pub fn legacy_hash(secret: &ServerSecret, user_id: &str) -> String {
    hex::encode(secret.derive(LEGACY_LABEL, &[user_id.as_bytes()]))
}

/// The 40 lowercase hex character digest proving that the server issued a remember cookie (or a
/// password change bundle) for a user id.
#[derive(Clone, PartialEq, Eq)]
pub struct RememberToken(String);

impl RememberToken {
    /// Derives the token for the given user id
    pub fn derive(secret: &ServerSecret, user_id: &str) -> Self {
        let legacy = legacy_hash(secret, user_id);
        let digest = secret.derive(REMEMBER_LABEL, &[user_id.as_bytes(), legacy.as_bytes()]);
        Self(hex::encode(digest))
    }

    /// Parses a token, accepting only exactly [`DIGEST_HEX_LEN`] hex characters
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() != DIGEST_HEX_LEN || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(raw.to_ascii_lowercase()))
    }

    /// Checks in constant time that this token was derived for the given user id
    pub fn verify(&self, secret: &ServerSecret, user_id: &str) -> bool {
        let Ok(tag) = hex::decode(&self.0) else {
            return false;
        };
        let legacy = legacy_hash(secret, user_id);
        secret.verify(
            REMEMBER_LABEL,
            &[user_id.as_bytes(), legacy.as_bytes()],
            &tag,
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens are credentials, keep them out of logs
impl Debug for RememberToken {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "RememberToken(**********)")
    }
}

impl Display for RememberToken {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A parsed or freshly built remember-me cookie: the digest followed by the hex encoded, NUL
/// padded user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RememberCookie {
    user_id: String,
    token: RememberToken,
}

impl RememberCookie {
    /// Builds the cookie for the given user. User ids longer than 32 bytes are truncated when
    /// packed, the resulting cookie is well formed but will never verify.
    pub fn build(secret: &ServerSecret, user_id: &str) -> Self {
        Self {
            user_id: user_id.to_owned(),
            token: RememberToken::derive(secret, user_id),
        }
    }

    /// Parses a raw cookie value. Anything that is not exactly [`REMEMBER_COOKIE_LEN`] characters
    /// or does not unpack cleanly is treated as if no cookie had been sent.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() != REMEMBER_COOKIE_LEN || !raw.is_ascii() {
            return None;
        }
        let (digest, packed) = raw.split_at(DIGEST_HEX_LEN);
        let token = RememberToken::parse(digest)?;
        let mut bytes = hex::decode(packed).ok()?;
        while bytes.last() == Some(&0) {
            bytes.pop();
        }
        let user_id = String::from_utf8(bytes).ok()?;
        if user_id.is_empty() {
            return None;
        }
        Some(Self { user_id, token })
    }

    /// Renders the cookie value. Always exactly [`REMEMBER_COOKIE_LEN`] characters.
    pub fn encode(&self) -> String {
        let mut packed = [0u8; PACKED_ID_LEN];
        let id = self.user_id.as_bytes();
        let len = id.len().min(PACKED_ID_LEN);
        packed[..len].copy_from_slice(&id[..len]);

        let mut value = String::with_capacity(REMEMBER_COOKIE_LEN);
        value.push_str(self.token.as_str());
        value.push_str(&hex::encode(packed));
        value
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn token(&self) -> &RememberToken {
        &self.token
    }

    /// Consumes the cookie, returning the user id and token
    pub fn into_parts(self) -> (String, RememberToken) {
        (self.user_id, self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> ServerSecret {
        ServerSecret::new("a very secret master key").unwrap()
    }

    #[test]
    fn test_cookie_shape() {
        for user_id in ["alice", "a", "someone.with.a.rather.long.name.over.32"] {
            let value = RememberCookie::build(&secret(), user_id).encode();
            assert_eq!(
                value.len(),
                REMEMBER_COOKIE_LEN,
                "Cookie for {user_id} should be exactly 104 characters"
            );
            assert!(value.bytes().all(|b| b.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_digest_is_deterministic() {
        let first = RememberCookie::build(&secret(), "alice").encode();
        let second = RememberCookie::build(&secret(), "alice").encode();
        assert_eq!(first[..DIGEST_HEX_LEN], second[..DIGEST_HEX_LEN]);

        let other = ServerSecret::new("another master key entirely").unwrap();
        let third = RememberCookie::build(&other, "alice").encode();
        assert_ne!(
            first[..DIGEST_HEX_LEN],
            third[..DIGEST_HEX_LEN],
            "A different secret should produce a different digest"
        );
    }

    #[test]
    fn test_parse_built_cookie() {
        let built = RememberCookie::build(&secret(), "alice");
        let parsed = RememberCookie::parse(&built.encode()).expect("Cookie should parse");
        assert_eq!(parsed, built);
        assert_eq!(parsed.user_id(), "alice");
        assert!(parsed.token().verify(&secret(), "alice"));
        assert!(!parsed.token().verify(&secret(), "bob"));
    }

    #[test]
    fn test_wrong_length_is_absent() {
        let value = RememberCookie::build(&secret(), "alice").encode();
        assert!(RememberCookie::parse(&value[..103]).is_none());
        assert!(RememberCookie::parse(&format!("{value}0")).is_none());
        assert!(RememberCookie::parse("").is_none());
    }

    #[test]
    fn test_malformed_is_absent() {
        let value = RememberCookie::build(&secret(), "alice").encode();
        // Non hex id section
        let broken = format!("{}{}", &value[..DIGEST_HEX_LEN], "zz".repeat(32));
        assert!(RememberCookie::parse(&broken).is_none());
        // Invalid utf-8 in the packed id
        let broken = format!("{}ff{}", &value[..DIGEST_HEX_LEN], "00".repeat(31));
        assert!(RememberCookie::parse(&broken).is_none());
        // Empty id
        let broken = format!("{}{}", &value[..DIGEST_HEX_LEN], "00".repeat(32));
        assert!(RememberCookie::parse(&broken).is_none());
    }

    #[test]
    fn test_long_ids_never_verify() {
        let long_id = "x".repeat(40);
        let cookie = RememberCookie::build(&secret(), &long_id).encode();
        let parsed = RememberCookie::parse(&cookie).expect("Truncated cookie is still well formed");
        assert_eq!(parsed.user_id().len(), 32);
        assert!(!parsed.token().verify(&secret(), parsed.user_id()));
    }

    #[test]
    fn test_token_parse() {
        let token = RememberToken::derive(&secret(), "alice");
        assert_eq!(token.as_str().len(), DIGEST_HEX_LEN);
        assert_eq!(RememberToken::parse(token.as_str()), Some(token.clone()));
        assert_eq!(
            RememberToken::parse(&token.as_str().to_uppercase()),
            Some(token.clone())
        );
        assert!(RememberToken::parse(&token.as_str()[..39]).is_none());
        assert!(RememberToken::parse(&"g".repeat(40)).is_none());
        assert_eq!(format!("{token:?}"), "RememberToken(**********)");
    }
}
