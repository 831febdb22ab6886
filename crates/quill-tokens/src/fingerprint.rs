use crate::secret::ServerSecret;

const BROWSER_LABEL: &str = "browser";

/// Derives the fingerprint stored in a session. The client signal is whatever the browser sends
/// identically on every request (usually its user agent), so a session id replayed from another
/// browser no longer matches.
pub fn browser_fingerprint(secret: &ServerSecret, client_signal: &str) -> String {
    hex::encode(secret.derive(BROWSER_LABEL, &[client_signal.as_bytes()]))
}

/// Constant time check of a stored fingerprint against the current client signal
pub fn verify_fingerprint(secret: &ServerSecret, client_signal: &str, fingerprint: &str) -> bool {
    match hex::decode(fingerprint) {
        Ok(tag) => secret.verify(BROWSER_LABEL, &[client_signal.as_bytes()], &tag),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RememberToken;

    #[test]
    fn test_fingerprint() {
        let secret = ServerSecret::new("a very secret master key").unwrap();
        let fp = browser_fingerprint(&secret, "Mozilla/5.0");
        assert_eq!(fp.len(), 40);
        assert!(verify_fingerprint(&secret, "Mozilla/5.0", &fp));
        assert!(!verify_fingerprint(&secret, "curl/8.0", &fp));
        assert!(!verify_fingerprint(&secret, "Mozilla/5.0", "not hex"));
    }

    #[test]
    fn test_fingerprint_is_not_the_remember_digest() {
        let secret = ServerSecret::new("a very secret master key").unwrap();
        assert_ne!(
            browser_fingerprint(&secret, "alice"),
            RememberToken::derive(&secret, "alice").as_str()
        );
    }
}
