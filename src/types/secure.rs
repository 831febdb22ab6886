use std::fmt;

use bincode::{Decode, Encode};
use serde::Deserialize;

const REDACTED: &str = "**********";

/// Holds a password, a recovery key or a password hash. Formatting never shows the contents and
/// the bytes are overwritten when the value is dropped.
///
/// Form fields decode straight into it, and it is stored as a plain string in user records.
#[derive(Clone, Default, PartialEq, Eq, Encode, Decode, Deserialize)]
#[serde(transparent)]
pub struct SecureString(String);

impl SecureString {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Length in characters, which is what password policies count
    pub fn char_count(&self) -> usize {
        self.0.chars().count()
    }

    /// Returns `None` for an empty string, mirroring how blank form fields are treated
    pub fn non_empty(self) -> Option<Self> {
        (!self.is_empty()).then_some(self)
    }
}

impl Drop for SecureString {
    fn drop(&mut self) {
        let mut bytes = std::mem::take(&mut self.0).into_bytes();
        bytes.fill(0);
        std::hint::black_box(&bytes);
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl From<String> for SecureString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl AsRef<str> for SecureString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<[u8]> for SecureString {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_printed() {
        let secret = SecureString::from("hunter2");
        assert_eq!(format!("{secret}"), REDACTED);
        assert_eq!(format!("{secret:?}"), REDACTED);
    }

    #[test]
    fn test_non_empty() {
        assert!(SecureString::from("").non_empty().is_none());
        assert!(SecureString::from("x").non_empty().is_some());
        assert_eq!(SecureString::from("héllo").char_count(), 5);
    }

    #[test]
    fn test_stored_as_plain_string() {
        let config = bincode::config::standard();
        let stored = bincode::encode_to_vec(SecureString::from("$argon2id$abc"), config).unwrap();
        assert_eq!(
            stored,
            bincode::encode_to_vec("$argon2id$abc".to_string(), config).unwrap()
        );
        let (decoded, _): (SecureString, _) = bincode::decode_from_slice(&stored, config).unwrap();
        assert_eq!(AsRef::<str>::as_ref(&decoded), "$argon2id$abc");
    }

    #[test]
    fn test_form_field() {
        #[derive(Deserialize)]
        struct Form {
            pwd: SecureString,
        }
        let form: Form = serde_json::from_str(r#"{"pwd":"hunter2"}"#).unwrap();
        assert_eq!(form.pwd, SecureString::from("hunter2"));
    }
}
