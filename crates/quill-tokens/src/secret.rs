use std::fmt::Debug;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The minimum number of bytes accepted for a server secret
pub const MIN_SECRET_LEN: usize = 16;

/// Number of MAC bytes kept by every derivation. Rendered as hex this is 40 characters.
pub(crate) const DERIVED_LEN: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("server secret must be at least {min} bytes long, got {0}", min = MIN_SECRET_LEN)]
    TooShort(usize),
    #[error("server secret could not be used as a MAC key")]
    InvalidKey,
}

/// The server-wide secret every token is derived from. Only the keyed MAC state is kept around,
/// the raw secret bytes are not stored after construction.
#[derive(Clone)]
pub struct ServerSecret {
    mac: HmacSha256,
}

impl Debug for ServerSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "ServerSecret(**********)")
    }
}

impl ServerSecret {
    /// Creates a new secret from the given bytes. Returns an error if the secret is shorter than
    /// [`MIN_SECRET_LEN`].
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, SecretError> {
        let secret = secret.as_ref();
        if secret.len() < MIN_SECRET_LEN {
            return Err(SecretError::TooShort(secret.len()));
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| SecretError::InvalidKey)?;
        Ok(Self { mac })
    }

    /// Computes the truncated MAC of `label || 0x00 || parts...`. Every derivation uses its own
    /// label so that two kinds of token can never be confused with each other.
    pub(crate) fn derive(&self, label: &str, parts: &[&[u8]]) -> [u8; DERIVED_LEN] {
        let mut out = [0u8; DERIVED_LEN];
        let tag = self.keyed(label, parts).finalize().into_bytes();
        out.copy_from_slice(&tag[..DERIVED_LEN]);
        out
    }

    /// Constant time check of a truncated tag produced by [`derive`](Self::derive)
    pub(crate) fn verify(&self, label: &str, parts: &[&[u8]], tag: &[u8]) -> bool {
        if tag.len() != DERIVED_LEN {
            return false;
        }
        self.keyed(label, parts).verify_truncated_left(tag).is_ok()
    }

    fn keyed(&self, label: &str, parts: &[&[u8]]) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(label.as_bytes());
        mac.update(&[0]);
        for part in parts {
            mac.update(part);
        }
        mac
    }
}
