use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Work factor for new password hashes.
pub const COST: u32 = bcrypt::DEFAULT_COST;

/// A stored password hash, classified by its format. Only [`StoredHash::Bcrypt`]
/// is ever produced; the legacy variant exists so old accounts can still log
/// in until their hash is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredHash<'a> {
    Bcrypt(&'a str),
    /// Unsalted SHA-256, 64 hex characters.
    LegacySha256(&'a str),
}

impl<'a> StoredHash<'a> {
    pub fn classify(stored: &'a str) -> Self {
        if stored.len() == 64 && stored.bytes().all(|b| b.is_ascii_hexdigit()) {
            StoredHash::LegacySha256(stored)
        } else {
            StoredHash::Bcrypt(stored)
        }
    }
}

/// Hash a password with bcrypt and a fresh salt.
pub fn hash(password: &str) -> Result<String, String> {
    bcrypt::hash(password, COST).map_err(|e| format!("Hashing failed: {e}"))
}

/// Verify a password against either hash format. Malformed hashes and empty
/// passwords never verify.
pub fn verify(password: &str, stored: &str) -> bool {
    if password.is_empty() {
        return false;
    }
    match StoredHash::classify(stored) {
        StoredHash::Bcrypt(h) => bcrypt::verify(password, h).unwrap_or(false),
        StoredHash::LegacySha256(digest) => {
            let computed = hex::encode(Sha256::digest(password.as_bytes()));
            let expected = digest.to_ascii_lowercase();
            computed.as_bytes().ct_eq(expected.as_bytes()).into()
        }
    }
}

/// True when the stored hash should be replaced after a successful login.
pub fn needs_rehash(stored: &str) -> bool {
    matches!(StoredHash::classify(stored), StoredHash::LegacySha256(_))
}
