//! Password hashing and verification
//!
//! Stored secrets are bcrypt hashes wrapped in base64. bcrypt embeds its own
//! salt and cost, so the stored value is self-contained.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Hash a plaintext password for storage.
pub fn hash(password: &str) -> Result<String, bcrypt::BcryptError> {
    let hashed = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;
    Ok(BASE64.encode(hashed.as_bytes()))
}

/// Verify a presented password against a stored base64-wrapped bcrypt hash.
///
/// Any decode failure or mismatch yields `false`; this never panics and
/// leaks no timing beyond the bcrypt comparison itself.
pub fn verify(password: &str, stored: &str) -> bool {
    let Ok(decoded) = BASE64.decode(stored) else {
        return false;
    };
    let Ok(hash) = std::str::from_utf8(&decoded) else {
        return false;
    };
    bcrypt::verify(password, hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_accepts_original() {
        let stored = hash("example").unwrap();
        assert!(verify("example", &stored));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let stored = hash("example").unwrap();
        assert!(!verify("not-example", &stored));
    }

    #[test]
    fn verify_rejects_invalid_base64() {
        assert!(!verify("example", "!!!not base64!!!"));
    }

    #[test]
    fn verify_rejects_base64_of_garbage() {
        let stored = BASE64.encode(b"not a bcrypt hash");
        assert!(!verify("example", &stored));
    }

    #[test]
    fn verify_rejects_empty_stored_value() {
        assert!(!verify("example", ""));
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash("example").unwrap();
        let b = hash("example").unwrap();
        assert_ne!(a, b);
        assert!(verify("example", &a));
        assert!(verify("example", &b));
    }
}
