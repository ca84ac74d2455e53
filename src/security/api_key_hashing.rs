use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Length of a hex-encoded SHA-256 digest.
const HASH_LEN: usize = 64;

/// Returns true when `candidate` already has the shape of a stored key
/// digest: exactly 64 lowercase hex characters.
pub fn is_hashed_key(candidate: &str) -> bool {
    candidate.len() == HASH_LEN
        && candidate
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// SHA-256 of `raw`, hex-encoded lowercase.
pub fn hash_api_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Normalizes a candidate key to its stored digest form.
///
/// A value that already matches the digest shape is passed through
/// unchanged, so clients that send a pre-hashed key are not re-hashed
/// into a value that can never match the store. Idempotent:
/// `ensure_hashed(ensure_hashed(k)) == ensure_hashed(k)`.
pub fn ensure_hashed(candidate: &str) -> String {
    if is_hashed_key(candidate) {
        candidate.to_string()
    } else {
        hash_api_key(candidate)
    }
}

/// Generates a new API key using cryptographically secure random bytes.
/// Returns a 64-character hex-encoded string (32 random bytes).
pub fn generate_api_key() -> String {
    use rand::RngCore;

    let mut key_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut key_bytes);
    hex::encode(key_bytes)
}

/// Compares two strings in constant time to prevent timing attacks.
pub fn constant_time_equal(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
