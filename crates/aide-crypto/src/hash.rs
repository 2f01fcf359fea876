use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const RESET_SALT: &str = "aide-pin-reset";

/// Deterministic one-way digest, 64 lowercase hex chars.
///
/// Plain SHA-256 when `pepper` is empty, HMAC-SHA256 keyed with it otherwise.
/// Lookups are by exact digest, so the output must stay stable for a given pepper.
pub fn hash_secret(pepper: &str, secret: &str) -> String {
    if pepper.is_empty() {
        return hex::encode(Sha256::digest(secret.as_bytes()));
    }

    // HMAC accepts keys of any length, new_from_slice cannot fail here
    match HmacSha256::new_from_slice(pepper.as_bytes()) {
        Ok(mut mac) => {
            mac.update(secret.as_bytes());
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => hex::encode(Sha256::digest(secret.as_bytes())),
    }
}

/// Strip every non-digit before hashing so formatting never changes the digest.
pub fn hash_phone(pepper: &str, phone: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    hash_secret(pepper, &digits)
}

pub fn hash_pin(pepper: &str, pin: &str) -> String {
    hash_secret(pepper, pin)
}

/// Derive the PIN-reset token for a user.
///
/// The expiry is part of the digest so it cannot be extended by the client, and
/// the current PIN digest is bound in so the link stops working once used.
pub fn reset_token(
    pepper: &str,
    phone: &str,
    user_id: &str,
    expires: i64,
    current_pin_hash: Option<&str>,
) -> String {
    let composite = format!(
        "{}:{}:{}:{}:{}",
        phone,
        user_id,
        expires,
        current_pin_hash.unwrap_or(""),
        RESET_SALT
    );
    hash_secret(pepper, &composite)
}

/// Compare two digests without short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
