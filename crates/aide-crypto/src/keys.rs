use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use anyhow::Result;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

/// Generate a random 256-bit key for AES-256-GCM.
pub fn generate_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

/// Decode the base64 memory key from configuration.
pub fn key_from_base64(encoded: &str) -> Result<[u8; 32]> {
    let bytes = BASE64.decode(encoded.trim())?;
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("Invalid key length, expected 32 bytes"))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_configured_key() {
        let key = generate_key();
        let encoded = BASE64.encode(key);
        assert_eq!(key_from_base64(&format!("{encoded}\n")).unwrap(), key);
    }

    #[test]
    fn rejects_short_key() {
        assert!(key_from_base64(&BASE64.encode([1u8; 16])).is_err());
        assert!(key_from_base64("not base64!").is_err());
    }
}
