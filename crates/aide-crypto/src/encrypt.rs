use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use anyhow::{Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};

const NONCE_LEN: usize = 12;

/// Encrypt bytes with AES-256-GCM.
/// Returns (ciphertext, nonce).
pub fn encrypt_bytes(key: &[u8; 32], plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    Ok((ciphertext, nonce_bytes.to_vec()))
}

/// Decrypt bytes with AES-256-GCM.
pub fn decrypt_bytes(key: &[u8; 32], ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_LEN {
        return Err(anyhow!("Invalid nonce length: {}", nonce.len()));
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(nonce);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| anyhow!("Decryption failed: {}", e))?;

    Ok(plaintext)
}

/// Text cipher for memory fields. Stored form is `base64(nonce):base64(ciphertext)`.
#[derive(Clone)]
pub struct FieldCipher {
    key: [u8; 32],
}

impl FieldCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let (ciphertext, nonce) = encrypt_bytes(&self.key, plaintext.as_bytes())?;
        Ok(format!("{}:{}", B64.encode(nonce), B64.encode(ciphertext)))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let (nonce, ciphertext) = stored
            .split_once(':')
            .ok_or_else(|| anyhow!("Not an encrypted value"))?;
        let nonce = B64.decode(nonce)?;
        let ciphertext = B64.decode(ciphertext)?;
        let plaintext = decrypt_bytes(&self.key, &ciphertext, &nonce)?;
        Ok(String::from_utf8(plaintext)?)
    }

    /// Decrypt, or hand back the stored value untouched if it is not readable.
    /// Rows written before encryption was enabled stay visible this way.
    pub fn decrypt_or_raw(&self, stored: &str) -> String {
        self.decrypt(stored).unwrap_or_else(|_| stored.to_string())
    }
}
