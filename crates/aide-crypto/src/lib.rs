/// Aide Crypto Library
///
/// Credential digests for phone numbers, PINs and PIN-reset links, plus
/// AES-256-GCM encryption for memories stored at rest.
pub mod encrypt;
pub mod hash;
pub mod keys;
