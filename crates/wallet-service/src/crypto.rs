//! Cryptographic utilities for the request gateway and provider callbacks.
//!
//! - RSA-OAEP (SHA-256) payload encryption with the server-held keypair
//! - RSA-PSS (SHA-256) request signature verification with a client key
//! - HMAC-SHA256 callback signatures

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pss, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 digest length in bytes.
const SHA256_LEN: usize = 32;

/// Error type for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// A PEM key could not be parsed.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Input was not valid base64.
    #[error("invalid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// RSA operation failed.
    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),

    /// Signature does not verify.
    #[error("invalid signature")]
    InvalidSignature,
}

/// Parse a PEM private key (PKCS#8, then PKCS#1).
pub fn private_key_from_pem(pem: &str) -> Result<RsaPrivateKey, CryptoError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Parse a PEM public key (SPKI, then PKCS#1).
pub fn public_key_from_pem(pem: &str) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Largest plaintext one OAEP-SHA256 block can hold for `key`.
fn oaep_block_capacity(key_size: usize) -> usize {
    key_size.saturating_sub(2 * SHA256_LEN + 2).max(1)
}

/// Encrypt `plaintext` and return base64 ciphertext.
///
/// Plaintext longer than one OAEP block is split; every ciphertext block is
/// exactly the key size, so the concatenation decodes unambiguously.
pub fn encrypt_to_base64(key: &RsaPublicKey, plaintext: &[u8]) -> Result<String, CryptoError> {
    let mut rng = rand::thread_rng();
    let mut ciphertext = Vec::with_capacity(key.size());
    for chunk in plaintext.chunks(oaep_block_capacity(key.size())) {
        ciphertext.extend(key.encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)?);
    }
    Ok(STANDARD.encode(ciphertext))
}

/// Decrypt base64 ciphertext produced by [`encrypt_to_base64`].
pub fn decrypt_base64(key: &RsaPrivateKey, encoded: &str) -> Result<Vec<u8>, CryptoError> {
    let ciphertext = STANDARD.decode(encoded.trim())?;
    let mut plaintext = Vec::with_capacity(ciphertext.len());
    for block in ciphertext.chunks(key.size()) {
        plaintext.extend(key.decrypt(Oaep::new::<Sha256>(), block)?);
    }
    Ok(plaintext)
}

/// Verify a base64 RSA-PSS/SHA-256 signature over `message`.
///
/// Accepts the maximum salt length (what most signers use) and the
/// digest-length salt.
pub fn verify_pss_signature(
    key: &RsaPublicKey,
    message: &[u8],
    signature_b64: &str,
) -> Result<(), CryptoError> {
    let signature = STANDARD
        .decode(signature_b64.trim())
        .map_err(|_| CryptoError::InvalidSignature)?;
    let hashed = Sha256::digest(message);

    let max_salt = key.size().saturating_sub(SHA256_LEN + 2);
    for salt_len in [max_salt, SHA256_LEN] {
        if key
            .verify(Pss::new_with_salt::<Sha256>(salt_len), &hashed, &signature)
            .is_ok()
        {
            return Ok(());
        }
    }
    Err(CryptoError::InvalidSignature)
}

/// Compute HMAC-SHA256 and return the hex-encoded result (64 characters).
pub fn hmac_sha256_hex(secret: &str, message: &[u8]) -> Result<String, CryptoError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time string comparison to prevent timing attacks.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};

    fn keypair() -> (RsaPrivateKey, RsaPublicKey) {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let public = RsaPublicKey::from(&private);
        (private, public)
    }

    #[test]
    fn pem_keys_parse() {
        let (private, public) = keypair();
        let private_pem = private.to_pkcs8_pem(LineEnding::LF).unwrap();
        let public_pem = public.to_public_key_pem(LineEnding::LF).unwrap();

        assert_eq!(private_key_from_pem(&private_pem).unwrap(), private);
        assert_eq!(public_key_from_pem(&public_pem).unwrap(), public);
        assert!(public_key_from_pem("not a key").is_err());
    }

    #[test]
    fn long_payloads_are_encrypted_in_blocks() {
        let (private, public) = keypair();
        let payload = "x".repeat(500);
        let encoded = encrypt_to_base64(&public, payload.as_bytes()).unwrap();
        let ciphertext = STANDARD.decode(&encoded).unwrap();
        assert_eq!(ciphertext.len() % public.size(), 0);
        assert!(ciphertext.len() > public.size());

        let decrypted = decrypt_base64(&private, &encoded).unwrap();
        assert_eq!(decrypted, payload.as_bytes());
    }

    #[test]
    fn pss_signatures_verify_with_either_salt_length() {
        let (private, public) = keypair();
        let body = br#"{"amount":"10.00"}"#;
        let hashed = Sha256::digest(body);
        let mut rng = rand::thread_rng();

        let max_salt = public.size() - SHA256_LEN - 2;
        for salt_len in [max_salt, SHA256_LEN] {
            let signature = private
                .sign_with_rng(&mut rng, Pss::new_with_salt::<Sha256>(salt_len), &hashed)
                .unwrap();
            let encoded = STANDARD.encode(signature);
            assert!(verify_pss_signature(&public, body, &encoded).is_ok());
            assert!(verify_pss_signature(&public, b"tampered", &encoded).is_err());
        }

        assert!(matches!(
            verify_pss_signature(&public, body, "%%%"),
            Err(CryptoError::InvalidSignature)
        ));
    }

    #[test]
    fn hmac_sha256_is_deterministic() {
        let a = hmac_sha256_hex("secret", b"message").unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, hmac_sha256_hex("secret", b"message").unwrap());
        assert_ne!(a, hmac_sha256_hex("secret", b"message2").unwrap());
    }

    #[test]
    fn constant_time_eq_compares_exactly() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
    }
}
