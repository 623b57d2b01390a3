//! RSA key helpers for HTTP signatures.
//!
//! ```
//! use fedi_common::crypto::{generate_rsa_keypair, parse_private_key, public_key_pem_of};
//!
//! let keypair = generate_rsa_keypair().expect("keypair");
//! let private = parse_private_key(&keypair.private_key_pem).expect("private key");
//! assert_eq!(public_key_pem_of(&private).expect("public key"), keypair.public_key_pem);
//! ```

use rsa::{
    RsaPrivateKey, RsaPublicKey,
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding},
};

use crate::{AppError, AppResult};

/// RSA key pair, both halves PEM encoded.
#[derive(Debug, Clone)]
pub struct RsaKeypair {
    /// Public key in PEM format (SPKI encoding).
    pub public_key_pem: String,
    /// Private key in PEM format (PKCS#8 encoding).
    pub private_key_pem: String,
}

const RSA_KEY_SIZE: usize = 2048;

/// Generate a 2048-bit RSA key pair.
pub fn generate_rsa_keypair() -> AppResult<RsaKeypair> {
    generate_rsa_keypair_with_bits(RSA_KEY_SIZE)
}

/// Generate an RSA key pair of the given modulus size.
///
/// Smaller sizes are only useful to keep tests fast.
pub fn generate_rsa_keypair_with_bits(bits: usize) -> AppResult<RsaKeypair> {
    let mut rng = rand::thread_rng();

    let private_key = RsaPrivateKey::new(&mut rng, bits)
        .map_err(|e| AppError::Internal(format!("Failed to generate RSA key: {e}")))?;

    let private_key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| AppError::Internal(format!("Failed to encode private key: {e}")))?
        .to_string();

    Ok(RsaKeypair {
        public_key_pem: public_key_pem_of(&private_key)?,
        private_key_pem,
    })
}

/// Encode the public half of a private key as SPKI PEM.
pub fn public_key_pem_of(private_key: &RsaPrivateKey) -> AppResult<String> {
    RsaPublicKey::from(private_key)
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| AppError::Internal(format!("Failed to encode public key: {e}")))
}

/// Parse a PKCS#8 PEM private key.
pub fn parse_private_key(pem: &str) -> AppResult<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .map_err(|e| AppError::Internal(format!("Failed to parse private key: {e}")))
}

/// Parse an SPKI PEM public key.
///
/// Remote keys are untrusted input, so a parse failure is reported as
/// an authentication problem rather than an internal one.
pub fn parse_public_key(pem: &str) -> AppResult<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .map_err(|e| AppError::Unauthorized(format!("Unusable public key: {e}")))
}
