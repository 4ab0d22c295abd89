//! PKCE (RFC 7636) and random code generation

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{TryRngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Random bytes in a PKCE code verifier (43 base64url chars)
pub const VERIFIER_BYTES: usize = 32;

/// Random bytes in the anti-CSRF state (22 base64url chars)
pub const STATE_BYTES: usize = 16;

/// Random bytes in a session id (256 bits of entropy)
pub const SESSION_ID_BYTES: usize = 32;

/// Fill `byte_length` bytes from the OS RNG and base64url-encode them
/// without padding.
pub fn generate_code(byte_length: usize) -> Result<String> {
    let mut bytes = vec![0u8; byte_length];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::Entropy(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// `BASE64URL(SHA256(verifier))`, sent with `code_challenge_method=S256`.
#[must_use]
pub fn derive_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
