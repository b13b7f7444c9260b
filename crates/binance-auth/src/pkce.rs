//! PKCE (Proof Key for Code Exchange) per RFC 7636
//!
//! The verifier is a hex-encoded 32-byte random seed. It lives only for the
//! process lifetime and is sent during token exchange; the S256 challenge
//! derived from it goes into the authorization URL.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};
use url::form_urlencoded;

use crate::constants::{AUTHORIZE_ENDPOINT, REDIRECT_URI, SCOPES};

/// Random seed length in bytes.
const VERIFIER_SEED_BYTES: usize = 32;

/// Generate a PKCE code verifier: 32 CSPRNG bytes, uppercase hex.
///
/// 64 characters from the unreserved set, inside RFC 7636's 43-128 range.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; VERIFIER_SEED_BYTES];
    rand::rng().fill(&mut bytes);
    hex::encode_upper(bytes)
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL-NOPAD(SHA256(verifier))`, which is the standard
/// base64 encoding with `+` → `-`, `/` → `_` and trailing `=` stripped.
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// A verifier and the challenge derived from it.
#[derive(Clone, PartialEq, Eq)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let verifier = generate_verifier();
        let challenge = compute_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }
}

impl fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// Build the authorization URL the user is sent to.
pub fn build_authorization_url(client_id: &str, challenge: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", REDIRECT_URI)
        .append_pair("scope", SCOPES)
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256")
        .finish();
    format!("{AUTHORIZE_ENDPOINT}?{query}")
}
