//! Authorization-code exchange
//!
//! The token endpoint takes the exchange parameters as a form-encoded body.
//! The response carries the token pair; missing fields decode as empty
//! strings so callers can treat "no access token" uniformly.

use serde::Deserialize;
use url::form_urlencoded;

use crate::constants::REDIRECT_URI;

/// Token endpoint response.
#[derive(Debug, Default, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
}

impl TokenResponse {
    /// Decode a token response body. Anything unparseable yields empty tokens.
    pub fn from_body(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }
}

/// Form body for the authorization-code grant.
pub fn exchange_form(code: &str, client_id: &str, verifier: &str) -> String {
    form_urlencoded::Serializer::new(String::new())
        .append_pair("grant_type", "authorization_code")
        .append_pair("code", code)
        .append_pair("client_id", client_id)
        .append_pair("code_verifier", verifier)
        .append_pair("redirect_uri", REDIRECT_URI)
        .finish()
}
