//! Binance OAuth authentication library
//!
//! Provides PKCE generation, authorization URL construction, the token
//! exchange form, and encrypted persistence of the access/refresh token
//! pair. Network I/O lives in `binance-client`; this crate only builds
//! requests and stores what comes back.
//!
//! Credential flow:
//! 1. `PkcePair::generate()` produces a verifier and its S256 challenge
//! 2. `build_authorization_url()` sends the user to Binance
//! 3. The redirect delivers an authorization code
//! 4. `token::exchange_form()` builds the code-for-token request body
//! 5. `CredentialStore::save()` encrypts and persists the returned tokens
//! 6. `CredentialStore::load()` restores them on the next start

pub mod codec;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod pkce;
pub mod prefs;
pub mod token;

pub use codec::{AesGcmCodec, SecretCodec};
pub use constants::*;
pub use credentials::{Credential, CredentialStore};
pub use error::{Error, Result};
pub use pkce::{PkcePair, build_authorization_url, compute_challenge, generate_verifier};
pub use prefs::{FilePreferences, MemoryPreferences, PreferenceStore};
pub use token::{TokenResponse, exchange_form};
