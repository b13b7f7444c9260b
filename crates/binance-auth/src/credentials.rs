//! Encrypted credential storage
//!
//! Holds the access/refresh token pair in memory and mirrors it, encrypted
//! and base64-encoded, into the preference store under two fixed keys.
//!
//! Persistence is best effort: `save` updates the in-memory pair before it
//! touches the codec or the store and never rolls back. `load` never fails;
//! anything it cannot decode or decrypt leaves the pair empty, which means
//! the user has to authorize again.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::Secret;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::codec::SecretCodec;
use crate::constants::{ACCESS_TOKEN_PREF, REFRESH_TOKEN_PREF};
use crate::error::{Error, Result};
use crate::prefs::PreferenceStore;

/// The token pair. Both fields are always replaced together.
#[derive(Debug, Clone, Default)]
pub struct Credential {
    pub access: Secret<String>,
    pub refresh: Secret<String>,
}

impl Credential {
    pub fn new(access: String, refresh: String) -> Self {
        Self {
            access: Secret::new(access),
            refresh: Secret::new(refresh),
        }
    }
}

/// In-memory token pair backed by encrypted preferences.
///
/// The Mutex serializes saves so the in-memory pair and the persisted pair
/// are always updated in the same order.
pub struct CredentialStore {
    codec: Arc<dyn SecretCodec>,
    prefs: Arc<dyn PreferenceStore>,
    state: Mutex<Credential>,
}

impl CredentialStore {
    /// Restore the token pair from preferences.
    ///
    /// Missing keys mean a first run. Decode or decrypt failures are logged
    /// and also yield an empty pair.
    pub async fn load(codec: Arc<dyn SecretCodec>, prefs: Arc<dyn PreferenceStore>) -> Self {
        let credential = match read_persisted(codec.as_ref(), prefs.as_ref()).await {
            Ok(Some(credential)) => {
                info!(
                    authenticated = !credential.access.is_empty(),
                    "restored stored credentials"
                );
                credential
            }
            Ok(None) => {
                info!("no stored credentials, starting signed out");
                Credential::default()
            }
            Err(e) => {
                error!(error = %e, "could not restore stored credentials, reauthentication required");
                Credential::default()
            }
        };

        Self {
            codec,
            prefs,
            state: Mutex::new(credential),
        }
    }

    /// Replace the token pair and persist it encrypted.
    ///
    /// The in-memory pair is updated unconditionally. If either encryption
    /// fails nothing is written and `Error::Encrypt` is returned; a store
    /// write failure is returned as-is. Callers log and continue.
    pub async fn save(&self, access: String, refresh: String) -> Result<()> {
        let mut state = self.state.lock().await;

        let sealed_access = self.codec.encrypt(&access);
        let sealed_refresh = self.codec.encrypt(&refresh);
        *state = Credential::new(access, refresh);

        let sealed_access = sealed_access?;
        let sealed_refresh = sealed_refresh?;

        self.prefs
            .set_strings(vec![
                (ACCESS_TOKEN_PREF, STANDARD.encode(sealed_access)),
                (REFRESH_TOKEN_PREF, STANDARD.encode(sealed_refresh)),
            ])
            .await?;

        debug!(authenticated = !state.access.is_empty(), "persisted credentials");
        Ok(())
    }

    /// Overwrite both tokens, in memory and on disk, with empty strings.
    pub async fn clear(&self) -> Result<()> {
        self.save(String::new(), String::new()).await
    }

    /// Snapshot of the current pair.
    pub async fn current(&self) -> Credential {
        self.state.lock().await.clone()
    }

    /// Current access token, empty when signed out.
    pub async fn access_token(&self) -> String {
        self.state.lock().await.access.expose().clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        !self.state.lock().await.access.is_empty()
    }
}

async fn read_persisted(
    codec: &dyn SecretCodec,
    prefs: &dyn PreferenceStore,
) -> Result<Option<Credential>> {
    let access = prefs.get_string(ACCESS_TOKEN_PREF).await;
    let refresh = prefs.get_string(REFRESH_TOKEN_PREF).await;
    let (Some(access), Some(refresh)) = (access, refresh) else {
        return Ok(None);
    };

    let access = STANDARD
        .decode(access)
        .map_err(|e| Error::Decode(format!("access token: {e}")))?;
    let refresh = STANDARD
        .decode(refresh)
        .map_err(|e| Error::Decode(format!("refresh token: {e}")))?;

    Ok(Some(Credential::new(
        codec.decrypt(&access)?,
        codec.decrypt(&refresh)?,
    )))
}
