//! Key-value preference storage
//!
//! `PreferenceStore` holds the persisted (already encrypted and encoded)
//! token strings. `FilePreferences` keeps them in a JSON object file; every
//! write goes through an atomic temp-file + rename so a crash mid-write
//! never leaves a truncated file. `MemoryPreferences` is the in-process
//! variant for ephemeral sessions and tests.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// Async key-value store for persisted strings.
///
/// `set_strings` applies all entries in one write so related keys (the
/// access/refresh pair) can never be persisted half-updated.
pub trait PreferenceStore: Send + Sync {
    fn get_string<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;

    fn set_strings<'a>(
        &'a self,
        entries: Vec<(&'a str, String)>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Preferences persisted to a JSON file with owner-only permissions.
pub struct FilePreferences {
    path: PathBuf,
    state: Mutex<BTreeMap<String, String>>,
}

impl FilePreferences {
    /// Open the preference file, creating it as `{}` if it doesn't exist.
    ///
    /// A file that does not parse is renamed to `<name>.corrupt` and replaced
    /// with an empty one, so startup continues signed out.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading preference file: {e}")))?;
            match serde_json::from_str::<BTreeMap<String, String>>(&contents) {
                Ok(prefs) => {
                    info!(path = %path.display(), keys = prefs.len(), "loaded preferences");
                    prefs
                }
                Err(e) => {
                    error!(
                        path = %path.display(),
                        error = %e,
                        "preference file is corrupt, starting empty"
                    );
                    set_aside(&path).await;
                    let prefs = BTreeMap::new();
                    write_json(&path, &prefs).await?;
                    prefs
                }
            }
        } else {
            info!(path = %path.display(), "preference file not found, starting empty");
            let prefs = BTreeMap::new();
            write_json(&path, &prefs).await?;
            prefs
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }
}

impl PreferenceStore for FilePreferences {
    fn get_string<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async move { self.state.lock().await.get(key).cloned() })
    }

    fn set_strings<'a>(
        &'a self,
        entries: Vec<(&'a str, String)>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let mut next = state.clone();
            for (key, value) in entries {
                next.insert(key.to_string(), value);
            }
            // Only adopt the new map once it is on disk
            write_json(&self.path, &next).await?;
            *state = next;
            Ok(())
        })
    }
}

/// Preferences held in memory only.
#[derive(Default)]
pub struct MemoryPreferences {
    state: Mutex<BTreeMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get_string<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async move { self.state.lock().await.get(key).cloned() })
    }

    fn set_strings<'a>(
        &'a self,
        entries: Vec<(&'a str, String)>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            for (key, value) in entries {
                state.insert(key.to_string(), value);
            }
            Ok(())
        })
    }
}

/// Move an unreadable file to `<name>.corrupt`.
async fn set_aside(path: &Path) {
    let mut aside = path.as_os_str().to_owned();
    aside.push(".corrupt");
    if let Err(e) = tokio::fs::rename(path, &aside).await {
        warn!(path = %path.display(), error = %e, "could not move corrupt preference file aside");
    }
}

async fn write_json(path: &Path, prefs: &BTreeMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(prefs)
        .map_err(|e| Error::Preferences(format!("serializing preferences: {e}")))?;
    write_atomic(path, json.as_bytes()).await
}

/// Write a file atomically with 0600 permissions.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("path has no parent directory".into()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("prefs");
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(|e| Error::Io(format!("writing temp file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp file: {e}")))?;

    debug!(path = %path.display(), "persisted");
    Ok(())
}
