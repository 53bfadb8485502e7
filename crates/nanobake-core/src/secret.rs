//! Provider API key storage
//!
//! Holds the single provider credential for the process. The key is loaded
//! from a small file (falling back to `NANOBAKE_API_KEY`), replaced wholesale
//! by [`SecretStore::save`], and only ever shown in masked form.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::Result;

/// Environment variable consulted when no key file exists
pub const API_KEY_ENV: &str = "NANOBAKE_API_KEY";

/// Placeholder shown for keys too short to partially reveal
const SHORT_KEY_MASK: &str = "***";

/// Single-credential store backed by a file
#[derive(Debug)]
pub struct SecretStore {
    path: PathBuf,
    secret: RwLock<Zeroizing<String>>,
}

impl SecretStore {
    /// Load the persisted key, falling back to the environment
    ///
    /// Absence is not an error: the store simply starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let secret = read_key_file(&path)
            .or_else(|| std::env::var(API_KEY_ENV).ok().map(|v| v.trim().to_string()))
            .unwrap_or_default();

        debug!(path = %path.display(), present = !secret.is_empty(), "Loaded API key");

        Self {
            path,
            secret: RwLock::new(Zeroizing::new(secret)),
        }
    }

    /// Create a store holding `secret` in memory, persisting later saves to `path`
    pub fn with_secret(path: impl Into<PathBuf>, secret: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            secret: RwLock::new(Zeroizing::new(secret.into())),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `secret` and make it the current key
    ///
    /// The in-memory key only changes once the file write succeeded. The
    /// file is restricted to its owner before the key is written.
    pub fn save(&self, secret: &str) -> Result<()> {
        let secret = secret.trim();

        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        restrict_permissions(&self.path)?;
        file.write_all(secret.as_bytes())?;

        let mut guard = self.secret.write().unwrap_or_else(|e| e.into_inner());
        *guard = Zeroizing::new(secret.to_string());

        info!(key = %mask(secret), "API key saved");
        Ok(())
    }

    /// The raw key, empty when unset
    pub fn current(&self) -> Zeroizing<String> {
        let guard = self.secret.read().unwrap_or_else(|e| e.into_inner());
        guard.clone()
    }

    /// Whether a non-empty key is configured
    pub fn is_set(&self) -> bool {
        let guard = self.secret.read().unwrap_or_else(|e| e.into_inner());
        !guard.is_empty()
    }

    /// The key with everything but a short prefix and suffix hidden
    pub fn masked(&self) -> String {
        mask(&self.current())
    }
}

/// Mask a key for display
///
/// Keys longer than 12 characters keep their first 8 and last 4 characters;
/// shorter keys collapse to a fixed placeholder and empty keys stay empty.
pub fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    match chars.len() {
        0 => String::new(),
        n if n > 12 => {
            let prefix: String = chars[..8].iter().collect();
            let suffix: String = chars[n - 4..].iter().collect();
            format!("{}...{}", prefix, suffix)
        }
        _ => SHORT_KEY_MASK.to_string(),
    }
}

fn read_key_file(path: &Path) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    Some(contents.trim().to_string())
}

fn restrict_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;

    Ok(())
}
