use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::error::ClientError;

/// The credential pair the client holds between calls. `expires_at` is the
/// access token's expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credentials {
    pub fn expires_within(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        self.expires_at - buffer <= now
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Where the credential pair lives between calls. Refresh logic only sees
/// this trait.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Result<Option<Credentials>, ClientError>;
    fn set(&self, credentials: &Credentials) -> Result<(), ClientError>;
    fn clear(&self) -> Result<(), ClientError>;

    fn has_valid(&self, now: DateTime<Utc>) -> bool {
        matches!(self.get(), Ok(Some(c)) if c.expires_at > now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(credentials: Credentials) -> Self {
        Self {
            slot: Mutex::new(Some(credentials)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Result<Option<Credentials>, ClientError> {
        Ok(self.slot.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    fn set(&self, credentials: &Credentials) -> Result<(), ClientError> {
        *self.slot.lock().unwrap_or_else(|p| p.into_inner()) = Some(credentials.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        *self.slot.lock().unwrap_or_else(|p| p.into_inner()) = None;
        Ok(())
    }
}

/// Persists credentials as JSON. Writes go to a sibling temp file that is
/// renamed over the target, so a reader never sees a half-written file.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "credentials".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn storage_error(err: impl fmt::Display) -> ClientError {
    ClientError::Storage(err.to_string())
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Result<Option<Credentials>, ClientError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(storage_error(err)),
        };
        match serde_json::from_slice(&raw) {
            Ok(credentials) => Ok(Some(credentials)),
            Err(err) => {
                log::warn!(
                    "Ignoring unreadable credential file {}: {}",
                    self.path.display(),
                    err
                );
                Ok(None)
            }
        }
    }

    fn set(&self, credentials: &Credentials) -> Result<(), ClientError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(storage_error)?;
        }
        let body = serde_json::to_vec(credentials).map_err(storage_error)?;
        let temp = self.temp_path();
        fs::write(&temp, body).map_err(storage_error)?;
        fs::rename(&temp, &self.path).map_err(storage_error)
    }

    fn clear(&self) -> Result<(), ClientError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(storage_error(err)),
        }
    }
}
