//! Persistence adapters for the status store
//!
//! The persisted layout is a flat JSON object keyed by credential id, each
//! value a `CredentialStatus`. `JsonFilePersistence` writes it atomically to
//! disk; `MemoryPersistence` keeps the same JSON text in memory.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tracing::debug;

use crate::error::{Error, Result};
use crate::status::CredentialStatus;

/// Status records keyed by credential id.
pub type StatusMap = HashMap<String, CredentialStatus>;

/// Storage backend for the status map.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Persistence>`).
pub trait Persistence: Send + Sync {
    /// Read the persisted map. Absence is an empty map; corruption is an error.
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<StatusMap>> + Send + '_>>;

    /// Replace the persisted map.
    fn save<'a>(&'a self, statuses: &'a StatusMap) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// JSON file on disk.
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Persistence for JsonFilePersistence {
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<StatusMap>> + Send + '_>> {
        Box::pin(async move {
            let contents = match tokio::fs::read_to_string(&self.path).await {
                Ok(c) => c,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %self.path.display(), "status file not found, starting empty");
                    return Ok(StatusMap::new());
                }
                Err(e) => {
                    return Err(Error::Persistence(format!("reading status file: {e}")));
                }
            };
            parse(&contents)
        })
    }

    fn save<'a>(&'a self, statuses: &'a StatusMap) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(write_atomic(&self.path, statuses))
    }
}

/// In-memory JSON text, for tests and deployments without on-disk state.
#[derive(Default)]
pub struct MemoryPersistence {
    contents: parking_lot::Mutex<Option<String>>,
    fail_saves: bool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with raw persisted text, which need not be valid JSON.
    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: parking_lot::Mutex::new(Some(contents.into())),
            fail_saves: false,
        }
    }

    /// A store whose every save fails.
    pub fn failing() -> Self {
        Self {
            contents: parking_lot::Mutex::new(None),
            fail_saves: true,
        }
    }

    /// The raw persisted text, if anything has been written.
    pub fn contents(&self) -> Option<String> {
        self.contents.lock().clone()
    }
}

impl Persistence for MemoryPersistence {
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<StatusMap>> + Send + '_>> {
        let contents = self.contents.lock().clone();
        Box::pin(async move {
            match contents {
                Some(c) => parse(&c),
                None => Ok(StatusMap::new()),
            }
        })
    }

    fn save<'a>(&'a self, statuses: &'a StatusMap) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.fail_saves {
                return Err(Error::Persistence("memory store configured to fail".into()));
            }
            let json = serde_json::to_string(statuses)
                .map_err(|e| Error::Persistence(format!("serializing statuses: {e}")))?;
            *self.contents.lock() = Some(json);
            Ok(())
        })
    }
}

fn parse(contents: &str) -> Result<StatusMap> {
    if contents.trim().is_empty() {
        return Ok(StatusMap::new());
    }
    serde_json::from_str(contents).map_err(|e| Error::Persistence(format!("parsing status file: {e}")))
}

/// Write the status map to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target so a crash mid-write never leaves a truncated file. Sets
/// permissions to 0600 on unix.
async fn write_atomic(path: &Path, data: &StatusMap) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Persistence(format!("serializing statuses: {e}")))?;

    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "key-status.json".to_string());
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Persistence(format!("writing temp status file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Persistence(format!("setting status file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Persistence(format!("renaming temp status file: {e}")))?;

    debug!(path = %path.display(), records = data.len(), "persisted credential statuses");
    Ok(())
}
