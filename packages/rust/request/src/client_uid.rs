//! Persistent per-(endpoint, user) client UIDs.
//!
//! Institutions on OFX 1.03+ identify the client installation with a
//! `CLIENTUID`. Once a UID has been approved by the institution it must be
//! reused on every later connection, so the table is kept on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ofxfetch_shared::{OfxError, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

/// Key/value source of client UIDs.
pub trait ClientUidStore: Send {
    /// The UID for this (host, user) pair, created and persisted if absent.
    fn client_uid(&mut self, host: &str, user: &str) -> Result<String>;

    /// Drop the UID for this pair. Returns whether an entry existed.
    fn forget(&mut self, host: &str, user: &str) -> Result<bool>;
}

/// JSON-file-backed [`ClientUidStore`].
///
/// Keys are SHA-256 digests of host and user, so the file never holds a
/// user name in clear text.
#[derive(Debug)]
pub struct FileClientUidStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileClientUidStore {
    /// Open the table at `path`. A missing file is an empty table.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| OfxError::io(&path, e))?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content).map_err(|e| {
                    OfxError::parse(format!("client UID table {}: {e}", path.display()))
                })?
            }
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), entries = entries.len(), "opened client UID table");
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| OfxError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| OfxError::parse(e.to_string()))?;
        std::fs::write(&self.path, json).map_err(|e| OfxError::io(&self.path, e))
    }
}

impl ClientUidStore for FileClientUidStore {
    fn client_uid(&mut self, host: &str, user: &str) -> Result<String> {
        let key = table_key(host, user);
        if let Some(uid) = self.entries.get(&key) {
            return Ok(uid.clone());
        }

        let uid = Uuid::new_v4().to_string();
        self.entries.insert(key, uid.clone());
        self.save()?;
        info!(host, "generated new client UID");
        Ok(uid)
    }

    fn forget(&mut self, host: &str, user: &str) -> Result<bool> {
        let removed = self.entries.remove(&table_key(host, user)).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }
}

fn table_key(host: &str, user: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(host.to_ascii_lowercase().as_bytes());
    hasher.update(user.as_bytes());
    format!("{:x}", hasher.finalize())
}
