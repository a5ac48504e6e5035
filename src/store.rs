// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StoreError;

const MANIFEST_FILENAME: &str = ".manifest.json";
const STAGING_SUFFIX: &str = ".partial";

/// Manifest record for a stored blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// File name relative to the store root
    pub file_name: String,
    pub added: DateTime<Utc>,
}

/// Key-addressed blob storage backed by a directory and a JSON manifest.
///
/// Invariant: a manifest entry exists iff its backing file exists. It is
/// re-established every time the store is opened.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    manifest: BTreeMap<String, ManifestEntry>,
}

/// Write `data` next to `path` and rename it into place
pub(crate) fn write_atomically(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = std::fs::File::create(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&tmp_path, path)
}

/// Hex SHA-256 of `input`, used to turn keys into file names
fn hash_name(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

impl FileStore {
    /// Open (creating if necessary) the store rooted at `root`.
    ///
    /// Repairs the store on the way: manifest entries without a backing file
    /// are dropped and files the manifest does not know about are deleted,
    /// including staging files of interrupted downloads.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        let root = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
        Self::prepare_dir(&root)?;

        let mut store = Self {
            manifest: Self::load_manifest(&root)?,
            root,
        };
        store.validate()?;
        // A manifest we cannot write means the store is unusable
        store.save().map_err(|e| match e {
            StoreError::WriteFailed { path, source } => StoreError::Inaccessible { path, source },
            other => other,
        })?;
        Ok(store)
    }

    fn prepare_dir(root: &Path) -> Result<(), StoreError> {
        if root.exists() {
            if !root.is_dir() {
                return Err(StoreError::NotADirectory(root.to_path_buf()));
            }
            std::fs::read_dir(root).map_err(|e| StoreError::Inaccessible {
                path: root.to_path_buf(),
                source: e,
            })?;
        } else {
            std::fs::create_dir_all(root).map_err(|e| StoreError::CreateFailed {
                path: root.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    fn load_manifest(root: &Path) -> Result<BTreeMap<String, ManifestEntry>, StoreError> {
        let path = root.join(MANIFEST_FILENAME);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        if !path.is_file() {
            return Err(StoreError::ManifestNotAFile(path));
        }

        let content = std::fs::read(&path).map_err(|e| StoreError::Inaccessible {
            path: path.clone(),
            source: e,
        })?;
        serde_json::from_slice(&content).map_err(|e| StoreError::ManifestCorrupt { path, source: e })
    }

    fn validate(&mut self) -> Result<(), StoreError> {
        let root = self.root.clone();
        self.manifest.retain(|key, entry| {
            let present = root.join(&entry.file_name).is_file();
            if !present {
                tracing::warn!(key = %key, file = %entry.file_name, "Dropping manifest entry without backing file");
            }
            present
        });

        let entries = std::fs::read_dir(&self.root).map_err(|e| StoreError::Inaccessible {
            path: self.root.clone(),
            source: e,
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Inaccessible {
                path: self.root.clone(),
                source: e,
            })?;
            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy().into_owned();

            if file_name == MANIFEST_FILENAME || self.is_referenced(&file_name) {
                continue;
            }
            if !path.is_file() {
                tracing::warn!(path = %path.display(), "Ignoring unexpected directory in file store");
                continue;
            }

            tracing::info!(path = %path.display(), "Removing file unknown to the store manifest");
            std::fs::remove_file(&path).map_err(|e| StoreError::RemoveFailed { path, source: e })?;
        }

        Ok(())
    }

    fn is_referenced(&self, file_name: &str) -> bool {
        self.manifest.values().any(|e| e.file_name == file_name)
    }

    /// Persist the manifest
    pub fn save(&self) -> Result<(), StoreError> {
        let path = self.root.join(MANIFEST_FILENAME);
        let json = serde_json::to_vec_pretty(&self.manifest).map_err(|e| StoreError::WriteFailed {
            path: path.clone(),
            source: e.into(),
        })?;
        write_atomically(&path, &json).map_err(|e| StoreError::WriteFailed { path, source: e })
    }

    /// Pick an unused file name for `key`, rehashing on collision
    fn free_file_name(&self, key: &str) -> String {
        let mut name = hash_name(key);
        while self.root.join(&name).exists() || self.is_referenced(&name) {
            name = hash_name(&name);
        }
        name
    }

    /// Where a download for `key` should be written before [`put_file`](Self::put_file)
    ///
    /// Staging files are not part of the manifest, so an abandoned one is
    /// removed the next time the store is opened.
    pub fn staging_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}{}", hash_name(key), STAGING_SUFFIX))
    }

    /// Store `data` under `key`, replacing any previous blob
    pub fn put(&mut self, key: &str, data: &[u8]) -> Result<PathBuf, StoreError> {
        self.remove(key)?;

        let file_name = self.free_file_name(key);
        let path = self.root.join(&file_name);
        std::fs::write(&path, data).map_err(|e| StoreError::WriteFailed {
            path: path.clone(),
            source: e,
        })?;

        self.record(key, file_name)?;
        Ok(path)
    }

    /// Move an already written file into the store under `key`
    pub fn put_file(&mut self, key: &str, source: &Path) -> Result<PathBuf, StoreError> {
        self.remove(key)?;

        let file_name = self.free_file_name(key);
        let path = self.root.join(&file_name);
        if std::fs::rename(source, &path).is_err() {
            // Different filesystem: fall back to copy + delete
            std::fs::copy(source, &path).map_err(|e| StoreError::WriteFailed {
                path: path.clone(),
                source: e,
            })?;
            let _ = std::fs::remove_file(source);
        }

        self.record(key, file_name)?;
        Ok(path)
    }

    fn record(&mut self, key: &str, file_name: String) -> Result<(), StoreError> {
        self.manifest.insert(
            key.to_string(),
            ManifestEntry {
                file_name,
                added: Utc::now(),
            },
        );
        if let Err(e) = self.save() {
            // Keep the manifest/file invariant: undo the half-finished put
            if let Some(entry) = self.manifest.remove(key) {
                let _ = std::fs::remove_file(self.root.join(entry.file_name));
            }
            return Err(e);
        }
        tracing::debug!(key = %key, "Stored blob");
        Ok(())
    }

    /// Remove `key` and its blob; nothing happens if the key is unknown
    pub fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        let Some(entry) = self.manifest.remove(key) else {
            return Ok(());
        };

        let path = self.root.join(&entry.file_name);
        if let Err(e) = std::fs::remove_file(&path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            self.manifest.insert(key.to_string(), entry);
            return Err(StoreError::RemoveFailed { path, source: e });
        }

        tracing::debug!(key = %key, "Removed blob");
        self.save()
    }

    pub fn exists(&self, key: &str) -> bool {
        self.manifest.contains_key(key)
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.manifest
            .get(key)
            .map(|entry| self.root.join(&entry.file_name))
    }

    pub fn date_added(&self, key: &str) -> Option<DateTime<Utc>> {
        self.manifest.get(key).map(|entry| entry.added)
    }

    /// All stored keys, in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.manifest.keys().map(String::as_str)
    }

    /// The key whose blob lives at `path`, if any
    pub fn key_for_path(&self, path: &Path) -> Option<&str> {
        self.manifest
            .iter()
            .find(|(_, entry)| self.root.join(&entry.file_name) == path)
            .map(|(key, _)| key.as_str())
    }
}
