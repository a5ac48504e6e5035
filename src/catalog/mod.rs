// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The durable registry of podcasts, episodes and local copies.
//!
//! The whole catalog is a single JSON document. Mutations happen on a working
//! copy that only exists while a session is open (see [`Catalog::with_session`]);
//! committing replaces the file on disk atomically, so an interrupted
//! multi-step operation never leaves a half-written catalog behind.

mod models;
mod page;
mod repo;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::store::write_atomically;

pub use models::{
    DEFAULT_PLAYBACK_RATE, DownloadedEpisode, Episode, EpisodeId, LocalFile, LocalFileId,
    NEVER_CHECKED, NewEpisode, NewPodcast, Podcast, PodcastId,
};
pub use page::Page;
pub use repo::{RemovedEpisode, RemovedPodcast};

/// Next identity to hand out per record kind; identities are never reused
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Sequences {
    podcast: u64,
    episode: u64,
    local_file: u64,
}

/// Everything the catalog persists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct CatalogState {
    /// Bumped once per successful mutation
    #[serde(default)]
    revision: u64,
    #[serde(default)]
    sequences: Sequences,
    #[serde(default)]
    podcasts: BTreeMap<PodcastId, Podcast>,
    #[serde(default)]
    episodes: BTreeMap<EpisodeId, Episode>,
    #[serde(default)]
    local_files: BTreeMap<LocalFileId, LocalFile>,
}

/// Catalog of podcasts, episodes and local files with a re-entrant
/// unit-of-work boundary.
#[derive(Debug)]
pub struct Catalog {
    /// `None` for catalogs that live only in memory
    path: Option<PathBuf>,
    committed: CatalogState,
    working: Option<CatalogState>,
    depth: usize,
}

impl Catalog {
    /// Open the catalog stored at `path`, starting empty if the file is missing
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        let committed = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| CatalogError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
            serde_json::from_str(&content).map_err(|e| CatalogError::Corrupt {
                path: path.to_path_buf(),
                source: e,
            })?
        } else {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).map_err(|e| CatalogError::WriteFailed {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
            CatalogState::default()
        };

        tracing::debug!(
            path = %path.display(),
            podcasts = committed.podcasts.len(),
            episodes = committed.episodes.len(),
            "Catalog opened"
        );

        Ok(Self {
            path: Some(path.to_path_buf()),
            committed,
            working: None,
            depth: 0,
        })
    }

    /// A catalog that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            committed: CatalogState::default(),
            working: None,
            depth: 0,
        }
    }

    /// Run `operation` inside a session.
    ///
    /// The outermost call owns the commit boundary: it opens the working copy,
    /// and on success flushes and commits it; on error the working copy is
    /// discarded. Nested calls reuse the open session and only flush, leaving
    /// commit or rollback to the outermost call.
    pub fn with_session<T, E, F>(&mut self, operation: F) -> Result<T, E>
    where
        F: FnOnce(&mut Catalog) -> Result<T, E>,
        E: From<CatalogError>,
    {
        let owns_commit = self.working.is_none();
        if owns_commit {
            self.working = Some(self.committed.clone());
        }
        self.depth += 1;

        let result = operation(self);

        self.depth -= 1;
        match result {
            Ok(value) => {
                self.flush();
                if owns_commit {
                    self.commit()?;
                }
                Ok(value)
            }
            Err(error) => {
                if owns_commit {
                    self.rollback();
                }
                Err(error)
            }
        }
    }

    /// Whether a session is currently open
    pub fn in_session(&self) -> bool {
        self.working.is_some()
    }

    /// Number of mutations ever committed (or pending, inside a session)
    pub fn revision(&self) -> u64 {
        self.view().revision
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// State visible to reads: the working copy inside a session
    fn view(&self) -> &CatalogState {
        self.working.as_ref().unwrap_or(&self.committed)
    }

    /// State for writes; only available inside a session
    fn working_mut(&mut self) -> Result<&mut CatalogState, CatalogError> {
        self.working.as_mut().ok_or(CatalogError::NoSession)
    }

    /// Writes land in the working copy directly, so identities and changes
    /// are already visible to later reads of the same session.
    fn flush(&self) {
        tracing::trace!(depth = self.depth, revision = self.revision(), "Session flushed");
    }

    fn commit(&mut self) -> Result<(), CatalogError> {
        let Some(working) = self.working.take() else {
            return Ok(());
        };

        if working.revision == self.committed.revision {
            return Ok(());
        }

        if let Some(path) = &self.path {
            let json = serde_json::to_vec_pretty(&working)?;
            write_atomically(path, &json).map_err(|e| CatalogError::WriteFailed {
                path: path.clone(),
                source: e,
            })?;
        }

        tracing::debug!(
            from = self.committed.revision,
            to = working.revision,
            "Catalog committed"
        );
        self.committed = working;
        Ok(())
    }

    fn rollback(&mut self) {
        if let Some(working) = self.working.take()
            && working.revision != self.committed.revision
        {
            tracing::debug!(
                discarded = working.revision - self.committed.revision,
                "Session rolled back"
            );
        }
    }
}
