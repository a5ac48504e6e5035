// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use thiserror::Error;

use crate::catalog::{EpisodeId, PodcastId};

/// Errors raised by the HTTP seam
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// DNS, connect or timeout failures; safe to retry
    #[error("Could not connect to {url}: {reason}")]
    Connection { url: String, reason: String },

    /// The remote answered, but with an error or a broken body
    #[error("Bad response from {url}: {reason}")]
    Response { url: String, reason: String },
}

impl TransportError {
    /// Classify a reqwest error into connection or response failures.
    ///
    /// A body that breaks off mid-transfer counts as a connection failure,
    /// as does a request that failed on an I/O error.
    pub fn from_reqwest(url: &str, error: reqwest::Error) -> Self {
        let network_failure = error.is_connect()
            || error.is_timeout()
            || error.is_body()
            || (error.is_request() && has_io_source(&error));

        if network_failure {
            Self::Connection {
                url: url.to_string(),
                reason: error.to_string(),
            }
        } else {
            Self::Response {
                url: url.to_string(),
                reason: error.to_string(),
            }
        }
    }
}

fn has_io_source(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = error.source();
    while let Some(cause) = source {
        if cause.is::<std::io::Error>() {
            return true;
        }
        source = cause.source();
    }
    false
}

/// Errors that can occur when fetching or parsing RSS feeds
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Failed to connect to feed {url}: {reason}")]
    Connection { url: String, reason: String },

    #[error("Failed to fetch feed from {url}: {reason}")]
    Response { url: String, reason: String },

    #[error("Failed to read feed file {path}: {source}")]
    FileReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse RSS feed: {0}")]
    ParseFailed(#[from] rss::Error),

    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("No RSS feed found at {url}")]
    NoFeedFound { url: String },
}

impl From<TransportError> for FeedError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Connection { url, reason } => Self::Connection { url, reason },
            TransportError::Response { url, reason } => Self::Response { url, reason },
        }
    }
}

/// Errors that can occur during episode downloads
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Failed to connect to {url}: {reason}")]
    Connection { url: String, reason: String },

    #[error("Download of {url} failed: {reason}")]
    Response { url: String, reason: String },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to create file {path}: {source}")]
    FileCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to file {path}: {source}")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File store error: {0}")]
    Store(#[from] StoreError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

impl From<TransportError> for DownloadError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Connection { url, reason } => Self::Connection { url, reason },
            TransportError::Response { url, reason } => Self::Response { url, reason },
        }
    }
}

/// Errors raised by the on-disk file store
///
/// Everything except the write/remove variants is an initialization failure:
/// the store directory cannot be used at all.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store path {0} exists and is not a directory")]
    NotADirectory(PathBuf),

    #[error("Failed to create store directory {path}: {source}")]
    CreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Insufficient access to {path}: {source}")]
    Inaccessible {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store manifest {0} exists and is not a file")]
    ManifestNotAFile(PathBuf),

    #[error("Corrupted store manifest {path}: {source}")]
    ManifestCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove {path}: {source}")]
    RemoveFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Whether this error means the store could not be opened at all
    pub fn is_initialization(&self) -> bool {
        !matches!(self, Self::WriteFailed { .. } | Self::RemoveFailed { .. })
    }
}

/// Errors raised by the catalog repository and its session boundary
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog mutation attempted outside of a session")]
    NoSession,

    #[error("Podcast {0} not found")]
    PodcastNotFound(PodcastId),

    #[error("Episode {0} not found")]
    EpisodeNotFound(EpisodeId),

    #[error("A podcast with feed {0} already exists")]
    DuplicateFeed(String),

    #[error("Invalid playback rate {0}: must be a positive number")]
    InvalidRate(f64),

    #[error("Invalid playback position {0}: must be a non-negative number of seconds")]
    InvalidPosition(f64),

    #[error("Failed to read catalog {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write catalog {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize catalog: {0}")]
    SerializeFailed(#[from] serde_json::Error),
}

/// Top-level errors surfaced by the library facade
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("{0}")]
    Feed(#[from] FeedError),

    #[error("{0}")]
    Download(#[from] DownloadError),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Catalog(#[from] CatalogError),
}

impl LibraryError {
    /// Connection-class failures may succeed when retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Feed(FeedError::Connection { .. })
                | Self::Download(DownloadError::Connection { .. })
        )
    }
}
