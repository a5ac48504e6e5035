// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;

use crate::catalog::{EpisodeId, PodcastId};

/// How far along a transfer is
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransferProgress {
    /// Completed fraction in `[0, 1]`; the remote declared a size
    Ratio(f64),
    /// The remote did not declare a size
    Unknown,
}

impl TransferProgress {
    pub fn new(bytes_downloaded: u64, total_bytes: Option<u64>) -> Self {
        match total_bytes {
            Some(0) => Self::Ratio(1.0),
            Some(total) => Self::Ratio((bytes_downloaded as f64 / total as f64).clamp(0.0, 1.0)),
            None => Self::Unknown,
        }
    }
}

/// Events emitted while syncing feeds and downloading episodes
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Feed is being fetched from URL
    FetchingFeed { url: String },

    /// A podcast's feed was applied to the catalog
    PodcastSynced {
        podcast_id: PodcastId,
        podcast_title: String,
        added: usize,
        removed: usize,
    },

    /// A podcast's feed was unchanged since the last sync
    PodcastUnchanged {
        podcast_id: PodcastId,
        podcast_title: String,
    },

    /// Fetching or applying a podcast's feed failed
    PodcastSyncFailed {
        podcast_id: PodcastId,
        podcast_title: String,
        error: String,
    },

    /// A download is starting
    DownloadStarting {
        episode_id: EpisodeId,
        episode_title: String,
        /// Expected content length in bytes, if known
        content_length: Option<u64>,
    },

    /// Download progress update
    DownloadProgress {
        episode_id: EpisodeId,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    },

    /// A download completed successfully
    DownloadCompleted {
        episode_id: EpisodeId,
        episode_title: String,
        bytes_downloaded: u64,
    },

    /// A download failed
    DownloadFailed {
        episode_id: EpisodeId,
        episode_title: String,
        error: String,
    },

    /// Bulk sync finished
    SyncCompleted {
        updated_count: usize,
        unchanged_count: usize,
        failed_count: usize,
    },
}

impl ProgressEvent {
    /// Transfer progress carried by a `DownloadProgress` event
    pub fn transfer(&self) -> Option<TransferProgress> {
        match self {
            Self::DownloadProgress {
                bytes_downloaded,
                total_bytes,
                ..
            } => Some(TransferProgress::new(*bytes_downloaded, *total_bytes)),
            _ => None,
        }
    }
}

/// Trait for reporting progress events.
///
/// Events are reported synchronously on the task doing the work and never
/// after that work has returned.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// A no-op progress reporter that silently ignores all events.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {
        // Intentionally empty
    }
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}

/// Forwards events into a channel so they can be consumed as a stream
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelReporter {
    /// Create a reporter and the stream of events it produces.
    ///
    /// The stream ends once every clone of the reporter has been dropped.
    pub fn channel() -> (SharedProgressReporter, impl Stream<Item = ProgressEvent>) {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let stream = futures::stream::poll_fn(move |cx| receiver.poll_recv(cx));
        (Arc::new(Self { sender }), stream)
    }
}

impl ProgressReporter for ChannelReporter {
    fn report(&self, event: ProgressEvent) {
        // A dropped receiver only means nobody is listening anymore
        let _ = self.sender.send(event);
    }
}
