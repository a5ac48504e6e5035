pub mod catalog;
pub mod config;
pub mod episode;
pub mod error;
pub mod feed;
pub mod http;
pub mod library;
pub mod playback;
pub mod progress;
pub mod store;
pub mod sync;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use catalog::{
    Catalog, DownloadedEpisode, Episode, EpisodeId, LocalFile, LocalFileId, NEVER_CHECKED, Page,
    Podcast, PodcastId,
};
pub use config::Config;
pub use error::{CatalogError, DownloadError, FeedError, LibraryError, StoreError, TransportError};
pub use feed::{Feed, FeedEpisode, fetch_feed, fetch_feed_source, parse_feed};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use library::Library;
pub use playback::{PlayRequest, PlaybackSession, PlaybackState, Player};
pub use progress::{
    ChannelReporter, NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter,
    TransferProgress,
};
pub use store::FileStore;
pub use sync::{SyncFailure, SyncOutcome, SyncReport};
