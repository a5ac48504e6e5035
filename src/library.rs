// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The entry point for view layers.
//!
//! [`Library`] ties the catalog, the file store and the network together.
//! Each method is one top-level operation: it either completes or leaves the
//! catalog as it was.

use crate::catalog::{
    Catalog, DownloadedEpisode, Episode, EpisodeId, LocalFile, NewPodcast, Page, Podcast,
    PodcastId, RemovedPodcast,
};
use crate::config::Config;
use crate::episode::{self, Reconciliation, store_key};
use crate::error::{CatalogError, LibraryError};
use crate::feed::fetch_feed_source;
use crate::http::{HttpClient, ReqwestClient};
use crate::playback::{PlayRequest, PlaybackState};
use crate::progress::SharedProgressReporter;
use crate::store::FileStore;
use crate::sync::{self, SyncOutcome, SyncReport};

/// A podcast library rooted at a data directory
pub struct Library<C: HttpClient = ReqwestClient> {
    config: Config,
    catalog: Catalog,
    store: FileStore,
    client: C,
}

impl Library<ReqwestClient> {
    /// Open the library with an HTTP client honoring the configured timeout
    pub fn open(config: Config) -> Result<Self, LibraryError> {
        let client = ReqwestClient::with_timeout(config.request_timeout);
        Self::with_client(config, client)
    }
}

impl<C: HttpClient> Library<C> {
    /// Open the catalog and file store and repair any disagreement between them
    pub fn with_client(config: Config, client: C) -> Result<Self, LibraryError> {
        let mut catalog = Catalog::open(&config.catalog_path())?;
        let mut store = FileStore::open(&config.store_dir())?;
        let repairs = episode::reconcile(&mut catalog, &mut store)?;
        if repairs != Reconciliation::default() {
            tracing::info!(?repairs, "Repaired library on open");
        }

        Ok(Self {
            config,
            catalog,
            store,
            client,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn all_podcasts(&self) -> Vec<Podcast> {
        self.catalog.list_podcasts()
    }

    /// A page of a podcast's episodes. Viewing the list counts as checking
    /// the podcast for updates.
    pub fn episodes(
        &mut self,
        podcast_id: PodcastId,
        offset: usize,
    ) -> Result<Page<Episode>, LibraryError> {
        let page = self
            .catalog
            .list_episodes(podcast_id, offset, self.config.page_size)?;
        self.catalog
            .with_session(|catalog| catalog.check_podcast(podcast_id))?;
        Ok(page)
    }

    pub fn downloaded_episodes(&self, offset: usize) -> Page<DownloadedEpisode> {
        self.catalog
            .list_downloaded_episodes(offset, self.config.page_size)
    }

    /// Subscribe to the feed at `source` (URL, web page or local file)
    pub async fn add_podcast(&mut self, source: &str) -> Result<PodcastId, LibraryError> {
        let feed = fetch_feed_source(&self.client, source).await?;
        let feed_url = feed.feed_url.to_string();

        if self.catalog.find_podcast_by_feed(&feed_url).is_some() {
            return Err(CatalogError::DuplicateFeed(feed_url).into());
        }

        let name = if feed.title.trim().is_empty() {
            feed_url.clone()
        } else {
            feed.title.trim().to_string()
        };

        let id = self.catalog.with_session(|catalog| {
            let id = catalog.add_podcast(NewPodcast {
                name,
                feed_url,
                author: feed.author.clone(),
                site_url: feed.link.as_ref().map(|url| url.to_string()),
                description: feed.description.clone(),
                last_updated: feed.last_updated,
            })?;
            sync::populate(catalog, id, &feed)?;
            Ok::<_, CatalogError>(id)
        })?;

        tracing::info!(podcast = %id, title = %feed.title, episodes = feed.episodes.len(), "Podcast added");
        Ok(id)
    }

    /// Unsubscribe, dropping every episode and local copy of the podcast
    pub fn remove_podcast(&mut self, podcast_id: PodcastId) -> Result<RemovedPodcast, LibraryError> {
        let removed = self
            .catalog
            .with_session(|catalog| catalog.remove_podcast(podcast_id))?;

        episode::discard_copies(&self.catalog, &mut self.store, &removed.local_files);

        tracing::info!(podcast = %removed.podcast.name, "Podcast removed");
        Ok(removed)
    }

    /// Sync every podcast; failures are collected in the report
    pub async fn sync_all(&mut self, reporter: &SharedProgressReporter) -> SyncReport {
        let podcasts = self.catalog.list_podcasts();
        let report = sync::sync_podcasts(
            &self.client,
            &mut self.catalog,
            podcasts,
            self.config.max_concurrent_fetches,
            reporter,
        )
        .await;

        episode::discard_copies(&self.catalog, &mut self.store, &report.detached);
        report
    }

    pub async fn sync_one(&mut self, podcast_id: PodcastId) -> Result<SyncOutcome, LibraryError> {
        let podcast = self.catalog.get_podcast(podcast_id)?;
        let feed = fetch_feed_source(&self.client, &podcast.feed_url).await?;
        let outcome = sync::sync(&mut self.catalog, podcast_id, &feed)?;

        if let SyncOutcome::Updated(changes) = &outcome {
            episode::discard_copies(&self.catalog, &mut self.store, &changes.detached);
        }
        Ok(outcome)
    }

    /// Make sure the episode is downloaded and describe how to play it
    pub async fn play(
        &mut self,
        episode_id: EpisodeId,
        reporter: &SharedProgressReporter,
    ) -> Result<PlayRequest, LibraryError> {
        let local_file = self.download(episode_id, reporter).await?;
        let episode = self.catalog.get_episode(episode_id)?;
        let podcast = self.catalog.get_podcast(episode.podcast_id)?;

        Ok(PlayRequest {
            episode_id,
            podcast_id: podcast.id,
            name: store_key(&podcast.name, &episode.title),
            uri: local_file.uri,
            resume_position: episode.last_position,
            rate: podcast.preferred_playback_rate,
        })
    }

    pub async fn download(
        &mut self,
        episode_id: EpisodeId,
        reporter: &SharedProgressReporter,
    ) -> Result<LocalFile, LibraryError> {
        Ok(episode::download(
            &self.client,
            &mut self.catalog,
            &mut self.store,
            episode_id,
            reporter,
        )
        .await?)
    }

    /// Returns whether the episode had a local copy
    pub fn delete_local_copy(&mut self, episode_id: EpisodeId) -> Result<bool, LibraryError> {
        episode::delete_local_copy(&mut self.catalog, &mut self.store, episode_id)
    }

    /// Persist position and rate together, as one checkpoint
    pub fn update_playback_state(
        &mut self,
        episode_id: EpisodeId,
        position: Option<f64>,
        rate: f64,
    ) -> Result<(), LibraryError> {
        let podcast_id = self.catalog.get_episode(episode_id)?.podcast_id;
        self.catalog.with_session(|catalog| {
            episode::record_position(catalog, episode_id, position)?;
            episode::set_preferred_rate(catalog, podcast_id, rate)
        })?;
        Ok(())
    }

    /// Persist a checkpoint taken from a playback session
    pub fn record_checkpoint(
        &mut self,
        request: &PlayRequest,
        state: PlaybackState,
    ) -> Result<(), LibraryError> {
        self.update_playback_state(request.episode_id, state.position, state.rate)
    }

    pub fn record_position(
        &mut self,
        episode_id: EpisodeId,
        position: Option<f64>,
    ) -> Result<(), LibraryError> {
        Ok(episode::record_position(&mut self.catalog, episode_id, position)?)
    }

    pub fn preferred_rate(&self, podcast_id: PodcastId) -> Result<f64, LibraryError> {
        Ok(episode::preferred_rate(&self.catalog, podcast_id)?)
    }

    pub fn set_preferred_rate(&mut self, podcast_id: PodcastId, rate: f64) -> Result<(), LibraryError> {
        Ok(episode::set_preferred_rate(&mut self.catalog, podcast_id, rate)?)
    }
}
