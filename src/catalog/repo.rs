// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Utc};

use super::{
    Catalog, CatalogState, DEFAULT_PLAYBACK_RATE, DownloadedEpisode, Episode, EpisodeId,
    LocalFile, LocalFileId, NEVER_CHECKED, NewEpisode, NewPodcast, Page, Podcast, PodcastId,
};
use crate::error::CatalogError;

/// A podcast deleted from the catalog together with its episodes
#[derive(Debug, Clone)]
pub struct RemovedPodcast {
    pub podcast: Podcast,
    pub episodes: Vec<Episode>,
    /// Records of the local copies that went with the episodes
    pub local_files: Vec<LocalFile>,
}

/// An episode deleted from the catalog, with its local copy record if it had one
#[derive(Debug, Clone)]
pub struct RemovedEpisode {
    pub episode: Episode,
    pub local_file: Option<LocalFile>,
}

impl CatalogState {
    fn touch(&mut self) {
        self.revision += 1;
    }

    fn podcast_mut(&mut self, id: PodcastId) -> Result<&mut Podcast, CatalogError> {
        self.podcasts
            .get_mut(&id)
            .ok_or(CatalogError::PodcastNotFound(id))
    }

    fn episode_mut(&mut self, id: EpisodeId) -> Result<&mut Episode, CatalogError> {
        self.episodes
            .get_mut(&id)
            .ok_or(CatalogError::EpisodeNotFound(id))
    }

    /// Remove an episode and the record of its local copy
    fn remove_episode(&mut self, id: EpisodeId) -> Option<RemovedEpisode> {
        let episode = self.episodes.remove(&id)?;
        let local_file = episode
            .local_file
            .and_then(|file_id| self.local_files.remove(&file_id));
        Some(RemovedEpisode {
            episode,
            local_file,
        })
    }
}

fn validate_rate(rate: f64) -> Result<f64, CatalogError> {
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(CatalogError::InvalidRate(rate))
    }
}

fn validate_position(position: Option<f64>) -> Result<Option<f64>, CatalogError> {
    match position {
        Some(seconds) if !seconds.is_finite() || seconds < 0.0 => {
            Err(CatalogError::InvalidPosition(seconds))
        }
        other => Ok(other),
    }
}

/// Queries
impl Catalog {
    /// All podcasts ordered by name
    pub fn list_podcasts(&self) -> Vec<Podcast> {
        let mut podcasts: Vec<_> = self.view().podcasts.values().cloned().collect();
        podcasts.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        podcasts
    }

    pub fn get_podcast(&self, id: PodcastId) -> Result<Podcast, CatalogError> {
        self.view()
            .podcasts
            .get(&id)
            .cloned()
            .ok_or(CatalogError::PodcastNotFound(id))
    }

    pub fn find_podcast_by_feed(&self, feed_url: &str) -> Option<Podcast> {
        self.view()
            .podcasts
            .values()
            .find(|p| p.feed_url == feed_url)
            .cloned()
    }

    pub fn get_episode(&self, id: EpisodeId) -> Result<Episode, CatalogError> {
        self.view()
            .episodes
            .get(&id)
            .cloned()
            .ok_or(CatalogError::EpisodeNotFound(id))
    }

    /// Every episode of a podcast, in identity order
    pub fn podcast_episodes(&self, podcast_id: PodcastId) -> Vec<Episode> {
        self.view()
            .episodes
            .values()
            .filter(|e| e.podcast_id == podcast_id)
            .cloned()
            .collect()
    }

    /// A page of a podcast's episodes, newest first; undated episodes go last
    pub fn list_episodes(
        &self,
        podcast_id: PodcastId,
        offset: usize,
        limit: usize,
    ) -> Result<Page<Episode>, CatalogError> {
        if !self.view().podcasts.contains_key(&podcast_id) {
            return Err(CatalogError::PodcastNotFound(podcast_id));
        }

        let mut episodes = self.podcast_episodes(podcast_id);
        episodes.sort_by(|a, b| {
            b.date_published
                .cmp(&a.date_published)
                .then(b.id.cmp(&a.id))
        });
        Ok(Page::from_ordered(episodes, offset, limit))
    }

    /// A page of downloaded episodes, most recently downloaded first
    pub fn list_downloaded_episodes(&self, offset: usize, limit: usize) -> Page<DownloadedEpisode> {
        let state = self.view();
        let mut downloaded: Vec<_> = state
            .episodes
            .values()
            .filter_map(|episode| {
                let local_file = state.local_files.get(&episode.local_file?)?;
                Some(DownloadedEpisode {
                    episode: episode.clone(),
                    local_file: local_file.clone(),
                })
            })
            .collect();
        downloaded.sort_by(|a, b| {
            b.local_file
                .date_created
                .cmp(&a.local_file.date_created)
                .then(b.episode.id.cmp(&a.episode.id))
        });
        Page::from_ordered(downloaded, offset, limit)
    }

    pub fn local_file(&self, episode_id: EpisodeId) -> Option<LocalFile> {
        let state = self.view();
        let file_id = state.episodes.get(&episode_id)?.local_file?;
        state.local_files.get(&file_id).cloned()
    }

    /// Every local copy record
    pub fn local_files(&self) -> Vec<LocalFile> {
        self.view().local_files.values().cloned().collect()
    }

    pub fn is_downloaded(&self, episode_id: EpisodeId) -> Result<bool, CatalogError> {
        self.get_episode(episode_id).map(|e| e.is_downloaded())
    }

    pub fn preferred_rate(&self, podcast_id: PodcastId) -> Result<f64, CatalogError> {
        self.get_podcast(podcast_id)
            .map(|p| p.preferred_playback_rate)
    }
}

/// Mutations; each one requires an open session
impl Catalog {
    pub fn add_podcast(&mut self, new: NewPodcast) -> Result<PodcastId, CatalogError> {
        if self.working_mut()?.podcasts.values().any(|p| p.feed_url == new.feed_url) {
            return Err(CatalogError::DuplicateFeed(new.feed_url));
        }

        let state = self.working_mut()?;
        state.sequences.podcast += 1;
        let id = PodcastId(state.sequences.podcast);
        state.podcasts.insert(
            id,
            Podcast {
                id,
                name: new.name,
                feed_url: new.feed_url,
                author: new.author,
                site_url: new.site_url,
                description: new.description,
                last_checked: NEVER_CHECKED,
                last_updated: new.last_updated.unwrap_or_else(Utc::now),
                preferred_playback_rate: DEFAULT_PLAYBACK_RATE,
            },
        );
        state.touch();
        Ok(id)
    }

    /// Delete a podcast, its episodes and their local copy records
    pub fn remove_podcast(&mut self, id: PodcastId) -> Result<RemovedPodcast, CatalogError> {
        let state = self.working_mut()?;
        let podcast = state
            .podcasts
            .remove(&id)
            .ok_or(CatalogError::PodcastNotFound(id))?;

        let episode_ids: Vec<_> = state
            .episodes
            .values()
            .filter(|e| e.podcast_id == id)
            .map(|e| e.id)
            .collect();
        let mut episodes = Vec::new();
        let mut local_files = Vec::new();
        for removed in episode_ids
            .into_iter()
            .filter_map(|episode_id| state.remove_episode(episode_id))
        {
            episodes.push(removed.episode);
            local_files.extend(removed.local_file);
        }

        state.touch();
        Ok(RemovedPodcast {
            podcast,
            episodes,
            local_files,
        })
    }

    /// Mark the podcast as looked at now
    pub fn check_podcast(&mut self, id: PodcastId) -> Result<(), CatalogError> {
        let now = Utc::now();
        let state = self.working_mut()?;
        let podcast = state.podcast_mut(id)?;
        if now > podcast.last_checked {
            podcast.last_checked = now;
            state.touch();
        }
        Ok(())
    }

    pub fn set_last_updated(
        &mut self,
        id: PodcastId,
        last_updated: DateTime<Utc>,
    ) -> Result<(), CatalogError> {
        let state = self.working_mut()?;
        state.podcast_mut(id)?.last_updated = last_updated;
        state.touch();
        Ok(())
    }

    pub fn set_preferred_rate(&mut self, id: PodcastId, rate: f64) -> Result<(), CatalogError> {
        let rate = validate_rate(rate)?;
        let state = self.working_mut()?;
        let podcast = state.podcast_mut(id)?;
        if podcast.preferred_playback_rate != rate {
            podcast.preferred_playback_rate = rate;
            state.touch();
        }
        Ok(())
    }

    pub fn insert_episode(
        &mut self,
        podcast_id: PodcastId,
        new: NewEpisode,
    ) -> Result<EpisodeId, CatalogError> {
        let state = self.working_mut()?;
        if !state.podcasts.contains_key(&podcast_id) {
            return Err(CatalogError::PodcastNotFound(podcast_id));
        }

        state.sequences.episode += 1;
        let id = EpisodeId(state.sequences.episode);
        state.episodes.insert(
            id,
            Episode {
                id,
                podcast_id,
                title: new.title,
                source_url: new.source_url,
                date_published: new.date_published,
                description: new.description,
                last_position: None,
                local_file: None,
            },
        );
        state.touch();
        Ok(id)
    }

    /// Delete an episode; its local copy record goes with it, the file
    /// itself is left for the caller
    pub fn delete_episode(&mut self, id: EpisodeId) -> Result<RemovedEpisode, CatalogError> {
        let state = self.working_mut()?;
        let removed = state
            .remove_episode(id)
            .ok_or(CatalogError::EpisodeNotFound(id))?;
        state.touch();
        Ok(removed)
    }

    /// Record the playback position; `None` marks the episode as finished
    pub fn set_last_position(
        &mut self,
        id: EpisodeId,
        position: Option<f64>,
    ) -> Result<(), CatalogError> {
        let position = validate_position(position)?;
        let state = self.working_mut()?;
        let episode = state.episode_mut(id)?;
        if episode.last_position != position {
            episode.last_position = position;
            state.touch();
        }
        Ok(())
    }

    /// Attach a local copy to an episode, replacing any previous one
    pub fn attach_local_file(
        &mut self,
        episode_id: EpisodeId,
        uri: String,
        date_created: DateTime<Utc>,
    ) -> Result<LocalFileId, CatalogError> {
        let state = self.working_mut()?;
        let previous = state.episode_mut(episode_id)?.local_file;
        if let Some(previous) = previous {
            state.local_files.remove(&previous);
        }

        state.sequences.local_file += 1;
        let id = LocalFileId(state.sequences.local_file);
        state.local_files.insert(
            id,
            LocalFile {
                id,
                episode_id,
                uri,
                date_created,
            },
        );
        state.episode_mut(episode_id)?.local_file = Some(id);
        state.touch();
        Ok(id)
    }

    /// Detach and destroy an episode's local copy record, if it has one
    pub fn detach_local_file(
        &mut self,
        episode_id: EpisodeId,
    ) -> Result<Option<LocalFile>, CatalogError> {
        let state = self.working_mut()?;
        let Some(file_id) = state.episode_mut(episode_id)?.local_file.take() else {
            return Ok(None);
        };
        let removed = state.local_files.remove(&file_id);
        state.touch();
        Ok(removed)
    }
}
