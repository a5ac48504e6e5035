// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The `last_checked` value of a podcast that has never been looked at.
///
/// One minute past the Unix epoch, which sorts before any timestamp a real
/// feed can claim, so a freshly added podcast always reports an update.
pub const NEVER_CHECKED: DateTime<Utc> = DateTime::from_timestamp_nanos(60_000_000_000);

/// Playback rate assigned to new podcasts
pub const DEFAULT_PLAYBACK_RATE: f64 = 1.0;

macro_rules! catalog_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

catalog_id!(PodcastId, "Identity of a podcast, assigned by the catalog");
catalog_id!(EpisodeId, "Identity of an episode, assigned by the catalog");
catalog_id!(LocalFileId, "Identity of a downloaded copy, assigned by the catalog");

/// A subscribed podcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Podcast {
    pub id: PodcastId,
    pub name: String,
    pub feed_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub last_checked: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub preferred_playback_rate: f64,
}

impl Podcast {
    /// Whether the feed changed since the podcast was last looked at
    pub fn has_update(&self) -> bool {
        self.last_checked < self.last_updated
    }
}

/// Fields supplied when subscribing to a podcast
#[derive(Debug, Clone, PartialEq)]
pub struct NewPodcast {
    pub name: String,
    pub feed_url: String,
    pub author: Option<String>,
    pub site_url: Option<String>,
    pub description: Option<String>,
    /// The feed's claimed update time; `None` means "now"
    pub last_updated: Option<DateTime<Utc>>,
}

/// An episode belonging to exactly one podcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub podcast_id: PodcastId,
    pub title: String,
    pub source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_published: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Seconds into the episode; `None` when not started or finished
    #[serde(default)]
    pub last_position: Option<f64>,
    #[serde(default)]
    pub local_file: Option<LocalFileId>,
}

impl Episode {
    pub fn is_downloaded(&self) -> bool {
        self.local_file.is_some()
    }

    /// Whether this episode is the same unit as a feed entry with these fields
    pub fn matches(
        &self,
        title: &str,
        source_url: &str,
        date_published: Option<DateTime<Utc>>,
    ) -> bool {
        self.title == title && self.source_url == source_url && self.date_published == date_published
    }
}

/// Fields supplied when inserting an episode
#[derive(Debug, Clone, PartialEq)]
pub struct NewEpisode {
    pub title: String,
    pub source_url: String,
    pub date_published: Option<DateTime<Utc>>,
    pub description: Option<String>,
}

/// The downloaded copy of an episode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFile {
    pub id: LocalFileId,
    pub episode_id: EpisodeId,
    pub uri: String,
    pub date_created: DateTime<Utc>,
}

/// An episode joined with its local copy
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedEpisode {
    pub episode: Episode,
    pub local_file: LocalFile,
}
