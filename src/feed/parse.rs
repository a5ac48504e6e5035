// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, FixedOffset, Utc};
use url::Url;

use crate::error::FeedError;

/// A parsed podcast feed: the channel summary plus its episodes
#[derive(Debug, Clone)]
pub struct Feed {
    pub title: String,
    pub description: Option<String>,
    pub link: Option<Url>,
    pub author: Option<String>,
    pub feed_url: Url,
    /// When the feed claims it last changed, if it says so
    pub last_updated: Option<DateTime<Utc>>,
    /// Episodes in feed order (usually newest first)
    pub episodes: Vec<FeedEpisode>,
}

/// A single episode entry of a feed
#[derive(Debug, Clone)]
pub struct FeedEpisode {
    pub title: String,
    pub description: Option<String>,
    pub pub_date: Option<DateTime<Utc>>,
    pub enclosure: Enclosure,
}

/// Represents the audio file attached to an episode
#[derive(Debug, Clone)]
pub struct Enclosure {
    pub url: Url,
    pub length: Option<u64>,
    pub mime_type: Option<String>,
}

/// Parse RSS feed XML bytes into a Feed
pub fn parse_feed(xml_bytes: &[u8], feed_url: Url) -> Result<Feed, FeedError> {
    let channel = rss::Channel::read_from(xml_bytes)?;

    let episodes = channel
        .items()
        .iter()
        .filter_map(parse_episode)
        .collect();

    let author = channel
        .itunes_ext()
        .and_then(|ext| ext.author().map(String::from))
        .or_else(|| channel.managing_editor().map(String::from));

    let last_updated = channel
        .last_build_date()
        .or_else(|| channel.pub_date())
        .and_then(parse_date);

    Ok(Feed {
        title: channel.title().to_string(),
        description: Some(channel.description().to_string()).filter(|s| !s.is_empty()),
        link: Url::parse(channel.link()).ok(),
        author,
        feed_url,
        last_updated,
        episodes,
    })
}

/// Items without an audio enclosure are not episodes we can play
fn parse_episode(item: &rss::Item) -> Option<FeedEpisode> {
    let title = item
        .title()
        .map(String::from)
        .unwrap_or_else(|| "Untitled Episode".to_string());

    let Some(enclosure) = item.enclosure() else {
        tracing::debug!(title = %title, "Skipping feed item without enclosure");
        return None;
    };
    let enclosure_url = Url::parse(enclosure.url()).ok()?;

    Some(FeedEpisode {
        title,
        description: item.description().map(String::from),
        pub_date: item.pub_date().and_then(parse_date),
        enclosure: Enclosure {
            url: enclosure_url,
            length: enclosure.length().parse().ok(),
            mime_type: Some(enclosure.mime_type().to_string()).filter(|s| !s.is_empty()),
        },
    })
}

/// Parse an RFC 2822 date, falling back to formats seen in the wild
fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let date_str = date_str.trim();
    DateTime::parse_from_rfc2822(date_str)
        .ok()
        .or_else(|| parse_relaxed_date(date_str))
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_relaxed_date(date_str: &str) -> Option<DateTime<FixedOffset>> {
    let formats = [
        "%a, %d %b %Y %H:%M:%S %z",
        "%Y-%m-%dT%H:%M:%S%:z",
        "%Y-%m-%d %H:%M:%S %z",
    ];

    formats
        .iter()
        .find_map(|format| DateTime::parse_from_str(date_str, format).ok())
        .or_else(|| DateTime::parse_from_rfc3339(date_str).ok())
}
