// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use bytes::Bytes;
use url::Url;

use crate::error::FeedError;
use crate::http::HttpClient;

use super::discover::discover;
use super::parse::{Feed, parse_feed};

/// How many HTML pages we follow before giving up on finding a feed
const MAX_DISCOVERY_HOPS: usize = 3;

/// Fetch raw feed bytes from a URL (without parsing)
pub async fn fetch_feed_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Bytes, FeedError> {
    Ok(client.get_bytes(url).await?)
}

/// Read raw feed bytes from a local file (without parsing)
pub fn read_feed_file(path: &Path) -> Result<Vec<u8>, FeedError> {
    std::fs::read(path).map_err(|e| FeedError::FileReadFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Construct a file:// URL for a local file path
pub fn file_path_to_url(path: &Path) -> Result<Url, FeedError> {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match Url::from_file_path(&absolute) {
        Ok(url) => Ok(url),
        Err(()) => Ok(Url::parse(&format!("file://{}", absolute.display()))?),
    }
}

/// Fetch and parse a podcast feed from a URL.
///
/// When the URL points at an HTML page rather than a feed, the page's
/// advertised feed link or meta redirect is followed.
pub async fn fetch_feed<C: HttpClient>(client: &C, url: &str) -> Result<Feed, FeedError> {
    let mut current = Url::parse(url)?;

    for _ in 0..=MAX_DISCOVERY_HOPS {
        let bytes = fetch_feed_bytes(client, current.as_str()).await?;
        let parse_error = match parse_feed(&bytes, current.clone()) {
            Ok(feed) => return Ok(feed),
            Err(e) => e,
        };

        let html = String::from_utf8_lossy(&bytes);
        match discover(&html, &current) {
            Some(found) => {
                tracing::debug!(from = %current, to = %found.url(), "Following feed discovery");
                current = found.url().clone();
            }
            None => {
                tracing::debug!(url = %current, error = %parse_error, "Page is neither a feed nor links to one");
                return Err(FeedError::NoFeedFound {
                    url: url.to_string(),
                });
            }
        }
    }

    Err(FeedError::NoFeedFound {
        url: url.to_string(),
    })
}

/// Parse a podcast feed from a local file
pub fn parse_feed_file(path: &Path) -> Result<Feed, FeedError> {
    let bytes = read_feed_file(path)?;
    let feed_url = file_path_to_url(path)?;
    parse_feed(&bytes, feed_url)
}

/// Fetch a feed from wherever `source` points: an http(s) URL, a file://
/// URL or a local path. Sources without a scheme default to http.
pub async fn fetch_feed_source<C: HttpClient>(client: &C, source: &str) -> Result<Feed, FeedError> {
    if is_url(source) {
        return fetch_feed(client, source).await;
    }

    if source.starts_with("file://") {
        let path = Url::parse(source)?
            .to_file_path()
            .map_err(|()| FeedError::NoFeedFound {
                url: source.to_string(),
            })?;
        return parse_feed_file(&path);
    }

    if Path::new(source).exists() {
        return parse_feed_file(Path::new(source));
    }

    fetch_feed(client, &format!("http://{source}")).await
}

/// Determine if a string is a URL or a file path
pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}
