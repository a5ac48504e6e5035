// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Finding the real feed behind a web page that is not a feed itself.

use scraper::{Html, Selector};
use url::Url;

const RSS_LINK_SELECTOR: &str = r#"link[type="application/rss+xml"][href]"#;
const META_REFRESH_SELECTOR: &str = r#"meta[http-equiv="refresh"][content]"#;

/// Where to look next for a feed, given an HTML page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    /// The page advertises a feed via `<link type="application/rss+xml">`
    FeedLink(Url),
    /// The page redirects elsewhere via `<meta http-equiv="refresh">`
    Redirect(Url),
}

impl Discovery {
    pub fn url(&self) -> &Url {
        match self {
            Self::FeedLink(url) | Self::Redirect(url) => url,
        }
    }
}

/// Inspect an HTML page for a feed link, then for a meta redirect
pub fn discover(html: &str, page_url: &Url) -> Option<Discovery> {
    let rss_link = Selector::parse(RSS_LINK_SELECTOR).ok()?;
    let meta_refresh = Selector::parse(META_REFRESH_SELECTOR).ok()?;
    let document = Html::parse_document(html);

    let feed_link = document
        .select(&rss_link)
        .filter_map(|link| link.value().attr("href"))
        .find_map(|href| page_url.join(href.trim()).ok());
    if let Some(url) = feed_link {
        return Some(Discovery::FeedLink(url));
    }

    document
        .select(&meta_refresh)
        .filter_map(|meta| meta.value().attr("content"))
        .find_map(|content| refresh_target(content, page_url))
        .map(Discovery::Redirect)
}

/// Extract the target of a refresh directive such as `0; url=/feed`
fn refresh_target(content: &str, page_url: &Url) -> Option<Url> {
    let (_, target) = content.split_once('=')?;
    let target = target.trim().trim_matches(|c| c == '"' || c == '\'');
    if target.is_empty() {
        return None;
    }
    page_url.join(target).ok()
}
