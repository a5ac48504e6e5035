// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixtures shared by the unit tests of several modules.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};

use crate::catalog::{NewEpisode, NewPodcast};
use crate::error::TransportError;
use crate::http::{ByteStream, HttpClient, HttpResponse};

pub(crate) fn utc(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

/// The audio URL fixtures use for an episode title
pub(crate) fn episode_url(title: &str) -> String {
    format!(
        "https://example.com/{}.mp3",
        title.to_lowercase().replace(' ', "-")
    )
}

pub(crate) fn new_podcast(name: &str, feed_url: &str) -> NewPodcast {
    NewPodcast {
        name: name.to_string(),
        feed_url: feed_url.to_string(),
        author: None,
        site_url: None,
        description: None,
        last_updated: None,
    }
}

pub(crate) fn new_episode(title: &str, date_published: Option<DateTime<Utc>>) -> NewEpisode {
    NewEpisode {
        title: title.to_string(),
        source_url: episode_url(title),
        date_published,
        description: None,
    }
}

/// Render an RSS document with one enclosure per `(title, pub_date)` item
pub(crate) fn feed_xml(
    title: &str,
    last_build: Option<DateTime<Utc>>,
    items: &[(&str, Option<DateTime<Utc>>)],
) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel>"#,
    );
    xml.push_str(&format!(
        "<title>{title}</title><link>https://example.com</link><description>{title} feed</description>"
    ));
    if let Some(date) = last_build {
        xml.push_str(&format!("<lastBuildDate>{}</lastBuildDate>", date.to_rfc2822()));
    }
    for (item_title, pub_date) in items {
        xml.push_str("<item>");
        xml.push_str(&format!("<title>{item_title}</title>"));
        if let Some(date) = pub_date {
            xml.push_str(&format!("<pubDate>{}</pubDate>", date.to_rfc2822()));
        }
        xml.push_str(&format!(
            r#"<enclosure url="{}" length="1000" type="audio/mpeg"/>"#,
            episode_url(item_title)
        ));
        xml.push_str("</item>");
    }
    xml.push_str("</channel></rss>");
    xml
}

struct MockResource {
    body: Vec<u8>,
    status: u16,
    declare_length: bool,
    /// Break the body stream after this many bytes
    fail_after: Option<usize>,
}

/// An in-memory web: URLs without a registered resource fail to connect
#[derive(Default)]
pub(crate) struct MockHttpClient {
    resources: Mutex<HashMap<String, MockResource>>,
    requests: Mutex<Vec<String>>,
}

impl MockHttpClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn with_resource(self, url: &str, resource: MockResource) -> Self {
        self.resources
            .lock()
            .unwrap()
            .insert(url.to_string(), resource);
        self
    }

    pub(crate) fn with_page(self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.with_resource(
            url,
            MockResource {
                body: body.into(),
                status: 200,
                declare_length: true,
                fail_after: None,
            },
        )
    }

    pub(crate) fn with_status(self, url: &str, status: u16) -> Self {
        self.with_resource(
            url,
            MockResource {
                body: b"error".to_vec(),
                status,
                declare_length: true,
                fail_after: None,
            },
        )
    }

    /// Audio whose transfer breaks after `fail_after` bytes
    pub(crate) fn with_broken_audio(self, url: &str, body: &[u8], fail_after: usize) -> Self {
        self.with_resource(
            url,
            MockResource {
                body: body.to_vec(),
                status: 200,
                declare_length: true,
                fail_after: Some(fail_after),
            },
        )
    }

    /// Audio served without a Content-Length
    pub(crate) fn with_unsized_audio(self, url: &str, body: &[u8]) -> Self {
        self.with_resource(
            url,
            MockResource {
                body: body.to_vec(),
                status: 200,
                declare_length: false,
                fail_after: None,
            },
        )
    }

    /// Replace the body of an already registered page
    pub(crate) fn set_page(&self, url: &str, body: impl Into<Vec<u8>>) {
        let mut resources = self.resources.lock().unwrap();
        resources.insert(
            url.to_string(),
            MockResource {
                body: body.into(),
                status: 200,
                declare_length: true,
                fail_after: None,
            },
        );
    }

    /// Drop a resource so later requests fail to connect
    pub(crate) fn take_offline(&self, url: &str) {
        self.resources.lock().unwrap().remove(url);
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn connection_error(url: &str) -> TransportError {
        TransportError::Connection {
            url: url.to_string(),
            reason: "host unreachable".to_string(),
        }
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get_bytes(&self, url: &str) -> Result<Bytes, TransportError> {
        self.requests.lock().unwrap().push(url.to_string());
        let resources = self.resources.lock().unwrap();
        let resource = resources
            .get(url)
            .ok_or_else(|| Self::connection_error(url))?;

        if resource.status >= 400 {
            return Err(TransportError::Response {
                url: url.to_string(),
                reason: format!("HTTP status {}", resource.status),
            });
        }
        Ok(Bytes::from(resource.body.clone()))
    }

    async fn get_stream(&self, url: &str) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(url.to_string());
        let resources = self.resources.lock().unwrap();
        let resource = resources
            .get(url)
            .ok_or_else(|| Self::connection_error(url))?;

        let delivered = resource
            .fail_after
            .map_or(resource.body.len(), |n| n.min(resource.body.len()));
        let chunk_size = (delivered / 4).max(1);

        let mut chunks: Vec<Result<Bytes, TransportError>> = resource.body[..delivered]
            .chunks(chunk_size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        if resource.fail_after.is_some() {
            chunks.push(Err(TransportError::Connection {
                url: url.to_string(),
                reason: "connection reset by peer".to_string(),
            }));
        }

        let body: ByteStream = Box::pin(futures::stream::iter(chunks));
        Ok(HttpResponse {
            status: resource.status,
            content_length: resource
                .declare_length
                .then_some(resource.body.len() as u64),
            body,
        })
    }
}
