// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reconciling remote feeds with the catalog.
//!
//! A feed is applied only when it claims to be newer than what the catalog
//! last saw. Applying it keeps every known episode that still appears in the
//! feed, inserts the ones that don't exist yet and deletes the ones that
//! vanished. Episodes are identified by `(title, source_url, date_published)`.

use std::pin::pin;

use futures::StreamExt;

use crate::catalog::{Catalog, Episode, EpisodeId, LocalFile, NewEpisode, Podcast, PodcastId};
use crate::error::{CatalogError, LibraryError};
use crate::feed::{Feed, fetch_feed_source};
use crate::http::HttpClient;
use crate::progress::{ProgressEvent, SharedProgressReporter};

/// Episode-level changes produced by applying a feed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncChanges {
    /// Newly inserted episodes, oldest first
    pub added: Vec<EpisodeId>,
    /// Episodes that disappeared from the feed
    pub removed: Vec<EpisodeId>,
    /// Local copies that belonged to removed episodes; their store
    /// entries are left for the caller
    pub detached: Vec<LocalFile>,
}

impl SyncChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// What a sync pass did to one podcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The feed is not newer than the catalog; nothing was written
    Unchanged,
    Updated(SyncChanges),
}

/// A podcast whose sync failed, with the reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub podcast_id: PodcastId,
    pub podcast_name: String,
    pub reason: String,
}

/// Result of syncing several podcasts
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub updated: Vec<PodcastId>,
    pub unchanged: Vec<PodcastId>,
    pub failures: Vec<SyncFailure>,
    /// Local copies detached by removed episodes
    pub detached: Vec<LocalFile>,
}

/// Apply `feed` to the podcast if the feed is newer than the catalog.
///
/// Runs in its own session, or joins the caller's if one is open.
pub fn sync(
    catalog: &mut Catalog,
    podcast_id: PodcastId,
    feed: &Feed,
) -> Result<SyncOutcome, CatalogError> {
    let podcast = catalog.get_podcast(podcast_id)?;

    let Some(last_updated) = feed.last_updated.filter(|t| *t > podcast.last_updated) else {
        tracing::debug!(
            podcast = %podcast.name,
            feed_updated = ?feed.last_updated,
            known_updated = %podcast.last_updated,
            "Feed not newer than catalog, skipping"
        );
        return Ok(SyncOutcome::Unchanged);
    };

    catalog.with_session(|catalog| {
        catalog.set_last_updated(podcast_id, last_updated)?;
        apply_episodes(catalog, &podcast, feed).map(SyncOutcome::Updated)
    })
}

/// Apply `feed` unconditionally; used when subscribing to a podcast
pub fn populate(
    catalog: &mut Catalog,
    podcast_id: PodcastId,
    feed: &Feed,
) -> Result<SyncChanges, CatalogError> {
    catalog.with_session(|catalog| {
        let podcast = catalog.get_podcast(podcast_id)?;
        apply_episodes(catalog, &podcast, feed)
    })
}

fn apply_episodes(
    catalog: &mut Catalog,
    podcast: &Podcast,
    feed: &Feed,
) -> Result<SyncChanges, CatalogError> {
    let mut known: Vec<Episode> = catalog.podcast_episodes(podcast.id);
    let mut seen: Vec<EpisodeId> = Vec::new();
    let mut changes = SyncChanges::default();

    // Oldest first, so identities follow publication order
    for remote in feed.episodes.iter().rev() {
        let source_url = remote.enclosure.url.as_str();
        if let Some(existing) = known
            .iter()
            .find(|e| e.matches(&remote.title, source_url, remote.pub_date))
        {
            seen.push(existing.id);
            continue;
        }

        // New entry: insert now so it has an id before the removal pass
        let id = catalog.insert_episode(
            podcast.id,
            NewEpisode {
                title: remote.title.clone(),
                source_url: source_url.to_string(),
                date_published: remote.pub_date,
                description: remote.description.clone(),
            },
        )?;
        known.push(catalog.get_episode(id)?);
        seen.push(id);
        changes.added.push(id);
    }

    // Whatever the feed no longer lists goes, along with its copy record
    for episode in known.iter().filter(|e| !seen.contains(&e.id)) {
        let removed = catalog.delete_episode(episode.id)?;
        changes.detached.extend(removed.local_file);
        changes.removed.push(removed.episode.id);
    }

    tracing::debug!(
        podcast = %podcast.name,
        added = changes.added.len(),
        removed = changes.removed.len(),
        "Feed applied"
    );
    Ok(changes)
}

/// Fetch the feeds of `podcasts` concurrently and apply them one by one.
///
/// A failing podcast is recorded in the report and does not stop the rest.
pub async fn sync_podcasts<C: HttpClient>(
    client: &C,
    catalog: &mut Catalog,
    podcasts: Vec<Podcast>,
    max_concurrent: usize,
    reporter: &SharedProgressReporter,
) -> SyncReport {
    let mut report = SyncReport::default();

    // Fetch in parallel, but hand results back in podcast order
    let fetches = futures::stream::iter(podcasts.into_iter().map(|podcast| async move {
        reporter.report(ProgressEvent::FetchingFeed {
            url: podcast.feed_url.clone(),
        });
        let feed = fetch_feed_source(client, &podcast.feed_url).await;
        (podcast, feed)
    }))
    .buffered(max_concurrent.max(1));
    let mut fetches = pin!(fetches);

    // Apply one at a time; each podcast gets its own session
    while let Some((podcast, feed)) = fetches.next().await {
        let outcome = feed
            .map_err(LibraryError::from)
            .and_then(|feed| Ok(sync(catalog, podcast.id, &feed)?));

        match outcome {
            Ok(SyncOutcome::Unchanged) => {
                reporter.report(ProgressEvent::PodcastUnchanged {
                    podcast_id: podcast.id,
                    podcast_title: podcast.name.clone(),
                });
                report.unchanged.push(podcast.id);
            }
            Ok(SyncOutcome::Updated(changes)) => {
                reporter.report(ProgressEvent::PodcastSynced {
                    podcast_id: podcast.id,
                    podcast_title: podcast.name.clone(),
                    added: changes.added.len(),
                    removed: changes.removed.len(),
                });
                report.updated.push(podcast.id);
                report.detached.extend(changes.detached);
            }
            Err(e) => {
                tracing::warn!(podcast = %podcast.name, error = %e, "Podcast sync failed");
                reporter.report(ProgressEvent::PodcastSyncFailed {
                    podcast_id: podcast.id,
                    podcast_title: podcast.name.clone(),
                    error: e.to_string(),
                });
                report.failures.push(SyncFailure {
                    podcast_id: podcast.id,
                    podcast_name: podcast.name,
                    reason: e.to_string(),
                });
            }
        }
    }

    // Report summary
    reporter.report(ProgressEvent::SyncCompleted {
        updated_count: report.updated.len(),
        unchanged_count: report.unchanged.len(),
        failed_count: report.failures.len(),
    });

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NewPodcast;
    use crate::feed::parse_feed;
    use crate::progress::{ChannelReporter, NoopReporter};
    use crate::test_support::{MockHttpClient, feed_xml, new_podcast, utc};
    use chrono::{DateTime, Utc};
    use url::Url;

    const FEED_URL: &str = "https://example.com/feed.xml";

    fn feed(last_build: Option<DateTime<Utc>>, items: &[(&str, Option<DateTime<Utc>>)]) -> Feed {
        let xml = feed_xml("Show", last_build, items);
        parse_feed(xml.as_bytes(), Url::parse(FEED_URL).unwrap()).unwrap()
    }

    fn catalog_with_podcast() -> (Catalog, PodcastId) {
        let mut catalog = Catalog::in_memory();
        let id = catalog
            .with_session(|c| {
                c.add_podcast(NewPodcast {
                    last_updated: Some(utc(2020, 1, 1)),
                    ..new_podcast("Show", FEED_URL)
                })
            })
            .unwrap();
        (catalog, id)
    }

    fn titles(catalog: &Catalog, id: PodcastId) -> Vec<String> {
        let mut titles: Vec<_> = catalog
            .podcast_episodes(id)
            .into_iter()
            .map(|e| e.title)
            .collect();
        titles.sort();
        titles
    }

    #[test]
    fn newer_feed_inserts_episodes() {
        let (mut catalog, id) = catalog_with_podcast();
        let remote = feed(
            Some(utc(2021, 1, 1)),
            &[("B", Some(utc(2020, 6, 2))), ("A", Some(utc(2020, 6, 1)))],
        );

        let outcome = sync(&mut catalog, id, &remote).unwrap();

        let SyncOutcome::Updated(changes) = outcome else {
            panic!("expected an update");
        };
        assert_eq!(changes.added.len(), 2);
        assert!(changes.removed.is_empty());
        assert_eq!(titles(&catalog, id), vec!["A", "B"]);
        assert_eq!(catalog.get_podcast(id).unwrap().last_updated, utc(2021, 1, 1));

        // Oldest entry gets the lower identity
        let a = catalog.get_episode(changes.added[0]).unwrap();
        assert_eq!(a.title, "A");
    }

    #[test]
    fn second_sync_of_same_feed_writes_nothing() {
        let (mut catalog, id) = catalog_with_podcast();
        let remote = feed(Some(utc(2021, 1, 1)), &[("A", Some(utc(2020, 6, 1)))]);

        sync(&mut catalog, id, &remote).unwrap();
        let revision = catalog.revision();

        assert_eq!(sync(&mut catalog, id, &remote).unwrap(), SyncOutcome::Unchanged);
        assert_eq!(catalog.revision(), revision);
    }

    #[test]
    fn repopulating_same_feed_is_idempotent() {
        let (mut catalog, id) = catalog_with_podcast();
        let remote = feed(None, &[("A", Some(utc(2020, 6, 1))), ("B", None)]);

        populate(&mut catalog, id, &remote).unwrap();
        let revision = catalog.revision();
        let ids: Vec<_> = catalog.podcast_episodes(id).iter().map(|e| e.id).collect();

        let changes = populate(&mut catalog, id, &remote).unwrap();

        assert!(changes.is_empty());
        assert_eq!(catalog.revision(), revision);
        let again: Vec<_> = catalog.podcast_episodes(id).iter().map(|e| e.id).collect();
        assert_eq!(ids, again);
    }

    #[test]
    fn feed_without_timestamp_is_not_applied() {
        let (mut catalog, id) = catalog_with_podcast();
        let revision = catalog.revision();

        let outcome = sync(&mut catalog, id, &feed(None, &[("A", None)])).unwrap();

        assert_eq!(outcome, SyncOutcome::Unchanged);
        assert_eq!(catalog.revision(), revision);
        assert!(catalog.podcast_episodes(id).is_empty());
    }

    #[test]
    fn older_feed_is_not_applied() {
        let (mut catalog, id) = catalog_with_podcast();

        let outcome = sync(&mut catalog, id, &feed(Some(utc(2019, 1, 1)), &[("A", None)])).unwrap();

        assert_eq!(outcome, SyncOutcome::Unchanged);
        assert!(catalog.podcast_episodes(id).is_empty());
    }

    #[test]
    fn rolling_feed_keeps_survivors_and_replaces_the_rest() {
        let (mut catalog, id) = catalog_with_podcast();
        let a = ("A", Some(utc(2020, 6, 1)));
        let b = ("B", Some(utc(2020, 6, 2)));
        let c = ("C", Some(utc(2020, 6, 3)));

        sync(&mut catalog, id, &feed(Some(utc(2021, 1, 1)), &[b, a])).unwrap();
        let b_id = catalog
            .podcast_episodes(id)
            .into_iter()
            .find(|e| e.title == "B")
            .unwrap()
            .id;

        let SyncOutcome::Updated(changes) =
            sync(&mut catalog, id, &feed(Some(utc(2021, 2, 1)), &[c, b])).unwrap()
        else {
            panic!("expected an update");
        };

        assert_eq!(titles(&catalog, id), vec!["B", "C"]);
        assert_eq!(changes.added.len(), 1);
        assert_eq!(changes.removed.len(), 1);
        assert!(catalog.get_episode(b_id).is_ok());
    }

    #[test]
    fn any_field_change_makes_a_new_episode() {
        let (mut catalog, id) = catalog_with_podcast();
        sync(&mut catalog, id, &feed(Some(utc(2021, 1, 1)), &[("A", Some(utc(2020, 6, 1)))]))
            .unwrap();
        let original = catalog.podcast_episodes(id)[0].id;

        // Publisher corrects the date
        sync(&mut catalog, id, &feed(Some(utc(2021, 2, 1)), &[("A", Some(utc(2020, 6, 2)))]))
            .unwrap();

        let episodes = catalog.podcast_episodes(id);
        assert_eq!(episodes.len(), 1);
        assert_ne!(episodes[0].id, original);
    }

    #[test]
    fn duplicate_feed_entries_collapse_into_one_episode() {
        let (mut catalog, id) = catalog_with_podcast();
        let a = ("A", Some(utc(2020, 6, 1)));

        populate(&mut catalog, id, &feed(None, &[a, a])).unwrap();

        assert_eq!(catalog.podcast_episodes(id).len(), 1);
    }

    #[test]
    fn removed_downloaded_episode_reports_its_local_copy() {
        let (mut catalog, id) = catalog_with_podcast();
        populate(&mut catalog, id, &feed(None, &[("A", None), ("B", None)])).unwrap();
        let a = catalog
            .podcast_episodes(id)
            .into_iter()
            .find(|e| e.title == "A")
            .unwrap();
        catalog
            .with_session(|c| c.attach_local_file(a.id, "file:///tmp/a".to_string(), Utc::now()))
            .unwrap();

        let SyncOutcome::Updated(changes) =
            sync(&mut catalog, id, &feed(Some(utc(2021, 1, 1)), &[("B", None)])).unwrap()
        else {
            panic!("expected an update");
        };

        assert_eq!(changes.removed, vec![a.id]);
        assert_eq!(changes.detached.len(), 1);
        assert_eq!(changes.detached[0].episode_id, a.id);
        assert_eq!(changes.detached[0].uri, "file:///tmp/a");
        assert!(catalog.local_files().is_empty());
    }

    #[test]
    fn sync_joins_an_open_session() {
        let (mut catalog, id) = catalog_with_podcast();
        let remote = feed(Some(utc(2021, 1, 1)), &[("A", None)]);

        let result: Result<(), CatalogError> = catalog.with_session(|c| {
            sync(c, id, &remote)?;
            Err(CatalogError::EpisodeNotFound(EpisodeId(999)))
        });

        assert!(result.is_err());
        assert!(catalog.podcast_episodes(id).is_empty());
        assert_eq!(catalog.get_podcast(id).unwrap().last_updated, utc(2020, 1, 1));
    }

    #[tokio::test]
    async fn bulk_sync_isolates_failures() {
        let mut catalog = Catalog::in_memory();
        let (good, bad) = catalog
            .with_session(|c| {
                let good = c.add_podcast(NewPodcast {
                    last_updated: Some(utc(2020, 1, 1)),
                    ..new_podcast("Good", "https://good.example.com/feed.xml")
                })?;
                let bad = c.add_podcast(new_podcast("Bad", "https://bad.example.com/feed.xml"))?;
                Ok::<_, CatalogError>((good, bad))
            })
            .unwrap();
        let client = MockHttpClient::new().with_page(
            "https://good.example.com/feed.xml",
            feed_xml("Good", Some(utc(2021, 1, 1)), &[("A", None)]),
        );

        let podcasts = catalog.list_podcasts();
        let report =
            sync_podcasts(&client, &mut catalog, podcasts, 2, &NoopReporter::shared()).await;

        assert_eq!(report.updated, vec![good]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].podcast_id, bad);
        assert!(report.failures[0].reason.contains("bad.example.com"));
        assert_eq!(catalog.podcast_episodes(good).len(), 1);
    }

    #[tokio::test]
    async fn bulk_sync_reports_progress() {
        let (mut catalog, id) = catalog_with_podcast();
        let client = MockHttpClient::new()
            .with_page(FEED_URL, feed_xml("Show", Some(utc(2020, 1, 1)), &[("A", None)]));
        let (reporter, events) = ChannelReporter::channel();

        let podcasts = catalog.list_podcasts();
        let report = sync_podcasts(&client, &mut catalog, podcasts, 1, &reporter).await;
        drop(reporter);

        assert_eq!(report.unchanged, vec![id]);
        let events: Vec<_> = events.collect().await;
        assert!(matches!(events[0], ProgressEvent::FetchingFeed { .. }));
        assert!(matches!(events[1], ProgressEvent::PodcastUnchanged { .. }));
        assert!(matches!(
            events[2],
            ProgressEvent::SyncCompleted {
                unchanged_count: 1,
                ..
            }
        ));
    }
}
