// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Keeping episodes, their local copies and the file store in step.
//!
//! The catalog's `LocalFile` record is the only thing that says an episode is
//! downloaded. A store entry without a record (or the other way round) is
//! repaired by [`reconcile`].
//!
//! A copy's store key is found through its URI, not recomputed from the
//! episode: two episodes of a podcast may share a title, and the second one
//! to be downloaded gets its id appended to the key.

use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use url::Url;

use crate::catalog::{Catalog, EpisodeId, LocalFile, PodcastId};
use crate::error::{CatalogError, DownloadError, LibraryError};
use crate::http::HttpClient;
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::store::FileStore;

use super::download::download_episode;

/// Key under which an episode's audio lives in the file store
pub fn store_key(podcast_name: &str, episode_title: &str) -> String {
    format!("{podcast_name} - {episode_title}")
}

/// Pick the key a new download of the episode is stored under.
///
/// The plain [`store_key`] unless another episode's copy already occupies it.
fn download_key(
    catalog: &Catalog,
    store: &FileStore,
    episode_id: EpisodeId,
) -> Result<String, CatalogError> {
    let episode = catalog.get_episode(episode_id)?;
    let podcast = catalog.get_podcast(episode.podcast_id)?;
    let key = store_key(&podcast.name, &episode.title);

    if is_key_in_use(catalog, store, &key) {
        tracing::debug!(key, episode = %episode_id, "Store key taken by another episode");
        Ok(format!("{key} [{episode_id}]"))
    } else {
        Ok(key)
    }
}

/// The store key whose blob backs `local_file`, if the store still has it
pub fn local_file_key(store: &FileStore, local_file: &LocalFile) -> Option<String> {
    let path = Url::parse(&local_file.uri).ok()?.to_file_path().ok()?;
    store.key_for_path(&path).map(String::from)
}

/// Whether any local copy in the catalog is backed by `key`
fn is_key_in_use(catalog: &Catalog, store: &FileStore, key: &str) -> bool {
    catalog
        .local_files()
        .iter()
        .any(|local_file| local_file_key(store, local_file).as_deref() == Some(key))
}

/// `file://` URI for a path inside the store
fn file_uri(path: &Path) -> String {
    Url::from_file_path(path)
        .map(String::from)
        .unwrap_or_else(|()| format!("file://{}", path.display()))
}

pub fn is_downloaded(catalog: &Catalog, episode_id: EpisodeId) -> Result<bool, CatalogError> {
    catalog.is_downloaded(episode_id)
}

/// Make sure the episode has a local copy, downloading it if needed.
///
/// Either the whole download lands (store entry plus `LocalFile`) or nothing
/// does: on failure the staging file is deleted and the catalog is untouched.
pub async fn download<C: HttpClient>(
    client: &C,
    catalog: &mut Catalog,
    store: &mut FileStore,
    episode_id: EpisodeId,
    reporter: &SharedProgressReporter,
) -> Result<LocalFile, DownloadError> {
    if let Some(local_file) = catalog.local_file(episode_id) {
        tracing::debug!(episode = %episode_id, "Episode already downloaded");
        return Ok(local_file);
    }

    let episode = catalog.get_episode(episode_id)?;
    let key = download_key(catalog, store, episode_id)?;
    let staging = store.staging_path(&key);

    tracing::info!(episode = %episode.title, url = %episode.source_url, "Downloading episode");

    let result = match download_episode(client, &episode, &staging, reporter).await {
        Ok(bytes) => commit_download(catalog, store, episode_id, &key, &staging).map(|f| (f, bytes)),
        Err(e) => Err(e),
    };

    match result {
        Ok((local_file, bytes_downloaded)) => {
            tracing::info!(episode = %episode.title, bytes = bytes_downloaded, "Download complete");
            reporter.report(ProgressEvent::DownloadCompleted {
                episode_id,
                episode_title: episode.title,
                bytes_downloaded,
            });
            Ok(local_file)
        }
        Err(e) => {
            discard_staging(&staging);
            tracing::warn!(episode = %episode.title, error = %e, "Download failed");
            reporter.report(ProgressEvent::DownloadFailed {
                episode_id,
                episode_title: episode.title,
                error: e.to_string(),
            });
            Err(e)
        }
    }
}

/// Move the staged file into the store and record it in one session
fn commit_download(
    catalog: &mut Catalog,
    store: &mut FileStore,
    episode_id: EpisodeId,
    key: &str,
    staging: &Path,
) -> Result<LocalFile, DownloadError> {
    let path = store.put_file(key, staging)?;
    let uri = file_uri(&path);

    let attached = catalog.with_session(|catalog| {
        catalog.attach_local_file(episode_id, uri, Utc::now())?;
        catalog
            .local_file(episode_id)
            .ok_or(CatalogError::EpisodeNotFound(episode_id))
    });

    attached.map_err(|e| {
        if let Err(remove_error) = store.remove(key) {
            tracing::warn!(key, error = %remove_error, "Could not undo store entry");
        }
        DownloadError::from(e)
    })
}

fn discard_staging(staging: &Path) {
    match std::fs::remove_file(staging) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %staging.display(), error = %e, "Could not remove staging file");
        }
    }
}

/// Drop an episode's local copy. Returns whether there was one.
///
/// The catalog change is committed before the file is removed, so a crash in
/// between leaves an orphaned store entry for [`reconcile`], never a
/// `LocalFile` pointing at nothing.
pub fn delete_local_copy(
    catalog: &mut Catalog,
    store: &mut FileStore,
    episode_id: EpisodeId,
) -> Result<bool, LibraryError> {
    catalog.get_episode(episode_id)?;
    let Some(local_file) = catalog.local_file(episode_id) else {
        return Ok(false);
    };
    let key = local_file_key(store, &local_file);

    catalog.with_session(|catalog| catalog.detach_local_file(episode_id))?;

    // Only the blob this copy pointed at, and only if nothing else uses it
    if let Some(key) = key.filter(|key| !is_key_in_use(catalog, store, key)) {
        store.remove(&key)?;
        tracing::info!(key, "Local copy deleted");
    }
    Ok(true)
}

/// Remove the store entries behind copies whose records are already gone.
///
/// Entries still backing a surviving copy are kept. Failures are only
/// logged; the next [`reconcile`] picks up whatever is left. Returns the
/// removed keys.
pub fn discard_copies(catalog: &Catalog, store: &mut FileStore, copies: &[LocalFile]) -> Vec<String> {
    let mut removed = Vec::new();
    for local_file in copies {
        let Some(key) = local_file_key(store, local_file) else {
            continue;
        };
        if is_key_in_use(catalog, store, &key) {
            tracing::debug!(key, "Store entry still in use, keeping it");
            continue;
        }
        match store.remove(&key) {
            Ok(()) => removed.push(key),
            Err(e) => tracing::warn!(key, error = %e, "Could not remove orphaned local copy"),
        }
    }
    removed
}

/// Persist the playback position; `None` means finished or reset
pub fn record_position(
    catalog: &mut Catalog,
    episode_id: EpisodeId,
    position: Option<f64>,
) -> Result<(), CatalogError> {
    catalog.with_session(|catalog| catalog.set_last_position(episode_id, position))
}

pub fn preferred_rate(catalog: &Catalog, podcast_id: PodcastId) -> Result<f64, CatalogError> {
    catalog.preferred_rate(podcast_id)
}

pub fn set_preferred_rate(
    catalog: &mut Catalog,
    podcast_id: PodcastId,
    rate: f64,
) -> Result<(), CatalogError> {
    catalog.with_session(|catalog| catalog.set_preferred_rate(podcast_id, rate))
}

/// Repairs made by [`reconcile`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Episodes whose local copy had vanished from the store
    pub detached: Vec<EpisodeId>,
    /// Store keys no episode referred to
    pub removed_keys: Vec<String>,
}

/// Bring catalog and store back into agreement.
///
/// Local copies whose store entry is gone are detached; store entries that
/// no local copy refers to are removed.
pub fn reconcile(catalog: &mut Catalog, store: &mut FileStore) -> Result<Reconciliation, LibraryError> {
    let mut report = Reconciliation::default();
    let mut referenced = HashSet::new();

    for local_file in catalog.local_files() {
        match local_file_key(store, &local_file) {
            Some(key) => {
                referenced.insert(key);
            }
            None => report.detached.push(local_file.episode_id),
        }
    }

    if !report.detached.is_empty() {
        catalog.with_session(|catalog| {
            report
                .detached
                .iter()
                .try_for_each(|id| catalog.detach_local_file(*id).map(|_| ()))
        })?;
    }

    let orphans: Vec<String> = store
        .keys()
        .filter(|key| !referenced.contains(*key))
        .map(String::from)
        .collect();
    for key in orphans {
        store.remove(&key)?;
        report.removed_keys.push(key);
    }

    if report != Reconciliation::default() {
        tracing::info!(
            detached = report.detached.len(),
            removed = report.removed_keys.len(),
            "Catalog and file store reconciled"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{LocalFileId, NewEpisode};
    use crate::error::TransportError;
    use crate::progress::{ChannelReporter, NoopReporter};
    use crate::test_support::{MockHttpClient, episode_url, new_episode, new_podcast, utc};
    use futures::StreamExt;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        catalog: Catalog,
        store: FileStore,
        podcast_id: PodcastId,
        episode_id: EpisodeId,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::open(&dir.path().join("catalog.json")).unwrap();
        let store = FileStore::open(&dir.path().join("files")).unwrap();
        let (podcast_id, episode_id) = catalog
            .with_session(|c| {
                let podcast = c.add_podcast(new_podcast("Show", "https://example.com/feed.xml"))?;
                let episode = c.insert_episode(podcast, new_episode("Pilot", Some(utc(2020, 1, 1))))?;
                Ok::<_, CatalogError>((podcast, episode))
            })
            .unwrap();
        Fixture {
            _dir: dir,
            catalog,
            store,
            podcast_id,
            episode_id,
        }
    }

    #[test]
    fn store_key_joins_podcast_and_title() {
        assert_eq!(store_key("Show", "Pilot"), "Show - Pilot");
    }

    #[tokio::test]
    async fn download_attaches_local_copy() {
        let mut f = fixture();
        let client = MockHttpClient::new().with_page(&episode_url("Pilot"), "audio bytes");

        let local_file = download(
            &client,
            &mut f.catalog,
            &mut f.store,
            f.episode_id,
            &NoopReporter::shared(),
        )
        .await
        .unwrap();

        assert!(is_downloaded(&f.catalog, f.episode_id).unwrap());
        assert!(local_file.uri.starts_with("file://"));
        let path = f.store.get_path("Show - Pilot").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"audio bytes");
        assert_eq!(Url::parse(&local_file.uri).unwrap().to_file_path().unwrap(), path);
    }

    #[tokio::test]
    async fn download_of_downloaded_episode_reuses_copy() {
        let mut f = fixture();
        let client = MockHttpClient::new().with_page(&episode_url("Pilot"), "audio bytes");
        let reporter = NoopReporter::shared();

        let first = download(&client, &mut f.catalog, &mut f.store, f.episode_id, &reporter)
            .await
            .unwrap();
        let second = download(&client, &mut f.catalog, &mut f.store, f.episode_id, &reporter)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(client.requests().len(), 1);
    }

    #[tokio::test]
    async fn failed_transfer_leaves_nothing_behind() {
        let mut f = fixture();
        let client =
            MockHttpClient::new().with_broken_audio(&episode_url("Pilot"), &[1u8; 1000], 500);
        let (reporter, events) = ChannelReporter::channel();
        let revision = f.catalog.revision();

        let result = download(&client, &mut f.catalog, &mut f.store, f.episode_id, &reporter).await;
        drop(reporter);

        assert!(result.is_err());
        assert!(!is_downloaded(&f.catalog, f.episode_id).unwrap());
        assert!(f.catalog.local_files().is_empty());
        assert_eq!(f.catalog.revision(), revision);
        assert!(!f.store.exists("Show - Pilot"));
        assert!(!f.store.staging_path("Show - Pilot").exists());

        let events: Vec<_> = events.collect().await;
        assert!(matches!(events.last(), Some(ProgressEvent::DownloadFailed { .. })));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_connection_error() {
        let mut f = fixture();
        let client = MockHttpClient::new();

        let result = download(
            &client,
            &mut f.catalog,
            &mut f.store,
            f.episode_id,
            &NoopReporter::shared(),
        )
        .await;

        let error = LibraryError::from(result.unwrap_err());
        assert!(error.is_transient());
        assert_eq!(
            error.to_string(),
            DownloadError::from(TransportError::Connection {
                url: episode_url("Pilot"),
                reason: "host unreachable".to_string(),
            })
            .to_string()
        );
    }

    #[tokio::test]
    async fn delete_removes_record_and_file() {
        let mut f = fixture();
        let client = MockHttpClient::new().with_page(&episode_url("Pilot"), "audio bytes");
        download(
            &client,
            &mut f.catalog,
            &mut f.store,
            f.episode_id,
            &NoopReporter::shared(),
        )
        .await
        .unwrap();
        let path = f.store.get_path("Show - Pilot").unwrap();

        assert!(delete_local_copy(&mut f.catalog, &mut f.store, f.episode_id).unwrap());

        assert!(!is_downloaded(&f.catalog, f.episode_id).unwrap());
        assert!(!f.store.exists("Show - Pilot"));
        assert!(!path.exists());
    }

    /// Two episodes of the fixture podcast titled "Trailer", with distinct audio
    fn add_trailers(f: &mut Fixture) -> (EpisodeId, EpisodeId) {
        let podcast_id = f.podcast_id;
        let trailer = |url: &str, published| NewEpisode {
            title: "Trailer".to_string(),
            source_url: url.to_string(),
            date_published: Some(published),
            description: None,
        };
        f.catalog
            .with_session(|c| {
                let first = c.insert_episode(podcast_id, trailer(TRAILER_1, utc(2020, 2, 1)))?;
                let second = c.insert_episode(podcast_id, trailer(TRAILER_2, utc(2020, 3, 1)))?;
                Ok::<_, CatalogError>((first, second))
            })
            .unwrap()
    }

    const TRAILER_1: &str = "https://example.com/t1.mp3";
    const TRAILER_2: &str = "https://example.com/t2.mp3";

    #[tokio::test]
    async fn same_titled_episodes_keep_separate_copies() {
        let mut f = fixture();
        let (first, second) = add_trailers(&mut f);
        let client = MockHttpClient::new()
            .with_page(TRAILER_1, "first trailer")
            .with_page(TRAILER_2, "second trailer");
        let reporter = NoopReporter::shared();

        let first_copy = download(&client, &mut f.catalog, &mut f.store, first, &reporter)
            .await
            .unwrap();
        let second_copy = download(&client, &mut f.catalog, &mut f.store, second, &reporter)
            .await
            .unwrap();

        assert_ne!(first_copy.uri, second_copy.uri);
        assert_eq!(
            local_file_key(&f.store, &first_copy).as_deref(),
            Some("Show - Trailer")
        );
        assert_eq!(
            local_file_key(&f.store, &second_copy),
            Some(format!("Show - Trailer [{second}]"))
        );

        assert!(delete_local_copy(&mut f.catalog, &mut f.store, first).unwrap());

        assert!(!is_downloaded(&f.catalog, first).unwrap());
        assert!(is_downloaded(&f.catalog, second).unwrap());
        let path = Url::parse(&second_copy.uri).unwrap().to_file_path().unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"second trailer");
        assert_eq!(f.store.keys().count(), 1);
    }

    #[tokio::test]
    async fn discard_copies_keeps_entries_still_in_use() {
        let mut f = fixture();
        let client = MockHttpClient::new().with_page(&episode_url("Pilot"), "audio bytes");
        let local_file = download(
            &client,
            &mut f.catalog,
            &mut f.store,
            f.episode_id,
            &NoopReporter::shared(),
        )
        .await
        .unwrap();
        let stale = LocalFile {
            id: LocalFileId(99),
            episode_id: EpisodeId(99),
            uri: local_file.uri.clone(),
            date_created: Utc::now(),
        };

        assert!(discard_copies(&f.catalog, &mut f.store, &[stale]).is_empty());
        assert!(f.store.exists("Show - Pilot"));

        f.catalog
            .with_session(|c| c.detach_local_file(f.episode_id))
            .unwrap();
        let removed = discard_copies(&f.catalog, &mut f.store, &[local_file]);

        assert_eq!(removed, vec!["Show - Pilot".to_string()]);
        assert!(!f.store.exists("Show - Pilot"));
    }

    #[test]
    fn delete_without_copy_is_a_noop() {
        let mut f = fixture();
        let revision = f.catalog.revision();

        assert!(!delete_local_copy(&mut f.catalog, &mut f.store, f.episode_id).unwrap());
        assert_eq!(f.catalog.revision(), revision);
    }

    #[test]
    fn finished_overrides_position() {
        let mut f = fixture();

        record_position(&mut f.catalog, f.episode_id, Some(42.0)).unwrap();
        assert_eq!(f.catalog.get_episode(f.episode_id).unwrap().last_position, Some(42.0));

        record_position(&mut f.catalog, f.episode_id, None).unwrap();
        assert_eq!(f.catalog.get_episode(f.episode_id).unwrap().last_position, None);
    }

    #[test]
    fn negative_position_is_rejected() {
        let mut f = fixture();
        let result = record_position(&mut f.catalog, f.episode_id, Some(-1.0));
        assert!(matches!(result, Err(CatalogError::InvalidPosition(_))));
    }

    #[test]
    fn preferred_rate_round_trips() {
        let mut f = fixture();
        assert_eq!(preferred_rate(&f.catalog, f.podcast_id).unwrap(), 1.0);

        set_preferred_rate(&mut f.catalog, f.podcast_id, 1.5).unwrap();
        assert_eq!(preferred_rate(&f.catalog, f.podcast_id).unwrap(), 1.5);

        let result = set_preferred_rate(&mut f.catalog, f.podcast_id, 0.0);
        assert!(matches!(result, Err(CatalogError::InvalidRate(_))));
        assert!(set_preferred_rate(&mut f.catalog, f.podcast_id, f64::NAN).is_err());
    }

    #[test]
    fn reconcile_detaches_copies_missing_from_store() {
        let mut f = fixture();
        f.catalog
            .with_session(|c| {
                c.attach_local_file(f.episode_id, "file:///gone".to_string(), Utc::now())
            })
            .unwrap();

        let report = reconcile(&mut f.catalog, &mut f.store).unwrap();

        assert_eq!(report.detached, vec![f.episode_id]);
        assert!(!is_downloaded(&f.catalog, f.episode_id).unwrap());
    }

    #[test]
    fn reconcile_removes_unreferenced_store_entries() {
        let mut f = fixture();
        f.store.put("Show - Vanished", b"old audio").unwrap();

        let report = reconcile(&mut f.catalog, &mut f.store).unwrap();

        assert_eq!(report.removed_keys, vec!["Show - Vanished".to_string()]);
        assert!(!f.store.exists("Show - Vanished"));
    }

    #[tokio::test]
    async fn reconcile_keeps_consistent_state() {
        let mut f = fixture();
        let client = MockHttpClient::new().with_page(&episode_url("Pilot"), "audio bytes");
        download(
            &client,
            &mut f.catalog,
            &mut f.store,
            f.episode_id,
            &NoopReporter::shared(),
        )
        .await
        .unwrap();
        let revision = f.catalog.revision();

        let report = reconcile(&mut f.catalog, &mut f.store).unwrap();

        assert_eq!(report, Reconciliation::default());
        assert_eq!(f.catalog.revision(), revision);
        assert!(f.store.exists("Show - Pilot"));
    }
}
