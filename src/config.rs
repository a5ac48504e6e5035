// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use std::time::Duration;

const CATALOG_FILENAME: &str = "catalog.json";
const STORE_DIRNAME: &str = "files";

/// Where the library keeps its data and how it talks to the network
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Holds the catalog and the file store
    pub data_dir: PathBuf,

    /// Episodes per page when listing.
    ///
    /// Default: 10.
    pub page_size: usize,

    /// Connect and read timeout for feed and audio requests.
    ///
    /// Default: 5 seconds.
    pub request_timeout: Duration,

    /// Feeds fetched at once during a bulk sync.
    ///
    /// Default: 3.
    pub max_concurrent_fetches: usize,
}

impl Config {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join(CATALOG_FILENAME)
    }

    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join(STORE_DIRNAME)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".podshelf"),
            page_size: 10,
            request_timeout: Duration::from_secs(5),
            max_concurrent_fetches: 3,
        }
    }
}
