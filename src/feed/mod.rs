mod discover;
mod fetch;
mod parse;

pub use discover::{Discovery, discover};
pub use fetch::{fetch_feed, fetch_feed_source, is_url, parse_feed_file};
pub use parse::{Enclosure, Feed, FeedEpisode, parse_feed};
