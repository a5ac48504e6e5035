// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use console::Emoji;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use podshelf::{
    Config, EpisodeId, Library, NoopReporter, Page, PodcastId, ProgressEvent, ProgressReporter,
    SharedProgressReporter, SyncOutcome,
};

// Emoji with fallback for terminals without Unicode support
static MICROPHONE: Emoji<'_, '_> = Emoji("🎙️  ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[v] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static PARTY: Emoji<'_, '_> = Emoji("🎉 ", "[*] ");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "x ");

/// Subscribe to podcasts, keep them in sync and remember where you left off
#[derive(Parser, Debug)]
#[command(name = "podshelf")]
#[command(about = "Subscribe to podcasts, download episodes and remember playback")]
#[command(version)]
struct Cli {
    /// Directory holding the catalog and downloaded episodes
    #[arg(long, env = "PODSHELF_DIR", default_value = ".podshelf", global = true)]
    data_dir: PathBuf,

    /// Network timeout in seconds
    #[arg(long, default_value = "5", global = true)]
    timeout: u64,

    /// Episodes per page
    #[arg(long, default_value = "10", global = true)]
    page_size: usize,

    /// Maximum number of feeds fetched at once
    #[arg(short = 'c', long, default_value = "3", global = true)]
    concurrent: usize,

    /// Quiet mode - suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log debug details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed (URL, web page linking a feed, or local file)
    Add { source: String },

    /// Unsubscribe and delete the podcast's downloads
    Remove { podcast_id: u64 },

    /// List subscribed podcasts
    List,

    /// List a podcast's episodes, newest first
    Episodes {
        podcast_id: u64,
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// List downloaded episodes, most recent first
    Downloaded {
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Sync one podcast, or all of them
    Sync { podcast_id: Option<u64> },

    /// Download an episode
    Download { episode_id: u64 },

    /// Download an episode if needed and show how to play it
    Play { episode_id: u64 },

    /// Delete an episode's downloaded copy
    Delete { episode_id: u64 },

    /// Show or set a podcast's preferred playback rate
    Rate { podcast_id: u64, rate: Option<f64> },

    /// Set an episode's playback position in seconds; omit to mark finished
    Position { episode_id: u64, seconds: Option<f64> },
}

/// Progress reporter using indicatif for terminal output
struct IndicatifReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<EpisodeId, ProgressBar>>,
    main_bar: ProgressBar,
}

impl IndicatifReporter {
    fn new() -> Self {
        let multi = MultiProgress::new();

        let main_bar = multi.add(ProgressBar::new_spinner());
        if let Ok(style) = ProgressStyle::default_bar().template("{spinner:.green} {wide_msg}") {
            main_bar.set_style(style);
        }
        main_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
            main_bar,
        }
    }

    fn get_or_create_bar(&self, episode_id: EpisodeId) -> ProgressBar {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(bar) = bars.get(&episode_id) {
            return bar.clone();
        }

        let bar = self.multi.add(ProgressBar::new(0));
        if let Ok(style) = ProgressStyle::default_bar().template(&format!(
            "  {DOWNLOAD}[{{bar:30.cyan/blue}}] {{bytes}}/{{total_bytes}} {{wide_msg}}"
        )) {
            bar.set_style(style.progress_chars("█▓░"));
        }
        bars.insert(episode_id, bar.clone());
        bar
    }

    fn finish_bar(&self, episode_id: EpisodeId) {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bar) = bars.remove(&episode_id) {
            bar.finish();
        }
    }

    fn println(&self, line: String) {
        let _ = self.multi.println(line);
    }
}

impl ProgressReporter for IndicatifReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::FetchingFeed { url } => {
                self.main_bar
                    .set_message(format!("{SEARCH}Fetching feed: {}", url.cyan()));
            }

            ProgressEvent::PodcastSynced {
                podcast_title,
                added,
                removed,
                ..
            } => {
                self.println(format!(
                    "{HEADPHONES}{} • {} new, {} gone",
                    podcast_title.bold().green(),
                    added.to_string().yellow(),
                    removed.to_string().cyan()
                ));
            }

            ProgressEvent::PodcastUnchanged { podcast_title, .. } => {
                self.println(format!(
                    "{HEADPHONES}{} • {}",
                    podcast_title.bold(),
                    "up to date".dimmed()
                ));
            }

            ProgressEvent::PodcastSyncFailed {
                podcast_title,
                error,
                ..
            } => {
                self.println(format!(
                    "{FAILURE}{} - {}",
                    podcast_title.red(),
                    error.dimmed()
                ));
            }

            ProgressEvent::DownloadStarting {
                episode_id,
                episode_title,
                content_length,
            } => {
                self.main_bar.finish_and_clear();
                let bar = self.get_or_create_bar(episode_id);
                bar.set_length(content_length.unwrap_or(0));
                bar.set_position(0);
                bar.set_message(truncate_title(&episode_title, 40));
            }

            ProgressEvent::DownloadProgress {
                episode_id,
                bytes_downloaded,
                total_bytes,
            } => {
                let bar = self.get_or_create_bar(episode_id);
                if let Some(total) = total_bytes {
                    bar.set_length(total);
                }
                bar.set_position(bytes_downloaded);
            }

            ProgressEvent::DownloadCompleted {
                episode_id,
                episode_title,
                bytes_downloaded,
            } => {
                let bar = self.get_or_create_bar(episode_id);
                bar.set_position(bytes_downloaded);
                bar.set_message(format!(
                    "{SUCCESS}{}",
                    truncate_title(&episode_title, 40).green()
                ));
                self.finish_bar(episode_id);
            }

            ProgressEvent::DownloadFailed {
                episode_id,
                episode_title,
                error,
            } => {
                let bar = self.get_or_create_bar(episode_id);
                bar.abandon_with_message(format!(
                    "{FAILURE}{} - {}",
                    truncate_title(&episode_title, 30).red(),
                    error.red()
                ));
                self.finish_bar(episode_id);
            }

            ProgressEvent::SyncCompleted {
                updated_count,
                unchanged_count,
                failed_count,
            } => {
                self.main_bar.finish_and_clear();
                println!(
                    "\n{PARTY}{} {} updated, {} unchanged, {} failed",
                    "Sync complete:".bold().green(),
                    updated_count.to_string().green().bold(),
                    unchanged_count.to_string().yellow(),
                    if failed_count > 0 {
                        failed_count.to_string().red().bold()
                    } else {
                        failed_count.to_string().green()
                    }
                );
            }
        }
    }
}

fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        title.to_string()
    } else {
        let kept: String = title.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn format_position(seconds: Option<f64>) -> String {
    match seconds {
        Some(s) => {
            let total = s as u64;
            format!("{}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
        }
        None => "-".to_string(),
    }
}

fn print_page_footer<T>(page: &Page<T>) {
    if page.total == 0 {
        println!("{}", "Nothing here yet.".dimmed());
        return;
    }
    let mut hints = vec![format!(
        "{}-{} of {}",
        page.offset + 1,
        page.offset + page.items.len(),
        page.total
    )];
    if let Some(previous) = page.previous_offset() {
        hints.push(format!("previous: --offset {previous}"));
    }
    if let Some(next) = page.next_offset() {
        hints.push(format!("next: --offset {next}"));
    }
    println!("{}", hints.join(" • ").dimmed());
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("podshelf=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if !cli.quiet {
        println!(
            "\n{}{} {}\n",
            MICROPHONE,
            "podshelf".bold().magenta(),
            "- Podcast Manager".dimmed()
        );
    }

    let config = Config {
        data_dir: cli.data_dir.clone(),
        page_size: cli.page_size.max(1),
        request_timeout: Duration::from_secs(cli.timeout),
        max_concurrent_fetches: cli.concurrent.max(1),
    };
    let mut library = Library::open(config).with_context(|| {
        format!("Failed to open podcast library at {}", cli.data_dir.display())
    })?;

    let reporter: SharedProgressReporter = if cli.quiet {
        NoopReporter::shared()
    } else {
        Arc::new(IndicatifReporter::new())
    };

    match cli.command {
        Command::Add { source } => {
            let id = library
                .add_podcast(&source)
                .await
                .with_context(|| format!("Failed to add podcast from {source}"))?;
            let podcast = library.catalog().get_podcast(id)?;
            let episodes = library.catalog().podcast_episodes(id).len();
            println!(
                "{SUCCESS}Added {} ({} episodes) as #{}",
                podcast.name.bold().green(),
                episodes.to_string().cyan(),
                id
            );
        }

        Command::Remove { podcast_id } => {
            let removed = library
                .remove_podcast(PodcastId(podcast_id))
                .context("Failed to remove podcast")?;
            println!(
                "{CROSS}Removed {} and {} episodes",
                removed.podcast.name.bold(),
                removed.episodes.len()
            );
        }

        Command::List => {
            let podcasts = library.all_podcasts();
            if podcasts.is_empty() {
                println!("{}", "No podcasts yet. Add one with `podshelf add <url>`.".dimmed());
            }
            for podcast in podcasts {
                let marker = if podcast.has_update() {
                    "new".yellow().bold().to_string()
                } else {
                    String::new()
                };
                println!(
                    "{:>4}  {} {} {}",
                    podcast.id.to_string().cyan(),
                    podcast.name.bold(),
                    format!("({}x)", podcast.preferred_playback_rate).dimmed(),
                    marker
                );
            }
        }

        Command::Episodes { podcast_id, offset } => {
            let page = library
                .episodes(PodcastId(podcast_id), offset)
                .context("Failed to list episodes")?;
            for episode in &page.items {
                let date = episode
                    .date_published
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "----------".to_string());
                let downloaded = if episode.is_downloaded() {
                    DOWNLOAD.to_string()
                } else {
                    "   ".to_string()
                };
                println!(
                    "{:>6}  {} {}{} {}",
                    episode.id.to_string().cyan(),
                    date.dimmed(),
                    downloaded,
                    truncate_title(&episode.title, 60),
                    format_position(episode.last_position).dimmed()
                );
            }
            print_page_footer(&page);
        }

        Command::Downloaded { offset } => {
            let page = library.downloaded_episodes(offset);
            for downloaded in &page.items {
                println!(
                    "{:>6}  {} {}",
                    downloaded.episode.id.to_string().cyan(),
                    truncate_title(&downloaded.episode.title, 60),
                    downloaded
                        .local_file
                        .date_created
                        .format("%Y-%m-%d %H:%M")
                        .to_string()
                        .dimmed()
                );
            }
            print_page_footer(&page);
        }

        Command::Sync {
            podcast_id: Some(podcast_id),
        } => {
            let outcome = library
                .sync_one(PodcastId(podcast_id))
                .await
                .context("Failed to sync podcast")?;
            match outcome {
                SyncOutcome::Unchanged => println!("{HEADPHONES}{}", "Already up to date".dimmed()),
                SyncOutcome::Updated(changes) => println!(
                    "{SUCCESS}{} new, {} gone",
                    changes.added.len().to_string().yellow(),
                    changes.removed.len().to_string().cyan()
                ),
            }
        }

        Command::Sync { podcast_id: None } => {
            let report = library.sync_all(&reporter).await;

            if !cli.quiet && !report.failures.is_empty() {
                println!("\n{}", "Failed podcasts:".red().bold());
                for failure in &report.failures {
                    println!(
                        "  {}{} - {}",
                        CROSS,
                        failure.podcast_name.yellow(),
                        failure.reason.dimmed()
                    );
                }
            }

            if !report.failures.is_empty() && report.updated.is_empty() && report.unchanged.is_empty()
            {
                std::process::exit(1);
            }
        }

        Command::Download { episode_id } => {
            let local_file = library
                .download(EpisodeId(episode_id), &reporter)
                .await
                .context("Failed to download episode")?;
            if !cli.quiet {
                println!("\n{FOLDER}Saved: {}\n", local_file.uri.cyan());
            }
        }

        Command::Play { episode_id } => {
            let request = library
                .play(EpisodeId(episode_id), &reporter)
                .await
                .context("Failed to prepare episode for playback")?;
            println!("{HEADPHONES}{}", request.name.bold());
            println!("  uri:    {}", request.uri.cyan());
            println!("  resume: {}", format_position(request.resume_position));
            println!("  rate:   {}x", request.rate);
        }

        Command::Delete { episode_id } => {
            let deleted = library
                .delete_local_copy(EpisodeId(episode_id))
                .context("Failed to delete local copy")?;
            if deleted {
                println!("{CROSS}Local copy deleted");
            } else {
                println!("{}", "Episode was not downloaded".dimmed());
            }
        }

        Command::Rate {
            podcast_id,
            rate: Some(rate),
        } => {
            library
                .set_preferred_rate(PodcastId(podcast_id), rate)
                .context("Failed to set playback rate")?;
            println!("{SUCCESS}Playback rate set to {rate}x");
        }

        Command::Rate {
            podcast_id,
            rate: None,
        } => {
            let rate = library
                .preferred_rate(PodcastId(podcast_id))
                .context("Failed to read playback rate")?;
            println!("{rate}x");
        }

        Command::Position {
            episode_id,
            seconds,
        } => {
            library
                .record_position(EpisodeId(episode_id), seconds)
                .context("Failed to record playback position")?;
            match seconds {
                Some(_) => println!("{SUCCESS}Position set to {}", format_position(seconds)),
                None => println!("{SUCCESS}Episode marked as finished"),
            }
        }
    }

    Ok(())
}
