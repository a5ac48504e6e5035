// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driving a media engine and deciding what gets remembered.
//!
//! The engine itself is opaque and reached through [`Player`]. Playback state
//! is only written to the catalog at checkpoints chosen by the caller, so an
//! interrupted session loses at most what happened since the last one.

use crate::catalog::{EpisodeId, PodcastId};

/// The capabilities needed from a media engine. Positions are in seconds.
pub trait Player {
    /// Replace the loaded media
    fn load(&mut self, name: &str, uri: &str);

    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);

    fn is_playing(&self) -> bool;
    fn is_finished(&self) -> bool;

    fn set_position(&mut self, seconds: f64);
    fn position(&self) -> f64;

    fn set_rate(&mut self, rate: f64);
    fn rate(&self) -> f64;

    fn media_length(&self) -> f64;
}

/// Everything needed to start playing a downloaded episode
#[derive(Debug, Clone, PartialEq)]
pub struct PlayRequest {
    pub episode_id: EpisodeId,
    pub podcast_id: PodcastId,
    /// Display name for the media, `<podcast> - <episode>`
    pub name: String,
    pub uri: String,
    /// Where the listener left off, if anywhere
    pub resume_position: Option<f64>,
    pub rate: f64,
}

/// Playback state to persist at a checkpoint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackState {
    /// `None` once the episode has finished
    pub position: Option<f64>,
    pub rate: f64,
}

/// An active play session over a [`Player`]
pub struct PlaybackSession<'a, P: Player> {
    player: &'a mut P,
    request: PlayRequest,
}

impl<'a, P: Player> PlaybackSession<'a, P> {
    /// Load the episode and start playing at the preferred rate.
    ///
    /// With `resume`, playback continues from the remembered position.
    pub fn begin(player: &'a mut P, request: PlayRequest, resume: bool) -> Self {
        player.load(&request.name, &request.uri);
        if resume && let Some(position) = request.resume_position {
            player.set_position(position);
        }
        player.set_rate(request.rate);
        player.play();

        tracing::debug!(
            episode = %request.episode_id,
            position = ?request.resume_position.filter(|_| resume),
            rate = request.rate,
            "Playback started"
        );
        Self { player, request }
    }

    pub fn request(&self) -> &PlayRequest {
        &self.request
    }

    pub fn player(&mut self) -> &mut P {
        &mut *self.player
    }

    /// Pause a playing engine, or resume a paused one
    pub fn toggle_pause(&mut self) {
        if self.player.is_playing() {
            self.player.pause();
        } else {
            self.player.play();
        }
    }

    /// Move the position by `offset` seconds, clamped to the media bounds
    pub fn seek_by(&mut self, offset: f64) {
        let length = self.player.media_length();
        let target = (self.player.position() + offset).max(0.0);
        let target = if length > 0.0 { target.min(length) } else { target };
        self.player.set_position(target);
    }

    /// Change the rate by `offset`, ignoring changes that leave it non-positive
    pub fn adjust_rate(&mut self, offset: f64) {
        let rate = self.player.rate() + offset;
        if rate.is_finite() && rate > 0.0 {
            self.player.set_rate(rate);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.player.is_finished()
    }

    /// The state to persist right now. A finished episode has no position.
    pub fn checkpoint(&self) -> PlaybackState {
        let position = if self.player.is_finished() {
            None
        } else {
            Some(self.player.position().max(0.0))
        };
        PlaybackState {
            position,
            rate: self.player.rate(),
        }
    }

    /// Stop the engine and return the final state to persist
    pub fn finish(self) -> PlaybackState {
        let state = self.checkpoint();
        self.player.stop();
        tracing::debug!(episode = %self.request.episode_id, ?state, "Playback stopped");
        state
    }
}
