//! Client-side model of the remote playback.
//!
//! A [`PlayerState`] exists from a playback-started push until the matching
//! playback-stopped push. It is written by the push router and the poster
//! fetcher and read by everyone else through snapshots of [`SharedState`].

use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use image::DynamicImage;
use url::Url;

use crate::protocol::{
    messages::{MediaInfo, PlayerParams, StateTick},
    PlayerProperty,
};

/// Slot holding the current playback, if any.
pub type SharedState = Arc<RwLock<Option<PlayerState>>>;

/// Decoded poster image with the address it was fetched from.
#[derive(Clone, Debug)]
pub struct Poster {
    pub source: Url,
    pub image: Arc<DynamicImage>,
}

impl Poster {
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}

#[derive(Clone, Debug)]
pub struct PlayerState {
    video_file: String,
    title: String,
    info: String,
    duration: Duration,
    position: Duration,
    volume: i64,
    paused: bool,
    properties: BTreeMap<PlayerProperty, String>,
    poster: Option<Poster>,

    /// Distinguishes this playback from earlier ones so that late poster
    /// downloads are not attached to the wrong video.
    generation: u64,
}

impl PlayerState {
    /// Starts tracking a new playback. The title defaults to the filename
    /// until an info push names the video.
    #[must_use]
    pub fn new(params: PlayerParams, generation: u64) -> Self {
        Self {
            title: params.filename.clone(),
            video_file: params.filename,
            info: String::new(),
            duration: params.duration,
            position: Duration::ZERO,
            volume: params.volume,
            paused: false,
            properties: BTreeMap::new(),
            poster: None,
            generation,
        }
    }

    #[must_use]
    pub fn video_file(&self) -> &str {
        &self.video_file
    }

    /// The show title if one was reported, else the guessed title.
    #[must_use]
    pub fn title(&self) -> &str {
        self.property(PlayerProperty::ShowTitle)
            .unwrap_or(&self.title)
    }

    /// The episode title if one was reported, else the guessed info line.
    #[must_use]
    pub fn info(&self) -> &str {
        self.property(PlayerProperty::EpisodeTitle)
            .unwrap_or(&self.info)
    }

    /// The guessed info line when [`info`](Self::info) shows the episode
    /// title instead, otherwise empty.
    #[must_use]
    pub fn extra(&self) -> &str {
        if self.properties.contains_key(&PlayerProperty::EpisodeTitle) {
            &self.info
        } else {
            ""
        }
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    #[must_use]
    pub fn position(&self) -> Duration {
        self.position
    }

    #[must_use]
    pub fn volume(&self) -> i64 {
        self.volume
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Playback progress between 0.0 and 1.0.
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.duration.is_zero() {
            0.0
        } else {
            (self.position.as_secs_f64() / self.duration.as_secs_f64()).clamp(0.0, 1.0)
        }
    }

    #[must_use]
    pub fn property(&self, property: PlayerProperty) -> Option<&str> {
        self.properties.get(&property).map(String::as_str)
    }

    pub fn properties(&self) -> impl Iterator<Item = (PlayerProperty, &str)> {
        self.properties
            .iter()
            .map(|(property, value)| (*property, value.as_str()))
    }

    pub fn set_property(&mut self, property: PlayerProperty, value: impl Into<String>) {
        self.properties.insert(property, value.into());
    }

    #[must_use]
    pub fn poster(&self) -> Option<&Poster> {
        self.poster.as_ref()
    }

    pub fn set_poster(&mut self, poster: Poster) {
        self.poster = Some(poster);
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Poster addresses in the order they should be tried.
    #[must_use]
    pub fn poster_urls(&self) -> Vec<Url> {
        PlayerProperty::POSTERS
            .into_iter()
            .filter_map(|property| self.property(property))
            .filter_map(|value| match Url::parse(value) {
                Ok(url) => Some(url),
                Err(e) => {
                    debug!("ignoring poster address {value}: {e}");
                    None
                }
            })
            .collect()
    }

    /// Applies a state tick and returns whether the paused flag changed.
    pub fn apply_tick(&mut self, tick: StateTick) -> bool {
        self.position = tick.position;
        self.volume = tick.volume;

        let changed = self.paused != tick.paused;
        self.paused = tick.paused;
        changed
    }

    pub fn apply_info(&mut self, info: &MediaInfo) {
        self.title = info.title().to_owned();
        self.info = info.description();
        for (property, value) in info.properties() {
            self.properties.insert(property, value);
        }
    }
}
