//! Applies server pushes to the player state.
//!
//! The transport hands every complete asynchronous packet to a
//! [`PushRouter`]. The router updates [`SharedState`] under its write lock,
//! releases the lock and then emits the matching [`Event`]:
//!
//! | Header                    | Effect                               | Event                 |
//! |---------------------------|--------------------------------------|-----------------------|
//! | start video, player params| new state replaces the current one   | `PlayerInitialized`   |
//! | stop video                | state cleared                        | `PlayerExited`        |
//! | player state              | position, volume and pause updated   | `StateChanged` on pause flip |
//! | player info               | title and info guessed               | `InfoUpdated`         |
//! | player extra              | properties stored, poster scheduled  | `ExtraUpdated`        |
//! | keepalive                 | none                                 | none                  |
//!
//! Pushes that need an existing playback are ignored when there is none.
//! Payloads that fail to parse leave the state untouched and are reported
//! as [`Event::ParseFailed`].

use tokio::sync::broadcast;

use crate::{
    error::Result,
    events::Event,
    player::{PlayerState, SharedState},
    poster::PosterFetcher,
    protocol::{
        messages::{self, MediaInfo, ParseError, PlayerParams, StateTick},
        Header, Packet,
    },
};

pub struct PushRouter {
    state: SharedState,
    events: broadcast::Sender<Event>,
    posters: Option<PosterFetcher>,
    generation: u64,
}

impl PushRouter {
    #[must_use]
    pub fn new(
        state: SharedState,
        events: broadcast::Sender<Event>,
        posters: Option<PosterFetcher>,
    ) -> Self {
        Self {
            state,
            events,
            posters,
            generation: 0,
        }
    }

    /// Routes one asynchronous packet.
    ///
    /// # Errors
    ///
    /// Returns error only if the player state lock is poisoned.
    pub fn route(&mut self, packet: &Packet) -> Result<()> {
        let event = match packet.header {
            Header::StartVideo | Header::PlayerParams => self.start(&packet.data)?,
            Header::StopVideo => self.stop()?,
            Header::PlayerState => self.tick(&packet.data)?,
            Header::PlayerInfo => self.info(&packet.data)?,
            Header::PlayerExtra => self.extra(&packet.data)?,
            Header::Keepalive => None,
            header => {
                warn!("not a push: {header}");
                None
            }
        };

        if let Some(event) = event {
            self.emit(event);
        }

        Ok(())
    }

    fn emit(&self, event: Event) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn parse_failed(header: Header, e: &ParseError) -> Option<Event> {
        warn!("{e}");
        Some(Event::ParseFailed {
            header,
            payload: e.payload().to_owned(),
        })
    }

    fn start(&mut self, payload: &str) -> Result<Option<Event>> {
        let params = match PlayerParams::parse(payload) {
            Ok(params) => params,
            Err(e) => return Ok(Self::parse_failed(Header::PlayerParams, &e)),
        };

        self.generation = self.generation.wrapping_add(1);
        info!("playing {}", params.filename);
        *self.state.write()? = Some(PlayerState::new(params, self.generation));

        Ok(Some(Event::PlayerInitialized))
    }

    fn stop(&mut self) -> Result<Option<Event>> {
        info!("playback stopped");
        *self.state.write()? = None;
        Ok(Some(Event::PlayerExited))
    }

    fn tick(&mut self, payload: &str) -> Result<Option<Event>> {
        let tick = match StateTick::parse(payload) {
            Ok(tick) => tick,
            Err(e) => return Ok(Self::parse_failed(Header::PlayerState, &e)),
        };

        let mut state = self.state.write()?;
        let Some(state) = state.as_mut() else {
            trace!("state tick without playback");
            return Ok(None);
        };

        if state.apply_tick(tick) {
            debug!("{}", if tick.paused { "paused" } else { "resumed" });
            Ok(Some(Event::StateChanged))
        } else {
            Ok(None)
        }
    }

    fn info(&mut self, payload: &str) -> Result<Option<Event>> {
        let info = match MediaInfo::parse(payload) {
            Ok(info) => info,
            Err(e) => return Ok(Self::parse_failed(Header::PlayerInfo, &e)),
        };

        let mut state = self.state.write()?;
        let Some(state) = state.as_mut() else {
            trace!("player info without playback");
            return Ok(None);
        };

        state.apply_info(&info);
        debug!("guessed title: {} ({})", state.title(), state.info());
        Ok(Some(Event::InfoUpdated))
    }

    fn extra(&mut self, payload: &str) -> Result<Option<Event>> {
        let extras = messages::parse_extras(payload);

        let (urls, generation) = {
            let mut state = self.state.write()?;
            let Some(state) = state.as_mut() else {
                trace!("player extra without playback");
                return Ok(None);
            };

            let has_poster = extras.iter().any(|(property, _)| property.is_poster());
            for (property, value) in extras {
                state.set_property(property, value);
            }

            let urls = if has_poster {
                state.poster_urls()
            } else {
                Vec::new()
            };
            (urls, state.generation())
        };

        if let Some(posters) = &self.posters {
            posters.schedule(urls, generation, self.state.clone(), self.events.clone());
        }

        Ok(Some(Event::ExtraUpdated))
    }
}
