//! Events emitted by the remote engine.
//!
//! Observers subscribe through [`Client::subscribe`] and receive every event
//! emitted after subscribing. Events fall into three categories:
//!
//! Connection Events (edge-triggered, only emitted on change):
//! * [`Connected`](Event::Connected) - a datagram arrived after silence
//! * [`Disconnected`](Event::Disconnected) - receive timeout, invalid
//!   session or shutdown
//!
//! Player Events:
//! * [`PlayerInitialized`](Event::PlayerInitialized) - playback started
//! * [`PlayerExited`](Event::PlayerExited) - playback stopped
//! * [`StateChanged`](Event::StateChanged) - the pause flag flipped
//! * [`InfoUpdated`](Event::InfoUpdated) - title/info were guessed
//! * [`ExtraUpdated`](Event::ExtraUpdated) - extra properties or the
//!   poster arrived
//!
//! Diagnostics:
//! * [`ParseFailed`](Event::ParseFailed) - a login reply or push could not be parsed
//!
//! # Example
//!
//! ```rust
//! use omxremote::events::Event;
//!
//! fn handle_event(event: &Event) {
//!     match event {
//!         Event::Connected => println!("server reachable"),
//!         Event::PlayerInitialized => println!("playback started"),
//!         Event::ParseFailed { payload, .. } => println!("bad push: {payload}"),
//!         _ => {}
//!     }
//! }
//! ```
//!
//! [`Client::subscribe`]: crate::remote::Client::subscribe

use std::fmt;

use crate::protocol::Header;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// The server answered; the connection state became true.
    Connected,

    /// The connection state became false.
    Disconnected,

    /// A start-of-playback or player parameters push created a new player
    /// state.
    PlayerInitialized,

    /// A stop-playback push cleared the player state.
    PlayerExited,

    /// The paused flag of the player state flipped.
    ///
    /// Position and volume updates alone do not emit this event.
    StateChanged,

    /// The show or movie information of the player state was updated.
    InfoUpdated,

    /// Extra properties were stored, or the poster finished downloading.
    ExtraUpdated,

    /// A login reply or push message could not be parsed. Carries the raw payload for
    /// diagnostics; processing continues with the next message.
    ParseFailed { header: Header, payload: String },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Connected => write!(f, "connected"),
            Event::Disconnected => write!(f, "disconnected"),
            Event::PlayerInitialized => write!(f, "player initialized"),
            Event::PlayerExited => write!(f, "player exited"),
            Event::StateChanged => write!(f, "state changed"),
            Event::InfoUpdated => write!(f, "info updated"),
            Event::ExtraUpdated => write!(f, "extra updated"),
            Event::ParseFailed { header, payload } => {
                write!(f, "failed to parse {header} payload: {payload}")
            }
        }
    }
}
