//! Remote control client for omxplayer servers.
//!
//! The server announces itself on a UDP multicast group and accepts short
//! datagram commands: browse files, start and stop videos, control playback
//! and change settings. While a video plays it pushes progress, a guess of
//! what is playing and descriptive extras such as poster addresses.
//!
//! Start with [`remote::Client`] and subscribe to its [`events::Event`]s.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod config;
pub mod error;
pub mod events;
pub mod player;
pub mod poster;
pub mod protocol;
pub mod push;
pub mod remote;
pub mod signal;
pub mod transport;
