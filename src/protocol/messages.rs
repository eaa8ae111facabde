//! Parsers and formatters for message payloads.
//!
//! Every pushed payload kind has a pure parsing function here so that the
//! push router only decides *what* to do with a message, never *how* to read
//! it. Malformed input is a typed [`ParseError`] that carries the raw
//! payload for diagnostics.
//!
//! # Pushed payloads
//!
//! | Header          | Format                                  |
//! |-----------------|-----------------------------------------|
//! | start / params  | `d<duration ms>v<volume>|<filename>`     |
//! | state           | `p<position ms>v<volume>[P|R]`           |
//! | info            | `SHOW$<title>$<info>` or `MOVIE$<title>$<info>` |
//! | extra           | `<id>:<value>|<id>:<value>|...`          |

use std::{sync::LazyLock, time::Duration};

use regex_lite::Regex;
use thiserror::Error;

use super::PlayerProperty;
use crate::error::Error;

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid login reply: {0}")]
    LoginReply(String),
    #[error("invalid player parameters: {0}")]
    PlayerParams(String),
    #[error("invalid player state: {0}")]
    PlayerState(String),
    #[error("invalid player info: {0}")]
    PlayerInfo(String),
    #[error("unknown setting type: {0}")]
    SettingType(String),
}

impl ParseError {
    /// The raw text that failed to parse.
    #[must_use]
    pub fn payload(&self) -> &str {
        match self {
            ParseError::LoginReply(payload)
            | ParseError::PlayerParams(payload)
            | ParseError::PlayerState(payload)
            | ParseError::PlayerInfo(payload)
            | ParseError::SettingType(payload) => payload,
        }
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Self::invalid_argument(e)
    }
}

static PLAYER_PARAMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^d([0-9]+)v([0-9\-]+)\|(.*)$").expect("player params pattern is valid")
});

static PLAYER_STATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^p([0-9]+)v([0-9\-]+)([PR])$").expect("player state pattern is valid")
});

static PLAYER_INFO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(SHOW|MOVIE)\$(.*)\$(.*)$").expect("player info pattern is valid")
});

static NUMBERED_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([SEY])([0-9]+)").expect("numbered prefix pattern is valid")
});

static EXTRA_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z]{2}):(.*)$").expect("extra block pattern is valid"));

/// Sent when playback starts or when a client logs in during playback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerParams {
    pub duration: Duration,
    pub volume: i64,
    pub filename: String,
}

impl PlayerParams {
    /// Parses `d<duration ms>v<volume>|<filename>`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::PlayerParams`] on a pattern mismatch or
    /// out-of-range numbers.
    pub fn parse(payload: &str) -> Result<Self, ParseError> {
        let error = || ParseError::PlayerParams(payload.to_owned());
        let captures = PLAYER_PARAMS.captures(payload).ok_or_else(error)?;

        Ok(Self {
            duration: Duration::from_millis(captures[1].parse().map_err(|_| error())?),
            volume: captures[2].parse().map_err(|_| error())?,
            filename: captures[3].to_owned(),
        })
    }
}

/// Periodic playback progress.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StateTick {
    pub position: Duration,
    pub volume: i64,
    pub paused: bool,
}

impl StateTick {
    /// Parses `p<position ms>v<volume>P` (paused) or `...R` (running).
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::PlayerState`] on a pattern mismatch or
    /// out-of-range numbers.
    pub fn parse(payload: &str) -> Result<Self, ParseError> {
        let error = || ParseError::PlayerState(payload.to_owned());
        let captures = PLAYER_STATE.captures(payload).ok_or_else(error)?;

        Ok(Self {
            position: Duration::from_millis(captures[1].parse().map_err(|_| error())?),
            volume: captures[2].parse().map_err(|_| error())?,
            paused: &captures[3] == "P",
        })
    }
}

/// What the server guessed the current video to be.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MediaInfo {
    Show {
        title: String,
        /// Two-digit, zero-padded.
        season: Option<String>,
        /// Two-digit, zero-padded.
        episode: Option<String>,
        remainder: String,
    },
    Movie {
        title: String,
        year: Option<u32>,
        remainder: String,
    },
}

impl MediaInfo {
    /// Parses `SHOW$<title>$<info>` or `MOVIE$<title>$<info>`.
    ///
    /// For shows, `info` may start with `S<season>` and then `E<episode>`;
    /// for movies with `Y<year>`. Recognised segments are consumed left to
    /// right and whatever text remains is kept, trimmed, as the remainder.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::PlayerInfo`] if the kind is neither `SHOW` nor
    /// `MOVIE` or a number does not fit.
    pub fn parse(payload: &str) -> Result<Self, ParseError> {
        let error = || ParseError::PlayerInfo(payload.to_owned());
        let captures = PLAYER_INFO.captures(payload).ok_or_else(error)?;

        let title = captures[2].to_owned();
        let mut info = &captures[3];

        if &captures[1] == "SHOW" {
            let season = take_number(&mut info, "S").map_err(|()| error())?;
            let episode = take_number(&mut info, "E").map_err(|()| error())?;

            Ok(MediaInfo::Show {
                title,
                season: season.map(two_digits),
                episode: episode.map(two_digits),
                remainder: info.trim().to_owned(),
            })
        } else {
            let year = take_number(&mut info, "Y").map_err(|()| error())?;

            Ok(MediaInfo::Movie {
                title,
                year,
                remainder: info.trim().to_owned(),
            })
        }
    }

    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            MediaInfo::Show { title, .. } | MediaInfo::Movie { title, .. } => title,
        }
    }

    /// Human-readable info line.
    ///
    /// The free text that followed the structured segments when there is
    /// any, otherwise a description built from them, e.g. `"season 05
    /// episode 14"` or `"year 2010"`.
    #[must_use]
    pub fn description(&self) -> String {
        let (remainder, parts) = match self {
            MediaInfo::Show {
                season,
                episode,
                remainder,
                ..
            } => (
                remainder,
                [
                    season.as_ref().map(|s| format!("season {s}")),
                    episode.as_ref().map(|e| format!("episode {e}")),
                ],
            ),
            MediaInfo::Movie {
                year, remainder, ..
            } => (remainder, [year.map(|y| format!("year {y}")), None]),
        };

        if remainder.is_empty() {
            parts.into_iter().flatten().collect::<Vec<_>>().join(" ")
        } else {
            remainder.clone()
        }
    }

    /// Properties derived from the structured segments.
    #[must_use]
    pub fn properties(&self) -> Vec<(PlayerProperty, String)> {
        match self {
            MediaInfo::Show {
                season, episode, ..
            } => [
                (PlayerProperty::SeasonNumber, season),
                (PlayerProperty::EpisodeNumber, episode),
            ]
            .into_iter()
            .filter_map(|(property, value)| value.clone().map(|value| (property, value)))
            .collect(),
            MediaInfo::Movie { .. } => Vec::new(),
        }
    }
}

/// Consumes a leading `<prefix><digits>` segment from `info`.
///
/// `Ok(None)` if `info` does not start with the segment, `Err` if the digits
/// overflow.
fn take_number(info: &mut &str, prefix: &str) -> Result<Option<u32>, ()> {
    let haystack: &str = *info;
    let Some(captures) = NUMBERED_PREFIX.captures(haystack) else {
        return Ok(None);
    };
    if &captures[1] != prefix {
        return Ok(None);
    }

    let number = captures[2].parse().map_err(|_| ())?;
    *info = &haystack[captures[0].len()..];
    Ok(Some(number))
}

fn two_digits(number: u32) -> String {
    format!("{number:02}")
}

/// Parses a `|`-delimited list of `<id>:<value>` blocks.
///
/// Blocks that do not look like a two-letter id followed by a colon, and ids
/// outside the property catalog, are skipped.
#[must_use]
pub fn parse_extras(payload: &str) -> Vec<(PlayerProperty, String)> {
    payload
        .split('|')
        .filter_map(|block| {
            let captures = EXTRA_BLOCK.captures(block)?;
            match captures[1].parse::<PlayerProperty>() {
                Ok(property) => Some((property, captures[2].to_owned())),
                Err(_) => {
                    trace!("ignoring unknown extra block: {block}");
                    None
                }
            }
        })
        .collect()
}

/// Payload of a start video command: `<video>` or `<video>|<subtitle>`.
#[must_use]
pub fn start_video(video: &str, subtitle: Option<&str>) -> String {
    match subtitle {
        Some(subtitle) => format!("{video}|{subtitle}"),
        None => video.to_owned(),
    }
}

/// Payload of a set setting command: `<key>=<value>`.
#[must_use]
pub fn set_setting(key: &str, value: &str) -> String {
    format!("{key}={value}")
}

/// Payload of a seek command: the target position in milliseconds.
#[must_use]
pub fn seek(position: Duration) -> String {
    position.as_millis().to_string()
}
