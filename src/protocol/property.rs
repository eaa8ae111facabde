use std::{fmt, str::FromStr};

use crate::error::Error;

/// How a property value is meant to be presented.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Text,
    Link,
    Poster,
}

/// Descriptive properties the server may report about the current video.
///
/// Most are pushed as two-letter ids in player extra messages; the season
/// and episode numbers are derived from player info messages.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlayerProperty {
    ShowTitle,
    ShowLink,
    ShowPoster,
    EpisodeTitle,
    EpisodeDate,
    EpisodeRating,
    EpisodeLink,
    EpisodePoster,
    SeasonNumber,
    EpisodeNumber,
}

impl PlayerProperty {
    pub const ALL: [PlayerProperty; 10] = [
        PlayerProperty::ShowTitle,
        PlayerProperty::ShowLink,
        PlayerProperty::ShowPoster,
        PlayerProperty::EpisodeTitle,
        PlayerProperty::EpisodeDate,
        PlayerProperty::EpisodeRating,
        PlayerProperty::EpisodeLink,
        PlayerProperty::EpisodePoster,
        PlayerProperty::SeasonNumber,
        PlayerProperty::EpisodeNumber,
    ];

    /// Poster properties in the order they are tried.
    pub const POSTERS: [PlayerProperty; 2] =
        [PlayerProperty::ShowPoster, PlayerProperty::EpisodePoster];

    pub const LINKS: [PlayerProperty; 2] = [PlayerProperty::ShowLink, PlayerProperty::EpisodeLink];

    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            PlayerProperty::ShowTitle => "ST",
            PlayerProperty::ShowLink => "SI",
            PlayerProperty::ShowPoster => "SP",
            PlayerProperty::EpisodeTitle => "ET",
            PlayerProperty::EpisodeDate => "ED",
            PlayerProperty::EpisodeRating => "ER",
            PlayerProperty::EpisodeLink => "EI",
            PlayerProperty::EpisodePoster => "EP",
            PlayerProperty::SeasonNumber => "ENS",
            PlayerProperty::EpisodeNumber => "ENE",
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            PlayerProperty::ShowTitle => "Show title",
            PlayerProperty::ShowLink => "IMDB link",
            PlayerProperty::ShowPoster => "Poster",
            PlayerProperty::EpisodeTitle => "Episode title",
            PlayerProperty::EpisodeDate => "Episode airdate",
            PlayerProperty::EpisodeRating => "Episode rating",
            PlayerProperty::EpisodeLink => "Episode IMDB link",
            PlayerProperty::EpisodePoster => "Episode poster",
            PlayerProperty::SeasonNumber => "Season number",
            PlayerProperty::EpisodeNumber => "Episode number",
        }
    }

    #[must_use]
    pub fn kind(self) -> PropertyKind {
        match self {
            PlayerProperty::ShowLink | PlayerProperty::EpisodeLink => PropertyKind::Link,
            PlayerProperty::ShowPoster | PlayerProperty::EpisodePoster => PropertyKind::Poster,
            _ => PropertyKind::Text,
        }
    }

    #[must_use]
    pub fn is_poster(self) -> bool {
        self.kind() == PropertyKind::Poster
    }
}

impl FromStr for PlayerProperty {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|property| property.id() == s)
            .ok_or_else(|| Error::not_found(format!("{s} is not a known player property")))
    }
}

impl fmt::Display for PlayerProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.id())
    }
}
