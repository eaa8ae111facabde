use std::fmt;

/// Message type carried in the first byte of every frame.
///
/// Codes unknown to this client are preserved as [`Header::Other`] so that
/// they can still be reassembled, logged and delivered.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Header {
    Login,
    ListFiles,
    StartVideo,
    StopVideo,
    SetVolume,
    SeekTo,
    Pause,
    SpeedInc,
    SpeedDec,
    SubtitleDelayInc,
    SubtitleDelayDec,
    SubtitleToggle,
    PlayerState,
    PlayerParams,
    PlayerInfo,
    PlayerExtra,
    Keepalive,
    ListSettings,
    SetSetting,
    Error,
    ErrorInvalidSession,
    Exit,
    Other(u8),
}

impl Header {
    /// Headers the server pushes unsolicited. Packets with these headers
    /// are routed to the player state and never answer a request.
    pub const ASYNCHRONOUS: [Header; 7] = [
        Header::Keepalive,
        Header::StartVideo,
        Header::StopVideo,
        Header::PlayerState,
        Header::PlayerParams,
        Header::PlayerInfo,
        Header::PlayerExtra,
    ];

    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Header::Login => 0xA1,
            Header::ListFiles => 0xA2,
            Header::StartVideo => 0xA3,
            Header::StopVideo => 0xA4,
            Header::SetVolume => 0xA5,
            Header::SeekTo => 0xA6,
            Header::Pause => 0xA7,
            Header::SpeedInc => 0xA8,
            Header::SpeedDec => 0xA9,
            Header::SubtitleDelayInc => 0xAA,
            Header::SubtitleDelayDec => 0xAB,
            Header::SubtitleToggle => 0xAC,
            Header::PlayerState => 0xD1,
            Header::PlayerParams => 0xD2,
            Header::PlayerInfo => 0xD3,
            Header::PlayerExtra => 0xD4,
            Header::Keepalive => 0xE0,
            Header::ListSettings => 0xE1,
            Header::SetSetting => 0xE2,
            Header::Error => 0xF0,
            Header::ErrorInvalidSession => 0xF1,
            Header::Exit => 0xFE,
            Header::Other(code) => code,
        }
    }

    #[must_use]
    pub fn is_asynchronous(self) -> bool {
        Self::ASYNCHRONOUS.contains(&self)
    }

    /// Playback transport controls that are sent without awaiting a reply.
    #[must_use]
    pub fn is_player_control(self) -> bool {
        matches!(
            self,
            Header::StopVideo
                | Header::SetVolume
                | Header::SeekTo
                | Header::Pause
                | Header::SpeedInc
                | Header::SpeedDec
                | Header::SubtitleDelayInc
                | Header::SubtitleDelayDec
                | Header::SubtitleToggle
        )
    }
}

impl From<u8> for Header {
    fn from(code: u8) -> Self {
        match code {
            0xA1 => Header::Login,
            0xA2 => Header::ListFiles,
            0xA3 => Header::StartVideo,
            0xA4 => Header::StopVideo,
            0xA5 => Header::SetVolume,
            0xA6 => Header::SeekTo,
            0xA7 => Header::Pause,
            0xA8 => Header::SpeedInc,
            0xA9 => Header::SpeedDec,
            0xAA => Header::SubtitleDelayInc,
            0xAB => Header::SubtitleDelayDec,
            0xAC => Header::SubtitleToggle,
            0xD1 => Header::PlayerState,
            0xD2 => Header::PlayerParams,
            0xD3 => Header::PlayerInfo,
            0xD4 => Header::PlayerExtra,
            0xE0 => Header::Keepalive,
            0xE1 => Header::ListSettings,
            0xE2 => Header::SetSetting,
            0xF0 => Header::Error,
            0xF1 => Header::ErrorInvalidSession,
            0xFE => Header::Exit,
            other => Header::Other(other),
        }
    }
}

impl From<Header> for u8 {
    fn from(header: Header) -> Self {
        header.code()
    }
}

/// Formats as the hexadecimal wire code, e.g. `H0xa1`.
impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H{:#04x}", self.code())
    }
}
