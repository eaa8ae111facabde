use std::{fmt, net::SocketAddr, sync::LazyLock};

use regex_lite::Regex;

use super::messages::ParseError;
use crate::config::Config;

/// Lifecycle of the link to the server.
///
/// ```text
/// Disconnected -> LoggingIn -> Connected -> (invalid session) LoggingIn -> ...
///                                        \-> Shutdown
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum LinkState {
    #[default]
    Disconnected,
    LoggingIn,
    Connected,
    Shutdown,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::LoggingIn => write!(f, "logging in"),
            LinkState::Connected => write!(f, "connected"),
            LinkState::Shutdown => write!(f, "shut down"),
        }
    }
}

/// Server-issued identity required to address most commands.
///
/// Written by the transport when a login reply arrives and read by the
/// encoder for every outbound frame. An invalid-session error does not clear
/// the session: the stale id keeps being sent until the re-login completes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub buffer_size: usize,

    /// Source of the last login reply. Until it is known, frames go to the
    /// configured group address.
    pub peer: Option<SocketAddr>,

    pub state: LinkState,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            id: String::from(Self::UNSET_ID),
            buffer_size: Config::DEFAULT_BUFFER_SIZE,
            peer: None,
            state: LinkState::Disconnected,
        }
    }
}

/// `<session id>(<buffer size>)`, whitespace allowed before the parenthesis.
static LOGIN_REPLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9a-f\-]+)\s*\(([0-9]+)\)$").expect("login reply pattern is valid")
});

impl Session {
    /// Session id sent before the first login completes.
    pub const UNSET_ID: &'static str = "???";

    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            ..Self::default()
        }
    }

    /// Applies a successful login reply received from `peer`.
    pub fn establish(&mut self, reply: LoginReply, peer: SocketAddr) {
        self.id = reply.session_id;
        self.buffer_size = reply.buffer_size;
        self.peer = Some(peer);
        self.state = LinkState::Connected;
    }

    #[must_use]
    pub fn is_established(&self) -> bool {
        self.state == LinkState::Connected
    }
}

/// Parsed payload of a login reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginReply {
    pub session_id: String,
    pub buffer_size: usize,
}

impl LoginReply {
    /// Smallest buffer that still fits a frame header and one payload byte.
    const MIN_BUFFER_SIZE: usize = 3;

    /// Parses `"<session id>(<buffer size>)"`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::LoginReply`] if the payload does not match or
    /// the buffer size is unusable.
    pub fn parse(payload: &str) -> Result<Self, ParseError> {
        let error = || ParseError::LoginReply(payload.to_owned());

        let captures = LOGIN_REPLY.captures(payload.trim()).ok_or_else(error)?;
        let buffer_size: usize = captures[2].parse().map_err(|_| error())?;
        if buffer_size < Self::MIN_BUFFER_SIZE {
            return Err(error());
        }

        Ok(Self {
            session_id: captures[1].to_owned(),
            buffer_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_login_reply() {
        let reply = LoginReply::parse("abc-123(1500)").unwrap();
        assert_eq!(
            reply,
            LoginReply {
                session_id: String::from("abc-123"),
                buffer_size: 1500
            }
        );

        let reply = LoginReply::parse("0f3e-99 (512)").unwrap();
        assert_eq!(reply.session_id, "0f3e-99");
        assert_eq!(reply.buffer_size, 512);
    }

    #[test]
    fn rejects_malformed_login_replies() {
        for payload in ["", "abc-123", "xyz(1500)", "abc(15x0)", "abc(2)", "abc(1500) trailing"] {
            assert!(LoginReply::parse(payload).is_err(), "{payload}");
        }
    }

    #[test]
    fn establish_records_peer_and_state() {
        let mut session = Session::default();
        assert_eq!(session.id, Session::UNSET_ID);
        assert!(!session.is_established());

        let peer = "192.168.1.20:42001".parse().unwrap();
        session.establish(LoginReply::parse("abc-123(1024)").unwrap(), peer);

        assert!(session.is_established());
        assert_eq!(session.peer, Some(peer));
        assert_eq!(session.buffer_size, 1024);
    }
}
