//! Engine configuration.
//!
//! Every field has a default that matches the stock omxremote server, so an
//! empty TOML file is a valid configuration:
//!
//! ```toml
//! group = "224.1.1.7"
//! port = 42001
//! keepalive_connected = "7500ms"
//! ```
//!
//! Durations accept an integer with an `ms` or `s` suffix.

use std::{
    fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::Path,
    time::Duration,
};

use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Multicast group the server listens on. A unicast address may be used
    /// as well, in which case no group is joined.
    pub group: IpAddr,

    /// Port the server listens on.
    pub port: u16,

    /// Local port to bind. Defaults to the server port, as multicast members
    /// share the group port.
    pub bind_port: Option<u16>,

    pub multicast_ttl: u32,

    /// Whether datagrams this client sends to the group are looped back to
    /// sockets on the same host. Off by default: the client shares the group
    /// port, so with loopback on it would receive its own frames and take
    /// them for server traffic. Only enable it to reach a server running on
    /// this host.
    pub multicast_loopback: bool,

    /// Client identification sent with every login frame.
    pub login_name: String,

    /// Maximum datagram size until the server negotiates one at login.
    pub buffer_size: usize,

    #[serde(deserialize_with = "duration")]
    pub receive_timeout: Duration,

    /// Idle time after which a keepalive is sent while connected.
    #[serde(deserialize_with = "duration")]
    pub keepalive_connected: Duration,

    /// Idle time after which a keepalive is sent while disconnected.
    #[serde(deserialize_with = "duration")]
    pub keepalive_disconnected: Duration,

    /// How long a request/response command waits for its reply.
    #[serde(deserialize_with = "duration")]
    pub request_timeout: Duration,

    #[serde(deserialize_with = "duration")]
    pub poster_timeout: Duration,

    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        let app_name = env!("CARGO_PKG_NAME");
        let app_version = env!("CARGO_PKG_VERSION");

        Self {
            group: IpAddr::V4(Ipv4Addr::new(224, 1, 1, 7)),
            port: 42001,
            bind_port: None,
            multicast_ttl: 2,
            multicast_loopback: false,
            login_name: String::from("RPi::omxremote"),
            buffer_size: Self::DEFAULT_BUFFER_SIZE,
            receive_timeout: Duration::from_secs(10),
            keepalive_connected: Duration::from_millis(7_500),
            keepalive_disconnected: Duration::from_millis(2_500),
            request_timeout: Duration::from_secs(15),
            poster_timeout: Duration::from_secs(30),
            user_agent: format!("{app_name}/{app_version}"),
        }
    }
}

impl Config {
    pub const DEFAULT_BUFFER_SIZE: usize = 1500;

    /// Largest file accepted by [`Config::from_file`].
    const MAX_FILE_SIZE: u64 = 64 * 1024;

    /// Loads a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is unreasonably large,
    /// does not parse or holds invalid values.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Prevent out-of-memory condition: configuration files are small.
        let file_size = fs::metadata(path)?.len();
        if file_size > Self::MAX_FILE_SIZE {
            return Err(Error::resource_exhausted(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        contents.parse()
    }

    /// Address the login frame is sent to.
    #[must_use]
    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.group, self.port)
    }

    /// Address the local socket binds to.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        let ip = match self.group {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
        };
        SocketAddr::new(ip, self.bind_port.unwrap_or(self.port))
    }

    /// Checks values that the protocol cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when the buffer cannot hold a frame header
    /// plus at least one payload byte, or when a timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size < 3 || self.buffer_size > usize::from(u16::MAX) {
            return Err(Error::invalid_argument(format!(
                "buffer size {} out of bounds",
                self.buffer_size
            )));
        }

        for (name, timeout) in [
            ("receive_timeout", self.receive_timeout),
            ("keepalive_connected", self.keepalive_connected),
            ("keepalive_disconnected", self.keepalive_disconnected),
            ("request_timeout", self.request_timeout),
            ("poster_timeout", self.poster_timeout),
        ] {
            if timeout.is_zero() {
                return Err(Error::invalid_argument(format!("{name} must not be zero")));
            }
        }

        if self.login_name.is_empty() {
            return Err(Error::invalid_argument("login name must not be empty"));
        }

        Ok(())
    }
}

impl std::str::FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

/// Parses `"250ms"`, `"10s"` or a bare number of milliseconds.
fn duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Millis(ms) => Ok(Duration::from_millis(ms)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

fn parse_duration(text: &str) -> Result<Duration> {
    let text = text.trim();
    if let Some(ms) = text.strip_suffix("ms") {
        Ok(Duration::from_millis(ms.trim().parse()?))
    } else if let Some(secs) = text.strip_suffix('s') {
        Ok(Duration::from_secs(secs.trim().parse()?))
    } else {
        Ok(Duration::from_millis(text.parse()?))
    }
}
