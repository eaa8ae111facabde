//! Datagram transport between the client and the server.
//!
//! The transport owns the socket. A single [`Transport`] task reads it and
//!
//! * reassembles multipart messages
//! * tracks reachability through [`Connection`]
//! * completes logins and recovers from invalid-session errors
//! * hands pushes to the [`PushRouter`] and everything else to the request
//!   dispatcher
//!
//! Any number of [`Sender`] handles may send concurrently; every message is
//! encoded against a snapshot of the current [`Session`].
//!
//! # Addressing
//!
//! Until the first login reply arrives, frames go to the configured group
//! address. Afterwards they go to whichever address sent that reply.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::{
    net::UdpSocket,
    sync::{broadcast, mpsc},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    error::Result,
    events::Event,
    protocol::{
        codec, session::LinkState, session::LoginReply, Flags, Frame, Header, Packet,
        Reassembler, Session,
    },
    push::PushRouter,
};

/// Whether the server is currently reachable.
///
/// Changes are edge-triggered: setting the value it already has emits
/// nothing.
pub struct Connection {
    connected: AtomicBool,
    events: broadcast::Sender<Event>,
}

impl Connection {
    #[must_use]
    pub fn new(events: broadcast::Sender<Event>) -> Self {
        Self {
            connected: AtomicBool::new(false),
            events,
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Updates the flag and returns whether it changed.
    pub fn set(&self, connected: bool) -> bool {
        let previous = self.connected.swap(connected, Ordering::SeqCst);
        if previous == connected {
            return false;
        }

        if connected {
            info!("connected");
            let _ = self.events.send(Event::Connected);
        } else {
            info!("disconnected");
            let _ = self.events.send(Event::Disconnected);
        }
        true
    }
}

/// Creates the socket the client sends from and receives on.
///
/// The socket binds the unspecified address on the configured port and
/// joins the group if the configured address is a multicast one.
///
/// # Errors
///
/// Returns error if the socket cannot be created, bound or joined to the
/// group.
pub fn bind(config: &Config) -> Result<UdpSocket> {
    let bind_addr = config.bind_addr();
    let socket = Socket::new(
        Domain::for_address(bind_addr),
        Type::DGRAM,
        Some(Protocol::UDP),
    )?;

    // Several clients may share the port on one host.
    if let Err(e) = socket.set_reuse_address(true) {
        warn!("failed to set SO_REUSEADDR: {e}");
    }
    #[cfg(unix)]
    if let Err(e) = socket.set_reuse_port(true) {
        warn!("failed to set SO_REUSEPORT: {e}");
    }

    match config.group {
        IpAddr::V4(group) => {
            socket.set_multicast_ttl_v4(config.multicast_ttl)?;
            socket.set_multicast_loop_v4(config.multicast_loopback)?;
            socket.set_nonblocking(true)?;
            socket.bind(&bind_addr.into())?;
            if group.is_multicast() {
                socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
            }
        }
        IpAddr::V6(group) => {
            socket.set_multicast_hops_v6(config.multicast_ttl)?;
            socket.set_multicast_loop_v6(config.multicast_loopback)?;
            socket.set_nonblocking(true)?;
            socket.bind(&bind_addr.into())?;
            if group.is_multicast() {
                socket.join_multicast_v6(&group, 0)?;
            }
        }
    }

    let std_socket: std::net::UdpSocket = socket.into();
    let socket = UdpSocket::from_std(std_socket)?;
    debug!("bound to {}", socket.local_addr()?);
    Ok(socket)
}

/// Cloneable handle for sending messages.
#[derive(Clone)]
pub struct Sender {
    socket: Arc<UdpSocket>,
    session: Arc<Mutex<Session>>,
    group: SocketAddr,
    login_name: String,
}

impl Sender {
    #[must_use]
    pub fn new(socket: Arc<UdpSocket>, session: Arc<Mutex<Session>>, config: &Config) -> Self {
        Self {
            socket,
            session,
            group: config.server_addr(),
            login_name: config.login_name.clone(),
        }
    }

    /// Sends one message, fragmented to the negotiated buffer size.
    ///
    /// # Errors
    ///
    /// Returns error if the session lock is poisoned or a datagram cannot be
    /// sent.
    pub async fn send(&self, header: Header, data: &[u8], flags: Flags) -> Result<()> {
        let (datagrams, target) = {
            let session = self.session.lock()?;
            let datagrams =
                codec::encode(header, data, flags, &session.id, session.buffer_size)?;
            (datagrams, session.peer.unwrap_or(self.group))
        };

        for datagram in datagrams {
            self.socket.send_to(&datagram, target).await?;
        }

        trace!("sent {header} to {target} ({} bytes)", data.len());
        Ok(())
    }

    /// Sends a login request. Its reply establishes the session.
    ///
    /// # Errors
    ///
    /// Returns error if the login cannot be sent.
    pub async fn login(&self) -> Result<()> {
        self.session.lock()?.state = LinkState::LoggingIn;
        debug!("logging in as {}", self.login_name);
        self.send(
            Header::Login,
            self.login_name.as_bytes(),
            Flags::WITHOUT_SESSION_ID,
        )
        .await
    }

    /// Copy of the current session.
    ///
    /// # Errors
    ///
    /// Returns error if the session lock is poisoned.
    pub fn session(&self) -> Result<Session> {
        Ok(self.session.lock()?.clone())
    }
}

/// Spaces out automatic re-logins after invalid-session errors.
///
/// The first attempt is immediate. Further attempts inside the current
/// window are skipped and double the window, up to a maximum. A successful
/// login resets it.
#[derive(Debug)]
pub struct ReloginThrottle {
    window: Duration,
    last: Option<Instant>,
}

impl Default for ReloginThrottle {
    fn default() -> Self {
        Self {
            window: Self::MIN_WINDOW,
            last: None,
        }
    }
}

impl ReloginThrottle {
    const MIN_WINDOW: Duration = Duration::from_millis(250);
    const MAX_WINDOW: Duration = Duration::from_secs(8);

    /// Returns whether a re-login may be sent at `now`.
    pub fn attempt(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.window => {
                self.window = (self.window * 2).min(Self::MAX_WINDOW);
                false
            }
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

pub struct Transport {
    socket: Arc<UdpSocket>,
    sender: Sender,
    session: Arc<Mutex<Session>>,
    connection: Arc<Connection>,
    reassembler: Reassembler,
    router: PushRouter,
    replies: mpsc::Sender<Packet>,
    receive_timeout: Duration,
    relogin: ReloginThrottle,
    events: broadcast::Sender<Event>,
}

impl Transport {
    /// Largest datagram UDP can carry.
    const RECEIVE_BUFFER_SIZE: usize = 64 * 1024;

    #[must_use]
    pub fn new(
        sender: Sender,
        connection: Arc<Connection>,
        router: PushRouter,
        replies: mpsc::Sender<Packet>,
        events: broadcast::Sender<Event>,
        receive_timeout: Duration,
    ) -> Self {
        Self {
            socket: Arc::clone(&sender.socket),
            session: Arc::clone(&sender.session),
            sender,
            connection,
            reassembler: Reassembler::new(),
            router,
            replies,
            receive_timeout,
            relogin: ReloginThrottle::default(),
            events,
        }
    }

    /// Receives until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut buffer = vec![0; Self::RECEIVE_BUFFER_SIZE];

        loop {
            let received = tokio::select! {
                () = cancel.cancelled() => break,
                received = tokio::time::timeout(
                    self.receive_timeout,
                    self.socket.recv_from(&mut buffer),
                ) => received,
            };

            match received {
                Ok(Ok((len, source))) => {
                    if let Err(e) = self.handle_datagram(&buffer[..len], source, &cancel).await {
                        error!("error handling datagram from {source}: {e}");
                    }
                }
                Ok(Err(e)) => {
                    warn!("receive failed: {e}");
                    self.connection.set(false);
                    // Avoid spinning on persistent socket errors.
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(_) => {
                    trace!("nothing received for {:?}", self.receive_timeout);
                    self.connection.set(false);
                }
            }
        }

        debug!("transport stopped");
    }

    async fn handle_datagram(
        &mut self,
        datagram: &[u8],
        source: SocketAddr,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let frame = match Frame::decode(datagram) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("dropping datagram from {source}: {e}");
                self.connection.set(false);
                return Ok(());
            }
        };

        self.connection.set(true);

        let Some(packet) = self.reassembler.push(frame) else {
            return Ok(());
        };

        match packet.header {
            Header::Login => self.login_reply(&packet.data, source),
            Header::ErrorInvalidSession => self.invalid_session(cancel).await,
            _ => self.deliver(packet),
        }
    }

    fn login_reply(&mut self, payload: &str, source: SocketAddr) -> Result<()> {
        let reply = match LoginReply::parse(payload) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("{e}");
                let _ = self.events.send(Event::ParseFailed {
                    header: Header::Login,
                    payload: e.payload().to_owned(),
                });
                return Ok(());
            }
        };

        info!(
            "logged in to {source} with session {} (buffer size {})",
            reply.session_id, reply.buffer_size
        );
        self.session.lock()?.establish(reply, source);
        self.relogin.reset();
        Ok(())
    }

    async fn invalid_session(&mut self, cancel: &CancellationToken) -> Result<()> {
        warn!("session rejected by server");
        self.session.lock()?.state = LinkState::LoggingIn;
        self.connection.set(false);

        if cancel.is_cancelled() {
            return Ok(());
        }
        if !self.relogin.attempt(Instant::now()) {
            debug!("re-login throttled");
            return Ok(());
        }

        self.sender.login().await
    }

    fn deliver(&mut self, packet: Packet) -> Result<()> {
        trace!("received {packet}");

        if packet.header.is_asynchronous() {
            return self.router.route(&packet);
        }

        if let Err(e) = self.replies.try_send(packet) {
            warn!("dropping reply: {e}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_events_are_edge_triggered() {
        let (events, mut rx) = broadcast::channel(8);
        let connection = Connection::new(events);

        assert!(!connection.set(false));
        assert!(connection.set(true));
        assert!(!connection.set(true));
        assert!(connection.is_connected());
        assert!(connection.set(false));

        assert_eq!(rx.try_recv().unwrap(), Event::Connected);
        assert_eq!(rx.try_recv().unwrap(), Event::Disconnected);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn relogin_window_doubles_and_resets() {
        let mut throttle = ReloginThrottle::default();
        let start = Instant::now();

        assert!(throttle.attempt(start));
        assert!(!throttle.attempt(start + Duration::from_millis(100)));
        // Window is now 500ms.
        assert!(!throttle.attempt(start + Duration::from_millis(400)));
        assert!(throttle.attempt(start + Duration::from_millis(1500)));

        for _ in 0..10 {
            throttle.attempt(start + Duration::from_millis(1501));
        }
        assert_eq!(throttle.window, ReloginThrottle::MAX_WINDOW);

        throttle.reset();
        assert!(throttle.attempt(start + Duration::from_millis(1502)));
    }

    #[tokio::test]
    async fn sender_targets_group_until_logged_in() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = Config {
            group: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: server.local_addr().unwrap().port(),
            bind_port: Some(0),
            ..Config::default()
        };

        let socket = Arc::new(bind(&config).unwrap());
        let session = Arc::new(Mutex::new(Session::new(config.buffer_size)));
        let sender = Sender::new(socket, Arc::clone(&session), &config);

        sender.login().await.unwrap();
        let mut buffer = [0; 64];
        let (len, _) = server.recv_from(&mut buffer).await.unwrap();
        assert_eq!(&buffer[..2], &[0xA1, 0x02]);
        assert_eq!(&buffer[2..len], config.login_name.as_bytes());
        assert_eq!(sender.session().unwrap().state, LinkState::LoggingIn);

        sender.send(Header::Pause, b"", Flags::NONE).await.unwrap();
        let (len, _) = server.recv_from(&mut buffer).await.unwrap();
        assert_eq!(&buffer[..len], b"\xA7\x00???");
    }
}
