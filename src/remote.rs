//! Remote control engine.
//!
//! [`Client`] is the entry point: it binds the socket, starts the transport
//! and dispatcher tasks, and turns method calls into [`Command`]s.
//!
//! # Command dispatch
//!
//! Commands are queued and put on the wire one at a time by a single
//! dispatcher task, in the order they were queued. Requests that expect a
//! reply (file and settings listings) hold the dispatcher until the reply
//! arrives or the request timeout passes, so a reply is only ever matched to
//! the request that is currently outstanding. Replies with a different
//! header are discarded while waiting.
//!
//! When the queue stays idle for a while, the dispatcher sends a keepalive:
//! every few seconds while connected, more often while not, so that the
//! server's answers (or its invalid-session errors) bring the link back
//! quickly.
//!
//! # Example
//!
//! ```no_run
//! use omxremote::{config::Config, remote::Client};
//!
//! # async fn example() -> omxremote::error::Result<()> {
//! let mut client = Client::new(Config::default())?;
//! client.connect().await?;
//!
//! if let Some(listing) = client.list_files(Some("/media")).await? {
//!     for video in listing.videos() {
//!         println!("{video}");
//!     }
//! }
//!
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

use std::{
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    error::{Error, Result},
    events::Event,
    player::{PlayerState, SharedState},
    poster::PosterFetcher,
    protocol::{
        messages, session::LinkState, FileListing, Flags, Header, Packet, Session, Setting,
    },
    push::PushRouter,
    transport::{self, Connection, Sender, Transport},
};

/// A message waiting to be sent.
#[derive(Debug)]
pub struct Command {
    pub header: Header,
    pub data: Vec<u8>,

    /// Where to deliver the reply, for commands that expect one.
    reply: Option<oneshot::Sender<Option<Packet>>>,
}

impl Command {
    #[must_use]
    pub fn new(header: Header, data: impl Into<Vec<u8>>) -> Self {
        Self {
            header,
            data: data.into(),
            reply: None,
        }
    }

    /// Creates a command whose reply, carrying the same header, is delivered
    /// through the returned receiver.
    #[must_use]
    pub fn request(
        header: Header,
        data: impl Into<Vec<u8>>,
    ) -> (Self, oneshot::Receiver<Option<Packet>>) {
        let (tx, rx) = oneshot::channel();
        let command = Self {
            header,
            data: data.into(),
            reply: Some(tx),
        };
        (command, rx)
    }

    #[must_use]
    pub fn exit() -> Self {
        Self::new(Header::Exit, Vec::new())
    }

    #[must_use]
    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }
}

struct Dispatcher {
    commands: mpsc::UnboundedReceiver<Command>,
    replies: mpsc::Receiver<Packet>,
    sender: Sender,
    connection: Arc<Connection>,
    keepalive_connected: Duration,
    keepalive_disconnected: Duration,
    request_timeout: Duration,
}

impl Dispatcher {
    async fn run(mut self, cancel: CancellationToken) {
        loop {
            let idle = if self.connection.is_connected() {
                self.keepalive_connected
            } else {
                self.keepalive_disconnected
            };

            let command = tokio::select! {
                () = cancel.cancelled() => break,
                command = tokio::time::timeout(idle, self.commands.recv()) => command,
            };

            match command {
                Ok(Some(command)) if command.header == Header::Exit => {
                    debug!("logging off");
                    if let Err(e) = self.sender.send(Header::Exit, &[], Flags::NONE).await {
                        warn!("failed to log off: {e}");
                    }
                    break;
                }
                Ok(Some(command)) => self.execute(command, &cancel).await,
                Ok(None) => break,
                Err(_) => {
                    if let Err(e) = self.sender.send(Header::Keepalive, &[], Flags::NONE).await
                    {
                        warn!("failed to send keepalive: {e}");
                    }
                }
            }
        }

        debug!("dispatcher stopped");
    }

    async fn execute(&mut self, command: Command, cancel: &CancellationToken) {
        let Command {
            header,
            data,
            reply,
        } = command;

        let Some(reply) = reply else {
            if let Err(e) = self.sender.send(header, &data, Flags::NONE).await {
                error!("failed to send {header}: {e}");
            }
            return;
        };

        // Anything still queued answers an earlier, abandoned request.
        let mut stale = 0;
        while self.replies.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!("discarded {stale} stale replies");
        }

        let packet = match self.sender.send(header, &data, Flags::NONE).await {
            Ok(()) => tokio::select! {
                () = cancel.cancelled() => None,
                packet = self.await_reply(header) => packet,
            },
            Err(e) => {
                error!("failed to send {header}: {e}");
                None
            }
        };

        // The caller may have given up already.
        let _ = reply.send(packet);
    }

    async fn await_reply(&mut self, header: Header) -> Option<Packet> {
        let deadline = Instant::now() + self.request_timeout;

        loop {
            match tokio::time::timeout_at(deadline, self.replies.recv()).await {
                Ok(Some(packet)) if packet.header == header => return Some(packet),
                Ok(Some(packet)) => debug!("discarding {packet} while waiting for {header}"),
                Ok(None) => return None,
                Err(_) => {
                    warn!("no reply to {header} within {:?}", self.request_timeout);
                    return None;
                }
            }
        }
    }
}

struct Running {
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    dispatcher: JoinHandle<()>,
    transport: JoinHandle<()>,
}

/// Remote control client for one server.
pub struct Client {
    config: Config,
    events: broadcast::Sender<Event>,
    state: SharedState,
    connection: Arc<Connection>,
    session: Arc<Mutex<Session>>,
    running: Option<Running>,
}

impl Client {
    /// Capacity of the event channel. Slow subscribers lag behind and miss
    /// the oldest events.
    const EVENT_CAPACITY: usize = 64;

    /// Replies waiting for the dispatcher. Only one request is outstanding
    /// at a time, so this only needs to absorb strays.
    const REPLY_CAPACITY: usize = 16;

    /// How long a disconnect waits for the log off to go out.
    const EXIT_TIMEOUT: Duration = Duration::from_secs(2);

    /// Creates a client. Nothing is sent before [`connect`](Self::connect).
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the configuration is unusable.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let (events, _) = broadcast::channel(Self::EVENT_CAPACITY);
        let connection = Arc::new(Connection::new(events.clone()));
        let session = Arc::new(Mutex::new(Session::new(config.buffer_size)));

        Ok(Self {
            config,
            events,
            state: Arc::new(RwLock::new(None)),
            connection,
            session,
            running: None,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Starts the engine and sends a login. A running engine is shut down
    /// first.
    ///
    /// # Errors
    ///
    /// Returns error if the socket cannot be bound.
    pub async fn connect(&mut self) -> Result<()> {
        self.disconnect().await;

        let socket = Arc::new(transport::bind(&self.config)?);
        self.session = Arc::new(Mutex::new(Session::new(self.config.buffer_size)));
        let sender = Sender::new(socket, Arc::clone(&self.session), &self.config);

        let cancel = CancellationToken::new();
        let posters = match PosterFetcher::new(&self.config, cancel.child_token()) {
            Ok(posters) => Some(posters),
            Err(e) => {
                warn!("posters disabled: {e}");
                None
            }
        };
        let router = PushRouter::new(Arc::clone(&self.state), self.events.clone(), posters);

        let (replies_tx, replies_rx) = mpsc::channel(Self::REPLY_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let transport = Transport::new(
            sender.clone(),
            Arc::clone(&self.connection),
            router,
            replies_tx,
            self.events.clone(),
            self.config.receive_timeout,
        );
        let dispatcher = Dispatcher {
            commands: commands_rx,
            replies: replies_rx,
            sender: sender.clone(),
            connection: Arc::clone(&self.connection),
            keepalive_connected: self.config.keepalive_connected,
            keepalive_disconnected: self.config.keepalive_disconnected,
            request_timeout: self.config.request_timeout,
        };

        self.running = Some(Running {
            commands: commands_tx,
            transport: tokio::spawn(transport.run(cancel.clone())),
            dispatcher: tokio::spawn(dispatcher.run(cancel.clone())),
            cancel,
        });

        info!("connecting to {}", self.config.server_addr());
        if let Err(e) = sender.login().await {
            // Keepalives and invalid-session errors will retry.
            warn!("failed to send login: {e}");
        }

        Ok(())
    }

    /// Logs off and stops the engine. Calling it again does nothing.
    pub async fn disconnect(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };

        if running.commands.send(Command::exit()).is_ok() {
            match tokio::time::timeout(Self::EXIT_TIMEOUT, &mut running.dispatcher).await {
                Ok(Err(e)) => error!("dispatcher failed: {e}"),
                Err(_) => warn!("log off did not complete in {:?}", Self::EXIT_TIMEOUT),
                Ok(Ok(())) => {}
            }
        }

        running.cancel.cancel();
        if !running.dispatcher.is_finished() {
            if let Err(e) = running.dispatcher.await {
                error!("dispatcher failed: {e}");
            }
        }
        if let Err(e) = running.transport.await {
            error!("transport failed: {e}");
        }

        self.connection.set(false);
        match self.session.lock() {
            Ok(mut session) => session.state = LinkState::Shutdown,
            Err(e) => error!("session unavailable: {e}"),
        }
        match self.state.write() {
            Ok(mut state) => *state = None,
            Err(e) => error!("player state unavailable: {e}"),
        }

        info!("disconnected from {}", self.config.server_addr());
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Where the login lifecycle currently stands.
    #[must_use]
    pub fn link_state(&self) -> LinkState {
        self.session
            .lock()
            .map_or(LinkState::Disconnected, |session| session.state)
    }

    /// Receives every event emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Snapshot of the current playback, `None` while disconnected.
    #[must_use]
    pub fn current_player_state(&self) -> Option<PlayerState> {
        if !self.is_connected() {
            return None;
        }
        self.state.read().ok().and_then(|state| state.as_ref().cloned())
    }

    #[must_use]
    pub fn is_playback_active(&self) -> bool {
        self.is_connected() && self.state.read().is_ok_and(|state| state.is_some())
    }

    fn enqueue(&self, command: Command) -> Result<()> {
        let running = self
            .running
            .as_ref()
            .ok_or_else(|| Error::failed_precondition("client is not connected"))?;

        running
            .commands
            .send(command)
            .map_err(|_| Error::unavailable("dispatcher stopped"))
    }

    /// Sends a request and waits for its reply.
    ///
    /// # Errors
    ///
    /// Returns error if the client is not running or stops before the
    /// request completes. A request that times out is `Ok(None)`.
    pub async fn request(&self, header: Header, data: impl Into<Vec<u8>>) -> Result<Option<Packet>> {
        let (command, reply) = Command::request(header, data);
        self.enqueue(command)?;
        reply
            .await
            .map_err(|_| Error::cancelled(format!("{header} abandoned on shutdown")))
    }

    /// Lists a remote directory, or the server's default one for `None`.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn list_files(&self, path: Option<&str>) -> Result<Option<FileListing>> {
        let reply = self
            .request(Header::ListFiles, path.unwrap_or_default())
            .await?;
        Ok(reply.map(|packet| FileListing::parse(&packet.data)))
    }

    /// Lists the server settings.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request). A reply with an unknown setting type
    /// is `InvalidArgument`.
    pub async fn list_settings(&self) -> Result<Option<Vec<Setting>>> {
        match self.request(Header::ListSettings, Vec::new()).await? {
            Some(packet) => Ok(Some(Setting::parse_list(&packet.data)?)),
            None => Ok(None),
        }
    }

    /// # Errors
    ///
    /// Returns error if the client is not running.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.enqueue(Command::new(
            Header::SetSetting,
            messages::set_setting(key, value),
        ))
    }

    /// # Errors
    ///
    /// Returns error if the client is not running.
    pub fn start_playback(&self, video: &str, subtitle: Option<&str>) -> Result<()> {
        self.enqueue(Command::new(
            Header::StartVideo,
            messages::start_video(video, subtitle),
        ))
    }

    /// # Errors
    ///
    /// Returns error if the client is not running.
    pub fn stop_playback(&self) -> Result<()> {
        self.control(Header::StopVideo)
    }

    /// Toggles between paused and playing.
    ///
    /// # Errors
    ///
    /// Returns error if the client is not running.
    pub fn pause(&self) -> Result<()> {
        self.control(Header::Pause)
    }

    /// # Errors
    ///
    /// Returns error if the client is not running.
    pub fn seek(&self, position: Duration) -> Result<()> {
        self.enqueue(Command::new(Header::SeekTo, messages::seek(position)))
    }

    /// # Errors
    ///
    /// Returns error if the client is not running.
    pub fn set_volume(&self, volume: i64) -> Result<()> {
        self.enqueue(Command::new(Header::SetVolume, volume.to_string()))
    }

    /// # Errors
    ///
    /// Returns error if the client is not running.
    pub fn speed_up(&self) -> Result<()> {
        self.control(Header::SpeedInc)
    }

    /// # Errors
    ///
    /// Returns error if the client is not running.
    pub fn speed_down(&self) -> Result<()> {
        self.control(Header::SpeedDec)
    }

    /// # Errors
    ///
    /// Returns error if the client is not running.
    pub fn increase_subtitle_delay(&self) -> Result<()> {
        self.control(Header::SubtitleDelayInc)
    }

    /// # Errors
    ///
    /// Returns error if the client is not running.
    pub fn decrease_subtitle_delay(&self) -> Result<()> {
        self.control(Header::SubtitleDelayDec)
    }

    /// # Errors
    ///
    /// Returns error if the client is not running.
    pub fn toggle_subtitles(&self) -> Result<()> {
        self.control(Header::SubtitleToggle)
    }

    fn control(&self, header: Header) -> Result<()> {
        debug_assert!(header.is_player_control());
        self.enqueue(Command::new(header, Vec::new()))
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_know_whether_they_expect_a_reply() {
        let command = Command::new(Header::Pause, Vec::new());
        assert!(!command.expects_reply());

        let (command, _rx) = Command::request(Header::ListFiles, ".");
        assert!(command.expects_reply());
        assert_eq!(command.data, b".");

        assert_eq!(Command::exit().header, Header::Exit);
    }

    #[tokio::test]
    async fn commands_require_a_running_client() {
        let client = Client::new(Config::default()).unwrap();
        assert!(!client.is_connected());
        assert!(!client.is_playback_active());
        assert_eq!(client.link_state(), LinkState::Disconnected);

        let err = client.pause().unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::FailedPrecondition);
        assert!(client.list_files(None).await.is_err());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = Config {
            buffer_size: 2,
            ..Config::default()
        };
        assert!(Client::new(config).is_err());
    }
}
