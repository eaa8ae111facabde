//! OS signals the command-line remote reacts to.
//!
//! * Ctrl-C and SIGTERM log off and quit
//! * SIGHUP drops the session and logs in again
//!
//! Only Ctrl-C exists on Windows.

use std::fmt;

use crate::error::Result;

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RemoteSignal {
    /// Ctrl-C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGHUP
    Reconnect,
}

impl RemoteSignal {
    /// Whether the remote should log off and exit.
    #[must_use]
    pub fn is_shutdown(self) -> bool {
        matches!(self, RemoteSignal::Interrupt | RemoteSignal::Terminate)
    }
}

impl fmt::Display for RemoteSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteSignal::Interrupt => write!(f, "Ctrl+C"),
            RemoteSignal::Terminate => write!(f, "SIGTERM"),
            RemoteSignal::Reconnect => write!(f, "SIGHUP"),
        }
    }
}

/// Registered signal listeners.
pub struct Signals {
    #[cfg(unix)]
    terminate: Signal,
    #[cfg(unix)]
    hangup: Signal,
}

impl Signals {
    /// Registers the listeners. Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if a listener cannot be registered.
    pub fn new() -> Result<Self> {
        #[cfg(unix)]
        {
            Ok(Self {
                terminate: signal(SignalKind::terminate())?,
                hangup: signal(SignalKind::hangup())?,
            })
        }

        #[cfg(not(unix))]
        Ok(Self {})
    }

    /// Waits for the next signal.
    pub async fn recv(&mut self) -> RemoteSignal {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => RemoteSignal::Interrupt,
                _ = self.terminate.recv() => RemoteSignal::Terminate,
                _ = self.hangup.recv() => RemoteSignal::Reconnect,
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            RemoteSignal::Interrupt
        }
    }
}
