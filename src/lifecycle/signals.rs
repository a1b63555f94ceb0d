//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGINT (Ctrl+C) or SIGTERM
//! - Report which one arrived
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - No other signal is handled; configuration reload is file-driven

use std::fmt;
use std::io;

/// Signal that started shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationSignal::Interrupt => f.write_str("SIGINT"),
            TerminationSignal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Termination handlers, registered when created.
///
/// Signals delivered after `install` returns are queued for `recv` instead
/// of hitting the default disposition.
#[cfg(unix)]
pub struct Termination {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Termination {
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the first termination signal.
    pub async fn recv(mut self) -> io::Result<TerminationSignal> {
        tokio::select! {
            _ = self.interrupt.recv() => Ok(TerminationSignal::Interrupt),
            _ = self.terminate.recv() => Ok(TerminationSignal::Terminate),
        }
    }
}

#[cfg(not(unix))]
pub struct Termination;

#[cfg(not(unix))]
impl Termination {
    pub fn install() -> io::Result<Self> {
        Ok(Self)
    }

    pub async fn recv(self) -> io::Result<TerminationSignal> {
        tokio::signal::ctrl_c().await?;
        Ok(TerminationSignal::Interrupt)
    }
}
