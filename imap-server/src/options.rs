use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_rustls::TlsAcceptor;

use crate::error::Result;
use crate::session::Session;
use crate::types::{Cap, CapSet};

pub type NewSessionFn = dyn Fn(&ConnInfo) -> Result<Box<dyn Session>> + Send + Sync;

/// Server configuration, shared read-only by all connections.
#[derive(Clone)]
pub struct Options {
    /// Creates the session bound to a new connection. A `Status` error is
    /// sent to the client as an untagged response instead of the greeting.
    pub new_session: Arc<NewSessionFn>,
    /// Allow LOGIN and AUTHENTICATE on unencrypted connections.
    pub insecure_auth: bool,
    /// Advertised protocol revisions and extensions. Must include
    /// IMAP4rev1 or IMAP4rev2.
    pub caps: CapSet,
    /// Enables STARTTLS.
    pub tls: Option<TlsAcceptor>,
    /// Largest message accepted by APPEND, in bytes.
    pub append_limit: u64,
    pub timeouts: Timeouts,
}

impl Options {
    pub fn new<F>(new_session: F) -> Self
    where
        F: Fn(&ConnInfo) -> Result<Box<dyn Session>> + Send + Sync + 'static,
    {
        Self {
            new_session: Arc::new(new_session),
            insecure_auth: false,
            caps: [Cap::IMAP4REV1].into_iter().collect(),
            tls: None,
            append_limit: 100 * 1024 * 1024,
            timeouts: Timeouts::default(),
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("insecure_auth", &self.insecure_auth)
            .field("caps", &self.caps)
            .field("tls", &self.tls.is_some())
            .field("append_limit", &self.append_limit)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

/// Read and write deadlines. A zero duration disables the deadline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timeouts {
    /// Reading a command while not authenticated, and reading the rest of
    /// any command once its first byte arrived.
    pub command_read: Duration,
    /// Waiting for the next command once authenticated. RFC 9051 section
    /// 5.4 asks for at least 30 minutes.
    pub idle_read: Duration,
    pub literal_read: Duration,
    pub response_write: Duration,
    pub literal_write: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command_read: Duration::from_secs(30),
            idle_read: Duration::from_secs(35 * 60),
            literal_read: Duration::from_secs(5 * 60),
            response_write: Duration::from_secs(30),
            literal_write: Duration::from_secs(5 * 60),
        }
    }
}

pub(crate) fn non_zero(timeout: Duration) -> Option<Duration> {
    if timeout.is_zero() {
        None
    } else {
        Some(timeout)
    }
}

/// What the session factory knows about the connection.
#[derive(Clone, Debug)]
pub struct ConnInfo {
    pub peer_addr: Option<SocketAddr>,
    /// Whether the connection was encrypted from the start.
    pub tls: bool,
}
