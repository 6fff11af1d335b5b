//! Server side of IMAP4rev1/IMAP4rev2 connections.
//!
//! A [`Server`] greets each client, reads its commands, enforces the
//! connection state machine and writes responses. Everything that touches
//! mailboxes is delegated to a [`Session`], created per connection by the
//! factory in [`Options`].

mod conn;
mod encoder;
mod error;
mod options;
mod server;
mod session;
mod transport;

pub use crate::encoder::{FetchWriter, UpdateWriter};
pub use crate::error::{Error, Result};
pub use crate::options::{ConnInfo, NewSessionFn, Options, Timeouts};
pub use crate::server::Server;
pub use crate::session::Session;
pub use crate::transport::Io;

pub mod types {
    pub use imap_wire::types::*;
}
