use std::{error, io};

use imap_wire::{DecodeError, ResponseCode, StatusResponse};

/// Errors returned by command handlers and [`Session`](crate::Session)
/// methods.
///
/// `Status` errors are written to the client as-is. Everything else is
/// logged and reported as `NO [SERVERBUG] Internal server error`, except
/// for syntax errors coming from the decoder, which become
/// `BAD [CLIENTBUG]` responses.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Status(StatusResponse),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl Error {
    pub fn no(text: impl Into<String>) -> Self {
        Error::Status(StatusResponse::no(text))
    }

    pub fn bad(text: impl Into<String>) -> Self {
        Error::Status(StatusResponse::bad(text))
    }

    /// `BAD [CLIENTBUG] <text>`
    pub fn client_bug(text: impl Into<String>) -> Self {
        Error::Status(StatusResponse::bad(text).with_code(ResponseCode::ClientBug))
    }

    /// A failure whose details must stay server-side.
    pub fn other(err: impl Into<Box<dyn error::Error + Send + Sync>>) -> Self {
        Error::Other(err.into())
    }
}

impl From<StatusResponse> for Error {
    fn from(resp: StatusResponse) -> Self {
        Error::Status(resp)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
