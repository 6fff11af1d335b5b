//! Wire-level building blocks for an IMAP server: protocol types, the
//! command-side grammar, an async [`Decoder`] and a response [`Encoder`].

pub mod decoder;
pub mod encoder;
pub mod parser;
pub mod types;

pub use crate::decoder::{CheckLiteralFn, DecodeError, Decoder, ExpectError};
pub use crate::encoder::Encoder;
pub use crate::types::*;
