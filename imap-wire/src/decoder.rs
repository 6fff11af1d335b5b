use std::fmt;
use std::io;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use chrono::{DateTime, FixedOffset, NaiveDate};
use futures_util::future::BoxFuture;
use nom::IResult;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{self, Instant};

use crate::parser::{self, core};
use crate::types::{Flag, LiteralInfo, SeqSet, StatusResponse};

/// Called once a literal header has been decoded, before any of the literal
/// body is read. Returning an error stops the decoder from reading the body.
pub type CheckLiteralFn =
    Box<dyn Fn(LiteralInfo) -> BoxFuture<'static, Result<(), DecodeError>> + Send + Sync>;

/// Upper bound on bytes buffered while waiting for a single token or line to
/// complete. Literal bodies are not subject to it.
pub const DEFAULT_MAX_LINE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The input did not match the grammar the caller expected.
    #[error(transparent)]
    Expect(#[from] ExpectError),
    /// A literal was refused; the client has not sent its body.
    #[error("literal rejected: {0}")]
    Rejected(StatusResponse),
    /// A literal was refused, but the client is already sending its body,
    /// so the stream can no longer be framed.
    #[error("literal rejected, aborting: {0}")]
    Aborted(StatusResponse),
}

impl DecodeError {
    pub fn expected(what: impl fmt::Display) -> Self {
        DecodeError::Expect(ExpectError {
            message: format!("expected {what}"),
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ExpectError {
    pub message: String,
}

/// Decodes command-side syntax from an async byte stream.
///
/// Every `expect_*` method either consumes the item it names or fails
/// without consuming anything but whitespace-free prefix bytes that were
/// already rejected. Reads are bounded by the deadline set through
/// [`Decoder::set_read_timeout`]; an expired deadline surfaces as an
/// `io::ErrorKind::TimedOut` error.
pub struct Decoder<R> {
    reader: R,
    buf: BytesMut,
    deadline: Option<Instant>,
    max_line: usize,
    check_literal: Option<CheckLiteralFn>,
}

impl<R> Decoder<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(4096),
            deadline: None,
            max_line: DEFAULT_MAX_LINE,
            check_literal: None,
        }
    }

    pub fn with_literal_check(mut self, check: CheckLiteralFn) -> Self {
        self.check_literal = Some(check);
        self
    }

    pub fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line;
        self
    }

    /// Sets the read deadline to `timeout` from now. `None` removes it.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.deadline = timeout.map(|t| Instant::now() + t);
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Number of bytes read from the stream but not decoded yet.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn discard_buffered(&mut self) {
        self.buf.clear();
    }

    async fn fill(&mut self) -> io::Result<usize> {
        if self.buf.capacity() - self.buf.len() < 1024 {
            self.buf.reserve(4096);
        }
        let read = self.reader.read_buf(&mut self.buf);
        match self.deadline {
            Some(deadline) => time::timeout_at(deadline, read)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read deadline exceeded"))?,
            None => read.await,
        }
    }

    async fn parse<T, F>(&mut self, what: &str, parser: F) -> Result<T, DecodeError>
    where
        F: Fn(&[u8]) -> IResult<&[u8], T>,
    {
        loop {
            let outcome = match parser(&self.buf[..]) {
                Ok((rest, value)) => Ok((self.buf.len() - rest.len(), value)),
                Err(nom::Err::Incomplete(_)) => Err(true),
                Err(_) => Err(false),
            };
            match outcome {
                Ok((consumed, value)) => {
                    self.buf.advance(consumed);
                    return Ok(value);
                }
                Err(true) => {
                    if self.buf.len() >= self.max_line {
                        return Err(DecodeError::Expect(ExpectError {
                            message: format!("line too long while reading {what}"),
                        }));
                    }
                    if self.fill().await? == 0 {
                        return Err(unexpected_eof());
                    }
                }
                Err(false) => return Err(DecodeError::expected(what)),
            }
        }
    }

    /// Reports whether the stream has ended. Waits for at least one byte
    /// (bounded by the read deadline) when nothing is buffered.
    pub async fn eof(&mut self) -> io::Result<bool> {
        if !self.buf.is_empty() {
            return Ok(false);
        }
        Ok(self.fill().await? == 0)
    }

    pub async fn peek(&mut self) -> Result<Option<u8>, DecodeError> {
        if self.buf.is_empty() && self.fill().await? == 0 {
            return Ok(None);
        }
        Ok(self.buf.first().copied())
    }

    /// Consumes `c` if it is the next byte.
    pub async fn special(&mut self, c: u8) -> Result<bool, DecodeError> {
        if self.peek().await? == Some(c) {
            self.buf.advance(1);
            return Ok(true);
        }
        Ok(false)
    }

    pub async fn expect_special(&mut self, c: u8) -> Result<(), DecodeError> {
        if self.special(c).await? {
            Ok(())
        } else {
            Err(DecodeError::expected(format_args!("'{}'", c as char)))
        }
    }

    /// Consumes a single space if it is next.
    pub async fn sp(&mut self) -> Result<bool, DecodeError> {
        self.special(b' ').await
    }

    pub async fn expect_sp(&mut self) -> Result<(), DecodeError> {
        if self.sp().await? {
            Ok(())
        } else {
            Err(DecodeError::expected("SP"))
        }
    }

    pub async fn expect_crlf(&mut self) -> Result<(), DecodeError> {
        self.parse("CRLF", core::crlf).await
    }

    pub async fn expect_atom(&mut self) -> Result<String, DecodeError> {
        self.parse("atom", core::atom).await
    }

    pub async fn expect_number(&mut self) -> Result<u32, DecodeError> {
        self.parse("number", core::number).await
    }

    pub async fn expect_number_64(&mut self) -> Result<u64, DecodeError> {
        self.parse("number", core::number_64).await
    }

    pub async fn expect_seq_set(&mut self) -> Result<SeqSet, DecodeError> {
        self.parse("sequence set", parser::seq_set).await
    }

    pub async fn expect_flag(&mut self) -> Result<Flag, DecodeError> {
        self.parse("flag", parser::flag).await
    }

    pub async fn expect_date(&mut self) -> Result<NaiveDate, DecodeError> {
        self.parse("date", parser::date).await
    }

    pub async fn expect_date_time(&mut self) -> Result<DateTime<FixedOffset>, DecodeError> {
        self.parse("date-time", parser::date_time).await
    }

    /// Consumes `NIL` if it is next.
    pub async fn nil(&mut self) -> Result<bool, DecodeError> {
        match self.peek().await? {
            Some(b'N') | Some(b'n') => self.parse("NIL", core::nil).await.map(|()| true),
            _ => Ok(false),
        }
    }

    /// Everything up to, but not including, the next CRLF.
    pub async fn text(&mut self) -> Result<String, DecodeError> {
        self.parse("text", core::text).await
    }

    /// A complete line, CRLF consumed and stripped.
    pub async fn read_line(&mut self) -> Result<String, DecodeError> {
        let line = self.text().await?;
        self.expect_crlf().await?;
        Ok(line)
    }

    /// string = quoted / literal
    pub async fn expect_string(&mut self) -> Result<String, DecodeError> {
        match self.peek().await? {
            Some(b'"') => self.parse("quoted string", core::quoted).await,
            Some(b'{') => self.literal_string().await,
            _ => Err(DecodeError::expected("string")),
        }
    }

    /// astring = 1*ASTRING-CHAR / string
    pub async fn expect_astring(&mut self) -> Result<String, DecodeError> {
        match self.peek().await? {
            Some(b'"') | Some(b'{') => self.expect_string().await,
            _ => self.parse("astring", core::astring_atom).await,
        }
    }

    /// mailbox = "INBOX" / astring, with INBOX matched case-insensitively
    pub async fn expect_mailbox(&mut self) -> Result<String, DecodeError> {
        let name = self.expect_astring().await?;
        if name.eq_ignore_ascii_case("INBOX") {
            return Ok("INBOX".to_owned());
        }
        Ok(name)
    }

    /// list-mailbox = 1*list-char / string
    pub async fn expect_list_mailbox(&mut self) -> Result<String, DecodeError> {
        match self.peek().await? {
            Some(b'"') | Some(b'{') => self.expect_string().await,
            _ => self.parse("list-mailbox", core::list_mailbox_atom).await,
        }
    }

    async fn literal_string(&mut self) -> Result<String, DecodeError> {
        let data = self.expect_literal().await?;
        String::from_utf8(data.to_vec()).map_err(|_| DecodeError::expected("UTF-8 literal"))
    }

    /// Reads a literal, consulting the literal check between header and body.
    pub async fn expect_literal(&mut self) -> Result<Bytes, DecodeError> {
        let info = self.expect_literal_header().await?;
        if let Some(check) = &self.check_literal {
            check(info).await?;
        }
        self.read_literal(info.size).await
    }

    /// Reads only `{<size>[+]}CRLF`. The caller decides whether to accept the
    /// literal and then calls [`Decoder::read_literal`].
    pub async fn expect_literal_header(&mut self) -> Result<LiteralInfo, DecodeError> {
        self.parse("literal", core::literal_header).await
    }

    pub async fn read_literal(&mut self, size: u64) -> Result<Bytes, DecodeError> {
        let size = usize::try_from(size).map_err(|_| DecodeError::expected("smaller literal"))?;
        while self.buf.len() < size {
            self.buf.reserve(size - self.buf.len());
            if self.fill().await? == 0 {
                return Err(unexpected_eof());
            }
        }
        Ok(self.buf.split_to(size).freeze())
    }

    /// Skips everything up to and including the next CRLF. Errors are
    /// swallowed: callers use this while already reporting a failure.
    pub async fn discard_line(&mut self) {
        loop {
            if let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
                self.buf.advance(pos + 2);
                return;
            }
            let keep = usize::from(self.buf.last() == Some(&b'\r'));
            let skip = self.buf.len() - keep;
            self.buf.advance(skip);
            match self.fill().await {
                Ok(n) if n > 0 => {}
                _ => return,
            }
        }
    }
}

fn unexpected_eof() -> DecodeError {
    DecodeError::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "unexpected end of stream",
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use futures_util::FutureExt;
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::types::{NumRange, ResponseCode};

    fn decoder(input: &'static [u8]) -> Decoder<&'static [u8]> {
        Decoder::new(input)
    }

    #[tokio::test]
    async fn test_command_line() {
        let mut dec = decoder(b"a1 uid fetch 1:* FLAGS\r\n");
        assert_eq!(dec.expect_atom().await.unwrap(), "a1");
        dec.expect_sp().await.unwrap();
        assert_eq!(dec.expect_atom().await.unwrap(), "uid");
        dec.expect_sp().await.unwrap();
        assert_eq!(dec.expect_atom().await.unwrap(), "fetch");
        dec.expect_sp().await.unwrap();
        assert_eq!(
            dec.expect_seq_set().await.unwrap(),
            SeqSet(vec![NumRange { start: 1, stop: 0 }])
        );
        dec.expect_sp().await.unwrap();
        assert_eq!(dec.expect_atom().await.unwrap(), "FLAGS");
        dec.expect_crlf().await.unwrap();
        assert!(dec.eof().await.unwrap());
    }

    #[tokio::test]
    async fn test_expect_error_names_the_item() {
        let mut dec = decoder(b"a1\r\n");
        dec.expect_atom().await.unwrap();
        assert_matches!(dec.expect_sp().await, Err(DecodeError::Expect(e)) if e.message == "expected SP");
    }

    #[tokio::test]
    async fn test_mailbox_forms() {
        let mut dec = decoder(b"inbox \"Sent Items\" {5}\r\nDraft\r\n");
        assert_eq!(dec.expect_mailbox().await.unwrap(), "INBOX");
        dec.expect_sp().await.unwrap();
        assert_eq!(dec.expect_mailbox().await.unwrap(), "Sent Items");
        dec.expect_sp().await.unwrap();
        assert_eq!(dec.expect_mailbox().await.unwrap(), "Draft");
        dec.expect_crlf().await.unwrap();
    }

    #[tokio::test]
    async fn test_literal_check_runs_before_body() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut dec = decoder(b"{3+}\r\nabc").with_literal_check(Box::new(move |info: LiteralInfo| {
            assert_eq!(info, LiteralInfo { size: 3, non_sync: true });
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, DecodeError>(()) }.boxed()
        }));
        assert_eq!(dec.expect_astring().await.unwrap(), "abc");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_literal_check_rejection_leaves_body_unread() {
        let mut dec = decoder(b"{5000}\r\nnext\r\n").with_literal_check(Box::new(|_: LiteralInfo| {
            async {
                Err::<(), _>(DecodeError::Rejected(
                    StatusResponse::no("too big").with_code(ResponseCode::TooBig),
                ))
            }
            .boxed()
        }));
        assert_matches!(dec.expect_string().await, Err(DecodeError::Rejected(_)));
        assert_eq!(dec.read_line().await.unwrap(), "next");
    }

    #[tokio::test]
    async fn test_discard_line() {
        let mut dec = decoder(b"garbage (( \"x\r\nb NOOP\r\n");
        dec.discard_line().await;
        assert_eq!(dec.expect_atom().await.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_line_too_long() {
        let mut dec = decoder(b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").with_max_line(8);
        assert_matches!(dec.expect_atom().await, Err(DecodeError::Expect(_)));
    }

    #[tokio::test]
    async fn test_split_reads() {
        let (client, server) = tokio::io::duplex(64);
        let mut dec = Decoder::new(server);
        let writer = tokio::spawn(async move {
            let mut client = client;
            client.write_all(b"tag LO").await.unwrap();
            tokio::task::yield_now().await;
            client.write_all(b"GIN joe \"se").await.unwrap();
            tokio::task::yield_now().await;
            client.write_all(b"cret\"\r\n").await.unwrap();
        });
        assert_eq!(dec.expect_atom().await.unwrap(), "tag");
        dec.expect_sp().await.unwrap();
        assert_eq!(dec.expect_atom().await.unwrap(), "LOGIN");
        dec.expect_sp().await.unwrap();
        assert_eq!(dec.expect_astring().await.unwrap(), "joe");
        dec.expect_sp().await.unwrap();
        assert_eq!(dec.expect_astring().await.unwrap(), "secret");
        dec.expect_crlf().await.unwrap();
        writer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_deadline() {
        let (_client, server) = tokio::io::duplex(64);
        let mut dec = Decoder::new(server);
        dec.set_read_timeout(Some(Duration::from_secs(30)));
        let err = dec.eof().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
