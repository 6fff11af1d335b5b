use std::future::Future;
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, PoisonError};

use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{self, Instant};

use imap_wire::{Cap, CapSet, Encoder, FetchItemData, FetchMessage, Flag, StatusResponse};

use crate::options::{non_zero, Timeouts};
use crate::transport::Link;

struct Writer {
    io: Link,
    deadline: Option<Instant>,
}

/// The write half of a connection.
///
/// Responses are produced through [`Output::encoder`], which holds the
/// write lock until the response is ended, so concurrent producers never
/// interleave bytes on the wire.
pub(crate) struct Output {
    writer: Mutex<Writer>,
    // Never locked while waiting for `writer`.
    enabled: std::sync::Mutex<CapSet>,
    timeouts: Timeouts,
}

impl Output {
    pub(crate) fn new(io: Link, timeouts: Timeouts) -> Self {
        Self {
            writer: Mutex::new(Writer { io, deadline: None }),
            enabled: std::sync::Mutex::new(CapSet::new()),
            timeouts,
        }
    }

    fn enabled_caps(&self) -> std::sync::MutexGuard<'_, CapSet> {
        self.enabled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a capability enabled by the client. Returns `false` if it
    /// already was.
    pub(crate) fn enable(&self, cap: Cap) -> bool {
        self.enabled_caps().insert(cap)
    }

    pub(crate) async fn encoder(&self) -> ResponseEncoder<'_> {
        let quoted_utf8 = {
            let enabled = self.enabled_caps();
            enabled.has(&Cap::IMAP4REV2) || enabled.has(&Cap::UTF8_ACCEPT)
        };

        let mut writer = self.writer.lock().await;
        writer.deadline = deadline(self.timeouts.response_write);
        ResponseEncoder {
            enc: Encoder::with_quoted_utf8(quoted_utf8),
            writer: Some(writer),
            timeouts: self.timeouts,
        }
    }

    /// Encodes one or more complete lines with `f` and sends them as a unit.
    pub(crate) async fn write<F>(&self, f: F) -> io::Result<()>
    where
        F: FnOnce(&mut Encoder),
    {
        let mut enc = self.encoder().await;
        f(&mut enc);
        let res = enc.flush().await;
        enc.end();
        res
    }

    /// `[tag|*] SP type SP [code SP] text CRLF`
    pub(crate) async fn write_status(
        &self,
        tag: Option<&str>,
        resp: &StatusResponse,
    ) -> io::Result<()> {
        self.write(|enc| {
            enc.status_response(tag, resp).crlf();
        })
        .await
    }

    /// `+ SP text CRLF`
    pub(crate) async fn write_continuation(&self, text: &str) -> io::Result<()> {
        self.write(|enc| {
            enc.atom("+").sp().text(text).crlf();
        })
        .await
    }

    pub(crate) async fn shutdown(&self) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.io.shutdown().await
    }
}

fn deadline(timeout: std::time::Duration) -> Option<Instant> {
    non_zero(timeout).map(|t| Instant::now() + t)
}

async fn with_deadline<T>(
    deadline: Option<Instant>,
    fut: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    match deadline {
        Some(deadline) => time::timeout_at(deadline, fut)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write deadline exceeded"))?,
        None => fut.await,
    }
}

/// Exclusive access to the wire for the duration of one response.
///
/// Derefs to the wire [`Encoder`]; encoded bytes are sent by
/// [`ResponseEncoder::flush`]. Must be released with
/// [`ResponseEncoder::end`]; dropping it releases the lock as well.
pub(crate) struct ResponseEncoder<'a> {
    enc: Encoder,
    writer: Option<MutexGuard<'a, Writer>>,
    timeouts: Timeouts,
}

impl ResponseEncoder<'_> {
    fn writer(&mut self) -> io::Result<&mut Writer> {
        match self.writer.as_deref_mut() {
            Some(writer) => Ok(writer),
            None => Err(io::Error::new(io::ErrorKind::Other, "response already ended")),
        }
    }

    /// Writes out everything encoded so far under the response deadline.
    pub(crate) async fn flush(&mut self) -> io::Result<()> {
        let data = self.enc.split();
        let writer = self.writer()?;
        let deadline = writer.deadline;
        let io = &mut writer.io;
        with_deadline(deadline, async move {
            io.write_all(&data).await?;
            io.flush().await
        })
        .await
    }

    /// Sends a literal: the header under the response deadline, the body
    /// under the literal deadline. The response deadline is restored
    /// afterwards whether or not the body was written.
    pub(crate) async fn write_literal(&mut self, data: &[u8]) -> io::Result<()> {
        self.enc.literal_header(data.len() as u64);
        self.flush().await?;

        let timeouts = self.timeouts;
        let writer = self.writer()?;
        writer.deadline = deadline(timeouts.literal_write);
        let io = &mut writer.io;
        let res = with_deadline(writer.deadline, async move {
            io.write_all(data).await?;
            io.flush().await
        })
        .await;
        writer.deadline = deadline(timeouts.response_write);
        res
    }

    /// Releases the write lock.
    ///
    /// # Panics
    ///
    /// If called twice on the same encoder.
    pub(crate) fn end(&mut self) {
        match self.writer.take() {
            Some(mut writer) => writer.deadline = None,
            None => panic!("ResponseEncoder::end called twice"),
        }
    }
}

impl Deref for ResponseEncoder<'_> {
    type Target = Encoder;

    fn deref(&self) -> &Encoder {
        &self.enc
    }
}

impl DerefMut for ResponseEncoder<'_> {
    fn deref_mut(&mut self) -> &mut Encoder {
        &mut self.enc
    }
}

/// Lets a session push unsolicited mailbox updates, e.g. while idling.
/// Each call writes one complete untagged response.
#[derive(Clone)]
pub struct UpdateWriter {
    output: Arc<Output>,
    // CLOSE expunges without telling the client.
    silent_expunge: bool,
}

impl UpdateWriter {
    pub(crate) fn new(output: Arc<Output>) -> Self {
        Self {
            output,
            silent_expunge: false,
        }
    }

    pub(crate) fn silent(output: Arc<Output>) -> Self {
        Self {
            output,
            silent_expunge: true,
        }
    }

    /// `* <n> EXISTS`
    pub async fn exists(&self, num_messages: u32) -> io::Result<()> {
        self.untagged(num_messages, "EXISTS").await
    }

    /// `* <seq> EXPUNGE`
    pub async fn expunge(&self, seq: u32) -> io::Result<()> {
        if self.silent_expunge {
            return Ok(());
        }
        self.untagged(seq, "EXPUNGE").await
    }

    /// `* <seq> FETCH (FLAGS (...))`
    pub async fn flags(&self, seq: u32, flags: &[Flag]) -> io::Result<()> {
        FetchWriter::new(self.output.clone())
            .write_message(&FetchMessage {
                seq,
                items: vec![FetchItemData::Flags(flags.to_vec())],
            })
            .await
    }

    /// `* OK [ALERT] <text>`, or any other untagged status.
    pub async fn status(&self, resp: &StatusResponse) -> io::Result<()> {
        self.output.write_status(None, resp).await
    }

    async fn untagged(&self, n: u32, kind: &str) -> io::Result<()> {
        self.output
            .write(|enc| {
                enc.atom("*").sp().number(n).sp().atom(kind).crlf();
            })
            .await
    }
}

/// Writes the `FETCH` responses of a FETCH or STORE command.
pub struct FetchWriter {
    output: Arc<Output>,
}

impl FetchWriter {
    pub(crate) fn new(output: Arc<Output>) -> Self {
        Self { output }
    }

    /// `* <seq> FETCH (<items>)`. Body sections are streamed as literals.
    pub async fn write_message(&self, msg: &FetchMessage) -> io::Result<()> {
        let mut enc = self.output.encoder().await;
        let res = Self::encode(&mut enc, msg).await;
        enc.end();
        res
    }

    async fn encode(enc: &mut ResponseEncoder<'_>, msg: &FetchMessage) -> io::Result<()> {
        enc.atom("*").sp().number(msg.seq).sp().atom("FETCH").sp().special(b'(');
        for (i, item) in msg.items.iter().enumerate() {
            if i > 0 {
                enc.sp();
            }
            match item {
                FetchItemData::BodySection {
                    section,
                    origin,
                    data,
                } => {
                    enc.body_section(section, *origin).sp();
                    enc.write_literal(data).await?;
                }
                item => {
                    enc.fetch_item(item);
                }
            }
        }
        enc.special(b')').crlf();
        enc.flush().await
    }
}
