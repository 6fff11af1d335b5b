use std::io;
use std::mem;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

/// Any byte stream a connection can be served over.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

enum Stream {
    Plain(Box<dyn Io>),
    Tls(Box<TlsStream<Box<dyn Io>>>),
    Upgrading,
    Closed,
}

/// A connection's byte stream, shared between the command reader and the
/// response writer. Each handle reads and writes the same underlying
/// stream, which STARTTLS can swap for an encrypted one in place.
#[derive(Clone)]
pub(crate) struct Link {
    stream: Arc<Mutex<Stream>>,
}

impl Link {
    pub(crate) fn new(io: Box<dyn Io>) -> Self {
        Self::from_stream(Stream::Plain(io))
    }

    pub(crate) fn encrypted(tls: TlsStream<Box<dyn Io>>) -> Self {
        Self::from_stream(Stream::Tls(Box::new(tls)))
    }

    fn from_stream(stream: Stream) -> Self {
        Self {
            stream: Arc::new(Mutex::new(stream)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Stream> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_encrypted(&self) -> bool {
        matches!(*self.lock(), Stream::Tls(_))
    }

    /// Runs the server side of a TLS handshake over the current plaintext
    /// stream. On failure the link is left closed.
    pub(crate) async fn upgrade(&self, acceptor: &TlsAcceptor) -> io::Result<()> {
        let plain = {
            let mut stream = self.lock();
            match mem::replace(&mut *stream, Stream::Upgrading) {
                Stream::Plain(io) => io,
                other => {
                    *stream = other;
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        "connection is not in plaintext mode",
                    ));
                }
            }
        };

        match acceptor.accept(plain).await {
            Ok(tls) => {
                *self.lock() = Stream::Tls(Box::new(tls));
                Ok(())
            }
            Err(err) => {
                *self.lock() = Stream::Closed;
                Err(err)
            }
        }
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection unavailable")
}

impl AsyncRead for Link {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self.lock() {
            Stream::Plain(io) => Pin::new(io).poll_read(cx, buf),
            Stream::Tls(tls) => Pin::new(tls).poll_read(cx, buf),
            Stream::Upgrading | Stream::Closed => Poll::Ready(Err(not_connected())),
        }
    }
}

impl AsyncWrite for Link {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self.lock() {
            Stream::Plain(io) => Pin::new(io).poll_write(cx, buf),
            Stream::Tls(tls) => Pin::new(tls).poll_write(cx, buf),
            Stream::Upgrading | Stream::Closed => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self.lock() {
            Stream::Plain(io) => Pin::new(io).poll_flush(cx),
            Stream::Tls(tls) => Pin::new(tls).poll_flush(cx),
            Stream::Upgrading | Stream::Closed => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self.lock() {
            Stream::Plain(io) => Pin::new(io).poll_shutdown(cx),
            Stream::Tls(tls) => Pin::new(tls).poll_shutdown(cx),
            Stream::Upgrading | Stream::Closed => Poll::Ready(Ok(())),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn test_handles_share_the_stream() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = Link::new(Box::new(server));
        let mut writer = reader.clone();
        assert!(!reader.is_encrypted());

        writer.write_all(b"* OK\r\n").await.unwrap();
        let mut buf = [0; 6];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"* OK\r\n");

        client.write_all(b"a NOOP\r\n").await.unwrap();
        let mut buf = [0; 8];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"a NOOP\r\n");
    }
}
