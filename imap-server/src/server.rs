use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::time;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::conn;
use crate::options::{non_zero, ConnInfo, Options};
use crate::transport::{Io, Link};

/// Accepts IMAP connections and runs each one on its own task.
#[derive(Clone, Debug)]
pub struct Server {
    options: Arc<Options>,
}

impl Server {
    pub fn new(options: Options) -> Self {
        Self {
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Serves plaintext connections from `listener`, with STARTTLS if
    /// [`Options::tls`] is set. Only returns when accepting fails.
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        info!(addr = ?listener.local_addr().ok(), "listening");
        loop {
            let (stream, peer_addr) = match accept(&listener).await? {
                Some(accepted) => accepted,
                None => continue,
            };
            let info = ConnInfo {
                peer_addr: Some(peer_addr),
                tls: false,
            };
            tokio::spawn(
                conn::serve(self.options.clone(), Link::new(Box::new(stream)), info)
                    .instrument(info_span!("conn", peer = %peer_addr)),
            );
        }
    }

    /// Serves connections that are encrypted from the first byte (IMAPS).
    pub async fn serve_tls(&self, listener: TcpListener, acceptor: TlsAcceptor) -> io::Result<()> {
        info!(addr = ?listener.local_addr().ok(), "listening with TLS");
        loop {
            let (stream, peer_addr) = match accept(&listener).await? {
                Some(accepted) => accepted,
                None => continue,
            };
            let options = self.options.clone();
            let acceptor = acceptor.clone();
            let task = async move {
                let handshake = acceptor.accept(Box::new(stream) as Box<dyn Io>);
                let res = match non_zero(options.timeouts.command_read) {
                    Some(timeout) => match time::timeout(timeout, handshake).await {
                        Ok(res) => res,
                        Err(_) => Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "TLS handshake timed out",
                        )),
                    },
                    None => handshake.await,
                };
                let tls = match res {
                    Ok(tls) => tls,
                    Err(err) => {
                        debug!(%err, "TLS handshake failed");
                        return;
                    }
                };
                let info = ConnInfo {
                    peer_addr: Some(peer_addr),
                    tls: true,
                };
                conn::serve(options, Link::encrypted(tls), info).await;
            };
            tokio::spawn(task.instrument(info_span!("conn", peer = %peer_addr)));
        }
    }

    /// Serves a single connection over an arbitrary stream, on the current
    /// task.
    pub async fn serve_conn(&self, io: impl Io + 'static, info: ConnInfo) {
        conn::serve(self.options.clone(), Link::new(Box::new(io)), info).await;
    }
}

// Errors tied to a single incoming connection are skipped; anything else
// means the listener itself is broken.
async fn accept(listener: &TcpListener) -> io::Result<Option<(TcpStream, SocketAddr)>> {
    match listener.accept().await {
        Ok(accepted) => Ok(Some(accepted)),
        Err(err)
            if matches!(
                err.kind(),
                io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::Interrupted
            ) =>
        {
            warn!(%err, "failed to accept connection");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}
