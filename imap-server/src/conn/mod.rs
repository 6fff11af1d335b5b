//! The per-connection protocol engine: greeting, command loop, dispatch
//! and connection state.

use std::any::Any;
use std::backtrace::Backtrace;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{debug, error, warn};

use imap_wire::{
    Cap, CapSet, ConnState, DecodeError, Decoder, Flag, LiteralInfo, NumKind, ResponseCode,
    StatusResponse,
};

use crate::encoder::Output;
use crate::error::{Error, Result};
use crate::options::{non_zero, ConnInfo, Options};
use crate::session::Session;
use crate::transport::Link;

mod auth;
mod mailbox;
mod message;

pub(crate) type CommandDecoder = Decoder<Link>;

/// Ceiling for literals read into memory as part of a command line, and for
/// non-synchronizing literals in general (LITERAL-).
const MAX_BUFFERED_LITERAL: u64 = 4096;

fn internal_server_error() -> StatusResponse {
    StatusResponse::no("Internal server error").with_code(ResponseCode::ServerBug)
}

/// How a command handler finished.
pub(crate) enum Completion {
    /// Send `<tag> OK <NAME> completed`.
    Ok,
    /// Same, with a response code.
    OkWith(ResponseCode),
    /// The handler already wrote its tagged response.
    Replied,
}

pub(crate) struct Conn {
    options: Arc<Options>,
    link: Link,
    output: Arc<Output>,
    state: ConnState,
    session: Box<dyn Session>,
}

/// Runs a connection to completion. Never fails: errors and panics are
/// logged and the connection is closed.
pub(crate) async fn serve(options: Arc<Options>, link: Link, info: ConnInfo) {
    let output = Arc::new(Output::new(link.clone(), options.timeouts));

    let created = panic::catch_unwind(AssertUnwindSafe(|| (options.new_session)(&info)));
    let session = match created {
        Ok(Ok(session)) => Some(session),
        Ok(Err(err)) => {
            let resp = match err {
                Error::Status(resp) => resp,
                err => {
                    error!(%err, "failed to create session");
                    internal_server_error()
                }
            };
            if let Err(err) = output.write_status(None, &resp).await {
                warn!(%err, "failed to write greeting");
            }
            None
        }
        Err(panic) => {
            error!(panic = panic_message(&*panic), "panic creating session");
            None
        }
    };

    if let Some(session) = session {
        let mut conn = Conn {
            options,
            link,
            output: output.clone(),
            state: ConnState::NotAuthenticated,
            session,
        };
        if let Err(panic) = AssertUnwindSafe(conn.run()).catch_unwind().await {
            error!(
                panic = panic_message(&*panic),
                backtrace = %Backtrace::capture(),
                "panic handling command"
            );
        }
        if let Err(err) = conn.session.close().await {
            warn!(%err, "failed to close session");
        }
    }

    if let Err(err) = output.shutdown().await {
        debug!(%err, "failed to shut down connection");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "Box<dyn Any>"
    }
}

impl Conn {
    async fn run(&mut self) {
        if let Err(err) = self.write_greeting().await {
            warn!(%err, "failed to write greeting");
            return;
        }

        let output = self.output.clone();
        let mut dec = Decoder::new(self.link.clone()).with_literal_check(Box::new(
            move |info: LiteralInfo| {
                let output = output.clone();
                async move { check_buffered_literal(&output, info).await }.boxed()
            },
        ));

        let timeouts = self.options.timeouts;
        loop {
            let read_timeout = match self.state {
                ConnState::Authenticated | ConnState::Selected => timeouts.idle_read,
                _ => timeouts.command_read,
            };
            dec.set_read_timeout(non_zero(read_timeout));

            if self.state == ConnState::Logout {
                break;
            }
            match dec.eof().await {
                Ok(false) => {}
                Ok(true) => break,
                Err(err) => {
                    debug!(%err, "connection lost while waiting for a command");
                    break;
                }
            }

            dec.set_read_timeout(non_zero(timeouts.command_read));
            if let Err(err) = self.read_command(&mut dec).await {
                warn!(%err, "failed to read command");
                break;
            }
        }
    }

    /// Reads and handles one command. Errors returned from here are fatal
    /// to the connection; everything else has been answered on the wire.
    async fn read_command(&mut self, dec: &mut CommandDecoder) -> Result<()> {
        let tag = dec.expect_atom().await.map_err(in_command)?;
        dec.expect_sp().await.map_err(in_command)?;
        let mut name = dec.expect_atom().await.map_err(in_command)?;
        name.make_ascii_uppercase();

        let mut kind = NumKind::Seq;
        if name == "UID" {
            dec.expect_sp().await.map_err(in_command)?;
            let sub = dec.expect_atom().await.map_err(in_command)?;
            name = format!("UID {}", sub.to_ascii_uppercase());
            kind = NumKind::Uid;
        }

        let res = match name.as_str() {
            "NOOP" => self.handle_noop(dec).await,
            "LOGOUT" => self.handle_logout(dec).await,
            "CAPABILITY" => self.handle_capability(dec).await,
            "STARTTLS" => self.handle_starttls(&tag, dec).await,
            "AUTHENTICATE" => self.handle_authenticate(dec).await,
            "LOGIN" => self.handle_login(dec).await,
            "ENABLE" => self.handle_enable(dec).await,
            "CREATE" => self.handle_create(dec).await,
            "DELETE" => self.handle_delete(dec).await,
            "RENAME" => self.handle_rename(dec).await,
            "SUBSCRIBE" => self.handle_subscribe(dec).await,
            "UNSUBSCRIBE" => self.handle_unsubscribe(dec).await,
            "STATUS" => self.handle_status(dec).await,
            "LIST" => self.handle_list(dec).await,
            "NAMESPACE" => self.handle_namespace(dec).await,
            "IDLE" => self.handle_idle(dec).await,
            "SELECT" | "EXAMINE" => self.handle_select(dec, name == "EXAMINE").await,
            "CLOSE" | "UNSELECT" => self.handle_unselect(dec, name == "CLOSE").await,
            "APPEND" => self.handle_append(&tag, dec).await,
            "FETCH" | "UID FETCH" => self.handle_fetch(dec, kind).await,
            "EXPUNGE" => self.handle_expunge(dec).await,
            "UID EXPUNGE" => self.handle_uid_expunge(dec).await,
            "STORE" | "UID STORE" => self.handle_store(dec, kind).await,
            "COPY" | "UID COPY" => self.handle_copy(&tag, dec, kind).await,
            "MOVE" | "UID MOVE" => self.handle_move(dec, kind).await,
            "SEARCH" | "UID SEARCH" => self.handle_search(dec, kind).await,
            _ => {
                dec.discard_line().await;
                Err(Error::bad("Unknown command"))
            }
        };

        let resp = match res {
            Ok(Completion::Replied) => return Ok(()),
            Ok(Completion::Ok) => StatusResponse::ok(format!("{name} completed")),
            Ok(Completion::OkWith(code)) => {
                StatusResponse::ok(format!("{name} completed")).with_code(code)
            }
            Err(Error::Status(resp)) | Err(Error::Decode(DecodeError::Rejected(resp))) => resp,
            Err(Error::Decode(DecodeError::Aborted(resp))) => {
                // The client is sending a literal we refused, so nothing
                // after this point can be framed.
                self.output.write_status(Some(&tag), &resp).await?;
                return Err(Error::Status(resp));
            }
            Err(Error::Decode(DecodeError::Expect(err))) => {
                dec.discard_line().await;
                StatusResponse::bad(format!("Syntax error: {}", err.message))
                    .with_code(ResponseCode::ClientBug)
            }
            Err(err) => {
                error!(command = %name, %err, "failed to handle command");
                internal_server_error()
            }
        };
        self.output.write_status(Some(&tag), &resp).await?;
        Ok(())
    }

    fn check_state(&self, required: ConnState) -> Result<()> {
        if required == ConnState::Authenticated && self.state == ConnState::Selected {
            return Ok(());
        }
        if self.state != required {
            return Err(Error::client_bug(format!(
                "This command is only valid in the {required} state"
            )));
        }
        Ok(())
    }

    fn can_auth(&self) -> bool {
        self.state == ConnState::NotAuthenticated
            && (self.link.is_encrypted() || self.options.insecure_auth)
    }

    fn can_start_tls(&self) -> bool {
        self.options.tls.is_some()
            && self.state == ConnState::NotAuthenticated
            && !self.link.is_encrypted()
    }

    /// Capabilities advertised in the current connection state.
    fn available_caps(&self) -> CapSet {
        let caps = &self.options.caps;
        let rev2 = caps.has(&Cap::IMAP4REV2);
        let rev1 = caps.has(&Cap::IMAP4REV1) || !rev2;

        let mut avail = CapSet::new();
        if rev2 {
            avail.insert(Cap::IMAP4REV2);
        }
        if rev1 {
            avail.insert(Cap::IMAP4REV1);
            avail.insert(Cap::SASL_IR);
            avail.insert(Cap::LITERAL_MINUS);
        }
        if self.can_start_tls() {
            avail.insert(Cap::STARTTLS);
        }

        match self.state {
            ConnState::NotAuthenticated => {
                if self.can_auth() {
                    avail.insert(Cap::auth("PLAIN"));
                } else {
                    avail.insert(Cap::LOGINDISABLED);
                }
            }
            ConnState::Authenticated | ConnState::Selected => {
                // Part of IMAP4rev2 already.
                if rev1 {
                    avail.insert(Cap::UNSELECT);
                    avail.insert(Cap::ENABLE);
                    avail.insert(Cap::IDLE);
                }
                for cap in [Cap::NAMESPACE, Cap::UIDPLUS, Cap::MOVE, Cap::UTF8_ACCEPT] {
                    if caps.has(&cap) {
                        avail.insert(cap);
                    }
                }
            }
            ConnState::Logout => {}
        }
        avail
    }

    async fn write_greeting(&mut self) -> io::Result<()> {
        let caps = self.available_caps();
        let text = if self.options.caps.has(&Cap::IMAP4REV2) {
            "IMAP4rev2 server ready"
        } else {
            "IMAP4rev1 server ready"
        };
        self.output
            .write(|enc| {
                enc.atom("*").sp().atom("OK").sp().special(b'[').atom("CAPABILITY");
                for cap in &caps {
                    enc.sp().atom(cap.as_str());
                }
                enc.special(b']').sp().text(text).crlf();
            })
            .await
    }
}

fn in_command(err: DecodeError) -> Error {
    Error::other(format!("in command: {err}"))
}

/// Answers a literal header: refuses oversized non-synchronizing literals,
/// and sends the continuation request a synchronizing literal waits for.
async fn accept_literal(output: &Output, info: LiteralInfo) -> Result<(), DecodeError> {
    if info.non_sync && info.size > MAX_BUFFERED_LITERAL {
        return Err(DecodeError::Aborted(StatusResponse::bad(
            "Non-synchronizing literals are limited to 4096 bytes",
        )));
    }
    if info.non_sync {
        return Ok(());
    }
    output.write_continuation("Ready for literal data").await?;
    Ok(())
}

/// The decoder's literal check, for literals that are part of a command's
/// arguments rather than its payload.
async fn check_buffered_literal(output: &Output, info: LiteralInfo) -> Result<(), DecodeError> {
    if info.size > MAX_BUFFERED_LITERAL && !info.non_sync {
        return Err(DecodeError::Rejected(
            StatusResponse::no("Literals are limited to 4096 bytes for this command")
                .with_code(ResponseCode::TooBig),
        ));
    }
    accept_literal(output, info).await
}

// flag-list = "(" [flag *(SP flag)] ")"
async fn read_flag_list(dec: &mut CommandDecoder) -> Result<Vec<Flag>, DecodeError> {
    dec.expect_special(b'(').await?;
    let mut flags = Vec::new();
    if dec.special(b')').await? {
        return Ok(flags);
    }
    loop {
        flags.push(dec.expect_flag().await?);
        if !dec.sp().await? {
            break;
        }
    }
    dec.expect_special(b')').await?;
    Ok(flags)
}

#[cfg(test)]
mod tests;
