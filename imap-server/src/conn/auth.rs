use std::io;
use std::str;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::time;
use tracing::debug;

use imap_wire::{Cap, CapSet, ConnState, ResponseCode, StatusResponse};

use super::{CommandDecoder, Completion, Conn};
use crate::error::{Error, Result};
use crate::options::non_zero;

fn privacy_required() -> Error {
    Error::Status(
        StatusResponse::no("TLS is required to authenticate").with_code(ResponseCode::PrivacyRequired),
    )
}

// authzid NUL authcid NUL passwd
fn parse_plain(msg: &[u8]) -> Option<(&str, &str, &str)> {
    let mut parts = msg.split(|b| *b == 0);
    let authzid = str::from_utf8(parts.next()?).ok()?;
    let authcid = str::from_utf8(parts.next()?).ok()?;
    let passwd = str::from_utf8(parts.next()?).ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((authzid, authcid, passwd))
}

impl Conn {
    pub(super) async fn handle_noop(&mut self, dec: &mut CommandDecoder) -> Result<Completion> {
        dec.expect_crlf().await?;
        Ok(Completion::Ok)
    }

    pub(super) async fn handle_logout(&mut self, dec: &mut CommandDecoder) -> Result<Completion> {
        dec.expect_crlf().await?;
        self.state = ConnState::Logout;
        self.output
            .write_status(None, &StatusResponse::bye("Logging out"))
            .await?;
        Ok(Completion::Ok)
    }

    pub(super) async fn handle_capability(
        &mut self,
        dec: &mut CommandDecoder,
    ) -> Result<Completion> {
        dec.expect_crlf().await?;
        let caps = self.available_caps();
        self.output
            .write(|enc| {
                enc.atom("*").sp().atom("CAPABILITY");
                for cap in &caps {
                    enc.sp().atom(cap.as_str());
                }
                enc.crlf();
            })
            .await?;
        Ok(Completion::Ok)
    }

    pub(super) async fn handle_starttls(
        &mut self,
        tag: &str,
        dec: &mut CommandDecoder,
    ) -> Result<Completion> {
        dec.expect_crlf().await?;
        let acceptor = match &self.options.tls {
            Some(acceptor) => acceptor.clone(),
            None => return Err(Error::no("STARTTLS not supported")),
        };
        if !self.can_start_tls() {
            return Err(Error::bad("STARTTLS not available"));
        }
        // Anything the client sent after STARTTLS was sent in plaintext and
        // must not be interpreted once the connection is encrypted.
        if dec.buffered() > 0 {
            dec.discard_buffered();
            return Err(Error::bad("STARTTLS must be the last command in a pipeline"));
        }

        let handshake_timeout = non_zero(self.options.timeouts.command_read);
        let mut enc = self.output.encoder().await;
        enc.status_response(Some(tag), &StatusResponse::ok("Begin TLS negotiation now"))
            .crlf();
        let mut res = enc.flush().await;
        if res.is_ok() {
            let upgrade = self.link.upgrade(&acceptor);
            res = match handshake_timeout {
                Some(timeout) => time::timeout(timeout, upgrade).await.unwrap_or_else(|_| {
                    Err(io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out"))
                }),
                None => upgrade.await,
            };
        }
        enc.end();
        res?;
        debug!("connection upgraded to TLS");
        Ok(Completion::Replied)
    }

    pub(super) async fn handle_authenticate(
        &mut self,
        dec: &mut CommandDecoder,
    ) -> Result<Completion> {
        dec.expect_sp().await?;
        let mechanism = dec.expect_atom().await?.to_ascii_uppercase();
        let initial_response = if dec.sp().await? {
            Some(dec.expect_atom().await?)
        } else {
            None
        };
        dec.expect_crlf().await?;

        self.check_state(ConnState::NotAuthenticated)?;
        if !self.can_auth() {
            return Err(privacy_required());
        }
        if mechanism != "PLAIN" {
            return Err(Error::no("SASL mechanism not supported"));
        }

        let encoded = match initial_response {
            Some(ir) => ir,
            None => {
                self.output.write_continuation("").await?;
                dec.read_line().await?
            }
        };
        if encoded == "*" {
            return Err(Error::bad("AUTHENTICATE cancelled"));
        }
        let msg = if encoded == "=" {
            Vec::new()
        } else {
            STANDARD
                .decode(encoded.as_bytes())
                .map_err(|_| Error::bad("Invalid base64 data"))?
        };
        let (authzid, username, password) =
            parse_plain(&msg).ok_or_else(|| Error::bad("Malformed PLAIN message"))?;
        if !authzid.is_empty() && authzid != username {
            return Err(Error::Status(
                StatusResponse::no("Cannot authorize as a different identity")
                    .with_code(ResponseCode::AuthorizationFailed),
            ));
        }

        self.session.login(username, password).await?;
        self.state = ConnState::Authenticated;
        Ok(Completion::Ok)
    }

    pub(super) async fn handle_login(&mut self, dec: &mut CommandDecoder) -> Result<Completion> {
        dec.expect_sp().await?;
        let username = dec.expect_astring().await?;
        dec.expect_sp().await?;
        let password = dec.expect_astring().await?;
        dec.expect_crlf().await?;

        self.check_state(ConnState::NotAuthenticated)?;
        if !self.can_auth() {
            return Err(privacy_required());
        }
        self.session.login(&username, &password).await?;
        self.state = ConnState::Authenticated;
        Ok(Completion::Ok)
    }

    pub(super) async fn handle_enable(&mut self, dec: &mut CommandDecoder) -> Result<Completion> {
        let mut requested = Vec::new();
        dec.expect_sp().await?;
        loop {
            requested.push(Cap::new(dec.expect_atom().await?));
            if !dec.sp().await? {
                break;
            }
        }
        dec.expect_crlf().await?;
        self.check_state(ConnState::Authenticated)?;

        let mut enabled = CapSet::new();
        for cap in requested {
            let Some(known) = [Cap::IMAP4REV2, Cap::UTF8_ACCEPT]
                .into_iter()
                .find(|known| known.matches(&cap))
            else {
                continue;
            };
            if self.options.caps.has(&known) && self.output.enable(known.clone()) {
                enabled.insert(known);
            }
        }

        self.output
            .write(|enc| {
                enc.atom("*").sp().atom("ENABLED");
                for cap in &enabled {
                    enc.sp().atom(cap.as_str());
                }
                enc.crlf();
            })
            .await?;
        Ok(Completion::Ok)
    }
}
