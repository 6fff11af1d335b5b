use std::io;

use tokio::sync::oneshot;

use imap_wire::{
    AppendData, AppendOptions, ConnState, DecodeError, Encoder, NamespaceDescriptor,
    ResponseCode, SelectOptions, StatusOptions, StatusResponse,
};

use super::{accept_literal, read_flag_list, CommandDecoder, Completion, Conn};
use crate::encoder::UpdateWriter;
use crate::error::{Error, Result};
use crate::options::non_zero;

fn delim(enc: &mut Encoder, delim: Option<char>) {
    match delim {
        Some(c) => {
            let mut buf = [0; 4];
            enc.quoted(c.encode_utf8(&mut buf));
        }
        None => {
            enc.nil();
        }
    }
}

// Namespace = nil / "(" 1*Namespace-Descr ")"
fn namespace(enc: &mut Encoder, descriptors: &[NamespaceDescriptor]) {
    if descriptors.is_empty() {
        enc.nil();
        return;
    }
    enc.special(b'(');
    for desc in descriptors {
        enc.special(b'(').string(&desc.prefix).sp();
        delim(enc, desc.delim);
        enc.special(b')');
    }
    enc.special(b')');
}

impl Conn {
    pub(super) async fn handle_create(&mut self, dec: &mut CommandDecoder) -> Result<Completion> {
        dec.expect_sp().await?;
        let name = dec.expect_mailbox().await?;
        dec.expect_crlf().await?;
        self.check_state(ConnState::Authenticated)?;
        self.session.create(&name).await?;
        Ok(Completion::Ok)
    }

    pub(super) async fn handle_delete(&mut self, dec: &mut CommandDecoder) -> Result<Completion> {
        dec.expect_sp().await?;
        let name = dec.expect_mailbox().await?;
        dec.expect_crlf().await?;
        self.check_state(ConnState::Authenticated)?;
        self.session.delete(&name).await?;
        Ok(Completion::Ok)
    }

    pub(super) async fn handle_rename(&mut self, dec: &mut CommandDecoder) -> Result<Completion> {
        dec.expect_sp().await?;
        let old_name = dec.expect_mailbox().await?;
        dec.expect_sp().await?;
        let new_name = dec.expect_mailbox().await?;
        dec.expect_crlf().await?;
        self.check_state(ConnState::Authenticated)?;
        self.session.rename(&old_name, &new_name).await?;
        Ok(Completion::Ok)
    }

    pub(super) async fn handle_subscribe(
        &mut self,
        dec: &mut CommandDecoder,
    ) -> Result<Completion> {
        dec.expect_sp().await?;
        let name = dec.expect_mailbox().await?;
        dec.expect_crlf().await?;
        self.check_state(ConnState::Authenticated)?;
        self.session.subscribe(&name).await?;
        Ok(Completion::Ok)
    }

    pub(super) async fn handle_unsubscribe(
        &mut self,
        dec: &mut CommandDecoder,
    ) -> Result<Completion> {
        dec.expect_sp().await?;
        let name = dec.expect_mailbox().await?;
        dec.expect_crlf().await?;
        self.check_state(ConnState::Authenticated)?;
        self.session.unsubscribe(&name).await?;
        Ok(Completion::Ok)
    }

    pub(super) async fn handle_status(&mut self, dec: &mut CommandDecoder) -> Result<Completion> {
        dec.expect_sp().await?;
        let mailbox = dec.expect_mailbox().await?;
        dec.expect_sp().await?;
        dec.expect_special(b'(').await?;
        let mut options = StatusOptions::default();
        loop {
            let item = dec.expect_atom().await?.to_ascii_uppercase();
            match item.as_str() {
                "MESSAGES" => options.messages = true,
                "UIDNEXT" => options.uid_next = true,
                "UIDVALIDITY" => options.uid_validity = true,
                "UNSEEN" => options.unseen = true,
                "DELETED" => options.deleted = true,
                "SIZE" => options.size = true,
                "RECENT" => options.recent = true,
                _ => return Err(DecodeError::expected("status item").into()),
            }
            if !dec.sp().await? {
                break;
            }
        }
        dec.expect_special(b')').await?;
        dec.expect_crlf().await?;
        self.check_state(ConnState::Authenticated)?;

        let data = self.session.status(&mailbox, &options).await?;
        let name = if data.mailbox.is_empty() {
            &mailbox
        } else {
            &data.mailbox
        };
        let items = [
            ("MESSAGES", data.messages.map(u64::from)),
            ("UIDNEXT", data.uid_next.map(u64::from)),
            ("UIDVALIDITY", data.uid_validity.map(u64::from)),
            ("UNSEEN", data.unseen.map(u64::from)),
            ("DELETED", data.deleted.map(u64::from)),
            ("SIZE", data.size),
            ("RECENT", data.recent.map(u64::from)),
        ];
        self.output
            .write(|enc| {
                enc.atom("*").sp().atom("STATUS").sp().mailbox(name).sp();
                enc.special(b'(');
                let present = items.iter().filter_map(|(item, n)| n.map(|n| (*item, n)));
                for (i, (item, n)) in present.enumerate() {
                    if i > 0 {
                        enc.sp();
                    }
                    enc.atom(item).sp().number_64(n);
                }
                enc.special(b')').crlf();
            })
            .await?;
        Ok(Completion::Ok)
    }

    pub(super) async fn handle_list(&mut self, dec: &mut CommandDecoder) -> Result<Completion> {
        dec.expect_sp().await?;
        let reference = dec.expect_mailbox().await?;
        dec.expect_sp().await?;
        let mut patterns = Vec::new();
        if dec.special(b'(').await? {
            loop {
                patterns.push(dec.expect_list_mailbox().await?);
                if !dec.sp().await? {
                    break;
                }
            }
            dec.expect_special(b')').await?;
        } else {
            patterns.push(dec.expect_list_mailbox().await?);
        }
        dec.expect_crlf().await?;
        self.check_state(ConnState::Authenticated)?;

        let entries = self.session.list(&reference, &patterns).await?;
        for entry in &entries {
            self.output
                .write(|enc| {
                    enc.atom("*").sp().atom("LIST").sp().special(b'(');
                    for (i, attr) in entry.attrs.iter().enumerate() {
                        if i > 0 {
                            enc.sp();
                        }
                        enc.atom(attr);
                    }
                    enc.special(b')').sp();
                    delim(enc, entry.delim);
                    enc.sp().mailbox(&entry.mailbox).crlf();
                })
                .await?;
        }
        Ok(Completion::Ok)
    }

    pub(super) async fn handle_namespace(
        &mut self,
        dec: &mut CommandDecoder,
    ) -> Result<Completion> {
        dec.expect_crlf().await?;
        self.check_state(ConnState::Authenticated)?;

        let data = self.session.namespace().await?;
        self.output
            .write(|enc| {
                enc.atom("*").sp().atom("NAMESPACE").sp();
                namespace(enc, &data.personal);
                enc.sp();
                namespace(enc, &data.other);
                enc.sp();
                namespace(enc, &data.shared);
                enc.crlf();
            })
            .await?;
        Ok(Completion::Ok)
    }

    pub(super) async fn handle_idle(&mut self, dec: &mut CommandDecoder) -> Result<Completion> {
        dec.expect_crlf().await?;
        self.check_state(ConnState::Authenticated)?;
        self.output.write_continuation("idling").await?;

        let writer = UpdateWriter::new(self.output.clone());
        let (stop_tx, stop_rx) = oneshot::channel();
        let idle_timeout = non_zero(self.options.timeouts.idle_read);
        let dec = &mut *dec;
        let done = async move {
            dec.set_read_timeout(idle_timeout);
            let line = dec.read_line().await;
            let _ = stop_tx.send(());
            line
        };
        let (idled, line) = tokio::join!(self.session.idle(&writer, stop_rx), done);

        match line {
            Ok(line) if line.eq_ignore_ascii_case("DONE") => {}
            Ok(_) => {
                return Err(Error::client_bug(
                    "Syntax error: expected DONE to end IDLE command",
                ))
            }
            Err(DecodeError::Io(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
                return Ok(Completion::Replied)
            }
            Err(err) => return Err(err.into()),
        }
        idled?;
        Ok(Completion::Ok)
    }

    pub(super) async fn handle_select(
        &mut self,
        dec: &mut CommandDecoder,
        read_only: bool,
    ) -> Result<Completion> {
        dec.expect_sp().await?;
        let mailbox = dec.expect_mailbox().await?;
        dec.expect_crlf().await?;
        self.check_state(ConnState::Authenticated)?;

        if self.state == ConnState::Selected {
            self.session.unselect().await?;
            self.state = ConnState::Authenticated;
            let closed = StatusResponse::ok("Previous mailbox is now closed")
                .with_code(ResponseCode::Closed);
            self.output.write_status(None, &closed).await?;
        }

        let data = self
            .session
            .select(&mailbox, &SelectOptions { read_only })
            .await?;
        let permanent_flags = StatusResponse::ok("Permanent flags")
            .with_code(ResponseCode::PermanentFlags(data.permanent_flags.clone()));
        let uid_validity =
            StatusResponse::ok("UIDs valid").with_code(ResponseCode::UidValidity(data.uid_validity));
        let uid_next =
            StatusResponse::ok("Predicted next UID").with_code(ResponseCode::UidNext(data.uid_next));
        self.output
            .write(|enc| {
                enc.atom("*").sp().atom("FLAGS").sp().flag_list(&data.flags).crlf();
                enc.status_response(None, &permanent_flags).crlf();
                enc.atom("*").sp().number(data.num_messages).sp().atom("EXISTS").crlf();
                enc.status_response(None, &uid_validity).crlf();
                enc.status_response(None, &uid_next).crlf();
            })
            .await?;

        self.state = ConnState::Selected;
        let code = if read_only || data.read_only {
            ResponseCode::ReadOnly
        } else {
            ResponseCode::ReadWrite
        };
        Ok(Completion::OkWith(code))
    }

    pub(super) async fn handle_unselect(
        &mut self,
        dec: &mut CommandDecoder,
        expunge: bool,
    ) -> Result<Completion> {
        dec.expect_crlf().await?;
        self.check_state(ConnState::Selected)?;
        if expunge {
            let writer = UpdateWriter::silent(self.output.clone());
            self.session.expunge(&writer, None).await?;
        }
        self.session.unselect().await?;
        self.state = ConnState::Authenticated;
        Ok(Completion::Ok)
    }

    pub(super) async fn handle_append(
        &mut self,
        tag: &str,
        dec: &mut CommandDecoder,
    ) -> Result<Completion> {
        dec.expect_sp().await?;
        let mailbox = dec.expect_mailbox().await?;
        dec.expect_sp().await?;

        let mut options = AppendOptions::default();
        if dec.peek().await? == Some(b'(') {
            options.flags = read_flag_list(dec).await?;
            dec.expect_sp().await?;
        }
        if dec.peek().await? == Some(b'"') {
            options.time = Some(dec.expect_date_time().await?);
            dec.expect_sp().await?;
        }

        // The message is read without the decoder's literal check: it has
        // its own size limit and deadline.
        let info = dec.expect_literal_header().await?;
        if info.size > self.options.append_limit {
            let resp = StatusResponse::no("Message exceeds the size limit")
                .with_code(ResponseCode::TooBig);
            return Err(if info.non_sync {
                DecodeError::Aborted(resp)
            } else {
                DecodeError::Rejected(resp)
            }
            .into());
        }
        accept_literal(&self.output, info).await?;
        dec.set_read_timeout(non_zero(self.options.timeouts.literal_read));
        let message = dec.read_literal(info.size).await?;
        dec.set_read_timeout(non_zero(self.options.timeouts.command_read));
        dec.expect_crlf().await?;

        self.check_state(ConnState::Authenticated)?;
        let AppendData { uid_validity, uid } =
            self.session.append(&mailbox, message, &options).await?;

        let mut resp = StatusResponse::ok("APPEND completed");
        if uid_validity != 0 && uid != 0 {
            resp = resp.with_code(ResponseCode::AppendUid { uid_validity, uid });
        }
        self.output.write_status(Some(tag), &resp).await?;
        Ok(Completion::Replied)
    }
}
