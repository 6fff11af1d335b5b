use chrono::NaiveDate;
use futures_util::future::{BoxFuture, FutureExt};

use imap_wire::{
    ConnState, DecodeError, FetchBodySection, FetchItem, FetchOptions, NumKind, ResponseCode,
    SearchKey, SectionPartial, StatusResponse, StoreAction, StoreFlags,
};

use super::{read_flag_list, CommandDecoder, Completion, Conn};
use crate::encoder::{FetchWriter, UpdateWriter};
use crate::error::Result;

// fetch-att = "ENVELOPE" / "FLAGS" / "INTERNALDATE" / "RFC822.SIZE" / "UID" /
//             "BODY" ["." "PEEK"] section ["<" number "." nz-number ">"]
// plus the ALL / FAST macros. FULL and BODYSTRUCTURE need body structures,
// which sessions do not produce, so they are rejected.
async fn read_fetch_att(
    dec: &mut CommandDecoder,
    items: &mut Vec<FetchItem>,
) -> Result<(), DecodeError> {
    let name = dec.expect_atom().await?.to_ascii_uppercase();
    let (base, section) = match name.split_once('[') {
        Some((base, section)) => (base, Some(section.to_owned())),
        None => (name.as_str(), None),
    };
    match (base, section) {
        ("ALL", None) => items.extend([
            FetchItem::Flags,
            FetchItem::InternalDate,
            FetchItem::Rfc822Size,
            FetchItem::Envelope,
        ]),
        ("FAST", None) => items.extend([
            FetchItem::Flags,
            FetchItem::InternalDate,
            FetchItem::Rfc822Size,
        ]),
        ("FLAGS", None) => items.push(FetchItem::Flags),
        ("UID", None) => items.push(FetchItem::Uid),
        ("INTERNALDATE", None) => items.push(FetchItem::InternalDate),
        ("RFC822.SIZE", None) => items.push(FetchItem::Rfc822Size),
        ("ENVELOPE", None) => items.push(FetchItem::Envelope),
        ("BODY", Some(section)) | ("BODY.PEEK", Some(section)) => {
            let peek = base == "BODY.PEEK";
            items.push(FetchItem::BodySection(read_section(dec, section, peek).await?));
        }
        _ => return Err(DecodeError::expected("fetch attribute")),
    }
    Ok(())
}

// The atom reader stops at "]" and SP, so `section` holds what came after
// "[" so far.
async fn read_section(
    dec: &mut CommandDecoder,
    mut section: String,
    peek: bool,
) -> Result<FetchBodySection, DecodeError> {
    if section.ends_with("HEADER.FIELDS") || section.ends_with("HEADER.FIELDS.NOT") {
        dec.expect_sp().await?;
        dec.expect_special(b'(').await?;
        section.push_str(" (");
        loop {
            section.push_str(&dec.expect_astring().await?.to_ascii_uppercase());
            if !dec.sp().await? {
                break;
            }
            section.push(' ');
        }
        dec.expect_special(b')').await?;
        section.push(')');
    }
    dec.expect_special(b']').await?;

    let partial = if dec.special(b'<').await? {
        let offset = dec.expect_number().await?;
        dec.expect_special(b'.').await?;
        let size = dec.expect_number().await?;
        dec.expect_special(b'>').await?;
        Some(SectionPartial { offset, size })
    } else {
        None
    };
    Ok(FetchBodySection {
        section,
        peek,
        partial,
    })
}

async fn string_arg(dec: &mut CommandDecoder) -> Result<String, DecodeError> {
    dec.expect_sp().await?;
    dec.expect_astring().await
}

async fn date_arg(dec: &mut CommandDecoder) -> Result<NaiveDate, DecodeError> {
    dec.expect_sp().await?;
    dec.expect_date().await
}

/// Deepest nesting of parenthesized groups, NOT and OR accepted in a
/// search program.
const MAX_SEARCH_DEPTH: usize = 64;

fn read_search_key(
    dec: &mut CommandDecoder,
    depth: usize,
) -> BoxFuture<'_, Result<SearchKey, DecodeError>> {
    async move {
        if depth > MAX_SEARCH_DEPTH {
            return Err(DecodeError::expected("shallower search key nesting"));
        }
        if dec.special(b'(').await? {
            let mut keys = Vec::new();
            loop {
                keys.push(read_search_key(dec, depth + 1).await?);
                if !dec.sp().await? {
                    break;
                }
            }
            dec.expect_special(b')').await?;
            return Ok(SearchKey::And(keys));
        }
        if let Some(b'*' | b'0'..=b'9') = dec.peek().await? {
            return Ok(SearchKey::SeqSet(dec.expect_seq_set().await?));
        }
        let name = dec.expect_atom().await?.to_ascii_uppercase();
        search_key_named(dec, &name, depth).await
    }
    .boxed()
}

async fn search_key_named(
    dec: &mut CommandDecoder,
    name: &str,
    depth: usize,
) -> Result<SearchKey, DecodeError> {
    Ok(match name {
        "ALL" => SearchKey::All,
        "ANSWERED" => SearchKey::Answered,
        "DELETED" => SearchKey::Deleted,
        "DRAFT" => SearchKey::Draft,
        "FLAGGED" => SearchKey::Flagged,
        "NEW" => SearchKey::New,
        "OLD" => SearchKey::Old,
        "RECENT" => SearchKey::Recent,
        "SEEN" => SearchKey::Seen,
        "UNANSWERED" => SearchKey::Unanswered,
        "UNDELETED" => SearchKey::Undeleted,
        "UNDRAFT" => SearchKey::Undraft,
        "UNFLAGGED" => SearchKey::Unflagged,
        "UNSEEN" => SearchKey::Unseen,
        "KEYWORD" => {
            dec.expect_sp().await?;
            SearchKey::Keyword(dec.expect_flag().await?)
        }
        "UNKEYWORD" => {
            dec.expect_sp().await?;
            SearchKey::Unkeyword(dec.expect_flag().await?)
        }
        "BCC" => SearchKey::Bcc(string_arg(dec).await?),
        "CC" => SearchKey::Cc(string_arg(dec).await?),
        "FROM" => SearchKey::From(string_arg(dec).await?),
        "SUBJECT" => SearchKey::Subject(string_arg(dec).await?),
        "TO" => SearchKey::To(string_arg(dec).await?),
        "BODY" => SearchKey::Body(string_arg(dec).await?),
        "TEXT" => SearchKey::Text(string_arg(dec).await?),
        "HEADER" => {
            let field = string_arg(dec).await?;
            SearchKey::Header(field, string_arg(dec).await?)
        }
        "LARGER" => {
            dec.expect_sp().await?;
            SearchKey::Larger(dec.expect_number_64().await?)
        }
        "SMALLER" => {
            dec.expect_sp().await?;
            SearchKey::Smaller(dec.expect_number_64().await?)
        }
        "BEFORE" => SearchKey::Before(date_arg(dec).await?),
        "ON" => SearchKey::On(date_arg(dec).await?),
        "SINCE" => SearchKey::Since(date_arg(dec).await?),
        "SENTBEFORE" => SearchKey::SentBefore(date_arg(dec).await?),
        "SENTON" => SearchKey::SentOn(date_arg(dec).await?),
        "SENTSINCE" => SearchKey::SentSince(date_arg(dec).await?),
        "UID" => {
            dec.expect_sp().await?;
            SearchKey::Uid(dec.expect_seq_set().await?)
        }
        "NOT" => {
            dec.expect_sp().await?;
            SearchKey::Not(Box::new(read_search_key(dec, depth + 1).await?))
        }
        "OR" => {
            dec.expect_sp().await?;
            let left = read_search_key(dec, depth + 1).await?;
            dec.expect_sp().await?;
            let right = read_search_key(dec, depth + 1).await?;
            SearchKey::Or(Box::new(left), Box::new(right))
        }
        _ => return Err(DecodeError::expected("search key")),
    })
}

impl Conn {
    pub(super) async fn handle_fetch(
        &mut self,
        dec: &mut CommandDecoder,
        kind: NumKind,
    ) -> Result<Completion> {
        dec.expect_sp().await?;
        let set = dec.expect_seq_set().await?;
        dec.expect_sp().await?;
        let mut options = FetchOptions::default();
        if dec.special(b'(').await? {
            loop {
                read_fetch_att(dec, &mut options.items).await?;
                if !dec.sp().await? {
                    break;
                }
            }
            dec.expect_special(b')').await?;
        } else {
            read_fetch_att(dec, &mut options.items).await?;
        }
        dec.expect_crlf().await?;
        self.check_state(ConnState::Selected)?;

        if kind == NumKind::Uid && !options.contains(&FetchItem::Uid) {
            options.items.push(FetchItem::Uid);
        }
        let writer = FetchWriter::new(self.output.clone());
        self.session.fetch(&writer, kind, &set, &options).await?;
        Ok(Completion::Ok)
    }

    pub(super) async fn handle_store(
        &mut self,
        dec: &mut CommandDecoder,
        kind: NumKind,
    ) -> Result<Completion> {
        dec.expect_sp().await?;
        let set = dec.expect_seq_set().await?;
        dec.expect_sp().await?;
        let item = dec.expect_atom().await?.to_ascii_uppercase();
        let (action, item) = if let Some(item) = item.strip_prefix('+') {
            (StoreAction::Add, item)
        } else if let Some(item) = item.strip_prefix('-') {
            (StoreAction::Remove, item)
        } else {
            (StoreAction::Set, item.as_str())
        };
        let silent = match item {
            "FLAGS" => false,
            "FLAGS.SILENT" => true,
            _ => return Err(DecodeError::expected("FLAGS, +FLAGS or -FLAGS").into()),
        };
        dec.expect_sp().await?;
        let flags = if dec.peek().await? == Some(b'(') {
            read_flag_list(dec).await?
        } else {
            let mut flags = Vec::new();
            loop {
                flags.push(dec.expect_flag().await?);
                if !dec.sp().await? {
                    break;
                }
            }
            flags
        };
        dec.expect_crlf().await?;
        self.check_state(ConnState::Selected)?;

        let writer = FetchWriter::new(self.output.clone());
        let flags = StoreFlags {
            action,
            silent,
            flags,
        };
        self.session.store(&writer, kind, &set, &flags).await?;
        Ok(Completion::Ok)
    }

    pub(super) async fn handle_copy(
        &mut self,
        tag: &str,
        dec: &mut CommandDecoder,
        kind: NumKind,
    ) -> Result<Completion> {
        dec.expect_sp().await?;
        let set = dec.expect_seq_set().await?;
        dec.expect_sp().await?;
        let dest = dec.expect_mailbox().await?;
        dec.expect_crlf().await?;
        self.check_state(ConnState::Selected)?;

        let data = self.session.copy(kind, &set, &dest).await?;
        let mut resp = StatusResponse::ok("COPY completed");
        if let Some(data) = data {
            resp = resp.with_code(ResponseCode::CopyUid {
                uid_validity: data.uid_validity,
                source: data.source_uids,
                dest: data.dest_uids,
            });
        }
        self.output.write_status(Some(tag), &resp).await?;
        Ok(Completion::Replied)
    }

    pub(super) async fn handle_move(
        &mut self,
        dec: &mut CommandDecoder,
        kind: NumKind,
    ) -> Result<Completion> {
        dec.expect_sp().await?;
        let set = dec.expect_seq_set().await?;
        dec.expect_sp().await?;
        let dest = dec.expect_mailbox().await?;
        dec.expect_crlf().await?;
        self.check_state(ConnState::Selected)?;

        let writer = UpdateWriter::new(self.output.clone());
        self.session.move_messages(&writer, kind, &set, &dest).await?;
        Ok(Completion::Ok)
    }

    pub(super) async fn handle_expunge(&mut self, dec: &mut CommandDecoder) -> Result<Completion> {
        dec.expect_crlf().await?;
        self.check_state(ConnState::Selected)?;
        let writer = UpdateWriter::new(self.output.clone());
        self.session.expunge(&writer, None).await?;
        Ok(Completion::Ok)
    }

    pub(super) async fn handle_uid_expunge(
        &mut self,
        dec: &mut CommandDecoder,
    ) -> Result<Completion> {
        dec.expect_sp().await?;
        let uids = dec.expect_seq_set().await?;
        dec.expect_crlf().await?;
        self.check_state(ConnState::Selected)?;
        let writer = UpdateWriter::new(self.output.clone());
        self.session.expunge(&writer, Some(&uids)).await?;
        Ok(Completion::Ok)
    }

    pub(super) async fn handle_search(
        &mut self,
        dec: &mut CommandDecoder,
        kind: NumKind,
    ) -> Result<Completion> {
        let mut criteria = Vec::new();
        dec.expect_sp().await?;
        match dec.peek().await? {
            Some(b'(' | b'*' | b'0'..=b'9') => criteria.push(read_search_key(dec, 0).await?),
            _ => {
                let name = dec.expect_atom().await?.to_ascii_uppercase();
                if name == "CHARSET" {
                    let charset = string_arg(dec).await?;
                    if !charset.eq_ignore_ascii_case("UTF-8")
                        && !charset.eq_ignore_ascii_case("US-ASCII")
                    {
                        dec.discard_line().await;
                        return Err(StatusResponse::no("Only UTF-8 is supported")
                            .with_code(ResponseCode::BadCharset(vec![
                                "UTF-8".to_owned(),
                                "US-ASCII".to_owned(),
                            ]))
                            .into());
                    }
                    dec.expect_sp().await?;
                    criteria.push(read_search_key(dec, 0).await?);
                } else {
                    criteria.push(search_key_named(dec, &name, 0).await?);
                }
            }
        }
        while dec.sp().await? {
            criteria.push(read_search_key(dec, 0).await?);
        }
        dec.expect_crlf().await?;
        self.check_state(ConnState::Selected)?;

        let data = self.session.search(kind, &criteria).await?;
        self.output
            .write(|enc| {
                enc.atom("*").sp().atom("SEARCH");
                for n in &data.all {
                    enc.sp().number(*n);
                }
                enc.crlf();
            })
            .await?;
        Ok(Completion::Ok)
    }
}
