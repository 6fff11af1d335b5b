//! An IMAP server keeping one user's mail in memory.
//!
//! ```text
//! cargo run --example memory -- 127.0.0.1:1143
//! ```
//!
//! Log in as `demo` / `demo`. Authentication over plaintext is allowed, so
//! do not expose this beyond localhost.

use std::collections::BTreeMap;
use std::env;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, FixedOffset, Utc};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use imap_server::types::*;
use imap_server::{ConnInfo, Error, FetchWriter, Options, Result, Server, Session, UpdateWriter};

struct Message {
    uid: u32,
    flags: Vec<Flag>,
    date: DateTime<FixedOffset>,
    body: Bytes,
}

#[derive(Default)]
struct Mailbox {
    uid_next: u32,
    messages: Vec<Message>,
}

type Store = Arc<Mutex<BTreeMap<String, Mailbox>>>;

struct MemorySession {
    store: Store,
    selected: Option<(String, bool)>,
}

impl MemorySession {
    fn mailboxes(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Mailbox>> {
        self.store.lock().unwrap()
    }

    fn selected(&self) -> Result<&str> {
        match &self.selected {
            Some((name, _)) => Ok(name),
            None => Err(Error::bad("No mailbox selected")),
        }
    }
}

fn nonexistent() -> Error {
    StatusResponse::no("No such mailbox")
        .with_code(ResponseCode::NonExistent)
        .into()
}

fn matches(n: u32, kind: NumKind, set: &SeqSet, msg: &Message) -> bool {
    match kind {
        NumKind::Seq => set.contains(n),
        NumKind::Uid => set.contains(msg.uid),
    }
}

fn search_matches(key: &SearchKey, n: u32, msg: &Message) -> bool {
    let has = |flag: &Flag| msg.flags.contains(flag);
    match key {
        SearchKey::All => true,
        SearchKey::Seen => has(&Flag::SEEN),
        SearchKey::Unseen => !has(&Flag::SEEN),
        SearchKey::Deleted => has(&Flag::DELETED),
        SearchKey::Undeleted => !has(&Flag::DELETED),
        SearchKey::Flagged => has(&Flag::FLAGGED),
        SearchKey::Unflagged => !has(&Flag::FLAGGED),
        SearchKey::Keyword(flag) => has(flag),
        SearchKey::Unkeyword(flag) => !has(flag),
        SearchKey::Larger(size) => msg.body.len() as u64 > *size,
        SearchKey::Smaller(size) => (msg.body.len() as u64) < *size,
        SearchKey::Uid(set) => set.contains(msg.uid),
        SearchKey::SeqSet(set) => set.contains(n),
        SearchKey::Not(key) => !search_matches(key, n, msg),
        SearchKey::Or(a, b) => search_matches(a, n, msg) || search_matches(b, n, msg),
        SearchKey::And(keys) => keys.iter().all(|key| search_matches(key, n, msg)),
        SearchKey::Text(s) | SearchKey::Body(s) => {
            String::from_utf8_lossy(&msg.body).contains(s.as_str())
        }
        _ => false,
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        if username == "demo" && password == "demo" {
            return Ok(());
        }
        Err(StatusResponse::no("Invalid credentials")
            .with_code(ResponseCode::AuthenticationFailed)
            .into())
    }

    async fn select(&mut self, mailbox: &str, options: &SelectOptions) -> Result<SelectData> {
        let data = {
            let store = self.mailboxes();
            let mbox = store.get(mailbox).ok_or_else(nonexistent)?;
            SelectData {
                flags: vec![Flag::SEEN, Flag::ANSWERED, Flag::FLAGGED, Flag::DELETED, Flag::DRAFT],
                permanent_flags: vec![Flag::SEEN, Flag::FLAGGED, Flag::DELETED, Flag::WILDCARD],
                num_messages: mbox.messages.len() as u32,
                uid_next: mbox.uid_next,
                uid_validity: 1,
                read_only: options.read_only,
            }
        };
        self.selected = Some((mailbox.to_owned(), options.read_only));
        Ok(data)
    }

    async fn create(&mut self, mailbox: &str) -> Result<()> {
        let mut store = self.mailboxes();
        if store.contains_key(mailbox) {
            return Err(StatusResponse::no("Mailbox already exists")
                .with_code(ResponseCode::AlreadyExists)
                .into());
        }
        store.insert(
            mailbox.to_owned(),
            Mailbox {
                uid_next: 1,
                ..Mailbox::default()
            },
        );
        Ok(())
    }

    async fn delete(&mut self, mailbox: &str) -> Result<()> {
        if mailbox == "INBOX" {
            return Err(Error::no("Cannot delete INBOX"));
        }
        self.mailboxes().remove(mailbox).ok_or_else(nonexistent)?;
        Ok(())
    }

    async fn rename(&mut self, mailbox: &str, new_name: &str) -> Result<()> {
        let mut store = self.mailboxes();
        if store.contains_key(new_name) {
            return Err(StatusResponse::no("Mailbox already exists")
                .with_code(ResponseCode::AlreadyExists)
                .into());
        }
        let mbox = store.remove(mailbox).ok_or_else(nonexistent)?;
        store.insert(new_name.to_owned(), mbox);
        Ok(())
    }

    async fn subscribe(&mut self, _mailbox: &str) -> Result<()> {
        Ok(())
    }

    async fn unsubscribe(&mut self, _mailbox: &str) -> Result<()> {
        Ok(())
    }

    async fn list(&mut self, _reference: &str, patterns: &[String]) -> Result<Vec<ListData>> {
        if patterns.iter().all(|p| p.is_empty()) {
            return Ok(vec![ListData {
                attrs: vec!["\\Noselect".to_owned()],
                delim: Some('/'),
                mailbox: String::new(),
            }]);
        }
        Ok(self
            .mailboxes()
            .keys()
            .map(|name| ListData {
                attrs: vec![],
                delim: Some('/'),
                mailbox: name.clone(),
            })
            .collect())
    }

    async fn status(&mut self, mailbox: &str, options: &StatusOptions) -> Result<StatusData> {
        let store = self.mailboxes();
        let mbox = store.get(mailbox).ok_or_else(nonexistent)?;
        let count = |f: fn(&Message) -> bool| mbox.messages.iter().filter(|&m| f(m)).count() as u32;
        Ok(StatusData {
            mailbox: mailbox.to_owned(),
            messages: options.messages.then(|| mbox.messages.len() as u32),
            uid_next: options.uid_next.then_some(mbox.uid_next),
            uid_validity: options.uid_validity.then_some(1),
            unseen: options
                .unseen
                .then(|| count(|m| !m.flags.contains(&Flag::SEEN))),
            deleted: options
                .deleted
                .then(|| count(|m| m.flags.contains(&Flag::DELETED))),
            size: options
                .size
                .then(|| mbox.messages.iter().map(|m| m.body.len() as u64).sum()),
            recent: options.recent.then_some(0),
        })
    }

    async fn append(
        &mut self,
        mailbox: &str,
        message: Bytes,
        options: &AppendOptions,
    ) -> Result<AppendData> {
        let mut store = self.mailboxes();
        let mbox = store.get_mut(mailbox).ok_or_else(|| {
            Error::from(
                StatusResponse::no("No such mailbox").with_code(ResponseCode::TryCreate),
            )
        })?;
        let uid = mbox.uid_next;
        mbox.uid_next += 1;
        mbox.messages.push(Message {
            uid,
            flags: options.flags.clone(),
            date: options
                .time
                .unwrap_or_else(|| DateTime::<Utc>::from(SystemTime::now()).into()),
            body: message,
        });
        Ok(AppendData {
            uid_validity: 1,
            uid,
        })
    }

    async fn idle(&mut self, _w: &UpdateWriter, stop: oneshot::Receiver<()>) -> Result<()> {
        let _ = stop.await;
        Ok(())
    }

    async fn namespace(&mut self) -> Result<NamespaceData> {
        Ok(NamespaceData {
            personal: vec![NamespaceDescriptor {
                prefix: String::new(),
                delim: Some('/'),
            }],
            other: vec![],
            shared: vec![],
        })
    }

    async fn unselect(&mut self) -> Result<()> {
        self.selected = None;
        Ok(())
    }

    async fn expunge(&mut self, w: &UpdateWriter, uids: Option<&SeqSet>) -> Result<()> {
        let name = self.selected()?.to_owned();
        let expunged = {
            let mut store = self.mailboxes();
            let mbox = store.get_mut(&name).ok_or_else(nonexistent)?;
            let mut expunged = Vec::new();
            let mut seq = 1;
            mbox.messages.retain(|msg| {
                let remove = msg.flags.contains(&Flag::DELETED)
                    && uids.map_or(true, |uids| uids.contains(msg.uid));
                if remove {
                    expunged.push(seq);
                } else {
                    seq += 1;
                }
                !remove
            });
            expunged
        };
        for seq in expunged {
            w.expunge(seq).await?;
        }
        Ok(())
    }

    async fn search(&mut self, kind: NumKind, criteria: &[SearchKey]) -> Result<SearchData> {
        let name = self.selected()?.to_owned();
        let store = self.mailboxes();
        let mbox = store.get(&name).ok_or_else(nonexistent)?;
        let all = mbox
            .messages
            .iter()
            .zip(1..)
            .filter(|(msg, n)| criteria.iter().all(|key| search_matches(key, *n, msg)))
            .map(|(msg, n)| match kind {
                NumKind::Seq => n,
                NumKind::Uid => msg.uid,
            })
            .collect();
        Ok(SearchData { all })
    }

    async fn fetch(
        &mut self,
        w: &FetchWriter,
        kind: NumKind,
        set: &SeqSet,
        options: &FetchOptions,
    ) -> Result<()> {
        let name = self.selected()?.to_owned();
        let read_only = matches!(self.selected, Some((_, true)));
        let responses = {
            let mut store = self.mailboxes();
            let mbox = store.get_mut(&name).ok_or_else(nonexistent)?;
            let mut responses = Vec::new();
            for (msg, seq) in mbox.messages.iter_mut().zip(1..) {
                if !matches(seq, kind, set, msg) {
                    continue;
                }
                let mut items = Vec::new();
                for item in &options.items {
                    items.push(match item {
                        FetchItem::Flags => FetchItemData::Flags(msg.flags.clone()),
                        FetchItem::Uid => FetchItemData::Uid(msg.uid),
                        FetchItem::InternalDate => FetchItemData::InternalDate(msg.date),
                        FetchItem::Rfc822Size => FetchItemData::Rfc822Size(msg.body.len() as u64),
                        FetchItem::Envelope => FetchItemData::Envelope(Box::default()),
                        FetchItem::BodySection(section) => {
                            if !section.peek && !read_only && !msg.flags.contains(&Flag::SEEN) {
                                msg.flags.push(Flag::SEEN);
                            }
                            let (origin, data) = match &section.partial {
                                Some(partial) => {
                                    let len = msg.body.len();
                                    let start = (partial.offset as usize).min(len);
                                    let end = start.saturating_add(partial.size as usize).min(len);
                                    (Some(partial.offset), msg.body.slice(start..end))
                                }
                                None => (None, msg.body.clone()),
                            };
                            FetchItemData::BodySection {
                                section: section.section.clone(),
                                origin,
                                data,
                            }
                        }
                    });
                }
                responses.push(FetchMessage { seq, items });
            }
            responses
        };
        for msg in &responses {
            w.write_message(msg).await?;
        }
        Ok(())
    }

    async fn store(
        &mut self,
        w: &FetchWriter,
        kind: NumKind,
        set: &SeqSet,
        flags: &StoreFlags,
    ) -> Result<()> {
        if matches!(self.selected, Some((_, true))) {
            return Err(Error::no("Mailbox is read-only"));
        }
        let name = self.selected()?.to_owned();
        let responses = {
            let mut store = self.mailboxes();
            let mbox = store.get_mut(&name).ok_or_else(nonexistent)?;
            let mut responses = Vec::new();
            for (msg, seq) in mbox.messages.iter_mut().zip(1..) {
                if !matches(seq, kind, set, msg) {
                    continue;
                }
                match flags.action {
                    StoreAction::Set => msg.flags = flags.flags.clone(),
                    StoreAction::Add => {
                        for flag in &flags.flags {
                            if !msg.flags.contains(flag) {
                                msg.flags.push(flag.clone());
                            }
                        }
                    }
                    StoreAction::Remove => msg.flags.retain(|f| !flags.flags.contains(f)),
                }
                let mut items = vec![FetchItemData::Flags(msg.flags.clone())];
                if kind == NumKind::Uid {
                    items.push(FetchItemData::Uid(msg.uid));
                }
                responses.push(FetchMessage { seq, items });
            }
            responses
        };
        if !flags.silent {
            for msg in &responses {
                w.write_message(msg).await?;
            }
        }
        Ok(())
    }

    async fn copy(&mut self, kind: NumKind, set: &SeqSet, dest: &str) -> Result<Option<CopyData>> {
        let name = self.selected()?.to_owned();
        let mut store = self.mailboxes();
        let copies: Vec<(u32, Vec<Flag>, DateTime<FixedOffset>, Bytes)> = store
            .get(&name)
            .ok_or_else(nonexistent)?
            .messages
            .iter()
            .zip(1..)
            .filter(|(msg, seq)| matches(*seq, kind, set, msg))
            .map(|(msg, _)| (msg.uid, msg.flags.clone(), msg.date, msg.body.clone()))
            .collect();
        let target = store.get_mut(dest).ok_or_else(|| {
            Error::from(
                StatusResponse::no("No such mailbox").with_code(ResponseCode::TryCreate),
            )
        })?;

        let (mut source_uids, mut dest_uids) = (Vec::new(), Vec::new());
        for (uid, flags, date, body) in copies {
            let new_uid = target.uid_next;
            target.uid_next += 1;
            target.messages.push(Message {
                uid: new_uid,
                flags,
                date,
                body,
            });
            source_uids.push(NumRange {
                start: uid,
                stop: uid,
            });
            dest_uids.push(NumRange {
                start: new_uid,
                stop: new_uid,
            });
        }
        if source_uids.is_empty() {
            return Ok(None);
        }
        Ok(Some(CopyData {
            uid_validity: 1,
            source_uids: SeqSet(source_uids),
            dest_uids: SeqSet(dest_uids),
        }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let addr = env::args().nth(1).unwrap_or_else(|| "127.0.0.1:1143".to_owned());
    let store = Store::default();
    store.lock().unwrap().insert(
        "INBOX".to_owned(),
        Mailbox {
            uid_next: 1,
            ..Mailbox::default()
        },
    );

    let mut options = Options::new(move |info: &ConnInfo| {
        tracing::info!(peer = ?info.peer_addr, "new session");
        Ok(Box::new(MemorySession {
            store: store.clone(),
            selected: None,
        }) as Box<dyn Session>)
    });
    options.insecure_auth = true;
    for cap in [Cap::NAMESPACE, Cap::UIDPLUS, Cap::UTF8_ACCEPT] {
        options.caps.insert(cap);
    }

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    Server::new(options).serve(listener).await?;
    Ok(())
}
