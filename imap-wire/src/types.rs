use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate};

/// Connection state, as described in RFC 9051 section 3.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnState {
    NotAuthenticated,
    Authenticated,
    Selected,
    Logout,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnState::NotAuthenticated => "not authenticated",
            ConnState::Authenticated => "authenticated",
            ConnState::Selected => "selected",
            ConnState::Logout => "logout",
        })
    }
}

/// How a command addresses messages: by sequence number or by UID.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NumKind {
    Seq,
    Uid,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusResponseType {
    Ok,
    No,
    Bad,
    PreAuth,
    Bye,
}

impl StatusResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusResponseType::Ok => "OK",
            StatusResponseType::No => "NO",
            StatusResponseType::Bad => "BAD",
            StatusResponseType::PreAuth => "PREAUTH",
            StatusResponseType::Bye => "BYE",
        }
    }
}

impl fmt::Display for StatusResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ResponseCode {
    Alert,
    AlreadyExists,
    AuthenticationFailed,
    AuthorizationFailed,
    /// Carries the charsets the server does support.
    BadCharset(Vec<String>),
    Cannot,
    ClientBug,
    Closed,
    Limit,
    NonExistent,
    OverQuota,
    Parse,
    PrivacyRequired,
    ReadOnly,
    ReadWrite,
    ServerBug,
    TooBig,
    TryCreate,
    Unavailable,
    UidNotSticky,
    UidNext(u32),
    UidValidity(u32),
    PermanentFlags(Vec<Flag>),
    AppendUid {
        uid_validity: u32,
        uid: u32,
    },
    CopyUid {
        uid_validity: u32,
        source: SeqSet,
        dest: SeqSet,
    },
    Other(String),
}

impl ResponseCode {
    /// The atom naming this code, without its arguments.
    pub fn name(&self) -> &str {
        match self {
            ResponseCode::Alert => "ALERT",
            ResponseCode::AlreadyExists => "ALREADYEXISTS",
            ResponseCode::AuthenticationFailed => "AUTHENTICATIONFAILED",
            ResponseCode::AuthorizationFailed => "AUTHORIZATIONFAILED",
            ResponseCode::BadCharset(_) => "BADCHARSET",
            ResponseCode::Cannot => "CANNOT",
            ResponseCode::ClientBug => "CLIENTBUG",
            ResponseCode::Closed => "CLOSED",
            ResponseCode::Limit => "LIMIT",
            ResponseCode::NonExistent => "NONEXISTENT",
            ResponseCode::OverQuota => "OVERQUOTA",
            ResponseCode::Parse => "PARSE",
            ResponseCode::PrivacyRequired => "PRIVACYREQUIRED",
            ResponseCode::ReadOnly => "READ-ONLY",
            ResponseCode::ReadWrite => "READ-WRITE",
            ResponseCode::ServerBug => "SERVERBUG",
            ResponseCode::TooBig => "TOOBIG",
            ResponseCode::TryCreate => "TRYCREATE",
            ResponseCode::Unavailable => "UNAVAILABLE",
            ResponseCode::UidNotSticky => "UIDNOTSTICKY",
            ResponseCode::UidNext(_) => "UIDNEXT",
            ResponseCode::UidValidity(_) => "UIDVALIDITY",
            ResponseCode::PermanentFlags(_) => "PERMANENTFLAGS",
            ResponseCode::AppendUid { .. } => "APPENDUID",
            ResponseCode::CopyUid { .. } => "COPYUID",
            ResponseCode::Other(name) => name,
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        match self {
            ResponseCode::UidNext(n) | ResponseCode::UidValidity(n) => write!(f, " {n}"),
            ResponseCode::PermanentFlags(flags) => {
                f.write_str(" (")?;
                for (i, flag) in flags.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    f.write_str(flag.as_str())?;
                }
                f.write_str(")")
            }
            ResponseCode::BadCharset(charsets) if !charsets.is_empty() => {
                write!(f, " ({})", charsets.join(" "))
            }
            ResponseCode::AppendUid { uid_validity, uid } => write!(f, " {uid_validity} {uid}"),
            ResponseCode::CopyUid {
                uid_validity,
                source,
                dest,
            } => write!(f, " {uid_validity} {source} {dest}"),
            _ => Ok(()),
        }
    }
}

/// A status response: the conclusion of a command, or an untagged
/// notification such as the greeting.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusResponse {
    pub kind: StatusResponseType,
    pub code: Option<ResponseCode>,
    pub text: String,
}

impl StatusResponse {
    pub fn new(kind: StatusResponseType, text: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            text: text.into(),
        }
    }

    pub fn ok(text: impl Into<String>) -> Self {
        Self::new(StatusResponseType::Ok, text)
    }

    pub fn no(text: impl Into<String>) -> Self {
        Self::new(StatusResponseType::No, text)
    }

    pub fn bad(text: impl Into<String>) -> Self {
        Self::new(StatusResponseType::Bad, text)
    }

    pub fn bye(text: impl Into<String>) -> Self {
        Self::new(StatusResponseType::Bye, text)
    }

    pub fn with_code(mut self, code: ResponseCode) -> Self {
        self.code = Some(code);
        self
    }
}

impl fmt::Display for StatusResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(code) = &self.code {
            write!(f, " [{code}]")?;
        }
        write!(f, " {}", self.text)
    }
}

impl std::error::Error for StatusResponse {}

/// A capability token, compared case-insensitively.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Cap(Cow<'static, str>);

impl Cap {
    pub const IMAP4REV1: Cap = Cap(Cow::Borrowed("IMAP4rev1"));
    pub const IMAP4REV2: Cap = Cap(Cow::Borrowed("IMAP4rev2"));
    pub const STARTTLS: Cap = Cap(Cow::Borrowed("STARTTLS"));
    pub const LOGINDISABLED: Cap = Cap(Cow::Borrowed("LOGINDISABLED"));
    pub const SASL_IR: Cap = Cap(Cow::Borrowed("SASL-IR"));
    pub const LITERAL_MINUS: Cap = Cap(Cow::Borrowed("LITERAL-"));
    pub const ENABLE: Cap = Cap(Cow::Borrowed("ENABLE"));
    pub const IDLE: Cap = Cap(Cow::Borrowed("IDLE"));
    pub const UNSELECT: Cap = Cap(Cow::Borrowed("UNSELECT"));
    pub const NAMESPACE: Cap = Cap(Cow::Borrowed("NAMESPACE"));
    pub const UIDPLUS: Cap = Cap(Cow::Borrowed("UIDPLUS"));
    pub const MOVE: Cap = Cap(Cow::Borrowed("MOVE"));
    pub const UTF8_ACCEPT: Cap = Cap(Cow::Borrowed("UTF8=ACCEPT"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Cap(name.into())
    }

    /// The `AUTH=<mechanism>` capability.
    pub fn auth(mechanism: &str) -> Self {
        Cap(Cow::Owned(format!("AUTH={mechanism}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, other: &Cap) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl fmt::Display for Cap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An ordered set of capabilities.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CapSet(Vec<Cap>);

impl CapSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, cap: &Cap) -> bool {
        self.0.iter().any(|c| c.matches(cap))
    }

    /// Adds `cap`, returning `false` if it was already present.
    pub fn insert(&mut self, cap: Cap) -> bool {
        if self.has(&cap) {
            return false;
        }
        self.0.push(cap);
        true
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Cap> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<Cap> for CapSet {
    fn from_iter<I: IntoIterator<Item = Cap>>(iter: I) -> Self {
        let mut set = CapSet::new();
        for cap in iter {
            set.insert(cap);
        }
        set
    }
}

impl<'a> IntoIterator for &'a CapSet {
    type Item = &'a Cap;
    type IntoIter = std::slice::Iter<'a, Cap>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A message flag or keyword.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Flag(Cow<'static, str>);

impl Flag {
    pub const SEEN: Flag = Flag(Cow::Borrowed("\\Seen"));
    pub const ANSWERED: Flag = Flag(Cow::Borrowed("\\Answered"));
    pub const FLAGGED: Flag = Flag(Cow::Borrowed("\\Flagged"));
    pub const DELETED: Flag = Flag(Cow::Borrowed("\\Deleted"));
    pub const DRAFT: Flag = Flag(Cow::Borrowed("\\Draft"));
    /// `\*`, only valid in PERMANENTFLAGS.
    pub const WILDCARD: Flag = Flag(Cow::Borrowed("\\*"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Flag(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A range of message numbers. Zero stands for `*`, the largest number in use.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NumRange {
    pub start: u32,
    pub stop: u32,
}

impl NumRange {
    pub fn contains(&self, n: u32) -> bool {
        let star = |v: u32| if v == 0 { u32::MAX } else { v };
        let (lo, hi) = (star(self.start), star(self.stop));
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        lo <= n && n <= hi
    }
}

impl fmt::Display for NumRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let num = |f: &mut fmt::Formatter<'_>, n: u32| {
            if n == 0 {
                f.write_str("*")
            } else {
                write!(f, "{n}")
            }
        };
        num(f, self.start)?;
        if self.start != self.stop {
            f.write_str(":")?;
            num(f, self.stop)?;
        }
        Ok(())
    }
}

/// sequence-set = (seq-number / seq-range) ["," sequence-set]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SeqSet(pub Vec<NumRange>);

impl SeqSet {
    pub fn single(n: u32) -> Self {
        SeqSet(vec![NumRange { start: n, stop: n }])
    }

    pub fn range(start: u32, stop: u32) -> Self {
        SeqSet(vec![NumRange { start, stop }])
    }

    pub fn contains(&self, n: u32) -> bool {
        self.0.iter().any(|r| r.contains(n))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SeqSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, range) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{range}")?;
        }
        Ok(())
    }
}

/// Declared length of a literal, and whether the client waits for a
/// continuation request before sending it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LiteralInfo {
    pub size: u64,
    pub non_sync: bool,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SelectOptions {
    pub read_only: bool,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SelectData {
    pub flags: Vec<Flag>,
    pub permanent_flags: Vec<Flag>,
    pub num_messages: u32,
    pub uid_next: u32,
    pub uid_validity: u32,
    pub read_only: bool,
}

/// One entry of a LIST response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListData {
    pub attrs: Vec<String>,
    pub delim: Option<char>,
    pub mailbox: String,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StatusOptions {
    pub messages: bool,
    pub uid_next: bool,
    pub uid_validity: bool,
    pub unseen: bool,
    pub deleted: bool,
    pub size: bool,
    pub recent: bool,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StatusData {
    pub mailbox: String,
    pub messages: Option<u32>,
    pub uid_next: Option<u32>,
    pub uid_validity: Option<u32>,
    pub unseen: Option<u32>,
    pub deleted: Option<u32>,
    pub size: Option<u64>,
    pub recent: Option<u32>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AppendOptions {
    pub flags: Vec<Flag>,
    pub time: Option<DateTime<FixedOffset>>,
}

/// UIDPLUS data returned by APPEND. Zero values mean "unknown".
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AppendData {
    pub uid_validity: u32,
    pub uid: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CopyData {
    pub uid_validity: u32,
    pub source_uids: SeqSet,
    pub dest_uids: SeqSet,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NamespaceDescriptor {
    pub prefix: String,
    pub delim: Option<char>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NamespaceData {
    pub personal: Vec<NamespaceDescriptor>,
    pub other: Vec<NamespaceDescriptor>,
    pub shared: Vec<NamespaceDescriptor>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreAction {
    Set,
    Add,
    Remove,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoreFlags {
    pub action: StoreAction,
    pub silent: bool,
    pub flags: Vec<Flag>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SectionPartial {
    pub offset: u32,
    pub size: u32,
}

/// `BODY[<section>]<<partial>>`. The section specifier is kept verbatim
/// (e.g. `HEADER.FIELDS (FROM TO)`), upper-cased.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FetchBodySection {
    pub section: String,
    pub peek: bool,
    pub partial: Option<SectionPartial>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FetchItem {
    Flags,
    Uid,
    InternalDate,
    Rfc822Size,
    Envelope,
    BodySection(FetchBodySection),
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FetchOptions {
    pub items: Vec<FetchItem>,
}

impl FetchOptions {
    pub fn contains(&self, item: &FetchItem) -> bool {
        self.items.contains(item)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Address {
    pub name: Option<String>,
    pub mailbox: Option<String>,
    pub host: Option<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Envelope {
    pub date: Option<String>,
    pub subject: Option<String>,
    pub from: Vec<Address>,
    pub sender: Vec<Address>,
    pub reply_to: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub in_reply_to: Option<String>,
    pub message_id: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FetchItemData {
    Flags(Vec<Flag>),
    Uid(u32),
    InternalDate(DateTime<FixedOffset>),
    Rfc822Size(u64),
    Envelope(Box<Envelope>),
    BodySection {
        section: String,
        origin: Option<u32>,
        data: Bytes,
    },
}

/// One `* <seq> FETCH (...)` response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FetchMessage {
    pub seq: u32,
    pub items: Vec<FetchItemData>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SearchKey {
    All,
    Answered,
    Deleted,
    Draft,
    Flagged,
    New,
    Old,
    Recent,
    Seen,
    Unanswered,
    Undeleted,
    Undraft,
    Unflagged,
    Unseen,
    Keyword(Flag),
    Unkeyword(Flag),
    Bcc(String),
    Cc(String),
    From(String),
    Subject(String),
    To(String),
    Body(String),
    Text(String),
    Header(String, String),
    Larger(u64),
    Smaller(u64),
    Before(NaiveDate),
    On(NaiveDate),
    Since(NaiveDate),
    SentBefore(NaiveDate),
    SentOn(NaiveDate),
    SentSince(NaiveDate),
    Uid(SeqSet),
    SeqSet(SeqSet),
    Not(Box<SearchKey>),
    Or(Box<SearchKey>, Box<SearchKey>),
    And(Vec<SearchKey>),
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SearchData {
    pub all: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_set_display() {
        let set = SeqSet(vec![
            NumRange { start: 1, stop: 3 },
            NumRange { start: 5, stop: 5 },
            NumRange { start: 7, stop: 0 },
        ]);
        assert_eq!(set.to_string(), "1:3,5,7:*");
        assert!(set.contains(2));
        assert!(!set.contains(4));
        assert!(set.contains(1_000_000));
    }

    #[test]
    fn test_status_response_display() {
        let resp = StatusResponse::no("Literal too large").with_code(ResponseCode::TooBig);
        assert_eq!(resp.to_string(), "NO [TOOBIG] Literal too large");
    }

    #[test]
    fn test_cap_set_is_case_insensitive() {
        let mut caps: CapSet = vec![Cap::IMAP4REV1, Cap::IDLE].into_iter().collect();
        assert!(caps.has(&Cap::new("imap4REV1")));
        assert!(!caps.insert(Cap::new("idle")));
        assert_eq!(caps.len(), 2);
    }
}
