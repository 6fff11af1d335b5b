//!
//! Response-side syntax, https://tools.ietf.org/html/rfc9051#section-7
//!
//! The [`Encoder`] only formats bytes into a buffer; flushing them to the
//! network and enforcing write deadlines is up to the caller.
//!

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, FixedOffset};

use crate::parser::core::{is_astring_char, is_quoted_specials, is_text_char};
use crate::types::{
    Address, Envelope, FetchItemData, Flag, ResponseCode, SeqSet, StatusResponse,
};

// Longer strings go out as literals even when they could be quoted.
const MAX_QUOTED_LEN: usize = 1024;

#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
    quoted_utf8: bool,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, non-ASCII strings may be sent as quoted strings rather
    /// than literals (IMAP4rev2 / UTF8=ACCEPT).
    pub fn with_quoted_utf8(quoted_utf8: bool) -> Self {
        Self {
            buf: BytesMut::new(),
            quoted_utf8,
        }
    }

    pub fn quoted_utf8(&self) -> bool {
        self.quoted_utf8
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Takes everything encoded so far.
    pub fn split(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn atom(&mut self, s: &str) -> &mut Self {
        self.buf.put_slice(s.as_bytes());
        self
    }

    pub fn sp(&mut self) -> &mut Self {
        self.buf.put_u8(b' ');
        self
    }

    pub fn special(&mut self, c: u8) -> &mut Self {
        self.buf.put_u8(c);
        self
    }

    pub fn crlf(&mut self) -> &mut Self {
        self.buf.put_slice(b"\r\n");
        self
    }

    /// Human-readable text. CR and LF are dropped so the line can't be split.
    pub fn text(&mut self, s: &str) -> &mut Self {
        for b in s.bytes().filter(|b| is_text_char(*b)) {
            self.buf.put_u8(b);
        }
        self
    }

    pub fn number(&mut self, n: u32) -> &mut Self {
        self.atom(&n.to_string())
    }

    pub fn number_64(&mut self, n: u64) -> &mut Self {
        self.atom(&n.to_string())
    }

    pub fn nil(&mut self) -> &mut Self {
        self.atom("NIL")
    }

    pub fn quoted(&mut self, s: &str) -> &mut Self {
        self.buf.put_u8(b'"');
        for b in s.bytes() {
            if is_quoted_specials(b) {
                self.buf.put_u8(b'\\');
            }
            self.buf.put_u8(b);
        }
        self.buf.put_u8(b'"');
        self
    }

    fn can_quote(&self, s: &str) -> bool {
        s.len() <= MAX_QUOTED_LEN
            && s
                .bytes()
                .all(|b| b != 0 && is_text_char(b) && (b.is_ascii() || self.quoted_utf8))
    }

    /// A quoted string if `s` can be represented as one, a literal otherwise.
    pub fn string(&mut self, s: &str) -> &mut Self {
        if self.can_quote(s) {
            self.quoted(s)
        } else {
            self.literal(s.as_bytes())
        }
    }

    pub fn nstring(&mut self, s: Option<&str>) -> &mut Self {
        match s {
            Some(s) => self.string(s),
            None => self.nil(),
        }
    }

    /// Mailbox names go out as atoms where possible.
    pub fn mailbox(&mut self, name: &str) -> &mut Self {
        if !name.is_empty() && name.bytes().all(|b| b.is_ascii() && is_astring_char(b)) {
            self.atom(name)
        } else {
            self.string(name)
        }
    }

    pub fn literal_header(&mut self, size: u64) -> &mut Self {
        self.special(b'{').number_64(size).special(b'}').crlf()
    }

    /// Header and data in one go. Large bodies should be written with
    /// [`Encoder::literal_header`] and streamed separately instead.
    pub fn literal(&mut self, data: &[u8]) -> &mut Self {
        self.literal_header(data.len() as u64);
        self.buf.put_slice(data);
        self
    }

    pub fn flag(&mut self, flag: &Flag) -> &mut Self {
        self.atom(flag.as_str())
    }

    pub fn flag_list(&mut self, flags: &[Flag]) -> &mut Self {
        self.special(b'(');
        for (i, flag) in flags.iter().enumerate() {
            if i > 0 {
                self.sp();
            }
            self.flag(flag);
        }
        self.special(b')')
    }

    pub fn seq_set(&mut self, set: &SeqSet) -> &mut Self {
        self.atom(&set.to_string())
    }

    pub fn response_code(&mut self, code: &ResponseCode) -> &mut Self {
        self.special(b'[').atom(&code.to_string()).special(b']')
    }

    /// `tag SP resp-cond-state`, or `* SP resp-cond-state` when untagged.
    /// The trailing CRLF is left to the caller.
    pub fn status_response(&mut self, tag: Option<&str>, resp: &StatusResponse) -> &mut Self {
        self.atom(tag.unwrap_or("*")).sp().atom(resp.kind.as_str()).sp();
        if let Some(code) = &resp.code {
            self.response_code(code).sp();
        }
        self.text(&resp.text)
    }

    // date-time = DQUOTE date-day-fixed "-" date-month "-" date-year SP time SP zone DQUOTE
    pub fn date_time(&mut self, t: &DateTime<FixedOffset>) -> &mut Self {
        self.quoted(&t.format("%e-%b-%Y %H:%M:%S %z").to_string())
    }

    // address = "(" addr-name SP addr-adl SP addr-mailbox SP addr-host ")"
    fn address(&mut self, addr: &Address) -> &mut Self {
        self.special(b'(')
            .nstring(addr.name.as_deref())
            .sp()
            .nil()
            .sp()
            .nstring(addr.mailbox.as_deref())
            .sp()
            .nstring(addr.host.as_deref())
            .special(b')')
    }

    fn address_list(&mut self, list: &[Address]) -> &mut Self {
        if list.is_empty() {
            return self.nil();
        }
        self.special(b'(');
        for addr in list {
            self.address(addr);
        }
        self.special(b')')
    }

    pub fn envelope(&mut self, env: &Envelope) -> &mut Self {
        self.special(b'(')
            .nstring(env.date.as_deref())
            .sp()
            .nstring(env.subject.as_deref())
            .sp()
            .address_list(&env.from)
            .sp()
            .address_list(&env.sender)
            .sp()
            .address_list(&env.reply_to)
            .sp()
            .address_list(&env.to)
            .sp()
            .address_list(&env.cc)
            .sp()
            .address_list(&env.bcc)
            .sp()
            .nstring(env.in_reply_to.as_deref())
            .sp()
            .nstring(env.message_id.as_deref())
            .special(b')')
    }

    /// `BODY[<section>]` with the optional `<origin>` of a partial fetch.
    pub fn body_section(&mut self, section: &str, origin: Option<u32>) -> &mut Self {
        self.atom("BODY[").atom(section).special(b']');
        if let Some(origin) = origin {
            self.special(b'<').number(origin).special(b'>');
        }
        self
    }

    /// One `msg-att` item. Body sections are written as inline literals.
    pub fn fetch_item(&mut self, item: &FetchItemData) -> &mut Self {
        match item {
            FetchItemData::Flags(flags) => self.atom("FLAGS").sp().flag_list(flags),
            FetchItemData::Uid(uid) => self.atom("UID").sp().number(*uid),
            FetchItemData::InternalDate(t) => self.atom("INTERNALDATE").sp().date_time(t),
            FetchItemData::Rfc822Size(size) => self.atom("RFC822.SIZE").sp().number_64(*size),
            FetchItemData::Envelope(env) => self.atom("ENVELOPE").sp().envelope(env),
            FetchItemData::BodySection {
                section,
                origin,
                data,
            } => self.body_section(section, *origin).sp().literal(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NumRange, StatusResponseType};

    fn encoded(enc: &mut Encoder) -> String {
        String::from_utf8(enc.split().to_vec()).unwrap()
    }

    #[test]
    fn test_status_response() {
        let mut enc = Encoder::new();
        let resp = StatusResponse::no("Literals are limited to 4096 bytes for this command")
            .with_code(ResponseCode::TooBig);
        enc.status_response(Some("A1"), &resp).crlf();
        assert_eq!(
            encoded(&mut enc),
            "A1 NO [TOOBIG] Literals are limited to 4096 bytes for this command\r\n"
        );

        let bye = StatusResponse::new(StatusResponseType::Bye, "Logging out");
        enc.status_response(None, &bye).crlf();
        assert_eq!(encoded(&mut enc), "* BYE Logging out\r\n");
    }

    #[test]
    fn test_text_strips_line_breaks() {
        let mut enc = Encoder::new();
        enc.text("one\r\ntwo");
        assert_eq!(encoded(&mut enc), "onetwo");
    }

    #[test]
    fn test_string_forms() {
        let mut enc = Encoder::new();
        enc.string("a \"b\"").sp().string("caf\u{e9}").sp().string("x\r\ny");
        assert_eq!(
            encoded(&mut enc),
            "\"a \\\"b\\\"\" {5}\r\ncaf\u{e9} {4}\r\nx\r\ny"
        );

        let mut enc = Encoder::with_quoted_utf8(true);
        enc.string("caf\u{e9}");
        assert_eq!(encoded(&mut enc), "\"caf\u{e9}\"");
    }

    #[test]
    fn test_mailbox() {
        let mut enc = Encoder::new();
        enc.mailbox("INBOX").sp().mailbox("Sent Items").sp().mailbox("");
        assert_eq!(encoded(&mut enc), "INBOX \"Sent Items\" \"\"");
    }

    #[test]
    fn test_fetch_items() {
        let mut enc = Encoder::new();
        enc.fetch_item(&FetchItemData::Flags(vec![Flag::SEEN, Flag::new("$Junk")]))
            .sp()
            .fetch_item(&FetchItemData::Uid(42))
            .sp()
            .fetch_item(&FetchItemData::BodySection {
                section: "HEADER".to_owned(),
                origin: Some(0),
                data: Bytes::from_static(b"a\r\n"),
            });
        assert_eq!(
            encoded(&mut enc),
            "FLAGS (\\Seen $Junk) UID 42 BODY[HEADER]<0> {3}\r\na\r\n"
        );
    }

    #[test]
    fn test_envelope() {
        let mut enc = Encoder::new();
        enc.envelope(&Envelope {
            subject: Some("hi".to_owned()),
            from: vec![Address {
                name: None,
                mailbox: Some("joe".to_owned()),
                host: Some("example.org".to_owned()),
            }],
            ..Envelope::default()
        });
        assert_eq!(
            encoded(&mut enc),
            "(NIL \"hi\" ((NIL NIL \"joe\" \"example.org\")) NIL NIL NIL NIL NIL NIL NIL)"
        );
    }

    #[test]
    fn test_response_code_with_data() {
        let mut enc = Encoder::new();
        enc.response_code(&ResponseCode::CopyUid {
            uid_validity: 7,
            source: SeqSet(vec![NumRange { start: 1, stop: 3 }]),
            dest: SeqSet::range(10, 12),
        });
        assert_eq!(encoded(&mut enc), "[COPYUID 7 1:3 10:12]");

        enc.response_code(&ResponseCode::BadCharset(vec![
            "UTF-8".to_owned(),
            "US-ASCII".to_owned(),
        ]));
        assert_eq!(encoded(&mut enc), "[BADCHARSET (UTF-8 US-ASCII)]");
        enc.response_code(&ResponseCode::BadCharset(Vec::new()));
        assert_eq!(encoded(&mut enc), "[BADCHARSET]");
    }
}
