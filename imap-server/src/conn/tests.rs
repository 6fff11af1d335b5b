use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{
    self, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    DuplexStream, ReadHalf, WriteHalf,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName,
};
use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use super::serve;
use crate::encoder::{FetchWriter, UpdateWriter};
use crate::error::{Error, Result};
use crate::options::{ConnInfo, Options};
use crate::session::Session;
use crate::transport::Link;
use crate::types::*;

type Calls = Arc<Mutex<Vec<String>>>;

struct MockSession {
    calls: Calls,
}

impl MockSession {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl Session for MockSession {
    async fn close(&mut self) -> Result<()> {
        self.record("close");
        Ok(())
    }

    async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        self.record(format!("login {username} {password}"));
        if password != "secret" {
            return Err(StatusResponse::no("Invalid credentials")
                .with_code(ResponseCode::AuthenticationFailed)
                .into());
        }
        Ok(())
    }

    async fn select(&mut self, mailbox: &str, options: &SelectOptions) -> Result<SelectData> {
        self.record(format!("select {mailbox} read_only={}", options.read_only));
        Ok(SelectData {
            flags: vec![Flag::SEEN, Flag::DELETED],
            permanent_flags: vec![Flag::SEEN, Flag::DELETED],
            num_messages: 3,
            uid_next: 4,
            uid_validity: 1,
            read_only: false,
        })
    }

    async fn create(&mut self, mailbox: &str) -> Result<()> {
        self.record(format!("create {mailbox}"));
        match mailbox {
            "Existing" => Err(StatusResponse::no("Mailbox already exists")
                .with_code(ResponseCode::AlreadyExists)
                .into()),
            "Broken" => Err(Error::other("database connection refused")),
            _ => Ok(()),
        }
    }

    async fn delete(&mut self, mailbox: &str) -> Result<()> {
        self.record(format!("delete {mailbox}"));
        if mailbox == "Panic" {
            panic!("mailbox store corrupted");
        }
        Ok(())
    }

    async fn rename(&mut self, mailbox: &str, new_name: &str) -> Result<()> {
        self.record(format!("rename {mailbox} {new_name}"));
        Ok(())
    }

    async fn subscribe(&mut self, mailbox: &str) -> Result<()> {
        self.record(format!("subscribe {mailbox}"));
        Ok(())
    }

    async fn unsubscribe(&mut self, mailbox: &str) -> Result<()> {
        self.record(format!("unsubscribe {mailbox}"));
        Ok(())
    }

    async fn list(&mut self, reference: &str, patterns: &[String]) -> Result<Vec<ListData>> {
        self.record(format!("list {reference:?} {patterns:?}"));
        Ok(vec![ListData {
            attrs: vec![],
            delim: Some('/'),
            mailbox: "Entwürfe".to_owned(),
        }])
    }

    async fn status(&mut self, mailbox: &str, _options: &StatusOptions) -> Result<StatusData> {
        self.record(format!("status {mailbox}"));
        Ok(StatusData {
            messages: Some(3),
            uid_next: Some(4),
            ..StatusData::default()
        })
    }

    async fn append(
        &mut self,
        mailbox: &str,
        message: Bytes,
        options: &AppendOptions,
    ) -> Result<AppendData> {
        self.record(format!(
            "append {mailbox} {:?} {}",
            options.flags,
            String::from_utf8_lossy(&message)
        ));
        Ok(AppendData {
            uid_validity: 1,
            uid: 5,
        })
    }

    async fn idle(&mut self, w: &UpdateWriter, stop: oneshot::Receiver<()>) -> Result<()> {
        self.record("idle");
        w.exists(4).await?;
        let _ = stop.await;
        Ok(())
    }

    async fn unselect(&mut self) -> Result<()> {
        self.record("unselect");
        Ok(())
    }

    async fn expunge(&mut self, w: &UpdateWriter, uids: Option<&SeqSet>) -> Result<()> {
        self.record(format!("expunge {uids:?}"));
        w.expunge(2).await?;
        Ok(())
    }

    async fn search(&mut self, kind: NumKind, criteria: &[SearchKey]) -> Result<SearchData> {
        self.record(format!("search {kind:?} {criteria:?}"));
        Ok(SearchData { all: vec![1, 3] })
    }

    async fn fetch(
        &mut self,
        w: &FetchWriter,
        _kind: NumKind,
        set: &SeqSet,
        options: &FetchOptions,
    ) -> Result<()> {
        self.record(format!(
            "fetch {set} uid={}",
            options.contains(&FetchItem::Uid)
        ));
        w.write_message(&FetchMessage {
            seq: 1,
            items: vec![
                FetchItemData::Uid(1),
                FetchItemData::Flags(vec![Flag::SEEN]),
                FetchItemData::BodySection {
                    section: String::new(),
                    origin: None,
                    data: Bytes::from_static(b"hi"),
                },
            ],
        })
        .await?;
        Ok(())
    }

    async fn store(
        &mut self,
        w: &FetchWriter,
        _kind: NumKind,
        set: &SeqSet,
        flags: &StoreFlags,
    ) -> Result<()> {
        self.record(format!("store {set} {flags:?}"));
        if !flags.silent {
            w.write_message(&FetchMessage {
                seq: 1,
                items: vec![FetchItemData::Flags(flags.flags.clone())],
            })
            .await?;
        }
        Ok(())
    }

    async fn copy(
        &mut self,
        _kind: NumKind,
        set: &SeqSet,
        dest: &str,
    ) -> Result<Option<CopyData>> {
        self.record(format!("copy {set} {dest}"));
        Ok(Some(CopyData {
            uid_validity: 1,
            source_uids: SeqSet::range(1, 2),
            dest_uids: SeqSet::range(5, 6),
        }))
    }
}

// A test CA and a certificate for "localhost" signed by it.
const CA_CERT: &[u8] = include_bytes!("testdata/ca.der");
const SERVER_CERT: &[u8] = include_bytes!("testdata/localhost.der");
const SERVER_KEY: &[u8] = include_bytes!("testdata/localhost.key.der");

fn tls_acceptor() -> TlsAcceptor {
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(SERVER_KEY));
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![CertificateDer::from(SERVER_CERT)], key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

fn tls_connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.add(CertificateDer::from(CA_CERT)).unwrap();
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

struct Client<S = DuplexStream> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    conn: JoinHandle<()>,
}

impl Client {
    /// Runs the TLS handshake over the plaintext stream, after the server
    /// accepted STARTTLS.
    async fn start_tls(self) -> Client<TlsStream<DuplexStream>> {
        assert!(self.reader.buffer().is_empty());
        let stream = self.reader.into_inner().unsplit(self.writer);
        let domain = ServerName::try_from("localhost").unwrap();
        let tls = tls_connector().connect(domain, stream).await.unwrap();
        Client::new(tls, self.conn)
    }
}

impl<S: AsyncRead + AsyncWrite> Client<S> {
    fn new(stream: S, conn: JoinHandle<()>) -> Self {
        let (reader, writer) = io::split(stream);
        Client {
            reader: BufReader::new(reader),
            writer,
            conn,
        }
    }

    async fn send(&mut self, data: &str) {
        self.writer.write_all(data.as_bytes()).await.unwrap();
    }

    async fn line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line
    }

    async fn expect(&mut self, want: &str) {
        assert_eq!(self.line().await, format!("{want}\r\n"));
    }

    async fn skip_greeting(&mut self) {
        assert!(self.line().await.starts_with("* OK [CAPABILITY "));
    }

    /// Asserts the server closed the connection and its task finished.
    async fn expect_closed(mut self) {
        let mut rest = String::new();
        self.reader.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "");
        self.conn.await.unwrap();
    }
}

fn options(calls: &Calls) -> Options {
    let calls = calls.clone();
    let mut options = Options::new(move |_info: &ConnInfo| {
        Ok(Box::new(MockSession {
            calls: calls.clone(),
        }) as Box<dyn Session>)
    });
    options.insecure_auth = true;
    options
}

fn connect(options: Options) -> Client {
    let (client, server) = io::duplex(64 * 1024);
    let conn = tokio::spawn(serve(
        Arc::new(options),
        Link::new(Box::new(server)),
        ConnInfo {
            peer_addr: None,
            tls: false,
        },
    ));
    Client::new(client, conn)
}

async fn logged_in(options: Options) -> Client {
    let mut client = connect(options);
    client.skip_greeting().await;
    client.send("l LOGIN joe secret\r\n").await;
    client.expect("l OK LOGIN completed").await;
    client
}

async fn selected(options: Options) -> Client {
    let mut client = logged_in(options).await;
    client.send("s SELECT INBOX\r\n").await;
    while !client.line().await.starts_with("s OK") {}
    client
}

#[tokio::test]
async fn test_session_flow() {
    let calls = Calls::default();
    let mut options = options(&calls);
    options.insecure_auth = false;
    let mut client = connect(options);

    client
        .expect("* OK [CAPABILITY IMAP4rev1 SASL-IR LITERAL- LOGINDISABLED] IMAP4rev1 server ready")
        .await;
    client.send("a CAPABILITY\r\n").await;
    client
        .expect("* CAPABILITY IMAP4rev1 SASL-IR LITERAL- LOGINDISABLED")
        .await;
    client.expect("a OK CAPABILITY completed").await;
    client.send("b NOOP\r\n").await;
    client.expect("b OK NOOP completed").await;
    client.send("c LOGOUT\r\n").await;
    client.expect("* BYE Logging out").await;
    client.expect("c OK LOGOUT completed").await;
    client.expect_closed().await;

    assert_eq!(*calls.lock().unwrap(), vec!["close"]);
}

#[tokio::test]
async fn test_select() {
    let calls = Calls::default();
    let mut client = logged_in(options(&calls)).await;

    client.send("a CAPABILITY\r\n").await;
    client
        .expect("* CAPABILITY IMAP4rev1 SASL-IR LITERAL- UNSELECT ENABLE IDLE")
        .await;
    client.expect("a OK CAPABILITY completed").await;

    client.send("b SELECT inbox\r\n").await;
    client.expect("* FLAGS (\\Seen \\Deleted)").await;
    client
        .expect("* OK [PERMANENTFLAGS (\\Seen \\Deleted)] Permanent flags")
        .await;
    client.expect("* 3 EXISTS").await;
    client.expect("* OK [UIDVALIDITY 1] UIDs valid").await;
    client.expect("* OK [UIDNEXT 4] Predicted next UID").await;
    client.expect("b OK [READ-WRITE] SELECT completed").await;

    client.send("c EXAMINE Archive\r\n").await;
    client
        .expect("* OK [CLOSED] Previous mailbox is now closed")
        .await;
    assert_eq!(client.line().await, "* FLAGS (\\Seen \\Deleted)\r\n");
    while !client.line().await.starts_with("* OK [UIDNEXT") {}
    client.expect("c OK [READ-ONLY] EXAMINE completed").await;

    client.send("d CLOSE\r\n").await;
    client.expect("d OK CLOSE completed").await;
    client.send("e FETCH 1 FLAGS\r\n").await;
    client
        .expect("e BAD [CLIENTBUG] This command is only valid in the selected state")
        .await;

    assert_eq!(
        *calls.lock().unwrap(),
        vec![
            "login joe secret",
            "select INBOX read_only=false",
            "unselect",
            "select Archive read_only=true",
            "expunge None",
            "unselect",
        ]
    );
}

#[tokio::test]
async fn test_unknown_command() {
    let calls = Calls::default();
    let mut client = connect(options(&calls));
    client.skip_greeting().await;

    client.send("a FROBNICATE INBOX {3}\r\n").await;
    client.expect("a BAD Unknown command").await;
    client.send("b NOOP\r\n").await;
    client.expect("b OK NOOP completed").await;
}

#[tokio::test]
async fn test_state_is_checked_before_the_session() {
    let calls = Calls::default();
    let mut client = connect(options(&calls));
    client.skip_greeting().await;

    client.send("a SELECT INBOX\r\n").await;
    client
        .expect("a BAD [CLIENTBUG] This command is only valid in the authenticated state")
        .await;
    client.send("b LOGOUT\r\n").await;
    client.expect("* BYE Logging out").await;
    client.expect("b OK LOGOUT completed").await;
    client.expect_closed().await;

    assert_eq!(*calls.lock().unwrap(), vec!["close"]);
}

#[tokio::test]
async fn test_syntax_error_recovers() {
    let calls = Calls::default();
    let mut client = connect(options(&calls));
    client.skip_greeting().await;

    client.send("a NOOP trailing garbage\r\nb NOOP\r\n").await;
    assert!(client
        .line()
        .await
        .starts_with("a BAD [CLIENTBUG] Syntax error: "));
    client.expect("b OK NOOP completed").await;
}

#[tokio::test]
async fn test_small_literal() {
    let calls = Calls::default();
    let mut client = connect(options(&calls));
    client.skip_greeting().await;

    client.send("a LOGIN {3}\r\n").await;
    client.expect("+ Ready for literal data").await;
    client.send("joe {6+}\r\nsecret\r\n").await;
    client.expect("a OK LOGIN completed").await;

    assert_eq!(*calls.lock().unwrap(), vec!["login joe secret"]);
}

#[tokio::test]
async fn test_large_sync_literal_is_rejected() {
    let calls = Calls::default();
    let mut client = connect(options(&calls));
    client.skip_greeting().await;

    client.send("a LOGIN {5000}\r\n").await;
    client
        .expect("a NO [TOOBIG] Literals are limited to 4096 bytes for this command")
        .await;
    client.send("b NOOP\r\n").await;
    client.expect("b OK NOOP completed").await;

    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_large_non_sync_literal_closes() {
    let calls = Calls::default();
    let mut client = connect(options(&calls));
    client.skip_greeting().await;

    client.send("a LOGIN {5000+}\r\n").await;
    client
        .expect("a BAD Non-synchronizing literals are limited to 4096 bytes")
        .await;
    client.expect_closed().await;

    assert_eq!(*calls.lock().unwrap(), vec!["close"]);
}

#[tokio::test]
async fn test_session_errors() {
    let calls = Calls::default();
    let mut client = logged_in(options(&calls)).await;

    client.send("a CREATE Existing\r\n").await;
    client
        .expect("a NO [ALREADYEXISTS] Mailbox already exists")
        .await;
    client.send("b CREATE Broken\r\n").await;
    client
        .expect("b NO [SERVERBUG] Internal server error")
        .await;
    client.send("c LOGIN joe secret\r\n").await;
    client
        .expect("c BAD [CLIENTBUG] This command is only valid in the not authenticated state")
        .await;
}

#[tokio::test]
async fn test_panic_closes_connection() {
    let calls = Calls::default();
    let mut client = logged_in(options(&calls)).await;

    client.send("a DELETE Panic\r\n").await;
    client.expect_closed().await;

    assert_eq!(
        *calls.lock().unwrap(),
        vec!["login joe secret", "delete Panic", "close"]
    );
}

#[tokio::test]
async fn test_login_requires_tls() {
    let calls = Calls::default();
    let mut options = options(&calls);
    options.insecure_auth = false;
    let mut client = connect(options);
    client.skip_greeting().await;

    client.send("a LOGIN joe secret\r\n").await;
    client
        .expect("a NO [PRIVACYREQUIRED] TLS is required to authenticate")
        .await;
    client.send("b STARTTLS\r\n").await;
    client.expect("b NO STARTTLS not supported").await;

    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_starttls_upgrade() {
    let calls = Calls::default();
    let mut options = options(&calls);
    options.insecure_auth = false;
    options.tls = Some(tls_acceptor());
    let mut client = connect(options);

    let greeting = client.line().await;
    assert!(greeting.contains(" STARTTLS "), "{greeting}");
    assert!(greeting.contains(" LOGINDISABLED]"), "{greeting}");
    client.send("a STARTTLS\r\n").await;
    client.expect("a OK Begin TLS negotiation now").await;

    let mut client = client.start_tls().await;
    client.send("b NOOP\r\n").await;
    client.expect("b OK NOOP completed").await;
    client.send("c CAPABILITY\r\n").await;
    let caps = client.line().await;
    assert!(caps.starts_with("* CAPABILITY "), "{caps}");
    assert!(caps.contains(" AUTH=PLAIN"), "{caps}");
    assert!(!caps.contains("STARTTLS"), "{caps}");
    client.expect("c OK CAPABILITY completed").await;
    client.send("d STARTTLS\r\n").await;
    client.expect("d BAD STARTTLS not available").await;
    client.send("e LOGIN joe secret\r\n").await;
    client.expect("e OK LOGIN completed").await;
    client.send("f LOGOUT\r\n").await;
    client.expect("* BYE Logging out").await;
    client.expect("f OK LOGOUT completed").await;

    assert_eq!(calls.lock().unwrap()[0], "login joe secret");
}

#[tokio::test]
async fn test_starttls_refusals() {
    let calls = Calls::default();
    let mut options = options(&calls);
    options.tls = Some(tls_acceptor());
    let mut client = connect(options);
    client.skip_greeting().await;

    // The pipelined NOOP was sent in plaintext and is dropped unanswered.
    client.send("a STARTTLS\r\nb NOOP\r\n").await;
    client
        .expect("a BAD STARTTLS must be the last command in a pipeline")
        .await;
    client.send("c NOOP\r\n").await;
    client.expect("c OK NOOP completed").await;

    client.send("l LOGIN joe secret\r\n").await;
    client.expect("l OK LOGIN completed").await;
    client.send("d STARTTLS\r\n").await;
    client.expect("d BAD STARTTLS not available").await;
    client.send("e NOOP\r\n").await;
    client.expect("e OK NOOP completed").await;
}

#[tokio::test]
async fn test_deeply_nested_search_is_rejected() {
    let calls = Calls::default();
    let mut client = connect(options(&calls));
    client.skip_greeting().await;

    client
        .send(&format!("a SEARCH {}\r\n", "(".repeat(30_000)))
        .await;
    client
        .expect("a BAD [CLIENTBUG] Syntax error: expected shallower search key nesting")
        .await;
    client.send("b NOOP\r\n").await;
    client.expect("b OK NOOP completed").await;
    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_authenticate_plain() {
    let calls = Calls::default();
    let mut client = connect(options(&calls));
    client.skip_greeting().await;

    client.send("a AUTHENTICATE PLAIN\r\n").await;
    client.expect("+ ").await;
    client.send("*\r\n").await;
    client.expect("a BAD AUTHENTICATE cancelled").await;

    client
        .send("b AUTHENTICATE PLAIN YWRtaW4Aam9lAHNlY3JldA==\r\n")
        .await;
    client
        .expect("b NO [AUTHORIZATIONFAILED] Cannot authorize as a different identity")
        .await;

    client.send("c AUTHENTICATE PLAIN\r\n").await;
    client.expect("+ ").await;
    client.send("AGpvZQBzZWNyZXQ=\r\n").await;
    client.expect("c OK AUTHENTICATE completed").await;

    assert_eq!(*calls.lock().unwrap(), vec!["login joe secret"]);
}

#[tokio::test]
async fn test_enable_utf8() {
    let calls = Calls::default();
    let mut options = options(&calls);
    options.caps.insert(Cap::UTF8_ACCEPT);
    let mut client = logged_in(options).await;

    client.send("a LIST \"\" *\r\n").await;
    client.expect("* LIST () \"/\" {9}").await;
    client.expect("Entwürfe").await;
    client.expect("a OK LIST completed").await;

    client.send("b ENABLE utf8=accept CONDSTORE\r\n").await;
    client.expect("* ENABLED UTF8=ACCEPT").await;
    client.expect("b OK ENABLE completed").await;

    client.send("c LIST \"\" (* %)\r\n").await;
    client.expect("* LIST () \"/\" \"Entwürfe\"").await;
    client.expect("c OK LIST completed").await;

    let calls = calls.lock().unwrap();
    assert_eq!(calls[2], r#"list "" ["*", "%"]"#);
}

#[tokio::test]
async fn test_status() {
    let calls = Calls::default();
    let mut client = logged_in(options(&calls)).await;

    client.send("a STATUS INBOX (MESSAGES UIDNEXT)\r\n").await;
    client.expect("* STATUS INBOX (MESSAGES 3 UIDNEXT 4)").await;
    client.expect("a OK STATUS completed").await;

    client.send("b NAMESPACE\r\n").await;
    client.expect("b NO NAMESPACE not supported").await;
}

#[tokio::test]
async fn test_append() {
    let calls = Calls::default();
    let mut options = options(&calls);
    options.append_limit = 16;
    let mut client = logged_in(options).await;

    client.send("a APPEND INBOX (\\Seen) {5}\r\n").await;
    client.expect("+ Ready for literal data").await;
    client.send("hello\r\n").await;
    client.expect("a OK [APPENDUID 1 5] APPEND completed").await;

    client.send("b APPEND INBOX {20}\r\n").await;
    client
        .expect("b NO [TOOBIG] Message exceeds the size limit")
        .await;
    client.send("c NOOP\r\n").await;
    client.expect("c OK NOOP completed").await;

    client.send("d APPEND INBOX {20+}\r\n").await;
    client
        .expect("d NO [TOOBIG] Message exceeds the size limit")
        .await;
    client.expect_closed().await;

    assert_eq!(calls.lock().unwrap()[1], "append INBOX [Flag(\"\\\\Seen\")] hello");
}

#[tokio::test]
async fn test_idle() {
    let calls = Calls::default();
    let mut client = logged_in(options(&calls)).await;

    client.send("a IDLE\r\n").await;
    client.expect("+ idling").await;
    client.expect("* 4 EXISTS").await;
    client.send("DONE\r\n").await;
    client.expect("a OK IDLE completed").await;

    client.send("b IDLE\r\n").await;
    client.expect("+ idling").await;
    client.expect("* 4 EXISTS").await;
    client.send("STOP\r\n").await;
    client
        .expect("b BAD [CLIENTBUG] Syntax error: expected DONE to end IDLE command")
        .await;
}

#[tokio::test]
async fn test_fetch_and_store() {
    let calls = Calls::default();
    let mut client = selected(options(&calls)).await;

    client.send("a UID FETCH 1 (FLAGS BODY[])\r\n").await;
    client.expect("* 1 FETCH (UID 1 FLAGS (\\Seen) BODY[] {2}").await;
    client.expect("hi)").await;
    client.expect("a OK UID FETCH completed").await;

    client.send("b STORE 1 +FLAGS (\\Deleted)\r\n").await;
    client.expect("* 1 FETCH (FLAGS (\\Deleted))").await;
    client.expect("b OK STORE completed").await;

    client.send("c STORE 1 FLAGS.SILENT \\Seen\r\n").await;
    client.expect("c OK STORE completed").await;

    client.send("d EXPUNGE\r\n").await;
    client.expect("* 2 EXPUNGE").await;
    client.expect("d OK EXPUNGE completed").await;

    let calls = calls.lock().unwrap();
    assert_eq!(calls[2], "fetch 1 uid=true");
    assert!(calls[3].starts_with("store 1 StoreFlags { action: Add, silent: false"));
    assert!(calls[4].starts_with("store 1 StoreFlags { action: Set, silent: true"));
}

#[tokio::test]
async fn test_copy_move_search() {
    let calls = Calls::default();
    let mut client = selected(options(&calls)).await;

    client.send("a COPY 1:2 Archive\r\n").await;
    client.expect("a OK [COPYUID 1 1:2 5:6] COPY completed").await;

    client.send("b UID MOVE 1 Archive\r\n").await;
    client.expect("b NO MOVE not supported").await;

    client.send("c UID SEARCH CHARSET utf-8 UNSEEN FROM joe\r\n").await;
    client.expect("* SEARCH 1 3").await;
    client.expect("c OK UID SEARCH completed").await;

    client.send("d SEARCH CHARSET KOI8-R ALL\r\n").await;
    client
        .expect("d NO [BADCHARSET (UTF-8 US-ASCII)] Only UTF-8 is supported")
        .await;
    client.send("e NOOP\r\n").await;
    client.expect("e OK NOOP completed").await;

    let calls = calls.lock().unwrap();
    assert_eq!(calls[2], "copy 1:2 Archive");
    assert_eq!(
        calls[3],
        r#"search Uid [Unseen, From("joe")]"#
    );
}

#[tokio::test]
async fn test_session_refused() {
    let options = Options::new(|_info: &ConnInfo| {
        Err(StatusResponse::bye("Too many connections").into())
    });
    let mut client = connect(options);
    client.expect("* BYE Too many connections").await;
    client.expect_closed().await;
}

#[tokio::test(start_paused = true)]
async fn test_idle_deadline() {
    let calls = Calls::default();
    let mut options = options(&calls);
    options.timeouts.idle_read = Duration::from_secs(60);
    let client = logged_in(options).await;

    let start = tokio::time::Instant::now();
    client.expect_closed().await;
    assert!(start.elapsed() >= Duration::from_secs(60));
    assert_eq!(calls.lock().unwrap().last().unwrap(), "close");
}
