use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;

use crate::encoder::{FetchWriter, UpdateWriter};
use crate::error::{Error, Result};
use crate::types::{
    AppendData, AppendOptions, CopyData, FetchOptions, ListData, NamespaceData, NumKind,
    SearchData, SearchKey, SelectData, SelectOptions, SeqSet, StatusData, StatusOptions,
    StoreFlags,
};

/// Mailbox logic behind one connection.
///
/// Methods are only called in a connection state where the command is
/// legal. Returning [`Error::Status`] sends that response to the client;
/// any other error is logged and the client sees a generic failure.
#[async_trait]
pub trait Session: Send {
    /// Called once when the connection goes away.
    async fn close(&mut self) -> Result<()>;

    // Not authenticated state

    async fn login(&mut self, username: &str, password: &str) -> Result<()>;

    // Authenticated state

    async fn select(&mut self, mailbox: &str, options: &SelectOptions) -> Result<SelectData>;
    async fn create(&mut self, mailbox: &str) -> Result<()>;
    async fn delete(&mut self, mailbox: &str) -> Result<()>;
    async fn rename(&mut self, mailbox: &str, new_name: &str) -> Result<()>;
    async fn subscribe(&mut self, mailbox: &str) -> Result<()>;
    async fn unsubscribe(&mut self, mailbox: &str) -> Result<()>;
    async fn list(&mut self, reference: &str, patterns: &[String]) -> Result<Vec<ListData>>;
    async fn status(&mut self, mailbox: &str, options: &StatusOptions) -> Result<StatusData>;
    async fn append(
        &mut self,
        mailbox: &str,
        message: Bytes,
        options: &AppendOptions,
    ) -> Result<AppendData>;

    /// Waits for mailbox changes and reports them through `w` until `stop`
    /// fires (the client sent DONE or went away).
    async fn idle(&mut self, w: &UpdateWriter, stop: oneshot::Receiver<()>) -> Result<()>;

    async fn namespace(&mut self) -> Result<NamespaceData> {
        Err(Error::no("NAMESPACE not supported"))
    }

    // Selected state

    async fn unselect(&mut self) -> Result<()>;

    /// Removes messages flagged `\Deleted`, limited to `uids` for UID
    /// EXPUNGE, announcing each removal through `w`.
    async fn expunge(&mut self, w: &UpdateWriter, uids: Option<&SeqSet>) -> Result<()>;

    async fn search(&mut self, kind: NumKind, criteria: &[SearchKey]) -> Result<SearchData>;

    async fn fetch(
        &mut self,
        w: &FetchWriter,
        kind: NumKind,
        set: &SeqSet,
        options: &FetchOptions,
    ) -> Result<()>;

    /// Updates flags, writing the new flags of each message through `w`
    /// unless `flags.silent` is set.
    async fn store(
        &mut self,
        w: &FetchWriter,
        kind: NumKind,
        set: &SeqSet,
        flags: &StoreFlags,
    ) -> Result<()>;

    /// Returns UIDPLUS data when the destination mailbox has it.
    async fn copy(&mut self, kind: NumKind, set: &SeqSet, dest: &str)
        -> Result<Option<CopyData>>;

    /// Moves messages, announcing their removal from the selected mailbox
    /// through `w`. UIDPLUS data goes out first, as an untagged
    /// `OK [COPYUID ...]` written through `w`.
    async fn move_messages(
        &mut self,
        _w: &UpdateWriter,
        _kind: NumKind,
        _set: &SeqSet,
        _dest: &str,
    ) -> Result<()> {
        Err(Error::no("MOVE not supported"))
    }
}
