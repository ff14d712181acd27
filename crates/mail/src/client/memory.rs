//! In-memory mailbox client and transport
//!
//! Used by the test suite and for local runs. Both can be scripted to fail
//! specific operations, and the mailbox records every call with the time it
//! was made so tests can assert on the watcher's timing without sleeping.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::headers::parse_message;
use super::traits::{
    FolderInfo, FolderStatus, IdleResponse, MailboxClient, MessageRef, SearchCriteria, Transport,
};
use crate::error::{MailError, MailResult};
use crate::models::{Message, OutgoingMessage};
use crate::watch::{Clock, FakeClock};

/// Operations of [`MailboxClient`], used for call records and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MailboxOp {
    Connect,
    Disconnect,
    Search,
    FetchAll,
    FetchUnread,
    FetchById,
    FetchRaw,
    IdleStart,
    IdleCheck,
    IdleDone,
    Append,
    Move,
    Delete,
    CreateFolder,
    DeleteFolder,
    RenameFolder,
    ListFolders,
    FolderStatus,
}

/// A recorded client call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub op: MailboxOp,
    /// Clock reading when the call was made
    pub at: Duration,
}

/// Scripted outcome of one `idle_check`
#[derive(Debug, Clone)]
pub enum IdleStep {
    /// Nothing arrives; the check waits out its timeout
    Quiet,
    /// The server announces new messages
    NewData,
    /// The check fails; connection errors also drop the connection
    Fail(MailError),
}

struct StoredMessage {
    uid: u32,
    message: Message,
    raw: Option<Vec<u8>>,
}

impl StoredMessage {
    fn matches(&self, id: &str) -> bool {
        self.uid.to_string() == id
            || self
                .message
                .resolvable_id()
                .is_some_and(|mid| mid.as_str() == id)
    }
}

#[derive(Default)]
struct State {
    connected: bool,
    idle_folder: Option<String>,
    folders: BTreeMap<String, Vec<StoredMessage>>,
    next_uid: u32,
    idle_script: VecDeque<IdleStep>,
    failures: HashMap<MailboxOp, VecDeque<MailError>>,
    calls: Vec<CallRecord>,
}

impl State {
    fn folder(&self, name: &str) -> MailResult<&Vec<StoredMessage>> {
        self.folders
            .get(name)
            .ok_or_else(|| MailError::not_found(format!("folder {}", name)))
    }

    fn folder_mut(&mut self, name: &str) -> MailResult<&mut Vec<StoredMessage>> {
        self.folders
            .get_mut(name)
            .ok_or_else(|| MailError::not_found(format!("folder {}", name)))
    }

    fn store(&mut self, folder: &str, message: Message, raw: Option<Vec<u8>>) -> u32 {
        self.next_uid += 1;
        let uid = self.next_uid;
        self.folders
            .entry(folder.to_string())
            .or_default()
            .push(StoredMessage { uid, message, raw });
        uid
    }
}

/// Mailbox client backed by process memory
///
/// Cloning yields another handle to the same mailbox, so a test can keep
/// one handle for inspection while the watcher owns the other.
#[derive(Clone)]
pub struct InMemoryMailbox {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryMailbox {
    /// Create a mailbox with an INBOX, driven by its own fake clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(FakeClock::new()))
    }

    /// Create a mailbox whose quiet idle checks sleep on `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let mut state = State::default();
        state.folders.insert("INBOX".to_string(), Vec::new());
        Self {
            state: Arc::new(Mutex::new(state)),
            clock,
        }
    }

    /// Add a folder if it does not exist yet
    pub fn add_folder(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.folders.entry(name.to_string()).or_default();
    }

    /// Place a message in a folder as if it had just arrived
    pub fn deliver(&self, folder: &str, message: Message) -> u32 {
        let mut state = self.state.lock().unwrap();
        let message = Message {
            folder: folder.to_string(),
            ..message
        };
        state.store(folder, message, None)
    }

    /// Queue outcomes for upcoming `idle_check` calls
    ///
    /// Once the script is exhausted every check is quiet.
    pub fn script_idle(&self, steps: impl IntoIterator<Item = IdleStep>) {
        let mut state = self.state.lock().unwrap();
        state.idle_script.extend(steps);
    }

    /// Queue `quiet_checks` quiet checks followed by a new-data signal
    pub fn signal_after(&self, quiet_checks: usize) {
        self.script_idle(
            std::iter::repeat_n(IdleStep::Quiet, quiet_checks).chain(std::iter::once(IdleStep::NewData)),
        );
    }

    /// Make the next call of `op` fail with `err`
    pub fn fail_next(&self, op: MailboxOp, err: MailError) {
        let mut state = self.state.lock().unwrap();
        state.failures.entry(op).or_default().push_back(err);
    }

    /// Every call made so far
    pub fn calls(&self) -> Vec<CallRecord> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of calls made to `op`
    pub fn count(&self, op: MailboxOp) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .count()
    }

    /// Messages of a folder in arrival order
    pub fn messages(&self, folder: &str) -> Vec<Message> {
        let state = self.state.lock().unwrap();
        state
            .folders
            .get(folder)
            .map(|msgs| msgs.iter().map(|m| m.message.clone()).collect())
            .unwrap_or_default()
    }

    /// Whether a folder holds a message with this server id or `Message-ID`
    pub fn contains(&self, folder: &str, id: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .folders
            .get(folder)
            .is_some_and(|msgs| msgs.iter().any(|m| m.matches(id)))
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    pub fn idle_active(&self) -> bool {
        self.state.lock().unwrap().idle_folder.is_some()
    }

    /// Record the call, apply injected failures and require a connection
    fn begin(&self, op: MailboxOp) -> MailResult<std::sync::MutexGuard<'_, State>> {
        let mut state = self.state.lock().unwrap();
        let at = self.clock.now();
        state.calls.push(CallRecord { op, at });

        if let Some(err) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            if matches!(err, MailError::Connection(_)) {
                state.connected = false;
                state.idle_folder = None;
            }
            return Err(err);
        }

        let needs_connection = !matches!(op, MailboxOp::Connect | MailboxOp::Disconnect);
        if needs_connection && !state.connected {
            return Err(MailError::connection("not connected"));
        }

        Ok(state)
    }

    fn newest_first<'a>(
        messages: &'a [StoredMessage],
        filter: impl Fn(&StoredMessage) -> bool,
        limit: usize,
    ) -> impl Iterator<Item = &'a StoredMessage> {
        messages.iter().rev().filter(move |m| filter(*m)).take(limit)
    }
}

impl Default for InMemoryMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl MailboxClient for InMemoryMailbox {
    fn connect(&mut self) -> MailResult<()> {
        let mut state = self.begin(MailboxOp::Connect)?;
        state.connected = true;
        state.idle_folder = None;
        Ok(())
    }

    fn disconnect(&mut self) -> MailResult<()> {
        let mut state = self.begin(MailboxOp::Disconnect)?;
        state.connected = false;
        state.idle_folder = None;
        Ok(())
    }

    fn search(
        &mut self,
        mailbox: &str,
        criteria: &SearchCriteria,
        limit: usize,
    ) -> MailResult<Vec<MessageRef>> {
        let state = self.begin(MailboxOp::Search)?;
        let messages = state.folder(mailbox)?;

        let matches = |m: &StoredMessage| match criteria {
            SearchCriteria::All => true,
            SearchCriteria::Unseen => m.message.is_unread,
            SearchCriteria::From(from) => m
                .message
                .from
                .display()
                .to_lowercase()
                .contains(&from.to_lowercase()),
            SearchCriteria::Subject(subject) => m
                .message
                .subject
                .to_lowercase()
                .contains(&subject.to_lowercase()),
            SearchCriteria::MessageId(id) => m.message.resolvable_id() == Some(id),
        };

        Ok(Self::newest_first(messages, matches, limit)
            .map(|m| MessageRef {
                id: m.uid.to_string(),
                message_id: m.message.resolvable_id().cloned(),
            })
            .collect())
    }

    fn fetch_all(&mut self, mailbox: &str, limit: usize) -> MailResult<Vec<Message>> {
        let state = self.begin(MailboxOp::FetchAll)?;
        let messages = state.folder(mailbox)?;
        Ok(Self::newest_first(messages, |_| true, limit)
            .map(|m| m.message.clone())
            .collect())
    }

    fn fetch_unread(&mut self, mailbox: &str, limit: usize) -> MailResult<Vec<Message>> {
        let state = self.begin(MailboxOp::FetchUnread)?;
        let messages = state.folder(mailbox)?;
        // Peek semantics: fetching does not mark messages read
        Ok(Self::newest_first(messages, |m| m.message.is_unread, limit)
            .map(|m| m.message.clone())
            .collect())
    }

    fn fetch_by_id(&mut self, id: &str, mailbox: &str) -> MailResult<Option<Message>> {
        let state = self.begin(MailboxOp::FetchById)?;
        let messages = state.folder(mailbox)?;
        Ok(messages.iter().find(|m| m.matches(id)).map(|m| m.message.clone()))
    }

    fn fetch_raw(&mut self, id: &str, mailbox: &str) -> MailResult<Option<Vec<u8>>> {
        let state = self.begin(MailboxOp::FetchRaw)?;
        let messages = state.folder(mailbox)?;
        Ok(messages.iter().find(|m| m.matches(id)).map(|m| match &m.raw {
            Some(raw) => raw.clone(),
            None => render_stub(&m.message),
        }))
    }

    fn idle_start(&mut self, mailbox: &str, _timeout: Duration) -> MailResult<()> {
        let mut state = self.begin(MailboxOp::IdleStart)?;
        if state.idle_folder.is_some() {
            return Err(MailError::protocol("IDLE already in progress"));
        }
        state.folder(mailbox)?;
        state.idle_folder = Some(mailbox.to_string());
        Ok(())
    }

    fn idle_check(&mut self, timeout: Duration) -> MailResult<Vec<IdleResponse>> {
        {
            let mut state = self.begin(MailboxOp::IdleCheck)?;
            let Some(folder) = state.idle_folder.clone() else {
                return Err(MailError::protocol("no IDLE in progress"));
            };
            match state.idle_script.pop_front().unwrap_or(IdleStep::Quiet) {
                IdleStep::NewData => {
                    let count = state.folders.get(&folder).map_or(0, Vec::len);
                    return Ok(vec![IdleResponse::untagged(format!("{} EXISTS", count))]);
                }
                IdleStep::Fail(err) => {
                    if matches!(err, MailError::Connection(_)) {
                        state.connected = false;
                        state.idle_folder = None;
                    }
                    return Err(err);
                }
                IdleStep::Quiet => {}
            }
        }

        // Wait out the slice without holding the lock
        self.clock.sleep(timeout);
        Ok(Vec::new())
    }

    fn idle_done(&mut self) -> MailResult<()> {
        let mut state = self.begin(MailboxOp::IdleDone)?;
        if state.idle_folder.take().is_none() {
            return Err(MailError::protocol("no IDLE in progress"));
        }
        Ok(())
    }

    fn append_message(&mut self, raw: &[u8], mailbox: &str) -> MailResult<bool> {
        let mut state = self.begin(MailboxOp::Append)?;
        state.folder(mailbox)?;
        let message = parse_message(raw, mailbox);
        state.store(mailbox, message, Some(raw.to_vec()));
        Ok(true)
    }

    fn move_messages_batch(
        &mut self,
        ids: &[String],
        from: &str,
        to: &str,
    ) -> MailResult<HashMap<String, bool>> {
        let mut state = self.begin(MailboxOp::Move)?;
        state.folder(to)?;

        let mut results = HashMap::new();
        for id in ids {
            let source = state.folder_mut(from)?;
            let moved = match source.iter().position(|m| m.matches(id)) {
                Some(pos) => {
                    let mut stored = source.remove(pos);
                    stored.message.folder = to.to_string();
                    state.folder_mut(to)?.push(stored);
                    true
                }
                None => false,
            };
            results.insert(id.clone(), moved);
        }
        Ok(results)
    }

    fn delete_message(&mut self, id: &str, mailbox: &str) -> MailResult<()> {
        let mut state = self.begin(MailboxOp::Delete)?;
        let messages = state.folder_mut(mailbox)?;
        match messages.iter().position(|m| m.matches(id)) {
            Some(pos) => {
                messages.remove(pos);
                Ok(())
            }
            None => Err(MailError::not_found(format!("message {} in {}", id, mailbox))),
        }
    }

    fn create_folder(&mut self, name: &str) -> MailResult<bool> {
        let mut state = self.begin(MailboxOp::CreateFolder)?;
        if state.folders.contains_key(name) {
            return Ok(false);
        }
        state.folders.insert(name.to_string(), Vec::new());
        Ok(true)
    }

    fn delete_folder(&mut self, name: &str) -> MailResult<bool> {
        let mut state = self.begin(MailboxOp::DeleteFolder)?;
        Ok(state.folders.remove(name).is_some())
    }

    fn rename_folder(&mut self, from: &str, to: &str) -> MailResult<bool> {
        let mut state = self.begin(MailboxOp::RenameFolder)?;
        if state.folders.contains_key(to) {
            return Ok(false);
        }
        match state.folders.remove(from) {
            Some(mut messages) => {
                for stored in &mut messages {
                    stored.message.folder = to.to_string();
                }
                state.folders.insert(to.to_string(), messages);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn list_folders(&mut self) -> MailResult<Vec<FolderInfo>> {
        let state = self.begin(MailboxOp::ListFolders)?;
        Ok(state.folders.keys().map(FolderInfo::new).collect())
    }

    fn folder_status(&mut self, name: &str) -> MailResult<FolderStatus> {
        let state = self.begin(MailboxOp::FolderStatus)?;
        let messages = state.folder(name)?;
        Ok(FolderStatus {
            messages: messages.len() as u32,
            unseen: messages.iter().filter(|m| m.message.is_unread).count() as u32,
            recent: 0,
        })
    }
}

/// Header-only rendering for messages that were delivered without raw bytes
fn render_stub(message: &Message) -> Vec<u8> {
    let mut outgoing = OutgoingMessage::new(message.to.clone(), message.subject.clone(), "")
        .with_from(message.from.display())
        .with_cc(message.cc.clone());
    outgoing.message_id = message.resolvable_id().cloned();
    outgoing.in_reply_to = message.in_reply_to.clone();
    outgoing.references = message.references.clone();
    outgoing.date = message.date;
    outgoing.to_rfc822()
}

/// A message accepted by an [`InMemoryTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub raw: Vec<u8>,
    pub recipients: Vec<String>,
}

#[derive(Default)]
struct TransportState {
    failures: VecDeque<MailError>,
    fail_always: Option<MailError>,
    sent: Vec<SentMessage>,
    attempts: usize,
}

/// Transport that records messages instead of delivering them
pub struct InMemoryTransport {
    id: String,
    state: Mutex<TransportState>,
}

impl InMemoryTransport {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(TransportState::default()),
        }
    }

    /// Fail the next send with `err`
    pub fn fail_next(&self, err: MailError) {
        self.state.lock().unwrap().failures.push_back(err);
    }

    /// Fail every send with `err` until [`recover`](Self::recover) is called
    pub fn fail_always(&self, err: MailError) {
        self.state.lock().unwrap().fail_always = Some(err);
    }

    pub fn recover(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_always = None;
        state.failures.clear();
    }

    /// Messages accepted so far
    pub fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Number of send attempts, successful or not
    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }
}

impl Transport for InMemoryTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, raw: &[u8], recipients: &[String]) -> MailResult<()> {
        let mut state = self.state.lock().unwrap();
        state.attempts += 1;

        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }
        if let Some(err) = &state.fail_always {
            return Err(err.clone());
        }

        state.sent.push(SentMessage {
            raw: raw.to_vec(),
            recipients: recipients.to_vec(),
        });
        Ok(())
    }
}
