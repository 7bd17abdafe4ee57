//! Document store for conversations and their turns.
//!
//! [`ConversationStore`] is the seam the recorder and the query service talk
//! to. [`JsonFileStore`] keeps both collections in memory and persists them
//! under the configured state path.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use pr_domain::conversation::{
    ActorType, Conversation, ConversationStatus, ConversationTurn, TurnError, TurnResponse,
    TurnStatus, CONVERSATIONS_COLLECTION, TURNS_COLLECTION,
};
use pr_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query & mutation inputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One page of results plus the unpaged match count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub total: usize,
    pub items: Vec<T>,
}

/// Conversation search. `q` must already be lowercased.
#[derive(Debug, Clone, Default)]
pub struct ConversationFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub actor_type: Option<ActorType>,
    pub status: Option<ConversationStatus>,
    pub session_id: Option<String>,
    pub q: Option<String>,
    pub limit: usize,
    pub skip: usize,
}

impl ConversationFilter {
    pub fn matches(&self, conv: &Conversation) -> bool {
        if self.start.is_some_and(|start| conv.last_message_at < start) {
            return false;
        }
        if self.end.is_some_and(|end| conv.last_message_at > end) {
            return false;
        }
        if self.actor_type.is_some_and(|t| conv.actor.actor_type != t) {
            return false;
        }
        if self.status.is_some_and(|s| conv.status != s) {
            return false;
        }
        if let Some(ref sid) = self.session_id {
            if conv.session_id.as_deref() != Some(sid.as_str()) {
                return false;
            }
        }
        match self.q {
            Some(ref q) => [
                conv.last_user_message.as_deref(),
                conv.last_assistant_message.as_deref(),
                Some(conv.conversation_id.as_str()),
                conv.session_id.as_deref(),
            ]
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(q)),
            None => true,
        }
    }
}

/// Turn search inside one conversation. `q` must already be lowercased.
#[derive(Debug, Clone, Default)]
pub struct TurnFilter {
    pub conversation_id: String,
    pub q: Option<String>,
    pub limit: usize,
    pub skip: usize,
}

impl TurnFilter {
    pub fn matches(&self, turn: &ConversationTurn) -> bool {
        if turn.conversation_id != self.conversation_id {
            return false;
        }
        match self.q {
            Some(ref q) => [
                turn.request.last_user_message.as_deref(),
                turn.response.as_ref().map(|r| r.message.as_str()),
                Some(turn.turn_id.as_str()),
            ]
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(q)),
            None => true,
        }
    }
}

/// Terminal state written onto a pending turn.
#[derive(Debug, Clone)]
pub struct TurnFinalization {
    pub status: TurnStatus,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub response: Option<TurnResponse>,
    pub error: Option<TurnError>,
}

impl TurnFinalization {
    fn apply_to(self, turn: &mut ConversationTurn) {
        turn.status = self.status;
        turn.completed_at = Some(self.completed_at);
        turn.duration_ms = Some(self.duration_ms);
        turn.response = self.response;
        turn.error = self.error;
    }
}

/// Change applied to a conversation aggregate, creating it if needed.
#[derive(Debug, Clone)]
pub enum ConversationUpdate {
    TurnStarted {
        at: DateTime<Utc>,
        actor_type: ActorType,
        session_id: Option<String>,
        location: Option<String>,
        last_user_message: Option<String>,
        input_chars: u64,
    },
    TurnFinished {
        at: DateTime<Utc>,
        status: TurnStatus,
        duration_ms: u64,
        assistant_message: Option<String>,
        error: Option<String>,
    },
}

impl ConversationUpdate {
    /// Fold this update into `existing` (or a fresh aggregate).
    pub fn apply(self, conversation_id: &str, existing: Option<Conversation>) -> Conversation {
        match self {
            ConversationUpdate::TurnStarted {
                at,
                actor_type,
                session_id,
                location,
                last_user_message,
                input_chars,
            } => {
                let mut conv = existing
                    .unwrap_or_else(|| Conversation::new(conversation_id.to_owned(), actor_type, at));
                conv.turn_count += 1;
                conv.total_input_chars += input_chars;
                conv.last_message_at = conv.last_message_at.max(at);
                conv.status = ConversationStatus::Active;
                if session_id.is_some() {
                    conv.session_id = session_id;
                }
                if location.is_some() {
                    conv.location = location;
                }
                if last_user_message.is_some() {
                    conv.last_user_message = last_user_message;
                }
                conv
            }
            ConversationUpdate::TurnFinished {
                at,
                status,
                duration_ms,
                assistant_message,
                error,
            } => {
                let mut conv = existing.unwrap_or_else(|| {
                    Conversation::new(conversation_id.to_owned(), ActorType::Public, at)
                });
                conv.last_message_at = conv.last_message_at.max(at);
                conv.total_duration_ms += duration_ms;
                if let Some(ref text) = assistant_message {
                    conv.total_output_chars += text.chars().count() as u64;
                }

                match status {
                    TurnStatus::Completed => {
                        conv.successful_turns += 1;
                        conv.status = ConversationStatus::Active;
                        conv.last_error = None;
                        if assistant_message.is_some() {
                            conv.last_assistant_message = assistant_message;
                        }
                    }
                    TurnStatus::Failed => {
                        conv.failed_turns += 1;
                        conv.status = ConversationStatus::Errored;
                        conv.last_error = error;
                        if assistant_message.is_some() {
                            conv.last_assistant_message = assistant_message;
                        }
                    }
                    TurnStatus::Cancelled => {
                        conv.cancelled_turns += 1;
                    }
                    TurnStatus::Pending => {}
                }
                conv
            }
        }
    }
}

/// What a delete or prune removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Removed {
    pub conversations: usize,
    pub turns: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Every mutation is all-or-nothing: when it returns `Err`, nothing it
/// touched is visible to later reads.
#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    /// Insert a pending turn and fold `update` into its conversation.
    ///
    /// The store overwrites `turn_index` with `max(existing) + 1` (0 for a
    /// new conversation) under the same lock as the insert, and returns the
    /// stored document.
    async fn open_turn(
        &self,
        turn: ConversationTurn,
        update: ConversationUpdate,
    ) -> Result<ConversationTurn>;

    /// Move a pending turn to its final state and fold `update` into its
    /// conversation. Returns `None`, changing nothing, when the turn does
    /// not exist or is already final.
    async fn finalize_turn(
        &self,
        turn_id: &str,
        finalization: TurnFinalization,
        update: ConversationUpdate,
    ) -> Result<Option<ConversationTurn>>;

    async fn get_turn(&self, turn_id: &str) -> Result<Option<ConversationTurn>>;

    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>>;

    /// Sorted by `last_message_at`, newest first.
    async fn find_conversations(&self, filter: &ConversationFilter) -> Result<Page<Conversation>>;

    /// Sorted by `turn_index`, then `timestamp`.
    async fn find_turns(&self, filter: &TurnFilter) -> Result<Page<ConversationTurn>>;

    /// Remove the aggregate and every turn that shares its id.
    async fn delete_conversation(&self, conversation_id: &str) -> Result<Removed>;

    /// Remove conversations idle since before `cutoff`, with their turns.
    async fn prune_idle_since(&self, cutoff: DateTime<Utc>) -> Result<Removed>;

    async fn count_conversations(&self) -> Result<usize>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSON file store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Collections {
    conversations: HashMap<String, Conversation>,
    turns: HashMap<String, ConversationTurn>,
}

impl Collections {
    fn next_turn_index(&self, conversation_id: &str) -> u64 {
        self.turns
            .values()
            .filter(|t| t.conversation_id == conversation_id)
            .map(|t| t.turn_index + 1)
            .max()
            .unwrap_or(0)
    }

    fn remove_turns_where(&mut self, pred: impl Fn(&ConversationTurn) -> bool) -> usize {
        let before = self.turns.len();
        self.turns.retain(|_, t| !pred(t));
        before - self.turns.len()
    }

    /// Every conversation, with `replaced` standing in for its stored copy.
    fn conversations_with<'a>(
        &'a self,
        replaced: &'a Conversation,
    ) -> impl Iterator<Item = &'a Conversation> {
        self.conversations
            .values()
            .filter(move |c| c.conversation_id != replaced.conversation_id)
            .chain(std::iter::once(replaced))
    }
}

/// Guarded by the write lock.
#[derive(Default)]
struct DiskState {
    /// The files may disagree with memory (a write failed or was
    /// abandoned). The next mutation rewrites both from memory first.
    dirty: bool,
}

enum TurnsWrite {
    Append(String),
    Rewrite(String),
}

/// Serialized changes, produced before anything in memory moves.
struct DiskWrite {
    conversations: String,
    turns: TurnsWrite,
}

/// Conversation store backed by files, or memory only.
///
/// Conversations are a small collection and are snapshotted whole to
/// `chat_conversations.json`. Turns go to the append-only
/// `chat_conversation_turns.jsonl`: one line per insert and one per
/// finalization, the last line for a turn id winning. The log is compacted
/// on open and rewritten by deletes and prunes.
///
/// Mutations stage their change, write it, and only then commit it to
/// memory, so a failed write leaves memory untouched.
pub struct JsonFileStore {
    dir: Option<PathBuf>,
    data: RwLock<Collections>,
    /// Serializes stage-write-commit so disk writes land in order.
    disk: tokio::sync::Mutex<DiskState>,
}

impl JsonFileStore {
    /// Load or create the collections under `state_path`.
    pub fn open(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(|e| {
            Error::Persistence(format!("creating {}: {e}", state_path.display()))
        })?;

        let conversations: Vec<Conversation> = load_conversations(&conversations_path(state_path))?;
        let log_path = turns_log_path(state_path);
        let (turns, records) = load_turn_log(&log_path)?;

        if records != turns.len() {
            write_atomic(&log_path, &turn_lines(turns.values())?)?;
            tracing::debug!(records, turns = turns.len(), "turn log compacted");
        }

        tracing::info!(
            conversations = conversations.len(),
            turns = turns.len(),
            path = %state_path.display(),
            "conversation store loaded"
        );

        Ok(Self {
            dir: Some(state_path.to_path_buf()),
            data: RwLock::new(Collections {
                conversations: conversations
                    .into_iter()
                    .map(|c| (c.conversation_id.clone(), c))
                    .collect(),
                turns,
            }),
            disk: tokio::sync::Mutex::new(DiskState::default()),
        })
    }

    /// A store that never touches the disk.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            data: RwLock::new(Collections::default()),
            disk: tokio::sync::Mutex::new(DiskState::default()),
        }
    }

    /// Write the change `stage` serializes from the current collections.
    ///
    /// Callers hold the disk lock and commit to memory only after `Ok`.
    /// Memory-only stores skip serialization entirely.
    async fn write(
        &self,
        disk: &mut DiskState,
        stage: impl FnOnce(&Collections) -> Result<DiskWrite>,
    ) -> Result<()> {
        let Some(dir) = self.dir.clone() else {
            return Ok(());
        };

        let (resync, staged) = {
            let data = self.data.read();
            let resync = if disk.dirty {
                Some(DiskWrite {
                    conversations: conversations_json(data.conversations.values())?,
                    turns: TurnsWrite::Rewrite(turn_lines(data.turns.values())?),
                })
            } else {
                None
            };
            (resync, stage(&data)?)
        };

        // Cleared only once the write is known to have landed.
        disk.dirty = true;
        tokio::task::spawn_blocking(move || {
            if let Some(full) = resync {
                apply_write(&dir, full)?;
            }
            apply_write(&dir, staged)
        })
        .await
        .map_err(|e| Error::Persistence(format!("spawn_blocking join: {e}")))??;
        disk.dirty = false;
        Ok(())
    }
}

// ── file helpers ────────────────────────────────────────────────────

fn conversations_path(dir: &Path) -> PathBuf {
    dir.join(format!("{CONVERSATIONS_COLLECTION}.json"))
}

fn turns_log_path(dir: &Path) -> PathBuf {
    dir.join(format!("{TURNS_COLLECTION}.jsonl"))
}

fn serialize_err(e: serde_json::Error) -> Error {
    Error::Persistence(format!("serializing store: {e}"))
}

fn conversations_json<'a>(conversations: impl Iterator<Item = &'a Conversation>) -> Result<String> {
    let mut sorted: Vec<&Conversation> = conversations.collect();
    sorted.sort_by(|a, b| a.conversation_id.cmp(&b.conversation_id));
    serde_json::to_string_pretty(&sorted).map_err(serialize_err)
}

/// One JSON document per line, in replay order.
fn turn_lines<'a>(turns: impl Iterator<Item = &'a ConversationTurn>) -> Result<String> {
    let mut sorted: Vec<&ConversationTurn> = turns.collect();
    sorted.sort_by(|a, b| {
        (a.conversation_id.as_str(), a.turn_index).cmp(&(b.conversation_id.as_str(), b.turn_index))
    });
    let mut buf = String::new();
    for turn in sorted {
        buf.push_str(&serde_json::to_string(turn).map_err(serialize_err)?);
        buf.push('\n');
    }
    Ok(buf)
}

fn load_conversations(path: &Path) -> Result<Vec<Conversation>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Persistence(format!("reading {}: {e}", path.display())))?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw)
        .map_err(|e| Error::Persistence(format!("parsing {}: {e}", path.display())))
}

/// Replay the turn log. Returns the turns and the number of non-blank
/// lines read, malformed ones included.
fn load_turn_log(path: &Path) -> Result<(HashMap<String, ConversationTurn>, usize)> {
    let mut turns = HashMap::new();
    if !path.exists() {
        return Ok((turns, 0));
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Persistence(format!("reading {}: {e}", path.display())))?;

    let mut records = 0;
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        records += 1;
        match serde_json::from_str::<ConversationTurn>(line) {
            Ok(turn) => {
                turns.insert(turn.turn_id.clone(), turn);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping malformed turn record");
            }
        }
    }
    Ok((turns, records))
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, contents)
        .and_then(|_| std::fs::rename(&tmp, path))
        .map_err(|e| Error::Persistence(format!("writing {}: {e}", path.display())))
}

fn append_lines(path: &Path, lines: &str) -> Result<()> {
    use std::io::Write;
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(lines.as_bytes()))
        .map_err(|e| Error::Persistence(format!("appending to {}: {e}", path.display())))
}

fn apply_write(dir: &Path, write: DiskWrite) -> Result<()> {
    write_atomic(&conversations_path(dir), &write.conversations)?;
    match write.turns {
        TurnsWrite::Append(lines) => append_lines(&turns_log_path(dir), &lines),
        TurnsWrite::Rewrite(lines) => write_atomic(&turns_log_path(dir), &lines),
    }
}

fn page<T: Clone>(matched: Vec<&T>, skip: usize, limit: usize) -> Page<T> {
    let total = matched.len();
    let items = matched.into_iter().skip(skip).take(limit).cloned().collect();
    Page { total, items }
}

#[async_trait::async_trait]
impl ConversationStore for JsonFileStore {
    async fn open_turn(
        &self,
        mut turn: ConversationTurn,
        update: ConversationUpdate,
    ) -> Result<ConversationTurn> {
        let mut disk = self.disk.lock().await;
        let conv = {
            let data = self.data.read();
            turn.turn_index = data.next_turn_index(&turn.conversation_id);
            let existing = data.conversations.get(&turn.conversation_id).cloned();
            update.apply(&turn.conversation_id, existing)
        };

        self.write(&mut disk, |data| {
            Ok(DiskWrite {
                conversations: conversations_json(data.conversations_with(&conv))?,
                turns: TurnsWrite::Append(turn_lines(std::iter::once(&turn))?),
            })
        })
        .await?;

        let mut data = self.data.write();
        data.turns.insert(turn.turn_id.clone(), turn.clone());
        data.conversations.insert(conv.conversation_id.clone(), conv);
        Ok(turn)
    }

    async fn finalize_turn(
        &self,
        turn_id: &str,
        finalization: TurnFinalization,
        update: ConversationUpdate,
    ) -> Result<Option<ConversationTurn>> {
        let mut disk = self.disk.lock().await;
        let staged = {
            let data = self.data.read();
            match data.turns.get(turn_id) {
                Some(turn) if turn.status == TurnStatus::Pending => {
                    let mut turn = turn.clone();
                    finalization.apply_to(&mut turn);
                    let existing = data.conversations.get(&turn.conversation_id).cloned();
                    let conv = update.apply(&turn.conversation_id, existing);
                    Some((turn, conv))
                }
                _ => None,
            }
        };
        let Some((turn, conv)) = staged else {
            return Ok(None);
        };

        self.write(&mut disk, |data| {
            Ok(DiskWrite {
                conversations: conversations_json(data.conversations_with(&conv))?,
                turns: TurnsWrite::Append(turn_lines(std::iter::once(&turn))?),
            })
        })
        .await?;

        let mut data = self.data.write();
        data.turns.insert(turn.turn_id.clone(), turn.clone());
        data.conversations.insert(conv.conversation_id.clone(), conv);
        Ok(Some(turn))
    }

    async fn get_turn(&self, turn_id: &str) -> Result<Option<ConversationTurn>> {
        Ok(self.data.read().turns.get(turn_id).cloned())
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        Ok(self.data.read().conversations.get(conversation_id).cloned())
    }

    async fn find_conversations(&self, filter: &ConversationFilter) -> Result<Page<Conversation>> {
        let data = self.data.read();
        let mut matched: Vec<&Conversation> = data
            .conversations
            .values()
            .filter(|c| filter.matches(c))
            .collect();
        matched.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| a.conversation_id.cmp(&b.conversation_id))
        });
        Ok(page(matched, filter.skip, filter.limit))
    }

    async fn find_turns(&self, filter: &TurnFilter) -> Result<Page<ConversationTurn>> {
        let data = self.data.read();
        let mut matched: Vec<&ConversationTurn> =
            data.turns.values().filter(|t| filter.matches(t)).collect();
        matched.sort_by(|a, b| {
            a.turn_index
                .cmp(&b.turn_index)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        });
        Ok(page(matched, filter.skip, filter.limit))
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<Removed> {
        let mut disk = self.disk.lock().await;
        let removed = {
            let data = self.data.read();
            Removed {
                conversations: usize::from(data.conversations.contains_key(conversation_id)),
                turns: data
                    .turns
                    .values()
                    .filter(|t| t.conversation_id == conversation_id)
                    .count(),
            }
        };
        if removed == Removed::default() {
            return Ok(removed);
        }

        self.write(&mut disk, |data| {
            Ok(DiskWrite {
                conversations: conversations_json(
                    data.conversations
                        .values()
                        .filter(|c| c.conversation_id != conversation_id),
                )?,
                turns: TurnsWrite::Rewrite(turn_lines(
                    data.turns
                        .values()
                        .filter(|t| t.conversation_id != conversation_id),
                )?),
            })
        })
        .await?;

        let mut data = self.data.write();
        data.conversations.remove(conversation_id);
        data.remove_turns_where(|t| t.conversation_id == conversation_id);
        Ok(removed)
    }

    async fn prune_idle_since(&self, cutoff: DateTime<Utc>) -> Result<Removed> {
        let mut disk = self.disk.lock().await;
        let kept: HashSet<String> = {
            let data = self.data.read();
            data.conversations
                .values()
                .filter(|c| c.last_message_at >= cutoff)
                .map(|c| c.conversation_id.clone())
                .collect()
        };
        let expired_conversation = |c: &Conversation| !kept.contains(&c.conversation_id);
        let expired_turn =
            |t: &ConversationTurn| !kept.contains(&t.conversation_id) && t.timestamp < cutoff;

        let removed = {
            let data = self.data.read();
            Removed {
                conversations: data.conversations.values().filter(|c| expired_conversation(*c)).count(),
                turns: data.turns.values().filter(|t| expired_turn(*t)).count(),
            }
        };
        if removed == Removed::default() {
            return Ok(removed);
        }

        self.write(&mut disk, |data| {
            Ok(DiskWrite {
                conversations: conversations_json(
                    data.conversations.values().filter(|c| !expired_conversation(*c)),
                )?,
                turns: TurnsWrite::Rewrite(turn_lines(
                    data.turns.values().filter(|t| !expired_turn(*t)),
                )?),
            })
        })
        .await?;

        let mut data = self.data.write();
        data.conversations.retain(|_, c| !expired_conversation(c));
        data.remove_turns_where(expired_turn);
        Ok(removed)
    }

    async fn count_conversations(&self) -> Result<usize> {
        Ok(self.data.read().conversations.len())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
