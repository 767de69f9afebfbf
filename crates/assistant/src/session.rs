//! Per-conversation state: bounded rolling history plus the bot-enabled flag.
//!
//! Two stores share one contract. `InMemorySessionStore` keeps sessions in a
//! sharded map; `FileSessionStore` writes one JSON file per session. Both
//! serialise read-modify-write per session id and never across ids.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use askdesk_core::{Channel, Turn};

use crate::error::SessionError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    /// Channel of the first message; unknown when the session was created by an operator toggle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Channel>,
    pub history: VecDeque<Turn>,
    pub bot_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            platform: None,
            history: VecDeque::new(),
            bot_enabled: true,
            created_at: now,
            last_active: now,
        }
    }

    /// Append a turn, evicting the oldest once `max_turns` is reached.
    pub fn push_turn(&mut self, turn: Turn, max_turns: usize) {
        if max_turns == 0 {
            return;
        }
        while self.history.len() >= max_turns {
            self.history.pop_front();
        }
        self.last_active = turn.timestamp.max(self.last_active);
        self.history.push_back(turn);
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Rolling history, oldest first. Unknown sessions have none.
    async fn get(&self, session_id: &str) -> Result<Vec<Turn>, SessionError>;

    /// Append one turn, creating the session on first use.
    async fn append(&self, session_id: &str, platform: Channel, turn: Turn) -> Result<(), SessionError>;

    /// Append a question and its answer as one write: either both turns land
    /// adjacent in the history or neither does.
    async fn append_exchange(
        &self,
        session_id: &str,
        platform: Channel,
        exchange: [Turn; 2],
    ) -> Result<(), SessionError>;

    /// Unknown sessions default to enabled.
    async fn get_bot_enabled(&self, session_id: &str) -> Result<bool, SessionError>;

    async fn set_bot_enabled(&self, session_id: &str, enabled: bool) -> Result<(), SessionError>;

    /// Full record, for operator tooling.
    async fn session(&self, session_id: &str) -> Result<Option<Session>, SessionError>;

    /// Drop sessions idle for longer than `idle`. Returns how many were removed.
    async fn prune_inactive(&self, idle: Duration) -> Result<usize, SessionError>;
}

fn idle_cutoff(idle: Duration) -> DateTime<Utc> {
    let idle = chrono::Duration::from_std(idle).unwrap_or(chrono::Duration::days(365_000));
    Utc::now().checked_sub_signed(idle).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

// ── In-memory store ───────────────────────────────────────────

pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
    max_turns: usize,
}

impl InMemorySessionStore {
    pub fn new(max_turns: usize) -> Self {
        Self { sessions: DashMap::new(), max_turns }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Vec<Turn>, SessionError> {
        Ok(self
            .sessions
            .get(session_id)
            .map(|s| s.history.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn append(&self, session_id: &str, platform: Channel, turn: Turn) -> Result<(), SessionError> {
        let mut session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id));
        session.platform.get_or_insert(platform);
        session.push_turn(turn, self.max_turns);
        Ok(())
    }

    async fn append_exchange(
        &self,
        session_id: &str,
        platform: Channel,
        exchange: [Turn; 2],
    ) -> Result<(), SessionError> {
        let mut session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id));
        session.platform.get_or_insert(platform);
        for turn in exchange {
            session.push_turn(turn, self.max_turns);
        }
        Ok(())
    }

    async fn get_bot_enabled(&self, session_id: &str) -> Result<bool, SessionError> {
        Ok(self.sessions.get(session_id).map_or(true, |s| s.bot_enabled))
    }

    async fn set_bot_enabled(&self, session_id: &str, enabled: bool) -> Result<(), SessionError> {
        let mut session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id));
        session.bot_enabled = enabled;
        session.last_active = Utc::now();
        Ok(())
    }

    async fn session(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        Ok(self.sessions.get(session_id).map(|s| s.clone()))
    }

    async fn prune_inactive(&self, idle: Duration) -> Result<usize, SessionError> {
        let cutoff = idle_cutoff(idle);
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.last_active >= cutoff);
        Ok(before.saturating_sub(self.sessions.len()))
    }
}

// ── File store ────────────────────────────────────────────────

/// One JSON file per session under `dir`.
pub struct FileSessionStore {
    dir: PathBuf,
    max_turns: usize,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileSessionStore {
    /// Create the store, ensuring the storage directory exists.
    pub fn new(dir: &Path, max_turns: usize) -> Result<Self, SessionError> {
        std::fs::create_dir_all(dir)?;
        info!(path = %dir.display(), "session store initialized");
        Ok(Self {
            dir: dir.to_path_buf(),
            max_turns,
            locks: DashMap::new(),
        })
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(id)))
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn load(&self, id: &str) -> Result<Option<Session>, SessionError> {
        let path = self.session_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    fn save(&self, session: &Session) -> Result<(), SessionError> {
        let path = self.session_path(&session.session_id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(session)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    async fn update(&self, id: &str, f: impl FnOnce(&mut Session) + Send) -> Result<(), SessionError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let mut session = self.load(id)?.unwrap_or_else(|| Session::new(id));
        f(&mut session);
        self.save(&session)
    }
}

/// Map a session id to a safe file name. Unsafe bytes become `~xx`.
fn file_stem(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for b in id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            out.push_str(&format!("~{:02x}", b));
        }
    }
    out
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, session_id: &str) -> Result<Vec<Turn>, SessionError> {
        Ok(self
            .load(session_id)?
            .map(|s| s.history.into_iter().collect())
            .unwrap_or_default())
    }

    async fn append(&self, session_id: &str, platform: Channel, turn: Turn) -> Result<(), SessionError> {
        let max_turns = self.max_turns;
        self.update(session_id, move |s| {
            s.platform.get_or_insert(platform);
            s.push_turn(turn, max_turns);
        })
        .await
    }

    async fn append_exchange(
        &self,
        session_id: &str,
        platform: Channel,
        exchange: [Turn; 2],
    ) -> Result<(), SessionError> {
        let max_turns = self.max_turns;
        self.update(session_id, move |s| {
            s.platform.get_or_insert(platform);
            for turn in exchange {
                s.push_turn(turn, max_turns);
            }
        })
        .await
    }

    async fn get_bot_enabled(&self, session_id: &str) -> Result<bool, SessionError> {
        Ok(self.load(session_id)?.map_or(true, |s| s.bot_enabled))
    }

    async fn set_bot_enabled(&self, session_id: &str, enabled: bool) -> Result<(), SessionError> {
        self.update(session_id, move |s| {
            s.bot_enabled = enabled;
            s.last_active = Utc::now();
        })
        .await
    }

    async fn session(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        self.load(session_id)
    }

    async fn prune_inactive(&self, idle: Duration) -> Result<usize, SessionError> {
        let cutoff = idle_cutoff(idle);
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let session: Session = match std::fs::read_to_string(&path)
                .map_err(SessionError::from)
                .and_then(|d| serde_json::from_str(&d).map_err(SessionError::from))
            {
                Ok(s) => s,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable session");
                    continue;
                }
            };
            if session.last_active >= cutoff {
                continue;
            }
            let lock = self.lock_for(&session.session_id);
            let guard = lock.lock().await;
            // Re-check under the lock: the session may have been touched since.
            if let Some(current) = self.load(&session.session_id)? {
                if current.last_active < cutoff {
                    std::fs::remove_file(&path)?;
                    removed += 1;
                }
            }
            drop(guard);
            drop(lock);
            // A waiter still holding a clone must keep the same mutex as later callers.
            self.locks.remove_if(&session.session_id, |_, m| Arc::strong_count(m) == 1);
        }
        Ok(removed)
    }
}
