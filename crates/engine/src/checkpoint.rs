//! Turn-state checkpointing.
//!
//! The checkpointer owns [`TurnState`] durability: the orchestrator
//! loads a copy, mutates it locally, and writes it back at iteration
//! boundaries and always before a terminal `Done` or `Interrupt`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

use axon_domain::message::Message;
use axon_domain::{Error, Result, TurnState};

/// What changed between two turn states.
#[derive(Debug, Clone, Serialize)]
pub struct StateDiff {
    pub messages_added: usize,
    pub tokens_delta: i64,
    pub iteration_delta: i64,
    pub new_messages: Vec<Message>,
}

/// Computes the diff from `a` (earlier) to `b` (later).
pub fn diff_states(a: &TurnState, b: &TurnState) -> StateDiff {
    let messages_added = b.messages.len().saturating_sub(a.messages.len());
    StateDiff {
        messages_added,
        tokens_delta: b.total_tokens as i64 - a.total_tokens as i64,
        iteration_delta: i64::from(b.iteration) - i64::from(a.iteration),
        new_messages: b.messages[b.messages.len() - messages_added..].to_vec(),
    }
}

#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Persist the state durably; must not return before the write is
    /// stable enough to survive a crash.
    async fn save(&self, session_id: &str, state: &TurnState) -> Result<()>;

    /// Load the last successfully saved state.
    async fn load(&self, session_id: &str) -> Result<Option<TurnState>>;

    /// Opaque per-session configuration for downstream graph runners.
    fn config(&self, session_id: &str) -> Value {
        serde_json::json!({ "configurable": { "thread_id": session_id } })
    }

    fn diff(&self, a: &TurnState, b: &TurnState) -> StateDiff {
        diff_states(a, b)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct InMemoryCheckpointer {
    states: RwLock<HashMap<String, TurnState>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, session_id: &str, state: &TurnState) -> Result<()> {
        self.states
            .write()
            .insert(session_id.to_owned(), state.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<TurnState>> {
        Ok(self.states.read().get(session_id).cloned())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSON file implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One JSON file per session under a root directory. Writes go to a
/// temp file first and are renamed into place, so a crash mid-write
/// leaves the previous checkpoint intact.
pub struct JsonFileCheckpointer {
    root: PathBuf,
    lock: RwLock<()>,
}

impl JsonFileCheckpointer {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(root.as_ref()).map_err(Error::Io)?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            lock: RwLock::new(()),
        })
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(format!("{safe}.json"))
    }
}

#[async_trait]
impl Checkpointer for JsonFileCheckpointer {
    async fn save(&self, session_id: &str, state: &TurnState) -> Result<()> {
        let _guard = self.lock.write();
        let path = self.path_for(session_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(&tmp, json).map_err(Error::Io)?;
        std::fs::rename(&tmp, &path).map_err(Error::Io)?;
        tracing::debug!(session_id, path = %path.display(), "checkpoint saved");
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<TurnState>> {
        let _guard = self.lock.read();
        let path = self.path_for(session_id);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(messages: usize, tokens: u64, iteration: u32) -> TurnState {
        let mut s = TurnState::new("s1", "u1");
        for i in 0..messages {
            s.messages.push(Message::user(format!("m{i}")));
        }
        s.total_tokens = tokens;
        s.iteration = iteration;
        s
    }

    #[tokio::test]
    async fn memory_roundtrip() {
        let cp = InMemoryCheckpointer::new();
        assert!(cp.load("s1").await.unwrap().is_none());

        let state = state_with(2, 100, 1);
        cp.save("s1", &state).await.unwrap();
        let loaded = cp.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.total_tokens, 100);
    }

    #[tokio::test]
    async fn file_roundtrip_survives_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cp = JsonFileCheckpointer::new(dir.path()).unwrap();
            cp.save("s1", &state_with(3, 42, 2)).await.unwrap();
        }
        let cp = JsonFileCheckpointer::new(dir.path()).unwrap();
        let loaded = cp.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 3);
        assert_eq!(loaded.iteration, 2);
    }

    #[tokio::test]
    async fn save_overwrites_previous() {
        let dir = tempfile::tempdir().unwrap();
        let cp = JsonFileCheckpointer::new(dir.path()).unwrap();
        cp.save("s1", &state_with(1, 10, 1)).await.unwrap();
        cp.save("s1", &state_with(5, 50, 3)).await.unwrap();
        let loaded = cp.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 5);
        assert_eq!(loaded.total_tokens, 50);
    }

    #[test]
    fn diff_reports_deltas() {
        let a = state_with(2, 100, 1);
        let b = state_with(5, 180, 3);
        let diff = diff_states(&a, &b);
        assert_eq!(diff.messages_added, 3);
        assert_eq!(diff.tokens_delta, 80);
        assert_eq!(diff.iteration_delta, 2);
        assert_eq!(diff.new_messages.len(), 3);
        assert_eq!(diff.new_messages[0].content_str(), "m2");
    }

    #[test]
    fn config_carries_thread_id() {
        let cp = InMemoryCheckpointer::new();
        let cfg = cp.config("abc");
        assert_eq!(cfg["configurable"]["thread_id"], "abc");
    }
}
