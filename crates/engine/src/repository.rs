//! The conversation persistence interface.
//!
//! Relational storage of sessions and messages lives outside the
//! core; this trait pins the contract the orchestrator needs, plus an
//! in-memory implementation for tests and development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use axon_domain::message::{Role, ToolCall};
use axon_domain::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub agent_id: Option<String>,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub token_count: Option<u32>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create_session(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
        title: Option<&str>,
    ) -> Result<SessionRecord>;

    async fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        tool_calls: Option<Vec<ToolCall>>,
        token_count: Option<u32>,
    ) -> Result<MessageRecord>;

    async fn count_messages(&self, session_id: &str) -> Result<usize>;

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>>;

    async fn list_messages(
        &self,
        session_id: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<MessageRecord>>;

    async fn update_title(&self, session_id: &str, title: &str) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, SessionRecord>>,
    messages: RwLock<HashMap<String, Vec<MessageRecord>>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn create_session(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
        title: Option<&str>,
    ) -> Result<SessionRecord> {
        let record = SessionRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            agent_id: agent_id.map(String::from),
            title: title.map(String::from),
            created_at: Utc::now(),
        };
        self.sessions
            .write()
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        tool_calls: Option<Vec<ToolCall>>,
        token_count: Option<u32>,
    ) -> Result<MessageRecord> {
        let record = MessageRecord {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            tool_calls,
            token_count,
            created_at: Utc::now(),
        };
        self.messages
            .write()
            .entry(session_id.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn count_messages(&self, session_id: &str) -> Result<usize> {
        Ok(self
            .messages
            .read()
            .get(session_id)
            .map_or(0, |m| m.len()))
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.read().get(session_id).cloned())
    }

    async fn list_messages(
        &self,
        session_id: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<MessageRecord>> {
        Ok(self
            .messages
            .read()
            .get(session_id)
            .map(|m| m.iter().skip(skip).take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn update_title(&self, session_id: &str, title: &str) -> Result<()> {
        if let Some(session) = self.sessions.write().get_mut(session_id) {
            session.title = Some(title.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_and_message_lifecycle() {
        let repo = InMemorySessionRepository::new();
        let session = repo.create_session("u1", None, None).await.unwrap();
        assert!(session.title.is_none());

        repo.add_message(&session.id, Role::User, "hi", None, Some(2))
            .await
            .unwrap();
        repo.add_message(&session.id, Role::Assistant, "hello", None, Some(3))
            .await
            .unwrap();

        assert_eq!(repo.count_messages(&session.id).await.unwrap(), 2);
        let listed = repo.list_messages(&session.id, 1, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].content, "hello");

        repo.update_title(&session.id, "Greeting").await.unwrap();
        let fetched = repo.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(fetched.title.as_deref(), Some("Greeting"));
    }

    #[tokio::test]
    async fn unknown_session_counts_zero() {
        let repo = InMemorySessionRepository::new();
        assert_eq!(repo.count_messages("nope").await.unwrap(), 0);
        assert!(repo.get_session("nope").await.unwrap().is_none());
    }
}
