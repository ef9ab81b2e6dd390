//! The sandbox session pool.
//!
//! One process-wide manager owns every live session executor, keyed by
//! session id with `conversation → session` and `user → sessions`
//! indexes. A 60-second sweeper applies the timeout policy; resource
//! limits evict least-recently-used sessions; evicted conversations
//! get a recreation notice on their next request.
//!
//! Locking: all map mutation happens under one async mutex, but the
//! mutex is never held across executor start/stop — victims are
//! detached under the lock and stopped after release.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use axon_domain::config::{SandboxSettings, SessionPolicy};
use axon_domain::{Error, Result};

use crate::executor::{SessionExecutor, SessionExecutorFactory};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// States and reasons
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Creating,
    Active,
    Idle,
    Completing,
    Disconnected,
    Expired,
    Error,
    Recreated,
}

impl SessionState {
    /// States in which an existing session may serve new work.
    fn is_reusable(&self) -> bool {
        matches!(
            self,
            SessionState::Active | SessionState::Idle | SessionState::Recreated
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupReason {
    UserRequest,
    TaskComplete,
    IdleTimeout,
    DisconnectTimeout,
    ResourceLimit,
    AppShutdown,
    Error,
    Orphan,
}

impl CleanupReason {
    fn notice_fragment(&self) -> &'static str {
        match self {
            CleanupReason::IdleTimeout => " (after a period of inactivity)",
            CleanupReason::DisconnectTimeout => " (after the connection stayed closed)",
            CleanupReason::TaskComplete => " (the task was completed)",
            CleanupReason::ResourceLimit => " (due to system resource limits)",
            CleanupReason::AppShutdown => " (the service restarted)",
            CleanupReason::Error => " (after an execution error)",
            CleanupReason::UserRequest | CleanupReason::Orphan => "",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// History and handles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What survives a session's cleanup, per conversation. Fuels the
/// recreation notice when the conversation comes back.
#[derive(Debug, Clone, Serialize)]
pub struct SessionHistory {
    pub conversation_id: String,
    pub user_id: Option<String>,
    pub last_session_id: Option<String>,
    pub last_cleaned_at: Option<DateTime<Utc>>,
    pub cleanup_reason: Option<CleanupReason>,
    pub installed_packages: Vec<String>,
    pub created_files: Vec<String>,
    pub total_sessions: u64,
    pub total_commands: u64,
}

impl SessionHistory {
    fn new(conversation_id: String, user_id: Option<String>) -> Self {
        Self {
            conversation_id,
            user_id,
            last_session_id: None,
            last_cleaned_at: None,
            cleanup_reason: None,
            installed_packages: Vec::new(),
            created_files: Vec::new(),
            total_sessions: 0,
            total_commands: 0,
        }
    }
}

struct SessionEntry {
    session_id: String,
    user_id: Option<String>,
    conversation_id: Option<String>,
    state: SessionState,
    executor: Arc<dyn SessionExecutor>,
    created_at: Instant,
    created_at_utc: DateTime<Utc>,
    last_activity: Instant,
    state_changed_at: Instant,
    command_count: u64,
    total_duration_ms: u64,
    installed_packages: Vec<String>,
    created_files: Vec<String>,
    is_recreated: bool,
    previous_session_id: Option<String>,
}

impl SessionEntry {
    fn touch(&mut self) {
        self.last_activity = Instant::now();
        if matches!(self.state, SessionState::Idle | SessionState::Recreated) {
            self.set_state(SessionState::Active);
        }
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    fn record_package(&mut self, package: String) {
        if !self.installed_packages.contains(&package) {
            self.installed_packages.push(package);
        }
    }

    fn record_file(&mut self, path: String) {
        if !self.created_files.contains(&path) {
            self.created_files.push(path);
        }
    }
}

/// The caller-facing view of one session. The executor reference is a
/// borrow for the duration of a turn; callers must not stop it.
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: String,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub state: SessionState,
    pub executor: Arc<dyn SessionExecutor>,
    pub created_at: DateTime<Utc>,
    pub is_recreated: bool,
    pub previous_session_id: Option<String>,
}

/// Result of `get_or_create`: the session plus recreation context.
pub struct SessionRecreationResult {
    pub session: SessionHandle,
    pub is_new: bool,
    pub is_recreated: bool,
    pub previous_state: Option<SessionHistory>,
    pub message: Option<String>,
}

impl std::fmt::Debug for SessionRecreationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecreationResult")
            .field("session_id", &self.session.session_id)
            .field("is_new", &self.is_new)
            .field("is_recreated", &self.is_recreated)
            .field("previous_state", &self.previous_state)
            .field("message", &self.message)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub total_sessions: usize,
    pub total_users: usize,
    pub state_counts: HashMap<String, usize>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Pool {
    sessions: HashMap<String, SessionEntry>,
    user_sessions: HashMap<String, HashSet<String>>,
    conversation_sessions: HashMap<String, String>,
    history: HashMap<String, SessionHistory>,
}

impl Pool {
    /// Remove a session from every index, fold its environment record
    /// into the conversation history, and hand back the executor so
    /// the caller can stop it outside the lock.
    fn detach(
        &mut self,
        session_id: &str,
        reason: CleanupReason,
    ) -> Option<Arc<dyn SessionExecutor>> {
        let entry = self.sessions.remove(session_id)?;

        if let Some(conversation_id) = &entry.conversation_id {
            let history = self
                .history
                .entry(conversation_id.clone())
                .or_insert_with(|| {
                    SessionHistory::new(conversation_id.clone(), entry.user_id.clone())
                });
            history.last_session_id = Some(entry.session_id.clone());
            history.last_cleaned_at = Some(Utc::now());
            history.cleanup_reason = Some(reason);
            history.installed_packages = entry.installed_packages.clone();
            history.created_files = entry.created_files.clone();
            history.total_commands += entry.command_count;

            self.conversation_sessions.remove(conversation_id);
        }

        if let Some(user_id) = &entry.user_id {
            if let Some(set) = self.user_sessions.get_mut(user_id) {
                set.remove(session_id);
                if set.is_empty() {
                    self.user_sessions.remove(user_id);
                }
            }
        }

        tracing::info!(
            session_id,
            reason = ?reason,
            commands = entry.command_count,
            packages = entry.installed_packages.len(),
            files = entry.created_files.len(),
            "removed session"
        );
        Some(entry.executor)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionManager {
    policy: SessionPolicy,
    settings: SandboxSettings,
    factory: Arc<dyn SessionExecutorFactory>,
    pool: Mutex<Pool>,
    running: AtomicBool,
    sweeper: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(settings: SandboxSettings, factory: Arc<dyn SessionExecutorFactory>) -> Self {
        Self {
            policy: settings.docker.session_policy.clone(),
            settings,
            factory,
            pool: Mutex::new(Pool::default()),
            running: AtomicBool::new(false),
            sweeper: parking_lot::Mutex::new(None),
        }
    }

    /// Start the periodic sweeper. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            while manager.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                manager.sweep().await;
            }
        });
        *self.sweeper.lock() = Some(handle);
        tracing::info!("session manager started");
    }

    /// Stop the sweeper and clean up every session.
    pub async fn stop(&self, reason: CleanupReason) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        let cleaned = self.cleanup_all(reason).await;
        tracing::info!(cleaned, "session manager stopped");
    }

    // ── Acquisition ────────────────────────────────────────────────

    /// Get the conversation's live session or create a fresh one,
    /// enforcing per-user and global capacity. Returns recreation
    /// context when the conversation's previous session was cleaned.
    pub async fn get_or_create(
        &self,
        user_id: Option<&str>,
        conversation_id: Option<&str>,
    ) -> Result<SessionRecreationResult> {
        // Phase 1 (locked): reuse, capacity decisions, history read.
        let (victims, recreation) = {
            let mut pool = self.pool.lock().await;

            if self.policy.allow_session_reuse {
                if let Some(conversation_id) = conversation_id {
                    if let Some(session_id) =
                        pool.conversation_sessions.get(conversation_id).cloned()
                    {
                        if let Some(entry) = pool.sessions.get_mut(&session_id) {
                            if entry.state.is_reusable() {
                                entry.touch();
                                tracing::debug!(
                                    session_id = %entry.session_id,
                                    conversation_id,
                                    "reusing live session"
                                );
                                return Ok(SessionRecreationResult {
                                    session: handle_of(entry),
                                    is_new: false,
                                    is_recreated: false,
                                    previous_state: None,
                                    message: None,
                                });
                            }
                        }
                    }
                }
            }

            let mut victims: Vec<Arc<dyn SessionExecutor>> = Vec::new();

            // Global capacity: evict one LRU non-active session.
            if pool.sessions.len() >= self.policy.max_total_sessions {
                let victim_id = pool
                    .sessions
                    .values()
                    .filter(|e| {
                        !matches!(e.state, SessionState::Active | SessionState::Creating)
                    })
                    .min_by_key(|e| e.last_activity)
                    .map(|e| e.session_id.clone());
                match victim_id {
                    Some(id) => {
                        if let Some(executor) = pool.detach(&id, CleanupReason::ResourceLimit) {
                            victims.push(executor);
                        }
                    }
                    None => {
                        return Err(Error::SessionLimit(format!(
                            "all {} sessions are active",
                            self.policy.max_total_sessions
                        )));
                    }
                }
            }

            // Per-user capacity: evict the user's oldest session.
            if let Some(user_id) = user_id {
                let over = pool
                    .user_sessions
                    .get(user_id)
                    .is_some_and(|s| s.len() >= self.policy.max_sessions_per_user);
                if over {
                    let victim_id = pool
                        .user_sessions
                        .get(user_id)
                        .into_iter()
                        .flatten()
                        .filter_map(|id| pool.sessions.get(id))
                        .min_by_key(|e| e.last_activity)
                        .map(|e| e.session_id.clone());
                    if let Some(id) = victim_id {
                        if let Some(executor) = pool.detach(&id, CleanupReason::ResourceLimit) {
                            victims.push(executor);
                        }
                    }
                }
            }

            // A pending cleanup marker means this is a recreation.
            let recreation = conversation_id
                .and_then(|c| pool.history.get(c))
                .filter(|h| h.cleanup_reason.is_some())
                .cloned();

            (victims, recreation)
        };

        // Phase 2 (unlocked): stop victims, start the new executor.
        for executor in victims {
            if let Err(e) = executor.stop_session().await {
                tracing::warn!(error = %e, "error stopping evicted session");
            }
        }

        let executor = self
            .factory
            .create(&self.settings, self.policy.idle_timeout);
        let session_id = executor.start_session().await?;

        // Phase 3 (locked): commit the new session.
        let mut pool = self.pool.lock().await;
        let now = Instant::now();
        let is_recreated = recreation.is_some();
        let previous_session_id = recreation.as_ref().and_then(|h| h.last_session_id.clone());

        let entry = SessionEntry {
            session_id: session_id.clone(),
            user_id: user_id.map(String::from),
            conversation_id: conversation_id.map(String::from),
            state: if is_recreated {
                SessionState::Recreated
            } else {
                SessionState::Active
            },
            executor,
            created_at: now,
            created_at_utc: Utc::now(),
            last_activity: now,
            state_changed_at: now,
            command_count: 0,
            total_duration_ms: 0,
            installed_packages: Vec::new(),
            created_files: Vec::new(),
            is_recreated,
            previous_session_id: previous_session_id.clone(),
        };
        let handle = handle_of(&entry);
        pool.sessions.insert(session_id.clone(), entry);

        if let Some(user_id) = user_id {
            pool.user_sessions
                .entry(user_id.to_string())
                .or_default()
                .insert(session_id.clone());
        }
        if let Some(conversation_id) = conversation_id {
            pool.conversation_sessions
                .insert(conversation_id.to_string(), session_id.clone());

            let history = pool
                .history
                .entry(conversation_id.to_string())
                .or_insert_with(|| {
                    SessionHistory::new(conversation_id.to_string(), user_id.map(String::from))
                });
            history.total_sessions += 1;
            // The cleanup marker is consumed by this recreation; the
            // next create for this conversation starts clean.
            history.cleanup_reason = None;
        }

        tracing::info!(
            session_id = %session_id,
            user_id = user_id.unwrap_or("-"),
            conversation_id = conversation_id.unwrap_or("-"),
            is_recreated,
            "created session"
        );

        let message = recreation.as_ref().map(recreation_notice);
        Ok(SessionRecreationResult {
            session: handle,
            is_new: !is_recreated,
            is_recreated,
            previous_state: recreation,
            message,
        })
    }

    // ── State transitions ──────────────────────────────────────────

    pub async fn get_session(&self, session_id: &str) -> Option<SessionHandle> {
        let pool = self.pool.lock().await;
        pool.sessions.get(session_id).map(handle_of)
    }

    pub async fn mark_active(&self, session_id: &str) {
        let mut pool = self.pool.lock().await;
        if let Some(entry) = pool.sessions.get_mut(session_id) {
            entry.touch();
        }
    }

    pub async fn mark_idle(&self, session_id: &str) {
        self.transition(session_id, SessionState::Active, SessionState::Idle)
            .await;
    }

    pub async fn mark_complete(&self, session_id: &str) {
        let mut pool = self.pool.lock().await;
        if let Some(entry) = pool.sessions.get_mut(session_id) {
            entry.set_state(SessionState::Completing);
        }
    }

    pub async fn mark_disconnected(&self, session_id: &str) {
        self.transition(session_id, SessionState::Active, SessionState::Disconnected)
            .await;
    }

    pub async fn mark_reconnected(&self, session_id: &str) {
        let mut pool = self.pool.lock().await;
        if let Some(entry) = pool.sessions.get_mut(session_id) {
            if entry.state == SessionState::Disconnected {
                entry.set_state(SessionState::Active);
                entry.last_activity = Instant::now();
            }
        }
    }

    async fn transition(&self, session_id: &str, from: SessionState, to: SessionState) {
        let mut pool = self.pool.lock().await;
        if let Some(entry) = pool.sessions.get_mut(session_id) {
            if entry.state == from {
                entry.set_state(to);
            }
        }
    }

    /// Record a command execution: activity, counters, and detection
    /// of package installs and file creation for the history record.
    pub async fn record_command(&self, session_id: &str, command: &str, duration_ms: u64) {
        let mut pool = self.pool.lock().await;
        if let Some(entry) = pool.sessions.get_mut(session_id) {
            entry.command_count += 1;
            entry.total_duration_ms += duration_ms;
            entry.touch();
            for package in detect_package_installs(command) {
                entry.record_package(package);
            }
            for file in detect_file_creations(command) {
                entry.record_file(file);
            }
        }
    }

    // ── Cleanup ────────────────────────────────────────────────────

    pub async fn end_session(&self, session_id: &str, reason: CleanupReason) {
        let executor = {
            let mut pool = self.pool.lock().await;
            pool.detach(session_id, reason)
        };
        if let Some(executor) = executor {
            if let Err(e) = executor.stop_session().await {
                tracing::warn!(session_id, error = %e, "error stopping session");
            }
        }
    }

    pub async fn cleanup_all(&self, reason: CleanupReason) -> usize {
        let executors: Vec<Arc<dyn SessionExecutor>> = {
            let mut pool = self.pool.lock().await;
            let ids: Vec<String> = pool.sessions.keys().cloned().collect();
            ids.iter().filter_map(|id| pool.detach(id, reason)).collect()
        };
        let count = executors.len();
        for executor in executors {
            let _ = executor.stop_session().await;
        }
        count
    }

    /// Reap session containers left behind by a previous process.
    pub async fn cleanup_orphaned(&self, max_age_seconds: u64) -> Result<Vec<String>> {
        crate::docker::SessionDockerExecutor::cleanup_orphaned_containers(max_age_seconds).await
    }

    /// One sweeper pass: apply the timeout policy to every session.
    pub async fn sweep(&self) {
        let executors: Vec<Arc<dyn SessionExecutor>> = {
            let mut pool = self.pool.lock().await;
            let victims: Vec<(String, CleanupReason)> = pool
                .sessions
                .values()
                .filter_map(|entry| {
                    cleanup_decision(
                        entry.state,
                        entry.created_at.elapsed(),
                        entry.state_changed_at.elapsed(),
                        entry.last_activity.elapsed(),
                        &self.policy,
                    )
                    .map(|reason| (entry.session_id.clone(), reason))
                })
                .collect();
            victims
                .into_iter()
                .filter_map(|(id, reason)| pool.detach(&id, reason))
                .collect()
        };

        if !executors.is_empty() {
            tracing::info!(count = executors.len(), "sweeper cleaned sessions");
        }
        for executor in executors {
            let _ = executor.stop_session().await;
        }
    }

    pub async fn stats(&self) -> ManagerStats {
        let pool = self.pool.lock().await;
        let mut state_counts: HashMap<String, usize> = HashMap::new();
        for entry in pool.sessions.values() {
            let key = serde_json::to_value(entry.state)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default();
            *state_counts.entry(key).or_insert(0) += 1;
        }
        ManagerStats {
            total_sessions: pool.sessions.len(),
            total_users: pool.user_sessions.len(),
            state_counts,
        }
    }

    #[cfg(test)]
    async fn with_entry<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionEntry) -> R,
    ) -> Option<R> {
        let mut pool = self.pool.lock().await;
        pool.sessions.get_mut(session_id).map(f)
    }
}

fn handle_of(entry: &SessionEntry) -> SessionHandle {
    SessionHandle {
        session_id: entry.session_id.clone(),
        user_id: entry.user_id.clone(),
        conversation_id: entry.conversation_id.clone(),
        state: entry.state,
        executor: Arc::clone(&entry.executor),
        created_at: entry.created_at_utc,
        is_recreated: entry.is_recreated,
        previous_session_id: entry.previous_session_id.clone(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy decisions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The sweeper's condition table.
fn cleanup_decision(
    state: SessionState,
    session_age: Duration,
    state_age: Duration,
    idle_age: Duration,
    policy: &SessionPolicy,
) -> Option<CleanupReason> {
    if session_age.as_secs() > policy.max_session_duration {
        return Some(CleanupReason::IdleTimeout);
    }
    match state {
        SessionState::Completing if state_age.as_secs() > policy.completion_retain => {
            Some(CleanupReason::TaskComplete)
        }
        SessionState::Disconnected if state_age.as_secs() > policy.disconnect_timeout => {
            Some(CleanupReason::DisconnectTimeout)
        }
        SessionState::Active | SessionState::Idle | SessionState::Recreated
            if idle_age.as_secs() > policy.idle_timeout =>
        {
            Some(CleanupReason::IdleTimeout)
        }
        SessionState::Error => Some(CleanupReason::Error),
        _ => None,
    }
}

/// Compose the user-facing notice shown when a conversation's session
/// has to be recreated.
fn recreation_notice(history: &SessionHistory) -> String {
    let mut notice = String::from("Execution environment was reset");
    if let Some(reason) = history.cleanup_reason {
        notice.push_str(reason.notice_fragment());
    }

    let mut lost: Vec<String> = Vec::new();
    if !history.installed_packages.is_empty() {
        let shown: Vec<&str> = history
            .installed_packages
            .iter()
            .take(3)
            .map(String::as_str)
            .collect();
        let mut fragment = format!("installed packages ({}", shown.join(", "));
        if history.installed_packages.len() > 3 {
            fragment.push_str(&format!(
                " and {} more",
                history.installed_packages.len() - 3
            ));
        }
        fragment.push(')');
        lost.push(fragment);
    }
    if !history.created_files.is_empty() {
        lost.push(format!("created files ({})", history.created_files.len()));
    }

    if lost.is_empty() {
        notice.push('.');
    } else {
        notice.push_str(". The following needs to be set up again: ");
        notice.push_str(&lost.join(", "));
        notice.push('.');
    }
    notice
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Command parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Detect `pip/pip3`, `npm`, and `apt/apt-get` installs, returning
/// the bare package names (version pins stripped, npm/apt prefixed).
fn detect_package_installs(command: &str) -> Vec<String> {
    let lowered = command.to_lowercase();
    let parts: Vec<&str> = command.split_whitespace().collect();
    let mut packages = Vec::new();

    let grab_after = |keyword: &str, prefix: &str, packages: &mut Vec<String>| {
        for (i, part) in parts.iter().enumerate() {
            if *part == keyword {
                for candidate in parts.iter().skip(i + 1) {
                    if candidate.starts_with('-') {
                        continue;
                    }
                    let name = candidate
                        .split("==")
                        .next()
                        .and_then(|p| p.split(">=").next())
                        .unwrap_or(candidate);
                    packages.push(format!("{prefix}{name}"));
                    break;
                }
                break;
            }
        }
    };

    if lowered.contains("pip install") || lowered.contains("pip3 install") {
        grab_after("install", "", &mut packages);
    } else if lowered.contains("npm install") || lowered.contains("npm i ") {
        grab_after("install", "npm:", &mut packages);
        if packages.is_empty() {
            grab_after("i", "npm:", &mut packages);
        }
    } else if lowered.contains("apt install") || lowered.contains("apt-get install") {
        grab_after("install", "apt:", &mut packages);
    }

    packages
}

/// Detect obvious file-creating patterns: output redirection, touch,
/// and mkdir (directories are recorded with a trailing slash).
fn detect_file_creations(command: &str) -> Vec<String> {
    let mut files = Vec::new();
    let trimmed = command.trim();

    if command.contains('>') && !command.contains(">>") {
        if let Some(after) = command.rsplit('>').next() {
            if let Some(path) = after.trim().split_whitespace().next() {
                files.push(path.to_string());
            }
        }
    } else if let Some(rest) = trimmed.strip_prefix("touch ") {
        if let Some(path) = rest.split_whitespace().next() {
            files.push(path.to_string());
        }
    } else if command.contains("mkdir ") {
        let parts: Vec<&str> = command.split_whitespace().collect();
        if let Some(i) = parts.iter().position(|p| *p == "mkdir") {
            if let Some(dir) = parts.iter().skip(i + 1).find(|p| !p.starts_with('-')) {
                files.push(format!("{dir}/"));
            }
        }
    }

    files
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutionResult, SandboxExecutor};
    use async_trait::async_trait;

    /// Process-free session executor for pool tests.
    struct NullExecutor {
        id: String,
        stopped: AtomicBool,
    }

    #[async_trait]
    impl SandboxExecutor for NullExecutor {
        async fn execute_python(
            &self,
            _code: &str,
            _settings: &SandboxSettings,
        ) -> Result<ExecutionResult> {
            unimplemented!()
        }
        async fn execute_shell(
            &self,
            _command: &str,
            _settings: &SandboxSettings,
        ) -> Result<ExecutionResult> {
            unimplemented!()
        }
    }

    #[async_trait]
    impl SessionExecutor for NullExecutor {
        async fn start_session(&self) -> Result<String> {
            Ok(self.id.clone())
        }
        async fn stop_session(&self) -> Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn session_id(&self) -> Option<String> {
            Some(self.id.clone())
        }
        fn is_expired(&self) -> bool {
            false
        }
    }

    struct NullFactory;

    impl SessionExecutorFactory for NullFactory {
        fn create(
            &self,
            _settings: &SandboxSettings,
            _max_idle_seconds: u64,
        ) -> Arc<dyn SessionExecutor> {
            Arc::new(NullExecutor {
                id: uuid::Uuid::new_v4().simple().to_string()[..12].to_string(),
                stopped: AtomicBool::new(false),
            })
        }
    }

    fn manager(max_total: usize, max_per_user: usize) -> SessionManager {
        let mut settings = SandboxSettings::default();
        settings.docker.session_policy.max_total_sessions = max_total;
        settings.docker.session_policy.max_sessions_per_user = max_per_user;
        SessionManager::new(settings, Arc::new(NullFactory))
    }

    fn policy() -> SessionPolicy {
        SessionPolicy::default()
    }

    #[tokio::test]
    async fn create_then_reuse_same_conversation() {
        let m = manager(10, 5);
        let first = m.get_or_create(Some("u1"), Some("c1")).await.unwrap();
        assert!(first.is_new);
        assert!(!first.is_recreated);

        let second = m.get_or_create(Some("u1"), Some("c1")).await.unwrap();
        assert!(!second.is_new);
        assert!(!second.is_recreated);
        assert_eq!(second.session.session_id, first.session.session_id);
        assert_eq!(m.stats().await.total_sessions, 1);
    }

    #[tokio::test]
    async fn recreation_notice_fires_exactly_once() {
        let m = manager(10, 5);
        let first = m.get_or_create(Some("u1"), Some("c1")).await.unwrap();
        m.record_command(&first.session.session_id, "pip install numpy", 5)
            .await;
        m.record_command(&first.session.session_id, "touch out.csv", 2)
            .await;
        m.end_session(&first.session.session_id, CleanupReason::IdleTimeout)
            .await;

        let second = m.get_or_create(Some("u1"), Some("c1")).await.unwrap();
        assert!(second.is_recreated);
        assert!(!second.is_new);
        let message = second.message.unwrap();
        assert!(message.contains("inactivity"), "message: {message}");
        assert!(message.contains("numpy"), "message: {message}");
        assert!(message.contains("created files (1)"), "message: {message}");
        let previous = second.previous_state.unwrap();
        assert_eq!(
            previous.last_session_id.as_deref(),
            Some(first.session.session_id.as_str())
        );

        // The session created by the recreation is reusable; ending it
        // and recreating again produces a fresh notice, but a plain
        // follow-up call does not.
        let third = m.get_or_create(Some("u1"), Some("c1")).await.unwrap();
        assert!(!third.is_recreated);
        assert_eq!(third.session.session_id, second.session.session_id);
    }

    #[tokio::test]
    async fn capacity_evicts_lru_non_active() {
        let m = manager(2, 5);
        let a = m.get_or_create(Some("u1"), Some("c1")).await.unwrap();
        let b = m.get_or_create(Some("u2"), Some("c2")).await.unwrap();
        m.mark_idle(&a.session.session_id).await;
        m.mark_idle(&b.session.session_id).await;

        // Make `a` the LRU.
        m.mark_active(&b.session.session_id).await;
        m.mark_idle(&b.session.session_id).await;

        let c = m.get_or_create(Some("u3"), Some("c3")).await.unwrap();
        assert!(c.is_new);

        let stats = m.stats().await;
        assert!(stats.total_sessions <= 2);
        assert!(m.get_session(&a.session.session_id).await.is_none());
        assert!(m.get_session(&b.session.session_id).await.is_some());
    }

    #[tokio::test]
    async fn capacity_with_all_active_errors() {
        let m = manager(1, 5);
        let a = m.get_or_create(Some("u1"), Some("c1")).await.unwrap();
        // The session starts Active and stays Active.
        assert_eq!(a.session.state, SessionState::Active);

        let err = m.get_or_create(Some("u2"), Some("c2")).await.unwrap_err();
        assert!(matches!(err, Error::SessionLimit(_)));
    }

    #[tokio::test]
    async fn at_capacity_existing_conversation_reuses_not_evicts() {
        let m = manager(1, 5);
        let a = m.get_or_create(Some("u1"), Some("c1")).await.unwrap();
        let again = m.get_or_create(Some("u1"), Some("c1")).await.unwrap();
        assert_eq!(again.session.session_id, a.session.session_id);
        assert_eq!(m.stats().await.total_sessions, 1);
    }

    #[tokio::test]
    async fn per_user_limit_evicts_oldest() {
        let m = manager(10, 2);
        let a = m.get_or_create(Some("u1"), Some("c1")).await.unwrap();
        let _b = m.get_or_create(Some("u1"), Some("c2")).await.unwrap();

        let c = m.get_or_create(Some("u1"), Some("c3")).await.unwrap();
        assert!(c.is_new);
        assert!(m.get_session(&a.session.session_id).await.is_none());
        let stats = m.stats().await;
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.total_users, 1);
    }

    #[tokio::test]
    async fn conversation_index_stays_injective() {
        let m = manager(10, 5);
        for i in 0..5 {
            m.get_or_create(Some("u1"), Some(&format!("c{i}"))).await.unwrap();
        }
        let pool = m.pool.lock().await;
        // Every conversation maps to a live session, and no two
        // conversations share one.
        let values: HashSet<&String> = pool.conversation_sessions.values().collect();
        assert_eq!(values.len(), pool.conversation_sessions.len());
        for session_id in pool.conversation_sessions.values() {
            assert!(pool.sessions.contains_key(session_id));
        }
    }

    #[tokio::test]
    async fn record_command_detects_installs_and_files() {
        let m = manager(10, 5);
        let s = m.get_or_create(Some("u1"), Some("c1")).await.unwrap();
        let id = s.session.session_id.clone();

        m.record_command(&id, "pip install numpy==1.26", 10).await;
        m.record_command(&id, "pip install numpy==1.26", 10).await;
        m.record_command(&id, "npm install lodash", 10).await;
        m.record_command(&id, "apt-get install -y curl", 10).await;
        m.record_command(&id, "echo hi > result.txt", 10).await;
        m.record_command(&id, "mkdir -p data/raw", 10).await;

        let (packages, files, count) = m
            .with_entry(&id, |e| {
                (
                    e.installed_packages.clone(),
                    e.created_files.clone(),
                    e.command_count,
                )
            })
            .await
            .unwrap();
        assert_eq!(packages, vec!["numpy", "npm:lodash", "apt:curl"]);
        assert_eq!(files, vec!["result.txt", "data/raw/"]);
        assert_eq!(count, 6);
    }

    #[tokio::test]
    async fn state_transitions() {
        let m = manager(10, 5);
        let s = m.get_or_create(Some("u1"), Some("c1")).await.unwrap();
        let id = s.session.session_id.clone();

        m.mark_idle(&id).await;
        assert_eq!(m.get_session(&id).await.unwrap().state, SessionState::Idle);

        // Activity promotes Idle back to Active.
        m.record_command(&id, "ls", 1).await;
        assert_eq!(m.get_session(&id).await.unwrap().state, SessionState::Active);

        m.mark_disconnected(&id).await;
        assert_eq!(
            m.get_session(&id).await.unwrap().state,
            SessionState::Disconnected
        );
        m.mark_reconnected(&id).await;
        assert_eq!(m.get_session(&id).await.unwrap().state, SessionState::Active);

        m.mark_complete(&id).await;
        assert_eq!(
            m.get_session(&id).await.unwrap().state,
            SessionState::Completing
        );
    }

    #[tokio::test]
    async fn cleanup_all_empties_pool() {
        let m = manager(10, 5);
        for i in 0..3 {
            m.get_or_create(Some("u1"), Some(&format!("c{i}"))).await.unwrap();
        }
        let cleaned = m.cleanup_all(CleanupReason::AppShutdown).await;
        assert_eq!(cleaned, 3);
        assert_eq!(m.stats().await.total_sessions, 0);
    }

    #[test]
    fn sweeper_condition_table() {
        let p = policy();
        let zero = Duration::ZERO;
        let long = Duration::from_secs(p.max_session_duration + 1);

        // Max duration trumps everything.
        assert_eq!(
            cleanup_decision(SessionState::Active, long, zero, zero, &p),
            Some(CleanupReason::IdleTimeout)
        );

        // Completing past the retain window.
        assert_eq!(
            cleanup_decision(
                SessionState::Completing,
                zero,
                Duration::from_secs(p.completion_retain + 1),
                zero,
                &p
            ),
            Some(CleanupReason::TaskComplete)
        );

        // Disconnected past the reconnect window.
        assert_eq!(
            cleanup_decision(
                SessionState::Disconnected,
                zero,
                Duration::from_secs(p.disconnect_timeout + 1),
                zero,
                &p
            ),
            Some(CleanupReason::DisconnectTimeout)
        );

        // Idle sessions past the idle timeout.
        assert_eq!(
            cleanup_decision(
                SessionState::Idle,
                zero,
                zero,
                Duration::from_secs(p.idle_timeout + 1),
                &p
            ),
            Some(CleanupReason::IdleTimeout)
        );

        // Error sessions are always reaped.
        assert_eq!(
            cleanup_decision(SessionState::Error, zero, zero, zero, &p),
            Some(CleanupReason::Error)
        );

        // Healthy sessions stay.
        assert_eq!(
            cleanup_decision(SessionState::Active, zero, zero, zero, &p),
            None
        );
        assert_eq!(
            cleanup_decision(SessionState::Completing, zero, zero, zero, &p),
            None
        );
    }

    #[test]
    fn notice_composition() {
        let mut history = SessionHistory::new("c1".into(), None);
        history.cleanup_reason = Some(CleanupReason::ResourceLimit);
        history.installed_packages = vec![
            "numpy".into(),
            "pandas".into(),
            "scipy".into(),
            "torch".into(),
        ];
        history.created_files = vec!["a.txt".into(), "b.txt".into()];

        let notice = recreation_notice(&history);
        assert!(notice.contains("resource limits"));
        assert!(notice.contains("numpy, pandas, scipy and 1 more"));
        assert!(notice.contains("created files (2)"));
    }
}
