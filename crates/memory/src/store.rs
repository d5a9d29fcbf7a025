//! The conversation store — per-session turn logs with lossy compaction.
//!
//! Each session owns an append-only log of turns. The replay view handed to
//! a responder is the log with its oldest history optionally replaced by a
//! single `system_memory` summary turn:
//!
//! ```text
//! [standing system turn?] [summary?] [uncovered raw turns ...]
//! ```
//!
//! Compaction only runs at the `get_context` checkpoint (or when asked for
//! explicitly), never inside `append`. It always leaves the most recent
//! `keep_recent` history turns untouched and the raw log intact. If the
//! summarizer fails or times out, the uncompacted view is returned instead.

use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use turnstore_config::{CompactionConfig, EstimatorKind};
use turnstore_core::checkpoint::{Checkpointer, SessionSnapshot};
use turnstore_core::error::{Result, StoreError, SummarizerError};
use turnstore_core::event::{DomainEvent, EventBus};
use turnstore_core::responder::Summarizer;
use turnstore_core::token::{CharCountEstimator, HeuristicEstimator, TokenEstimator};
use turnstore_core::turn::{CompactionRecord, Role, SessionKey, Turn};

/// How a compaction pass selects and summarizes turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionPolicy {
    /// Most recent history turns that are never compacted (K)
    pub keep_recent: usize,

    /// Upper bound on the summarizer call
    pub timeout: Duration,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            keep_recent: 4,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Store-wide settings, validated once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// Automatic compaction runs when the replay view estimates above this
    pub max_tokens_before_summary: usize,

    /// Policy used by automatic compaction
    pub policy: CompactionPolicy,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            max_tokens_before_summary: 1000,
            policy: CompactionPolicy::default(),
        }
    }
}

impl StoreSettings {
    pub fn from_config(config: &CompactionConfig) -> Self {
        Self {
            max_tokens_before_summary: config.max_tokens_before_summary,
            policy: CompactionPolicy {
                keep_recent: config.keep_recent,
                timeout: config.summarize_timeout(),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_tokens_before_summary == 0 {
            return Err(StoreError::InvalidSettings(
                "max_tokens_before_summary must be > 0".into(),
            ));
        }
        if self.policy.timeout.is_zero() {
            return Err(StoreError::InvalidSettings(
                "summarize timeout must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Why a compaction pass did not replace anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No raw turns older than the most recent K
    NothingToCompact,
    /// The summarizer returned an error or an empty summary
    SummarizerFailed(String),
    /// The summarizer did not answer within the policy timeout
    TimedOut,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NothingToCompact => write!(f, "nothing to compact"),
            SkipReason::SummarizerFailed(reason) => write!(f, "summarizer failed: {reason}"),
            SkipReason::TimedOut => write!(f, "summarizer timed out"),
        }
    }
}

/// Result of a compaction pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    Compacted {
        /// Raw turns now covered by the summary (cumulative)
        replaced: usize,
        tokens_before: usize,
        tokens_after: usize,
    },
    Skipped(SkipReason),
}

/// Lifecycle of a session. There is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    Active,
}

/// Size and compaction figures for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// Turns in the raw log
    pub turns: usize,
    /// Turns in the current replay view
    pub replay_turns: usize,
    /// Estimate of the replay view
    pub estimated_tokens: usize,
    /// Successful compactions so far
    pub compactions: u32,
}

type SessionHandle = Arc<Mutex<SessionSnapshot>>;

/// Owns the authoritative turn log of every session.
///
/// Operations on one session key are serialized; different keys proceed
/// independently.
pub struct ConversationStore {
    summarizer: Arc<dyn Summarizer>,
    settings: StoreSettings,
    estimator: Arc<dyn TokenEstimator>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    events: Option<Arc<EventBus>>,
    sessions: RwLock<HashMap<SessionKey, SessionHandle>>,
}

impl ConversationStore {
    /// Create a store. Fails if the settings are invalid.
    pub fn new(summarizer: Arc<dyn Summarizer>, settings: StoreSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            summarizer,
            settings,
            estimator: Arc::new(HeuristicEstimator),
            checkpointer: None,
            events: None,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Create a store from the `[compaction]` config section.
    pub fn from_config(summarizer: Arc<dyn Summarizer>, config: &CompactionConfig) -> Result<Self> {
        let store = Self::new(summarizer, StoreSettings::from_config(config))?;
        Ok(match config.estimator {
            EstimatorKind::Heuristic => store,
            EstimatorKind::Chars => store.with_estimator(Arc::new(CharCountEstimator)),
        })
    }

    /// Replace the token estimator used by the compaction trigger.
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Persist sessions through a checkpointer.
    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Publish domain events to a bus.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// The estimator behind the compaction trigger.
    pub fn estimator(&self) -> &dyn TokenEstimator {
        self.estimator.as_ref()
    }

    /// Append a turn to the end of a session's log.
    ///
    /// Invalid turns are rejected and leave the session unchanged. Appending
    /// never compacts; it only notes when the next `get_context` will.
    pub async fn append(&self, key: &SessionKey, turn: Turn) -> Result<()> {
        turn.validate()?;

        let handle = self.session(key).await?;
        let mut session = handle.lock().await;

        let role = turn.role;
        let previous_update = session.updated_at;
        session.log.push(turn);
        session.updated_at = Utc::now();

        if let Err(e) = self.persist(&session).await {
            session.log.pop();
            session.updated_at = previous_update;
            return Err(e);
        }

        let log_len = session.log.len();
        debug!(session = %key, %role, log_len, "Turn appended");

        let tokens = self.estimator.estimate(&session.replay());
        if tokens > self.settings.max_tokens_before_summary {
            debug!(
                session = %key,
                tokens,
                threshold = self.settings.max_tokens_before_summary,
                "Context over threshold; compaction runs at next checkpoint"
            );
        }

        self.publish(DomainEvent::TurnAppended {
            session: key.to_string(),
            role: role.to_string(),
            log_len,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// The exact turn sequence to submit to a responder next.
    ///
    /// Runs the automatic compaction checkpoint first. Calling this twice
    /// without an intervening append yields identical sequences.
    pub async fn get_context(&self, key: &SessionKey) -> Result<Vec<Turn>> {
        let handle = self.session(key).await?;
        let mut session = handle.lock().await;
        self.checkpoint(&mut session).await;
        Ok(session.replay())
    }

    /// The current replay view, without running the compaction checkpoint.
    pub async fn view(&self, key: &SessionKey) -> Result<Vec<Turn>> {
        let handle = self.session(key).await?;
        let session = handle.lock().await;
        Ok(session.replay())
    }

    /// Compact the session now, regardless of the threshold.
    ///
    /// Summarizer failures are reported as `Skipped`, never as errors.
    pub async fn compact(
        &self,
        key: &SessionKey,
        policy: &CompactionPolicy,
    ) -> Result<CompactionOutcome> {
        let handle = self.session(key).await?;
        let mut session = handle.lock().await;
        self.compact_locked(&mut session, policy).await
    }

    /// Clear a session entirely, including its checkpoint.
    pub async fn reset(&self, key: &SessionKey) -> Result<()> {
        let handle = self.session(key).await?;
        let mut session = handle.lock().await;
        // Checkpoint first: on failure the session stays as it was
        if let Some(cp) = &self.checkpointer {
            cp.delete(key).await?;
        }
        *session = SessionSnapshot::empty(key.clone());
        info!(session = %key, "Session reset");
        self.publish(DomainEvent::SessionReset {
            session: key.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// The full raw log, including turns hidden behind a summary.
    pub async fn history(&self, key: &SessionKey) -> Result<Vec<Turn>> {
        let handle = self.session(key).await?;
        let session = handle.lock().await;
        Ok(session.log.clone())
    }

    /// The summary currently standing in for compacted history, if any.
    pub async fn compaction(&self, key: &SessionKey) -> Result<Option<CompactionRecord>> {
        let handle = self.session(key).await?;
        let session = handle.lock().await;
        Ok(session.compaction.clone())
    }

    pub async fn state(&self, key: &SessionKey) -> Result<SessionState> {
        let handle = self.session(key).await?;
        let session = handle.lock().await;
        Ok(if session.log.is_empty() {
            SessionState::Empty
        } else {
            SessionState::Active
        })
    }

    pub async fn stats(&self, key: &SessionKey) -> Result<SessionStats> {
        let handle = self.session(key).await?;
        let session = handle.lock().await;
        let view = session.replay();
        Ok(SessionStats {
            turns: session.log.len(),
            replay_turns: view.len(),
            estimated_tokens: self.estimator.estimate(&view),
            compactions: session.compactions,
        })
    }

    /// Keys of all non-empty sessions, in memory or checkpointed.
    pub async fn sessions(&self) -> Result<Vec<SessionKey>> {
        let handles: Vec<(SessionKey, SessionHandle)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(k, h)| (k.clone(), h.clone()))
            .collect();

        let mut keys = Vec::new();
        for (key, handle) in handles {
            if !handle.lock().await.log.is_empty() {
                keys.push(key);
            }
        }
        if let Some(cp) = &self.checkpointer {
            keys.extend(cp.list().await?);
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    // ── internals ──

    /// Get or create the handle for a session, loading it from the
    /// checkpointer on first touch.
    async fn session(&self, key: &SessionKey) -> Result<SessionHandle> {
        if let Some(handle) = self.sessions.read().await.get(key) {
            return Ok(handle.clone());
        }

        let loaded = match &self.checkpointer {
            Some(cp) => cp.load(key).await?,
            None => None,
        };
        if loaded.is_some() {
            debug!(session = %key, "Session restored from checkpoint");
        }

        let mut sessions = self.sessions.write().await;
        let handle = sessions.entry(key.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(
                loaded.unwrap_or_else(|| SessionSnapshot::empty(key.clone())),
            ))
        });
        Ok(handle.clone())
    }

    async fn persist(&self, session: &SessionSnapshot) -> Result<()> {
        if let Some(cp) = &self.checkpointer {
            cp.save(session).await?;
        }
        Ok(())
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// The automatic compaction checkpoint. Never fails the caller.
    async fn checkpoint(&self, session: &mut SessionSnapshot) {
        let tokens = self.estimator.estimate(&session.replay());
        if tokens <= self.settings.max_tokens_before_summary {
            return;
        }
        // Already failed on this exact log; retry only after the next append
        if session.failed_at == Some(session.log.len()) {
            return;
        }

        let policy = self.settings.policy.clone();
        if compaction_window(session, policy.keep_recent).is_none() {
            debug!(session = %session.key, tokens, "Over threshold with nothing left to compact");
            return;
        }
        match self.compact_locked(session, &policy).await {
            Ok(CompactionOutcome::Skipped(
                SkipReason::SummarizerFailed(_) | SkipReason::TimedOut,
            )) => {
                session.failed_at = Some(session.log.len());
                if let Err(e) = self.persist(session).await {
                    warn!(session = %session.key, error = %e, "Failed to record compaction failure");
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(session = %session.key, error = %e, "Compaction not persisted; continuing uncompacted");
                session.failed_at = Some(session.log.len());
            }
        }
    }

    async fn compact_locked(
        &self,
        session: &mut SessionSnapshot,
        policy: &CompactionPolicy,
    ) -> Result<CompactionOutcome> {
        let Some((start, covered, cut)) = compaction_window(session, policy.keep_recent) else {
            return Ok(self.skipped(session, SkipReason::NothingToCompact));
        };

        // Raw turns in [covered, cut) fold into the new summary, together
        // with the previous summary so nothing already summarized is lost.
        let mut to_summarize = Vec::with_capacity(cut - covered + 1);
        if let Some(record) = &session.compaction {
            to_summarize.push(record.turn.clone());
        }
        to_summarize.extend(session.log[covered..cut].iter().cloned());

        let tokens_before = self.estimator.estimate(&session.replay());
        let summary = match summarize_with_timeout(
            self.summarizer.as_ref(),
            &to_summarize,
            policy.timeout,
        )
        .await
        {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                let reason = SkipReason::SummarizerFailed("empty summary".into());
                return Ok(self.skipped(session, reason));
            }
            Err(SummarizerError::Timeout { .. }) => {
                return Ok(self.skipped(session, SkipReason::TimedOut));
            }
            Err(e) => {
                return Ok(self.skipped(session, SkipReason::SummarizerFailed(e.to_string())));
            }
        };

        let first_turn_id = session
            .compaction
            .as_ref()
            .map(|r| r.first_turn_id.clone())
            .unwrap_or_else(|| session.log[covered].id.clone());
        let record = CompactionRecord {
            turn: Turn::system_memory(summary),
            replaced: cut - start,
            first_turn_id,
            last_turn_id: session.log[cut - 1].id.clone(),
            created_at: Utc::now(),
        };

        let previous = (
            session.compaction.replace(record),
            session.covered_until,
            session.compactions,
            session.failed_at,
        );
        session.covered_until = cut;
        session.compactions += 1;
        session.failed_at = None;
        session.updated_at = Utc::now();

        if let Err(e) = self.persist(session).await {
            (
                session.compaction,
                session.covered_until,
                session.compactions,
                session.failed_at,
            ) = previous;
            return Err(e);
        }

        let tokens_after = self.estimator.estimate(&session.replay());
        let replaced = cut - start;
        info!(
            session = %session.key,
            replaced,
            tokens_before,
            tokens_after,
            "Context compacted"
        );
        self.publish(DomainEvent::ContextCompacted {
            session: session.key.to_string(),
            replaced,
            tokens_before,
            tokens_after,
            timestamp: Utc::now(),
        });

        Ok(CompactionOutcome::Compacted {
            replaced,
            tokens_before,
            tokens_after,
        })
    }

    fn skipped(&self, session: &SessionSnapshot, reason: SkipReason) -> CompactionOutcome {
        match &reason {
            SkipReason::NothingToCompact => {
                debug!(session = %session.key, "Nothing to compact")
            }
            other => warn!(session = %session.key, reason = %other, "Compaction skipped"),
        }
        self.publish(DomainEvent::CompactionSkipped {
            session: session.key.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        CompactionOutcome::Skipped(reason)
    }
}

/// Bounds of the next compaction as `(history_start, covered, cut)`:
/// raw turns in `[covered, cut)` get summarized, `[cut, len)` stay verbatim.
///
/// `cut` keeps at least `keep_recent` turns and moves earlier while it
/// would land on a tool result, so an invocation and its results stay on
/// the same side. `None` when nothing would be summarized.
fn compaction_window(session: &SessionSnapshot, keep_recent: usize) -> Option<(usize, usize, usize)> {
    let start = session.history_start();
    let covered = session.covered_until.max(start);
    let mut cut = session.log.len().checked_sub(keep_recent)?;
    while cut > covered && session.log.get(cut).is_some_and(|t| t.role == Role::ToolResult) {
        cut -= 1;
    }
    (cut > covered).then_some((start, covered, cut))
}

/// Call the summarizer, mapping an elapsed deadline to `Timeout`.
async fn summarize_with_timeout(
    summarizer: &dyn Summarizer,
    turns: &[Turn],
    timeout: Duration,
) -> std::result::Result<String, SummarizerError> {
    match tokio::time::timeout(timeout, summarizer.summarize(turns)).await {
        Ok(result) => result,
        Err(_) => Err(SummarizerError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryCheckpointer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use turnstore_core::error::CheckpointError;
    use turnstore_core::turn::ToolInvocation;

    /// Summarizer that reports how many turns it was given.
    struct CountingSummarizer {
        calls: AtomicUsize,
    }

    impl CountingSummarizer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Summarizer for CountingSummarizer {
        fn name(&self) -> &str {
            "counting"
        }

        async fn summarize(&self, turns: &[Turn]) -> std::result::Result<String, SummarizerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("summary #{n} of {} turns", turns.len()))
        }
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        fn name(&self) -> &str {
            "failing"
        }

        async fn summarize(&self, _turns: &[Turn]) -> std::result::Result<String, SummarizerError> {
            Err(SummarizerError::Failed("model unavailable".into()))
        }
    }

    struct SlowSummarizer;

    #[async_trait]
    impl Summarizer for SlowSummarizer {
        fn name(&self) -> &str {
            "slow"
        }

        async fn summarize(&self, _turns: &[Turn]) -> std::result::Result<String, SummarizerError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("too late".into())
        }
    }

    /// In-memory checkpointer whose deletes can be made to fail.
    struct FlakyCheckpointer {
        inner: InMemoryCheckpointer,
        fail_deletes: AtomicBool,
    }

    #[async_trait]
    impl Checkpointer for FlakyCheckpointer {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn load(
            &self,
            key: &SessionKey,
        ) -> std::result::Result<Option<SessionSnapshot>, CheckpointError> {
            self.inner.load(key).await
        }

        async fn save(&self, snapshot: &SessionSnapshot) -> std::result::Result<(), CheckpointError> {
            self.inner.save(snapshot).await
        }

        async fn delete(&self, key: &SessionKey) -> std::result::Result<bool, CheckpointError> {
            if self.fail_deletes.load(Ordering::SeqCst) {
                return Err(CheckpointError::Storage("read-only file system".into()));
            }
            self.inner.delete(key).await
        }

        async fn list(&self) -> std::result::Result<Vec<SessionKey>, CheckpointError> {
            self.inner.list().await
        }
    }

    fn key(s: &str) -> SessionKey {
        SessionKey::parse(s).unwrap()
    }

    /// One token per turn, so thresholds read as turn counts.
    fn per_turn(turns: &[Turn]) -> usize {
        turns.len()
    }

    fn store(summarizer: Arc<dyn Summarizer>, threshold: usize, keep_recent: usize) -> ConversationStore {
        ConversationStore::new(
            summarizer,
            StoreSettings {
                max_tokens_before_summary: threshold,
                policy: CompactionPolicy {
                    keep_recent,
                    timeout: Duration::from_millis(200),
                },
            },
        )
        .unwrap()
        .with_estimator(Arc::new(per_turn))
    }

    async fn append_pairs(store: &ConversationStore, key: &SessionKey, pairs: usize) {
        for i in 0..pairs {
            store.append(key, Turn::user(format!("question {i}"))).await.unwrap();
            store.append(key, Turn::assistant(format!("answer {i}"))).await.unwrap();
        }
    }

    #[test]
    fn settings_validation() {
        assert!(StoreSettings::default().validate().is_ok());
        let zero = StoreSettings {
            max_tokens_before_summary: 0,
            ..StoreSettings::default()
        };
        assert!(matches!(zero.validate(), Err(StoreError::InvalidSettings(_))));
        let no_timeout = StoreSettings {
            policy: CompactionPolicy {
                keep_recent: 4,
                timeout: Duration::ZERO,
            },
            ..StoreSettings::default()
        };
        assert!(ConversationStore::new(CountingSummarizer::new(), no_timeout).is_err());
    }

    #[test]
    fn settings_from_config() {
        let config = CompactionConfig {
            max_tokens_before_summary: 800,
            keep_recent: 6,
            summarize_timeout_secs: 5,
            ..CompactionConfig::default()
        };
        let settings = StoreSettings::from_config(&config);
        assert_eq!(settings.max_tokens_before_summary, 800);
        assert_eq!(settings.policy.keep_recent, 6);
        assert_eq!(settings.policy.timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn preserves_append_order_under_threshold() {
        let store = store(CountingSummarizer::new(), 100, 2);
        let k = key("thread");
        let turns = vec![
            Turn::system("You are an assistant"),
            Turn::user("My name is Alice"),
            Turn::assistant("Hi Alice"),
        ];
        for t in &turns {
            store.append(&k, t.clone()).await.unwrap();
        }
        assert_eq!(store.get_context(&k).await.unwrap(), turns);
    }

    #[tokio::test]
    async fn invalid_turn_leaves_session_unchanged() {
        let store = store(CountingSummarizer::new(), 100, 2);
        let k = key("thread");
        store.append(&k, Turn::user("hello")).await.unwrap();

        let err = store
            .append(&k, Turn::system_memory("forged summary"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTurn(_)));
        assert_eq!(store.history(&k).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn state_goes_from_empty_to_active() {
        let store = store(CountingSummarizer::new(), 100, 2);
        let k = key("thread");
        assert_eq!(store.state(&k).await.unwrap(), SessionState::Empty);
        store.append(&k, Turn::user("hi")).await.unwrap();
        assert_eq!(store.state(&k).await.unwrap(), SessionState::Active);
    }

    #[tokio::test]
    async fn compacts_at_checkpoint_not_at_append() {
        let summarizer = CountingSummarizer::new();
        let store = store(summarizer.clone(), 5, 2);
        let k = key("thread");
        append_pairs(&store, &k, 5).await;
        assert_eq!(summarizer.calls(), 0);

        let view = store.get_context(&k).await.unwrap();
        assert_eq!(summarizer.calls(), 1);
        assert_eq!(view.len(), 3);
        assert_eq!(view[0].role, Role::SystemMemory);
        assert_eq!(view[0].content, "summary #1 of 8 turns");
        assert_eq!(view[1].content, "question 4");
        assert_eq!(view[2].content, "answer 4");
    }

    #[tokio::test]
    async fn view_never_compacts() {
        let summarizer = CountingSummarizer::new();
        let store = store(summarizer.clone(), 2, 1);
        let k = key("thread");
        append_pairs(&store, &k, 3).await;

        assert_eq!(store.view(&k).await.unwrap().len(), 6);
        assert_eq!(summarizer.calls(), 0);
        store.get_context(&k).await.unwrap();
        assert_eq!(store.view(&k).await.unwrap(), store.get_context(&k).await.unwrap());
    }

    #[tokio::test]
    async fn context_is_idempotent_after_compaction() {
        let summarizer = CountingSummarizer::new();
        let store = store(summarizer.clone(), 2, 3);
        let k = key("thread");
        append_pairs(&store, &k, 4).await;

        let first = store.get_context(&k).await.unwrap();
        let second = store.get_context(&k).await.unwrap();
        assert_eq!(first, second);
        // Still above threshold, but only the summary is older than K
        assert_eq!(summarizer.calls(), 1);
    }

    #[tokio::test]
    async fn standing_system_turn_is_never_compacted() {
        let store = store(CountingSummarizer::new(), 4, 1);
        let k = key("thread");
        store.append(&k, Turn::system("You are an assistant")).await.unwrap();
        append_pairs(&store, &k, 3).await;

        let view = store.get_context(&k).await.unwrap();
        assert_eq!(view.len(), 3);
        assert_eq!(view[0].content, "You are an assistant");
        assert_eq!(view[1].role, Role::SystemMemory);
        assert_eq!(view[2].content, "answer 2");

        let record = store.compaction(&k).await.unwrap().unwrap();
        assert_eq!(record.replaced, 5);
        let history = store.history(&k).await.unwrap();
        assert_eq!(record.first_turn_id, history[1].id);
        assert_eq!(record.last_turn_id, history[5].id);
    }

    #[tokio::test]
    async fn tool_results_stay_with_their_invocation() {
        let summarizer = CountingSummarizer::new();
        let store = store(summarizer.clone(), 4, 4);
        let k = key("thread");
        let first = ToolInvocation::new("calculator", serde_json::json!({"operation": "add", "a": 1, "b": 2}));
        let second = ToolInvocation::new("calculator", serde_json::json!({"operation": "add", "a": 3, "b": 4}));
        let turns = vec![
            Turn::user("add 1+2 and 3+4"),
            Turn::tool_invocation("", vec![first.clone(), second.clone()]),
            Turn::tool_result(&first.id, "3"),
            Turn::tool_result(&second.id, "7"),
            Turn::assistant("3 and 7"),
            Turn::user("thanks"),
        ];
        for t in &turns {
            store.append(&k, t.clone()).await.unwrap();
        }

        // K = 4 would start the window on a tool result; the cut moves back
        // to keep the invocation, so only the first user turn is summarized
        let view = store.get_context(&k).await.unwrap();
        assert_eq!(view[0].role, Role::SystemMemory);
        assert_eq!(&view[1..], &turns[1..]);
        assert_eq!(store.compaction(&k).await.unwrap().unwrap().replaced, 1);

        // Still over the threshold, but the next cut would split the pair again
        assert_eq!(store.get_context(&k).await.unwrap(), view);
        let outcome = store
            .compact(&k, &CompactionPolicy { keep_recent: 3, timeout: Duration::from_secs(1) })
            .await
            .unwrap();
        assert_eq!(outcome, CompactionOutcome::Skipped(SkipReason::NothingToCompact));
        assert_eq!(summarizer.calls(), 1);
    }

    #[tokio::test]
    async fn second_compaction_folds_previous_summary() {
        let summarizer = CountingSummarizer::new();
        let store = store(summarizer.clone(), 4, 2);
        let k = key("thread");
        append_pairs(&store, &k, 3).await;
        store.get_context(&k).await.unwrap();

        append_pairs(&store, &k, 2).await;
        let view = store.get_context(&k).await.unwrap();
        assert_eq!(summarizer.calls(), 2);
        // previous summary + 2 raw turns left from round one + 2 new ones
        assert_eq!(view[0].content, "summary #2 of 5 turns");
        assert_eq!(view.iter().filter(|t| t.role == Role::SystemMemory).count(), 1);
        assert_eq!(view.len(), 3);

        let record = store.compaction(&k).await.unwrap().unwrap();
        assert_eq!(record.replaced, 8);
        assert_eq!(store.stats(&k).await.unwrap().compactions, 2);
    }

    #[tokio::test]
    async fn keep_recent_zero_summarizes_everything() {
        let store = store(CountingSummarizer::new(), 1, 0);
        let k = key("thread");
        append_pairs(&store, &k, 2).await;
        let view = store.get_context(&k).await.unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].role, Role::SystemMemory);
    }

    #[tokio::test]
    async fn summarizer_failure_returns_uncompacted_context() {
        let store = store(Arc::new(FailingSummarizer), 2, 1);
        let k = key("thread");
        append_pairs(&store, &k, 3).await;
        let before = store.history(&k).await.unwrap();

        let view = store.get_context(&k).await.unwrap();
        assert_eq!(view, before);

        let outcome = store.compact(&k, &CompactionPolicy::default()).await.unwrap();
        assert!(matches!(
            outcome,
            CompactionOutcome::Skipped(SkipReason::SummarizerFailed(_))
        ));
        assert!(store.compaction(&k).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn summarizer_timeout_is_a_skip() {
        let store = store(Arc::new(SlowSummarizer), 2, 1);
        let k = key("thread");
        append_pairs(&store, &k, 3).await;
        let before = store.history(&k).await.unwrap();

        assert_eq!(store.get_context(&k).await.unwrap(), before);
        let outcome = store
            .compact(
                &k,
                &CompactionPolicy {
                    keep_recent: 1,
                    timeout: Duration::from_millis(50),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, CompactionOutcome::Skipped(SkipReason::TimedOut));
    }

    #[tokio::test]
    async fn empty_summary_counts_as_failure() {
        let blank = |_: &[Turn]| 0usize;
        struct BlankSummarizer;
        #[async_trait]
        impl Summarizer for BlankSummarizer {
            fn name(&self) -> &str {
                "blank"
            }
            async fn summarize(&self, _t: &[Turn]) -> std::result::Result<String, SummarizerError> {
                Ok("   ".into())
            }
        }

        let store = ConversationStore::new(Arc::new(BlankSummarizer), StoreSettings::default())
            .unwrap()
            .with_estimator(Arc::new(blank));
        let k = key("thread");
        append_pairs(&store, &k, 3).await;
        let outcome = store
            .compact(&k, &CompactionPolicy { keep_recent: 1, timeout: Duration::from_secs(1) })
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            CompactionOutcome::Skipped(SkipReason::SummarizerFailed(_))
        ));
    }

    #[tokio::test]
    async fn failed_checkpoint_is_not_retried_until_next_append() {
        struct FlakySummarizer {
            calls: AtomicUsize,
        }
        #[async_trait]
        impl Summarizer for FlakySummarizer {
            fn name(&self) -> &str {
                "flaky"
            }
            async fn summarize(&self, _t: &[Turn]) -> std::result::Result<String, SummarizerError> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(SummarizerError::Failed("first call fails".into()))
                } else {
                    Ok("recovered".into())
                }
            }
        }

        let summarizer = Arc::new(FlakySummarizer {
            calls: AtomicUsize::new(0),
        });
        let store = store(summarizer.clone(), 2, 1);
        let k = key("thread");
        append_pairs(&store, &k, 2).await;

        let first = store.get_context(&k).await.unwrap();
        let second = store.get_context(&k).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);

        store.append(&k, Turn::user("again")).await.unwrap();
        let third = store.get_context(&k).await.unwrap();
        assert_eq!(third[0].content, "recovered");
        assert_eq!(third.len(), 2);
    }

    #[tokio::test]
    async fn manual_compact_with_nothing_older_than_k() {
        let store = store(CountingSummarizer::new(), 100, 4);
        let k = key("thread");
        append_pairs(&store, &k, 2).await;
        let outcome = store.compact(&k, &CompactionPolicy::default()).await.unwrap();
        assert_eq!(outcome, CompactionOutcome::Skipped(SkipReason::NothingToCompact));
    }

    #[tokio::test]
    async fn manual_compact_ignores_threshold() {
        let store = store(CountingSummarizer::new(), 1000, 4);
        let k = key("thread");
        append_pairs(&store, &k, 3).await;
        let outcome = store
            .compact(&k, &CompactionPolicy { keep_recent: 2, timeout: Duration::from_secs(1) })
            .await
            .unwrap();
        assert!(matches!(outcome, CompactionOutcome::Compacted { replaced: 4, .. }));
        assert_eq!(store.get_context(&k).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn reset_clears_session_and_checkpoint() {
        let cp = Arc::new(InMemoryCheckpointer::new());
        let store = store(CountingSummarizer::new(), 100, 2).with_checkpointer(cp.clone());
        let k = key("thread");
        append_pairs(&store, &k, 2).await;
        assert_eq!(cp.list().await.unwrap().len(), 1);

        store.reset(&k).await.unwrap();
        assert!(store.get_context(&k).await.unwrap().is_empty());
        assert!(store.history(&k).await.unwrap().is_empty());
        assert!(cp.list().await.unwrap().is_empty());
        assert_eq!(store.state(&k).await.unwrap(), SessionState::Empty);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = store(CountingSummarizer::new(), 100, 2);
        let alice = key("user_alice");
        let bob = key("user_bob");
        store.append(&alice, Turn::user("I am Alice")).await.unwrap();
        store.append(&bob, Turn::user("I am Bob")).await.unwrap();

        let a = store.get_context(&alice).await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].content, "I am Alice");
        assert_eq!(store.sessions().await.unwrap(), vec![alice, bob]);
    }

    #[tokio::test]
    async fn restores_from_checkpointer() {
        let cp = Arc::new(InMemoryCheckpointer::new());
        let k = key("conversation-1");
        {
            let store = store(CountingSummarizer::new(), 4, 1).with_checkpointer(cp.clone());
            append_pairs(&store, &k, 3).await;
            store.get_context(&k).await.unwrap();
        }

        let store = store(CountingSummarizer::new(), 4, 1).with_checkpointer(cp);
        assert_eq!(store.history(&k).await.unwrap().len(), 6);
        let view = store.get_context(&k).await.unwrap();
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].role, Role::SystemMemory);
    }

    #[tokio::test]
    async fn concurrent_appends_on_one_session_are_serialized() {
        let store = Arc::new(store(CountingSummarizer::new(), 10_000, 2));
        let k = key("thread");
        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                let k = k.clone();
                tokio::spawn(async move { store.append(&k, Turn::user(format!("m{i}"))).await })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }
        assert_eq!(store.history(&k).await.unwrap().len(), 32);
    }

    #[tokio::test]
    async fn slow_compaction_does_not_block_other_sessions() {
        let store = Arc::new(
            ConversationStore::new(
                Arc::new(SlowSummarizer),
                StoreSettings {
                    max_tokens_before_summary: 2,
                    policy: CompactionPolicy {
                        keep_recent: 1,
                        timeout: Duration::from_secs(30),
                    },
                },
            )
            .unwrap()
            .with_estimator(Arc::new(per_turn)),
        );
        let busy = key("busy");
        let idle = key("idle");
        append_pairs(&store, &busy, 3).await;

        let background = {
            let store = store.clone();
            let busy = busy.clone();
            tokio::spawn(async move { store.get_context(&busy).await })
        };
        tokio::task::yield_now().await;

        let quick = tokio::time::timeout(Duration::from_secs(2), async {
            store.append(&idle, Turn::user("hello")).await.unwrap();
            store.get_context(&idle).await.unwrap()
        })
        .await
        .expect("other session must not wait for the busy one");
        assert_eq!(quick.len(), 1);
        background.abort();
    }

    #[tokio::test]
    async fn events_are_published() {
        let bus = Arc::new(EventBus::new(64));
        let mut rx = bus.subscribe();
        let store = store(CountingSummarizer::new(), 2, 1).with_event_bus(bus);
        let k = key("thread");
        append_pairs(&store, &k, 2).await;
        store.get_context(&k).await.unwrap();

        let mut appended = 0;
        let mut compacted = 0;
        while let Ok(event) = rx.try_recv() {
            match event.as_ref() {
                DomainEvent::TurnAppended { .. } => appended += 1,
                DomainEvent::ContextCompacted { replaced, .. } => {
                    compacted += 1;
                    assert_eq!(*replaced, 3);
                }
                _ => {}
            }
        }
        assert_eq!(appended, 4);
        assert_eq!(compacted, 1);
    }

    #[tokio::test]
    async fn over_threshold_reads_without_compactable_turns_stay_quiet() {
        let bus = Arc::new(EventBus::new(64));
        let mut rx = bus.subscribe();
        let summarizer = CountingSummarizer::new();
        let store = store(summarizer.clone(), 1, 2).with_event_bus(bus);
        let k = key("thread");
        append_pairs(&store, &k, 2).await;

        // summary + 2 recent turns stays over a threshold of 1
        for _ in 0..3 {
            assert_eq!(store.get_context(&k).await.unwrap().len(), 3);
        }
        assert_eq!(summarizer.calls(), 1);

        let mut compacted = 0;
        let mut skipped = 0;
        while let Ok(event) = rx.try_recv() {
            match event.as_ref() {
                DomainEvent::ContextCompacted { .. } => compacted += 1,
                DomainEvent::CompactionSkipped { .. } => skipped += 1,
                _ => {}
            }
        }
        assert_eq!(compacted, 1);
        assert_eq!(skipped, 0);
    }

    #[tokio::test]
    async fn failed_checkpoint_delete_keeps_session() {
        let cp = Arc::new(FlakyCheckpointer {
            inner: InMemoryCheckpointer::new(),
            fail_deletes: AtomicBool::new(true),
        });
        let store = store(CountingSummarizer::new(), 100, 2).with_checkpointer(cp.clone());
        let k = key("thread");
        append_pairs(&store, &k, 2).await;

        let err = store.reset(&k).await.unwrap_err();
        assert!(matches!(err, StoreError::Checkpoint(_)));
        assert_eq!(store.state(&k).await.unwrap(), SessionState::Active);
        assert_eq!(store.history(&k).await.unwrap().len(), 4);
        assert_eq!(cp.load(&k).await.unwrap().unwrap().log.len(), 4);

        cp.fail_deletes.store(false, Ordering::SeqCst);
        store.reset(&k).await.unwrap();
        assert!(store.history(&k).await.unwrap().is_empty());
        assert!(cp.load(&k).await.unwrap().is_none());
    }
}
