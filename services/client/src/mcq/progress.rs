//! services/client/src/mcq/progress.rs
//!
//! The process-wide record of in-flight and historical generation
//! operations. The store is the single source of truth for progress
//! rendering; the orchestrator only requests mutations through it.

use mcq_core::domain::{GenerationProgress, ProgressPatch};
use mcq_core::ports::SnapshotStore;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// The store keeps the most recent 50 records and evicts the oldest.
pub const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressState {
    pub history: Vec<GenerationProgress>,
    pub current: Option<GenerationProgress>,
}

/// Shared progress store. Cloning hands out another handle to the same
/// state; construct it once at application start and pass it by reference.
#[derive(Clone)]
pub struct ProgressStore {
    state: Arc<Mutex<ProgressState>>,
    snapshot: Option<Arc<dyn SnapshotStore>>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ProgressState::default())),
            snapshot: None,
        }
    }

    /// A store that persists its state through `snapshot` after every
    /// mutation, so history survives client restarts.
    pub fn with_snapshot(snapshot: Arc<dyn SnapshotStore>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ProgressState::default())),
            snapshot: Some(snapshot),
        }
    }

    /// Loads previously persisted state, replacing the in-memory state.
    /// A missing or unreadable snapshot leaves the store empty.
    pub async fn restore(&self) {
        let Some(snapshot) = &self.snapshot else {
            return;
        };
        match snapshot.load().await {
            Ok(Some(raw)) => match serde_json::from_str::<ProgressState>(&raw) {
                Ok(restored) => *self.state.lock().unwrap() = restored,
                Err(e) => warn!("ignoring corrupt progress snapshot: {e}"),
            },
            Ok(None) => {}
            Err(e) => warn!("failed to load progress snapshot: {e}"),
        }
    }

    /// Inserts a record at the head of history (bounded to the most recent
    /// 50) and makes it the `current` record.
    pub fn add_progress(&self, progress: GenerationProgress) {
        let mut state = self.state.lock().unwrap();
        state.history.insert(0, progress.clone());
        state.history.truncate(HISTORY_LIMIT);
        state.current = Some(progress);
        self.persist(&state);
    }

    /// Merges partial fields into the matching history record and, if that
    /// record is also `current`, into `current` as well. Fields absent from
    /// the patch keep their prior values.
    pub fn update_progress(&self, request_id: &str, patch: &ProgressPatch) {
        let mut state = self.state.lock().unwrap();
        for record in &mut state.history {
            if record.request_id == request_id {
                record.apply(patch);
            }
        }
        if let Some(current) = &mut state.current {
            if current.request_id == request_id {
                current.apply(patch);
            }
        }
        self.persist(&state);
    }

    /// Resets both history and `current`.
    pub fn clear_history(&self) {
        let mut state = self.state.lock().unwrap();
        state.history.clear();
        state.current = None;
        self.persist(&state);
    }

    pub fn current(&self) -> Option<GenerationProgress> {
        self.state.lock().unwrap().current.clone()
    }

    pub fn history(&self) -> Vec<GenerationProgress> {
        self.state.lock().unwrap().history.clone()
    }

    // Persistence is fire-and-forget: a failed save is logged, never
    // surfaced, and the in-memory state stays authoritative.
    fn persist(&self, state: &ProgressState) {
        let Some(snapshot) = &self.snapshot else {
            return;
        };
        match serde_json::to_string(state) {
            Ok(raw) => {
                let snapshot = Arc::clone(snapshot);
                tokio::spawn(async move {
                    if let Err(e) = snapshot.save(&raw).await {
                        warn!("failed to persist progress snapshot: {e}");
                    }
                });
            }
            Err(e) => warn!("failed to serialize progress snapshot: {e}"),
        }
    }
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::new()
    }
}
