//! Per-evaluation in-memory state and the process-wide cache of it.
//!
//! State is a pure projection of persisted rows: anything here can be
//! rebuilt from the store, and a cache eviction is never more than a
//! cold-start cost. Turn processing for one evaluation is serialized by the
//! per-evaluation semaphore; the cache map itself has a coarse lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use uuid::Uuid;

use rp_domain::customer::CustomerRecord;
use rp_domain::{Conversation, Error, Evaluation, PromptTemplate, Result};
use rp_functions::replay_customer;
use rp_store::Store;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Log entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the context windows need from a processed turn.
#[derive(Debug, Clone, Serialize)]
pub struct CleanedLogEntry {
    pub turn_id: Uuid,
    pub turn_sequence: u32,
    pub speaker: String,
    pub cleaned_text: String,
}

/// What the decider context needs from a past function call.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionLogEntry {
    pub function: String,
    pub parameters: Value,
    pub result: Value,
    pub success: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EvaluationState
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything one evaluation keeps in memory between turns.
#[derive(Debug)]
pub struct EvaluationState {
    pub evaluation: Evaluation,
    pub conversation: Arc<Conversation>,
    /// Pinned template snapshots.
    pub cleaner_template: Arc<PromptTemplate>,
    pub function_template: Arc<PromptTemplate>,
    /// Ordered by `turn_sequence`.
    pub cleaned_log: Vec<CleanedLogEntry>,
    /// Ordered by execution time.
    pub function_log: Vec<FunctionLogEntry>,
    /// Mirrored customer; `None` until the decider first needs it.
    pub customer: Option<CustomerRecord>,
}

impl EvaluationState {
    /// Rebuild state from persisted rows alone.
    pub fn load(store: &dyn Store, evaluation_id: Uuid) -> Result<Self> {
        let evaluation = store
            .evaluation(evaluation_id)?
            .ok_or_else(|| Error::NotFound(format!("evaluation {evaluation_id}")))?;
        let conversation = store
            .conversation(evaluation.conversation_id)?
            .ok_or_else(|| Error::NotFound(format!("conversation {}", evaluation.conversation_id)))?;
        let cleaner_template = store
            .template(evaluation.prompt_template_id)?
            .ok_or_else(|| Error::NotFound(format!("template {}", evaluation.prompt_template_id)))?;
        let function_template = store
            .template(evaluation.function_prompt_template_id)?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "template {}",
                    evaluation.function_prompt_template_id
                ))
            })?;

        // cleaned_turns comes back sorted by turn_sequence (I3), the
        // function rows by created_at (I4).
        let cleaned_log = store
            .cleaned_turns(evaluation_id)?
            .into_iter()
            .map(|row| CleanedLogEntry {
                turn_id: row.turn_id,
                turn_sequence: row.turn_sequence,
                speaker: row.speaker,
                cleaned_text: row.cleaned_text,
            })
            .collect();

        let function_rows = store.called_functions(evaluation_id)?;
        let function_log = function_rows
            .iter()
            .map(|row| FunctionLogEntry {
                function: row.function_name.clone(),
                parameters: row.parameters.clone(),
                result: row.result.clone(),
                success: row.executed,
            })
            .collect();
        let customer = (!function_rows.is_empty())
            .then(|| replay_customer(&conversation.source_customer, &function_rows));

        Ok(Self {
            evaluation,
            conversation: Arc::new(conversation),
            cleaner_template: Arc::new(cleaner_template),
            function_template: Arc::new(function_template),
            cleaned_log,
            function_log,
            customer,
        })
    }

    /// Seed the mirrored customer on first use (copy-on-read from the
    /// conversation's source customer) and return a snapshot.
    pub fn ensure_customer(&mut self) -> CustomerRecord {
        self.customer
            .get_or_insert_with(|| self.conversation.source_customer.clone())
            .clone()
    }

    /// Append a cleaned-log entry, keeping the log ordered by sequence.
    pub fn push_cleaned(&mut self, entry: CleanedLogEntry) {
        let at = self
            .cleaned_log
            .partition_point(|e| e.turn_sequence <= entry.turn_sequence);
        self.cleaned_log.insert(at, entry);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StateCache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct CacheEntry {
    state: Arc<RwLock<EvaluationState>>,
    /// Serializes turn processing for this evaluation.
    lock: Arc<Semaphore>,
    last_used: Instant,
}

/// A handle to one cached evaluation: the state plus its turn lock.
#[derive(Clone)]
pub struct StateHandle {
    pub state: Arc<RwLock<EvaluationState>>,
    pub lock: Arc<Semaphore>,
}

/// Bounded map of evaluation id → in-memory state.
pub struct StateCache {
    entries: Mutex<HashMap<Uuid, CacheEntry>>,
    capacity: usize,
}

impl StateCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Fetch the cached state, rebuilding from the store on a miss.
    pub fn get_or_load(&self, store: &dyn Store, evaluation_id: Uuid) -> Result<StateHandle> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&evaluation_id) {
            entry.last_used = Instant::now();
            return Ok(StateHandle {
                state: entry.state.clone(),
                lock: entry.lock.clone(),
            });
        }

        let state = EvaluationState::load(store, evaluation_id)?;
        tracing::debug!(%evaluation_id, turns = state.cleaned_log.len(), "evaluation state rebuilt");
        Ok(self.insert_locked(&mut entries, evaluation_id, state))
    }

    /// Insert freshly created state (used at evaluation creation so the
    /// first turn does not pay a rebuild).
    pub fn insert(&self, evaluation_id: Uuid, state: EvaluationState) -> StateHandle {
        let mut entries = self.entries.lock();
        self.insert_locked(&mut entries, evaluation_id, state)
    }

    fn insert_locked(
        &self,
        entries: &mut HashMap<Uuid, CacheEntry>,
        evaluation_id: Uuid,
        state: EvaluationState,
    ) -> StateHandle {
        if entries.len() >= self.capacity {
            Self::evict_idle(entries);
        }

        let handle = StateHandle {
            state: Arc::new(RwLock::new(state)),
            lock: Arc::new(Semaphore::new(1)),
        };
        entries.insert(
            evaluation_id,
            CacheEntry {
                state: handle.state.clone(),
                lock: handle.lock.clone(),
                last_used: Instant::now(),
            },
        );
        handle
    }

    /// Evict the least-recently-used entry that is not mid-turn.
    fn evict_idle(entries: &mut HashMap<Uuid, CacheEntry>) {
        let victim = entries
            .iter()
            .filter(|(_, e)| e.lock.available_permits() > 0)
            .min_by_key(|(_, e)| e.last_used)
            .map(|(id, _)| *id);
        if let Some(id) = victim {
            entries.remove(&id);
            tracing::debug!(evaluation_id = %id, "evicted idle evaluation state");
        }
    }

    /// Drop an evaluation's cached state. The next access rebuilds it.
    pub fn evict(&self, evaluation_id: Uuid) -> bool {
        self.entries.lock().remove(&evaluation_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
