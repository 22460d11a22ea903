//! Persistence layer.
//!
//! The engine writes through a small session interface (`begin` / `add` /
//! `commit` / `rollback`) and reads back ordered rows; the backend behind it
//! is swappable. Two backends ship: an in-memory store and an append-only
//! JSONL store with cold-start recovery. Both enforce the same uniqueness
//! rules, so everything above them is backend-agnostic.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rp_domain::{
    CalledFunction, CleanedTurn, Conversation, CostRecord, Evaluation, PromptTemplate, Result,
};

pub mod jsonl;
pub mod memory;
pub mod writer;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;
pub use writer::{BackgroundWriter, Submit};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the engine persists, as one tagged union so a session can
/// stage a heterogeneous batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum Record {
    /// Insert-only; a duplicate conversation id is an error.
    Conversation(Conversation),
    /// Insert-only and immutable; re-adding an identical template is a no-op.
    Template(PromptTemplate),
    /// Upsert (status and turns_processed change over an evaluation's life).
    Evaluation(Evaluation),
    /// Insert-only, unique on (evaluation_id, turn_id).
    CleanedTurn(CleanedTurn),
    /// Append-only, ordered by created_at within an evaluation.
    CalledFunction(CalledFunction),
    /// Upsert, unique on (evaluation_id, turn_id).
    Cost(CostRecord),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store interface
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One write transaction. Staged records become visible atomically at
/// `commit`; `rollback` (or drop) discards them.
pub trait StoreSession: Send {
    fn add(&mut self, record: Record) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self);
}

/// Read interface plus session factory.
///
/// Ordering contract: `cleaned_turns` is sorted by the underlying raw
/// turn's `turn_sequence`; `called_functions` by `created_at` (insertion
/// order breaks ties).
pub trait Store: Send + Sync {
    fn session(&self) -> Result<Box<dyn StoreSession>>;

    fn conversation(&self, id: Uuid) -> Result<Option<Conversation>>;
    fn template(&self, id: Uuid) -> Result<Option<PromptTemplate>>;
    fn evaluation(&self, id: Uuid) -> Result<Option<Evaluation>>;

    fn cleaned_turn(&self, evaluation_id: Uuid, turn_id: Uuid) -> Result<Option<CleanedTurn>>;
    fn cleaned_turns(&self, evaluation_id: Uuid) -> Result<Vec<CleanedTurn>>;
    fn called_functions(&self, evaluation_id: Uuid) -> Result<Vec<CalledFunction>>;
    fn called_functions_for_turn(
        &self,
        evaluation_id: Uuid,
        turn_id: Uuid,
    ) -> Result<Vec<CalledFunction>>;
    fn cost(&self, evaluation_id: Uuid, turn_id: Uuid) -> Result<Option<CostRecord>>;
    fn costs(&self, evaluation_id: Uuid) -> Result<Vec<CostRecord>>;
}

/// Write a batch through a fresh session: add everything, commit once.
pub fn write_records(store: &dyn Store, records: &[Record]) -> Result<()> {
    let mut session = store.session()?;
    for record in records {
        session.add(record.clone())?;
    }
    session.commit()
}
