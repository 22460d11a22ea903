//! In-memory store backend.
//!
//! The default backend for tests and embedders that persist elsewhere.
//! All uniqueness rules are enforced at commit time, and a commit is
//! all-or-nothing: the batch is validated against current state before any
//! record is applied.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use rp_domain::{
    CalledFunction, CleanedTurn, Conversation, CostRecord, Error, Evaluation, PromptTemplate,
    Result,
};

use crate::{Record, Store, StoreSession};

#[derive(Default)]
pub(crate) struct MemoryInner {
    conversations: HashMap<Uuid, Conversation>,
    templates: HashMap<Uuid, PromptTemplate>,
    evaluations: HashMap<Uuid, Evaluation>,
    /// Per evaluation, in insertion order.
    cleaned: HashMap<Uuid, Vec<CleanedTurn>>,
    /// Per evaluation, in insertion order (== created_at order).
    functions: HashMap<Uuid, Vec<CalledFunction>>,
    /// Per evaluation, one row per turn.
    costs: HashMap<Uuid, Vec<CostRecord>>,
}

impl MemoryInner {
    /// Check a staged batch against current state. Called with the write
    /// lock held, immediately before `apply`, so validation and application
    /// are atomic.
    fn validate(&self, records: &[Record]) -> Result<()> {
        // Track duplicates within the batch itself as well.
        let mut new_cleaned: Vec<(Uuid, Uuid)> = Vec::new();

        for record in records {
            match record {
                Record::Conversation(c) => {
                    if self.conversations.contains_key(&c.id) {
                        return Err(Error::Persistence(format!(
                            "conversation {} already ingested",
                            c.id
                        )));
                    }
                }
                Record::Template(t) => {
                    if let Some(existing) = self.templates.get(&t.id) {
                        if existing.template_text != t.template_text {
                            return Err(Error::Persistence(format!(
                                "template {} is immutable",
                                t.id
                            )));
                        }
                    }
                }
                Record::Evaluation(_) | Record::CalledFunction(_) | Record::Cost(_) => {}
                Record::CleanedTurn(ct) => {
                    let key = (ct.evaluation_id, ct.turn_id);
                    let exists = self
                        .cleaned
                        .get(&ct.evaluation_id)
                        .is_some_and(|rows| rows.iter().any(|r| r.turn_id == ct.turn_id));
                    if exists || new_cleaned.contains(&key) {
                        return Err(Error::Persistence(format!(
                            "cleaned turn already exists for evaluation {} turn {}",
                            ct.evaluation_id, ct.turn_id
                        )));
                    }
                    new_cleaned.push(key);
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, records: Vec<Record>) {
        for record in records {
            match record {
                Record::Conversation(c) => {
                    self.conversations.insert(c.id, c);
                }
                Record::Template(t) => {
                    self.templates.entry(t.id).or_insert(t);
                }
                Record::Evaluation(e) => {
                    self.evaluations.insert(e.id, e);
                }
                Record::CleanedTurn(ct) => {
                    self.cleaned.entry(ct.evaluation_id).or_default().push(ct);
                }
                Record::CalledFunction(cf) => {
                    self.functions.entry(cf.evaluation_id).or_default().push(cf);
                }
                Record::Cost(cost) => {
                    let rows = self.costs.entry(cost.evaluation_id).or_default();
                    match rows.iter_mut().find(|r| r.turn_id == cost.turn_id) {
                        Some(existing) => *existing = cost,
                        None => rows.push(cost),
                    }
                }
            }
        }
    }
}

/// In-memory backend.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and apply a batch under one write lock.
    pub(crate) fn commit_batch(&self, records: Vec<Record>) -> Result<()> {
        let mut inner = self.inner.write();
        inner.validate(&records)?;
        inner.apply(records);
        Ok(())
    }
}

struct MemorySession {
    store: MemoryStore,
    staged: Vec<Record>,
}

impl StoreSession for MemorySession {
    fn add(&mut self, record: Record) -> Result<()> {
        self.staged.push(record);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let staged = std::mem::take(&mut self.staged);
        self.store.commit_batch(staged)
    }

    fn rollback(&mut self) {
        self.staged.clear();
    }
}

impl Store for MemoryStore {
    fn session(&self) -> Result<Box<dyn StoreSession>> {
        Ok(Box::new(MemorySession {
            store: self.clone(),
            staged: Vec::new(),
        }))
    }

    fn conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        Ok(self.inner.read().conversations.get(&id).cloned())
    }

    fn template(&self, id: Uuid) -> Result<Option<PromptTemplate>> {
        Ok(self.inner.read().templates.get(&id).cloned())
    }

    fn evaluation(&self, id: Uuid) -> Result<Option<Evaluation>> {
        Ok(self.inner.read().evaluations.get(&id).cloned())
    }

    fn cleaned_turn(&self, evaluation_id: Uuid, turn_id: Uuid) -> Result<Option<CleanedTurn>> {
        Ok(self
            .inner
            .read()
            .cleaned
            .get(&evaluation_id)
            .and_then(|rows| rows.iter().find(|r| r.turn_id == turn_id).cloned()))
    }

    fn cleaned_turns(&self, evaluation_id: Uuid) -> Result<Vec<CleanedTurn>> {
        let mut rows = self
            .inner
            .read()
            .cleaned
            .get(&evaluation_id)
            .cloned()
            .unwrap_or_default();
        rows.sort_by_key(|r| r.turn_sequence);
        Ok(rows)
    }

    fn called_functions(&self, evaluation_id: Uuid) -> Result<Vec<CalledFunction>> {
        // Insertion order is created_at order; stable sort keeps insertion
        // order for equal timestamps.
        let mut rows = self
            .inner
            .read()
            .functions
            .get(&evaluation_id)
            .cloned()
            .unwrap_or_default();
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }

    fn called_functions_for_turn(
        &self,
        evaluation_id: Uuid,
        turn_id: Uuid,
    ) -> Result<Vec<CalledFunction>> {
        Ok(self
            .called_functions(evaluation_id)?
            .into_iter()
            .filter(|r| r.turn_id == turn_id)
            .collect())
    }

    fn cost(&self, evaluation_id: Uuid, turn_id: Uuid) -> Result<Option<CostRecord>> {
        Ok(self
            .inner
            .read()
            .costs
            .get(&evaluation_id)
            .and_then(|rows| rows.iter().find(|r| r.turn_id == turn_id).cloned()))
    }

    fn costs(&self, evaluation_id: Uuid) -> Result<Vec<CostRecord>> {
        Ok(self
            .inner
            .read()
            .costs
            .get(&evaluation_id)
            .cloned()
            .unwrap_or_default())
    }
}
