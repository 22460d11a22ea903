//! Bounded background persistence.
//!
//! Function-call and cost rows are written off the turn's critical path by a
//! small pool of worker tasks. Every job opens its own store session, failed
//! jobs are retried once, and a saturated queue pushes the caller back to
//! synchronous writes so in-memory and persisted state cannot drift without
//! bound.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{write_records, Record, Store};

/// Outcome of a submission attempt.
pub enum Submit {
    /// Accepted; a worker will write the batch.
    Queued,
    /// Queue is at or past the high-water mark (or closed); the caller gets
    /// the batch back and must write it synchronously.
    Saturated(Vec<Record>),
}

/// Background write pool.
pub struct BackgroundWriter {
    tx: mpsc::Sender<Vec<Record>>,
    depth: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
    high_water: usize,
}

impl BackgroundWriter {
    /// Spawn `workers` tasks draining a queue of `queue_capacity` batches.
    pub fn spawn(
        store: Arc<dyn Store>,
        workers: usize,
        queue_capacity: usize,
        high_water: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<Vec<Record>>(queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let depth = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));

        for worker_id in 0..workers.max(1) {
            let rx = rx.clone();
            let store = store.clone();
            let depth = depth.clone();
            let failed = failed.clone();
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(records) = job else { break };

                    let result = write_records(store.as_ref(), &records)
                        .or_else(|first| {
                            tracing::warn!(worker_id, error = %first, "background write failed, retrying");
                            write_records(store.as_ref(), &records)
                        });
                    if let Err(e) = result {
                        failed.fetch_add(1, Ordering::SeqCst);
                        tracing::error!(
                            worker_id,
                            error = %e,
                            records = records.len(),
                            "background write lost after retry; store needs reconciliation"
                        );
                    }

                    depth.fetch_sub(1, Ordering::SeqCst);
                }
            });
        }

        Self {
            tx,
            depth,
            failed,
            high_water,
        }
    }

    /// Submit a batch without blocking.
    pub fn submit(&self, records: Vec<Record>) -> Submit {
        if self.depth.load(Ordering::SeqCst) >= self.high_water {
            return Submit::Saturated(records);
        }
        self.depth.fetch_add(1, Ordering::SeqCst);
        match self.tx.try_send(records) {
            Ok(()) => Submit::Queued,
            Err(mpsc::error::TrySendError::Full(records))
            | Err(mpsc::error::TrySendError::Closed(records)) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                Submit::Saturated(records)
            }
        }
    }

    /// Pending batch count.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Batches lost after retry since startup; non-zero means the persisted
    /// log is behind in-memory state until the next rebuild.
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Wait until every queued batch has been attempted.
    pub async fn flush(&self) {
        while self.depth.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use rp_domain::{Conversation, EvalSettings, Evaluation, EvaluationStatus};
    use uuid::Uuid;

    fn evaluation_record() -> (Uuid, Record) {
        let id = Uuid::new_v4();
        let eval = Evaluation {
            id,
            conversation_id: Uuid::new_v4(),
            prompt_template_id: Uuid::new_v4(),
            function_prompt_template_id: Uuid::new_v4(),
            settings: EvalSettings::default(),
            user_id: "tester".into(),
            status: EvaluationStatus::Active,
            turns_processed: 0,
            created_at: chrono::Utc::now(),
        };
        (id, Record::Evaluation(eval))
    }

    #[tokio::test]
    async fn queued_batches_land_after_flush() {
        let store = Arc::new(MemoryStore::new());
        let writer = BackgroundWriter::spawn(store.clone(), 2, 16, 8);

        let (id, record) = evaluation_record();
        assert!(matches!(writer.submit(vec![record]), Submit::Queued));
        writer.flush().await;

        assert!(store.evaluation(id).unwrap().is_some());
        assert_eq!(writer.failed(), 0);
    }

    #[tokio::test]
    async fn high_water_forces_synchronous_fallback() {
        let store = Arc::new(MemoryStore::new());
        // high_water of zero: every submission is pushed back to the caller.
        let writer = BackgroundWriter::spawn(store.clone(), 1, 4, 0);

        let (id, record) = evaluation_record();
        match writer.submit(vec![record]) {
            Submit::Saturated(records) => {
                write_records(store.as_ref(), &records).unwrap();
            }
            Submit::Queued => panic!("expected saturation"),
        }
        assert!(store.evaluation(id).unwrap().is_some());
    }

    #[tokio::test]
    async fn conversation_batch_roundtrip() {
        let store = Arc::new(MemoryStore::new());
        let writer = BackgroundWriter::spawn(store.clone(), 1, 4, 4);

        let conv = Conversation::from_lines(Uuid::new_v4(), &[("User", "hi")]);
        let id = conv.id;
        assert!(matches!(
            writer.submit(vec![Record::Conversation(conv)]),
            Submit::Queued
        ));
        writer.flush().await;
        assert!(store.conversation(id).unwrap().is_some());
    }
}
