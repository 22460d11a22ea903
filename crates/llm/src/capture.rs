//! Rolling history of raw LLM exchanges.
//!
//! Purely diagnostic: the gateway mirrors every exchange here so operators
//! can inspect what recently went over the wire, across all evaluations
//! sharing the gateway. Pipeline code never pairs data out of this log;
//! each call's exchange travels inline with its reply or error.

use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::gateway::LlmExchange;

/// Bounded, shared history of gateway exchanges.
pub struct CaptureLog {
    capacity: usize,
    entries: Mutex<VecDeque<LlmExchange>>,
}

impl CaptureLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append an exchange, dropping from the front once over capacity.
    pub fn record(&self, exchange: LlmExchange) {
        let mut entries = self.entries.lock();
        entries.push_back(exchange);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Up to `limit` exchanges, most recent first.
    pub fn recent(&self, limit: usize) -> Vec<LlmExchange> {
        let entries = self.entries.lock();
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// The exchange of whatever call finished most recently, across every
    /// task using this gateway.
    pub fn last(&self) -> Option<LlmExchange> {
        self.entries.lock().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rp_domain::settings::ModelParams;

    fn exchange(tag: &str) -> LlmExchange {
        let now = Utc::now();
        LlmExchange {
            stage: "cleaner".into(),
            model_params: ModelParams::default(),
            prompt: tag.to_owned(),
            response_text: None,
            input_tokens: 0,
            output_tokens: 0,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            success: true,
            error: None,
        }
    }

    fn prompts(entries: &[LlmExchange]) -> Vec<&str> {
        entries.iter().map(|e| e.prompt.as_str()).collect()
    }

    #[test]
    fn overflow_drops_the_oldest() {
        let log = CaptureLog::new(2);
        log.record(exchange("a"));
        log.record(exchange("b"));
        log.record(exchange("c"));

        assert_eq!(log.len(), 2);
        assert_eq!(prompts(&log.recent(10)), vec!["c", "b"]);
    }

    #[test]
    fn recent_is_newest_first_and_bounded_by_limit() {
        let log = CaptureLog::new(8);
        for tag in ["one", "two", "three"] {
            log.record(exchange(tag));
        }
        assert_eq!(prompts(&log.recent(2)), vec!["three", "two"]);
    }

    #[test]
    fn last_tracks_the_latest_call() {
        let log = CaptureLog::new(4);
        assert!(log.last().is_none());
        assert!(log.is_empty());

        log.record(exchange("first"));
        log.record(exchange("second"));
        assert_eq!(log.last().unwrap().prompt, "second");
    }
}
