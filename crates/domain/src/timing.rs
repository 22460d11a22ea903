use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

/// Per-stage elapsed-time map recorded while a turn is processed.
///
/// Keys ending in `_ms` hold durations; other keys hold offsets from the
/// start of the turn. Persisted verbatim, so the key set is part of the
/// stored contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimingBreakdown(pub BTreeMap<String, f64>);

impl TimingBreakdown {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    pub fn set(&mut self, key: &str, value: f64) {
        self.0.insert(key.to_owned(), value);
    }

    /// Copy every entry of `other` into this map (other wins on collision).
    pub fn extend_from(&mut self, other: &TimingBreakdown) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), *v);
        }
    }
}

/// Wall-clock helper for building a [`TimingBreakdown`] during a turn.
pub struct TurnClock {
    started: Instant,
    breakdown: TimingBreakdown,
}

impl TurnClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            breakdown: TimingBreakdown::default(),
        }
    }

    /// Milliseconds elapsed since the turn started.
    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1_000.0
    }

    /// Record the current offset under `name`.
    pub fn mark(&mut self, name: &str) {
        let at = self.elapsed_ms();
        self.breakdown.set(name, at);
    }

    /// Record an externally measured duration under `name`.
    pub fn span(&mut self, name: &str, duration_ms: f64) {
        self.breakdown.set(name, duration_ms);
    }

    /// Finish: records `end` and `total_ms` and returns the breakdown.
    pub fn finish(mut self) -> TimingBreakdown {
        let total = self.elapsed_ms();
        self.breakdown.set("end", total);
        self.breakdown.set("total_ms", total);
        self.breakdown
    }

    pub fn breakdown(&self) -> &TimingBreakdown {
        &self.breakdown
    }

    /// Snapshot of the breakdown recorded so far (for error reporting).
    pub fn snapshot(&self) -> TimingBreakdown {
        self.breakdown.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_are_monotonic_offsets() {
        let mut clock = TurnClock::start();
        clock.mark("initialization_end");
        std::thread::sleep(std::time::Duration::from_millis(5));
        clock.mark("cleaner_start");
        let breakdown = clock.finish();

        let init = breakdown.get("initialization_end").unwrap();
        let cleaner = breakdown.get("cleaner_start").unwrap();
        let total = breakdown.get("total_ms").unwrap();
        assert!(init <= cleaner);
        assert!(cleaner <= total);
        assert_eq!(breakdown.get("end"), breakdown.get("total_ms"));
    }

    #[test]
    fn spans_store_given_durations() {
        let mut clock = TurnClock::start();
        clock.span("cleaner_api_ms", 123.5);
        assert_eq!(clock.breakdown().get("cleaner_api_ms"), Some(123.5));
    }

    #[test]
    fn serializes_as_flat_map() {
        let mut b = TimingBreakdown::default();
        b.set("total_ms", 10.0);
        let json = serde_json::to_string(&b).unwrap();
        assert_eq!(json, r#"{"total_ms":10.0}"#);
    }
}
