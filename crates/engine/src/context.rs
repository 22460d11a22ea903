//! Sliding-window context assembly for the two stages.
//!
//! Deterministic, allocation-only: these functions never touch the store or
//! the network, so the windows a turn sees are exactly the in-memory logs
//! at the moment it holds the evaluation lock.

use serde_json::{json, Value};

use rp_domain::customer::CustomerRecord;
use rp_functions::FunctionCatalog;

use crate::state::{CleanedLogEntry, FunctionLogEntry};

/// The cleaner's context: the last `window` cleaned turns (excluding the
/// current one), oldest first, one `speaker: text` line each.
///
/// A window of zero disables context; the prompt still renders with an
/// empty string.
pub fn cleaner_context(log: &[CleanedLogEntry], window: usize) -> String {
    if window == 0 {
        return String::new();
    }
    let start = log.len().saturating_sub(window);
    log[start..]
        .iter()
        .map(|e| format!("{}: {}", e.speaker, e.cleaned_text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Everything the decider prompt binds beyond the cleaned text itself.
#[derive(Debug, Clone)]
pub struct DeciderContext {
    /// Last `window` cleaned turns including the just-produced one.
    pub conversation_context: String,
    /// Last `function_window` function calls, oldest first.
    pub function_history: Value,
    /// The currently-available function catalog.
    pub available_functions: Value,
    /// Mirrored-customer snapshot.
    pub customer_data: Value,
    /// The request under decision.
    pub call_context: Value,
}

pub fn decider_context(
    log: &[CleanedLogEntry],
    function_log: &[FunctionLogEntry],
    catalog: &FunctionCatalog,
    customer: &CustomerRecord,
    current: &CleanedLogEntry,
    window: usize,
    function_window: usize,
) -> DeciderContext {
    let start = log.len().saturating_sub(window);
    let conversation_context = log[start..]
        .iter()
        .map(|e| format!("{}: {}", e.speaker, e.cleaned_text))
        .collect::<Vec<_>>()
        .join("\n");

    let fn_start = function_log.len().saturating_sub(function_window);
    let function_history =
        serde_json::to_value(&function_log[fn_start..]).unwrap_or_else(|_| json!([]));

    DeciderContext {
        conversation_context,
        function_history,
        available_functions: catalog.as_context_value(),
        customer_data: customer.snapshot(),
        call_context: json!({
            "user_request": current.cleaned_text,
            "speaker": current.speaker,
            "turn_sequence": current.turn_sequence,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entry(seq: u32, speaker: &str, text: &str) -> CleanedLogEntry {
        CleanedLogEntry {
            turn_id: Uuid::new_v4(),
            turn_sequence: seq,
            speaker: speaker.into(),
            cleaned_text: text.into(),
        }
    }

    #[test]
    fn cleaner_context_takes_last_window_oldest_first() {
        let log: Vec<_> = (1..=5)
            .map(|i| entry(i, "User", &format!("turn {i}")))
            .collect();
        let ctx = cleaner_context(&log, 2);
        assert_eq!(ctx, "User: turn 4\nUser: turn 5");
    }

    #[test]
    fn zero_window_disables_cleaner_context() {
        let log = vec![entry(1, "User", "hello")];
        assert_eq!(cleaner_context(&log, 0), "");
    }

    #[test]
    fn window_larger_than_log_takes_everything() {
        let log = vec![entry(1, "User", "a"), entry(2, "Lumen", "b")];
        assert_eq!(cleaner_context(&log, 10), "User: a\nLumen: b");
    }

    #[test]
    fn decider_context_includes_current_turn_and_call_context() {
        let current = entry(3, "User", "I am the Director of Marketing");
        let log = vec![
            entry(1, "User", "hello"),
            entry(2, "Lumen", "hi"),
            current.clone(),
        ];
        let functions = vec![FunctionLogEntry {
            function: "set_company".into(),
            parameters: serde_json::json!({"company": "Acme"}),
            result: serde_json::json!({"status": "ok"}),
            success: true,
        }];

        let ctx = decider_context(
            &log,
            &functions,
            &FunctionCatalog::standard(),
            &CustomerRecord::default(),
            &current,
            20,
            10,
        );

        assert!(ctx
            .conversation_context
            .ends_with("User: I am the Director of Marketing"));
        assert_eq!(ctx.function_history[0]["function"], "set_company");
        assert_eq!(ctx.call_context["turn_sequence"], 3);
        assert_eq!(
            ctx.call_context["user_request"],
            "I am the Director of Marketing"
        );
        assert!(ctx.available_functions.as_array().unwrap().len() >= 5);
    }

    #[test]
    fn function_window_truncates_history() {
        let functions: Vec<_> = (0..5)
            .map(|i| FunctionLogEntry {
                function: format!("fn{i}"),
                parameters: serde_json::json!({}),
                result: serde_json::json!({}),
                success: true,
            })
            .collect();
        let current = entry(1, "User", "x");
        let ctx = decider_context(
            &[current.clone()],
            &functions,
            &FunctionCatalog::standard(),
            &CustomerRecord::default(),
            &current,
            20,
            2,
        );
        let history = ctx.function_history.as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["function"], "fn3");
        assert_eq!(history[1]["function"], "fn4");
    }
}
