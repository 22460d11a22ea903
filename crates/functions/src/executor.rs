use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use rp_domain::customer::{CustomerRecord, FieldChange};
use rp_domain::{CalledFunction, Error, Result};

use crate::catalog::FunctionCatalog;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The outcome of one function execution attempt.
///
/// Always produced, success or not: a failed call carries identical before
/// and after snapshots and an error payload in `result`.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub success: bool,
    pub result: Value,
    pub before_state: CustomerRecord,
    pub after_state: CustomerRecord,
    pub changes_made: Vec<FieldChange>,
    pub execution_time_ms: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validates a chosen function against the catalog and applies its pure
/// transform to the mirrored customer.
///
/// The executor never mutates shared state: it takes the current snapshot
/// and returns the next one; the caller decides whether to adopt it.
pub struct FunctionExecutor {
    catalog: FunctionCatalog,
}

impl Default for FunctionExecutor {
    fn default() -> Self {
        Self::new(FunctionCatalog::standard())
    }
}

impl FunctionExecutor {
    pub fn new(catalog: FunctionCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &FunctionCatalog {
        &self.catalog
    }

    /// Execute `name` with `parameters` against `customer`.
    ///
    /// Validation or transform failures yield `success = false` with the
    /// error kind in `result`; they are not `Err`, because a bad decider choice
    /// must not abort the remaining calls of the same turn. The transform
    /// is bounded by `timeout`; expiry also yields `success = false`.
    pub async fn execute(
        &self,
        name: &str,
        parameters: &Map<String, Value>,
        customer: &CustomerRecord,
        timeout: Duration,
    ) -> ExecutionRecord {
        let started = Instant::now();
        let before = customer.clone();

        let outcome = match self.catalog.validate(name, parameters) {
            Err(e) => Err(e),
            Ok(()) => {
                let applied = tokio::time::timeout(timeout, async {
                    apply_transform(name, parameters, &before)
                })
                .await;
                match applied {
                    Err(_elapsed) => Err(Error::FunctionExecution(format!(
                        "'{name}' exceeded {}ms",
                        timeout.as_millis()
                    ))),
                    Ok(result) => result,
                }
            }
        };

        let execution_time_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(after) => {
                let changes_made = before.diff(&after);
                ExecutionRecord {
                    success: true,
                    result: serde_json::json!({
                        "status": "ok",
                        "changes": changes_made.len(),
                    }),
                    before_state: before,
                    after_state: after,
                    changes_made,
                    execution_time_ms,
                }
            }
            Err(e) => {
                tracing::debug!(function = name, error = %e, "function call rejected");
                ExecutionRecord {
                    success: false,
                    result: serde_json::json!({
                        "status": "error",
                        "kind": e.kind(),
                        "message": e.to_string(),
                    }),
                    before_state: before.clone(),
                    after_state: before,
                    changes_made: Vec::new(),
                    execution_time_ms,
                }
            }
        }
    }
}

/// The pure transforms behind each catalog function.
fn apply_transform(
    name: &str,
    parameters: &Map<String, Value>,
    customer: &CustomerRecord,
) -> Result<CustomerRecord> {
    // Validation already guaranteed presence and type of required params.
    let str_param = |key: &str| -> String {
        parameters
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned()
    };

    let mut next = customer.clone();
    match name {
        "set_role" => next.role = Some(str_param("role")),
        "update_name" => next.name = Some(str_param("name")),
        "update_email" => next.email = Some(str_param("email")),
        "update_phone" => next.phone = Some(str_param("phone")),
        "set_company" => next.company = Some(str_param("company")),
        "add_note" => next.notes.push(str_param("note")),
        other => {
            return Err(Error::FunctionExecution(format!(
                "no transform registered for '{other}'"
            )))
        }
    }
    Ok(next)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Recovery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Rebuild a mirrored customer by folding persisted function-call rows
/// (ordered by `created_at`) over the seed record.
///
/// Rows carry their after-state snapshot, so the fold adopts each executed
/// row's snapshot in turn, bit-equivalent to what online execution
/// produced, including rows whose transform has since changed.
pub fn replay_customer(seed: &CustomerRecord, rows: &[CalledFunction]) -> CustomerRecord {
    let mut state = seed.clone();
    for row in rows {
        if !row.executed {
            continue;
        }
        match serde_json::from_value::<CustomerRecord>(row.mock_data_after.clone()) {
            Ok(after) => state = after,
            Err(e) => {
                tracing::warn!(
                    function = %row.function_name,
                    error = %e,
                    "skipping unreadable after-state during replay"
                );
            }
        }
    }
    state
}
