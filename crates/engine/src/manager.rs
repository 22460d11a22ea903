//! The evaluation manager: owns the state cache, orchestrates the
//! cleaner → decider → executor pipeline per turn, and writes persistence.
//!
//! Turn processing for one evaluation is serialized by its semaphore (a
//! turn at sequence n+1 always observes n's cleaned text in context);
//! different evaluations process fully in parallel. Cancellation is
//! cooperative: dropping a `process_turn` future stops at the next await
//! and releases the evaluation lock with it.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use rp_domain::customer::CustomerRecord;
use rp_domain::timing::{TimingBreakdown, TurnClock};
use rp_domain::{
    CalledFunction, CleanedTurn, Confidence, Correction, CostRecord, Error, EvalSettings,
    Evaluation, EvaluationStatus, PromptTemplate, Result, Turn,
};
use rp_functions::{replay_customer, FunctionExecutor};
use rp_llm::{CompletionProvider, LlmGateway};
use rp_store::{Record, Store, Submit};

use crate::broadcast::{NoopSink, UpdateSink};
use crate::cleaner::run_cleaner;
use crate::config::EngineConfig;
use crate::context::decider_context;
use crate::decision::{parse_decision, Decision};
use crate::state::{CleanedLogEntry, EvaluationState, FunctionLogEntry, StateCache, StateHandle};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Arguments to [`EvaluationManager::create_evaluation`].
#[derive(Debug, Clone)]
pub struct CreateEvaluation {
    pub conversation_id: Uuid,
    pub prompt_template_id: Uuid,
    pub function_prompt_template_id: Uuid,
    /// Settings map; unknown keys are a configuration error.
    pub settings: Value,
    pub user_id: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decision-stage metadata carried in the turn result.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionSummary {
    pub thought_process: Option<String>,
    pub confidence_level: Option<String>,
    pub parse_error: Option<String>,
    pub raw_decision: Value,
}

/// The composite result of one processed turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnResult {
    pub evaluation_id: Uuid,
    pub turn_id: Uuid,
    pub cleaned_turn: CleanedTurn,
    /// `None` when the decider was skipped (bypass or disabled) or failed
    /// before producing a document.
    pub decision: Option<DecisionSummary>,
    pub function_calls: Vec<CalledFunction>,
    /// `None` only on the idempotent path when the cost row was lost.
    pub cost: Option<CostRecord>,
    /// Full per-turn timing including the decider-stage marks.
    pub timing_breakdown: TimingBreakdown,
    pub idempotency_hit: bool,
    /// Degradations taken along the way (`"cleaner:llm_timeout"`, ...).
    pub degradations: Vec<String>,
}

/// A fatal turn failure: the error kind plus the timing observed so far.
#[derive(Debug)]
pub struct TurnError {
    pub kind: &'static str,
    pub message: String,
    pub timing_breakdown: TimingBreakdown,
}

impl std::fmt::Display for TurnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TurnError {}

/// One turn of `get_evaluation_details`.
#[derive(Debug, Clone, Serialize)]
pub struct TurnDetail {
    pub cleaned_turn: CleanedTurn,
    pub function_calls: Vec<CalledFunction>,
    pub cost: Option<CostRecord>,
}

/// Aggregates computed from persisted rows.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationSummary {
    pub turns_processed: u32,
    pub function_calls: usize,
    pub total_tokens: u64,
    pub total_cost: f64,
}

/// Full evaluation read-back, reconstructed from the store alone.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationDetails {
    pub evaluation: Evaluation,
    pub turns: Vec<TurnDetail>,
    /// Mirrored customer replayed from the function-call log.
    pub customer: CustomerRecord,
    pub summary: EvaluationSummary,
}

/// Raw prompt/response material for one turn.
#[derive(Debug, Clone, Serialize)]
pub struct GeminiDetails {
    pub evaluation_id: Uuid,
    pub turn_id: Uuid,
    pub cleaner_prompt: Option<String>,
    pub cleaner_response: Option<String>,
    pub cleaner_template_variables: BTreeMap<String, Value>,
    pub corrections: Vec<Correction>,
    pub timing_breakdown: TimingBreakdown,
    pub function_exchanges: Vec<FunctionExchange>,
}

/// The decider exchange paired with one called function.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionExchange {
    pub function_name: String,
    pub prompt: Option<String>,
    pub response: Option<String>,
    pub template_variables: BTreeMap<String, Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EvaluationManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EvaluationManager {
    store: Arc<dyn Store>,
    gateway: Arc<LlmGateway>,
    executor: FunctionExecutor,
    cache: StateCache,
    writer: rp_store::BackgroundWriter,
    sink: Arc<dyn UpdateSink>,
}

impl EvaluationManager {
    /// Build a manager over `store` and `provider`. Must be called from
    /// within a tokio runtime (the background writer spawns workers).
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn CompletionProvider>,
        config: &EngineConfig,
    ) -> Self {
        let gateway = Arc::new(LlmGateway::with_capture_capacity(
            provider,
            config.provider.capture_capacity,
        ));
        let writer = rp_store::BackgroundWriter::spawn(
            store.clone(),
            config.writer.workers,
            config.writer.queue_capacity,
            config.writer.high_water,
        );
        Self {
            store,
            gateway,
            executor: FunctionExecutor::default(),
            cache: StateCache::new(config.cache.capacity),
            writer,
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_update_sink(mut self, sink: Arc<dyn UpdateSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn gateway(&self) -> &LlmGateway {
        &self.gateway
    }

    /// Drop an evaluation's in-memory state; the next access rebuilds it
    /// from persisted rows.
    pub fn evict(&self, evaluation_id: Uuid) -> bool {
        self.cache.evict(evaluation_id)
    }

    /// Wait for all pending background writes to land (tests, shutdown).
    pub async fn flush_writes(&self) {
        self.writer.flush().await;
    }

    // ── Ingestion helpers ───────────────────────────────────────────

    /// Store a conversation. Immutable once ingested.
    pub fn ingest_conversation(&self, conversation: rp_domain::Conversation) -> Result<()> {
        rp_store::write_records(
            self.store.as_ref(),
            &[Record::Conversation(conversation)],
        )
    }

    /// Store a prompt template. Immutable once referenced.
    pub fn register_template(&self, template: PromptTemplate) -> Result<()> {
        rp_store::write_records(self.store.as_ref(), &[Record::Template(template)])
    }

    // ── create_evaluation ───────────────────────────────────────────

    pub fn create_evaluation(&self, req: CreateEvaluation) -> Result<Evaluation> {
        let settings = EvalSettings::from_value(req.settings)?;

        let conversation = self
            .store
            .conversation(req.conversation_id)?
            .ok_or_else(|| Error::NotFound(format!("conversation {}", req.conversation_id)))?;
        let cleaner_template = self
            .store
            .template(req.prompt_template_id)?
            .ok_or_else(|| Error::NotFound(format!("template {}", req.prompt_template_id)))?;
        let function_template = self
            .store
            .template(req.function_prompt_template_id)?
            .ok_or_else(|| {
                Error::NotFound(format!("template {}", req.function_prompt_template_id))
            })?;

        let evaluation = Evaluation {
            id: Uuid::new_v4(),
            conversation_id: req.conversation_id,
            prompt_template_id: req.prompt_template_id,
            function_prompt_template_id: req.function_prompt_template_id,
            settings,
            user_id: req.user_id,
            status: EvaluationStatus::Active,
            turns_processed: 0,
            created_at: Utc::now(),
        };
        rp_store::write_records(
            self.store.as_ref(),
            &[Record::Evaluation(evaluation.clone())],
        )?;

        // Pre-warm the cache so the first turn skips the rebuild.
        self.cache.insert(
            evaluation.id,
            EvaluationState {
                evaluation: evaluation.clone(),
                conversation: Arc::new(conversation),
                cleaner_template: Arc::new(cleaner_template),
                function_template: Arc::new(function_template),
                cleaned_log: Vec::new(),
                function_log: Vec::new(),
                customer: None,
            },
        );

        tracing::info!(evaluation_id = %evaluation.id, "evaluation created");
        Ok(evaluation)
    }

    // ── process_turn ────────────────────────────────────────────────

    /// Process one turn through the full pipeline.
    ///
    /// Idempotent per (evaluation, turn): a repeat call returns the
    /// persisted result without new LLM calls. Fatal failures carry the
    /// timing breakdown observed up to the failure point.
    pub async fn process_turn(
        &self,
        evaluation_id: Uuid,
        turn_id: Uuid,
        override_settings: Option<Value>,
    ) -> std::result::Result<TurnResult, TurnError> {
        let mut clock = TurnClock::start();
        self.process_turn_inner(evaluation_id, turn_id, override_settings, &mut clock)
            .await
            .map_err(|err| TurnError {
                kind: err.kind(),
                message: err.to_string(),
                timing_breakdown: clock.snapshot(),
            })
    }

    async fn process_turn_inner(
        &self,
        evaluation_id: Uuid,
        turn_id: Uuid,
        override_settings: Option<Value>,
        clock: &mut TurnClock,
    ) -> Result<TurnResult> {
        // ── 1. State ensure + per-evaluation lock ───────────────────
        let handle = self.cache.get_or_load(self.store.as_ref(), evaluation_id)?;
        let _permit = handle
            .lock
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Persistence("evaluation lock closed".into()))?;

        // Idempotent fast path: the row exists, so serve it back with no
        // LLM calls and no new side effects.
        if let Some(row) = self.store.cleaned_turn(evaluation_id, turn_id)? {
            tracing::debug!(%evaluation_id, %turn_id, "idempotency hit");
            return self.assemble_existing(row);
        }
        clock.mark("initialization_end");

        // ── 2. Settings merge ───────────────────────────────────────
        let (base_settings, conversation, cleaner_template, function_template) = {
            let state = handle.state.read();
            (
                state.evaluation.settings.clone(),
                state.conversation.clone(),
                state.cleaner_template.clone(),
                state.function_template.clone(),
            )
        };
        let settings = match &override_settings {
            Some(overrides) => base_settings.merged_with(overrides)?,
            None => base_settings,
        };

        let turn = conversation
            .turn(turn_id)
            .ok_or_else(|| Error::NotFound(format!("turn {turn_id} in conversation")))?
            .clone();

        let result = self
            .run_pipeline(&handle, &settings, &turn, &cleaner_template, &function_template, clock)
            .await;

        if result.is_err() && settings.strict_pipeline {
            self.mark_errored(&handle, evaluation_id);
        }
        result
    }

    /// Steps 3–8: cleaner, persistence, decider, cost, emission.
    async fn run_pipeline(
        &self,
        handle: &StateHandle,
        settings: &EvalSettings,
        turn: &Turn,
        cleaner_template: &PromptTemplate,
        function_template: &PromptTemplate,
        clock: &mut TurnClock,
    ) -> Result<TurnResult> {
        let evaluation_id = { handle.state.read().evaluation.id };
        let mut degradations: Vec<String> = Vec::new();

        // ── 3. Cleaner ──────────────────────────────────────────────
        clock.mark("cleaner_start");
        let cleaned_log_snapshot = { handle.state.read().cleaned_log.clone() };
        let out = run_cleaner(
            &self.gateway,
            cleaner_template,
            turn,
            &cleaned_log_snapshot,
            settings,
        )
        .await?;
        clock.span("cleaner_prompt_preparation_ms", out.prompt_preparation_ms);
        clock.span("cleaner_api_ms", out.api_ms);
        clock.span("cleaner_response_parsing_ms", out.parsing_ms);
        clock.mark("cleaner_end");
        if let Some(kind) = out.degraded {
            degradations.push(format!("cleaner:{kind}"));
        }

        let cleaned_row = CleanedTurn {
            id: Uuid::new_v4(),
            evaluation_id,
            turn_id: turn.id,
            turn_sequence: turn.turn_sequence,
            speaker: turn.speaker.clone(),
            cleaned_text: out.cleaned_text.clone(),
            confidence_score: out.confidence,
            cleaning_applied: out.cleaning_applied,
            cleaning_level: out.cleaning_level,
            processing_time_ms: clock.elapsed_ms() as u64,
            corrections: out.corrections.clone(),
            context_detected: out.context_detected.clone(),
            ai_model_used: out.ai_model_used.clone(),
            timing_breakdown: clock.snapshot(),
            gemini_prompt: out.exchange.as_ref().map(|e| e.prompt.clone()),
            gemini_response: out.exchange.as_ref().and_then(|e| e.response_text.clone()),
            template_variables: out.template_variables.clone(),
            created_at: Utc::now(),
        };

        // The cleaned turn and the turns_processed increment land in one
        // transaction; a failure here is fatal to the turn (no broadcast,
        // no cost row) and leaves in-memory state untouched.
        let updated_evaluation = {
            let state = handle.state.read();
            let mut evaluation = state.evaluation.clone();
            evaluation.turns_processed += 1;
            if evaluation.turns_processed as usize >= state.conversation.turns.len() {
                evaluation.status = EvaluationStatus::Complete;
            }
            evaluation
        };

        let save_started = std::time::Instant::now();
        rp_store::write_records(
            self.store.as_ref(),
            &[
                Record::CleanedTurn(cleaned_row.clone()),
                Record::Evaluation(updated_evaluation.clone()),
            ],
        )?;
        clock.span(
            "database_save_ms",
            save_started.elapsed().as_secs_f64() * 1_000.0,
        );

        let current_entry = CleanedLogEntry {
            turn_id: turn.id,
            turn_sequence: turn.turn_sequence,
            speaker: turn.speaker.clone(),
            cleaned_text: cleaned_row.cleaned_text.clone(),
        };
        {
            let mut state = handle.state.write();
            state.evaluation = updated_evaluation;
            state.push_cleaned(current_entry.clone());
        }

        // ── 4–5. Decider ────────────────────────────────────────────
        let mut decision_summary: Option<DecisionSummary> = None;
        let mut called_rows: Vec<CalledFunction> = Vec::new();
        let mut decider_tokens = (0u32, 0u32);

        let decider_eligible =
            settings.enable_function_calling && !settings.is_assistant_speaker(&turn.speaker);
        if decider_eligible {
            match self
                .run_decider(
                    handle,
                    settings,
                    turn,
                    function_template,
                    &current_entry,
                    clock,
                )
                .await
            {
                Ok((decision, tokens, rows)) => {
                    decider_tokens = tokens;
                    if let Some(kind) = decision.parse_error {
                        degradations.push(format!("decider:{kind}"));
                    }
                    decision_summary = Some(DecisionSummary {
                        thought_process: decision.thought_process,
                        confidence_level: decision.confidence_level,
                        parse_error: decision.parse_error.map(str::to_owned),
                        raw_decision: decision.raw_decision,
                    });
                    called_rows = rows;
                }
                Err(err) => {
                    // Decider-side failures never abort the turn on their
                    // own; strict_pipeline promotes them.
                    if settings.strict_pipeline {
                        return Err(err);
                    }
                    tracing::info!(
                        turn_sequence = turn.turn_sequence,
                        kind = err.kind(),
                        "decider failed; emitting empty function_calls"
                    );
                    degradations.push(format!("decider:{}", err.kind()));
                }
            }
        }

        // ── 6. Cost ─────────────────────────────────────────────────
        let (clean_in, clean_out) = out
            .exchange
            .as_ref()
            .map(|e| (e.input_tokens, e.output_tokens))
            .unwrap_or((0, 0));
        let (fn_in, fn_out) = decider_tokens;
        let cleaner_model = &settings.cleaner_model_params.model_name;
        let decider_model = &settings.decider_model_params.model_name;
        let cleaning_cost = settings.cost_for(cleaner_model, clean_in, clean_out);
        let function_cost = settings.cost_for(decider_model, fn_in, fn_out);
        let cost = CostRecord {
            id: Uuid::new_v4(),
            evaluation_id,
            turn_id: turn.id,
            cleaning_input_tokens: clean_in,
            cleaning_output_tokens: clean_out,
            cleaning_cost,
            function_input_tokens: fn_in,
            function_output_tokens: fn_out,
            function_cost,
            total_tokens: clean_in + clean_out + fn_in + fn_out,
            total_cost: cleaning_cost + function_cost,
            model_used: cleaner_model.clone(),
            created_at: Utc::now(),
        };
        self.persist_background(vec![Record::Cost(cost.clone())]);

        // ── 7. Emit ─────────────────────────────────────────────────
        self.sink.broadcast(
            evaluation_id,
            "update",
            json!({
                "evaluation_id": evaluation_id,
                "turn_id": turn.id,
                "cleaned_text": cleaned_row.cleaned_text,
                "processing_time_ms": cleaned_row.processing_time_ms,
            }),
        );

        // ── 8. Compose ──────────────────────────────────────────────
        clock.mark("end");
        let total = clock.elapsed_ms();
        clock.span("total_ms", total);

        Ok(TurnResult {
            evaluation_id,
            turn_id: turn.id,
            cleaned_turn: cleaned_row,
            decision: decision_summary,
            function_calls: called_rows,
            cost: Some(cost),
            timing_breakdown: clock.snapshot(),
            idempotency_hit: false,
            degradations,
        })
    }

    /// Step 5: build the decider context, call the LLM, parse, execute.
    /// Errors are decider-side and never fatal on their own; the caller
    /// decides whether `strict_pipeline` promotes them.
    async fn run_decider(
        &self,
        handle: &StateHandle,
        settings: &EvalSettings,
        turn: &Turn,
        function_template: &PromptTemplate,
        current_entry: &CleanedLogEntry,
        clock: &mut TurnClock,
    ) -> Result<(Decision, (u32, u32), Vec<CalledFunction>)> {
        let evaluation_id = { handle.state.read().evaluation.id };

        clock.mark("function_context_start");
        let customer = { handle.state.write().ensure_customer() };
        let (log_snapshot, function_log_snapshot) = {
            let state = handle.state.read();
            (state.cleaned_log.clone(), state.function_log.clone())
        };
        let ctx = decider_context(
            &log_snapshot,
            &function_log_snapshot,
            self.executor.catalog(),
            &customer,
            current_entry,
            settings.sliding_window_decider,
            settings.sliding_window_functions,
        );
        clock.mark("function_context_end");

        clock.mark("function_prompt_start");
        let mut vars = BTreeMap::new();
        vars.insert(
            "cleaned_text".to_owned(),
            Value::String(current_entry.cleaned_text.clone()),
        );
        vars.insert("speaker".to_owned(), Value::String(turn.speaker.clone()));
        vars.insert(
            "conversation_context".to_owned(),
            Value::String(ctx.conversation_context),
        );
        vars.insert("function_history".to_owned(), ctx.function_history);
        vars.insert("available_functions".to_owned(), ctx.available_functions);
        vars.insert("customer_data".to_owned(), ctx.customer_data);
        vars.insert("call_context".to_owned(), ctx.call_context);
        let rendered = rp_templates::render(&function_template.template_text, &vars);
        clock.mark("function_prompt_end");
        let rendered = rendered?;

        clock.mark("function_gemini_start");
        let reply = self
            .gateway
            .call(
                "decider",
                &rendered.text,
                &settings.decider_model_params,
                Duration::from_millis(settings.decider_timeout_ms),
            )
            .await;
        clock.mark("function_gemini_end");
        let reply = reply.map_err(|failed| failed.error)?;

        clock.mark("function_parse_start");
        let decision = parse_decision(&reply.text);
        clock.mark("function_parse_end");

        // ── Execute in decision order ───────────────────────────────
        clock.mark("function_execute_start");
        let mut customer_now = customer;
        let mut rows = Vec::with_capacity(decision.function_calls.len());
        for call in &decision.function_calls {
            let exec = self
                .executor
                .execute(
                    &call.name,
                    &call.parameters,
                    &customer_now,
                    Duration::from_millis(settings.function_exec_timeout_ms),
                )
                .await;
            if exec.success {
                customer_now = exec.after_state.clone();
            }

            let row = CalledFunction {
                id: Uuid::new_v4(),
                evaluation_id,
                turn_id: turn.id,
                function_name: call.name.clone(),
                parameters: Value::Object(call.parameters.clone()),
                result: exec.result.clone(),
                executed: exec.success,
                confidence_score: parse_confidence(decision.confidence_level.as_deref()),
                decision_reasoning: decision.thought_process.clone(),
                processing_time_ms: exec.execution_time_ms,
                timing_breakdown: clock.snapshot(),
                function_template_id: function_template.id,
                gemini_prompt: Some(reply.exchange.prompt.clone()),
                gemini_response: reply.exchange.response_text.clone(),
                mock_data_before: exec.before_state.snapshot(),
                mock_data_after: exec.after_state.snapshot(),
                template_variables: rendered.variables.clone(),
                created_at: Utc::now(),
            };

            {
                let mut state = handle.state.write();
                state.function_log.push(FunctionLogEntry {
                    function: row.function_name.clone(),
                    parameters: row.parameters.clone(),
                    result: row.result.clone(),
                    success: row.executed,
                });
            }
            self.persist_background(vec![Record::CalledFunction(row.clone())]);
            rows.push(row);
        }
        {
            handle.state.write().customer = Some(customer_now);
        }
        clock.mark("function_execute_end");

        let tokens = (reply.input_tokens, reply.output_tokens);
        Ok((decision, tokens, rows))
    }

    /// Non-critical write path: queue it, fall back to a synchronous write
    /// under backpressure, and only log if even that fails.
    fn persist_background(&self, records: Vec<Record>) {
        match self.writer.submit(records) {
            Submit::Queued => {}
            Submit::Saturated(records) => {
                if let Err(e) = rp_store::write_records(self.store.as_ref(), &records) {
                    tracing::warn!(
                        error = %e,
                        "synchronous fallback write failed; store needs reconciliation"
                    );
                }
            }
        }
    }

    fn mark_errored(&self, handle: &StateHandle, evaluation_id: Uuid) {
        let evaluation = {
            let mut state = handle.state.write();
            state.evaluation.status = EvaluationStatus::Errored;
            state.evaluation.clone()
        };
        if let Err(e) =
            rp_store::write_records(self.store.as_ref(), &[Record::Evaluation(evaluation)])
        {
            tracing::warn!(%evaluation_id, error = %e, "failed to persist errored status");
        }
    }

    /// Assemble a turn result from persisted rows (idempotent fast path).
    fn assemble_existing(&self, row: CleanedTurn) -> Result<TurnResult> {
        let function_calls = self
            .store
            .called_functions_for_turn(row.evaluation_id, row.turn_id)?;
        let cost = self.store.cost(row.evaluation_id, row.turn_id)?;
        Ok(TurnResult {
            evaluation_id: row.evaluation_id,
            turn_id: row.turn_id,
            timing_breakdown: row.timing_breakdown.clone(),
            cleaned_turn: row,
            decision: None,
            function_calls,
            cost,
            idempotency_hit: true,
            degradations: Vec::new(),
        })
    }

    // ── Read operations ─────────────────────────────────────────────

    /// Evaluation plus ordered cleaned turns joined with their function
    /// calls and costs. Reads persisted rows only, so it works identically
    /// before and after an eviction.
    pub fn evaluation_details(&self, evaluation_id: Uuid) -> Result<EvaluationDetails> {
        let evaluation = self
            .store
            .evaluation(evaluation_id)?
            .ok_or_else(|| Error::NotFound(format!("evaluation {evaluation_id}")))?;
        let conversation = self
            .store
            .conversation(evaluation.conversation_id)?
            .ok_or_else(|| {
                Error::NotFound(format!("conversation {}", evaluation.conversation_id))
            })?;

        let cleaned = self.store.cleaned_turns(evaluation_id)?;
        let functions = self.store.called_functions(evaluation_id)?;
        let costs = self.store.costs(evaluation_id)?;

        let turns: Vec<TurnDetail> = cleaned
            .into_iter()
            .map(|cleaned_turn| {
                let function_calls = functions
                    .iter()
                    .filter(|f| f.turn_id == cleaned_turn.turn_id)
                    .cloned()
                    .collect();
                let cost = costs
                    .iter()
                    .find(|c| c.turn_id == cleaned_turn.turn_id)
                    .cloned();
                TurnDetail {
                    cleaned_turn,
                    function_calls,
                    cost,
                }
            })
            .collect();

        let customer = replay_customer(&conversation.source_customer, &functions);
        let summary = EvaluationSummary {
            turns_processed: evaluation.turns_processed,
            function_calls: functions.len(),
            total_tokens: costs.iter().map(|c| c.total_tokens as u64).sum(),
            total_cost: costs.iter().map(|c| c.total_cost).sum(),
        };

        Ok(EvaluationDetails {
            evaluation,
            turns,
            customer,
            summary,
        })
    }

    /// Raw prompts, responses, timing, and corrections for one turn.
    pub fn gemini_details(&self, evaluation_id: Uuid, turn_id: Uuid) -> Result<GeminiDetails> {
        let row = self
            .store
            .cleaned_turn(evaluation_id, turn_id)?
            .ok_or_else(|| Error::NotFound(format!("cleaned turn for {turn_id}")))?;
        let function_exchanges = self
            .store
            .called_functions_for_turn(evaluation_id, turn_id)?
            .into_iter()
            .map(|f| FunctionExchange {
                function_name: f.function_name,
                prompt: f.gemini_prompt,
                response: f.gemini_response,
                template_variables: f.template_variables,
            })
            .collect();

        Ok(GeminiDetails {
            evaluation_id,
            turn_id,
            cleaner_prompt: row.gemini_prompt,
            cleaner_response: row.gemini_response,
            cleaner_template_variables: row.template_variables,
            corrections: row.corrections,
            timing_breakdown: row.timing_breakdown,
            function_exchanges,
        })
    }
}

fn parse_confidence(raw: Option<&str>) -> Option<Confidence> {
    match raw?.trim().to_ascii_uppercase().as_str() {
        "HIGH" => Some(Confidence::High),
        "MEDIUM" => Some(Confidence::Medium),
        "LOW" => Some(Confidence::Low),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_parses_known_levels_case_insensitively() {
        assert_eq!(parse_confidence(Some("high")), Some(Confidence::High));
        assert_eq!(parse_confidence(Some(" MEDIUM ")), Some(Confidence::Medium));
        assert_eq!(parse_confidence(Some("0.9")), None);
        assert_eq!(parse_confidence(None), None);
    }
}
