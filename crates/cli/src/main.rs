//! Offline evaluation runner.
//!
//! Ingests a conversation from JSON, registers the two prompt templates,
//! creates an evaluation, processes every turn in order, and prints a
//! per-turn report plus aggregate totals.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use rp_domain::{Conversation, CustomerRecord, PromptTemplate, Turn};
use rp_engine::{CreateEvaluation, EngineConfig, EvaluationManager};
use rp_llm::{CompletionProvider, GeminiProvider, ScriptedProvider};
use rp_store::{JsonlStore, MemoryStore, Store};

/// Default cleaner prompt used when no template file is given.
const DEFAULT_CLEANER_TEMPLATE: &str = "\
You clean up noisy speech-to-text transcripts.

Conversation so far:
{{ cleaned_context }}

Cleaning level: {{ cleaning_level }}
Rewrite what {{ speaker }} said, fixing transcription errors only:
{{ raw_text }}

Answer with JSON: {\"cleaned_text\": \"...\", \"corrections\": [{\"original\": \"...\", \"corrected\": \"...\"}]}";

/// Default function-decision prompt used when no template file is given.
const DEFAULT_DECIDER_TEMPLATE: &str = "\
You decide which customer-record functions to call for the latest turn.

Conversation:
{{ conversation_context }}

Customer record:
{{ customer_data }}

Available functions:
{{ available_functions }}

Recent function calls:
{{ function_history }}

Current request:
{{ call_context }}

{{ speaker }} just said: {{ cleaned_text }}
Answer with JSON: {\"function_calls\": [{\"name\": \"...\", \"parameters\": {}}], \"thought_process\": \"...\"}";

/// replay: run a recorded conversation through the evaluation pipeline.
#[derive(Debug, Parser)]
#[command(name = "replay", version, about)]
struct Cli {
    /// Conversation JSON file: {"source_customer": {...}?, "turns": [{"speaker": "...", "text": "..."}]}
    #[arg(long)]
    conversation: PathBuf,

    /// Cleaner template file (defaults to a built-in prompt).
    #[arg(long)]
    cleaner_template: Option<PathBuf>,

    /// Function-decision template file (defaults to a built-in prompt).
    #[arg(long)]
    decider_template: Option<PathBuf>,

    /// Engine configuration TOML.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Persist records as JSONL under this directory (in-memory otherwise).
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Per-evaluation settings as a JSON object.
    #[arg(long)]
    settings: Option<String>,

    /// Run without an LLM: every turn takes the raw-text fallback path.
    #[arg(long)]
    dry_run: bool,
}

/// On-disk conversation format.
#[derive(Debug, Deserialize)]
struct ConversationFile {
    #[serde(default)]
    source_customer: CustomerRecord,
    turns: Vec<TurnLine>,
}

#[derive(Debug, Deserialize)]
struct TurnLine {
    speaker: String,
    text: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let store: Arc<dyn Store> = match &cli.store_dir {
        Some(dir) => Arc::new(JsonlStore::open(dir)?),
        None => Arc::new(MemoryStore::new()),
    };

    let provider: Arc<dyn CompletionProvider> = if cli.dry_run {
        tracing::info!("dry run: no LLM calls will be made");
        Arc::new(ScriptedProvider::new())
    } else {
        let api_key = std::env::var(&config.provider.api_key_env).with_context(|| {
            format!(
                "reading API key from ${} (use --dry-run to skip the LLM)",
                config.provider.api_key_env
            )
        })?;
        match &config.provider.base_url {
            Some(base_url) => Arc::new(GeminiProvider::with_base_url(api_key, base_url)?),
            None => Arc::new(GeminiProvider::new(api_key)?),
        }
    };

    let manager = EvaluationManager::new(store, provider, &config);

    // ── Ingest inputs ───────────────────────────────────────────────
    let conversation = load_conversation(&cli.conversation)?;
    let cleaner = load_template("cleaner", &cli.cleaner_template, DEFAULT_CLEANER_TEMPLATE)?;
    let decider = load_template("decider", &cli.decider_template, DEFAULT_DECIDER_TEMPLATE)?;

    manager.ingest_conversation(conversation.clone())?;
    manager.register_template(cleaner.clone())?;
    manager.register_template(decider.clone())?;

    let settings = match &cli.settings {
        Some(raw) => serde_json::from_str(raw).context("parsing --settings JSON")?,
        None => serde_json::json!({}),
    };
    let evaluation = manager.create_evaluation(CreateEvaluation {
        conversation_id: conversation.id,
        prompt_template_id: cleaner.id,
        function_prompt_template_id: decider.id,
        settings,
        user_id: whoami(),
    })?;
    println!("evaluation {}", evaluation.id);

    // ── Process every turn in order ─────────────────────────────────
    for turn in &conversation.turns {
        match manager.process_turn(evaluation.id, turn.id, None).await {
            Ok(result) => print_turn(turn, &result),
            Err(err) => {
                eprintln!("turn {} failed: {err}", turn.turn_sequence);
                anyhow::bail!("evaluation aborted at turn {}", turn.turn_sequence);
            }
        }
    }

    manager.flush_writes().await;

    // ── Aggregate report ────────────────────────────────────────────
    let details = manager.evaluation_details(evaluation.id)?;
    println!(
        "\n{} turns, {} function calls, {} tokens, ${:.6}",
        details.summary.turns_processed,
        details.summary.function_calls,
        details.summary.total_tokens,
        details.summary.total_cost,
    );
    println!(
        "customer: {}",
        serde_json::to_string_pretty(&details.customer)?
    );
    Ok(())
}

fn print_turn(turn: &Turn, result: &rp_engine::TurnResult) {
    let row = &result.cleaned_turn;
    let marker = if row.cleaning_applied { "~" } else { "=" };
    println!(
        "[{:>3}] {} {} {} ({:?}, {}ms)",
        turn.turn_sequence, turn.speaker, marker, row.cleaned_text, row.confidence_score,
        row.processing_time_ms,
    );
    for call in &result.function_calls {
        let status = if call.executed { "ok" } else { "failed" };
        println!("      -> {} {} {}", call.function_name, call.parameters, status);
    }
    for degradation in &result.degradations {
        println!("      !! {degradation}");
    }
}

fn load_conversation(path: &PathBuf) -> anyhow::Result<Conversation> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading conversation from {}", path.display()))?;
    let file: ConversationFile = serde_json::from_str(&raw).context("parsing conversation JSON")?;
    anyhow::ensure!(!file.turns.is_empty(), "conversation has no turns");

    let lines: Vec<(&str, &str)> = file
        .turns
        .iter()
        .map(|t| (t.speaker.as_str(), t.text.as_str()))
        .collect();
    let mut conversation = Conversation::from_lines(Uuid::new_v4(), &lines);
    conversation.source_customer = file.source_customer;
    Ok(conversation)
}

fn load_template(
    name: &str,
    path: &Option<PathBuf>,
    fallback: &str,
) -> anyhow::Result<PromptTemplate> {
    let template_text = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {name} template from {}", path.display()))?,
        None => fallback.to_owned(),
    };
    Ok(PromptTemplate {
        id: Uuid::new_v4(),
        name: name.to_owned(),
        template_text,
        variables: Vec::new(),
    })
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "replay-cli".into())
}
