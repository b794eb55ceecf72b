//! Top-level orchestrator: the meta-controller loop that ties the
//! classifier, mode selector, execution loop, memory store, recovery
//! manager, and guarantees ledger together into one recursive `execute`.
//!
//! `execute(task)` seeds an [`ExecutionState`], asks a [`MetaController`]
//! for a [`Decision`], and runs that decision through `execute_with_recovery`
//! — a retry/degrade/give-up loop driven by the [`RecoveryManager`].
//! Recursive decomposition and subcalls derive a child
//! [`GuaranteesLedger`] scoped to the parent's remaining budget, and every
//! recursive step checks `must_stop()` before doing any work.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::classifier::TaskClassifier;
use crate::context::{ContextExternalizer, ContextSource};
use crate::error::{Error, ErrorKind, Result};
use crate::execution_loop::{ExecutionLoop, PreparedPrompt, ProgressEvent, RlmConfig};
use crate::guarantees::{ComputeBudget, GuaranteesLedger};
use crate::interpreter::Interpreter;
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};
use crate::memory::{NodeQuery, NodeType, SqliteMemoryStore};
use crate::mode_selector::{Mode, ModeSelector, ModeSelectorConfig, Override};
use crate::recovery::RecoveryManager;
use crate::trajectory::{TrajectoryEvent, TrajectoryEventType};

/// How a `Decompose` decision should split the task text into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecomposeStrategy {
    File,
    Function,
    Concept,
    Auto,
}

/// What the meta-controller decided to do next. Mirrors the free-form JSON
/// the model returns; any shape that doesn't parse becomes `Unknown`,
/// which falls back to direct execution rather than failing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Decision {
    Direct,
    Decompose { strategy: DecomposeStrategy },
    MemoryQuery { query: String },
    Subcall { prompt: String, token_budget: Option<u64> },
    Synthesize,
    #[serde(other)]
    Unknown,
}

/// The narrow meta-controller contract: given the current state, decide
/// what to do next. Implementations must never propagate a backend error
/// as `Err` — a malformed or unreachable call should resolve to
/// [`Decision::Unknown`] so the orchestrator can fall back to direct mode.
#[async_trait]
pub trait MetaController: Send + Sync {
    async fn decide(&self, state: &ExecutionState) -> Decision;
}

/// Asks the backend model for a JSON decision, tolerant of markdown fences.
pub struct ModelMetaController {
    client: Arc<dyn LLMClient>,
}

impl ModelMetaController {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetaController for ModelMetaController {
    async fn decide(&self, state: &ExecutionState) -> Decision {
        let prompt = format!(
            "Decide how to handle this task. Respond with JSON only, one of:\n\
             {{\"action\": \"direct\"}}\n\
             {{\"action\": \"decompose\", \"strategy\": \"file\"|\"function\"|\"concept\"|\"auto\"}}\n\
             {{\"action\": \"memory_query\", \"query\": \"...\"}}\n\
             {{\"action\": \"subcall\", \"prompt\": \"...\", \"token_budget\": null}}\n\
             {{\"action\": \"synthesize\"}}\n\n\
             Task: \"{}\"",
            state.task
        );
        let request = CompletionRequest::new()
            .with_message(ChatMessage::user(&prompt))
            .with_temperature(0.0)
            .with_max_tokens(200);

        match self.client.complete(request).await {
            Ok(response) => parse_decision(&response.content),
            Err(_) => Decision::Unknown,
        }
    }
}

fn parse_decision(text: &str) -> Decision {
    let stripped = strip_code_fence(text.trim());
    serde_json::from_str(stripped).unwrap_or(Decision::Unknown)
}

fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.trim_start_matches('\n');
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else {
        text
    }
}

/// The outcome of one chunk/subcall within a decomposition.
#[derive(Debug, Clone)]
pub struct SubCallResult {
    pub name: String,
    pub response: String,
    pub error: Option<String>,
}

/// The mutable state threaded through one `execute` call's recursion.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    pub task: String,
    pub depth: u32,
    pub context: Vec<ContextSource>,
    pub partial_results: Vec<SubCallResult>,
}

impl ExecutionState {
    pub fn new(task: impl Into<String>) -> Self {
        Self { task: task.into(), depth: 0, context: Vec::new(), partial_results: Vec::new() }
    }

    pub fn with_context(mut self, context: Vec<ContextSource>) -> Self {
        self.context = context;
        self
    }

    fn child(&self, task: impl Into<String>) -> Self {
        Self { task: task.into(), depth: self.depth + 1, context: self.context.clone(), partial_results: Vec::new() }
    }
}

/// Recovery metadata attached to a terminal failure, so callers can report
/// uniformly without inspecting the error variant themselves.
#[derive(Debug, Clone)]
pub struct RecoveryMeta {
    pub should_retry: bool,
    pub degraded: bool,
    pub category: String,
}

/// The result of one `execute` call. Always well-formed: on failure
/// `response` is empty and `error`/`recovery` are set; any partial progress
/// is still reachable via the ledger's last checkpoint.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub response: String,
    pub error: Option<String>,
    pub recovery: Option<RecoveryMeta>,
    pub degraded: bool,
}

impl ExecutionResult {
    fn ok(response: impl Into<String>) -> Self {
        Self { response: response.into(), error: None, recovery: None, degraded: false }
    }
}

/// Tunables for one orchestrator instance.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub budget: ComputeBudget,
    pub mode_selector: ModeSelectorConfig,
    pub rlm: RlmConfig,
    pub max_retries: u32,
    pub degrade_enabled: bool,
    pub retry_base_delay: Duration,
    pub enable_async_execution: bool,
    pub max_parallel_ops: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            budget: ComputeBudget::default(),
            mode_selector: ModeSelectorConfig::default(),
            rlm: RlmConfig::default(),
            max_retries: 2,
            degrade_enabled: true,
            retry_base_delay: Duration::from_millis(1),
            enable_async_execution: true,
            max_parallel_ops: 4,
        }
    }
}

/// Ties the components together into one recursive execution engine.
pub struct Orchestrator {
    client: Arc<dyn LLMClient>,
    interpreter: Arc<dyn Interpreter>,
    memory: Option<Arc<SqliteMemoryStore>>,
    meta_controller: Arc<dyn MetaController>,
    classifier: TaskClassifier,
    mode_selector: ModeSelector,
    recovery: RecoveryManager,
    config: OrchestratorConfig,
    trace: std::sync::Mutex<Vec<TrajectoryEvent>>,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn LLMClient>,
        interpreter: Arc<dyn Interpreter>,
        memory: Option<Arc<SqliteMemoryStore>>,
        config: OrchestratorConfig,
    ) -> Self {
        let meta_controller: Arc<dyn MetaController> = Arc::new(ModelMetaController::new(client.clone()));
        Self {
            classifier: TaskClassifier::new(Some(client.clone())),
            mode_selector: ModeSelector::new(config.mode_selector),
            recovery: RecoveryManager::new(config.max_retries, config.degrade_enabled, config.retry_base_delay),
            client,
            interpreter,
            memory,
            meta_controller,
            config,
            trace: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Override the default model-backed meta-controller, e.g. for tests.
    pub fn with_meta_controller(mut self, meta_controller: Arc<dyn MetaController>) -> Self {
        self.meta_controller = meta_controller;
        self
    }

    pub fn trace(&self) -> Vec<TrajectoryEvent> {
        self.trace.lock().unwrap().clone()
    }

    pub fn recovery_stats(&self) -> crate::recovery::RecoveryStats {
        self.recovery.stats()
    }

    fn emit(&self, event: TrajectoryEvent) -> String {
        let id = event.id.to_string();
        self.trace.lock().unwrap().push(event);
        id
    }

    /// Build the initial state, seed memory hints, and run the recursive
    /// execution to completion.
    pub async fn execute(&self, task: impl Into<String>, context: Vec<ContextSource>) -> ExecutionResult {
        let task = task.into();
        let mut state = ExecutionState::new(task.clone()).with_context(context);

        if let Some(memory) = &self.memory {
            let prefix: String = task.chars().take(30).collect();
            if let Ok(facts) = memory.list_nodes(
                &NodeQuery::new()
                    .node_types(vec![NodeType::Fact])
                    .min_confidence(0.7)
                    .content_contains(prefix)
                    .limit(5),
            ) {
                for fact in facts {
                    state.partial_results.push(SubCallResult {
                        name: "memory_hint".to_string(),
                        response: fact.content,
                        error: None,
                    });
                }
            }
        }

        let ledger = GuaranteesLedger::new(self.config.budget);
        self.orchestrate(state, ledger, None).await
    }

    /// The recursive core: decide, execute with recovery, record trace.
    fn orchestrate<'a>(
        &'a self,
        state: ExecutionState,
        ledger: GuaranteesLedger,
        parent_id: Option<String>,
    ) -> Pin<Box<dyn Future<Output = ExecutionResult> + Send + 'a>> {
        Box::pin(async move {
            if ledger.must_stop() {
                return ExecutionResult::ok(ledger.last_checkpoint().unwrap_or_default());
            }
            if state.depth >= self.config.budget.max_depth {
                return self.give_up(Error::Internal("max recursion depth exceeded".to_string()));
            }

            let mut decision_event = TrajectoryEvent::decision(state.depth, format!("deciding for: {}", state.task));
            if let Some(parent) = &parent_id {
                decision_event = decision_event.with_parent(parent.clone());
            }
            let event_id = self.emit(decision_event);

            let decision = self.meta_controller.decide(&state).await;
            let result = self.execute_with_recovery(&state, &decision, &ledger, &event_id).await;

            let status = if result.error.is_some() { "error" } else { "ok" };
            self.emit(
                TrajectoryEvent::new(TrajectoryEventType::Decision, state.depth, format!("completed: {status}"))
                    .with_parent(event_id),
            );

            result
        })
    }

    /// Wraps `execute_action` in the retry/degrade/give-up loop.
    async fn execute_with_recovery(
        &self,
        state: &ExecutionState,
        decision: &Decision,
        ledger: &GuaranteesLedger,
        parent_event_id: &str,
    ) -> ExecutionResult {
        let mut retries = 0u32;
        let mut hinted_state = state.clone();

        loop {
            match self.execute_action(&hinted_state, decision, ledger, parent_event_id).await {
                Ok(response) => return ExecutionResult::ok(response),
                Err(e) => match self.recovery.handle(&e, retries) {
                    crate::recovery::RecoveryAction::Retry { prompt_hint, delay } => {
                        retries += 1;
                        hinted_state.task = format!("{}\n\n({prompt_hint})", state.task);
                        tokio::time::sleep(delay).await;
                    }
                    crate::recovery::RecoveryAction::Degrade => {
                        self.emit(
                            TrajectoryEvent::new(TrajectoryEventType::Decision, state.depth, format!("degrading after error: {e}"))
                                .with_parent(parent_event_id.to_string()),
                        );
                        return match self.execute_direct(state, ledger).await {
                            Ok(response) => {
                                self.recovery.mark_recovered();
                                ExecutionResult { response, error: None, recovery: None, degraded: true }
                            }
                            Err(e2) => self.give_up(e2),
                        };
                    }
                    crate::recovery::RecoveryAction::GiveUp => return self.give_up(e),
                },
            }
        }
    }

    fn give_up(&self, e: Error) -> ExecutionResult {
        ExecutionResult {
            response: String::new(),
            recovery: Some(RecoveryMeta {
                should_retry: false,
                degraded: false,
                category: format!("{:?}", ErrorKind::classify(&e)),
            }),
            error: Some(e.to_string()),
            degraded: false,
        }
    }

    async fn execute_action(
        &self,
        state: &ExecutionState,
        decision: &Decision,
        ledger: &GuaranteesLedger,
        parent_event_id: &str,
    ) -> Result<String> {
        match decision {
            Decision::Direct | Decision::Unknown => self.execute_direct(state, ledger).await,
            Decision::Decompose { strategy } => {
                self.execute_decompose(state, *strategy, ledger, parent_event_id).await
            }
            Decision::MemoryQuery { query } => self.execute_memory_query(query),
            Decision::Subcall { prompt, token_budget } => {
                self.execute_subcall(state, prompt, *token_budget, ledger, parent_event_id).await
            }
            Decision::Synthesize => Ok(self.synthesize(&state.partial_results)),
        }
    }

    /// Always calls the backend once with the task and returns its actual
    /// output — never echoes the task text back as the response.
    async fn execute_direct(&self, state: &ExecutionState, ledger: &GuaranteesLedger) -> Result<String> {
        let classification = self.classifier.classify(&state.task).await;
        let total_tokens = self.estimate_tokens(state);
        let mode_decision = self.mode_selector.select(
            total_tokens,
            &state.context,
            Some(&classification),
            None,
            true,
            Override::None,
        );

        match mode_decision.mode {
            Mode::Direct => {
                ledger.record_call();
                let request = CompletionRequest::new()
                    .with_message(ChatMessage::user(&state.task))
                    .with_max_tokens(self.config.rlm.max_tokens_per_call);
                let response = self.client.complete(request).await?;
                ledger.record_tokens(response.usage.total());
                if let Some(cost) = response.cost {
                    ledger.record_cost(cost);
                }
                Ok(response.content)
            }
            Mode::Rlm => self.execute_rlm(state, ledger).await,
        }
    }

    async fn execute_rlm(&self, state: &ExecutionState, ledger: &GuaranteesLedger) -> Result<String> {
        let mut externalizer = ContextExternalizer::new(self.interpreter.clone());
        let loaded = externalizer.load(&state.context).await?;
        let loaded_context: Vec<String> = loaded.iter().map(|v| v.name.clone()).collect();

        let prompt = PreparedPrompt {
            system_prompt: "You solve tasks by writing Python code. Use FINAL(x) to report the answer.".to_string(),
            final_prompt: state.task.clone(),
            loaded_context,
        };

        let exec_loop = ExecutionLoop::new(
            self.client.clone(),
            self.interpreter.clone(),
            ledger.clone(),
            tokio_util::sync::CancellationToken::new(),
        );

        let result = exec_loop.run(prompt, self.config.rlm.clone(), |_event: ProgressEvent| {}).await?;

        match result.error {
            Some(error) => Err(Error::Internal(error)),
            None => Ok(result.response),
        }
    }

    async fn execute_decompose(
        &self,
        state: &ExecutionState,
        strategy: DecomposeStrategy,
        ledger: &GuaranteesLedger,
        parent_event_id: &str,
    ) -> Result<String> {
        let chunks = decompose(&state.task, strategy);
        if chunks.is_empty() {
            return Err(Error::Internal("decomposition produced no chunks".to_string()));
        }

        let futures = chunks.into_iter().enumerate().map(|(index, chunk)| {
            let child_state = state.child(chunk);
            let (child_ledger, _token) = ledger.context(ledger);
            let parent_event_id = parent_event_id.to_string();
            async move {
                let response = self.orchestrate(child_state, child_ledger, Some(parent_event_id)).await;
                SubCallResult { name: format!("chunk-{index}"), response: response.response, error: response.error }
            }
        });

        let results = if self.config.enable_async_execution {
            let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_ops.max(1)));
            let permitted = futures.map(|fut| {
                let semaphore = semaphore.clone();
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore never closed");
                    fut.await
                }
            });
            join_all(permitted).await
        } else {
            let mut results = Vec::new();
            for fut in futures {
                results.push(fut.await);
            }
            results
        };

        Ok(self.synthesize(&results))
    }

    fn execute_memory_query(&self, query: &str) -> Result<String> {
        let Some(memory) = &self.memory else {
            return Ok(format!("no memory store configured for query '{query}'"));
        };

        let nodes = memory.list_nodes(&NodeQuery::new().content_contains(query).limit(10))?;
        for node in &nodes {
            memory.increment_access(&node.id)?;
        }

        if nodes.is_empty() {
            return Ok(format!("no memory results for '{query}'"));
        }

        Ok(nodes.iter().map(|n| format!("[{:?}] {}", n.node_type, n.content)).collect::<Vec<_>>().join("\n"))
    }

    async fn execute_subcall(
        &self,
        state: &ExecutionState,
        prompt: &str,
        token_budget: Option<u64>,
        ledger: &GuaranteesLedger,
        parent_event_id: &str,
    ) -> Result<String> {
        let (child_ledger, _token) = ledger.context(ledger);
        if let Some(budget) = token_budget {
            let remaining = child_ledger.remaining_budget();
            if budget < remaining.tokens {
                child_ledger.record_tokens(remaining.tokens - budget);
            }
        }

        let child_task = format!("{prompt}\n\n{}", state.task);
        let child_state = state.child(child_task);
        let result = self.orchestrate(child_state, child_ledger, Some(parent_event_id.to_string())).await;

        match result.error {
            Some(e) => Err(Error::Internal(e)),
            None => Ok(result.response),
        }
    }

    fn synthesize(&self, results: &[SubCallResult]) -> String {
        let successful: Vec<&SubCallResult> = results.iter().filter(|r| r.error.is_none()).collect();
        match successful.len() {
            0 => String::new(),
            1 => successful[0].response.clone(),
            _ => successful.iter().map(|r| format!("[{}] {}", r.name, r.response)).collect::<Vec<_>>().join("\n"),
        }
    }

    fn estimate_tokens(&self, state: &ExecutionState) -> u64 {
        let task_tokens = (state.task.len() / 4) as u64;
        let context_tokens: u64 = state.context.iter().map(|c| (c.content.len() / 4) as u64).sum();
        task_tokens + context_tokens
    }
}

/// Split `task` into chunks per the requested strategy. Never panics;
/// filters to non-empty trimmed chunks.
fn decompose(task: &str, strategy: DecomposeStrategy) -> Vec<String> {
    let strategy = match strategy {
        DecomposeStrategy::Auto => {
            if task.contains("\n\n") {
                DecomposeStrategy::File
            } else {
                DecomposeStrategy::Concept
            }
        }
        other => other,
    };

    let chunks: Vec<String> = match strategy {
        DecomposeStrategy::File => task.split("\n\n").map(str::to_string).collect(),
        DecomposeStrategy::Function => {
            static FN_BOUNDARY: std::sync::LazyLock<regex::Regex> =
                std::sync::LazyLock::new(|| regex::Regex::new(r"(?m)^\s*(fn |def |function )").unwrap());
            let mut chunks = Vec::new();
            let mut last = 0;
            for m in FN_BOUNDARY.find_iter(task) {
                if m.start() > last {
                    chunks.push(task[last..m.start()].to_string());
                }
                last = m.start();
            }
            chunks.push(task[last..].to_string());
            chunks
        }
        DecomposeStrategy::Concept => task.split(". ").map(str::to_string).collect(),
        DecomposeStrategy::Auto => unreachable!("resolved above"),
    };

    chunks.into_iter().map(|c| c.trim().to_string()).filter(|c| !c.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::{ExecuteResult, FinalOutput, VarInfo};
    use crate::llm::{CompletionResponse, EmbeddingRequest, EmbeddingResponse, ModelSpec, Provider, StopReason, TokenUsage};
    use std::sync::Mutex as StdMutex;

    /// Scripted LLM client: returns responses in order, ignoring the
    /// request content, so tests can drive exact orchestrator branches.
    struct ScriptedClient {
        responses: StdMutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<&str>) -> Self {
            Self { responses: StdMutex::new(responses.into_iter().rev().map(str::to_string).collect()) }
        }
    }

    #[async_trait]
    impl LLMClient for ScriptedClient {
        async fn complete(&self, _req: CompletionRequest) -> Result<CompletionResponse> {
            let content = self.responses.lock().unwrap().pop().unwrap_or_default();
            Ok(CompletionResponse {
                id: "resp".to_string(),
                model: "test-model".to_string(),
                content,
                stop_reason: Some(StopReason::EndTurn),
                usage: TokenUsage { input_tokens: 10, output_tokens: 10, cache_read_tokens: None, cache_creation_tokens: None },
                timestamp: chrono::Utc::now(),
                cost: Some(0.001),
            })
        }
        async fn embed(&self, _req: EmbeddingRequest) -> Result<EmbeddingResponse> {
            unreachable!()
        }
        fn provider(&self) -> Provider {
            Provider::Anthropic
        }
        fn available_models(&self) -> Vec<ModelSpec> {
            vec![]
        }
    }

    /// Counts "apple" occurrences in the `blob` var when the generated
    /// code mentions it; otherwise a no-op success.
    #[derive(Default)]
    struct FakeInterpreter {
        vars: StdMutex<std::collections::HashMap<String, String>>,
        final_output: StdMutex<Option<FinalOutput>>,
    }

    #[async_trait]
    impl Interpreter for FakeInterpreter {
        async fn execute(&self, code: &str) -> Result<ExecuteResult> {
            let vars = self.vars.lock().unwrap();
            if code.contains("apple") {
                let haystack = vars.get("blob").cloned().unwrap_or_default();
                let count = haystack.matches("apple").count();
                *self.final_output.lock().unwrap() = Some(FinalOutput {
                    content: count.to_string(),
                    output_type: "text".to_string(),
                    metadata: serde_json::json!({}),
                });
                return Ok(ExecuteResult { output: count.to_string(), return_val: None, error: None, execution_ms: 1 });
            }
            Ok(ExecuteResult { output: "ok".to_string(), return_val: None, error: None, execution_ms: 1 })
        }
        async fn set_var(&self, name: &str, content: &str) -> Result<()> {
            self.vars.lock().unwrap().insert(name.to_string(), content.to_string());
            Ok(())
        }
        async fn get_var(&self, name: &str, _start: Option<usize>, _end: Option<usize>) -> Result<String> {
            Ok(self.vars.lock().unwrap().get(name).cloned().unwrap_or_default())
        }
        async fn list_vars(&self) -> Result<Vec<VarInfo>> {
            Ok(vec![])
        }
        async fn has_final_output(&self) -> Result<bool> {
            Ok(self.final_output.lock().unwrap().is_some())
        }
        async fn get_final_output(&self) -> Result<Option<FinalOutput>> {
            Ok(self.final_output.lock().unwrap().clone())
        }
        async fn clear_final_output(&self) -> Result<()> {
            *self.final_output.lock().unwrap() = None;
            Ok(())
        }
        async fn clear_vars(&self, names: &[String]) -> Result<()> {
            let mut vars = self.vars.lock().unwrap();
            for name in names {
                vars.remove(name);
            }
            Ok(())
        }
    }

    struct FixedDecision(Decision);

    #[async_trait]
    impl MetaController for FixedDecision {
        async fn decide(&self, _state: &ExecutionState) -> Decision {
            self.0.clone()
        }
    }

    fn orchestrator(client: Arc<dyn LLMClient>, interpreter: Arc<dyn Interpreter>) -> Orchestrator {
        Orchestrator::new(client, interpreter, None, OrchestratorConfig::default())
            .with_meta_controller(Arc::new(FixedDecision(Decision::Direct)))
    }

    #[test]
    fn test_parse_decision_tolerates_markdown_fence() {
        let wrapped = "```json\n{\"action\": \"decompose\", \"strategy\": \"file\"}\n```";
        assert_eq!(parse_decision(wrapped), Decision::Decompose { strategy: DecomposeStrategy::File });
    }

    #[test]
    fn test_parse_decision_malformed_is_unknown() {
        assert_eq!(parse_decision("not json"), Decision::Unknown);
    }

    #[test]
    fn test_decompose_file_splits_on_blank_lines() {
        let chunks = decompose("first part\n\nsecond part", DecomposeStrategy::File);
        assert_eq!(chunks, vec!["first part".to_string(), "second part".to_string()]);
    }

    #[test]
    fn test_decompose_concept_splits_on_sentences() {
        let chunks = decompose("One thing. Another thing.", DecomposeStrategy::Concept);
        assert_eq!(chunks.len(), 2);
    }

    #[tokio::test]
    async fn test_retrieval_task_is_direct_regardless_of_size() {
        let client = Arc::new(ScriptedClient::new(vec!["CODE-1234"]));
        let interpreter = Arc::new(FakeInterpreter::default());
        let orch = orchestrator(client, interpreter);

        let context = vec![ContextSource::file("notes", format!("{}The secret access code is CODE-1234.", "x ".repeat(2500)))];
        let result = orch.execute("What is the secret access code?", context).await;

        assert!(result.error.is_none());
        assert!(result.response.contains("CODE-1234"));
    }

    #[tokio::test]
    async fn test_counting_task_uses_rlm_and_final() {
        let client = Arc::new(ScriptedClient::new(vec!["```python\ncount apple occurrences\n```"]));
        let interpreter = Arc::new(FakeInterpreter::default());
        let orch = orchestrator(client, interpreter);

        let context = vec![ContextSource::file("blob", format!("{}apple apple apple apple apple apple apple", "word ".repeat(1000)))];
        let result = orch.execute("How many times does 'apple' appear?", context).await;

        assert!(result.error.is_none());
        assert_eq!(result.response, "7");
    }

    #[tokio::test]
    async fn test_memory_query_action_lists_matches() {
        let client = Arc::new(ScriptedClient::new(vec![]));
        let interpreter = Arc::new(FakeInterpreter::default());
        let memory = Arc::new(SqliteMemoryStore::in_memory().unwrap());
        memory
            .create_node(&crate::memory::Node::new(NodeType::Fact, "Alice and Bob collaborated on auth"))
            .unwrap();

        let orch = Orchestrator::new(client, interpreter, Some(memory), OrchestratorConfig::default())
            .with_meta_controller(Arc::new(FixedDecision(Decision::MemoryQuery { query: "Alice".to_string() })));

        let result = orch.execute("Did Alice work with Bob?", vec![]).await;
        assert!(result.error.is_none());
        assert!(result.response.contains("Alice"));
    }

    #[tokio::test]
    async fn test_synthesize_combines_partial_results() {
        let client = Arc::new(ScriptedClient::new(vec![]));
        let interpreter = Arc::new(FakeInterpreter::default());
        let orch = Orchestrator::new(client, interpreter, None, OrchestratorConfig::default())
            .with_meta_controller(Arc::new(FixedDecision(Decision::Synthesize)));

        let mut state = ExecutionState::new("combine");
        state.partial_results.push(SubCallResult { name: "a".into(), response: "alpha".into(), error: None });
        state.partial_results.push(SubCallResult { name: "b".into(), response: "beta".into(), error: None });

        let ledger = GuaranteesLedger::new(ComputeBudget::default());
        let result = orch.orchestrate(state, ledger, None).await;

        assert!(result.response.contains("alpha"));
        assert!(result.response.contains("beta"));
    }

    #[tokio::test]
    async fn test_iteration_cap_surfaces_as_error() {
        let client = Arc::new(ScriptedClient::new(vec!["```python\nstill working\n```"; 10]));
        let interpreter = Arc::new(FakeInterpreter::default());
        let mut config = OrchestratorConfig::default();
        config.rlm.max_iterations = 3;
        config.mode_selector.min_rlm = 1;
        let orch = Orchestrator::new(client, interpreter, None, config)
            .with_meta_controller(Arc::new(FixedDecision(Decision::Direct)));

        let context = vec![ContextSource::file("blob", "x".repeat(8000))];
        let result = orch.execute("analyze everything exhaustively", context).await;

        assert!(result.error.is_some());
        assert!(result.error.unwrap().to_lowercase().contains("max iterations"));
    }

    #[tokio::test]
    async fn test_decompose_failure_degrades_to_direct() {
        let client = Arc::new(ScriptedClient::new(vec!["direct answer after degrade"]));
        let interpreter = Arc::new(FakeInterpreter::default());

        struct AlwaysDecompose;
        #[async_trait]
        impl MetaController for AlwaysDecompose {
            async fn decide(&self, _state: &ExecutionState) -> Decision {
                Decision::Decompose { strategy: DecomposeStrategy::Concept }
            }
        }

        let orch = Orchestrator::new(client, interpreter, None, OrchestratorConfig::default())
            .with_meta_controller(Arc::new(AlwaysDecompose));

        // Whitespace-only task decomposes to zero chunks, which
        // `execute_decompose` reports as a `Degradable` error.
        let result = orch.execute("   ", vec![]).await;

        assert!(result.error.is_none());
        assert_eq!(result.response, "direct answer after degrade");
        assert!(result.degraded);
        assert!(orch.recovery_stats().recovered >= 1);
    }

    #[tokio::test]
    async fn test_must_stop_returns_checkpoint() {
        let client = Arc::new(ScriptedClient::new(vec![]));
        let interpreter = Arc::new(FakeInterpreter::default());
        let orch = orchestrator(client, interpreter);

        let exhausted = ComputeBudget { max_cost: 0.0, ..ComputeBudget::default() };
        let ledger = GuaranteesLedger::new(exhausted);
        ledger.checkpoint("partial progress");

        let state = ExecutionState::new("anything");
        let result = orch.orchestrate(state, ledger, None).await;
        assert_eq!(result.response, "partial progress");
    }
}
