//! The iterative RLM execution loop: the model emits code, the interpreter
//! runs it, feedback is fed back, until a termination condition fires.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::classifier::TaskType;
use crate::error::Result;
use crate::guarantees::GuaranteesLedger;
use crate::interpreter::Interpreter;
use crate::llm::{ChatMessage, ChatRole, CompletionRequest, LLMClient};

/// A prompt prepared for RLM-mode execution: the model sees the system
/// prompt, the query, and a summary of what's been externalized — never
/// the raw context itself.
#[derive(Debug, Clone)]
pub struct PreparedPrompt {
    pub system_prompt: String,
    pub final_prompt: String,
    pub loaded_context: Vec<String>,
}

/// Configuration for one execution-loop run.
#[derive(Debug, Clone)]
pub struct RlmConfig {
    pub max_iterations: u32,
    pub max_tokens_per_call: u32,
    pub timeout: Duration,
    pub enable_early_termination: bool,
    pub task_type: TaskType,
}

impl Default for RlmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_tokens_per_call: 4096,
            timeout: Duration::from_secs(120),
            enable_early_termination: true,
            task_type: TaskType::Unknown,
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationReason {
    FinalSentinel,
    LooksLikeFinalAnswer,
    EarlyTermination { stable_iterations: u32 },
    IterationCap,
    Cancelled,
}

/// The loop's outcome. Always well-formed: on non-fatal termination
/// `response` holds the answer and `error` is `None`; cancellation sets
/// `error` instead.
#[derive(Debug, Clone)]
pub struct ExecutionLoopResult {
    pub response: String,
    pub iterations: u32,
    pub termination_reason: TerminationReason,
    pub error: Option<String>,
}

/// One of the seven named observability events emitted during a run.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    IterationStart { iteration: u32 },
    LlmStart { iteration: u32 },
    LlmEnd { iteration: u32, token_estimate: u64, has_code: bool },
    ReplStart { iteration: u32, code: String },
    ReplEnd { iteration: u32, output: String, error: Option<String> },
    IterationEnd { iteration: u32, duration: Duration },
    Completion { iterations: u32, reason: String },
}

const LEXICAL_HINTS: &[&str] = &[
    "def ", "class ", "import ", "FINAL(", "llm_call(", "peek(", "grep(", "=", "==", "!=",
];

const CONCLUSION_PHRASES: &[&str] = &[
    "the answer is",
    "in conclusion",
    "therefore,",
    "final answer:",
    "to summarize",
];

/// Extract the first Python code block from a model response. Total:
/// never panics on arbitrary input. Prefers a ` ```python ` fence; falls
/// back to the first generic fence whose body looks like code. Unclosed
/// fences are tolerated — consumed to end-of-string.
pub fn extract_python_code(text: &str) -> Option<String> {
    if let Some(code) = extract_fenced(text, "```python") {
        return Some(code);
    }
    extract_generic_fence(text)
}

fn extract_fenced(text: &str, open: &str) -> Option<String> {
    let start = text.find(open)? + open.len();
    let rest = &text[start..];
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    match rest.find("```") {
        Some(end) => Some(rest[..end].to_string()),
        None => Some(rest.to_string()),
    }
}

fn extract_generic_fence(text: &str) -> Option<String> {
    let mut search_from = 0;
    while let Some(rel_start) = text[search_from..].find("```") {
        let fence_start = search_from + rel_start;
        let body_start = fence_start + 3;
        let after_marker = &text[body_start..];
        // Skip an optional language tag up to the first newline.
        let body = match after_marker.find('\n') {
            Some(nl) => &after_marker[nl + 1..],
            None => after_marker,
        };
        let body_abs_start = text.len() - body.len();
        let (code, next_search) = match text[body_abs_start..].find("```") {
            Some(end) => (&text[body_abs_start..body_abs_start + end], body_abs_start + end + 3),
            None => (&text[body_abs_start..], text.len()),
        };
        if looks_like_code(code) {
            return Some(code.to_string());
        }
        if next_search <= search_from {
            break;
        }
        search_from = next_search;
    }
    None
}

fn looks_like_code(body: &str) -> bool {
    LEXICAL_HINTS.iter().any(|hint| body.contains(hint))
}

/// True iff the response looks like a final natural-language answer: no
/// code fences, short, and containing a conclusion phrase. Always false
/// when the response contains any ``` fence.
pub fn looks_like_final_answer(text: &str) -> bool {
    if text.contains("```") {
        return false;
    }
    let lower = text.to_lowercase();
    let short_enough = text.len() < 500;
    short_enough && CONCLUSION_PHRASES.iter().any(|p| lower.contains(p))
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}... [truncated]", &s[..max])
    }
}

/// Drives one RLM execution-loop run to completion.
pub struct ExecutionLoop {
    client: Arc<dyn LLMClient>,
    interpreter: Arc<dyn Interpreter>,
    ledger: GuaranteesLedger,
    cancel: CancellationToken,
}

impl ExecutionLoop {
    pub fn new(
        client: Arc<dyn LLMClient>,
        interpreter: Arc<dyn Interpreter>,
        ledger: GuaranteesLedger,
        cancel: CancellationToken,
    ) -> Self {
        Self { client, interpreter, ledger, cancel }
    }

    pub async fn run(
        &self,
        prompt: PreparedPrompt,
        config: RlmConfig,
        mut on_progress: impl FnMut(ProgressEvent),
    ) -> Result<ExecutionLoopResult> {
        self.interpreter.clear_final_output().await?;

        let mut conversation: Vec<ChatMessage> = vec![ChatMessage::user(&prompt.final_prompt)];
        let mut recent_outputs: Vec<String> = Vec::new();
        let mut iterations = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                on_progress(ProgressEvent::Completion { iterations, reason: "cancelled".to_string() });
                return Ok(ExecutionLoopResult {
                    response: String::new(),
                    iterations,
                    termination_reason: TerminationReason::Cancelled,
                    error: Some("execution cancelled".to_string()),
                });
            }

            if iterations >= config.max_iterations {
                on_progress(ProgressEvent::Completion { iterations, reason: "max iterations".to_string() });
                return Ok(ExecutionLoopResult {
                    response: String::new(),
                    iterations,
                    termination_reason: TerminationReason::IterationCap,
                    error: Some(format!("max iterations ({}) reached", config.max_iterations)),
                });
            }

            let iter_start = Instant::now();
            on_progress(ProgressEvent::IterationStart { iteration: iterations });

            on_progress(ProgressEvent::LlmStart { iteration: iterations });
            let request = CompletionRequest::new()
                .with_system(&prompt.system_prompt)
                .with_messages(conversation.clone())
                .with_max_tokens(config.max_tokens_per_call);

            let completion = tokio::select! {
                res = self.client.complete(request) => res?,
                _ = self.cancel.cancelled() => {
                    return Ok(ExecutionLoopResult {
                        response: String::new(),
                        iterations,
                        termination_reason: TerminationReason::Cancelled,
                        error: Some("execution cancelled".to_string()),
                    });
                }
            };

            let response_text = completion.content.clone();
            let estimated_tokens = ((response_text.len() + 3) / 4) as u64;
            self.ledger.record_tokens(estimated_tokens);
            self.ledger.record_call();

            let code = extract_python_code(&response_text);
            on_progress(ProgressEvent::LlmEnd { iteration: iterations, token_estimate: estimated_tokens, has_code: code.is_some() });

            conversation.push(ChatMessage::assistant(&response_text));

            let Some(code) = code else {
                if looks_like_final_answer(&response_text) {
                    on_progress(ProgressEvent::Completion { iterations: iterations + 1, reason: "looks like final answer".to_string() });
                    return Ok(ExecutionLoopResult {
                        response: response_text,
                        iterations: iterations + 1,
                        termination_reason: TerminationReason::LooksLikeFinalAnswer,
                        error: None,
                    });
                }
                conversation.push(ChatMessage::user(
                    "Please write Python code to continue, using the available interpreter helpers.",
                ));
                iterations += 1;
                on_progress(ProgressEvent::IterationEnd { iteration: iterations, duration: iter_start.elapsed() });
                continue;
            };

            on_progress(ProgressEvent::ReplStart { iteration: iterations, code: code.clone() });
            let exec_result = tokio::select! {
                res = self.interpreter.execute(&code) => res?,
                _ = self.cancel.cancelled() => {
                    return Ok(ExecutionLoopResult {
                        response: String::new(),
                        iterations,
                        termination_reason: TerminationReason::Cancelled,
                        error: Some("execution cancelled".to_string()),
                    });
                }
            };
            on_progress(ProgressEvent::ReplEnd {
                iteration: iterations,
                output: exec_result.output.clone(),
                error: exec_result.error.clone(),
            });

            if self.interpreter.has_final_output().await? {
                if let Some(final_output) = self.interpreter.get_final_output().await? {
                    on_progress(ProgressEvent::Completion { iterations: iterations + 1, reason: "FINAL sentinel".to_string() });
                    return Ok(ExecutionLoopResult {
                        response: final_output.content,
                        iterations: iterations + 1,
                        termination_reason: TerminationReason::FinalSentinel,
                        error: None,
                    });
                }
            }

            let stability_signal = if !exec_result.output.is_empty() {
                Some(exec_result.output.clone())
            } else {
                exec_result.return_val.as_ref().map(value_to_string)
            };

            if config.enable_early_termination
                && matches!(config.task_type, TaskType::Computational | TaskType::Retrieval)
            {
                if let Some(ref signal) = stability_signal {
                    recent_outputs.push(signal.clone());
                    if recent_outputs.len() >= 2 {
                        let n = recent_outputs.len();
                        if recent_outputs[n - 1] == recent_outputs[n - 2] {
                            on_progress(ProgressEvent::Completion { iterations: iterations + 1, reason: "early termination: stable output".to_string() });
                            return Ok(ExecutionLoopResult {
                                response: signal.clone(),
                                iterations: iterations + 1,
                                termination_reason: TerminationReason::EarlyTermination { stable_iterations: 2 },
                                error: None,
                            });
                        }
                    }
                }
            }

            let feedback = if let Some(err) = &exec_result.error {
                format!("Execution error: {}\nPlease fix the error and try again.", truncate(err, 2000))
            } else {
                format!(
                    "Output: {}\nReturn value: {}",
                    truncate(&exec_result.output, 2000),
                    exec_result.return_val.as_ref().map(value_to_string).unwrap_or_default()
                )
            };
            conversation.push(ChatMessage::user(&feedback));

            iterations += 1;
            on_progress(ProgressEvent::IterationEnd { iteration: iterations, duration: iter_start.elapsed() });
        }
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Flatten a conversation into a single prompt ending in `"Assistant: "`,
/// for backends that take a single string rather than a message list.
pub fn flatten_conversation(system_prompt: &str, messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    if !system_prompt.is_empty() {
        out.push_str("System: ");
        out.push_str(system_prompt);
        out.push('\n');
    }
    for message in messages {
        let label = match message.role {
            ChatRole::System => "System",
            ChatRole::User => "User",
            ChatRole::Assistant => "Assistant",
        };
        out.push_str(label);
        out.push_str(": ");
        out.push_str(&message.content);
        out.push('\n');
    }
    out.push_str("Assistant: ");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_python_code_exact_on_well_formed_fence() {
        let text = "Here:\n```python\nx = 1\n```\n";
        assert_eq!(extract_python_code(text), Some("x = 1\n".to_string()));
    }

    #[test]
    fn test_extract_python_code_never_panics_on_arbitrary_strings() {
        let inputs = ["", "```", "````python", "no fences at all", "```python", "a\0b\u{fffd}"];
        for input in inputs {
            let _ = extract_python_code(input);
        }
    }

    #[test]
    fn test_extract_python_code_tolerates_unclosed_fence() {
        let text = "```python\nx = compute()\nprint(x)";
        let code = extract_python_code(text).unwrap();
        assert!(code.contains("compute()"));
    }

    #[test]
    fn test_extract_generic_fence_with_lexical_hints() {
        let text = "```\ndef foo():\n    return 1\n```";
        let code = extract_python_code(text).unwrap();
        assert!(code.contains("def foo"));
    }

    #[test]
    fn test_extract_generic_fence_skips_non_code_blocks() {
        let text = "```\njust some prose, nothing codey here\n```";
        assert!(extract_python_code(text).is_none());
    }

    #[test]
    fn test_looks_like_final_answer_false_with_fences() {
        assert!(!looks_like_final_answer("```python\nx\n```"));
    }

    #[test]
    fn test_looks_like_final_answer_true_for_short_conclusion() {
        assert!(looks_like_final_answer("The answer is 42."));
    }

    #[test]
    fn test_looks_like_final_answer_false_when_long() {
        let long = format!("The answer is 42. {}", "x".repeat(600));
        assert!(!looks_like_final_answer(&long));
    }

    #[test]
    fn test_flatten_conversation_ends_with_assistant_prompt() {
        let messages = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let flat = flatten_conversation("sys", &messages);
        assert!(flat.ends_with("Assistant: "));
        assert!(flat.contains("System: sys"));
        assert!(flat.contains("User: hi"));
    }
}
