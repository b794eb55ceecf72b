//! The sandboxed interpreter's consumed contract.
//!
//! The interpreter itself (a Python-like sandbox) is an external
//! collaborator; the core only needs the narrow surface used by the
//! execution loop and context externalizer: executing code, setting and
//! reading variables, and listing what's in scope. Implementations are
//! expected to be out-of-process (subprocess, WASM sandbox, etc.) — this
//! trait's async, cancellable shape reflects that.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Built-in function names always present inside the interpreter, exposed
/// here so callers (the context externalizer, the execution loop) can
/// avoid clobbering them.
pub const BUILTIN_NAMES: &[&str] = &[
    "peek",
    "grep",
    "partition",
    "partition_by_lines",
    "extract_functions",
    "count_tokens_approx",
    "llm_call",
    "llm_batch",
    "memory_add_fact",
    "memory_add_experience",
    "memory_query",
    "memory_get_context",
    "FINAL",
    "FINAL_JSON",
    "has_final_output",
    "get_final_output",
    "get_final_metadata",
    "clear_final_output",
];

/// Result of one `Execute(code)` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub output: String,
    pub return_val: Option<Value>,
    pub error: Option<String>,
    pub execution_ms: u64,
}

impl ExecuteResult {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Metadata describing one variable currently set in the interpreter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarInfo {
    pub name: String,
    pub var_type: String,
    pub length: usize,
}

/// The `FINAL(...)` sentinel payload, once set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalOutput {
    pub content: String,
    pub output_type: String,
    pub metadata: Value,
}

/// The narrow interpreter contract consumed by the execution loop and the
/// context externalizer. Blocking calls are expected to be cancellable by
/// the caller's surrounding future.
#[async_trait]
pub trait Interpreter: Send + Sync {
    async fn execute(&self, code: &str) -> Result<ExecuteResult>;
    async fn set_var(&self, name: &str, content: &str) -> Result<()>;
    async fn get_var(&self, name: &str, start: Option<usize>, end: Option<usize>) -> Result<String>;
    async fn list_vars(&self) -> Result<Vec<VarInfo>>;

    /// Whether `FINAL`/`FINAL_JSON` has been called since the last clear.
    async fn has_final_output(&self) -> Result<bool>;
    async fn get_final_output(&self) -> Result<Option<FinalOutput>>;
    async fn clear_final_output(&self) -> Result<()>;

    /// Delete the named variables, e.g. on context teardown. Implementations
    /// must refuse to delete names in [`BUILTIN_NAMES`].
    async fn clear_vars(&self, names: &[String]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_cover_spec_surface() {
        for name in ["peek", "grep", "FINAL", "llm_call", "memory_query"] {
            assert!(BUILTIN_NAMES.contains(&name));
        }
    }

    #[test]
    fn test_execute_result_is_error() {
        let ok = ExecuteResult { output: "1".into(), ..Default::default() };
        assert!(!ok.is_error());

        let err = ExecuteResult { error: Some("boom".into()), ..Default::default() };
        assert!(err.is_error());
    }
}
