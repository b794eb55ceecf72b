//! Context externalization: pushing typed sources into the interpreter as
//! variables instead of inlining them in the prompt.
//!
//! This prevents "context rot" — performance degradation from lengthy
//! prompts — by keeping bulky context out of the model's view entirely.
//! The model instead sees a manifest of variable summaries and reaches for
//! the full content via interpreter code (`peek`, `grep`, ...).

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::interpreter::{Interpreter, BUILTIN_NAMES};

/// Size thresholds for context variables.
pub const WARN_SIZE_BYTES: usize = 100 * 1024;
pub const REQUIRE_CHUNKING_BYTES: usize = 1024 * 1024;

/// The kind of a context source, used to pick a description template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    File,
    Search,
    Memory,
    Conversation,
    Prompt,
    Custom,
}

/// One typed blob of auxiliary context to externalize. The engine never
/// mutates sources; `name` is the variable name requested in the
/// interpreter, subject to sanitization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSource {
    pub name: String,
    pub content: String,
    pub source_type: SourceType,
    pub metadata: HashMap<String, String>,
}

impl ContextSource {
    pub fn file(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self { name: name.into(), content: content.into(), source_type: SourceType::File, metadata: HashMap::new() }
    }

    pub fn search(name: impl Into<String>, content: impl Into<String>, query: impl Into<String>, result_count: usize) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("query".to_string(), query.into());
        metadata.insert("result_count".to_string(), result_count.to_string());
        Self { name: name.into(), content: content.into(), source_type: SourceType::Search, metadata }
    }

    pub fn memory(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self { name: name.into(), content: content.into(), source_type: SourceType::Memory, metadata: HashMap::new() }
    }

    pub fn conversation(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self { name: name.into(), content: content.into(), source_type: SourceType::Conversation, metadata: HashMap::new() }
    }

    pub fn prompt(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self { name: name.into(), content: content.into(), source_type: SourceType::Prompt, metadata: HashMap::new() }
    }

    pub fn custom(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self { name: name.into(), content: content.into(), source_type: SourceType::Custom, metadata: HashMap::new() }
    }
}

/// Manifest entry describing one variable loaded into the interpreter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableInfo {
    pub name: String,
    pub var_type: SourceType,
    pub size: usize,
    pub token_estimate: u64,
    pub description: String,
    pub source: Option<String>,
}

/// JSON-serializable record of everything currently externalized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub variables: Vec<VariableInfo>,
}

impl Manifest {
    pub fn total_tokens(&self) -> u64 {
        self.variables.iter().map(|v| v.token_estimate).sum()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.variables
            .iter()
            .filter(|v| v.size > WARN_SIZE_BYTES)
            .map(|v| format!("{} exceeds {}KB ({} bytes)", v.name, WARN_SIZE_BYTES / 1024, v.size))
            .collect()
    }
}

/// Sanitize a requested variable name into something interpreter-safe:
/// rewrite every rune outside `[A-Za-z0-9_]` to `_`, prefix `_` if the
/// first rune is a digit, and map an empty result to `"context"`.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        return "context".to_string();
    }
    if out.chars().next().map_or(false, |c| c.is_ascii_digit()) {
        format!("_{out}")
    } else {
        out
    }
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn describe(source: &ContextSource) -> String {
    match source.source_type {
        SourceType::File => format!("File content from {}", basename(&source.name)),
        SourceType::Search => {
            let count = source.metadata.get("result_count").map(String::as_str).unwrap_or("0");
            let query = source.metadata.get("query").map(String::as_str).unwrap_or("");
            format!("{count} search results for '{query}'")
        }
        SourceType::Memory => "Memory context from hypergraph".to_string(),
        SourceType::Conversation => "Conversation history".to_string(),
        SourceType::Prompt => "Prompt context".to_string(),
        SourceType::Custom => "Custom context".to_string(),
    }
}

fn estimate_tokens(content: &str) -> u64 {
    ((content.len() + 3) / 4) as u64
}

/// Loads `ContextSource`s into an interpreter as variables and maintains a
/// manifest of what was loaded.
pub struct ContextExternalizer {
    interpreter: Arc<dyn Interpreter>,
    manifest: Manifest,
}

impl ContextExternalizer {
    pub fn new(interpreter: Arc<dyn Interpreter>) -> Self {
        Self { interpreter, manifest: Manifest::default() }
    }

    /// Sanitize each source's name, push it into the interpreter, and
    /// record a manifest entry. Returns the manifest entries created.
    pub async fn load(&mut self, sources: &[ContextSource]) -> Result<Vec<VariableInfo>> {
        let mut loaded = Vec::with_capacity(sources.len());
        for source in sources {
            let name = sanitize_name(&source.name);
            self.interpreter.set_var(&name, &source.content).await?;

            let info = VariableInfo {
                name: name.clone(),
                var_type: source.source_type.clone(),
                size: source.content.len(),
                token_estimate: estimate_tokens(&source.content),
                description: describe(source),
                source: if source.name == name { None } else { Some(source.name.clone()) },
            };
            loaded.push(info.clone());
            self.manifest.variables.push(info);
        }
        Ok(loaded)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Delete the named variables from the interpreter and the manifest.
    /// Built-in helper names are never eligible for deletion.
    pub async fn clear_context(&mut self, names: &[String]) -> Result<()> {
        let deletable: Vec<String> = names
            .iter()
            .filter(|n| !BUILTIN_NAMES.contains(&n.as_str()))
            .cloned()
            .collect();
        if deletable.is_empty() {
            return Ok(());
        }
        self.interpreter.clear_vars(&deletable).await?;
        self.manifest.variables.retain(|v| !deletable.contains(&v.name));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeInterpreter {
        vars: Mutex<HashMap<String, String>>,
    }

    #[async_trait::async_trait]
    impl Interpreter for FakeInterpreter {
        async fn execute(&self, _code: &str) -> Result<crate::interpreter::ExecuteResult> {
            unreachable!()
        }
        async fn set_var(&self, name: &str, content: &str) -> Result<()> {
            self.vars.lock().unwrap().insert(name.to_string(), content.to_string());
            Ok(())
        }
        async fn get_var(&self, name: &str, _start: Option<usize>, _end: Option<usize>) -> Result<String> {
            Ok(self.vars.lock().unwrap().get(name).cloned().unwrap_or_default())
        }
        async fn list_vars(&self) -> Result<Vec<crate::interpreter::VarInfo>> {
            Ok(vec![])
        }
        async fn has_final_output(&self) -> Result<bool> {
            Ok(false)
        }
        async fn get_final_output(&self) -> Result<Option<crate::interpreter::FinalOutput>> {
            Ok(None)
        }
        async fn clear_final_output(&self) -> Result<()> {
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

    #[test]
    fn test_sanitize_name_rewrites_non_alnum() {
        assert_eq!(sanitize_name("src/auth.rs"), "src_auth_rs");
        assert_eq!(sanitize_name("123abc"), "_123abc");
        assert_eq!(sanitize_name("  "), "__");
    }

    #[test]
    fn test_sanitize_name_empty_maps_to_context() {
        assert_eq!(sanitize_name(""), "context");
    }

    #[test]
    fn test_sanitize_name_preserves_case() {
        assert_eq!(sanitize_name("Foo Bar"), "Foo_Bar");
    }

    #[test]
    fn test_sanitize_name_rewrites_each_rune_without_collapsing_or_trimming() {
        assert_eq!(sanitize_name("a--b"), "a__b");
        assert_eq!(sanitize_name("_x_"), "_x_");
    }

    #[test]
    fn test_describe_per_type() {
        let file = ContextSource::file("src/auth.rs", "fn auth() {}");
        assert_eq!(describe(&file), "File content from auth.rs");

        let search = ContextSource::search("hits", "...", "auth", 3);
        assert_eq!(describe(&search), "3 search results for 'auth'");

        let memory = ContextSource::memory("mem", "...");
        assert_eq!(describe(&memory), "Memory context from hypergraph");

        let custom = ContextSource::custom("x", "...");
        assert_eq!(describe(&custom), "Custom context");

        let conversation = ContextSource::conversation("conv", "...");
        assert_eq!(describe(&conversation), "Conversation history");

        let prompt = ContextSource::prompt("p", "...");
        assert_eq!(describe(&prompt), "Prompt context");
    }

    #[tokio::test]
    async fn test_load_sets_vars_and_records_manifest() {
        let interp = Arc::new(FakeInterpreter::default());
        let mut externalizer = ContextExternalizer::new(interp.clone());

        let sources = vec![ContextSource::file("src/main.rs", "fn main() {}")];
        let loaded = externalizer.load(&sources).await.unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "src_main_rs");
        assert_eq!(loaded[0].token_estimate, estimate_tokens("fn main() {}"));
        assert_eq!(interp.vars.lock().unwrap().get("src_main_rs").unwrap(), "fn main() {}");
        assert_eq!(externalizer.manifest().variables.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_context_preserves_builtins() {
        let interp = Arc::new(FakeInterpreter::default());
        let mut externalizer = ContextExternalizer::new(interp.clone());
        externalizer.load(&[ContextSource::file("a.txt", "hello")]).await.unwrap();

        externalizer
            .clear_context(&["a_txt".to_string(), "FINAL".to_string(), "peek".to_string()])
            .await
            .unwrap();

        assert!(externalizer.manifest().variables.is_empty());
        assert!(interp.vars.lock().unwrap().get("a_txt").is_none());
    }

    #[test]
    fn test_manifest_total_tokens_and_warnings() {
        let mut manifest = Manifest::default();
        manifest.variables.push(VariableInfo {
            name: "big".to_string(),
            var_type: SourceType::File,
            size: WARN_SIZE_BYTES + 1,
            token_estimate: 10,
            description: "d".to_string(),
            source: None,
        });
        assert_eq!(manifest.total_tokens(), 10);
        assert_eq!(manifest.warnings().len(), 1);
    }
}
