//! Two-stage task classifier.
//!
//! Stage 1 scores the query against a static table of weighted regex
//! patterns per task type; the winning type's score, normalized by the sum
//! of all type scores, is the confidence. Stage 2 is a model-backed
//! fallback invoked only when stage 1 lands in the uncertain middle band,
//! with an LRU-bounded cache keyed on the normalized query.

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};

/// The task type a query is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    Computational,
    Retrieval,
    Analytical,
    Transformational,
    Unknown,
}

impl TaskType {
    fn name(&self) -> &'static str {
        match self {
            TaskType::Computational => "Computational",
            TaskType::Retrieval => "Retrieval",
            TaskType::Analytical => "Analytical",
            TaskType::Transformational => "Transformational",
            TaskType::Unknown => "Unknown",
        }
    }

    fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "computational" => TaskType::Computational,
            "retrieval" => TaskType::Retrieval,
            "analytical" => TaskType::Analytical,
            "transformational" => TaskType::Transformational,
            _ => TaskType::Unknown,
        }
    }
}

/// The result of classifying a query, with both stages answering the same
/// sum type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub task_type: TaskType,
    pub confidence: f64,
    pub signals: Vec<String>,
}

struct WeightedPattern {
    regex: &'static Regex,
    task_type: TaskType,
    weight: f64,
    name: &'static str,
}

static COUNT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)how\s+many|count\b|number\s+of|sum\b|total\b|calculate").unwrap());
static AGGREGATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)average|maximum|minimum|\bmax\b|\bmin\b|percentage").unwrap());
static CODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)compute|extract\s+all|parse|iterate|loop\s+over").unwrap());

static LOOKUP_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)what\s+is|where\s+is|who\s+is|find\s+the|look\s*up").unwrap());
static QUOTE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)quote|exact\s+text|verbatim|the\s+secret|the\s+code"#).unwrap());
static SINGLE_FACT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(what|who|when|where)\b").unwrap());

static RELATIONSHIP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)relationship|connect|interact|depend|work(ed)?\s+with|related\s+to").unwrap()
});
static COMPARE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)compare|contrast|difference\s+between|versus|\bvs\b").unwrap());
static WHY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)why\b|explain|reason(ing)?\s+behind|cause").unwrap());

static PATTERNS: LazyLock<Vec<WeightedPattern>> = LazyLock::new(|| {
    vec![
        WeightedPattern { regex: &COUNT_PATTERN, task_type: TaskType::Computational, weight: 3.0, name: "count" },
        WeightedPattern { regex: &AGGREGATE_PATTERN, task_type: TaskType::Computational, weight: 2.0, name: "aggregate" },
        WeightedPattern { regex: &CODE_PATTERN, task_type: TaskType::Computational, weight: 2.0, name: "code_op" },
        WeightedPattern { regex: &LOOKUP_PATTERN, task_type: TaskType::Retrieval, weight: 2.0, name: "lookup" },
        WeightedPattern { regex: &QUOTE_PATTERN, task_type: TaskType::Retrieval, weight: 3.0, name: "quote" },
        WeightedPattern { regex: &SINGLE_FACT_PATTERN, task_type: TaskType::Retrieval, weight: 1.0, name: "single_fact" },
        WeightedPattern { regex: &RELATIONSHIP_PATTERN, task_type: TaskType::Analytical, weight: 3.0, name: "relationship" },
        WeightedPattern { regex: &COMPARE_PATTERN, task_type: TaskType::Analytical, weight: 2.0, name: "compare" },
        WeightedPattern { regex: &WHY_PATTERN, task_type: TaskType::Analytical, weight: 2.0, name: "why" },
    ]
});

/// Stage 1: static weighted-pattern scorer.
pub fn classify_rules(query: &str) -> Classification {
    let mut scores: HashMap<&'static str, f64> = HashMap::new();
    let mut signals: HashMap<&'static str, Vec<&'static str>> = HashMap::new();

    for pattern in PATTERNS.iter() {
        if pattern.regex.is_match(query) {
            *scores.entry(pattern.task_type.name()).or_insert(0.0) += pattern.weight;
            signals.entry(pattern.task_type.name()).or_default().push(pattern.name);
        }
    }

    let total: f64 = scores.values().sum();
    if total <= 0.0 {
        return Classification { task_type: TaskType::Unknown, confidence: 0.0, signals: Vec::new() };
    }

    let mut ranked: Vec<(&'static str, f64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then_with(|| a.0.cmp(b.0)));
    let (winner, winner_score) = ranked[0];

    Classification {
        task_type: TaskType::parse(winner),
        confidence: winner_score / total,
        signals: signals.remove(winner).unwrap_or_default().into_iter().map(str::to_string).collect(),
    }
}

const CACHE_CAPACITY: usize = 10_000;

struct FallbackCache {
    entries: HashMap<String, Classification>,
    order: Vec<String>,
}

impl FallbackCache {
    fn new() -> Self {
        Self { entries: HashMap::new(), order: Vec::new() }
    }

    fn get(&mut self, key: &str) -> Option<Classification> {
        if let Some(c) = self.entries.get(key).cloned() {
            self.order.retain(|k| k != key);
            self.order.push(key.to_string());
            Some(c)
        } else {
            None
        }
    }

    fn put(&mut self, key: String, value: Classification) {
        if self.entries.len() >= CACHE_CAPACITY && !self.entries.contains_key(&key) {
            if !self.order.is_empty() {
                let oldest = self.order.remove(0);
                self.entries.remove(&oldest);
            }
        }
        self.order.retain(|k| k != &key);
        self.order.push(key.clone());
        self.entries.insert(key, value);
    }
}

fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Two-stage classifier: rules first, model fallback in the uncertain band.
pub struct TaskClassifier {
    client: Option<std::sync::Arc<dyn LLMClient>>,
    accept_threshold: f64,
    min_fallback: f64,
    cache: Mutex<FallbackCache>,
}

impl TaskClassifier {
    pub fn new(client: Option<std::sync::Arc<dyn LLMClient>>) -> Self {
        Self {
            client,
            accept_threshold: 0.7,
            min_fallback: 0.4,
            cache: Mutex::new(FallbackCache::new()),
        }
    }

    pub fn with_thresholds(mut self, min_fallback: f64, accept_threshold: f64) -> Self {
        self.min_fallback = min_fallback;
        self.accept_threshold = accept_threshold;
        self
    }

    /// Classify a query, invoking the model fallback only when the rule
    /// stage lands in `[min_fallback, accept_threshold)`.
    pub async fn classify(&self, query: &str) -> Classification {
        let rule_result = classify_rules(query);

        if rule_result.confidence < self.min_fallback || rule_result.confidence >= self.accept_threshold {
            return rule_result;
        }

        let Some(client) = &self.client else {
            return rule_result;
        };

        let key = normalize_query(query);
        if let Some(cached) = self.cache.lock().unwrap().get(&key) {
            return cached;
        }

        match self.classify_with_model(client.as_ref(), query).await {
            Ok(classification) => {
                self.cache.lock().unwrap().put(key, classification.clone());
                classification
            }
            Err(_) => rule_result,
        }
    }

    async fn classify_with_model(&self, client: &dyn LLMClient, query: &str) -> Result<Classification> {
        let prompt = format!(
            "Classify the following query as exactly one of Computational, Retrieval, or \
             Analytical. Respond with JSON only: {{\"task_type\": ..., \"confidence\": ..., \
             \"reasoning\": ...}}.\n\nQuery: \"{query}\""
        );
        let request = CompletionRequest::new()
            .with_message(ChatMessage::user(&prompt))
            .with_temperature(0.0)
            .with_max_tokens(200);

        let response = client.complete(request).await?;
        parse_model_classification(&response.content).ok_or_else(|| {
            crate::error::Error::Internal("malformed classifier JSON".to_string())
        })
    }
}

#[derive(Deserialize)]
struct ModelClassificationJson {
    task_type: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

fn parse_model_classification(text: &str) -> Option<Classification> {
    let stripped = strip_code_fence(text.trim());
    let parsed: ModelClassificationJson = serde_json::from_str(stripped).ok()?;
    Some(Classification {
        task_type: TaskType::parse(&parsed.task_type),
        confidence: parsed.confidence.clamp(0.0, 1.0),
        signals: vec![parsed.reasoning],
    })
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_computational_counting_query() {
        let c = classify_rules("How many times does 'apple' appear?");
        assert_eq!(c.task_type, TaskType::Computational);
        assert!(c.confidence > 0.0);
    }

    #[test]
    fn test_retrieval_secret_query() {
        let c = classify_rules("What is the secret access code?");
        assert_eq!(c.task_type, TaskType::Retrieval);
    }

    #[test]
    fn test_analytical_relationship_query() {
        let c = classify_rules("Did Alice work with Bob?");
        assert_eq!(c.task_type, TaskType::Analytical);
    }

    #[test]
    fn test_unknown_on_no_match() {
        let c = classify_rules("hello there");
        assert_eq!(c.task_type, TaskType::Unknown);
        assert_eq!(c.confidence, 0.0);
    }

    #[test]
    fn test_ties_broken_lexicographically() {
        // Triggers Computational (aggregate), Retrieval (lookup), and
        // Analytical (why) each at weight 2.0; "Analytical" sorts first.
        let c = classify_rules("Please find the maximum and explain the cause.");
        assert_eq!(c.task_type, TaskType::Analytical);
    }

    #[test]
    fn test_normalize_query_collapses_whitespace() {
        assert_eq!(normalize_query("  Foo   Bar  "), "foo bar");
    }

    #[test]
    fn test_strip_code_fence() {
        let wrapped = "```json\n{\"task_type\": \"Retrieval\", \"confidence\": 0.9, \"reasoning\": \"x\"}\n```";
        let parsed = parse_model_classification(wrapped).unwrap();
        assert_eq!(parsed.task_type, TaskType::Retrieval);
        assert!((parsed.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_transformational_parses_from_model_json() {
        let wrapped = "{\"task_type\": \"Transformational\", \"confidence\": 0.8, \"reasoning\": \"rewrite\"}";
        let parsed = parse_model_classification(wrapped).unwrap();
        assert_eq!(parsed.task_type, TaskType::Transformational);
    }

    #[test]
    fn test_malformed_json_returns_none() {
        assert!(parse_model_classification("not json at all").is_none());
    }

    #[tokio::test]
    async fn test_classify_skips_fallback_when_rule_confident() {
        let classifier = TaskClassifier::new(None);
        let c = classifier.classify("How many apples are there?").await;
        assert_eq!(c.task_type, TaskType::Computational);
    }

    #[test]
    fn test_fallback_cache_evicts_lru() {
        let mut cache = FallbackCache::new();
        for i in 0..(CACHE_CAPACITY + 1) {
            cache.put(
                format!("q{i}"),
                Classification { task_type: TaskType::Unknown, confidence: 0.5, signals: vec![] },
            );
        }
        assert!(cache.get("q0").is_none());
        assert!(cache.get(&format!("q{CACHE_CAPACITY}")).is_some());
    }
}
