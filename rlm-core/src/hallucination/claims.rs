//! Claim extraction from LLM responses.
//!
//! Splits a response into sentences and keeps only the ones that assert
//! something — interrogatives, imperative headers, and meta-commentary
//! ("Let me explain...") are filtered out before classification.

use regex::Regex;
use std::collections::HashSet;

use super::types::{Claim, ClaimCategory};

/// Extracts atomic claims from a block of text.
pub struct ClaimExtractor {
    min_length: usize,
    max_length: usize,
    categories: Option<HashSet<ClaimCategory>>,
    factual_signals: Vec<String>,
    hedge_words: Vec<String>,
}

impl Default for ClaimExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaimExtractor {
    pub fn new() -> Self {
        Self {
            min_length: 10,
            max_length: 500,
            categories: None,
            factual_signals: vec![
                "is".into(), "are".into(), "was".into(), "were".into(), "has".into(),
                "have".into(), "does".into(), "returns".into(), "contains".into(),
                "implements".into(), "calls".into(), "uses".into(), "requires".into(),
                "depends".into(),
            ],
            hedge_words: vec![
                "might".into(), "could".into(), "possibly".into(), "perhaps".into(),
                "probably".into(), "likely".into(), "seems".into(), "appears".into(),
                "suggests".into(), "i think".into(), "i believe".into(), "may".into(),
            ],
        }
    }

    pub fn with_min_length(mut self, len: usize) -> Self {
        self.min_length = len;
        self
    }

    pub fn with_max_length(mut self, len: usize) -> Self {
        self.max_length = len;
        self
    }

    pub fn with_categories(mut self, categories: Vec<ClaimCategory>) -> Self {
        self.categories = Some(categories.into_iter().collect());
        self
    }

    /// Extract claims from a response.
    pub fn extract(&self, response: &str) -> Vec<Claim> {
        let mut claims = Vec::new();
        let sentences = self.split_sentences(response);

        for (idx, sentence) in sentences.iter().enumerate() {
            let trimmed = sentence.trim();

            if trimmed.len() < self.min_length || trimmed.len() > self.max_length {
                continue;
            }
            if trimmed.ends_with('?') {
                continue;
            }
            if self.is_meta_commentary(trimmed) {
                continue;
            }

            let category = self.classify_claim(trimmed);
            if let Some(ref allowed) = self.categories {
                if !allowed.contains(&category) {
                    continue;
                }
            }

            let confidence = self.estimate_confidence(trimmed);
            let span = self.find_span(response, trimmed, idx);
            let is_hedged = self.is_hedged(trimmed);

            let mut claim = Claim::new(trimmed, category)
                .with_confidence(if is_hedged { confidence * 0.5 } else { confidence });

            if let Some((start, end)) = span {
                claim = claim.with_span(start, end);
            }
            if is_hedged {
                let mut meta = std::collections::HashMap::new();
                meta.insert("hedged".to_string(), serde_json::json!(true));
                claim.metadata = Some(meta);
            }

            claims.push(claim);
        }

        claims
    }

    fn split_sentences(&self, text: &str) -> Vec<String> {
        let text = text
            .replace("e.g.", "e.g")
            .replace("i.e.", "i.e")
            .replace("etc.", "etc")
            .replace("vs.", "vs")
            .replace("Mr.", "Mr")
            .replace("Ms.", "Ms")
            .replace("Dr.", "Dr");

        let re = Regex::new(r"[.!?]+\s+|\n\n+").unwrap();
        let sentences: Vec<String> = re.split(&text).map(|s| s.trim().to_string()).collect();

        sentences
            .into_iter()
            .map(|s| {
                s.replace("e.g", "e.g.")
                    .replace("i.e", "i.e.")
                    .replace(" etc", " etc.")
                    .replace(" vs", " vs.")
            })
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn classify_claim(&self, text: &str) -> ClaimCategory {
        let lower = text.to_lowercase();

        if lower.contains("function") || lower.contains("method") || lower.contains("returns")
            || lower.contains("calls") || lower.contains("implementation") || lower.contains("class")
            || lower.contains("module") || lower.contains("struct")
        {
            return ClaimCategory::CodeBehavior;
        }
        if Regex::new(r"\b\d+\b").unwrap().is_match(&lower)
            || lower.contains("percent") || lower.contains("bytes")
            || lower.contains("milliseconds") || lower.contains("seconds")
        {
            return ClaimCategory::Numerical;
        }
        if lower.contains("depends on") || lower.contains("related to") || lower.contains("connects to")
            || lower.contains("references") || lower.contains("imports") || lower.contains("requires")
        {
            return ClaimCategory::Relational;
        }
        if lower.contains("before") || lower.contains("after") || lower.contains("when")
            || lower.contains("during") || lower.contains("then") || lower.contains("first")
            || lower.contains("finally")
        {
            return ClaimCategory::Temporal;
        }
        if lower.contains("you want") || lower.contains("you need") || lower.contains("your")
            || lower.contains("user")
        {
            return ClaimCategory::UserIntent;
        }
        if lower.contains("i'll") || lower.contains("let me") || lower.contains("i should")
            || lower.contains("reasoning") || lower.contains("approach")
        {
            return ClaimCategory::MetaReasoning;
        }
        for signal in &self.factual_signals {
            if lower.contains(&signal.to_lowercase()) {
                return ClaimCategory::Factual;
            }
        }
        ClaimCategory::Unknown
    }

    /// Estimate how specific a claim reads, used as its `confidence` field.
    fn estimate_confidence(&self, text: &str) -> f64 {
        let lower = text.to_lowercase();
        let mut confidence = 0.5;

        let identifier_re = Regex::new(r"\b[A-Z][a-zA-Z0-9_]*\b").unwrap();
        confidence += (identifier_re.find_iter(text).count() as f64 * 0.05).min(0.2);

        let number_re = Regex::new(r"\b\d+\b").unwrap();
        confidence += (number_re.find_iter(text).count() as f64 * 0.1).min(0.2);

        if text.contains('/') || text.contains('\\') || text.contains("://") {
            confidence += 0.1;
        }
        if lower.contains("some") || lower.contains("many") || lower.contains("few") || lower.contains("several") {
            confidence -= 0.1;
        }
        if lower.contains("all") || lower.contains("every") || lower.contains("always") || lower.contains("never") {
            confidence += 0.15;
        }
        if lower.contains("more") || lower.contains("less") || lower.contains("better") || lower.contains("worse") {
            confidence += 0.05;
        }

        confidence.clamp(0.1, 0.95)
    }

    fn is_hedged(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.hedge_words.iter().any(|w| lower.contains(&w.to_lowercase()))
    }

    fn is_meta_commentary(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        const META: &[&str] = &[
            "let me", "i'll", "i will", "here's", "here is", "now let's",
            "to summarize", "in summary", "as you can see", "note that",
            "keep in mind", "remember that",
        ];
        META.iter().any(|p| lower.starts_with(p))
    }

    fn find_span(&self, original: &str, sentence: &str, hint_idx: usize) -> Option<(usize, usize)> {
        let search_start = if hint_idx > 0 {
            original.match_indices(sentence).next().map(|(i, _)| i).unwrap_or(0)
        } else {
            0
        };
        original[search_start..]
            .find(sentence)
            .map(|i| (search_start + i, search_start + i + sentence.len()))
    }

    /// Extract only high-confidence claims (for efficient verification).
    pub fn extract_high_confidence(&self, response: &str, threshold: f64) -> Vec<Claim> {
        self.extract(response).into_iter().filter(|c| c.confidence >= threshold).collect()
    }
}
