//! Query analysis for the Analyze step
//!
//! Heuristics first (fast, free). When enabled, a model is asked for a JSON
//! assessment and the heuristic result is kept as the fallback.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agents::{contains_term, tokenize};
use crate::models::{BackendPool, ChatMessage, ModelRequirements, ModelSelector};
use crate::search::clean_query;

/// Phrases that explicitly request a web search
pub const WEB_TRIGGERS: &[&str] = &[
    "/web",
    "/search",
    "search the web",
    "look up online",
    "check online",
    "find on the internet",
];

const GREETINGS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "thanks",
    "thank you",
    "bye",
    "good morning",
    "good afternoon",
    "good evening",
];

/// Words that may follow a greeting without turning it into a request
const GREETING_FILLER: &[&str] = &[
    "there", "all", "everyone", "team", "folks", "you", "so", "much", "again", "a", "lot", "bot",
    "assistant", "guys", "friend",
];

const LIVE_SIGNALS: &[&str] = &[
    "latest",
    "news",
    "current",
    "today",
    "this week",
    "right now",
    "trending",
    "price of",
    "stock price",
    "weather",
];

const COMPLEX_SIGNALS: &[&str] = &[
    "compare",
    "analyze",
    "summarize all",
    "relationship between",
    "what are the implications",
    "plan for",
    "step by step",
    "research",
];

/// Rough size of the task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

/// Where an analysis came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSource {
    Heuristic,
    Model,
}

/// Result of the Analyze step
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnalysis {
    pub complexity: Complexity,
    pub is_greeting: bool,
    /// Whether any specialist vocabulary appears in the query
    pub in_domain: bool,
    pub explicit_web_search: bool,
    pub live_information: bool,
    /// 0-1 confidence that the query can be answered without the web
    pub confidence_without_web: f32,
    pub primary_expertise: Option<String>,
    pub secondary_expertise: Vec<String>,
    pub search_queries: Vec<String>,
    pub source: AnalysisSource,
}

impl QueryAnalysis {
    /// Skip delegation and answer directly
    pub fn direct_response(&self) -> bool {
        self.is_greeting || !self.in_domain
    }
}

/// Analysis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Ask a model for a JSON analysis, falling back to heuristics
    #[serde(default)]
    pub use_model: bool,
    /// Below this confidence, a query without a specialist answer is searched
    #[serde(default = "default_web_threshold")]
    pub web_confidence_threshold: f32,
    #[serde(default = "default_analysis_capabilities")]
    pub model_capabilities: Vec<String>,
}

fn default_web_threshold() -> f32 {
    0.6
}

fn default_analysis_capabilities() -> Vec<String> {
    vec!["analysis".to_string()]
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            use_model: false,
            web_confidence_threshold: default_web_threshold(),
            model_capabilities: default_analysis_capabilities(),
        }
    }
}

/// Whether the query explicitly asks for a web search
pub fn has_web_trigger(query: &str) -> bool {
    let lower = query.to_lowercase();
    WEB_TRIGGERS.iter().any(|t| lower.contains(t))
}

/// A greeting phrase followed by nothing but filler ("hey there", "thanks so much")
fn is_greeting(tokens: &[String]) -> bool {
    GREETINGS.iter().any(|g| {
        let greeting = tokenize(g);
        tokens.starts_with(&greeting)
            && tokens[greeting.len()..]
                .iter()
                .all(|t| GREETING_FILLER.contains(&t.as_str()))
    })
}

fn vocabulary_hits(tokens: &[String], vocabulary: &[String]) -> Vec<String> {
    vocabulary
        .iter()
        .filter(|term| contains_term(tokens, term))
        .cloned()
        .collect()
}

/// Heuristic classification (no model call)
pub fn classify_heuristic(query: &str, vocabulary: &[String]) -> QueryAnalysis {
    let lower = query.to_lowercase();
    let tokens = tokenize(query);
    let word_count = query.split_whitespace().count();

    let hits = vocabulary_hits(&tokens, vocabulary);
    let in_domain = !hits.is_empty();
    // Specialist vocabulary makes it a request, however it opens
    let greeting = !in_domain && is_greeting(&tokens);
    let explicit_web_search = has_web_trigger(query);
    let live_information = LIVE_SIGNALS.iter().any(|s| lower.contains(s));

    let complexity = if COMPLEX_SIGNALS.iter().any(|s| lower.contains(s)) || word_count > 25 {
        Complexity::Complex
    } else if word_count <= 5 {
        Complexity::Simple
    } else {
        Complexity::Moderate
    };

    let confidence_without_web = if greeting {
        0.95
    } else if explicit_web_search || live_information {
        0.4
    } else if in_domain {
        0.8
    } else {
        0.7
    };

    let mut hits = hits.into_iter();
    QueryAnalysis {
        complexity,
        is_greeting: greeting,
        in_domain,
        explicit_web_search,
        live_information,
        confidence_without_web,
        primary_expertise: hits.next(),
        secondary_expertise: hits.collect(),
        search_queries: vec![clean_query(query)],
        source: AnalysisSource::Heuristic,
    }
}

/// Shape requested from the model
#[derive(Debug, Deserialize)]
struct ModelAssessment {
    #[serde(default)]
    needs_specialists: Option<bool>,
    #[serde(default)]
    primary_expertise_needed: Option<String>,
    #[serde(default)]
    secondary_expertise_needed: Vec<String>,
    #[serde(default)]
    search_queries: Vec<String>,
    #[serde(default)]
    confidence_without_web: Option<f32>,
    #[serde(default)]
    complexity: Option<Complexity>,
}

const ANALYSIS_SYSTEM_PROMPT: &str =
    "You are a query analyst. Respond with a single JSON object and nothing else.";

fn analysis_prompt(query: &str) -> String {
    format!(
        "Analyze this query: \"{}\"\n\n\
         Respond in JSON with these fields:\n\
         - needs_specialists: boolean, does this need specialist knowledge\n\
         - primary_expertise_needed: string\n\
         - secondary_expertise_needed: array of strings\n\
         - search_queries: array of strings, specific web queries if a search would help\n\
         - confidence_without_web: number 0-1, confidence in answering without a web search\n\
         - complexity: one of \"simple\", \"moderate\", \"complex\"",
        query
    )
}

/// Pull the outermost JSON object out of a model response
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Merge a model assessment over the heuristic baseline.
/// Greeting and explicit-trigger detection always come from the heuristics.
fn merge(baseline: QueryAnalysis, assessment: ModelAssessment) -> QueryAnalysis {
    let in_domain = if baseline.is_greeting {
        false
    } else {
        assessment.needs_specialists.unwrap_or(baseline.in_domain)
    };
    let search_queries = if assessment.search_queries.is_empty() {
        baseline.search_queries
    } else {
        assessment.search_queries
    };
    QueryAnalysis {
        complexity: assessment.complexity.unwrap_or(baseline.complexity),
        is_greeting: baseline.is_greeting,
        in_domain,
        explicit_web_search: baseline.explicit_web_search,
        live_information: baseline.live_information,
        confidence_without_web: assessment
            .confidence_without_web
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(baseline.confidence_without_web),
        primary_expertise: assessment
            .primary_expertise_needed
            .filter(|p| !p.trim().is_empty())
            .or(baseline.primary_expertise),
        secondary_expertise: assessment.secondary_expertise_needed,
        search_queries,
        source: AnalysisSource::Model,
    }
}

/// Runs the Analyze step
#[derive(Debug, Clone, Default)]
pub struct QueryAnalyzer {
    config: AnalysisConfig,
}

impl QueryAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyze a query. Never fails: model problems fall back to heuristics.
    pub async fn analyze(
        &self,
        query: &str,
        vocabulary: &[String],
        selector: &ModelSelector,
        backends: &BackendPool,
    ) -> QueryAnalysis {
        let baseline = classify_heuristic(query, vocabulary);
        if !self.config.use_model || baseline.is_greeting {
            debug!("QueryAnalyzer: heuristic analysis {:?}", baseline.complexity);
            return baseline;
        }

        let requirements =
            ModelRequirements::new(&self.config.model_capabilities).with_temperature(Some(0.3));
        let model = selector.select(&requirements);
        let messages = vec![
            ChatMessage::system(ANALYSIS_SYSTEM_PROMPT),
            ChatMessage::user(analysis_prompt(query)),
        ];

        let text = match backends.complete(&model, messages).await {
            Ok(text) => text,
            Err(e) => {
                debug!("QueryAnalyzer: model analysis failed, using heuristic: {}", e);
                return baseline;
            }
        };
        let parsed = extract_json(&text)
            .and_then(|json| serde_json::from_str::<ModelAssessment>(json).ok());
        match parsed {
            Some(assessment) => merge(baseline, assessment),
            None => {
                debug!("QueryAnalyzer: unparseable model analysis, using heuristic");
                baseline
            }
        }
    }
}
