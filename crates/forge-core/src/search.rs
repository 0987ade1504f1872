//! Web search augmentation
//!
//! A query is expanded into category-specific lookups, each carrying an
//! importance weight. Lookups run concurrently under a semaphore; failures
//! are reported and skipped. If everything comes back empty one refined
//! lookup is tried.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::ForgeError;
use crate::stream::{EventKind, EventSink};

/// One search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Results for one lookup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    #[serde(default)]
    pub results: Vec<SearchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A web search provider
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchResponse, ForgeError>;
}

/// Kinds of lookup a query is expanded into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchCategory {
    Recent,
    Official,
    Technical,
    Discussion,
}

/// Weight multiplier for the category matching the detected intent
pub const INTENT_BOOST: f32 = 1.5;

impl SearchCategory {
    pub const ALL: [SearchCategory; 4] = [
        SearchCategory::Recent,
        SearchCategory::Official,
        SearchCategory::Technical,
        SearchCategory::Discussion,
    ];

    pub fn weight(self) -> f32 {
        match self {
            Self::Recent => 1.0,
            Self::Official => 1.2,
            Self::Technical => 0.8,
            Self::Discussion => 0.6,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Self::Recent => "latest news updates current information",
            Self::Official => "official website documentation",
            Self::Technical => "technical details specifications features",
            Self::Discussion => "reddit forum discussion community",
        }
    }

    fn intent_signals(self) -> &'static [&'static str] {
        match self {
            Self::Recent => &[
                "latest", "current", "today", "recent", "news", "now", "this week", "update",
            ],
            Self::Official => &[
                "official", "documentation", "docs", "regulation", "standard", "policy",
            ],
            Self::Technical => &[
                "how to", "how do", "technical", "specification", "spec", "configure", "install",
            ],
            Self::Discussion => &[
                "opinion", "experience", "review", "recommend", "reddit", "forum", "community",
            ],
        }
    }
}

impl std::fmt::Display for SearchCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Recent => write!(f, "recent"),
            Self::Official => write!(f, "official"),
            Self::Technical => write!(f, "technical"),
            Self::Discussion => write!(f, "discussion"),
        }
    }
}

/// Search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_true")]
    pub refine_on_empty: bool,
}

fn default_max_queries() -> usize {
    3
}

fn default_concurrency() -> usize {
    3
}

fn default_true() -> bool {
    true
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_queries: default_max_queries(),
            concurrency: default_concurrency(),
            refine_on_empty: true,
        }
    }
}

/// A lookup to run
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedQuery {
    pub query: String,
    pub category: Option<SearchCategory>,
    pub weight: f32,
}

/// Strip search commands from a query
pub fn clean_query(query: &str) -> String {
    let mut cleaned = query.to_string();
    for command in ["/web", "/search"] {
        cleaned = cleaned.replace(command, " ");
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The category whose signals best match the query, if any
pub fn detect_intent(query: &str) -> Option<SearchCategory> {
    let lower = query.to_lowercase();
    let mut best: Option<(SearchCategory, usize)> = None;
    for category in SearchCategory::ALL {
        let hits = category
            .intent_signals()
            .iter()
            .filter(|s| lower.contains(*s))
            .count();
        if hits > 0 && best.is_none_or(|(_, b)| hits > b) {
            best = Some((category, hits));
        }
    }
    best.map(|(c, _)| c)
}

/// Expand a query into weighted lookups, highest weight first, capped at `max`
pub fn plan_queries(query: &str, max: usize) -> Vec<PlannedQuery> {
    let cleaned = clean_query(query);
    if cleaned.is_empty() {
        return Vec::new();
    }
    let intent = detect_intent(&cleaned);
    let mut planned: Vec<PlannedQuery> = SearchCategory::ALL
        .iter()
        .map(|&category| {
            let mut weight = category.weight();
            if intent == Some(category) {
                weight *= INTENT_BOOST;
            }
            PlannedQuery {
                query: format!("{} {}", cleaned, category.suffix()),
                category: Some(category),
                weight,
            }
        })
        .collect();
    planned.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    planned.truncate(max);
    planned
}

/// Plan lookups for several base queries. Each query is expanded on its own
/// and the expansions are interleaved, so every base query gets its best
/// lookup before any gets a second one.
pub fn plan_lookups(queries: &[String], max: usize) -> Vec<PlannedQuery> {
    let mut bases: Vec<String> = Vec::new();
    for query in queries {
        let cleaned = clean_query(query);
        if !cleaned.is_empty() && !bases.contains(&cleaned) {
            bases.push(cleaned);
        }
    }
    let mut per_base: Vec<std::vec::IntoIter<PlannedQuery>> = bases
        .iter()
        .map(|base| plan_queries(base, max).into_iter())
        .collect();

    let mut planned = Vec::new();
    while planned.len() < max {
        let before = planned.len();
        for expansions in per_base.iter_mut() {
            if planned.len() == max {
                break;
            }
            if let Some(next) = expansions.next() {
                planned.push(next);
            }
        }
        if planned.len() == before {
            break;
        }
    }
    planned
}

/// Results of one lookup with its importance weight
#[derive(Debug, Clone, Serialize)]
pub struct WeightedResults {
    pub query: String,
    pub category: Option<SearchCategory>,
    pub weight: f32,
    pub results: Vec<SearchResult>,
}

/// Everything the WebSearch step found
#[derive(Debug, Clone, Default, Serialize)]
pub struct WebSearchResult {
    pub original_query: String,
    pub lookups: Vec<WeightedResults>,
    pub failed: usize,
    pub refined: bool,
}

impl WebSearchResult {
    pub fn total_results(&self) -> usize {
        self.lookups.iter().map(|l| l.results.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_results() == 0
    }

    /// Unique result links in lookup order
    pub fn sources(&self) -> Vec<&str> {
        let mut links: Vec<&str> = Vec::new();
        for result in self.lookups.iter().flat_map(|l| &l.results) {
            if !links.contains(&result.link.as_str()) {
                links.push(&result.link);
            }
        }
        links
    }

    /// Prompt-ready rendering, heaviest lookups first
    pub fn render(&self) -> String {
        let mut lookups: Vec<&WeightedResults> =
            self.lookups.iter().filter(|l| !l.results.is_empty()).collect();
        lookups.sort_by(|a, b| b.weight.total_cmp(&a.weight));

        let mut out = String::new();
        for (i, lookup) in lookups.iter().enumerate() {
            out.push_str(&format!(
                "[Result {} (importance: {:.2})] {}\n",
                i + 1,
                lookup.weight,
                lookup.query
            ));
            for r in &lookup.results {
                out.push_str(&format!("- {} ({})", r.title, r.link));
                if !r.date.is_empty() {
                    out.push_str(&format!(" [{}]", r.date));
                }
                if let Some(source) = &r.source {
                    out.push_str(&format!(" via {}", source));
                }
                out.push_str(&format!(": {}\n", r.snippet));
            }
            out.push('\n');
        }
        out.trim_end().to_string()
    }
}

/// Runs planned lookups against a search backend
pub struct WebSearcher {
    backend: Arc<dyn SearchBackend>,
    config: SearchConfig,
}

impl WebSearcher {
    pub fn new(backend: Arc<dyn SearchBackend>, config: SearchConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Search the web for `queries`, the first being the primary one.
    /// Never fails; failed lookups are reported through `events` and skipped.
    pub async fn search(&self, queries: &[String], events: &EventSink) -> WebSearchResult {
        let cleaned = queries
            .iter()
            .map(|q| clean_query(q))
            .find(|q| !q.is_empty())
            .unwrap_or_default();
        let plan = plan_lookups(queries, self.config.max_queries);
        events
            .emit(
                crate::stream::StreamEvent::text(
                    EventKind::Status,
                    format!("Searching the web for '{}' ({} lookups)", cleaned, plan.len()),
                )
                .with_details(serde_json::json!({
                    "queries": plan.iter().map(|p| &p.query).collect::<Vec<_>>(),
                })),
            )
            .await;

        let mut result = WebSearchResult {
            original_query: cleaned.clone(),
            ..Default::default()
        };
        let (lookups, failed) = self.run_lookups(plan, events).await;
        result.lookups = lookups;
        result.failed = failed;

        if result.is_empty() && self.config.refine_on_empty && !cleaned.is_empty() {
            let refined = PlannedQuery {
                query: format!("{} information details", cleaned),
                category: None,
                weight: 1.0,
            };
            info!("WebSearcher: no results, retrying with '{}'", refined.query);
            events
                .status(format!("No results yet, refining search: '{}'", refined.query))
                .await;
            let (lookups, failed) = self.run_lookups(vec![refined], events).await;
            result.lookups.extend(lookups);
            result.failed += failed;
            result.refined = true;
        }

        events
            .emit(
                crate::stream::StreamEvent::text(
                    EventKind::Status,
                    format!("Web search found {} results", result.total_results()),
                )
                .with_details(serde_json::json!({
                    "sources": result.sources(),
                    "failed_lookups": result.failed,
                    "refined": result.refined,
                })),
            )
            .await;
        result
    }

    async fn run_lookups(
        &self,
        plan: Vec<PlannedQuery>,
        events: &EventSink,
    ) -> (Vec<WeightedResults>, usize) {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, planned) in plan.into_iter().enumerate() {
            let backend = self.backend.clone();
            let sem = semaphore.clone();
            let events = events.clone();
            tasks.spawn(async move {
                let outcome = match sem.acquire_owned().await {
                    Ok(_permit) => {
                        events.thinking(format!("Searching: {}", planned.query)).await;
                        backend.search(&planned.query).await
                    }
                    Err(_) => Err(ForgeError::Search {
                        query: planned.query.clone(),
                        message: "search pool closed".to_string(),
                    }),
                };
                (index, planned, outcome)
            });
        }

        let mut collected: Vec<(usize, WeightedResults)> = Vec::new();
        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, planned, Ok(response))) => {
                    if let Some(error) = response.error.filter(|_| response.results.is_empty()) {
                        failed += 1;
                        warn!("WebSearcher: lookup '{}' failed: {}", planned.query, error);
                        events
                            .error(format!("Search for '{}' failed: {}", planned.query, error))
                            .await;
                        continue;
                    }
                    debug!(
                        "WebSearcher: '{}' returned {} results",
                        planned.query,
                        response.results.len()
                    );
                    collected.push((
                        index,
                        WeightedResults {
                            query: planned.query,
                            category: planned.category,
                            weight: planned.weight,
                            results: response.results,
                        },
                    ));
                }
                Ok((_, planned, Err(e))) => {
                    failed += 1;
                    warn!("WebSearcher: lookup '{}' failed: {}", planned.query, e);
                    events.error(e.to_string()).await;
                }
                Err(e) => {
                    failed += 1;
                    warn!("WebSearcher: lookup task aborted: {}", e);
                    events.error(format!("Search task failed: {}", e)).await;
                }
            }
        }

        // Completion order is nondeterministic; keep plan order
        collected.sort_by_key(|(index, _)| *index);
        (collected.into_iter().map(|(_, r)| r).collect(), failed)
    }
}
