//! Manager workflow
//!
//! A per-request state machine:
//!
//! ```text
//! Analyze -> DirectResponse | Delegate -> [WebSearch] -> Synthesize
//!         -> Review <-> Revise (bounded) -> Deliver
//! ```
//!
//! Every step returns an explicit outcome and every move goes through the
//! transition table, so an illegal sequence is an error rather than a
//! silent detour.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::agents::{AgentRegistry, AgentRequest};
use crate::analysis::{QueryAnalysis, QueryAnalyzer};
use crate::error::ForgeError;
use crate::models::{BackendPool, ChatMessage, ModelRequirements, ModelSelector};
use crate::review::{ReviewChecklist, ReviewConfig, ReviewOutcome};
use crate::router::AgentRouter;
use crate::search::{WebSearchResult, WebSearcher};
use crate::stream::{EventKind, EventSink, StreamAggregator, StreamEvent};
use crate::types::RoutingQuery;

/// Agent id used on workflow-level events
pub const MANAGER_AGENT_ID: &str = "manager";
/// Agent id used on web search events
pub const WEB_SEARCH_AGENT_ID: &str = "web_search";

const FALLBACK_REPLY: &str = "I'm sorry, I wasn't able to put together an answer to that request.";

const SYNTHESIS_SYSTEM_PROMPT: &str = "You are the manager of a team of specialist assistants. \
Combine the material you are given into one clear, accurate answer for the user. \
Prefer specialist input for domain facts, use web results for current information and cite their links, \
and say plainly when something could not be confirmed.";

/// Workflow steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Analyze,
    DirectResponse,
    Delegate,
    WebSearch,
    Synthesize,
    Review,
    Revise,
    Deliver,
    Error,
}

impl WorkflowStep {
    /// The transition table
    pub fn can_transition_to(self, next: WorkflowStep) -> bool {
        use WorkflowStep::*;
        if next == Error {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Analyze, DirectResponse | Delegate)
                | (DirectResponse | Delegate, WebSearch | Synthesize)
                | (WebSearch, Synthesize)
                | (Synthesize, Review)
                | (Review, Revise | Deliver)
                | (Revise, Review)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Deliver | Self::Error)
    }
}

impl std::fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Analyze => "analyze",
            Self::DirectResponse => "direct_response",
            Self::Delegate => "delegate",
            Self::WebSearch => "web_search",
            Self::Synthesize => "synthesize",
            Self::Review => "review",
            Self::Revise => "revise",
            Self::Deliver => "deliver",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Workflow settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_max_revisions")]
    pub max_revisions: u32,
    /// Capabilities required of the model that writes the final answer
    #[serde(default = "default_synthesis_capabilities")]
    pub synthesis_capabilities: Vec<String>,
    #[serde(default)]
    pub review: ReviewConfig,
}

fn default_max_revisions() -> u32 {
    5
}

fn default_synthesis_capabilities() -> Vec<String> {
    vec!["conversation".to_string()]
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_revisions: default_max_revisions(),
            synthesis_capabilities: default_synthesis_capabilities(),
            review: ReviewConfig::default(),
        }
    }
}

/// A specialist's answer and who gave it
#[derive(Debug, Clone, Serialize)]
pub struct SpecialistResponse {
    pub agent_id: String,
    pub response: String,
}

/// Per-request workflow state. Never shared between requests.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub request_id: String,
    pub step: WorkflowStep,
    pub history: Vec<WorkflowStep>,
    pub analysis: Option<QueryAnalysis>,
    pub specialist: Option<SpecialistResponse>,
    pub web_search: Option<WebSearchResult>,
    pub draft: String,
    pub last_review: Option<ReviewOutcome>,
    pub revision_count: u32,
    pub max_revisions: u32,
    pub started_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(request_id: impl Into<String>, max_revisions: u32) -> Self {
        Self {
            request_id: request_id.into(),
            step: WorkflowStep::Analyze,
            history: vec![WorkflowStep::Analyze],
            analysis: None,
            specialist: None,
            web_search: None,
            draft: String::new(),
            last_review: None,
            revision_count: 0,
            max_revisions,
            started_at: Utc::now(),
        }
    }

    /// Move to `next`, enforcing the transition table and the revision cap
    pub fn transition(&mut self, next: WorkflowStep) -> Result<(), ForgeError> {
        let capped = next == WorkflowStep::Revise && !self.can_revise();
        if capped || !self.step.can_transition_to(next) {
            return Err(ForgeError::InvalidTransition {
                from: self.step,
                to: next,
            });
        }
        if next == WorkflowStep::Revise {
            self.revision_count += 1;
        }
        debug!(
            "ManagerWorkflow[{}]: {} -> {}",
            self.request_id, self.step, next
        );
        self.step = next;
        self.history.push(next);
        Ok(())
    }

    pub fn can_revise(&self) -> bool {
        self.revision_count < self.max_revisions
    }

    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }

    /// Step summary for the final `workflow` event
    pub fn summary(&self) -> serde_json::Value {
        json!({
            "request_id": self.request_id,
            "steps": self.history,
            "specialist": self.specialist.as_ref().map(|s| &s.agent_id),
            "web_results": self.web_search.as_ref().map(|w| w.total_results()),
            "revisions": self.revision_count,
            "elapsed_ms": self.elapsed_ms(),
        })
    }
}

/// Sequences analysis, delegation, search, synthesis and review for one request
pub struct ManagerWorkflow {
    registry: Arc<AgentRegistry>,
    router: AgentRouter,
    selector: Arc<ModelSelector>,
    backends: Arc<BackendPool>,
    searcher: Option<Arc<WebSearcher>>,
    analyzer: QueryAnalyzer,
    checklist: ReviewChecklist,
    config: WorkflowConfig,
}

impl ManagerWorkflow {
    pub fn new(
        registry: Arc<AgentRegistry>,
        router: AgentRouter,
        selector: Arc<ModelSelector>,
        backends: Arc<BackendPool>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            registry,
            router,
            selector,
            backends,
            searcher: None,
            analyzer: QueryAnalyzer::default(),
            checklist: ReviewChecklist::new(config.review.clone()),
            config,
        }
    }

    pub fn with_searcher(mut self, searcher: Arc<WebSearcher>) -> Self {
        self.searcher = Some(searcher);
        self
    }

    pub fn with_analyzer(mut self, analyzer: QueryAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Run the whole workflow, emitting through `aggregator`.
    ///
    /// Only fatal errors are returned; everything else is reported as an
    /// event and the workflow carries on with less information.
    pub async fn run(
        &self,
        query: &RoutingQuery,
        aggregator: &StreamAggregator,
    ) -> Result<WorkflowState, ForgeError> {
        let events = aggregator.sink().for_agent(MANAGER_AGENT_ID);
        let mut state = WorkflowState::new(query.id.clone(), self.config.max_revisions);
        info!("ManagerWorkflow[{}]: started", state.request_id);

        let analysis = self.analyze(query, &events).await;
        let direct = analysis.direct_response();
        state.analysis = Some(analysis);

        if direct {
            state.transition(WorkflowStep::DirectResponse)?;
            events.status("Answering directly").await;
        } else {
            state.transition(WorkflowStep::Delegate)?;
            self.delegate(&mut state, query, aggregator, &events).await;
        }

        if self.needs_web_search(&state) {
            match &self.searcher {
                Some(searcher) => {
                    state.transition(WorkflowStep::WebSearch)?;
                    let search_events = aggregator.sink().for_agent(WEB_SEARCH_AGENT_ID);
                    let queries = Self::search_queries(&state, query);
                    state.web_search = Some(searcher.search(&queries, &search_events).await);
                }
                None => {
                    warn!("ManagerWorkflow[{}]: web search requested but not configured", state.request_id);
                    events.status("Web search is not configured; continuing without it").await;
                }
            }
        }

        state.transition(WorkflowStep::Synthesize)?;
        let draft = match self.synthesize(&state, query, None, &events).await {
            Ok(draft) => draft,
            Err(e) => {
                warn!("ManagerWorkflow[{}]: synthesis failed: {}", state.request_id, e);
                events.error(format!("Synthesis failed: {}", e)).await;
                state
                    .specialist
                    .as_ref()
                    .map(|s| s.response.clone())
                    .unwrap_or_default()
            }
        };
        state.draft = draft;

        self.review_loop(&mut state, query, aggregator, &events).await?;

        state.transition(WorkflowStep::Deliver)?;
        self.deliver(&state, &events).await;
        info!(
            "ManagerWorkflow[{}]: delivered after {} revisions in {}ms",
            state.request_id,
            state.revision_count,
            state.elapsed_ms()
        );
        Ok(state)
    }

    async fn analyze(&self, query: &RoutingQuery, events: &EventSink) -> QueryAnalysis {
        events.thinking("Analyzing the request...").await;
        let vocabulary = self.registry.domain_vocabulary();
        let analysis = self
            .analyzer
            .analyze(&query.text, &vocabulary, &self.selector, &self.backends)
            .await;
        let details = serde_json::to_value(&analysis).unwrap_or_default();
        events
            .emit(StreamEvent::text(EventKind::Status, "Analysis complete").with_details(details))
            .await;
        analysis
    }

    /// Try routing candidates in order until one answers
    async fn delegate(
        &self,
        state: &mut WorkflowState,
        query: &RoutingQuery,
        aggregator: &StreamAggregator,
        events: &EventSink,
    ) {
        let mut candidates: Vec<(String, f32, bool)> = self
            .router
            .route(&query.text, &self.registry)
            .into_iter()
            .map(|c| (c.agent_id, c.score, false))
            .collect();
        if candidates.is_empty() {
            match self.registry.fallback_id() {
                Some(id) => candidates.push((id.to_string(), 0.0, true)),
                None => {
                    events.status("No specialist matched this request").await;
                    return;
                }
            }
        }

        for (attempt, (agent_id, score, fallback)) in candidates.into_iter().enumerate() {
            let Some(agent) = self.registry.get(&agent_id) else {
                continue;
            };
            events
                .structured(
                    EventKind::Delegation,
                    json!({
                        "agent": agent_id,
                        "name": agent.descriptor().display_name,
                        "score": score,
                        "attempt": attempt + 1,
                        "fallback": fallback,
                    }),
                )
                .await;

            let request = Self::agent_request(query, None);
            let answer = aggregator
                .run_producer(&agent_id, agent.process(request, events))
                .await;
            match answer {
                Some(response) if !response.trim().is_empty() => {
                    debug!("ManagerWorkflow[{}]: '{}' answered", state.request_id, agent_id);
                    state.specialist = Some(SpecialistResponse { agent_id, response });
                    return;
                }
                Some(_) => {
                    events
                        .emit(
                            StreamEvent::text(EventKind::Error, "Specialist returned an empty answer")
                                .with_agent(agent_id.clone()),
                        )
                        .await;
                }
                None => {}
            }
        }
        events.status("No specialist could answer; continuing without one").await;
    }

    fn needs_web_search(&self, state: &WorkflowState) -> bool {
        let Some(analysis) = &state.analysis else {
            return false;
        };
        analysis.explicit_web_search
            || (state.specialist.is_none()
                && analysis.confidence_without_web < self.analyzer.config().web_confidence_threshold)
    }

    /// Queries suggested by the analysis, or the raw query text
    fn search_queries(state: &WorkflowState, query: &RoutingQuery) -> Vec<String> {
        state
            .analysis
            .as_ref()
            .map(|a| a.search_queries.clone())
            .filter(|q| !q.is_empty())
            .unwrap_or_else(|| vec![query.text.clone()])
    }

    fn agent_request(query: &RoutingQuery, context: Option<String>) -> AgentRequest {
        AgentRequest {
            context,
            ..AgentRequest::for_query(query)
        }
    }

    fn synthesis_prompt(state: &WorkflowState, query: &RoutingQuery, revision: Option<(&str, &str)>) -> String {
        let mut prompt = format!("User query: {}\n", query.text);
        let brief = state.analysis.as_ref().is_some_and(|a| a.is_greeting);

        if let Some(specialist) = &state.specialist {
            prompt.push_str(&format!(
                "\nSpecialist ({}) response:\n{}\n",
                specialist.agent_id, specialist.response
            ));
        }
        if let Some(web) = state.web_search.as_ref().filter(|w| !w.is_empty()) {
            prompt.push_str(&format!(
                "\nWeb search results (with importance weights):\n{}\n",
                web.render()
            ));
        }
        if state.specialist.is_none() && state.web_search.as_ref().is_none_or(|w| w.is_empty()) {
            if brief {
                prompt.push_str("\nReply briefly and warmly.\n");
            } else {
                prompt.push_str("\nAnswer directly from your own knowledge.\n");
            }
        }
        if let Some((draft, feedback)) = revision {
            prompt.push_str(&format!(
                "\nYour previous draft was:\n{}\n\nRevise it to address this review feedback:\n{}\n",
                draft, feedback
            ));
        }
        prompt
    }

    async fn synthesize(
        &self,
        state: &WorkflowState,
        query: &RoutingQuery,
        revision: Option<(&str, &str)>,
        events: &EventSink,
    ) -> Result<String, ForgeError> {
        let requirements = ModelRequirements::new(&self.config.synthesis_capabilities)
            .with_preferred(query.preferred_model.clone())
            .with_temperature(query.temperature)
            .with_hints(query.model_type, query.model_category);
        let model = self.selector.select(&requirements);
        events
            .emit(
                StreamEvent::text(
                    EventKind::Thinking,
                    format!("Writing the answer with {}...", model.name),
                )
                .with_details(json!({
                    "model": model.name,
                    "provider": model.provider,
                    "selection": model.path,
                })),
            )
            .await;

        let messages = vec![
            ChatMessage::system(SYNTHESIS_SYSTEM_PROMPT),
            ChatMessage::user(Self::synthesis_prompt(state, query, revision)),
        ];
        self.backends.complete(&model, messages).await
    }

    fn review_draft(&self, state: &WorkflowState) -> ReviewOutcome {
        let brief = state.analysis.as_ref().is_some_and(|a| a.is_greeting);
        if brief {
            self.checklist.review_brief(&state.draft)
        } else {
            self.checklist.review(&state.draft)
        }
    }

    /// Review, revising until the draft passes or the cap is reached.
    /// Leaves the best draft seen in `state.draft`.
    async fn review_loop(
        &self,
        state: &mut WorkflowState,
        query: &RoutingQuery,
        aggregator: &StreamAggregator,
        events: &EventSink,
    ) -> Result<(), ForgeError> {
        let mut best: Option<(usize, String)> = None;
        loop {
            state.transition(WorkflowStep::Review)?;
            let outcome = self.review_draft(state);
            events
                .structured(
                    EventKind::Review,
                    json!({
                        "passed": outcome.passed,
                        "failures": outcome.failures,
                        "revision": state.revision_count,
                    }),
                )
                .await;

            if best.as_ref().is_none_or(|(failures, _)| outcome.failures.len() < *failures) {
                best = Some((outcome.failures.len(), state.draft.clone()));
            }
            let verdict = outcome.verdict();
            let feedback = outcome.feedback();
            state.last_review = Some(outcome);

            let Err(rejection) = verdict else {
                return Ok(());
            };
            debug!("ManagerWorkflow[{}]: {}", state.request_id, rejection);
            if !state.can_revise() {
                warn!(
                    "ManagerWorkflow[{}]: revision limit reached, last review: {}",
                    state.request_id, rejection
                );
                events
                    .status(format!(
                        "Revision limit ({}) reached; delivering the best draft",
                        state.max_revisions
                    ))
                    .await;
                if let Some((_, draft)) = best {
                    state.draft = draft;
                }
                return Ok(());
            }

            state.transition(WorkflowStep::Revise)?;
            events
                .structured(
                    EventKind::Revision,
                    json!({
                        "revision": state.revision_count,
                        "max_revisions": state.max_revisions,
                        "feedback": feedback,
                    }),
                )
                .await;

            if let Some(revised) = self.revise(state, query, &feedback, aggregator, events).await {
                state.draft = revised;
            }
        }
    }

    /// Re-invoke whoever is responsible for the draft with the review feedback
    async fn revise(
        &self,
        state: &WorkflowState,
        query: &RoutingQuery,
        feedback: &str,
        aggregator: &StreamAggregator,
        events: &EventSink,
    ) -> Option<String> {
        let specialist = state
            .specialist
            .as_ref()
            .and_then(|s| self.registry.get(&s.agent_id));

        let revised = match specialist {
            Some(agent) => {
                let context = state
                    .web_search
                    .as_ref()
                    .filter(|w| !w.is_empty())
                    .map(|w| w.render());
                let mut request = Self::agent_request(query, context);
                request.feedback = Some(feedback.to_string());
                request.previous_draft = Some(state.draft.clone());
                aggregator
                    .run_producer(agent.id(), agent.process(request, events))
                    .await
            }
            None => {
                let revision = Some((state.draft.as_str(), feedback));
                aggregator
                    .run_producer(
                        MANAGER_AGENT_ID,
                        self.synthesize(state, query, revision, events),
                    )
                    .await
            }
        };
        revised.filter(|r| !r.trim().is_empty())
    }

    async fn deliver(&self, state: &WorkflowState, events: &EventSink) {
        let draft = if state.draft.trim().is_empty() {
            FALLBACK_REPLY
        } else {
            state.draft.as_str()
        };
        for paragraph in draft.split_inclusive("\n\n") {
            events.content(paragraph).await;
        }
        events.structured(EventKind::Workflow, state.summary()).await;
    }
}
