//! Request entry point
//!
//! Builds the per-request event stream, runs either the manager workflow or
//! a forced specialist on a background task, and owns the single terminal
//! `done` event, including when the consumer cancels or drops the stream.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::agents::{Agent, AgentDescriptor, AgentRegistry, AgentRequest};
use crate::analysis::{AnalysisConfig, QueryAnalyzer};
use crate::error::ForgeError;
use crate::models::{BackendPool, ModelSelector};
use crate::router::{AgentRouter, RouterConfig};
use crate::search::{SearchBackend, SearchConfig, WebSearcher};
use crate::stream::{DoneReason, EventKind, EventStream, StreamAggregator, StreamEvent};
use crate::types::RoutingQuery;
use crate::workflow::{MANAGER_AGENT_ID, ManagerWorkflow, WorkflowConfig};

/// Core settings, one table per component
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// What a background request task runs
enum Job {
    Workflow(RoutingQuery),
    Forced {
        agent: Arc<dyn Agent>,
        query: RoutingQuery,
    },
}

pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    selector: Arc<ModelSelector>,
    backends: Arc<BackendPool>,
    router: AgentRouter,
    workflow: Arc<ManagerWorkflow>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        selector: Arc<ModelSelector>,
        backends: Arc<BackendPool>,
        search: Option<Arc<dyn SearchBackend>>,
        config: OrchestratorConfig,
    ) -> Self {
        let router = AgentRouter::new(config.router.clone());
        let mut workflow = ManagerWorkflow::new(
            registry.clone(),
            router.clone(),
            selector.clone(),
            backends.clone(),
            config.workflow,
        )
        .with_analyzer(QueryAnalyzer::new(config.analysis));
        match search {
            Some(backend) => {
                workflow = workflow.with_searcher(Arc::new(WebSearcher::new(backend, config.search)));
            }
            None => info!("Orchestrator: no search backend, web search disabled"),
        }

        info!(
            "Orchestrator: {} agents, providers {:?}",
            registry.len(),
            backends.providers()
        );
        Self {
            registry,
            selector,
            backends,
            router,
            workflow: Arc::new(workflow),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn selector(&self) -> &Arc<ModelSelector> {
        &self.selector
    }

    pub fn backends(&self) -> &Arc<BackendPool> {
        &self.backends
    }

    /// Registered agents in registration order
    pub fn list_agents(&self) -> Vec<&AgentDescriptor> {
        self.registry.descriptors().collect()
    }

    /// Start processing a request and return its event stream.
    ///
    /// A forced route to an unknown agent fails here, before any event is
    /// produced. Everything after this point is reported in-stream.
    pub fn route_and_process(&self, query: RoutingQuery) -> Result<EventStream, ForgeError> {
        let forced = query.forced_agent().map(str::to_string);
        let job = match forced {
            Some(id) => {
                let agent = self.router.route_forced(&id, &self.registry)?;
                info!("Orchestrator[{}]: forced route to '{}'", query.id, agent.id());
                Job::Forced { agent, query }
            }
            None => {
                info!("Orchestrator[{}]: routing through manager workflow", query.id);
                Job::Workflow(query)
            }
        };

        let cancel = CancellationToken::new();
        let (aggregator, stream) = StreamAggregator::channel(cancel.clone());
        let aggregator = Arc::new(aggregator);
        let workflow = self.workflow.clone();

        tokio::spawn(async move {
            let worker_aggregator = aggregator.clone();
            let mut worker =
                tokio::spawn(async move { run_job(job, &workflow, &worker_aggregator).await });

            let reason = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    worker.abort();
                    let _ = (&mut worker).await;
                    info!("Orchestrator: request cancelled");
                    DoneReason::Cancelled
                }
                joined = &mut worker => match joined {
                    Ok(reason) => reason,
                    Err(e) => {
                        error!("Orchestrator: request task failed: {}", e);
                        aggregator
                            .sink()
                            .emit(
                                StreamEvent::text(EventKind::Error, "Internal error while processing the request")
                                    .with_agent(MANAGER_AGENT_ID)
                                    .with_details(json!({ "fatal": true })),
                            )
                            .await;
                        DoneReason::Failed
                    }
                },
            };
            aggregator.finish(reason).await;
        });

        Ok(stream)
    }

    /// Run a request to completion and return the delivered text
    pub async fn process_query(&self, query: RoutingQuery) -> Result<String, ForgeError> {
        Ok(self.route_and_process(query)?.collect_content().await)
    }
}

async fn run_job(job: Job, workflow: &ManagerWorkflow, aggregator: &StreamAggregator) -> DoneReason {
    match job {
        Job::Workflow(query) => match workflow.run(&query, aggregator).await {
            Ok(_) => DoneReason::Completed,
            Err(e) => {
                error!("Orchestrator[{}]: workflow aborted: {}", query.id, e);
                fatal(aggregator, MANAGER_AGENT_ID, &e).await;
                DoneReason::Failed
            }
        },
        Job::Forced { agent, query } => {
            let events = aggregator.sink().for_agent(agent.id());
            let request = AgentRequest {
                emit_content: true,
                ..AgentRequest::for_query(&query)
            };
            match agent.process(request, &events).await {
                Ok(response) => {
                    aggregator
                        .sink()
                        .for_agent(MANAGER_AGENT_ID)
                        .structured(
                            EventKind::Workflow,
                            json!({
                                "request_id": query.id,
                                "forced": true,
                                "agent": agent.id(),
                                "response_chars": response.chars().count(),
                            }),
                        )
                        .await;
                    DoneReason::Completed
                }
                Err(e) => {
                    warn!("Orchestrator[{}]: forced agent '{}' failed: {}", query.id, agent.id(), e);
                    fatal(aggregator, agent.id(), &e).await;
                    DoneReason::Failed
                }
            }
        }
    }
}

async fn fatal(aggregator: &StreamAggregator, agent: &str, e: &ForgeError) {
    aggregator
        .sink()
        .emit(
            StreamEvent::text(EventKind::Error, e.to_string())
                .with_agent(agent)
                .with_details(json!({ "fatal": true })),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::SpecialistAgent;
    use crate::models::{BackendChunk, ModelCatalog, Provider};
    use crate::test_support::{MockBackend, MockSearch};
    use crate::search::SearchResponse;
    use crate::stream::EventSink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Agent that never answers, for cancellation tests
    struct StuckAgent(AgentDescriptor);

    #[async_trait]
    impl Agent for StuckAgent {
        fn descriptor(&self) -> &AgentDescriptor {
            &self.0
        }

        async fn process(&self, _req: AgentRequest, events: &EventSink) -> Result<String, ForgeError> {
            events.thinking("Thinking very hard...").await;
            std::future::pending::<()>().await;
            Ok(String::new())
        }
    }

    /// Search backend whose lookups never finish; counts started and dropped lookups
    #[derive(Default)]
    struct HangingSearch {
        started: Arc<AtomicUsize>,
        dropped: Arc<AtomicUsize>,
    }

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl SearchBackend for HangingSearch {
        async fn search(&self, _query: &str) -> Result<SearchResponse, ForgeError> {
            let _guard = DropCounter(self.dropped.clone());
            self.started.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    async fn wait_for(counter: &AtomicUsize, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while counter.load(Ordering::SeqCst) < expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("counter never reached the expected value");
    }

    fn orchestrator(backend: MockBackend) -> Orchestrator {
        orchestrator_with_search(backend, Arc::new(MockSearch::new()))
    }

    fn orchestrator_with_search(backend: MockBackend, search: Arc<dyn SearchBackend>) -> Orchestrator {
        let selector = Arc::new(ModelSelector::new(
            Arc::new(ModelCatalog::builtin()),
            [Provider::OpenAi],
        ));
        let backends = Arc::new(BackendPool::new().with_backend(Arc::new(backend)));

        let mut safety = AgentDescriptor::new("safety_auditor", "Safety Auditor");
        safety.keywords = vec!["hazard".to_string(), "ppe".to_string()];
        let mut general = AgentDescriptor::new("general_assistant", "General Assistant");
        general.keywords = vec!["anything".to_string()];

        let mut registry = AgentRegistry::new();
        registry
            .register(Arc::new(SpecialistAgent::new(safety, selector.clone(), backends.clone())))
            .unwrap();
        registry
            .register(Arc::new(SpecialistAgent::new(general, selector.clone(), backends.clone())))
            .unwrap();
        registry
            .register(Arc::new(StuckAgent(AgentDescriptor::new("stuck", "Stuck"))))
            .unwrap();
        registry.set_fallback("general_assistant").unwrap();

        Orchestrator::new(
            Arc::new(registry),
            selector,
            backends,
            Some(search),
            OrchestratorConfig::default(),
        )
    }

    fn answering() -> MockBackend {
        MockBackend::chunks(Provider::OpenAi, &["Wear PPE ", "and review the hazard log daily."])
    }

    fn count(events: &[StreamEvent], kind: EventKind) -> usize {
        events.iter().filter(|e| e.kind == kind).count()
    }

    #[tokio::test]
    async fn test_workflow_stream_ends_with_single_done() {
        let orch = orchestrator(answering());
        let events = orch
            .route_and_process(RoutingQuery::new("hazard ppe checklist"))
            .unwrap()
            .collect()
            .await;

        assert_eq!(count(&events, EventKind::Done), 1);
        let last = events.last().unwrap();
        assert_eq!(last.done_reason(), Some(DoneReason::Completed));
        assert_eq!(count(&events, EventKind::Delegation), 1);
        assert!(count(&events, EventKind::Content) > 0);
    }

    #[tokio::test]
    async fn test_process_query_returns_delivered_text() {
        let orch = orchestrator(answering());
        let text = orch.process_query(RoutingQuery::new("hello")).await.unwrap();
        assert_eq!(text, "Wear PPE and review the hazard log daily.");
    }

    #[tokio::test]
    async fn test_forced_route_streams_specialist() {
        let orch = orchestrator(answering());
        let query = RoutingQuery::new("anything at all").with_agent("Safety Auditor");
        let events = orch.route_and_process(query).unwrap().collect().await;

        assert_eq!(count(&events, EventKind::Delegation), 0);
        let content: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventKind::Content)
            .collect();
        assert!(!content.is_empty());
        assert!(content.iter().all(|e| e.agent.as_deref() == Some("safety_auditor")));
        assert_eq!(count(&events, EventKind::Workflow), 1);
        assert_eq!(events.last().unwrap().done_reason(), Some(DoneReason::Completed));
    }

    #[tokio::test]
    async fn test_forced_unknown_agent_fails_before_stream() {
        let orch = orchestrator(answering());
        let result = orch.route_and_process(RoutingQuery::new("hi").with_agent("ghost"));
        assert!(matches!(result, Err(ForgeError::AgentNotFound(id)) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_forced_agent_failure_ends_failed() {
        let orch = orchestrator(MockBackend::failing(Provider::OpenAi, "rate limited"));
        let query = RoutingQuery::new("hazard").with_agent("safety_auditor");
        let events = orch.route_and_process(query).unwrap().collect().await;

        let error = events.iter().find(|e| e.kind == EventKind::Error).unwrap();
        assert_eq!(error.agent.as_deref(), Some("safety_auditor"));
        assert_eq!(count(&events, EventKind::Done), 1);
        assert_eq!(events.last().unwrap().done_reason(), Some(DoneReason::Failed));
    }

    #[tokio::test]
    async fn test_cancel_emits_cancelled_done() {
        let orch = orchestrator(answering());
        let mut stream = orch
            .route_and_process(RoutingQuery::new("wait").with_agent("stuck"))
            .unwrap();

        let first = stream.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::Thinking);
        stream.cancel();

        let mut rest = Vec::new();
        while let Some(event) = stream.recv().await {
            rest.push(event);
        }
        assert_eq!(count(&rest, EventKind::Done), 1);
        assert_eq!(rest.last().unwrap().done_reason(), Some(DoneReason::Cancelled));
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_during_web_search_aborts_lookups() {
        let search = Arc::new(HangingSearch::default());
        let orch = orchestrator_with_search(answering(), search.clone());
        let mut stream = orch
            .route_and_process(RoutingQuery::new("/web latest interest rates"))
            .unwrap();

        wait_for(&search.started, 3).await;
        assert_eq!(search.dropped.load(Ordering::SeqCst), 0);
        stream.cancel();

        let mut events = Vec::new();
        while let Some(event) = stream.recv().await {
            events.push(event);
        }
        assert_eq!(count(&events, EventKind::Done), 1);
        assert_eq!(events.last().unwrap().done_reason(), Some(DoneReason::Cancelled));
        assert_eq!(count(&events, EventKind::Content), 0);

        wait_for(&search.dropped, 3).await;
        assert_eq!(search.started.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_producer_failure_mid_stream_still_single_done() {
        let backend = MockBackend::new(Provider::OpenAi, |call| {
            if call.system_prompt().unwrap_or_default().contains("Safety Auditor") {
                vec![
                    BackendChunk::Response("partial".to_string()),
                    BackendChunk::Error("connection reset".to_string()),
                ]
            } else {
                vec![BackendChunk::Response(
                    "A complete answer assembled without the specialist.".to_string(),
                )]
            }
        });
        let orch = orchestrator(backend);
        let events = orch
            .route_and_process(RoutingQuery::new("hazard ppe checklist"))
            .unwrap()
            .collect()
            .await;

        assert!(count(&events, EventKind::Error) >= 1);
        assert_eq!(count(&events, EventKind::Done), 1);
        assert_eq!(events.last().unwrap().done_reason(), Some(DoneReason::Completed));
    }

    #[test]
    fn test_config_defaults_from_empty_table() {
        let config: OrchestratorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.workflow.max_revisions, 5);
        assert_eq!(config.router.threshold, 0.5);
        assert_eq!(config.search.concurrency, 3);
        assert!(!config.analysis.use_model);
    }

    #[test]
    fn test_list_agents_in_registration_order() {
        let orch = orchestrator(answering());
        let ids: Vec<_> = orch.list_agents().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["safety_auditor", "general_assistant", "stuck"]);
    }
}
