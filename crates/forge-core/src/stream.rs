//! Streaming event protocol
//!
//! Every producer (workflow steps, specialists, web search) writes through an
//! [`EventSink`]. The [`StreamAggregator`] owns the terminal `done` event and
//! guarantees it is sent exactly once. Callers read an [`EventStream`], which
//! cancels the in-flight request when dropped.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ForgeError;

/// Capacity of the per-request event channel
pub const EVENT_BUFFER: usize = 100;

/// Event kinds on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Thinking,
    Status,
    Delegation,
    Review,
    Revision,
    Content,
    Workflow,
    Error,
    Done,
}

/// Kinds emitted by older producers that are folded into `status`
const LEGACY_STATUS_KINDS: &[&str] = &[
    "analyzing",
    "analysis_complete",
    "searching",
    "web_search",
    "processing",
    "calling_llm",
    "assistants_found",
    "complete",
];

impl EventKind {
    /// Map a wire name, including legacy names, to a kind
    pub fn from_wire(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        let kind = match name.as_str() {
            "thinking" => Self::Thinking,
            "status" => Self::Status,
            "delegation" => Self::Delegation,
            "review" => Self::Review,
            "revision" => Self::Revision,
            "content" | "response" => Self::Content,
            "workflow" => Self::Workflow,
            "error" => Self::Error,
            "done" => Self::Done,
            other if LEGACY_STATUS_KINDS.contains(&other) => Self::Status,
            _ => return None,
        };
        Some(kind)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Thinking => "thinking",
            Self::Status => "status",
            Self::Delegation => "delegation",
            Self::Review => "review",
            Self::Revision => "revision",
            Self::Content => "content",
            Self::Workflow => "workflow",
            Self::Error => "error",
            Self::Done => "done",
        };
        write!(f, "{}", s)
    }
}

/// Event payload: plain text or a structured object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventContent {
    Text(String),
    Json(Value),
}

/// Why a stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoneReason {
    Completed,
    Cancelled,
    Failed,
}

impl std::fmt::Display for DoneReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One normalized event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<EventContent>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl StreamEvent {
    pub fn text(kind: EventKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: Some(EventContent::Text(content.into())),
            agent: None,
            details: None,
        }
    }

    pub fn json(kind: EventKind, content: Value) -> Self {
        Self {
            kind,
            content: Some(EventContent::Json(content)),
            agent: None,
            details: None,
        }
    }

    pub fn done(reason: DoneReason) -> Self {
        Self {
            kind: EventKind::Done,
            content: None,
            agent: None,
            details: Some(serde_json::json!({ "reason": reason })),
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Text payload, if the content is a string
    pub fn content_text(&self) -> Option<&str> {
        match &self.content {
            Some(EventContent::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Reason carried by a `done` event
    pub fn done_reason(&self) -> Option<DoneReason> {
        if self.kind != EventKind::Done {
            return None;
        }
        self.details
            .as_ref()
            .and_then(|d| d.get("reason"))
            .and_then(|r| serde_json::from_value(r.clone()).ok())
    }

    /// Normalize a raw producer payload.
    ///
    /// Objects with a recognised `type` become events; legacy kinds are mapped;
    /// anything else turns into an `error` event carrying the raw payload.
    pub fn from_value(raw: Value) -> Self {
        let Value::Object(map) = &raw else {
            return match raw {
                Value::String(s) => Self::from_raw(&s),
                other => Self::malformed(other, "payload is not an object"),
            };
        };

        let Some(kind_name) = map.get("type").and_then(Value::as_str) else {
            return Self::malformed(raw, "missing event type");
        };
        let Some(kind) = EventKind::from_wire(kind_name) else {
            let reason = format!("unknown event type '{}'", kind_name);
            return Self::malformed(raw, &reason);
        };

        let content = match map.get("content") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(EventContent::Text(s.clone())),
            Some(v @ (Value::Object(_) | Value::Array(_))) => Some(EventContent::Json(v.clone())),
            Some(other) => Some(EventContent::Text(other.to_string())),
        };
        let agent = map.get("agent").and_then(Value::as_str).map(String::from);
        let details = map.get("details").filter(|d| !d.is_null()).cloned();

        Self {
            kind,
            content,
            agent,
            details,
        }
    }

    /// Normalize a raw string: JSON objects are parsed, plain text becomes content
    pub fn from_raw(raw: &str) -> Self {
        let trimmed = raw.trim_start();
        if trimmed.starts_with('{') {
            return match serde_json::from_str::<Value>(raw) {
                Ok(value @ Value::Object(_)) => Self::from_value(value),
                _ => Self::malformed(Value::String(raw.to_string()), "invalid JSON payload"),
            };
        }
        Self::text(EventKind::Content, raw)
    }

    fn malformed(raw: Value, reason: &str) -> Self {
        debug!("StreamEvent: malformed payload ({})", reason);
        Self::text(EventKind::Error, format!("Malformed event: {}", reason))
            .with_details(serde_json::json!({ "raw": raw }))
    }
}

/// Producer-side handle. Cheap to clone; tags events with an agent id.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
    agent: Option<String>,
    done: Arc<AtomicBool>,
}

impl EventSink {
    /// A sink whose events are tagged with `agent` unless they carry their own
    pub fn for_agent(&self, agent: impl Into<String>) -> Self {
        Self {
            tx: self.tx.clone(),
            agent: Some(agent.into()),
            done: self.done.clone(),
        }
    }

    pub fn agent(&self) -> Option<&str> {
        self.agent.as_deref()
    }

    /// Whether the stream has already terminated
    pub fn is_closed(&self) -> bool {
        self.done.load(Ordering::SeqCst) || self.tx.is_closed()
    }

    /// Send an event. Returns false if it was dropped.
    pub async fn emit(&self, mut event: StreamEvent) -> bool {
        if event.kind == EventKind::Done {
            debug!("EventSink: dropping producer-emitted done event");
            return false;
        }
        if self.done.load(Ordering::SeqCst) {
            warn!(
                "EventSink: dropping {} event offered after done (agent {:?})",
                event.kind, self.agent
            );
            return false;
        }
        if event.agent.is_none() {
            event.agent = self.agent.clone();
        }
        self.tx.send(event).await.is_ok()
    }

    pub async fn thinking(&self, text: impl Into<String>) -> bool {
        self.emit(StreamEvent::text(EventKind::Thinking, text)).await
    }

    pub async fn status(&self, text: impl Into<String>) -> bool {
        self.emit(StreamEvent::text(EventKind::Status, text)).await
    }

    pub async fn content(&self, text: impl Into<String>) -> bool {
        self.emit(StreamEvent::text(EventKind::Content, text)).await
    }

    pub async fn error(&self, text: impl Into<String>) -> bool {
        self.emit(StreamEvent::text(EventKind::Error, text)).await
    }

    pub async fn structured(&self, kind: EventKind, content: Value) -> bool {
        self.emit(StreamEvent::json(kind, content)).await
    }
}

/// Owns the terminal event for one request
#[derive(Debug)]
pub struct StreamAggregator {
    sink: EventSink,
}

impl StreamAggregator {
    /// Create the aggregator and the consumer stream for one request
    pub fn channel(cancel: CancellationToken) -> (Self, EventStream) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let sink = EventSink {
            tx,
            agent: None,
            done: Arc::new(AtomicBool::new(false)),
        };
        let stream = EventStream {
            rx,
            cancel,
            finished: false,
        };
        (Self { sink }, stream)
    }

    /// An untagged sink for workflow-level events
    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    pub fn is_done(&self) -> bool {
        self.sink.done.load(Ordering::SeqCst)
    }

    /// Run one producer, catching its failure at the boundary.
    ///
    /// A failure becomes an `error` event tagged with the producer's agent id
    /// and `None` is returned; the stream keeps going.
    pub async fn run_producer<T, F>(&self, agent: &str, producer: F) -> Option<T>
    where
        F: Future<Output = Result<T, ForgeError>>,
    {
        match producer.await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("StreamAggregator: producer '{}' failed: {}", agent, e);
                self.sink
                    .emit(
                        StreamEvent::text(EventKind::Error, e.to_string())
                            .with_agent(agent)
                            .with_details(serde_json::json!({ "fatal": e.is_fatal() })),
                    )
                    .await;
                None
            }
        }
    }

    /// Emit the single terminal `done`. Later calls are ignored.
    pub async fn finish(&self, reason: DoneReason) -> bool {
        if self.sink.done.swap(true, Ordering::SeqCst) {
            warn!("StreamAggregator: done already sent, ignoring {}", reason);
            return false;
        }
        debug!("StreamAggregator: stream finished ({})", reason);
        // The consumer may already be gone; that is not an error here
        let _ = self.sink.tx.send(StreamEvent::done(reason)).await;
        true
    }
}

/// Consumer side of one request. Dropping it cancels the request.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    finished: bool,
}

impl EventStream {
    /// Next event; `None` once `done` has been delivered
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        let event = self.rx.recv().await?;
        if event.kind == EventKind::Done {
            self.finished = true;
        }
        Some(event)
    }

    /// Request cancellation; the stream still ends with `done(cancelled)`
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drain every remaining event
    pub async fn collect(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            events.push(event);
        }
        events
    }

    /// Drain the stream and concatenate the text of every `content` event
    pub async fn collect_content(self) -> String {
        self.collect()
            .await
            .iter()
            .filter(|e| e.kind == EventKind::Content)
            .filter_map(|e| e.content_text())
            .collect()
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.kind == EventKind::Done {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            other => other,
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel.cancel();
        }
    }
}
