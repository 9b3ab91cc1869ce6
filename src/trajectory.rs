//! Trajectory events for observable proof sessions.
//!
//! The orchestrator emits one event per executed phase. Emitters decide what
//! to do with them:
//! - CLI: log lines as the session progresses
//! - Batch runs: JSON export for replay and analysis
//! - Tests: collect and assert on the exact phase sequence

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

use crate::stage::{StageKind, Verification};

/// Types of trajectory events emitted during a proof session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrajectoryEventType {
    /// Session created, loop about to plan
    SessionStart,
    /// Plan stage returned
    PlanComplete,
    /// Prove stage returned a new candidate
    ProveComplete,
    /// Verify stage returned
    VerifyResult,
    /// Critique stage returned
    CritiqueComplete,
    /// Candidate verified; session done
    Final,
    /// Iteration limit reached without a verified candidate
    Exhausted,
    /// A stage failed and the session aborted
    Error,
}

impl std::fmt::Display for TrajectoryEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SessionStart => "SESSION_START",
            Self::PlanComplete => "PLAN_COMPLETE",
            Self::ProveComplete => "PROVE_COMPLETE",
            Self::VerifyResult => "VERIFY_RESULT",
            Self::CritiqueComplete => "CRITIQUE_COMPLETE",
            Self::Final => "FINAL",
            Self::Exhausted => "EXHAUSTED",
            Self::Error => "ERROR",
        };
        write!(f, "{}", s)
    }
}

/// A trajectory event emitted during a proof session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryEvent {
    /// Type of the event
    pub event_type: TrajectoryEventType,
    /// Critique iterations completed when the event was emitted
    pub iteration: u32,
    /// Human-readable content describing the event
    pub content: String,
    /// Event-specific metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
}

impl TrajectoryEvent {
    /// Create a new trajectory event.
    pub fn new(
        event_type: TrajectoryEventType,
        iteration: u32,
        content: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            iteration,
            content: content.into(),
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    /// Add metadata to the event.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Get a metadata value.
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.as_ref()?.get(key)
    }

    pub fn session_start(session_id: impl Into<String>, iteration_limit: u32) -> Self {
        let session_id = session_id.into();
        Self::new(
            TrajectoryEventType::SessionStart,
            0,
            format!("Session {} started", session_id),
        )
        .with_metadata("session_id", session_id)
        .with_metadata("iteration_limit", iteration_limit)
    }

    pub fn plan_complete(plan: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::PlanComplete, 0, plan)
    }

    pub fn prove_complete(iteration: u32, candidate: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::ProveComplete, iteration, candidate)
    }

    pub fn verify_result(iteration: u32, verification: &Verification) -> Self {
        Self::new(
            TrajectoryEventType::VerifyResult,
            iteration,
            verification.log.clone(),
        )
        .with_metadata("success", verification.success)
        .with_metadata("timed_out", verification.timed_out)
    }

    pub fn critique_complete(iteration: u32, hint: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::CritiqueComplete, iteration, hint)
    }

    pub fn final_candidate(iteration: u32, candidate: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::Final, iteration, candidate)
    }

    pub fn exhausted(iteration: u32, last_log: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::Exhausted, iteration, last_log)
    }

    pub fn error(iteration: u32, stage: StageKind, error: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::Error, iteration, error)
            .with_metadata("stage", stage.to_string())
    }

    /// Check if this is an error event.
    pub fn is_error(&self) -> bool {
        self.event_type == TrajectoryEventType::Error
    }

    /// Check if this event ends a session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.event_type,
            TrajectoryEventType::Final | TrajectoryEventType::Exhausted | TrajectoryEventType::Error
        )
    }

    /// Format as a single-line log entry.
    pub fn as_log_line(&self) -> String {
        format!(
            "[{}] #{} {}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.iteration,
            self.event_type,
            self.content.lines().next().unwrap_or("")
        )
    }
}

/// Export format for trajectory data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// JSON Lines format (one event per line)
    JsonLines,
    /// Pretty-printed JSON array
    JsonPretty,
    /// Markdown summary
    Markdown,
}

/// Serialize a list of events to the specified format.
pub fn export_events(events: &[TrajectoryEvent], format: ExportFormat) -> String {
    match format {
        ExportFormat::JsonLines => events
            .iter()
            .filter_map(|e| serde_json::to_string(e).ok())
            .collect::<Vec<_>>()
            .join("\n"),
        ExportFormat::JsonPretty => {
            serde_json::to_string_pretty(events).unwrap_or_else(|_| "[]".to_string())
        }
        ExportFormat::Markdown => events_to_markdown(events),
    }
}

fn events_to_markdown(events: &[TrajectoryEvent]) -> String {
    let mut md = String::from("# Proof Session Trajectory\n\n");

    for event in events {
        md.push_str(&format!(
            "**{}** (iteration {}) `{}`\n",
            event.event_type, event.iteration, event.timestamp
        ));
        if !event.content.is_empty() {
            md.push_str("\n```\n");
            md.push_str(&event.content);
            md.push_str("\n```\n");
        }
        md.push('\n');
    }

    md
}

/// Trait for trajectory event emitters.
pub trait TrajectoryEmitter: Send + Sync {
    /// Emit a trajectory event.
    fn emit(&self, event: TrajectoryEvent);
}

/// Broadcast-based trajectory emitter.
pub struct BroadcastEmitter {
    sender: broadcast::Sender<TrajectoryEvent>,
}

impl BroadcastEmitter {
    /// Create new broadcast emitter with channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to trajectory events.
    pub fn subscribe(&self) -> broadcast::Receiver<TrajectoryEvent> {
        self.sender.subscribe()
    }

    /// Get number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl TrajectoryEmitter for BroadcastEmitter {
    fn emit(&self, event: TrajectoryEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}

/// Collecting emitter that stores events in a Vec.
#[derive(Debug, Default, Clone)]
pub struct CollectingEmitter {
    events: Arc<RwLock<Vec<TrajectoryEvent>>>,
}

impl CollectingEmitter {
    /// Create new collecting emitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get collected events.
    pub fn events(&self) -> Vec<TrajectoryEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Event types in emission order.
    pub fn event_types(&self) -> Vec<TrajectoryEventType> {
        self.events().iter().map(|e| e.event_type).collect()
    }

    /// Clear collected events.
    pub fn clear(&self) {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl TrajectoryEmitter for CollectingEmitter {
    fn emit(&self, event: TrajectoryEvent) {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Emitter that writes each event to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEmitter;

impl TrajectoryEmitter for LogEmitter {
    fn emit(&self, event: TrajectoryEvent) {
        if event.is_error() {
            tracing::error!(iteration = event.iteration, "{}", event.as_log_line());
        } else {
            tracing::info!(iteration = event.iteration, "{}", event.as_log_line());
        }
    }
}

/// Null emitter that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEmitter;

impl TrajectoryEmitter for NullEmitter {
    fn emit(&self, _event: TrajectoryEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = TrajectoryEvent::prove_complete(2, "theorem t : True := trivial");
        assert_eq!(event.event_type, TrajectoryEventType::ProveComplete);
        assert_eq!(event.iteration, 2);
        assert_eq!(event.content, "theorem t : True := trivial");
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_verify_result_metadata() {
        let event = TrajectoryEvent::verify_result(0, &Verification::failed("unknown tactic"));
        assert_eq!(event.get_metadata("success"), Some(&Value::Bool(false)));
        assert_eq!(event.get_metadata("timed_out"), Some(&Value::Bool(false)));
        assert_eq!(event.content, "unknown tactic");

        let timeout = TrajectoryEvent::verify_result(0, &Verification::timed_out("Timeout"));
        assert_eq!(timeout.get_metadata("timed_out"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_error_event_records_stage() {
        let event = TrajectoryEvent::error(1, StageKind::Critique, "rate limited");
        assert!(event.is_error());
        assert!(event.is_terminal());
        assert_eq!(
            event.get_metadata("stage"),
            Some(&Value::String("critique".to_string()))
        );
    }

    #[test]
    fn test_event_type_display() {
        assert_eq!(TrajectoryEventType::SessionStart.to_string(), "SESSION_START");
        assert_eq!(
            TrajectoryEventType::CritiqueComplete.to_string(),
            "CRITIQUE_COMPLETE"
        );
    }

    #[test]
    fn test_collecting_emitter() {
        let emitter = CollectingEmitter::new();
        emitter.emit(TrajectoryEvent::plan_complete("plan"));
        emitter.emit(TrajectoryEvent::final_candidate(0, "proof"));

        assert_eq!(
            emitter.event_types(),
            vec![TrajectoryEventType::PlanComplete, TrajectoryEventType::Final]
        );

        emitter.clear();
        assert!(emitter.events().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_emitter() {
        let emitter = BroadcastEmitter::new(8);
        let mut rx = emitter.subscribe();
        assert_eq!(emitter.subscriber_count(), 1);

        emitter.emit(TrajectoryEvent::session_start("abc", 3));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, TrajectoryEventType::SessionStart);
        assert_eq!(event.get_metadata("iteration_limit"), Some(&Value::from(3)));
    }

    #[test]
    fn test_export_formats() {
        let events = vec![
            TrajectoryEvent::plan_complete("plan"),
            TrajectoryEvent::exhausted(2, "error: unsolved goals"),
        ];

        let lines = export_events(&events, ExportFormat::JsonLines);
        assert_eq!(lines.lines().count(), 2);
        assert!(lines.contains("\"EXHAUSTED\""));

        let pretty = export_events(&events, ExportFormat::JsonPretty);
        let parsed: Vec<TrajectoryEvent> = serde_json::from_str(&pretty).unwrap();
        assert_eq!(parsed.len(), 2);

        let md = export_events(&events, ExportFormat::Markdown);
        assert!(md.starts_with("# Proof Session Trajectory"));
        assert!(md.contains("unsolved goals"));
    }
}
