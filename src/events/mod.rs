//! Lifecycle events and event handling.
//!
//! The runner emits an event when a workflow starts and finishes and when
//! each node starts, completes, fails, or is skipped.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::types::{NodeId, RunId, WorkflowId};

/// Lifecycle events emitted during execution.
#[derive(Debug, Clone)]
pub enum Event {
    /// A submitted workflow began running.
    WorkflowStarted {
        workflow_id: WorkflowId,
        run_id: RunId,
        timestamp: Instant,
    },

    /// A workflow run finished (successfully or with failures).
    WorkflowCompleted {
        workflow_id: WorkflowId,
        run_id: RunId,
        success: bool,
        duration: Duration,
        timestamp: Instant,
    },

    /// A node's task was invoked.
    NodeStarted {
        node_id: NodeId,
        run_id: RunId,
        task: String,
        timestamp: Instant,
    },

    /// A node's task returned a result.
    NodeCompleted {
        node_id: NodeId,
        run_id: RunId,
        duration: Duration,
        /// Update keys handed to the children.
        update_keys: Vec<String>,
        timestamp: Instant,
    },

    /// A node failed, either in its task or while merging parent updates.
    NodeFailed {
        node_id: NodeId,
        run_id: RunId,
        error: String,
        timestamp: Instant,
    },

    /// A node never ran because an ancestor failed.
    NodeSkipped {
        node_id: NodeId,
        run_id: RunId,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::WorkflowStarted { timestamp, .. } => *timestamp,
            Event::WorkflowCompleted { timestamp, .. } => *timestamp,
            Event::NodeStarted { timestamp, .. } => *timestamp,
            Event::NodeCompleted { timestamp, .. } => *timestamp,
            Event::NodeFailed { timestamp, .. } => *timestamp,
            Event::NodeSkipped { timestamp, .. } => *timestamp,
        }
    }

    /// Node the event concerns, if any.
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            Event::NodeStarted { node_id, .. }
            | Event::NodeCompleted { node_id, .. }
            | Event::NodeFailed { node_id, .. }
            | Event::NodeSkipped { node_id, .. } => Some(node_id),
            Event::WorkflowStarted { .. } | Event::WorkflowCompleted { .. } => None,
        }
    }

    pub fn workflow_started(workflow_id: WorkflowId, run_id: RunId) -> Self {
        Event::WorkflowStarted {
            workflow_id,
            run_id,
            timestamp: Instant::now(),
        }
    }

    pub fn workflow_completed(
        workflow_id: WorkflowId,
        run_id: RunId,
        success: bool,
        duration: Duration,
    ) -> Self {
        Event::WorkflowCompleted {
            workflow_id,
            run_id,
            success,
            duration,
            timestamp: Instant::now(),
        }
    }

    pub fn node_started(node_id: NodeId, run_id: RunId, task: impl Into<String>) -> Self {
        Event::NodeStarted {
            node_id,
            run_id,
            task: task.into(),
            timestamp: Instant::now(),
        }
    }

    pub fn node_completed(
        node_id: NodeId,
        run_id: RunId,
        duration: Duration,
        update_keys: Vec<String>,
    ) -> Self {
        Event::NodeCompleted {
            node_id,
            run_id,
            duration,
            update_keys,
            timestamp: Instant::now(),
        }
    }

    pub fn node_failed(node_id: NodeId, run_id: RunId, error: impl Into<String>) -> Self {
        Event::NodeFailed {
            node_id,
            run_id,
            error: error.into(),
            timestamp: Instant::now(),
        }
    }

    pub fn node_skipped(node_id: NodeId, run_id: RunId) -> Self {
        Event::NodeSkipped {
            node_id,
            run_id,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers, in registration order.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    /// Test handler that records received events.
    struct RecordingHandler {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingHandler {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }

        async fn events(&self) -> Vec<Event> {
            self.events.lock().await.clone()
        }
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, event: &Event) {
            self.events.lock().await.push(event.clone());
        }
    }

    struct CountingHandler {
        count: AtomicU32,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: &Event) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_emit_node_started_event() {
        let handler = Arc::new(RecordingHandler::new());
        let bus = EventBus::new();
        bus.register(handler.clone()).await;

        bus.emit(Event::node_started(NodeId::new("scan"), RunId::new(), "lattice_scan"))
            .await;

        let events = handler.events().await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::NodeStarted { node_id, task, .. } => {
                assert_eq!(node_id.as_str(), "scan");
                assert_eq!(task, "lattice_scan");
            }
            _ => panic!("Expected NodeStarted event"),
        }
    }

    #[tokio::test]
    async fn test_emit_node_completed_event_with_keys() {
        let handler = Arc::new(RecordingHandler::new());
        let bus = EventBus::new();
        bus.register(handler.clone()).await;

        let event = Event::node_completed(
            NodeId::new("fit"),
            RunId::new(),
            Duration::from_millis(150),
            vec!["v0".to_string()],
        );
        bus.emit(event).await;

        match &handler.events().await[0] {
            Event::NodeCompleted {
                duration,
                update_keys,
                ..
            } => {
                assert_eq!(*duration, Duration::from_millis(150));
                assert_eq!(update_keys, &vec!["v0".to_string()]);
            }
            _ => panic!("Expected NodeCompleted event"),
        }
    }

    #[tokio::test]
    async fn test_emit_node_failed_event_with_error() {
        let handler = Arc::new(RecordingHandler::new());
        let bus = EventBus::new();
        bus.register(handler.clone()).await;

        bus.emit(Event::node_failed(NodeId::new("neb"), RunId::new(), "no minimum"))
            .await;

        let events = handler.events().await;
        assert_eq!(events[0].node_id().map(|n| n.as_str()), Some("neb"));
        assert!(matches!(&events[0], Event::NodeFailed { error, .. } if error == "no minimum"));
    }

    #[tokio::test]
    async fn test_workflow_events_have_no_node() {
        let event = Event::workflow_completed(
            WorkflowId::new("wf"),
            RunId::new(),
            true,
            Duration::from_secs(1),
        );
        assert!(event.node_id().is_none());
        assert!(event.timestamp() <= Instant::now());
    }

    #[tokio::test]
    async fn test_multiple_handlers_receive_events() {
        let counter = Arc::new(CountingHandler {
            count: AtomicU32::new(0),
        });
        let recorder = Arc::new(RecordingHandler::new());
        let bus = EventBus::new();
        bus.register(counter.clone()).await;
        bus.register(recorder.clone()).await;

        bus.emit(Event::workflow_started(WorkflowId::new("wf"), RunId::new()))
            .await;
        bus.emit(Event::node_skipped(NodeId::new("b"), RunId::new()))
            .await;

        assert_eq!(bus.handler_count().await, 2);
        assert_eq!(counter.count.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.events().await.len(), 2);
    }
}
