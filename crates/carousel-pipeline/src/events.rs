//! Run event system for observability.
//!
//! Emits [`PipelineEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! progress displays and loggers can follow a run without coupling to the
//! executor internals.

use carousel_types::Stage;
use serde::{Deserialize, Serialize};

/// Events emitted while a run executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineEvent {
    RunStarted {
        run_id: String,
        topic: String,
    },
    RunCompleted {
        run_id: String,
        duration_ms: u64,
        review_iterations: u32,
        unresolved: usize,
    },
    RunFailed {
        run_id: String,
        kind: String,
        error: String,
    },
    StageStarted {
        stage: Stage,
        iteration: u32,
    },
    StageCompleted {
        stage: Stage,
        iteration: u32,
        duration_ms: u64,
        input_tokens: u64,
        output_tokens: u64,
    },
    AutoValidationCompleted {
        iteration: u32,
        high: usize,
        medium: usize,
        low: usize,
    },
    ReviewCompleted {
        iteration: u32,
        blocking: usize,
    },
    RevisionStarted {
        iteration: u32,
        issues: usize,
    },
    RenderCompleted {
        images: usize,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
