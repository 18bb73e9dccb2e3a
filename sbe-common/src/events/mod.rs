//! Event types for the batch engine event system
//!
//! Provides shared job event definitions and the EventBus used by the engine
//! and its front ends.

mod job_types;

pub use job_types::{BatchState, JobState, ProgressReport};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Job event types
///
/// Events are broadcast via EventBus and can be serialized for display or
/// logging by any front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobEvent {
    /// Job moved between states
    JobStateChanged {
        job_id: Uuid,
        old_state: JobState,
        new_state: JobState,
        /// Pause or abort reason, if any
        reason: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A batch was sent to the analysis service
    BatchDispatched {
        job_id: Uuid,
        sequence: u64,
        sample_count: usize,
        /// 0 for the first attempt
        attempt: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A batch outcome was classified and persisted
    BatchCompleted {
        job_id: Uuid,
        sequence: u64,
        state: BatchState,
        succeeded: usize,
        skipped: usize,
        requeued: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A recoverable failure will be retried after a backoff
    BatchRetryScheduled {
        job_id: Uuid,
        sequence: u64,
        attempt: u32,
        delay_ms: u64,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A sample was permanently resolved with a skip marker
    SampleSkipped {
        job_id: Uuid,
        sample_id: String,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Checkpoint durably written
    CheckpointSaved {
        job_id: Uuid,
        resolved: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Progress statistics changed
    ProgressUpdated {
        job_id: Uuid,
        progress: ProgressReport,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl JobEvent {
    /// Event type name, matching the serde tag
    pub fn event_type(&self) -> &str {
        match self {
            JobEvent::JobStateChanged { .. } => "JobStateChanged",
            JobEvent::BatchDispatched { .. } => "BatchDispatched",
            JobEvent::BatchCompleted { .. } => "BatchCompleted",
            JobEvent::BatchRetryScheduled { .. } => "BatchRetryScheduled",
            JobEvent::SampleSkipped { .. } => "SampleSkipped",
            JobEvent::CheckpointSaved { .. } => "CheckpointSaved",
            JobEvent::ProgressUpdated { .. } => "ProgressUpdated",
        }
    }

    /// Job this event belongs to
    pub fn job_id(&self) -> Uuid {
        match self {
            JobEvent::JobStateChanged { job_id, .. }
            | JobEvent::BatchDispatched { job_id, .. }
            | JobEvent::BatchCompleted { job_id, .. }
            | JobEvent::BatchRetryScheduled { job_id, .. }
            | JobEvent::SampleSkipped { job_id, .. }
            | JobEvent::CheckpointSaved { job_id, .. }
            | JobEvent::ProgressUpdated { job_id, .. } => *job_id,
        }
    }
}

/// Broadcast bus for job events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before lagging receivers
    ///   start dropping the oldest ones
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: JobEvent) -> Result<usize, broadcast::error::SendError<JobEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: JobEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
