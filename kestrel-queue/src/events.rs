use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CycleReport;

/// Events published by a batch processor, one per message disposition
/// plus one per finished cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProcessorEvent {
    /// Command succeeded and the message was deleted
    Completed {
        queue: String,
        message_id: String,
        dequeue_count: u32,
        at: DateTime<Utc>,
    },

    /// Command failed too many times; the message was evicted
    Poisoned {
        queue: String,
        message_id: String,
        dequeue_count: u32,
        at: DateTime<Utc>,
    },

    /// Command failed; the message is left for redelivery
    Retained {
        queue: String,
        message_id: String,
        dequeue_count: u32,
        at: DateTime<Utc>,
    },

    /// The payload could not be decoded; the delivery was deleted unprocessed
    Discarded {
        queue: String,
        message_id: String,
        dequeue_count: u32,
        error: String,
        at: DateTime<Utc>,
    },

    /// The message should have been deleted but the delete failed
    DeleteFailed {
        queue: String,
        message_id: String,
        error: String,
        at: DateTime<Utc>,
    },

    CycleFinished {
        queue: String,
        report: CycleReport,
        at: DateTime<Utc>,
    },
}

impl ProcessorEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Poisoned { .. } => "poisoned",
            Self::Retained { .. } => "retained",
            Self::Discarded { .. } => "discarded",
            Self::DeleteFailed { .. } => "delete_failed",
            Self::CycleFinished { .. } => "cycle_finished",
        }
    }

    pub fn queue(&self) -> &str {
        match self {
            Self::Completed { queue, .. }
            | Self::Poisoned { queue, .. }
            | Self::Retained { queue, .. }
            | Self::Discarded { queue, .. }
            | Self::DeleteFailed { queue, .. }
            | Self::CycleFinished { queue, .. } => queue,
        }
    }

    /// The message this event is about, if any
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::Completed { message_id, .. }
            | Self::Poisoned { message_id, .. }
            | Self::Retained { message_id, .. }
            | Self::Discarded { message_id, .. }
            | Self::DeleteFailed { message_id, .. } => Some(message_id),
            Self::CycleFinished { .. } => None,
        }
    }

    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Completed { at, .. }
            | Self::Poisoned { at, .. }
            | Self::Retained { at, .. }
            | Self::Discarded { at, .. }
            | Self::DeleteFailed { at, .. }
            | Self::CycleFinished { at, .. } => at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_their_variant_name() {
        let event = ProcessorEvent::Poisoned {
            queue: "answers".into(),
            message_id: "m-1".into(),
            dequeue_count: 6,
            at: Utc::now(),
        };
        assert_eq!(event.event_name(), "poisoned");
        assert_eq!(event.message_id(), Some("m-1"));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["Poisoned"]["dequeue_count"], 6);
    }
}
