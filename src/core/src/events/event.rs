//! Scheduler lifecycle events.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::BusEvent;
use crate::jobs::{JobError, JobId};

// =============================================================================
// Event Kind
// =============================================================================

/// Name of a lifecycle event, used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Queued,
    Started,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
    Retrying,
    Drained,
}

impl EventKind {
    /// Every event kind, in catalog order.
    pub const ALL: [EventKind; 8] = [
        EventKind::Queued,
        EventKind::Started,
        EventKind::Succeeded,
        EventKind::Failed,
        EventKind::Cancelled,
        EventKind::TimedOut,
        EventKind::Retrying,
        EventKind::Drained,
    ];

    /// Catalog name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Started => "started",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timedOut",
            Self::Retrying => "retrying",
            Self::Drained => "drained",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Scheduler Event
// =============================================================================

/// An event published by the scheduler.
///
/// Events for one job are published in state machine order from the
/// scheduler's owner task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SchedulerEvent<T> {
    /// A job entered the pending queue, at submission or after a backoff.
    Queued { id: JobId },
    /// An attempt was handed to the executor.
    Started { id: JobId, attempt: u32 },
    /// Work returned a value.
    Succeeded { id: JobId, value: T },
    /// Attempts were exhausted or the error was fatal.
    Failed { id: JobId, error: JobError },
    /// The job was cancelled by the caller.
    Cancelled { id: JobId, reason: Option<String> },
    /// The running attempt outlived its timeout.
    TimedOut {
        id: JobId,
        #[serde(with = "opt_millis", rename = "timeoutMs")]
        timeout: Option<Duration>,
    },
    /// A retry was scheduled. `attempt` is the number of the next attempt.
    Retrying {
        id: JobId,
        attempt: u32,
        #[serde(with = "millis", rename = "delayMs")]
        delay: Duration,
        error: Option<JobError>,
    },
    /// Nothing is running and nothing is queued.
    Drained { remaining: usize },
}

impl<T> SchedulerEvent<T> {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Queued { .. } => EventKind::Queued,
            Self::Started { .. } => EventKind::Started,
            Self::Succeeded { .. } => EventKind::Succeeded,
            Self::Failed { .. } => EventKind::Failed,
            Self::Cancelled { .. } => EventKind::Cancelled,
            Self::TimedOut { .. } => EventKind::TimedOut,
            Self::Retrying { .. } => EventKind::Retrying,
            Self::Drained { .. } => EventKind::Drained,
        }
    }

    /// The job this event is about. `None` for `drained`.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::Queued { id }
            | Self::Started { id, .. }
            | Self::Succeeded { id, .. }
            | Self::Failed { id, .. }
            | Self::Cancelled { id, .. }
            | Self::TimedOut { id, .. }
            | Self::Retrying { id, .. } => Some(*id),
            Self::Drained { .. } => None,
        }
    }
}

impl<T> BusEvent for SchedulerEvent<T> {
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    use crate::jobs::job::saturating_millis;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(saturating_millis(*value))
    }
}

mod opt_millis {
    use serde::Serializer;
    use std::time::Duration;

    use crate::jobs::job::saturating_millis;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&saturating_millis(*duration)),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let names: Vec<_> = EventKind::ALL.iter().map(|kind| kind.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "queued",
                "started",
                "succeeded",
                "failed",
                "cancelled",
                "timedOut",
                "retrying",
                "drained"
            ]
        );
    }

    #[test]
    fn test_event_kind_and_id() {
        let event: SchedulerEvent<u32> = SchedulerEvent::Succeeded {
            id: JobId(4),
            value: 123,
        };
        assert_eq!(event.kind(), EventKind::Succeeded);
        assert_eq!(event.name(), "succeeded");
        assert_eq!(event.job_id(), Some(JobId(4)));

        let drained: SchedulerEvent<u32> = SchedulerEvent::Drained { remaining: 0 };
        assert_eq!(drained.job_id(), None);
    }

    #[test]
    fn test_event_serialization() {
        let event: SchedulerEvent<()> = SchedulerEvent::Retrying {
            id: JobId(2),
            attempt: 2,
            delay: Duration::from_millis(37),
            error: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "retrying");
        assert_eq!(json["delayMs"], 37);
        assert_eq!(json["attempt"], 2);

        let event: SchedulerEvent<()> = SchedulerEvent::TimedOut {
            id: JobId(3),
            timeout: Some(Duration::from_millis(50)),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "timedOut");
        assert_eq!(json["timeoutMs"], 50);
    }
}
