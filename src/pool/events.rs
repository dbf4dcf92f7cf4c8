//! Pool lifecycle events, broadcast to every subscriber

use serde::Serialize;

use crate::worker::WorkerFault;

/// Default capacity of the event broadcast channel
pub const EVENT_BUFFER_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolEvent {
    /// A worker raised an infrastructure fault and was torn down
    WorkerCrashed { worker_id: usize, fault: WorkerFault },
    /// A crashed worker was respawned and is eligible again
    WorkerRevived { worker_id: usize, attempts: u32 },
    /// Revival gave up; the id stays absent until restarted
    WorkerPermanentlyDown { worker_id: usize, attempts: u32 },
    PoolDestroyed,
}

impl PoolEvent {
    pub fn worker_id(&self) -> Option<usize> {
        match self {
            PoolEvent::WorkerCrashed { worker_id, .. }
            | PoolEvent::WorkerRevived { worker_id, .. }
            | PoolEvent::WorkerPermanentlyDown { worker_id, .. } => Some(*worker_id),
            PoolEvent::PoolDestroyed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::FaultKind;
    use serde_json::json;

    #[test]
    fn test_events_serialize_with_tag() {
        let event = PoolEvent::WorkerCrashed {
            worker_id: 1,
            fault: WorkerFault {
                worker_id: 1,
                kind: FaultKind::Closed,
                cause: "channel closed unexpectedly".to_string(),
            },
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "worker_crashed",
                "worker_id": 1,
                "fault": {"worker_id": 1, "kind": "closed", "cause": "channel closed unexpectedly"}
            })
        );
        assert_eq!(event.worker_id(), Some(1));
        assert_eq!(PoolEvent::PoolDestroyed.worker_id(), None);
    }
}
