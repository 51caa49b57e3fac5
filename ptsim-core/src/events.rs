use crate::tree::NodeId;
use crate::types::{Gateway, SimTime};
use serde::{Deserialize, Serialize};

/// Runtime events: the audit trail of one simulated case.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RuntimeEvent {
    CaseStarted {
        case_index: usize,
        at: SimTime,
    },
    ActivityStarted {
        node: NodeId,
        label: String,
        at: SimTime,
    },
    /// Activity is waiting for a unit of its resource pool.
    ResourceQueued {
        node: NodeId,
        pool: String,
        at: SimTime,
    },
    ActivityCompleted {
        node: NodeId,
        label: String,
        at: SimTime,
    },
    SplitFired {
        node: NodeId,
        gateway: Gateway,
        arms: Vec<usize>,
        at: SimTime,
    },
    /// A choice was routed by decision rules rather than weights.
    RuleFired {
        node: NodeId,
        candidates: Vec<usize>,
        chosen: usize,
    },
    JoinReleased {
        node: NodeId,
        gateway: Gateway,
        at: SimTime,
    },
    CaseCompleted {
        case_index: usize,
        at: SimTime,
        steps: usize,
    },
}

/// Collects events for one case when recording is on. Every event is also
/// emitted at `trace` level.
#[derive(Debug, Default)]
pub struct EventJournal {
    record: bool,
    events: Vec<RuntimeEvent>,
}

impl EventJournal {
    pub fn new(record: bool) -> Self {
        Self {
            record,
            events: Vec::new(),
        }
    }

    pub fn push(&mut self, event: RuntimeEvent) {
        tracing::trace!(?event, "runtime event");
        if self.record {
            self.events.push(event);
        }
    }

    pub fn into_events(self) -> Vec<RuntimeEvent> {
        self.events
    }
}
