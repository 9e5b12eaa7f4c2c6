//! Lifecycle states, outcomes and pipeline observation

use serde::Serialize;
use std::fmt;

use crate::error::HotplugError;
use crate::event::{Action, EventId};
use hal_core::DeviceKind;

/// Where a device is in its journey through the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Start,
    PreprobeMerge,
    PreprobeCallout,
    ProbeHelper,
    Postprobe,
    InfoMerge,
    ComputeUdi,
    CommitCallout,
    Committed,
    Ignored,
    RemoveHandler,
    RemoveCallout,
    Removed,
    Discarded,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Start => "start",
            LifecycleState::PreprobeMerge => "preprobe_merge",
            LifecycleState::PreprobeCallout => "preprobe_callout",
            LifecycleState::ProbeHelper => "probe_helper",
            LifecycleState::Postprobe => "postprobe",
            LifecycleState::InfoMerge => "info_merge",
            LifecycleState::ComputeUdi => "compute_udi",
            LifecycleState::CommitCallout => "commit_callout",
            LifecycleState::Committed => "committed",
            LifecycleState::Ignored => "ignored",
            LifecycleState::RemoveHandler => "remove_handler",
            LifecycleState::RemoveCallout => "remove_callout",
            LifecycleState::Removed => "removed",
            LifecycleState::Discarded => "discarded",
        };
        f.write_str(name)
    }
}

/// How an event ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Committed { udi: String },
    /// Committed as a stripped stub
    Ignored { udi: String },
    Removed { udi: String },
    Discarded(HotplugError),
}

impl Outcome {
    pub fn udi(&self) -> Option<&str> {
        match self {
            Outcome::Committed { udi } | Outcome::Ignored { udi } | Outcome::Removed { udi } => {
                Some(udi)
            }
            Outcome::Discarded(_) => None,
        }
    }

    pub fn is_discarded(&self) -> bool {
        matches!(self, Outcome::Discarded(_))
    }

    pub fn final_state(&self) -> LifecycleState {
        match self {
            Outcome::Committed { .. } => LifecycleState::Committed,
            Outcome::Ignored { .. } => LifecycleState::Ignored,
            Outcome::Removed { .. } => LifecycleState::Removed,
            Outcome::Discarded(_) => LifecycleState::Discarded,
        }
    }
}

/// Broadcast to anyone watching the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Enqueued {
        id: EventId,
    },
    Started {
        id: EventId,
        action: Action,
        kind: DeviceKind,
        identity_key: String,
    },
    StateChanged {
        id: EventId,
        state: LifecycleState,
    },
    Ended {
        id: EventId,
        outcome: Outcome,
    },
}

/// Running counters for the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub enqueued: u64,
    pub started: u64,
    pub ended: u64,
    pub committed: u64,
    pub ignored: u64,
    pub removed: u64,
    pub discarded: u64,
}

impl PipelineStats {
    pub(crate) fn record(&mut self, outcome: &Outcome) {
        self.ended += 1;
        match outcome {
            Outcome::Committed { .. } => self.committed += 1,
            Outcome::Ignored { .. } => self.ignored += 1,
            Outcome::Removed { .. } => self.removed += 1,
            Outcome::Discarded(_) => self.discarded += 1,
        }
    }
}
