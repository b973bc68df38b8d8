/*!
Error types surfaced by the tracker and its collaborators
*/

use std::time::Duration;
use thiserror::Error;

use crate::core::{
    sink::{SinkFault, SinkId},
    tracker::Phase,
};

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("event id must not be empty")]
    EmptyEventId,

    /// A sink operation returned an error instead of an outcome
    #[error("sink {sink} failed during {phase}: {source}")]
    SinkFault {
        sink: SinkId,
        phase: Phase,
        #[source]
        source: SinkFault,
    },

    #[error("sink {sink} panicked during {phase}: {message}")]
    SinkPanicked {
        sink: SinkId,
        phase: Phase,
        message: String,
    },

    #[error("sink {sink} did not settle {phase} within {after:?}")]
    TimedOut {
        sink: SinkId,
        phase: Phase,
        after: Duration,
    },

    /// Every fault of one lifecycle call, returned when silent crashing is off
    #[error("{} sink fault(s) during {phase}", faults.len())]
    Propagated { phase: Phase, faults: Vec<TrackError> },

    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TrackError {
    /// The sink a fault belongs to, if it belongs to exactly one
    pub fn sink(&self) -> Option<&SinkId> {
        match self {
            Self::SinkFault { sink, .. }
            | Self::SinkPanicked { sink, .. }
            | Self::TimedOut { sink, .. } => Some(sink),
            _ => None,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::SinkFault { phase, .. }
            | Self::SinkPanicked { phase, .. }
            | Self::TimedOut { phase, .. }
            | Self::Propagated { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}
