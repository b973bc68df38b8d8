/*!
Sink contract: the pluggable destinations that record tracking events
*/

use std::fmt;
use std::path::PathBuf;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{consent::ConsentGate, event::Event};

/// Opaque identity of a sink, only ever used as a map key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SinkId(String);

impl SinkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SinkId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SinkId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Raised by a sink when an operation could not run at all
pub type SinkFault = Box<dyn std::error::Error + Send + Sync>;

/// What a sink operation settles with: an outcome, or a fault
pub type SinkResult = Result<SinkOutcome, SinkFault>;

/// A settled sink operation. `success == false` means the sink ran but declined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkOutcome {
    pub id: SinkId,
    pub success: bool,
}

impl SinkOutcome {
    pub fn new(id: SinkId, success: bool) -> Self {
        Self { id, success }
    }

    pub fn succeeded(id: &SinkId) -> Self {
        Self::new(id.clone(), true)
    }

    pub fn declined(id: &SinkId) -> Self {
        Self::new(id.clone(), false)
    }
}

/// Host environment handed to every sink's `initialize`
#[derive(Debug, Clone, Default)]
pub struct PlatformContext {
    pub app_name: String,
    /// Where sinks may keep local files
    pub data_dir: PathBuf,
}

impl PlatformContext {
    pub fn new(app_name: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_name: app_name.into(),
            data_dir: data_dir.into(),
        }
    }
}

/// A destination for tracking events.
///
/// Operations take `&self` because the tracker may run them concurrently: a `log`
/// can arrive before the matching `start` has settled, and implementations have to
/// cope with that instead of crashing. Each operation settles exactly once.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Stable for the sink's lifetime
    fn id(&self) -> &SinkId;

    /// Where this sink keeps its consent flag (local state or a shared store)
    fn consent(&self) -> &dyn ConsentGate;

    /// One-time setup. Faults are reported separately from a `false` outcome.
    async fn initialize(&self, context: &PlatformContext) -> SinkResult;

    /// Reflects the last completed `initialize`
    fn is_initialized(&self) -> bool;

    async fn start(&self) -> SinkResult;

    /// Record an event. Must not assume `start` has completed.
    async fn log(&self, event: &Event) -> SinkResult;

    async fn finish(&self) -> SinkResult;
}
