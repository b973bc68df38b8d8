/*!
Tracking events and their builder
*/

use std::collections::{HashMap, HashSet};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::{error::TrackError, sink::SinkId};

/// An immutable record of something worth tracking
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    id: String,
    attributes: HashMap<String, String>,
    /// Empty means "every sink that has consent"
    targets: HashSet<SinkId>,
    occurred_at: DateTime<Utc>,
}

impl Event {
    pub fn builder(id: impl Into<String>) -> EventBuilder {
        EventBuilder::new(id)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn targets(&self) -> &HashSet<SinkId> {
        &self.targets
    }

    /// Whether the event names its sinks explicitly
    pub fn is_targeted(&self) -> bool {
        !self.targets.is_empty()
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

#[derive(Debug, Clone)]
pub struct EventBuilder {
    id: String,
    attributes: HashMap<String, String>,
    targets: HashSet<SinkId>,
}

impl EventBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: HashMap::new(),
            targets: HashSet::new(),
        }
    }

    /// Later values for the same key replace earlier ones
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn target(mut self, sink: impl Into<SinkId>) -> Self {
        self.targets.insert(sink.into());
        self
    }

    pub fn targets<I>(mut self, sinks: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<SinkId>,
    {
        self.targets.extend(sinks.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Result<Event, TrackError> {
        if self.id.trim().is_empty() {
            return Err(TrackError::EmptyEventId);
        }

        Ok(Event {
            id: self.id,
            attributes: self.attributes,
            targets: self.targets,
            occurred_at: Utc::now(),
        })
    }
}
