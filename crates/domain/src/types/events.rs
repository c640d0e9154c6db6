//! Analytics events emitted by the networking core

use std::collections::BTreeMap;

use netweave_common::impl_token_conversions;
use serde::{Deserialize, Serialize};

/// Kind of event reported to the analytics sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkEvent {
    RequestStarted,
    RequestCompleted,
    RequestFailed,
    CacheHit,
    CacheMiss,
    RetryScheduled,
    CircuitOpened,
    ServerHealthChanged,
}

impl_token_conversions!(NetworkEvent {
    RequestStarted => "request_started",
    RequestCompleted => "request_completed",
    RequestFailed => "request_failed",
    CacheHit => "cache_hit",
    CacheMiss => "cache_miss",
    RetryScheduled => "retry_scheduled",
    CircuitOpened => "circuit_opened",
    ServerHealthChanged => "server_health_changed",
});

/// String key/value pairs attached to an event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventMetadata(BTreeMap<String, String>);

impl EventMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, rendering the value with `Display`
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.0.insert(key.into(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
