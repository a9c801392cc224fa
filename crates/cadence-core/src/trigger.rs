//! Published trigger names.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// How long a published trigger stays visible.
pub const TRIGGER_RETENTION_DAYS: i64 = 7;

/// The set of published triggers, each with its publication time.
#[derive(Debug, Clone, Default)]
pub struct TriggerBus {
    published: BTreeMap<String, DateTime<Utc>>,
    fresh: bool,
}

impl TriggerBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_published(published: BTreeMap<String, DateTime<Utc>>) -> Self {
        Self {
            published,
            fresh: false,
        }
    }

    /// Publish `name`. Republishing refreshes its timestamp.
    pub fn publish(&mut self, name: impl Into<String>, at: DateTime<Utc>) {
        let name = name.into();
        debug!(trigger = %name, "published trigger");
        self.published.insert(name, at);
        self.fresh = true;
    }

    pub fn is_published(&self, name: &str) -> bool {
        self.published.contains_key(name)
    }

    /// True if anything was published since the last call.
    pub fn take_fresh(&mut self) -> bool {
        std::mem::take(&mut self.fresh)
    }

    /// Forget triggers older than the retention window.
    pub fn expire(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::days(TRIGGER_RETENTION_DAYS);
        let before = self.published.len();
        self.published.retain(|_, at| *at >= cutoff);
        before - self.published.len()
    }

    pub fn published(&self) -> &BTreeMap<String, DateTime<Utc>> {
        &self.published
    }
}
