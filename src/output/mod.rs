//! Output formatters for campaign match events.
//!
//! Formatters turn a [`MatchEvent`] into one line of text for downstream
//! consumers. Currently supports InfluxDB line protocol, which lets match
//! events be shipped to a time-series store the same way sensor readings are.

pub mod influxdb;

use crate::event::MatchEvent;

/// Trait for formatting match events into output lines.
pub trait EventFormatter: Send + Sync {
    /// Format one event as a single line (without trailing newline).
    fn format(&self, event: &MatchEvent) -> String;
}
