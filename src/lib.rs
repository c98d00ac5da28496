//! `beacon-campaign-listener` library.
//!
//! Frames from a BLE scanner are decoded into canonical beacon identifiers,
//! looked up against a campaign catalogue and reported at most once per
//! identifier per cooldown.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup and
//! process exit codes. The run loop lives in [`crate::app`] where it can be
//! tested deterministically with an injected scanner, resolver and output streams.

pub mod app;
pub mod campaign;
pub mod decoder;
pub mod dedup;
pub mod distance;
pub mod engine;
pub mod event;
pub mod frame;
pub mod identifier;
pub mod output;
pub mod scanner;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use campaign::{Campaign, CampaignResolver, ResolveError, StaticResolver, parse_campaign};
pub use decoder::FrameDecoder;
pub use dedup::{DedupWindow, parse_duration};
pub use engine::MatchEngine;
pub use event::MatchEvent;
pub use frame::AdvertisementFrame;
pub use identifier::CanonicalIdentifier;
pub use output::EventFormatter;
pub use output::influxdb::InfluxDbFormatter;
pub use scanner::{Backend, FrameResult, ReportError, ScanError};
