//! Campaign match events.

use crate::campaign::Campaign;
use crate::identifier::CanonicalIdentifier;
use std::time::{Instant, SystemTime};

/// A beacon matched to an active campaign.
///
/// Produced by the match engine at most once per identifier per cooldown and
/// handed to consumers (line-protocol output, notifications) as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchEvent {
    /// Canonical identifier decoded from the advertisement
    pub identifier: CanonicalIdentifier,
    /// The active campaign the identifier resolved to
    pub campaign: Campaign,
    /// Estimated distance in meters, `None` when the RSSI gives no finite estimate
    pub distance: Option<f64>,
    /// Address of the advertising device
    pub address: String,
    /// RSSI of the matching frame in dBm
    pub rssi: i16,
    /// Monotonic instant the frame was processed at (the cooldown starts here)
    pub detected_at: Instant,
    /// Wall-clock time the event was created
    pub timestamp: SystemTime,
}
