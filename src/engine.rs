//! Deduplicated campaign matching.
//!
//! Per identifier the engine cycles through two states:
//!
//! | State   | Event                               | Action               | Next    |
//! |---------|-------------------------------------|----------------------|---------|
//! | Unseen  | frame resolves to active campaign   | emit event, activate | Cooling |
//! | Unseen  | frame resolves to nothing           | none                 | Unseen  |
//! | Cooling | frame with the same identifier      | none (suppressed)    | Cooling |
//! | Cooling | cooldown elapses                    | none                 | Unseen  |
//!
//! A failed or empty lookup never starts a cooldown, so an unknown beacon is
//! looked up again on its next frame.

use crate::campaign::CampaignResolver;
use crate::decoder::FrameDecoder;
use crate::dedup::DedupWindow;
use crate::distance;
use crate::event::MatchEvent;
use crate::frame::AdvertisementFrame;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tracing::{debug, info, warn};

/// Decodes frames, suppresses cooling identifiers and resolves the rest.
///
/// `process` takes `&self`, so one engine can be shared (e.g. in an `Arc`)
/// between concurrently running frame tasks.
pub struct MatchEngine {
    decoder: FrameDecoder,
    dedup: DedupWindow,
    resolver: Arc<dyn CampaignResolver>,
}

impl MatchEngine {
    pub fn new(
        decoder: FrameDecoder,
        dedup: DedupWindow,
        resolver: Arc<dyn CampaignResolver>,
    ) -> Self {
        Self {
            decoder,
            dedup,
            resolver,
        }
    }

    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }

    pub fn dedup(&self) -> &DedupWindow {
        &self.dedup
    }

    /// Process one frame received at `now`.
    ///
    /// Returns an event only for the first frame of an identifier that resolves
    /// to an active campaign while the identifier is not cooling. Resolver
    /// errors count as a miss.
    ///
    /// The cooldown is only started once the lookup has completed. If this
    /// future is dropped while the lookup is pending, the dedup window is left
    /// untouched.
    pub async fn process(&self, frame: &AdvertisementFrame, now: Instant) -> Option<MatchEvent> {
        let id = self.decoder.decode(frame)?;

        if self.dedup.is_active(&id, now) {
            return None;
        }

        debug!(identifier = %id, rssi = frame.rssi, address = %frame.address, "found beacon");

        let campaign = match self.resolver.find_active(&id).await {
            Ok(Some(campaign)) if campaign.active => campaign,
            Ok(_) => return None,
            Err(error) => {
                warn!(identifier = %id, %error, "campaign lookup failed");
                return None;
            }
        };

        // Another task may have matched the same identifier while this lookup was in flight.
        if !self.dedup.try_activate(id.clone(), now) {
            debug!(identifier = %id, "match suppressed, already cooling");
            return None;
        }

        let distance = Some(distance::estimate(frame.rssi)).filter(|d| d.is_finite());
        info!(
            identifier = %id,
            campaign = %campaign.name,
            distance = ?distance,
            "campaign matched"
        );

        Some(MatchEvent {
            identifier: id,
            campaign,
            distance,
            address: frame.address.clone(),
            rssi: frame.rssi,
            detected_at: now,
            timestamp: SystemTime::now(),
        })
    }
}
