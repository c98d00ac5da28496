//! Cooldown window for matched beacons.
//!
//! After a beacon produces a match it stays "cooling" for a fixed duration,
//! measured from the moment it was activated. Expired entries are removed
//! lazily when they are next looked at, so no timer task is needed and tests
//! can drive time by passing explicit instants.

use crate::identifier::CanonicalIdentifier;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Cooldown applied when none is configured.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);

/// Set of identifiers currently cooling down, each with its expiry instant.
///
/// A cooldown too long to be represented as an [`Instant`] never expires.
///
/// All operations take `&self`; the map sits behind a mutex that is held only
/// for the duration of a single operation and never across an await point.
#[derive(Debug)]
pub struct DedupWindow {
    /// Time an identifier stays suppressed after activation
    cooldown: Duration,
    /// Expiry instant for each cooling identifier, `None` if it never expires
    entries: Mutex<HashMap<CanonicalIdentifier, Option<Instant>>>,
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl DedupWindow {
    /// Create an empty window.
    ///
    /// # Example
    /// ```
    /// use std::time::{Duration, Instant};
    /// use beacon_campaign_listener::dedup::DedupWindow;
    /// use beacon_campaign_listener::identifier::CanonicalIdentifier;
    ///
    /// let window = DedupWindow::new(Duration::from_secs(300));
    /// let id = CanonicalIdentifier::new("e2c56db5-dffb-48d2-b060-d0f5a71096e0").unwrap();
    /// let t0 = Instant::now();
    ///
    /// window.activate(id.clone(), t0);
    /// assert!(window.is_active(&id, t0 + Duration::from_secs(299)));
    /// assert!(!window.is_active(&id, t0 + Duration::from_secs(300)));
    /// ```
    pub fn new(cooldown: Duration) -> Self {
        DedupWindow {
            cooldown,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CanonicalIdentifier, Option<Instant>>> {
        // The map stays consistent even if a holder panicked: every critical
        // section is a single insert, remove or lookup.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check whether `id` is still cooling at `now`. An expired entry is removed.
    pub fn is_active(&self, id: &CanonicalIdentifier, now: Instant) -> bool {
        let mut entries = self.entries();
        Self::check(&mut entries, id, now)
    }

    fn check(
        entries: &mut HashMap<CanonicalIdentifier, Option<Instant>>,
        id: &CanonicalIdentifier,
        now: Instant,
    ) -> bool {
        match entries.get(id) {
            Some(expiry) if Self::live(expiry, now) => true,
            Some(_) => {
                entries.remove(id);
                false
            }
            None => false,
        }
    }

    fn live(expiry: &Option<Instant>, now: Instant) -> bool {
        expiry.is_none_or(|expiry| now < expiry)
    }

    fn expiry(&self, now: Instant) -> Option<Instant> {
        now.checked_add(self.cooldown)
    }

    /// Start (or restart) the cooldown for `id`, expiring at `now + cooldown`.
    pub fn activate(&self, id: CanonicalIdentifier, now: Instant) {
        let expiry = self.expiry(now);
        self.entries().insert(id, expiry);
    }

    /// Activate `id` only if it is not already cooling, as one atomic step.
    ///
    /// Returns `true` if this call performed the activation. Of several callers
    /// racing on the same identifier, exactly one gets `true`.
    pub fn try_activate(&self, id: CanonicalIdentifier, now: Instant) -> bool {
        let mut entries = self.entries();
        if Self::check(&mut entries, &id, now) {
            return false;
        }
        entries.retain(|_, expiry| Self::live(expiry, now));
        entries.insert(id, self.expiry(now));
        true
    }

    /// Remove every entry whose expiry is at or before `now`.
    pub fn expire(&self, now: Instant) {
        self.entries().retain(|_, expiry| Self::live(expiry, now));
    }

    /// Number of entries held, including expired ones not yet removed.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use beacon_campaign_listener::dedup::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let units: [(&str, u64, &str); 4] = [
        ("ms", 1, "milliseconds"),
        ("h", 3_600_000, "hours"),
        ("m", 60_000, "minutes"),
        ("s", 1_000, "seconds"),
    ];

    for (suffix, millis_per_unit, unit) in units {
        if let Some(num) = src.strip_suffix(suffix) {
            let value: u64 = num
                .trim()
                .parse()
                .map_err(|_| format!("invalid {}: {}", unit, num))?;
            return value
                .checked_mul(millis_per_unit)
                .map(Duration::from_millis)
                .ok_or_else(|| format!("duration too large: {}", src));
        }
    }

    // No suffix, treat as seconds
    let secs: u64 = src
        .parse()
        .map_err(|_| format!("invalid duration: {}", src))?;
    Ok(Duration::from_secs(secs))
}
