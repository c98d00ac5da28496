//! Approximate beacon distance from received signal strength.

/// Calibrated RSSI of a typical beacon measured at one meter, in dBm.
pub const TX_POWER_AT_ONE_METER: f64 = -59.0;

/// Free-space path-loss exponent.
pub const PATH_LOSS_EXPONENT: f64 = 2.0;

/// Estimate distance in meters using the log-distance path-loss model:
/// `10 ^ ((tx_power - rssi) / (10 * n))`.
///
/// No clamping is applied. Physically implausible inputs give implausible
/// results: very strong signals underflow to exactly `0.0` and very weak ones
/// overflow to `f64::INFINITY` for RSSI values far outside the radio range.
///
/// # Example
/// ```
/// use beacon_campaign_listener::distance::estimate;
///
/// assert!((estimate(-59) - 1.0).abs() < 1e-9);
/// assert!(estimate(-70) > estimate(-60));
/// ```
pub fn estimate(rssi: i16) -> f64 {
    10f64.powf((TX_POWER_AT_ONE_METER - f64::from(rssi)) / (10.0 * PATH_LOSS_EXPONENT))
}
