//! Freshness classification of the selected message.

use crate::config::FreshnessThresholds;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::Level;

/// Elapsed time from which the `"{m}m {s}s"` form is used.
const MINUTES_FORMAT_FROM: Duration = Duration::from_secs(120);

/// How old the passcode message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FreshnessTier {
    /// Within the warn threshold.
    Fresh,
    /// Past the warn threshold, within the stale bound.
    Aging,
    /// Past the stale bound; the passcode has most likely expired.
    Stale,
}

impl FreshnessTier {
    /// Log level used to report a passcode of this tier.
    #[must_use]
    pub fn level(self) -> Level {
        match self {
            FreshnessTier::Fresh => Level::INFO,
            FreshnessTier::Aging => Level::WARN,
            FreshnessTier::Stale => Level::ERROR,
        }
    }
}

impl std::fmt::Display for FreshnessTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FreshnessTier::Fresh => write!(f, "fresh"),
            FreshnessTier::Aging => write!(f, "aging"),
            FreshnessTier::Stale => write!(f, "stale"),
        }
    }
}

/// Classified age of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Freshness {
    /// The tier.
    pub tier: FreshnessTier,
    /// Time since the message was received, zero if it is dated in the future.
    pub elapsed: Duration,
    /// Elapsed time as shown to the operator, e.g. `"2m 5s"`.
    pub display: String,
}

/// Classifies the age of a message received at `source` as seen at `now`.
#[must_use]
pub fn classify(
    now: DateTime<Utc>,
    source: DateTime<Utc>,
    thresholds: &FreshnessThresholds,
) -> Freshness {
    let elapsed = (now - source).to_std().unwrap_or(Duration::ZERO);

    let tier = if elapsed > thresholds.stale_after {
        FreshnessTier::Stale
    } else if elapsed > thresholds.warn_after {
        FreshnessTier::Aging
    } else {
        FreshnessTier::Fresh
    };

    Freshness {
        tier,
        elapsed,
        display: format_elapsed(elapsed, tier),
    }
}

/// Renders elapsed time with whole (truncated) units.
///
/// Stale ages show minutes only; from two minutes on minutes and seconds;
/// below that seconds only.
#[must_use]
pub fn format_elapsed(elapsed: Duration, tier: FreshnessTier) -> String {
    let total_secs = elapsed.as_secs();
    let minutes = total_secs / 60;
    let seconds = total_secs % 60;

    if tier == FreshnessTier::Stale {
        format!("{minutes}m")
    } else if elapsed >= MINUTES_FORMAT_FROM {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{total_secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap()
    }

    fn classify_secs(secs: i64, warn_secs: u64) -> Freshness {
        let thresholds = FreshnessThresholds {
            warn_after: Duration::from_secs(warn_secs),
            ..FreshnessThresholds::default()
        };
        classify(now(), now() - chrono::Duration::seconds(secs), &thresholds)
    }

    #[test]
    fn test_seconds_only_below_two_minutes() {
        let freshness = classify_secs(45, 30);
        assert_eq!(freshness.display, "45s");
        assert_eq!(freshness.tier, FreshnessTier::Aging);

        assert_eq!(classify_secs(119, 300).display, "119s");
    }

    #[test]
    fn test_minutes_and_seconds() {
        let freshness = classify_secs(125, 30);
        assert_eq!(freshness.display, "2m 5s");
        assert_eq!(freshness.tier, FreshnessTier::Aging);

        assert_eq!(classify_secs(120, 30).display, "2m 0s");
    }

    #[test]
    fn test_stale_shows_minutes_only() {
        let freshness = classify_secs(3700, 30);
        assert_eq!(freshness.tier, FreshnessTier::Stale);
        assert_eq!(freshness.display, "61m");
    }

    #[test]
    fn test_stale_boundary_ignores_warn_threshold() {
        // Exactly one hour is not yet stale
        assert_eq!(classify_secs(3600, 30).tier, FreshnessTier::Aging);
        assert_eq!(classify_secs(3601, 30).tier, FreshnessTier::Stale);
        // Even a huge warn threshold does not move the stale boundary
        assert_eq!(classify_secs(3601, 86_400).tier, FreshnessTier::Stale);
    }

    #[test]
    fn test_warn_threshold_is_exclusive() {
        assert_eq!(classify_secs(30, 30).tier, FreshnessTier::Fresh);
        assert_eq!(classify_secs(31, 30).tier, FreshnessTier::Aging);
    }

    #[test]
    fn test_truncates_sub_second_elapsed() {
        let thresholds = FreshnessThresholds::default();
        let source = now() - chrono::Duration::milliseconds(45_999);
        let freshness = classify(now(), source, &thresholds);
        assert_eq!(freshness.display, "45s");
    }

    #[test]
    fn test_future_message_is_fresh() {
        let freshness = classify_secs(-90, 30);
        assert_eq!(freshness.tier, FreshnessTier::Fresh);
        assert_eq!(freshness.elapsed, Duration::ZERO);
        assert_eq!(freshness.display, "0s");
    }

    #[test]
    fn test_tier_levels() {
        assert_eq!(FreshnessTier::Fresh.level(), Level::INFO);
        assert_eq!(FreshnessTier::Aging.level(), Level::WARN);
        assert_eq!(FreshnessTier::Stale.level(), Level::ERROR);
    }
}
