//! Reconnect delay schedule: bounded exponential growth with symmetric jitter.
//!
//! `exp = min(cap, base * 2^attempt)`, then `± exp * jitter_ratio`, rounded
//! and clamped at zero. The random source is injected so the schedule is
//! deterministic under test.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use relay_core::config::ReconnectConfig;

static JITTER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Tuning for [`backoff_ms`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub cap_ms: u64,
    /// Fraction of the exponential delay added or removed at random (0..=1).
    pub jitter_ratio: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            cap_ms: 30_000,
            jitter_ratio: 0.2,
        }
    }
}

impl From<&ReconnectConfig> for BackoffConfig {
    fn from(cfg: &ReconnectConfig) -> Self {
        Self {
            base_ms: cfg.base_ms,
            cap_ms: cfg.cap_ms,
            jitter_ratio: cfg.jitter_ratio,
        }
    }
}

/// Delay before reconnect attempt `attempt`, with `rand` yielding `[0, 1)`.
pub fn backoff_ms(attempt: u32, cfg: &BackoffConfig, rand: impl FnOnce() -> f64) -> u64 {
    let exp = 2_u64
        .checked_pow(attempt)
        .and_then(|factor| cfg.base_ms.checked_mul(factor))
        .unwrap_or(u64::MAX)
        .min(cfg.cap_ms) as f64;

    let jitter = exp * cfg.jitter_ratio * (rand() * 2.0 - 1.0);
    (exp + jitter).round().max(0.0) as u64
}

/// [`backoff_ms`] with a clock-seeded random source.
pub fn reconnect_backoff_ms(attempt: u32, cfg: &BackoffConfig) -> u64 {
    backoff_ms(attempt, cfg, clock_unit)
}

/// Pseudo-random value in `[0, 1)` mixed from the wall clock and a counter.
///
/// Reconnect jitter only needs to de-synchronise retries, not to be
/// unpredictable, so this avoids a rand dependency.
fn clock_unit() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    let seed = JITTER_COUNTER.fetch_add(1, Ordering::Relaxed) ^ nanos;
    let mixed = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(17);
    (mixed >> 11) as f64 / (1_u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(base_ms: u64, cap_ms: u64) -> BackoffConfig {
        BackoffConfig {
            base_ms,
            cap_ms,
            jitter_ratio: 0.0,
        }
    }

    #[test]
    fn doubles_per_attempt_without_jitter() {
        let cfg = no_jitter(100, 10_000);
        assert_eq!(backoff_ms(0, &cfg, || 0.5), 100);
        assert_eq!(backoff_ms(1, &cfg, || 0.5), 200);
        assert_eq!(backoff_ms(2, &cfg, || 0.5), 400);
    }

    #[test]
    fn caps_at_cap_ms() {
        let cfg = no_jitter(100, 500);
        assert_eq!(backoff_ms(10, &cfg, || 0.5), 500);
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let cfg = no_jitter(1_000, 30_000);
        assert_eq!(backoff_ms(200, &cfg, || 0.5), 30_000);
    }

    #[test]
    fn jitter_spans_plus_minus_ratio() {
        let cfg = BackoffConfig {
            base_ms: 1_000,
            cap_ms: 30_000,
            jitter_ratio: 0.2,
        };
        assert_eq!(backoff_ms(0, &cfg, || 0.0), 800);
        assert_eq!(backoff_ms(0, &cfg, || 0.5), 1_000);
        assert_eq!(backoff_ms(0, &cfg, || 0.999_999), 1_200);
    }

    #[test]
    fn full_jitter_never_goes_negative() {
        let cfg = BackoffConfig {
            base_ms: 10,
            cap_ms: 100,
            jitter_ratio: 1.0,
        };
        assert_eq!(backoff_ms(0, &cfg, || 0.0), 0);
    }

    #[test]
    fn clock_seeded_delay_stays_in_bounds() {
        let cfg = BackoffConfig::default();
        for attempt in 0..12 {
            let delay = reconnect_backoff_ms(attempt, &cfg);
            let upper = (cfg.cap_ms as f64 * (1.0 + cfg.jitter_ratio)).round() as u64;
            assert!(delay <= upper, "attempt {attempt}: {delay} > {upper}");
        }
    }

    #[test]
    fn clock_unit_is_half_open() {
        for _ in 0..1_000 {
            let r = clock_unit();
            assert!((0.0..1.0).contains(&r));
        }
    }
}
