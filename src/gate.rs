//! Delta versus full upload decision

use crate::config::{Config, DEFAULT_MIN_MATCH_RATIO};
use crate::delta::MatchStats;
use crate::error::{Error, Result};
use serde::Serialize;

/// How the new file should be transferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transfer {
    /// Send the BD file
    Delta,
    /// Too little of the base was reused; send the whole file
    FullUpload,
}

/// Threshold policy over the match ratio reported by the matcher
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatioGate {
    min_ratio: f64,
}

impl Default for RatioGate {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_MATCH_RATIO)
    }
}

impl RatioGate {
    /// Create a gate; the threshold is clamped to `[0, 1]`
    pub fn new(min_ratio: f64) -> Self {
        let min_ratio = if min_ratio.is_nan() {
            DEFAULT_MIN_MATCH_RATIO
        } else {
            min_ratio.clamp(0.0, 1.0)
        };
        Self { min_ratio }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.min_match_ratio)
    }

    pub fn min_ratio(&self) -> f64 {
        self.min_ratio
    }

    /// Decide how to transfer a file whose delta produced `stats`
    pub fn evaluate(&self, stats: &MatchStats) -> Transfer {
        if stats.match_ratio() >= self.min_ratio {
            Transfer::Delta
        } else {
            Transfer::FullUpload
        }
    }

    /// Like [`evaluate`](Self::evaluate), but a full upload is an error
    pub fn enforce(&self, stats: &MatchStats) -> Result<()> {
        match self.evaluate(stats) {
            Transfer::Delta => Ok(()),
            Transfer::FullUpload => {
                tracing::debug!(
                    ratio = stats.match_ratio(),
                    threshold = self.min_ratio,
                    "Reuse rate below threshold"
                );
                Err(Error::LowReuseRate {
                    ratio: stats.match_ratio(),
                    threshold: self.min_ratio,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn stats(matched: u64, total: u64) -> MatchStats {
        MatchStats {
            matched_bytes: matched,
            total_bytes: total,
            copy_ops: 0,
            literal_ops: 0,
            block_size: 2048,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn test_evaluate() {
        let gate = RatioGate::new(0.8);
        assert_eq!(gate.evaluate(&stats(90, 100)), Transfer::Delta);
        assert_eq!(gate.evaluate(&stats(80, 100)), Transfer::Delta);
        assert_eq!(gate.evaluate(&stats(79, 100)), Transfer::FullUpload);
    }

    #[test]
    fn test_empty_file_always_delta() {
        assert_eq!(RatioGate::new(1.0).evaluate(&stats(0, 0)), Transfer::Delta);
    }

    #[test]
    fn test_enforce() {
        let gate = RatioGate::new(0.5);
        assert!(gate.enforce(&stats(60, 100)).is_ok());

        let err = gate.enforce(&stats(10, 100)).unwrap_err();
        assert!(matches!(err, Error::LowReuseRate { threshold, .. } if threshold == 0.5));
    }

    #[test]
    fn test_threshold_clamped() {
        assert_eq!(RatioGate::new(7.0).min_ratio(), 1.0);
        assert_eq!(RatioGate::new(-1.0).min_ratio(), 0.0);
        assert_eq!(RatioGate::new(f64::NAN).min_ratio(), DEFAULT_MIN_MATCH_RATIO);
        assert_eq!(RatioGate::default().min_ratio(), DEFAULT_MIN_MATCH_RATIO);
    }
}
