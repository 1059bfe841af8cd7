// Premarket gap screening
use serde::{Deserialize, Serialize};

use crate::models::Candidate;

/// Minimums a candidate must meet on every filter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScreeningThresholds {
    pub gap_pct: f64,
    pub min_volume: u64,
    pub min_rotation_pct: f64,
    pub min_sentiment: f64,
}

impl Default for ScreeningThresholds {
    fn default() -> Self {
        Self {
            gap_pct: 3.0,
            min_volume: 100_000,
            min_rotation_pct: 50.0,
            min_sentiment: 3.0,
        }
    }
}

/// Gap between premarket price and previous close, in percent
pub fn gap_percent(candidate: &Candidate) -> f64 {
    if candidate.previous_close <= 0.0 {
        return 0.0;
    }
    (candidate.premarket_price - candidate.previous_close) / candidate.previous_close * 100.0
}

/// Premarket volume as a percentage of the public float (0 when float is unknown)
pub fn float_rotation(candidate: &Candidate) -> f64 {
    if candidate.float_shares == 0 {
        return 0.0;
    }
    candidate.premarket_volume as f64 / candidate.float_shares as f64 * 100.0
}

pub fn passes_gap(candidate: &Candidate, threshold: f64) -> bool {
    gap_percent(candidate) >= threshold
}

pub fn passes_volume(candidate: &Candidate, min_volume: u64) -> bool {
    candidate.premarket_volume >= min_volume
}

pub fn passes_float_rotation(candidate: &Candidate, min_rotation: f64) -> bool {
    float_rotation(candidate) >= min_rotation
}

pub fn passes_sentiment(candidate: &Candidate, min_score: f64) -> bool {
    candidate.sentiment_score >= min_score
}

/// Keep only the candidates that pass all four filters
pub fn screen(candidates: &[Candidate], thresholds: &ScreeningThresholds) -> Vec<Candidate> {
    candidates
        .iter()
        .filter(|c| {
            let pass = passes_gap(c, thresholds.gap_pct)
                && passes_volume(c, thresholds.min_volume)
                && passes_float_rotation(c, thresholds.min_rotation_pct)
                && passes_sentiment(c, thresholds.min_sentiment);
            if !pass {
                tracing::debug!(
                    symbol = %c.symbol,
                    gap = gap_percent(c),
                    volume = c.premarket_volume,
                    rotation = float_rotation(c),
                    sentiment = c.sentiment_score,
                    "Screened out"
                );
            }
            pass
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good() -> Candidate {
        Candidate {
            symbol: "GOOD".to_string(),
            previous_close: 100.0,
            premarket_price: 103.5, // +3.5%
            premarket_volume: 150_000,
            float_shares: 1_000_000,
            sentiment_score: 3.5,
        }
    }

    fn thresholds() -> ScreeningThresholds {
        ScreeningThresholds {
            gap_pct: 3.0,
            min_volume: 100_000,
            min_rotation_pct: 50.0,
            min_sentiment: 3.0,
        }
    }

    #[test]
    fn test_metrics() {
        let c = good();
        assert!((gap_percent(&c) - 3.5).abs() < 1e-9);
        assert!((float_rotation(&c) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_each_filter_independently() {
        let c = good();
        let t = thresholds();

        assert!(passes_gap(&c, t.gap_pct));
        assert!(passes_volume(&c, t.min_volume));
        assert!(passes_sentiment(&c, t.min_sentiment));
        // 150k / 1M = 15% rotation, below a 50% minimum
        assert!(!passes_float_rotation(&c, t.min_rotation_pct));
        assert!(passes_float_rotation(&c, 15.0));

        let low_gap = Candidate { premarket_price: 100.5, ..good() };
        assert!(!passes_gap(&low_gap, t.gap_pct));

        let low_volume = Candidate { premarket_volume: 10_000, ..good() };
        assert!(!passes_volume(&low_volume, t.min_volume));

        let low_sentiment = Candidate { sentiment_score: 0.5, ..good() };
        assert!(!passes_sentiment(&low_sentiment, t.min_sentiment));
    }

    #[test]
    fn test_screen_passes_candidate_meeting_all_filters() {
        // Rotation threshold met when the float is small enough
        let passing = Candidate { float_shares: 200_000, ..good() };
        let t = thresholds();

        let screened = screen(&[passing.clone()], &t);
        assert_eq!(screened, vec![passing.clone()]);

        // Dropping any single input below its threshold excludes the candidate
        let cases = vec![
            Candidate { premarket_price: 102.9, ..passing.clone() },
            Candidate { premarket_volume: 99_999, float_shares: 100_000, ..passing.clone() },
            Candidate { float_shares: 10_000_000, ..passing.clone() },
            Candidate { sentiment_score: 2.9, ..passing.clone() },
        ];
        for case in cases {
            assert!(screen(&[case.clone()], &t).is_empty(), "{:?} should be excluded", case);
        }
    }

    #[test]
    fn test_screen_with_default_rotation_keeps_only_good() {
        let t = ScreeningThresholds { min_rotation_pct: 10.0, ..thresholds() };
        let candidates = vec![
            good(),
            Candidate { symbol: "BADG".into(), premarket_price: 100.5, ..good() },
            Candidate { symbol: "BADV".into(), premarket_volume: 10_000, ..good() },
            Candidate { symbol: "BADR".into(), float_shares: 10_000_000, ..good() },
            Candidate { symbol: "BADS".into(), sentiment_score: 0.5, ..good() },
        ];

        let symbols: Vec<String> = screen(&candidates, &t).into_iter().map(|c| c.symbol).collect();
        assert_eq!(symbols, vec!["GOOD".to_string()]);
    }

    #[test]
    fn test_zero_float_and_zero_close() {
        let c = Candidate { float_shares: 0, previous_close: 0.0, ..good() };
        assert_eq!(float_rotation(&c), 0.0);
        assert_eq!(gap_percent(&c), 0.0);
    }
}
