//! Per-component RS scoring.
//!
//! Each function compares one aspect of an instrument sample against the
//! benchmark sample and returns a [`ComponentScore`]: a normalized value
//! in `[0, 100]` with its raw inputs attached, or a degradation reason.
//! Degradation never aborts the symbol; the engine folds a degraded
//! component out of the overall blend.

use serde_json::json;

use crate::core::math::{
    coefficient_of_variation, mean, normalize_relative, pct_change, regression_slope,
};
use crate::core::types::{ComponentScore, Horizon, InstrumentSample};

/// Minimum history length for the 5m first/last momentum fallback.
const MIN_MOMENTUM_SAMPLES_5M: usize = 5;
/// Minimum history length for the 15m regression momentum fallback.
const MIN_MOMENTUM_SAMPLES_15M: usize = 10;
/// Minimum history length for a meaningful price-consistency sub-score.
const MIN_CONSISTENCY_SAMPLES: usize = 5;

/// Price component: the instrument's percent change off its previous
/// close relative to the benchmark's, mapped onto the RS scale.
pub fn price_score(stock: &InstrumentSample, bench: &InstrumentSample) -> ComponentScore {
    if stock.previous_close <= 0.0 {
        return ComponentScore::degraded("instrument previous close not positive");
    }
    if bench.previous_close <= 0.0 {
        return ComponentScore::degraded("benchmark previous close not positive");
    }
    let stock_change = pct_change(stock.previous_close, stock.current_price);
    let bench_change = pct_change(bench.previous_close, bench.current_price);
    let relative = stock_change - bench_change;
    ComponentScore::ok(
        normalize_relative(relative),
        json!({
            "stock_change_pct": stock_change,
            "benchmark_change_pct": bench_change,
            "relative_performance": relative,
        }),
    )
}

/// Raw momentum reading for one side, using the horizon-specific input
/// window. Falls back to `0.0` when the history is too short for the
/// horizon's method.
fn momentum_input(sample: &InstrumentSample, horizon: Horizon) -> f64 {
    let history = &sample.price_history;
    match horizon {
        Horizon::OneMinute => {
            // Price delta across the last three samples.
            if history.len() >= 3 {
                let first = history[history.len() - 3];
                pct_change(first, history[history.len() - 1])
            } else {
                0.0
            }
        }
        Horizon::FiveMinute => {
            let ind = &sample.technical_indicators;
            match (ind.sma, ind.ema) {
                (Some(sma), Some(ema)) if sma != 0.0 => (ema - sma) / sma * 100.0,
                _ if history.len() >= MIN_MOMENTUM_SAMPLES_5M => {
                    pct_change(history[0], history[history.len() - 1])
                }
                _ => 0.0,
            }
        }
        Horizon::FifteenMinute => {
            let ind = &sample.technical_indicators;
            match (ind.rsi, ind.macd) {
                (Some(rsi), Some(macd)) => {
                    let rsi_part = (rsi - 50.0) / 50.0 * 50.0;
                    let macd_part = macd.signum() * 50.0;
                    (rsi_part + macd_part) / 2.0
                }
                _ if history.len() >= MIN_MOMENTUM_SAMPLES_15M => {
                    let slope = regression_slope(history);
                    let m = mean(history);
                    if m == 0.0 { 0.0 } else { slope / m * 100.0 }
                }
                _ => 0.0,
            }
        }
    }
}

/// Momentum component: the difference between instrument and benchmark
/// momentum readings, mapped onto the RS scale.
pub fn momentum_score(
    stock: &InstrumentSample,
    bench: &InstrumentSample,
    horizon: Horizon,
) -> ComponentScore {
    let stock_momentum = momentum_input(stock, horizon);
    let bench_momentum = momentum_input(bench, horizon);
    if !stock_momentum.is_finite() || !bench_momentum.is_finite() {
        return ComponentScore::degraded("non-finite momentum input");
    }
    let relative = stock_momentum - bench_momentum;
    ComponentScore::ok(
        normalize_relative(relative),
        json!({
            "stock_momentum": stock_momentum,
            "benchmark_momentum": bench_momentum,
            "relative_momentum": relative,
        }),
    )
}

/// Relative volume ratio: current over average, with absent volumes
/// defaulting to zero current and unit average.
fn volume_ratio(sample: &InstrumentSample) -> f64 {
    let current = sample.current_volume.unwrap_or(0.0);
    let average = match sample.average_volume {
        Some(v) if v > 0.0 => v,
        _ => 1.0,
    };
    current / average
}

/// Volume component: difference of current-to-average volume ratios,
/// mapped onto the RS scale.
pub fn volume_score(stock: &InstrumentSample, bench: &InstrumentSample) -> ComponentScore {
    let stock_ratio = volume_ratio(stock);
    let bench_ratio = volume_ratio(bench);
    let relative = stock_ratio - bench_ratio;
    ComponentScore::ok(
        normalize_relative(relative),
        json!({
            "stock_volume_ratio": stock_ratio,
            "benchmark_volume_ratio": bench_ratio,
            "relative_volume": relative,
        }),
    )
}

/// Opening-range-breakout component (5m only): difference of each side's
/// ORB performance percentage.
pub fn orb_score(stock: &InstrumentSample, bench: &InstrumentSample) -> ComponentScore {
    let stock_orb = match stock.orb_performance {
        Some(v) if v.is_finite() => v,
        _ => return ComponentScore::degraded("instrument orb performance unavailable"),
    };
    let bench_orb = match bench.orb_performance {
        Some(v) if v.is_finite() => v,
        _ => return ComponentScore::degraded("benchmark orb performance unavailable"),
    };
    let relative = stock_orb - bench_orb;
    ComponentScore::ok(
        normalize_relative(relative),
        json!({
            "stock_orb_pct": stock_orb,
            "benchmark_orb_pct": bench_orb,
            "relative_orb": relative,
        }),
    )
}

/// Trend-sustainability component (15m only): weighted blend of volume
/// confirmation, price consistency and technical alignment, each scored
/// in `[0, 1]` and scaled onto the RS scale.
pub fn trend_score(stock: &InstrumentSample) -> ComponentScore {
    let volume_confirmation = (volume_ratio(stock) / 2.0).min(1.0);

    let price_consistency = if stock.price_history.len() < MIN_CONSISTENCY_SAMPLES {
        0.5
    } else {
        (1.0 - coefficient_of_variation(&stock.price_history)).max(0.0)
    };

    let ind = &stock.technical_indicators;
    let mut technical_alignment: f64 = 0.5;
    if ind.rsi.is_some_and(|rsi| rsi > 50.0) {
        technical_alignment += 0.2;
    }
    if ind.macd.is_some_and(|macd| macd > 0.0) {
        technical_alignment += 0.2;
    }
    if ind.sma.is_some_and(|sma| stock.current_price > sma) {
        technical_alignment += 0.1;
    }
    technical_alignment = technical_alignment.min(1.0);

    let blend =
        0.3 * volume_confirmation + 0.4 * price_consistency + 0.3 * technical_alignment;
    ComponentScore::ok(
        blend * 100.0,
        json!({
            "volume_confirmation": volume_confirmation,
            "price_consistency": price_consistency,
            "technical_alignment": technical_alignment,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TechnicalIndicators;

    fn sample(current: f64, prev: f64) -> InstrumentSample {
        InstrumentSample::new(current, prev)
    }

    fn score_value(score: ComponentScore) -> f64 {
        match score {
            ComponentScore::Ok { value, .. } => value,
            ComponentScore::Degraded { reason } => panic!("degraded: {reason}"),
        }
    }

    #[test]
    fn test_price_score_reference_case() {
        // AAPL +10% against a +2% benchmark: relative 8 maps to 58.
        let v = score_value(price_score(&sample(110.0, 100.0), &sample(102.0, 100.0)));
        assert!((v - 58.0).abs() < 1e-12);
    }

    #[test]
    fn test_price_score_neutral_when_matched() {
        let v = score_value(price_score(&sample(105.0, 100.0), &sample(105.0, 100.0)));
        assert!((v - 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_price_score_bounded() {
        // A 200% outperformance clamps at the top of the scale.
        let v = score_value(price_score(&sample(300.0, 100.0), &sample(100.0, 100.0)));
        assert_eq!(v, 100.0);
        let v = score_value(price_score(&sample(10.0, 100.0), &sample(100.0, 100.0)));
        assert_eq!(v, 0.0);
    }

    #[test]
    fn test_price_score_monotonic() {
        let bench = sample(100.0, 100.0);
        let mut prev = f64::MIN;
        for pct in [-40.0, -10.0, 0.0, 5.0, 25.0, 45.0] {
            let stock = sample(100.0 + pct, 100.0);
            let v = score_value(price_score(&stock, &bench));
            assert!(v >= prev, "not monotonic at {pct}");
            prev = v;
        }
    }

    #[test]
    fn test_momentum_one_minute_window() {
        let mut stock = sample(110.0, 100.0);
        stock.price_history = vec![100.0, 102.0, 100.0, 105.0, 110.0];
        let bench = sample(100.0, 100.0);
        // Last three samples: 100 -> 110 is +10%, benchmark flat.
        let v = score_value(momentum_score(&stock, &bench, Horizon::OneMinute));
        assert!((v - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_momentum_short_history_is_neutral() {
        let stock = sample(110.0, 100.0);
        let bench = sample(100.0, 100.0);
        for h in Horizon::all() {
            let v = score_value(momentum_score(&stock, &bench, h));
            assert_eq!(v, 50.0);
        }
    }

    #[test]
    fn test_momentum_five_minute_prefers_indicators() {
        let mut stock = sample(110.0, 100.0);
        stock.technical_indicators = TechnicalIndicators {
            sma: Some(100.0),
            ema: Some(105.0),
            ..Default::default()
        };
        // History would say -50% but the SMA/EMA spread (+5%) wins.
        stock.price_history = vec![200.0, 180.0, 150.0, 120.0, 100.0];
        let bench = sample(100.0, 100.0);
        let v = score_value(momentum_score(&stock, &bench, Horizon::FiveMinute));
        assert!((v - 55.0).abs() < 1e-9);
    }

    #[test]
    fn test_momentum_fifteen_minute_composite() {
        let mut stock = sample(110.0, 100.0);
        stock.technical_indicators = TechnicalIndicators {
            rsi: Some(75.0),
            macd: Some(1.5),
            ..Default::default()
        };
        let bench = sample(100.0, 100.0);
        // ((75-50)/50*50 + 50) / 2 = 37.5 relative momentum.
        let v = score_value(momentum_score(&stock, &bench, Horizon::FifteenMinute));
        assert!((v - 87.5).abs() < 1e-9);
    }

    #[test]
    fn test_volume_score_guards_missing_volume() {
        // No volume fields at all: both ratios zero, neutral output.
        let v = score_value(volume_score(&sample(100.0, 100.0), &sample(100.0, 100.0)));
        assert_eq!(v, 50.0);
    }

    #[test]
    fn test_volume_score_relative_ratio() {
        let mut stock = sample(100.0, 100.0);
        stock.current_volume = Some(3_000_000.0);
        stock.average_volume = Some(1_000_000.0);
        let mut bench = sample(100.0, 100.0);
        bench.current_volume = Some(1_000_000.0);
        bench.average_volume = Some(1_000_000.0);
        // Ratios 3.0 vs 1.0: +2 relative maps to 52.
        let v = score_value(volume_score(&stock, &bench));
        assert!((v - 52.0).abs() < 1e-9);
    }

    #[test]
    fn test_orb_requires_both_sides() {
        let mut stock = sample(100.0, 100.0);
        stock.orb_performance = Some(12.0);
        let bench = sample(100.0, 100.0);
        assert!(matches!(
            orb_score(&stock, &bench),
            ComponentScore::Degraded { .. }
        ));

        let mut bench = bench;
        bench.orb_performance = Some(2.0);
        let v = score_value(orb_score(&stock, &bench));
        assert!((v - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_trend_score_defaults() {
        // Bare sample: volume confirmation 0, consistency default 0.5,
        // alignment baseline 0.5 -> 0.35 blend -> 35.
        let v = score_value(trend_score(&sample(100.0, 100.0)));
        assert!((v - 35.0).abs() < 1e-9);
    }

    #[test]
    fn test_trend_score_full_alignment_caps() {
        let mut stock = sample(120.0, 100.0);
        stock.current_volume = Some(4_000_000.0);
        stock.average_volume = Some(1_000_000.0);
        stock.price_history = vec![100.0, 100.0, 100.0, 100.0, 100.0];
        stock.technical_indicators = TechnicalIndicators {
            sma: Some(100.0),
            ema: Some(110.0),
            rsi: Some(70.0),
            macd: Some(2.0),
        };
        // All sub-scores saturate: 0.3 + 0.4 + 0.3 = 1.0 -> 100.
        let v = score_value(trend_score(&stock));
        assert!((v - 100.0).abs() < 1e-9);
    }
}
