//! Statistical primitives for RS component calculations.
//!
//! Pure helpers over `f64` slices with no dependencies. Functions guard
//! their inputs and return a documented fallback (usually `0.0`) rather
//! than propagating errors; the calculation layer decides whether a
//! fallback means degradation.

/// Arithmetic mean. Returns `0.0` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1). Returns `0.0` for fewer than two
/// observations.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Coefficient of variation: std-dev over mean. Returns `0.0` when the
/// mean is zero or there are too few samples.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    let m = mean(values);
    if m == 0.0 {
        return 0.0;
    }
    std_dev(values) / m.abs()
}

/// Percentage change from `old` to `new`. Returns `0.0` when `old` is zero.
pub fn pct_change(old: f64, new: f64) -> f64 {
    if old == 0.0 {
        return 0.0;
    }
    (new - old) / old * 100.0
}

/// Least-squares slope of `values` against their indices. Returns `0.0`
/// for fewer than two samples or a degenerate denominator.
pub fn regression_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let nf = n as f64;
    let sum_x = (0..n).map(|i| i as f64).sum::<f64>();
    let sum_y = values.iter().sum::<f64>();
    let sum_xy = values.iter().enumerate().map(|(i, y)| i as f64 * y).sum::<f64>();
    let sum_x2 = (0..n).map(|i| (i as f64).powi(2)).sum::<f64>();
    let denom = nf * sum_x2 - sum_x * sum_x;
    if denom == 0.0 {
        return 0.0;
    }
    (nf * sum_xy - sum_x * sum_y) / denom
}

/// Map a relative-performance value onto the RS scale: clamp to
/// `[-50, 50]` then shift linearly into `[0, 100]`. Zero maps to the
/// neutral 50, and the mapping is monotonic within the clamp range.
pub fn normalize_relative(v: f64) -> f64 {
    v.clamp(-50.0, 50.0) + 50.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_std_dev() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[1.0, 2.0, 3.0]), 2.0);
        assert!((std_dev(&[1.0, 2.0, 3.0]) - 1.0).abs() < 1e-12);
        assert_eq!(std_dev(&[5.0]), 0.0);
    }

    #[test]
    fn test_coefficient_of_variation() {
        assert_eq!(coefficient_of_variation(&[]), 0.0);
        // Constant series varies not at all.
        assert_eq!(coefficient_of_variation(&[4.0, 4.0, 4.0]), 0.0);
        let cov = coefficient_of_variation(&[90.0, 100.0, 110.0]);
        assert!(cov > 0.0 && cov < 1.0);
    }

    #[test]
    fn test_pct_change() {
        assert_eq!(pct_change(100.0, 110.0), 10.0);
        assert_eq!(pct_change(0.0, 110.0), 0.0);
        assert_eq!(pct_change(100.0, 90.0), -10.0);
    }

    #[test]
    fn test_regression_slope() {
        // Perfect line y = 2x + 1.
        let slope = regression_slope(&[1.0, 3.0, 5.0, 7.0]);
        assert!((slope - 2.0).abs() < 1e-12);
        assert_eq!(regression_slope(&[1.0]), 0.0);
        // Flat series has zero slope.
        assert!(regression_slope(&[3.0, 3.0, 3.0]).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_relative() {
        assert_eq!(normalize_relative(0.0), 50.0);
        assert_eq!(normalize_relative(8.0), 58.0);
        assert_eq!(normalize_relative(-80.0), 0.0);
        assert_eq!(normalize_relative(999.0), 100.0);
        // Monotonic within the clamp range.
        let mut prev = normalize_relative(-50.0);
        for i in -49..=50 {
            let v = normalize_relative(i as f64);
            assert!(v >= prev);
            prev = v;
        }
    }
}
