//! Batch RS computation.
//!
//! [`CalcEngine`] maps a universe of instrument samples and a benchmark
//! map into one [`RsRecord`] per symbol for a given horizon. Failures are
//! per-symbol: a missing or malformed sample yields an invalid record
//! with neutral components, never a batch abort. The engine is pure aside
//! from record timestamps, and memoizes identical input batches behind a
//! bounded FIFO cache.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::{Hash, Hasher};

use tracing::{debug, warn};

use crate::calc::components::{momentum_score, orb_score, price_score, trend_score, volume_score};
use crate::core::types::{
    now_ms, Horizon, HorizonComponents, InstrumentSample, RsComponent, RsRecord,
};
use crate::error::{Result, RsError};

/// Default capacity of the memoization cache.
pub const DEFAULT_MEMO_CAPACITY: usize = 1000;

pub struct CalcEngine {
    /// Symbol used as the benchmark fallback when a symbol has no
    /// benchmark entry of its own.
    benchmark_symbol: String,
    memo: HashMap<u64, HashMap<String, RsRecord>>,
    memo_order: VecDeque<u64>,
    memo_capacity: usize,
    memo_hits: u64,
}

impl CalcEngine {
    pub fn new(benchmark_symbol: impl Into<String>, memo_capacity: usize) -> Self {
        Self {
            benchmark_symbol: benchmark_symbol.into(),
            memo: HashMap::new(),
            memo_order: VecDeque::new(),
            memo_capacity: memo_capacity.max(1),
            memo_hits: 0,
        }
    }

    pub fn memo_hits(&self) -> u64 {
        self.memo_hits
    }

    /// Compute RS records for every symbol in `instruments` against
    /// `benchmarks` at the given horizon.
    ///
    /// An empty instrument map is the only batch-level failure; every
    /// per-symbol problem degrades to an invalid record so the output is
    /// always complete over the input universe.
    pub fn compute(
        &mut self,
        instruments: &HashMap<String, InstrumentSample>,
        benchmarks: &HashMap<String, InstrumentSample>,
        horizon: Horizon,
    ) -> Result<HashMap<String, RsRecord>> {
        if instruments.is_empty() {
            return Err(RsError::DataUnavailable {
                horizon,
                reason: "instrument data map is empty".into(),
            });
        }

        let key = memo_key(instruments, benchmarks, horizon);
        if let Some(cached) = self.memo.get(&key) {
            self.memo_hits += 1;
            debug!(%horizon, symbols = cached.len(), "memoized batch reused");
            // Re-stamp timestamps; everything else is bit-identical.
            let stamp = now_ms();
            return Ok(cached
                .iter()
                .map(|(sym, rec)| {
                    let mut rec = rec.clone();
                    rec.timestamp_ms = stamp;
                    (sym.clone(), rec)
                })
                .collect());
        }

        let mut out = HashMap::with_capacity(instruments.len());
        for (symbol, sample) in instruments {
            let record = self.compute_symbol(symbol, sample, benchmarks, horizon);
            out.insert(symbol.clone(), record);
        }

        self.memo_insert(key, out.clone());
        Ok(out)
    }

    fn compute_symbol(
        &self,
        symbol: &str,
        sample: &InstrumentSample,
        benchmarks: &HashMap<String, InstrumentSample>,
        horizon: Horizon,
    ) -> RsRecord {
        if let Err(reason) = sample.validate_shape() {
            warn!(symbol, %horizon, %reason, "invalid instrument sample");
            return RsRecord::invalid(horizon, symbol, format!("invalid sample: {reason}"));
        }

        // Symbol-keyed benchmark first, then the configured default.
        let bench = match benchmarks
            .get(symbol)
            .or_else(|| benchmarks.get(&self.benchmark_symbol))
        {
            Some(b) => b,
            None => {
                warn!(symbol, %horizon, benchmark = %self.benchmark_symbol, "no benchmark sample");
                return RsRecord::invalid(horizon, symbol, "benchmark data unavailable");
            }
        };
        if let Err(reason) = bench.validate_shape() {
            return RsRecord::invalid(horizon, symbol, format!("invalid benchmark sample: {reason}"));
        }

        let price: RsComponent = price_score(sample, bench).into();
        let momentum: RsComponent = momentum_score(sample, bench, horizon).into();
        let volume: RsComponent = volume_score(sample, bench).into();
        let components = match horizon {
            Horizon::OneMinute => HorizonComponents::OneMinute { price, momentum, volume },
            Horizon::FiveMinute => HorizonComponents::FiveMinute {
                price,
                momentum,
                volume,
                orb: orb_score(sample, bench).into(),
            },
            Horizon::FifteenMinute => HorizonComponents::FifteenMinute {
                price,
                momentum,
                volume,
                trend: trend_score(sample).into(),
            },
        };

        let overall = blend_overall(&components);
        let is_valid = overall.is_valid;
        RsRecord {
            horizon,
            symbol: symbol.to_string(),
            timestamp_ms: now_ms(),
            components,
            overall,
            is_valid,
            error: None,
        }
    }

    fn memo_insert(&mut self, key: u64, records: HashMap<String, RsRecord>) {
        if self.memo.contains_key(&key) {
            return;
        }
        while self.memo_order.len() >= self.memo_capacity {
            if let Some(oldest) = self.memo_order.pop_front() {
                self.memo.remove(&oldest);
            }
        }
        self.memo_order.push_back(key);
        self.memo.insert(key, records);
    }
}

/// Weighted mean over the valid components, with the weights of invalid
/// components redistributed proportionally. No valid components at all
/// yields an invalid neutral overall.
fn blend_overall(components: &HorizonComponents) -> RsComponent {
    let mut weight_sum = 0.0;
    let mut value_sum = 0.0;
    for (_, component, weight) in components.weighted() {
        if component.is_valid {
            weight_sum += weight;
            value_sum += component.value * weight;
        }
    }
    if weight_sum <= 0.0 {
        return RsComponent::neutral("no valid components");
    }
    RsComponent {
        value: (value_sum / weight_sum).clamp(0.0, 100.0),
        is_valid: true,
        error: None,
        raw: serde_json::json!({ "active_weight": weight_sum }),
    }
}

/// Content hash of the serialized input batch. Maps are serialized in
/// key order so the key is stable across `HashMap` iteration orders.
fn memo_key(
    instruments: &HashMap<String, InstrumentSample>,
    benchmarks: &HashMap<String, InstrumentSample>,
    horizon: Horizon,
) -> u64 {
    let instruments: BTreeMap<&String, &InstrumentSample> = instruments.iter().collect();
    let benchmarks: BTreeMap<&String, &InstrumentSample> = benchmarks.iter().collect();
    let serialized = serde_json::to_string(&(&instruments, &benchmarks, horizon))
        .unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    serialized.hash(&mut hasher);
    hasher.finish()
}
