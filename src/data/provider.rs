//! Market data source abstraction.
//!
//! The core consumes raw instrument/benchmark samples through the
//! [`DataSource`] trait; everything behind it (exchange adapters, files,
//! replay feeds) is an external collaborator. A [`MockDataSource`] with a
//! seeded random walk is included for demos and tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::core::types::{Horizon, InstrumentSample, TechnicalIndicators};

/// Raw data for one horizon: instrument and benchmark samples keyed by
/// symbol.
#[derive(Debug, Clone, Default)]
pub struct TimeframeData {
    pub instrument_data: HashMap<String, InstrumentSample>,
    pub benchmark_data: HashMap<String, InstrumentSample>,
}

/// Configuration handed to a data source at wiring time.
#[derive(Debug, Clone)]
pub struct DataSourceConfig {
    pub symbols: Vec<String>,
    pub benchmark: String,
}

/// Collaborator interface for raw market data.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Identifier used in logs and status output.
    fn id(&self) -> &str;

    /// Prepare the source for the given universe. Called once before
    /// any fetch.
    async fn initialize(&mut self, cfg: &DataSourceConfig) -> Result<()>;

    /// Fetch instrument and benchmark samples for one horizon.
    async fn fetch_for_horizon(&self, horizon: Horizon) -> Result<TimeframeData>;
}

/// Deterministic-enough mock source driven by a random walk around fixed
/// base prices. Each fetch yields a fresh set of samples with history,
/// volumes and indicators populated, so every component has inputs.
pub struct MockDataSource {
    id: String,
    symbols: Vec<String>,
    benchmark: String,
    base_prices: HashMap<String, f64>,
    active: bool,
}

impl MockDataSource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            symbols: Vec::new(),
            benchmark: String::new(),
            base_prices: HashMap::new(),
            active: false,
        }
    }

    fn generate_sample(&self, base: f64) -> InstrumentSample {
        use rand::Rng;
        let mut rng = rand::thread_rng();

        let drift: f64 = rng.gen_range(-0.03..0.03);
        let current_price = base * (1.0 + drift);
        let previous_close = base;

        // Short random-walk history ending at the current price.
        let mut history = Vec::with_capacity(12);
        let mut px = base * (1.0 - drift.abs());
        for _ in 0..11 {
            px *= 1.0 + rng.gen_range(-0.01..0.011);
            history.push(px);
        }
        history.push(current_price);

        let sma = crate::core::math::mean(&history);
        InstrumentSample {
            current_price,
            previous_close,
            current_volume: Some(rng.gen_range(500_000.0..5_000_000.0)),
            average_volume: Some(1_500_000.0),
            price_history: history,
            technical_indicators: TechnicalIndicators {
                sma: Some(sma),
                ema: Some(sma * (1.0 + drift / 2.0)),
                rsi: Some(50.0 + drift * 500.0),
                macd: Some(drift),
            },
            orb_performance: Some(drift * 100.0),
        }
    }
}

#[async_trait]
impl DataSource for MockDataSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn initialize(&mut self, cfg: &DataSourceConfig) -> Result<()> {
        if cfg.symbols.is_empty() {
            bail!("mock source {} needs at least one symbol", self.id);
        }
        use rand::Rng;
        let mut rng = rand::thread_rng();
        self.symbols = cfg.symbols.clone();
        self.benchmark = cfg.benchmark.clone();
        self.base_prices = cfg
            .symbols
            .iter()
            .chain(std::iter::once(&cfg.benchmark))
            .map(|s| (s.clone(), rng.gen_range(50.0..500.0)))
            .collect();
        self.active = true;
        info!(source = %self.id, symbols = self.symbols.len(), "mock data source initialized");
        Ok(())
    }

    async fn fetch_for_horizon(&self, horizon: Horizon) -> Result<TimeframeData> {
        if !self.active {
            bail!("mock source {} is not initialized", self.id);
        }
        let instrument_data: HashMap<String, InstrumentSample> = self
            .symbols
            .iter()
            .map(|s| {
                let base = self.base_prices.get(s).copied().unwrap_or(100.0);
                (s.clone(), self.generate_sample(base))
            })
            .collect();
        let bench_base = self.base_prices.get(&self.benchmark).copied().unwrap_or(100.0);
        let mut benchmark_data = HashMap::new();
        benchmark_data.insert(self.benchmark.clone(), self.generate_sample(bench_base));
        debug!(source = %self.id, %horizon, symbols = instrument_data.len(), "mock fetch");
        Ok(TimeframeData {
            instrument_data,
            benchmark_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_source_requires_initialize() {
        let source = MockDataSource::new("mock");
        assert!(source.fetch_for_horizon(Horizon::OneMinute).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_source_fetch_shape() {
        let mut source = MockDataSource::new("mock");
        source
            .initialize(&DataSourceConfig {
                symbols: vec!["AAPL".into(), "MSFT".into()],
                benchmark: "QQQ".into(),
            })
            .await
            .unwrap();

        let data = source.fetch_for_horizon(Horizon::FiveMinute).await.unwrap();
        assert_eq!(data.instrument_data.len(), 2);
        assert!(data.benchmark_data.contains_key("QQQ"));
        for sample in data.instrument_data.values() {
            assert!(sample.validate_shape().is_ok());
            assert!(sample.price_history.len() >= 10);
            assert!(sample.technical_indicators.rsi.is_some());
        }
    }

    #[tokio::test]
    async fn test_mock_source_rejects_empty_universe() {
        let mut source = MockDataSource::new("mock");
        let err = source
            .initialize(&DataSourceConfig { symbols: vec![], benchmark: "QQQ".into() })
            .await;
        assert!(err.is_err());
    }
}
