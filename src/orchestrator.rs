//! Update orchestration.
//!
//! [`RsOrchestrator`] owns the result cache, the state store, the
//! calculation engine and the per-horizon refresh timers. A cycle for a
//! horizon runs fetch → calculate → cache → commit → notify; the cache
//! short-circuits non-forced requests that are still fresh. Repeated
//! failures across horizons feed one global error counter that latches
//! periodic scheduling off past the configured threshold.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheStats, TtlCache};
use crate::calc::CalcEngine;
use crate::core::types::{Horizon, RsRecord, UpdateEnvelope};
use crate::data::{DataSource, DataSourceConfig};
use crate::error::{Result, RsError};
use crate::store::{HorizonMeta, HorizonState, StateSnapshot, StateStore, StoreHealth};

/// Recognized configuration surface for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub symbols: Vec<String>,
    pub benchmark: String,
    /// Per-horizon result-cache TTL overrides in milliseconds.
    pub ttl_overrides: HashMap<Horizon, u64>,
    /// Global error threshold tripping the circuit breaker.
    pub max_errors: u64,
    /// Capacity of the calculation engine's memoization cache.
    pub max_cache_size: usize,
    /// Bound on the store's rollback history ring.
    pub max_history_size: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            benchmark: "QQQ".to_string(),
            ttl_overrides: HashMap::new(),
            max_errors: 10,
            max_cache_size: 1000,
            max_history_size: 50,
        }
    }
}

/// Point-in-time view of orchestrator health for status consumers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OrchestratorStatus {
    pub initialized: bool,
    pub scheduling_active: bool,
    pub breaker_tripped: bool,
    pub error_count: u64,
    pub max_errors: u64,
    pub in_flight: Vec<Horizon>,
    pub cache: CacheStats,
    pub store: StoreHealth,
}

pub type UpdateCallback = Arc<dyn Fn(&UpdateEnvelope) + Send + Sync>;

type ResultSet = HashMap<String, RsRecord>;

struct Inner {
    config: OrchestratorConfig,
    source: tokio::sync::RwLock<Option<Box<dyn DataSource>>>,
    engine: tokio::sync::Mutex<CalcEngine>,
    cache: tokio::sync::Mutex<TtlCache<Horizon, ResultSet>>,
    store: StateStore,
    on_update: StdRwLock<Option<UpdateCallback>>,
    initialized: AtomicBool,
    scheduling_active: AtomicBool,
    breaker_tripped: AtomicBool,
    error_count: AtomicU64,
    /// Bumped by `destroy`; cycles from an older generation discard
    /// their results instead of committing.
    generation: AtomicU64,
    in_flight: [AtomicBool; 3],
    timers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct RsOrchestrator {
    inner: Arc<Inner>,
}

impl RsOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        let mut cache = TtlCache::new(Horizon::all().len(), crate::cache::DEFAULT_TTL_MS);
        for horizon in Horizon::all() {
            let ttl = config
                .ttl_overrides
                .get(&horizon)
                .copied()
                .unwrap_or_else(|| horizon.default_ttl_ms());
            cache.set_ttl_for(horizon, ttl);
        }
        let engine = CalcEngine::new(config.benchmark.clone(), config.max_cache_size);
        let store = StateStore::new(config.max_history_size);
        Self {
            inner: Arc::new(Inner {
                config,
                source: tokio::sync::RwLock::new(None),
                engine: tokio::sync::Mutex::new(engine),
                cache: tokio::sync::Mutex::new(cache),
                store,
                on_update: StdRwLock::new(None),
                initialized: AtomicBool::new(false),
                scheduling_active: AtomicBool::new(false),
                breaker_tripped: AtomicBool::new(false),
                error_count: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                in_flight: [AtomicBool::new(false), AtomicBool::new(false), AtomicBool::new(false)],
                timers: std::sync::Mutex::new(Vec::new()),
            }),
        }
    }

    /// Wire the data source, pre-warm every horizon with one forced
    /// cycle (failures tolerated), then start periodic scheduling.
    pub async fn initialize(
        &self,
        mut source: Box<dyn DataSource>,
        on_update: Option<UpdateCallback>,
    ) -> Result<()> {
        if self.inner.initialized.load(Ordering::SeqCst) {
            warn!("orchestrator already initialized");
            return Ok(());
        }
        let cfg = DataSourceConfig {
            symbols: self.inner.config.symbols.clone(),
            benchmark: self.inner.config.benchmark.clone(),
        };
        source
            .initialize(&cfg)
            .await
            .map_err(|e| RsError::System(format!("data source initialization failed: {e}")))?;
        info!(source = source.id(), symbols = cfg.symbols.len(), "data source wired");

        *self.inner.source.write().await = Some(source);
        if let Ok(mut cb) = self.inner.on_update.write() {
            *cb = on_update;
        }
        self.inner.initialized.store(true, Ordering::SeqCst);

        // Pre-warm all horizons concurrently; individual failures are
        // logged and counted but do not fail initialization.
        let (a, b, c) = tokio::join!(
            self.update_rs_data(Horizon::OneMinute, true),
            self.update_rs_data(Horizon::FiveMinute, true),
            self.update_rs_data(Horizon::FifteenMinute, true),
        );
        for (horizon, result) in Horizon::all().into_iter().zip([&a, &b, &c]) {
            if let Err(e) = result {
                warn!(%horizon, error = %e, "pre-warm cycle failed");
            }
        }

        self.start_periodic_updates();
        info!("orchestrator initialized");
        Ok(())
    }

    /// Recompute (or serve from cache) the RS data for one horizon.
    ///
    /// Non-forced calls return the cached result set while it is fresh,
    /// with no recomputation and no store write. Returns `Ok(None)` when
    /// the engine is uninitialized or a cycle for this horizon is
    /// already in flight.
    #[instrument(skip_all, fields(%horizon, force))]
    pub async fn update_rs_data(
        &self,
        horizon: Horizon,
        force: bool,
    ) -> Result<Option<ResultSet>> {
        if !self.inner.initialized.load(Ordering::SeqCst) {
            warn!("update requested before initialization, ignoring");
            return Ok(None);
        }

        if !force {
            let mut cache = self.inner.cache.lock().await;
            if let Some(data) = cache.get(&horizon) {
                debug!(symbols = data.len(), "serving rs data from cache");
                return Ok(Some(data));
            }
        }

        let flag = &self.inner.in_flight[horizon.index()];
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("cycle already in flight, skipping");
            return Ok(None);
        }
        let result = self.run_cycle(horizon).await;
        flag.store(false, Ordering::SeqCst);

        match result {
            Ok(records) => Ok(records),
            Err(e) => {
                self.handle_error(&e, horizon).await;
                Err(e)
            }
        }
    }

    /// One full fetch → calculate → cache → commit → notify cycle.
    /// Returns `Ok(None)` when the result was discarded because the
    /// orchestrator was destroyed while the cycle was in flight.
    async fn run_cycle(&self, horizon: Horizon) -> Result<Option<ResultSet>> {
        let generation = self.inner.generation.load(Ordering::SeqCst);

        let data = {
            let source = self.inner.source.read().await;
            let source = source.as_ref().ok_or(RsError::Uninitialized)?;
            source
                .fetch_for_horizon(horizon)
                .await
                .map_err(|e| RsError::Fetch { horizon, cause: e })?
        };

        let started = Instant::now();
        let records = {
            let mut engine = self.inner.engine.lock().await;
            engine.compute(&data.instrument_data, &data.benchmark_data, horizon)?
        };
        let calc_duration_ms = started.elapsed().as_millis() as u64;

        if self.inner.generation.load(Ordering::SeqCst) != generation {
            debug!(%horizon, "orchestrator destroyed mid-cycle, discarding result");
            return Ok(None);
        }

        let valid = records.values().filter(|r| r.is_valid).count();
        let meta = HorizonMeta {
            cache_hits: {
                let cache = self.inner.cache.lock().await;
                cache.stats().hits
            },
            calc_duration_ms,
            data_quality: valid as f64 / records.len().max(1) as f64,
        };

        {
            let mut cache = self.inner.cache.lock().await;
            cache.set(horizon, records.clone());
        }
        self.inner
            .store
            .update_rs_data(horizon, records.clone(), meta)
            .await?;

        self.notify(&UpdateEnvelope::success(horizon, records.clone()));
        Ok(Some(records))
    }

    /// Record the failure, bump the global counter and trip the breaker
    /// past the threshold. Tripping latches scheduling off; reads keep
    /// serving the last good snapshot.
    async fn handle_error(&self, error: &RsError, horizon: Horizon) {
        self.inner
            .store
            .record_error(error.to_string(), Some(horizon))
            .await;
        let count = self.inner.error_count.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(%horizon, error = %error, count, "update cycle failed");

        if count > self.inner.config.max_errors
            && !self.inner.breaker_tripped.swap(true, Ordering::SeqCst)
        {
            warn!(
                count,
                max_errors = self.inner.config.max_errors,
                "circuit breaker tripped, stopping periodic updates"
            );
            self.stop_periodic_updates();
        }
        self.notify(&UpdateEnvelope::error(Some(horizon), error.to_string()));
    }

    /// Start one timer per horizon at half its cache TTL. No-op when
    /// scheduling is already active.
    pub fn start_periodic_updates(&self) {
        if self.inner.scheduling_active.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut timers = match self.inner.timers.lock() {
            Ok(t) => t,
            Err(_) => return,
        };
        for horizon in Horizon::all() {
            let this = self.clone();
            let handle = tokio::spawn(async move {
                let period = Duration::from_millis(horizon.refresh_interval_ms());
                let mut ticker = tokio::time::interval(period);
                // Consume the immediate first tick; pre-warm already ran.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if !this.inner.scheduling_active.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Err(e) = this.update_rs_data(horizon, false).await {
                        debug!(%horizon, error = %e, "scheduled update failed");
                    }
                }
            });
            timers.push(handle);
        }
        info!("periodic updates started");
    }

    /// Cancel future scheduled fetches. In-flight cycles complete and
    /// commit normally.
    pub fn stop_periodic_updates(&self) {
        self.inner.scheduling_active.store(false, Ordering::SeqCst);
        if let Ok(mut timers) = self.inner.timers.lock() {
            for handle in timers.drain(..) {
                handle.abort();
            }
        }
        info!("periodic updates stopped");
    }

    /// Zero the error counter and unlatch the breaker. Does not resume
    /// scheduling by itself; that requires [`restart_periodic_updates`].
    ///
    /// [`restart_periodic_updates`]: RsOrchestrator::restart_periodic_updates
    pub fn reset_errors(&self) {
        self.inner.error_count.store(0, Ordering::SeqCst);
        self.inner.breaker_tripped.store(false, Ordering::SeqCst);
        info!("error counter reset");
    }

    /// Explicit resume path after a breaker trip. Refuses while the
    /// breaker is still latched or before initialization.
    pub fn restart_periodic_updates(&self) -> Result<()> {
        if !self.inner.initialized.load(Ordering::SeqCst) {
            return Err(RsError::Uninitialized);
        }
        if self.inner.breaker_tripped.load(Ordering::SeqCst) {
            return Err(RsError::System(
                "circuit breaker is tripped; call reset_errors first".into(),
            ));
        }
        self.start_periodic_updates();
        Ok(())
    }

    pub async fn get_all_rs_data(&self) -> StateSnapshot {
        self.inner.store.get_all().await
    }

    pub async fn get_rs_data(&self, horizon: Horizon) -> Option<HorizonState> {
        self.inner.store.get_horizon(horizon).await
    }

    pub async fn get_symbol_rs_data(&self, symbol: &str, horizon: Horizon) -> Option<RsRecord> {
        self.inner.store.get_symbol(symbol, horizon).await
    }

    /// Register a subscriber on the underlying store's notification
    /// channel. The store itself stays owned by the orchestrator.
    pub fn subscribe(&self, callback: crate::store::Subscriber) -> u64 {
        self.inner.store.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        self.inner.store.unsubscribe(id)
    }

    pub async fn export(&self) -> crate::store::StoreBundle {
        self.inner.store.export().await
    }

    pub async fn import(&self, bundle: crate::store::StoreBundle) -> Result<()> {
        self.inner.store.import(bundle).await
    }

    pub async fn get_status(&self) -> OrchestratorStatus {
        let cache = self.inner.cache.lock().await.stats();
        let store = self.inner.store.health().await;
        let in_flight = Horizon::all()
            .into_iter()
            .filter(|h| self.inner.in_flight[h.index()].load(Ordering::SeqCst))
            .collect();
        OrchestratorStatus {
            initialized: self.inner.initialized.load(Ordering::SeqCst),
            scheduling_active: self.inner.scheduling_active.load(Ordering::SeqCst),
            breaker_tripped: self.inner.breaker_tripped.load(Ordering::SeqCst),
            error_count: self.inner.error_count.load(Ordering::SeqCst),
            max_errors: self.inner.config.max_errors,
            in_flight,
            cache,
            store,
        }
    }

    pub fn error_count(&self) -> u64 {
        self.inner.error_count.load(Ordering::SeqCst)
    }

    /// Terminal teardown: stop timers, drop cached and stored data,
    /// discard any in-flight results, mark uninitialized. Idempotent.
    pub async fn destroy(&self) {
        self.stop_periodic_updates();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.initialized.store(false, Ordering::SeqCst);
        self.inner.cache.lock().await.clear();
        self.inner.store.clear().await;
        info!("orchestrator destroyed");
    }

    fn notify(&self, envelope: &UpdateEnvelope) {
        let callback = match self.inner.on_update.read() {
            Ok(cb) => cb.clone(),
            Err(_) => None,
        };
        if let Some(cb) = callback {
            cb(envelope);
        }
    }
}
