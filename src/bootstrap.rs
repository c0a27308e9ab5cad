use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::load_base;
use crate::core::types::Horizon;
use crate::data::MockDataSource;
use crate::orchestrator::{OrchestratorConfig, RsOrchestrator, UpdateCallback};

/// Wire a mock data source to the orchestrator and run a short demo:
/// initialize (which pre-warms every horizon), let a couple of cycles
/// land, then dump status and tear down.
pub async fn bootstrap() -> anyhow::Result<()> {
    // 1) Configuration: file values over built-in defaults.
    let mut cfg = load_base()
        .map(|c| c.into_orchestrator_config())
        .unwrap_or_default();
    if cfg.symbols.is_empty() {
        cfg.symbols = vec!["AAPL".into(), "MSFT".into(), "NVDA".into()];
    }
    info!(symbols = ?cfg.symbols, benchmark = %cfg.benchmark, "starting rs engine");

    // 2) Orchestrator + subscriber printing every envelope.
    let orchestrator = RsOrchestrator::new(cfg);
    let on_update: UpdateCallback = Arc::new(|env| {
        info!(
            kind = ?env.kind,
            horizon = ?env.horizon,
            symbols = env.data.as_ref().map(|d| d.len()).unwrap_or(0),
            error = env.error.as_deref().unwrap_or(""),
            "update envelope"
        );
    });
    orchestrator
        .initialize(Box::new(MockDataSource::new("mock")), Some(on_update))
        .await?;

    // 3) Force one refresh and read a symbol back through the store.
    orchestrator.update_rs_data(Horizon::FiveMinute, true).await?;
    if let Some(record) = orchestrator.get_symbol_rs_data("AAPL", Horizon::FiveMinute).await {
        info!(
            symbol = %record.symbol,
            overall = record.overall.value,
            valid = record.is_valid,
            "sample rs record"
        );
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    let status = orchestrator.get_status().await;
    info!(
        version = status.store.version,
        errors = status.error_count,
        cache_hits = status.cache.hits,
        scheduling = status.scheduling_active,
        "final status"
    );

    orchestrator.destroy().await;
    Ok(())
}
