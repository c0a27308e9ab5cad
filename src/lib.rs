//! Relative-strength engine.
//!
//! Computes, caches and serves RS scores comparing instruments against a
//! benchmark across three fixed horizons (1m, 5m, 15m). The subsystem is
//! four tightly coupled pieces: the pure [`calc`] layer, the TTL+LRU
//! result [`cache`], the versioned snapshot [`store`] with rollback and
//! change notification, and the [`orchestrator`] that schedules
//! recomputation and trips a circuit breaker over repeated failures.

pub mod bootstrap;
pub mod cache;
pub mod calc;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod orchestrator;
pub mod store;

pub use crate::core::types::{Horizon, InstrumentSample, RsComponent, RsRecord, UpdateEnvelope};
pub use error::{Result, RsError};
pub use orchestrator::{OrchestratorConfig, RsOrchestrator};
pub use store::{StateSnapshot, StateStore};
