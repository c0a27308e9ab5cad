//! Calculation layer.
//!
//! Pure scoring of instrument samples against a benchmark:
//!
//! - [`components`]: individual component scores (price, momentum,
//!   volume, ORB, trend sustainability).
//! - [`engine`]: batch computation with per-symbol degradation and a
//!   bounded memoization cache.

pub mod components;
pub mod engine;

pub use engine::CalcEngine;
