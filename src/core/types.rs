//! Core data types for the relative-strength engine.
//!
//! This module defines the types shared across the calculation, cache,
//! store and orchestration layers: horizons, raw market samples, scored
//! components and the per-cycle RS records handed to consumers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Neutral RS score: the instrument is performing exactly in line with
/// the benchmark. Degraded components always report this value.
pub const NEUTRAL_RS: f64 = 50.0;

/// Fixed recomputation interval for RS scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Horizon {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinute,
    #[serde(rename = "15m")]
    FifteenMinute,
}

impl Horizon {
    /// All horizons in ascending order.
    pub fn all() -> [Horizon; 3] {
        [Horizon::OneMinute, Horizon::FiveMinute, Horizon::FifteenMinute]
    }

    /// Default result-cache TTL for this horizon.
    pub fn default_ttl_ms(&self) -> u64 {
        match self {
            Horizon::OneMinute => 30_000,
            Horizon::FiveMinute => 120_000,
            Horizon::FifteenMinute => 300_000,
        }
    }

    /// Periodic refresh interval: half the cache TTL, so a scheduled
    /// recomputation lands before the cached result expires.
    pub fn refresh_interval_ms(&self) -> u64 {
        self.default_ttl_ms() / 2
    }

    /// Stable index for per-horizon flag arrays.
    pub fn index(&self) -> usize {
        match self {
            Horizon::OneMinute => 0,
            Horizon::FiveMinute => 1,
            Horizon::FifteenMinute => 2,
        }
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Horizon::OneMinute => write!(f, "1m"),
            Horizon::FiveMinute => write!(f, "5m"),
            Horizon::FifteenMinute => write!(f, "15m"),
        }
    }
}

impl std::str::FromStr for Horizon {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Horizon::OneMinute),
            "5m" => Ok(Horizon::FiveMinute),
            "15m" => Ok(Horizon::FifteenMinute),
            other => Err(format!("unknown horizon: {other}")),
        }
    }
}

/// Optional technical indicators attached to a sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalIndicators {
    #[serde(default)]
    pub sma: Option<f64>,
    #[serde(default)]
    pub ema: Option<f64>,
    #[serde(default)]
    pub rsi: Option<f64>,
    #[serde(default)]
    pub macd: Option<f64>,
}

/// One raw market sample for an instrument or benchmark, as supplied by
/// the external data source. Only `current_price` and `previous_close`
/// are required; everything else degrades gracefully when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSample {
    pub current_price: f64,
    pub previous_close: f64,
    #[serde(default)]
    pub current_volume: Option<f64>,
    #[serde(default)]
    pub average_volume: Option<f64>,
    #[serde(default)]
    pub price_history: Vec<f64>,
    #[serde(default)]
    pub technical_indicators: TechnicalIndicators,
    #[serde(default)]
    pub orb_performance: Option<f64>,
}

impl InstrumentSample {
    /// Minimal sample carrying just the required price fields.
    pub fn new(current_price: f64, previous_close: f64) -> Self {
        Self {
            current_price,
            previous_close,
            current_volume: None,
            average_volume: None,
            price_history: Vec::new(),
            technical_indicators: TechnicalIndicators::default(),
            orb_performance: None,
        }
    }

    /// Shape check: required prices must be finite and positive. This is
    /// the only validation the core applies to market data.
    pub fn validate_shape(&self) -> std::result::Result<(), String> {
        if !self.current_price.is_finite() || self.current_price <= 0.0 {
            return Err(format!("invalid current_price: {}", self.current_price));
        }
        if !self.previous_close.is_finite() || self.previous_close <= 0.0 {
            return Err(format!("invalid previous_close: {}", self.previous_close));
        }
        Ok(())
    }
}

/// Outcome of a single component calculation.
///
/// Components either produce a finished score with their raw inputs
/// attached, or degrade with a reason. Degradation is local: it never
/// aborts the symbol or the batch.
#[derive(Debug, Clone)]
pub enum ComponentScore {
    Ok { value: f64, raw: serde_json::Value },
    Degraded { reason: String },
}

impl ComponentScore {
    pub fn ok(value: f64, raw: serde_json::Value) -> Self {
        ComponentScore::Ok { value, raw }
    }

    pub fn degraded(reason: impl Into<String>) -> Self {
        ComponentScore::Degraded { reason: reason.into() }
    }
}

/// One normalized RS component in `[0, 100]`. Invalid components carry
/// the neutral value and the reason they degraded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RsComponent {
    pub value: f64,
    pub is_valid: bool,
    #[serde(default)]
    pub error: Option<String>,
    /// Component-specific auxiliary numbers (raw changes, ratios,
    /// sub-scores) kept for observability.
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl RsComponent {
    pub fn neutral(reason: impl Into<String>) -> Self {
        Self {
            value: NEUTRAL_RS,
            is_valid: false,
            error: Some(reason.into()),
            raw: serde_json::Value::Null,
        }
    }
}

impl From<ComponentScore> for RsComponent {
    fn from(score: ComponentScore) -> Self {
        match score {
            ComponentScore::Ok { value, raw } => Self {
                value: value.clamp(0.0, 100.0),
                is_valid: true,
                error: None,
                raw,
            },
            ComponentScore::Degraded { reason } => Self::neutral(reason),
        }
    }
}

/// Component set for one record, tagged by horizon. Each horizon computes
/// a fixed set; the variant makes the set explicit at the type level
/// instead of an open-ended map with optional keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "horizon")]
pub enum HorizonComponents {
    #[serde(rename = "1m")]
    OneMinute {
        price: RsComponent,
        momentum: RsComponent,
        volume: RsComponent,
    },
    #[serde(rename = "5m")]
    FiveMinute {
        price: RsComponent,
        momentum: RsComponent,
        volume: RsComponent,
        orb: RsComponent,
    },
    #[serde(rename = "15m")]
    FifteenMinute {
        price: RsComponent,
        momentum: RsComponent,
        volume: RsComponent,
        trend: RsComponent,
    },
}

impl HorizonComponents {
    /// Components with their blend weights, in declaration order.
    /// Weights per horizon are fixed; invalid components are excluded at
    /// blend time and the remaining weights renormalized.
    pub fn weighted(&self) -> Vec<(&'static str, &RsComponent, f64)> {
        match self {
            HorizonComponents::OneMinute { price, momentum, volume } => vec![
                ("price", price, 0.5),
                ("momentum", momentum, 0.4),
                ("volume", volume, 0.1),
            ],
            HorizonComponents::FiveMinute { price, momentum, volume, orb } => vec![
                ("price", price, 0.3),
                ("momentum", momentum, 0.3),
                ("volume", volume, 0.2),
                ("orb", orb, 0.2),
            ],
            HorizonComponents::FifteenMinute { price, momentum, volume, trend } => vec![
                ("price", price, 0.3),
                ("momentum", momentum, 0.3),
                ("volume", volume, 0.2),
                ("trend", trend, 0.2),
            ],
        }
    }

    /// Flat name → component view, used for export and inspection.
    pub fn as_map(&self) -> BTreeMap<&'static str, &RsComponent> {
        self.weighted().into_iter().map(|(n, c, _)| (n, c)).collect()
    }
}

/// One computed RS record for a `(symbol, horizon)` pair. Immutable once
/// produced; every recomputation cycle yields fresh records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RsRecord {
    pub horizon: Horizon,
    pub symbol: String,
    pub timestamp_ms: u64,
    pub components: HorizonComponents,
    pub overall: RsComponent,
    pub is_valid: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl RsRecord {
    /// Record for a symbol whose inputs were missing or malformed. All
    /// components are neutral and the record is flagged invalid, so the
    /// batch stays complete and well-shaped for downstream consumers.
    pub fn invalid(horizon: Horizon, symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let neutral = || RsComponent::neutral(reason.clone());
        let components = match horizon {
            Horizon::OneMinute => HorizonComponents::OneMinute {
                price: neutral(),
                momentum: neutral(),
                volume: neutral(),
            },
            Horizon::FiveMinute => HorizonComponents::FiveMinute {
                price: neutral(),
                momentum: neutral(),
                volume: neutral(),
                orb: neutral(),
            },
            Horizon::FifteenMinute => HorizonComponents::FifteenMinute {
                price: neutral(),
                momentum: neutral(),
                volume: neutral(),
                trend: neutral(),
            },
        };
        Self {
            horizon,
            symbol: symbol.into(),
            timestamp_ms: now_ms(),
            components,
            overall: RsComponent::neutral(reason.clone()),
            is_valid: false,
            error: Some(reason),
        }
    }
}

/// Structured error entry kept in the store's bounded log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    pub timestamp_ms: u64,
    #[serde(default)]
    pub horizon: Option<Horizon>,
    #[serde(default)]
    pub context: Option<String>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>, horizon: Option<Horizon>) -> Self {
        Self {
            message: message.into(),
            timestamp_ms: now_ms(),
            horizon,
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Kind of event delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Success,
    Error,
    Rollback,
}

/// Envelope delivered on every state transition: successful updates,
/// recorded errors and rollbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateEnvelope {
    pub kind: UpdateKind,
    #[serde(default)]
    pub horizon: Option<Horizon>,
    #[serde(default)]
    pub data: Option<std::collections::HashMap<String, RsRecord>>,
    pub timestamp_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
}

impl UpdateEnvelope {
    pub fn success(horizon: Horizon, data: std::collections::HashMap<String, RsRecord>) -> Self {
        Self {
            kind: UpdateKind::Success,
            horizon: Some(horizon),
            data: Some(data),
            timestamp_ms: now_ms(),
            error: None,
        }
    }

    pub fn error(horizon: Option<Horizon>, message: impl Into<String>) -> Self {
        Self {
            kind: UpdateKind::Error,
            horizon,
            data: None,
            timestamp_ms: now_ms(),
            error: Some(message.into()),
        }
    }

    pub fn rollback() -> Self {
        Self {
            kind: UpdateKind::Rollback,
            horizon: None,
            data: None,
            timestamp_ms: now_ms(),
            error: None,
        }
    }
}
