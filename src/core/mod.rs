pub mod math;
pub mod types;

pub use types::{Horizon, InstrumentSample, RsComponent, RsRecord};
