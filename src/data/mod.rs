pub mod provider;

pub use provider::{DataSource, DataSourceConfig, MockDataSource, TimeframeData};
