pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{MeteringError, MeteringResult};
pub use types::{Metric, UsageTotals};
