pub mod api;
pub mod core;
pub mod data;
pub mod error;
pub mod report;

pub use error::BacktestError;
