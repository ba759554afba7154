//! Application wiring for the spotmm trading engine.

pub mod app;
pub mod config;
pub mod error;
pub mod sink;

pub use app::Application;
pub use config::{AppConfig, Provider, TradeMode};
pub use error::{AppError, AppResult};
pub use sink::JsonlOutcomeSink;
