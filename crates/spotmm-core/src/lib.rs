//! Core domain types for the spotmm trading engine.
//!
//! Everything other crates share lives here: decimal-safe price and
//! size newtypes, symbol identifiers, book and tape records, strategy
//! parameters, and the narrow ports (execution, outcome sink, ML
//! predictor) the strategy core talks through.

pub mod decimal;
pub mod error;
pub mod execution;
pub mod market;
pub mod params;
pub mod symbol;

pub use decimal::{Price, Size};
pub use error::{CoreError, CoreResult};
pub use execution::{
    EntryFeatures, ExecutionPort, ExitReason, Fill, MarketFill, OrderSide, OutcomeSink,
    PositionSnapshot, Predictor, TradeOutcome,
};
pub use market::{BookState, DepthLevel, L2Book, Quote, TapeTrade, TopOfBook, TradeSide};
pub use params::{StrategyParams, TradeExitParams};
pub use symbol::Symbol;

/// Current wall clock in Unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
