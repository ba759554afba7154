//! Per-symbol strategy loops.
//!
//! Each traded symbol runs an independent 50 ms loop: pre-flight
//! checks, entry filters, MM-aware sizing, and an exit priority chain
//! evaluated every tick. Loops are cooperative tasks cancelled through
//! a stop token and awaited with a bounded timeout.

pub mod engine;
pub mod exit;
pub mod filters;
pub mod scanner;
pub mod schedule;
pub mod state;

pub use engine::{EngineDeps, StrategyEngine};
pub use exit::{evaluate_exit, PlannedExit, TrailingState};
pub use filters::{check_entry_filters, EntryReject};
pub use scanner::{MarketView, ScanRow, ScannerClient};
pub use schedule::TradingSchedule;
pub use state::Lot;
