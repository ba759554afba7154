//! Execution layer: paper port, position accounting, sizing.
//!
//! The paper executor fills maker orders at their limit price and
//! market orders at the opposite touch, routing everything through
//! the long-only position book. The same `ExecutionPort` contract is
//! implemented elsewhere by live adapters.

pub mod paper;
pub mod position;
pub mod sizer;
pub mod smart;

pub use paper::PaperExecutor;
pub use position::{FillOutcome, PositionBook};
pub use sizer::{PositionSize, PositionSizer, SizingMode};
pub use smart::{AbortReason, EntryExecution, SmartExecutor};
