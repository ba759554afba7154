//! Exit decision chain.
//!
//! One call per tick while in position. Conditions are evaluated in
//! strict priority order; the first that holds wins the tick:
//!
//! 1. hard stop-loss (ignores min-hold, always a market order)
//! 2. MM-gone emergency
//! 3. trading-window close
//! 4. trailing stop (activation, ratchet, trigger)
//! 5. take-profit
//! 6. soft stop-loss
//! 7. timeout
//!
//! The chain is pure over its inputs plus the trailing state, so the
//! ordering invariant is directly testable.

use spotmm_core::{ExitReason, TradeExitParams};
use tracing::debug;

/// Trailing-stop state for the open trade.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrailingState {
    pub active: bool,
    pub peak_price: f64,
    pub stop_price: f64,
}

impl TrailingState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Activate at the threshold, then ratchet the stop up each time
    /// the mid gains another step.
    fn update(&mut self, params: &TradeExitParams, pnl_bps: f64, mid: f64) {
        if !params.trailing_enabled || mid <= 0.0 {
            return;
        }
        if !self.active {
            if pnl_bps >= params.trailing_activation_bps {
                self.active = true;
                self.peak_price = mid;
                self.stop_price = mid * (1.0 - params.trailing_stop_bps / 1e4);
                debug!(peak = mid, stop = self.stop_price, pnl_bps, "trailing stop activated");
            }
            return;
        }

        let gain_bps = if self.peak_price > 0.0 {
            (mid - self.peak_price) / self.peak_price * 1e4
        } else {
            0.0
        };
        if gain_bps >= params.trailing_step_bps {
            self.peak_price = mid;
            self.stop_price = mid * (1.0 - params.trailing_stop_bps / 1e4);
            debug!(peak = mid, stop = self.stop_price, "trailing stop raised");
        }
    }

    fn triggered(&self, mid: f64) -> bool {
        self.active && mid <= self.stop_price
    }
}

/// A decided exit for this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedExit {
    pub reason: ExitReason,
    /// Try a maker-limit at the ask before falling back to market.
    pub maker_first: bool,
}

impl PlannedExit {
    /// Emergency reasons never attempt a maker fill; of the rest,
    /// only the profit tiers earn the spread with a passive fill
    /// before crossing.
    fn for_reason(reason: ExitReason) -> Self {
        let maker_first = !reason.is_emergency()
            && matches!(reason, ExitReason::Trail | ExitReason::Tp);
        Self { reason, maker_first }
    }
}

/// Inputs to the exit chain for one tick.
#[derive(Debug, Clone, Copy)]
pub struct ExitInputs {
    /// PnL measured against the current bid (exits sell at bid).
    pub pnl_bps: f64,
    pub mid: f64,
    pub elapsed_ms: i64,
    pub mm_gone: bool,
    pub window_closing: bool,
}

/// Evaluate the chain for one tick.
///
/// Mutates `trailing` (activation and ratchet); the update sits below
/// the emergency tiers so an emergency exit never moves the ratchet
/// on its final tick.
pub fn evaluate_exit(
    params: &TradeExitParams,
    trailing: &mut TrailingState,
    inputs: ExitInputs,
) -> Option<PlannedExit> {
    // Tier 1: hard stop-loss. No min-hold.
    if inputs.pnl_bps <= params.hard_stop_loss_bps {
        return Some(PlannedExit::for_reason(ExitReason::HardSl));
    }

    // Tier 2: the MM left the book.
    if inputs.mm_gone {
        return Some(PlannedExit::for_reason(ExitReason::MmGone));
    }

    // Tier 3: trading window is closing.
    if inputs.window_closing {
        return Some(PlannedExit::for_reason(ExitReason::WindowClose));
    }

    // Tier 4: trailing stop. State updates happen here so emergency
    // exits above never move the ratchet on their final tick.
    trailing.update(params, inputs.pnl_bps, inputs.mid);
    let min_hold_ok = inputs.elapsed_ms >= params.min_hold_ms as i64;
    if trailing.triggered(inputs.mid) && min_hold_ok {
        return Some(PlannedExit::for_reason(ExitReason::Trail));
    }

    // Tier 5: take-profit.
    if inputs.pnl_bps >= params.take_profit_bps && min_hold_ok {
        return Some(PlannedExit::for_reason(ExitReason::Tp));
    }

    // Tier 6: soft stop-loss (dynamically widened at entry).
    if inputs.pnl_bps <= params.stop_loss_bps && min_hold_ok {
        return Some(PlannedExit::for_reason(ExitReason::Sl));
    }

    // Tier 7: timeout.
    if inputs.elapsed_ms >= (params.timeout_exit_sec * 1_000) as i64 {
        return Some(PlannedExit::for_reason(ExitReason::Timeout));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TradeExitParams {
        TradeExitParams {
            take_profit_bps: 2.0,
            stop_loss_bps: -3.0,
            hard_stop_loss_bps: -10.0,
            trailing_enabled: true,
            trailing_activation_bps: 3.0,
            trailing_stop_bps: 1.0,
            trailing_step_bps: 0.5,
            timeout_exit_sec: 5,
            min_hold_ms: 500,
        }
    }

    fn inputs(pnl_bps: f64, mid: f64, elapsed_ms: i64) -> ExitInputs {
        ExitInputs {
            pnl_bps,
            mid,
            elapsed_ms,
            mm_gone: false,
            window_closing: false,
        }
    }

    #[test]
    fn test_no_exit_when_flat() {
        let mut trailing = TrailingState::default();
        assert!(evaluate_exit(&params(), &mut trailing, inputs(0.5, 100.0, 1_000)).is_none());
    }

    #[test]
    fn test_hard_sl_fires_on_touch_tick_ignoring_min_hold() {
        let mut trailing = TrailingState::default();
        let exit = evaluate_exit(&params(), &mut trailing, inputs(-10.0, 100.0, 10)).unwrap();
        assert_eq!(exit.reason, ExitReason::HardSl);
        assert!(!exit.maker_first);
    }

    #[test]
    fn test_hard_sl_beats_everything() {
        let mut trailing = TrailingState::default();
        let exit = evaluate_exit(
            &params(),
            &mut trailing,
            ExitInputs {
                pnl_bps: -11.0,
                mid: 100.0,
                elapsed_ms: 60_000,
                mm_gone: true,
                window_closing: true,
            },
        )
        .unwrap();
        assert_eq!(exit.reason, ExitReason::HardSl);
    }

    #[test]
    fn test_mm_gone_beats_window_and_tp() {
        let mut trailing = TrailingState::default();
        let exit = evaluate_exit(
            &params(),
            &mut trailing,
            ExitInputs {
                pnl_bps: 5.0,
                mid: 100.0,
                elapsed_ms: 60_000,
                mm_gone: true,
                window_closing: true,
            },
        )
        .unwrap();
        assert_eq!(exit.reason, ExitReason::MmGone);
    }

    #[test]
    fn test_window_close_beats_tp() {
        let mut trailing = TrailingState::default();
        let exit = evaluate_exit(
            &params(),
            &mut trailing,
            ExitInputs {
                pnl_bps: 5.0,
                mid: 100.0,
                elapsed_ms: 60_000,
                mm_gone: false,
                window_closing: true,
            },
        )
        .unwrap();
        assert_eq!(exit.reason, ExitReason::WindowClose);
    }

    #[test]
    fn test_tp_respects_min_hold() {
        let mut trailing = TrailingState::default();
        let mut p = params();
        p.trailing_enabled = false;
        // Profit is there but the hold floor is not.
        assert!(evaluate_exit(&p, &mut trailing, inputs(2.5, 100.0, 100)).is_none());
        let exit = evaluate_exit(&p, &mut trailing, inputs(2.5, 100.0, 600)).unwrap();
        assert_eq!(exit.reason, ExitReason::Tp);
        assert!(exit.maker_first);
    }

    #[test]
    fn test_sl_and_timeout() {
        let mut trailing = TrailingState::default();
        let mut p = params();
        p.trailing_enabled = false;

        let exit = evaluate_exit(&p, &mut trailing, inputs(-3.5, 100.0, 600)).unwrap();
        assert_eq!(exit.reason, ExitReason::Sl);
        assert!(!exit.maker_first);

        let exit = evaluate_exit(&p, &mut trailing, inputs(0.0, 100.0, 5_000)).unwrap();
        assert_eq!(exit.reason, ExitReason::Timeout);
    }

    /// Scenario: enter at 100, climb to 100.05 (activation at 5 bps),
    /// ratchet at 100.10, then fall through the trail.
    #[test]
    fn test_trailing_activates_ratchets_and_triggers() {
        let p = TradeExitParams {
            trailing_activation_bps: 3.0,
            trailing_stop_bps: 1.0,
            trailing_step_bps: 0.5,
            ..params()
        };
        let mut trailing = TrailingState::default();

        // +5 bps: activation. peak=100.05, stop ≈ 100.0400
        assert!(evaluate_exit(&p, &mut trailing, inputs(5.0, 100.05, 1_000)).is_none());
        assert!(trailing.active);
        assert!((trailing.peak_price - 100.05).abs() < 1e-9);
        assert!((trailing.stop_price - 100.05 * (1.0 - 1.0 / 1e4)).abs() < 1e-9);

        // +10 bps: one step up. peak=100.10, stop ≈ 100.0900
        assert!(evaluate_exit(&p, &mut trailing, inputs(10.0, 100.10, 2_000)).is_none());
        assert!((trailing.peak_price - 100.10).abs() < 1e-9);

        // Mid falls below the trail: exit.
        let exit = evaluate_exit(&p, &mut trailing, inputs(8.0, 100.01, 3_000)).unwrap();
        assert_eq!(exit.reason, ExitReason::Trail);
        assert!(exit.maker_first);
    }

    #[test]
    fn test_trailing_trigger_waits_for_min_hold() {
        let p = params();
        let mut trailing = TrailingState {
            active: true,
            peak_price: 100.10,
            stop_price: 100.05,
        };
        // Below trail but min-hold not met: no exit, and TP cannot
        // fire either.
        assert!(evaluate_exit(&p, &mut trailing, inputs(1.0, 100.0, 100)).is_none());
        let exit = evaluate_exit(&p, &mut trailing, inputs(1.0, 100.0, 600)).unwrap();
        assert_eq!(exit.reason, ExitReason::Trail);
    }

    #[test]
    fn test_small_gain_does_not_ratchet() {
        let p = params();
        let mut trailing = TrailingState::default();
        evaluate_exit(&p, &mut trailing, inputs(5.0, 100.05, 1_000));
        let stop_before = trailing.stop_price;

        // +0.2 bps over the peak: below the 0.5 bps step.
        evaluate_exit(&p, &mut trailing, inputs(5.2, 100.052, 1_100));
        assert!((trailing.stop_price - stop_before).abs() < 1e-12);
    }

    #[test]
    fn test_priority_exhaustive_on_conflict_tick() {
        // When TP, SL and timeout all hold (degenerate inputs), TP
        // wins because it sits higher in the chain.
        let mut p = params();
        p.trailing_enabled = false;
        p.stop_loss_bps = 3.0; // degenerate: "loss" above TP
        let mut trailing = TrailingState::default();
        let exit = evaluate_exit(&p, &mut trailing, inputs(2.5, 100.0, 10_000)).unwrap();
        assert_eq!(exit.reason, ExitReason::Tp);
    }
}
