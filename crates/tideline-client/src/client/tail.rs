use serde::Serialize;
use tracing::trace;

use crate::client::grid::GridReconciler;

/// How close the viewer is to the live end of the stream. Presentation code
/// renders `Hydrating`/`CatchingUp` as a syncing indicator; resize logic
/// consults it before trusting the tail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TailIntent {
    /// Follow not desired; the viewer is scrolled somewhere in history.
    Manual,
    /// Follow desired, nothing loaded at the tail yet.
    Hydrating,
    /// Follow desired, content flowing, but padded rows are still unknown.
    CatchingUp,
    /// Follow desired and the tail is fully synced.
    FollowTail,
}

impl TailIntent {
    pub fn is_syncing(self) -> bool {
        matches!(self, TailIntent::Hydrating | TailIntent::CatchingUp)
    }
}

/// Derivation over reconciler state; holds nothing of its own.
pub fn derive_tail_intent(grid: &GridReconciler) -> TailIntent {
    if !grid.follow_tail_desired() {
        return TailIntent::Manual;
    }
    if grid.highest_loaded_row().is_none() {
        return TailIntent::Hydrating;
    }
    if grid.tail_padding_rows() > 0 {
        TailIntent::CatchingUp
    } else {
        TailIntent::FollowTail
    }
}

/// Thin wrapper that remembers the last derived phase so transitions can be
/// traced and observers only hear about real changes.
pub struct TailIntentMachine {
    current: TailIntent,
}

impl Default for TailIntentMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TailIntentMachine {
    pub fn new() -> Self {
        // A fresh subscription wants the tail but has nothing loaded yet.
        Self {
            current: TailIntent::Hydrating,
        }
    }

    pub fn current(&self) -> TailIntent {
        self.current
    }

    pub fn update(&mut self, grid: &GridReconciler) -> TailIntent {
        let next = derive_tail_intent(grid);
        if next != self.current {
            trace!(
                target = "client::tail",
                from = ?self.current,
                to = ?next,
                "tail intent transition"
            );
            self.current = next;
        }
        next
    }

    pub fn reset(&mut self) {
        self.current = TailIntent::Hydrating;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tideline_proto::{pack_cell, StyleId, Update};

    fn loaded_row(row: u32, seq: u64, text: &str) -> Update {
        Update::Row {
            row,
            seq,
            cells: text
                .chars()
                .map(|ch| pack_cell(ch, StyleId::DEFAULT).into_raw())
                .collect(),
        }
    }

    #[test_timeout::timeout]
    fn manual_when_follow_not_desired() {
        let mut grid = GridReconciler::new();
        grid.set_follow_tail(false);
        assert_eq!(derive_tail_intent(&grid), TailIntent::Manual);
    }

    #[test_timeout::timeout]
    fn hydrating_before_any_rows_load() {
        let mut grid = GridReconciler::new();
        grid.set_follow_tail(true);
        grid.mark_pending_range(0, 24);
        assert_eq!(derive_tail_intent(&grid), TailIntent::Hydrating);
    }

    #[test_timeout::timeout]
    fn catching_up_while_padding_outstanding() {
        let mut grid = GridReconciler::new();
        grid.set_grid_size(100, 8);
        grid.set_viewport(0, 8);
        grid.apply_updates(&[loaded_row(0, 1, "$ ls    ")], true);
        grid.mark_pending_range(1, 5);
        assert_eq!(derive_tail_intent(&grid), TailIntent::CatchingUp);
    }

    #[test_timeout::timeout]
    fn follow_tail_once_pending_range_fills() {
        let mut grid = GridReconciler::new();
        grid.set_grid_size(100, 8);
        grid.set_viewport(0, 8);
        grid.apply_updates(&[loaded_row(0, 1, "$ ls    ")], true);
        grid.mark_pending_range(1, 3);
        assert_eq!(derive_tail_intent(&grid), TailIntent::CatchingUp);

        grid.apply_updates(
            &[loaded_row(1, 10, "a       "), loaded_row(2, 11, "b       ")],
            true,
        );
        assert_eq!(derive_tail_intent(&grid), TailIntent::FollowTail);
    }

    #[test_timeout::timeout]
    fn manual_overrides_padding_state() {
        let mut grid = GridReconciler::new();
        grid.set_grid_size(100, 8);
        grid.apply_updates(&[loaded_row(0, 1, "$ ls    ")], true);
        grid.mark_pending_range(1, 5);
        grid.set_follow_tail(false);
        assert_eq!(derive_tail_intent(&grid), TailIntent::Manual);
    }

    #[test_timeout::timeout]
    fn machine_tracks_transitions() {
        let mut machine = TailIntentMachine::new();
        let mut grid = GridReconciler::new();
        grid.set_follow_tail(true);
        grid.mark_pending_range(0, 4);
        assert_eq!(machine.update(&grid), TailIntent::Hydrating);

        grid.apply_updates(
            &[
                loaded_row(0, 10, "a"),
                loaded_row(1, 11, "b"),
                loaded_row(2, 12, "c"),
                loaded_row(3, 13, "d"),
            ],
            true,
        );
        assert_eq!(machine.update(&grid), TailIntent::FollowTail);
        assert_eq!(machine.current(), TailIntent::FollowTail);
    }
}
