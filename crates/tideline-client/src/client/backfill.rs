use std::time::{Duration, Instant};

use tracing::trace;

use tideline_proto::{ClientFrame, Update};

use crate::client::grid::{ApplyOutcome, GridReconciler};

pub(crate) const BACKFILL_LOOKAHEAD_ROWS: usize = 120;
pub(crate) const BACKFILL_MAX_ROWS_PER_REQUEST: u32 = 256;
pub(crate) const BACKFILL_MAX_PENDING_REQUESTS: usize = 4;
pub(crate) const BACKFILL_MIN_INTERVAL: Duration = Duration::from_millis(250);
pub(crate) const BACKFILL_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
struct PendingBackfill {
    id: u64,
    start: u64,
    end: u64,
    issued_at: Instant,
}

/// What a `history_backfill` frame did: whether it matched an in-flight
/// request, how its updates landed, and any follow-up request to send.
#[derive(Debug)]
pub struct BackfillOutcome {
    pub matched: bool,
    pub apply: ApplyOutcome,
    pub follow_up: Option<ClientFrame>,
}

/// Keeps the reconciler's loaded-row set sufficient for the viewport without
/// ever issuing overlapping in-flight requests.
pub struct BackfillCoordinator {
    subscription: Option<u64>,
    next_request_id: u64,
    pending: Vec<PendingBackfill>,
    last_request_at: Option<Instant>,
}

impl Default for BackfillCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl BackfillCoordinator {
    pub fn new() -> Self {
        Self {
            subscription: None,
            next_request_id: 1,
            pending: Vec::new(),
            last_request_at: None,
        }
    }

    /// Ties the coordinator to a subscription. Requests are not issued until
    /// this has happened (the host's `hello` carries the id).
    pub fn bind(&mut self, subscription: u64) {
        self.subscription = Some(subscription);
    }

    pub fn reset(&mut self) {
        self.subscription = None;
        self.next_request_id = 1;
        self.pending.clear();
        self.last_request_at = None;
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Called after every reconciler mutation. Emits at most one request for
    /// the first pending run near the viewport, never overlapping an
    /// in-flight range.
    pub fn maybe_request(&mut self, grid: &GridReconciler) -> Option<ClientFrame> {
        let subscription = self.subscription?;
        self.prune_expired();
        if self.pending.len() >= BACKFILL_MAX_PENDING_REQUESTS {
            return None;
        }
        if let Some(last) = self.last_request_at {
            if last.elapsed() < BACKFILL_MIN_INTERVAL && !self.pending.is_empty() {
                return None;
            }
        }
        let (start, span) = grid.first_unloaded_range(BACKFILL_LOOKAHEAD_ROWS)?;
        self.issue(subscription, start, span)
    }

    /// Folds a `history_backfill` frame into the grid. Responses are always
    /// applied authoritatively; only matched responses drive further
    /// coordination, so a response that raced a reconnect cannot start a
    /// request storm.
    pub fn handle_backfill(
        &mut self,
        grid: &mut GridReconciler,
        request_id: u64,
        start_row: u64,
        count: u32,
        updates: &[Update],
        more: bool,
    ) -> BackfillOutcome {
        let apply = grid.apply_updates(updates, true);
        let matched_pos = self.pending.iter().position(|req| req.id == request_id);
        let matched = matched_pos.is_some();
        if let Some(pos) = matched_pos {
            self.pending.remove(pos);
        }
        trace!(
            target = "client::backfill",
            request_id,
            start_row,
            count,
            updates = updates.len(),
            more,
            matched,
            "received history backfill"
        );

        let mut follow_up = None;
        if matched {
            if !more {
                grid.finalize_backfill_range(start_row, start_row.saturating_add(count as u64));
                self.last_request_at = None;
            } else if let Some(subscription) = self.subscription {
                // The host has more rows for this range; chase them without
                // waiting out the reissue interval.
                if let Some((start, span)) = grid.first_unloaded_range(BACKFILL_LOOKAHEAD_ROWS) {
                    follow_up = self.issue(subscription, start, span);
                }
            }
        }
        BackfillOutcome {
            matched,
            apply,
            follow_up,
        }
    }

    fn issue(&mut self, subscription: u64, start: u64, span: u32) -> Option<ClientFrame> {
        let count = span.min(BACKFILL_MAX_ROWS_PER_REQUEST);
        if count == 0 {
            return None;
        }
        let end = start.saturating_add(count as u64);
        if self.overlaps_pending(start, end) {
            return None;
        }
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.saturating_add(1);
        self.pending.push(PendingBackfill {
            id: request_id,
            start,
            end,
            issued_at: Instant::now(),
        });
        self.last_request_at = Some(Instant::now());
        trace!(
            target = "client::backfill",
            request_id,
            subscription,
            start,
            count,
            "requesting history backfill"
        );
        Some(ClientFrame::RequestBackfill {
            subscription,
            request_id,
            start_row: start,
            count,
        })
    }

    fn overlaps_pending(&self, start: u64, end: u64) -> bool {
        self.pending
            .iter()
            .any(|req| ranges_overlap(start, end, req.start, req.end))
    }

    fn prune_expired(&mut self) {
        let mut removed = false;
        self.pending.retain(|req| {
            if req.issued_at.elapsed() > BACKFILL_REQUEST_TIMEOUT {
                removed = true;
                false
            } else {
                true
            }
        });
        if removed {
            self.last_request_at = None;
        }
    }
}

fn ranges_overlap(a_start: u64, a_end: u64, b_start: u64, b_end: u64) -> bool {
    a_start < b_end && b_start < a_end
}
