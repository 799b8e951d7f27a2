use std::cmp;
use std::mem;

use serde_json::json;
use tracing::{debug, trace, Level};

use tideline_proto::{
    decode_host_frame, ClientFrame, CursorFrame, HostFrame, Lane, Seq, SyncConfigFrame, Update,
    WireError, FEATURE_CURSOR_SYNC,
};

use crate::client::backfill::BackfillCoordinator;
use crate::client::diagnostics::Diagnostics;
use crate::client::grid::{ApplyOutcome, GridReconciler, GridSnapshot, RenderRow};
use crate::client::tail::{TailIntent, TailIntentMachine};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("protocol error: {0}")]
    Protocol(#[from] WireError),
    #[error("shutdown requested")]
    Shutdown,
}

/// Called synchronously after every applied mutation, before control returns
/// to the frame loop.
pub type SnapshotObserver = Box<dyn FnMut(&GridSnapshot, TailIntent)>;

/// Per-subscription frame driver: owns one reconciler, its backfill
/// coordinator, and its tail-intent machine, and turns each decoded host
/// frame into grid mutations plus any client frames to send back.
pub struct ClientSession {
    grid: GridReconciler,
    backfill: BackfillCoordinator,
    tail: TailIntentMachine,
    diagnostics: Diagnostics,
    observers: Vec<SnapshotObserver>,
    subscription: Option<u64>,
    sync_config: Option<SyncConfigFrame>,
    cursor_support: bool,
    completed_lanes: Vec<Lane>,
    last_seq: Seq,
    input_seq: Seq,
    acked_input_seq: Seq,
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientSession {
    pub fn new() -> Self {
        Self::with_diagnostics(Diagnostics::none())
    }

    pub fn with_diagnostics(diagnostics: Diagnostics) -> Self {
        Self {
            grid: GridReconciler::new(),
            backfill: BackfillCoordinator::new(),
            tail: TailIntentMachine::new(),
            diagnostics,
            observers: Vec::new(),
            subscription: None,
            sync_config: None,
            cursor_support: false,
            completed_lanes: Vec::new(),
            last_seq: 0,
            input_seq: 0,
            acked_input_seq: 0,
        }
    }

    pub fn subscription(&self) -> Option<u64> {
        self.subscription
    }

    pub fn sync_config(&self) -> Option<&SyncConfigFrame> {
        self.sync_config.as_ref()
    }

    pub fn last_seq(&self) -> Seq {
        self.last_seq
    }

    pub fn acked_input_seq(&self) -> Seq {
        self.acked_input_seq
    }

    pub fn tail_intent(&self) -> TailIntent {
        self.tail.current()
    }

    /// Whether the host has finished streaming the initial snapshot for a
    /// lane in this session.
    pub fn lane_complete(&self, lane: Lane) -> bool {
        self.completed_lanes.contains(&lane)
    }

    pub fn snapshot(&self) -> GridSnapshot {
        self.grid.snapshot()
    }

    pub fn observe(&mut self, observer: SnapshotObserver) {
        self.observers.push(observer);
    }

    /// Decodes one transport payload and feeds it through [`handle_frame`].
    ///
    /// [`handle_frame`]: ClientSession::handle_frame
    pub fn handle_bytes(&mut self, bytes: &[u8]) -> Result<Vec<ClientFrame>, ClientError> {
        let frame = decode_host_frame(bytes)?;
        self.handle_frame(frame)
    }

    pub fn handle_frame(&mut self, frame: HostFrame) -> Result<Vec<ClientFrame>, ClientError> {
        if tracing::enabled!(Level::DEBUG) {
            debug!(
                target = "client::frame",
                frame = frame_label(&frame),
                "processing frame"
            );
        }
        let mut outbound = Vec::new();
        match frame {
            HostFrame::Heartbeat { seq, .. } => {
                self.last_seq = cmp::max(self.last_seq, seq);
            }
            HostFrame::Hello {
                subscription,
                max_seq,
                config,
                features,
            } => {
                self.grid.reset();
                self.backfill.reset();
                self.tail.reset();
                self.completed_lanes.clear();
                self.backfill.bind(subscription);
                self.subscription = Some(subscription);
                self.cursor_support = features & FEATURE_CURSOR_SYNC != 0;
                self.last_seq = max_seq;
                debug!(
                    target = "client::frame",
                    subscription,
                    max_seq,
                    initial_snapshot_lines = config.initial_snapshot_lines,
                    cursor_support = self.cursor_support,
                    "session established"
                );
                self.sync_config = Some(config);
            }
            HostFrame::Grid {
                viewport_rows,
                cols,
                history_rows,
                base_row,
            } => {
                if let Some(rows) = viewport_rows {
                    trace!(
                        target = "client::frame",
                        rows,
                        "legacy grid shape carried a viewport height"
                    );
                }
                self.grid.set_grid_size(history_rows as usize, cols as usize);
                self.grid.set_base_row(base_row);
            }
            HostFrame::Snapshot {
                watermark,
                updates,
                cursor,
                ..
            } => {
                self.apply_batch("snapshot", &updates, true);
                if let Some(frame) = cursor {
                    self.apply_cursor(&frame, true);
                }
                self.last_seq = cmp::max(self.last_seq, watermark);
            }
            HostFrame::SnapshotComplete { lane, .. } => {
                if !self.completed_lanes.contains(&lane) {
                    self.completed_lanes.push(lane);
                }
                debug!(target = "client::frame", lane = lane.as_u8(), "snapshot lane complete");
            }
            HostFrame::Delta {
                watermark,
                updates,
                cursor,
                ..
            } => {
                self.apply_batch("delta", &updates, false);
                if let Some(frame) = cursor {
                    self.apply_cursor(&frame, false);
                }
                self.last_seq = cmp::max(self.last_seq, watermark);
            }
            HostFrame::HistoryBackfill {
                request_id,
                start_row,
                count,
                updates,
                more,
                cursor,
                ..
            } => {
                let outcome = self.backfill.handle_backfill(
                    &mut self.grid,
                    request_id,
                    start_row,
                    count,
                    &updates,
                    more,
                );
                if !outcome.matched {
                    self.diagnostics.emit("stale_backfill", || {
                        json!({
                            "request_id": request_id,
                            "start_row": start_row,
                            "count": count,
                        })
                    });
                }
                self.report_apply("history_backfill", &outcome.apply);
                if let Some(frame) = outcome.follow_up {
                    outbound.push(frame);
                }
                if let Some(frame) = cursor {
                    self.apply_cursor(&frame, true);
                }
            }
            HostFrame::InputAck { seq } => {
                self.acked_input_seq = cmp::max(self.acked_input_seq, seq);
                trace!(target = "client::frame", seq, "input acknowledged");
            }
            HostFrame::Cursor { cursor, .. } => {
                self.apply_cursor(&cursor, true);
            }
            HostFrame::Shutdown => return Err(ClientError::Shutdown),
        }
        if let Some(request) = self.backfill.maybe_request(&self.grid) {
            outbound.push(request);
        }
        self.notify();
        Ok(outbound)
    }

    /// Mints the next input frame. The seq is client-held and acknowledged
    /// back through `input_ack`.
    pub fn input(&mut self, data: Vec<u8>) -> ClientFrame {
        self.input_seq = self.input_seq.saturating_add(1);
        ClientFrame::Input {
            seq: self.input_seq,
            data,
        }
    }

    /// Mints a resize frame for the host PTY. The local viewport is a
    /// separate concern; see [`set_viewport`].
    ///
    /// [`set_viewport`]: ClientSession::set_viewport
    pub fn resize(&mut self, cols: u16, rows: u16) -> ClientFrame {
        ClientFrame::Resize { cols, rows }
    }

    pub fn set_viewport(&mut self, top: u64, height: usize) -> Option<ClientFrame> {
        self.grid.set_viewport(top, height);
        self.after_mutation()
    }

    pub fn set_follow_tail(&mut self, desired: bool) -> Option<ClientFrame> {
        self.grid.set_follow_tail(desired);
        self.after_mutation()
    }

    pub fn mark_pending_range(&mut self, start: u64, end: u64) -> Option<ClientFrame> {
        self.grid.mark_pending_range(start, end);
        self.after_mutation()
    }

    pub fn visible_rows(&mut self, limit: usize) -> Vec<RenderRow> {
        let rows = self.grid.visible_rows(limit);
        self.notify();
        rows
    }

    fn after_mutation(&mut self) -> Option<ClientFrame> {
        let request = self.backfill.maybe_request(&self.grid);
        self.notify();
        request
    }

    fn apply_batch(&mut self, frame: &'static str, updates: &[Update], authoritative: bool) {
        let outcome = self.grid.apply_updates(updates, authoritative);
        self.report_apply(frame, &outcome);
    }

    fn report_apply(&mut self, frame: &'static str, outcome: &ApplyOutcome) {
        for invalid in &outcome.rejected {
            trace!(
                target = "client::frame",
                frame,
                reason = invalid.reason,
                row = ?invalid.row,
                seq = ?invalid.seq,
                "invalid update skipped"
            );
            self.diagnostics.emit("invalid_update", || {
                json!({
                    "frame": frame,
                    "reason": invalid.reason,
                    "row": invalid.row,
                    "seq": invalid.seq,
                })
            });
        }
        if outcome.padding_dropped > 0 {
            self.diagnostics.emit("padding_drop", || {
                json!({
                    "frame": frame,
                    "updates": outcome.padding_dropped,
                })
            });
        }
    }

    fn apply_cursor(&mut self, frame: &CursorFrame, authoritative: bool) {
        if !self.cursor_support {
            return;
        }
        self.grid.apply_cursor(frame, authoritative);
    }

    fn notify(&mut self) {
        if !self.grid.take_dirty() {
            return;
        }
        let intent = self.tail.update(&self.grid);
        if self.observers.is_empty() {
            return;
        }
        let snapshot = self.grid.snapshot();
        let mut observers = mem::take(&mut self.observers);
        for observer in &mut observers {
            observer(&snapshot, intent);
        }
        self.observers = observers;
    }
}

fn frame_label(frame: &HostFrame) -> &'static str {
    match frame {
        HostFrame::Heartbeat { .. } => "heartbeat",
        HostFrame::Hello { .. } => "hello",
        HostFrame::Grid { .. } => "grid",
        HostFrame::Snapshot { .. } => "snapshot",
        HostFrame::SnapshotComplete { .. } => "snapshot_complete",
        HostFrame::Delta { .. } => "delta",
        HostFrame::HistoryBackfill { .. } => "history_backfill",
        HostFrame::InputAck { .. } => "input_ack",
        HostFrame::Cursor { .. } => "cursor",
        HostFrame::Shutdown => "shutdown",
    }
}
