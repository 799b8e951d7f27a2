use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use serde::Serialize;
use tracing::trace;

use tideline_proto::{pack_cell, unpack_cell, CursorFrame, PackedCell, Seq, StyleId, Update};

#[derive(Clone, Copy, Debug)]
struct CellState {
    ch: char,
    style_id: Option<u32>,
    seq: Seq,
}

impl CellState {
    fn blank() -> Self {
        Self {
            ch: ' ',
            style_id: None,
            seq: 0,
        }
    }
}

#[derive(Clone)]
struct RowState {
    cells: Vec<CellState>,
    latest_seq: Seq,
}

impl RowState {
    fn new(cols: usize) -> Self {
        Self {
            cells: vec![CellState::blank(); cols.max(1)],
            latest_seq: 0,
        }
    }

    fn ensure_cols(&mut self, cols: usize) {
        if self.cells.len() < cols {
            self.cells.resize(cols, CellState::blank());
        }
    }
}

#[derive(Clone)]
enum RowSlot {
    /// Content not yet known; a backfill may still produce it.
    Pending,
    Loaded(RowState),
    /// Known absent: evicted history or a confirmed-blank row.
    Missing,
}

/// Style table entry; entries are superseded by higher-seq upserts for the
/// same id, never removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StyleEntry {
    pub fg: u32,
    pub bg: u32,
    pub attrs: u8,
    pub seq: Seq,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CursorState {
    pub row: u64,
    pub col: usize,
    pub seq: Seq,
    pub visible: bool,
    pub blink: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RowView {
    Loaded { seq: Seq, cells: Vec<PackedCell> },
    Pending,
    Missing,
}

/// Owned, immutable view of the reconciler state. Mutating it has no effect
/// on the grid.
#[derive(Clone, Debug)]
pub struct GridSnapshot {
    pub base_row: u64,
    pub cols: usize,
    pub history_rows: usize,
    pub rows: BTreeMap<u64, RowView>,
    pub styles: HashMap<u32, StyleEntry>,
    pub cursor: Option<CursorState>,
    pub viewport_top: u64,
    pub viewport_height: usize,
    pub follow_tail_desired: bool,
    pub tail_pad_range: Option<Range<u64>>,
    pub tail_pad_seq_threshold: Seq,
    pub tail_padding_rows: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderCell {
    pub ch: char,
    pub style_id: Option<u32>,
}

/// One paintable row. Tail space past the highest loaded row comes out as
/// `Missing`, never as a repeat of an earlier loaded row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenderRow {
    Loaded { row: u64, cells: Vec<RenderCell> },
    Pending { row: u64 },
    Missing { row: u64 },
}

impl RenderRow {
    pub fn row(&self) -> u64 {
        match self {
            RenderRow::Loaded { row, .. }
            | RenderRow::Pending { row }
            | RenderRow::Missing { row } => *row,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, RenderRow::Loaded { .. })
    }

    pub fn text(&self) -> Option<String> {
        match self {
            RenderRow::Loaded { cells, .. } => {
                Some(cells.iter().map(|cell| cell.ch).collect())
            }
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InvalidUpdate {
    pub reason: &'static str,
    pub row: Option<u64>,
    pub seq: Option<Seq>,
}

#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub rejected: Vec<InvalidUpdate>,
    pub padding_dropped: usize,
}

impl ApplyOutcome {
    fn reject(&mut self, reason: &'static str, row: Option<u64>, seq: Option<Seq>) {
        self.rejected.push(InvalidUpdate { reason, row, seq });
    }
}

struct TailPad {
    range: Range<u64>,
    seq_threshold: Seq,
}

pub struct GridReconciler {
    base_row: u64,
    cols: usize,
    history_rows: usize,
    rows: Vec<RowSlot>,
    styles: HashMap<u32, StyleEntry>,
    cursor: Option<CursorState>,
    viewport_top: u64,
    viewport_height: usize,
    follow_tail: bool,
    tail_pad: Option<TailPad>,
    max_seen_seq: Seq,
    dirty: bool,
}

impl Default for GridReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl GridReconciler {
    pub fn new() -> Self {
        Self {
            base_row: 0,
            cols: 0,
            history_rows: 0,
            rows: Vec::new(),
            styles: HashMap::new(),
            cursor: None,
            viewport_top: 0,
            viewport_height: 0,
            follow_tail: true,
            tail_pad: None,
            max_seen_seq: 0,
            dirty: true,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn base_row(&self) -> u64 {
        self.base_row
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn history_rows(&self) -> usize {
        self.history_rows
    }

    /// Absolute index one past the newest tracked row.
    pub fn total_rows(&self) -> u64 {
        self.base_row + self.rows.len() as u64
    }

    pub fn viewport_top(&self) -> u64 {
        self.viewport_top
    }

    pub fn viewport_height(&self) -> usize {
        self.viewport_height
    }

    pub fn follow_tail_desired(&self) -> bool {
        self.follow_tail
    }

    pub fn set_grid_size(&mut self, history_rows: usize, cols: usize) {
        self.history_rows = history_rows;
        if cols > self.cols {
            for slot in &mut self.rows {
                if let RowSlot::Loaded(state) = slot {
                    state.ensure_cols(cols);
                }
            }
        }
        self.cols = cols;
        self.dirty = true;
    }

    pub fn set_base_row(&mut self, base_row: u64) {
        if base_row == self.base_row {
            return;
        }
        if base_row > self.base_row {
            let drop = (base_row - self.base_row) as usize;
            if drop >= self.rows.len() {
                self.rows.clear();
            } else {
                self.rows.drain(0..drop);
            }
        } else {
            let add = (self.base_row - base_row) as usize;
            for _ in 0..add {
                self.rows.insert(0, RowSlot::Pending);
            }
        }
        self.base_row = base_row;
        self.dirty = true;
    }

    pub fn set_viewport(&mut self, top: u64, height: usize) {
        if top != self.viewport_top || height != self.viewport_height {
            self.viewport_top = top;
            self.viewport_height = height;
            self.dirty = true;
        }
    }

    /// Records the consumer's intent only; actual tail sync state is derived
    /// elsewhere. An existing tail pad survives toggling.
    pub fn set_follow_tail(&mut self, desired: bool) {
        if self.follow_tail != desired {
            self.follow_tail = desired;
            self.dirty = true;
            trace!(
                target = "client::grid",
                follow_tail = desired,
                base_row = self.base_row,
                "set_follow_tail"
            );
        }
    }

    /// Declares `[start, end)` as not-yet-known, extending the tracked range
    /// as needed. While following the tail this also arms the tail pad so
    /// replays below the current watermark cannot repaint these rows.
    pub fn mark_pending_range(&mut self, start: u64, end: u64) {
        if start >= end {
            return;
        }
        for absolute in start..end {
            let rel = self.touch_row(absolute);
            self.rows[rel] = RowSlot::Pending;
        }
        if self.follow_tail {
            self.extend_tail_pad(start, end);
        }
        self.dirty = true;
        trace!(
            target = "client::grid",
            start,
            end,
            follow_tail = self.follow_tail,
            "mark_pending_range"
        );
    }

    pub fn has_pending_rows(&self) -> bool {
        self.rows
            .iter()
            .any(|slot| matches!(slot, RowSlot::Pending))
    }

    pub fn highest_loaded_row(&self) -> Option<u64> {
        self.rows
            .iter()
            .rposition(|slot| matches!(slot, RowSlot::Loaded(_)))
            .map(|idx| self.base_row + idx as u64)
    }

    /// Rows inside the tail pad whose content is still unknown.
    pub fn tail_padding_rows(&self) -> usize {
        let Some(pad) = &self.tail_pad else {
            return 0;
        };
        pad.range
            .clone()
            .filter(|absolute| match self.relative(*absolute) {
                Some(rel) => matches!(self.rows[rel], RowSlot::Pending),
                None => *absolute >= self.base_row,
            })
            .count()
    }

    pub fn tail_pad_range(&self) -> Option<Range<u64>> {
        self.tail_pad.as_ref().map(|pad| pad.range.clone())
    }

    pub fn tail_pad_seq_threshold(&self) -> Seq {
        self.tail_pad
            .as_ref()
            .map(|pad| pad.seq_threshold)
            .unwrap_or(0)
    }

    pub fn apply_updates(&mut self, updates: &[Update], authoritative: bool) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        for update in updates {
            self.max_seen_seq = self.max_seen_seq.max(update_seq(update));
            match update {
                Update::Cell {
                    row,
                    col,
                    seq,
                    cell,
                } => self.apply_cell(*row, *col, *seq, *cell, authoritative, &mut outcome),
                Update::Rect {
                    rows,
                    cols,
                    seq,
                    cell,
                } => self.apply_rect(*rows, *cols, *seq, *cell, authoritative, &mut outcome),
                Update::Row { row, seq, cells } => {
                    self.apply_row(*row, *seq, cells, authoritative, &mut outcome)
                }
                Update::RowSegment {
                    row,
                    start_col,
                    seq,
                    cells,
                } => self.apply_segment(*row, *start_col, *seq, cells, authoritative, &mut outcome),
                Update::Trim { start, count, seq } => self.apply_trim(*start, *count, *seq),
                Update::Style {
                    id,
                    seq,
                    fg,
                    bg,
                    attrs,
                } => self.apply_style(*id, *seq, *fg, *bg, *attrs, authoritative),
            }
        }
        self.maybe_clear_tail_pad();
        outcome
    }

    pub fn apply_cursor(&mut self, frame: &CursorFrame, authoritative: bool) {
        let supersedes = match &self.cursor {
            Some(current) => authoritative || frame.seq > current.seq,
            None => true,
        };
        if supersedes {
            self.cursor = Some(CursorState {
                row: frame.row as u64,
                col: frame.col as usize,
                seq: frame.seq,
                visible: frame.visible,
                blink: frame.blink,
            });
            self.dirty = true;
        }
    }

    /// Completed-backfill bookkeeping: rows of the answered range that no
    /// update touched are confirmed blank rather than left pending, so the
    /// coordinator does not re-request them forever.
    pub fn finalize_backfill_range(&mut self, start: u64, end: u64) {
        let clamp_start = start.max(self.base_row);
        let clamp_end = end.min(self.total_rows());
        for absolute in clamp_start..clamp_end {
            let rel = (absolute - self.base_row) as usize;
            if matches!(self.rows[rel], RowSlot::Pending) {
                self.rows[rel] = RowSlot::Missing;
                self.dirty = true;
            }
        }
        self.maybe_clear_tail_pad();
    }

    /// Rows to paint for a viewport of at most `limit` rows. While following
    /// the tail the window is anchored to the end of the tracked range, and
    /// any window rows past the highest loaded row become padding: rendered
    /// `Missing` and recorded in the tail pad, never filled by repeating
    /// earlier rows.
    pub fn visible_rows(&mut self, limit: usize) -> Vec<RenderRow> {
        let height = self.viewport_height.max(1).min(limit.max(1));
        let top = self.effective_top(height);
        if self.follow_tail {
            self.viewport_top = top;
        }
        let mut out = Vec::with_capacity(height);
        for offset in 0..height {
            let absolute = top.saturating_add(offset as u64);
            out.push(self.render_row(absolute));
        }
        if self.follow_tail {
            let window_end = top.saturating_add(height as u64);
            let pad_start = match self.highest_loaded_row() {
                Some(highest) => highest.saturating_add(1).max(top),
                None => top,
            };
            if pad_start < window_end {
                self.extend_tail_pad(pad_start, window_end);
            }
        }
        out
    }

    pub fn snapshot(&self) -> GridSnapshot {
        let mut rows = BTreeMap::new();
        for (idx, slot) in self.rows.iter().enumerate() {
            let absolute = self.base_row + idx as u64;
            let view = match slot {
                RowSlot::Loaded(state) => RowView::Loaded {
                    seq: state.latest_seq,
                    cells: state
                        .cells
                        .iter()
                        .map(|cell| pack_cell(cell.ch, StyleId(cell.style_id.unwrap_or(0))))
                        .collect(),
                },
                RowSlot::Pending => RowView::Pending,
                RowSlot::Missing => RowView::Missing,
            };
            rows.insert(absolute, view);
        }
        GridSnapshot {
            base_row: self.base_row,
            cols: self.cols,
            history_rows: self.history_rows,
            rows,
            styles: self.styles.clone(),
            cursor: self.cursor,
            viewport_top: self.viewport_top,
            viewport_height: self.viewport_height,
            follow_tail_desired: self.follow_tail,
            tail_pad_range: self.tail_pad_range(),
            tail_pad_seq_threshold: self.tail_pad_seq_threshold(),
            tail_padding_rows: self.tail_padding_rows(),
        }
    }

    /// First contiguous run of `Pending` rows around the effective viewport,
    /// scanning `lookaround` rows either side of it.
    pub fn first_unloaded_range(&self, lookaround: usize) -> Option<(u64, u32)> {
        if self.rows.is_empty() {
            return None;
        }
        let height = self.viewport_height.max(1);
        let first_visible = self.effective_top(height);
        let start = first_visible.saturating_sub(lookaround as u64);
        let span = height.saturating_add(lookaround).saturating_add(lookaround);
        let mut pending_start: Option<u64> = None;
        let mut count: u32 = 0;
        for offset in 0..=span {
            let absolute = start.saturating_add(offset as u64);
            if let Some(rel) = self.relative(absolute) {
                if matches!(self.rows[rel], RowSlot::Pending) {
                    if pending_start.is_none() {
                        pending_start = Some(absolute);
                        count = 0;
                    }
                    count = count.saturating_add(1);
                } else if let Some(run_start) = pending_start {
                    return Some((run_start, count));
                }
            }
            if absolute == u64::MAX {
                break;
            }
        }
        pending_start.map(|row| (row, count))
    }

    pub fn take_dirty(&mut self) -> bool {
        let was_dirty = self.dirty;
        self.dirty = false;
        was_dirty
    }

    fn effective_top(&self, height: usize) -> u64 {
        if self.follow_tail {
            if self.rows.is_empty() {
                self.base_row
            } else {
                self.total_rows().saturating_sub(height as u64)
            }
        } else {
            self.viewport_top
        }
    }

    fn render_row(&self, absolute: u64) -> RenderRow {
        match self.relative(absolute) {
            Some(rel) => match &self.rows[rel] {
                RowSlot::Loaded(state) => {
                    let width = if self.cols > 0 {
                        self.cols
                    } else {
                        state.cells.len()
                    };
                    let cells = (0..width.max(1))
                        .map(|col| match state.cells.get(col) {
                            Some(cell) => RenderCell {
                                ch: cell.ch,
                                style_id: cell.style_id,
                            },
                            None => RenderCell {
                                ch: ' ',
                                style_id: None,
                            },
                        })
                        .collect();
                    RenderRow::Loaded {
                        row: absolute,
                        cells,
                    }
                }
                RowSlot::Pending => RenderRow::Pending { row: absolute },
                RowSlot::Missing => RenderRow::Missing { row: absolute },
            },
            None => RenderRow::Missing { row: absolute },
        }
    }

    fn relative(&self, absolute: u64) -> Option<usize> {
        if absolute < self.base_row {
            return None;
        }
        let idx = (absolute - self.base_row) as usize;
        (idx < self.rows.len()).then_some(idx)
    }

    fn touch_row(&mut self, absolute: u64) -> usize {
        if absolute < self.base_row {
            let missing = (self.base_row - absolute) as usize;
            for _ in 0..missing {
                self.rows.insert(0, RowSlot::Pending);
            }
            self.base_row = absolute;
            return 0;
        }
        let required = (absolute - self.base_row) as usize + 1;
        while self.rows.len() < required {
            self.rows.push(RowSlot::Pending);
        }
        required - 1
    }

    fn ensure_col(&mut self, col: usize) {
        if col < self.cols {
            return;
        }
        let new_cols = col + 1;
        for slot in &mut self.rows {
            if let RowSlot::Loaded(state) = slot {
                state.ensure_cols(new_cols);
            }
        }
        self.cols = new_cols;
    }

    fn loaded_row_mut(&mut self, rel: usize) -> &mut RowState {
        let cols = self.cols;
        if !matches!(self.rows[rel], RowSlot::Loaded(_)) {
            self.rows[rel] = RowSlot::Loaded(RowState::new(cols));
        }
        match &mut self.rows[rel] {
            RowSlot::Loaded(state) => {
                state.ensure_cols(cols);
                state
            }
            _ => unreachable!("slot promoted above"),
        }
    }

    /// A padded row ignores replays below the pad's seq threshold and blank
    /// repaints at any seq; a blank repaint at or above the threshold does
    /// confirm the row as known-blank. Returns whether the update was
    /// absorbed by the pad.
    fn pad_absorbs(&mut self, absolute: u64, seq: Seq, incoming_blank: bool) -> bool {
        let Some(pad) = &self.tail_pad else {
            return false;
        };
        if !pad.range.contains(&absolute) {
            return false;
        }
        if let Some(rel) = self.relative(absolute) {
            if matches!(self.rows[rel], RowSlot::Loaded(_)) {
                return false;
            }
        }
        if seq < pad.seq_threshold {
            trace!(
                target = "client::grid",
                row = absolute,
                seq,
                threshold = pad.seq_threshold,
                "padding drop: stale replay"
            );
            return true;
        }
        if incoming_blank {
            // Same bytes the padding already renders; keep the row immutable
            // but record that its blankness is now confirmed.
            let rel = self.touch_row(absolute);
            if !matches!(self.rows[rel], RowSlot::Missing) {
                self.rows[rel] = RowSlot::Missing;
                self.dirty = true;
            }
            trace!(
                target = "client::grid",
                row = absolute,
                seq,
                "padding drop: blank repaint"
            );
            return true;
        }
        false
    }

    fn extend_tail_pad(&mut self, start: u64, end: u64) {
        if start >= end {
            return;
        }
        match &mut self.tail_pad {
            Some(pad) => {
                pad.range = pad.range.start.min(start)..pad.range.end.max(end);
            }
            None => {
                let seq_threshold = self.max_seen_seq.saturating_add(1);
                trace!(
                    target = "client::grid",
                    start,
                    end,
                    seq_threshold,
                    "tail pad armed"
                );
                self.tail_pad = Some(TailPad {
                    range: start..end,
                    seq_threshold,
                });
            }
        }
    }

    fn maybe_clear_tail_pad(&mut self) {
        let Some(pad) = &self.tail_pad else {
            return;
        };
        if pad.range.end <= self.base_row {
            self.tail_pad = None;
            return;
        }
        let unresolved = pad.range.clone().any(|absolute| {
            match self.relative(absolute) {
                Some(rel) => matches!(self.rows[rel], RowSlot::Pending),
                // Untracked rows at or past the base are still unknown.
                None => absolute >= self.base_row,
            }
        });
        if !unresolved {
            trace!(
                target = "client::grid",
                start = pad.range.start,
                end = pad.range.end,
                "tail pad cleared"
            );
            self.tail_pad = None;
        }
    }

    fn apply_cell(
        &mut self,
        row: u32,
        col: u32,
        seq: Seq,
        cell: u64,
        authoritative: bool,
        outcome: &mut ApplyOutcome,
    ) {
        let absolute = row as u64;
        let col = col as usize;
        if self.cols > 0 && col >= self.cols {
            outcome.reject("cell column out of bounds", Some(absolute), Some(seq));
            return;
        }
        let (ch, style) = unpack_cell(PackedCell::from_raw(cell));
        if self.pad_absorbs(absolute, seq, ch == ' ') {
            outcome.padding_dropped += 1;
            return;
        }
        let rel = self.touch_row(absolute);
        self.ensure_col(col);
        let state = self.loaded_row_mut(rel);
        let target = &mut state.cells[col];
        if authoritative || seq > target.seq {
            target.ch = ch;
            target.seq = seq;
            target.style_id = style_id_option(style);
            state.latest_seq = state.latest_seq.max(seq);
            self.dirty = true;
        }
    }

    fn apply_row(
        &mut self,
        row: u32,
        seq: Seq,
        cells: &[u64],
        authoritative: bool,
        outcome: &mut ApplyOutcome,
    ) {
        let absolute = row as u64;
        if self.cols > 0 && cells.len() > self.cols {
            outcome.reject("row wider than grid", Some(absolute), Some(seq));
            return;
        }
        let decoded: Vec<(char, Option<u32>)> = cells
            .iter()
            .map(|cell| {
                let (ch, style) = unpack_cell(PackedCell::from_raw(*cell));
                (ch, style_id_option(style))
            })
            .collect();
        let blank = decoded.iter().all(|(ch, _)| *ch == ' ');
        if self.pad_absorbs(absolute, seq, blank) {
            outcome.padding_dropped += 1;
            return;
        }
        let rel = self.touch_row(absolute);
        if !decoded.is_empty() {
            self.ensure_col(decoded.len() - 1);
        }
        let total_cols = self.cols.max(1);
        let state = self.loaded_row_mut(rel);
        if !authoritative && seq <= state.latest_seq {
            return;
        }
        state.ensure_cols(total_cols);
        for (col, (ch, style_id)) in decoded.iter().enumerate() {
            let target = &mut state.cells[col];
            target.ch = *ch;
            target.seq = seq;
            target.style_id = *style_id;
        }
        for col in decoded.len()..total_cols {
            let target = &mut state.cells[col];
            target.ch = ' ';
            target.seq = seq;
            target.style_id = None;
        }
        state.latest_seq = state.latest_seq.max(seq);
        self.dirty = true;
    }

    fn apply_segment(
        &mut self,
        row: u32,
        start_col: u32,
        seq: Seq,
        cells: &[u64],
        authoritative: bool,
        outcome: &mut ApplyOutcome,
    ) {
        let absolute = row as u64;
        let start = start_col as usize;
        if self.cols > 0 && start + cells.len() > self.cols {
            outcome.reject("row segment overflows row", Some(absolute), Some(seq));
            return;
        }
        let decoded: Vec<(char, Option<u32>)> = cells
            .iter()
            .map(|cell| {
                let (ch, style) = unpack_cell(PackedCell::from_raw(*cell));
                (ch, style_id_option(style))
            })
            .collect();
        let blank = decoded.iter().all(|(ch, _)| *ch == ' ');
        if self.pad_absorbs(absolute, seq, blank) {
            outcome.padding_dropped += 1;
            return;
        }
        if decoded.is_empty() {
            return;
        }
        let rel = self.touch_row(absolute);
        self.ensure_col(start + decoded.len() - 1);
        let state = self.loaded_row_mut(rel);
        let mut touched = false;
        for (offset, (ch, style_id)) in decoded.iter().enumerate() {
            let target = &mut state.cells[start + offset];
            if authoritative || seq > target.seq {
                target.ch = *ch;
                target.seq = seq;
                target.style_id = *style_id;
                touched = true;
            }
        }
        if touched {
            state.latest_seq = state.latest_seq.max(seq);
            self.dirty = true;
        }
    }

    fn apply_rect(
        &mut self,
        rows: [u32; 2],
        cols: [u32; 2],
        seq: Seq,
        cell: u64,
        authoritative: bool,
        outcome: &mut ApplyOutcome,
    ) {
        if rows[1] < rows[0] || cols[1] < cols[0] {
            outcome.reject("malformed rect", Some(rows[0] as u64), Some(seq));
            return;
        }
        if self.cols > 0 && cols[1] as usize > self.cols {
            outcome.reject("rect column out of bounds", Some(rows[0] as u64), Some(seq));
            return;
        }
        let (ch, style) = unpack_cell(PackedCell::from_raw(cell));
        let style_id = style_id_option(style);
        for row in rows[0]..rows[1] {
            let absolute = row as u64;
            if self.pad_absorbs(absolute, seq, ch == ' ') {
                outcome.padding_dropped += 1;
                continue;
            }
            let rel = self.touch_row(absolute);
            if cols[1] > 0 {
                self.ensure_col(cols[1] as usize - 1);
            }
            let state = self.loaded_row_mut(rel);
            let mut touched = false;
            for col in cols[0]..cols[1] {
                let target = &mut state.cells[col as usize];
                if authoritative || seq > target.seq {
                    target.ch = ch;
                    target.seq = seq;
                    target.style_id = style_id;
                    touched = true;
                }
            }
            if touched {
                state.latest_seq = state.latest_seq.max(seq);
                self.dirty = true;
            }
        }
    }

    fn apply_trim(&mut self, start: u32, count: u32, seq: Seq) {
        if count == 0 {
            return;
        }
        let start = start as u64;
        let end = start + count as u64;
        trace!(
            target = "client::grid",
            start,
            count,
            seq,
            base_row = self.base_row,
            "trim"
        );
        if start <= self.base_row {
            if end <= self.base_row {
                return;
            }
            let drop = ((end - self.base_row) as usize).min(self.rows.len());
            self.rows.drain(0..drop);
            self.base_row = end;
        } else {
            let clamp_end = end.min(self.total_rows());
            for absolute in start..clamp_end {
                let rel = (absolute - self.base_row) as usize;
                self.rows[rel] = RowSlot::Missing;
            }
        }
        self.dirty = true;
    }

    fn apply_style(&mut self, id: u32, seq: Seq, fg: u32, bg: u32, attrs: u8, authoritative: bool) {
        let supersedes = match self.styles.get(&id) {
            Some(entry) => authoritative || seq > entry.seq,
            None => true,
        };
        if supersedes {
            self.styles.insert(id, StyleEntry { fg, bg, attrs, seq });
            self.dirty = true;
        }
    }
}

fn style_id_option(style: StyleId) -> Option<u32> {
    (style != StyleId::DEFAULT).then_some(style.0)
}

fn update_seq(update: &Update) -> Seq {
    match update {
        Update::Cell { seq, .. }
        | Update::Rect { seq, .. }
        | Update::Row { seq, .. }
        | Update::RowSegment { seq, .. }
        | Update::Trim { seq, .. }
        | Update::Style { seq, .. } => *seq,
    }
}
