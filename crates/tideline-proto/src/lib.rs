pub mod cell;
pub mod wire;

pub use cell::{pack_cell, unpack_cell, PackedCell, StyleId};
pub use wire::{
    decode_client_frame, decode_host_frame, encode_client_frame, encode_host_frame, WireError,
};

use serde::{Deserialize, Serialize};

/// Monotonic sequence number stamped on every grid mutation by the host.
pub type Seq = u64;

pub const PROTOCOL_VERSION: u8 = 1;

/// Feature bit advertised in `hello`: the host emits authoritative cursor
/// frames for this subscription.
pub const FEATURE_CURSOR_SYNC: u32 = 1 << 0;

/// Delivery priority partition. Snapshots are lane-scoped so the host can
/// push visible rows before deep history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Lane {
    Foreground = 0,
    Recent = 1,
    History = 2,
}

impl Lane {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Lane::Foreground),
            1 => Some(Lane::Recent),
            2 => Some(Lane::History),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneBudgetFrame {
    pub lane: Lane,
    pub max_updates: u32,
}

/// The host's declared flow-control policy. Clients record it; only the
/// producer side enforces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfigFrame {
    pub snapshot_budgets: Vec<LaneBudgetFrame>,
    pub delta_budget: u32,
    pub heartbeat_ms: u64,
    pub initial_snapshot_lines: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorFrame {
    pub row: u32,
    pub col: u32,
    pub seq: Seq,
    pub visible: bool,
    pub blink: bool,
}

/// Atomic grid mutation. Each variant carries the seq used for ordering at
/// the granularity it targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Update {
    Cell {
        row: u32,
        col: u32,
        seq: Seq,
        cell: u64,
    },
    /// Uniform fill over `[rows[0], rows[1]) x [cols[0], cols[1])`.
    Rect {
        rows: [u32; 2],
        cols: [u32; 2],
        seq: Seq,
        cell: u64,
    },
    Row {
        row: u32,
        seq: Seq,
        cells: Vec<u64>,
    },
    RowSegment {
        row: u32,
        start_col: u32,
        seq: Seq,
        cells: Vec<u64>,
    },
    /// Evict `count` rows starting at absolute row `start`.
    Trim {
        start: u32,
        count: u32,
        seq: Seq,
    },
    Style {
        id: u32,
        seq: Seq,
        fg: u32,
        bg: u32,
        attrs: u8,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostFrame {
    Heartbeat {
        seq: Seq,
        timestamp_ms: u64,
    },
    Hello {
        subscription: u64,
        max_seq: Seq,
        config: SyncConfigFrame,
        features: u32,
    },
    Grid {
        /// Present only in the legacy wire shape; retired senders still
        /// prefix the grid frame with their viewport height.
        viewport_rows: Option<u32>,
        cols: u32,
        history_rows: u32,
        base_row: u64,
    },
    Snapshot {
        subscription: u64,
        lane: Lane,
        watermark: Seq,
        has_more: bool,
        updates: Vec<Update>,
        cursor: Option<CursorFrame>,
    },
    SnapshotComplete {
        subscription: u64,
        lane: Lane,
    },
    Delta {
        subscription: u64,
        watermark: Seq,
        has_more: bool,
        updates: Vec<Update>,
        cursor: Option<CursorFrame>,
    },
    HistoryBackfill {
        subscription: u64,
        request_id: u64,
        start_row: u64,
        count: u32,
        updates: Vec<Update>,
        more: bool,
        cursor: Option<CursorFrame>,
    },
    InputAck {
        seq: Seq,
    },
    Cursor {
        subscription: u64,
        cursor: CursorFrame,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Input {
        seq: Seq,
        data: Vec<u8>,
    },
    Resize {
        cols: u16,
        rows: u16,
    },
    RequestBackfill {
        subscription: u64,
        request_id: u64,
        start_row: u64,
        count: u32,
    },
}
