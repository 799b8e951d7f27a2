use super::{
    ClientFrame, CursorFrame, HostFrame, Lane, LaneBudgetFrame, SyncConfigFrame, Update,
    PROTOCOL_VERSION,
};

const VERSION_BITS: u8 = 3;
const VERSION_MASK: u8 = 0b1110_0000;
const TYPE_MASK: u8 = 0b0001_1111;

/// Largest value the varint encoding carries. The ceiling matches the safe
/// integer range of the host environments this protocol interoperates with,
/// so it is a wire-compatibility bound rather than a local convenience.
pub const VARINT_CEILING: u64 = (1 << 53) - 1;

const HOST_KIND_HEARTBEAT: u8 = 0;
const HOST_KIND_HELLO: u8 = 1;
const HOST_KIND_GRID: u8 = 2;
const HOST_KIND_SNAPSHOT: u8 = 3;
const HOST_KIND_SNAPSHOT_COMPLETE: u8 = 4;
const HOST_KIND_DELTA: u8 = 5;
const HOST_KIND_INPUT_ACK: u8 = 6;
const HOST_KIND_SHUTDOWN: u8 = 7;
const HOST_KIND_HISTORY_BACKFILL: u8 = 8;
const HOST_KIND_CURSOR: u8 = 9;

const UPDATE_KIND_CELL: u8 = 0;
const UPDATE_KIND_RECT: u8 = 1;
const UPDATE_KIND_ROW: u8 = 2;
const UPDATE_KIND_SEGMENT: u8 = 3;
const UPDATE_KIND_TRIM: u8 = 4;
const UPDATE_KIND_STYLE: u8 = 5;

const CLIENT_KIND_INPUT: u8 = 0;
const CLIENT_KIND_RESIZE: u8 = 1;
const CLIENT_KIND_REQUEST_BACKFILL: u8 = 2;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),
    #[error("unknown frame type: {0}")]
    UnknownFrameType(u8),
    #[error("unknown update tag: {0}")]
    UnknownUpdateTag(u8),
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("varint overflow")]
    VarIntOverflow,
    #[error("value exceeds encodable range: {0}")]
    ValueOutOfRange(u64),
    #[error("invalid boolean: {0}")]
    InvalidBoolean(u8),
    #[error("invalid data: {0}")]
    InvalidData(&'static str),
}

pub fn encode_host_frame(frame: &HostFrame) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::with_capacity(64);
    match frame {
        HostFrame::Heartbeat { seq, timestamp_ms } => {
            write_header(&mut buf, HOST_KIND_HEARTBEAT);
            write_var_u64(&mut buf, *seq)?;
            write_var_u64(&mut buf, *timestamp_ms)?;
        }
        HostFrame::Hello {
            subscription,
            max_seq,
            config,
            features,
        } => {
            write_header(&mut buf, HOST_KIND_HELLO);
            write_var_u64(&mut buf, *subscription)?;
            write_var_u64(&mut buf, *max_seq)?;
            encode_sync_config(&mut buf, config)?;
            write_var_u32(&mut buf, *features)?;
        }
        HostFrame::Grid {
            viewport_rows,
            cols,
            history_rows,
            base_row,
        } => {
            write_header(&mut buf, HOST_KIND_GRID);
            if let Some(rows) = viewport_rows {
                write_var_u32(&mut buf, *rows)?;
            }
            write_var_u32(&mut buf, *cols)?;
            write_var_u32(&mut buf, *history_rows)?;
            write_var_u64(&mut buf, *base_row)?;
        }
        HostFrame::Snapshot {
            subscription,
            lane,
            watermark,
            has_more,
            updates,
            cursor,
        } => {
            write_header(&mut buf, HOST_KIND_SNAPSHOT);
            write_var_u64(&mut buf, *subscription)?;
            buf.push(lane.as_u8());
            write_var_u64(&mut buf, *watermark)?;
            buf.push(*has_more as u8);
            encode_updates(&mut buf, updates)?;
            encode_optional_cursor(&mut buf, cursor.as_ref())?;
        }
        HostFrame::SnapshotComplete { subscription, lane } => {
            write_header(&mut buf, HOST_KIND_SNAPSHOT_COMPLETE);
            write_var_u64(&mut buf, *subscription)?;
            buf.push(lane.as_u8());
        }
        HostFrame::Delta {
            subscription,
            watermark,
            has_more,
            updates,
            cursor,
        } => {
            write_header(&mut buf, HOST_KIND_DELTA);
            write_var_u64(&mut buf, *subscription)?;
            write_var_u64(&mut buf, *watermark)?;
            buf.push(*has_more as u8);
            encode_updates(&mut buf, updates)?;
            encode_optional_cursor(&mut buf, cursor.as_ref())?;
        }
        HostFrame::HistoryBackfill {
            subscription,
            request_id,
            start_row,
            count,
            updates,
            more,
            cursor,
        } => {
            write_header(&mut buf, HOST_KIND_HISTORY_BACKFILL);
            write_var_u64(&mut buf, *subscription)?;
            write_var_u64(&mut buf, *request_id)?;
            write_var_u64(&mut buf, *start_row)?;
            write_var_u32(&mut buf, *count)?;
            buf.push(*more as u8);
            encode_updates(&mut buf, updates)?;
            encode_optional_cursor(&mut buf, cursor.as_ref())?;
        }
        HostFrame::InputAck { seq } => {
            write_header(&mut buf, HOST_KIND_INPUT_ACK);
            write_var_u64(&mut buf, *seq)?;
        }
        HostFrame::Cursor {
            subscription,
            cursor,
        } => {
            write_header(&mut buf, HOST_KIND_CURSOR);
            write_var_u64(&mut buf, *subscription)?;
            encode_cursor(&mut buf, cursor)?;
        }
        HostFrame::Shutdown => {
            write_header(&mut buf, HOST_KIND_SHUTDOWN);
        }
    }
    Ok(buf)
}

pub fn decode_host_frame(bytes: &[u8]) -> Result<HostFrame, WireError> {
    let mut cursor = Cursor::new(bytes);
    let kind = read_header(&mut cursor)?;
    match kind {
        HOST_KIND_HEARTBEAT => {
            let seq = cursor.read_var_u64()?;
            let timestamp_ms = cursor.read_var_u64()?;
            Ok(HostFrame::Heartbeat { seq, timestamp_ms })
        }
        HOST_KIND_HELLO => {
            let subscription = cursor.read_var_u64()?;
            let max_seq = cursor.read_var_u64()?;
            let config = decode_sync_config(&mut cursor)?;
            let features = cursor.read_var_u32()?;
            Ok(HostFrame::Hello {
                subscription,
                max_seq,
                config,
                features,
            })
        }
        HOST_KIND_GRID => decode_grid_payload(cursor),
        HOST_KIND_SNAPSHOT => {
            let subscription = cursor.read_var_u64()?;
            let lane = decode_lane(&mut cursor)?;
            let watermark = cursor.read_var_u64()?;
            let has_more = cursor.read_bool()?;
            let updates = decode_updates(&mut cursor)?;
            let cursor_frame = decode_optional_cursor(&mut cursor)?;
            Ok(HostFrame::Snapshot {
                subscription,
                lane,
                watermark,
                has_more,
                updates,
                cursor: cursor_frame,
            })
        }
        HOST_KIND_SNAPSHOT_COMPLETE => {
            let subscription = cursor.read_var_u64()?;
            let lane = decode_lane(&mut cursor)?;
            Ok(HostFrame::SnapshotComplete { subscription, lane })
        }
        HOST_KIND_DELTA => {
            let subscription = cursor.read_var_u64()?;
            let watermark = cursor.read_var_u64()?;
            let has_more = cursor.read_bool()?;
            let updates = decode_updates(&mut cursor)?;
            let cursor_frame = decode_optional_cursor(&mut cursor)?;
            Ok(HostFrame::Delta {
                subscription,
                watermark,
                has_more,
                updates,
                cursor: cursor_frame,
            })
        }
        HOST_KIND_HISTORY_BACKFILL => {
            let subscription = cursor.read_var_u64()?;
            let request_id = cursor.read_var_u64()?;
            let start_row = cursor.read_var_u64()?;
            let count = cursor.read_var_u32()?;
            let more = cursor.read_bool()?;
            let updates = decode_updates(&mut cursor)?;
            let cursor_frame = decode_optional_cursor(&mut cursor)?;
            Ok(HostFrame::HistoryBackfill {
                subscription,
                request_id,
                start_row,
                count,
                updates,
                more,
                cursor: cursor_frame,
            })
        }
        HOST_KIND_INPUT_ACK => {
            let seq = cursor.read_var_u64()?;
            Ok(HostFrame::InputAck { seq })
        }
        HOST_KIND_CURSOR => {
            let subscription = cursor.read_var_u64()?;
            let cursor_frame = decode_cursor(&mut cursor)?;
            Ok(HostFrame::Cursor {
                subscription,
                cursor: cursor_frame,
            })
        }
        HOST_KIND_SHUTDOWN => Ok(HostFrame::Shutdown),
        other => Err(WireError::UnknownFrameType(other)),
    }
}

// Legacy senders prefix the grid frame with their viewport row count. Probe
// the current 3-field shape first; trailing bytes mean the payload was the
// 4-field legacy shape, so rewind and re-read. This is a compatibility shim
// for frames already in the wild — new frame types must bump the version
// byte instead of growing probe logic like this.
fn decode_grid_payload(cursor: Cursor<'_>) -> Result<HostFrame, WireError> {
    let mut current = cursor;
    let cols = current.read_var_u32()?;
    let history_rows = current.read_var_u32()?;
    let base_row = current.read_var_u64()?;
    if current.remaining() == 0 {
        return Ok(HostFrame::Grid {
            viewport_rows: None,
            cols,
            history_rows,
            base_row,
        });
    }
    let mut legacy = cursor;
    let viewport_rows = legacy.read_var_u32()?;
    let cols = legacy.read_var_u32()?;
    let history_rows = legacy.read_var_u32()?;
    let base_row = legacy.read_var_u64()?;
    Ok(HostFrame::Grid {
        viewport_rows: Some(viewport_rows),
        cols,
        history_rows,
        base_row,
    })
}

pub fn encode_client_frame(frame: &ClientFrame) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::with_capacity(32);
    match frame {
        ClientFrame::Input { seq, data } => {
            write_header(&mut buf, CLIENT_KIND_INPUT);
            write_var_u64(&mut buf, *seq)?;
            write_var_u32(&mut buf, data.len() as u32)?;
            buf.extend_from_slice(data);
        }
        ClientFrame::Resize { cols, rows } => {
            write_header(&mut buf, CLIENT_KIND_RESIZE);
            write_var_u32(&mut buf, (*cols).into())?;
            write_var_u32(&mut buf, (*rows).into())?;
        }
        ClientFrame::RequestBackfill {
            subscription,
            request_id,
            start_row,
            count,
        } => {
            write_header(&mut buf, CLIENT_KIND_REQUEST_BACKFILL);
            write_var_u64(&mut buf, *subscription)?;
            write_var_u64(&mut buf, *request_id)?;
            write_var_u64(&mut buf, *start_row)?;
            write_var_u32(&mut buf, *count)?;
        }
    }
    Ok(buf)
}

pub fn decode_client_frame(bytes: &[u8]) -> Result<ClientFrame, WireError> {
    let mut cursor = Cursor::new(bytes);
    let kind = read_header(&mut cursor)?;
    match kind {
        CLIENT_KIND_INPUT => {
            let seq = cursor.read_var_u64()?;
            let len = cursor.read_var_u32()? as usize;
            let data = cursor.read_bytes(len)?.to_vec();
            Ok(ClientFrame::Input { seq, data })
        }
        CLIENT_KIND_RESIZE => {
            let cols = cursor.read_var_u32()? as u16;
            let rows = cursor.read_var_u32()? as u16;
            Ok(ClientFrame::Resize { cols, rows })
        }
        CLIENT_KIND_REQUEST_BACKFILL => {
            let subscription = cursor.read_var_u64()?;
            let request_id = cursor.read_var_u64()?;
            let start_row = cursor.read_var_u64()?;
            let count = cursor.read_var_u32()?;
            Ok(ClientFrame::RequestBackfill {
                subscription,
                request_id,
                start_row,
                count,
            })
        }
        other => Err(WireError::UnknownFrameType(other)),
    }
}

fn encode_updates(buf: &mut Vec<u8>, updates: &[Update]) -> Result<(), WireError> {
    write_var_u32(buf, updates.len() as u32)?;
    for update in updates {
        match update {
            Update::Cell {
                row,
                col,
                seq,
                cell,
            } => {
                buf.push(UPDATE_KIND_CELL);
                write_var_u32(buf, *row)?;
                write_var_u32(buf, *col)?;
                write_var_u64(buf, *seq)?;
                write_var_u64(buf, *cell)?;
            }
            Update::Rect {
                rows,
                cols,
                seq,
                cell,
            } => {
                buf.push(UPDATE_KIND_RECT);
                write_var_u32(buf, rows[0])?;
                write_var_u32(buf, rows[1])?;
                write_var_u32(buf, cols[0])?;
                write_var_u32(buf, cols[1])?;
                write_var_u64(buf, *seq)?;
                write_var_u64(buf, *cell)?;
            }
            Update::Row { row, seq, cells } => {
                buf.push(UPDATE_KIND_ROW);
                write_var_u32(buf, *row)?;
                write_var_u64(buf, *seq)?;
                write_var_u32(buf, cells.len() as u32)?;
                for cell in cells {
                    write_var_u64(buf, *cell)?;
                }
            }
            Update::RowSegment {
                row,
                start_col,
                seq,
                cells,
            } => {
                buf.push(UPDATE_KIND_SEGMENT);
                write_var_u32(buf, *row)?;
                write_var_u32(buf, *start_col)?;
                write_var_u64(buf, *seq)?;
                write_var_u32(buf, cells.len() as u32)?;
                for cell in cells {
                    write_var_u64(buf, *cell)?;
                }
            }
            Update::Trim { start, count, seq } => {
                buf.push(UPDATE_KIND_TRIM);
                write_var_u32(buf, *start)?;
                write_var_u32(buf, *count)?;
                write_var_u64(buf, *seq)?;
            }
            Update::Style {
                id,
                seq,
                fg,
                bg,
                attrs,
            } => {
                buf.push(UPDATE_KIND_STYLE);
                write_var_u32(buf, *id)?;
                write_var_u64(buf, *seq)?;
                write_var_u32(buf, *fg)?;
                write_var_u32(buf, *bg)?;
                buf.push(*attrs);
            }
        }
    }
    Ok(())
}

fn decode_updates(cursor: &mut Cursor<'_>) -> Result<Vec<Update>, WireError> {
    let count = cursor.read_var_u32()? as usize;
    let mut updates = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let tag = cursor.read_u8()?;
        let update = match tag {
            UPDATE_KIND_CELL => {
                let row = cursor.read_var_u32()?;
                let col = cursor.read_var_u32()?;
                let seq = cursor.read_var_u64()?;
                let cell = cursor.read_var_u64()?;
                Update::Cell {
                    row,
                    col,
                    seq,
                    cell,
                }
            }
            UPDATE_KIND_RECT => {
                let row_start = cursor.read_var_u32()?;
                let row_end = cursor.read_var_u32()?;
                let col_start = cursor.read_var_u32()?;
                let col_end = cursor.read_var_u32()?;
                let seq = cursor.read_var_u64()?;
                let cell = cursor.read_var_u64()?;
                Update::Rect {
                    rows: [row_start, row_end],
                    cols: [col_start, col_end],
                    seq,
                    cell,
                }
            }
            UPDATE_KIND_ROW => {
                let row = cursor.read_var_u32()?;
                let seq = cursor.read_var_u64()?;
                let len = cursor.read_var_u32()? as usize;
                let mut cells = Vec::with_capacity(len.min(4096));
                for _ in 0..len {
                    cells.push(cursor.read_var_u64()?);
                }
                Update::Row { row, seq, cells }
            }
            UPDATE_KIND_SEGMENT => {
                let row = cursor.read_var_u32()?;
                let start_col = cursor.read_var_u32()?;
                let seq = cursor.read_var_u64()?;
                let len = cursor.read_var_u32()? as usize;
                let mut cells = Vec::with_capacity(len.min(4096));
                for _ in 0..len {
                    cells.push(cursor.read_var_u64()?);
                }
                Update::RowSegment {
                    row,
                    start_col,
                    seq,
                    cells,
                }
            }
            UPDATE_KIND_TRIM => {
                let start = cursor.read_var_u32()?;
                let count = cursor.read_var_u32()?;
                let seq = cursor.read_var_u64()?;
                Update::Trim { start, count, seq }
            }
            UPDATE_KIND_STYLE => {
                let id = cursor.read_var_u32()?;
                let seq = cursor.read_var_u64()?;
                let fg = cursor.read_var_u32()?;
                let bg = cursor.read_var_u32()?;
                let attrs = cursor.read_u8()?;
                Update::Style {
                    id,
                    seq,
                    fg,
                    bg,
                    attrs,
                }
            }
            other => return Err(WireError::UnknownUpdateTag(other)),
        };
        updates.push(update);
    }
    Ok(updates)
}

fn encode_cursor(buf: &mut Vec<u8>, cursor: &CursorFrame) -> Result<(), WireError> {
    write_var_u32(buf, cursor.row)?;
    write_var_u32(buf, cursor.col)?;
    write_var_u64(buf, cursor.seq)?;
    buf.push(cursor.visible as u8);
    buf.push(cursor.blink as u8);
    Ok(())
}

fn encode_optional_cursor(
    buf: &mut Vec<u8>,
    cursor: Option<&CursorFrame>,
) -> Result<(), WireError> {
    buf.push(cursor.is_some() as u8);
    if let Some(frame) = cursor {
        encode_cursor(buf, frame)?;
    }
    Ok(())
}

fn decode_cursor(cursor: &mut Cursor<'_>) -> Result<CursorFrame, WireError> {
    let row = cursor.read_var_u32()?;
    let col = cursor.read_var_u32()?;
    let seq = cursor.read_var_u64()?;
    let visible = cursor.read_bool()?;
    let blink = cursor.read_bool()?;
    Ok(CursorFrame {
        row,
        col,
        seq,
        visible,
        blink,
    })
}

// Frames emitted before cursor sync shipped end right after the update
// list, so the presence flag itself is optional on the way in.
fn decode_optional_cursor(cursor: &mut Cursor<'_>) -> Result<Option<CursorFrame>, WireError> {
    if cursor.remaining() == 0 {
        return Ok(None);
    }
    if cursor.read_bool()? {
        Ok(Some(decode_cursor(cursor)?))
    } else {
        Ok(None)
    }
}

fn encode_sync_config(buf: &mut Vec<u8>, config: &SyncConfigFrame) -> Result<(), WireError> {
    write_var_u32(buf, config.snapshot_budgets.len() as u32)?;
    for LaneBudgetFrame { lane, max_updates } in &config.snapshot_budgets {
        buf.push(lane.as_u8());
        write_var_u32(buf, *max_updates)?;
    }
    write_var_u32(buf, config.delta_budget)?;
    write_var_u64(buf, config.heartbeat_ms)?;
    write_var_u32(buf, config.initial_snapshot_lines)?;
    Ok(())
}

fn decode_sync_config(cursor: &mut Cursor<'_>) -> Result<SyncConfigFrame, WireError> {
    let count = cursor.read_var_u32()? as usize;
    let mut budgets = Vec::with_capacity(count.min(16));
    for _ in 0..count {
        let lane = decode_lane(cursor)?;
        let max_updates = cursor.read_var_u32()?;
        budgets.push(LaneBudgetFrame { lane, max_updates });
    }
    let delta_budget = cursor.read_var_u32()?;
    let heartbeat_ms = cursor.read_var_u64()?;
    let initial_snapshot_lines = cursor.read_var_u32()?;
    Ok(SyncConfigFrame {
        snapshot_budgets: budgets,
        delta_budget,
        heartbeat_ms,
        initial_snapshot_lines,
    })
}

fn write_header(buf: &mut Vec<u8>, kind: u8) {
    let version = PROTOCOL_VERSION & ((1 << VERSION_BITS) - 1);
    buf.push((version << 5) | (kind & TYPE_MASK));
}

fn read_header(cursor: &mut Cursor<'_>) -> Result<u8, WireError> {
    let byte = cursor.read_u8()?;
    let version = (byte & VERSION_MASK) >> 5;
    if version != (PROTOCOL_VERSION & ((1 << VERSION_BITS) - 1)) {
        return Err(WireError::UnsupportedVersion(version));
    }
    Ok(byte & TYPE_MASK)
}

fn write_var_u32(buf: &mut Vec<u8>, value: u32) -> Result<(), WireError> {
    write_var_u64(buf, value as u64)
}

fn write_var_u64(buf: &mut Vec<u8>, mut value: u64) -> Result<(), WireError> {
    if value > VARINT_CEILING {
        return Err(WireError::ValueOutOfRange(value));
    }
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
    Ok(())
}

#[derive(Clone, Copy)]
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        if self.pos >= self.bytes.len() {
            return Err(WireError::UnexpectedEof);
        }
        let value = self.bytes[self.pos];
        self.pos += 1;
        Ok(value)
    }

    fn read_var_u64(&mut self) -> Result<u64, WireError> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        loop {
            if shift > 53 {
                return Err(WireError::VarIntOverflow);
            }
            let byte = self.read_u8()?;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                if result > VARINT_CEILING {
                    return Err(WireError::VarIntOverflow);
                }
                return Ok(result);
            }
            shift += 7;
        }
    }

    fn read_var_u32(&mut self) -> Result<u32, WireError> {
        let value = self.read_var_u64()?;
        if value > u32::MAX as u64 {
            return Err(WireError::InvalidData("u32 overflow"));
        }
        Ok(value as u32)
    }

    fn read_bool(&mut self) -> Result<bool, WireError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(WireError::InvalidBoolean(other)),
        }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.pos + len > self.bytes.len() {
            return Err(WireError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }
}

fn decode_lane(cursor: &mut Cursor<'_>) -> Result<Lane, WireError> {
    let byte = cursor.read_u8()?;
    Lane::from_u8(byte).ok_or(WireError::InvalidData("invalid lane"))
}
