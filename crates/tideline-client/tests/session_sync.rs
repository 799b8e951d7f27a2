use std::sync::{Arc, Mutex};

use tideline_client::{ClientSession, Diagnostics, RowView, TailIntent};
use tideline_proto::{
    encode_host_frame, pack_cell, unpack_cell, ClientFrame, HostFrame, Lane, LaneBudgetFrame,
    StyleId, SyncConfigFrame, Update, FEATURE_CURSOR_SYNC,
};

fn sync_config() -> SyncConfigFrame {
    SyncConfigFrame {
        snapshot_budgets: vec![
            LaneBudgetFrame {
                lane: Lane::Foreground,
                max_updates: 64,
            },
            LaneBudgetFrame {
                lane: Lane::Recent,
                max_updates: 128,
            },
            LaneBudgetFrame {
                lane: Lane::History,
                max_updates: 256,
            },
        ],
        delta_budget: 512,
        heartbeat_ms: 250,
        initial_snapshot_lines: 24,
    }
}

fn hello(subscription: u64) -> HostFrame {
    HostFrame::Hello {
        subscription,
        max_seq: 0,
        config: sync_config(),
        features: FEATURE_CURSOR_SYNC,
    }
}

fn grid_frame(cols: u32, history_rows: u32, base_row: u64) -> HostFrame {
    HostFrame::Grid {
        viewport_rows: None,
        cols,
        history_rows,
        base_row,
    }
}

fn row_update(row: u32, seq: u64, text: &str) -> Update {
    Update::Row {
        row,
        seq,
        cells: text
            .chars()
            .map(|ch| pack_cell(ch, StyleId::DEFAULT).into_raw())
            .collect(),
    }
}

fn snapshot_frame(subscription: u64, watermark: u64, updates: Vec<Update>) -> HostFrame {
    HostFrame::Snapshot {
        subscription,
        lane: Lane::Foreground,
        watermark,
        has_more: false,
        updates,
        cursor: None,
    }
}

fn delta_frame(subscription: u64, watermark: u64, updates: Vec<Update>) -> HostFrame {
    HostFrame::Delta {
        subscription,
        watermark,
        has_more: false,
        updates,
        cursor: None,
    }
}

fn backfill_frame(
    subscription: u64,
    request_id: u64,
    start_row: u64,
    count: u32,
    updates: Vec<Update>,
    more: bool,
) -> HostFrame {
    HostFrame::HistoryBackfill {
        subscription,
        request_id,
        start_row,
        count,
        updates,
        more,
        cursor: None,
    }
}

fn feed(session: &mut ClientSession, frame: &HostFrame) -> Vec<ClientFrame> {
    let bytes = encode_host_frame(frame).expect("encode host frame");
    session.handle_bytes(&bytes).expect("handle host frame")
}

fn row_text(session: &ClientSession, row: u64) -> Option<String> {
    match session.snapshot().rows.get(&row) {
        Some(RowView::Loaded { cells, .. }) => Some(
            cells
                .iter()
                .map(|cell| unpack_cell(*cell).0)
                .collect::<String>(),
        ),
        _ => None,
    }
}

fn request_fields(frame: &ClientFrame) -> (u64, u64, u32) {
    match frame {
        ClientFrame::RequestBackfill {
            request_id,
            start_row,
            count,
            ..
        } => (*request_id, *start_row, *count),
        other => panic!("expected request_backfill, got {other:?}"),
    }
}

/// Full handshake: hello, grid dimensions, then a foreground snapshot.
#[test_timeout::timeout]
fn handshake_hydrates_visible_rows() {
    let mut session = ClientSession::new();
    feed(&mut session, &hello(1));
    feed(&mut session, &grid_frame(80, 120, 0));
    session.set_viewport(0, 24);

    let updates = (0..24)
        .map(|row| row_update(row, (row + 1) as u64, &format!("line {row:03}")))
        .collect();
    feed(&mut session, &snapshot_frame(1, 24, updates));

    assert_eq!(session.subscription(), Some(1));
    assert_eq!(session.last_seq(), 24);
    assert_eq!(session.tail_intent(), TailIntent::FollowTail);
    assert_eq!(row_text(&session, 0).unwrap().trim_end(), "line 000");
    assert_eq!(row_text(&session, 23).unwrap().trim_end(), "line 023");

    let rows = session.visible_rows(24);
    assert_eq!(rows.len(), 24);
    assert!(rows.iter().all(|row| row.is_loaded()));
}

/// The resize-growth defect scenario: a taller viewport over a fully loaded
/// grid must pad the unknown tail with missing rows, never repeat history.
#[test_timeout::timeout]
fn viewport_growth_pads_tail_instead_of_repeating_rows() {
    let mut session = ClientSession::new();
    feed(&mut session, &hello(1));
    feed(&mut session, &grid_frame(80, 200, 0));
    session.set_viewport(0, 24);
    let updates = (0..120)
        .map(|row| row_update(row, (row + 1) as u64, &format!("line {row:03}")))
        .collect();
    feed(&mut session, &snapshot_frame(1, 120, updates));
    assert_eq!(session.tail_intent(), TailIntent::FollowTail);

    let request = session.mark_pending_range(120, 134);
    assert!(request.is_some(), "pending tail should trigger a backfill");
    assert!(session.tail_intent().is_syncing());

    let rows = session.visible_rows(24);
    assert_eq!(rows.len(), 24);
    let mut seen = std::collections::HashSet::new();
    for row in &rows {
        if let Some(text) = row.text() {
            let text = text.trim_end().to_string();
            if !text.is_empty() {
                assert!(seen.insert(text), "tail window repeated a loaded row");
            }
        }
    }
    for row in &rows {
        if row.row() >= 120 {
            assert!(!row.is_loaded(), "unknown tail row rendered as content");
        }
    }
    assert!(session.snapshot().tail_padding_rows > 0);
}

/// Post-resize replays must not repaint padded rows: stale seqs and blank
/// repaints are absorbed; genuinely new content promotes.
#[test_timeout::timeout]
fn padded_rows_survive_authoritative_replay() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&events);
    let mut session = ClientSession::with_diagnostics(Diagnostics::with_sink(Box::new(
        move |event, _payload| {
            record.lock().unwrap().push(event);
        },
    )));
    feed(&mut session, &hello(1));
    feed(&mut session, &grid_frame(12, 200, 0));
    session.set_viewport(0, 24);
    let updates = (0..40)
        .map(|row| row_update(row, (row + 1) as u64, "wwwwwwwwwwww"))
        .collect();
    feed(&mut session, &snapshot_frame(1, 40, updates));

    let request = session.mark_pending_range(40, 44).expect("backfill request");
    let (request_id, start_row, count) = request_fields(&request);
    assert_eq!((start_row, count), (40, 4));

    let replayed = vec![
        // Blank repaint above the pad threshold: confirmed blank, stays dark.
        row_update(40, 50, "            "),
        // Fresh content above the threshold: promotes.
        row_update(41, 50, "$ new prompt"),
        // Replay of an already-rendered row below the threshold: dropped
        // even though the backfill applies authoritatively.
        row_update(42, 12, "wwwwwwwwwwww"),
    ];
    feed(
        &mut session,
        &backfill_frame(1, request_id, 40, 4, replayed, false),
    );

    assert!(row_text(&session, 40).is_none());
    assert_eq!(row_text(&session, 41).unwrap(), "$ new prompt");
    assert!(row_text(&session, 42).is_none());
    assert_eq!(session.snapshot().tail_padding_rows, 0);
    assert_eq!(session.tail_intent(), TailIntent::FollowTail);
    assert!(events.lock().unwrap().contains(&"padding_drop"));
}

#[test_timeout::timeout]
fn trim_evicts_history_and_advances_base() {
    let mut session = ClientSession::new();
    feed(&mut session, &hello(1));
    feed(&mut session, &grid_frame(80, 200, 0));
    session.set_viewport(0, 24);
    let updates = (0..120)
        .map(|row| row_update(row, (row + 1) as u64, &format!("line {row:03}")))
        .collect();
    feed(&mut session, &snapshot_frame(1, 120, updates));

    feed(
        &mut session,
        &delta_frame(
            1,
            121,
            vec![Update::Trim {
                start: 0,
                count: 50,
                seq: 121,
            }],
        ),
    );

    let snapshot = session.snapshot();
    assert_eq!(snapshot.base_row, 50);
    assert!(!snapshot.rows.contains_key(&0));
    assert!(!snapshot.rows.contains_key(&49));
    assert!(snapshot.rows.contains_key(&50));
}

/// One outstanding request per range; `more` responses chase the remainder
/// with a fresh request id.
#[test_timeout::timeout]
fn backfill_requests_dedupe_and_follow_up() {
    let mut session = ClientSession::new();
    feed(&mut session, &hello(1));
    feed(&mut session, &grid_frame(10, 200, 0));
    session.set_follow_tail(false);
    session.set_viewport(10, 10);
    let updates = (0..10)
        .map(|row| row_update(row, (row + 1) as u64, "xxxxxxxxxx"))
        .collect();
    feed(&mut session, &snapshot_frame(1, 10, updates));

    let first = session
        .mark_pending_range(10, 20)
        .expect("first backfill request");
    let (first_id, start, count) = request_fields(&first);
    assert_eq!((start, count), (10, 10));

    // Nothing changed: the range is in flight, so no second request.
    assert!(session.set_viewport(10, 10).is_none());

    let partial = (10..15)
        .map(|row| row_update(row, 100 + row as u64, "yyyyyyyyyy"))
        .collect();
    let outbound = feed(
        &mut session,
        &backfill_frame(1, first_id, 10, 10, partial, true),
    );
    assert_eq!(outbound.len(), 1, "more=true should chase the remainder");
    let (second_id, start, count) = request_fields(&outbound[0]);
    assert_ne!(second_id, first_id);
    assert_eq!((start, count), (15, 5));

    let rest = (15..20)
        .map(|row| row_update(row, 100 + row as u64, "zzzzzzzzzz"))
        .collect();
    let outbound = feed(
        &mut session,
        &backfill_frame(1, second_id, 15, 5, rest, false),
    );
    assert!(outbound.is_empty());
    assert_eq!(row_text(&session, 19).unwrap(), "zzzzzzzzzz");
}

/// A backfill response that raced a reconnect still lands in the grid but
/// must not trigger any further requests.
#[test_timeout::timeout]
fn stale_backfill_response_is_applied_without_chaining() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&events);
    let mut session = ClientSession::with_diagnostics(Diagnostics::with_sink(Box::new(
        move |event, _payload| {
            record.lock().unwrap().push(event);
        },
    )));
    feed(&mut session, &hello(1));
    feed(&mut session, &grid_frame(10, 200, 0));
    session.set_viewport(0, 10);
    let stale_id = {
        let snapshot_updates = (0..4)
            .map(|row| row_update(row, (row + 1) as u64, "xxxxxxxxxx"))
            .collect();
        feed(&mut session, &snapshot_frame(1, 4, snapshot_updates));
        session.set_follow_tail(false);
        let request = session.mark_pending_range(4, 8).expect("request");
        request_fields(&request).0
    };

    // Reconnect clears all pending bookkeeping.
    feed(&mut session, &hello(1));
    feed(&mut session, &grid_frame(10, 200, 0));

    let outbound = feed(
        &mut session,
        &backfill_frame(
            1,
            stale_id,
            0,
            1,
            vec![row_update(0, 5, "recovered!")],
            false,
        ),
    );
    assert!(outbound.is_empty(), "stale response must not chain requests");
    assert_eq!(row_text(&session, 0).unwrap(), "recovered!");
    assert!(events.lock().unwrap().contains(&"stale_backfill"));
}

/// Content ordering safety comes from seq comparison, not arrival order: the
/// same frames delivered in a different order converge to the same grid.
#[test_timeout::timeout]
fn interleaved_delivery_orders_converge() {
    let deltas = [
        delta_frame(1, 10, vec![row_update(0, 10, "third     ")]),
        delta_frame(1, 8, vec![row_update(0, 8, "second    ")]),
        delta_frame(1, 5, vec![row_update(0, 5, "first     ")]),
        delta_frame(1, 12, vec![row_update(1, 12, "other row ")]),
    ];
    let mut orders = vec![
        vec![0usize, 1, 2, 3],
        vec![2, 1, 0, 3],
        vec![3, 0, 2, 1],
        vec![1, 3, 2, 0],
    ];

    let mut rendered = Vec::new();
    for order in orders.drain(..) {
        let mut session = ClientSession::new();
        feed(&mut session, &hello(1));
        feed(&mut session, &grid_frame(10, 100, 0));
        session.set_viewport(0, 4);
        for idx in order {
            feed(&mut session, &deltas[idx]);
        }
        rendered.push((row_text(&session, 0), row_text(&session, 1)));
    }
    for window in rendered.windows(2) {
        assert_eq!(window[0], window[1]);
    }
    assert_eq!(rendered[0].0.as_deref(), Some("third     "));
}

#[test_timeout::timeout]
fn invalid_updates_skip_without_poisoning_batch() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&events);
    let mut session = ClientSession::with_diagnostics(Diagnostics::with_sink(Box::new(
        move |event, _payload| {
            record.lock().unwrap().push(event);
        },
    )));
    feed(&mut session, &hello(1));
    feed(&mut session, &grid_frame(10, 100, 0));
    session.set_viewport(0, 4);

    feed(
        &mut session,
        &delta_frame(
            1,
            20,
            vec![
                Update::RowSegment {
                    row: 0,
                    start_col: 8,
                    seq: 19,
                    cells: vec![pack_cell('x', StyleId::DEFAULT).into_raw(); 4],
                },
                row_update(1, 20, "survivor  "),
            ],
        ),
    );

    assert!(row_text(&session, 0).is_none());
    assert_eq!(row_text(&session, 1).unwrap(), "survivor  ");
    assert!(events.lock().unwrap().contains(&"invalid_update"));
}

#[test_timeout::timeout]
fn decode_failure_leaves_session_usable() {
    let mut session = ClientSession::new();
    feed(&mut session, &hello(1));
    feed(&mut session, &grid_frame(10, 100, 0));

    let garbage = vec![0xFF, 0xFF, 0xFF];
    assert!(session.handle_bytes(&garbage).is_err());

    session.set_viewport(0, 2);
    feed(
        &mut session,
        &snapshot_frame(1, 2, vec![row_update(0, 1, "still ok  ")]),
    );
    assert_eq!(row_text(&session, 0).unwrap(), "still ok  ");
}

#[test_timeout::timeout]
fn observers_hear_every_applied_mutation() {
    let phases = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&phases);
    let mut session = ClientSession::new();
    session.observe(Box::new(move |snapshot, intent| {
        seen.lock()
            .unwrap()
            .push((snapshot.rows.len(), intent));
    }));

    feed(&mut session, &hello(1));
    feed(&mut session, &grid_frame(10, 100, 0));
    session.set_viewport(0, 4);
    feed(
        &mut session,
        &snapshot_frame(1, 1, vec![row_update(0, 1, "hello     ")]),
    );

    let phases = phases.lock().unwrap();
    assert!(!phases.is_empty());
    let (rows, intent) = phases.last().copied().unwrap();
    assert_eq!(rows, 1);
    assert_eq!(intent, TailIntent::FollowTail);
}

#[test_timeout::timeout]
fn snapshot_complete_marks_lane_and_reconnect_clears_it() {
    let mut session = ClientSession::new();
    feed(&mut session, &hello(1));
    assert!(!session.lane_complete(Lane::Foreground));
    feed(
        &mut session,
        &HostFrame::SnapshotComplete {
            subscription: 1,
            lane: Lane::Foreground,
        },
    );
    assert!(session.lane_complete(Lane::Foreground));
    assert!(!session.lane_complete(Lane::History));

    feed(&mut session, &hello(1));
    assert!(!session.lane_complete(Lane::Foreground));
}

#[test_timeout::timeout]
fn cursor_frames_fold_by_seq() {
    let mut session = ClientSession::new();
    feed(&mut session, &hello(1));
    feed(&mut session, &grid_frame(10, 100, 0));

    feed(
        &mut session,
        &HostFrame::Cursor {
            subscription: 1,
            cursor: tideline_proto::CursorFrame {
                row: 3,
                col: 7,
                seq: 9,
                visible: true,
                blink: true,
            },
        },
    );
    let cursor = session.snapshot().cursor.expect("cursor tracked");
    assert_eq!((cursor.row, cursor.col, cursor.seq), (3, 7, 9));
}
