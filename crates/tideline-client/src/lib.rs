pub mod client;

pub use client::backfill::{BackfillCoordinator, BackfillOutcome};
pub use client::diagnostics::{DiagnosticSink, Diagnostics};
pub use client::grid::{
    ApplyOutcome, CursorState, GridReconciler, GridSnapshot, InvalidUpdate, RenderCell, RenderRow,
    RowView, StyleEntry,
};
pub use client::session::{ClientError, ClientSession, SnapshotObserver};
pub use client::tail::{derive_tail_intent, TailIntent, TailIntentMachine};
