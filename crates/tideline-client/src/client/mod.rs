pub mod backfill;
pub mod diagnostics;
pub mod grid;
pub mod session;
pub mod tail;
