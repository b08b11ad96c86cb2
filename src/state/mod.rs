//! Persistent upload bookkeeping.
//!
//! Every discovered file path gets one row in a SQLite table with a status of
//! pending, completed or failed. A later run consults the table so that only
//! files that did not previously succeed are uploaded again, and
//! `retry-failed` / `status` work purely from the recorded state.

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{SqliteStateDb, StateDb};
pub use types::{UploadRecord, UploadRunStats, UploadStatus, UploadSummary};
