//! SQLite-backed persistence: ingestion records, the flow journal and the
//! schema they share.

pub mod db;
pub mod journal;
pub mod records;
pub mod schema;

pub use db::Database;
pub use journal::{FlowJournal, FlowRow, StepEntry, StepStatus};
pub use records::{RecordStore, SqliteRecordStore, DEFAULT_CHUNK_SIZE};
