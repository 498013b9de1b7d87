//! Store layer: SQLite persistence for sessions, events, candidates and the
//! merchant directory
//!
//! Every operation is an async fn over `&SqlitePool`; the orchestrator never
//! touches SQL directly.

pub mod candidates;
pub mod directory;
pub mod events;
pub mod init;
pub mod sessions;

pub use directory::{DirectoryCache, DirectoryEntry, UserOverride};
pub use init::{init_database, init_memory};
