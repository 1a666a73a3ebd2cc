//! Task persistence for Conductor.
//!
//! Every backend implements [`TaskStore`] and applies the same guarded
//! [`TaskMutation`]s, so the task invariants hold no matter where tasks
//! live. The SQLite backend sits behind the `sqlite` feature.

/// JSON-file backend.
pub mod file;
/// In-process backend.
pub mod memory;
/// SQLite backend.
#[cfg(feature = "sqlite")]
pub mod sqlite;
/// The store trait and mutations.
pub mod store;

pub use file::FileTaskStore;
pub use memory::MemoryTaskStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteTaskStore;
pub use store::{TaskMutation, TaskStore};
