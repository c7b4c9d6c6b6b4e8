//! Storage and persistence layer
//!
//! - File system operations
//! - Data models (key configuration, scan indices)

mod file_system;
mod models;

pub use file_system::Storage;
pub use models::{KeysFile, PersistedIndices};
