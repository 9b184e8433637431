//! Durable key-value storage for task metadata and service state.
//!
//! The registry persists through the [`DurableStore`] trait only. Failures are
//! reported as [`PersistenceError`](crate::PersistenceError) by the caller and
//! never abort an operation.
//!
//! ## Implementations
//! - [`MemoryStore`]: process-local map (default; useful in tests).
//! - [`JsonFileStore`]: one JSON object file on disk.

mod file;
mod memory;

use async_trait::async_trait;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Storage keys used by the runtime.
pub mod keys {
    /// Serialized task descriptors, keyed by task id.
    pub const TASKS: &str = "taskwarden:tasks";
    /// Registry running flag.
    pub const SERVICE_RUNNING: &str = "taskwarden:service_running";
    /// Registry service config.
    pub const SERVICE_CONFIG: &str = "taskwarden:service_config";
    /// Whether the runtime restarts the service on initialization.
    pub const AUTO_RESTART: &str = "taskwarden:auto_restart";
    /// Last config passed to `Runtime::start_service`.
    pub const LAST_CONFIG: &str = "taskwarden:last_config";
}

/// Async string key-value store.
#[async_trait]
pub trait DurableStore: Send + Sync + 'static {
    /// Reads a key. `Ok(None)` means absent.
    async fn get(&self, key: &str) -> Result<Option<String>, String>;

    /// Writes a key.
    async fn set(&self, key: &str, value: String) -> Result<(), String>;

    /// Deletes a key; deleting an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), String>;
}
