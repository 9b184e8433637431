//! # Event subscribers.
//!
//! Asynchronous consumers of the runtime's [`Event`](crate::Event) stream.
//! Synchronous per-kind callbacks live on the [`Bus`](crate::Bus) itself
//! (`add_listener`); subscribers are for work that may be slow.
//!
//! ## Architecture
//! ```text
//! Registry / Scheduler / Recovery ── publish ──► Bus ──► runtime listener ──► SubscriberSet::emit
//!                                                                   ┌────────────┼────────────┐
//!                                                                   ▼            ▼            ▼
//!                                                               LogWriter     Metrics      Custom
//! ```
//!
//! ## Implementing a subscriber
//! ```no_run
//! use async_trait::async_trait;
//! use taskwarden::{Event, EventKind, Subscribe};
//!
//! struct FailureCounter;
//!
//! #[async_trait]
//! impl Subscribe for FailureCounter {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::TaskError {
//!             // increment a counter
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         "failure-counter"
//!     }
//! }
//! ```

mod log;
mod subscribe;
mod subscriber_set;

pub use log::LogWriter;
pub use subscribe::Subscribe;
pub use subscriber_set::SubscriberSet;
