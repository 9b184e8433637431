//! Runtime events: types, broadcast bus and synchronous listeners.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to events emitted by the registry, scheduler, recovery
//! engine, runtime and subscriber workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] broadcast channel plus per-kind synchronous listeners
//! - [`Listener`] handle returned by [`Bus::add_listener`]
//!
//! ## Quick reference
//! - **Publishers**: `Registry`, `Scheduler`, `RecoveryEngine`, `Runtime`,
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: `Runtime::subscriber_listener()` (fans out to `SubscriberSet`),
//!   `RecoveryEngine` (resets counters on `ServiceStateChanged`), and callers via
//!   [`Bus::add_listener`].

mod bus;
mod event;
mod listeners;

pub use bus::Bus;
pub use event::{Event, EventKind};
pub use listeners::Listener;
