//! Lifecycle events and the bus they are published on.
//!
//! - **`event`**: the scheduler's event catalog (`SchedulerEvent`, `EventKind`).
//! - **`bus`**: a synchronous, panic-isolating publish/subscribe registry.

pub mod bus;
pub mod event;

pub use bus::{BusEvent, EventBus, Subscription};
pub use event::{EventKind, SchedulerEvent};
