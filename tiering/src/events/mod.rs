//! Event-driven decision delivery
//!
//! Decisions reach clients through the same pub/sub bus that observers
//! watch.
//!
//! # Event Flow
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌───────────────────────┐
//! │  TierEngine  │────▶│  Event Bus   │────▶│ client push channels  │
//! │  (publish)   │     │  (broadcast) │     │ (filtered by client)  │
//! └──────────────┘     └──────┬───────┘     └───────────────────────┘
//!                             │
//!                             ▼
//!                      ┌──────────────┐
//!                      │  observers   │
//!                      │ (unfiltered) │
//!                      └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tiering::events::{EventBusExt, EventFilter};
//!
//! let mut push = engine.events().subscribe_filtered(EventFilter::push_channel("client-1"));
//! let event = push.recv().await?;
//! ```

pub mod bus;
pub mod types;

// Re-export core types
pub use bus::{
    EventBus, EventBusExt, EventFilter, FilteredReceiver, SharedEventBus,
    DEFAULT_CHANNEL_CAPACITY,
};
pub use types::{EventId, TierEvent};
