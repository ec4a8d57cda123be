//! Inter-agent messaging.
//!
//! ```text
//! ┌─────────────┐         ┌─────────────────┐         ┌─────────────┐
//! │   Agent A   │──send──▶│   MessageBus    │──inbox─▶│   Agent B   │
//! └─────────────┘         │ (name → inbox)  │         └─────────────┘
//!                         └────────┬────────┘
//!                                  │ by message type
//!                                  ▼
//!                         ┌─────────────────┐
//!                         │   subscribers   │
//!                         └─────────────────┘
//! ```

mod bus;
mod handler;
mod message;

pub use bus::{BusStats, Inbox, MessageBus};
pub use handler::{BoxedHandler, FnHandler, MessageHandler, handler_fn};
pub(crate) use handler::dispatch_all;
pub use message::{BROADCAST, CompletionReport, Message};
