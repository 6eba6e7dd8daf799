//! Message bus decoupling chat channels from the agent.
//!
//! Channels publish what users say onto the inbound queue; whatever answers
//! them publishes onto the outbound queue, which the channel manager drains
//! and routes back to the right channel. Each queue is strictly FIFO.

pub mod events;
pub mod queue;

pub use events::{InboundMessage, OutboundMessage};
pub use queue::MessageBus;
