//! Chat channels and the manager that runs them.
//!
//! A [`Channel`] connects one chat platform to the [`pocket_bus::MessageBus`]:
//! it publishes what users send and delivers what the agent answers. The
//! [`ChannelManager`] starts every enabled channel, drains the outbound queue
//! and routes each message to the channel it names.

pub mod channel;
pub mod manager;
#[cfg(feature = "telegram")]
pub mod telegram;
#[cfg(feature = "telegram")]
pub mod transcription;
#[cfg(feature = "whatsapp")]
pub mod whatsapp;

pub use channel::{is_sender_allowed, Channel};
pub use manager::{ChannelManager, ChannelStatus, DispatchOutcome, ManagerState};
#[cfg(feature = "telegram")]
pub use telegram::TelegramChannel;
#[cfg(feature = "telegram")]
pub use transcription::GroqTranscriber;
#[cfg(feature = "whatsapp")]
pub use whatsapp::WhatsAppChannel;
