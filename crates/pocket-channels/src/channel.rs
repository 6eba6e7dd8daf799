use async_trait::async_trait;
use pocket_bus::OutboundMessage;
use pocket_core::Result;

/// An integration with one chat platform.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Channel: Send + Sync {
    /// Name outbound messages use to address this channel
    fn name(&self) -> &str;

    /// Connect and publish inbound messages until `stop` is called.
    async fn start(&self) -> Result<()>;

    /// Release the connection. Calling it again is a no-op.
    async fn stop(&self) -> Result<()>;

    /// Deliver one message.
    async fn send(&self, msg: &OutboundMessage) -> Result<()>;

    fn is_running(&self) -> bool;
}

/// Whether `sender_id` may talk to the bot.
///
/// An empty allow-list lets everyone through. Composite ids such as
/// `"123|alice"` match when any of their parts is listed.
pub fn is_sender_allowed(allow_from: &[String], sender_id: &str) -> bool {
    if allow_from.is_empty() {
        return true;
    }

    if allow_from.iter().any(|allowed| allowed == sender_id) {
        return true;
    }

    sender_id
        .split('|')
        .filter(|part| !part.is_empty())
        .any(|part| allow_from.iter().any(|allowed| allowed == part))
}
