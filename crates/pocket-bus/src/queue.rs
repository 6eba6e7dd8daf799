use pocket_core::{PocketError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

use crate::events::{InboundMessage, OutboundMessage};

/// One FIFO queue. The receiver sits behind a lock so several consumers
/// can share it; they are served in arrival order.
#[derive(Debug)]
struct Queue<T> {
    tx: mpsc::UnboundedSender<T>,
    rx: Mutex<mpsc::UnboundedReceiver<T>>,
    len: AtomicUsize,
}

impl<T> Queue<T> {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            len: AtomicUsize::new(0),
        }
    }

    fn publish(&self, item: T) -> Result<()> {
        self.len.fetch_add(1, Ordering::SeqCst);
        self.tx.send(item).map_err(|_| {
            self.len.fetch_sub(1, Ordering::SeqCst);
            PocketError::BusError("queue receiver dropped".to_string())
        })
    }

    async fn consume(&self) -> Option<T> {
        let item = self.rx.lock().await.recv().await;
        if item.is_some() {
            self.len.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }

    async fn consume_timeout(&self, wait: Duration) -> Option<T> {
        // `recv` is cancel safe, so a timed-out wait loses nothing.
        tokio::time::timeout(wait, self.consume()).await.ok().flatten()
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }
}

/// Two independent FIFO queues: inbound (channels to agent) and outbound
/// (agent to channels). No ordering holds across the two.
#[derive(Debug)]
pub struct MessageBus {
    inbound: Queue<InboundMessage>,
    outbound: Queue<OutboundMessage>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            inbound: Queue::new(),
            outbound: Queue::new(),
        }
    }

    pub fn publish_inbound(&self, msg: InboundMessage) -> Result<()> {
        trace!("Inbound from {}:{}", msg.channel, msg.chat_id);
        self.inbound.publish(msg)
    }

    /// Wait for the next inbound message.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        self.inbound.consume().await
    }

    /// Wait up to `wait` for the next inbound message.
    pub async fn consume_inbound_timeout(&self, wait: Duration) -> Option<InboundMessage> {
        self.inbound.consume_timeout(wait).await
    }

    pub fn publish_outbound(&self, msg: OutboundMessage) -> Result<()> {
        trace!("Outbound to {}:{}", msg.channel, msg.chat_id);
        self.outbound.publish(msg)
    }

    /// Wait for the next outbound message.
    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        self.outbound.consume().await
    }

    /// Wait up to `wait` for the next outbound message.
    pub async fn consume_outbound_timeout(&self, wait: Duration) -> Option<OutboundMessage> {
        self.outbound.consume_timeout(wait).await
    }

    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn outbound(n: usize) -> OutboundMessage {
        OutboundMessage::new("telegram", "1", format!("msg {}", n))
    }

    #[tokio::test]
    async fn test_outbound_is_fifo() {
        let bus = MessageBus::new();
        for n in 0..5 {
            bus.publish_outbound(outbound(n)).unwrap();
        }
        assert_eq!(bus.outbound_len(), 5);

        for n in 0..5 {
            let msg = bus.consume_outbound().await.unwrap();
            assert_eq!(msg.content, format!("msg {}", n));
        }
        assert_eq!(bus.outbound_len(), 0);
    }

    #[tokio::test]
    async fn test_queues_are_independent() {
        let bus = MessageBus::new();
        bus.publish_inbound(InboundMessage::new("whatsapp", "u", "c", "in"))
            .unwrap();

        assert!(bus
            .consume_outbound_timeout(Duration::from_millis(10))
            .await
            .is_none());
        assert_eq!(bus.inbound_len(), 1);
        assert_eq!(bus.consume_inbound().await.unwrap().content, "in");
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_timeout_returns_none_when_empty() {
        let bus = MessageBus::new();
        let started = tokio::time::Instant::now();
        assert!(bus
            .consume_inbound_timeout(Duration::from_secs(1))
            .await
            .is_none());
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_consumer_wakes_on_publish() {
        let bus = Arc::new(MessageBus::new());
        let consumer = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.consume_outbound().await })
        };

        tokio::task::yield_now().await;
        bus.publish_outbound(outbound(7)).unwrap();

        let msg = consumer.await.unwrap().unwrap();
        assert_eq!(msg.content, "msg 7");
    }

    #[tokio::test]
    async fn test_timed_out_wait_keeps_later_messages() {
        let bus = MessageBus::new();
        assert!(bus
            .consume_outbound_timeout(Duration::from_millis(5))
            .await
            .is_none());

        bus.publish_outbound(outbound(1)).unwrap();
        bus.publish_outbound(outbound(2)).unwrap();
        assert_eq!(
            bus.consume_outbound_timeout(Duration::from_millis(5))
                .await
                .unwrap()
                .content,
            "msg 1"
        );
        assert_eq!(bus.outbound_len(), 1);
    }
}
