//! WhatsApp channel backed by a local bridge process.
//!
//! The bridge owns the WhatsApp Web session and speaks JSON over a websocket:
//! it pushes `message`, `status`, `qr` and `error` events and accepts
//! `{"type": "send", "to": ..., "text": ...}` commands. The channel keeps the
//! websocket open while running and reconnects after a fixed delay when it drops.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use pocket_bus::{InboundMessage, MessageBus, OutboundMessage};
use pocket_config::WhatsAppConfig;
use pocket_core::{PocketError, Result};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::{is_sender_allowed, Channel};

const CHANNEL_NAME: &str = "whatsapp";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub struct WhatsAppChannel {
    config: WhatsAppConfig,
    bus: Arc<MessageBus>,
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
    /// Frames queued for the live bridge connection; `None` while disconnected
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl std::fmt::Debug for WhatsAppChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhatsAppChannel")
            .field("bridge_url", &self.config.bridge_url)
            .field("running", &self.running)
            .finish()
    }
}

impl WhatsAppChannel {
    pub fn new(config: WhatsAppConfig, bus: Arc<MessageBus>) -> Self {
        Self {
            config,
            bus,
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            outgoing: Mutex::new(None),
        }
    }

    fn set_outgoing(&self, sender: Option<mpsc::UnboundedSender<String>>) {
        *self.outgoing.lock().unwrap_or_else(PoisonError::into_inner) = sender;
    }

    /// Run one bridge connection until it drops or `cancel` fires.
    async fn run_connection(&self, cancel: &CancellationToken) -> Result<()> {
        let (socket, _response) = tokio_tungstenite::connect_async(self.config.bridge_url.as_str())
            .await
            .map_err(|e| PocketError::channel(CHANNEL_NAME, format!("bridge connect failed: {}", e)))?;
        info!("Connected to WhatsApp bridge at {}", self.config.bridge_url);

        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        self.set_outgoing(Some(tx));

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Best effort, the bridge may already be gone
                    let _ = sink.send(Message::Close(None)).await;
                    break Ok(());
                }
                Some(frame) = rx.recv() => {
                    if let Err(e) = sink.send(Message::Text(frame.into())).await {
                        break Err(PocketError::channel(CHANNEL_NAME, format!("bridge write failed: {}", e)));
                    }
                }
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.handle_bridge_message(&text),
                    Some(Ok(Message::Close(_))) | None => {
                        break Err(PocketError::channel(CHANNEL_NAME, "bridge closed the connection"));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        break Err(PocketError::channel(CHANNEL_NAME, format!("bridge read failed: {}", e)));
                    }
                },
            }
        };

        self.set_outgoing(None);
        result
    }

    fn handle_bridge_message(&self, raw: &str) {
        if let Some(inbound) = self.parse_bridge_event(raw) {
            if let Err(e) = self.bus.publish_inbound(inbound) {
                error!("Failed to publish WhatsApp message: {}", e);
            }
        }
    }

    /// Decode one bridge event. Only `message` events produce an inbound message;
    /// the others are logged.
    fn parse_bridge_event(&self, raw: &str) -> Option<InboundMessage> {
        let event: Value = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!("Invalid JSON from WhatsApp bridge: {}", e);
                return None;
            }
        };

        match event["type"].as_str().unwrap_or_default() {
            "message" => {
                // Sender is a JID such as "15551234567@s.whatsapp.net"
                let sender = event["sender"].as_str().unwrap_or_default();
                let content = event["content"].as_str().unwrap_or_default();
                if sender.is_empty() || content.is_empty() {
                    return None;
                }

                let sender_id = sender.split('@').next().unwrap_or(sender);
                if !is_sender_allowed(&self.config.allow_from, sender_id) {
                    debug!("Dropping WhatsApp message from {} (not in allow_from)", sender_id);
                    return None;
                }

                let mut inbound = InboundMessage::new(CHANNEL_NAME, sender_id, sender, content)
                    .with_metadata("is_group", json!(event["isGroup"].as_bool().unwrap_or(false)));
                if let Some(id) = event.get("id").filter(|id| !id.is_null()) {
                    inbound = inbound.with_metadata("message_id", id.clone());
                }
                if let Some(ts) = event.get("timestamp").filter(|ts| !ts.is_null()) {
                    inbound = inbound.with_metadata("timestamp", ts.clone());
                }
                Some(inbound)
            }
            "status" => {
                info!("WhatsApp status: {}", event["status"].as_str().unwrap_or("unknown"));
                None
            }
            "qr" => {
                info!("Scan the QR code shown by the WhatsApp bridge to link this device");
                None
            }
            "error" => {
                error!("WhatsApp bridge error: {}", event["error"]);
                None
            }
            other => {
                debug!("Ignoring WhatsApp bridge event '{}'", other);
                None
            }
        }
    }
}

#[async_trait]
impl Channel for WhatsAppChannel {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PocketError::channel(CHANNEL_NAME, "already running"));
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = cancel.clone();

        while !cancel.is_cancelled() {
            if let Err(e) = self.run_connection(&cancel).await {
                warn!("{}; reconnecting in {}s", e, RECONNECT_DELAY.as_secs());
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("WhatsApp channel stopped");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
        self.set_outgoing(None);
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<()> {
        let frame = json!({
            "type": "send",
            "to": msg.chat_id,
            "text": msg.content,
        })
        .to_string();

        let outgoing = self.outgoing.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = outgoing
            .as_ref()
            .ok_or_else(|| PocketError::channel(CHANNEL_NAME, "bridge not connected"))?;
        sender
            .send(frame)
            .map_err(|_| PocketError::channel(CHANNEL_NAME, "bridge connection closed"))
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
