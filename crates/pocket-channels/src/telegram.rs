//! Telegram channel using Bot API long polling

use async_trait::async_trait;
use pocket_bus::{InboundMessage, MessageBus, OutboundMessage};
use pocket_config::TelegramConfig;
use pocket_core::{PocketError, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::{is_sender_allowed, Channel};
use crate::transcription::GroqTranscriber;

const CHANNEL_NAME: &str = "telegram";
const API_BASE: &str = "https://api.telegram.org";
/// Server-side long-poll duration for getUpdates
const POLL_TIMEOUT_SECS: u64 = 30;
const RETRY_DELAY: Duration = Duration::from_secs(5);
const PROXY_SCHEMES: &[&str] = &["http", "https", "socks5", "socks5h"];
/// Content of a voice note that could not be transcribed
const VOICE_PLACEHOLDER: &str = "[voice message]";
const VOICE_FILE_KEY: &str = "voice_file_id";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
    from: Option<TelegramUser>,
    chat: TelegramChat,
    text: Option<String>,
    caption: Option<String>,
    voice: Option<TelegramFileRef>,
    audio: Option<TelegramFileRef>,
}

#[derive(Debug, Deserialize)]
struct TelegramFileRef {
    file_id: String,
}

/// Result of `getFile`
#[derive(Debug, Deserialize)]
struct TelegramFile {
    file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
    #[serde(default)]
    is_bot: bool,
    first_name: String,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
    #[serde(rename = "type")]
    chat_type: String,
}

pub struct TelegramChannel {
    config: TelegramConfig,
    bus: Arc<MessageBus>,
    client: reqwest::Client,
    api_base: String,
    /// Next update id to request
    offset: AtomicI64,
    running: AtomicBool,
    /// Replaced on every start so a stopped channel can be started again
    cancel: Mutex<CancellationToken>,
    transcriber: Option<GroqTranscriber>,
}

impl std::fmt::Debug for TelegramChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramChannel")
            .field("allow_from", &self.config.allow_from)
            .field("proxy", &self.config.proxy)
            .field("running", &self.running)
            .field("transcriber", &self.transcriber)
            .finish()
    }
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig, bus: Arc<MessageBus>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10));
        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
            let scheme = reqwest::Url::parse(proxy)
                .map(|url| url.scheme().to_string())
                .map_err(|e| {
                    PocketError::channel(CHANNEL_NAME, format!("invalid proxy '{}': {}", proxy, e))
                })?;
            if !PROXY_SCHEMES.contains(&scheme.as_str()) {
                return Err(PocketError::channel(
                    CHANNEL_NAME,
                    format!(
                        "invalid proxy '{}': scheme must be one of {}",
                        proxy,
                        PROXY_SCHEMES.join(", ")
                    ),
                ));
            }
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| {
                PocketError::channel(CHANNEL_NAME, format!("invalid proxy '{}': {}", proxy, e))
            })?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(|e| {
            PocketError::channel(CHANNEL_NAME, format!("failed to build HTTP client: {}", e))
        })?;

        let api_base = format!("{}/bot{}", API_BASE, config.token);
        Ok(Self {
            config,
            bus,
            client,
            api_base,
            offset: AtomicI64::new(0),
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            transcriber: None,
        })
    }

    /// Transcribe voice notes before publishing them.
    pub fn with_transcriber(mut self, transcriber: GroqTranscriber) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    async fn get_updates(&self) -> Result<Vec<Update>> {
        let offset = self.offset.load(Ordering::SeqCst);
        let response = self
            .client
            .get(format!("{}/getUpdates", self.api_base))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", POLL_TIMEOUT_SECS.to_string()),
                ("allowed_updates", r#"["message"]"#.to_string()),
            ])
            .send()
            .await
            .map_err(|e| {
                PocketError::channel(CHANNEL_NAME, format!("getUpdates failed: {}", e.without_url()))
            })?;

        let body: ApiResponse<Vec<Update>> = response.json().await.map_err(|e| {
            PocketError::channel(CHANNEL_NAME, format!("invalid getUpdates response: {}", e.without_url()))
        })?;
        api_result(body, "getUpdates")
    }

    async fn handle_update(&self, update: Update) {
        let next = update.update_id + 1;
        self.offset.fetch_max(next, Ordering::SeqCst);

        let Some(message) = update.message else {
            return;
        };
        let Some(mut inbound) = to_inbound(message, &self.config.allow_from) else {
            return;
        };

        let voice_file = inbound
            .metadata
            .get(VOICE_FILE_KEY)
            .and_then(Value::as_str)
            .map(str::to_string);
        if let (Some(file_id), Some(transcriber)) = (voice_file, &self.transcriber) {
            inbound = self.transcribe_voice(inbound, &file_id, transcriber).await;
        }

        if let Err(e) = self.bus.publish_inbound(inbound) {
            error!("Failed to publish Telegram message: {}", e);
        }
    }

    /// Replace the placeholder content of a voice note with its transcription.
    /// On failure the placeholder is kept.
    async fn transcribe_voice(
        &self,
        mut inbound: InboundMessage,
        file_id: &str,
        transcriber: &GroqTranscriber,
    ) -> InboundMessage {
        let (file_path, audio) = match self.download_file(file_id).await {
            Ok(file) => file,
            Err(e) => {
                warn!("Failed to download voice note: {}", e);
                return inbound;
            }
        };

        let file_name = file_path.rsplit('/').next().unwrap_or("voice.ogg");
        match transcriber.transcribe(audio, file_name).await {
            Ok(text) if !text.is_empty() => {
                debug!("Transcribed voice note {}", file_id);
                inbound.content = format!("[transcription: {}]", text);
            }
            Ok(_) => debug!("Voice note {} transcribed to nothing", file_id),
            Err(e) => warn!("{}", e),
        }
        inbound.with_media(vec![file_path])
    }

    /// Resolve a file id and fetch its bytes. Returns the Telegram-side path too.
    async fn download_file(&self, file_id: &str) -> Result<(String, Vec<u8>)> {
        let response = self
            .client
            .get(format!("{}/getFile", self.api_base))
            .query(&[("file_id", file_id)])
            .send()
            .await
            .map_err(|e| {
                PocketError::channel(CHANNEL_NAME, format!("getFile failed: {}", e.without_url()))
            })?;
        let body: ApiResponse<TelegramFile> = response.json().await.map_err(|e| {
            PocketError::channel(CHANNEL_NAME, format!("invalid getFile response: {}", e.without_url()))
        })?;
        let file_path = api_result(body, "getFile")?
            .file_path
            .ok_or_else(|| PocketError::channel(CHANNEL_NAME, "getFile returned no file_path"))?;

        let audio = self
            .client
            .get(format!("{}/file/bot{}/{}", API_BASE, self.config.token, file_path))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| {
                PocketError::channel(CHANNEL_NAME, format!("file download failed: {}", e.without_url()))
            })?
            .bytes()
            .await
            .map_err(|e| {
                PocketError::channel(CHANNEL_NAME, format!("file download failed: {}", e.without_url()))
            })?;

        Ok((file_path, audio.to_vec()))
    }

    async fn poll_loop(&self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.get_updates() => polled,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        self.handle_update(update).await;
                    }
                }
                Err(e) => {
                    warn!("{}; retrying in {}s", e, RETRY_DELAY.as_secs());
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
            }
        }
    }
}

fn api_result<T>(body: ApiResponse<T>, method: &str) -> Result<T> {
    if !body.ok {
        return Err(PocketError::channel(
            CHANNEL_NAME,
            format!(
                "{} rejected: {}",
                method,
                body.description.unwrap_or_else(|| "no description".to_string())
            ),
        ));
    }
    body.result.ok_or_else(|| {
        PocketError::channel(CHANNEL_NAME, format!("{} response missing result", method))
    })
}

/// Turn a Telegram message into an inbound bus message, or `None` when it
/// carries neither text nor a voice note, comes from a bot, or its sender is
/// not allowed. A voice note gets placeholder content and its file id in
/// the metadata.
fn to_inbound(message: TelegramMessage, allow_from: &[String]) -> Option<InboundMessage> {
    let voice_file = message.voice.or(message.audio).map(|f| f.file_id);
    let text = message
        .text
        .filter(|t| !t.is_empty())
        .or_else(|| message.caption.filter(|c| !c.is_empty()));
    let (content, voice_file) = match (text, voice_file) {
        (Some(text), _) => (text, None),
        (None, Some(file_id)) => (VOICE_PLACEHOLDER.to_string(), Some(file_id)),
        (None, None) => return None,
    };

    // Channel posts have no sender
    let from = message.from?;
    if from.is_bot {
        return None;
    }

    let sender_id = match &from.username {
        Some(username) => format!("{}|{}", from.id, username),
        None => from.id.to_string(),
    };
    if !is_sender_allowed(allow_from, &sender_id) {
        debug!("Dropping Telegram message from {} (not in allow_from)", sender_id);
        return None;
    }

    let mut inbound = InboundMessage::new(CHANNEL_NAME, sender_id, message.chat.id.to_string(), content)
        .with_metadata("message_id", json!(message.message_id))
        .with_metadata("user_id", json!(from.id))
        .with_metadata("first_name", json!(from.first_name))
        .with_metadata("is_group", json!(message.chat.chat_type != "private"));
    if let Some(username) = from.username {
        inbound = inbound.with_metadata("username", json!(username));
    }
    if let Some(file_id) = voice_file {
        inbound = inbound.with_metadata(VOICE_FILE_KEY, json!(file_id));
    }
    Some(inbound)
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PocketError::channel(CHANNEL_NAME, "already running"));
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = cancel.clone();

        info!("Telegram bot polling for updates");
        self.poll_loop(cancel).await;

        self.running.store(false, Ordering::SeqCst);
        info!("Telegram channel stopped");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<()> {
        let mut payload = json!({
            "chat_id": msg.chat_id,
            "text": msg.content,
        });
        if let Some(reply_to) = msg.reply_to.as_deref().and_then(|id| id.parse::<i64>().ok()) {
            payload["reply_parameters"] = json!({
                "message_id": reply_to,
                "allow_sending_without_reply": true
            });
        }

        let response = self
            .client
            .post(format!("{}/sendMessage", self.api_base))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                PocketError::channel(CHANNEL_NAME, format!("sendMessage failed: {}", e.without_url()))
            })?;

        let body: ApiResponse<Value> = response.json().await.map_err(|e| {
            PocketError::channel(CHANNEL_NAME, format!("invalid sendMessage response: {}", e.without_url()))
        })?;
        api_result(body, "sendMessage")?;

        debug!("Sent Telegram message to chat {}", msg.chat_id);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
