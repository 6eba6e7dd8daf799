//! Channel manager: lifecycle of every enabled channel plus the outbound dispatcher

use pocket_bus::{MessageBus, OutboundMessage};
use pocket_config::Config;
use pocket_core::{PocketError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::Channel;

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Health projection for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub enabled: bool,
    pub running: bool,
}

/// What happened to one outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    SendFailed(String),
    UnknownChannel,
}

type ChannelTable = BTreeMap<String, Arc<dyn Channel>>;

pub struct ChannelManager {
    bus: Arc<MessageBus>,
    /// Built before `start_all`, read-only afterwards
    channels: ChannelTable,
    state: Mutex<ManagerState>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    stop_timeout: Duration,
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .field("state", &self.state())
            .field("stop_timeout", &self.stop_timeout)
            .finish()
    }
}

impl ChannelManager {
    /// A manager with no channels; add them with [`ChannelManager::with_channel`].
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            bus,
            channels: BTreeMap::new(),
            state: Mutex::new(ManagerState::Idle),
            dispatcher: Mutex::new(None),
            shutdown: CancellationToken::new(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Instantiate every channel enabled in `config.channels`.
    ///
    /// A channel whose integration was compiled out, or that cannot be
    /// constructed, is skipped with a warning.
    pub fn from_config(config: &Config, bus: Arc<MessageBus>) -> Self {
        #[allow(unused_mut)]
        let mut manager = Self::new(bus);
        let channels = &config.channels;

        if channels.telegram.enabled {
            #[cfg(feature = "telegram")]
            {
                if channels.telegram.token.trim().is_empty() {
                    warn!("Telegram channel enabled but no token configured, skipping");
                } else {
                    match build_telegram(config, Arc::clone(&manager.bus)) {
                        Ok(channel) => {
                            manager = manager.with_channel("telegram", Arc::new(channel));
                            info!("Telegram channel enabled");
                        }
                        Err(e) => warn!("Telegram channel not available: {}", e),
                    }
                }
            }
            #[cfg(not(feature = "telegram"))]
            warn!("Telegram channel not available: built without the 'telegram' feature");
        }

        if channels.whatsapp.enabled {
            #[cfg(feature = "whatsapp")]
            {
                let channel = crate::whatsapp::WhatsAppChannel::new(
                    channels.whatsapp.clone(),
                    Arc::clone(&manager.bus),
                );
                manager = manager.with_channel("whatsapp", Arc::new(channel));
                info!("WhatsApp channel enabled");
            }
            #[cfg(not(feature = "whatsapp"))]
            warn!("WhatsApp channel not available: built without the 'whatsapp' feature");
        }

        manager
    }

    /// Register a channel under `name`. Replaces an earlier channel of the same name.
    pub fn with_channel(mut self, name: impl Into<String>, channel: Arc<dyn Channel>) -> Self {
        let name = name.into();
        if self.channels.insert(name.clone(), channel).is_some() {
            warn!("Channel '{}' registered twice, keeping the latest", name);
        }
        self
    }

    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    pub fn state(&self) -> ManagerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ManagerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Start the dispatcher and every channel, then wait for the channels to finish.
    ///
    /// Channels normally run until [`ChannelManager::stop_all`] is called, so
    /// this future resolves only after shutdown.
    pub async fn start_all(&self) -> Result<()> {
        if self.channels.is_empty() {
            warn!("No channels enabled");
            return Ok(());
        }

        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != ManagerState::Idle {
                return Err(PocketError::LifecycleError(format!(
                    "cannot start channels from state {:?}",
                    *state
                )));
            }
            *state = ManagerState::Running;
        }

        let dispatcher = tokio::spawn(dispatch_outbound(
            Arc::clone(&self.bus),
            self.channels.clone(),
            self.shutdown.clone(),
        ));
        *self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(dispatcher);

        let tasks: Vec<_> = self
            .channels
            .iter()
            .map(|(name, channel)| {
                info!("Starting {} channel...", name);
                let channel = Arc::clone(channel);
                (name.clone(), tokio::spawn(async move { channel.start().await }))
            })
            .collect();

        for (name, task) in tasks {
            match task.await {
                Ok(Ok(())) => debug!("Channel '{}' finished", name),
                Ok(Err(e)) => error!("Channel '{}' failed: {}", name, e),
                Err(e) => error!("Channel '{}' task aborted: {}", name, e),
            }
        }

        Ok(())
    }

    /// Cancel the dispatcher, then stop every channel.
    ///
    /// A channel that fails to stop, or takes longer than the stop timeout,
    /// is logged; the remaining channels are still stopped.
    pub async fn stop_all(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(*state, ManagerState::Stopping | ManagerState::Stopped) {
                return;
            }
            *state = ManagerState::Stopping;
        }
        info!("Stopping all channels...");

        self.shutdown.cancel();
        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = dispatcher {
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!("Outbound dispatcher ended abnormally: {}", e),
            }
        }

        for (name, channel) in &self.channels {
            match tokio::time::timeout(self.stop_timeout, channel.stop()).await {
                Ok(Ok(())) => info!("Stopped {} channel", name),
                Ok(Err(e)) => error!("Error stopping {}: {}", name, e),
                Err(_) => {
                    let err = PocketError::LifecycleError(format!(
                        "channel '{}' did not stop within {:?}",
                        name, self.stop_timeout
                    ));
                    error!("{}", err);
                }
            }
        }

        self.set_state(ManagerState::Stopped);
    }

    /// Deliver one outbound message to the channel it names.
    pub async fn route_outbound(&self, msg: &OutboundMessage) -> DispatchOutcome {
        route(&self.channels, msg).await
    }

    pub fn get_channel(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(name).cloned()
    }

    pub fn get_status(&self) -> BTreeMap<String, ChannelStatus> {
        self.channels
            .iter()
            .map(|(name, channel)| {
                (
                    name.clone(),
                    ChannelStatus {
                        enabled: true,
                        running: channel.is_running(),
                    },
                )
            })
            .collect()
    }

    pub fn enabled_channels(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }
}

#[cfg(feature = "telegram")]
fn build_telegram(config: &Config, bus: Arc<MessageBus>) -> Result<crate::telegram::TelegramChannel> {
    let channel = crate::telegram::TelegramChannel::new(config.channels.telegram.clone(), bus)?;
    match crate::transcription::GroqTranscriber::from_config(&config.providers.groq)? {
        Some(transcriber) => {
            info!("Telegram voice notes will be transcribed");
            Ok(channel.with_transcriber(transcriber))
        }
        None => Ok(channel),
    }
}

/// Drain the outbound queue until `shutdown` fires.
async fn dispatch_outbound(bus: Arc<MessageBus>, channels: ChannelTable, shutdown: CancellationToken) {
    info!("Outbound dispatcher started");

    loop {
        let msg = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            msg = bus.consume_outbound() => msg,
        };

        match msg {
            Some(msg) => {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        warn!("Shutdown interrupted delivery to {}", msg.channel);
                        break;
                    }
                    _ = route(&channels, &msg) => {}
                }
            }
            None => break,
        }
    }

    info!("Outbound dispatcher stopped");
}

async fn route(channels: &ChannelTable, msg: &OutboundMessage) -> DispatchOutcome {
    let Some(channel) = channels.get(&msg.channel) else {
        warn!("{}", PocketError::UnknownChannel(msg.channel.clone()));
        return DispatchOutcome::UnknownChannel;
    };

    match channel.send(msg).await {
        Ok(()) => DispatchOutcome::Delivered,
        Err(e) => {
            error!("Error sending to {}: {}", msg.channel, e);
            DispatchOutcome::SendFailed(e.to_string())
        }
    }
}
