//! Voice note transcription through Groq's OpenAI-compatible Whisper endpoint

use pocket_config::GroqConfig;
use pocket_core::{PocketError, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const MODEL: &str = "whisper-large-v3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

pub struct GroqTranscriber {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl std::fmt::Debug for GroqTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroqTranscriber")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl GroqTranscriber {
    /// `None` when no API key is configured.
    pub fn from_config(config: &GroqConfig) -> Result<Option<Self>> {
        let api_key = config.api_key.trim();
        if api_key.is_empty() {
            return Ok(None);
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PocketError::ConfigError(format!("failed to build Groq client: {}", e)))?;

        Ok(Some(Self {
            client,
            api_key: api_key.to_string(),
            endpoint: format!("{}/audio/transcriptions", config.api_base.trim_end_matches('/')),
        }))
    }

    /// Transcribe one audio file. `file_name` tells the service the container format.
    pub async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String> {
        debug!("Transcribing {} ({} bytes)", file_name, audio.len());

        let part = reqwest::multipart::Part::bytes(audio).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new()
            .text("model", MODEL)
            .part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transcription_error(format!("request failed: {}", e.without_url())))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(transcription_error(format!("HTTP {}: {}", status, body.trim())));
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| transcription_error(format!("invalid response: {}", e.without_url())))?;
        Ok(body.text.trim().to_string())
    }
}

fn transcription_error(message: String) -> PocketError {
    PocketError::channel("telegram", format!("transcription {}", message))
}
