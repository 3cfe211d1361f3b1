//! DeepSeekBrain implementation using the DeepSeek API.

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::BytesMut;
use futures::{Stream, StreamExt};
use reqwest::Client;
use tracing::{debug, warn};

use crate::api_types::{ApiError, ChatCompletionChunk, ChatCompletionRequest, ChatMessage};
use crate::config::DeepSeekConfig;
use crate::error::BrainError;

/// A brain implementation backed by DeepSeek's chat-completion API.
///
/// Holds no per-user state; callers assemble the full message list
/// (system prompts, history, current question) per request.
pub struct DeepSeekBrain {
    client: Client,
    config: DeepSeekConfig,
}

impl DeepSeekBrain {
    /// Create a new DeepSeekBrain with the given configuration.
    pub fn new(config: DeepSeekConfig) -> Result<Self, BrainError> {
        let client = Client::builder().build().map_err(|e| {
            BrainError::Configuration(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self { client, config })
    }

    /// Create a DeepSeekBrain from environment variables.
    ///
    /// See [`DeepSeekConfig::from_env`] for required environment variables.
    pub fn from_env() -> Result<Self, BrainError> {
        let config = DeepSeekConfig::from_env()?;
        Self::new(config)
    }

    /// Get the configuration.
    pub fn config(&self) -> &DeepSeekConfig {
        &self.config
    }

    /// Open a streaming chat completion for the given message list.
    ///
    /// A non-success status surfaces as [`BrainError::Api`] before any
    /// fragment is produced, so callers can still answer with a plain
    /// error response.
    pub async fn chat_stream(&self, messages: Vec<ChatMessage>) -> Result<ChatStream, BrainError> {
        let url = format!("{}/chat/completions", self.config.api_url);

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            stream: true,
        };

        debug!(model = %request.model, messages = request.messages.len(), "Opening chat stream");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| BrainError::Network(format!("Failed to send request: {}", e)))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();

            // Try to parse the vendor's error envelope
            if let Ok(api_error) = serde_json::from_str::<ApiError>(&error_text) {
                return Err(BrainError::Api {
                    status: status.as_u16(),
                    message: api_error.error.message,
                });
            }

            return Err(BrainError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        Ok(ChatStream {
            inner: Box::pin(response.bytes_stream()),
            buffer: BytesMut::new(),
            pending: VecDeque::new(),
            done: false,
            completed: false,
        })
    }
}

/// Incremental text fragments decoded from an upstream SSE body.
///
/// Fragments come out in upstream order, one `data:` frame at a time;
/// nothing is buffered beyond line framing.
pub struct ChatStream {
    inner: Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>,
    buffer: BytesMut,
    pending: VecDeque<String>,
    done: bool,
    completed: bool,
}

impl ChatStream {
    /// Next text fragment, or `Ok(None)` once the upstream body ends.
    ///
    /// Check [`completed`](Self::completed) after the final `None`: a body
    /// that ended without the `[DONE]` sentinel was truncated.
    pub async fn next_delta(&mut self) -> Result<Option<String>, BrainError> {
        loop {
            if let Some(delta) = self.pending.pop_front() {
                return Ok(Some(delta));
            }
            if self.done {
                return Ok(None);
            }

            match self.inner.next().await {
                Some(Ok(bytes)) => {
                    self.buffer.extend_from_slice(&bytes);
                    self.drain_complete_lines();
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Err(BrainError::Stream(format!("Failed to read chunk: {}", e)));
                }
                None => {
                    self.done = true;
                    if !self.completed {
                        warn!("Upstream stream ended without [DONE] sentinel");
                    }
                }
            }
        }
    }

    /// Whether the upstream sent its terminal `[DONE]` sentinel.
    pub fn completed(&self) -> bool {
        self.completed
    }

    /// Decode every complete line sitting in the buffer. A partial line
    /// (no trailing newline yet) stays buffered as raw bytes for the
    /// next chunk: network chunk boundaries can land inside a UTF-8
    /// code point, so decoding happens per complete line only.
    fn drain_complete_lines(&mut self) {
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(newline + 1);
            let line = String::from_utf8_lossy(&line);
            let trimmed = line.trim();

            let Some(data) = trimmed.strip_prefix("data: ") else {
                continue;
            };

            if data == "[DONE]" {
                self.completed = true;
                continue;
            }

            match serde_json::from_str::<ChatCompletionChunk>(data) {
                Ok(chunk) => {
                    if let Some(content) = chunk
                        .choices
                        .first()
                        .and_then(|choice| choice.delta.content.as_deref())
                    {
                        if !content.is_empty() {
                            self.pending.push_back(content.to_string());
                        }
                    }
                }
                // Unparseable frames are skipped, matching the vendor's
                // own client guidance.
                Err(e) => debug!(error = %e, "Skipping undecodable stream frame"),
            }
        }
    }
}
