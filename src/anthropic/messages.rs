use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::CompletionError;
use crate::ai::chat::Message;
use crate::core::Credential;

pub const MAX_OUTPUT_TOKENS: u32 = 4000;
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Incremental text fragments of a single response, in order.
pub type FragmentStream = BoxStream<'static, Result<String, CompletionError>>;

#[derive(Clone, Serialize, Debug, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: String,
    pub messages: Vec<Message>,
}

/// Anything that can stream a chat completion. The HTTP client below
/// is the real one; tests substitute scripted endpoints.
#[async_trait]
pub trait CompletionEndpoint: Send + Sync {
    async fn stream(
        &self,
        api_key: &Credential,
        request: &CompletionRequest,
    ) -> Result<FragmentStream, CompletionError>;
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart,
    ContentBlockStart,
    ContentBlockDelta { delta: Delta },
    ContentBlockStop,
    MessageDelta,
    MessageStop,
    Ping,
    Error { error: ErrorBody },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta {
        text: String,
    },
    // Thinking, tool input, signatures. Never shown.
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct ErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

impl From<ErrorBody> for CompletionError {
    fn from(body: ErrorBody) -> Self {
        if body.error_type == "rate_limit_error" {
            CompletionError::RateLimited(body.message)
        } else {
            CompletionError::Endpoint {
                status: 200,
                message: format!("{}: {}", body.error_type, body.message),
            }
        }
    }
}

/// Pulls the human readable message out of an error response body,
/// falling back to the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> CompletionError {
    let message = error_message(body);
    match status.as_u16() {
        429 => CompletionError::RateLimited(message),
        status => CompletionError::Endpoint { status, message },
    }
}

/// Extracts the payload of the `data:` line(s) of one SSE event.
fn event_data(event: &str) -> Option<String> {
    let data: Vec<&str> = event
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .collect();
    if data.is_empty() {
        None
    } else {
        Some(data.join("\n"))
    }
}

/// Client for the Anthropic Messages API in streaming mode.
#[derive(Clone, Debug)]
pub struct AnthropicClient {
    client: reqwest::Client,
    api_hostname: String,
}

impl AnthropicClient {
    pub fn new(api_hostname: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_hostname: api_hostname.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self) -> String {
        format!("{}/v1/messages", self.api_hostname)
    }
}

#[async_trait]
impl CompletionEndpoint for AnthropicClient {
    async fn stream(
        &self,
        api_key: &Credential,
        request: &CompletionRequest,
    ) -> Result<FragmentStream, CompletionError> {
        let mut payload = json!(request);
        payload["stream"] = json!(true);

        tracing::debug!(
            "Requesting completion from {} with model {} and {} messages",
            self.url(),
            request.model,
            request.messages.len()
        );

        let response = self
            .client
            .post(self.url())
            .header("x-api-key", api_key.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .timeout(Duration::from_secs(60 * 5))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Completion request failed with {}: {}", status, body);
            return Err(classify_status(status, &body));
        }

        let mut bytes = response.bytes_stream();

        let fragments: FragmentStream = Box::pin(async_stream::try_stream! {
            // Raw bytes are buffered so that events and multi-byte
            // characters split across network chunks are reassembled
            // before decoding.
            let mut buffer: Vec<u8> = Vec::new();
            // Bytes before this offset hold no event separator
            let mut scan_from = 0;

            'outer: while let Some(chunk) = bytes.next().await {
                let chunk = chunk?;
                buffer.extend(chunk.iter().filter(|b| **b != b'\r'));

                while let Some(pos) = buffer[scan_from..].windows(2).position(|w| w == b"\n\n") {
                    let event_end = scan_from + pos;
                    let event: Vec<u8> = buffer.drain(..event_end + 2).collect();
                    scan_from = 0;
                    let event = String::from_utf8(event)
                        .map_err(|e| CompletionError::Malformed(e.to_string()))?;

                    let Some(data) = event_data(&event) else {
                        continue;
                    };

                    let parsed = serde_json::from_str::<StreamEvent>(&data).inspect_err(|e| {
                        tracing::error!("Parsing stream event failed for {}\nError:{}", data, e)
                    })?;

                    match parsed {
                        StreamEvent::ContentBlockDelta { delta: Delta::TextDelta { text } } => {
                            if !text.is_empty() {
                                yield text;
                            }
                        }
                        StreamEvent::MessageStop => break 'outer,
                        StreamEvent::Error { error } => {
                            tracing::warn!("Completion stream error: {:?}", error);
                            Err::<(), CompletionError>(error.into())?;
                        }
                        other => tracing::trace!("Ignoring stream event {:?}", other),
                    }
                }
                // A separator can still start on the last byte
                scan_from = buffer.len().saturating_sub(1);
            }
        });

        Ok(fragments)
    }
}
