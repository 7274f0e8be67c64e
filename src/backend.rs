//! Generation backend abstraction and implementations.
//!
//! Defines the [`GenerationBackend`] trait and concrete implementations:
//! - **[`OpenAiBackend`]**: calls the OpenAI Responses API with `stream: true`
//!   and decodes its server-sent events.
//! - **[`DisabledBackend`]**: returns errors; used when no provider is configured.
//! - **[`ScriptedBackend`]**: replays queued canned responses; used by tests.
//!
//! A backend call yields a [`ResponseStream`]: a finite, ordered sequence of
//! [`StreamEvent::Delta`]s terminated by one [`StreamEvent::Completed`]
//! carrying the vendor response id and optional cache usage. Streams cannot
//! be restarted. [`collect_stream`] drains one while honouring a
//! [`StopToken`] at every chunk boundary.
//!
//! # Retry Strategy
//!
//! None. Transport failures are surfaced verbatim as
//! [`GenerationError::Transport`]; the caller decides whether to retry.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::cancel::StopToken;
use crate::config::BackendConfig;
use crate::error::GenerationError;
use crate::models::CacheMetrics;

/// One streaming generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub instructions: Option<String>,
    /// Prior vendor response to continue from (context and cache reuse).
    pub previous_response_id: Option<String>,
}

/// An item produced by a [`ResponseStream`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental text.
    Delta(String),
    /// Terminal event.
    Completed {
        response_id: Option<String>,
        usage: Option<CacheMetrics>,
    },
}

pub type ResponseStream = BoxStream<'static, Result<StreamEvent, GenerationError>>;

/// A streaming text generation service.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Provider name for logs (e.g. `"openai"`).
    fn name(&self) -> &str;

    /// Model used when a request does not name one.
    fn default_model(&self) -> &str;

    /// Start one streaming request.
    async fn stream(&self, request: GenerationRequest) -> Result<ResponseStream, GenerationError>;
}

/// Accumulated result of a fully drained [`ResponseStream`].
#[derive(Debug, Clone, Default)]
pub struct StreamOutcome {
    pub text: String,
    pub response_id: Option<String>,
    pub usage: Option<CacheMetrics>,
}

/// Drain a response stream in order.
///
/// Each delta is appended to the result and handed to `on_delta`. The stop
/// token is checked after every delta; once set, no further chunks are
/// consumed and [`GenerationError::Stopped`] is returned. A stream that ends
/// without a [`StreamEvent::Completed`] is a transport failure.
pub async fn collect_stream(
    mut stream: ResponseStream,
    stop: &StopToken,
    on_delta: &mut (dyn FnMut(&str) + Send),
) -> Result<StreamOutcome, GenerationError> {
    let mut outcome = StreamOutcome::default();

    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::Delta(text) => {
                outcome.text.push_str(&text);
                on_delta(&text);
                if stop.is_stopped() {
                    return Err(GenerationError::Stopped);
                }
            }
            StreamEvent::Completed { response_id, usage } => {
                outcome.response_id = response_id;
                outcome.usage = usage;
                return Ok(outcome);
            }
        }
    }

    Err(GenerationError::Transport(
        "stream ended before completion".to_string(),
    ))
}

/// Instantiate the backend named by `[generation] provider`.
pub fn create_backend(config: &BackendConfig) -> anyhow::Result<Box<dyn GenerationBackend>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiBackend::new(config)?)),
        "disabled" => Ok(Box::new(DisabledBackend)),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    }
}

// ============ Disabled Backend ============

/// A backend that always fails; used when `generation.provider = "disabled"`.
pub struct DisabledBackend;

#[async_trait]
impl GenerationBackend for DisabledBackend {
    fn name(&self) -> &str {
        "disabled"
    }

    fn default_model(&self) -> &str {
        "disabled"
    }

    async fn stream(&self, _request: GenerationRequest) -> Result<ResponseStream, GenerationError> {
        Err(GenerationError::Transport(
            "generation provider is disabled; set [generation] provider in config".to_string(),
        ))
    }
}

// ============ OpenAI Backend ============

/// Backend using the OpenAI Responses API.
///
/// Calls `POST {base_url}/responses` and reads the server-sent event stream.
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_output_tokens: Option<u32>,
}

impl OpenAiBackend {
    pub fn new(config: &BackendConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_output_tokens: config.max_output_tokens,
        })
    }

    fn request_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "input": request.prompt,
            "stream": true,
        });
        if let Some(ref instructions) = request.instructions {
            body["instructions"] = serde_json::json!(instructions);
        }
        if let Some(ref prev) = request.previous_response_id {
            body["previous_response_id"] = serde_json::json!(prev);
        }
        if let Some(max) = self.max_output_tokens {
            body["max_output_tokens"] = serde_json::json!(max);
        }
        body
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn stream(&self, request: GenerationRequest) -> Result<ResponseStream, GenerationError> {
        let body = self.request_body(&request);
        tracing::debug!(model = %request.model, continued = request.previous_response_id.is_some(), "starting response stream");

        let response = self
            .client
            .post(format!("{}/responses", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Transport(format!(
                "OpenAI API error {}: {}",
                status, body_text
            )));
        }

        let (tx, rx) = mpsc::channel::<Result<StreamEvent, GenerationError>>(64);
        let mut bytes = response.bytes_stream();

        tokio::spawn(async move {
            // Raw bytes: a multi-byte character may straddle two chunks.
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim();

                    let Some(event) = parse_sse_line(line) else {
                        continue;
                    };
                    let terminal = !matches!(event, Ok(StreamEvent::Delta(_)));
                    if tx.send(event).await.is_err() || terminal {
                        // Receiver dropped (stopped by caller) or stream finished.
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum SseEvent {
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta { delta: String },
    #[serde(rename = "response.completed")]
    Completed { response: SseResponse },
    #[serde(rename = "response.failed")]
    Failed { response: SseResponse },
    #[serde(rename = "response.incomplete")]
    Incomplete { response: SseResponse },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct SseResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    usage: Option<SseUsage>,
    #[serde(default)]
    error: Option<SseError>,
    #[serde(default)]
    incomplete_details: Option<SseIncompleteDetails>,
}

#[derive(Debug, Deserialize)]
struct SseUsage {
    #[serde(default)]
    total_tokens: u64,
    #[serde(default)]
    input_tokens_details: Option<SseInputDetails>,
}

#[derive(Debug, Deserialize)]
struct SseInputDetails {
    #[serde(default)]
    cached_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct SseIncompleteDetails {
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct SseError {
    #[serde(default)]
    message: String,
}

/// Decode one SSE line. Returns `None` for lines that carry no event we use.
fn parse_sse_line(line: &str) -> Option<Result<StreamEvent, GenerationError>> {
    let json_str = line.strip_prefix("data:")?.trim();
    if json_str.is_empty() || json_str == "[DONE]" {
        return None;
    }

    let event: SseEvent = match serde_json::from_str(json_str) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!(error = %e, "skipping undecodable SSE payload");
            return None;
        }
    };

    match event {
        SseEvent::OutputTextDelta { delta } => Some(Ok(StreamEvent::Delta(delta))),
        SseEvent::Completed { response } => {
            let usage = response.usage.map(|u| CacheMetrics {
                cached_tokens: u
                    .input_tokens_details
                    .map(|d| d.cached_tokens)
                    .unwrap_or(0),
                total_tokens: u.total_tokens,
            });
            Some(Ok(StreamEvent::Completed {
                response_id: response.id,
                usage,
            }))
        }
        SseEvent::Failed { response } => {
            let message = response
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "response failed".to_string());
            Some(Err(GenerationError::Transport(message)))
        }
        SseEvent::Incomplete { response } => {
            // Sent instead of `response.completed` when e.g. max_output_tokens is hit.
            let reason = response
                .incomplete_details
                .map(|d| d.reason)
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "unknown reason".to_string());
            Some(Err(GenerationError::Transport(format!(
                "output truncated: {}",
                reason
            ))))
        }
        SseEvent::Error { message } => Some(Err(GenerationError::Transport(message))),
        SseEvent::Other => None,
    }
}

// ============ Scripted Backend ============

/// One canned reply for [`ScriptedBackend`].
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    chunks: Vec<String>,
    failure: Option<String>,
    fail_on_start: bool,
    usage: Option<CacheMetrics>,
    stop_after: Option<(StopToken, usize)>,
}

impl ScriptedResponse {
    /// Stream `chunks` in order, then complete.
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            failure: None,
            fail_on_start: false,
            usage: None,
            stop_after: None,
        }
    }

    /// A single-chunk reply.
    pub fn text(text: impl Into<String>) -> Self {
        Self::chunks([text.into()])
    }

    /// Reject the request before any chunk is produced.
    pub fn transport_error(message: impl Into<String>) -> Self {
        let mut r = Self::chunks(Vec::<String>::new());
        r.failure = Some(message.into());
        r.fail_on_start = true;
        r
    }

    /// Stream the chunks, then fail instead of completing.
    pub fn fail_after(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn with_usage(mut self, usage: CacheMetrics) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Request a stop on `token` as chunk number `n` (1-based) is delivered.
    pub fn stop_after_chunk(mut self, token: &StopToken, n: usize) -> Self {
        self.stop_after = Some((token.clone(), n));
        self
    }
}

/// Test backend replaying queued [`ScriptedResponse`]s in order.
///
/// Every request is recorded for assertions. An empty queue is a
/// transport error so that unexpected calls fail loudly.
#[derive(Default)]
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
    next_id: Mutex<u64>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: ScriptedResponse) -> &Self {
        self.lock_responses().push_back(response);
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn calls(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    pub fn remaining(&self) -> usize {
        self.lock_responses().len()
    }

    fn lock_responses(&self) -> std::sync::MutexGuard<'_, VecDeque<ScriptedResponse>> {
        self.responses.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    async fn stream(&self, request: GenerationRequest) -> Result<ResponseStream, GenerationError> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(request);

        let response = self.lock_responses().pop_front().ok_or_else(|| {
            GenerationError::Transport("ScriptedBackend: no responses queued".to_string())
        })?;

        if response.fail_on_start {
            return Err(GenerationError::Transport(
                response.failure.unwrap_or_default(),
            ));
        }

        let response_id = {
            let mut next = self.next_id.lock().unwrap_or_else(|p| p.into_inner());
            *next += 1;
            format!("resp-{}", *next)
        };

        let stop_after = response.stop_after.clone();
        let mut events: Vec<Result<StreamEvent, GenerationError>> = response
            .chunks
            .into_iter()
            .map(|c| Ok(StreamEvent::Delta(c)))
            .collect();
        events.push(match response.failure {
            Some(message) => Err(GenerationError::Transport(message)),
            None => Ok(StreamEvent::Completed {
                response_id: Some(response_id),
                usage: response.usage,
            }),
        });

        let stream = stream::iter(events.into_iter().enumerate()).map(move |(i, event)| {
            if let Some((token, n)) = &stop_after {
                if i + 1 == *n {
                    token.stop();
                }
            }
            event
        });

        Ok(Box::pin(stream))
    }
}
