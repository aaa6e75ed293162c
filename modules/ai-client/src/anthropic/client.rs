use anyhow::{anyhow, Result};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::tool_loop::StreamDelta;

use super::wire::*;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub(crate) struct AnthropicClient {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            http: reqwest::Client::new(),
            base_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn headers(&self, beta: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        if let Some(beta) = beta {
            headers.insert("anthropic-beta", HeaderValue::from_str(beta)?);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    pub async fn chat(&self, request: &ChatRequest, beta: Option<&str>) -> Result<ChatResponse> {
        let url = format!("{}/messages", self.base_url);

        debug!(model = %request.model, "Anthropic chat request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers(beta)?)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("Anthropic API error ({}): {}", status, error_text));
        }

        Ok(response.json().await?)
    }

    /// Streamed chat. Text and thinking fragments are pushed onto `deltas`
    /// as they arrive; the fully accumulated response is returned once the
    /// stream closes.
    pub async fn chat_streamed(
        &self,
        request: &ChatRequest,
        beta: Option<&str>,
        deltas: UnboundedSender<StreamDelta>,
    ) -> Result<ChatResponse> {
        let url = format!("{}/messages", self.base_url);

        let mut request = request.clone();
        request.stream = Some(true);

        debug!(model = %request.model, "Anthropic streaming chat request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers(beta)?)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("Anthropic API error ({}): {}", status, error_text));
        }

        let mut accumulator = StreamAccumulator::new(request.model.clone());
        let mut body = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);

                let Some(payload) = line.strip_prefix("data: ") else {
                    continue;
                };
                if payload == "[DONE]" {
                    continue;
                }
                match serde_json::from_str::<StreamEvent>(payload) {
                    Ok(event) => accumulator.apply(event, &deltas)?,
                    Err(e) => warn!(error = %e, "unrecognized stream event"),
                }
            }
        }

        accumulator.finish()
    }
}

/// Rebuilds the full content-block list from the event stream.
struct StreamAccumulator {
    model: String,
    blocks: Vec<ContentBlock>,
    /// Partial tool_use input JSON, keyed by block index.
    partial_inputs: Vec<(usize, String)>,
    stop_reason: Option<String>,
    usage: Option<UsageWire>,
}

impl StreamAccumulator {
    fn new(model: String) -> Self {
        Self {
            model,
            blocks: Vec::new(),
            partial_inputs: Vec::new(),
            stop_reason: None,
            usage: None,
        }
    }

    fn apply(
        &mut self,
        event: StreamEvent,
        deltas: &UnboundedSender<StreamDelta>,
    ) -> Result<()> {
        match event {
            StreamEvent::MessageStart { message } => {
                if !message.model.is_empty() {
                    self.model = message.model;
                }
                if message.usage.is_some() {
                    self.usage = message.usage;
                }
            }
            StreamEvent::ContentBlockStart { content_block, .. } => {
                let block = match content_block {
                    ContentBlockStart::Text { text } => ContentBlock::Text { text },
                    ContentBlockStart::Thinking { thinking } => ContentBlock::Thinking {
                        thinking,
                        signature: None,
                    },
                    ContentBlockStart::RedactedThinking { data } => {
                        ContentBlock::RedactedThinking { data }
                    }
                    ContentBlockStart::ToolUse { id, name } => ContentBlock::ToolUse {
                        id,
                        name,
                        input: serde_json::Value::Object(Default::default()),
                    },
                };
                self.blocks.push(block);
            }
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => {
                    let _ = deltas.send(StreamDelta::Text(text.clone()));
                    if let Some(ContentBlock::Text { text: existing }) = self.blocks.get_mut(index)
                    {
                        existing.push_str(&text);
                    }
                }
                BlockDelta::ThinkingDelta { thinking } => {
                    let _ = deltas.send(StreamDelta::Thinking(thinking.clone()));
                    if let Some(ContentBlock::Thinking {
                        thinking: existing, ..
                    }) = self.blocks.get_mut(index)
                    {
                        existing.push_str(&thinking);
                    }
                }
                BlockDelta::SignatureDelta { signature } => {
                    if let Some(ContentBlock::Thinking {
                        signature: existing,
                        ..
                    }) = self.blocks.get_mut(index)
                    {
                        existing.get_or_insert_with(String::new).push_str(&signature);
                    }
                }
                BlockDelta::InputJsonDelta { partial_json } => {
                    match self.partial_inputs.iter_mut().find(|(i, _)| *i == index) {
                        Some((_, existing)) => existing.push_str(&partial_json),
                        None => self.partial_inputs.push((index, partial_json)),
                    }
                }
            },
            StreamEvent::ContentBlockStop { index } => {
                self.finalize_tool_input(index);
            }
            StreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                if usage.is_some() {
                    self.usage = usage;
                }
            }
            StreamEvent::MessageStop | StreamEvent::Ping => {}
            StreamEvent::Error { error } => {
                return Err(anyhow!("Anthropic stream error: {}", error.message));
            }
        }
        Ok(())
    }

    fn finalize_tool_input(&mut self, index: usize) {
        let Some(pos) = self.partial_inputs.iter().position(|(i, _)| *i == index) else {
            return;
        };
        let (_, json_str) = self.partial_inputs.remove(pos);
        if let Some(ContentBlock::ToolUse { input, .. }) = self.blocks.get_mut(index) {
            match serde_json::from_str(&json_str) {
                Ok(parsed) => *input = parsed,
                Err(e) => {
                    warn!(error = %e, "failed to parse tool input JSON");
                    *input = serde_json::Value::Object(Default::default());
                }
            }
        }
    }

    fn finish(mut self) -> Result<ChatResponse> {
        // Flush any tool inputs that never saw a content_block_stop.
        let pending: Vec<usize> = self.partial_inputs.iter().map(|(i, _)| *i).collect();
        for index in pending {
            self.finalize_tool_input(index);
        }
        Ok(ChatResponse {
            model: self.model,
            content: self.blocks,
            stop_reason: self.stop_reason,
            usage: self.usage,
        })
    }
}
