use anyhow::{anyhow, Result};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::tool_loop::StreamDelta;

use super::wire::*;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

pub(crate) struct OpenAiClient {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            http: reqwest::Client::new(),
            base_url: OPENAI_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %request.model, "OpenAI chat request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("OpenAI API error ({}): {}", status, error_text));
        }

        Ok(response.json().await?)
    }

    /// Streamed chat. Text fragments are pushed onto `deltas`; the
    /// accumulated response (including assembled tool calls) is returned
    /// when the stream closes.
    pub async fn chat_streamed(
        &self,
        request: &ChatRequest,
        deltas: UnboundedSender<StreamDelta>,
    ) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut request = request.clone();
        request.stream = Some(true);

        debug!(model = %request.model, "OpenAI streaming chat request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("OpenAI API error ({}): {}", status, error_text));
        }

        let mut model = request.model.clone();
        let mut content = String::new();
        let mut finish_reason = None;
        let mut usage = None;
        let mut tool_calls: Vec<ToolCallWire> = Vec::new();

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
                let parsed: StreamChunk = match serde_json::from_str(payload) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!(error = %e, "unrecognized stream chunk");
                        continue;
                    }
                };
                if !parsed.model.is_empty() {
                    model = parsed.model.clone();
                }
                if parsed.usage.is_some() {
                    usage = parsed.usage.clone();
                }
                for choice in parsed.choices {
                    if let Some(text) = choice.delta.content {
                        content.push_str(&text);
                        let _ = deltas.send(StreamDelta::Text(text));
                    }
                    for tc in choice.delta.tool_calls.unwrap_or_default() {
                        while tool_calls.len() <= tc.index {
                            tool_calls.push(ToolCallWire {
                                id: String::new(),
                                kind: "function".to_string(),
                                function: FunctionCallWire {
                                    name: String::new(),
                                    arguments: String::new(),
                                },
                            });
                        }
                        let entry = &mut tool_calls[tc.index];
                        if let Some(id) = tc.id {
                            entry.id = id;
                        }
                        if let Some(function) = tc.function {
                            if let Some(name) = function.name {
                                entry.function.name.push_str(&name);
                            }
                            if let Some(arguments) = function.arguments {
                                entry.function.arguments.push_str(&arguments);
                            }
                        }
                    }
                    if choice.finish_reason.is_some() {
                        finish_reason = choice.finish_reason;
                    }
                }
            }
        }

        Ok(ChatResponse {
            model,
            choices: vec![Choice {
                message: ResponseMessage {
                    content: (!content.is_empty()).then_some(content),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                },
                finish_reason,
            }],
            usage,
        })
    }
}
