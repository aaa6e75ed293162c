//! The tool-use loop, shared by every provider.
//!
//! Vendor clients implement [`ChatBackend`] (one completed model turn per
//! call, with optional delta reporting); this module owns the conversation
//! bookkeeping. It is the single place that enforces assistant-block
//! ordering (signed thinking, then text, then tool_use) and the single
//! user message carrying all tool results of an iteration.

use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::types::{
    GenerationResponse, GenerationStream, ToolCallStatus, ToolExecution, ToolExecutor, ToolUse,
    Usage,
};

pub const MAX_TOOL_ITERATIONS: u32 = 10;

// =============================================================================
// Loop message model
// =============================================================================

#[derive(Debug, Clone)]
pub struct ThinkingBlock {
    pub thinking: String,
    pub signature: Option<String>,
}

/// Content fed back to the model for one tool call: a plain string or an
/// array of vendor content blocks (which may include images).
#[derive(Debug, Clone)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<Value>),
}

#[derive(Debug, Clone)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub content: ToolResultContent,
    pub is_error: bool,
}

/// Conversation suffix the loop appends beyond the caller's base messages.
#[derive(Debug, Clone)]
pub enum LoopMessage {
    Assistant {
        /// Only thinking blocks with a valid signature; ordering within the
        /// assistant message is thinking, text, tool_uses.
        thinking: Vec<ThinkingBlock>,
        text: Option<String>,
        tool_uses: Vec<ToolUse>,
    },
    /// All tool results of one iteration, in tool_use order, as a single
    /// user message.
    ToolResults(Vec<ToolResultBlock>),
}

/// One completed model turn, parsed out of the vendor response.
#[derive(Debug, Clone, Default)]
pub struct ParsedTurn {
    pub thinking: Vec<ThinkingBlock>,
    pub text: String,
    pub tool_uses: Vec<ToolUse>,
    pub stop_reason: Option<String>,
    pub usage: Option<Usage>,
    pub model: String,
    pub raw: Option<Value>,
}

/// Incremental fragment reported while a turn is being produced.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    Text(String),
    Thinking(String),
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn model(&self) -> &str;

    /// Run one model turn over the base request plus `appended`.
    async fn chat(&self, appended: &[LoopMessage]) -> anyhow::Result<ParsedTurn>;

    /// Streaming variant; implementations that support vendor-native
    /// streaming send [`StreamDelta`]s while producing the turn. The
    /// default falls back to a single non-streamed turn.
    async fn chat_streamed(
        &self,
        appended: &[LoopMessage],
        _deltas: tokio::sync::mpsc::UnboundedSender<StreamDelta>,
    ) -> anyhow::Result<ParsedTurn> {
        self.chat(appended).await
    }
}

// =============================================================================
// Tool result stream extraction
// =============================================================================

fn value_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn error_message(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Split a tool result into the stream fed back to the model and the
/// structured stream surfaced to the frontend.
pub fn extract_tool_result_streams(
    result: &Value,
    tool_name: &str,
) -> (ToolResultContent, Value, bool) {
    let has_error = result
        .get("error")
        .map(value_truthy)
        .unwrap_or(false);

    if let Some(object) = result.as_object() {
        if !has_error {
            // Tools may return vendor content blocks directly, which lets
            // vision models see images in tool results.
            if let Some(blocks) = object.get("content_blocks").and_then(Value::as_array) {
                let valid = blocks.iter().all(|b| {
                    matches!(
                        b.get("type").and_then(Value::as_str),
                        Some("text") | Some("image")
                    )
                });
                if valid {
                    debug!(tool_name, blocks = blocks.len(), "tool returned content blocks");
                    let frontend = object
                        .get("structured_content")
                        .cloned()
                        .unwrap_or_else(|| result.clone());
                    return (ToolResultContent::Blocks(blocks.clone()), frontend, false);
                }
            }

            let llm = match object.get("content") {
                Some(Value::String(s)) if !s.is_empty() => s.clone(),
                Some(other) if !other.is_null() => other.to_string(),
                _ => format!("[Tool {tool_name} executed - no summary available]"),
            };
            let frontend = object
                .get("structured_content")
                .cloned()
                .unwrap_or_else(|| result.clone());
            return (ToolResultContent::Text(llm), frontend, false);
        }
    }

    // Error or non-object result: send as-is to both streams.
    let llm = match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    (ToolResultContent::Text(llm), result.clone(), has_error)
}

// =============================================================================
// Non-streaming loop
// =============================================================================

fn assistant_message(turn: &ParsedTurn) -> LoopMessage {
    let signed: Vec<ThinkingBlock> = turn
        .thinking
        .iter()
        .filter(|t| t.signature.as_deref().is_some_and(|s| !s.is_empty()))
        .cloned()
        .collect();
    if signed.len() < turn.thinking.len() {
        warn!("skipping thinking block without signature");
    }
    LoopMessage::Assistant {
        thinking: signed,
        text: (!turn.text.is_empty()).then(|| turn.text.clone()),
        tool_uses: turn.tool_uses.clone(),
    }
}

/// Thinking attached to the i-th tool call. With interleaved thinking the
/// block pattern is [thinking_0] [tool_0] [thinking_1] [tool_1] ... and a
/// trailing block past the last tool becomes `thinking_after`.
fn thinking_attachment(
    turn: &ParsedTurn,
    tool_idx: usize,
) -> (Option<String>, Option<String>) {
    let before = turn.thinking.get(tool_idx).map(|t| t.thinking.clone());
    let after = if tool_idx == turn.tool_uses.len().saturating_sub(1)
        && turn.thinking.len() > turn.tool_uses.len()
    {
        turn.thinking.last().map(|t| t.thinking.clone())
    } else {
        None
    };
    (before, after)
}

async fn execute_one(
    executor: &dyn ToolExecutor,
    tool_use: &ToolUse,
    iteration: u32,
    thinking_before: Option<String>,
    thinking_after: Option<String>,
) -> (ToolExecution, ToolResultBlock) {
    info!(tool = %tool_use.name, iteration, "executing tool call");

    match executor.execute(&tool_use.name, tool_use.input.clone()).await {
        Ok(result) => {
            let (llm_content, frontend, has_error) =
                extract_tool_result_streams(&result, &tool_use.name);
            let error = has_error.then(|| {
                result
                    .get("error")
                    .map(error_message)
                    .unwrap_or_else(|| "tool error".to_string())
            });
            if let Some(ref e) = error {
                warn!(tool = %tool_use.name, error = %e, "tool returned error");
            }
            let execution = ToolExecution {
                id: tool_use.id.clone(),
                tool_name: tool_use.name.clone(),
                arguments: tool_use.input.clone(),
                status: if has_error {
                    ToolCallStatus::Failed
                } else {
                    ToolCallStatus::Completed
                },
                result: (!has_error).then(|| frontend.clone()),
                structured_content: (!has_error).then(|| frontend.clone()),
                error,
                iteration,
                thinking_before,
                thinking_after,
            };
            let block = ToolResultBlock {
                tool_use_id: tool_use.id.clone(),
                content: llm_content,
                is_error: has_error,
            };
            (execution, block)
        }
        Err(e) => {
            warn!(tool = %tool_use.name, error = %e, "tool execution failed");
            let execution = ToolExecution {
                id: tool_use.id.clone(),
                tool_name: tool_use.name.clone(),
                arguments: tool_use.input.clone(),
                status: ToolCallStatus::Failed,
                result: None,
                structured_content: None,
                error: Some(e.to_string()),
                iteration,
                thinking_before,
                thinking_after,
            };
            let block = ToolResultBlock {
                tool_use_id: tool_use.id.clone(),
                content: ToolResultContent::Text(
                    serde_json::json!({ "error": format!("Tool execution failed: {e}") })
                        .to_string(),
                ),
                is_error: true,
            };
            (execution, block)
        }
    }
}

fn final_response(
    turn: &ParsedTurn,
    executions: Vec<ToolExecution>,
    finish_reason: Option<String>,
) -> GenerationResponse {
    GenerationResponse {
        content: turn.text.clone(),
        model_used: turn.model.clone(),
        usage: turn.usage.clone(),
        tool_calls: None,
        tool_executions: executions,
        thinking_trace: turn.thinking.first().map(|t| t.thinking.clone()),
        finish_reason,
        raw_response: turn.raw.clone(),
    }
}

/// Drive the model to completion, executing tools between turns.
/// Iterations are strictly sequential; tool calls within one iteration run
/// in the order the assistant issued them.
pub async fn run_tool_loop(
    backend: &dyn ChatBackend,
    executor: Arc<dyn ToolExecutor>,
) -> anyhow::Result<GenerationResponse> {
    let mut appended: Vec<LoopMessage> = Vec::new();
    let mut executions: Vec<ToolExecution> = Vec::new();
    let mut last_turn = ParsedTurn {
        model: backend.model().to_string(),
        ..Default::default()
    };

    for iteration in 1..=MAX_TOOL_ITERATIONS {
        debug!(iteration, max = MAX_TOOL_ITERATIONS, "tool loop iteration");
        let turn = backend.chat(&appended).await?;

        if turn.tool_uses.is_empty() {
            info!(iteration, "tool loop complete");
            let finish = turn.stop_reason.clone();
            return Ok(final_response(&turn, executions, finish));
        }

        appended.push(assistant_message(&turn));

        let mut results = Vec::with_capacity(turn.tool_uses.len());
        for (tool_idx, tool_use) in turn.tool_uses.iter().enumerate() {
            let (before, after) = thinking_attachment(&turn, tool_idx);
            let (execution, block) =
                execute_one(executor.as_ref(), tool_use, iteration, before, after).await;
            executions.push(execution);
            results.push(block);
        }
        appended.push(LoopMessage::ToolResults(results));
        last_turn = turn;
    }

    warn!("tool loop reached maximum iterations ({MAX_TOOL_ITERATIONS})");
    Ok(final_response(
        &last_turn,
        executions,
        Some("max_iterations".to_string()),
    ))
}

// =============================================================================
// Streaming loop
// =============================================================================

/// Streaming variant: emits a cumulative [`GenerationResponse`] snapshot on
/// every text/thinking delta and on every tool-execution status change, so
/// consumers can render progress incrementally.
pub fn stream_tool_loop(
    backend: Arc<dyn ChatBackend>,
    executor: Arc<dyn ToolExecutor>,
) -> GenerationStream {
    let stream = stream! {
        let mut appended: Vec<LoopMessage> = Vec::new();
        let mut executions: Vec<ToolExecution> = Vec::new();
        let mut last_turn = ParsedTurn {
            model: backend.model().to_string(),
            ..Default::default()
        };

        for iteration in 1..=MAX_TOOL_ITERATIONS {
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            let turn_handle = {
                let backend = backend.clone();
                let appended = appended.clone();
                tokio::spawn(async move { backend.chat_streamed(&appended, tx).await })
            };

            let mut content = String::new();
            let mut thinking = String::new();
            while let Some(delta) = rx.recv().await {
                match delta {
                    StreamDelta::Text(fragment) => content.push_str(&fragment),
                    StreamDelta::Thinking(fragment) => thinking.push_str(&fragment),
                }
                yield GenerationResponse {
                    content: content.clone(),
                    model_used: backend.model().to_string(),
                    thinking_trace: (!thinking.is_empty()).then(|| thinking.clone()),
                    tool_executions: executions.clone(),
                    ..Default::default()
                };
            }

            let turn = match turn_handle.await {
                Ok(Ok(turn)) => turn,
                Ok(Err(e)) => {
                    warn!(error = %e, "streamed turn failed");
                    yield GenerationResponse {
                        content,
                        model_used: backend.model().to_string(),
                        tool_executions: executions,
                        finish_reason: Some("error".to_string()),
                        ..Default::default()
                    };
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "streamed turn panicked");
                    return;
                }
            };

            if turn.tool_uses.is_empty() {
                let finish = turn.stop_reason.clone().or_else(|| Some("stop".to_string()));
                yield final_response(&turn, executions, finish);
                return;
            }

            appended.push(assistant_message(&turn));

            let mut results = Vec::with_capacity(turn.tool_uses.len());
            for (tool_idx, tool_use) in turn.tool_uses.iter().enumerate() {
                let (before, after) = thinking_attachment(&turn, tool_idx);

                // Status update before execution.
                executions.push(ToolExecution {
                    id: tool_use.id.clone(),
                    tool_name: tool_use.name.clone(),
                    arguments: tool_use.input.clone(),
                    status: ToolCallStatus::Running,
                    result: None,
                    structured_content: None,
                    error: None,
                    iteration,
                    thinking_before: before.clone(),
                    thinking_after: after.clone(),
                });
                yield GenerationResponse {
                    content: turn.text.clone(),
                    model_used: turn.model.clone(),
                    tool_executions: executions.clone(),
                    ..Default::default()
                };

                let (execution, block) =
                    execute_one(executor.as_ref(), tool_use, iteration, before, after).await;
                *executions.last_mut().expect("just pushed") = execution;
                yield GenerationResponse {
                    content: turn.text.clone(),
                    model_used: turn.model.clone(),
                    tool_executions: executions.clone(),
                    ..Default::default()
                };
                results.push(block);
            }
            appended.push(LoopMessage::ToolResults(results));
            last_turn = turn;
        }

        warn!("tool loop reached maximum iterations ({MAX_TOOL_ITERATIONS})");
        yield final_response(&last_turn, executions, Some("max_iterations".to_string()));
    };
    Box::pin(stream)
}

/// Stream a single model turn (no tools): snapshots for each delta, then
/// the final response.
pub fn stream_single_turn(backend: Arc<dyn ChatBackend>) -> GenerationStream {
    let stream = stream! {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let turn_handle = {
            let backend = backend.clone();
            tokio::spawn(async move { backend.chat_streamed(&[], tx).await })
        };

        let mut content = String::new();
        let mut thinking = String::new();
        while let Some(delta) = rx.recv().await {
            match delta {
                StreamDelta::Text(fragment) => content.push_str(&fragment),
                StreamDelta::Thinking(fragment) => thinking.push_str(&fragment),
            }
            yield GenerationResponse {
                content: content.clone(),
                model_used: backend.model().to_string(),
                thinking_trace: (!thinking.is_empty()).then(|| thinking.clone()),
                ..Default::default()
            };
        }

        match turn_handle.await {
            Ok(Ok(turn)) => {
                let finish = turn.stop_reason.clone().or_else(|| Some("stop".to_string()));
                yield final_response(&turn, Vec::new(), finish);
            }
            Ok(Err(e)) => {
                warn!(error = %e, "streamed turn failed");
                yield GenerationResponse {
                    content,
                    model_used: backend.model().to_string(),
                    finish_reason: Some("error".to_string()),
                    ..Default::default()
                };
            }
            Err(e) => warn!(error = %e, "streamed turn panicked"),
        }
    };
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::Mutex;

    struct ScriptedBackend {
        turns: Mutex<Vec<ParsedTurn>>,
        seen: Mutex<Vec<Vec<LoopMessage>>>,
    }

    impl ScriptedBackend {
        fn new(turns: Vec<ParsedTurn>) -> Self {
            Self {
                turns: Mutex::new(turns),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        fn model(&self) -> &str {
            "scripted-model"
        }

        async fn chat(&self, appended: &[LoopMessage]) -> anyhow::Result<ParsedTurn> {
            self.seen.lock().unwrap().push(appended.to_vec());
            let mut turns = self.turns.lock().unwrap();
            if turns.is_empty() {
                // Endless tool caller for the max-iterations test.
                return Ok(ParsedTurn {
                    tool_uses: vec![ToolUse {
                        id: "tu_loop".into(),
                        name: "spin".into(),
                        input: serde_json::json!({}),
                    }],
                    model: "scripted-model".into(),
                    ..Default::default()
                });
            }
            Ok(turns.remove(0))
        }
    }

    struct WeatherExecutor;

    #[async_trait]
    impl ToolExecutor for WeatherExecutor {
        async fn execute(&self, name: &str, _arguments: Value) -> anyhow::Result<Value> {
            assert_eq!(name, "get_weather");
            Ok(serde_json::json!({
                "content": "22°C sunny",
                "structured_content": {"c": 22}
            }))
        }
    }

    struct SpinExecutor;

    #[async_trait]
    impl ToolExecutor for SpinExecutor {
        async fn execute(&self, _name: &str, _arguments: Value) -> anyhow::Result<Value> {
            Ok(serde_json::json!({"content": "ok"}))
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl ToolExecutor for FailingExecutor {
        async fn execute(&self, _name: &str, _arguments: Value) -> anyhow::Result<Value> {
            anyhow::bail!("boom")
        }
    }

    fn weather_turns() -> Vec<ParsedTurn> {
        vec![
            ParsedTurn {
                text: String::new(),
                tool_uses: vec![ToolUse {
                    id: "tu_1".into(),
                    name: "get_weather".into(),
                    input: serde_json::json!({"city": "Paris"}),
                }],
                model: "scripted-model".into(),
                stop_reason: Some("tool_use".into()),
                ..Default::default()
            },
            ParsedTurn {
                text: "It is 22°C and sunny in Paris.".into(),
                model: "scripted-model".into(),
                stop_reason: Some("end_turn".into()),
                ..Default::default()
            },
        ]
    }

    #[tokio::test]
    async fn test_weather_tool_loop() {
        let backend = ScriptedBackend::new(weather_turns());
        let response = run_tool_loop(&backend, Arc::new(WeatherExecutor))
            .await
            .unwrap();

        assert_eq!(response.content, "It is 22°C and sunny in Paris.");
        assert_eq!(response.tool_executions.len(), 1);
        let execution = &response.tool_executions[0];
        assert_eq!(execution.status, ToolCallStatus::Completed);
        assert_eq!(execution.iteration, 1);
        assert_eq!(
            execution.structured_content,
            Some(serde_json::json!({"c": 22}))
        );

        // Second model call saw the assistant tool_use plus one tool-result
        // user message, with the LLM stream as the plain string.
        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[1].len(), 2);
        match &seen[1][1] {
            LoopMessage::ToolResults(results) => {
                assert_eq!(results.len(), 1);
                assert!(!results[0].is_error);
                match &results[0].content {
                    ToolResultContent::Text(s) => assert_eq!(s, "22°C sunny"),
                    other => panic!("expected text, got {other:?}"),
                }
            }
            other => panic!("expected tool results, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_max_iterations() {
        let backend = ScriptedBackend::new(Vec::new());
        let response = run_tool_loop(&backend, Arc::new(SpinExecutor)).await.unwrap();
        assert_eq!(response.finish_reason.as_deref(), Some("max_iterations"));
        assert_eq!(response.tool_executions.len(), MAX_TOOL_ITERATIONS as usize);
    }

    #[tokio::test]
    async fn test_failed_executor_feeds_error_and_continues() {
        let backend = ScriptedBackend::new(weather_turns());
        let response = run_tool_loop(&backend, Arc::new(FailingExecutor))
            .await
            .unwrap();

        assert_eq!(response.tool_executions[0].status, ToolCallStatus::Failed);
        assert_eq!(response.tool_executions[0].error.as_deref(), Some("boom"));
        // The loop kept going and the second turn terminated normally.
        assert_eq!(response.content, "It is 22°C and sunny in Paris.");

        let seen = backend.seen.lock().unwrap();
        match &seen[1][1] {
            LoopMessage::ToolResults(results) => {
                assert!(results[0].is_error);
                match &results[0].content {
                    ToolResultContent::Text(s) => assert!(s.contains("boom")),
                    other => panic!("expected text, got {other:?}"),
                }
            }
            other => panic!("expected tool results, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_signatureless_thinking_dropped_from_assistant() {
        let mut turns = weather_turns();
        turns[0].thinking = vec![
            ThinkingBlock {
                thinking: "signed".into(),
                signature: Some("sig_abc".into()),
            },
            ThinkingBlock {
                thinking: "unsigned".into(),
                signature: None,
            },
        ];
        let backend = ScriptedBackend::new(turns);
        run_tool_loop(&backend, Arc::new(WeatherExecutor))
            .await
            .unwrap();

        let seen = backend.seen.lock().unwrap();
        match &seen[1][0] {
            LoopMessage::Assistant { thinking, .. } => {
                assert_eq!(thinking.len(), 1);
                assert_eq!(thinking[0].thinking, "signed");
            }
            other => panic!("expected assistant message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_interleaved_thinking_attachment() {
        let mut turns = weather_turns();
        turns[0].thinking = vec![
            ThinkingBlock {
                thinking: "plan the call".into(),
                signature: Some("s1".into()),
            },
            ThinkingBlock {
                thinking: "reflect on result".into(),
                signature: Some("s2".into()),
            },
        ];
        let backend = ScriptedBackend::new(turns);
        let response = run_tool_loop(&backend, Arc::new(WeatherExecutor))
            .await
            .unwrap();

        let execution = &response.tool_executions[0];
        assert_eq!(execution.thinking_before.as_deref(), Some("plan the call"));
        assert_eq!(
            execution.thinking_after.as_deref(),
            Some("reflect on result")
        );
    }

    #[tokio::test]
    async fn test_streaming_emits_status_snapshots() {
        let backend = Arc::new(ScriptedBackend::new(weather_turns()));
        let mut stream = stream_tool_loop(backend, Arc::new(WeatherExecutor));

        let mut snapshots = Vec::new();
        while let Some(snapshot) = stream.next().await {
            snapshots.push(snapshot);
        }

        // running snapshot, completed snapshot, final response.
        assert!(snapshots.len() >= 3);
        let statuses: Vec<ToolCallStatus> = snapshots
            .iter()
            .filter_map(|s| s.tool_executions.first().map(|e| e.status))
            .collect();
        assert!(statuses.contains(&ToolCallStatus::Running));
        assert!(statuses.contains(&ToolCallStatus::Completed));
        let last = snapshots.last().unwrap();
        assert_eq!(last.content, "It is 22°C and sunny in Paris.");
    }

    #[test]
    fn test_extract_streams_content_blocks() {
        let result = serde_json::json!({
            "content_blocks": [
                {"type": "text", "text": "caption"},
                {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "aaaa"}}
            ],
            "structured_content": {"n": 2}
        });
        let (llm, frontend, has_error) = extract_tool_result_streams(&result, "render");
        assert!(!has_error);
        assert_eq!(frontend, serde_json::json!({"n": 2}));
        match llm {
            ToolResultContent::Blocks(blocks) => assert_eq!(blocks.len(), 2),
            other => panic!("expected blocks, got {other:?}"),
        }
    }

    #[test]
    fn test_extract_streams_missing_content() {
        let result = serde_json::json!({"structured_content": {"rows": 3}});
        let (llm, _, _) = extract_tool_result_streams(&result, "query");
        match llm {
            ToolResultContent::Text(s) => {
                assert_eq!(s, "[Tool query executed - no summary available]")
            }
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn test_extract_streams_error() {
        let result = serde_json::json!({"error": "denied"});
        let (_, frontend, has_error) = extract_tool_result_streams(&result, "x");
        assert!(has_error);
        assert_eq!(frontend, result);
    }
}
