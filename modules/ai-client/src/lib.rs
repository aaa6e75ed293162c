//! Provider-agnostic language-model client.
//!
//! One `generate` contract over multiple vendors, with structured output,
//! multi-turn tool use, interleaved thinking and cumulative-snapshot
//! streaming. Capability flags on [`ModelInfo`] are the single source of
//! truth for what a model can do.

pub mod anthropic;
pub mod embedding;
pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod registry;
pub mod schema;
pub mod tool_loop;
pub mod types;
pub mod util;

pub use anthropic::AnthropicProvider;
pub use embedding::{
    EmbeddingProvider, EmbeddingProviderConfig, EmbeddingProviderRegistryService,
};
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use registry::{ModelRegistryService, ProviderConfig, ProviderKind, RuntimeApiKeys};
pub use schema::StructuredOutput;
pub use types::{
    Capability, ChatMessage, GenerationRequest, GenerationResponse, GenerationStream,
    LanguageModelProvider, MediaInput, ModelInfo, Role, ToolCallStatus, ToolDefinition,
    ToolExecution, ToolExecutor, ToolUse, Usage,
};
