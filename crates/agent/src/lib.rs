//! Agent runtime for the FoodLink assistant.
//!
//! Two entry points live here:
//! - [`AgentRuntime`] routes a user message to at most a bounded number of
//!   tool calls (CRUD over the record store, navigation, synthesis) or to a
//!   direct answer, keeping history per conversation thread.
//! - [`DonationExtractor`] turns a donor's free-text message into a validated
//!   [`DonationRecord`](foodlink_core::DonationRecord).
//!
//! # Architecture
//!
//! 1. **Gateway** (`llm`, `openai`) - one completion per call, behind [`LlmClient`]
//! 2. **Tools** (`tools`) - arguments validated into a [`ToolCall`] before anything runs
//! 3. **Routing** (`runtime`) - history, tool loop and fallback replies
//! 4. **Extraction** (`extraction`, `cues`) - schema-checked model output, then
//!    deterministic cue reconciliation
//!
//! The model only proposes. Validation, persistence and the final shape of a
//! donation record are decided here.

pub mod conversation;
pub mod cues;
pub mod extraction;
pub mod llm;
pub mod openai;
pub mod runtime;
pub mod tools;

pub use conversation::ConversationStore;
pub use extraction::{DonationExtractor, ExtractionError};
pub use llm::{
    Completion, CompletionRequest, LlmClient, LlmError, PromptMessage, ScriptedLlmClient,
    TimeoutLlmClient,
};
pub use openai::OpenAiCompatibleClient;
pub use runtime::{AgentRuntime, Degradation, DispatchOutcome, RoutingConfig, RuntimeSettings};
pub use tools::{ToolCall, ToolRegistry, ToolValidationError};
