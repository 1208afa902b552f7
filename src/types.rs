//! Promptgate - Type Definitions
//!
//! Shared vocabulary for the defense pipeline: the request surface,
//! untrusted inputs, scan verdicts, tool gating, and the traits for the
//! external collaborators (model, document store, staff directory).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Request Surface ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
}

// ─── Untrusted Inputs ────────────────────────────────────────────

/// A retrieved reference document. The body may contain embedded
/// directives and non-printable smuggling characters; it is data,
/// never instructions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub body: String,
}

// ─── Prompt Frame ────────────────────────────────────────────────

/// The composed material sent to the model for one turn. The context
/// and query regions are wrapped in delimiters that untrusted text
/// cannot reproduce unescaped.
#[derive(Clone, Debug)]
pub struct PromptFrame {
    pub system_instructions: String,
    pub context_block: String,
    pub query_block: String,
}

impl PromptFrame {
    /// The user-role content for the inference call: both delimited
    /// regions, in order.
    pub fn user_content(&self) -> String {
        format!("{}\n\n{}", self.context_block, self.query_block)
    }
}

// ─── Scan Verdicts ───────────────────────────────────────────────

/// Uniform output shape for the input and response scanners.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanVerdict {
    pub passed: bool,
    /// Risk in [0, 1]. Interpretation is scanner-specific.
    pub risk_score: f64,
    /// The text to use downstream. Empty when the verdict rejects the
    /// input outright.
    pub sanitized_text: String,
}

// ─── Tool Invocation ─────────────────────────────────────────────

/// The internal tools a completion may request. Exactly one exists
/// today; the enum keeps the directive parser tagged rather than
/// string-typed.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    StaffLookup,
}

/// A tool-invocation directive parsed out of a completion. This is a
/// free-text marker the model was coached to emit, not a structured
/// function call; its existence does not imply legitimacy. The
/// argument hint comes from untrusted text and is never used as the
/// lookup argument.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocationRequest {
    pub tool: ToolKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_argument_hint: Option<String>,
}

/// Result of an internal lookup. The payload is sensitive (may contain
/// PII) once retrieved.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub found: bool,
    pub payload: String,
}

/// States of the tool gate for one request.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Idle,
    AwaitingDirective,
    NotRequested,
    Gated,
    Executed,
    Done,
}

// ─── Policy Configuration ────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    /// InputScanner rejects a query at or above this risk score.
    pub input_risk_threshold: f64,
    /// When false (the defended default) a tool directive is gated,
    /// never executed.
    pub tool_execution_enabled: bool,
    /// HTTP(S) origins the ResponseScanner accepts. Empty disables the
    /// allow-list check; scheme and host-class checks always apply.
    pub allowed_origins: Vec<String>,
    pub inference_api_url: String,
    pub inference_api_key: String,
    pub inference_model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Model calls exceeding this are fatal for the request.
    pub model_timeout_secs: u64,
    pub documents_dir: String,
    pub directory_db_path: String,
    pub log_level: LogLevel,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Returns the default policy: the defended configuration. Tool
/// execution is off, the threshold matches the reference deployment,
/// and the inference endpoint is a local Ollama.
pub fn default_policy() -> PolicyConfig {
    PolicyConfig {
        input_risk_threshold: 0.75,
        tool_execution_enabled: false,
        allowed_origins: Vec::new(),
        inference_api_url: "http://localhost:11434".to_string(),
        inference_api_key: String::new(),
        inference_model: "llama3:8b".to_string(),
        temperature: 0.0,
        max_tokens: 1024,
        model_timeout_secs: 60,
        documents_dir: "~/.promptgate/documents".to_string(),
        directory_db_path: "~/.promptgate/directory.db".to_string(),
        log_level: LogLevel::Info,
    }
}

// ─── Errors ──────────────────────────────────────────────────────

/// Request-level failures. A rejected input or a rewritten output is
/// not an error: those requests still succeed with substitute text.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed request: {0}")]
    MalformedRequest(&'static str),
    #[error("model call failed: {0}")]
    ModelCallFailed(String),
    #[error("store unavailable: {0}")]
    Store(String),
}

// ─── Collaborator Interfaces ─────────────────────────────────────

/// The external model call. Untrusted relative to pipeline policy: its
/// output can be steered by injected content and must always flow
/// through the scanners before reuse.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn chat(
        &self,
        system_instructions: &str,
        user_content: &str,
        temperature: f64,
    ) -> anyhow::Result<String>;
}

/// Read-only store of retrieved reference documents. May return
/// adversarial content.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list_documents(&self) -> anyhow::Result<Vec<Document>>;
}

/// Read-only staff directory lookup.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn find_by_name(&self, name: &str) -> anyhow::Result<ToolResult>;
}
