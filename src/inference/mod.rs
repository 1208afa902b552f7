//! Inference
//!
//! The external model collaborator: an OpenAI-compatible chat
//! completions client. Its output is untrusted relative to pipeline
//! policy and always flows through the scanners.

pub mod client;
