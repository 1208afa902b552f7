//! Read-Only Stores
//!
//! The pipeline's two external data collaborators: the shared-document
//! store (untrusted content) and the staff directory (sensitive
//! content). Both are initialized once at process start and never
//! mutated by the pipeline.

pub mod directory;
pub mod documents;
