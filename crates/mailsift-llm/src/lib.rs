//! Adaptive multi-provider LLM request layer: pacing, fallback, extraction.

pub mod any;
pub mod chunk;
pub mod compatible;
pub mod error;
pub mod extractor;
pub mod http;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod pacing;
pub mod provider;

pub use error::LlmError;
pub use provider::ChatProvider;
