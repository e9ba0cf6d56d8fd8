//! PULSE client: training and AutoML progress streaming, model exploration
//! and the LLM assistant for a PUE prediction backend.

pub mod analytics;
pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod job;
pub mod llm;
pub mod session;
pub mod stream;
pub mod summary;
