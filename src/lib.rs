//! Out-of-process LLM worker.
//!
//! Resolves a cached GGUF model graph (fetching and converting it on first
//! use), then answers `{"prompt": ...}` lines on stdin with `{"text": ...}` or
//! `{"error": ...}` lines on stdout.

pub mod artifact;
pub mod config;
pub mod engine;
pub mod error;
pub mod logger;
pub mod worker;

#[cfg(not(any(feature = "llama", feature = "mock")))]
compile_error!("enable the `llama` feature (default) or the `mock` feature");
