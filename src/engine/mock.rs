//! Deterministic engine for tests and the `mock` build.
//!
//! Tokens are characters. Generation appends a fixed reply to the prompt and
//! then emits [`MOCK_EOS`], so output is predictable without a model.

use std::time::Duration;

use log::info;

use crate::artifact::ModelArtifact;
use crate::config::DecodingConfig;
use crate::error::{GenerationError, StartupError};

use super::{decode_loop, Deadline, InferenceEngine};

pub const DEFAULT_MOCK_REPLY: &str = ", I'm a mock model running in test mode.";

/// End-of-sequence token emitted once the reply is exhausted.
pub const MOCK_EOS: char = '\u{0}';

#[derive(Debug, Clone)]
pub struct MockEngine {
    reply: String,
    token_delay: Option<Duration>,
    end_tokens: Vec<char>,
    fail_on: Option<String>,
    panic_on: Option<String>,
}

impl MockEngine {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            token_delay: None,
            end_tokens: vec![MOCK_EOS],
            fail_on: None,
            panic_on: None,
        }
    }

    /// Mirrors `LlamaEngine::load` for the `mock` build: the artifact must be ready.
    pub fn load(artifact: &ModelArtifact) -> Result<Self, StartupError> {
        if !artifact.ready {
            return Err(StartupError::Load {
                path: artifact.graph_path.clone(),
                reason: "artifact is not ready".to_string(),
            });
        }
        info!("Mock engine standing in for {}", artifact.graph_path.display());
        Ok(Self::new(DEFAULT_MOCK_REPLY))
    }

    /// Sleep this long per generated token.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    /// Treat `token` as an additional end-of-generation token.
    pub fn with_end_token(mut self, token: char) -> Self {
        self.end_tokens.push(token);
        self
    }

    /// Fail generation for prompts containing `needle`.
    pub fn fail_on(mut self, needle: impl Into<String>) -> Self {
        self.fail_on = Some(needle.into());
        self
    }

    /// Panic during generation for prompts containing `needle`.
    pub fn panic_on(mut self, needle: impl Into<String>) -> Self {
        self.panic_on = Some(needle.into());
        self
    }
}

impl InferenceEngine for MockEngine {
    type Token = char;

    fn tokenize(&self, text: &str) -> Result<Vec<char>, GenerationError> {
        Ok(text.chars().collect())
    }

    fn generate(
        &self,
        input: &[char],
        config: &DecodingConfig,
        deadline: Option<Deadline>,
    ) -> Result<Vec<char>, GenerationError> {
        let prompt: String = input.iter().collect();
        if let Some(needle) = &self.panic_on {
            if prompt.contains(needle.as_str()) {
                panic!("mock engine asked to panic on {needle:?}");
            }
        }
        if let Some(needle) = &self.fail_on {
            if prompt.contains(needle.as_str()) {
                return Err(GenerationError::Engine(format!(
                    "mock engine asked to fail on {needle:?}"
                )));
            }
        }

        let mut reply = self.reply.chars();
        decode_loop(
            input,
            config.max_length as usize,
            deadline,
            |_| {
                let Some(c) = reply.next() else {
                    return Ok(MOCK_EOS);
                };
                if let Some(delay) = self.token_delay {
                    std::thread::sleep(delay);
                }
                Ok(c)
            },
            |c| self.end_tokens.contains(&c),
        )
    }

    fn detokenize(&self, tokens: &[char]) -> Result<String, GenerationError> {
        Ok(tokens.iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_stops_at_extra_end_token() {
        let engine = MockEngine::new("ab|cd").with_end_token('|');
        let out = engine
            .generate(&['>'], &DecodingConfig::default(), None)
            .unwrap();
        assert_eq!(out, vec!['>', 'a', 'b']);
    }

    #[test]
    fn test_reply_ends_at_eos() {
        let engine = MockEngine::new("ok");
        let out = engine
            .generate(&['>'], &DecodingConfig::default(), None)
            .unwrap();
        assert_eq!(out, vec!['>', 'o', 'k']);
    }
}
