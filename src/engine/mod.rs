//! Generation invoker and the inference engines behind it.

#[cfg(feature = "llama")]
pub mod llama;
pub mod mock;
#[cfg(feature = "llama")]
pub mod sampler;

use std::time::{Duration, Instant};

use log::debug;

use crate::config::DecodingConfig;
use crate::error::GenerationError;

#[cfg(feature = "llama")]
pub use llama::LlamaEngine;
pub use mock::MockEngine;

/// An opaque text model: tokenizer plus autoregressive generator.
pub trait InferenceEngine {
    type Token: Copy;

    fn tokenize(&self, text: &str) -> Result<Vec<Self::Token>, GenerationError>;

    /// Continue `input` until end-of-sequence or `config.max_length` total
    /// tokens. Returns the whole sequence, `input` included.
    fn generate(
        &self,
        input: &[Self::Token],
        config: &DecodingConfig,
        deadline: Option<Deadline>,
    ) -> Result<Vec<Self::Token>, GenerationError>;

    /// Decode tokens to text, skipping special tokens.
    fn detokenize(&self, tokens: &[Self::Token]) -> Result<String, GenerationError>;
}

/// Point in time after which a generation call gives up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    timeout: Duration,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            timeout,
        }
    }

    pub fn check(&self) -> Result<(), GenerationError> {
        if Instant::now() >= self.at {
            Err(GenerationError::Timeout(self.timeout))
        } else {
            Ok(())
        }
    }
}

/// Autoregressive loop shared by the engines.
///
/// `step` receives the token accepted on the previous iteration (with its
/// position) and returns the next one. Stops before `max_length` total
/// tokens or at the first token `is_end` accepts, which is not kept.
pub(crate) fn decode_loop<T, S, F>(
    input: &[T],
    max_length: usize,
    deadline: Option<Deadline>,
    mut step: S,
    is_end: F,
) -> Result<Vec<T>, GenerationError>
where
    T: Copy,
    S: FnMut(Option<(T, usize)>) -> Result<T, GenerationError>,
    F: Fn(T) -> bool,
{
    let mut tokens = input.to_vec();
    let mut accepted = None;
    while tokens.len() < max_length {
        if let Some(deadline) = deadline {
            deadline.check()?;
        }

        let next = step(accepted)?;
        if is_end(next) {
            debug!("End of generation after {} tokens", tokens.len() - input.len());
            break;
        }
        accepted = Some((next, tokens.len()));
        tokens.push(next);
    }
    Ok(tokens)
}

/// Runs one prompt through an engine with the fixed decoding configuration.
pub struct GenerationInvoker<'a, E: InferenceEngine> {
    engine: &'a E,
    config: &'a DecodingConfig,
    timeout: Option<Duration>,
}

impl<'a, E: InferenceEngine> GenerationInvoker<'a, E> {
    pub fn new(engine: &'a E, config: &'a DecodingConfig, timeout: Option<Duration>) -> Self {
        Self {
            engine,
            config,
            timeout,
        }
    }

    /// Tokenize, truncate, generate and decode. The text is the full
    /// sequence: the (possibly truncated) prompt followed by the continuation.
    pub fn invoke(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut tokens = self.engine.tokenize(prompt)?;
        if tokens.is_empty() {
            return Err(GenerationError::EmptyPrompt);
        }

        let ceiling = self.config.max_input_tokens as usize;
        if tokens.len() > ceiling {
            debug!("Truncating prompt from {} to {ceiling} tokens", tokens.len());
            tokens.truncate(ceiling);
        }

        let deadline = self.timeout.map(Deadline::after);
        let output = self.engine.generate(&tokens, self.config, deadline)?;
        debug!(
            "Generated {} tokens from a {}-token prompt",
            output.len().saturating_sub(tokens.len()),
            tokens.len()
        );

        self.engine.detokenize(&output)
    }
}
