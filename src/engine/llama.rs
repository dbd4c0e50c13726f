use std::num::NonZeroU32;

use llama_cpp_2::{
    context::params::LlamaContextParams,
    llama_backend::LlamaBackend,
    llama_batch::LlamaBatch,
    model::{params::LlamaModelParams, AddBos, LlamaModel, Special},
    token::LlamaToken,
};
use log::{debug, info, warn};

use crate::artifact::ModelArtifact;
use crate::config::DecodingConfig;
use crate::error::{GenerationError, StartupError};

use super::sampler::create_sampler;
use super::{decode_loop, Deadline, InferenceEngine};

/// llama.cpp model loaded from the cached GGUF graph.
///
/// The GGUF file carries the vocabulary, so the model is also the tokenizer.
pub struct LlamaEngine {
    // Declared before `backend` so the model is freed first.
    model: LlamaModel,
    backend: LlamaBackend,
}

impl LlamaEngine {
    /// Load the model. Must be called at most once per process (llama.cpp
    /// backend initialisation is global).
    pub fn load(artifact: &ModelArtifact, gpu_layers: u32) -> Result<Self, StartupError> {
        let load_error = |reason: String| StartupError::Load {
            path: artifact.graph_path.clone(),
            reason,
        };

        if !artifact.ready {
            return Err(load_error("artifact is not ready".to_string()));
        }

        let backend =
            LlamaBackend::init().map_err(|e| load_error(format!("Failed to init backend: {e}")))?;
        let params = LlamaModelParams::default().with_n_gpu_layers(gpu_layers);

        info!("Loading model from: {}", artifact.graph_path.display());
        info!("GPU layers configured: {gpu_layers}");
        let model = LlamaModel::load_from_file(&backend, &artifact.graph_path, &params)
            .map_err(|e| load_error(format!("Failed to load model: {e}")))?;
        info!("Model loaded successfully");

        if let Some(eos) = artifact.tokenizer.as_ref().and_then(|t| t.eos_token_id) {
            let model_eos = model.token_eos().0;
            if eos != model_eos {
                warn!("Cached EOS token ({eos}) doesn't match model.token_eos() ({model_eos})");
            } else {
                debug!("EOS token validation passed: {eos}");
            }
        }

        Ok(Self { model, backend })
    }
}

impl InferenceEngine for LlamaEngine {
    type Token = LlamaToken;

    fn tokenize(&self, text: &str) -> Result<Vec<LlamaToken>, GenerationError> {
        self.model
            .str_to_token(text, AddBos::Always)
            .map_err(|e| GenerationError::Tokenize(e.to_string()))
    }

    fn generate(
        &self,
        input: &[LlamaToken],
        config: &DecodingConfig,
        deadline: Option<Deadline>,
    ) -> Result<Vec<LlamaToken>, GenerationError> {
        let max_length = config.max_length as usize;
        if input.is_empty() {
            return Err(GenerationError::EmptyPrompt);
        }
        if input.len() >= max_length {
            return Ok(input.to_vec());
        }

        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(config.max_length))
            .with_n_batch(config.max_length);
        let mut context = self
            .model
            .new_context(&self.backend, ctx_params)
            .map_err(|e| GenerationError::Engine(format!("Context creation failed: {e}")))?;

        let mut batch = LlamaBatch::new(input.len(), 1);
        let last = input.len() - 1;
        for (pos, &token) in input.iter().enumerate() {
            batch
                .add(token, pos as i32, &[0], pos == last)
                .map_err(|e| {
                    GenerationError::Engine(format!("Batch add failed at prompt token {pos}: {e}"))
                })?;
        }
        context
            .decode(&mut batch)
            .map_err(|e| GenerationError::Engine(format!("Prompt decode failed: {e}")))?;

        let mut sampler = create_sampler(config);
        let mut step_batch = LlamaBatch::new(1, 1);

        decode_loop(
            input,
            max_length,
            deadline,
            |accepted| {
                if let Some((token, pos)) = accepted {
                    let pos = pos as i32;
                    step_batch.clear();
                    step_batch.add(token, pos, &[0], true).map_err(|e| {
                        GenerationError::Engine(format!("Batch add failed at token {pos}: {e}"))
                    })?;
                    context.decode(&mut step_batch).map_err(|e| {
                        GenerationError::Engine(format!("Decode failed at token {pos}: {e}"))
                    })?;
                }
                Ok(sampler.sample(&context, -1))
            },
            // EOS plus EOT and other end-of-generation tokens.
            |token| self.model.is_eog_token(token),
        )
    }

    #[allow(deprecated)]
    fn detokenize(&self, tokens: &[LlamaToken]) -> Result<String, GenerationError> {
        // Pieces may split a multi-byte character, so decode the joined bytes.
        let mut bytes = Vec::new();
        for &token in tokens {
            let piece = self
                .model
                .token_to_bytes(token, Special::Plaintext)
                .map_err(|e| GenerationError::Detokenize(format!("token {token}: {e}")))?;
            bytes.extend_from_slice(&piece);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
