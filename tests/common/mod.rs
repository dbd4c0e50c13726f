#![allow(dead_code)]

use std::path::{Path, PathBuf};

use llama_cpp_worker::artifact::gguf_utils::test_support::write_gguf;
use llama_cpp_worker::artifact::{ArtifactSource, CacheResolver, LocalSource};
use llama_cpp_worker::config::WorkerConfig;
use llama_cpp_worker::engine::MockEngine;
use llama_cpp_worker::worker::WorkerState;

/// Write a tensor-less GGUF file carrying a few tokenizer keys.
pub fn write_tiny_gguf(path: &Path) {
    write_gguf(
        path,
        &[("general.architecture", "phi2")],
        &[("tokenizer.ggml.eos_token_id", 50256)],
    )
    .unwrap();
}

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub model: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("phi-2.Q4_K_M.gguf");
        write_tiny_gguf(&model);
        Self { dir, model }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("model_cache")
    }

    pub fn source(&self) -> LocalSource {
        LocalSource::new(&self.model)
    }

    pub fn resolver(&self) -> CacheResolver {
        CacheResolver::new(self.cache_dir(), self.source().id())
    }

    pub fn load(&self, engine: MockEngine) -> WorkerState<MockEngine> {
        WorkerState::load(&self.resolver(), &self.source(), |_| Ok(engine)).unwrap()
    }
}

/// Feed `input` to a loaded worker and return its stdout lines as JSON.
pub fn serve(state: &WorkerState<MockEngine>, config: &WorkerConfig, input: &str) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    state.serve(config, input.as_bytes(), &mut out).unwrap();
    String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}
