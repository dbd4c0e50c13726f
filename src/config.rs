//! Worker configuration.
//!
//! Every field has a default matching the stock Phi-2 setup, so the worker
//! runs with no configuration at all. An optional JSON file named by
//! `LLAMA_WORKER_CONFIG` is read first, then individual environment variables
//! override it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const CONFIG_PATH_VAR: &str = "LLAMA_WORKER_CONFIG";
pub const CACHE_DIR_VAR: &str = "LLAMA_WORKER_CACHE_DIR";
pub const SEED_VAR: &str = "LLAMA_WORKER_SEED";
pub const TIMEOUT_VAR: &str = "LLAMA_WORKER_TIMEOUT_SECS";
pub const LOG_LEVEL_VAR: &str = "LLAMA_WORKER_LOG_LEVEL";
pub const MODEL_PATH_VAR: &str = "MODEL_PATH";

/// Directory name of the artifact cache, relative to the worker executable.
pub const CACHE_DIR_NAME: &str = "model_cache";

/// Where the model comes from on a cold start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSource {
    /// Hub repository id.
    pub repo: String,
    /// GGUF file inside the repository.
    pub file: String,
    pub revision: String,
    /// Local GGUF file used instead of the hub when set.
    pub local_path: Option<PathBuf>,
}

impl Default for ModelSource {
    fn default() -> Self {
        Self {
            repo: "TheBloke/phi-2-GGUF".to_string(),
            file: "phi-2.Q4_K_M.gguf".to_string(),
            revision: "main".to_string(),
            local_path: None,
        }
    }
}

impl ModelSource {
    /// Canonical identifier, e.g. `TheBloke/phi-2-GGUF/phi-2.Q4_K_M.gguf@main`.
    pub fn id(&self) -> String {
        match &self.local_path {
            Some(path) => format!("file:{}", path.display()),
            None => format!("{}/{}@{}", self.repo, self.file, self.revision),
        }
    }
}

/// Fixed decoding parameters applied to every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodingConfig {
    /// Prompt tokens beyond this are dropped (the first ones are kept).
    pub max_input_tokens: u32,
    /// Upper bound on the whole sequence, prompt included.
    pub max_length: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub num_return_sequences: u32,
    /// Fixed sampler seed for reproducible output. `None` picks a random seed.
    pub seed: Option<u32>,
}

impl Default for DecodingConfig {
    fn default() -> Self {
        Self {
            max_input_tokens: 512,
            max_length: 1024,
            temperature: 0.7,
            top_p: 0.9,
            num_return_sequences: 1,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Also append log lines to this file.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub source: ModelSource,
    /// Overrides the executable-relative `model_cache` directory.
    pub cache_dir: Option<PathBuf>,
    pub decoding: DecodingConfig,
    /// Layers offloaded to the GPU. 0 keeps inference on the CPU.
    pub gpu_layers: u32,
    /// Per-request generation timeout. `None` waits indefinitely.
    pub request_timeout_secs: Option<u64>,
    pub logging: LoggingConfig,
}

impl WorkerConfig {
    /// Load from `LLAMA_WORKER_CONFIG` (if set) plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`WorkerConfig::from_env`] with an injectable variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_PATH_VAR) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(dir) = lookup(CACHE_DIR_VAR) {
            config.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(path) = lookup(MODEL_PATH_VAR) {
            config.source.local_path = Some(PathBuf::from(path));
        }
        if let Some(value) = lookup(SEED_VAR) {
            let seed = value.trim().parse().map_err(|_| ConfigError::Env {
                var: SEED_VAR,
                value: value.clone(),
            })?;
            config.decoding.seed = Some(seed);
        }
        if let Some(value) = lookup(TIMEOUT_VAR) {
            let secs = value.trim().parse().map_err(|_| ConfigError::Env {
                var: TIMEOUT_VAR,
                value: value.clone(),
            })?;
            config.request_timeout_secs = Some(secs);
        }
        if let Some(level) = lookup(LOG_LEVEL_VAR) {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.decoding;
        if d.max_input_tokens == 0 || d.max_length == 0 {
            return Err(ConfigError::Invalid(
                "max_input_tokens and max_length must be positive".to_string(),
            ));
        }
        if d.max_input_tokens >= d.max_length {
            return Err(ConfigError::Invalid(format!(
                "max_input_tokens ({}) must be below max_length ({})",
                d.max_input_tokens, d.max_length
            )));
        }
        if !(d.top_p > 0.0 && d.top_p <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "top_p must be in (0, 1], got {}",
                d.top_p
            )));
        }
        if !d.temperature.is_finite() || d.temperature < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "temperature must be a non-negative number, got {}",
                d.temperature
            )));
        }
        if d.num_return_sequences != 1 {
            return Err(ConfigError::Invalid(format!(
                "only a single output sequence is supported, got num_return_sequences={}",
                d.num_return_sequences
            )));
        }
        if self.request_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Cache directory: the configured one, else `model_cache` beside the executable.
    pub fn resolve_cache_dir(&self) -> PathBuf {
        if let Some(dir) = &self.cache_dir {
            return dir.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(CACHE_DIR_NAME)))
            .unwrap_or_else(|| PathBuf::from(CACHE_DIR_NAME))
    }

    pub fn request_timeout(&self) -> Option<std::time::Duration> {
        self.request_timeout_secs.map(std::time::Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_decoding_settings() {
        let config = WorkerConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.decoding.max_input_tokens, 512);
        assert_eq!(config.decoding.max_length, 1024);
        assert_eq!(config.decoding.temperature, 0.7);
        assert_eq!(config.decoding.top_p, 0.9);
        assert_eq!(config.decoding.num_return_sequences, 1);
        assert!(config.decoding.seed.is_none());
        assert!(config.request_timeout_secs.is_none());
        assert_eq!(config.gpu_layers, 0);
    }

    #[test]
    fn test_env_overrides() {
        let config = WorkerConfig::from_lookup(lookup_from(&[
            (SEED_VAR, "42"),
            (TIMEOUT_VAR, "30"),
            (CACHE_DIR_VAR, "/tmp/cache"),
            (MODEL_PATH_VAR, "/models/phi-2.gguf"),
            (LOG_LEVEL_VAR, "debug"),
        ]))
        .unwrap();
        assert_eq!(config.decoding.seed, Some(42));
        assert_eq!(config.request_timeout_secs, Some(30));
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/cache")));
        assert_eq!(
            config.source.local_path,
            Some(PathBuf::from("/models/phi-2.gguf"))
        );
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_bad_seed_is_rejected() {
        let err = WorkerConfig::from_lookup(lookup_from(&[(SEED_VAR, "abc")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: SEED_VAR, .. }));
    }

    #[test]
    fn test_partial_config_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.json");
        std::fs::write(&path, r#"{"decoding": {"temperature": 0.0, "seed": 7}}"#).unwrap();

        let path_str = path.to_string_lossy().to_string();
        let config =
            WorkerConfig::from_lookup(lookup_from(&[(CONFIG_PATH_VAR, &path_str)])).unwrap();
        assert_eq!(config.decoding.temperature, 0.0);
        assert_eq!(config.decoding.seed, Some(7));
        assert_eq!(config.decoding.max_length, 1024);
        assert_eq!(config.source, ModelSource::default());
    }

    #[test]
    fn test_validate_rejects_multiple_sequences() {
        let mut config = WorkerConfig::default();
        config.decoding.num_return_sequences = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_input_ceiling_above_length() {
        let mut config = WorkerConfig::default();
        config.decoding.max_input_tokens = 2048;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_top_p() {
        let mut config = WorkerConfig::default();
        config.decoding.top_p = 0.0;
        assert!(config.validate().is_err());
        config.decoding.top_p = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_source_id() {
        let source = ModelSource::default();
        assert_eq!(source.id(), "TheBloke/phi-2-GGUF/phi-2.Q4_K_M.gguf@main");
    }

    #[test]
    fn test_explicit_cache_dir_wins() {
        let config = WorkerConfig {
            cache_dir: Some(PathBuf::from("custom")),
            ..Default::default()
        };
        assert_eq!(config.resolve_cache_dir(), PathBuf::from("custom"));
    }
}
