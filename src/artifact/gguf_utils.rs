//! GGUF helpers used while converting a fetched model into the cache.
//!
//! The vocabulary lives inside the GGUF file; what we persist next to the
//! graph is the tokenizer metadata read from its header.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use gguf_llms::{GgufHeader, GgufReader, Value};
use serde::{Deserialize, Serialize};

use crate::error::ArtifactError;

const GGUF_MAGIC: &[u8; 4] = b"GGUF";
const SUPPORTED_VERSIONS: [u32; 2] = [2, 3];

/// Tokenizer metadata persisted as `tokenizer_config.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenizerConfig {
    /// Tokenizer family (`gpt2`, `llama`, ...).
    pub model: Option<String>,
    pub bos_token_id: Option<i32>,
    pub eos_token_id: Option<i32>,
    pub chat_template: Option<String>,
    pub architecture: Option<String>,
    pub general_name: Option<String>,
    pub context_length: Option<u32>,
}

fn get_string(metadata: &HashMap<String, Value>, key: &str) -> Option<String> {
    metadata.get(key).and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        _ => None,
    })
}

fn get_i32(metadata: &HashMap<String, Value>, key: &str) -> Option<i32> {
    metadata.get(key).and_then(|v| match v {
        Value::Uint32(n) => i32::try_from(*n).ok(),
        Value::Int32(n) => Some(*n),
        Value::Uint64(n) => i32::try_from(*n).ok(),
        Value::Int64(n) => i32::try_from(*n).ok(),
        _ => None,
    })
}

fn get_u32(metadata: &HashMap<String, Value>, key: &str) -> Option<u32> {
    metadata.get(key).and_then(|v| match v {
        Value::Uint32(n) => Some(*n),
        Value::Uint64(n) => u32::try_from(*n).ok(),
        Value::Int32(n) => u32::try_from(*n).ok(),
        _ => None,
    })
}

impl TokenizerConfig {
    pub fn from_metadata(metadata: &HashMap<String, Value>) -> Self {
        let architecture = get_string(metadata, "general.architecture");
        let context_length = architecture
            .as_deref()
            .and_then(|arch| get_u32(metadata, &format!("{arch}.context_length")))
            .or_else(|| get_u32(metadata, "llama.context_length"));

        Self {
            model: get_string(metadata, "tokenizer.ggml.model"),
            bos_token_id: get_i32(metadata, "tokenizer.ggml.bos_token_id"),
            eos_token_id: get_i32(metadata, "tokenizer.ggml.eos_token_id"),
            chat_template: get_string(metadata, "tokenizer.chat_template"),
            architecture,
            general_name: get_string(metadata, "general.name"),
            context_length,
        }
    }
}

fn invalid(path: &Path, reason: impl Into<String>) -> ArtifactError {
    ArtifactError::InvalidGraph {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Check the magic bytes and version of a GGUF file.
pub fn check_header(path: &Path) -> Result<u32, ArtifactError> {
    let mut file = File::open(path).map_err(ArtifactError::io(path))?;
    let mut prefix = [0u8; 8];
    file.read_exact(&mut prefix)
        .map_err(|_| invalid(path, "file is too short to be GGUF"))?;

    if &prefix[..4] != GGUF_MAGIC {
        return Err(invalid(path, "missing GGUF magic"));
    }
    let version = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(invalid(path, format!("unsupported GGUF version {version}")));
    }
    Ok(version)
}

/// Validate a GGUF file and read its key/value metadata.
pub fn read_graph_metadata(path: &Path) -> Result<HashMap<String, Value>, ArtifactError> {
    check_header(path)?;

    let file = File::open(path).map_err(ArtifactError::io(path))?;
    let mut reader = BufReader::new(file);

    let header = GgufHeader::parse(&mut reader)
        .map_err(|e| invalid(path, format!("failed to parse GGUF header: {e}")))?;
    GgufReader::read_metadata(&mut reader, header.n_kv)
        .map_err(|e| invalid(path, format!("failed to read GGUF metadata: {e}")))
}

/// Fixture writer shared by unit and integration tests.
#[doc(hidden)]
pub mod test_support {
    use std::io;
    use std::path::Path;

    /// Write a minimal GGUF v3 file with string and u32 metadata and no tensors.
    pub fn write_gguf(
        path: &Path,
        strings: &[(&str, &str)],
        numbers: &[(&str, u32)],
    ) -> io::Result<()> {
        fn put_str(buf: &mut Vec<u8>, s: &str) {
            buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
            buf.extend_from_slice(s.as_bytes());
        }

        let mut buf = Vec::new();
        buf.extend_from_slice(b"GGUF");
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&((strings.len() + numbers.len()) as u64).to_le_bytes());
        for (key, value) in strings {
            put_str(&mut buf, key);
            buf.extend_from_slice(&8u32.to_le_bytes());
            put_str(&mut buf, value);
        }
        for (key, value) in numbers {
            put_str(&mut buf, key);
            buf.extend_from_slice(&4u32.to_le_bytes());
            buf.extend_from_slice(&value.to_le_bytes());
        }
        std::fs::write(path, buf)
    }
}
