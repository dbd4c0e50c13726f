//! Artifact cache: a ready-to-load copy of the model graph and its tokenizer
//! metadata, kept in a directory next to the worker.
//!
//! Layout:
//! - `model.gguf`: converted inference graph
//! - `tokenizer_config.json`: tokenizer metadata read from the graph
//! - `manifest.json`: written last, marks the cache as complete
//!
//! A cache is trusted only when the manifest parses, names the configured
//! source, and the graph on disk has the recorded size. Anything else sends
//! the worker down the cold path (fetch, convert, publish).

pub mod gguf_utils;
pub mod source;

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::ArtifactError;
pub use gguf_utils::TokenizerConfig;
pub use source::{source_for, ArtifactSource, HubSource, LocalSource};

pub const GRAPH_FILE: &str = "model.gguf";
pub const TOKENIZER_FILE: &str = "tokenizer_config.json";
pub const MANIFEST_FILE: &str = "manifest.json";
const STAGING_PREFIX: &str = ".staging-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    /// As published by the source, outside our cache.
    NativeWeights,
    /// Validated graph materialized in the cache directory.
    ConvertedGraph,
}

/// The single model artifact a worker process runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelArtifact {
    pub location: PathBuf,
    pub graph_path: PathBuf,
    pub format: ArtifactFormat,
    pub ready: bool,
    pub tokenizer: Option<TokenizerConfig>,
}

impl ModelArtifact {
    fn native(path: PathBuf) -> Self {
        Self {
            location: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            graph_path: path,
            format: ArtifactFormat::NativeWeights,
            ready: false,
            tokenizer: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheManifest {
    pub source: String,
    pub graph_file: String,
    pub graph_bytes: u64,
    pub architecture: Option<String>,
    pub created_at: String,
}

/// Finds or builds the artifact cache for one model source.
#[derive(Debug, Clone)]
pub struct CacheResolver {
    cache_dir: PathBuf,
    source_id: String,
}

impl CacheResolver {
    pub fn new(cache_dir: impl Into<PathBuf>, source_id: impl Into<String>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            source_id: source_id.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Return the cached artifact, fetching and converting it on a miss.
    pub fn resolve<S: ArtifactSource + ?Sized>(
        &self,
        source: &S,
    ) -> Result<ModelArtifact, ArtifactError> {
        fs::create_dir_all(&self.cache_dir).map_err(ArtifactError::io(&self.cache_dir))?;

        if let Some(artifact) = self.lookup() {
            info!("Using cached model graph at {}", artifact.graph_path.display());
            return Ok(artifact);
        }

        info!(
            "No usable cache in {}, fetching {}",
            self.cache_dir.display(),
            source.id()
        );
        self.remove_stale_staging();
        let fetched = ModelArtifact::native(source.fetch()?);
        self.convert_and_publish(&fetched)
    }

    /// Fast path: the trusted cache contents, or `None` if the cache must be rebuilt.
    pub fn lookup(&self) -> Option<ModelArtifact> {
        let manifest_path = self.cache_dir.join(MANIFEST_FILE);
        let manifest: CacheManifest = match read_json(&manifest_path) {
            Ok(Some(manifest)) => manifest,
            Ok(None) => {
                debug!("No manifest at {}", manifest_path.display());
                return None;
            }
            Err(e) => {
                warn!("Ignoring unreadable cache manifest: {e}");
                return None;
            }
        };

        if manifest.source != self.source_id {
            info!(
                "Cache holds {} but {} is configured, rebuilding",
                manifest.source, self.source_id
            );
            return None;
        }

        let graph_path = self.cache_dir.join(&manifest.graph_file);
        match fs::metadata(&graph_path) {
            Ok(meta) if meta.len() == manifest.graph_bytes => {}
            Ok(meta) => {
                warn!(
                    "Cached graph {} is {} bytes, manifest says {}, rebuilding",
                    graph_path.display(),
                    meta.len(),
                    manifest.graph_bytes
                );
                return None;
            }
            Err(e) => {
                warn!("Cached graph {} unavailable: {e}", graph_path.display());
                return None;
            }
        }

        let tokenizer = match read_json::<TokenizerConfig>(&self.cache_dir.join(TOKENIZER_FILE)) {
            Ok(Some(tokenizer)) => tokenizer,
            Ok(None) => {
                warn!("Cache is missing {TOKENIZER_FILE}, rebuilding");
                return None;
            }
            Err(e) => {
                warn!("Ignoring unreadable tokenizer config: {e}");
                return None;
            }
        };

        Some(ModelArtifact {
            location: self.cache_dir.clone(),
            graph_path,
            format: ArtifactFormat::ConvertedGraph,
            ready: true,
            tokenizer: Some(tokenizer),
        })
    }

    /// Validate the fetched graph, stage the cache files, then publish them.
    fn convert_and_publish(&self, fetched: &ModelArtifact) -> Result<ModelArtifact, ArtifactError> {
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.cache_dir)
            .map_err(ArtifactError::io(&self.cache_dir))?;

        info!("Converting {} into the cache", fetched.graph_path.display());
        let metadata = gguf_utils::read_graph_metadata(&fetched.graph_path)?;
        let tokenizer = TokenizerConfig::from_metadata(&metadata);

        let staged_graph = staging.path().join(GRAPH_FILE);
        let graph_bytes = materialize_graph(&fetched.graph_path, &staged_graph)?;
        fs::File::open(&staged_graph)
            .and_then(|f| f.sync_all())
            .map_err(ArtifactError::io(&staged_graph))?;

        write_json(&staging.path().join(TOKENIZER_FILE), &tokenizer)?;
        let manifest = CacheManifest {
            source: self.source_id.clone(),
            graph_file: GRAPH_FILE.to_string(),
            graph_bytes,
            architecture: tokenizer.architecture.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        write_json(&staging.path().join(MANIFEST_FILE), &manifest)?;

        self.publish(staging.path())?;
        info!(
            "Cached {} ({} bytes) in {}",
            self.source_id,
            graph_bytes,
            self.cache_dir.display()
        );

        self.lookup().ok_or_else(|| ArtifactError::InvalidGraph {
            path: self.cache_dir.join(GRAPH_FILE),
            reason: "published cache failed verification".to_string(),
        })
    }

    /// Move staged files into place. The old manifest goes first and the new
    /// one last, so an interrupted publish leaves an untrusted cache.
    fn publish(&self, staging: &Path) -> Result<(), ArtifactError> {
        let manifest = self.cache_dir.join(MANIFEST_FILE);
        match fs::remove_file(&manifest) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(ArtifactError::io(&manifest)(e)),
        }

        for name in [TOKENIZER_FILE, GRAPH_FILE, MANIFEST_FILE] {
            let target = self.cache_dir.join(name);
            fs::rename(staging.join(name), &target).map_err(ArtifactError::io(&target))?;
        }
        Ok(())
    }

    /// Staging dirs left behind by a worker killed mid-conversion.
    fn remove_stale_staging(&self) {
        let Ok(entries) = fs::read_dir(&self.cache_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let is_staging = entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX);
            if is_staging && entry.path().is_dir() {
                warn!("Removing stale staging dir {}", entry.path().display());
                if let Err(e) = fs::remove_dir_all(entry.path()) {
                    warn!("Failed to remove {}: {e}", entry.path().display());
                }
            }
        }
    }
}

/// Place the fetched graph at `dest`, returning its size.
///
/// Hard-links when source and cache share a filesystem and copies otherwise.
/// Symlinks are resolved first, since hub downloads are symlinks into a blob
/// store and a linked symlink would dangle once renamed.
fn materialize_graph(src: &Path, dest: &Path) -> Result<u64, ArtifactError> {
    let target = fs::canonicalize(src).map_err(ArtifactError::io(src))?;
    match fs::hard_link(&target, dest) {
        Ok(()) => {
            debug!("Hard-linked {} into staging", target.display());
            fs::metadata(dest)
                .map(|meta| meta.len())
                .map_err(ArtifactError::io(dest))
        }
        Err(e) => {
            debug!("Hard link failed ({e}), copying {}", target.display());
            fs::copy(&target, dest).map_err(ArtifactError::io(dest))
        }
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(format!("{}: {e}", path.display())),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| format!("{}: {e}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ArtifactError> {
    let json = serde_json::to_string_pretty(value).map_err(|source| ArtifactError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(ArtifactError::io(path))
}
