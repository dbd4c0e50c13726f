//! Where a cold start gets its model file from.

use std::path::PathBuf;

use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Repo, RepoType};
use log::info;

use crate::config::ModelSource;
use crate::error::ArtifactError;

/// Fetches the model in its published form. Only called on a cache miss.
pub trait ArtifactSource {
    /// Canonical identifier recorded in the cache manifest.
    fn id(&self) -> String;

    /// Return a local path to the fetched GGUF file.
    fn fetch(&self) -> Result<PathBuf, ArtifactError>;
}

/// Downloads a GGUF file from the HuggingFace Hub.
///
/// hf-hub keeps its own download cache, so an interrupted fetch resumes
/// there rather than in our artifact cache.
#[derive(Debug, Clone)]
pub struct HubSource {
    source: ModelSource,
}

impl HubSource {
    pub fn new(source: ModelSource) -> Self {
        Self { source }
    }
}

impl ArtifactSource for HubSource {
    fn id(&self) -> String {
        self.source.id()
    }

    fn fetch(&self) -> Result<PathBuf, ArtifactError> {
        let fetch_error = |reason: String| ArtifactError::Fetch {
            model: self.id(),
            reason,
        };

        let api = ApiBuilder::new()
            .with_progress(false)
            .build()
            .map_err(|e| fetch_error(format!("failed to initialise hub client: {e}")))?;
        let repo = api.repo(Repo::with_revision(
            self.source.repo.clone(),
            RepoType::Model,
            self.source.revision.clone(),
        ));

        info!(
            "Downloading {} from {}@{}",
            self.source.file, self.source.repo, self.source.revision
        );
        let path = repo
            .get(&self.source.file)
            .map_err(|e| fetch_error(e.to_string()))?;
        info!("Downloaded to {}", path.display());
        Ok(path)
    }
}

/// A GGUF file already on disk (`MODEL_PATH`).
#[derive(Debug, Clone)]
pub struct LocalSource {
    path: PathBuf,
}

impl LocalSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ArtifactSource for LocalSource {
    fn id(&self) -> String {
        format!("file:{}", self.path.display())
    }

    fn fetch(&self) -> Result<PathBuf, ArtifactError> {
        if !self.path.is_file() {
            return Err(ArtifactError::Fetch {
                model: self.id(),
                reason: "model file not found".to_string(),
            });
        }
        Ok(self.path.clone())
    }
}

/// Pick the source for a configuration: a local file when set, else the hub.
pub fn source_for(source: &ModelSource) -> Box<dyn ArtifactSource> {
    match &source.local_path {
        Some(path) => Box::new(LocalSource::new(path.clone())),
        None => Box::new(HubSource::new(source.clone())),
    }
}
