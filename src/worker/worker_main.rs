//! Worker process entry point.
//!
//! Resolves the model artifact, loads the engine, announces readiness on
//! stderr and then serves JSON lines from stdin until it closes. All log
//! output goes to stderr; stdout carries responses only.

use std::io::{self, BufRead, Write};
use std::time::Instant;

use anyhow::Context;
use log::{error, info};

use super::request_loop::{LoopSummary, RequestLoop};
use crate::artifact::{source_for, ArtifactSource, CacheResolver, ModelArtifact};
use crate::config::WorkerConfig;
use crate::engine::{GenerationInvoker, InferenceEngine};
use crate::error::StartupError;
use crate::logger::write_ready;

#[cfg(all(feature = "llama", not(feature = "mock")))]
use crate::engine::LlamaEngine;
#[cfg(feature = "mock")]
use crate::engine::MockEngine;

/// A loaded model, ready to serve. Only exists once loading succeeded.
pub struct WorkerState<E: InferenceEngine> {
    engine: E,
    artifact: ModelArtifact,
}

impl<E: InferenceEngine> WorkerState<E> {
    /// Resolve the artifact cache and load the engine from it.
    pub fn load<S, F>(
        resolver: &CacheResolver,
        source: &S,
        load_engine: F,
    ) -> Result<Self, StartupError>
    where
        S: ArtifactSource + ?Sized,
        F: FnOnce(&ModelArtifact) -> Result<E, StartupError>,
    {
        info!("Worker state: Loading ({})", source.id());
        let loaded = resolver
            .resolve(source)
            .map_err(StartupError::from)
            .and_then(|artifact| load_engine(&artifact).map(|engine| Self { engine, artifact }));

        match loaded {
            Ok(state) => {
                info!("Worker state: Ready");
                Ok(state)
            }
            Err(e) => {
                error!("Worker state: Failed ({e})");
                Err(e)
            }
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    /// Serve requests from `reader` to `writer` until end of input.
    pub fn serve<R: BufRead, W: Write>(
        &self,
        config: &WorkerConfig,
        reader: R,
        writer: W,
    ) -> io::Result<LoopSummary> {
        let invoker =
            GenerationInvoker::new(&self.engine, &config.decoding, config.request_timeout());
        RequestLoop::new(reader, writer).run(&invoker)
    }
}

/// The three streams a worker talks over.
pub struct Stdio<R, W, D> {
    /// Request lines.
    pub input: R,
    /// Response lines.
    pub output: W,
    /// Readiness sentinel. Log records go through `log` separately.
    pub diagnostics: D,
}

/// Run the worker over the process's stdin, stdout and stderr.
///
/// Returns once stdin closes. Startup failures and broken output streams are
/// returned as errors; per-request failures never are.
pub fn run_worker(config: &WorkerConfig) -> anyhow::Result<()> {
    info!("Starting model worker process (pid={})", std::process::id());

    let source = source_for(&config.source);
    let stdin = io::stdin();
    let stdout = io::stdout();
    let stdio = Stdio {
        input: stdin.lock(),
        output: stdout.lock(),
        diagnostics: io::stderr(),
    };
    let summary = run_with(
        config,
        source.as_ref(),
        |artifact| load_engine(artifact, config),
        stdio,
    )?;

    info!(
        "Stdin closed after {} requests ({} errors), exiting",
        summary.requests, summary.errors
    );
    Ok(())
}

/// Startup, readiness sentinel, then the request loop, over injected streams.
///
/// Nothing is written to `stdio` when startup fails.
pub fn run_with<S, E, F, R, W, D>(
    config: &WorkerConfig,
    source: &S,
    load_engine: F,
    mut stdio: Stdio<R, W, D>,
) -> anyhow::Result<LoopSummary>
where
    S: ArtifactSource + ?Sized,
    E: InferenceEngine,
    F: FnOnce(&ModelArtifact) -> Result<E, StartupError>,
    R: BufRead,
    W: Write,
    D: Write,
{
    let resolver = CacheResolver::new(config.resolve_cache_dir(), source.id());
    info!("Model cache directory: {}", resolver.cache_dir().display());

    let started = Instant::now();
    let state =
        WorkerState::load(&resolver, source, load_engine).context("Model startup failed")?;
    info!(
        "Model ready in {:.1}s ({:?})",
        started.elapsed().as_secs_f64(),
        state.artifact().format
    );

    write_ready(&mut stdio.diagnostics).context("Failed to announce readiness")?;

    state
        .serve(config, stdio.input, stdio.output)
        .context("Request loop stopped on an I/O error")
}

#[cfg(all(feature = "llama", not(feature = "mock")))]
fn load_engine(artifact: &ModelArtifact, config: &WorkerConfig) -> Result<LlamaEngine, StartupError> {
    LlamaEngine::load(artifact, config.gpu_layers)
}

#[cfg(feature = "mock")]
fn load_engine(artifact: &ModelArtifact, _config: &WorkerConfig) -> Result<MockEngine, StartupError> {
    MockEngine::load(artifact)
}
