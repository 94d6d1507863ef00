//! Generate → write → build → validate → repair state machine
//!
//! A unit only counts as built once the loader accepts its descriptor and
//! its id is not taken by a built-in or another compiled unit. Anything less
//! goes back to the model as a repair diagnostic.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use capsule_core::{ChatMessage, CompletionClient, CompletionError, FinishReason};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::prompt::{manifest, repair_prompt, strip_code_fences, SYSTEM_PROMPT};
use super::toolchain::{BuildOutcome, Toolchain};
use crate::plugins::builtin::BUILTIN_IDS;
use crate::plugins::{CapabilityLoader, LoadError};

/// Identifier candidates tried before giving up
const MAX_ID_CANDIDATES: usize = 8;

/// Length of a generated identifier in hex characters
const ID_LEN: usize = 12;

/// Pipeline states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthoringState {
    Idle,
    Generating,
    Writing,
    Building,
    Repairing,
    Succeeded,
    Failed,
}

impl std::fmt::Display for AuthoringState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuthoringState::Idle => "idle",
            AuthoringState::Generating => "generating",
            AuthoringState::Writing => "writing",
            AuthoringState::Building => "building",
            AuthoringState::Repairing => "repairing",
            AuthoringState::Succeeded => "succeeded",
            AuthoringState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Pending,
    Succeeded,
    Failed,
}

/// A capability produced by the pipeline
#[derive(Debug, Clone)]
pub struct GeneratedArtifact {
    pub id: String,
    /// Current source text
    pub source: String,
    /// Package directory holding Cargo.toml and src/main.rs
    pub package_dir: PathBuf,
    pub source_path: PathBuf,
    pub unit_path: PathBuf,
    pub status: BuildStatus,
    pub repair_attempts: u32,
}

/// What a pipeline run went through
#[derive(Debug, Clone)]
pub struct AuthoringReport {
    pub transitions: Vec<AuthoringState>,
    pub artifact: Option<GeneratedArtifact>,
}

impl AuthoringReport {
    fn new() -> Self {
        Self {
            transitions: vec![AuthoringState::Idle],
            artifact: None,
        }
    }

    pub fn state(&self) -> AuthoringState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(AuthoringState::Idle)
    }

    fn transition(&mut self, next: AuthoringState) {
        debug!(from = %self.state(), to = %next, "Authoring transition");
        self.transitions.push(next);
    }

    /// Text returned to the model on success
    pub fn summary(&self) -> String {
        match &self.artifact {
            Some(artifact) => format!(
                "Capability {} was built successfully after {} repair attempt(s). \
                 The assistant must be restarted before it can be called.",
                artifact.id, artifact.repair_attempts
            ),
            None => "No capability was produced.".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthoringError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The model did not finish with a plain answer
    #[error("model did not return source code (finish reason: {0})")]
    Generation(FinishReason),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("no unused identifier after {0} candidates")]
    IdentifierExhausted(usize),

    #[error("cannot scan compiled units: {0}")]
    Load(#[from] LoadError),

    #[error("no usable capability after {attempts} attempts; last diagnostics:\n{diagnostic}")]
    PipelineFailure { attempts: u32, diagnostic: String },
}

/// On-disk locations the pipeline writes to
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    /// `<plugins>/source/generated`
    pub source_root: PathBuf,
    /// `<plugins>/compiled`
    pub compiled_root: PathBuf,
    /// capsule-sdk path written into generated manifests
    pub sdk_path: PathBuf,
}

impl ArtifactLayout {
    fn is_free(&self, id: &str) -> bool {
        !self.source_root.join(id).exists() && !self.compiled_root.join(id).exists()
    }

    fn artifact(&self, id: String) -> GeneratedArtifact {
        let package_dir = self.source_root.join(&id);
        GeneratedArtifact {
            source_path: package_dir.join("src").join("main.rs"),
            unit_path: self.compiled_root.join(&id),
            package_dir,
            id,
            source: String::new(),
            status: BuildStatus::Pending,
            repair_attempts: 0,
        }
    }
}

/// Turns a capability description into a built unit
pub struct AuthoringPipeline {
    client: Arc<dyn CompletionClient>,
    toolchain: Arc<dyn Toolchain>,
    loader: Arc<dyn CapabilityLoader>,
    layout: ArtifactLayout,
    max_build_attempts: u32,
}

impl AuthoringPipeline {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        toolchain: Arc<dyn Toolchain>,
        loader: Arc<dyn CapabilityLoader>,
        layout: ArtifactLayout,
        max_build_attempts: u32,
    ) -> Self {
        Self {
            client,
            toolchain,
            loader,
            layout,
            max_build_attempts: max_build_attempts.max(1),
        }
    }

    /// Run the whole pipeline for `description`
    #[instrument(skip(self, description), fields(description_len = description.len()))]
    pub async fn run(&self, description: &str) -> Result<AuthoringReport, AuthoringError> {
        let mut report = AuthoringReport::new();
        let result = self.drive(description, &mut report).await;

        match &result {
            Ok(()) => report.transition(AuthoringState::Succeeded),
            Err(e) => {
                report.transition(AuthoringState::Failed);
                warn!(error = %e, "Capability authoring failed");
            }
        }

        result.map(|()| report)
    }

    async fn drive(
        &self,
        description: &str,
        report: &mut AuthoringReport,
    ) -> Result<(), AuthoringError> {
        if description.trim().is_empty() {
            return Err(AuthoringError::InvalidArguments(
                "pluginDescription must not be empty".into(),
            ));
        }

        let mut conversation = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(description),
        ];

        report.transition(AuthoringState::Generating);
        let source = self.request_source(&mut conversation).await?;

        report.transition(AuthoringState::Writing);
        let mut artifact = self.allocate(random_id)?;
        info!(capability = %artifact.id, "Allocated capability identifier");
        self.write_package(&mut artifact, source).await?;

        let mut attempt = 1;
        loop {
            report.transition(AuthoringState::Building);
            debug!(capability = %artifact.id, attempt, "Building capability");

            let outcome = self
                .toolchain
                .build(&artifact.package_dir, &artifact.unit_path)
                .await?;

            let diagnostics = match outcome {
                BuildOutcome::Succeeded => match self.validate(&artifact.unit_path).await? {
                    None => {
                        artifact.status = BuildStatus::Succeeded;
                        info!(
                            capability = %artifact.id,
                            repairs = artifact.repair_attempts,
                            "Capability built"
                        );
                        report.artifact = Some(artifact);
                        return Ok(());
                    }
                    Some(reason) => {
                        warn!(capability = %artifact.id, attempt, reason = %reason, "Built unit rejected");
                        remove_unit(&artifact.unit_path).await?;
                        reason
                    }
                },
                BuildOutcome::Failed { diagnostics } => {
                    warn!(capability = %artifact.id, attempt, "Build failed");
                    diagnostics
                }
            };

            artifact.status = BuildStatus::Failed;

            if attempt >= self.max_build_attempts {
                report.artifact = Some(artifact);
                return Err(AuthoringError::PipelineFailure {
                    attempts: attempt,
                    diagnostic: diagnostics,
                });
            }

            report.transition(AuthoringState::Repairing);
            artifact.repair_attempts += 1;
            conversation.push(ChatMessage::user(repair_prompt(
                &diagnostics,
                &artifact.source,
            )));
            let repaired = self.request_source(&mut conversation).await?;

            report.transition(AuthoringState::Writing);
            self.write_package(&mut artifact, repaired).await?;
            artifact.status = BuildStatus::Pending;
            attempt += 1;
        }
    }

    /// Check a freshly built unit the way startup will
    ///
    /// Returns the rejection reason, or `None` when the unit would load.
    async fn validate(&self, unit_path: &Path) -> Result<Option<String>, AuthoringError> {
        let id = match self.loader.load(unit_path).await {
            Ok(unit) => unit.id().to_string(),
            Err(e) => return Ok(Some(e.to_string())),
        };

        if BUILTIN_IDS.contains(&id.as_str()) {
            return Ok(Some(format!(
                "capability id {} is reserved by a built-in capability; choose another id",
                id
            )));
        }

        for other in self.loader.discover(&self.layout.compiled_root)? {
            if other == unit_path {
                continue;
            }
            match self.loader.load(&other).await {
                Ok(existing) if existing.id() == id => {
                    return Ok(Some(format!(
                        "capability id {} is already used by {}; choose another id",
                        id,
                        other.display()
                    )));
                }
                Ok(_) => {}
                Err(e) => debug!(unit = %other.display(), error = %e, "Skipping unloadable unit"),
            }
        }

        Ok(None)
    }

    /// Ask for source; anything but a plain stop is a generation error
    async fn request_source(
        &self,
        conversation: &mut Vec<ChatMessage>,
    ) -> Result<String, AuthoringError> {
        let completion = self.client.complete(conversation, &[]).await?;

        if completion.finish_reason != FinishReason::Stop {
            return Err(AuthoringError::Generation(completion.finish_reason));
        }

        conversation.push(ChatMessage::assistant(completion.content.clone()));
        Ok(strip_code_fences(&completion.content))
    }

    /// Pick an identifier whose source and unit paths are both unused
    fn allocate(
        &self,
        mut candidate: impl FnMut() -> String,
    ) -> Result<GeneratedArtifact, AuthoringError> {
        for _ in 0..MAX_ID_CANDIDATES {
            let id = candidate();
            if self.layout.is_free(&id) {
                return Ok(self.layout.artifact(id));
            }
            debug!(capability = %id, "Identifier already in use");
        }
        Err(AuthoringError::IdentifierExhausted(MAX_ID_CANDIDATES))
    }

    async fn write_package(
        &self,
        artifact: &mut GeneratedArtifact,
        source: String,
    ) -> Result<(), AuthoringError> {
        if let Some(src_dir) = artifact.source_path.parent() {
            tokio::fs::create_dir_all(src_dir).await?;
        }

        let manifest_path = artifact.package_dir.join("Cargo.toml");
        if !manifest_path.exists() {
            tokio::fs::write(&manifest_path, manifest(&artifact.id, &self.layout.sdk_path))
                .await?;
        }

        tokio::fs::write(&artifact.source_path, &source).await?;
        debug!(path = %artifact.source_path.display(), bytes = source.len(), "Wrote capability source");
        artifact.source = source;
        Ok(())
    }
}

async fn remove_unit(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn random_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(ID_LEN);
    id
}
