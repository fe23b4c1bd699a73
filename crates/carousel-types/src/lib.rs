//! Shared types and errors for the carousel generation pipeline.
//!
//! This crate provides the foundational types used across all other carousel crates:
//! - `CarouselError`: unified error taxonomy
//! - `Stage`: the closed set of generation stages
//! - `PipelineState`: the orchestrator's state machine positions
//! - slide file naming shared by the writer and the renderer

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error type for all carousel subsystems.
#[derive(Debug, thiserror::Error)]
pub enum CarouselError {
    // === Generation Provider Errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthError { provider: String },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    RequestTimeout { provider: String, timeout_ms: u64 },

    #[error("Context length exceeded for {provider}: {message}")]
    ContextLengthExceeded { provider: String, message: String },

    // === Pipeline Errors ===
    #[error("Missing {stage} artifact: the {stage} stage must run first")]
    MissingArtifact { stage: Stage },

    #[error("Stage '{stage}' output could not be decoded: {message} (attempted: {preview})")]
    DecodeFailure {
        stage: Stage,
        message: String,
        preview: String,
    },

    #[error("Stage '{stage}' output violates its schema: {message}")]
    SchemaViolation { stage: Stage, message: String },

    #[error("{collaborator} collaborator failed during {phase}: {source}")]
    CollaboratorFailure {
        collaborator: &'static str,
        phase: PipelineState,
        #[source]
        source: Box<CarouselError>,
    },

    // === Rendering Errors ===
    #[error("Rendering incomplete: no image returned for slides {missing:?}")]
    IncompleteRender { missing: Vec<u32> },

    #[error("Rendering slide {slide} failed: {message}")]
    RenderError { slide: u32, message: String },

    #[error("Command timed out after {timeout_ms}ms")]
    CommandTimeout { timeout_ms: u64 },

    // === Configuration ===
    #[error("Invalid configuration: {0}")]
    Config(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl CarouselError {
    /// Returns `true` if the error is a transient transport failure that may
    /// succeed when the same request is sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CarouselError::RateLimited { .. }
                | CarouselError::RequestTimeout { .. }
                | CarouselError::ProviderError {
                    retryable: true,
                    ..
                }
        )
    }

    /// Returns `true` if the error is permanent and retrying will not help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CarouselError::AuthError { .. }
                | CarouselError::ContextLengthExceeded { .. }
                | CarouselError::MissingArtifact { .. }
                | CarouselError::DecodeFailure { .. }
                | CarouselError::SchemaViolation { .. }
                | CarouselError::Config(_)
        )
    }

    /// Stable snake_case label naming the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            CarouselError::MissingArtifact { .. } => "missing_artifact",
            CarouselError::DecodeFailure { .. } => "decode_failure",
            CarouselError::SchemaViolation { .. } => "schema_violation",
            CarouselError::CollaboratorFailure { .. } => "collaborator_failure",
            CarouselError::ProviderError { .. }
            | CarouselError::RateLimited { .. }
            | CarouselError::AuthError { .. }
            | CarouselError::RequestTimeout { .. }
            | CarouselError::ContextLengthExceeded { .. } => "provider_error",
            CarouselError::IncompleteRender { .. }
            | CarouselError::RenderError { .. }
            | CarouselError::CommandTimeout { .. } => "render_error",
            CarouselError::Config(_) => "config_error",
            CarouselError::Io(_) => "io_error",
            CarouselError::Json(_) => "json_error",
            CarouselError::Other(_) => "other",
        }
    }
}

/// A convenience alias for `Result<T, CarouselError>`.
pub type Result<T> = std::result::Result<T, CarouselError>;

// ---------------------------------------------------------------------------
// Stage: the closed set of generation stages
// ---------------------------------------------------------------------------

/// One generation step of the pipeline. Each stage produces exactly one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Research,
    Plan,
    Copy,
    Design,
    Build,
    Review,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 6] = [
        Stage::Research,
        Stage::Plan,
        Stage::Copy,
        Stage::Design,
        Stage::Build,
        Stage::Review,
    ];

    /// Position of the stage in [`Stage::ALL`].
    pub fn index(self) -> usize {
        match self {
            Stage::Research => 0,
            Stage::Plan => 1,
            Stage::Copy => 2,
            Stage::Design => 3,
            Stage::Build => 4,
            Stage::Review => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Research => "research",
            Stage::Plan => "plan",
            Stage::Copy => "copy",
            Stage::Design => "design",
            Stage::Build => "build",
            Stage::Review => "review",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// PipelineState: orchestrator state machine positions
// ---------------------------------------------------------------------------

/// Position of a run in the orchestrator's state machine.
///
/// `Research → Plan → Copy → Design → Build → AutoValidate → Review(1..n) → Render → Done`,
/// with `Review(i) → Build → AutoValidate → Review(i+1)` while blocking issues remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Research,
    Plan,
    Copy,
    Design,
    Build,
    AutoValidate,
    Review { iteration: u32 },
    Render,
    Done,
}

impl From<Stage> for PipelineState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Research => PipelineState::Research,
            Stage::Plan => PipelineState::Plan,
            Stage::Copy => PipelineState::Copy,
            Stage::Design => PipelineState::Design,
            Stage::Build => PipelineState::Build,
            Stage::Review => PipelineState::Review { iteration: 0 },
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Research => f.write_str("research"),
            PipelineState::Plan => f.write_str("plan"),
            PipelineState::Copy => f.write_str("copy"),
            PipelineState::Design => f.write_str("design"),
            PipelineState::Build => f.write_str("build"),
            PipelineState::AutoValidate => f.write_str("auto_validate"),
            PipelineState::Review { iteration } => write!(f, "review #{iteration}"),
            PipelineState::Render => f.write_str("render"),
            PipelineState::Done => f.write_str("done"),
        }
    }
}

// ---------------------------------------------------------------------------
// Slide file naming
// ---------------------------------------------------------------------------

/// Zero-padded file name for a slide, e.g. `slide_03.html`.
pub fn slide_file_name(slide_number: u32, extension: &str) -> String {
    format!("slide_{slide_number:02}.{extension}")
}

/// Parse the slide number back out of a name produced by [`slide_file_name`].
pub fn parse_slide_file_name(name: &str) -> Option<u32> {
    let stem = name.strip_prefix("slide_")?;
    let (digits, _ext) = stem.split_once('.')?;
    digits.parse().ok()
}
