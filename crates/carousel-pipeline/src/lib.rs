//! Carousel generation pipeline.
//!
//! This crate implements the stage orchestrator that turns a topic into slide
//! documents: typed stage artifacts, extraction and repair of generator output,
//! the single-owner pipeline context, the structural slide rules, narrative
//! advisories for the reviewer, the bounded revision loop, run events, and
//! artifact persistence.

pub mod config;
pub mod context;
pub mod engine;
pub mod events;
pub mod extract;
pub mod generator;
pub mod narrative;
pub mod persist;
pub mod schema;
pub mod stage;
pub mod validation;

pub use config::{parse_max_revisions, PipelineConfig, StageModels};
pub use context::{PipelineContext, RevisionState};
pub use engine::{merge_review, PipelineExecutor, PipelineResult};
pub use events::{EventEmitter, PipelineEvent};
pub use extract::{decode, extract, repair};
pub use generator::{Generation, Generator, LlmGenerator};
pub use narrative::narrative_findings;
pub use persist::{load_manifest, ArtifactWriter, FsArtifactWriter, RunManifest};
pub use schema::{
    BuildOutput, BuiltSlide, ContentPlan, DesignBrief, ResearchFindings, ReviewReport, Severity,
    SlideCopy, StageArtifact, ValidationFinding, Verdict,
};
pub use stage::{descriptor, StageDescriptor, STAGES};
pub use validation::{
    validate_all_slides, SlideReport, SlideRule, SlideValidator, ValidationConfig,
    ValidationReport,
};
