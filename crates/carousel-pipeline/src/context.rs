//! Single-owner state threaded through one pipeline run.
//!
//! The context holds one slot per stage artifact. Stages read upstream
//! artifacts through the `require_*` accessors, which fail with
//! `MissingArtifact` instead of handing out defaults; that is what enforces
//! stage ordering. There is exactly one writer (the executor, sequentially),
//! so nothing here is synchronized. If rendering or stages ever run in
//! parallel, the slide map must become write-once per key.

use std::collections::BTreeMap;
use std::path::PathBuf;

use carousel_llm::Usage;
use carousel_types::{CarouselError, Result, Stage};
use serde::Serialize;

use crate::schema::{
    BuildOutput, ContentPlan, DesignBrief, ResearchFindings, ReviewReport, SlideCopy,
    StageArtifact, ValidationFinding,
};
use crate::validation::ValidationReport;

// ---------------------------------------------------------------------------
// RevisionState
// ---------------------------------------------------------------------------

/// Review iteration counter. `iteration <= max_iterations` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionState {
    iteration: u32,
    max_iterations: u32,
}

impl RevisionState {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            iteration: 0,
            max_iterations,
        }
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Whether another iteration may start.
    pub fn has_remaining(&self) -> bool {
        self.iteration < self.max_iterations
    }

    /// Start the next iteration, checking the bound first. Returns the new
    /// iteration number, or `None` once the bound is reached.
    pub fn try_advance(&mut self) -> Option<u32> {
        if !self.has_remaining() {
            return None;
        }
        self.iteration += 1;
        Some(self.iteration)
    }
}

// ---------------------------------------------------------------------------
// PipelineContext
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PipelineContext {
    topic: String,
    research: Option<ResearchFindings>,
    plan: Option<ContentPlan>,
    copy: Option<SlideCopy>,
    design: Option<DesignBrief>,
    build: Option<BuildOutput>,
    review: Option<ReviewReport>,
    /// Final slide documents keyed by slide number.
    slides: BTreeMap<u32, String>,
    images: BTreeMap<u32, PathBuf>,
    /// Latest structural auto-validation.
    structural: Option<ValidationReport>,
    /// Blocking findings carried into build revisions, oldest first.
    issues: Vec<ValidationFinding>,
    review_history: Vec<ReviewReport>,
    revision: RevisionState,
    usage: BTreeMap<Stage, Usage>,
}

macro_rules! require {
    ($name:ident, $field:ident, $ty:ty, $stage:expr) => {
        pub fn $name(&self) -> Result<&$ty> {
            self.$field
                .as_ref()
                .ok_or(CarouselError::MissingArtifact { stage: $stage })
        }
    };
}

impl PipelineContext {
    pub fn new(topic: impl Into<String>, max_revisions: u32) -> Self {
        Self {
            topic: topic.into(),
            research: None,
            plan: None,
            copy: None,
            design: None,
            build: None,
            review: None,
            slides: BTreeMap::new(),
            images: BTreeMap::new(),
            structural: None,
            issues: Vec::new(),
            review_history: Vec::new(),
            revision: RevisionState::new(max_revisions),
            usage: BTreeMap::new(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    require!(require_research, research, ResearchFindings, Stage::Research);
    require!(require_plan, plan, ContentPlan, Stage::Plan);
    require!(require_copy, copy, SlideCopy, Stage::Copy);
    require!(require_design, design, DesignBrief, Stage::Design);
    require!(require_build, build, BuildOutput, Stage::Build);
    require!(require_review, review, ReviewReport, Stage::Review);

    pub fn has_artifact(&self, stage: Stage) -> bool {
        match stage {
            Stage::Research => self.research.is_some(),
            Stage::Plan => self.plan.is_some(),
            Stage::Copy => self.copy.is_some(),
            Stage::Design => self.design.is_some(),
            Stage::Build => self.build.is_some(),
            Stage::Review => self.review.is_some(),
        }
    }

    /// Commit a stage artifact, replacing any previous one wholesale.
    ///
    /// A build artifact also replaces the slide map; a review report is
    /// appended to the review history.
    pub fn store(&mut self, artifact: StageArtifact) {
        match artifact {
            StageArtifact::Research(a) => self.research = Some(a),
            StageArtifact::Plan(a) => self.plan = Some(a),
            StageArtifact::Copy(a) => self.copy = Some(a),
            StageArtifact::Design(a) => self.design = Some(a),
            StageArtifact::Build(a) => {
                self.slides = a
                    .slides
                    .iter()
                    .map(|s| (s.slide_number, s.content.clone()))
                    .collect();
                self.build = Some(a);
            }
            StageArtifact::Review(a) => {
                self.review_history.push(a.clone());
                self.review = Some(a);
            }
        }
    }

    /// The stored artifact for `stage`, serialized.
    pub fn artifact_json(&self, stage: Stage) -> Result<serde_json::Value> {
        let value = match stage {
            Stage::Research => serde_json::to_value(self.require_research()?)?,
            Stage::Plan => serde_json::to_value(self.require_plan()?)?,
            Stage::Copy => serde_json::to_value(self.require_copy()?)?,
            Stage::Design => serde_json::to_value(self.require_design()?)?,
            Stage::Build => serde_json::to_value(self.require_build()?)?,
            Stage::Review => serde_json::to_value(self.require_review()?)?,
        };
        Ok(value)
    }

    pub fn slides(&self) -> &BTreeMap<u32, String> {
        &self.slides
    }

    pub fn images(&self) -> &BTreeMap<u32, PathBuf> {
        &self.images
    }

    pub fn set_images(&mut self, images: BTreeMap<u32, PathBuf>) {
        self.images = images;
    }

    pub fn structural(&self) -> Option<&ValidationReport> {
        self.structural.as_ref()
    }

    pub fn set_structural(&mut self, report: ValidationReport) {
        self.structural = Some(report);
    }

    // -- Revision feedback -------------------------------------------------

    pub fn issues(&self) -> &[ValidationFinding] {
        &self.issues
    }

    pub fn push_issues(&mut self, findings: impl IntoIterator<Item = ValidationFinding>) {
        self.issues.extend(findings);
    }

    pub fn review_history(&self) -> &[ReviewReport] {
        &self.review_history
    }

    pub fn revision(&self) -> &RevisionState {
        &self.revision
    }

    pub fn revision_mut(&mut self) -> &mut RevisionState {
        &mut self.revision
    }

    /// True iff a review report exists and holds a failed high or medium
    /// finding. Same predicate as `ValidationReport::all_passed`, negated.
    pub fn has_blocking_issues(&self) -> bool {
        self.review
            .as_ref()
            .is_some_and(|r| r.blocking().next().is_some())
    }

    // -- Usage ledger ------------------------------------------------------

    pub fn record_usage(&mut self, stage: Stage, usage: Usage) {
        *self.usage.entry(stage).or_default() += usage;
    }

    pub fn usage(&self) -> &BTreeMap<Stage, Usage> {
        &self.usage
    }

    pub fn total_usage(&self) -> Usage {
        self.usage.values().fold(Usage::default(), |mut acc, u| {
            acc += *u;
            acc
        })
    }
}
