//! Stage orchestrator: the run state machine.
//!
//! `Research → Plan → Copy → Design → Build → AutoValidate → Review(i) → Render → Done`,
//! looping `Review(i) → Build → AutoValidate → Review(i+1)` while the recorded
//! review holds blocking findings and the revision bound allows another
//! iteration. Any error aborts the run; reaching the bound does not.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use carousel_render::Renderer;
use carousel_types::{CarouselError, PipelineState, Result, Stage};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::context::PipelineContext;
use crate::events::{EventEmitter, PipelineEvent};
use crate::generator::Generator;
use crate::persist::{ArtifactWriter, RunManifest};
use crate::schema::{ReviewReport, StageArtifact, ValidationFinding, Verdict};
use crate::stage::descriptor;
use crate::validation::{SlideValidator, ValidationReport};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Drives one run at a time through the stage state machine.
pub struct PipelineExecutor {
    config: PipelineConfig,
    validator: SlideValidator,
    generator: Arc<dyn Generator>,
    renderer: Option<Arc<dyn Renderer>>,
    writer: Option<Arc<dyn ArtifactWriter>>,
    events: EventEmitter,
}

/// The result of a completed run.
#[derive(Debug)]
pub struct PipelineResult {
    pub run_id: Uuid,
    /// Every state entered, in order.
    pub transitions: Vec<PipelineState>,
    pub context: PipelineContext,
    pub images: BTreeMap<u32, PathBuf>,
    /// Blocking findings left when the revision bound was reached. Empty when
    /// the final review passed.
    pub unresolved: Vec<ValidationFinding>,
}

impl PipelineResult {
    pub fn verdict(&self) -> Verdict {
        if self.unresolved.is_empty() {
            Verdict::Pass
        } else {
            Verdict::NeedsRevision
        }
    }

    pub fn review_iterations(&self) -> u32 {
        self.context.revision().iteration()
    }
}

/// Mutable state of the run in progress.
struct Run {
    id: Uuid,
    ctx: PipelineContext,
    transitions: Vec<PipelineState>,
    unresolved: Vec<ValidationFinding>,
}

fn collaborator(name: &'static str, phase: PipelineState) -> impl FnOnce(CarouselError) -> CarouselError {
    move |source| CarouselError::CollaboratorFailure {
        collaborator: name,
        phase,
        source: Box::new(source),
    }
}

/// The report recorded for a review iteration: this iteration's failing
/// structural findings, then the reviewer's own findings.
pub fn merge_review(structural: &ValidationReport, reviewer: ReviewReport) -> ReviewReport {
    let mut findings = structural.failures();
    findings.extend(reviewer.findings);
    ReviewReport {
        verdict: reviewer.verdict,
        summary: reviewer.summary,
        findings,
    }
}

// ---------------------------------------------------------------------------
// PipelineExecutor
// ---------------------------------------------------------------------------

impl PipelineExecutor {
    pub fn new(config: PipelineConfig, generator: Arc<dyn Generator>) -> Self {
        Self {
            validator: SlideValidator::new(&config.validation),
            config,
            generator,
            renderer: None,
            writer: None,
            events: EventEmitter::default(),
        }
    }

    /// Without a renderer the run skips the `Render` state.
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_writer(mut self, writer: Arc<dyn ArtifactWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage for `topic`.
    pub async fn run(&self, topic: &str) -> Result<PipelineResult> {
        let started_at = chrono::Utc::now();
        let clock = Instant::now();
        let mut run = Run {
            id: Uuid::new_v4(),
            ctx: PipelineContext::new(topic, self.config.max_revisions()),
            transitions: Vec::new(),
            unresolved: Vec::new(),
        };

        tracing::info!(run_id = %run.id, topic, max_revisions = self.config.max_revisions(), "Run started");
        self.events.emit(PipelineEvent::RunStarted {
            run_id: run.id.to_string(),
            topic: topic.to_string(),
        });

        match self.drive(&mut run).await {
            Ok(()) => {
                let manifest = self.manifest(&run, started_at, None);
                if let Some(writer) = &self.writer {
                    writer
                        .write_manifest(&manifest)
                        .await
                        .map_err(collaborator("persistence", PipelineState::Done))?;
                }
                tracing::info!(
                    run_id = %run.id,
                    iterations = run.ctx.revision().iteration(),
                    unresolved = run.unresolved.len(),
                    total_tokens = run.ctx.total_usage().total_tokens,
                    "Run completed"
                );
                self.events.emit(PipelineEvent::RunCompleted {
                    run_id: run.id.to_string(),
                    duration_ms: clock.elapsed().as_millis() as u64,
                    review_iterations: run.ctx.revision().iteration(),
                    unresolved: run.unresolved.len(),
                });
                Ok(PipelineResult {
                    run_id: run.id,
                    transitions: run.transitions,
                    images: run.ctx.images().clone(),
                    unresolved: run.unresolved,
                    context: run.ctx,
                })
            }
            Err(err) => {
                tracing::error!(run_id = %run.id, kind = err.kind(), error = %err, "Run aborted");
                self.events.emit(PipelineEvent::RunFailed {
                    run_id: run.id.to_string(),
                    kind: err.kind().to_string(),
                    error: err.to_string(),
                });
                if let Some(writer) = &self.writer {
                    let manifest = self.manifest(&run, started_at, Some(&err));
                    if let Err(write_err) = writer.write_manifest(&manifest).await {
                        tracing::warn!(error = %write_err, "Could not write manifest for failed run");
                    }
                }
                Err(err)
            }
        }
    }

    async fn drive(&self, run: &mut Run) -> Result<()> {
        for stage in [Stage::Research, Stage::Plan, Stage::Copy, Stage::Design, Stage::Build] {
            let phase = PipelineState::from(stage);
            self.enter(run, phase);
            let artifact = self.generate(&mut run.ctx, stage, phase).await?;
            self.commit(&mut run.ctx, artifact, None).await?;
        }

        loop {
            let iteration = run.ctx.revision_mut().try_advance().ok_or_else(|| {
                CarouselError::Other("review started past the revision bound".into())
            })?;

            // Structural rules: deterministic, identical on every run.
            self.enter(run, PipelineState::AutoValidate);
            let structural = self.validator.validate_all(run.ctx.slides());
            tracing::info!(
                iteration,
                high = structural.high_count,
                medium = structural.medium_count,
                low = structural.low_count,
                "Structural validation completed"
            );
            self.events.emit(PipelineEvent::AutoValidationCompleted {
                iteration,
                high: structural.high_count,
                medium: structural.medium_count,
                low: structural.low_count,
            });
            run.ctx.set_structural(structural.clone());

            // Semantic review, merged with the structural failures.
            let phase = PipelineState::Review { iteration };
            self.enter(run, phase);
            let reviewer = match self.generate(&mut run.ctx, Stage::Review, phase).await? {
                StageArtifact::Review(report) => report,
                other => {
                    return Err(CarouselError::Other(format!(
                        "review stage produced a {} artifact",
                        other.stage()
                    )))
                }
            };
            let report = merge_review(&structural, reviewer);
            if let Some(claimed) = report.verdict {
                if claimed != report.verdict() {
                    tracing::warn!(
                        iteration,
                        claimed = %claimed,
                        derived = %report.verdict(),
                        "Reviewer verdict disagrees with its findings; findings decide"
                    );
                }
            }
            let blocking: Vec<ValidationFinding> = report.blocking().cloned().collect();
            self.commit(&mut run.ctx, StageArtifact::Review(report), Some(iteration))
                .await?;
            self.events.emit(PipelineEvent::ReviewCompleted {
                iteration,
                blocking: blocking.len(),
            });

            if !run.ctx.has_blocking_issues() {
                tracing::info!(iteration, "Review passed");
                break;
            }
            if !run.ctx.revision().has_remaining() {
                tracing::warn!(
                    iteration,
                    unresolved = blocking.len(),
                    "Revision bound reached with blocking findings; continuing with current slides"
                );
                run.unresolved = blocking;
                break;
            }

            tracing::info!(iteration, issues = blocking.len(), "Rebuilding slides");
            self.events.emit(PipelineEvent::RevisionStarted {
                iteration: iteration + 1,
                issues: blocking.len(),
            });
            run.ctx.push_issues(blocking);
            self.enter(run, PipelineState::Build);
            let artifact = self
                .generate(&mut run.ctx, Stage::Build, PipelineState::Build)
                .await?;
            self.commit(&mut run.ctx, artifact, None).await?;
        }

        if let Some(renderer) = &self.renderer {
            self.enter(run, PipelineState::Render);
            let images = renderer
                .render_all(run.ctx.slides())
                .await
                .map_err(collaborator("rendering", PipelineState::Render))?;
            let missing: Vec<u32> = run
                .ctx
                .slides()
                .keys()
                .filter(|n| !images.contains_key(n))
                .copied()
                .collect();
            if !missing.is_empty() {
                return Err(CarouselError::IncompleteRender { missing });
            }
            tracing::info!(images = images.len(), "Slides rendered");
            self.events.emit(PipelineEvent::RenderCompleted {
                images: images.len(),
            });
            run.ctx.set_images(images);
        }

        self.enter(run, PipelineState::Done);
        Ok(())
    }

    fn enter(&self, run: &mut Run, state: PipelineState) {
        tracing::debug!(run_id = %run.id, state = %state, "Entering state");
        run.transitions.push(state);
    }

    /// Project, invoke, and decode one stage. Nothing is committed here.
    async fn generate(
        &self,
        ctx: &mut PipelineContext,
        stage: Stage,
        phase: PipelineState,
    ) -> Result<StageArtifact> {
        let desc = descriptor(stage);
        let iteration = ctx.revision().iteration();
        let clock = Instant::now();

        let payload = (desc.project)(ctx, &self.config)?;
        let user = serde_json::to_string_pretty(&payload)?;

        tracing::info!(stage = %stage, iteration, "Stage started");
        self.events.emit(PipelineEvent::StageStarted { stage, iteration });

        let generation = self
            .generator
            .invoke(stage, desc.instructions, &user, self.config.max_output_tokens(stage))
            .await
            .map_err(collaborator("generation", phase))?;
        ctx.record_usage(stage, generation.usage);

        let artifact = (desc.decode)(&generation.text, ctx, &self.config)?;

        let duration_ms = clock.elapsed().as_millis() as u64;
        tracing::info!(
            stage = %stage,
            iteration,
            duration_ms,
            input_tokens = generation.usage.input_tokens,
            output_tokens = generation.usage.output_tokens,
            "Stage completed"
        );
        self.events.emit(PipelineEvent::StageCompleted {
            stage,
            iteration,
            duration_ms,
            input_tokens: generation.usage.input_tokens,
            output_tokens: generation.usage.output_tokens,
        });
        Ok(artifact)
    }

    /// Store the artifact and write its durable copy.
    async fn commit(
        &self,
        ctx: &mut PipelineContext,
        artifact: StageArtifact,
        iteration: Option<u32>,
    ) -> Result<()> {
        if let Some(writer) = &self.writer {
            writer
                .write_artifact(&artifact, iteration)
                .await
                .map_err(collaborator("persistence", PipelineState::from(artifact.stage())))?;
        }
        ctx.store(artifact);
        Ok(())
    }

    fn manifest(
        &self,
        run: &Run,
        started_at: chrono::DateTime<chrono::Utc>,
        error: Option<&CarouselError>,
    ) -> RunManifest {
        RunManifest {
            run_id: run.id.to_string(),
            topic: run.ctx.topic().to_string(),
            started_at: started_at.to_rfc3339(),
            finished_at: chrono::Utc::now().to_rfc3339(),
            status: if error.is_some() { "failed" } else { "completed" }.to_string(),
            failure_kind: error.map(|e| e.kind().to_string()),
            error: error.map(|e| e.to_string()),
            verdict: run.ctx.require_review().ok().map(|r| r.verdict()),
            review_iterations: run.ctx.revision().iteration(),
            transitions: run.transitions.iter().map(|s| s.to_string()).collect(),
            unresolved: run.unresolved.clone(),
            usage: run.ctx.usage().clone(),
            total_usage: run.ctx.total_usage(),
            images: run.ctx.images().clone(),
        }
    }
}
