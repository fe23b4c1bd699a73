//! Stage descriptors: instructions, input projection, and decoding.
//!
//! Each stage is a row in [`STAGES`], looked up by [`Stage::index`]. The
//! projection reads upstream artifacts through the context's `require_*`
//! accessors, so running a stage out of order fails with `MissingArtifact`
//! before anything is sent to the generator.

use carousel_types::{CarouselError, Result, Stage};
use serde_json::{json, Value};

use crate::config::PipelineConfig;
use crate::context::PipelineContext;
use crate::extract::decode;
use crate::narrative::narrative_findings;
use crate::schema::{
    BuildOutput, ContentPlan, DesignBrief, ResearchFindings, ReviewReport, SlideCopy,
    StageArtifact,
};

type Project = fn(&PipelineContext, &PipelineConfig) -> Result<Value>;
type Decode = fn(&str, &PipelineContext, &PipelineConfig) -> Result<StageArtifact>;

pub struct StageDescriptor {
    pub stage: Stage,
    pub instructions: &'static str,
    /// Context to request payload.
    pub project: Project,
    /// Raw generator text to typed, checked artifact.
    pub decode: Decode,
}

pub static STAGES: [StageDescriptor; 6] = [
    StageDescriptor {
        stage: Stage::Research,
        instructions: RESEARCH_INSTRUCTIONS,
        project: project_research,
        decode: decode_research,
    },
    StageDescriptor {
        stage: Stage::Plan,
        instructions: PLAN_INSTRUCTIONS,
        project: project_plan,
        decode: decode_plan,
    },
    StageDescriptor {
        stage: Stage::Copy,
        instructions: COPY_INSTRUCTIONS,
        project: project_copy,
        decode: decode_copy,
    },
    StageDescriptor {
        stage: Stage::Design,
        instructions: DESIGN_INSTRUCTIONS,
        project: project_design,
        decode: decode_design,
    },
    StageDescriptor {
        stage: Stage::Build,
        instructions: BUILD_INSTRUCTIONS,
        project: project_build,
        decode: decode_build,
    },
    StageDescriptor {
        stage: Stage::Review,
        instructions: REVIEW_INSTRUCTIONS,
        project: project_review,
        decode: decode_review,
    },
];

pub fn descriptor(stage: Stage) -> &'static StageDescriptor {
    &STAGES[stage.index()]
}

fn violation(stage: Stage) -> impl FnOnce(String) -> CarouselError {
    move |message| CarouselError::SchemaViolation { stage, message }
}

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

const RESEARCH_INSTRUCTIONS: &str = "\
You research a topic for an Instagram carousel. Respond with one JSON object only:
{\"topic\": string, \"summary\": string, \"keyFacts\": [{\"claim\": string, \"source\": string?}],
 \"audienceInsights\": [string], \"angles\": [string]}
Include at least one key fact.";

const PLAN_INSTRUCTIONS: &str = "\
You plan a carousel from research. Respond with one JSON object only:
{\"title\": string, \"hook\": string, \"slides\": [{\"slideNumber\": integer, \"role\": \"hook\"|\"body\"|\"cta\",
 \"pattern\": string, \"keyMessage\": string}]}
Number slides 1..n in order, at most 20. The first slide is the hook. Avoid the same pattern on more than two consecutive slides.";

const COPY_INSTRUCTIONS: &str = "\
You write the copy for every planned slide. Respond with one JSON object only:
{\"slides\": [{\"slideNumber\": integer, \"headline\": string, \"body\": [string], \"emphasis\": [string]}],
 \"caption\": string, \"hashtags\": [string]}
Cover exactly the planned slide numbers.";

const DESIGN_INSTRUCTIONS: &str = "\
You write the visual design brief. Respond with one JSON object only:
{\"palette\": {\"background\", \"surface\", \"primary\", \"accent\", \"text\"},
 \"typography\": {\"headingFont\": string, \"bodyFont\": string, \"headingSizePx\": integer, \"bodySizePx\": integer},
 \"slides\": [{\"slideNumber\": integer, \"layout\": string, \"temperature\": \"hot\"|\"warm\"|\"neutral\"|\"cool\", \"notes\": string?}]}
Cover exactly the planned slide numbers. Vary temperature so no value repeats on more than two consecutive slides.";

const BUILD_INSTRUCTIONS: &str = "\
You build one self-contained HTML document per slide. Respond with one JSON object only:
{\"slides\": [{\"slideNumber\": integer, \"content\": string}]}
Every document must satisfy the constraints in the request. No external URLs; embed assets as data: URIs.
When issues are listed, fix every one of them and return the full set of slides.";

const REVIEW_INSTRUCTIONS: &str = "\
You review built slides against the plan and design. Respond with one JSON object only:
{\"verdict\": \"pass\"|\"needs_revision\", \"summary\": string,
 \"findings\": [{\"ruleId\": string, \"severity\": \"high\"|\"medium\"|\"low\", \"passed\": boolean, \"detail\": string?, \"slideNumber\": integer?}]}
Judge narrative flow and content consistency. Advisories list repetition detected mechanically; confirm or dismiss each.";

// ---------------------------------------------------------------------------
// Projections
// ---------------------------------------------------------------------------

fn project_research(ctx: &PipelineContext, config: &PipelineConfig) -> Result<Value> {
    Ok(json!({
        "topic": ctx.topic(),
        "locale": config.validation.locale,
    }))
}

fn project_plan(ctx: &PipelineContext, _config: &PipelineConfig) -> Result<Value> {
    Ok(json!({
        "topic": ctx.topic(),
        "research": ctx.require_research()?,
    }))
}

fn project_copy(ctx: &PipelineContext, config: &PipelineConfig) -> Result<Value> {
    let research = ctx.require_research()?;
    Ok(json!({
        "plan": ctx.require_plan()?,
        "keyFacts": research.key_facts,
        "locale": config.validation.locale,
    }))
}

fn project_design(ctx: &PipelineContext, config: &PipelineConfig) -> Result<Value> {
    Ok(json!({
        "plan": ctx.require_plan()?,
        "copy": ctx.require_copy()?,
        "minFontPx": config.validation.min_font_px,
    }))
}

fn project_build(ctx: &PipelineContext, config: &PipelineConfig) -> Result<Value> {
    let v = &config.validation;
    let mut payload = json!({
        "plan": ctx.require_plan()?,
        "copy": ctx.require_copy()?,
        "design": ctx.require_design()?,
        "constraints": {
            "canvas": { "widthPx": v.canvas_width, "heightPx": v.canvas_height },
            "overflow": "hidden",
            "lineBreak": v.line_break_declaration,
            "minFontPx": v.min_font_px,
            "maxBullets": v.max_bullets,
            "maxBold": v.max_bold,
            "maxHighlights": v.max_highlights,
            "footer": "required",
            "doctype": "required",
            "lang": v.locale,
        },
    });
    if !ctx.issues().is_empty() {
        payload["previousSlides"] = json!(ctx.require_build()?.slides);
        payload["issues"] = json!(ctx.issues());
    }
    Ok(payload)
}

fn project_review(ctx: &PipelineContext, _config: &PipelineConfig) -> Result<Value> {
    let plan = ctx.require_plan()?;
    let design = ctx.require_design()?;
    let structural = ctx
        .structural()
        .map(|report| report.failures())
        .unwrap_or_default();
    Ok(json!({
        "plan": plan,
        "design": design,
        "slides": ctx.require_build()?.slides,
        "structuralFindings": structural,
        "advisories": narrative_findings(plan, design)
            .into_iter()
            .filter(|f| !f.passed)
            .collect::<Vec<_>>(),
    }))
}

// ---------------------------------------------------------------------------
// Decoders
// ---------------------------------------------------------------------------

fn decode_research(text: &str, _ctx: &PipelineContext, _c: &PipelineConfig) -> Result<StageArtifact> {
    let research: ResearchFindings = decode(Stage::Research, text)?;
    research.check().map_err(violation(Stage::Research))?;
    Ok(StageArtifact::Research(research))
}

fn decode_plan(text: &str, _ctx: &PipelineContext, _c: &PipelineConfig) -> Result<StageArtifact> {
    let plan: ContentPlan = decode(Stage::Plan, text)?;
    plan.check().map_err(violation(Stage::Plan))?;
    Ok(StageArtifact::Plan(plan))
}

fn decode_copy(text: &str, ctx: &PipelineContext, _c: &PipelineConfig) -> Result<StageArtifact> {
    let copy: SlideCopy = decode(Stage::Copy, text)?;
    copy.check(ctx.require_plan()?).map_err(violation(Stage::Copy))?;
    Ok(StageArtifact::Copy(copy))
}

fn decode_design(text: &str, ctx: &PipelineContext, config: &PipelineConfig) -> Result<StageArtifact> {
    let design: DesignBrief = decode(Stage::Design, text)?;
    design
        .check(ctx.require_plan()?, config.validation.min_font_px)
        .map_err(violation(Stage::Design))?;
    Ok(StageArtifact::Design(design))
}

fn decode_build(text: &str, ctx: &PipelineContext, _c: &PipelineConfig) -> Result<StageArtifact> {
    let build: BuildOutput = decode(Stage::Build, text)?;
    build.check(ctx.require_plan()?).map_err(violation(Stage::Build))?;
    Ok(StageArtifact::Build(build))
}

fn decode_review(text: &str, ctx: &PipelineContext, _c: &PipelineConfig) -> Result<StageArtifact> {
    let review: ReviewReport = decode(Stage::Review, text)?;
    review.check(ctx.require_build()?).map_err(violation(Stage::Review))?;
    Ok(StageArtifact::Review(review))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BuiltSlide, Severity, ValidationFinding};

    const PLAN: &str = r#"{"title":"T","hook":"H","slides":[
        {"slideNumber":1,"role":"hook","pattern":"question","keyMessage":"a"},
        {"slideNumber":2,"role":"cta","pattern":"list","keyMessage":"b"}]}"#;

    fn ctx_with_plan() -> PipelineContext {
        let mut ctx = PipelineContext::new("수면", 3);
        let config = PipelineConfig::default();
        let plan = (descriptor(Stage::Plan).decode)(PLAN, &ctx, &config).unwrap();
        ctx.store(plan);
        ctx
    }

    #[test]
    fn table_is_indexed_by_stage() {
        for stage in Stage::ALL {
            assert_eq!(descriptor(stage).stage, stage);
            assert!(!descriptor(stage).instructions.is_empty());
        }
    }

    #[test]
    fn projections_fail_fast_on_missing_upstream() {
        let ctx = PipelineContext::new("topic", 3);
        let config = PipelineConfig::default();
        let expected = [
            (Stage::Plan, Stage::Research),
            (Stage::Copy, Stage::Research),
            (Stage::Design, Stage::Plan),
            (Stage::Build, Stage::Plan),
            (Stage::Review, Stage::Plan),
        ];
        for (stage, missing) in expected {
            match (descriptor(stage).project)(&ctx, &config) {
                Err(CarouselError::MissingArtifact { stage: s }) => assert_eq!(s, missing),
                other => panic!("{stage}: expected MissingArtifact, got {other:?}"),
            }
        }
        assert!((descriptor(Stage::Research).project)(&ctx, &config).is_ok());
    }

    #[test]
    fn fenced_plan_decodes() {
        let ctx = PipelineContext::new("t", 3);
        let text = format!("Here you go:\n```json\n{PLAN}\n```");
        let artifact = (descriptor(Stage::Plan).decode)(&text, &ctx, &PipelineConfig::default()).unwrap();
        assert_eq!(artifact.stage(), Stage::Plan);
    }

    #[test]
    fn build_decode_checks_against_plan() {
        let ctx = ctx_with_plan();
        let config = PipelineConfig::default();
        let err = (descriptor(Stage::Build).decode)(
            r#"{"slides":[{"slideNumber":1,"content":"<html></html>"}]}"#,
            &ctx,
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, CarouselError::SchemaViolation { stage: Stage::Build, .. }));
    }

    #[test]
    fn copy_decode_requires_plan() {
        let ctx = PipelineContext::new("t", 3);
        let err = (descriptor(Stage::Copy).decode)(
            r#"{"slides":[],"caption":"c","hashtags":[]}"#,
            &ctx,
            &PipelineConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CarouselError::MissingArtifact { stage: Stage::Plan }));
    }

    #[test]
    fn build_projection_carries_issues_on_revision() {
        let mut ctx = ctx_with_plan();
        let config = PipelineConfig::default();
        ctx.store(StageArtifact::Copy(SlideCopy {
            slides: vec![],
            caption: String::new(),
            hashtags: vec![],
        }));
        ctx.store(StageArtifact::Design(DesignBrief {
            palette: crate::schema::Palette {
                background: "#fff".into(),
                surface: "#fff".into(),
                primary: "#000".into(),
                accent: "#f00".into(),
                text: "#000".into(),
            },
            typography: crate::schema::Typography {
                heading_font: "a".into(),
                body_font: "b".into(),
                heading_size_px: 48,
                body_size_px: 24,
            },
            slides: vec![],
        }));

        let first = (descriptor(Stage::Build).project)(&ctx, &config).unwrap();
        assert!(first.get("issues").is_none());
        assert_eq!(first["constraints"]["minFontPx"], 20);

        ctx.store(StageArtifact::Build(BuildOutput {
            slides: vec![BuiltSlide {
                slide_number: 1,
                content: "<html></html>".into(),
            }],
        }));
        ctx.push_issues([ValidationFinding {
            rule_id: "min_font_size".into(),
            severity: Severity::High,
            passed: false,
            detail: Some("14px".into()),
            slide_number: Some(1),
        }]);
        let revision = (descriptor(Stage::Build).project)(&ctx, &config).unwrap();
        assert_eq!(revision["issues"][0]["ruleId"], "min_font_size");
        assert_eq!(revision["previousSlides"][0]["slideNumber"], 1);
    }
}
