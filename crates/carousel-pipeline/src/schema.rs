//! Typed stage artifacts.
//!
//! One record per stage output, decoded from camelCase JSON. Every artifact has
//! a `check` method enforcing the constraints serde cannot express (slide
//! numbering, cross-references to the plan). Checks return a plain message;
//! the stage table wraps it into a `SchemaViolation` naming the stage.

use std::collections::BTreeSet;

use carousel_types::Stage;
use serde::{Deserialize, Serialize};

/// Upper bound on slides in one carousel.
pub const MAX_SLIDES: usize = 20;

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    /// High and medium findings gate advancement; low findings never do.
    pub fn blocks(self) -> bool {
        matches!(self, Severity::High | Severity::Medium)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rule evaluation result for one slide, or for a cross-slide aspect when
/// `slide_number` is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationFinding {
    pub rule_id: String,
    pub severity: Severity,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide_number: Option<u32>,
}

impl ValidationFinding {
    /// A failed finding at a severity that gates advancement.
    pub fn is_blocking(&self) -> bool {
        !self.passed && self.severity.blocks()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    NeedsRevision,
}

impl Verdict {
    /// The verdict implied by a set of findings.
    pub fn from_findings<'a>(findings: impl IntoIterator<Item = &'a ValidationFinding>) -> Self {
        if findings.into_iter().any(ValidationFinding::is_blocking) {
            Verdict::NeedsRevision
        } else {
            Verdict::Pass
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pass => f.write_str("pass"),
            Verdict::NeedsRevision => f.write_str("needs_revision"),
        }
    }
}

// ---------------------------------------------------------------------------
// Research
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyFact {
    pub claim: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchFindings {
    pub topic: String,
    pub summary: String,
    pub key_facts: Vec<KeyFact>,
    pub audience_insights: Vec<String>,
    pub angles: Vec<String>,
}

impl ResearchFindings {
    pub fn check(&self) -> Result<(), String> {
        if self.key_facts.is_empty() {
            return Err("research must contain at least one key fact".into());
        }
        Ok(())
    }

    /// Human-readable rendering written next to `research.json`.
    pub fn to_markdown(&self) -> String {
        let mut md = format!("# {}\n\n{}\n\n## Key facts\n\n", self.topic, self.summary);
        for fact in &self.key_facts {
            match &fact.source {
                Some(source) => md.push_str(&format!("- {} ({source})\n", fact.claim)),
                None => md.push_str(&format!("- {}\n", fact.claim)),
            }
        }
        if !self.audience_insights.is_empty() {
            md.push_str("\n## Audience insights\n\n");
            for insight in &self.audience_insights {
                md.push_str(&format!("- {insight}\n"));
            }
        }
        if !self.angles.is_empty() {
            md.push_str("\n## Angles\n\n");
            for angle in &self.angles {
                md.push_str(&format!("- {angle}\n"));
            }
        }
        md
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlideRole {
    Hook,
    Body,
    Cta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedSlide {
    pub slide_number: u32,
    pub role: SlideRole,
    pub pattern: String,
    pub key_message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPlan {
    pub title: String,
    pub hook: String,
    pub slides: Vec<PlannedSlide>,
}

impl ContentPlan {
    pub fn check(&self) -> Result<(), String> {
        let n = self.slides.len();
        if n == 0 || n > MAX_SLIDES {
            return Err(format!("plan must have 1 to {MAX_SLIDES} slides, got {n}"));
        }
        for (i, slide) in self.slides.iter().enumerate() {
            let expected = i as u32 + 1;
            if slide.slide_number != expected {
                return Err(format!(
                    "plan slides must be numbered 1..={n} in order; position {expected} has slideNumber {}",
                    slide.slide_number
                ));
            }
        }
        if self.slides[0].role != SlideRole::Hook {
            return Err("the first planned slide must have role 'hook'".into());
        }
        Ok(())
    }

    /// Slide numbers in plan order.
    pub fn slide_numbers(&self) -> BTreeSet<u32> {
        self.slides.iter().map(|s| s.slide_number).collect()
    }
}

/// Fails when `actual` does not name exactly the plan's slides.
fn check_covers_plan(
    what: &str,
    actual: impl IntoIterator<Item = u32>,
    plan: &ContentPlan,
) -> Result<(), String> {
    let mut seen = BTreeSet::new();
    for n in actual {
        if !seen.insert(n) {
            return Err(format!("{what} repeats slideNumber {n}"));
        }
    }
    let expected = plan.slide_numbers();
    if seen != expected {
        return Err(format!(
            "{what} slide numbers {:?} do not match the plan's {:?}",
            seen, expected
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Copy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopySlide {
    pub slide_number: u32,
    pub headline: String,
    pub body: Vec<String>,
    #[serde(default)]
    pub emphasis: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlideCopy {
    pub slides: Vec<CopySlide>,
    pub caption: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
}

impl SlideCopy {
    pub fn check(&self, plan: &ContentPlan) -> Result<(), String> {
        check_covers_plan("copy", self.slides.iter().map(|s| s.slide_number), plan)
    }
}

// ---------------------------------------------------------------------------
// Design brief
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Palette {
    pub background: String,
    pub surface: String,
    pub primary: String,
    pub accent: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typography {
    pub heading_font: String,
    pub body_font: String,
    pub heading_size_px: u32,
    pub body_size_px: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Temperature {
    Hot,
    Warm,
    Neutral,
    Cool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlideDesign {
    pub slide_number: u32,
    pub layout: String,
    pub temperature: Temperature,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignBrief {
    pub palette: Palette,
    pub typography: Typography,
    pub slides: Vec<SlideDesign>,
}

impl DesignBrief {
    pub fn check(&self, plan: &ContentPlan, min_font_px: u32) -> Result<(), String> {
        check_covers_plan("design", self.slides.iter().map(|s| s.slide_number), plan)?;
        let t = &self.typography;
        for (name, size) in [("headingSizePx", t.heading_size_px), ("bodySizePx", t.body_size_px)] {
            if size < min_font_px {
                return Err(format!(
                    "typography {name} is {size}px, below the {min_font_px}px minimum"
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuiltSlide {
    pub slide_number: u32,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutput {
    pub slides: Vec<BuiltSlide>,
}

impl BuildOutput {
    pub fn check(&self, plan: &ContentPlan) -> Result<(), String> {
        if self.slides.is_empty() {
            return Err("build produced no slides".into());
        }
        for slide in &self.slides {
            if slide.slide_number == 0 {
                return Err("slideNumber must be a positive integer".into());
            }
            if slide.content.trim().is_empty() {
                return Err(format!("slide {} has empty content", slide.slide_number));
            }
        }
        check_covers_plan("build", self.slides.iter().map(|s| s.slide_number), plan)
    }
}

// ---------------------------------------------------------------------------
// Review
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewReport {
    /// The reviewer's own claim. Advisory only: [`ReviewReport::verdict`] is
    /// computed from the findings.
    #[serde(
        default,
        deserialize_with = "lenient_verdict",
        skip_serializing_if = "Option::is_none"
    )]
    pub verdict: Option<Verdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub findings: Vec<ValidationFinding>,
}

/// Reads the reviewer's verdict without failing the report. Case and
/// separators are ignored; anything unrecognized becomes `None`.
fn lenient_verdict<'de, D>(deserializer: D) -> Result<Option<Verdict>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    let Some(raw) = raw else { return Ok(None) };
    let normalized = raw
        .as_str()
        .map(|s| s.trim().to_ascii_lowercase().replace(['-', ' '], "_"));
    match normalized.as_deref() {
        Some("pass") => Ok(Some(Verdict::Pass)),
        Some("needs_revision") => Ok(Some(Verdict::NeedsRevision)),
        _ => {
            tracing::warn!(verdict = %raw, "ignoring unrecognized review verdict");
            Ok(None)
        }
    }
}

impl ReviewReport {
    pub fn check(&self, build: &BuildOutput) -> Result<(), String> {
        let built: BTreeSet<u32> = build.slides.iter().map(|s| s.slide_number).collect();
        for finding in &self.findings {
            if let Some(n) = finding.slide_number {
                if !built.contains(&n) {
                    return Err(format!(
                        "finding '{}' names slide {n}, which was not built",
                        finding.rule_id
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn verdict(&self) -> Verdict {
        Verdict::from_findings(&self.findings)
    }

    pub fn blocking(&self) -> impl Iterator<Item = &ValidationFinding> {
        self.findings.iter().filter(|f| f.is_blocking())
    }
}

// ---------------------------------------------------------------------------
// StageArtifact
// ---------------------------------------------------------------------------

/// The typed output of one stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageArtifact {
    Research(ResearchFindings),
    Plan(ContentPlan),
    Copy(SlideCopy),
    Design(DesignBrief),
    Build(BuildOutput),
    Review(ReviewReport),
}

impl StageArtifact {
    pub fn stage(&self) -> Stage {
        match self {
            StageArtifact::Research(_) => Stage::Research,
            StageArtifact::Plan(_) => Stage::Plan,
            StageArtifact::Copy(_) => Stage::Copy,
            StageArtifact::Design(_) => Stage::Design,
            StageArtifact::Build(_) => Stage::Build,
            StageArtifact::Review(_) => Stage::Review,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            StageArtifact::Research(a) => serde_json::to_value(a),
            StageArtifact::Plan(a) => serde_json::to_value(a),
            StageArtifact::Copy(a) => serde_json::to_value(a),
            StageArtifact::Design(a) => serde_json::to_value(a),
            StageArtifact::Build(a) => serde_json::to_value(a),
            StageArtifact::Review(a) => serde_json::to_value(a),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan_of(n: u32) -> ContentPlan {
        ContentPlan {
            title: "t".into(),
            hook: "h".into(),
            slides: (1..=n)
                .map(|i| PlannedSlide {
                    slide_number: i,
                    role: if i == 1 { SlideRole::Hook } else { SlideRole::Body },
                    pattern: "list".into(),
                    key_message: format!("m{i}"),
                })
                .collect(),
        }
    }

    fn finding(severity: Severity, passed: bool) -> ValidationFinding {
        ValidationFinding {
            rule_id: "r".into(),
            severity,
            passed,
            detail: None,
            slide_number: None,
        }
    }

    #[test]
    fn blocking_requires_failure_at_high_or_medium() {
        assert!(finding(Severity::High, false).is_blocking());
        assert!(finding(Severity::Medium, false).is_blocking());
        assert!(!finding(Severity::Low, false).is_blocking());
        assert!(!finding(Severity::High, true).is_blocking());
    }

    #[test]
    fn verdict_is_derived_from_findings() {
        let report = ReviewReport {
            verdict: Some(Verdict::Pass),
            summary: None,
            findings: vec![finding(Severity::Low, false), finding(Severity::Medium, false)],
        };
        assert_eq!(report.verdict(), Verdict::NeedsRevision);

        let report = ReviewReport {
            verdict: Some(Verdict::NeedsRevision),
            summary: None,
            findings: vec![finding(Severity::Low, false)],
        };
        assert_eq!(report.verdict(), Verdict::Pass);
    }

    #[test]
    fn verdict_spelling_is_lenient() {
        let decode = |verdict: serde_json::Value| -> ReviewReport {
            serde_json::from_value(json!({ "verdict": verdict, "findings": [] })).unwrap()
        };
        assert_eq!(decode(json!("PASS")).verdict, Some(Verdict::Pass));
        assert_eq!(decode(json!(" Needs-Revision ")).verdict, Some(Verdict::NeedsRevision));
        assert_eq!(decode(json!("needs revision")).verdict, Some(Verdict::NeedsRevision));
        assert_eq!(decode(json!(null)).verdict, None);
    }

    #[test]
    fn unknown_verdict_does_not_fail_the_report() {
        let report: ReviewReport = serde_json::from_value(json!({
            "verdict": "approved",
            "findings": [{ "ruleId": "r", "severity": "medium", "passed": false }]
        }))
        .unwrap();
        assert_eq!(report.verdict, None);
        assert_eq!(report.verdict(), Verdict::NeedsRevision);

        let report: ReviewReport =
            serde_json::from_value(json!({ "verdict": 3, "findings": [] })).unwrap();
        assert_eq!(report.verdict, None);
        assert_eq!(report.verdict(), Verdict::Pass);
    }

    #[test]
    fn finding_decodes_from_camel_case() {
        let f: ValidationFinding = serde_json::from_value(json!({
            "ruleId": "min_font_size",
            "severity": "high",
            "passed": false,
            "detail": "14px",
            "slideNumber": 2
        }))
        .unwrap();
        assert_eq!(f.rule_id, "min_font_size");
        assert_eq!(f.slide_number, Some(2));
    }

    #[test]
    fn build_decode_rejects_missing_content() {
        let err = serde_json::from_value::<BuildOutput>(json!({
            "slides": [{ "slideNumber": 1 }]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("content"));
    }

    #[test]
    fn plan_numbering_and_first_role() {
        assert!(plan_of(3).check().is_ok());

        let mut plan = plan_of(3);
        plan.slides[2].slide_number = 5;
        assert!(plan.check().unwrap_err().contains("numbered"));

        let mut plan = plan_of(2);
        plan.slides[0].role = SlideRole::Body;
        assert!(plan.check().unwrap_err().contains("hook"));

        assert!(plan_of(0).check().is_err());
        assert!(plan_of(MAX_SLIDES as u32 + 1).check().is_err());
    }

    #[test]
    fn build_must_cover_plan_exactly() {
        let plan = plan_of(2);
        let build = |numbers: &[u32]| BuildOutput {
            slides: numbers
                .iter()
                .map(|&n| BuiltSlide {
                    slide_number: n,
                    content: "<html></html>".into(),
                })
                .collect(),
        };
        assert!(build(&[2, 1]).check(&plan).is_ok());
        assert!(build(&[1]).check(&plan).is_err());
        assert!(build(&[1, 1]).check(&plan).unwrap_err().contains("repeats"));
        assert!(build(&[0, 1]).check(&plan).unwrap_err().contains("positive"));
        assert!(build(&[]).check(&plan).is_err());
    }

    #[test]
    fn design_typography_respects_minimum_font() {
        let plan = plan_of(1);
        let mut brief = DesignBrief {
            palette: Palette {
                background: "#fff".into(),
                surface: "#eee".into(),
                primary: "#111".into(),
                accent: "#f00".into(),
                text: "#000".into(),
            },
            typography: Typography {
                heading_font: "Pretendard".into(),
                body_font: "Pretendard".into(),
                heading_size_px: 64,
                body_size_px: 28,
            },
            slides: vec![SlideDesign {
                slide_number: 1,
                layout: "center".into(),
                temperature: Temperature::Hot,
                notes: None,
            }],
        };
        assert!(brief.check(&plan, 20).is_ok());
        brief.typography.body_size_px = 16;
        assert!(brief.check(&plan, 20).unwrap_err().contains("bodySizePx"));
    }

    #[test]
    fn review_findings_must_name_built_slides() {
        let build = BuildOutput {
            slides: vec![BuiltSlide {
                slide_number: 1,
                content: "x".into(),
            }],
        };
        let mut f = finding(Severity::High, false);
        f.slide_number = Some(4);
        let report = ReviewReport {
            verdict: None,
            summary: None,
            findings: vec![f],
        };
        assert!(report.check(&build).unwrap_err().contains("slide 4"));
    }

    #[test]
    fn research_markdown_lists_facts_with_sources() {
        let research = ResearchFindings {
            topic: "Sleep".into(),
            summary: "Why sleep matters.".into(),
            key_facts: vec![KeyFact {
                claim: "Adults need 7+ hours".into(),
                source: Some("CDC".into()),
            }],
            audience_insights: vec![],
            angles: vec!["myth busting".into()],
        };
        let md = research.to_markdown();
        assert!(md.starts_with("# Sleep"));
        assert!(md.contains("- Adults need 7+ hours (CDC)"));
        assert!(md.contains("## Angles"));
        assert!(!md.contains("## Audience insights"));
    }
}
