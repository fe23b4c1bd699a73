//! Structural slide validation: markup rules and reports.
//!
//! Provides 11 built-in rules checked against each slide's HTML. Call
//! [`validate_all_slides`] for a report over every slide, or build a
//! [`SlideValidator`] once and reuse it. Rules are pure and run in a fixed
//! order so reports are deterministic.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::schema::{Severity, ValidationFinding, Verdict};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Thresholds the rules check against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub min_font_px: u32,
    pub tall_block_px: u32,
    pub max_bullets: usize,
    pub max_bold: usize,
    pub max_highlights: usize,
    pub line_break_declaration: String,
    pub locale: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            canvas_width: 1080,
            canvas_height: 1350,
            min_font_px: 20,
            tall_block_px: 800,
            max_bullets: 6,
            max_bold: 3,
            max_highlights: 2,
            line_break_declaration: "word-break: keep-all".into(),
            locale: "ko".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// SlideRule trait
// ---------------------------------------------------------------------------

/// Outcome of one rule on one slide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub passed: bool,
    pub detail: Option<String>,
}

impl Check {
    pub fn pass() -> Self {
        Self {
            passed: true,
            detail: None,
        }
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: Some(detail.into()),
        }
    }
}

pub trait SlideRule: Send + Sync {
    fn id(&self) -> &'static str;
    fn severity(&self) -> Severity;
    fn check(&self, html: &str, slide_number: u32) -> Check;
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("built-in slide rule pattern must compile")
}

static WIDTH_PX: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)(?:^|[^-\w])width\s*:\s*(\d+(?:\.\d+)?)px"));
static HEIGHT_PX: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)(?:^|[^-\w])height\s*:\s*(\d+(?:\.\d+)?)px"));
static OVERFLOW_HIDDEN: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)overflow\s*:\s*hidden"));
static OVERFLOW_SCROLLABLE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)overflow(?:-[xy])?\s*:\s*(auto|scroll)"));
static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)<li\b"));
static EXTERNAL_REF: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r#"(?i)(?:\b(?:src|href)\s*=\s*["']?\s*|url\(\s*["']?\s*|@import\s+["']?\s*)((?:https?:)?//[^"'\s)>]*)"#,
    )
});
static FONT_SIZE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)font-size\s*:\s*(\d+(?:\.\d+)?|\.\d+)(px|pt|rem|em)\b"));
static FONT_SHORTHAND: LazyLock<Regex> =
    LazyLock::new(|| pattern(r#"(?i)(?:^|[^-\w])font\s*:\s*([^;}"']*)"#));
static FONT_LENGTH: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)(?:^|[\s/])(\d+(?:\.\d+)?|\.\d+)(px|pt|rem|em)\b"));
static FOOTER: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r#"(?i)<footer\b|class\s*=\s*["'][^"']*\bfooter\b"#)
});
static BOLD: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)<(?:strong|b)\b"));
static HIGHLIGHT: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r#"(?i)<mark\b|class\s*=\s*["'][^"']*\bhighlight\b"#)
});
static DOCTYPE: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)<!doctype\s+html"));
static HTML_LANG: LazyLock<Regex> =
    LazyLock::new(|| pattern(r#"(?i)<html\b[^>]*\blang\s*=\s*["']?([A-Za-z-]+)"#));

/// Every `Npx` value captured by `re`, in document order.
fn px_values(re: &Regex, html: &str) -> Vec<f64> {
    re.captures_iter(html)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .collect()
}

/// Root font size that `rem` and `em` resolve against.
const ROOT_FONT_PX: f64 = 16.0;

fn to_px(value: f64, unit: &str) -> f64 {
    match unit.to_ascii_lowercase().as_str() {
        "pt" => value * 4.0 / 3.0,
        "rem" | "em" => value * ROOT_FONT_PX,
        _ => value,
    }
}

/// Every declared font size as `(as written, px)`, from both `font-size`
/// and the `font` shorthand. In the shorthand the size is the first length;
/// anything after a `/` is line height.
fn font_sizes(html: &str) -> Vec<(String, f64)> {
    let mut sizes = Vec::new();
    let mut push = |caps: regex::Captures<'_>| {
        let (Some(num), Some(unit)) = (caps.get(1), caps.get(2)) else {
            return;
        };
        if let Ok(value) = num.as_str().parse::<f64>() {
            sizes.push((
                format!("{}{}", num.as_str(), unit.as_str()),
                to_px(value, unit.as_str()),
            ));
        }
    };
    for caps in FONT_SIZE.captures_iter(html) {
        push(caps);
    }
    for decl in FONT_SHORTHAND.captures_iter(html) {
        let Some(value) = decl.get(1) else { continue };
        if let Some(caps) = FONT_LENGTH.captures(value.as_str()) {
            push(caps);
        }
    }
    sizes
}

fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct CanvasSizeRule {
    width: u32,
    height: u32,
}
impl SlideRule for CanvasSizeRule {
    fn id(&self) -> &'static str { "canvas_size" }
    fn severity(&self) -> Severity { Severity::High }
    fn check(&self, html: &str, _slide: u32) -> Check {
        let has_width = px_values(&WIDTH_PX, html).contains(&f64::from(self.width));
        let has_height = px_values(&HEIGHT_PX, html).contains(&f64::from(self.height));
        if has_width && has_height {
            Check::pass()
        } else {
            Check::fail(format!(
                "canvas must declare width: {}px and height: {}px",
                self.width, self.height
            ))
        }
    }
}

struct OverflowHiddenRule;
impl SlideRule for OverflowHiddenRule {
    fn id(&self) -> &'static str { "overflow_hidden" }
    fn severity(&self) -> Severity { Severity::High }
    fn check(&self, html: &str, _slide: u32) -> Check {
        if OVERFLOW_HIDDEN.is_match(html) {
            Check::pass()
        } else {
            Check::fail("no overflow: hidden declaration; content may spill past the canvas")
        }
    }
}

struct ScrollOverflowRule {
    canvas_height: u32,
    tall_block_px: u32,
    max_bullets: usize,
}
impl SlideRule for ScrollOverflowRule {
    fn id(&self) -> &'static str { "scroll_overflow" }
    fn severity(&self) -> Severity { Severity::High }
    fn check(&self, html: &str, _slide: u32) -> Check {
        if let Some(m) = OVERFLOW_SCROLLABLE.find(html) {
            return Check::fail(format!("scrollable region declared ({})", m.as_str()));
        }
        let bullets = LIST_ITEM.find_iter(html).count();
        // The canvas itself is exempt; blocks taller than it are not.
        let tall = px_values(&HEIGHT_PX, html).into_iter().find(|&h| {
            h >= f64::from(self.tall_block_px) && h != f64::from(self.canvas_height)
        });
        match tall {
            Some(h) if bullets > self.max_bullets => Check::fail(format!(
                "{bullets} list items inside a fixed {h}px block will overflow (limit {})",
                self.max_bullets
            )),
            _ => Check::pass(),
        }
    }
}

struct LineBreakRule {
    declaration: String,
}
impl SlideRule for LineBreakRule {
    fn id(&self) -> &'static str { "line_break" }
    fn severity(&self) -> Severity { Severity::High }
    fn check(&self, html: &str, _slide: u32) -> Check {
        if squash(html).contains(&squash(&self.declaration)) {
            Check::pass()
        } else {
            Check::fail(format!("missing `{}`", self.declaration))
        }
    }
}

struct ExternalResourcesRule;
impl SlideRule for ExternalResourcesRule {
    fn id(&self) -> &'static str { "external_resources" }
    fn severity(&self) -> Severity { Severity::High }
    fn check(&self, html: &str, _slide: u32) -> Check {
        let refs: Vec<&str> = EXTERNAL_REF
            .captures_iter(html)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        if refs.is_empty() {
            Check::pass()
        } else {
            Check::fail(format!("external references: {}", refs.join(", ")))
        }
    }
}

struct MinFontSizeRule {
    min_px: u32,
}
impl SlideRule for MinFontSizeRule {
    fn id(&self) -> &'static str { "min_font_size" }
    fn severity(&self) -> Severity { Severity::High }
    fn check(&self, html: &str, _slide: u32) -> Check {
        let small: Vec<String> = font_sizes(html)
            .into_iter()
            .filter(|&(_, px)| px < f64::from(self.min_px))
            .map(|(written, px)| {
                if written.to_ascii_lowercase().ends_with("px") {
                    written
                } else {
                    format!("{written} ({}px)", (px * 100.0).round() / 100.0)
                }
            })
            .collect();
        if small.is_empty() {
            Check::pass()
        } else {
            Check::fail(format!(
                "font-size below {}px minimum: {}",
                self.min_px,
                small.join(", ")
            ))
        }
    }
}

struct FooterRule;
impl SlideRule for FooterRule {
    fn id(&self) -> &'static str { "footer" }
    fn severity(&self) -> Severity { Severity::Medium }
    fn check(&self, html: &str, _slide: u32) -> Check {
        if FOOTER.is_match(html) {
            Check::pass()
        } else {
            Check::fail("no footer element")
        }
    }
}

struct BoldLimitRule {
    max: usize,
}
impl SlideRule for BoldLimitRule {
    fn id(&self) -> &'static str { "bold_limit" }
    fn severity(&self) -> Severity { Severity::Medium }
    fn check(&self, html: &str, _slide: u32) -> Check {
        let count = BOLD.find_iter(html).count();
        if count <= self.max {
            Check::pass()
        } else {
            Check::fail(format!("{count} bold elements (limit {})", self.max))
        }
    }
}

struct HighlightLimitRule {
    max: usize,
}
impl SlideRule for HighlightLimitRule {
    fn id(&self) -> &'static str { "highlight_limit" }
    fn severity(&self) -> Severity { Severity::Medium }
    fn check(&self, html: &str, _slide: u32) -> Check {
        let count = HIGHLIGHT.find_iter(html).count();
        if count <= self.max {
            Check::pass()
        } else {
            Check::fail(format!("{count} highlighted elements (limit {})", self.max))
        }
    }
}

struct DoctypeRule;
impl SlideRule for DoctypeRule {
    fn id(&self) -> &'static str { "doctype" }
    fn severity(&self) -> Severity { Severity::Medium }
    fn check(&self, html: &str, _slide: u32) -> Check {
        if DOCTYPE.is_match(html) {
            Check::pass()
        } else {
            Check::fail("missing <!DOCTYPE html>")
        }
    }
}

struct LangAttributeRule {
    locale: String,
}
impl SlideRule for LangAttributeRule {
    fn id(&self) -> &'static str { "lang_attribute" }
    fn severity(&self) -> Severity { Severity::Low }
    fn check(&self, html: &str, _slide: u32) -> Check {
        match HTML_LANG.captures(html).and_then(|c| c.get(1)) {
            Some(lang) if lang.as_str().eq_ignore_ascii_case(&self.locale) => Check::pass(),
            Some(lang) => Check::fail(format!(
                "<html lang=\"{}\"> should be lang=\"{}\"",
                lang.as_str(),
                self.locale
            )),
            None => Check::fail(format!("<html> has no lang=\"{}\" attribute", self.locale)),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlideReport {
    pub slide_number: u32,
    pub findings: Vec<ValidationFinding>,
}

impl SlideReport {
    pub fn failures(&self) -> impl Iterator<Item = &ValidationFinding> {
        self.findings.iter().filter(|f| !f.passed)
    }
}

/// Per-slide findings plus failure counts by severity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub slides: Vec<SlideReport>,
    pub high_count: usize,
    pub medium_count: usize,
    pub low_count: usize,
}

impl ValidationReport {
    fn from_slides(slides: Vec<SlideReport>) -> Self {
        let mut report = Self {
            slides,
            ..Self::default()
        };
        for f in report.slides.iter().flat_map(|s| s.failures()) {
            match f.severity {
                Severity::High => report.high_count += 1,
                Severity::Medium => report.medium_count += 1,
                Severity::Low => report.low_count += 1,
            }
        }
        report
    }

    /// Low-severity failures never block.
    pub fn all_passed(&self) -> bool {
        self.high_count == 0 && self.medium_count == 0
    }

    pub fn verdict(&self) -> Verdict {
        if self.all_passed() {
            Verdict::Pass
        } else {
            Verdict::NeedsRevision
        }
    }

    /// Failed findings across all slides, in slide then rule order.
    pub fn failures(&self) -> Vec<ValidationFinding> {
        self.slides
            .iter()
            .flat_map(|s| s.failures())
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// The built-in rule set, configured once.
pub struct SlideValidator {
    rules: Vec<Box<dyn SlideRule>>,
}

impl SlideValidator {
    pub fn new(config: &ValidationConfig) -> Self {
        let rules: Vec<Box<dyn SlideRule>> = vec![
            Box::new(CanvasSizeRule {
                width: config.canvas_width,
                height: config.canvas_height,
            }),
            Box::new(OverflowHiddenRule),
            Box::new(ScrollOverflowRule {
                canvas_height: config.canvas_height,
                tall_block_px: config.tall_block_px,
                max_bullets: config.max_bullets,
            }),
            Box::new(LineBreakRule {
                declaration: config.line_break_declaration.clone(),
            }),
            Box::new(ExternalResourcesRule),
            Box::new(MinFontSizeRule {
                min_px: config.min_font_px,
            }),
            Box::new(FooterRule),
            Box::new(BoldLimitRule {
                max: config.max_bold,
            }),
            Box::new(HighlightLimitRule {
                max: config.max_highlights,
            }),
            Box::new(DoctypeRule),
            Box::new(LangAttributeRule {
                locale: config.locale.clone(),
            }),
        ];
        Self { rules }
    }

    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    /// One finding per rule, passed or not, in declared rule order.
    pub fn validate_slide(&self, slide_number: u32, html: &str) -> SlideReport {
        let findings = self
            .rules
            .iter()
            .map(|rule| {
                let check = rule.check(html, slide_number);
                ValidationFinding {
                    rule_id: rule.id().to_string(),
                    severity: rule.severity(),
                    passed: check.passed,
                    detail: check.detail,
                    slide_number: Some(slide_number),
                }
            })
            .collect();
        SlideReport {
            slide_number,
            findings,
        }
    }

    /// Reports in ascending slide-number order.
    pub fn validate_all(&self, slides: &BTreeMap<u32, String>) -> ValidationReport {
        ValidationReport::from_slides(
            slides
                .iter()
                .map(|(&n, html)| self.validate_slide(n, html))
                .collect(),
        )
    }
}

impl Default for SlideValidator {
    fn default() -> Self {
        Self::new(&ValidationConfig::default())
    }
}

/// Run all built-in rules over every slide.
pub fn validate_all_slides(
    slides: &BTreeMap<u32, String>,
    config: &ValidationConfig,
) -> ValidationReport {
    SlideValidator::new(config).validate_all(slides)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
