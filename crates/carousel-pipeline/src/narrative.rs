//! Cross-slide narrative checks over the plan and design brief.
//!
//! These need judgment to act on, so their findings go to the reviewer as
//! advisory input. The orchestrator never gates on them directly.

use crate::schema::{ContentPlan, DesignBrief, Severity, ValidationFinding};

/// Longest allowed run of consecutive slides sharing a pattern or temperature.
pub const MAX_CONSECUTIVE: usize = 2;

pub const PATTERN_RULE: &str = "pattern_repetition";
pub const TEMPERATURE_RULE: &str = "temperature_repetition";

/// One failing finding per run longer than [`MAX_CONSECUTIVE`], or a single
/// passing finding when there is none.
fn repetition_findings<T: PartialEq + std::fmt::Debug>(
    rule_id: &str,
    what: &str,
    sequence: &[(u32, T)],
) -> Vec<ValidationFinding> {
    let mut findings = Vec::new();
    let mut start = 0;
    while start < sequence.len() {
        let mut end = start + 1;
        while end < sequence.len() && sequence[end].1 == sequence[start].1 {
            end += 1;
        }
        if end - start > MAX_CONSECUTIVE {
            findings.push(ValidationFinding {
                rule_id: rule_id.to_string(),
                severity: Severity::Medium,
                passed: false,
                detail: Some(format!(
                    "{what} {:?} repeats on slides {}-{}",
                    sequence[start].1,
                    sequence[start].0,
                    sequence[end - 1].0
                )),
                slide_number: Some(sequence[start + MAX_CONSECUTIVE].0),
            });
        }
        start = end;
    }

    if findings.is_empty() {
        findings.push(ValidationFinding {
            rule_id: rule_id.to_string(),
            severity: Severity::Medium,
            passed: true,
            detail: None,
            slide_number: None,
        });
    }
    findings
}

pub fn pattern_repetition(plan: &ContentPlan) -> Vec<ValidationFinding> {
    let mut sequence: Vec<(u32, &str)> = plan
        .slides
        .iter()
        .map(|s| (s.slide_number, s.pattern.trim()))
        .collect();
    sequence.sort_by_key(|(n, _)| *n);
    repetition_findings(PATTERN_RULE, "pattern", &sequence)
}

pub fn temperature_repetition(design: &DesignBrief) -> Vec<ValidationFinding> {
    let mut sequence: Vec<_> = design
        .slides
        .iter()
        .map(|s| (s.slide_number, s.temperature))
        .collect();
    sequence.sort_by_key(|(n, _)| *n);
    repetition_findings(TEMPERATURE_RULE, "temperature", &sequence)
}

/// Both checks, pattern first.
pub fn narrative_findings(plan: &ContentPlan, design: &DesignBrief) -> Vec<ValidationFinding> {
    let mut findings = pattern_repetition(plan);
    findings.extend(temperature_repetition(design));
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Palette, PlannedSlide, SlideDesign, SlideRole, Temperature, Typography};

    fn plan(patterns: &[&str]) -> ContentPlan {
        ContentPlan {
            title: "t".into(),
            hook: "h".into(),
            slides: patterns
                .iter()
                .enumerate()
                .map(|(i, p)| PlannedSlide {
                    slide_number: i as u32 + 1,
                    role: if i == 0 { SlideRole::Hook } else { SlideRole::Body },
                    pattern: p.to_string(),
                    key_message: String::new(),
                })
                .collect(),
        }
    }

    fn design(temps: &[Temperature]) -> DesignBrief {
        DesignBrief {
            palette: Palette {
                background: "#000".into(),
                surface: "#111".into(),
                primary: "#222".into(),
                accent: "#333".into(),
                text: "#fff".into(),
            },
            typography: Typography {
                heading_font: "Pretendard".into(),
                body_font: "Pretendard".into(),
                heading_size_px: 60,
                body_size_px: 30,
            },
            slides: temps
                .iter()
                .enumerate()
                .map(|(i, &t)| SlideDesign {
                    slide_number: i as u32 + 1,
                    layout: "split".into(),
                    temperature: t,
                    notes: None,
                })
                .collect(),
        }
    }

    #[test]
    fn two_in_a_row_is_fine() {
        let findings = pattern_repetition(&plan(&["list", "list", "quote", "list", "list"]));
        assert_eq!(findings.len(), 1);
        assert!(findings[0].passed);
    }

    #[test]
    fn three_in_a_row_fails_at_third_slide() {
        let findings = pattern_repetition(&plan(&["quote", "list", "list", "list", "stat"]));
        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert!(!f.passed);
        assert_eq!(f.rule_id, PATTERN_RULE);
        assert_eq!(f.slide_number, Some(4));
        assert!(f.detail.as_deref().unwrap().contains("slides 2-4"));
    }

    #[test]
    fn each_long_run_reported() {
        use Temperature::*;
        let findings = temperature_repetition(&design(&[Hot, Hot, Hot, Cool, Cool, Cool, Cool]));
        assert_eq!(findings.len(), 2);
        assert!(findings.iter().all(|f| !f.passed));
        assert!(findings[1].detail.as_deref().unwrap().contains("slides 4-7"));
    }

    #[test]
    fn narrative_findings_cover_both_rules() {
        use Temperature::*;
        let findings = narrative_findings(&plan(&["a", "b"]), &design(&[Warm, Neutral]));
        let ids: Vec<_> = findings.iter().map(|f| f.rule_id.as_str()).collect();
        assert_eq!(ids, vec![PATTERN_RULE, TEMPERATURE_RULE]);
    }
}
