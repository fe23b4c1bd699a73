//! Writing run artifacts to disk as they are committed.
//!
//! Layout under the output directory:
//!
//! ```text
//! research.json  research.md  plan.json  copy.json  design.json  build.json
//! review.json    review_01.json ...
//! slides/slide_01.html ...
//! images/slide_01.png ...      (written by the renderer)
//! run.json
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use carousel_llm::Usage;
use carousel_types::{slide_file_name, Result, Stage};
use serde::{Deserialize, Serialize};

use crate::schema::{StageArtifact, ValidationFinding, Verdict};

/// Summary of one run, written as `run.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunManifest {
    pub run_id: String,
    pub topic: String,
    pub started_at: String,
    pub finished_at: String,
    /// `completed` or `failed`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    pub review_iterations: u32,
    pub transitions: Vec<String>,
    pub unresolved: Vec<ValidationFinding>,
    pub usage: BTreeMap<Stage, Usage>,
    pub total_usage: Usage,
    pub images: BTreeMap<u32, PathBuf>,
}

/// Durable copies of committed artifacts. Failures here abort the run like
/// any other collaborator failure.
#[async_trait]
pub trait ArtifactWriter: Send + Sync {
    /// Write a committed artifact. `iteration` is set for review reports.
    async fn write_artifact(&self, artifact: &StageArtifact, iteration: Option<u32>) -> Result<()>;
    async fn write_manifest(&self, manifest: &RunManifest) -> Result<()>;
}

// ---------------------------------------------------------------------------
// FsArtifactWriter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FsArtifactWriter {
    root: PathBuf,
}

impl FsArtifactWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn write_json(&self, name: &str, value: &serde_json::Value) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(name);
        tokio::fs::write(&path, serde_json::to_string_pretty(value)?).await?;
        tracing::debug!(path = %path.display(), "Artifact written");
        Ok(path)
    }

    async fn write_slides(&self, slides: &[(u32, &str)]) -> Result<()> {
        let dir = self.root.join("slides");
        tokio::fs::create_dir_all(&dir).await?;
        for (n, content) in slides {
            tokio::fs::write(dir.join(slide_file_name(*n, "html")), content).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactWriter for FsArtifactWriter {
    async fn write_artifact(&self, artifact: &StageArtifact, iteration: Option<u32>) -> Result<()> {
        let stage = artifact.stage();
        let json = artifact.to_json()?;
        self.write_json(&format!("{}.json", stage.name()), &json).await?;

        match artifact {
            StageArtifact::Research(research) => {
                tokio::fs::write(self.root.join("research.md"), research.to_markdown()).await?;
            }
            StageArtifact::Build(build) => {
                let slides: Vec<(u32, &str)> = build
                    .slides
                    .iter()
                    .map(|s| (s.slide_number, s.content.as_str()))
                    .collect();
                self.write_slides(&slides).await?;
            }
            StageArtifact::Review(_) => {
                if let Some(i) = iteration {
                    self.write_json(&format!("review_{i:02}.json"), &json).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn write_manifest(&self, manifest: &RunManifest) -> Result<()> {
        self.write_json("run.json", &serde_json::to_value(manifest)?).await?;
        Ok(())
    }
}

/// Load a manifest written by [`FsArtifactWriter`].
pub async fn load_manifest(root: &Path) -> Result<RunManifest> {
    let json = tokio::fs::read_to_string(root.join("run.json")).await?;
    Ok(serde_json::from_str(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BuildOutput, BuiltSlide, KeyFact, ResearchFindings, ReviewReport};

    #[tokio::test]
    async fn research_writes_json_and_markdown() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = FsArtifactWriter::new(tmp.path());
        let research = ResearchFindings {
            topic: "Coffee".into(),
            summary: "s".into(),
            key_facts: vec![KeyFact {
                claim: "c".into(),
                source: None,
            }],
            audience_insights: vec![],
            angles: vec![],
        };
        writer
            .write_artifact(&StageArtifact::Research(research), None)
            .await
            .unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(tmp.path().join("research.json")).unwrap())
                .unwrap();
        assert_eq!(json["topic"], "Coffee");
        let md = std::fs::read_to_string(tmp.path().join("research.md")).unwrap();
        assert!(md.starts_with("# Coffee"));
    }

    #[tokio::test]
    async fn build_writes_zero_padded_slides() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = FsArtifactWriter::new(tmp.path());
        let build = BuildOutput {
            slides: vec![
                BuiltSlide {
                    slide_number: 10,
                    content: "ten".into(),
                },
                BuiltSlide {
                    slide_number: 2,
                    content: "two".into(),
                },
            ],
        };
        writer
            .write_artifact(&StageArtifact::Build(build), None)
            .await
            .unwrap();

        let slides = tmp.path().join("slides");
        assert_eq!(std::fs::read_to_string(slides.join("slide_02.html")).unwrap(), "two");
        assert_eq!(std::fs::read_to_string(slides.join("slide_10.html")).unwrap(), "ten");
        assert!(tmp.path().join("build.json").exists());
    }

    #[tokio::test]
    async fn review_writes_latest_and_per_iteration() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = FsArtifactWriter::new(tmp.path());
        let review = StageArtifact::Review(ReviewReport {
            verdict: None,
            summary: Some("ok".into()),
            findings: vec![],
        });
        writer.write_artifact(&review, Some(1)).await.unwrap();
        writer.write_artifact(&review, Some(2)).await.unwrap();

        assert!(tmp.path().join("review.json").exists());
        assert!(tmp.path().join("review_01.json").exists());
        assert!(tmp.path().join("review_02.json").exists());
    }

    #[tokio::test]
    async fn manifest_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = FsArtifactWriter::new(tmp.path().join("nested"));
        let mut usage = BTreeMap::new();
        usage.insert(Stage::Plan, Usage::new(3, 4));
        let manifest = RunManifest {
            run_id: "abc".into(),
            topic: "t".into(),
            started_at: "2026-01-01T00:00:00Z".into(),
            finished_at: "2026-01-01T00:01:00Z".into(),
            status: "completed".into(),
            failure_kind: None,
            error: None,
            verdict: Some(Verdict::Pass),
            review_iterations: 1,
            transitions: vec!["research".into(), "done".into()],
            unresolved: vec![],
            usage,
            total_usage: Usage::new(3, 4),
            images: BTreeMap::new(),
        };
        writer.write_manifest(&manifest).await.unwrap();

        let raw = std::fs::read_to_string(tmp.path().join("nested/run.json")).unwrap();
        assert!(raw.contains("\"reviewIterations\": 1"));
        let loaded = load_manifest(&tmp.path().join("nested")).await.unwrap();
        assert_eq!(loaded, manifest);
    }
}
