//! Slide rendering for the carousel pipeline.
//!
//! A [`Renderer`] turns the final slide documents into one image per slide.
//! [`ChromiumRenderer`] drives a headless Chromium binary, one subprocess per
//! slide, with a per-job timeout and a cap on concurrent jobs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use carousel_types::{parse_slide_file_name, slide_file_name, CarouselError, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub const CANVAS_WIDTH: u32 = 1080;
pub const CANVAS_HEIGHT: u32 = 1350;

/// Converts slide documents into image files.
///
/// Implementations return one path per input slide number. The caller treats
/// a missing key as an incomplete render.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render_all(&self, slides: &BTreeMap<u32, String>) -> Result<BTreeMap<u32, PathBuf>>;
}

// ---------------------------------------------------------------------------
// ChromiumRenderer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ChromiumRenderer {
    binary: PathBuf,
    output_dir: PathBuf,
    width: u32,
    height: u32,
    timeout: Duration,
    concurrency: usize,
}

impl ChromiumRenderer {
    /// Renderer writing `slides/slide_NN.html` and `images/slide_NN.png`
    /// beneath `output_dir`.
    pub fn new(binary: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            output_dir: output_dir.into(),
            width: CANVAS_WIDTH,
            height: CANVAS_HEIGHT,
            timeout: Duration::from_secs(60),
            concurrency: 4,
        }
    }

    pub fn with_canvas(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    fn html_dir(&self) -> PathBuf {
        self.output_dir.join("slides")
    }

    fn image_dir(&self) -> PathBuf {
        self.output_dir.join("images")
    }
}

struct RenderJob {
    slide: u32,
    binary: PathBuf,
    html: PathBuf,
    png: PathBuf,
    window: String,
    timeout: Duration,
}

/// `file://` URL for a slide document, percent-encoded so that spaces, `#`
/// and `?` in the path reach the browser intact.
fn file_url(slide: u32, path: &Path) -> Result<String> {
    let absolute = std::path::absolute(path)?;
    url::Url::from_file_path(&absolute)
        .map(String::from)
        .map_err(|()| CarouselError::RenderError {
            slide,
            message: format!("cannot express {} as a file URL", absolute.display()),
        })
}

async fn render_one(job: RenderJob) -> Result<(u32, PathBuf)> {
    let html_url = file_url(job.slide, &job.html)?;
    let mut cmd = tokio::process::Command::new(&job.binary);
    cmd.arg("--headless")
        .arg("--disable-gpu")
        .arg("--hide-scrollbars")
        .arg("--no-sandbox")
        .arg(format!("--window-size={}", job.window))
        .arg(format!("--screenshot={}", job.png.display()))
        .arg(html_url)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| CarouselError::RenderError {
        slide: job.slide,
        message: format!("Failed to spawn {}: {e}", job.binary.display()),
    })?;

    let output = tokio::time::timeout(job.timeout, child.wait_with_output())
        .await
        .map_err(|_| CarouselError::CommandTimeout {
            timeout_ms: job.timeout.as_millis() as u64,
        })?
        .map_err(|e| CarouselError::RenderError {
            slide: job.slide,
            message: format!("Browser execution failed: {e}"),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CarouselError::RenderError {
            slide: job.slide,
            message: format!(
                "browser exited with {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ),
        });
    }

    if !tokio::fs::try_exists(&job.png).await? {
        return Err(CarouselError::RenderError {
            slide: job.slide,
            message: "browser exited cleanly but wrote no screenshot".into(),
        });
    }

    tracing::debug!(slide = job.slide, path = %job.png.display(), "Slide rendered");
    Ok((job.slide, job.png))
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn render_all(&self, slides: &BTreeMap<u32, String>) -> Result<BTreeMap<u32, PathBuf>> {
        let html_dir = self.html_dir();
        let image_dir = self.image_dir();
        tokio::fs::create_dir_all(&html_dir).await?;
        tokio::fs::create_dir_all(&image_dir).await?;

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut jobs = JoinSet::new();

        for (&slide, content) in slides {
            let html = html_dir.join(slide_file_name(slide, "html"));
            tokio::fs::write(&html, content).await?;

            let job = RenderJob {
                slide,
                binary: self.binary.clone(),
                html,
                png: image_dir.join(slide_file_name(slide, "png")),
                window: format!("{},{}", self.width, self.height),
                timeout: self.timeout,
            };
            let permits = Arc::clone(&permits);
            jobs.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| CarouselError::Other(e.to_string()))?;
                render_one(job).await
            });
        }

        tracing::info!(slides = slides.len(), concurrency = self.concurrency, "Rendering slides");

        let mut images = BTreeMap::new();
        while let Some(joined) = jobs.join_next().await {
            let (slide, path) =
                joined.map_err(|e| CarouselError::Other(format!("render task panicked: {e}")))??;
            images.insert(slide, path);
        }
        Ok(images)
    }
}

// ---------------------------------------------------------------------------
// Loading slides back from disk
// ---------------------------------------------------------------------------

/// Read every `slide_NN.html` in `dir`, keyed by slide number.
pub async fn load_slides(dir: &Path) -> Result<BTreeMap<u32, String>> {
    let mut slides = BTreeMap::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.ends_with(".html") {
            continue;
        }
        if let Some(number) = parse_slide_file_name(name) {
            slides.insert(number, tokio::fs::read_to_string(entry.path()).await?);
        }
    }
    Ok(slides)
}
