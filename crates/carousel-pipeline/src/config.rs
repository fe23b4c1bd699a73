//! Run configuration, built once at process start and passed by reference.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

use carousel_types::{CarouselError, Result, Stage};

use crate::validation::ValidationConfig;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
pub const DEFAULT_MAX_REVISIONS: u32 = 3;
pub const DEFAULT_LOCALE: &str = "ko";
pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_CHROME: &str = "chromium";

/// Model used for each stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageModels {
    pub research: String,
    pub plan: String,
    pub copy: String,
    pub design: String,
    pub build: String,
    pub review: String,
}

impl StageModels {
    pub fn uniform(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            research: model.clone(),
            plan: model.clone(),
            copy: model.clone(),
            design: model.clone(),
            build: model.clone(),
            review: model,
        }
    }

    pub fn for_stage(&self, stage: Stage) -> &str {
        match stage {
            Stage::Research => &self.research,
            Stage::Plan => &self.plan,
            Stage::Copy => &self.copy,
            Stage::Design => &self.design,
            Stage::Build => &self.build,
            Stage::Review => &self.review,
        }
    }

    fn slot_mut(&mut self, stage: Stage) -> &mut String {
        match stage {
            Stage::Research => &mut self.research,
            Stage::Plan => &mut self.plan,
            Stage::Copy => &mut self.copy,
            Stage::Design => &mut self.design,
            Stage::Build => &mut self.build,
            Stage::Review => &mut self.review,
        }
    }
}

impl Default for StageModels {
    fn default() -> Self {
        Self::uniform(DEFAULT_MODEL)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub models: StageModels,
    /// Upper bound on review iterations. Only settable through validated
    /// paths, so a run can never start with a bound of zero.
    max_revisions: NonZeroU32,
    pub output_dir: PathBuf,
    /// Per-call limit on the generation service.
    pub generation_timeout: Duration,
    pub chrome_binary: PathBuf,
    pub validation: ValidationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            models: StageModels::default(),
            max_revisions: NonZeroU32::new(DEFAULT_MAX_REVISIONS).unwrap_or(NonZeroU32::MIN),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            generation_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            chrome_binary: PathBuf::from(DEFAULT_CHROME),
            validation: ValidationConfig::default(),
        }
    }
}

/// Parse a revision bound. Zero, negatives and non-numbers are rejected.
pub fn parse_max_revisions(raw: &str) -> Result<u32> {
    match raw.trim().parse::<i64>() {
        Ok(n) if n >= 1 && n <= i64::from(u32::MAX) => Ok(n as u32),
        Ok(n) => Err(CarouselError::Config(format!(
            "max revisions must be a positive integer, got {n}"
        ))),
        Err(_) => Err(CarouselError::Config(format!(
            "max revisions must be a positive integer, got {raw:?}"
        ))),
    }
}

impl PipelineConfig {
    /// Read `CAROUSEL_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset keys keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(model) = lookup("CAROUSEL_MODEL") {
            config.models = StageModels::uniform(model);
        }
        for stage in Stage::ALL {
            let key = format!("CAROUSEL_{}_MODEL", stage.name().to_ascii_uppercase());
            if let Some(model) = lookup(&key) {
                *config.models.slot_mut(stage) = model;
            }
        }

        if let Some(raw) = lookup("CAROUSEL_MAX_REVISIONS") {
            config = config.with_max_revisions(parse_max_revisions(&raw)?)?;
        }
        if let Some(locale) = lookup("CAROUSEL_LOCALE") {
            config.validation.locale = locale;
        }
        if let Some(dir) = lookup("CAROUSEL_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup("CAROUSEL_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                CarouselError::Config(format!("CAROUSEL_TIMEOUT_SECS must be seconds, got {raw:?}"))
            })?;
            if secs == 0 {
                return Err(CarouselError::Config("CAROUSEL_TIMEOUT_SECS must be non-zero".into()));
            }
            config.generation_timeout = Duration::from_secs(secs);
        }
        if let Some(chrome) = lookup("CAROUSEL_CHROME") {
            config.chrome_binary = PathBuf::from(chrome);
        }

        Ok(config)
    }

    pub fn with_max_revisions(mut self, max_revisions: u32) -> Result<Self> {
        self.max_revisions = NonZeroU32::new(max_revisions).ok_or_else(|| {
            CarouselError::Config("max revisions must be a positive integer, got 0".into())
        })?;
        Ok(self)
    }

    pub fn max_revisions(&self) -> u32 {
        self.max_revisions.get()
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn model_for(&self, stage: Stage) -> &str {
        self.models.for_stage(stage)
    }

    /// Output token budget per stage.
    pub fn max_output_tokens(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Research => 4096,
            Stage::Plan => 4096,
            Stage::Copy => 6144,
            Stage::Design => 4096,
            Stage::Build => 16384,
            Stage::Review => 8192,
        }
    }
}
