use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::plan::DEFAULT_PAGE_COUNT;
use crate::services::imagegen::ImageGenConfig;
use crate::services::llm::LlmConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_build")]
    pub build_folder: String,

    #[serde(default)]
    pub unattended: bool,

    /// Keep the per-run scratch directory after a successful assembly.
    #[serde(default)]
    pub keep_scratch: bool,

    pub llm: LlmConfig,

    #[serde(default)]
    pub images: ImageGenConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_page_count")]
    pub page_count: usize,

    /// Attempt budget per unit of work (one plan request, one
    /// character, one page index). Exhaustion fails the run.
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,

    /// Bounded fan-out within a stage.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            page_count: default_page_count(),
            attempts: default_attempts(),
            retry_delay_seconds: default_retry_delay(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_output() -> String {
    "output".to_string()
}
fn default_build() -> String {
    "build".to_string()
}
fn default_page_count() -> usize {
    DEFAULT_PAGE_COUNT
}
fn default_attempts() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    2
}
fn default_concurrency() -> usize {
    3
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Path::new("config.yml");
        if !path.exists() {
            anyhow::bail!("config.yml not found. Please create one.");
        }

        let content = fs::read_to_string(path).context("Failed to read config.yml")?;
        let config: Config =
            serde_yaml_ng::from_str(&content).context("Failed to parse config.yml")?;
        Ok(config)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        fs::create_dir_all(&self.build_folder)?;
        Ok(())
    }
}
