use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::core::catalog::{self, CUSTOM_GENRE};
use crate::core::layout::PageLayout;
use crate::services::image::ImageConfig;
use crate::services::llm::LlmConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default)]
    pub unattended: bool,

    #[serde(default)]
    pub hero_image: Option<String>,

    #[serde(default)]
    pub co_star_image: Option<String>,

    pub llm: LlmConfig,

    #[serde(default)]
    pub image: ImageConfig,

    #[serde(default)]
    pub story: StoryConfig,

    #[serde(default)]
    pub layout: PageLayout,

    #[serde(default)]
    pub timing: TimingConfig,
}

/// Story parameters. Fixed once generation starts.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StoryConfig {
    #[serde(default = "default_genre")]
    pub genre: String,
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub premise: String,
    #[serde(default = "default_rich_mode")]
    pub rich_mode: bool,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            genre: default_genre(),
            tone: default_tone(),
            language: default_language(),
            premise: String::new(),
            rich_mode: default_rich_mode(),
        }
    }
}

impl StoryConfig {
    pub fn is_custom(&self) -> bool {
        self.genre == CUSTOM_GENRE
    }

    pub fn language_name(&self) -> &'static str {
        catalog::language_name(&self.language)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TimingConfig {
    #[serde(default = "default_launch_delay")]
    pub launch_delay_ms: u64,
    #[serde(default = "default_synthesis_timeout")]
    pub synthesis_timeout_seconds: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            launch_delay_ms: default_launch_delay(),
            synthesis_timeout_seconds: default_synthesis_timeout(),
        }
    }
}

impl TimingConfig {
    pub fn launch_delay(&self) -> Duration {
        Duration::from_millis(self.launch_delay_ms)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_seconds)
    }
}

fn default_output() -> String {
    "output".to_string()
}
fn default_genre() -> String {
    catalog::GENRES[0].to_string()
}
fn default_tone() -> String {
    catalog::TONES[0].to_string()
}
fn default_language() -> String {
    catalog::LANGUAGES[0].code.to_string()
}
fn default_rich_mode() -> bool {
    true
}
fn default_launch_delay() -> u64 {
    1100
}
fn default_synthesis_timeout() -> u64 {
    120
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.yml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml_ng::from_str(content)?;
        config.layout.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write("config.yml", content).context("Failed to write config.yml")?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }
}
