//! Pipeline configuration.
//!
//! Policy constants live in `config/pipeline.toml` (JSON accepted too) and
//! can be pointed elsewhere with `WIREBRIEF_CONFIG_PATH`. Missing file or
//! fields fall back to defaults, so tests and local runs need no setup.
//! Both canonical word-band profiles ship in the file; `brief.profile`
//! selects one.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::{BriefStatus, Category, Source};

const ENV_CONFIG_PATH: &str = "WIREBRIEF_CONFIG_PATH";
const ENV_SOURCES_PATH: &str = "WIREBRIEF_SOURCES_PATH";

fn default_sweep_secs() -> u64 {
    30
}
fn default_batch_secs() -> u64 {
    30 * 60
}
fn default_startup_delay_secs() -> u64 {
    5
}
fn default_batch_deadline_secs() -> u64 {
    10 * 60
}
fn default_daily_limit() -> u32 {
    150
}
fn default_category_cap() -> u32 {
    50
}
fn default_dedup_threshold() -> f64 {
    0.82
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_sweep_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_batch_secs")]
    pub batch_interval_secs: u64,
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,
    #[serde(default = "default_batch_deadline_secs")]
    pub batch_deadline_secs: u64,
    #[serde(default = "default_daily_limit")]
    pub daily_article_limit: u32,
    #[serde(default = "default_category_cap")]
    pub max_articles_per_category: u32,
    #[serde(default = "default_dedup_threshold")]
    pub dedup_similarity_threshold: f64,
    #[serde(default)]
    pub brief: BriefConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            sweep_interval_secs: default_sweep_secs(),
            batch_interval_secs: default_batch_secs(),
            startup_delay_secs: default_startup_delay_secs(),
            batch_deadline_secs: default_batch_deadline_secs(),
            daily_article_limit: default_daily_limit(),
            max_articles_per_category: default_category_cap(),
            dedup_similarity_threshold: default_dedup_threshold(),
            brief: BriefConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WordBand {
    pub min_words: usize,
    pub max_words: usize,
    pub max_tokens: u32,
}

fn default_profile() -> String {
    "standard".to_string()
}
fn default_initial_status() -> BriefStatus {
    BriefStatus::Pending
}
fn default_profiles() -> HashMap<String, WordBand> {
    BriefConfig::default().profiles
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BriefConfig {
    /// Which profile from `profiles` applies.
    #[serde(default = "default_profile")]
    pub profile: String,
    /// Status newly generated briefs are persisted with; transitions past
    /// that are owned by the editorial surface, not the pipeline.
    #[serde(default = "default_initial_status")]
    pub initial_status: BriefStatus,
    #[serde(default = "default_profiles")]
    pub profiles: HashMap<String, WordBand>,
}

impl Default for BriefConfig {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(
            "standard".to_string(),
            WordBand {
                min_words: 180,
                max_words: 260,
                max_tokens: 900,
            },
        );
        profiles.insert(
            "extended".to_string(),
            WordBand {
                min_words: 400,
                max_words: 500,
                max_tokens: 1400,
            },
        );
        BriefConfig {
            profile: "standard".to_string(),
            initial_status: BriefStatus::Pending,
            profiles,
        }
    }
}

impl BriefConfig {
    pub fn word_band(&self) -> WordBand {
        self.profiles
            .get(&self.profile)
            .copied()
            .unwrap_or_else(|| BriefConfig::default().profiles["standard"])
    }
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_prompt_version() -> String {
    "v3".to_string()
}
fn default_input_rate() -> f64 {
    0.15
}
fn default_output_rate() -> f64 {
    0.60
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// OpenAI-compatible chat-completions endpoint root.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_prompt_version")]
    pub prompt_version: String,
    /// USD per million input tokens.
    #[serde(default = "default_input_rate")]
    pub input_rate_per_mtok: f64,
    /// USD per million output tokens.
    #[serde(default = "default_output_rate")]
    pub output_rate_per_mtok: f64,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            model: default_llm_model(),
            base_url: default_llm_base_url(),
            prompt_version: default_prompt_version(),
            input_rate_per_mtok: default_input_rate(),
            output_rate_per_mtok: default_output_rate(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
    pub fn batch_interval(&self) -> Duration {
        Duration::from_secs(self.batch_interval_secs)
    }
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }
    pub fn batch_deadline(&self) -> Duration {
        Duration::from_secs(self.batch_deadline_secs)
    }

    /// Holding-queue backpressure kicks in past this size.
    pub fn holding_high_water(&self) -> usize {
        self.daily_article_limit as usize * 10
    }

    /// Load using env override + fallbacks:
    /// 1) $WIREBRIEF_CONFIG_PATH
    /// 2) config/pipeline.toml
    /// 3) config/pipeline.json
    /// Missing everything yields defaults.
    pub fn load_default() -> Result<PipelineConfig> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            return Self::load_from(&pb);
        }
        let toml_p = PathBuf::from("config/pipeline.toml");
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        let json_p = PathBuf::from("config/pipeline.json");
        if json_p.exists() {
            return Self::load_from(&json_p);
        }
        Ok(PipelineConfig::default())
    }

    pub fn load_from(path: &Path) -> Result<PipelineConfig> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg: PipelineConfig = if ext == "json" {
            serde_json::from_str(&content).context("parsing pipeline config json")?
        } else {
            toml::from_str(&content).context("parsing pipeline config toml")?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        let band = self.brief.word_band();
        if band.min_words == 0 || band.min_words >= band.max_words {
            return Err(anyhow!(
                "word band [{}, {}] is not a valid range",
                band.min_words,
                band.max_words
            ));
        }
        if !(0.0..=1.0).contains(&self.dedup_similarity_threshold) {
            return Err(anyhow!("dedup_similarity_threshold must be within [0, 1]"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct SourcesFile {
    sources: Vec<SourceEntry>,
}

#[derive(Debug, Deserialize)]
struct SourceEntry {
    id: String,
    name: String,
    url: String,
    category: Category,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

/// Load the fixed feed set for local runs backed by the memory store.
/// Production deployments read sources from the `sources` table instead.
pub fn load_sources_default() -> Result<Vec<Source>> {
    let path = match std::env::var(ENV_SOURCES_PATH) {
        Ok(p) => PathBuf::from(p),
        Err(_) => PathBuf::from("config/sources.toml"),
    };
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("reading sources from {}", path.display()))?;
    let parsed: SourcesFile = toml::from_str(&content).context("parsing sources toml")?;
    Ok(parsed
        .sources
        .into_iter()
        .map(|e| Source {
            id: e.id,
            name: e.name,
            url: e.url,
            category: e.category,
            active: e.active,
            last_checked: None,
            last_error: None,
        })
        .collect())
}
