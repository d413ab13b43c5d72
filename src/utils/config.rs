use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use easy_config_store::ConfigStore;
use eyre::{Result, eyre};
use log::{debug, info};
use serde::{Deserialize, Serialize};

pub type Config = Arc<ConfigInner>;

pub fn config(path: PathBuf) -> Result<Config> {
    let config_store = ConfigStore::<ConfigInner>::read(path, "config".to_string())?;
    let inner = (*config_store).clone();
    inner.validate()?;

    info!("config parsing successful");
    debug!("loaded configuration:\n{}", toml::to_string_pretty(&inner)?);

    Ok(Arc::new(inner))
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct ConfigInner {
    pub enrich: EnrichConfig,
    pub fetcher: FetcherConfig,
    pub extractor: ExtractorConfig,
    pub canonical: CanonicalConfig,
}

impl ConfigInner {
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("enrich.min_delay_secs", self.enrich.min_delay_secs),
            ("enrich.max_delay_secs", self.enrich.max_delay_secs),
            ("fetcher.navigation_timeout_secs", self.fetcher.navigation_timeout_secs),
            ("fetcher.navigation_backoff_secs", self.fetcher.navigation_backoff_secs),
            ("fetcher.settle_min_secs", self.fetcher.settle_min_secs),
            ("fetcher.settle_max_secs", self.fetcher.settle_max_secs),
            ("fetcher.scroll_pause_secs", self.fetcher.scroll_pause_secs),
            ("fetcher.challenge_wait_ceiling_secs", self.fetcher.challenge_wait_ceiling_secs),
            ("fetcher.challenge_poll_interval_secs", self.fetcher.challenge_poll_interval_secs),
        ];
        for (name, secs) in durations {
            // Duration::from_secs_f64 panics on these
            if !secs.is_finite() || secs < 0.0 || secs > u64::MAX as f64 {
                return Err(eyre!("{} must be a finite, non-negative number of seconds, got {}", name, secs));
            }
        }
        if self.fetcher.navigation_timeout_secs == 0.0 {
            return Err(eyre!("fetcher.navigation_timeout_secs must be positive"));
        }

        if self.enrich.min_delay_secs < 0.0 || self.enrich.min_delay_secs > self.enrich.max_delay_secs {
            return Err(eyre!(
                "invalid delay bounds: min_delay_secs ({}) must be >= 0 and <= max_delay_secs ({})",
                self.enrich.min_delay_secs,
                self.enrich.max_delay_secs
            ));
        }
        if self.fetcher.settle_min_secs < 0.0 || self.fetcher.settle_min_secs > self.fetcher.settle_max_secs {
            return Err(eyre!(
                "invalid settle bounds: settle_min_secs ({}) must be >= 0 and <= settle_max_secs ({})",
                self.fetcher.settle_min_secs,
                self.fetcher.settle_max_secs
            ));
        }
        if self.fetcher.challenge_poll_interval_secs <= 0.0 {
            return Err(eyre!("challenge_poll_interval_secs must be positive"));
        }
        if self.fetcher.user_agents.is_empty() {
            return Err(eyre!("fetcher.user_agents must not be empty"));
        }
        if self.extractor.description_selectors.is_empty() && !self.extractor.largest_block_fallback {
            return Err(eyre!(
                "extractor needs at least one description selector or the largest block fallback"
            ));
        }
        if !self.canonical.template.contains("{id}") {
            return Err(eyre!("canonical.template must contain an {{id}} placeholder"));
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct EnrichConfig {
    #[serde(default = "default_min_delay")]
    pub min_delay_secs: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: f64,
    /// Log a running tally every N attempted records. Zero disables it.
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
    /// Directory for diagnostic page dumps of failed attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump_dir: Option<PathBuf>,
}

impl EnrichConfig {
    pub fn delay_bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_secs_f64(self.min_delay_secs),
            Duration::from_secs_f64(self.max_delay_secs),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Headless Chromium over the DevTools protocol
    Chromium,
    /// Plain HTTP requests, no JavaScript
    Http,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct FetcherConfig {
    #[serde(default = "default_engine")]
    pub engine: Engine,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default = "default_true")]
    pub stealth: bool,
    pub locale: String,
    pub accept_language: String,
    pub timezone: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_secs: f64,
    #[serde(default = "default_navigation_retries")]
    pub navigation_retries: usize,
    /// First back-off delay between navigation retries; doubles each time.
    #[serde(default = "default_navigation_backoff")]
    pub navigation_backoff_secs: f64,
    #[serde(default)]
    pub settle_min_secs: f64,
    #[serde(default)]
    pub settle_max_secs: f64,
    #[serde(default)]
    pub scroll_steps: u32,
    #[serde(default)]
    pub scroll_pause_secs: f64,
    #[serde(default = "default_challenge_ceiling")]
    pub challenge_wait_ceiling_secs: f64,
    #[serde(default = "default_challenge_poll")]
    pub challenge_poll_interval_secs: f64,
    #[serde(default)]
    pub challenge_markers: Vec<String>,
    #[serde(default)]
    pub ready_markers: Vec<String>,
    pub user_agents: Vec<String>,
}

impl FetcherConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.navigation_timeout_secs)
    }

    pub fn challenge_wait_ceiling(&self) -> Duration {
        Duration::from_secs_f64(self.challenge_wait_ceiling_secs)
    }

    pub fn challenge_poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.challenge_poll_interval_secs)
    }

    pub fn settle_bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_secs_f64(self.settle_min_secs),
            Duration::from_secs_f64(self.settle_max_secs),
        )
    }

    pub fn scroll_pause(&self) -> Duration {
        Duration::from_secs_f64(self.scroll_pause_secs)
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct ExtractorConfig {
    #[serde(default = "default_min_description_chars")]
    pub min_description_chars: usize,
    #[serde(default = "default_true")]
    pub largest_block_fallback: bool,
    #[serde(default)]
    pub description_selectors: Vec<String>,
    #[serde(default)]
    pub date_selectors: Vec<String>,
    #[serde(default)]
    pub boilerplate_phrases: Vec<String>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct CanonicalConfig {
    /// Regex whose first capture group is the job identifier
    pub pattern: String,
    /// Detail URL with an `{id}` placeholder
    pub template: String,
}

fn default_true() -> bool {
    true
}

fn default_engine() -> Engine {
    Engine::Chromium
}

fn default_min_delay() -> f64 {
    3.0
}

fn default_max_delay() -> f64 {
    6.0
}

fn default_progress_every() -> usize {
    10
}

fn default_viewport_width() -> u32 {
    1920
}

fn default_viewport_height() -> u32 {
    1080
}

fn default_navigation_timeout() -> f64 {
    30.0
}

fn default_navigation_retries() -> usize {
    2
}

fn default_navigation_backoff() -> f64 {
    1.0
}

fn default_challenge_ceiling() -> f64 {
    15.0
}

fn default_challenge_poll() -> f64 {
    0.5
}

fn default_min_description_chars() -> usize {
    200
}

impl Default for ConfigInner {
    fn default() -> Self {
        let cfg = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/config.default.toml",));

        toml::from_str(cfg).unwrap() // should be okay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = ConfigInner::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.fetcher.engine, Engine::Chromium);
        assert!(cfg.canonical.template.contains("{id}"));
        assert_eq!(cfg.extractor.description_selectors[0], "div#jobDescriptionText");
    }

    #[test]
    fn rejects_inverted_delay_bounds() {
        let mut cfg = ConfigInner::default();
        cfg.enrich.min_delay_secs = 10.0;
        cfg.enrich.max_delay_secs = 1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_negative_durations() {
        let mut cfg = ConfigInner::default();
        cfg.fetcher.challenge_wait_ceiling_secs = -1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = ConfigInner::default();
        cfg.fetcher.scroll_pause_secs = -0.5;
        assert!(cfg.validate().is_err());

        let mut cfg = ConfigInner::default();
        cfg.fetcher.navigation_backoff_secs = -2.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_finite_durations() {
        let mut cfg = ConfigInner::default();
        cfg.fetcher.navigation_timeout_secs = f64::NAN;
        assert!(cfg.validate().is_err());

        let mut cfg = ConfigInner::default();
        cfg.enrich.max_delay_secs = f64::INFINITY;
        assert!(cfg.validate().is_err());

        let mut cfg = ConfigInner::default();
        cfg.fetcher.navigation_timeout_secs = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_template_without_placeholder() {
        let mut cfg = ConfigInner::default();
        cfg.canonical.template = "https://example.com/job".to_string();
        assert!(cfg.validate().is_err());
    }
}
