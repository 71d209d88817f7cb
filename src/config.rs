use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{DetectionFilter, FilterChain};
use crate::frame::LabelMap;
use crate::ingest::{SourceConfig, SourceMode, DEFAULT_MAX_RETRIES, DEFAULT_RECONNECT_DELAY_MS};
use crate::retention::RetentionConfig;
use crate::window::WindowSettings;

pub const CONFIG_ENV: &str = "CLIP_SAVER_CONFIG";

const DEFAULT_INACTIVITY_SECS: u64 = 30;
const DEFAULT_MAX_WINDOW_SECS: u64 = 300;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_DETECTOR_BACKEND: &str = "stub";
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DEFAULT_SOURCE_URL: &str = "stub://front_camera";
const DEFAULT_OUTPUT_DIR: &str = "outputs";

#[derive(Debug, Deserialize, Default)]
struct ClipSaverConfigFile {
    window: Option<WindowConfigFile>,
    detector: Option<DetectorConfigFile>,
    retention: Option<RetentionConfig>,
    sources: Option<Vec<SourceConfigFile>>,
    output: Option<OutputConfigFile>,
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize, Default)]
struct WindowConfigFile {
    inactivity_gap_secs: Option<u64>,
    max_window_secs: Option<u64>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    confidence_threshold: Option<f32>,
    classes: Option<Vec<u32>>,
}

#[derive(Debug, Deserialize)]
struct SourceConfigFile {
    url: String,
    mode: Option<SourceMode>,
    max_retries: Option<u32>,
    reconnect_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ClipSaverConfig {
    pub window: WindowSettings,
    pub poll_interval: Duration,
    pub detector: DetectorSettings,
    pub retention: RetentionConfig,
    pub sources: Vec<SourceConfig>,
    pub output_dir: PathBuf,
    pub labels: LabelMap,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub confidence_threshold: f32,
    /// Class allowlist. `None` keeps every class.
    pub classes: Option<BTreeSet<u32>>,
}

impl DetectorSettings {
    pub fn filters(&self) -> FilterChain {
        let mut chain = FilterChain::new().with(DetectionFilter::MinConfidence(self.confidence_threshold));
        if let Some(classes) = &self.classes {
            chain.push(DetectionFilter::Classes(classes.clone()));
        }
        chain
    }
}

impl ClipSaverConfig {
    /// Load from the file named by `CLIP_SAVER_CONFIG`, if any.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit file (or defaults), then apply env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ClipSaverConfigFile) -> Result<Self> {
        let window_file = file.window.unwrap_or_default();
        let window = WindowSettings {
            inactivity_gap: Duration::from_secs(
                window_file
                    .inactivity_gap_secs
                    .unwrap_or(DEFAULT_INACTIVITY_SECS),
            ),
            max_duration: Duration::from_secs(
                window_file.max_window_secs.unwrap_or(DEFAULT_MAX_WINDOW_SECS),
            ),
        };
        let poll_interval = Duration::from_millis(
            window_file
                .poll_interval_ms
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        );

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR_BACKEND.to_string()),
            confidence_threshold: detector_file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            classes: detector_file
                .classes
                .map(|classes| classes.into_iter().collect()),
        };

        let sources = match file.sources {
            Some(sources) => sources
                .into_iter()
                .map(|source| SourceConfig {
                    url: source.url,
                    mode: source.mode.unwrap_or_default(),
                    max_retries: source.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
                    reconnect_delay: Duration::from_millis(
                        source
                            .reconnect_delay_ms
                            .unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
                    ),
                })
                .collect(),
            None => vec![SourceConfig::new(DEFAULT_SOURCE_URL)],
        };

        let output_dir = file
            .output
            .and_then(|output| output.dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

        let labels = match file.labels {
            Some(raw) => parse_labels(raw)?,
            None => LabelMap::new(),
        };

        Ok(Self {
            window,
            poll_interval,
            detector,
            retention: file.retention.unwrap_or_default(),
            sources,
            output_dir,
            labels,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(secs) = std::env::var("CLIP_SAVER_INACTIVITY_SECS") {
            let seconds: u64 = secs.trim().parse().map_err(|_| {
                anyhow!("CLIP_SAVER_INACTIVITY_SECS must be an integer number of seconds")
            })?;
            self.window.inactivity_gap = Duration::from_secs(seconds);
        }
        if let Ok(secs) = std::env::var("CLIP_SAVER_MAX_WINDOW_SECS") {
            let seconds: u64 = secs.trim().parse().map_err(|_| {
                anyhow!("CLIP_SAVER_MAX_WINDOW_SECS must be an integer number of seconds")
            })?;
            self.window.max_duration = Duration::from_secs(seconds);
        }
        if let Ok(confidence) = std::env::var("CLIP_SAVER_CONFIDENCE") {
            self.detector.confidence_threshold = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("CLIP_SAVER_CONFIDENCE must be a number"))?;
        }
        if let Ok(sources) = std::env::var("CLIP_SAVER_SOURCES") {
            let parsed = split_csv(&sources);
            if !parsed.is_empty() {
                self.sources = parsed.into_iter().map(SourceConfig::new).collect();
            }
        }
        if let Ok(dir) = std::env::var("CLIP_SAVER_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(policy) = std::env::var("CLIP_SAVER_RETENTION") {
            if !policy.trim().is_empty() {
                let selected = RetentionConfig::from_name(&policy)?;
                // Same policy keeps its configured parameters.
                if std::mem::discriminant(&selected) != std::mem::discriminant(&self.retention) {
                    self.retention = selected;
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.window.validate()?;
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        let threshold = self.detector.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "confidence threshold must be within [0, 1], got {}",
                threshold
            ));
        }
        if self.detector.backend.trim().is_empty() {
            return Err(anyhow!("detector backend must not be empty"));
        }
        if self.sources.is_empty() {
            return Err(anyhow!("at least one source must be configured"));
        }
        if let Some(source) = self.sources.iter().find(|s| s.url.trim().is_empty()) {
            return Err(anyhow!("source url must not be empty: {:?}", source));
        }
        if let Some(source) = self
            .sources
            .iter()
            .find(|s| s.mode == SourceMode::Resilient && s.reconnect_delay.is_zero())
        {
            return Err(anyhow!(
                "reconnect delay must be greater than zero for resilient source {}",
                source.url
            ));
        }
        self.retention.validate()?;
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ClipSaverConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn parse_labels(raw: BTreeMap<String, String>) -> Result<LabelMap> {
    raw.into_iter()
        .map(|(id, name)| {
            let id: u32 = id
                .trim()
                .parse()
                .map_err(|_| anyhow!("label key '{}' must be a class id", id))?;
            Ok((id, name))
        })
        .collect()
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
