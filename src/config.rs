//! Configuration loading helpers.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::device::{
    Capacity, FileSegmentDevice, IoDispatcher, StorageDevice, TierError, TieredStorageDevice,
};
use crate::epoch::{EpochConfig, LightEpoch};
use crate::resolve::PipelineConfig;
use crate::revivification::{FreePoolConfig, ReclamationConfig, WorkerConfig};

/// Largest accepted `segment_size_bits`
const MAX_SEGMENT_SIZE_BITS: u32 = 40;

/// Errors returned by configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error while reading config files or opening devices.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parse error.
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
    /// Invalid value for a key.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Raw value string.
        value: String,
    },
    /// Unknown configuration key.
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    /// Missing required configuration field.
    #[error("missing required field: {0}")]
    MissingField(String),
    /// The tier layout was rejected.
    #[error("tier layout: {0}")]
    Tier(#[from] TierError),
}

/// Top-level configuration schema.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OxitierConfig {
    /// Epoch table configuration.
    pub epoch: Option<EpochConfigSpec>,
    /// Resolution pipeline configuration.
    pub pipeline: Option<PipelineConfigSpec>,
    /// Free pool and bump worker configuration.
    pub reclamation: Option<ReclamationConfigSpec>,
    /// Tiered device layout.
    pub tiered: Option<TieredConfigSpec>,
}

impl OxitierConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration from the `OXITIER_CONFIG` env var (if set),
    /// then apply `OXITIER__section__field` overrides.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let config_path = env::var("OXITIER_CONFIG").ok();
        let mut config = match config_path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment overrides in-place.
    ///
    /// Tier entries can only come from the file; scalar `tiered` fields can be overridden.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        for (key, value) in env::vars() {
            if !key.starts_with("OXITIER__") {
                continue;
            }
            let path = key["OXITIER__".len()..].to_ascii_lowercase();
            let parts: Vec<&str> = path.split("__").collect();
            let value = value.trim();

            match parts.as_slice() {
                ["epoch", "table_size"] => {
                    self.epoch_mut().table_size = Some(parse_value(&key, value)?);
                }
                ["epoch", "drain_list_size"] => {
                    self.epoch_mut().drain_list_size = Some(parse_value(&key, value)?);
                }
                ["pipeline", "max_outstanding_reads"] => {
                    self.pipeline_mut().max_outstanding_reads = Some(parse_value(&key, value)?);
                }
                ["pipeline", "read_size_hint"] => {
                    self.pipeline_mut().read_size_hint = Some(parse_value(&key, value)?);
                }
                ["pipeline", "buffers_per_class"] => {
                    self.pipeline_mut().buffers_per_class = Some(parse_value(&key, value)?);
                }
                ["reclamation", "bump_interval_ms"] => {
                    self.reclamation_mut().bump_interval_ms = Some(parse_value(&key, value)?);
                }
                ["reclamation", "max_count_for_bump"] => {
                    self.reclamation_mut().max_count_for_bump = Some(parse_value(&key, value)?);
                }
                ["reclamation", "bins"] => {
                    self.reclamation_mut().bins = Some(parse_value(&key, value)?);
                }
                ["reclamation", "slots_per_bin"] => {
                    self.reclamation_mut().slots_per_bin = Some(parse_value(&key, value)?);
                }
                ["tiered", "commit_point"] => {
                    self.tiered_mut().commit_point = Some(parse_value(&key, value)?);
                }
                ["tiered", "segment_size_bits"] => {
                    self.tiered_mut().segment_size_bits = Some(parse_value(&key, value)?);
                }
                ["tiered", "io_threads"] => {
                    self.tiered_mut().io_threads = Some(parse_value(&key, value)?);
                }
                _ => return Err(ConfigError::UnknownKey(key)),
            }
        }

        Ok(())
    }

    /// Build an `EpochConfig` using defaults plus overrides.
    pub fn epoch_config(&self) -> EpochConfig {
        let mut config = EpochConfig::default();
        if let Some(epoch) = &self.epoch {
            epoch.apply_to(&mut config);
        }
        config
    }

    /// Build a `PipelineConfig` using defaults plus overrides.
    pub fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        if let Some(pipeline) = &self.pipeline {
            pipeline.apply_to(&mut config);
        }
        config
    }

    /// Build a `ReclamationConfig` using defaults plus overrides.
    pub fn reclamation_config(&self) -> ReclamationConfig {
        let mut config = ReclamationConfig::default();
        if let Some(reclamation) = &self.reclamation {
            reclamation.apply_to(&mut config);
        }
        config
    }

    /// Open the tiered device described by `[tiered]`.
    ///
    /// Each tier is a segment-file directory. With `io_threads` set, tier I/O runs on a
    /// blocking thread pool; otherwise it completes on the calling thread.
    pub fn open_tiered_device(
        &self,
        epoch: Arc<LightEpoch>,
    ) -> Result<TieredStorageDevice, ConfigError> {
        let tiered = self
            .tiered
            .as_ref()
            .ok_or_else(|| ConfigError::MissingField("tiered".into()))?;
        let bits = tiered
            .segment_size_bits
            .ok_or_else(|| ConfigError::MissingField("tiered.segment_size_bits".into()))?;
        if bits == 0 || bits > MAX_SEGMENT_SIZE_BITS {
            return Err(ConfigError::InvalidValue {
                key: "tiered.segment_size_bits".into(),
                value: bits.to_string(),
            });
        }
        if tiered.tiers.is_empty() {
            return Err(ConfigError::MissingField("tiered.tiers".into()));
        }

        let segment_size = 1u64 << bits;
        let mut devices: Vec<Arc<dyn StorageDevice>> = Vec::with_capacity(tiered.tiers.len());
        for (i, tier) in tiered.tiers.iter().enumerate() {
            let prefix = tier
                .prefix
                .clone()
                .unwrap_or_else(|| format!("tier{i}"));
            let capacity = match tier.capacity_segments {
                Some(segments) => Capacity::Segments(segments),
                None => Capacity::Unspecified,
            };
            let file = FileSegmentDevice::new(&tier.dir, &prefix, segment_size, capacity)?;
            let device: Arc<dyn StorageDevice> = match tiered.io_threads {
                Some(threads) => Arc::new(IoDispatcher::new(file, threads)?),
                None => Arc::new(file),
            };
            devices.push(device);
        }

        let commit_point = tiered.commit_point.unwrap_or(devices.len() - 1);
        Ok(TieredStorageDevice::new(epoch, commit_point, devices)?)
    }

    fn epoch_mut(&mut self) -> &mut EpochConfigSpec {
        self.epoch.get_or_insert_with(EpochConfigSpec::default)
    }

    fn pipeline_mut(&mut self) -> &mut PipelineConfigSpec {
        self.pipeline.get_or_insert_with(PipelineConfigSpec::default)
    }

    fn reclamation_mut(&mut self) -> &mut ReclamationConfigSpec {
        self.reclamation
            .get_or_insert_with(ReclamationConfigSpec::default)
    }

    fn tiered_mut(&mut self) -> &mut TieredConfigSpec {
        self.tiered.get_or_insert_with(TieredConfigSpec::default)
    }
}

/// Epoch configuration overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EpochConfigSpec {
    /// Per-thread protection slots.
    pub table_size: Option<usize>,
    /// Deferred-action slots.
    pub drain_list_size: Option<usize>,
}

impl EpochConfigSpec {
    fn apply_to(&self, config: &mut EpochConfig) {
        if let Some(value) = self.table_size {
            config.table_size = value.max(1);
        }
        if let Some(value) = self.drain_list_size {
            config.drain_list_size = value.max(1);
        }
    }
}

/// Pipeline configuration overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfigSpec {
    /// Reads allowed in flight.
    pub max_outstanding_reads: Option<usize>,
    /// Bytes fetched by the first read of a record.
    pub read_size_hint: Option<usize>,
    /// Idle buffers kept per size class.
    pub buffers_per_class: Option<usize>,
}

impl PipelineConfigSpec {
    fn apply_to(&self, config: &mut PipelineConfig) {
        if let Some(value) = self.max_outstanding_reads {
            config.max_outstanding_reads = value.max(1);
        }
        if let Some(value) = self.read_size_hint {
            config.read_size_hint = value;
        }
        if let Some(value) = self.buffers_per_class {
            config.buffers_per_class = value;
        }
    }
}

/// Reclamation configuration overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReclamationConfigSpec {
    /// Longest wait between epoch bumps, in milliseconds.
    pub bump_interval_ms: Option<u64>,
    /// Waiting-record count that triggers an immediate bump.
    pub max_count_for_bump: Option<usize>,
    /// Number of free pool size classes.
    pub bins: Option<usize>,
    /// Slots per size class.
    pub slots_per_bin: Option<usize>,
}

impl ReclamationConfigSpec {
    fn apply_to(&self, config: &mut ReclamationConfig) {
        let WorkerConfig {
            bump_interval,
            max_count_for_bump,
        } = &mut config.worker;
        if let Some(value) = self.bump_interval_ms {
            *bump_interval = Duration::from_millis(value);
        }
        if let Some(value) = self.max_count_for_bump {
            *max_count_for_bump = value.max(1);
        }

        let FreePoolConfig {
            bins,
            slots_per_bin,
        } = &mut config.pool;
        if let Some(value) = self.bins {
            *bins = value.max(1);
        }
        if let Some(value) = self.slots_per_bin {
            *slots_per_bin = value.max(1);
        }
    }
}

/// Tiered device layout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TieredConfigSpec {
    /// Index of the tier whose completion reports a write (defaults to the coldest).
    pub commit_point: Option<usize>,
    /// Log2 of the segment size shared by all tiers.
    pub segment_size_bits: Option<u32>,
    /// Blocking I/O threads per tier; unset runs I/O inline.
    pub io_threads: Option<usize>,
    /// Tiers, hottest first.
    #[serde(default)]
    pub tiers: Vec<TierSpec>,
}

/// One tier of the tiered device.
#[derive(Debug, Clone, Deserialize)]
pub struct TierSpec {
    /// Directory holding this tier's segment files.
    pub dir: PathBuf,
    /// Segment file prefix (defaults to `tier<index>`).
    pub prefix: Option<String>,
    /// Segments retained; unset means unbounded (coldest tier only).
    pub capacity_segments: Option<u64>,
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
