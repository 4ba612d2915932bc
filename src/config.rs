use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Configuration for the GPU timing pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    /// Timestamp query ring capacity per node. Default: 512.
    ///
    /// Must cover the maximum number of `query_timestamp` calls issued
    /// across `frame_delay` frames in flight; exceeding it in a single
    /// frame is a fatal usage error.
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,

    /// Number of frames kept in flight before a frame's query results
    /// are assumed resolvable. Default: 4.
    #[serde(default = "default_frame_delay")]
    pub frame_delay: usize,

    /// Iteration cap for the bounded busy-poll waits (validity-query
    /// read at end of frame, clock synchronization). Default: 4M.
    #[serde(default = "default_spin_limit")]
    pub spin_limit: u64,
}

fn default_max_queries() -> usize {
    512
}

fn default_frame_delay() -> usize {
    4
}

fn default_spin_limit() -> u64 {
    4_000_000
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            max_queries: default_max_queries(),
            frame_delay: default_frame_delay(),
            spin_limit: default_spin_limit(),
        }
    }
}

impl TimingConfig {
    /// Load and validate a config from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: TimingConfig = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate field ranges.
    pub fn validate(&self) -> Result<()> {
        if self.max_queries == 0 {
            bail!("max_queries must be positive");
        }

        if self.frame_delay < 2 {
            bail!("frame_delay must be at least 2 (one frame of slack)");
        }

        if self.max_queries < self.frame_delay {
            bail!("max_queries must be at least frame_delay");
        }

        if self.spin_limit == 0 {
            bail!("spin_limit must be positive");
        }

        Ok(())
    }
}
