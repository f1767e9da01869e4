//! Engine configuration: defaults, optional JSON file, `PLANWEAVE_*` overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};

const MAX_DEFAULT_WORKERS: usize = 8;

/// Weighted linear complexity policy. The weights and thresholds are a
/// calibration choice; the caps turn raw counts into [0, 1] factors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityPolicy {
    pub file_weight: f64,
    pub symbol_complexity_weight: f64,
    pub fan_out_weight: f64,
    pub line_delta_weight: f64,
    pub trivial_threshold: f64,
    pub moderate_threshold: f64,
    pub file_cap: f64,
    pub symbol_complexity_cap: f64,
    pub fan_out_cap: f64,
    pub line_delta_cap: f64,
}

impl Default for ComplexityPolicy {
    fn default() -> Self {
        Self {
            file_weight: 0.4,
            symbol_complexity_weight: 0.3,
            fan_out_weight: 0.2,
            line_delta_weight: 0.1,
            trivial_threshold: 0.3,
            moderate_threshold: 0.6,
            file_cap: 5.0,
            symbol_complexity_cap: 20.0,
            fan_out_cap: 10.0,
            line_delta_cap: 200.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Size of the parser thread pool.
    pub workers: usize,
    /// Budget for a whole `decompose` run.
    pub timeout_ms: u64,
    pub cache_max_entries: usize,
    pub retrieval_top_k: usize,
    /// Upper bound on enumerated elementary cycles per call.
    pub max_cycles: usize,
    pub complexity: ComplexityPolicy,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_DEFAULT_WORKERS)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timeout_ms: 30_000,
            cache_max_entries: 64,
            retrieval_top_k: 5,
            max_cycles: 256,
            complexity: ComplexityPolicy::default(),
        }
    }
}

fn env_usize(name: &str) -> EngineResult<Option<usize>> {
    match std::env::var(name) {
        Ok(val) => {
            let trimmed = val.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<usize>()
                .map(Some)
                .map_err(|e| EngineError::Config(format!("{name}={trimmed}: {e}")))
        }
        Err(_) => Ok(None),
    }
}

impl EngineConfig {
    /// Load a JSON config file; absent fields keep their defaults.
    pub fn from_json_file(path: &Path) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Overlay `PLANWEAVE_*` environment variables; blank values are ignored.
    pub fn with_env_overrides(mut self) -> EngineResult<Self> {
        if let Some(workers) = env_usize("PLANWEAVE_WORKERS")? {
            self.workers = workers;
        }
        if let Some(timeout) = env_usize("PLANWEAVE_TIMEOUT_MS")? {
            self.timeout_ms = timeout as u64;
        }
        if let Some(entries) = env_usize("PLANWEAVE_CACHE_MAX_ENTRIES")? {
            self.cache_max_entries = entries;
        }
        if let Some(top_k) = env_usize("PLANWEAVE_RETRIEVAL_TOP_K")? {
            self.retrieval_top_k = top_k;
        }
        Ok(self)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.workers == 0 {
            return Err(EngineError::Config("workers must be at least 1".into()));
        }
        if self.timeout_ms == 0 {
            return Err(EngineError::Config("timeout_ms must be positive".into()));
        }
        if self.cache_max_entries == 0 {
            return Err(EngineError::Config(
                "cache_max_entries must be at least 1".into(),
            ));
        }
        if self.retrieval_top_k == 0 {
            return Err(EngineError::Config(
                "retrieval_top_k must be at least 1".into(),
            ));
        }
        let policy = &self.complexity;
        let weights = [
            policy.file_weight,
            policy.symbol_complexity_weight,
            policy.fan_out_weight,
            policy.line_delta_weight,
        ];
        if weights.iter().any(|w| *w < 0.0) {
            return Err(EngineError::Config(
                "complexity weights must be non-negative".into(),
            ));
        }
        let total: f64 = weights.iter().sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(EngineError::Config(format!(
                "complexity weights must sum to 1.0, got {total}"
            )));
        }
        if !(policy.trivial_threshold > 0.0
            && policy.trivial_threshold <= policy.moderate_threshold
            && policy.moderate_threshold < 1.0)
        {
            return Err(EngineError::Config(
                "complexity thresholds must satisfy 0 < trivial <= moderate < 1".into(),
            ));
        }
        let caps = [
            policy.file_cap,
            policy.symbol_complexity_cap,
            policy.fan_out_cap,
            policy.line_delta_cap,
        ];
        if caps.iter().any(|c| *c <= 0.0) {
            return Err(EngineError::Config(
                "complexity caps must be positive".into(),
            ));
        }
        Ok(())
    }
}
