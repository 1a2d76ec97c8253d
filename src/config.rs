use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Error;

/// Default sampling period in milliseconds.
pub const DEFAULT_PERIOD_MS: u64 = 100;
/// Default tolerance fraction around the expected cycle delta.
pub const DEFAULT_TOLERANCE: f64 = 0.05;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub period_ms: u64,
    pub tolerance: f64,
    pub cpuinfo: PathBuf,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            period_ms: DEFAULT_PERIOD_MS,
            tolerance: DEFAULT_TOLERANCE,
            cpuinfo: PathBuf::from("/proc/cpuinfo"),
        }
    }
}

impl SamplerConfig {
    /// Clamp fields to valid ranges.
    pub fn validate(&mut self) {
        self.period_ms = self.period_ms.clamp(1, 60_000);
        self.tolerance = self.tolerance.clamp(0.001, 0.5);
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sampler: SamplerConfig,
}

/// Load configuration from a TOML file.
///
/// - If `explicit_path` is `Some` and the file is missing, returns an error.
/// - If `explicit_path` is `None`, tries `/etc/tscmon.toml`; if missing, returns defaults.
pub fn load_config(explicit_path: Option<&Path>) -> Result<Config, Error> {
    let path = match explicit_path {
        Some(p) => {
            if !p.exists() {
                return Err(Error::InvalidArgs(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            p.to_path_buf()
        }
        None => {
            let default = Path::new("/etc/tscmon.toml");
            if !default.exists() {
                return Ok(Config::default());
            }
            default.to_path_buf()
        }
    };

    let contents = std::fs::read_to_string(&path).map_err(|e| {
        Error::InvalidArgs(format!("failed to read config {}: {}", path.display(), e))
    })?;

    let config: Config = toml::from_str(&contents).map_err(|e| {
        Error::InvalidArgs(format!("failed to parse config {}: {}", path.display(), e))
    })?;

    Ok(config)
}
