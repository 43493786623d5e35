use crate::error::{ConfigError, OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Declarative on-disk configuration: defaults for the placement engine,
/// package generator, reconciler, and TN enforcer. Loaded once at startup
/// and passed around as an explicit value — there is no global mutable
/// configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorFile {
    pub project: String,
    #[serde(default)]
    pub placement: PlacementSettings,
    #[serde(default)]
    pub package: PackageSettings,
    #[serde(default)]
    pub reconciler: ReconcilerSettings,
    #[serde(default)]
    pub tn: TnSettings,
    #[serde(default)]
    pub dms: DmsSettings,
    #[serde(default)]
    pub clusters: HashMap<String, ClusterEndpoint>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterEndpoint {
    pub url: String,
    #[serde(default)]
    pub simulated: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct PlacementSettings {
    pub weight_latency: f64,
    pub weight_capacity: f64,
    pub weight_type_match: f64,
    pub top_k_alternatives: usize,
    pub cache_capacity: usize,
}

impl Default for PlacementSettings {
    fn default() -> Self {
        Self {
            weight_latency: 0.5,
            weight_capacity: 0.3,
            weight_type_match: 0.2,
            top_k_alternatives: 3,
            cache_capacity: 4096,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PackageSettings {
    pub output_root: PathBuf,
    pub engine_version: String,
}

impl Default for PackageSettings {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("./rendered-packages"),
            engine_version: "1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcilerSettings {
    pub high_watermark: usize,
    pub cluster_pool_cap: usize,
    pub retry_base_ms: u64,
    pub retry_factor: f64,
    pub retry_jitter_pct: f64,
    pub retry_cap_ms: u64,
    pub retry_max_attempts: u32,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            high_watermark: 10_000,
            cluster_pool_cap: 16,
            retry_base_ms: 200,
            retry_factor: 2.0,
            retry_jitter_pct: 0.25,
            retry_cap_ms: 30_000,
            retry_max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TnSettings {
    pub probe_interval_secs: u64,
    pub command_timeout_secs: u64,
    pub command_semaphore: usize,
    pub jitter_correlation_pct: f64,
    pub burst_min_bytes: u64,
    pub burst_max_bytes: u64,
    pub burst_window_ms: u64,
}

impl Default for TnSettings {
    fn default() -> Self {
        Self {
            probe_interval_secs: 30,
            command_timeout_secs: 30,
            command_semaphore: 32,
            jitter_correlation_pct: 0.25,
            burst_min_bytes: 32 * 1024,
            burst_max_bytes: 4 * 1024 * 1024,
            burst_window_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DmsSettings {
    pub sustained_rps: u32,
    pub burst_rps: u32,
    pub bind_addr: String,
}

impl Default for DmsSettings {
    fn default() -> Self {
        Self {
            sustained_rps: 100,
            burst_rps: 200,
            bind_addr: "0.0.0.0".to_string(),
        }
    }
}

impl OrchestratorFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| {
            OrchestratorError::Config(ConfigError::NotFound {
                path: path.display().to_string(),
            })
        })?;

        let file: OrchestratorFile = toml::from_str(&content)?;
        Ok(file)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            OrchestratorError::Config(ConfigError::InvalidFormat {
                reason: e.to_string(),
            })
        })?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl Default for OrchestratorFile {
    fn default() -> Self {
        Self {
            project: "default".to_string(),
            placement: PlacementSettings::default(),
            package: PackageSettings::default(),
            reconciler: ReconcilerSettings::default(),
            tn: TnSettings::default(),
            dms: DmsSettings::default(),
            clusters: HashMap::new(),
        }
    }
}

/// Process-level configuration: resolved directories, verbosity, and the
/// loaded `OrchestratorFile`. Built once in `main` and passed down as an
/// explicit value to every component constructor — no `lazy_static`/
/// `OnceCell` global holds this.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub config_file_path: PathBuf,
    pub verbose: bool,
    pub file: OrchestratorFile,
}

impl OrchestratorConfig {
    /// Resolve directories from XDG conventions and load the declarative
    /// file if present, falling back to defaults when it is not.
    pub fn load(config_file_path: Option<PathBuf>, verbose: bool) -> Result<Self> {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("slicecast");

        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("slicecast");

        let config_file_path = config_file_path.unwrap_or_else(|| {
            std::env::current_dir()
                .unwrap_or_default()
                .join("slicecast.toml")
        });

        let file = if config_file_path.exists() {
            OrchestratorFile::load(&config_file_path)?
        } else {
            OrchestratorFile::default()
        };

        Ok(Self::apply_env_overrides(Self {
            config_dir,
            data_dir,
            config_file_path,
            verbose,
            file,
        }))
    }

    /// Environment overrides take precedence over the file.
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("SLICECAST_DMS_BIND") {
            self.file.dms.bind_addr = v;
        }
        if let Ok(v) = std::env::var("SLICECAST_OUTPUT_ROOT") {
            self.file.package.output_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SLICECAST_TN_PROBE_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                self.file.tn.probe_interval_secs = n;
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_file_round_trips_through_toml() {
        let file = OrchestratorFile::default();
        let serialized = toml::to_string_pretty(&file).unwrap();
        let parsed: OrchestratorFile = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.project, file.project);
        assert_eq!(parsed.placement.top_k_alternatives, 3);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = OrchestratorConfig::load(Some(PathBuf::from("/nonexistent/slicecast.toml")), false)
            .unwrap();
        assert_eq!(cfg.file.reconciler.high_watermark, 10_000);
    }
}
