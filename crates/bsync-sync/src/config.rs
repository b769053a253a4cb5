use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use bsync_index::ScanOptions;
use bsync_pack::limits::{DEFAULT_CHANGE_LIMIT, DEFAULT_PROJECT_LIMIT, DEFAULT_WARN_RATIO};
use bsync_pack::SizeGuard;
use bsync_types::PathNormalizer;
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

pub const CONFIG_FILE: &str = "bsync.toml";
pub const STATE_FILE: &str = "state.json";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub base_url: String,
    /// Defaults to the project directory name.
    pub project_id: Option<String>,
    pub manifest_name: String,
    pub strip_prefixes: Vec<String>,
    pub ignore: Vec<String>,
    pub state_dir: PathBuf,
    pub limits: LimitsConfig,
    pub affinity: AffinityConfig,
    pub max_host_failures: u32,
    pub request_timeout_ms: u64,
    pub debounce_ms: u64,
    pub hash_concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".into(),
            project_id: None,
            manifest_name: "manifest.json".into(),
            strip_prefixes: Vec::new(),
            ignore: Vec::new(),
            state_dir: PathBuf::from(".bsync"),
            limits: LimitsConfig::default(),
            affinity: AffinityConfig::default(),
            max_host_failures: 3,
            request_timeout_ms: 120_000,
            debounce_ms: 300,
            hash_concurrency: 8,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub project_max_bytes: u64,
    pub change_max_bytes: u64,
    pub warn_ratio: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            project_max_bytes: DEFAULT_PROJECT_LIMIT,
            change_max_bytes: DEFAULT_CHANGE_LIMIT,
            warn_ratio: DEFAULT_WARN_RATIO,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AffinityConfig {
    pub candidate_count: usize,
    pub probe_timeout_ms: u64,
}

impl Default for AffinityConfig {
    fn default() -> Self {
        Self {
            candidate_count: 3,
            probe_timeout_ms: 2_000,
        }
    }
}

impl AffinityConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl SyncConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    /// Environment overrides are applied afterwards.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e.into()),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> SyncResult<Self> {
        toml::from_str(text).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Apply `BSYNC_BASE_URL` and `BSYNC_PROJECT_ID`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("BSYNC_BASE_URL").filter(|v| !v.is_empty()) {
            self.base_url = url;
        }
        if let Some(id) = lookup("BSYNC_PROJECT_ID").filter(|v| !v.is_empty()) {
            self.project_id = Some(id);
        }
    }

    /// The configured project id, or the name of `root`.
    pub fn project_id_for(&self, root: &Path) -> SyncResult<String> {
        if let Some(id) = &self.project_id {
            return Ok(id.clone());
        }
        root.canonicalize()
            .ok()
            .as_deref()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| SyncError::Config("cannot derive a project id; set `project_id`".into()))
    }

    pub fn state_file(&self, root: &Path) -> PathBuf {
        root.join(&self.state_dir).join(STATE_FILE)
    }

    pub fn normalizer(&self) -> PathNormalizer {
        PathNormalizer::with_strip_prefixes(&self.strip_prefixes)
    }

    /// Scanner options for a project at `root`. The state directory is
    /// skipped at its own location only.
    pub fn scan_options(&self, root: &Path) -> ScanOptions {
        let mut options = ScanOptions {
            ignore: self.ignore.clone(),
            hash_concurrency: self.hash_concurrency.max(1),
            ..ScanOptions::default()
        };
        let state_dir = if self.state_dir.is_absolute() {
            self.state_dir.strip_prefix(root).ok().map(Path::to_path_buf)
        } else {
            Some(self.state_dir.clone())
        };
        let state_dir: Option<PathBuf> = state_dir.map(|dir| {
            dir.components()
                .filter(|c| !matches!(c, Component::CurDir))
                .collect()
        });
        if let Some(dir) = state_dir.filter(|d| d.components().next().is_some()) {
            if !options.skip_paths.contains(&dir) {
                options.skip_paths.push(dir);
            }
        }
        options
    }

    pub fn size_guard(&self) -> SizeGuard {
        SizeGuard::new(
            self.limits.project_max_bytes,
            self.limits.change_max_bytes,
            self.limits.warn_ratio,
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
