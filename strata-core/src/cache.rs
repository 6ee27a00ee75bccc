//! Cache invalidation for incremental builds.
//!
//! Every run fingerprints the plugin set, the watched config files and the
//! feature flags. The fingerprint is compared with the one recorded by the
//! previous run; when they differ the cache directory is wiped and the site
//! store is reset before any phase can read stale data.
//!
//! # Files
//!
//! The baseline is stored next to the cache directory, so wiping the cache
//! never loses it:
//!
//! ```json
//! {
//!   "version": "1",
//!   "fingerprint": "blake3:9f2c...",
//!   "recorded_at": "2024-05-01T10:00:00Z"
//! }
//! ```
//!
//! Incremental state (pages and redirects) is stored inside the cache
//! directory as `state.json` and is only trusted when the fingerprint
//! matched.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::{PluginDescriptor, SitePaths};
use crate::error::CacheError;
use crate::store::{SiteStore, StoreSnapshot};

/// Current persisted format version. Increment when either file changes shape.
const CACHE_VERSION: &str = "1";

/// Incremental state file inside the cache directory.
const STATE_FILE: &str = "state.json";

/// Digest summarizing everything that decides cache validity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    plugins: Vec<(&'a str, &'a str)>,
    files: Vec<Option<String>>,
    flags: &'a BTreeMap<String, bool>,
}

/// Compute the fingerprint for a run.
///
/// Plugins are sorted by name and version first, so declaration order does
/// not matter. Watched files that are missing or unreadable hash as absent.
pub fn compute_fingerprint(
    plugins: &[PluginDescriptor],
    config_paths: &[PathBuf],
    flags: &BTreeMap<String, bool>,
) -> Fingerprint {
    let mut pairs: Vec<(&str, &str)> = plugins
        .iter()
        .map(|p| (p.name.as_str(), p.version.as_str()))
        .collect();
    pairs.sort_unstable();

    let files = config_paths.iter().map(|p| hash_file(p)).collect();

    let input = FingerprintInput {
        plugins: pairs,
        files,
        flags,
    };
    // Serializing tuples, strings and a BTreeMap cannot fail
    let bytes = serde_json::to_vec(&input).unwrap_or_default();
    Fingerprint(format!("blake3:{}", blake3::hash(&bytes).to_hex()))
}

fn hash_file(path: &Path) -> Option<String> {
    let content = fs::read(path).ok()?;
    Some(blake3::hash(&content).to_hex().to_string())
}

/// Why the cache is or is not wiped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// No baseline existed; the cache is adopted as-is.
    Initialized,
    /// The baseline matches.
    Valid,
    /// The baseline differs; the cache must be wiped.
    Invalidated,
}

/// Outcome of comparing the previous and current fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheDecision {
    pub wipe: bool,
    pub status: CacheStatus,
}

/// Decide whether the cache must be wiped.
pub fn decide(old: Option<&Fingerprint>, new: &Fingerprint) -> CacheDecision {
    match old {
        None => CacheDecision {
            wipe: false,
            status: CacheStatus::Initialized,
        },
        Some(old) if old == new => CacheDecision {
            wipe: false,
            status: CacheStatus::Valid,
        },
        Some(_) => CacheDecision {
            wipe: true,
            status: CacheStatus::Invalidated,
        },
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BaselineRecord {
    version: String,
    fingerprint: Fingerprint,
    recorded_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateRecord {
    version: String,
    #[serde(flatten)]
    snapshot: StoreSnapshot,
}

/// What the cache step did during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOutcome {
    pub fingerprint: Fingerprint,
    pub status: CacheStatus,
    /// The fingerprint comparison asked for a wipe.
    pub wipe_requested: bool,
    /// The cache directory was actually cleared this run.
    pub wiped: bool,
    /// Pages restored from the previous run.
    pub restored_pages: usize,
}

/// Owns the cache directory and the fingerprint baseline.
#[derive(Debug, Clone)]
pub struct CacheEngine {
    cache_dir: PathBuf,
    fingerprint_file: PathBuf,
    watched: Vec<PathBuf>,
}

impl CacheEngine {
    pub fn new(paths: &SitePaths) -> Self {
        Self {
            cache_dir: paths.cache_dir.clone(),
            fingerprint_file: paths.fingerprint_file.clone(),
            watched: paths.watched.clone(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn fingerprint_file(&self) -> &Path {
        &self.fingerprint_file
    }

    /// What the next run would decide, without touching anything.
    pub fn inspect(
        &self,
        plugins: &[PluginDescriptor],
        flags: &BTreeMap<String, bool>,
    ) -> (Fingerprint, CacheStatus) {
        let fingerprint = compute_fingerprint(plugins, &self.watched, flags);
        let status = decide(self.load_baseline().as_ref(), &fingerprint).status;
        (fingerprint, status)
    }

    /// Fingerprint the run, wipe or restore, and record the new baseline.
    ///
    /// Cache maintenance failures are logged and never abort the run.
    pub async fn initialize(
        &self,
        plugins: &[PluginDescriptor],
        flags: &BTreeMap<String, bool>,
        store: &SiteStore,
    ) -> CacheOutcome {
        let fingerprint = compute_fingerprint(plugins, &self.watched, flags);
        let previous = self.load_baseline();
        let decision = decide(previous.as_ref(), &fingerprint);
        let mut restored_pages = 0;
        let mut wiped = false;

        match decision.status {
            CacheStatus::Invalidated => {
                tracing::info!("Plugins or config changed, deleting cache");
                match clear_dir(&self.cache_dir) {
                    Ok(()) => wiped = true,
                    Err(e) => tracing::warn!("{}, stale cache files remain", e),
                }
                store.reset().await;
            }
            CacheStatus::Valid => match self.load_state() {
                Ok(Some(snapshot)) => {
                    restored_pages = snapshot.pages.len();
                    store.restore(snapshot).await;
                    tracing::debug!("Restored {} pages from cache", restored_pages);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("{}", e),
            },
            CacheStatus::Initialized => {
                tracing::debug!("No fingerprint baseline found, adopting cache");
            }
        }

        if let Err(e) = fs::create_dir_all(&self.cache_dir) {
            tracing::warn!("Failed to create cache directory {:?}: {}", self.cache_dir, e);
        }
        if let Err(e) = self.persist_baseline(&fingerprint) {
            tracing::warn!("{}", e);
        }

        CacheOutcome {
            fingerprint,
            status: decision.status,
            wipe_requested: decision.wipe,
            wiped,
            restored_pages,
        }
    }

    /// Load the previous run's fingerprint.
    ///
    /// Returns `None` if the file doesn't exist, is invalid, or has an
    /// incompatible version.
    pub fn load_baseline(&self) -> Option<Fingerprint> {
        if !self.fingerprint_file.exists() {
            return None;
        }

        match fs::read_to_string(&self.fingerprint_file) {
            Ok(content) => match serde_json::from_str::<BaselineRecord>(&content) {
                Ok(record) if record.version == CACHE_VERSION => Some(record.fingerprint),
                Ok(record) => {
                    tracing::info!(
                        "Fingerprint version mismatch (found {}, expected {})",
                        record.version,
                        CACHE_VERSION
                    );
                    None
                }
                Err(e) => {
                    tracing::warn!("Failed to parse fingerprint file: {}", e);
                    None
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read fingerprint file: {}", e);
                None
            }
        }
    }

    /// Record the fingerprint as the baseline for the next run.
    pub fn persist_baseline(&self, fingerprint: &Fingerprint) -> Result<(), CacheError> {
        let record = BaselineRecord {
            version: CACHE_VERSION.to_string(),
            fingerprint: fingerprint.clone(),
            recorded_at: Utc::now().to_rfc3339(),
        };
        write_json(&self.fingerprint_file, &record)
    }

    /// Load persisted pages and redirects.
    pub fn load_state(&self) -> Result<Option<StoreSnapshot>, CacheError> {
        let path = self.cache_dir.join(STATE_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|e| CacheError::Load {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let record: StateRecord = serde_json::from_str(&content).map_err(|e| CacheError::Load {
            path: path.clone(),
            message: e.to_string(),
        })?;

        if record.version != CACHE_VERSION {
            tracing::info!(
                "State version mismatch (found {}, expected {}), starting fresh",
                record.version,
                CACHE_VERSION
            );
            return Ok(None);
        }
        Ok(Some(record.snapshot))
    }

    /// Persist pages and redirects for the next run.
    pub fn save_state(&self, snapshot: StoreSnapshot) -> Result<(), CacheError> {
        let record = StateRecord {
            version: CACHE_VERSION.to_string(),
            snapshot,
        };
        write_json(&self.cache_dir.join(STATE_FILE), &record)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CacheError> {
    let persist_err = |message: String| CacheError::Persist {
        path: path.to_path_buf(),
        message,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| persist_err(e.to_string()))?;
    }
    let content = serde_json::to_string_pretty(value).map_err(|e| persist_err(e.to_string()))?;
    fs::write(path, content).map_err(|e| persist_err(e.to_string()))
}

/// Remove a directory, falling back to removing its entries one by one.
///
/// The directory is recreated empty on success.
pub fn clear_dir(dir: &Path) -> Result<(), CacheError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::debug!("Removing {:?} failed ({}), emptying it instead", dir, e);
            empty_dir(dir).map_err(|source| CacheError::Remove {
                path: dir.to_path_buf(),
                source,
            })?;
        }
    }

    fs::create_dir_all(dir).map_err(|source| CacheError::Remove {
        path: dir.to_path_buf(),
        source,
    })
}

fn empty_dir(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
