//! Fingerprint store and dependency graph behind incremental builds.
//!
//! Every tracked file is keyed by its site-relative path (theme files, which
//! live outside the site, by their absolute path). An entry holds the file's
//! fingerprint when it was last processed plus the dependencies its render
//! touched. A document can be skipped only if its own fingerprint and the
//! fingerprint of every recorded dependency are unchanged, and none of the
//! template files it looked for without finding has appeared since.

use crate::error::{IoContext, Result};
use crate::files::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

pub const CACHE_DIR_NAME: &str = ".bramble-cache";
const CACHE_FILE_NAME: &str = "build-state.json";
const CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(flatten)]
    pub fingerprint: Fingerprint,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Files that did not exist at render time and would have been read if
    /// they had, such as a site layout that shadows a theme layout.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub absent: BTreeSet<String>,
    /// Output aggregates other documents (post lists, paginators).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub aggregate: bool,
    /// Templates read `site.data`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub uses_data: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheStore {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    config_digest: String,
    #[serde(default)]
    last_build: Option<DateTime<Utc>>,
    #[serde(default)]
    data_files: Vec<String>,
    #[serde(default)]
    entries: BTreeMap<String, CacheEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub file_count: usize,
    pub last_build_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct CacheManager {
    store_path: PathBuf,
    store: CacheStore,
}

impl CacheManager {
    /// Opens the store under `site_root`. A missing, unreadable or
    /// incompatible store yields an empty cache.
    pub fn load(site_root: &Path) -> Self {
        let store_path = site_root.join(CACHE_DIR_NAME).join(CACHE_FILE_NAME);
        let store = read_store(&store_path).unwrap_or_default();
        Self { store_path, store }
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// True when there is no entry for `key` or `path` no longer matches it.
    pub fn has_changed(&self, path: &Path, key: &str) -> bool {
        let Some(entry) = self.store.entries.get(key) else {
            return true;
        };

        match Fingerprint::of(path) {
            Ok(current) => current != entry.fingerprint,
            Err(_) => true,
        }
    }

    /// Records the current fingerprint of `path` and replaces its dependencies.
    pub fn update<I, S>(&mut self, path: &Path, key: &str, dependencies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match Fingerprint::of(path) {
            Ok(fingerprint) => {
                let entry = CacheEntry {
                    fingerprint,
                    dependencies: dependencies.into_iter().map(Into::into).collect(),
                    absent: BTreeSet::new(),
                    aggregate: false,
                    uses_data: false,
                };
                self.store.entries.insert(key.to_string(), entry);
            }
            Err(error) => {
                tracing::warn!("cannot fingerprint {}: {error}", path.display());
                self.store.entries.remove(key);
            }
        }
    }

    pub fn mark_aggregate(&mut self, key: &str) {
        if let Some(entry) = self.store.entries.get_mut(key) {
            entry.aggregate = true;
        }
    }

    pub fn is_aggregate(&self, key: &str) -> bool {
        self.store
            .entries
            .get(key)
            .is_some_and(|entry| entry.aggregate)
    }

    pub fn set_absent<I, S>(&mut self, key: &str, absent: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(entry) = self.store.entries.get_mut(key) {
            entry.absent = absent.into_iter().map(Into::into).collect();
        }
    }

    pub fn mark_uses_data(&mut self, key: &str) {
        if let Some(entry) = self.store.entries.get_mut(key) {
            entry.uses_data = true;
        }
    }

    pub fn uses_data(&self, key: &str) -> bool {
        self.store
            .entries
            .get(key)
            .is_some_and(|entry| entry.uses_data)
    }

    /// True if any recorded dependency of `key` changed or any recorded
    /// absent file now exists. A dependency with no entry of its own counts
    /// as changed.
    pub fn has_dependency_changes(&self, key: &str, base_dir: &Path) -> bool {
        let Some(entry) = self.store.entries.get(key) else {
            return false;
        };

        if let Some(appeared) = entry
            .absent
            .iter()
            .find(|absent| base_dir.join(absent).is_file())
        {
            tracing::debug!("{appeared} appeared since {key} was rendered");
            return true;
        }

        entry.dependencies.iter().any(|dependency| {
            if !self.store.entries.contains_key(dependency) {
                return true;
            }

            let path = base_dir.join(dependency);
            if let Err(error) = fs::metadata(&path) {
                tracing::warn!("cannot stat dependency {}: {error}", path.display());
                return true;
            }
            self.has_changed(&path, dependency)
        })
    }

    pub fn entry(&self, key: &str) -> Option<&CacheEntry> {
        self.store.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.store.entries.keys().map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        self.store.entries.remove(key)
    }

    /// Drops entries whose file no longer exists under `base_dir`.
    pub fn prune_missing(&mut self, base_dir: &Path) -> Vec<String> {
        let missing: Vec<String> = self
            .store
            .entries
            .keys()
            .filter(|key| !base_dir.join(key).exists())
            .cloned()
            .collect();

        for key in &missing {
            self.store.entries.remove(key);
        }
        missing
    }

    pub fn clear(&mut self) {
        self.store.entries.clear();
        self.store.data_files.clear();
        self.store.last_build = None;
    }

    /// A different digest means the configuration changed since the last
    /// build, which invalidates every entry.
    pub fn config_matches(&self, digest: &str) -> bool {
        self.store.config_digest == digest
    }

    pub fn set_config_digest(&mut self, digest: &str) {
        self.store.config_digest = digest.to_string();
    }

    /// Whether `files` is the data file set recorded by the last build.
    pub fn data_files_match(&self, files: &[String]) -> bool {
        self.store.data_files == files
    }

    pub fn set_data_files(&mut self, files: &[String]) {
        self.store.data_files = files.to_vec();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            file_count: self.store.entries.len(),
            last_build_time: self.store.last_build,
        }
    }

    /// Writes the store with a temp file and rename, so a crash mid-save
    /// leaves the previous store intact.
    pub fn save(&mut self) -> Result<()> {
        self.store.version = CACHE_VERSION;
        self.store.last_build = Some(Utc::now());

        let Some(cache_dir) = self.store_path.parent() else {
            return Ok(());
        };
        fs::create_dir_all(cache_dir).io_context("creating cache directory", cache_dir)?;

        let content = serde_json::to_string_pretty(&self.store)
            .map_err(|error| std::io::Error::other(error.to_string()))?;

        let temp_path = self.store_path.with_extension("json.tmp");
        fs::write(&temp_path, content).io_context("writing cache", &temp_path)?;
        fs::rename(&temp_path, &self.store_path).io_context("replacing cache", &self.store_path)?;
        Ok(())
    }

    /// Removes the on-disk store as well as the in-memory entries.
    pub fn destroy(&mut self) -> Result<()> {
        self.clear();
        if let Some(cache_dir) = self.store_path.parent()
            && cache_dir.exists()
        {
            fs::remove_dir_all(cache_dir).io_context("removing cache", cache_dir)?;
        }
        Ok(())
    }
}

fn read_store(path: &Path) -> Option<CacheStore> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str::<CacheStore>(&content) {
        Ok(store) if store.version == CACHE_VERSION => Some(store),
        Ok(_) => {
            tracing::info!("cache store {} has an old format, rebuilding", path.display());
            None
        }
        Err(error) => {
            tracing::warn!("cache store {} is corrupt, rebuilding: {error}", path.display());
            None
        }
    }
}
