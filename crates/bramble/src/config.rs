use crate::defaults::ScopeRule;
use crate::error::{BrambleError, IoContext, Result};
use crate::files::{DEFAULT_CONCURRENCY, compile_patterns};
use crate::metadata::Metadata;
use crate::path_guard::{is_within, normalize};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "bramble.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_destination")]
    pub destination: PathBuf,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub keep_files: Vec<String>,
    #[serde(default = "default_permalink")]
    pub permalink: String,
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionConfig>,
    #[serde(default)]
    pub defaults: Vec<DefaultsEntry>,
    #[serde(default)]
    pub paginate: usize,
    #[serde(default = "default_paginate_path")]
    pub paginate_path: String,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default = "default_true")]
    pub cache: bool,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_markdown_ext")]
    pub markdown_ext: Vec<String>,
    #[serde(default)]
    pub show_drafts: bool,
    #[serde(default)]
    pub future: bool,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub extra: toml::Table,
    #[serde(skip)]
    digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    #[serde(default = "default_true")]
    pub output: bool,
    #[serde(default)]
    pub permalink: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsEntry {
    #[serde(default)]
    pub scope: DefaultsScope,
    #[serde(default)]
    pub values: toml::Table,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsScope {
    #[serde(default)]
    pub path: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

fn default_destination() -> PathBuf {
    PathBuf::from("_site")
}

fn default_permalink() -> String {
    crate::permalink::DEFAULT_POST_PERMALINK.to_string()
}

fn default_paginate_path() -> String {
    "/page:num/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_markdown_ext() -> Vec<String> {
    vec!["md".to_string(), "markdown".to_string()]
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: None,
            base_url: String::new(),
            destination: default_destination(),
            exclude: Vec::new(),
            include: Vec::new(),
            keep_files: Vec::new(),
            permalink: default_permalink(),
            collections: BTreeMap::new(),
            defaults: Vec::new(),
            paginate: 0,
            paginate_path: default_paginate_path(),
            theme: None,
            cache: true,
            concurrency: DEFAULT_CONCURRENCY,
            markdown_ext: default_markdown_ext(),
            show_drafts: false,
            future: false,
            strict: false,
            extra: toml::Table::new(),
            digest: String::new(),
        }
    }
}

impl SiteConfig {
    /// Reads `bramble.toml` from the source root.
    pub fn load(source_dir: &Path) -> Result<Self> {
        let config_path = source_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Err(BrambleError::ConfigNotFound { path: config_path });
        }

        let content =
            fs::read_to_string(&config_path).io_context("reading config", &config_path)?;
        Self::parse(&content, &config_path)
    }

    pub fn parse(content: &str, config_path: &Path) -> Result<Self> {
        let mut config: SiteConfig =
            toml::from_str(content).map_err(|error| BrambleError::TomlParse {
                path: config_path.to_path_buf(),
                message: error.to_string(),
            })?;

        config.base_url = config.base_url.trim_end_matches('/').to_string();
        config.digest = format!("{:x}", Sha256::digest(content.as_bytes()));

        Ok(config)
    }

    /// SHA-256 of the raw configuration text; empty for in-memory configs.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Rejects configurations that cannot produce a correct build.
    pub fn validate(&self, source_dir: &Path) -> Result<()> {
        self.scope_rules()?;
        compile_patterns(&self.exclude)?;
        compile_patterns(&self.include)?;
        compile_patterns(&self.keep_files)?;

        if !self.paginate_path.contains(":num") {
            return Err(BrambleError::config(format!(
                "paginate_path '{}' must contain ':num'",
                self.paginate_path
            )));
        }

        if self.concurrency == 0 {
            return Err(BrambleError::config("concurrency must be at least 1"));
        }

        for name in self.collections.keys() {
            if name == "posts" {
                return Err(BrambleError::config(
                    "'posts' is built in and cannot be declared as a collection",
                ));
            }
            if name.is_empty() || name.contains(['/', '\\', '.']) {
                return Err(BrambleError::config(format!("invalid collection name '{name}'")));
            }
        }

        // Stale-output sweeps and `clean` delete inside the destination.
        let source = std::path::absolute(source_dir).io_context("resolving", source_dir)?;
        let destination = self.destination_dir(&source);
        if is_within(&destination, &source) {
            return Err(BrambleError::config(format!(
                "destination '{}' must not contain the source directory",
                self.destination.display()
            )));
        }

        Ok(())
    }

    pub fn scope_rules(&self) -> Result<Vec<ScopeRule>> {
        self.defaults
            .iter()
            .map(|entry| {
                ScopeRule::new(
                    &entry.scope.path,
                    entry.scope.kind.as_deref(),
                    Metadata::from_toml_table(entry.values.clone()),
                )
            })
            .collect()
    }

    pub fn destination_dir(&self, source_dir: &Path) -> PathBuf {
        normalize(&source_dir.join(&self.destination))
    }

    pub fn collection_permalink(&self, name: &str) -> Option<&str> {
        self.collections
            .get(name)
            .and_then(|collection| collection.permalink.as_deref())
    }

    pub fn is_markdown(&self, extension: &str) -> bool {
        self.markdown_ext
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(extension))
    }
}
