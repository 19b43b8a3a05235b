//! Discovery: turning the source tree into a populated [`Site`].
//!
//! The site root is walked in shallow mode so that reserved `_` directories
//! are left alone; `_posts`, `_drafts`, `_data` and each declared
//! collection directory are then walked explicitly. Every file that starts
//! with front matter becomes a [`Document`]; the rest are static files.

use crate::config::CONFIG_FILE_NAME;
use crate::defaults::ScopeRule;
use crate::document::{Document, DocumentKind, SourceFile};
use crate::error::{BrambleError, Result};
use crate::files::{FilePool, compile_patterns, matches_any, starts_with_front_matter, walk};
use crate::hooks::{HookEvent, HookRegistry};
use crate::parsing::extract_front_matter;
use crate::path_guard::{relative_key, to_slash};
use crate::permalink;
use crate::report::SkippedFile;
use crate::site::{Site, StaticFile};
use crate::theme::ThemeResolver;
use chrono::{DateTime, Utc};
use glob::Pattern;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

pub const POSTS_DIR: &str = "_posts";
pub const DRAFTS_DIR: &str = "_drafts";
pub const DATA_DIR: &str = "_data";

const DATA_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "json"];
const DEFAULT_EXCLUDES: &[&str] = &["node_modules", "target", "Cargo.toml", "Cargo.lock"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    pub show_drafts: bool,
    pub show_future: bool,
}

#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    relative: String,
    kind: DocumentKind,
}

pub struct SiteReader<'a> {
    pool: &'a FilePool,
    rules: &'a [ScopeRule],
    resolver: &'a ThemeResolver,
    hooks: &'a HookRegistry,
    options: ReadOptions,
}

impl<'a> SiteReader<'a> {
    pub fn new(
        pool: &'a FilePool,
        rules: &'a [ScopeRule],
        resolver: &'a ThemeResolver,
        hooks: &'a HookRegistry,
        options: ReadOptions,
    ) -> Self {
        Self {
            pool,
            rules,
            resolver,
            hooks,
            options,
        }
    }

    /// Fills `site` from its source directory and returns the files that
    /// were left out.
    pub fn read(&self, site: &mut Site) -> Result<Vec<SkippedFile>> {
        let mut exclude = compile_patterns(&site.config.exclude)?;
        exclude.extend(DEFAULT_EXCLUDES.iter().filter_map(|pattern| Pattern::new(pattern).ok()));
        let include = compile_patterns(&site.config.include)?;

        let mut skipped = Vec::new();
        let candidates = self.discover(site, &exclude, &include);

        let flags = self
            .pool
            .map_concurrent(&candidates, |candidate| starts_with_front_matter(&candidate.path));
        let (documents, statics): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .zip(flags)
            .partition(|(_, has_front_matter)| *has_front_matter);

        let documents: Vec<Candidate> = documents
            .into_iter()
            .map(|(candidate, _)| candidate)
            .collect();
        for document in self.load_documents(site, &documents, &mut skipped) {
            self.place(site, document);
        }
        site.posts.sort_by(|a, b| a.compare_by_date_desc(b));
        site.pages.sort_by(|a, b| a.relative_path().cmp(b.relative_path()));
        for documents in site.collections.values_mut() {
            documents.sort_by(|a, b| a.relative_path().cmp(b.relative_path()));
        }

        for (candidate, _) in statics {
            site.static_files.push(static_file(&candidate));
        }
        self.add_theme_assets(site);

        self.load_data(site, &mut skipped);

        Ok(skipped)
    }

    fn discover(&self, site: &Site, exclude: &[Pattern], include: &[Pattern]) -> Vec<Candidate> {
        let source = site.source_dir.as_path();
        let mut candidates = Vec::new();

        for path in walk(source, exclude, true) {
            let Some(relative) = relative_key(source, &path) else {
                continue;
            };
            if path.starts_with(&site.destination_dir) || relative == CONFIG_FILE_NAME {
                continue;
            }
            if is_ignored(&relative) && !matches_any(include, &relative) {
                continue;
            }
            candidates.push(Candidate {
                path,
                relative,
                kind: DocumentKind::Page,
            });
        }

        let mut special = vec![(POSTS_DIR.to_string(), DocumentKind::Post)];
        if self.options.show_drafts {
            special.push((DRAFTS_DIR.to_string(), DocumentKind::Post));
        }
        for name in site.config.collections.keys() {
            special.push((format!("_{name}"), DocumentKind::Collection(name.clone())));
        }

        for (dir_name, kind) in special {
            for path in walk(&source.join(&dir_name), exclude, true) {
                let Some(relative) = relative_key(source, &path) else {
                    continue;
                };
                if matches_any(exclude, &relative) || has_hidden_segment(&relative) {
                    continue;
                }
                candidates.push(Candidate {
                    path,
                    relative,
                    kind: kind.clone(),
                });
            }
        }

        candidates
    }

    fn load_documents(
        &self,
        site: &Site,
        candidates: &[Candidate],
        skipped: &mut Vec<SkippedFile>,
    ) -> Vec<Document> {
        let paths: Vec<PathBuf> = candidates
            .iter()
            .map(|candidate| candidate.path.clone())
            .collect();
        let contents = self.pool.read_many(&paths);
        let config = &site.config;
        let now = site.time;

        let outcomes = self.pool.map_concurrent(candidates, |candidate| {
            let content = contents.get(&candidate.path).ok_or_else(|| SkippedFile {
                path: candidate.path.clone(),
                reason: "unreadable".to_string(),
            })?;
            self.build_document(candidate, content, config, now)
        });

        let mut documents = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(Some(document)) => documents.push(document),
                Ok(None) => {}
                Err(skip) => {
                    tracing::warn!("skipping {}: {}", skip.path.display(), skip.reason);
                    skipped.push(skip);
                }
            }
        }
        documents
    }

    fn build_document(
        &self,
        candidate: &Candidate,
        content: &str,
        config: &crate::config::SiteConfig,
        now: DateTime<Utc>,
    ) -> std::result::Result<Option<Document>, SkippedFile> {
        let skip = |error: BrambleError| SkippedFile {
            path: candidate.path.clone(),
            reason: error.to_string(),
        };

        let (front_matter, body) = extract_front_matter(content, &candidate.path).map_err(skip)?;
        let modified = fs::metadata(&candidate.path)
            .and_then(|metadata| metadata.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        let source = SourceFile {
            path: candidate.path.clone(),
            relative_path: candidate.relative.clone(),
            front_matter,
            body,
            modified,
        };
        let mut document = Document::new(source, candidate.kind.clone(), self.rules);

        if !document.is_published() {
            tracing::debug!("{} is unpublished", candidate.relative);
            return Ok(None);
        }

        if document.kind() == &DocumentKind::Post
            && !document.is_draft()
            && !self.options.show_future
            && let Some(date) = document.date()
            && date.with_timezone(&Utc) > now
        {
            tracing::debug!("{} is dated in the future", candidate.relative);
            return Ok(None);
        }

        let pattern = match document.kind() {
            DocumentKind::Page => None,
            DocumentKind::Post => Some(config.permalink.as_str()),
            DocumentKind::Collection(name) => config.collection_permalink(name),
        };
        let resolved = permalink::resolve(&document, pattern, &config.markdown_ext).map_err(skip)?;
        document.assign_permalink(resolved);

        Ok(Some(document))
    }

    fn place(&self, site: &mut Site, mut document: Document) {
        self.hooks.trigger_document(HookEvent::PostInit, &mut document);

        match document.kind().clone() {
            DocumentKind::Page => site.pages.push(document),
            DocumentKind::Post => site.posts.push(document),
            DocumentKind::Collection(name) => {
                site.collections.entry(name).or_default().push(document)
            }
        }
    }

    /// Theme `assets/` files, unless the site has a file at the same output path.
    fn add_theme_assets(&self, site: &mut Site) {
        let Some(assets_dir) = self.resolver.assets_dir() else {
            return;
        };
        let Some(theme_dir) = self.resolver.theme_dir() else {
            return;
        };

        for path in walk(&assets_dir, &[], false) {
            let Some(relative) = relative_key(theme_dir, &path) else {
                continue;
            };
            let output_path = PathBuf::from(&relative);
            if site.static_files.iter().any(|file| file.output_path == output_path) {
                continue;
            }
            site.static_files.push(StaticFile {
                key: to_slash(&path),
                source: path,
                output_path,
            });
        }
    }

    fn load_data(&self, site: &mut Site, skipped: &mut Vec<SkippedFile>) {
        let data_dir = site.source_dir.join(DATA_DIR);
        let paths: Vec<PathBuf> = walk(&data_dir, &[], false)
            .into_iter()
            .filter(|path| {
                path.extension()
                    .and_then(|extension| extension.to_str())
                    .is_some_and(|extension| DATA_EXTENSIONS.contains(&extension))
            })
            .collect();

        let contents = self.pool.read_many(&paths);
        let mut data = Map::new();
        let mut data_files = Vec::new();

        for path in &paths {
            let Some(content) = contents.get(path) else {
                skipped.push(SkippedFile {
                    path: path.clone(),
                    reason: "unreadable".to_string(),
                });
                continue;
            };

            match parse_data_file(path, content) {
                Ok(value) => {
                    let relative = path.strip_prefix(&data_dir).unwrap_or(path);
                    insert_nested_value(&mut data, &build_data_key(relative), value);
                    if let Some(key) = relative_key(&site.source_dir, path) {
                        data_files.push(key);
                    }
                }
                Err(error) => {
                    tracing::warn!("skipping data file {}: {error}", path.display());
                    skipped.push(SkippedFile {
                        path: path.clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        site.data = data;
        site.data_files = data_files;
    }
}

/// Root-level `_` entries and any `.` segment are not content.
fn is_ignored(relative: &str) -> bool {
    relative.starts_with(crate::files::RESERVED_PREFIX) || has_hidden_segment(relative)
}

fn has_hidden_segment(relative: &str) -> bool {
    relative.split('/').any(|segment| segment.starts_with('.'))
}

/// Static files inside `_posts` publish at their inner path; those inside a
/// collection publish under the collection name.
fn static_file(candidate: &Candidate) -> StaticFile {
    let inner = candidate
        .relative
        .split_once('/')
        .map(|(_, rest)| rest)
        .unwrap_or(&candidate.relative);
    let output_path = match &candidate.kind {
        DocumentKind::Page => PathBuf::from(&candidate.relative),
        DocumentKind::Post => PathBuf::from(inner),
        DocumentKind::Collection(name) => Path::new(name).join(inner),
    };

    StaticFile {
        source: candidate.path.clone(),
        key: candidate.relative.clone(),
        output_path,
    }
}

fn parse_data_file(path: &Path, content: &str) -> Result<Value> {
    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    let value = match extension {
        "toml" => toml::from_str(content).map_err(|error| BrambleError::TomlParse {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?,
        "yaml" | "yml" => serde_yml::from_str(content).map_err(|error| BrambleError::YamlParse {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?,
        _ => serde_json::from_str(content).map_err(|error| BrambleError::JsonParse {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?,
    };
    Ok(value)
}

/// `nav/main.toml` becomes `["nav", "main"]`.
fn build_data_key(path: &Path) -> Vec<String> {
    let mut parts: Vec<String> = path
        .parent()
        .map(|parent| {
            parent
                .iter()
                .map(|segment| segment.to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();

    if let Some(stem) = path.file_stem() {
        parts.push(stem.to_string_lossy().to_string());
    }

    parts
}

/// Object values at the same key are merged one level deep; anything else
/// replaces what was there.
fn insert_nested_value(container: &mut Map<String, Value>, keys: &[String], value: Value) {
    let Some((first, rest)) = keys.split_first() else {
        return;
    };

    if rest.is_empty() {
        match (container.get_mut(first), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => existing.extend(incoming),
            (_, value) => {
                container.insert(first.clone(), value);
            }
        }
        return;
    }

    let nested = container
        .entry(first.clone())
        .or_insert_with(|| Value::Object(Map::new()));

    if let Value::Object(map) = nested {
        insert_nested_value(map, rest, value);
    }
}
