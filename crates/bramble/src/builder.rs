//! The build pipeline.
//!
//! A build moves through `reading → cascading → rendering → writing` and
//! back to idle. Reading fills the [`Site`]; cascading decides, from the
//! build cache, which documents can keep last build's output; rendering and
//! writing handle the rest. Each stage is timed, and an error that stops a
//! stage comes back as [`BrambleError::Stage`] naming it.

use crate::cache::{CACHE_DIR_NAME, CacheManager};
use crate::config::{CONFIG_FILE_NAME, SiteConfig};
use crate::document::{Document, DocumentKind, Rendered};
use crate::error::{BrambleError, Result};
use crate::files::{BatchOptions, FilePool, compile_patterns};
use crate::hooks::{HookEvent, HookRegistry};
use crate::paginate::{page_url, paginate};
use crate::path_guard::join_within;
use crate::permalink::Permalink;
use crate::reader::{ReadOptions, SiteReader};
use crate::render::{RenderContext, RenderOutput, Renderer, TeraRenderer};
use crate::report::{BuildResult, BuildSummary, FailedDocument, SkippedFile, Timings};
use crate::site::Site;
use crate::theme::ThemeResolver;
use crate::writer::{clean_output_dir, copy_static, remove_stale, write_output};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

const STATIC_BATCH_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Idle,
    Reading,
    Cascading,
    Rendering,
    Writing,
}

impl BuildStage {
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Reading => "reading",
            Self::Cascading => "cascading",
            Self::Rendering => "rendering",
            Self::Writing => "writing",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Reuse output of documents the cache reports unchanged.
    pub incremental: bool,
    /// Remove the destination and the cache first.
    pub clean: bool,
    pub show_drafts: bool,
    pub show_future: bool,
    /// Fail the build on the first document that cannot be rendered.
    pub strict: bool,
}

/// Where a document lives inside [`Site`].
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Page(usize),
    Post(usize),
    Collection(String, usize),
}

impl Slot {
    fn get<'s>(&self, site: &'s Site) -> Option<&'s Document> {
        match self {
            Self::Page(index) => site.pages.get(*index),
            Self::Post(index) => site.posts.get(*index),
            Self::Collection(name, index) => site.collections.get(name)?.get(*index),
        }
    }

    fn get_mut<'s>(&self, site: &'s mut Site) -> Option<&'s mut Document> {
        match self {
            Self::Page(index) => site.pages.get_mut(*index),
            Self::Post(index) => site.posts.get_mut(*index),
            Self::Collection(name, index) => site.collections.get_mut(name)?.get_mut(*index),
        }
    }
}

#[derive(Debug, Default)]
struct Plan {
    render: Vec<Slot>,
    reuse: Vec<Slot>,
}

/// One document's render, plus the extra pages a paginated index produces.
struct RenderedDocument {
    slot: Slot,
    dependencies: Vec<String>,
    absent: Vec<String>,
    aggregate: bool,
    uses_data: bool,
    extra_pages: Vec<(PathBuf, String)>,
}

pub struct SiteBuilder {
    source_dir: PathBuf,
    site: Site,
    hooks: HookRegistry,
    renderer: Option<Box<dyn Renderer + Send + Sync>>,
    stage: BuildStage,
    reload_config: bool,
    initialized: bool,
}

impl SiteBuilder {
    /// Loads and validates `bramble.toml` from `source_dir`. The file is
    /// re-read at the start of every build.
    pub fn new(source_dir: impl AsRef<Path>) -> Result<Self> {
        let source_dir = source_dir.as_ref().to_path_buf();
        let config = SiteConfig::load(&source_dir)?;
        let mut builder = Self::with_config(source_dir, config)?;
        builder.reload_config = true;
        Ok(builder)
    }

    /// A builder with a fixed, in-memory configuration.
    pub fn with_config(source_dir: impl AsRef<Path>, config: SiteConfig) -> Result<Self> {
        let source_dir = source_dir.as_ref().to_path_buf();
        config.validate(&source_dir)?;

        Ok(Self {
            site: Site::new(config, &source_dir),
            source_dir,
            hooks: HookRegistry::new(),
            renderer: None,
            stage: BuildStage::Idle,
            reload_config: false,
            initialized: false,
        })
    }

    /// Replaces the default Tera renderer.
    pub fn with_renderer(mut self, renderer: impl Renderer + Send + Sync + 'static) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    pub fn config(&self) -> &SiteConfig {
        &self.site.config
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn destination_dir(&self) -> &Path {
        &self.site.destination_dir
    }

    pub fn stage(&self) -> BuildStage {
        self.stage
    }

    /// False for paths the build itself writes: the destination, the cache
    /// directory and VCS metadata.
    pub fn is_source_change(&self, path: &Path) -> bool {
        !path.starts_with(&self.site.destination_dir)
            && !path.starts_with(self.source_dir.join(CACHE_DIR_NAME))
            && !path.components().any(|component| component.as_os_str() == ".git")
    }

    /// Removes the destination directory and the build cache.
    pub fn clean(&mut self) -> Result<()> {
        clean_output_dir(&self.site.destination_dir)?;
        CacheManager::load(&self.source_dir).destroy()
    }

    pub fn build(&mut self, options: &BuildOptions) -> Result<BuildResult> {
        let result = self.run(options);
        self.stage = BuildStage::Idle;
        result
    }

    fn run(&mut self, options: &BuildOptions) -> Result<BuildResult> {
        let started = Instant::now();
        let mut timings = Timings::default();
        let mut summary = BuildSummary::default();

        self.refresh_config()?;
        let rules = self.site.config.scope_rules()?;
        let keep = compile_patterns(&self.site.config.keep_files)?;
        let pool = FilePool::new(self.site.config.concurrency)?;
        let resolver = ThemeResolver::new(&self.source_dir, self.site.config.theme.as_deref());
        let strict = options.strict || self.site.config.strict;

        if !self.initialized {
            self.hooks.trigger_site(HookEvent::AfterInit, &mut self.site);
            self.initialized = true;
        }

        let mut cache = self
            .site
            .config
            .cache
            .then(|| CacheManager::load(&self.source_dir));

        if options.clean {
            clean_output_dir(&self.site.destination_dir)
                .map_err(|error| stage_error(BuildStage::Writing, error))?;
            if let Some(cache) = cache.as_mut() {
                cache.clear();
            }
        }

        if let Some(cache) = cache.as_mut()
            && !cache.config_matches(self.site.config.digest())
        {
            tracing::info!("configuration changed, discarding build cache");
            cache.clear();
        }

        // Reading
        self.stage = BuildStage::Reading;
        let stage_start = Instant::now();
        self.site.reset();
        self.hooks.trigger_site(HookEvent::AfterReset, &mut self.site);

        let read_options = ReadOptions {
            show_drafts: options.show_drafts || self.site.config.show_drafts,
            show_future: options.show_future || self.site.config.future,
        };
        summary.skipped = SiteReader::new(&pool, &rules, &resolver, &self.hooks, read_options)
            .read(&mut self.site)
            .map_err(|error| stage_error(BuildStage::Reading, error))?;
        self.hooks.trigger_site(HookEvent::PostRead, &mut self.site);

        summary.documents = self.site.document_count();
        timings.record(
            BuildStage::Reading.name(),
            stage_start.elapsed(),
            format!(
                "{} documents, {} static files",
                summary.documents,
                self.site.static_files.len()
            ),
        );
        tracing::info!("read {} documents", summary.documents);

        // Cascading
        self.stage = BuildStage::Cascading;
        let stage_start = Instant::now();
        let plan = self.plan(cache.as_mut(), options.incremental);
        timings.record(
            BuildStage::Cascading.name(),
            stage_start.elapsed(),
            format!("{} to render, {} unchanged", plan.render.len(), plan.reuse.len()),
        );

        // Rendering
        self.stage = BuildStage::Rendering;
        let stage_start = Instant::now();
        let rendered = self.render_all(&plan, &resolver, strict, cache.as_mut(), &mut summary)?;
        summary.rendered = rendered.len();
        timings.record(
            BuildStage::Rendering.name(),
            stage_start.elapsed(),
            format!("{} documents", rendered.len()),
        );
        tracing::info!("rendered {} documents", rendered.len());

        // Writing
        self.stage = BuildStage::Writing;
        let stage_start = Instant::now();
        let mut produced = HashSet::new();
        let dependencies = self
            .write_all(&rendered, &plan, cache.as_mut(), &mut summary, &mut produced)
            .map_err(|error| stage_error(BuildStage::Writing, error))?;
        self.copy_static_files(
            &pool,
            cache.as_mut(),
            options.incremental,
            &mut summary,
            &mut produced,
        )
        .map_err(|error| stage_error(BuildStage::Writing, error))?;
        self.hooks.trigger_site(HookEvent::PostWrite, &mut self.site);
        timings.record(
            BuildStage::Writing.name(),
            stage_start.elapsed(),
            format!("{} files, {} static files", summary.written, summary.static_copied),
        );

        let stage_start = Instant::now();
        let removed = remove_stale(&self.site.destination_dir, &produced, &keep)
            .map_err(|error| stage_error(BuildStage::Writing, error))?;
        summary.removed = removed.len();
        timings.record("cleaning", stage_start.elapsed(), format!("{} stale files", removed.len()));

        if let Some(mut cache) = cache {
            let stage_start = Instant::now();
            self.finish_cache(&mut cache, &dependencies);
            cache
                .save()
                .map_err(|error| stage_error(BuildStage::Writing, error))?;
            let entries = cache.stats().file_count;
            timings.record("cache", stage_start.elapsed(), format!("{entries} entries"));
        }

        timings.total = started.elapsed();
        tracing::info!("build finished in {:.2?}: {summary}", timings.total);

        Ok(BuildResult { timings, summary })
    }

    fn refresh_config(&mut self) -> Result<()> {
        if !self.reload_config {
            return Ok(());
        }

        let config = SiteConfig::load(&self.source_dir)?;
        if config.digest() == self.site.config.digest() {
            return Ok(());
        }

        config.validate(&self.source_dir)?;
        tracing::info!("reloaded {CONFIG_FILE_NAME}");
        self.site.destination_dir = config.destination_dir(&self.source_dir);
        self.site.config = config;
        Ok(())
    }

    /// Splits output documents into those to render and those whose previous
    /// output can stand.
    ///
    /// A document is reused only when its own file and every recorded
    /// dependency are unchanged and its output is still on disk. If its
    /// templates list other documents, no document may have been added,
    /// edited or removed. If they read `site.data`, the set of data files
    /// must be the same.
    fn plan(&self, cache: Option<&mut CacheManager>, incremental: bool) -> Plan {
        let slots = output_slots(&self.site);
        let Some(cache) = cache else {
            return Plan {
                render: slots,
                reuse: Vec::new(),
            };
        };

        let pruned = cache.prune_missing(&self.source_dir);
        let vanished = forget_vanished(cache, &self.site);
        let edited = self
            .site
            .documents()
            .any(|document| cache.has_changed(document.path(), document.relative_path()));
        let content_changed = !pruned.is_empty() || vanished || edited;
        let data_changed = !cache.data_files_match(&self.site.data_files);

        if !incremental {
            return Plan {
                render: slots,
                reuse: Vec::new(),
            };
        }

        let mut plan = Plan::default();
        for slot in slots {
            let Some(document) = slot.get(&self.site) else {
                continue;
            };
            let key = document.relative_path();
            let reusable = !self.is_paginated(document)
                && !cache.has_changed(document.path(), key)
                && !cache.has_dependency_changes(key, &self.source_dir)
                && !(content_changed && cache.is_aggregate(key))
                && !(data_changed && cache.uses_data(key))
                && self
                    .site
                    .destination_dir
                    .join(&document.permalink().output_path)
                    .is_file();

            if reusable {
                tracing::debug!("{key} unchanged");
                plan.reuse.push(slot);
            } else {
                plan.render.push(slot);
            }
        }
        plan
    }

    fn is_paginated(&self, document: &Document) -> bool {
        self.site.config.paginate > 0
            && document.kind() == &DocumentKind::Page
            && document.permalink().url == "/"
    }

    fn render_all(
        &mut self,
        plan: &Plan,
        resolver: &ThemeResolver,
        strict: bool,
        mut cache: Option<&mut CacheManager>,
        summary: &mut BuildSummary,
    ) -> Result<Vec<RenderedDocument>> {
        self.hooks.trigger_site(HookEvent::PreRender, &mut self.site);
        for slot in &plan.render {
            if let Some(document) = slot.get_mut(&mut self.site) {
                self.hooks.trigger_document(HookEvent::PreRender, document);
            }
        }

        let site_value = self.site.to_value();
        let default_renderer;
        let renderer: &dyn Renderer = match &self.renderer {
            Some(renderer) => renderer.as_ref(),
            None => {
                default_renderer = TeraRenderer::new(resolver.clone());
                &default_renderer
            }
        };

        let mut outputs = Vec::new();
        for slot in &plan.render {
            let Some(document) = slot.get(&self.site) else {
                continue;
            };
            match self.render_document(renderer, document, &site_value) {
                Ok((output, extra_pages)) => outputs.push((slot.clone(), output, extra_pages)),
                Err(error) => {
                    if strict {
                        return Err(stage_error(BuildStage::Rendering, error));
                    }
                    tracing::warn!("failed to render {}: {error}", document.relative_path());
                    if let Some(cache) = cache.as_deref_mut() {
                        cache.remove(document.relative_path());
                    }
                    summary.failed.push(FailedDocument {
                        path: document.path().to_path_buf(),
                        error: error.to_string(),
                    });
                }
            }
        }

        let destination = self.site.destination_dir.clone();
        let mut rendered = Vec::with_capacity(outputs.len());
        for (slot, output, extra_pages) in outputs {
            let Some(document) = slot.get_mut(&mut self.site) else {
                continue;
            };
            let target = join_within(&destination, &document.permalink().output_path)
                .map_err(|error| stage_error(BuildStage::Rendering, error))?;
            let url = document.permalink().url.clone();
            document.set_rendered(Rendered {
                content: output.content,
                output: output.output,
                output_path: target,
                url,
            });
            self.hooks.trigger_document(HookEvent::PostRender, document);

            rendered.push(RenderedDocument {
                slot,
                dependencies: output.dependencies,
                absent: output.absent,
                aggregate: output.aggregate,
                uses_data: output.uses_data,
                extra_pages,
            });
        }
        self.hooks.trigger_site(HookEvent::PostRender, &mut self.site);

        Ok(rendered)
    }

    /// Renders `document` once, or once per page when it is the paginated
    /// site index. Pages after the first come back as `(output path, text)`.
    fn render_document(
        &self,
        renderer: &dyn Renderer,
        document: &Document,
        site_value: &serde_json::Value,
    ) -> Result<(RenderOutput, Vec<(PathBuf, String)>)> {
        let unpaged = RenderContext {
            site: &self.site,
            site_value,
            paginator: None,
        };

        if !self.is_paginated(document) {
            return Ok((renderer.render(document, &unpaged)?, Vec::new()));
        }

        let config = &self.site.config;
        let pagers = paginate(
            &self.site.posts,
            config.paginate,
            &config.paginate_path,
            &config.base_url,
        );

        let mut first = None;
        let mut extra_pages = Vec::new();
        for pager in &pagers {
            let paginator = pager.to_value(|post| post.to_value().clone());
            let context = RenderContext {
                paginator: Some(&paginator),
                ..unpaged
            };
            let output = renderer.render(document, &context)?;
            if pager.page == 1 {
                first = Some(output);
            } else {
                let target = Permalink::from_url(&page_url(pager.page, &config.paginate_path));
                extra_pages.push((target.output_path, output.output));
            }
        }

        let output = match first {
            Some(output) => output,
            None => renderer.render(document, &unpaged)?,
        };
        Ok((output, extra_pages))
    }

    /// Writes rendered documents and records reused ones as produced.
    /// Returns the dependency keys of everything rendered.
    fn write_all(
        &mut self,
        rendered: &[RenderedDocument],
        plan: &Plan,
        mut cache: Option<&mut CacheManager>,
        summary: &mut BuildSummary,
        produced: &mut HashSet<PathBuf>,
    ) -> Result<BTreeSet<String>> {
        let destination = self.site.destination_dir.clone();
        let mut dependencies = BTreeSet::new();

        for entry in rendered {
            let Some(document) = entry.slot.get_mut(&mut self.site) else {
                continue;
            };
            let output = document
                .rendered()
                .map(|rendered| rendered.output.as_str())
                .unwrap_or_default();
            produced.insert(write_output(&destination, &document.permalink().output_path, output)?);
            summary.written += 1;

            for (path, text) in &entry.extra_pages {
                produced.insert(write_output(&destination, path, text)?);
                summary.written += 1;
            }

            self.hooks.trigger_document(HookEvent::PostWrite, document);

            if let Some(cache) = cache.as_deref_mut() {
                let key = document.relative_path();
                cache.update(document.path(), key, entry.dependencies.iter().cloned());
                cache.set_absent(key, entry.absent.iter().cloned());
                if entry.aggregate {
                    cache.mark_aggregate(key);
                }
                if entry.uses_data {
                    cache.mark_uses_data(key);
                }
            }
            dependencies.extend(entry.dependencies.iter().cloned());
        }

        for slot in &plan.reuse {
            if let Some(document) = slot.get(&self.site) {
                produced.insert(join_within(&destination, &document.permalink().output_path)?);
                summary.unchanged += 1;
            }
        }

        Ok(dependencies)
    }

    fn copy_static_files(
        &self,
        pool: &FilePool,
        mut cache: Option<&mut CacheManager>,
        incremental: bool,
        summary: &mut BuildSummary,
        produced: &mut HashSet<PathBuf>,
    ) -> Result<()> {
        let destination = &self.site.destination_dir;
        let mut pending = Vec::new();

        for file in &self.site.static_files {
            let target = join_within(destination, &file.output_path)?;
            let unchanged = incremental
                && cache
                    .as_deref()
                    .is_some_and(|cache| !cache.has_changed(&file.source, &file.key))
                && target.is_file();

            produced.insert(target);
            if unchanged {
                summary.static_unchanged += 1;
            } else {
                pending.push(file);
            }
        }

        let mut failures = Vec::new();
        let mut on_error = |index: usize, error: &BrambleError| {
            failures.push((index, error.to_string()));
            true
        };
        let results = pool.batch(
            &pending,
            |file| copy_static(destination, file),
            BatchOptions {
                batch_size: STATIC_BATCH_SIZE,
                on_error: Some(&mut on_error),
                on_progress: None,
            },
        )?;

        for (file, result) in pending.iter().zip(&results) {
            if result.is_none() {
                continue;
            }
            summary.static_copied += 1;
            if let Some(cache) = cache.as_deref_mut() {
                cache.update(&file.source, &file.key, Vec::<String>::new());
            }
        }

        for (index, reason) in failures {
            let path = pending[index].source.clone();
            tracing::warn!("failed to copy {}: {reason}", path.display());
            summary.skipped.push(SkippedFile { path, reason });
        }

        Ok(())
    }

    /// Fingerprints dependencies and documents that are read but not
    /// written, so the next build can compare against them.
    fn finish_cache(&self, cache: &mut CacheManager, dependencies: &BTreeSet<String>) {
        for key in dependencies {
            let path = self.source_dir.join(key);
            if path.is_file() {
                cache.update(&path, key, Vec::<String>::new());
            }
        }

        for document in self.site.documents() {
            if !self.site.is_output_kind(document.kind()) {
                cache.update(document.path(), document.relative_path(), Vec::<String>::new());
            }
        }

        cache.set_data_files(&self.site.data_files);
        cache.set_config_digest(self.site.config.digest());
    }
}

fn stage_error(stage: BuildStage, error: BrambleError) -> BrambleError {
    BrambleError::Stage {
        stage: stage.name(),
        source: Box::new(error),
    }
}

fn output_slots(site: &Site) -> Vec<Slot> {
    let pages = (0..site.pages.len()).map(Slot::Page);
    let posts = (0..site.posts.len()).map(Slot::Post);
    let collections = site
        .collections
        .iter()
        .filter(|(name, _)| site.is_output_kind(&DocumentKind::Collection((*name).clone())))
        .flat_map(|(name, documents)| {
            (0..documents.len()).map(move |index| Slot::Collection(name.clone(), index))
        });

    pages.chain(posts).chain(collections).collect()
}

/// Forgets cache entries that no current document, static file or recorded
/// dependency accounts for, such as a document that became unpublished.
/// Returns whether anything was forgotten.
fn forget_vanished(cache: &mut CacheManager, site: &Site) -> bool {
    let mut known: HashSet<String> = site
        .documents()
        .map(|document| document.relative_path().to_string())
        .chain(site.static_files.iter().map(|file| file.key.clone()))
        .collect();
    let recorded: Vec<String> = cache
        .keys()
        .filter_map(|key| cache.entry(key))
        .flat_map(|entry| entry.dependencies.iter().cloned())
        .collect();
    known.extend(recorded);

    let vanished: Vec<String> = cache
        .keys()
        .filter(|key| !known.contains(*key))
        .map(String::from)
        .collect();
    for key in &vanished {
        tracing::debug!("{key} is no longer part of the site");
        cache.remove(key);
    }
    !vanished.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{HookContext, HookOwner};
    use std::fs;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn site_with(config: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        write(dir.path(), CONFIG_FILE_NAME, config);
        write(
            dir.path(),
            "_layouts/default.html",
            "<html>{{ content }}</html>",
        );
        write(
            dir.path(),
            "about.md",
            "---\ntitle: About\nlayout: default\n---\n# About",
        );
        write(
            dir.path(),
            "_posts/2024-01-02-second.md",
            "---\ntitle: Second\nlayout: default\n---\nTwo",
        );
        write(
            dir.path(),
            "_posts/2024-01-01-first.md",
            "---\ntitle: First\nlayout: default\n---\nOne",
        );
        write(dir.path(), "css/site.css", "body {}");
        dir
    }

    #[test]
    fn test_full_build_writes_documents_and_static_files() {
        let dir = site_with("title = \"Test\"\n");
        let mut builder = SiteBuilder::new(dir.path()).unwrap();
        let result = builder.build(&BuildOptions::default()).unwrap();

        let output = dir.path().join("_site");
        let about = fs::read_to_string(output.join("about/index.html")).unwrap();
        assert!(about.starts_with("<html>"));
        assert!(about.contains("<h1>About</h1>"));
        assert!(output.join("2024/01/02/second/index.html").is_file());
        assert!(output.join("css/site.css").is_file());

        assert_eq!(result.summary.documents, 3);
        assert_eq!(result.summary.rendered, 3);
        assert_eq!(result.summary.static_copied, 1);
        assert_eq!(builder.stage(), BuildStage::Idle);
        for stage in ["reading", "cascading", "rendering", "writing"] {
            assert!(result.timings.get(stage).is_some(), "missing timing for {stage}");
        }
    }

    #[test]
    fn test_missing_config_is_fatal() {
        let dir = TempDir::new().unwrap();
        let result = SiteBuilder::new(dir.path());
        assert!(matches!(result, Err(BrambleError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_invalid_config_touches_nothing() {
        let dir = site_with("title = \"Test\"\npaginate_path = \"/page/\"\n");
        let result = SiteBuilder::new(dir.path());
        assert!(matches!(result, Err(BrambleError::Config { .. })));
        assert!(!dir.path().join("_site").exists());
    }

    #[test]
    fn test_unwritable_destination_fails_writing_stage() {
        let dir = site_with("title = \"Test\"\n");
        fs::write(dir.path().join("_site"), "not a directory").unwrap();

        let mut builder = SiteBuilder::new(dir.path()).unwrap();
        let error = builder.build(&BuildOptions::default()).unwrap_err();
        assert_eq!(error.stage(), Some("writing"));
        assert_eq!(builder.stage(), BuildStage::Idle);
    }

    #[test]
    fn test_render_failure_is_reported_unless_strict() {
        let dir = site_with("title = \"Test\"\n");
        write(dir.path(), "broken.html", "---\ntitle: Broken\n---\n{{ nope(");

        let mut builder = SiteBuilder::new(dir.path()).unwrap();
        let result = builder.build(&BuildOptions::default()).unwrap();
        assert_eq!(result.summary.failed.len(), 1);
        assert!(result.summary.failed[0].path.ends_with("broken.html"));
        assert!(dir.path().join("_site/about/index.html").is_file());

        let strict = BuildOptions {
            strict: true,
            ..BuildOptions::default()
        };
        let error = builder.build(&strict).unwrap_err();
        assert_eq!(error.stage(), Some("rendering"));
    }

    #[test]
    fn test_post_render_hook_edits_output() {
        let dir = site_with("title = \"Test\"\n");
        let mut builder = SiteBuilder::new(dir.path()).unwrap();
        builder.hooks_mut().register(
            HookOwner::Pages,
            HookEvent::PostRender,
            "footer",
            50,
            |context: &mut HookContext<'_>| {
                if let HookContext::Document(document) = context
                    && let Some(rendered) = document.rendered_mut()
                {
                    rendered.output.push_str("<!-- footer -->");
                }
                Ok(())
            },
        );

        builder.build(&BuildOptions::default()).unwrap();
        let about = fs::read_to_string(dir.path().join("_site/about/index.html")).unwrap();
        assert!(about.ends_with("<!-- footer -->"));
        let post =
            fs::read_to_string(dir.path().join("_site/2024/01/01/first/index.html")).unwrap();
        assert!(!post.contains("footer"));
    }

    #[test]
    fn test_site_hooks_fire_once_per_event() {
        let dir = site_with("title = \"Test\"\n");
        let mut builder = SiteBuilder::new(dir.path()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for event in [HookEvent::AfterInit, HookEvent::PostRead, HookEvent::PostWrite] {
            let counter = Arc::clone(&counter);
            builder
                .hooks_mut()
                .register(HookOwner::Site, event, "count", 50, move |_: &mut HookContext<'_>| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
        }

        builder.build(&BuildOptions::default()).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        builder.build(&BuildOptions::default()).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_paginated_index() {
        let dir = site_with("title = \"Test\"\npaginate = 1\n");
        write(
            dir.path(),
            "index.html",
            "---\ntitle: Home\n---\n\
             {% for post in paginator.items %}{{ post.title }}{% endfor %}\
             |{{ paginator.next_page_path }}",
        );

        let mut builder = SiteBuilder::new(dir.path()).unwrap();
        builder.build(&BuildOptions::default()).unwrap();

        let output = dir.path().join("_site");
        assert_eq!(fs::read_to_string(output.join("index.html")).unwrap(), "Second|/page2/");
        assert!(
            fs::read_to_string(output.join("page2/index.html"))
                .unwrap()
                .starts_with("First|")
        );
    }

    #[test]
    fn test_is_source_change() {
        let dir = site_with("title = \"Test\"\n");
        let builder = SiteBuilder::new(dir.path()).unwrap();
        assert!(builder.is_source_change(&dir.path().join("about.md")));
        assert!(!builder.is_source_change(&dir.path().join("_site/about/index.html")));
        assert!(!builder.is_source_change(&dir.path().join(".bramble-cache/build-state.json")));
        assert!(!builder.is_source_change(&dir.path().join(".git/HEAD")));
    }

    #[test]
    fn test_clean_removes_output_and_cache() {
        let dir = site_with("title = \"Test\"\n");
        let mut builder = SiteBuilder::new(dir.path()).unwrap();
        builder.build(&BuildOptions::default()).unwrap();
        assert!(dir.path().join(CACHE_DIR_NAME).exists());

        builder.clean().unwrap();
        assert!(!dir.path().join("_site").exists());
        assert!(!dir.path().join(CACHE_DIR_NAME).exists());
    }
}
