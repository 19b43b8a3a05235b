//! Turning one document into its output text.
//!
//! [`Renderer`] is the seam between the build pipeline and a template
//! engine. The pipeline only needs the output and the list of files the
//! render read, which the cache stores as the document's dependencies.

use crate::document::Document;
use crate::error::{BrambleError, IoContext, Result};
use crate::metadata::Metadata;
use crate::parsing::{MarkdownConverter, extract_front_matter};
use crate::site::Site;
use crate::theme::ThemeResolver;
use regex::Regex;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tera::{Context, Tera};

static INCLUDE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\{%-?\s*include\s+["']([^"']+)["']"#).unwrap());

/// Template variables that list other documents. A document whose templates
/// use one of them must be re-rendered whenever the set of documents changes.
const AGGREGATE_MARKERS: &[&str] = &[
    "paginator",
    "site.posts",
    "site.pages",
    "site.collections",
    "site.categories",
    "site.tags",
];

const DATA_MARKER: &str = "site.data";
const BODY_TEMPLATE: &str = "__body__";

/// Inputs shared by every render in one pass.
pub struct RenderContext<'a> {
    pub site: &'a Site,
    /// `site` projected once per pass.
    pub site_value: &'a serde_json::Value,
    pub paginator: Option<&'a serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutput {
    /// Body after templating and markdown, before layouts.
    pub content: String,
    /// Full output with layouts applied.
    pub output: String,
    /// Cache keys of every layout, include and data file the render read.
    pub dependencies: Vec<String>,
    /// Cache keys of template files looked for and not found. Any of them
    /// appearing would change which file the render reads.
    pub absent: Vec<String>,
    /// The templates list other documents.
    pub aggregate: bool,
    /// The templates read `site.data`.
    pub uses_data: bool,
}

pub trait Renderer {
    fn render(&self, document: &Document, context: &RenderContext<'_>) -> Result<RenderOutput>;
}

pub struct TeraRenderer {
    resolver: ThemeResolver,
    markdown: MarkdownConverter,
}

struct Layout {
    name: String,
    metadata: Metadata,
    body: String,
}

#[derive(Default)]
struct Trace {
    dependencies: BTreeSet<String>,
    absent: BTreeSet<String>,
    aggregate: bool,
    uses_data: bool,
}

impl Trace {
    fn scan(&mut self, source: &str) {
        self.aggregate |= AGGREGATE_MARKERS.iter().any(|marker| source.contains(marker));
        self.uses_data |= source.contains(DATA_MARKER);
    }
}

impl TeraRenderer {
    pub fn new(resolver: ThemeResolver) -> Self {
        Self {
            resolver,
            markdown: MarkdownConverter::new(),
        }
    }

    pub fn resolver(&self) -> &ThemeResolver {
        &self.resolver
    }

    /// A Tera instance holding `source` under `name` plus every include it
    /// reaches, transitively.
    fn engine_for(&self, name: &str, source: &str, trace: &mut Trace) -> Result<Tera> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);

        let mut seen = HashSet::new();
        let mut pending = VecDeque::from([source.to_string()]);
        let mut templates = vec![(name.to_string(), source.to_string())];

        while let Some(text) = pending.pop_front() {
            trace.scan(&text);
            for capture in INCLUDE_PATTERN.captures_iter(&text) {
                let include = capture[1].to_string();
                if !seen.insert(include.clone()) {
                    continue;
                }

                let candidates = self.resolver.include_candidates(&include);
                let Some(path) = self.first_existing(candidates, trace) else {
                    tracing::warn!("include '{include}' not found");
                    continue;
                };
                let content = fs::read_to_string(&path).io_context("reading include", &path)?;
                trace.dependencies.insert(self.resolver.dependency_key(&path));
                pending.push_back(content.clone());
                templates.push((include, content));
            }
        }

        tera.add_raw_templates(templates)?;
        Ok(tera)
    }

    fn render_template(
        &self,
        name: &str,
        source: &str,
        context: &Context,
        trace: &mut Trace,
        path: &Path,
    ) -> Result<String> {
        let tera = self.engine_for(name, source, trace).map_err(|error| render_error(path, error))?;
        tera.render(name, context)
            .map_err(|error| render_error(path, BrambleError::Template(error)))
    }

    /// The first candidate that is a file. Candidates passed over on the
    /// way are traced as absent.
    fn first_existing(&self, candidates: Vec<PathBuf>, trace: &mut Trace) -> Option<PathBuf> {
        for candidate in candidates {
            if candidate.is_file() {
                return Some(candidate);
            }
            trace.absent.insert(self.resolver.dependency_key(&candidate));
        }
        None
    }

    fn load_layout(&self, name: &str, trace: &mut Trace) -> Result<Option<Layout>> {
        let candidates = self.resolver.layout_candidates(name);
        let Some(path) = self.first_existing(candidates, trace) else {
            return Ok(None);
        };

        let content = fs::read_to_string(&path).io_context("reading layout", &path)?;
        let (metadata, body) = extract_front_matter(&content, &path)?;
        trace.dependencies.insert(self.resolver.dependency_key(&path));

        Ok(Some(Layout {
            name: name.to_string(),
            metadata,
            body,
        }))
    }
}

impl Renderer for TeraRenderer {
    fn render(&self, document: &Document, context: &RenderContext<'_>) -> Result<RenderOutput> {
        let path = document.path();
        let mut trace = Trace::default();

        let mut tera_context = Context::new();
        tera_context.insert("site", context.site_value);
        tera_context.insert("page", document.to_value());
        if let Some(paginator) = context.paginator {
            tera_context.insert("paginator", paginator);
        }

        let render_body = document
            .metadata()
            .get_bool("render_template")
            .unwrap_or(true);

        let mut content = if render_body {
            self.render_template(BODY_TEMPLATE, document.body(), &tera_context, &mut trace, path)?
        } else {
            document.body().to_string()
        };

        if document
            .extension()
            .is_some_and(|extension| context.site.config.is_markdown(extension))
        {
            content = self.markdown.convert(&content);
        }

        let mut output = content.clone();
        let mut visited = HashSet::new();
        let mut next_layout = document.layout().map(String::from);

        while let Some(name) = next_layout.take() {
            if !visited.insert(name.clone()) {
                return Err(BrambleError::LayoutCycle {
                    name,
                    path: path.to_path_buf(),
                });
            }

            let Some(layout) = self.load_layout(&name, &mut trace)? else {
                tracing::warn!("layout '{name}' not found for {}", path.display());
                break;
            };

            tera_context.insert("content", &output);
            tera_context.insert("layout", &layout.metadata);
            let template_name = format!("__layout__/{}", layout.name);
            output = self.render_template(
                &template_name,
                &layout.body,
                &tera_context,
                &mut trace,
                path,
            )?;

            next_layout = layout
                .metadata
                .get_str("layout")
                .filter(|parent| !parent.is_empty())
                .map(String::from);
        }

        if trace.uses_data {
            trace.dependencies.extend(context.site.data_files.iter().cloned());
        }

        Ok(RenderOutput {
            content,
            output,
            dependencies: trace.dependencies.into_iter().collect(),
            absent: trace.absent.into_iter().collect(),
            aggregate: trace.aggregate,
            uses_data: trace.uses_data,
        })
    }
}

fn render_error(path: &Path, error: BrambleError) -> BrambleError {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(&error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    BrambleError::Render {
        path: path.to_path_buf(),
        message,
    }
}
