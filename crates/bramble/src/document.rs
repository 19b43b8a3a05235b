//! The content unit the pipeline moves around.
//!
//! A [`Document`] is built once per discovered source file with its defaults
//! already applied, so its effective metadata never changes afterwards. The
//! only mutation it sees is [`Document::set_rendered`], once per build pass.

use crate::defaults::{ScopeRule, apply_defaults};
use crate::metadata::{Metadata, Value};
use crate::parsing::{parse_date_from_filename, slugify};
use crate::permalink::Permalink;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Page,
    Post,
    Collection(String),
}

impl DocumentKind {
    /// The value a defaults `type` filter is compared against.
    pub fn scope_type(&self) -> &str {
        match self {
            DocumentKind::Page => "pages",
            DocumentKind::Post => "posts",
            DocumentKind::Collection(name) => name,
        }
    }

    pub fn collection_name(&self) -> Option<&str> {
        match self {
            DocumentKind::Collection(name) => Some(name),
            DocumentKind::Post => Some("posts"),
            DocumentKind::Page => None,
        }
    }
}

/// Output of one render pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// Body after templating and markdown, before layouts.
    pub content: String,
    /// What gets written: `content` wrapped in its layouts.
    pub output: String,
    /// Absolute path of the written file.
    pub output_path: PathBuf,
    pub url: String,
}

/// Raw parts of a source file, before defaults are applied.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Forward-slash path relative to the site source root.
    pub relative_path: String,
    pub front_matter: Metadata,
    pub body: String,
    /// Fallback date for drafts, taken from the file's modification time.
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct Document {
    path: PathBuf,
    relative_path: String,
    kind: DocumentKind,
    front_matter: Metadata,
    metadata: Metadata,
    body: String,
    date: Option<DateTime<FixedOffset>>,
    slug: String,
    draft: bool,
    permalink: Permalink,
    rendered: Option<Rendered>,
    projection: OnceLock<serde_json::Value>,
}

impl Document {
    pub fn new(source: SourceFile, kind: DocumentKind, rules: &[ScopeRule]) -> Self {
        let metadata = apply_defaults(&source.relative_path, &kind, &source.front_matter, rules);

        let filename = Path::new(&source.relative_path)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let filename_parts = match kind {
            DocumentKind::Page => None,
            _ => parse_date_from_filename(&filename),
        };

        let draft = source
            .relative_path
            .split('/')
            .any(|segment| segment == "_drafts");

        let date = metadata
            .get_date("date")
            .or_else(|| {
                filename_parts.as_ref().and_then(|(date, _)| {
                    date.and_hms_opt(0, 0, 0)
                        .map(|naive| Utc.from_utc_datetime(&naive).fixed_offset())
                })
            })
            .or_else(|| {
                if draft {
                    source.modified.map(|modified| modified.fixed_offset())
                } else {
                    None
                }
            });

        let slug = metadata
            .get_str("slug")
            .map(String::from)
            .or_else(|| filename_parts.map(|(_, slug)| slug))
            .unwrap_or_else(|| {
                Path::new(&filename)
                    .file_stem()
                    .map(|stem| slugify(&stem.to_string_lossy()))
                    .unwrap_or_default()
            });

        Self {
            path: source.path,
            relative_path: source.relative_path,
            kind,
            front_matter: source.front_matter,
            metadata,
            body: source.body,
            date,
            slug,
            draft,
            permalink: Permalink::default(),
            rendered: None,
            projection: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn kind(&self) -> &DocumentKind {
        &self.kind
    }

    /// Effective metadata: defaults with the document's own front matter on top.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The metadata exactly as written in the source file.
    pub fn front_matter(&self) -> &Metadata {
        &self.front_matter
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn date(&self) -> Option<DateTime<FixedOffset>> {
        self.date
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn is_draft(&self) -> bool {
        self.draft
    }

    pub fn title(&self) -> String {
        self.metadata
            .get_str("title")
            .map(String::from)
            .unwrap_or_else(|| self.slug.clone())
    }

    pub fn layout(&self) -> Option<&str> {
        self.metadata.get_str("layout").filter(|layout| !layout.is_empty())
    }

    /// `published: false` removes a document from the build.
    pub fn is_published(&self) -> bool {
        self.metadata.get_bool("published").unwrap_or(true)
    }

    pub fn categories(&self) -> Vec<String> {
        let mut categories = self.metadata.get_string_list("categories");
        if let Some(category) = self.metadata.get_str("category") {
            categories.push(category.to_string());
        }
        categories
    }

    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.relative_path)
            .extension()
            .and_then(|extension| extension.to_str())
    }

    pub fn permalink(&self) -> &Permalink {
        &self.permalink
    }

    pub(crate) fn assign_permalink(&mut self, permalink: Permalink) {
        self.permalink = permalink;
        self.projection = OnceLock::new();
    }

    pub fn rendered(&self) -> Option<&Rendered> {
        self.rendered.as_ref()
    }

    /// Stores this pass's render output and drops the cached projection.
    pub fn set_rendered(&mut self, rendered: Rendered) {
        self.rendered = Some(rendered);
        self.projection = OnceLock::new();
    }

    /// Post-render hooks edit the output through this before it is written.
    pub fn rendered_mut(&mut self) -> Option<&mut Rendered> {
        self.projection = OnceLock::new();
        self.rendered.as_mut()
    }

    /// Template-facing view of the document, computed on first use.
    pub fn to_value(&self) -> &serde_json::Value {
        self.projection.get_or_init(|| self.build_projection())
    }

    fn build_projection(&self) -> serde_json::Value {
        let mut object = match self.metadata.to_json() {
            serde_json::Value::Object(object) => object,
            _ => serde_json::Map::new(),
        };

        let content = self
            .rendered
            .as_ref()
            .map(|rendered| rendered.content.as_str())
            .unwrap_or(&self.body);

        object.insert("title".into(), self.title().into());
        object.insert("slug".into(), self.slug.clone().into());
        object.insert("path".into(), self.relative_path.clone().into());
        object.insert("url".into(), self.permalink.url.clone().into());
        object.insert("content".into(), content.into());
        object.insert("draft".into(), self.draft.into());
        if let Some(collection) = self.kind.collection_name() {
            object.insert("collection".into(), collection.into());
        }
        if let Some(date) = self.date {
            object.insert("date".into(), date.to_rfc3339().into());
        }
        if !object.contains_key("excerpt")
            && let Some(excerpt) = extract_excerpt(&self.body, 200)
        {
            object.insert("excerpt".into(), excerpt.into());
        }

        serde_json::Value::Object(object)
    }

    /// Newest first, then by path so equal dates order deterministically.
    pub fn compare_by_date_desc(&self, other: &Document) -> std::cmp::Ordering {
        other
            .date
            .cmp(&self.date)
            .then_with(|| self.relative_path.cmp(&other.relative_path))
    }
}

/// First paragraph of the body with inline markup stripped.
pub fn extract_excerpt(body: &str, max_chars: usize) -> Option<String> {
    let first_paragraph = body
        .split("\n\n")
        .map(str::trim)
        .find(|paragraph| !paragraph.is_empty())?;

    let text: String = first_paragraph
        .chars()
        .filter(|character| !['#', '*', '_', '`', '[', ']'].contains(character))
        .collect();
    let text = text.trim();

    if text.chars().count() <= max_chars {
        return Some(text.to_string());
    }

    let truncated: String = text.chars().take(max_chars).collect();
    let cut = truncated.rfind(' ').unwrap_or(truncated.len());
    Some(format!("{}...", &truncated[..cut]))
}

impl From<&Document> for Value {
    fn from(document: &Document) -> Self {
        Value::from_json(document.to_value().clone())
    }
}
