use crate::config::SiteConfig;
use crate::document::{Document, DocumentKind};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A file without front matter, copied to the destination as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFile {
    pub source: PathBuf,
    /// Cache key: site-relative, or absolute for theme assets.
    pub key: String,
    /// Relative to the destination root.
    pub output_path: PathBuf,
}

/// Everything one build knows about the site.
///
/// A `Site` lives as long as the process. Rebuilds call [`Site::reset`],
/// which empties its collections in place, so holders of a `&mut Site`
/// across rebuilds (a dev server) keep a valid handle.
#[derive(Debug)]
pub struct Site {
    pub config: SiteConfig,
    pub source_dir: PathBuf,
    pub destination_dir: PathBuf,
    pub pages: Vec<Document>,
    /// Newest first.
    pub posts: Vec<Document>,
    pub collections: BTreeMap<String, Vec<Document>>,
    pub static_files: Vec<StaticFile>,
    pub data: Map<String, Value>,
    /// Cache keys of every loaded data file.
    pub data_files: Vec<String>,
    pub time: DateTime<Utc>,
}

impl Site {
    pub fn new(config: SiteConfig, source_dir: &Path) -> Self {
        let destination_dir = config.destination_dir(source_dir);
        Self {
            config,
            source_dir: source_dir.to_path_buf(),
            destination_dir,
            pages: Vec::new(),
            posts: Vec::new(),
            collections: BTreeMap::new(),
            static_files: Vec::new(),
            data: Map::new(),
            data_files: Vec::new(),
            time: Utc::now(),
        }
    }

    pub fn reset(&mut self) {
        self.pages.clear();
        self.posts.clear();
        for documents in self.collections.values_mut() {
            documents.clear();
        }
        self.static_files.clear();
        self.data.clear();
        self.data_files.clear();
        self.time = Utc::now();
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.pages
            .iter()
            .chain(self.posts.iter())
            .chain(self.collections.values().flatten())
    }

    pub fn documents_mut(&mut self) -> impl Iterator<Item = &mut Document> {
        self.pages
            .iter_mut()
            .chain(self.posts.iter_mut())
            .chain(self.collections.values_mut().flatten())
    }

    pub fn document_count(&self) -> usize {
        self.documents().count()
    }

    /// Collections whose documents are written to the destination.
    pub fn is_output_kind(&self, kind: &DocumentKind) -> bool {
        match kind {
            DocumentKind::Collection(name) => self
                .config
                .collections
                .get(name)
                .is_none_or(|collection| collection.output),
            _ => true,
        }
    }

    /// The `site` variable handed to templates.
    pub fn to_value(&self) -> Value {
        let project = |documents: &[Document]| -> Vec<Value> {
            documents.iter().map(|document| document.to_value().clone()).collect()
        };

        let collections: Map<String, Value> = self
            .collections
            .iter()
            .map(|(name, documents)| (name.clone(), Value::Array(project(documents))))
            .collect();

        let static_files: Vec<Value> = self
            .static_files
            .iter()
            .map(|file| json!({ "path": crate::path_guard::to_slash(&file.output_path) }))
            .collect();

        let extra = serde_json::to_value(&self.config.extra).unwrap_or(Value::Null);

        json!({
            "title": self.config.title,
            "description": self.config.description,
            "base_url": self.config.base_url,
            "time": self.time.to_rfc3339(),
            "pages": project(&self.pages),
            "posts": project(&self.posts),
            "collections": collections,
            "categories": self.group_posts_by(|document| document.categories()),
            "tags": self.group_posts_by(|document| document.metadata().get_string_list("tags")),
            "data": self.data,
            "static_files": static_files,
            "extra": extra,
        })
    }

    fn group_posts_by(&self, labels: impl Fn(&Document) -> Vec<String>) -> Map<String, Value> {
        let mut groups: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for post in &self.posts {
            for label in labels(post) {
                groups
                    .entry(label)
                    .or_default()
                    .push(post.to_value().clone());
            }
        }
        groups
            .into_iter()
            .map(|(label, posts)| (label, Value::Array(posts)))
            .collect()
    }
}
