use crate::document::{Document, DocumentKind};
use crate::error::{BrambleError, Result};
use crate::path_guard::is_safe_relative;
use std::path::{Path, PathBuf};

pub const DEFAULT_POST_PERMALINK: &str = "/:year/:month/:day/:title/";
pub const DEFAULT_COLLECTION_PERMALINK: &str = "/:collection/:path/";

/// Where a document will be published: its URL and its output path
/// relative to the destination root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permalink {
    pub url: String,
    pub output_path: PathBuf,
}

impl Permalink {
    pub fn from_url(url: &str) -> Self {
        let url = collapse_slashes(&format!("/{url}"));
        let trimmed = url.trim_start_matches('/');

        let output_path = if trimmed.is_empty() || url.ends_with('/') {
            PathBuf::from(trimmed).join("index.html")
        } else if has_extension(trimmed) {
            PathBuf::from(trimmed)
        } else {
            PathBuf::from(format!("{trimmed}.html"))
        };

        Self { url, output_path }
    }
}

/// Computes the permalink of `document`.
///
/// A `permalink` key in the effective metadata wins; otherwise posts and
/// collection documents expand `pattern` and pages map their source path to
/// a pretty URL.
pub fn resolve(
    document: &Document,
    pattern: Option<&str>,
    markdown_ext: &[String],
) -> Result<Permalink> {
    let template = document
        .metadata()
        .get_str("permalink")
        .map(String::from)
        .or_else(|| match document.kind() {
            DocumentKind::Page => None,
            DocumentKind::Post => Some(pattern.unwrap_or(DEFAULT_POST_PERMALINK).to_string()),
            DocumentKind::Collection(_) => {
                Some(pattern.unwrap_or(DEFAULT_COLLECTION_PERMALINK).to_string())
            }
        });

    let permalink = match template {
        Some(template) => Permalink::from_url(&expand(&template, document)),
        None => page_permalink(document.relative_path(), markdown_ext),
    };

    if !is_safe_relative(&permalink.output_path.to_string_lossy()) {
        return Err(BrambleError::InvalidPermalink {
            path: document.path().to_path_buf(),
            permalink: permalink.url,
        });
    }

    Ok(permalink)
}

fn page_permalink(relative_path: &str, markdown_ext: &[String]) -> Permalink {
    let path = Path::new(relative_path);
    let extension = path
        .extension()
        .map(|extension| extension.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let parent = path
        .parent()
        .map(|parent| parent.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();

    let is_markup = extension == "html" || markdown_ext.iter().any(|ext| *ext == extension);

    if !is_markup {
        return Permalink::from_url(relative_path);
    }

    if stem == "index" {
        return Permalink::from_url(&format!("{parent}/"));
    }

    if extension == "html" {
        return Permalink::from_url(&format!("{parent}/{stem}.html"));
    }

    Permalink::from_url(&format!("{parent}/{stem}/"))
}

fn expand(template: &str, document: &Document) -> String {
    let date = document.date();
    let format_date = |format: &str| {
        date.map(|date| date.format(format).to_string()).unwrap_or_default()
    };

    let categories = document
        .categories()
        .iter()
        .map(|category| crate::parsing::slugify(category))
        .filter(|category| !category.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    let collection = document.kind().collection_name().unwrap_or_default();
    let within_collection = collection_relative_path(document);
    let name = Path::new(document.relative_path())
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();

    let replacements = [
        (":categories", categories),
        (":collection", collection.to_string()),
        (":month", format_date("%m")),
        (":title", document.slug().to_string()),
        (":year", format_date("%Y")),
        (":slug", document.slug().to_string()),
        (":name", name),
        (":path", within_collection),
        (":day", format_date("%d")),
    ];

    let mut expanded = template.to_string();
    for (placeholder, value) in replacements {
        expanded = expanded.replace(placeholder, &value);
    }
    collapse_slashes(&expanded)
}

/// Path inside the collection directory, without extension.
fn collection_relative_path(document: &Document) -> String {
    let relative = document.relative_path();
    let inner = match document.kind() {
        DocumentKind::Page => relative,
        _ => relative.split_once('/').map(|(_, rest)| rest).unwrap_or(relative),
    };
    let inner = Path::new(inner);
    let stem = inner
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    match inner.parent().map(|parent| parent.to_string_lossy().replace('\\', "/")) {
        Some(parent) if !parent.is_empty() => format!("{parent}/{stem}"),
        _ => stem,
    }
}

fn collapse_slashes(url: &str) -> String {
    let mut collapsed = String::with_capacity(url.len());
    for character in url.chars() {
        if character == '/' && collapsed.ends_with('/') {
            continue;
        }
        collapsed.push(character);
    }
    collapsed
}

fn has_extension(path: &str) -> bool {
    path.rsplit('/')
        .next()
        .is_some_and(|segment| segment.contains('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::SourceFile;
    use crate::metadata::Metadata;

    fn markdown() -> Vec<String> {
        vec!["md".into(), "markdown".into()]
    }

    fn document(relative: &str, kind: DocumentKind, front_matter: Metadata) -> Document {
        Document::new(
            SourceFile {
                path: PathBuf::from("/site").join(relative),
                relative_path: relative.to_string(),
                front_matter,
                body: String::new(),
                modified: None,
            },
            kind,
            &[],
        )
    }

    #[test]
    fn test_page_permalinks() {
        let cases = [
            ("index.md", "/", "index.html"),
            ("about.md", "/about/", "about/index.html"),
            ("docs/index.md", "/docs/", "docs/index.html"),
            ("docs/setup.markdown", "/docs/setup/", "docs/setup/index.html"),
            ("contact.html", "/contact.html", "contact.html"),
            ("feed.xml", "/feed.xml", "feed.xml"),
        ];

        for (relative, url, output) in cases {
            let page = document(relative, DocumentKind::Page, Metadata::new());
            let permalink = resolve(&page, None, &markdown()).unwrap();
            assert_eq!(permalink.url, url, "{relative}");
            assert_eq!(permalink.output_path, PathBuf::from(output), "{relative}");
        }
    }

    #[test]
    fn test_post_default_pattern() {
        let post = document(
            "_posts/2024-01-15-hello-world.md",
            DocumentKind::Post,
            Metadata::new(),
        );
        let permalink = resolve(&post, None, &markdown()).unwrap();
        assert_eq!(permalink.url, "/2024/01/15/hello-world/");
        assert_eq!(permalink.output_path, PathBuf::from("2024/01/15/hello-world/index.html"));
    }

    #[test]
    fn test_categories_placeholder_collapses_when_empty() {
        let post = document("_posts/2024-01-15-a.md", DocumentKind::Post, Metadata::new());
        let permalink = resolve(&post, Some("/:categories/:title/"), &markdown()).unwrap();
        assert_eq!(permalink.url, "/a/");

        let front_matter: Metadata = [("category", "Rust Tips")].into_iter().collect();
        let post = document("_posts/2024-01-15-a.md", DocumentKind::Post, front_matter);
        let permalink = resolve(&post, Some("/:categories/:title/"), &markdown()).unwrap();
        assert_eq!(permalink.url, "/rust-tips/a/");
    }

    #[test]
    fn test_collection_path_placeholder() {
        let recipe = document(
            "_recipes/soups/tomato.md",
            DocumentKind::Collection("recipes".into()),
            Metadata::new(),
        );
        let permalink = resolve(&recipe, None, &markdown()).unwrap();
        assert_eq!(permalink.url, "/recipes/soups/tomato/");
    }

    #[test]
    fn test_front_matter_permalink_overrides() {
        let front_matter: Metadata = [("permalink", "/custom/:name.html")].into_iter().collect();
        let page = document("about.md", DocumentKind::Page, front_matter);
        let permalink = resolve(&page, None, &markdown()).unwrap();
        assert_eq!(permalink.url, "/custom/about.html");
        assert_eq!(permalink.output_path, PathBuf::from("custom/about.html"));
    }

    #[test]
    fn test_extensionless_permalink_gets_html() {
        let permalink = Permalink::from_url("/notes/today");
        assert_eq!(permalink.output_path, PathBuf::from("notes/today.html"));
    }

    #[test]
    fn test_escaping_permalink_is_rejected() {
        let front_matter: Metadata = [("permalink", "/../../etc/passwd")].into_iter().collect();
        let page = document("about.md", DocumentKind::Page, front_matter);
        assert!(matches!(
            resolve(&page, None, &markdown()),
            Err(BrambleError::InvalidPermalink { .. })
        ));
    }
}
