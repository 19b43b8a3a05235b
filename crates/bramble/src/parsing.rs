use crate::error::{BrambleError, Result};
use crate::metadata::{Metadata, Value, parse_date};
use chrono::NaiveDate;
use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use std::path::Path;
use syntect::highlighting::{Theme, ThemeSet};
use syntect::html::highlighted_html_for_string;
use syntect::parsing::SyntaxSet;

const HIGHLIGHT_THEME: &str = "base16-ocean.dark";

/// Keys coerced from strings to dates when the string parses as one.
const DATE_KEYS: &[&str] = &["date", "last_modified_at"];

/// Splits a source file into its front matter and body.
///
/// `---` opens YAML front matter and `+++` opens TOML. A file without either
/// delimiter has empty metadata and the whole text as body.
pub fn extract_front_matter(content: &str, path: &Path) -> Result<(Metadata, String)> {
    let content = content.replace("\r\n", "\n");
    let content = content.trim_start_matches('\u{feff}');

    let (delimiter, is_toml) = if content.starts_with("+++") {
        ("+++", true)
    } else if content.starts_with("---") {
        ("---", false)
    } else {
        return Ok((Metadata::new(), content.to_string()));
    };

    // "----" or "--- text" is body content, not a delimiter line.
    let Some(rest) = content[3..].strip_prefix('\n') else {
        return Ok((Metadata::new(), content.to_string()));
    };

    let end_index =
        find_closing_delimiter(rest, delimiter).ok_or_else(|| BrambleError::InvalidFrontmatter {
            path: path.to_path_buf(),
        })?;

    let raw = &rest[..end_index];
    let body = rest[end_index + delimiter.len()..]
        .strip_prefix('\n')
        .unwrap_or(&rest[end_index + delimiter.len()..]);

    let mut metadata = if is_toml {
        parse_toml_block(raw, path)?
    } else {
        parse_yaml_block(raw, path)?
    };
    coerce_dates(&mut metadata);

    Ok((metadata, body.to_string()))
}

fn parse_toml_block(raw: &str, path: &Path) -> Result<Metadata> {
    let table: toml::Table = toml::from_str(raw).map_err(|error| BrambleError::TomlParse {
        path: path.to_path_buf(),
        message: error.to_string(),
    })?;
    Ok(Metadata::from_toml_table(table))
}

fn parse_yaml_block(raw: &str, path: &Path) -> Result<Metadata> {
    if raw.trim().is_empty() {
        return Ok(Metadata::new());
    }

    let value: serde_yml::Value =
        serde_yml::from_str(raw).map_err(|error| BrambleError::YamlParse {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?;

    match Value::from_yaml(value) {
        Value::Map(map) => Ok(map),
        Value::Null => Ok(Metadata::new()),
        _ => Err(BrambleError::InvalidFrontmatter {
            path: path.to_path_buf(),
        }),
    }
}

fn find_closing_delimiter(content: &str, delimiter: &str) -> Option<usize> {
    let mut position = 0;

    for line in content.split_inclusive('\n') {
        if line.trim_end() == delimiter {
            return Some(position);
        }
        position += line.len();
    }

    None
}

fn coerce_dates(metadata: &mut Metadata) {
    for key in DATE_KEYS {
        let parsed = metadata.get_str(key).and_then(parse_date);
        if let Some(date) = parsed {
            metadata.insert(*key, Value::Date(date));
        }
    }
}

/// Splits `2024-01-15-hello-world.md` into its date and slug.
pub fn parse_date_from_filename(filename: &str) -> Option<(NaiveDate, String)> {
    let stem = Path::new(filename)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string());

    if stem.len() < 12 || !stem.is_char_boundary(10) || stem.as_bytes()[10] != b'-' {
        return None;
    }

    let date = NaiveDate::parse_from_str(&stem[..10], "%Y-%m-%d").ok()?;
    let slug = stem[11..].to_string();

    if slug.is_empty() {
        return None;
    }

    Some((date, slug))
}

/// Lowercase, dash-separated form of a title or filename.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;

    for character in input.chars() {
        if character.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(character.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// Markdown to HTML with syntax-highlighted fenced code blocks.
pub struct MarkdownConverter {
    syntax_set: SyntaxSet,
    theme: Theme,
}

impl Default for MarkdownConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownConverter {
    pub fn new() -> Self {
        let mut theme_set = ThemeSet::load_defaults();
        let theme = theme_set
            .themes
            .remove(HIGHLIGHT_THEME)
            .unwrap_or_default();

        Self {
            syntax_set: SyntaxSet::load_defaults_newlines(),
            theme,
        }
    }

    pub fn convert(&self, content: &str) -> String {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_HEADING_ATTRIBUTES);

        let mut html_output = String::new();
        let mut code_block: Option<(Option<String>, String)> = None;

        for event in Parser::new_ext(content, options) {
            match event {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let language = match kind {
                        CodeBlockKind::Fenced(language) if !language.is_empty() => {
                            Some(language.to_string())
                        }
                        _ => None,
                    };
                    code_block = Some((language, String::new()));
                }
                Event::Text(text) if code_block.is_some() => {
                    if let Some((_, buffer)) = code_block.as_mut() {
                        buffer.push_str(&text);
                    }
                }
                Event::End(TagEnd::CodeBlock) => {
                    if let Some((language, buffer)) = code_block.take() {
                        html_output.push_str(&self.highlight(language.as_deref(), &buffer));
                    }
                }
                other => pulldown_cmark::html::push_html(&mut html_output, std::iter::once(other)),
            }
        }

        html_output
    }

    fn highlight(&self, language: Option<&str>, code: &str) -> String {
        let Some(language) = language else {
            return format!("<pre><code>{}</code></pre>", escape_html(code));
        };

        self.syntax_set
            .find_syntax_by_token(language)
            .and_then(|syntax| {
                highlighted_html_for_string(code, &self.syntax_set, syntax, &self.theme).ok()
            })
            .unwrap_or_else(|| {
                format!(
                    "<pre><code class=\"language-{}\">{}</code></pre>",
                    escape_html(language),
                    escape_html(code)
                )
            })
    }
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_yaml_front_matter() {
        let content = "---\ntitle: Test\nlayout: post\n---\n\nContent with --- dashes";
        let (metadata, body) = extract_front_matter(content, &PathBuf::from("a.md")).unwrap();
        assert_eq!(metadata.get_str("title"), Some("Test"));
        assert_eq!(metadata.keys().collect::<Vec<_>>(), vec!["title", "layout"]);
        assert_eq!(body, "\nContent with --- dashes");
    }

    #[test]
    fn test_toml_front_matter() {
        let content = "+++\ntitle = \"Test\"\n+++\nBody content";
        let (metadata, body) = extract_front_matter(content, &PathBuf::from("a.md")).unwrap();
        assert_eq!(metadata.get_str("title"), Some("Test"));
        assert_eq!(body, "Body content");
    }

    #[test]
    fn test_empty_front_matter() {
        let (metadata, body) =
            extract_front_matter("---\n---\nhello", &PathBuf::from("a.md")).unwrap();
        assert!(metadata.is_empty());
        assert_eq!(body, "hello");
    }

    #[test]
    fn test_no_front_matter() {
        let (metadata, body) = extract_front_matter("plain text", &PathBuf::from("a.md")).unwrap();
        assert!(metadata.is_empty());
        assert_eq!(body, "plain text");
    }

    #[test]
    fn test_horizontal_rule_is_not_front_matter() {
        let (metadata, body) = extract_front_matter("----\ntext", &PathBuf::from("a.md")).unwrap();
        assert!(metadata.is_empty());
        assert_eq!(body, "----\ntext");
    }

    #[test]
    fn test_unterminated_front_matter_is_error() {
        let result = extract_front_matter("---\ntitle: x\nbody", &PathBuf::from("a.md"));
        assert!(matches!(result, Err(BrambleError::InvalidFrontmatter { .. })));
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        let result = extract_front_matter("---\ntitle: [unclosed\n---\n", &PathBuf::from("a.md"));
        assert!(matches!(result, Err(BrambleError::YamlParse { .. })));
    }

    #[test]
    fn test_date_key_is_coerced() {
        let content = "---\ndate: 2024-03-01 09:00:00\n---\n";
        let (metadata, _) = extract_front_matter(content, &PathBuf::from("a.md")).unwrap();
        assert!(matches!(metadata.get("date"), Some(Value::Date(_))));
    }

    #[test]
    fn test_parse_date_from_filename() {
        let (date, slug) = parse_date_from_filename("2024-01-15-hello-world.md").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(slug, "hello-world");
        assert_eq!(parse_date_from_filename("about.md"), None);
        assert_eq!(parse_date_from_filename("2024-13-45-bad.md"), None);
        assert_eq!(parse_date_from_filename("2024-01-15.md"), None);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Rust & Tera  "), "rust-tera");
    }

    #[test]
    fn test_markdown_conversion() {
        let converter = MarkdownConverter::new();
        let html = converter.convert("# Hello\n\nThis is **bold**.");
        assert!(html.contains("<h1>Hello</h1>"));
        assert!(html.contains("<strong>bold</strong>"));
    }

    #[test]
    fn test_markdown_code_blocks() {
        let converter = MarkdownConverter::new();
        let plain = converter.convert("```\na < b\n```");
        assert!(plain.contains("<pre><code>a &lt; b"));

        let highlighted = converter.convert("```rust\nfn main() {}\n```");
        assert!(highlighted.contains("main"));
        assert!(highlighted.contains("<pre"));
    }
}
