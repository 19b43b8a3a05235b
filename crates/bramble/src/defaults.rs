//! Scoped front-matter defaults from the `[[defaults]]` configuration table.

use crate::document::DocumentKind;
use crate::error::{BrambleError, Result};
use crate::metadata::Metadata;
use glob::Pattern;

#[derive(Debug, Clone)]
pub struct ScopeRule {
    path: String,
    kind: Option<String>,
    values: Metadata,
    pattern: Option<Pattern>,
}

impl ScopeRule {
    /// Builds a rule, compiling `path` as a glob when it contains wildcards.
    pub fn new(path: &str, kind: Option<&str>, values: Metadata) -> Result<Self> {
        let path = normalize_scope_path(path);
        let pattern = if path.contains(['*', '?', '[']) {
            Some(Pattern::new(&path).map_err(|error| {
                BrambleError::config(format!("invalid defaults scope path '{path}': {error}"))
            })?)
        } else {
            None
        };

        Ok(Self {
            path,
            kind: kind.filter(|kind| !kind.is_empty()).map(String::from),
            values,
            pattern,
        })
    }

    pub fn values(&self) -> &Metadata {
        &self.values
    }

    pub fn matches(&self, relative_path: &str, kind: &DocumentKind) -> bool {
        self.matches_kind(kind) && self.matches_path(&normalize_scope_path(relative_path))
    }

    fn matches_kind(&self, kind: &DocumentKind) -> bool {
        match &self.kind {
            None => true,
            Some(filter) => filter == kind.scope_type(),
        }
    }

    fn matches_path(&self, relative_path: &str) -> bool {
        if self.path.is_empty() || relative_path == self.path {
            return true;
        }

        if relative_path
            .strip_prefix(self.path.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
        {
            return true;
        }

        self.pattern
            .as_ref()
            .is_some_and(|pattern| pattern.matches(relative_path))
    }
}

fn normalize_scope_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let path = path.trim_start_matches("./");
    path.trim_matches('/').to_string()
}

/// Effective metadata for one document.
///
/// Matching rules merge in configuration order, each overwriting earlier
/// keys, and the document's own front matter goes on top last.
pub fn apply_defaults(
    relative_path: &str,
    kind: &DocumentKind,
    own: &Metadata,
    rules: &[ScopeRule],
) -> Metadata {
    if rules.is_empty() {
        return own.clone();
    }

    let mut effective = Metadata::new();
    for rule in rules.iter().filter(|rule| rule.matches(relative_path, kind)) {
        effective.merge(&rule.values);
    }
    effective.merge(own);
    effective
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Value;

    fn values(pairs: &[(&str, &str)]) -> Metadata {
        pairs.iter().map(|(key, value)| (*key, *value)).collect()
    }

    fn rule(path: &str, kind: Option<&str>, pairs: &[(&str, &str)]) -> ScopeRule {
        ScopeRule::new(path, kind, values(pairs)).unwrap()
    }

    /// Effective metadata of a document with no front matter.
    fn effective(path: &str, kind: &DocumentKind, rules: &[ScopeRule]) -> Metadata {
        apply_defaults(path, kind, &Metadata::new(), rules)
    }

    #[test]
    fn test_type_filter_excludes_pages() {
        let rules = vec![rule("", Some("posts"), &[("layout", "post")])];

        let post = effective("_posts/2024-01-01-a.md", &DocumentKind::Post, &rules);
        let page = effective("about.md", &DocumentKind::Page, &rules);

        assert_eq!(post.get_str("layout"), Some("post"));
        assert_eq!(page.get("layout"), None);
    }

    #[test]
    fn test_global_rule_reaches_every_kind() {
        let rules = vec![rule("", None, &[("author", "ana"), ("lang", "en")])];
        let kinds = [
            ("about.md", DocumentKind::Page),
            ("_posts/2024-01-01-a.md", DocumentKind::Post),
            ("_recipes/soup.md", DocumentKind::Collection("recipes".into())),
        ];

        for (path, kind) in kinds {
            let own = values(&[("lang", "fr")]);
            let effective = apply_defaults(path, &kind, &own, &rules);
            assert_eq!(effective.get_str("author"), Some("ana"));
            assert_eq!(effective.get_str("lang"), Some("fr"), "{path}");
        }
    }

    #[test]
    fn test_document_value_always_wins() {
        let rules = vec![
            ScopeRule::new("", None, values(&[("title", "default"), ("layout", "a")])).unwrap(),
            ScopeRule::new("docs", None, values(&[("title", "docs default")])).unwrap(),
        ];
        let mut own = Metadata::new();
        own.insert("title", "mine");
        own.insert("draft", Value::Bool(true));

        let effective = apply_defaults("docs/intro.md", &DocumentKind::Page, &own, &rules);
        for (key, value) in own.iter() {
            assert_eq!(effective.get(key), Some(value));
        }
        assert_eq!(effective.get_str("layout"), Some("a"));
    }

    #[test]
    fn test_later_rules_override_earlier() {
        let rules = vec![
            ScopeRule::new("", None, values(&[("layout", "default")])).unwrap(),
            ScopeRule::new("docs", None, values(&[("layout", "docs")])).unwrap(),
        ];

        let nested = effective("docs/guide/intro.md", &DocumentKind::Page, &rules);
        let outside = effective("docsearch.md", &DocumentKind::Page, &rules);

        assert_eq!(nested.get_str("layout"), Some("docs"));
        assert_eq!(outside.get_str("layout"), Some("default"));
    }

    #[test]
    fn test_merge_is_shallow() {
        let mut nested = Metadata::new();
        nested.insert("a", "1");
        let mut rule_values = Metadata::new();
        rule_values.insert("seo", Value::Map(nested));
        let rules = vec![ScopeRule::new("", None, rule_values).unwrap()];

        let mut own_nested = Metadata::new();
        own_nested.insert("b", "2");
        let mut own = Metadata::new();
        own.insert("seo", Value::Map(own_nested));

        let effective = apply_defaults("a.md", &DocumentKind::Page, &own, &rules);
        let seo = effective.get("seo").and_then(Value::as_map).unwrap();
        assert_eq!(seo.get("a"), None);
        assert_eq!(seo.get_str("b"), Some("2"));
    }

    #[test]
    fn test_glob_and_separator_normalization() {
        let rules = vec![
            ScopeRule::new("guides/*.md", None, values(&[("toc", "yes")])).unwrap(),
            ScopeRule::new(".\\notes\\", None, values(&[("kind", "note")])).unwrap(),
        ];

        let guide = effective("guides/setup.md", &DocumentKind::Page, &rules);
        let note = effective("notes\\today.md", &DocumentKind::Page, &rules);

        assert_eq!(guide.get_str("toc"), Some("yes"));
        assert_eq!(note.get_str("kind"), Some("note"));
    }

    #[test]
    fn test_collection_type_filter() {
        let rules = vec![rule("", Some("recipes"), &[("layout", "recipe")])];
        let recipe = effective(
            "_recipes/soup.md",
            &DocumentKind::Collection("recipes".into()),
            &rules,
        );
        let guides = DocumentKind::Collection("guides".into());
        let other = effective("_guides/soup.md", &guides, &rules);
        assert_eq!(recipe.get_str("layout"), Some("recipe"));
        assert_eq!(other.get("layout"), None);
    }

    #[test]
    fn test_no_rules_returns_original() {
        let own = values(&[("title", "x")]);
        assert_eq!(apply_defaults("a.md", &DocumentKind::Page, &own, &[]), own);
    }

    #[test]
    fn test_invalid_glob_is_config_error() {
        assert!(matches!(
            ScopeRule::new("[unclosed", None, Metadata::new()),
            Err(BrambleError::Config { .. })
        ));
    }
}
