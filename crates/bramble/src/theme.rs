//! Layout and include lookup across the site and an installed theme.
//!
//! The site always wins: a file under the site's `_layouts` or `_includes`
//! shadows the theme file of the same name. A theme that cannot be found is
//! not an error; the site simply builds without theme templates.

use crate::path_guard::{join_within, relative_key, to_slash};
use std::path::{Path, PathBuf};

pub const LAYOUTS_DIR: &str = "_layouts";
pub const INCLUDES_DIR: &str = "_includes";
pub const THEME_ASSETS_DIR: &str = "assets";

const PACKAGE_DIR: &str = "node_modules";
const LAYOUT_EXTENSIONS: &[&str] = &["", ".html", ".md", ".markdown"];

#[derive(Debug, Clone)]
pub struct ThemeResolver {
    source_dir: PathBuf,
    theme_dir: Option<PathBuf>,
}

impl ThemeResolver {
    pub fn new(source_dir: &Path, theme: Option<&str>) -> Self {
        let theme_dir = theme.and_then(|name| {
            let found = discover_theme(source_dir, name);
            if found.is_none() {
                tracing::warn!("theme '{name}' not found, building without theme layouts");
            }
            found
        });

        Self {
            source_dir: source_dir.to_path_buf(),
            theme_dir,
        }
    }

    pub fn theme_dir(&self) -> Option<&Path> {
        self.theme_dir.as_deref()
    }

    pub fn layout_search_dirs(&self) -> Vec<PathBuf> {
        self.search_dirs(LAYOUTS_DIR)
    }

    pub fn include_search_dirs(&self) -> Vec<PathBuf> {
        self.search_dirs(INCLUDES_DIR)
    }

    fn search_dirs(&self, name: &str) -> Vec<PathBuf> {
        let mut dirs = vec![self.source_dir.join(name)];
        if let Some(theme_dir) = &self.theme_dir {
            dirs.push(theme_dir.join(name));
        }
        dirs
    }

    /// `default` finds `_layouts/default`, then `default.html`, `default.md`
    /// and `default.markdown`, in the site before the theme.
    pub fn resolve_layout(&self, name: &str) -> Option<PathBuf> {
        first_file(self.layout_candidates(name))
    }

    pub fn resolve_include(&self, relative_path: &str) -> Option<PathBuf> {
        first_file(self.include_candidates(relative_path))
    }

    /// Every path [`resolve_layout`](Self::resolve_layout) tries, in order.
    pub fn layout_candidates(&self, name: &str) -> Vec<PathBuf> {
        self.layout_search_dirs()
            .into_iter()
            .flat_map(|dir| {
                LAYOUT_EXTENSIONS.iter().filter_map(move |extension| {
                    join_within(&dir, format!("{name}{extension}")).ok()
                })
            })
            .collect()
    }

    pub fn include_candidates(&self, relative_path: &str) -> Vec<PathBuf> {
        self.include_search_dirs()
            .into_iter()
            .filter_map(|dir| join_within(&dir, relative_path).ok())
            .collect()
    }

    pub fn assets_dir(&self) -> Option<PathBuf> {
        self.theme_dir
            .as_ref()
            .map(|theme_dir| theme_dir.join(THEME_ASSETS_DIR))
            .filter(|dir| dir.is_dir())
    }

    /// Cache key for a template file: site-relative when it lives in the
    /// site, absolute otherwise.
    pub fn dependency_key(&self, path: &Path) -> String {
        relative_key(&self.source_dir, path).unwrap_or_else(|| to_slash(path))
    }
}

fn first_file(candidates: Vec<PathBuf>) -> Option<PathBuf> {
    candidates.into_iter().find(|candidate| candidate.is_file())
}

/// Looks for `name` in the nearest `node_modules` above `source_dir`, then
/// as a path relative to `source_dir`, then as an absolute path.
fn discover_theme(source_dir: &Path, name: &str) -> Option<PathBuf> {
    let package_root = source_dir
        .ancestors()
        .map(|ancestor| ancestor.join(PACKAGE_DIR))
        .find(|candidate| candidate.is_dir());

    if let Some(package_root) = package_root
        && let Ok(candidate) = join_within(&package_root, name)
        && candidate.is_dir()
    {
        return Some(candidate);
    }

    let relative = source_dir.join(name);
    if relative.is_dir() {
        return Some(relative);
    }

    let absolute = Path::new(name);
    if absolute.is_absolute() && absolute.is_dir() {
        return Some(absolute.to_path_buf());
    }

    None
}
