//! Containment checks for paths that come from configuration or content.
//!
//! Everything here is lexical: `..` and `.` components are folded without
//! touching the filesystem, so a path that does not exist yet (an output
//! file, say) can still be validated before it is created.

use crate::error::{BrambleError, Result};
use std::path::{Component, Path, PathBuf};

/// Folds `.` and `..` components. A `..` that would climb above the start
/// of a relative path is kept, so callers can still detect the escape.
pub fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(
                    normalized.components().next_back(),
                    Some(Component::Normal(_))
                );
                if can_pop {
                    normalized.pop();
                } else if !normalized.has_root() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Joins an untrusted relative path onto `base` and checks the result stays
/// inside `base`. Absolute candidates are re-rooted under `base`.
pub fn join_within(base: &Path, candidate: impl AsRef<Path>) -> Result<PathBuf> {
    let candidate = candidate.as_ref();
    let relative: PathBuf = candidate
        .components()
        .filter(|component| !matches!(component, Component::RootDir | Component::Prefix(_)))
        .collect();

    ensure_within(base, &base.join(relative))
}

/// Returns the normalized `path` if it is `base` or nested under it.
pub fn ensure_within(base: &Path, path: &Path) -> Result<PathBuf> {
    let normalized_base = normalize(base);
    let normalized = normalize(path);

    if normalized.starts_with(&normalized_base) {
        Ok(normalized)
    } else {
        Err(BrambleError::PathEscape {
            path: path.to_path_buf(),
            base: base.to_path_buf(),
        })
    }
}

pub fn is_within(base: &Path, path: &Path) -> bool {
    ensure_within(base, path).is_ok()
}

/// Rejects URL-ish output paths that could not be written portably.
pub fn is_safe_relative(relative: &str) -> bool {
    if relative.contains(':') || relative.starts_with('\\') {
        return false;
    }
    if relative.bytes().any(|byte| byte < 0x20) {
        return false;
    }
    !relative
        .split(['/', '\\'])
        .any(|segment| segment == "..")
}

/// Site-relative key for `path`: forward slashes, no leading `./`.
pub fn relative_key(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    Some(to_slash(relative))
}

pub fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folds_dots() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
        assert_eq!(normalize(Path::new("/../a")), PathBuf::from("/a"));
    }

    #[test]
    fn test_join_within_accepts_nested() {
        let joined = join_within(Path::new("/site/_site"), "blog/post/index.html").unwrap();
        assert_eq!(joined, PathBuf::from("/site/_site/blog/post/index.html"));
    }

    #[test]
    fn test_join_within_rejects_escape() {
        let result = join_within(Path::new("/site/_site"), "../../etc/passwd");
        assert!(matches!(result, Err(BrambleError::PathEscape { .. })));
    }

    #[test]
    fn test_join_within_reroots_absolute() {
        let joined = join_within(Path::new("/site/_site"), "/about/index.html").unwrap();
        assert_eq!(joined, PathBuf::from("/site/_site/about/index.html"));
    }

    #[test]
    fn test_ensure_within_rejects_sibling_with_shared_prefix() {
        assert!(!is_within(Path::new("/site/_site"), Path::new("/site/_site2/a")));
        assert!(is_within(Path::new("/site/_site"), Path::new("/site/_site")));
    }

    #[test]
    fn test_is_safe_relative() {
        assert!(is_safe_relative("blog/2024/post/"));
        assert!(!is_safe_relative("../up"));
        assert!(!is_safe_relative("c:/windows"));
        assert!(!is_safe_relative("bad\u{0001}name"));
    }

    #[test]
    fn test_relative_key_uses_forward_slashes() {
        let key = relative_key(Path::new("/site"), Path::new("/site/_posts/a.md")).unwrap();
        assert_eq!(key, "_posts/a.md");
        assert_eq!(relative_key(Path::new("/site"), Path::new("/other/a.md")), None);
    }
}
