use crate::error::{IoContext, Result};
use crate::files::{matches_any, walk};
use crate::path_guard::{join_within, relative_key};
use crate::site::StaticFile;
use glob::Pattern;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Writes `content` to `relative` under `destination`, creating parents.
/// Returns the absolute path written.
pub fn write_output(destination: &Path, relative: &Path, content: &str) -> Result<PathBuf> {
    let target = join_within(destination, relative)?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).io_context("creating directory", parent)?;
    }
    fs::write(&target, content).io_context("writing", &target)?;
    Ok(target)
}

pub fn copy_static(destination: &Path, file: &StaticFile) -> Result<PathBuf> {
    let target = join_within(destination, &file.output_path)?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).io_context("creating directory", parent)?;
    }
    fs::copy(&file.source, &target).io_context("copying", &file.source)?;
    Ok(target)
}

/// Deletes every file under `destination` that is not in `produced` and not
/// matched by `keep`, then any directories left empty. Returns the removed
/// files.
pub fn remove_stale(
    destination: &Path,
    produced: &HashSet<PathBuf>,
    keep: &[Pattern],
) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();

    for path in walk(destination, &[], false) {
        if produced.contains(&path) {
            continue;
        }
        let relative = relative_key(destination, &path).unwrap_or_default();
        if matches_any(keep, &relative) || keep_parent(keep, &relative) {
            continue;
        }
        fs::remove_file(&path).io_context("removing stale file", &path)?;
        removed.push(path);
    }

    let mut parents: Vec<&Path> = removed.iter().filter_map(|path| path.parent()).collect();
    parents.sort_by_key(|parent| std::cmp::Reverse(parent.components().count()));
    parents.dedup();
    for parent in parents {
        let mut current = Some(parent);
        while let Some(dir) = current {
            if dir == destination || fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }

    Ok(removed)
}

/// `keep_files = ["downloads"]` keeps everything below `downloads/`.
fn keep_parent(keep: &[Pattern], relative: &str) -> bool {
    let mut prefix = String::new();
    for segment in relative.split('/') {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(segment);
        if prefix.len() < relative.len() && matches_any(keep, &prefix) {
            return true;
        }
    }
    false
}

pub fn clean_output_dir(output_dir: &Path) -> Result<()> {
    if output_dir.exists() {
        fs::remove_dir_all(output_dir).io_context("removing", output_dir)?;
    }
    Ok(())
}
