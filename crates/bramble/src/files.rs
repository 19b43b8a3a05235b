//! Directory walking and batched file I/O on a bounded worker pool.
//!
//! Nothing here knows about content. Per-file failures are recovered by
//! omission: a directory that cannot be opened walks as empty, an unreadable
//! file is missing from the returned map. Only [`FilePool::batch`] surfaces
//! item errors, and only when the caller does not choose to continue.

use crate::error::{BrambleError, Result};
use glob::{MatchOptions, Pattern};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::{DirEntry, WalkDir};

/// Directory names starting with this are special to the site layout.
pub const RESERVED_PREFIX: char = '_';

pub const DEFAULT_CONCURRENCY: usize = 16;

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Modification time and size, the change-detection key for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Nanoseconds since the Unix epoch.
    pub modified: u64,
    pub size: u64,
}

impl Fingerprint {
    pub fn of(path: &Path) -> io::Result<Self> {
        fs::metadata(path).map(|metadata| Self::from_metadata(&metadata))
    }

    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        let modified = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|duration| u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);

        Self {
            modified,
            size: metadata.len(),
        }
    }
}

/// Lists the files under `dir`, sorted by path.
///
/// `exclude` patterns are matched against the path relative to `dir` and
/// against each entry's own name. With `shallow_root`, any directory below
/// the root whose name starts with [`RESERVED_PREFIX`] is skipped; the root
/// itself is always walked, so `walk("site/_posts", .., true)` works.
pub fn walk(dir: &Path, exclude: &[Pattern], shallow_root: bool) -> Vec<PathBuf> {
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| keep_entry(entry, dir, exclude, shallow_root));

    let mut files = Vec::new();
    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(error) => {
                tracing::debug!("skipping unreadable entry under {}: {error}", dir.display());
            }
        }
    }
    files
}

fn keep_entry(entry: &DirEntry, root: &Path, exclude: &[Pattern], shallow_root: bool) -> bool {
    if entry.depth() == 0 {
        return true;
    }

    let name = entry.file_name().to_string_lossy();

    if shallow_root && entry.file_type().is_dir() && name.starts_with(RESERVED_PREFIX) {
        return false;
    }

    if exclude.is_empty() {
        return true;
    }

    let relative = entry
        .path()
        .strip_prefix(root)
        .map(crate::path_guard::to_slash)
        .unwrap_or_default();

    !matches_any(exclude, &relative) && !matches_any(exclude, &name)
}

pub fn matches_any(patterns: &[Pattern], candidate: &str) -> bool {
    patterns
        .iter()
        .any(|pattern| pattern.matches_with(candidate, GLOB_OPTIONS))
}

/// Compiles glob patterns, naming the offending one on failure.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern.trim_end_matches('/')).map_err(|error| {
                BrambleError::config(format!("invalid glob pattern '{pattern}': {error}"))
            })
        })
        .collect()
}

/// Error policy and progress reporting for [`FilePool::batch`].
pub struct BatchOptions<'a, E> {
    pub batch_size: usize,
    /// Called with the item index and its error. Returning `true` records the
    /// failure and continues with that result slot empty; `false` aborts.
    /// Without a callback the first failure aborts the batch.
    pub on_error: Option<&'a mut dyn FnMut(usize, &E) -> bool>,
    /// Called after each chunk with `(completed, total)`.
    pub on_progress: Option<&'a mut dyn FnMut(usize, usize)>,
}

impl<E> Default for BatchOptions<'_, E> {
    fn default() -> Self {
        Self {
            batch_size: 64,
            on_error: None,
            on_progress: None,
        }
    }
}

/// A fixed-size worker pool for file I/O.
///
/// Every operation runs inside the pool, so at most `concurrency` units of
/// work are in flight at once; further items wait for a free worker.
pub struct FilePool {
    pool: rayon::ThreadPool,
    concurrency: usize,
}

impl FilePool {
    pub fn new(concurrency: usize) -> Result<Self> {
        let concurrency = concurrency.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|index| format!("bramble-io-{index}"))
            .build()
            .map_err(|error| BrambleError::config(format!("cannot start I/O pool: {error}")))?;

        Ok(Self { pool, concurrency })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Reads every path as UTF-8 text. Unreadable files are left out.
    pub fn read_many(&self, paths: &[PathBuf]) -> HashMap<PathBuf, String> {
        self.pool.install(|| {
            paths
                .par_iter()
                .filter_map(|path| match fs::read_to_string(path) {
                    Ok(content) => Some((path.clone(), content)),
                    Err(error) => {
                        tracing::warn!("skipping unreadable file {}: {error}", path.display());
                        None
                    }
                })
                .collect()
        })
    }

    /// Stats every path. Paths that cannot be stat'ed are left out.
    pub fn stat_many(&self, paths: &[PathBuf]) -> HashMap<PathBuf, Fingerprint> {
        self.pool.install(|| {
            paths
                .par_iter()
                .filter_map(|path| match Fingerprint::of(path) {
                    Ok(fingerprint) => Some((path.clone(), fingerprint)),
                    Err(error) => {
                        tracing::warn!("cannot stat {}: {error}", path.display());
                        None
                    }
                })
                .collect()
        })
    }

    /// Applies `f` to every item; results come back in input order.
    pub fn map_concurrent<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        self.pool.install(|| items.par_iter().map(f).collect())
    }

    /// Runs `f` over `items` chunk by chunk. Results are in input order;
    /// a slot is `None` when its item failed and `on_error` chose to continue.
    pub fn batch<T, R, E, F>(
        &self,
        items: &[T],
        f: F,
        mut options: BatchOptions<'_, E>,
    ) -> std::result::Result<Vec<Option<R>>, E>
    where
        T: Sync,
        R: Send,
        E: Send,
        F: Fn(&T) -> std::result::Result<R, E> + Sync + Send,
    {
        let batch_size = options.batch_size.max(1);
        let total = items.len();
        let mut results = Vec::with_capacity(total);

        for (chunk_index, chunk) in items.chunks(batch_size).enumerate() {
            let outcomes: Vec<std::result::Result<R, E>> =
                self.pool.install(|| chunk.par_iter().map(&f).collect());

            for (offset, outcome) in outcomes.into_iter().enumerate() {
                match outcome {
                    Ok(value) => results.push(Some(value)),
                    Err(error) => {
                        let index = chunk_index * batch_size + offset;
                        let keep_going = match options.on_error.as_mut() {
                            Some(on_error) => on_error(index, &error),
                            None => false,
                        };
                        if !keep_going {
                            return Err(error);
                        }
                        results.push(None);
                    }
                }
            }

            if let Some(on_progress) = options.on_progress.as_mut() {
                on_progress(results.len(), total);
            }
        }

        Ok(results)
    }
}

/// True if the file's first line opens a front-matter block.
pub fn starts_with_front_matter(path: &Path) -> bool {
    let Ok(file) = fs::File::open(path) else {
        return false;
    };
    let mut first_line = Vec::new();
    let mut reader = BufReader::new(file.take(64));
    if reader.read_until(b'\n', &mut first_line).is_err() {
        return false;
    }
    let line = String::from_utf8_lossy(&first_line);
    let line = line.trim_start_matches('\u{feff}').trim_end();
    line == "---" || line == "+++"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn file_names(files: &[PathBuf], root: &Path) -> Vec<String> {
        files
            .iter()
            .map(|path| crate::path_guard::to_slash(path.strip_prefix(root).unwrap()))
            .collect()
    }

    #[test]
    fn test_walk_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(walk(&dir.path().join("nope"), &[], false).is_empty());
    }

    #[test]
    fn test_walk_shallow_skips_nested_reserved_dirs() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("_drafts")).unwrap();
        fs::create_dir_all(dir.path().join("blog/_hidden")).unwrap();
        fs::write(dir.path().join("index.md"), "x").unwrap();
        fs::write(dir.path().join("_drafts/a.md"), "x").unwrap();
        fs::write(dir.path().join("blog/post.md"), "x").unwrap();
        fs::write(dir.path().join("blog/_hidden/secret.md"), "x").unwrap();

        let files = walk(dir.path(), &[], true);
        assert_eq!(file_names(&files, dir.path()), vec!["blog/post.md", "index.md"]);
    }

    #[test]
    fn test_walk_shallow_root_may_itself_be_reserved() {
        let dir = TempDir::new().unwrap();
        let drafts = dir.path().join("_drafts");
        fs::create_dir_all(drafts.join("_nested")).unwrap();
        fs::write(drafts.join("a.md"), "x").unwrap();
        fs::write(drafts.join("_nested/b.md"), "x").unwrap();

        let files = walk(&drafts, &[], true);
        assert_eq!(file_names(&files, &drafts), vec!["a.md"]);
    }

    #[test]
    fn test_walk_non_shallow_includes_reserved_dirs() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("_data")).unwrap();
        fs::write(dir.path().join("_data/nav.toml"), "x").unwrap();

        let files = walk(dir.path(), &[], false);
        assert_eq!(file_names(&files, dir.path()), vec!["_data/nav.toml"]);
    }

    #[test]
    fn test_walk_exclude_by_name_and_relative_path() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("vendor/lib")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join("vendor/lib/a.js"), "x").unwrap();
        fs::write(dir.path().join(".git/HEAD"), "x").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::write(dir.path().join("keep.md"), "x").unwrap();

        let exclude = compile_patterns(&[".*".into(), "vendor/".into(), "*.txt".into()]).unwrap();
        let files = walk(dir.path(), &exclude, false);
        assert_eq!(file_names(&files, dir.path()), vec!["keep.md"]);
    }

    #[test]
    fn test_compile_patterns_rejects_invalid_glob() {
        assert!(compile_patterns(&["[".into()]).is_err());
    }

    #[test]
    fn test_read_many_drops_unreadable_files() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.md");
        fs::write(&good, "hello").unwrap();
        let missing = dir.path().join("missing.md");

        let pool = FilePool::new(2).unwrap();
        let contents = pool.read_many(&[good.clone(), missing.clone()]);

        assert_eq!(contents.len(), 1);
        assert_eq!(contents[&good], "hello");
        assert!(!contents.contains_key(&missing));
    }

    #[test]
    fn test_stat_many_reports_sizes() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "12345").unwrap();

        let pool = FilePool::new(2).unwrap();
        let stats = pool.stat_many(&[file.clone(), dir.path().join("gone")]);

        assert_eq!(stats.len(), 1);
        assert_eq!(stats[&file].size, 5);
    }

    #[test]
    fn test_map_concurrent_preserves_input_order() {
        let pool = FilePool::new(4).unwrap();
        let items: Vec<u64> = (0..100).collect();
        let results = pool.map_concurrent(&items, |item| {
            std::thread::sleep(std::time::Duration::from_micros((100 - item) * 10));
            item * 2
        });
        assert_eq!(results, items.iter().map(|item| item * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_map_concurrent_never_exceeds_pool_size() {
        let pool = FilePool::new(3).unwrap();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let items: Vec<usize> = (0..40).collect();

        pool.map_concurrent(&items, |_| {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(2));
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_batch_aborts_without_error_handler() {
        let pool = FilePool::new(2).unwrap();
        let items = vec![1, 2, 3, 4];
        let result = pool.batch(
            &items,
            |item| if *item == 3 { Err(format!("bad {item}")) } else { Ok(*item) },
            BatchOptions::default(),
        );
        assert_eq!(result, Err("bad 3".to_string()));
    }

    #[test]
    fn test_batch_continues_when_handler_allows() {
        let pool = FilePool::new(2).unwrap();
        let items = vec![1, 2, 3, 4, 5];
        let mut failures = Vec::new();
        let mut progress = Vec::new();
        let mut on_error = |index: usize, error: &String| {
            failures.push((index, error.clone()));
            true
        };
        let mut on_progress = |done: usize, total: usize| progress.push((done, total));

        let results = pool
            .batch(
                &items,
                |item| if item % 2 == 0 { Err(format!("even {item}")) } else { Ok(item * 10) },
                BatchOptions {
                    batch_size: 2,
                    on_error: Some(&mut on_error),
                    on_progress: Some(&mut on_progress),
                },
            )
            .unwrap();

        assert_eq!(results, vec![Some(10), None, Some(30), None, Some(50)]);
        assert_eq!(failures, vec![(1, "even 2".to_string()), (3, "even 4".to_string())]);
        assert_eq!(progress, vec![(2, 5), (4, 5), (5, 5)]);
    }

    #[test]
    fn test_starts_with_front_matter() {
        let dir = TempDir::new().unwrap();
        let yaml = dir.path().join("a.md");
        let toml = dir.path().join("b.md");
        let plain = dir.path().join("c.css");
        fs::write(&yaml, "---\ntitle: A\n---\nbody").unwrap();
        fs::write(&toml, "+++\ntitle = \"B\"\n+++\nbody").unwrap();
        fs::write(&plain, "body { color: red }").unwrap();

        assert!(starts_with_front_matter(&yaml));
        assert!(starts_with_front_matter(&toml));
        assert!(!starts_with_front_matter(&plain));
        assert!(!starts_with_front_matter(&dir.path().join("missing")));
    }
}
