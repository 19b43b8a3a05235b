use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// A source file left out of the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// A document that was read but could not be rendered or written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDocument {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub documents: usize,
    pub rendered: usize,
    /// Documents reused from the previous build.
    pub unchanged: usize,
    pub written: usize,
    pub static_copied: usize,
    pub static_unchanged: usize,
    pub removed: usize,
    pub skipped: Vec<SkippedFile>,
    pub failed: Vec<FailedDocument>,
}

impl BuildSummary {
    pub fn has_problems(&self) -> bool {
        !self.skipped.is_empty() || !self.failed.is_empty()
    }
}

impl fmt::Display for BuildSummary {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{} documents ({} rendered, {} unchanged), \
             {} static files copied, {} stale files removed",
            self.documents, self.rendered, self.unchanged, self.static_copied, self.removed
        )?;
        for skipped in &self.skipped {
            write!(formatter, "\n  skipped {}: {}", skipped.path.display(), skipped.reason)?;
        }
        for failed in &self.failed {
            write!(formatter, "\n  failed {}: {}", failed.path.display(), failed.error)?;
        }
        Ok(())
    }
}

/// One timed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    pub operation: String,
    pub duration: Duration,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timings {
    pub entries: Vec<Timing>,
    pub total: Duration,
}

impl Timings {
    pub fn record(
        &mut self,
        operation: impl Into<String>,
        duration: Duration,
        detail: impl Into<String>,
    ) {
        self.entries.push(Timing {
            operation: operation.into(),
            duration,
            detail: detail.into(),
        });
    }

    /// Slowest first.
    pub fn sorted_by_duration(&self) -> Vec<&Timing> {
        let mut sorted: Vec<&Timing> = self.entries.iter().collect();
        sorted.sort_by(|a, b| b.duration.cmp(&a.duration));
        sorted
    }

    pub fn get(&self, operation: &str) -> Option<&Timing> {
        self.entries.iter().find(|timing| timing.operation == operation)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildResult {
    pub timings: Timings,
    pub summary: BuildSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_by_duration() {
        let mut timings = Timings::default();
        timings.record("read", Duration::from_millis(5), "10 files");
        timings.record("render", Duration::from_millis(50), "10 documents");
        timings.record("write", Duration::from_millis(20), "");

        let order: Vec<&str> = timings
            .sorted_by_duration()
            .iter()
            .map(|timing| timing.operation.as_str())
            .collect();
        assert_eq!(order, vec!["render", "write", "read"]);
        assert_eq!(timings.get("read").unwrap().detail, "10 files");
    }

    #[test]
    fn test_summary_display_lists_problems() {
        let summary = BuildSummary {
            documents: 2,
            rendered: 1,
            failed: vec![FailedDocument {
                path: PathBuf::from("bad.md"),
                error: "boom".into(),
            }],
            ..BuildSummary::default()
        };
        let text = summary.to_string();
        assert!(text.starts_with("2 documents (1 rendered, 0 unchanged)"));
        assert!(text.contains("failed bad.md: boom"));
        assert!(summary.has_problems());
    }
}
