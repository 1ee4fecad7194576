//! Page snapshots and line-based drift diffing.
//!
//! A snapshot is the text of the target page's inline (`src`-less)
//! script block, kept as ordered lines. Snapshots are compared with a
//! unified diff and the last confirmed-good one is persisted to a single
//! baseline file so drift detection survives restarts.

use std::fs;
use std::path::{Path, PathBuf};

use scraper::{Html, Selector};
use similar::TextDiff;

use crate::error::ReportError;

/// Ordered lines of the target page's inline script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSnapshot {
    lines: Vec<String>,
}

impl PageSnapshot {
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    /// Trimmed, split into lines.
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.trim().lines().map(str::to_string).collect(),
        }
    }

    /// Extract the first inline script block from an HTML document.
    pub fn from_html(html: &str) -> Result<Self, ReportError> {
        let document = Html::parse_document(html);
        let selector = Selector::parse("script:not([src])")
            .map_err(|e| ReportError::Parse(format!("Invalid selector: {e:?}")))?;
        let script = document
            .select(&selector)
            .next()
            .ok_or_else(|| ReportError::Parse("Page has no inline script block".into()))?;
        let text: String = script.text().collect();
        Ok(Self::from_text(&text))
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn to_text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Unified diff between two snapshots, as ordered textual diff lines.
/// Empty when the snapshots are identical.
pub fn unified_diff(previous: &PageSnapshot, current: &PageSnapshot) -> Vec<String> {
    if previous == current {
        return Vec::new();
    }
    let old = previous.to_text();
    let new = current.to_text();
    let diff = TextDiff::from_lines(&old, &new);
    diff.unified_diff()
        .header("previous", "current")
        .to_string()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Durable storage for the last-known-good snapshot.
pub trait BaselineStore: Send + Sync {
    /// `None` on the first ever run, before any baseline was seeded.
    fn load(&self) -> Result<Option<PageSnapshot>, ReportError>;

    fn store(&self, snapshot: &PageSnapshot) -> Result<(), ReportError>;
}

/// Baseline persisted as a single text file.
pub struct FileBaseline {
    path: PathBuf,
}

impl FileBaseline {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BaselineStore for FileBaseline {
    fn load(&self) -> Result<Option<PageSnapshot>, ReportError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)?;
        Ok(Some(PageSnapshot::from_text(&text)))
    }

    fn store(&self, snapshot: &PageSnapshot) -> Result<(), ReportError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, snapshot.to_text())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_text_trims_and_splits() {
        let snapshot = PageSnapshot::from_text("\n  var a = 1;\nvar b = 2;  \n");
        assert_eq!(snapshot.lines(), ["var a = 1;", "var b = 2;"]);
    }

    #[test]
    fn from_html_extracts_first_inline_script() {
        let html = r#"
            <html><head>
            <script src="/vendor.js"></script>
            <script>
                var token = 'abc';
                login();
            </script>
            </head><body></body></html>
        "#;
        let snapshot = PageSnapshot::from_html(html).unwrap();
        assert_eq!(snapshot.lines().len(), 2);
        assert_eq!(snapshot.lines()[0].trim(), "var token = 'abc';");
    }

    #[test]
    fn from_html_without_inline_script_is_a_parse_error() {
        let html = r#"<html><head><script src="/x.js"></script></head></html>"#;
        let err = PageSnapshot::from_html(html).unwrap_err();
        assert!(matches!(err, ReportError::Parse(_)));
    }

    #[test]
    fn identical_snapshots_produce_empty_diff() {
        let a = PageSnapshot::new(vec!["a".into(), "b".into()]);
        let b = PageSnapshot::new(vec!["a".into(), "b".into()]);
        assert!(unified_diff(&a, &b).is_empty());
    }

    #[test]
    fn changed_line_shows_removal_and_addition() {
        let previous = PageSnapshot::new(vec!["a".into(), "b".into()]);
        let current = PageSnapshot::new(vec!["a".into(), "c".into()]);

        let diff = unified_diff(&previous, &current);
        assert!(!diff.is_empty());
        assert!(diff.iter().any(|l| l.starts_with("---") && l.contains("previous")));
        assert!(diff.iter().any(|l| l.starts_with("+++") && l.contains("current")));
        assert!(diff.iter().any(|l| l == "-b"));
        assert!(diff.iter().any(|l| l == "+c"));
    }

    #[test]
    fn empty_previous_reports_pure_additions() {
        let previous = PageSnapshot::default();
        let current = PageSnapshot::new(vec!["x".into()]);

        let diff = unified_diff(&previous, &current);
        assert!(diff.iter().any(|l| l == "+x"));
    }

    #[test]
    fn file_baseline_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let baseline = FileBaseline::new(dir.path().join("previous.txt"));

        assert!(baseline.load().unwrap().is_none());

        let snapshot = PageSnapshot::new(vec!["line1".into(), "line2".into()]);
        baseline.store(&snapshot).unwrap();

        let loaded = baseline.load().unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn file_baseline_creates_missing_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let baseline = FileBaseline::new(dir.path().join("nested/config/previous.txt"));

        baseline.store(&PageSnapshot::from_text("x")).unwrap();
        assert!(baseline.path().exists());
    }
}
