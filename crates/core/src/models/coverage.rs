use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-file coverage keyed by source path
pub type Coverage = BTreeMap<String, FileCoverage>;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoverageCounter {
    #[serde(default)]
    pub covered: u64,
    #[serde(default)]
    pub total: u64,
}

impl CoverageCounter {
    pub fn new(covered: u64, total: u64) -> Self {
        Self { covered, total }
    }

    /// Keeps the maximum of each side. Never decreases either value.
    pub fn merge_max(&mut self, other: &CoverageCounter) {
        self.covered = self.covered.max(other.covered);
        self.total = self.total.max(other.total);
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileCoverage {
    #[serde(default)]
    pub lines: CoverageCounter,
    #[serde(default)]
    pub functions: CoverageCounter,
    #[serde(default)]
    pub branches: CoverageCounter,
    #[serde(default)]
    pub statements: CoverageCounter,
}

impl FileCoverage {
    pub fn merge_max(&mut self, other: &FileCoverage) {
        self.lines.merge_max(&other.lines);
        self.functions.merge_max(&other.functions);
        self.branches.merge_max(&other.branches);
        self.statements.merge_max(&other.statements);
    }
}

/// Merges `incoming` into `target` file by file
pub fn merge_coverage(target: &mut Coverage, incoming: &Coverage) {
    for (file, coverage) in incoming {
        target.entry(file.clone()).or_default().merge_max(coverage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(lines: (u64, u64)) -> FileCoverage {
        FileCoverage {
            lines: CoverageCounter::new(lines.0, lines.1),
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_never_decreases() {
        let mut merged = Coverage::new();
        merge_coverage(&mut merged, &Coverage::from([("src/a.js".to_string(), file((80, 100)))]));
        merge_coverage(&mut merged, &Coverage::from([("src/a.js".to_string(), file((40, 90)))]));

        assert_eq!(merged["src/a.js"].lines, CoverageCounter::new(80, 100));

        merge_coverage(&mut merged, &Coverage::from([("src/a.js".to_string(), file((95, 120)))]));
        assert_eq!(merged["src/a.js"].lines, CoverageCounter::new(95, 120));
    }

    #[test]
    fn test_partial_metrics_deserialize() {
        let coverage: Coverage =
            serde_json::from_str(r#"{"src/b.js":{"lines":{"covered":3,"total":4}}}"#).unwrap();
        assert_eq!(coverage["src/b.js"].lines.covered, 3);
        assert_eq!(coverage["src/b.js"].branches, CoverageCounter::default());
    }
}
