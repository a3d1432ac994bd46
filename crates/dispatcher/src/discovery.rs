use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use swarm_core::{SwarmError, SwarmResult, TestUnit};
use tracing::{debug, info, warn};

static TEST_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.(test|spec)\.(js|ts)$").expect("valid test file regex"));
static TEST_CASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:test|it)\s*\(").expect("valid test case regex"));
static DESCRIBE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"describe\s*\(").expect("valid describe regex"));
static MODULE_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:import|require)\s*\(?['"`]([^'"`]+)['"`]\)?"#).expect("valid import regex")
});

/// Estimate used when a test file cannot be read
pub const DEFAULT_ESTIMATE_MS: u64 = 5000;
const BASE_CASE_MS: u64 = 1000;

/// Heuristic cost of a test file from its source text, in milliseconds
pub fn estimate_duration(content: &str) -> u64 {
    let cases = TEST_CASE.find_iter(content).count() + DESCRIBE_BLOCK.find_iter(content).count();

    let mut base = BASE_CASE_MS;
    if content.contains("playwright") {
        base *= 3;
    }
    if content.contains("performance") || content.contains("benchmark") {
        base *= 2;
    }
    cases as u64 * base
}

/// Module specifiers named by `import '..'`, `import('..')` and `require('..')`
pub fn extract_dependencies(content: &str) -> Vec<String> {
    MODULE_IMPORT
        .captures_iter(content)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

pub fn is_test_file(name: &str) -> bool {
    TEST_FILE.is_match(name)
}

/// Finds test files under `{root}/{category}` for each configured category
#[derive(Debug, Clone)]
pub struct TestDiscovery {
    root: PathBuf,
    categories: Vec<String>,
}

impl TestDiscovery {
    pub fn new(root: impl Into<PathBuf>, categories: Vec<String>) -> Self {
        Self {
            root: root.into(),
            categories,
        }
    }

    /// Scans every category directory. Missing directories are skipped;
    /// unreadable files get the default estimate and no dependencies.
    pub async fn discover(&self) -> SwarmResult<Vec<TestUnit>> {
        let root = self.root.clone();
        let categories = self.categories.clone();

        let units = tokio::task::spawn_blocking(move || {
            let mut units = Vec::new();
            for category in &categories {
                let dir = root.join(category);
                let mut files = Vec::new();
                if let Err(e) = scan_directory(&dir, &mut files) {
                    warn!("Failed to scan directory {}: {}", dir.display(), e);
                    continue;
                }
                files.sort();
                for file in files {
                    units.push(analyze_file(&file, category));
                }
            }
            units
        })
        .await
        .map_err(|e| SwarmError::Internal(format!("test discovery task failed: {e}")))?;

        info!(root = %self.root.display(), "Discovered {} test files", units.len());
        Ok(units)
    }
}

fn scan_directory(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Test directory {} does not exist", dir.display());
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            scan_directory(&path, files)?;
        } else if is_test_file(&entry.file_name().to_string_lossy()) {
            files.push(path);
        }
    }
    Ok(())
}

fn analyze_file(path: &Path, category: &str) -> TestUnit {
    let unit = TestUnit::new(path.to_string_lossy(), category);
    match std::fs::read_to_string(path) {
        Ok(content) => unit
            .with_estimate(estimate_duration(&content))
            .with_dependencies(extract_dependencies(&content)),
        Err(e) => {
            warn!("Failed to analyze {}: {}", path.display(), e);
            unit.with_estimate(DEFAULT_ESTIMATE_MS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_counts_cases_and_describes() {
        let content = r#"
            describe('login', () => {
                it('accepts valid users', () => {});
                test ('rejects bad passwords', () => {});
            });
        "#;
        assert_eq!(estimate_duration(content), 3000);
    }

    #[test]
    fn test_estimate_multipliers() {
        let browser = "const { test } = require('@playwright/test');\ntest('x', () => {});";
        // require( does not count; the playwright factor triples the base
        assert_eq!(estimate_duration(browser), 3000);

        let perf = "describe('performance', () => { it('is fast', () => {}); });";
        assert_eq!(estimate_duration(perf), 4000);
    }

    #[test]
    fn test_dependency_extraction() {
        let content = r#"
            const api = require('../helpers/api');
            import './setup.js';
            const lazy = await import("lodash");
            import something from 'ignored-form';
        "#;
        assert_eq!(
            extract_dependencies(content),
            vec!["../helpers/api", "./setup.js", "lodash"]
        );
    }

    #[test]
    fn test_test_file_pattern() {
        assert!(is_test_file("login.test.js"));
        assert!(is_test_file("api.spec.ts"));
        assert!(!is_test_file("helpers.js"));
        assert!(!is_test_file("login.test.jsx"));
    }
}
