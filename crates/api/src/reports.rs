use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::distr::{Alphanumeric, SampleString};
use serde::Serialize;
use serde_json::json;
use swarm_core::config::ReportsConfig;
use swarm_core::{now_millis, SwarmError, SwarmResult};
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::aggregator::{AggregateSnapshot, ResultAggregator};

const CSV_HEADER: &str = "Test Path,Category,Status,Duration (ms),Node ID,Start Time,End Time";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Html,
    Json,
    Xml,
    Csv,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Html => "html",
            ReportFormat::Json => "json",
            ReportFormat::Xml => "xml",
            ReportFormat::Csv => "csv",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ReportFormat::Html => "text/html",
            ReportFormat::Json => "application/json",
            ReportFormat::Xml => "application/xml",
            ReportFormat::Csv => "text/csv",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "html" => Ok(ReportFormat::Html),
            "json" => Ok(ReportFormat::Json),
            "xml" => Ok(ReportFormat::Xml),
            "csv" => Ok(ReportFormat::Csv),
            _ => Err(SwarmError::UnsupportedReportFormat(s.to_string())),
        }
    }
}

/// Index entry of a generated report
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportMeta {
    pub id: String,
    pub format: ReportFormat,
    /// Name of the artifact on disk
    pub filename: String,
    /// Name before compression
    pub original_name: String,
    pub mime_type: String,
    /// Artifact size in bytes
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub include_details: bool,
}

fn file_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

fn escape_markup(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn csv_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Quotes only when the value would otherwise break the row
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        csv_quote(value)
    } else {
        value.to_string()
    }
}

fn millis_to_iso(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

pub fn render_json(
    snapshot: &AggregateSnapshot,
    include_details: bool,
    generated_at: DateTime<Utc>,
) -> SwarmResult<String> {
    let mut document = json!({
        "metadata": {
            "generatedAt": generated_at,
            "version": env!("CARGO_PKG_VERSION"),
            "environment": std::env::var("SWARM_ENV").unwrap_or_else(|_| "development".to_string()),
            "includeDetails": include_details,
        },
        "metrics": snapshot.metrics,
        "coverage": snapshot.coverage,
        "nodes": snapshot.nodes,
    });
    if include_details {
        document["results"] = serde_json::to_value(&snapshot.results)?;
        document["failures"] = snapshot
            .failures
            .iter()
            .map(|(id, failure)| -> SwarmResult<serde_json::Value> {
                let mut value = serde_json::to_value(failure)?;
                value["id"] = json!(id);
                Ok(value)
            })
            .collect::<SwarmResult<Vec<_>>>()?
            .into();
    }
    Ok(serde_json::to_string_pretty(&document)?)
}

/// One row per executed unit; the details flag does not apply
pub fn render_csv(snapshot: &AggregateSnapshot) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for entry in &snapshot.results {
        for unit in &entry.report.results {
            let _ = writeln!(
                out,
                "{},{},{},{},{},{},{}",
                csv_quote(&unit.path),
                csv_field(&unit.category),
                unit.status,
                unit.duration,
                csv_field(&entry.report.node_id),
                millis_to_iso(unit.start_time),
                millis_to_iso(unit.end_time),
            );
        }
    }
    out
}

pub fn render_xml(snapshot: &AggregateSnapshot, generated_at: DateTime<Utc>) -> String {
    let summary = &snapshot.metrics.summary;
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<testReport>\n");
    let _ = writeln!(out, "  <metadata>");
    let _ = writeln!(
        out,
        "    <generatedAt>{}</generatedAt>",
        generated_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    );
    let _ = writeln!(out, "    <version>{}</version>", env!("CARGO_PKG_VERSION"));
    let _ = writeln!(out, "  </metadata>");
    let _ = writeln!(out, "  <summary>");
    let _ = writeln!(out, "    <totalTests>{}</totalTests>", summary.total_tests);
    let _ = writeln!(out, "    <passedTests>{}</passedTests>", summary.passed_tests);
    let _ = writeln!(out, "    <failedTests>{}</failedTests>", summary.failed_tests);
    let _ = writeln!(out, "    <errorTests>{}</errorTests>", summary.error_tests);
    let _ = writeln!(out, "    <successRate>{}</successRate>", summary.success_rate);
    let _ = writeln!(out, "    <totalDuration>{}</totalDuration>", summary.total_duration);
    let _ = writeln!(out, "  </summary>");
    out.push_str("</testReport>\n");
    out
}

pub fn render_html(
    snapshot: &AggregateSnapshot,
    include_details: bool,
    generated_at: DateTime<Utc>,
) -> String {
    let summary = &snapshot.metrics.summary;
    let coverage = &snapshot.metrics.coverage;
    let mut out = String::new();
    let _ = write!(
        out,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>Test Execution Report</title>
<style>
body {{ font-family: sans-serif; margin: 2rem; }}
.cards {{ display: flex; gap: 1rem; }}
.card {{ border: 1px solid #ddd; border-radius: 6px; padding: 1rem; min-width: 8rem; }}
.passed {{ color: #2e7d32; }} .failed {{ color: #c62828; }} .error {{ color: #ef6c00; }}
table {{ border-collapse: collapse; margin-top: 1rem; }}
td, th {{ border: 1px solid #ddd; padding: 0.25rem 0.5rem; }}
</style>
</head>
<body>
<h1>Test Execution Report</h1>
<p>Generated at {generated}</p>
<div class="cards">
<div class="card"><h3>Total</h3><p>{total}</p></div>
<div class="card passed"><h3>Passed</h3><p>{passed}</p></div>
<div class="card failed"><h3>Failed</h3><p>{failed}</p></div>
<div class="card error"><h3>Errors</h3><p>{errors}</p></div>
<div class="card"><h3>Success rate</h3><p>{rate}%</p></div>
<div class="card"><h3>Line coverage</h3><p>{lines}%</p></div>
</div>
"#,
        generated = generated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        total = summary.total_tests,
        passed = summary.passed_tests,
        failed = summary.failed_tests,
        errors = summary.error_tests,
        rate = summary.success_rate,
        lines = coverage.lines,
    );

    if include_details {
        out.push_str("<h2>Results</h2>\n<table>\n<tr><th>Test</th><th>Category</th><th>Status</th><th>Duration (ms)</th><th>Node</th></tr>\n");
        for entry in &snapshot.results {
            for unit in &entry.report.results {
                let _ = writeln!(
                    out,
                    "<tr class=\"{status}\"><td>{path}</td><td>{category}</td><td>{status}</td><td>{duration}</td><td>{node}</td></tr>",
                    status = unit.status,
                    path = escape_markup(&unit.path),
                    category = escape_markup(&unit.category),
                    duration = unit.duration,
                    node = escape_markup(&entry.report.node_id),
                );
            }
        }
        out.push_str("</table>\n");
    }
    out.push_str("</body>\n</html>\n");
    out
}

fn gzip(content: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content)?;
    encoder.finish()
}

/// Writes through a temp file in the target directory, then moves it into
/// place. An existing artifact is never replaced; the temp file is removed
/// on any failure.
fn write_atomically(directory: &Path, filename: &str, bytes: &[u8]) -> std::io::Result<u64> {
    std::fs::create_dir_all(directory)?;
    let mut temp = tempfile::Builder::new()
        .prefix(".report-")
        .suffix(".tmp")
        .tempfile_in(directory)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist_noclobber(directory.join(filename))
        .map_err(|e| e.error)?;
    Ok(bytes.len() as u64)
}

/// Renders aggregator snapshots into downloadable report artifacts
pub struct ReportGenerator {
    directory: PathBuf,
    compression: bool,
    aggregator: Arc<ResultAggregator>,
    index: RwLock<HashMap<String, ReportMeta>>,
}

impl ReportGenerator {
    pub fn new(config: &ReportsConfig, aggregator: Arc<ResultAggregator>) -> Self {
        Self {
            directory: config.directory.clone(),
            compression: config.compression,
            aggregator,
            index: RwLock::new(HashMap::new()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub async fn generate(&self, format: &str, include_details: bool) -> SwarmResult<ReportMeta> {
        let format: ReportFormat = format.parse()?;
        let generated_at = Utc::now();
        let snapshot = self.aggregator.snapshot().await;

        let content = match format {
            ReportFormat::Html => render_html(&snapshot, include_details, generated_at),
            ReportFormat::Json => render_json(&snapshot, include_details, generated_at)?,
            ReportFormat::Xml => render_xml(&snapshot, generated_at),
            ReportFormat::Csv => render_csv(&snapshot),
        };

        let suffix = Alphanumeric.sample_string(&mut rand::rng(), 9).to_lowercase();
        let id = format!("report-{}-{}", now_millis(), suffix);
        let original_name = format!(
            "test-report-{}-{}.{}",
            file_timestamp(generated_at),
            suffix,
            format.extension()
        );
        let (filename, mime_type, bytes) = if self.compression {
            let compressed = gzip(content.as_bytes())
                .map_err(|e| SwarmError::ReportGenerationFailure(e.to_string()))?;
            (format!("{original_name}.gz"), "application/gzip", compressed)
        } else {
            (original_name.clone(), format.mime_type(), content.into_bytes())
        };

        let directory = self.directory.clone();
        let target = filename.clone();
        let size = tokio::task::spawn_blocking(move || write_atomically(&directory, &target, &bytes))
            .await
            .map_err(|e| SwarmError::Internal(e.to_string()))?
            .map_err(|e| {
                error!(filename = %filename, "Failed to write report: {}", e);
                SwarmError::ReportGenerationFailure(e.to_string())
            })?;

        let meta = ReportMeta {
            id,
            format,
            filename,
            original_name,
            mime_type: mime_type.to_string(),
            size,
            created_at: generated_at,
            include_details,
        };
        self.index.write().await.insert(meta.id.clone(), meta.clone());
        info!(report_id = %meta.id, filename = %meta.filename, size, "Report generated");
        Ok(meta)
    }

    pub async fn get(&self, id: &str) -> Option<ReportMeta> {
        self.index.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<ReportMeta> {
        let mut reports: Vec<ReportMeta> = self.index.read().await.values().cloned().collect();
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        reports
    }

    /// Metadata and artifact bytes; `None` for an unknown id
    pub async fn read(&self, id: &str) -> SwarmResult<Option<(ReportMeta, Vec<u8>)>> {
        let Some(meta) = self.get(id).await else {
            return Ok(None);
        };
        match tokio::fs::read(self.directory.join(&meta.filename)).await {
            Ok(bytes) => Ok(Some((meta, bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::GzDecoder;
    use swarm_core::config::AggregationConfig;
    use swarm_core::{GroupReport, TestResult, TestStatus};
    use swarm_infrastructure::InMemoryStore;

    use super::*;

    async fn seeded_aggregator() -> Arc<ResultAggregator> {
        let aggregator = Arc::new(ResultAggregator::new(
            Arc::new(InMemoryStore::new()),
            AggregationConfig::default(),
        ));
        let unit = |path: &str, status| TestResult {
            path: path.to_string(),
            category: "unit".to_string(),
            status,
            duration: 120,
            output: None,
            error: None,
            coverage: None,
            start_time: 1_700_000_000_000,
            end_time: 1_700_000_000_120,
        };
        aggregator
            .process_result(GroupReport {
                task_id: "task-1-0".to_string(),
                node_id: "worker-1".to_string(),
                results: vec![
                    unit("src/a.test.js", TestStatus::Passed),
                    unit("src/\"odd\".test.js", TestStatus::Failed),
                ],
                total_duration: 240,
                start_time: 1_700_000_000_000,
                end_time: 1_700_000_000_240,
                reported_at: None,
                node_info: None,
            })
            .await;
        aggregator
    }

    fn generator(dir: &Path, compression: bool, aggregator: Arc<ResultAggregator>) -> ReportGenerator {
        ReportGenerator::new(
            &ReportsConfig {
                directory: dir.to_path_buf(),
                compression,
            },
            aggregator,
        )
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("HTML".parse::<ReportFormat>().unwrap(), ReportFormat::Html);
        assert!(matches!(
            "pdf".parse::<ReportFormat>(),
            Err(SwarmError::UnsupportedReportFormat(f)) if f == "pdf"
        ));
    }

    #[test]
    fn test_file_timestamp_is_filesystem_safe() {
        let at = DateTime::parse_from_rfc3339("2025-01-02T03:04:05.678Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(file_timestamp(at), "2025-01-02T03-04-05-678Z");
    }

    #[tokio::test]
    async fn test_csv_report_rows() {
        let dir = tempfile::tempdir().unwrap();
        let reports = generator(dir.path(), false, seeded_aggregator().await);

        let meta = reports.generate("csv", false).await.unwrap();
        assert_eq!(meta.mime_type, "text/csv");
        assert!(meta.filename.starts_with("test-report-") && meta.filename.ends_with(".csv"));

        let (_, bytes) = reports.read(&meta.id).await.unwrap().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("\"src/a.test.js\",unit,passed,120,worker-1,2023-11-14T"));
        assert!(lines[2].starts_with("\"src/\"\"odd\"\".test.js\",unit,failed"));
        assert_eq!(meta.size, text.len() as u64);
    }

    #[tokio::test]
    async fn test_csv_quotes_fields_that_need_it() {
        let aggregator = Arc::new(ResultAggregator::new(
            Arc::new(InMemoryStore::new()),
            AggregationConfig::default(),
        ));
        aggregator
            .process_result(GroupReport {
                task_id: "task-2-0".to_string(),
                node_id: "rack \"b\", slot 3".to_string(),
                results: vec![TestResult {
                    path: "src/c.test.js".to_string(),
                    category: "e2e,smoke".to_string(),
                    status: TestStatus::Passed,
                    duration: 5,
                    output: None,
                    error: None,
                    coverage: None,
                    start_time: 1_700_000_000_000,
                    end_time: 1_700_000_000_005,
                }],
                total_duration: 5,
                start_time: 1_700_000_000_000,
                end_time: 1_700_000_000_005,
                reported_at: None,
                node_info: None,
            })
            .await;

        let csv = render_csv(&aggregator.snapshot().await);
        let row = csv.lines().nth(1).unwrap();
        assert!(row.starts_with(
            "\"src/c.test.js\",\"e2e,smoke\",passed,5,\"rack \"\"b\"\", slot 3\","
        ));
    }

    #[tokio::test]
    async fn test_back_to_back_reports_keep_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let reports = generator(dir.path(), false, seeded_aggregator().await);

        let first = reports.generate("csv", false).await.unwrap();
        let second = reports.generate("csv", false).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_ne!(first.filename, second.filename);
        assert!(first.filename.ends_with(".csv"));

        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 2);
        for meta in [&first, &second] {
            let (_, bytes) = reports.read(&meta.id).await.unwrap().unwrap();
            assert_eq!(bytes.len() as u64, meta.size);
        }
    }

    #[test]
    fn test_existing_artifact_is_never_replaced() {
        let dir = tempfile::tempdir().unwrap();
        write_atomically(dir.path(), "report.csv", b"first").unwrap();

        assert!(write_atomically(dir.path(), "report.csv", b"second").is_err());
        assert_eq!(std::fs::read(dir.path().join("report.csv")).unwrap(), b"first");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_json_report_details_flag() {
        let dir = tempfile::tempdir().unwrap();
        let reports = generator(dir.path(), false, seeded_aggregator().await);

        let summary_only = reports.generate("json", false).await.unwrap();
        let (_, bytes) = reports.read(&summary_only.id).await.unwrap().unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc["metadata"]["includeDetails"], false);
        assert_eq!(doc["metrics"]["summary"]["totalTests"], 2);
        assert!(doc.get("results").is_none());

        let detailed = reports.generate("json", true).await.unwrap();
        let (_, bytes) = reports.read(&detailed.id).await.unwrap().unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc["results"].as_array().unwrap().len(), 1);
        assert_eq!(doc["failures"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_compressed_report_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let reports = generator(dir.path(), true, seeded_aggregator().await);

        let meta = reports.generate("html", true).await.unwrap();
        assert!(meta.filename.ends_with(".html.gz"));
        assert_eq!(meta.mime_type, "application/gzip");
        assert_eq!(format!("{}.gz", meta.original_name), meta.filename);

        let (_, bytes) = reports.read(&meta.id).await.unwrap().unwrap();
        let mut html = String::new();
        GzDecoder::new(bytes.as_slice()).read_to_string(&mut html).unwrap();
        assert!(html.contains("Test Execution Report"));
        assert!(html.contains("src/&quot;odd&quot;.test.js"));
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let reports = generator(dir.path(), false, seeded_aggregator().await);
        reports.generate("xml", false).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".xml"));
    }

    #[tokio::test]
    async fn test_unwritable_directory_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let reports = generator(&blocker.join("reports"), false, seeded_aggregator().await);

        let err = reports.generate("json", false).await.unwrap_err();
        assert!(matches!(err, SwarmError::ReportGenerationFailure(_)));
        assert!(reports.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_report_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let reports = generator(dir.path(), false, seeded_aggregator().await);
        assert!(reports.read("report-0-missing").await.unwrap().is_none());
        assert!(matches!(
            reports.generate("pdf", false).await,
            Err(SwarmError::UnsupportedReportFormat(_))
        ));
    }
}
