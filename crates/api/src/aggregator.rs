use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use swarm_core::config::{AggregationConfig, AggregationMode};
use swarm_core::{
    decode_json, merge_coverage, now_millis, CoordinationStore, Coverage, CoverageCounter,
    FailureReport, FileCoverage, GroupReport, SwarmResult, TestStatus,
};
use swarm_infrastructure::keys::{FAILURES_KEY, RESULTS_KEY};
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const DEFAULT_PAGE_LIMIT: usize = 50;
const PERFORMANCE_WINDOW: usize = 100;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percent(covered: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        round2(covered as f64 / total as f64 * 100.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub total_tests: u64,
    pub passed_tests: u64,
    pub failed_tests: u64,
    pub error_tests: u64,
    pub success_rate: f64,
    pub total_duration: u64,
    pub average_test_time: f64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct NodeCounters {
    pub tests: u64,
    pub duration: u64,
    pub passed: u64,
    pub failed: u64,
    pub errors: u64,
}

/// Percentages per coverage metric, two decimals
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CoverageSummary {
    pub lines: f64,
    pub functions: f64,
    pub branches: f64,
    pub statements: f64,
}

impl CoverageSummary {
    pub fn from_coverage(coverage: &Coverage) -> Self {
        let mut totals = FileCoverage::default();
        let add = |acc: &mut CoverageCounter, c: &CoverageCounter| {
            acc.covered += c.covered;
            acc.total += c.total;
        };
        for file in coverage.values() {
            add(&mut totals.lines, &file.lines);
            add(&mut totals.functions, &file.functions);
            add(&mut totals.branches, &file.branches);
            add(&mut totals.statements, &file.statements);
        }
        Self {
            lines: percent(totals.lines.covered, totals.lines.total),
            functions: percent(totals.functions.covered, totals.functions.total),
            branches: percent(totals.branches.covered, totals.branches.total),
            statements: percent(totals.statements.covered, totals.statements.total),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CurrentMetrics {
    pub summary: MetricsSummary,
    pub nodes: BTreeMap<String, NodeCounters>,
    pub coverage: CoverageSummary,
    /// Milliseconds since the aggregator started
    pub uptime: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PerformanceSample {
    pub timestamp: i64,
    #[serde(flatten)]
    pub metrics: CurrentMetrics,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trends {
    pub test_rate: i64,
    pub success_rate_change: f64,
    pub average_time_change: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceStatistics {
    pub current: CurrentMetrics,
    pub history: Vec<PerformanceSample>,
    pub trends: Option<Trends>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub pages: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResultEntry {
    pub id: String,
    #[serde(flatten)]
    pub report: GroupReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilteredResults {
    pub results: Vec<ResultEntry>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveNode {
    pub node_id: String,
    #[serde(flatten)]
    pub counters: NodeCounters,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileCoverageEntry {
    pub file: String,
    pub coverage: FileCoverage,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageReport {
    pub overall: CoverageSummary,
    pub files: Vec<FileCoverageEntry>,
    pub generated_at: DateTime<Utc>,
}

/// Everything a report needs, taken under one lock
#[derive(Debug, Clone)]
pub struct AggregateSnapshot {
    pub metrics: CurrentMetrics,
    pub coverage: CoverageReport,
    pub nodes: Vec<ActiveNode>,
    pub results: Vec<ResultEntry>,
    pub failures: Vec<(String, FailureReport)>,
}

#[derive(Default)]
struct AggregateState {
    results: Vec<ResultEntry>,
    index: HashMap<String, usize>,
    failures: Vec<(String, FailureReport)>,
    failure_ids: HashMap<String, usize>,
    summary: MetricsSummary,
    nodes: BTreeMap<String, NodeCounters>,
    coverage: Coverage,
    history: VecDeque<PerformanceSample>,
}

fn unique_id(base: String, taken: &HashMap<String, usize>) -> String {
    if !taken.contains_key(&base) {
        return base;
    }
    let mut n = 1;
    loop {
        let candidate = format!("{base}-{n}");
        if !taken.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

impl AggregateState {
    fn current_metrics(&self, uptime_ms: u64) -> CurrentMetrics {
        let mut summary = self.summary.clone();
        if summary.total_tests > 0 {
            let total = summary.total_tests as f64;
            summary.success_rate = round2(summary.passed_tests as f64 / total * 100.0);
            summary.average_test_time = round2(summary.total_duration as f64 / total);
        }
        CurrentMetrics {
            summary,
            nodes: self.nodes.clone(),
            coverage: CoverageSummary::from_coverage(&self.coverage),
            uptime: uptime_ms,
        }
    }

    fn active_nodes(&self) -> Vec<ActiveNode> {
        self.nodes
            .iter()
            .map(|(node_id, counters)| ActiveNode {
                node_id: node_id.clone(),
                counters: counters.clone(),
                status: "active".to_string(),
            })
            .collect()
    }

    fn coverage_report(&self) -> CoverageReport {
        CoverageReport {
            overall: CoverageSummary::from_coverage(&self.coverage),
            files: self
                .coverage
                .iter()
                .map(|(file, coverage)| FileCoverageEntry {
                    file: file.clone(),
                    coverage: *coverage,
                })
                .collect(),
            generated_at: Utc::now(),
        }
    }
}

/// Consumes the results and failures channels and keeps running totals,
/// merged coverage and a sampled performance history.
///
/// One aggregator per channel pair: a second consumer would split the
/// stream between them.
pub struct ResultAggregator {
    store: Arc<dyn CoordinationStore>,
    config: AggregationConfig,
    state: RwLock<AggregateState>,
    processing: AtomicBool,
    started: Instant,
}

impl ResultAggregator {
    pub fn new(store: Arc<dyn CoordinationStore>, config: AggregationConfig) -> Self {
        Self {
            store,
            config,
            state: RwLock::new(AggregateState::default()),
            processing: AtomicBool::new(false),
            started: Instant::now(),
        }
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Relaxed)
    }

    pub fn uptime_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Stores a group report and folds it into the totals. Returns its id.
    pub async fn process_result(&self, report: GroupReport) -> String {
        let mut state = self.state.write().await;
        let base = format!("{}-{}-{}", report.node_id, report.task_id, now_millis());
        let id = unique_id(base, &state.index);

        for result in &report.results {
            state.summary.total_tests += 1;
            state.summary.total_duration += result.duration;
            match result.status {
                TestStatus::Passed => state.summary.passed_tests += 1,
                TestStatus::Failed => state.summary.failed_tests += 1,
                TestStatus::Error => state.summary.error_tests += 1,
                TestStatus::Skipped => {}
            }
            if let Some(coverage) = &result.coverage {
                merge_coverage(&mut state.coverage, coverage);
            }
        }

        let node = state.nodes.entry(report.node_id.clone()).or_default();
        node.tests += report.results.len() as u64;
        node.duration += report.total_duration;
        node.passed += report.count(TestStatus::Passed) as u64;
        node.failed += report.count(TestStatus::Failed) as u64;
        node.errors += report.count(TestStatus::Error) as u64;

        let position = state.results.len();
        state.index.insert(id.clone(), position);
        state.results.push(ResultEntry {
            id: id.clone(),
            report,
        });

        metrics::counter!("swarm_results_processed_total").increment(1);
        info!(result_id = %id, "Processed test result");
        id
    }

    pub async fn process_failure(&self, failure: FailureReport) -> String {
        let mut state = self.state.write().await;
        let base = format!("failure-{}-{}-{}", failure.node_id, failure.task_id, now_millis());
        let id = unique_id(base, &state.failure_ids);

        warn!(
            failure_id = %id,
            node_id = %failure.node_id,
            task_id = %failure.task_id,
            error = %failure.error,
            "Processed test failure"
        );
        let position = state.failures.len();
        state.failure_ids.insert(id.clone(), position);
        state.failures.push((id.clone(), failure));
        metrics::counter!("swarm_failures_processed_total").increment(1);
        id
    }

    async fn ingest_result(&self, payload: &str) {
        match decode_json::<GroupReport>(payload) {
            Ok(report) => {
                self.process_result(report).await;
            }
            Err(e) => warn!("Discarding malformed result payload: {}", e),
        }
    }

    async fn ingest_failure(&self, payload: &str) {
        match decode_json::<FailureReport>(payload) {
            Ok(failure) => {
                self.process_failure(failure).await;
            }
            Err(e) => warn!("Discarding malformed failure payload: {}", e),
        }
    }

    /// One realtime round: wait for a result, then briefly for a failure
    pub async fn poll_once(&self) -> SwarmResult<()> {
        self.processing.store(true, Ordering::Relaxed);
        let outcome = async {
            if let Some(payload) = self
                .store
                .brpop(RESULTS_KEY, Duration::from_secs(self.config.results_poll_timeout_seconds))
                .await?
            {
                self.ingest_result(&payload).await;
            }
            if let Some(payload) = self
                .store
                .brpop(FAILURES_KEY, Duration::from_secs(self.config.failures_poll_timeout_seconds))
                .await?
            {
                self.ingest_failure(&payload).await;
            }
            Ok(())
        }
        .await;
        self.processing.store(false, Ordering::Relaxed);
        outcome
    }

    /// One batch round: up to `batch_size` pops from each channel.
    /// Returns how many results and failures were taken.
    pub async fn drain_batch(&self) -> SwarmResult<(usize, usize)> {
        self.processing.store(true, Ordering::Relaxed);
        let outcome = async {
            let mut results = 0;
            while results < self.config.batch_size {
                let Some(payload) = self.store.rpop(RESULTS_KEY).await? else {
                    break;
                };
                self.ingest_result(&payload).await;
                results += 1;
            }
            let mut failures = 0;
            while failures < self.config.batch_size {
                let Some(payload) = self.store.rpop(FAILURES_KEY).await? else {
                    break;
                };
                self.ingest_failure(&payload).await;
                failures += 1;
            }
            Ok((results, failures))
        }
        .await;
        self.processing.store(false, Ordering::Relaxed);
        outcome
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(mode = ?self.config.mode, "Result processing started");
        match self.config.mode {
            AggregationMode::Realtime => loop {
                tokio::select! {
                    outcome = self.poll_once() => {
                        if let Err(e) = outcome {
                            error!("Error in realtime processing: {}", e);
                            tokio::select! {
                                _ = sleep(Duration::from_secs(self.config.error_backoff_seconds)) => {}
                                _ = shutdown_rx.recv() => break,
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            },
            AggregationMode::Batch => {
                let mut ticker = interval(self.config.batch_interval());
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => match self.drain_batch().await {
                            Ok((0, 0)) => {}
                            Ok((results, failures)) => debug!(results, failures, "Batch processed"),
                            Err(e) => error!("Error in batch processing: {}", e),
                        },
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }
        }
        info!("Result processing stopped");
    }

    /// Appends the current metrics to the bounded performance history
    pub async fn record_sample(&self) {
        let uptime = self.uptime_ms();
        let mut state = self.state.write().await;
        let sample = PerformanceSample {
            timestamp: now_millis(),
            metrics: state.current_metrics(uptime),
        };
        state.history.push_back(sample);
        while state.history.len() > self.config.history_size {
            state.history.pop_front();
        }
    }

    pub async fn run_sampler(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(self.config.sample_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.record_sample().await,
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    pub async fn current_metrics(&self) -> CurrentMetrics {
        self.state.read().await.current_metrics(self.uptime_ms())
    }

    pub async fn result(&self, id: &str) -> Option<ResultEntry> {
        let state = self.state.read().await;
        state.index.get(id).map(|&i| state.results[i].clone())
    }

    /// A report matches a filter when any of its units does. Pages are
    /// 1-based.
    pub async fn filtered_results(
        &self,
        status: Option<&str>,
        category: Option<&str>,
        page: usize,
        limit: usize,
    ) -> FilteredResults {
        let page = page.max(1);
        let limit = limit.max(1);
        let state = self.state.read().await;

        let matching: Vec<&ResultEntry> = state
            .results
            .iter()
            .filter(|entry| {
                status.is_none_or(|s| entry.report.results.iter().any(|r| r.status.as_str() == s))
            })
            .filter(|entry| {
                category.is_none_or(|c| entry.report.results.iter().any(|r| r.category == c))
            })
            .collect();

        let total = matching.len();
        let results = matching
            .into_iter()
            .skip((page - 1) * limit)
            .take(limit)
            .cloned()
            .collect();

        FilteredResults {
            results,
            pagination: Pagination {
                page,
                limit,
                total,
                pages: total.div_ceil(limit),
            },
        }
    }

    /// Newest `endTime` first
    pub async fn recent_results(&self, limit: usize) -> Vec<ResultEntry> {
        let state = self.state.read().await;
        let mut entries: Vec<&ResultEntry> = state.results.iter().collect();
        entries.sort_by(|a, b| b.report.end_time.cmp(&a.report.end_time));
        entries.into_iter().take(limit).cloned().collect()
    }

    pub async fn active_nodes(&self) -> Vec<ActiveNode> {
        self.state.read().await.active_nodes()
    }

    pub async fn coverage_report(&self) -> CoverageReport {
        self.state.read().await.coverage_report()
    }

    pub async fn performance_statistics(&self) -> PerformanceStatistics {
        let state = self.state.read().await;
        let skip = state.history.len().saturating_sub(PERFORMANCE_WINDOW);
        let history: Vec<PerformanceSample> = state.history.iter().skip(skip).cloned().collect();

        let trends = match history.as_slice() {
            [.., previous, latest] => Some(Trends {
                test_rate: latest.metrics.summary.total_tests as i64
                    - previous.metrics.summary.total_tests as i64,
                success_rate_change: round2(
                    latest.metrics.summary.success_rate - previous.metrics.summary.success_rate,
                ),
                average_time_change: round2(
                    latest.metrics.summary.average_test_time
                        - previous.metrics.summary.average_test_time,
                ),
            }),
            _ => None,
        };

        PerformanceStatistics {
            current: state.current_metrics(self.uptime_ms()),
            history,
            trends,
        }
    }

    pub async fn snapshot(&self) -> AggregateSnapshot {
        let state = self.state.read().await;
        AggregateSnapshot {
            metrics: state.current_metrics(self.uptime_ms()),
            coverage: state.coverage_report(),
            nodes: state.active_nodes(),
            results: state.results.clone(),
            failures: state.failures.clone(),
        }
    }
}
