use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ValueEnum;
use metrics_exporter_prometheus::PrometheusHandle;
use swarm_api::{create_app, AppState, ReportGenerator, ResultAggregator};
use swarm_core::config::AppConfig;
use swarm_core::{CoordinationStore, SwarmError};
use swarm_dispatcher::{
    describe_node, DistributionSummary, HeartbeatService, NodeActivity, NodeRegistry,
    TaskDispatcher, TestDiscovery,
};
use swarm_infrastructure::{LinuxSystemProbe, StoreFactory, SystemProbe};
use swarm_observability::{
    sinks_from_config, AlertManager, HealthChecker, MetricsCollector, PrometheusExporter,
};
use swarm_worker::{CommandTestRunner, TestRunner, WorkerLoop};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::shutdown::ShutdownManager;

/// Long-running component tasks of one process
type Components = JoinSet<Result<()>>;

/// Which roles this process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AppMode {
    /// Discover, partition and dispatch one round of tests
    Manager,
    /// Consume and execute task groups
    Worker,
    /// Aggregate results and serve the reporting API
    Reporter,
    /// Collect metrics, check fleet health and export to Prometheus
    Monitor,
    /// Every role in one process
    All,
}

impl AppMode {
    fn includes(self, role: AppMode) -> bool {
        self == role || self == AppMode::All
    }

    /// Manager and worker processes are fleet members with a heartbeat
    fn registers_node(self) -> bool {
        self.includes(AppMode::Manager) || self.includes(AppMode::Worker)
    }
}

pub struct Application {
    config: AppConfig,
    mode: AppMode,
    store: Arc<dyn CoordinationStore>,
    probe: Arc<dyn SystemProbe>,
    registry: NodeRegistry,
    activity: Arc<NodeActivity>,
    recorder: Option<PrometheusHandle>,
}

impl Application {
    pub async fn new(
        mut config: AppConfig,
        mode: AppMode,
        recorder: Option<PrometheusHandle>,
    ) -> Result<Self> {
        info!(mode = ?mode, node_id = %config.node.node_id, "Initializing application");

        // a combined process must itself be dispatchable
        config.node.is_manager = mode == AppMode::Manager;

        let store = StoreFactory::create(&config.store)
            .await
            .context("failed to connect to the coordination store")?;
        let registry = NodeRegistry::new(store.clone(), config.registry.clone());

        Ok(Self {
            config,
            mode,
            store,
            probe: Arc::new(LinuxSystemProbe::new()),
            registry,
            activity: Arc::new(NodeActivity::new()),
            recorder,
        })
    }

    /// Starts every component of this mode and waits for all of them.
    ///
    /// The first component that fails or panics triggers shutdown for the
    /// rest, and the fault is returned once everything has stopped.
    pub async fn run(&self, shutdown: ShutdownManager) -> Result<()> {
        info!(mode = ?self.mode, "Starting application");
        let shutdown_rx = shutdown.subscribe().await;
        let mut components = Components::new();

        if self.mode.registers_node() {
            if let Err(e) = self.start_membership(&mut components, shutdown_rx.resubscribe()).await {
                shutdown.shutdown().await;
                return Err(e);
            }
        }
        if self.mode.includes(AppMode::Worker) {
            self.start_worker(&mut components, shutdown_rx.resubscribe());
        }
        if self.mode.includes(AppMode::Manager) {
            self.start_manager(&mut components, shutdown_rx.resubscribe());
        }
        if self.mode.includes(AppMode::Reporter) {
            self.start_reporter(&mut components, &shutdown_rx);
        }
        if self.mode.includes(AppMode::Monitor) {
            self.start_monitor(&mut components, &shutdown_rx);
        }

        let outcome = supervise(components, &shutdown).await;
        info!(mode = ?self.mode, "Application stopped");
        outcome
    }

    /// Registers this node, then keeps its heartbeat fresh. A failed
    /// registration is retried by the heartbeat loop.
    async fn start_membership(
        &self,
        components: &mut Components,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let descriptor = describe_node(&self.config.node, self.probe.as_ref())
            .context("failed to describe this node")?;
        if let Err(e) = self.registry.register(&descriptor).await {
            warn!(node_id = %descriptor.node_id, "Initial registration failed: {}", e);
        }
        let heartbeat = HeartbeatService::new(
            self.registry.clone(),
            descriptor,
            self.probe.clone(),
            self.activity.clone(),
        );
        components.spawn(async move {
            heartbeat.run(shutdown_rx).await;
            Ok(())
        });
        Ok(())
    }

    fn start_worker(&self, components: &mut Components, shutdown_rx: broadcast::Receiver<()>) {
        let runner: Arc<dyn TestRunner> = Arc::new(CommandTestRunner::from_config(&self.config.worker));
        let worker = WorkerLoop::new(
            self.config.node.node_id.clone(),
            self.store.clone(),
            self.registry.clone(),
            runner,
            self.probe.clone(),
            self.activity.clone(),
            self.config.worker.clone(),
        );
        components.spawn(async move {
            worker.run(shutdown_rx).await;
            Ok(())
        });
    }

    fn start_manager(&self, components: &mut Components, shutdown_rx: broadcast::Receiver<()>) {
        let discovery = TestDiscovery::new(
            self.config.partition.test_root.clone(),
            self.config.partition.categories.clone(),
        );
        let dispatcher = TaskDispatcher::new(
            self.store.clone(),
            self.registry.clone(),
            &self.config.partition,
        );
        let retry_delay = self.config.registry.heartbeat_interval();
        components.spawn(async move {
            match run_distribution_round(&discovery, &dispatcher, retry_delay, shutdown_rx)
                .await
                .context("distribution round failed")?
            {
                Some(summary) => info!(
                    groups = summary.groups.len(),
                    units = summary.total_units,
                    workers = summary.workers,
                    "Distribution round finished"
                ),
                None => info!("Distribution round abandoned on shutdown"),
            }
            Ok(())
        });
    }

    fn start_reporter(&self, components: &mut Components, shutdown_rx: &broadcast::Receiver<()>) {
        let aggregator = Arc::new(ResultAggregator::new(
            self.store.clone(),
            self.config.aggregation.clone(),
        ));
        let reports = Arc::new(ReportGenerator::new(&self.config.reports, aggregator.clone()));
        let app = create_app(
            AppState {
                aggregator: aggregator.clone(),
                reports: reports.clone(),
                store: self.store.clone(),
                recorder: self.recorder.clone(),
            },
            self.config.api.cors_enabled,
        );

        let bind_address = self.config.api.bind_address.clone();
        let api_rx = shutdown_rx.resubscribe();
        let mut final_report_rx = shutdown_rx.resubscribe();

        let rx = shutdown_rx.resubscribe();
        let drain = aggregator.clone();
        components.spawn(async move {
            drain.run(rx).await;
            Ok(())
        });
        let rx = shutdown_rx.resubscribe();
        components.spawn(async move {
            aggregator.run_sampler(rx).await;
            Ok(())
        });
        components.spawn(async move {
            swarm_api::serve(app, &bind_address, api_rx)
                .await
                .context("reporting API failed")
        });
        components.spawn(async move {
            let _ = final_report_rx.recv().await;
            match reports.generate("json", true).await {
                Ok(meta) => info!(report_id = %meta.id, filename = %meta.filename, "Final report written"),
                Err(e) => error!("Final report failed: {}", e),
            }
            Ok(())
        });
    }

    fn start_monitor(&self, components: &mut Components, shutdown_rx: &broadcast::Receiver<()>) {
        let monitoring = &self.config.monitoring;
        let node = &self.config.node;
        let http = reqwest::Client::new();

        let alerts = Arc::new(AlertManager::new(
            node.node_id.clone(),
            node.service_id.clone(),
            monitoring.thresholds.clone(),
            monitoring.alert_cooldown(),
            sinks_from_config(monitoring, self.store.clone(), http.clone()),
        ));
        let collector = Arc::new(MetricsCollector::new(
            node.node_id.clone(),
            node.service_id.clone(),
            self.store.clone(),
            self.registry.clone(),
            self.probe.clone(),
            http,
            alerts.clone(),
            monitoring.clone(),
            self.config.worker.max_tasks,
        ));
        let health = HealthChecker::new(
            node.node_id.clone(),
            self.store.clone(),
            self.registry.clone(),
            self.probe.clone(),
            alerts,
            monitoring.disk_path.clone(),
        );

        let rx = shutdown_rx.resubscribe();
        let sampler = collector.clone();
        components.spawn(async move {
            sampler.run(rx).await;
            Ok(())
        });
        let rx = shutdown_rx.resubscribe();
        components.spawn(async move {
            health.run(rx).await;
            Ok(())
        });

        let prometheus = &monitoring.prometheus;
        if prometheus.enabled {
            let exporter = PrometheusExporter::new(
                collector,
                prometheus.namespace.clone(),
                self.recorder.clone(),
            );
            let bind_address = prometheus.bind_address.clone();
            let path = prometheus.path.clone();
            let rx = shutdown_rx.resubscribe();
            components.spawn(async move {
                exporter
                    .serve(&bind_address, &path, rx)
                    .await
                    .context("Prometheus exporter failed")
            });
        }
    }
}

/// Waits for every component. The first failure or panic broadcasts
/// shutdown so the remaining components wind down, and is returned after
/// they have.
async fn supervise(mut components: Components, shutdown: &ShutdownManager) -> Result<()> {
    let mut first_fault = None;
    while let Some(outcome) = components.join_next().await {
        let fault = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e,
            Err(e) => anyhow::Error::new(e).context("component task panicked"),
        };
        error!(remaining = components.len(), "Component failed, shutting down: {fault:#}");
        if first_fault.is_none() {
            shutdown.shutdown().await;
            first_fault = Some(fault);
        }
    }
    first_fault.map_or(Ok(()), Err)
}

/// Discovers the suite and dispatches it once.
///
/// While no worker is alive, or the store is unreachable before anything
/// was pushed, the round waits `retry_delay` and plans again. Once a plan
/// exists a transient push failure resumes with the undelivered groups of
/// that same plan, so each unit lands in exactly one group. Any other error
/// ends the round. Returns `None` when shutdown arrives first.
pub async fn run_distribution_round(
    discovery: &TestDiscovery,
    dispatcher: &TaskDispatcher,
    retry_delay: std::time::Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<Option<DistributionSummary>, SwarmError> {
    let units = discovery.discover().await?;
    info!(units = units.len(), "Test discovery completed");

    let plan = loop {
        match dispatcher.plan(&units).await {
            Ok(plan) => break plan,
            Err(e) if matches!(e, SwarmError::NoWorkersAvailable) || e.is_transient() => {
                warn!("Distribution deferred: {}", e);
                tokio::select! {
                    _ = sleep(retry_delay) => {}
                    _ = shutdown_rx.recv() => return Ok(None),
                }
            }
            Err(e) => return Err(e),
        }
    };

    let mut delivered = 0;
    loop {
        match dispatcher.dispatch(&plan, &mut delivered).await {
            Ok(()) => {
                metrics::counter!("swarm_distribution_rounds_total").increment(1);
                return Ok(Some(plan));
            }
            Err(e) if e.is_transient() => {
                warn!(
                    delivered,
                    remaining = plan.groups.len() - delivered,
                    "Dispatch interrupted, resuming undelivered groups: {}",
                    e
                );
                tokio::select! {
                    _ = sleep(retry_delay) => {}
                    _ = shutdown_rx.recv() => return Ok(None),
                }
            }
            Err(e) => return Err(e),
        }
    }
}
