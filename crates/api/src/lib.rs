//! Result aggregation and the reporting HTTP API.
//!
//! The [`aggregator::ResultAggregator`] drains the results and failures
//! channels into running totals; [`reports::ReportGenerator`] renders those
//! totals to HTML, JSON, XML or CSV artifacts; [`routes::create_app`] serves
//! both over HTTP.
//!
//! ## Endpoints
//!
//! - `GET /` dashboard
//! - `GET /health`
//! - `GET /metrics` Prometheus text
//! - `GET /api/metrics`
//! - `GET /api/results?page&limit&status&category`
//! - `GET /api/results/{id}`
//! - `GET /api/stats/realtime`
//! - `GET /api/coverage`
//! - `GET /api/performance`
//! - `GET /api/reports`
//! - `POST /api/reports/generate` with `{"format": "html", "includeDetails": true}`
//! - `GET /api/reports/{id}/download`

pub mod aggregator;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod reports;
pub mod routes;

pub use aggregator::{CurrentMetrics, ResultAggregator};
pub use error::{ApiError, ApiResult};
pub use reports::{ReportFormat, ReportGenerator, ReportMeta};
pub use routes::{create_app, create_routes, serve, AppState};
