use axum::extract::State;
use axum::response::Html;
use axum::Json;
use serde_json::{json, Value};

use crate::routes::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let store = match state.store.ping().await {
        Ok(()) => "ready",
        Err(_) => "unavailable",
    };
    Json(json!({
        "status": "healthy",
        "uptime": state.aggregator.uptime_ms() as f64 / 1000.0,
        "store": store,
        "processing": state.aggregator.is_processing(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

const DASHBOARD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>Swarm Test Dashboard</title>
<style>
body { font-family: sans-serif; margin: 2rem; }
.cards { display: flex; gap: 1rem; }
.card { border: 1px solid #ddd; border-radius: 6px; padding: 1rem; min-width: 8rem; }
</style>
</head>
<body>
<h1>Swarm Test Dashboard</h1>
<div class="cards">
<div class="card"><h3>Total</h3><p id="total">-</p></div>
<div class="card"><h3>Passed</h3><p id="passed">-</p></div>
<div class="card"><h3>Failed</h3><p id="failed">-</p></div>
<div class="card"><h3>Success rate</h3><p id="rate">-</p></div>
<div class="card"><h3>Nodes</h3><p id="nodes">-</p></div>
</div>
<script>
async function refresh() {
  const res = await fetch('/api/stats/realtime');
  const data = await res.json();
  const s = data.metrics.summary;
  document.getElementById('total').textContent = s.totalTests;
  document.getElementById('passed').textContent = s.passedTests;
  document.getElementById('failed').textContent = s.failedTests;
  document.getElementById('rate').textContent = s.successRate + '%';
  document.getElementById('nodes').textContent = data.activeNodes.length;
}
refresh();
setInterval(refresh, 5000);
</script>
</body>
</html>
"#;

/// Self-refreshing overview backed by the realtime stats endpoint
pub async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD)
}
