use crate::types::{AgentResult, AgentRole, AgentStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Cumulative outcome counters for one agent role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetrics {
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub total_latency_ms: u64,
    pub total_attempts: u64,
}

impl AgentMetrics {
    pub fn average_latency_ms(&self) -> u64 {
        if self.dispatched == 0 {
            0
        } else {
            self.total_latency_ms / self.dispatched
        }
    }

    fn record(&mut self, result: &AgentResult) {
        self.dispatched += 1;
        match result.status {
            AgentStatus::Success => self.succeeded += 1,
            AgentStatus::Failed => self.failed += 1,
            AgentStatus::TimedOut => self.timed_out += 1,
        }
        self.total_latency_ms += result.latency_ms;
        self.total_attempts += u64::from(result.attempts);
    }

    fn add(&mut self, other: &AgentMetrics) {
        self.dispatched += other.dispatched;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.timed_out += other.timed_out;
        self.total_latency_ms += other.total_latency_ms;
        self.total_attempts += other.total_attempts;
    }
}

/// Process-wide per-role counters.
///
/// Written once per request, after its agents have settled; agents never
/// touch it while running.
pub struct AgentMonitor {
    metrics: Arc<RwLock<HashMap<AgentRole, AgentMetrics>>>,
}

impl AgentMonitor {
    pub fn new() -> Self {
        let metrics = AgentRole::ALL
            .iter()
            .map(|role| (*role, AgentMetrics::default()))
            .collect();
        Self {
            metrics: Arc::new(RwLock::new(metrics)),
        }
    }

    /// Fold one request's results into the counters.
    pub async fn record_results(&self, results: &[AgentResult]) {
        let mut metrics = self.metrics.write().await;
        for result in results {
            metrics.entry(result.role).or_default().record(result);
        }
    }

    pub async fn get(&self, role: AgentRole) -> AgentMetrics {
        let metrics = self.metrics.read().await;
        metrics.get(&role).cloned().unwrap_or_default()
    }

    /// Counters for every role, in [`AgentRole::ALL`] order.
    pub async fn snapshot(&self) -> Vec<(AgentRole, AgentMetrics)> {
        let metrics = self.metrics.read().await;
        AgentRole::ALL
            .iter()
            .map(|role| (*role, metrics.get(role).cloned().unwrap_or_default()))
            .collect()
    }

    /// Totals across all roles.
    pub async fn aggregate_metrics(&self) -> AgentMetrics {
        let metrics = self.metrics.read().await;
        let mut total = AgentMetrics::default();
        for m in metrics.values() {
            total.add(m);
        }
        total
    }

    /// JSON view for the `/api/agents` endpoint.
    pub async fn to_json(&self) -> serde_json::Value {
        let agents: Vec<serde_json::Value> = self
            .snapshot()
            .await
            .into_iter()
            .map(|(role, m)| {
                serde_json::json!({
                    "role": role,
                    "metrics": m,
                    "averageLatencyMs": m.average_latency_ms(),
                })
            })
            .collect();
        let aggregate = self.aggregate_metrics().await;
        serde_json::json!({
            "agents": agents,
            "aggregate": aggregate,
        })
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new()
    }
}
