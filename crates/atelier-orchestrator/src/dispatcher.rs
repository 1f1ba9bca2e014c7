use crate::executor::AgentExecutor;
use crate::types::{AgentResult, AgentRole, AgentStatus, AgentTask, OrchestrationRequest};
use atelier_core::SpanGuard;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Per-agent progress visible to the dispatcher after the task is aborted.
#[derive(Default)]
struct Progress {
    started_at: OnceLock<Instant>,
    attempts: AtomicU32,
}

impl Progress {
    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// Why collection stopped before every agent reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cutoff {
    Deadline,
    Cancelled,
}

/// Runs the selected agents concurrently and collects one result per agent.
pub struct Dispatcher {
    executor: Arc<AgentExecutor>,
    max_in_flight: usize,
    per_agent_timeout: Duration,
}

impl Dispatcher {
    pub fn new(executor: Arc<AgentExecutor>, max_in_flight: usize, per_agent_timeout: Duration) -> Self {
        Self {
            executor,
            max_in_flight: max_in_flight.max(1),
            per_agent_timeout,
        }
    }

    /// Dispatch `roles` and return their results in input order.
    ///
    /// At most `max_in_flight` agents run at once; the rest wait for a
    /// permit. Each agent's deadline is the earlier of `deadline` and its
    /// start time plus `per_agent_timeout`. When `deadline` passes or
    /// `cancel` fires, unfinished agents are aborted and reported as
    /// timed out.
    pub async fn dispatch(
        &self,
        roles: &[AgentRole],
        request: Arc<OrchestrationRequest>,
        deadline: Instant,
        parent: &SpanGuard,
        cancel: &CancellationToken,
    ) -> Vec<AgentResult> {
        let mut span = parent.child("dispatch");
        span.set_attribute("agent_count", roles.len());
        span.set_attribute("max_in_flight", self.max_in_flight);

        let dispatched_at = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let token_budget = request.complexity.token_budget();
        let mut progress: Vec<Arc<Progress>> = Vec::with_capacity(roles.len());
        let mut join_set = JoinSet::new();

        for (index, role) in roles.iter().copied().enumerate() {
            let executor = self.executor.clone();
            let semaphore = semaphore.clone();
            let request = request.clone();
            let agent_span = span.child("agent.execute");
            let agent_progress = Arc::new(Progress::default());
            progress.push(agent_progress.clone());
            let per_agent_timeout = self.per_agent_timeout;

            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        agent_span.fail("dispatcher closed");
                        return (index, AgentResult::failed(role, "dispatcher closed", 0, 0));
                    }
                };

                let start = Instant::now();
                let _ = agent_progress.started_at.set(start);
                let task_deadline = deadline.min(start + per_agent_timeout);
                let task = AgentTask {
                    role,
                    index,
                    request,
                    deadline: task_deadline,
                    trace_id: agent_span.trace_id(),
                    token_budget,
                };

                let result = match tokio::time::timeout_at(
                    task_deadline,
                    executor.execute(&task, agent_span, &agent_progress.attempts),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => AgentResult::timed_out(
                        role,
                        "per-agent deadline elapsed",
                        start.elapsed().as_millis() as u64,
                        agent_progress.attempts().max(1),
                    ),
                };

                (index, result)
            });
        }

        let mut slots: Vec<Option<AgentResult>> = (0..roles.len()).map(|_| None).collect();
        let mut cutoff = None;

        loop {
            tokio::select! {
                biased;

                joined = join_set.join_next() => match joined {
                    Some(Ok((index, result))) => slots[index] = Some(result),
                    Some(Err(e)) => warn!(trace_id = %span.trace_id(), error = %e, "Agent task aborted"),
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    cutoff = Some(Cutoff::Deadline);
                    break;
                }
                _ = cancel.cancelled() => {
                    cutoff = Some(Cutoff::Cancelled);
                    break;
                }
            }
        }

        // Unfinished agents are dropped here; their open spans close as cancelled.
        join_set.abort_all();
        while join_set.join_next().await.is_some() {}

        let results: Vec<AgentResult> = slots
            .into_iter()
            .zip(roles.iter().copied())
            .zip(progress)
            .map(|((slot, role), progress)| {
                slot.unwrap_or_else(|| unfinished_result(role, &progress, cutoff))
            })
            .collect();

        let count = |status: AgentStatus| results.iter().filter(|r| r.status == status).count();
        let succeeded = count(AgentStatus::Success);
        let failed = count(AgentStatus::Failed);
        let timed_out = count(AgentStatus::TimedOut);

        span.set_attribute("succeeded", succeeded);
        span.set_attribute("failed", failed);
        span.set_attribute("timed_out", timed_out);
        if let Some(cutoff) = cutoff {
            span.set_attribute(
                "cutoff",
                match cutoff {
                    Cutoff::Deadline => "deadline",
                    Cutoff::Cancelled => "cancelled",
                },
            );
        }

        info!(
            trace_id = %span.trace_id(),
            stage = "dispatching",
            succeeded,
            failed,
            timed_out,
            latency_ms = dispatched_at.elapsed().as_millis() as u64,
            "Dispatch settled"
        );
        span.ok();

        results
    }
}

fn unfinished_result(role: AgentRole, progress: &Progress, cutoff: Option<Cutoff>) -> AgentResult {
    let Some(started_at) = progress.started_at.get() else {
        let reason = match cutoff {
            Some(Cutoff::Cancelled) => "request cancelled while queued",
            _ => "deadline elapsed while queued",
        };
        return AgentResult::timed_out(role, reason, 0, 0);
    };

    let latency_ms = started_at.elapsed().as_millis() as u64;
    let attempts = progress.attempts().max(1);
    match cutoff {
        Some(Cutoff::Deadline) => AgentResult::timed_out(role, "deadline elapsed", latency_ms, attempts),
        Some(Cutoff::Cancelled) => AgentResult::timed_out(role, "request cancelled", latency_ms, attempts),
        None => AgentResult::failed(role, "agent task aborted unexpectedly", latency_ms, attempts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(attempts: u32) -> Progress {
        let progress = Progress::default();
        let _ = progress.started_at.set(Instant::now());
        progress.attempts.store(attempts, Ordering::SeqCst);
        progress
    }

    #[test]
    fn test_unfinished_result_reasons() {
        let queued = unfinished_result(AgentRole::Designer, &Progress::default(), Some(Cutoff::Deadline));
        assert_eq!(queued.status, AgentStatus::TimedOut);
        assert_eq!(queued.error.as_deref(), Some("deadline elapsed while queued"));
        assert_eq!(queued.attempts, 0);

        let running = unfinished_result(AgentRole::Designer, &started(1), Some(Cutoff::Deadline));
        assert_eq!(running.error.as_deref(), Some("deadline elapsed"));
        assert_eq!(running.attempts, 1);

        let cancelled = unfinished_result(AgentRole::Architect, &Progress::default(), Some(Cutoff::Cancelled));
        assert_eq!(cancelled.status, AgentStatus::TimedOut);
        assert_eq!(cancelled.error.as_deref(), Some("request cancelled while queued"));

        let panicked = unfinished_result(AgentRole::Architect, &started(1), None);
        assert_eq!(panicked.status, AgentStatus::Failed);
    }

    #[test]
    fn test_unfinished_result_reports_attempts_made() {
        let retried = unfinished_result(AgentRole::Architect, &started(3), Some(Cutoff::Deadline));
        assert_eq!(retried.attempts, 3);

        // Started but the first call had not been issued yet.
        let fresh = unfinished_result(AgentRole::Architect, &started(0), Some(Cutoff::Cancelled));
        assert_eq!(fresh.attempts, 1);
    }
}
