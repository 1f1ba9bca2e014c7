use crate::types::{AgentResult, AgentStatus, AggregatedContext};
use std::fmt::Write as _;

/// Merge agent results into an [`AggregatedContext`].
///
/// `overall_confidence` is the weight-averaged confidence of the successful
/// agents, using each role's aggregation weight; `0.0` when none succeeded.
/// Order is preserved.
pub fn aggregate(results: Vec<AgentResult>) -> AggregatedContext {
    let (weighted, total_weight) = results
        .iter()
        .filter(|r| r.is_success())
        .fold((0.0_f64, 0.0_f64), |(sum, weights), r| {
            let w = r.role.weight();
            (sum + w * r.confidence.clamp(0.0, 1.0), weights + w)
        });

    let overall_confidence = if total_weight > 0.0 {
        (weighted / total_weight).clamp(0.0, 1.0)
    } else {
        0.0
    };

    AggregatedContext {
        results,
        overall_confidence,
    }
}

impl AggregatedContext {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// True when any agent did not succeed.
    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| !r.is_success())
    }

    /// Text block handed to the synthesizer: one section per agent in
    /// dispatch order, failed agents marked with their reason.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, r) in self.results.iter().enumerate() {
            let _ = write!(out, "### {}. {} ({})", i + 1, r.agent_name, r.role);
            match r.status {
                AgentStatus::Success => {
                    let _ = writeln!(out, " [confidence {:.2}]", r.confidence);
                    let _ = writeln!(out, "{}\n", r.content.trim());
                }
                AgentStatus::Failed | AgentStatus::TimedOut => {
                    let _ = writeln!(
                        out,
                        " [{}: {}]\n",
                        r.status,
                        r.error.as_deref().unwrap_or("no reason recorded")
                    );
                }
            }
        }
        let _ = write!(
            out,
            "Overall confidence: {:.2} ({} of {} agents succeeded)",
            self.overall_confidence,
            self.succeeded(),
            self.results.len()
        );
        out
    }
}
