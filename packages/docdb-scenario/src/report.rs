//! Step narration and run summary.

use std::fmt;

use tracing::debug;

use crate::policy::{FailureReason, StepId, StepOutcome, StepPolicy};

/// One judged operation.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step: StepId,
    pub label: String,
    pub policy: StepPolicy,
    pub outcome: StepOutcome,
    pub status: String,
}

impl fmt::Display for StepRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.step, self.label, self.status)
    }
}

/// Values the run observed, kept for assertions and the summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observations {
    pub bulk_created: usize,
    pub elevated_procedure_documents: Option<usize>,
    pub elevated_rerun_documents: Option<usize>,
    pub cross_partition_documents: Option<usize>,
    pub partition_b_documents: Option<usize>,
    pub restricted_partition_documents: Option<usize>,
    pub permission_ts_before: Option<u64>,
    pub permission_ts_after: Option<u64>,
    pub cleaned_up: Option<usize>,
}

/// Everything a run recorded, in order.
#[derive(Debug, Default)]
pub struct ScenarioReport {
    records: Vec<StepRecord>,
    pub observations: Observations,
}

fn status_text(policy: StepPolicy, outcome: StepOutcome, detail: &str) -> String {
    let with_detail = |word: &str| {
        if detail.is_empty() {
            word.to_string()
        } else {
            format!("{word} ({detail})")
        }
    };
    match (outcome, policy) {
        (StepOutcome::Passed, StepPolicy::ExpectFailure(_)) => format!("PASS (denied: {detail})"),
        (StepOutcome::Passed, _) => with_detail("PASS"),
        (StepOutcome::Failed, _) => with_detail("FAIL"),
        (StepOutcome::Anomaly, StepPolicy::ExpectFailure(FailureReason::SecurityBoundary)) => {
            with_detail("SECURITY ISSUE, expected denial")
        }
        (StepOutcome::Anomaly, _) => with_detail("ANOMALY, expected failure"),
        (StepOutcome::Tolerated, _) => with_detail("TOLERATED"),
        (StepOutcome::Skipped, _) => with_detail("SKIPPED"),
    }
}

impl ScenarioReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Judges `result` under `policy`, prints the step line and keeps it.
    pub fn record(
        &mut self,
        step: StepId,
        label: &str,
        policy: StepPolicy,
        result: Result<String, String>,
    ) -> StepOutcome {
        let outcome = policy.evaluate(result.is_ok());
        let detail = match result {
            Ok(detail) | Err(detail) => detail,
        };
        self.push(step, label, policy, outcome, &detail)
    }

    /// Records a step that was not attempted.
    pub fn skip(&mut self, step: StepId, label: &str, policy: StepPolicy, reason: &str) {
        self.push(step, label, policy, StepOutcome::Skipped, reason);
    }

    fn push(
        &mut self,
        step: StepId,
        label: &str,
        policy: StepPolicy,
        outcome: StepOutcome,
        detail: &str,
    ) -> StepOutcome {
        let record = StepRecord {
            step,
            label: label.to_string(),
            policy,
            outcome,
            status: status_text(policy, outcome, detail),
        };
        // The printed line is the report; the event only carries structured fields.
        println!("{record}");
        debug!(step = step.number(), label, ?outcome, "step recorded");
        self.records.push(record);
        outcome
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn records_for(&self, step: StepId) -> impl Iterator<Item = &StepRecord> {
        self.records.iter().filter(move |r| r.step == step)
    }

    /// Outcome of the record labelled `label` within `step`.
    pub fn outcome(&self, step: StepId, label: &str) -> Option<StepOutcome> {
        self.records_for(step)
            .find(|r| r.label == label)
            .map(|r| r.outcome)
    }

    pub fn count(&self, outcome: StepOutcome) -> usize {
        self.records.iter().filter(|r| r.outcome == outcome).count()
    }

    /// True when any step failed unexpectedly or succeeded where it should not.
    pub fn has_unexpected_results(&self) -> bool {
        self.count(StepOutcome::Failed) > 0 || self.count(StepOutcome::Anomaly) > 0
    }

    pub fn print_summary(&self) {
        println!("\nSummary");
        for record in &self.records {
            println!("- {record}");
        }
        println!(
            "\npassed={} failed={} anomalies={} tolerated={} skipped={}",
            self.count(StepOutcome::Passed),
            self.count(StepOutcome::Failed),
            self.count(StepOutcome::Anomaly),
            self.count(StepOutcome::Tolerated),
            self.count(StepOutcome::Skipped),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_keep_order_and_counts() {
        let mut report = ScenarioReport::new();
        report.record(
            StepId::SeedDocuments,
            "create in partA",
            StepPolicy::ExpectSuccess,
            Ok("id=a".to_string()),
        );
        report.record(
            StepId::RestrictedCreates,
            "create in partA",
            StepPolicy::ExpectFailure(FailureReason::SecurityBoundary),
            Ok(String::new()),
        );
        report.skip(
            StepId::Cleanup,
            "delete documents",
            StepPolicy::BestEffort,
            "disabled",
        );

        assert_eq!(report.records().len(), 3);
        assert_eq!(report.count(StepOutcome::Anomaly), 1);
        assert!(report.has_unexpected_results());
        assert_eq!(
            report.outcome(StepId::SeedDocuments, "create in partA"),
            Some(StepOutcome::Passed)
        );
        assert_eq!(report.records()[1].status, "SECURITY ISSUE, expected denial");
    }

    #[test]
    fn failures_render_as_a_single_report_line() {
        let mut report = ScenarioReport::new();
        let outcome = report.record(
            StepId::ElevatedProcedure,
            "execute procedure in partA",
            StepPolicy::ExpectSuccess,
            Err("500 boom".to_string()),
        );

        assert_eq!(outcome, StepOutcome::Failed);
        assert_eq!(report.records().len(), 1);
        assert_eq!(
            report.records()[0].to_string(),
            format!(
                "{} execute procedure in partA: FAIL (500 boom)",
                StepId::ElevatedProcedure
            )
        );
    }

    #[test]
    fn expected_denials_show_the_error() {
        assert_eq!(
            status_text(
                StepPolicy::ExpectFailure(FailureReason::KnownQuirk),
                StepOutcome::Passed,
                "403"
            ),
            "PASS (denied: 403)"
        );
        assert_eq!(
            status_text(StepPolicy::BestEffort, StepOutcome::Tolerated, "boom"),
            "TOLERATED (boom)"
        );
    }
}
