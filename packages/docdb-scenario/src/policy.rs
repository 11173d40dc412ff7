//! How each step's result is judged.

use std::fmt;

/// Why a step is expected to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The service must refuse the request; success is a security issue
    SecurityBoundary,
    /// The service is known to refuse a request it arguably should accept
    KnownQuirk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    /// Failure aborts the run
    Fatal,
    ExpectSuccess,
    ExpectFailure(FailureReason),
    /// Failure is logged and swallowed
    BestEffort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepOutcome {
    /// Behaved as expected (including an expected denial)
    Passed,
    /// Failed although success was expected
    Failed,
    /// Succeeded although failure was expected
    Anomaly,
    /// Best-effort failure that was swallowed
    Tolerated,
    /// Not attempted because an earlier step left no handle to use
    Skipped,
}

impl StepPolicy {
    pub fn evaluate(self, succeeded: bool) -> StepOutcome {
        match (self, succeeded) {
            (StepPolicy::ExpectFailure(_), true) => StepOutcome::Anomaly,
            (StepPolicy::ExpectFailure(_), false) => StepOutcome::Passed,
            (StepPolicy::BestEffort, false) => StepOutcome::Tolerated,
            (_, true) => StepOutcome::Passed,
            (_, false) => StepOutcome::Failed,
        }
    }
}

/// Steps of the scenario, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepId {
    ResolveHandles,
    ResetProcedure,
    CreateProcedure,
    SeedDocuments,
    BulkCreate,
    ElevatedProcedure,
    ResetUser,
    CreateUser,
    GrantPermissions,
    DeriveRestrictedClient,
    RegisterResolver,
    Settle,
    RefreshPermission,
    RestrictedCreates,
    ElevatedProcedureRerun,
    ElevatedQueries,
    RestrictedChecks,
    Cleanup,
}

impl StepId {
    pub const ALL: [StepId; 18] = [
        StepId::ResolveHandles,
        StepId::ResetProcedure,
        StepId::CreateProcedure,
        StepId::SeedDocuments,
        StepId::BulkCreate,
        StepId::ElevatedProcedure,
        StepId::ResetUser,
        StepId::CreateUser,
        StepId::GrantPermissions,
        StepId::DeriveRestrictedClient,
        StepId::RegisterResolver,
        StepId::Settle,
        StepId::RefreshPermission,
        StepId::RestrictedCreates,
        StepId::ElevatedProcedureRerun,
        StepId::ElevatedQueries,
        StepId::RestrictedChecks,
        StepId::Cleanup,
    ];

    /// 1-based position in the run.
    pub fn number(self) -> usize {
        StepId::ALL
            .iter()
            .position(|s| *s == self)
            .map(|i| i + 1)
            .unwrap_or(0)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "STEP {}", self.number())
    }
}
