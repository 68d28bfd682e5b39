//! Deployment jobs and their per-display outcomes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::endpoint::DisplayId;
use crate::error::{CommandError, WallError};
use crate::message::{AssetRef, CommandResult};

// ── JobId ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = WallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| WallError::JobValidation(format!("invalid job id {s:?}: {e}")))
    }
}

// ── JobPhase ─────────────────────────────────────────────────────

/// ```text
///  Pending ──► InProgress ──► Completed | PartiallyFailed | Failed
///     │            ▲
///     ▼            │
///  Scheduled ──────┘
///     │
///     └──► Cancelled   (also from Pending)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobPhase {
    Pending,
    Scheduled,
    InProgress,
    Completed,
    PartiallyFailed,
    Failed,
    Cancelled,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::PartiallyFailed => "partially-failed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

impl JobPhase {
    /// No further dispatch will happen for this job.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartiallyFailed | Self::Failed | Self::Cancelled
        )
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Pending | Self::Scheduled)
    }

    /// Phases a retry revision can be cut from.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PartiallyFailed | Self::Failed)
    }
}

// ── TargetOutcome ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum TargetOutcome {
    Pending,
    Success {
        at: DateTime<Utc>,
        attempts: u32,
    },
    /// The dispatcher's retry budget is spent; only a new revision retries.
    PermanentlyFailed {
        error: CommandError,
        at: DateTime<Utc>,
        attempts: u32,
    },
}

impl TargetOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::PermanentlyFailed { .. })
    }

    pub fn from_result(result: &CommandResult, at: DateTime<Utc>) -> Self {
        match &result.outcome {
            Ok(_) => Self::Success {
                at,
                attempts: result.attempts,
            },
            Err(error) => Self::PermanentlyFailed {
                error: error.clone(),
                at,
                attempts: result.attempts,
            },
        }
    }
}

// ── DeploymentRequest ────────────────────────────────────────────

/// What a caller asks the scheduler to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub targets: Vec<DisplayId>,
    pub asset: AssetRef,
    /// `None` (or a time already passed) means now.
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl DeploymentRequest {
    pub fn now(targets: impl IntoIterator<Item = impl Into<DisplayId>>, asset: impl Into<String>) -> Self {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
            asset: AssetRef::new(asset),
            scheduled_for: None,
        }
    }

    pub fn at(mut self, when: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(when);
        self
    }

    /// Reject requests that could never run, or that sit outside the
    /// window the scheduler is willing to hold a timer for.
    pub fn validate(
        &self,
        now: DateTime<Utc>,
        max_past_due: chrono::Duration,
        max_future: chrono::Duration,
    ) -> Result<(), WallError> {
        if self.targets.is_empty() {
            return Err(WallError::JobValidation("no target displays".into()));
        }
        if self.asset.is_empty() {
            return Err(WallError::JobValidation("empty asset reference".into()));
        }
        if let Some(when) = self.scheduled_for {
            let oldest = now.checked_sub_signed(max_past_due);
            if oldest.is_some_and(|oldest| when < oldest) {
                return Err(WallError::JobValidation(format!(
                    "scheduled time {when} is too far in the past"
                )));
            }
            let latest = now.checked_add_signed(max_future);
            if latest.is_some_and(|latest| when > latest) {
                return Err(WallError::JobValidation(format!(
                    "scheduled time {when} is too far in the future"
                )));
            }
        }
        Ok(())
    }
}

// ── DeploymentJob ────────────────────────────────────────────────

/// A content deployment across a set of displays.
///
/// Everything here is persisted. A target's terminal outcome is never
/// overwritten; retrying means cutting a new revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentJob {
    pub id: JobId,
    pub revision: u32,
    pub parent: Option<JobId>,
    pub asset: AssetRef,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub phase: JobPhase,
    pub outcomes: BTreeMap<DisplayId, TargetOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentJob {
    /// A new revision-1 job. Duplicate targets collapse.
    pub fn from_request(request: DeploymentRequest, now: DateTime<Utc>) -> Self {
        let targets: BTreeSet<DisplayId> = request.targets.into_iter().collect();
        Self {
            id: JobId::new(),
            revision: 1,
            parent: None,
            asset: request.asset,
            scheduled_for: request.scheduled_for,
            phase: JobPhase::Pending,
            outcomes: targets.into_iter().map(|t| (t, TargetOutcome::Pending)).collect(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the job should wait for its timer.
    pub fn is_future(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_for.is_some_and(|when| when > now)
    }

    /// Correlation id used for every delivery of this revision.
    pub fn delivery_id(&self) -> String {
        format!("deploy-{}-r{}", self.id, self.revision)
    }

    pub fn targets(&self) -> impl Iterator<Item = &DisplayId> {
        self.outcomes.keys()
    }

    pub fn pending_targets(&self) -> Vec<DisplayId> {
        self.outcomes
            .iter()
            .filter(|(_, o)| !o.is_terminal())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn failed_targets(&self) -> Vec<DisplayId> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.is_failure())
            .map(|(id, _)| id.clone())
            .collect()
    }

    // ── Transitions ──────────────────────────────────────────────

    fn phase_error(&self, action: &'static str) -> WallError {
        WallError::JobPhase {
            job: self.id,
            action,
            phase: self.phase.to_string(),
        }
    }

    /// Valid from: `Pending`.
    pub fn arm(&mut self, now: DateTime<Utc>) -> Result<(), WallError> {
        match self.phase {
            JobPhase::Pending => {
                self.phase = JobPhase::Scheduled;
                self.updated_at = now;
                Ok(())
            }
            _ => Err(self.phase_error("arm")),
        }
    }

    /// Valid from: `Pending`, `Scheduled`, and `InProgress` when resuming.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), WallError> {
        match self.phase {
            JobPhase::Pending | JobPhase::Scheduled | JobPhase::InProgress => {
                self.phase = JobPhase::InProgress;
                self.updated_at = now;
                Ok(())
            }
            _ => Err(self.phase_error("start")),
        }
    }

    /// Valid from: `Pending`, `Scheduled`.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), WallError> {
        if !self.phase.is_cancellable() {
            return Err(self.phase_error("cancel"));
        }
        self.phase = JobPhase::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    /// Record a target's outcome. A terminal outcome is kept as is.
    ///
    /// Returns `false` if the target is unknown or already settled.
    pub fn record(&mut self, target: &DisplayId, outcome: TargetOutcome, now: DateTime<Utc>) -> bool {
        match self.outcomes.get_mut(target) {
            Some(current) if !current.is_terminal() => {
                *current = outcome;
                self.updated_at = now;
                true
            }
            _ => false,
        }
    }

    /// Derive the final phase once no target is pending.
    ///
    /// Valid from: `InProgress`.
    pub fn settle(&mut self, now: DateTime<Utc>) -> Result<JobPhase, WallError> {
        if self.phase != JobPhase::InProgress || self.outcomes.values().any(|o| !o.is_terminal()) {
            return Err(self.phase_error("settle"));
        }
        let succeeded = self.outcomes.values().filter(|o| o.is_success()).count();
        self.phase = if succeeded == self.outcomes.len() {
            JobPhase::Completed
        } else if succeeded == 0 {
            JobPhase::Failed
        } else {
            JobPhase::PartiallyFailed
        };
        self.updated_at = now;
        Ok(self.phase)
    }

    /// Cut revision n+1 targeting only the permanently failed displays.
    pub fn retry_revision(&self, now: DateTime<Utc>) -> Result<Self, WallError> {
        if !self.phase.is_retryable() {
            return Err(self.phase_error("retry"));
        }
        Ok(Self {
            id: JobId::new(),
            revision: self.revision + 1,
            parent: Some(self.id),
            asset: self.asset.clone(),
            scheduled_for: None,
            phase: JobPhase::Pending,
            outcomes: self
                .failed_targets()
                .into_iter()
                .map(|t| (t, TargetOutcome::Pending))
                .collect(),
            created_at: now,
            updated_at: now,
        })
    }
}
