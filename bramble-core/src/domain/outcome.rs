//! Run-to-completion unit outcomes

use k8s_openapi::api::batch::v1::Job;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Observed state of a clone or task job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum UnitOutcome {
    Succeeded,
    Failed { reason: String },
    Running,
}

impl UnitOutcome {
    /// Derives the outcome from job conditions and counters
    ///
    /// A `Complete` or `Failed` condition set to `True` is final. Without
    /// one, a non-zero `succeeded` count still means success; anything else
    /// is still running (including jobs whose pods are retrying).
    pub fn from_job(job: &Job) -> Self {
        let Some(status) = job.status.as_ref() else {
            return UnitOutcome::Running;
        };

        let conditions = status.conditions.iter().flatten();
        for condition in conditions.filter(|c| c.status == "True") {
            match condition.type_.as_str() {
                "Complete" => return UnitOutcome::Succeeded,
                "Failed" => {
                    let reason = condition
                        .message
                        .clone()
                        .or_else(|| condition.reason.clone())
                        .unwrap_or_else(|| {
                            format!("{} failed pod(s)", status.failed.unwrap_or(0))
                        });
                    return UnitOutcome::Failed { reason };
                }
                _ => {}
            }
        }

        if status.succeeded.unwrap_or(0) > 0 {
            UnitOutcome::Succeeded
        } else {
            UnitOutcome::Running
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, UnitOutcome::Running)
    }
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitOutcome::Succeeded => f.write_str("succeeded"),
            UnitOutcome::Failed { reason } => write!(f, "failed ({})", reason),
            UnitOutcome::Running => f.write_str("running"),
        }
    }
}
