//! CI-check aggregation and merge readiness, exactly as the decision table
//! consumes them.

use serde_json::Value;

use super::gh::{CheckRun, PrInfo};

const FAILURE_CONCLUSIONS: [&str; 4] = ["FAILURE", "CANCELLED", "TIMED_OUT", "ACTION_REQUIRED"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub passed: bool,
    pub failure: Option<String>,
    pub pending: bool,
}

impl CheckOutcome {
    fn pending() -> Self {
        Self {
            passed: false,
            failure: None,
            pending: true,
        }
    }
}

/// Aggregate a status-check rollup. An empty rollup means checks have not
/// started reporting yet and counts as pending; a retry must never trigger
/// while anything is still running.
pub fn analyze_checks(rollup: &[CheckRun]) -> CheckOutcome {
    if rollup.is_empty() {
        return CheckOutcome::pending();
    }

    let mut pending = false;
    let mut failures: Vec<String> = Vec::new();

    for check in rollup {
        let status = check.status.as_deref().unwrap_or("").to_uppercase();
        let conclusion = check.conclusion.as_deref().unwrap_or("").to_uppercase();

        if status != "COMPLETED" && conclusion.is_empty() {
            pending = true;
            continue;
        }
        if FAILURE_CONCLUSIONS.contains(&conclusion.as_str()) {
            failures.push(format!("{}:{}", check.label(), conclusion));
        }
    }

    if pending {
        return CheckOutcome::pending();
    }
    if !failures.is_empty() {
        return CheckOutcome {
            passed: false,
            failure: Some(failures.join("; ")),
            pending: false,
        };
    }
    CheckOutcome {
        passed: true,
        failure: None,
        pending: false,
    }
}

/// Merge readiness requires an explicit mergeable signal plus a CLEAN merge
/// state. `mergeable` shows up as a bool or as "MERGEABLE"/"CONFLICTING"
/// depending on the gh/GraphQL shape.
pub fn merge_clean(pr: &PrInfo) -> bool {
    let mergeable_ok = match &pr.mergeable {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(s)) => {
            let lowered = s.to_lowercase();
            lowered == "true" || lowered == "mergeable"
        }
        _ => false,
    };
    let status = pr
        .merge_state_status
        .as_deref()
        .unwrap_or("")
        .to_uppercase();
    mergeable_ok && status == "CLEAN"
}
