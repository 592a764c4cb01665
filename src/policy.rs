//! Safety filter applied to the objective text before planning. Matching is
//! purely lexical; the categories mirror the operator policy attached to
//! every plan's constraints.

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::{PlannerError, Result};

const RISK_PATTERNS: [(&str, &str); 2] = [
    (
        "secret_exfiltration",
        r"(?i)(exfiltrate|dump|print|show|cat).{0,40}(secret|token|env|environment|ssh|credential)",
    ),
    (
        "dangerous_command",
        r"(?i)(rm\s+-rf|chmod\s+777|curl.+\|\s*sh|wget.+\|\s*sh)",
    ),
];

fn compiled_patterns() -> &'static Vec<(&'static str, Regex)> {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        RISK_PATTERNS
            .iter()
            .map(|(name, pattern)| {
                (*name, Regex::new(pattern).expect("valid risk pattern"))
            })
            .collect()
    })
}

/// Names of all risk categories the objective triggers, in declaration order.
pub fn detect_risk_flags(objective: &str) -> Vec<String> {
    compiled_patterns()
        .iter()
        .filter(|(_, pattern)| pattern.is_match(objective))
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Reject objectives that trigger any risk category; otherwise return the
/// (empty) flag list so the planner can stamp it into `context.riskFlags`.
pub fn validate_task_policy(objective: &str) -> Result<Vec<String>> {
    let flags = detect_risk_flags(objective);
    if !flags.is_empty() {
        return Err(PlannerError::PolicyViolation(format!(
            "Task blocked by planner policy: {}",
            flags.join(", ")
        )));
    }
    Ok(flags)
}
