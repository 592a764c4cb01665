//! Mechanical prompt assembly for subtasks. The wording is part of the
//! operator contract: retry prompts append to this base text, so the section
//! headers stay stable.

use serde_json::{Map, Value};

use super::files::dedupe;

pub struct PromptSpec<'a> {
    pub repo: &'a str,
    pub plan_title: &'a str,
    pub objective: &'a str,
    pub subtask_id: &'a str,
    pub subtask_title: &'a str,
    pub description: &'a str,
    pub has_constraints: bool,
    pub definition_of_done: &'a [String],
    pub files_hint: &'a [String],
    pub depends_on: &'a [String],
    pub phase_boundary: &'a str,
}

pub fn build_prompt(spec: &PromptSpec<'_>) -> String {
    let mut lines: Vec<String> = vec![
        "You are Zoe executing one subtask from a multi-step repository plan.".to_string(),
        String::new(),
        format!("REPOSITORY: {}", spec.repo),
        format!("PLAN TITLE: {}", spec.plan_title),
        format!("SUBTASK: {} - {}", spec.subtask_id, spec.subtask_title),
        String::new(),
        "PLAN OBJECTIVE:".to_string(),
        spec.objective.to_string(),
        String::new(),
        "SUBTASK SCOPE:".to_string(),
        spec.description.to_string(),
    ];
    if !spec.depends_on.is_empty() {
        lines.push(String::new());
        lines.push("UPSTREAM DEPENDENCIES:".to_string());
        for dep in spec.depends_on {
            lines.push(format!(
                "- {dep} is already completed and should be treated as the starting point."
            ));
        }
    }
    lines.push(String::new());
    lines.push("DEFINITION OF DONE:".to_string());
    for item in spec.definition_of_done {
        lines.push(format!("- {item}"));
    }
    lines.push(String::new());
    lines.push("BOUNDARIES:".to_string());
    lines.push("- Do not access or print secrets, environment variables, or credentials.".to_string());
    lines.push("- Do not make unrelated refactors.".to_string());
    lines.push(
        "- Keep changes scoped to this subtask and avoid absorbing later subtasks unless required to keep the repo healthy."
            .to_string(),
    );
    lines.push(format!("- {}", spec.phase_boundary));
    if spec.has_constraints {
        lines.push("- Respect the explicit constraints attached to this plan.".to_string());
    }
    if !spec.files_hint.is_empty() {
        lines.push(String::new());
        lines.push("FILES TO CHECK FIRST:".to_string());
        for item in spec.files_hint {
            lines.push(format!("- {item}"));
        }
    }
    lines.push(String::new());
    lines.push("FIRST STEP:".to_string());
    lines.push(
        "- Inspect the referenced files, write a short execution plan, then implement only this subtask."
            .to_string(),
    );
    lines.join("\n")
}

/// Three global items every subtask carries, extended by any explicit
/// `constraints.definitionOfDone` entries.
pub fn default_definition_of_done(constraints: &Map<String, Value>) -> Vec<String> {
    let mut dod = vec![
        "Implement the requested outcome end-to-end for this subtask.".to_string(),
        "Preserve unrelated behavior and formatting.".to_string(),
        "Run the most relevant local validation available before finishing.".to_string(),
    ];
    if let Some(Value::Array(explicit)) = constraints.get("definitionOfDone") {
        for item in explicit {
            if let Some(text) = item.as_str() {
                let text = text.trim();
                if !text.is_empty() {
                    dod.push(text.to_string());
                }
            }
        }
    }
    dedupe(dod)
}

pub fn merge_definition_of_done(phase_items: &[&str], global_items: &[String]) -> Vec<String> {
    dedupe(
        phase_items
            .iter()
            .map(|s| s.to_string())
            .chain(global_items.iter().cloned())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prompt_contains_all_sections_in_order() {
        let dod = vec!["Do it.".to_string()];
        let hints = vec!["src/auth.py".to_string()];
        let deps = vec!["S1".to_string()];
        let prompt = build_prompt(&PromptSpec {
            repo: "demo",
            plan_title: "Fix auth",
            objective: "Fix the auth flow.",
            subtask_id: "S2",
            subtask_title: "Land the primary implementation",
            description: "Implement the change.",
            has_constraints: true,
            definition_of_done: &dod,
            files_hint: &hints,
            depends_on: &deps,
            phase_boundary: "Focus on the code path changes.",
        });

        let sections = [
            "You are Zoe executing one subtask",
            "REPOSITORY: demo",
            "SUBTASK: S2 - Land the primary implementation",
            "PLAN OBJECTIVE:",
            "SUBTASK SCOPE:",
            "UPSTREAM DEPENDENCIES:",
            "- S1 is already completed",
            "DEFINITION OF DONE:",
            "BOUNDARIES:",
            "- Do not access or print secrets",
            "- Respect the explicit constraints",
            "FILES TO CHECK FIRST:",
            "- src/auth.py",
            "FIRST STEP:",
        ];
        let mut cursor = 0;
        for section in sections {
            let found = prompt[cursor..]
                .find(section)
                .unwrap_or_else(|| panic!("missing section: {section}"));
            cursor += found;
        }
    }

    #[test]
    fn prompt_omits_empty_sections() {
        let prompt = build_prompt(&PromptSpec {
            repo: "demo",
            plan_title: "t",
            objective: "o",
            subtask_id: "S1",
            subtask_title: "s",
            description: "d",
            has_constraints: false,
            definition_of_done: &[],
            files_hint: &[],
            depends_on: &[],
            phase_boundary: "b",
        });
        assert!(!prompt.contains("UPSTREAM DEPENDENCIES"));
        assert!(!prompt.contains("FILES TO CHECK FIRST"));
        assert!(!prompt.contains("Respect the explicit constraints"));
    }

    #[test]
    fn default_dod_merges_explicit_constraint_items() {
        let mut constraints = Map::new();
        constraints.insert(
            "definitionOfDone".into(),
            json!(["Keep the auth behavior backward compatible.", "  "]),
        );
        let dod = default_definition_of_done(&constraints);
        assert_eq!(dod.len(), 4);
        assert!(dod.contains(&"Keep the auth behavior backward compatible.".to_string()));
    }

    #[test]
    fn merge_dedupes_overlapping_items() {
        let global = vec!["Shared item.".to_string()];
        let merged = merge_definition_of_done(&["Phase item.", "Shared item."], &global);
        assert_eq!(merged, vec!["Phase item.", "Shared item."]);
    }
}
