//! Request classification: which phases does the objective actually ask for.

use serde_json::{Map, Value};

pub const CODE_CHANGE_TERMS: &[&str] = &[
    "implement", "fix", "build", "create", "add", "update", "refactor", "migrate", "wire",
    "integrate", "repair", "ship", "support", "修复", "实现", "新增", "重构",
];

pub const FOUNDATION_SPLIT_TERMS: &[&str] = &[
    "refactor", "migrate", "extract", "restructure", "integrate", "wire", "multi-step", "重构",
    "迁移", "拆分",
];

pub const DOC_ACTION_TERMS: &[&str] = &[
    "document", "documenter", "write docs", "update docs", "update documentation", "add docs",
    "refresh readme", "readme", "changelog", "guide", "manual", "更新文档", "补充文档", "完善文档",
    "撰写文档", "文档更新", "说明文档", "操作手册",
];

pub const ANALYSIS_TERMS: &[&str] = &[
    "investigate", "analyze", "audit", "review", "triage", "inspect", "understand", "progress",
    "status", "read", "current state", "confirm", "survey", "assess", "inventory", "分析", "审查",
    "排查", "进度", "阅读", "确认", "现状", "调研", "盘点",
];

const CONJUNCTION_MARKERS: &[&str] = &[" and ", " then ", " also ", " plus ", "以及", "并且"];

pub fn contains_any(text: &str, terms: &[&str]) -> bool {
    let lowered = text.to_lowercase();
    terms.iter().any(|term| lowered.contains(term))
}

/// Split the caller's file hints into implementation / test / doc candidates
/// by path shape.
pub fn partition_files(files_hint: &[String]) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut impl_files = Vec::new();
    let mut tests = Vec::new();
    let mut docs = Vec::new();
    for item in files_hint {
        let lowered = item.to_lowercase();
        if lowered.contains("tests/")
            || lowered.starts_with("tests")
            || lowered.contains("test_")
            || lowered.ends_with("_test.py")
            || lowered.contains("/spec")
            || lowered.contains("__tests__")
        {
            tests.push(item.clone());
        } else if lowered == "readme.md"
            || lowered.starts_with("docs/")
            || lowered.ends_with(".md")
            || lowered.contains("changelog")
        {
            docs.push(item.clone());
        } else {
            impl_files.push(item.clone());
        }
    }
    (impl_files, tests, docs)
}

#[derive(Debug, Clone)]
pub struct TaskProfile {
    pub files_hint: Vec<String>,
    pub implementation_files: Vec<String>,
    pub test_files: Vec<String>,
    pub doc_files: Vec<String>,
    pub docs_requested: bool,
    pub tests_requested: bool,
    pub docs_only: bool,
    pub analysis_only: bool,
    pub requires_foundation_split: bool,
}

pub fn build_task_profile(
    title: &str,
    objective: &str,
    files_hint: &[String],
    has_explicit_files_hint: bool,
    constraints: &Map<String, Value>,
) -> TaskProfile {
    let combined = format!("{title}\n{objective}");
    let (impl_files, test_files, doc_files) = partition_files(files_hint);

    let docs_requested = contains_any(&combined, DOC_ACTION_TERMS)
        || (has_explicit_files_hint && !doc_files.is_empty());
    let code_requested = contains_any(&combined, CODE_CHANGE_TERMS)
        || (has_explicit_files_hint && !impl_files.is_empty());
    let analysis_requested = contains_any(&combined, ANALYSIS_TERMS);
    let docs_only =
        docs_requested && !analysis_requested && !code_requested && test_files.is_empty();
    let analysis_only = analysis_requested && !code_requested && !docs_requested;

    let mut complexity_score = 0u32;
    if objective.chars().count() >= 140 {
        complexity_score += 1;
    }
    if files_hint.len() >= 3 {
        complexity_score += 1;
    }
    if !constraints.is_empty() {
        complexity_score += 1;
    }
    if contains_any(&combined, FOUNDATION_SPLIT_TERMS) {
        complexity_score += 1;
    }
    let combined_lower = combined.to_lowercase();
    if CONJUNCTION_MARKERS
        .iter()
        .any(|marker| combined_lower.contains(marker))
    {
        complexity_score += 1;
    }

    let tests_requested = !docs_only && !analysis_only;
    let requires_foundation_split = !docs_only && !analysis_only && complexity_score >= 3;

    TaskProfile {
        files_hint: files_hint.to_vec(),
        implementation_files: impl_files,
        test_files,
        doc_files,
        docs_requested,
        tests_requested,
        docs_only,
        analysis_only,
        requires_foundation_split,
    }
}
