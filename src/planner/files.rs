//! Repository file discovery and per-phase hint ranking. Discovery never
//! leaves the repo root, skips dot-entries, and stays within three path
//! segments of each scan root so huge monorepos cannot blow up a plan.

use std::collections::HashSet;
use std::path::Path;

use regex::Regex;
use walkdir::WalkDir;

use super::profile::TaskProfile;

pub const FOUNDATION_FILE_TERMS: &[&str] = &[
    "core", "base", "schema", "model", "service", "helper", "lib", "utils", "session", "client",
    "adapter",
];

pub const IMPLEMENTATION_FILE_TERMS: &[&str] = &[
    "route", "handler", "controller", "api", "auth", "view", "screen", "component", "feature",
    "flow",
];

pub const DOC_FILE_TERMS: &[&str] = &["readme", "docs", "guide", "manual", "runbook", "changelog"];

pub const VALIDATION_FILE_TERMS: &[&str] = &["test", "spec", "fixture", "integration", "e2e"];

const REPO_SCAN_ROOTS: &[&str] = &[
    "", "src", "app", "server", "backend", "frontend", "scripts", "docs", "prisma", "tests",
];

const REPO_SCAN_PRIORITIES: &[&str] = &[
    "readme.md",
    "package.json",
    "pyproject.toml",
    "setup.py",
    "requirements.txt",
    "cargo.toml",
    "go.mod",
    "tsconfig.json",
    "next.config.js",
    "prisma/schema.prisma",
    "src/",
    "app/",
    "server/",
    "scripts/",
    "tests/",
    "docs/",
];

const CODE_FILE_EXTENSIONS: &[&str] = &[
    ".py", ".ts", ".tsx", ".js", ".jsx", ".go", ".rs", ".java", ".kt", ".rb", ".php", ".cs",
    ".sql", ".prisma", ".sh",
];

const CONFIG_FALLBACK_FILES: &[&str] = &[
    "package.json",
    "pyproject.toml",
    "go.mod",
    "cargo.toml",
    "tsconfig.json",
    "next.config.js",
    "prisma/schema.prisma",
];

pub fn dedupe(items: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut result = Vec::new();
    for item in items {
        let cleaned = item.trim().to_string();
        if cleaned.is_empty() || seen.contains(&cleaned) {
            continue;
        }
        seen.insert(cleaned.clone());
        result.push(cleaned);
    }
    result
}

/// Lowercased word-ish tokens (length ≥ 3) from the request text, deduped in
/// first-seen order. Used as a weak relevance signal when ranking files.
pub fn keyword_tokens(text: &str) -> Vec<String> {
    let pattern = Regex::new(r"[A-Za-z][A-Za-z0-9_-]{2,}").expect("valid token pattern");
    let lowered = text.to_lowercase();
    let mut seen: HashSet<String> = HashSet::new();
    let mut result = Vec::new();
    for token in pattern.find_iter(&lowered) {
        let token = token.as_str().to_string();
        if seen.insert(token.clone()) {
            result.push(token);
        }
    }
    result
}

fn ends_with_any(lowered: &str, suffixes: &[&str]) -> bool {
    suffixes.iter().any(|s| lowered.ends_with(s))
}

fn priority_score(path: &str) -> i64 {
    let lowered = path.to_lowercase();
    let mut score = 0i64;
    for (index, marker) in REPO_SCAN_PRIORITIES.iter().enumerate() {
        let index = index as i64;
        if marker.ends_with('/') {
            if lowered.starts_with(marker) {
                score += 100 - index;
            }
        } else if lowered == *marker {
            score += 120 - index;
        } else if lowered.contains(marker) {
            score += 40 - index;
        }
    }
    if ends_with_any(&lowered, &[".md", ".txt"]) {
        score -= 5;
    }
    score
}

fn code_priority_score(path: &str) -> i64 {
    let lowered = path.to_lowercase();
    if lowered.contains(".bak") || ends_with_any(&lowered, &["~", ".tmp", ".orig"]) {
        return -100;
    }
    if ends_with_any(&lowered, &[".md", ".txt", ".css", ".scss", ".sass"]) {
        return -50;
    }
    if lowered.contains("test") || lowered.contains("spec") {
        return -20;
    }
    let mut score = 0i64;
    if lowered.starts_with("src/lib/")
        || lowered.starts_with("src/app/")
        || lowered.starts_with("src/components/")
    {
        score += 95;
    } else if lowered.starts_with("src/")
        || lowered.starts_with("app/")
        || lowered.starts_with("server/")
        || lowered.starts_with("backend/")
        || lowered.starts_with("frontend/")
    {
        score += 75;
    } else if lowered.starts_with("scripts/") || lowered.starts_with("prisma/") {
        score += 50;
    }
    if ends_with_any(&lowered, CODE_FILE_EXTENSIONS) {
        score += 35;
    }
    if CONFIG_FALLBACK_FILES.contains(&lowered.as_str()) {
        score += 10;
    }
    score += IMPLEMENTATION_FILE_TERMS
        .iter()
        .filter(|term| lowered.contains(*term))
        .count() as i64
        * 6;
    score += FOUNDATION_FILE_TERMS
        .iter()
        .filter(|term| lowered.contains(*term))
        .count() as i64
        * 4;
    score
}

fn test_priority_score(path: &str) -> i64 {
    let lowered = path.to_lowercase();
    if lowered.contains(".bak") || ends_with_any(&lowered, &["~", ".tmp", ".orig"]) {
        return -100;
    }
    if ends_with_any(&lowered, &[".md", ".txt", ".json", ".css", ".scss", ".sass"]) {
        return -100;
    }
    let mut score = 0i64;
    let mut is_test_like = false;
    if lowered.contains("tests/") || lowered.starts_with("tests") {
        score += 90;
        is_test_like = true;
    }
    if lowered.contains("test_")
        || ends_with_any(
            &lowered,
            &["_test.py", ".spec.ts", ".spec.js", ".test.ts", ".test.js"],
        )
    {
        score += 70;
        is_test_like = true;
    }
    if lowered.contains("__tests__") || lowered.contains("/spec") {
        score += 60;
        is_test_like = true;
    }
    if !is_test_like {
        return 0;
    }
    if ends_with_any(&lowered, CODE_FILE_EXTENSIONS) {
        score += 15;
    }
    score
}

/// Rank candidates by preferred-term hits (strong) and request-keyword hits
/// (weak), keep the positively scored head, then backfill from `fallback`.
pub fn ranked_file_subset(
    candidates: &[String],
    preferred_terms: &[&str],
    context_terms: &[String],
    fallback: Vec<String>,
    max_items: usize,
) -> Vec<String> {
    if candidates.is_empty() {
        let mut deduped = dedupe(fallback);
        deduped.truncate(max_items);
        return deduped;
    }

    let mut scored: Vec<(i64, usize, &String)> = candidates
        .iter()
        .enumerate()
        .map(|(index, path)| {
            let lowered = path.to_lowercase();
            let mut score = 0i64;
            score += preferred_terms
                .iter()
                .filter(|term| lowered.contains(*term))
                .count() as i64
                * 4;
            score += context_terms
                .iter()
                .filter(|term| lowered.contains(term.as_str()))
                .count() as i64;
            (score, index, path)
        })
        .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    let mut chosen: Vec<String> = scored
        .iter()
        .filter(|(score, _, _)| *score > 0)
        .take(max_items)
        .map(|(_, _, path)| (*path).clone())
        .collect();
    if chosen.is_empty() {
        chosen = candidates.iter().take(max_items).cloned().collect();
    }
    chosen.extend(fallback);
    let mut deduped = dedupe(chosen);
    deduped.truncate(max_items);
    deduped
}

fn relative_string(path: &Path, root: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// Shallow scan used when the caller gave no hints at all: top-level files of
/// each scan root plus the first few files of each top-level directory.
pub fn discover_repo_file_hints(repo_root: &Path, max_items: usize) -> Vec<String> {
    if !repo_root.is_dir() {
        return Vec::new();
    }

    let mut candidates: Vec<String> = Vec::new();
    for relative_root in REPO_SCAN_ROOTS {
        let root = if relative_root.is_empty() {
            repo_root.to_path_buf()
        } else {
            repo_root.join(relative_root)
        };
        if !root.is_dir() {
            continue;
        }
        let Ok(read) = std::fs::read_dir(&root) else {
            continue;
        };
        let mut entries: Vec<_> = read.filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.file_name().to_string_lossy().to_lowercase());
        for entry in entries {
            if is_hidden(&entry.file_name()) {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                let Ok(nested_read) = std::fs::read_dir(&path) else {
                    continue;
                };
                let mut nested: Vec<_> = nested_read.filter_map(|e| e.ok()).collect();
                nested.sort_by_key(|e| e.file_name().to_string_lossy().to_lowercase());
                for child in nested.into_iter().take(4) {
                    if is_hidden(&child.file_name()) || child.path().is_dir() {
                        continue;
                    }
                    if let Some(rel) = relative_string(&child.path(), repo_root) {
                        candidates.push(rel);
                    }
                }
            } else if let Some(rel) = relative_string(&path, repo_root) {
                candidates.push(rel);
            }
        }
    }

    let mut unique = dedupe(candidates);
    unique.sort_by(|a, b| {
        priority_score(b)
            .cmp(&priority_score(a))
            .then(a.to_lowercase().cmp(&b.to_lowercase()))
    });
    unique.truncate(max_items);
    unique
}

#[derive(Debug, Clone, Default)]
pub struct PhaseHints {
    pub implementation: Vec<String>,
    pub tests: Vec<String>,
    pub docs: Vec<String>,
}

/// Deep scan (depth ≤ 3 per scan root) partitioned into implementation,
/// test, and doc candidates.
pub fn discover_repo_phase_hints(repo_root: &Path) -> PhaseHints {
    if !repo_root.is_dir() {
        return PhaseHints::default();
    }

    let mut candidates: Vec<String> = Vec::new();
    for relative_root in REPO_SCAN_ROOTS {
        let root = if relative_root.is_empty() {
            repo_root.to_path_buf()
        } else {
            repo_root.join(relative_root)
        };
        if !root.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&root)
            .max_depth(3)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()))
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(rel) = relative_string(entry.path(), repo_root) {
                candidates.push(rel);
            }
        }
    }

    let unique = dedupe(candidates);
    let mut docs: Vec<String> = unique
        .iter()
        .filter(|p| {
            let lowered = p.to_lowercase();
            lowered.ends_with(".md") || lowered.starts_with("docs/")
        })
        .cloned()
        .collect();
    let mut tests: Vec<String> = unique
        .iter()
        .filter(|p| test_priority_score(p) > 0)
        .cloned()
        .collect();
    let test_set: HashSet<&String> = tests.iter().collect();
    let mut implementation: Vec<String> = unique
        .iter()
        .filter(|p| code_priority_score(p) > 0 && !test_set.contains(p))
        .cloned()
        .collect();
    let config_fallback: Vec<String> = unique
        .iter()
        .filter(|p| CONFIG_FALLBACK_FILES.contains(&p.to_lowercase().as_str()))
        .cloned()
        .collect();

    implementation.sort_by(|a, b| {
        code_priority_score(b)
            .cmp(&code_priority_score(a))
            .then(a.to_lowercase().cmp(&b.to_lowercase()))
    });
    tests.sort_by(|a, b| {
        test_priority_score(b)
            .cmp(&test_priority_score(a))
            .then(a.to_lowercase().cmp(&b.to_lowercase()))
    });
    docs.sort_by(|a, b| {
        priority_score(b)
            .cmp(&priority_score(a))
            .then(a.to_lowercase().cmp(&b.to_lowercase()))
    });

    let mut implementation = dedupe(
        implementation
            .into_iter()
            .chain(config_fallback)
            .collect(),
    );
    implementation.truncate(6);
    tests.truncate(4);
    docs.truncate(3);

    PhaseHints {
        implementation,
        tests,
        docs,
    }
}

#[derive(Debug, Clone)]
pub struct PhaseFiles {
    pub foundation: Vec<String>,
    pub implementation: Vec<String>,
    pub validation: Vec<String>,
    pub documentation: Vec<String>,
}

fn non_empty_or(primary: Vec<String>, alternative: Vec<String>) -> Vec<String> {
    if primary.is_empty() {
        alternative
    } else {
        primary
    }
}

/// Combine explicit hints with discovery and produce a ranked ≤4-path subset
/// per phase, biased toward that phase's vocabulary.
pub fn phase_files(
    repo_root: &Path,
    title: &str,
    objective: &str,
    profile: &TaskProfile,
    has_explicit_files_hint: bool,
) -> PhaseFiles {
    let context_terms = keyword_tokens(&format!("{title} {objective}"));
    let discovered = discover_repo_phase_hints(repo_root);

    let (implementation_files, test_files, doc_files) = if has_explicit_files_hint {
        (
            non_empty_or(
                profile.implementation_files.clone(),
                discovered.implementation,
            ),
            non_empty_or(profile.test_files.clone(), discovered.tests),
            non_empty_or(profile.doc_files.clone(), discovered.docs),
        )
    } else {
        (
            discovered.implementation,
            discovered.tests,
            discovered.docs,
        )
    };

    let foundation = ranked_file_subset(
        &implementation_files,
        FOUNDATION_FILE_TERMS,
        &context_terms,
        non_empty_or(
            implementation_files.iter().take(2).cloned().collect(),
            profile.files_hint.iter().take(2).cloned().collect(),
        ),
        4,
    );
    let implementation = ranked_file_subset(
        &implementation_files,
        IMPLEMENTATION_FILE_TERMS,
        &context_terms,
        non_empty_or(
            implementation_files.iter().take(3).cloned().collect(),
            foundation.clone(),
        ),
        4,
    );
    let validation = ranked_file_subset(
        &non_empty_or(test_files.clone(), implementation_files.clone()),
        VALIDATION_FILE_TERMS,
        &context_terms,
        non_empty_or(
            test_files
                .iter()
                .take(2)
                .chain(implementation.iter().take(2))
                .cloned()
                .collect(),
            vec!["tests/".to_string()],
        ),
        4,
    );
    let documentation = ranked_file_subset(
        &non_empty_or(doc_files.clone(), profile.files_hint.clone()),
        DOC_FILE_TERMS,
        &context_terms,
        non_empty_or(
            doc_files.iter().take(2).cloned().collect(),
            vec!["README.md".to_string(), "docs/".to_string()],
        ),
        4,
    );

    PhaseFiles {
        foundation,
        implementation,
        validation,
        documentation,
    }
}
