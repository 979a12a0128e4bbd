//! Fixture collection from two heterogeneous sources.
//!
//! The compose fixtures are a fixed table owned by the harness; suite cases
//! are discovered by walking `packages/` for JSON suite files under a `tests`
//! directory. Both feed one ordered sequence.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::capability;
use crate::context::RunContext;

/// One unit of executable test material.
#[derive(Debug, Clone)]
pub enum Fixture {
    Compose(ComposeFixture),
    SuiteCase(SuiteCase),
}

impl Fixture {
    pub fn label(&self) -> String {
        match self {
            Fixture::Compose(fixture) => fixture.label.clone(),
            Fixture::SuiteCase(case) => format!("{} :: {}", case.suite_id, case.name),
        }
    }

    pub fn requires(&self) -> &[String] {
        match self {
            Fixture::Compose(fixture) => &fixture.requires,
            Fixture::SuiteCase(case) => &case.requires,
        }
    }
}

/// A standalone pipeline-document fixture.
#[derive(Debug, Clone)]
pub struct ComposeFixture {
    pub label: String,
    pub file: PathBuf,
    /// Serialize a `projectPath` input object for the kernel.
    pub needs_project_path: bool,
    pub requires: Vec<String>,
    /// Walk the kernel output for embedded `success: false` markers.
    pub check_output: bool,
}

/// A named case drawn from a suite file.
#[derive(Debug, Clone)]
pub struct SuiteCase {
    pub suite_id: String,
    pub name: String,
    pub input: Value,
    pub compose: Value,
    pub expected: Value,
    pub options: Option<Value>,
    pub before: Option<Value>,
    pub requires: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SuiteFile {
    #[serde(default)]
    kind: String,
    id: Option<String>,
    /// Explicitly declared capability requirements; wins over the id heuristic.
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    tests: Vec<SuiteCaseRaw>,
}

#[derive(Debug, Deserialize)]
struct SuiteCaseRaw {
    name: String,
    #[serde(default)]
    input: Value,
    #[serde(default)]
    compose: Value,
    #[serde(default)]
    expected: Value,
    options: Option<Value>,
    before: Option<Value>,
}

/// The fixed compose fixture table. Part of the harness configuration, not
/// discovered from disk.
pub fn builtin_compose_fixtures(repo_root: &Path) -> Vec<ComposeFixture> {
    let tests_dir = repo_root.join("tests");
    vec![
        ComposeFixture {
            label: "components.registry".to_string(),
            file: tests_dir.join("components.registry.yaml"),
            needs_project_path: true,
            requires: vec![capability::REGISTRY_COMPONENTS.to_string()],
            check_output: false,
        },
        ComposeFixture {
            label: "components.registry.tests".to_string(),
            file: tests_dir.join("components.registry.tests.yaml"),
            needs_project_path: true,
            requires: vec![capability::REGISTRY_COMPONENTS.to_string()],
            check_output: true,
        },
        ComposeFixture {
            label: "components.std_primitives".to_string(),
            file: tests_dir.join("components.std_primitives.yaml"),
            needs_project_path: false,
            requires: Vec::new(),
            check_output: true,
        },
        ComposeFixture {
            label: "components.verify.metadata".to_string(),
            file: tests_dir.join("components.verify.metadata.yaml"),
            needs_project_path: true,
            requires: vec![capability::TOML_PARSE.to_string()],
            check_output: false,
        },
    ]
}

/// Collect every fixture for the run, compose fixtures first, then suite
/// cases in discovery order.
pub fn collect(ctx: &RunContext) -> Result<Vec<Fixture>> {
    let mut fixtures: Vec<Fixture> = builtin_compose_fixtures(&ctx.repo_root)
        .into_iter()
        .map(Fixture::Compose)
        .collect();
    for case in collect_suite_cases(&ctx.repo_root.join("packages"))? {
        fixtures.push(Fixture::SuiteCase(case));
    }
    Ok(fixtures)
}

/// Walk `root` for suite files and flatten their cases in declaration order.
///
/// Only files that type-check as a test suite (`kind == "test"`, non-empty
/// `tests`) are materialized; other JSON under the walk is skipped silently.
pub fn collect_suite_cases(root: &Path) -> Result<Vec<SuiteCase>> {
    let mut cases = Vec::new();
    if !root.exists() {
        return Ok(cases);
    }

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_dependency_cache(entry));
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        if !in_tests_dir(path) {
            continue;
        }
        let Some(suite) = parse_suite(path) else {
            continue;
        };
        let suite_id = suite
            .id
            .clone()
            .unwrap_or_else(|| path.display().to_string());
        let requires = suite_requirements(&suite, &suite_id);
        for raw in suite.tests {
            cases.push(SuiteCase {
                suite_id: suite_id.clone(),
                name: raw.name,
                input: default_if_null(raw.input, json!({})),
                compose: default_if_null(raw.compose, json!([])),
                expected: default_if_null(raw.expected, json!({})),
                options: raw.options,
                before: raw.before,
                requires: requires.clone(),
            });
        }
    }
    Ok(cases)
}

fn is_dependency_cache(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && matches!(
            entry.file_name().to_str(),
            Some("node_modules") | Some("target")
        )
}

fn in_tests_dir(path: &Path) -> bool {
    path.parent().is_some_and(|parent| {
        parent
            .components()
            .any(|component| component.as_os_str() == "tests")
    })
}

fn parse_suite(path: &Path) -> Option<SuiteFile> {
    let raw = std::fs::read_to_string(path).ok()?;
    let value: Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "skipping unparsable json");
            return None;
        }
    };
    if value.get("kind").and_then(Value::as_str) != Some("test") {
        return None;
    }
    match serde_json::from_value::<SuiteFile>(value) {
        Ok(suite) if !suite.tests.is_empty() => Some(suite),
        Ok(_) => None,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "skipping malformed suite");
            None
        }
    }
}

/// Requirements for a suite's cases.
///
/// An explicit `requires` declaration wins; the substring heuristic on the
/// suite id is a compatibility fallback only.
fn suite_requirements(suite: &SuiteFile, suite_id: &str) -> Vec<String> {
    if !suite.requires.is_empty() {
        return suite.requires.clone();
    }
    let mut requirements = Vec::new();
    if suite_id.contains("registry_catalog") {
        requirements.push(capability::REGISTRY_COMPONENTS.to_string());
    }
    if suite_id.contains("tooling.mcp") {
        requirements.push(capability::RESOLVER_REGISTER.to_string());
    }
    requirements
}

fn default_if_null(value: Value, default: Value) -> Value {
    if value.is_null() {
        default
    } else {
        value
    }
}
