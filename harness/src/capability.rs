//! Runtime capability probing.
//!
//! Capabilities are discovered, not declared: each probe executes a minimal
//! synthetic compose document against the kernel under the same execution
//! contract as real fixtures, minus output validation, and records the tag
//! iff the subprocess exits zero. Any probe error means "capability absent";
//! probing never aborts the run.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tempfile::TempDir;
use tracing::debug;

use crate::context::RunContext;
use crate::executor;

pub const RESOLVER_REGISTER: &str = "resolver-register";
pub const REGISTRY_COMPONENTS: &str = "registry-components";
pub const TOML_PARSE: &str = "toml-parse";

/// Probe the binary once and return its immutable capability set.
pub fn detect(
    ctx: &RunContext,
    binary: &Path,
    env: &BTreeMap<String, String>,
) -> BTreeSet<String> {
    let mut capabilities = BTreeSet::new();

    let register = "compose:\n  \
        - call: compose://tooling/resolver/register@1\n    \
        in:\n      \
        components: []\n";
    if probe(ctx, binary, env, register, None) {
        // A working resolver implies the registry component set; skip the
        // weaker catalog probe.
        capabilities.insert(RESOLVER_REGISTER.to_string());
        capabilities.insert(REGISTRY_COMPONENTS.to_string());
    } else {
        let catalog_root = ctx
            .repo_root
            .join("tests")
            .join("fixtures")
            .join("registry");
        let collect = format!(
            "compose:\n  \
             - call: compose://tooling/registry_catalog/collect@0.1.0\n    \
             in:\n      \
             rootPath: \"{}\"\n      \
             catalogPath: \"catalog.json\"\n    \
             out:\n      \
             result: $\n",
            catalog_root.display()
        );
        let input = json!({ "projectPath": ctx.project_path });
        if probe(ctx, binary, env, &collect, Some(&input)) {
            capabilities.insert(REGISTRY_COMPONENTS.to_string());
        }
    }

    let toml_probe = "compose:\n  \
        - call: compose://tooling/toml/parse@1\n    \
        in:\n      \
        text: \"id = \\\"demo\\\"\"\n    \
        out:\n      \
        value: $\n";
    if probe(ctx, binary, env, toml_probe, None) {
        capabilities.insert(TOML_PARSE.to_string());
    }

    capabilities
}

/// Capabilities required but not detected. Empty means the fixture may run.
pub fn missing<'a>(required: &'a [String], capabilities: &BTreeSet<String>) -> Vec<&'a str> {
    required
        .iter()
        .filter(|capability| !capabilities.contains(capability.as_str()))
        .map(String::as_str)
        .collect()
}

fn probe(
    ctx: &RunContext,
    binary: &Path,
    env: &BTreeMap<String, String>,
    compose: &str,
    input: Option<&Value>,
) -> bool {
    match try_probe(ctx, binary, env, compose, input) {
        Ok(success) => success,
        Err(err) => {
            debug!(error = %format!("{err:#}"), "capability probe errored");
            false
        }
    }
}

fn try_probe(
    ctx: &RunContext,
    binary: &Path,
    env: &BTreeMap<String, String>,
    compose: &str,
    input: Option<&Value>,
) -> Result<bool> {
    // TempDirs clean up the probe fixtures on every exit path.
    let compose_dir = TempDir::new().context("create probe dir")?;
    let compose_path = compose_dir.path().join("compose.yaml");
    std::fs::write(&compose_path, compose)
        .with_context(|| format!("write {}", compose_path.display()))?;

    let mut args = vec![
        "--compose".to_string(),
        compose_path.display().to_string(),
    ];
    let mut input_guard: Option<TempDir> = None;
    if let Some(input) = input {
        let (dir, path) = write_probe_input(input)?;
        args.push("--input".to_string());
        args.push(path.display().to_string());
        input_guard = Some(dir);
    }

    let output = executor::run_command(binary, &args, &ctx.repo_root, env, ctx.timeout)?;
    drop(input_guard);
    Ok(!output.timed_out && output.code == Some(0))
}

fn write_probe_input(input: &Value) -> Result<(TempDir, PathBuf)> {
    let dir = TempDir::new().context("create probe input dir")?;
    let path = dir.path().join("input.json");
    let payload = serde_json::to_vec(input).context("serialize probe input")?;
    std::fs::write(&path, payload).with_context(|| format!("write {}", path.display()))?;
    Ok((dir, path))
}
