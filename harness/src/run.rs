//! Run orchestration: resolve → provision → probe → execute → report.
//!
//! Kernels are processed one at a time, fully serialized; within one kernel
//! the fixtures execute strictly in collection order. A manifest or
//! provisioning failure aborts the run; fixture failures are recorded and the
//! run continues.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use tracing::{debug, info};

use crate::capability;
use crate::config::HarnessConfig;
use crate::context::{RunContext, RELEASE_VERSION_ENV};
use crate::errors::HarnessError;
use crate::executor;
use crate::exit_codes;
use crate::fixture;
use crate::manifest;
use crate::matrix::{self, ExecutionResult, Status};
use crate::provision;

/// A recorded fixture failure for the consolidated listing.
#[derive(Debug)]
pub struct FailureRecord {
    pub kernel: String,
    pub label: String,
    pub message: String,
}

/// Run the fixtures against the requested kernels and return the process
/// exit code.
pub fn run(
    repo_root: &Path,
    kernels: &[String],
    version_override: Option<&str>,
    timeout_override: Option<u64>,
) -> Result<i32> {
    let config = HarnessConfig::load(repo_root)?;
    let kernels = if kernels.is_empty() {
        config.kernels()
    } else {
        kernels.to_vec()
    };
    let ctx = RunContext::new(repo_root, &config, timeout_override);

    let version_override = version_override
        .map(str::to_string)
        .or_else(|| std::env::var(RELEASE_VERSION_ENV).ok());
    let client = Client::new();
    let release_manifest =
        manifest::resolve(&client, &ctx.release_repo, version_override.as_deref())?;
    println!("Using release {}", release_manifest.version);

    let fixtures = fixture::collect(&ctx).context("collect fixtures")?;
    debug!(count = fixtures.len(), "fixtures collected");

    let mut results: Vec<ExecutionResult> = Vec::new();
    let mut failures: Vec<FailureRecord> = Vec::new();

    for kernel_id in &kernels {
        let info = release_manifest
            .kernels
            .get(kernel_id)
            .ok_or_else(|| HarnessError::UnknownKernel {
                kernel: kernel_id.clone(),
            })?;

        println!("\n=== Running tests with kernel '{kernel_id}' ===");
        let binary =
            provision::ensure_binary(&ctx, &client, kernel_id, &release_manifest.version, info)?;
        prepare_workspaces(&ctx.repo_root)?;

        let kernel_cache = ctx.kernel_cache_dir(kernel_id);
        fs::create_dir_all(&kernel_cache)
            .with_context(|| format!("create {}", kernel_cache.display()))?;
        let env = ctx.kernel_env(kernel_id);

        let capabilities = capability::detect(&ctx, &binary, &env);
        if capabilities.is_empty() {
            println!("  capabilities: none detected");
        } else {
            let listed: Vec<&str> = capabilities.iter().map(String::as_str).collect();
            println!("  capabilities: {}", listed.join(", "));
        }
        info!(kernel = %kernel_id, capabilities = ?capabilities, "kernel probed");

        for fixture in &fixtures {
            let outcome =
                executor::run_fixture(&ctx, kernel_id, &binary, fixture, &capabilities, &env);
            match outcome.result.status {
                Status::Skip => println!(
                    "  - {} (skipped: missing {})",
                    outcome.result.label,
                    outcome.missing.join(", ")
                ),
                Status::Pass => println!("  ✓ {}", outcome.result.label),
                Status::Fail => {
                    let message = outcome.failure.unwrap_or_default();
                    eprintln!("  ✗ {} ({message})", outcome.result.label);
                    failures.push(FailureRecord {
                        kernel: kernel_id.clone(),
                        label: outcome.result.label.clone(),
                        message,
                    });
                }
            }
            results.push(outcome.result);
        }
    }

    println!("\nMatrix:");
    print!("{}", matrix::render(&results, &kernels));

    if failures.is_empty() {
        return Ok(exit_codes::OK);
    }
    eprintln!("\nTest failures detected:");
    for failure in &failures {
        eprintln!("- [{}] {}: {}", failure.kernel, failure.label, failure.message);
    }
    Ok(exit_codes::TEST_FAILURES)
}

/// Print the fixture labels that would run, in execution order.
pub fn list(repo_root: &Path) -> Result<()> {
    let config = HarnessConfig::load(repo_root)?;
    let ctx = RunContext::new(repo_root, &config, None);
    for fixture in fixture::collect(&ctx).context("collect fixtures")? {
        let requires = fixture.requires();
        if requires.is_empty() {
            println!("{}", fixture.label());
        } else {
            println!("{} (requires {})", fixture.label(), requires.join(", "));
        }
    }
    Ok(())
}

/// Remove the cached kernel binaries.
pub fn clean(repo_root: &Path) -> Result<()> {
    let config = HarnessConfig::load(repo_root)?;
    let ctx = RunContext::new(repo_root, &config, None);
    let kernels_dir = ctx.cache_root.join("kernels");
    if kernels_dir.exists() {
        fs::remove_dir_all(&kernels_dir)
            .with_context(|| format!("remove {}", kernels_dir.display()))?;
    }
    println!("clean: removed {}", kernels_dir.display());
    Ok(())
}

/// Wipe and recreate the scratch workspace fixtures write into.
fn prepare_workspaces(repo_root: &Path) -> Result<()> {
    let tmp_root = repo_root.join("tests").join("tmp");
    if tmp_root.exists() {
        fs::remove_dir_all(&tmp_root)
            .with_context(|| format!("remove {}", tmp_root.display()))?;
    }
    fs::create_dir_all(tmp_root.join("workspaces"))
        .with_context(|| format!("create {}", tmp_root.display()))?;
    Ok(())
}
