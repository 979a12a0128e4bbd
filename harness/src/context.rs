//! Run-scoped context threaded through provisioning, probing, and execution.
//!
//! The spec-fixtures and components roots are resolved once per run and
//! carried explicitly instead of living in ambient process-wide state, so
//! concurrent runs (e.g. under test) cannot interfere.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::HarnessConfig;

/// Override pointing at the specification-fixtures root.
pub const SPEC_PATH_ENV: &str = "COMPOSE_SPEC_PATH";
/// Override pointing at the components root.
pub const COMPONENTS_PATH_ENV: &str = "COMPOSE_COMPONENTS_PATH";
/// Per-kernel cache directory handed to kernel subprocesses.
pub const CACHE_DIR_ENV: &str = "COMPOSE_CACHE_DIR";
/// Release version override honored when `--version` is absent.
pub const RELEASE_VERSION_ENV: &str = "COMPOSE_RELEASE_VERSION";

#[derive(Debug, Clone)]
pub struct RunContext {
    pub repo_root: PathBuf,
    /// Root for the kernel binary cache and per-kernel caches (`<repo>/.compose`).
    pub cache_root: PathBuf,
    /// Project root handed to fixtures that need a `projectPath` input.
    pub project_path: PathBuf,
    pub spec_root: Option<PathBuf>,
    pub components_root: Option<PathBuf>,
    pub timeout: Duration,
    pub release_repo: String,
}

impl RunContext {
    pub fn new(repo_root: &Path, config: &HarnessConfig, timeout_override: Option<u64>) -> Self {
        let timeout = timeout_override.map_or_else(|| config.timeout(), Duration::from_secs);
        Self {
            repo_root: repo_root.to_path_buf(),
            cache_root: repo_root.join(".compose"),
            project_path: repo_root.join("packages").join("std"),
            spec_root: resolve_spec_root(repo_root),
            components_root: resolve_components_root(repo_root),
            timeout,
            release_repo: config.release_repo(),
        }
    }

    /// Cache directory handed to kernel subprocesses of one kernel block.
    pub fn kernel_cache_dir(&self, kernel_id: &str) -> PathBuf {
        self.cache_root.join("cache").join(kernel_id)
    }

    /// Environment overrides for every subprocess of one kernel block.
    pub fn kernel_env(&self, kernel_id: &str) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(
            CACHE_DIR_ENV.to_string(),
            self.kernel_cache_dir(kernel_id).display().to_string(),
        );
        if let Some(spec_root) = &self.spec_root {
            env.insert(SPEC_PATH_ENV.to_string(), spec_root.display().to_string());
        }
        if let Some(components_root) = &self.components_root {
            env.insert(
                COMPONENTS_PATH_ENV.to_string(),
                components_root.display().to_string(),
            );
        }
        env
    }
}

/// Locate the specification-fixtures checkout.
///
/// The environment override wins; otherwise a short list of conventional
/// sibling locations is probed. Absence is fine — fixtures that need the
/// checkout are skipped through the capability mechanism.
fn resolve_spec_root(repo_root: &Path) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(env_path) = std::env::var(SPEC_PATH_ENV) {
        let trimmed = env_path.trim();
        if !trimmed.is_empty() {
            candidates.push(PathBuf::from(trimmed));
        }
    }
    candidates.push(repo_root.join("..").join("compose-spec"));
    candidates.push(repo_root.join("..").join("..").join("compose-spec"));
    candidates.push(repo_root.join("..").join("spec").join("compose-spec"));
    candidates.push(
        repo_root
            .join("..")
            .join("..")
            .join("spec")
            .join("compose-spec"),
    );

    candidates
        .into_iter()
        .find(|candidate| candidate.join("tests").join("spec").is_dir())
}

/// Locate the components checkout; same policy as [`resolve_spec_root`].
fn resolve_components_root(repo_root: &Path) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(env_path) = std::env::var(COMPONENTS_PATH_ENV) {
        let trimmed = env_path.trim();
        if !trimmed.is_empty() {
            candidates.push(PathBuf::from(trimmed));
        }
    }
    candidates.push(repo_root.join("..").join("compose-components"));
    candidates.push(repo_root.join("..").join("..").join("compose-components"));

    candidates
        .into_iter()
        .find(|candidate| candidate.join("packages").is_dir())
}
