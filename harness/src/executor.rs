//! Fixture execution against a kernel binary.
//!
//! One fixture, one subprocess: the kernel gets the compose document path and
//! an optional temporary input file, runs under a timing measurement bounded
//! by the configured timeout, and its stdout must parse as a JSON document.
//! Suite cases synthesize a one-step compose document invoking the generic
//! test-checker component. Every temporary artifact is removed on every exit
//! path.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tempfile::TempDir;
use wait_timeout::ChildExt;

use crate::capability;
use crate::checker;
use crate::context::RunContext;
use crate::errors::ExecFailure;
use crate::fixture::{ComposeFixture, Fixture, SuiteCase};
use crate::matrix::{ExecutionResult, Status};

pub const TEST_CHECKER_CALL: &str = "compose://tooling/test_checker@1";

/// Raw subprocess outcome.
#[derive(Debug)]
pub struct CommandOutput {
    /// Exit code; `None` when killed by a signal or by the timeout.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// One fixture's outcome on one kernel.
#[derive(Debug)]
pub struct FixtureOutcome {
    pub result: ExecutionResult,
    /// Failure message, present iff status is `Fail`.
    pub failure: Option<String>,
    /// Capabilities that were missing, non-empty iff status is `Skip`.
    pub missing: Vec<String>,
}

pub struct ExecSuccess {
    pub output: Value,
    pub duration: Duration,
}

/// Run one fixture against one kernel binary.
///
/// A fixture with an unmet requirement is marked skip before any subprocess
/// is spawned.
pub fn run_fixture(
    ctx: &RunContext,
    kernel_id: &str,
    binary: &Path,
    fixture: &Fixture,
    capabilities: &BTreeSet<String>,
    env: &BTreeMap<String, String>,
) -> FixtureOutcome {
    let label = fixture.label();
    let missing: Vec<String> = capability::missing(fixture.requires(), capabilities)
        .into_iter()
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        return FixtureOutcome {
            result: ExecutionResult {
                kernel: kernel_id.to_string(),
                label,
                status: Status::Skip,
                duration_ms: 0,
            },
            failure: None,
            missing,
        };
    }

    let attempt = match fixture {
        Fixture::Compose(compose) => run_compose_fixture(ctx, binary, compose, env),
        Fixture::SuiteCase(case) => run_suite_case(ctx, binary, case, env),
    };
    match attempt {
        Ok(success) => FixtureOutcome {
            result: ExecutionResult {
                kernel: kernel_id.to_string(),
                label,
                status: Status::Pass,
                duration_ms: success.duration.as_millis() as u64,
            },
            failure: None,
            missing: Vec::new(),
        },
        Err(failure) => FixtureOutcome {
            result: ExecutionResult {
                kernel: kernel_id.to_string(),
                label,
                status: Status::Fail,
                duration_ms: failure
                    .duration
                    .map_or(0, |duration| duration.as_millis() as u64),
            },
            failure: Some(failure.message),
            missing: Vec::new(),
        },
    }
}

fn run_compose_fixture(
    ctx: &RunContext,
    binary: &Path,
    fixture: &ComposeFixture,
    env: &BTreeMap<String, String>,
) -> Result<ExecSuccess, ExecFailure> {
    let input = fixture
        .needs_project_path
        .then(|| json!({ "projectPath": ctx.project_path }));
    run_compose(
        ctx,
        binary,
        &fixture.file,
        input.as_ref(),
        env,
        fixture.check_output,
    )
}

fn run_suite_case(
    ctx: &RunContext,
    binary: &Path,
    case: &SuiteCase,
    env: &BTreeMap<String, String>,
) -> Result<ExecSuccess, ExecFailure> {
    let (guard, compose_path) = match write_case_compose(case) {
        Ok(pair) => pair,
        Err(err) => {
            return Err(ExecFailure {
                message: format!("failed to stage case compose: {err:#}"),
                duration: None,
            })
        }
    };
    let input = json!({ "projectPath": ctx.project_path });
    let result = run_compose(ctx, binary, &compose_path, Some(&input), env, true);
    drop(guard);
    result
}

/// Execute one compose document and validate the kernel output.
pub fn run_compose(
    ctx: &RunContext,
    binary: &Path,
    compose_path: &Path,
    input: Option<&Value>,
    env: &BTreeMap<String, String>,
    check_output: bool,
) -> Result<ExecSuccess, ExecFailure> {
    let mut args = vec![
        "--compose".to_string(),
        compose_path.display().to_string(),
    ];
    let mut input_guard: Option<TempDir> = None;
    if let Some(input) = input {
        match write_temp_input(input) {
            Ok((dir, path)) => {
                args.push("--input".to_string());
                args.push(path.display().to_string());
                input_guard = Some(dir);
            }
            Err(err) => {
                return Err(ExecFailure {
                    message: format!("failed to stage input: {err:#}"),
                    duration: None,
                })
            }
        }
    }

    let started = Instant::now();
    let output = match run_command(binary, &args, &ctx.repo_root, env, ctx.timeout) {
        Ok(output) => output,
        Err(err) => {
            return Err(ExecFailure {
                message: format!("{err:#}"),
                duration: Some(started.elapsed()),
            })
        }
    };
    let duration = started.elapsed();
    drop(input_guard);

    if output.timed_out {
        return Err(ExecFailure {
            message: format!("kernel timed out after {}s", ctx.timeout.as_secs()),
            duration: Some(duration),
        });
    }
    if output.code != Some(0) {
        let stderr = output.stderr.trim();
        let detail = if stderr.is_empty() {
            "no stderr output"
        } else {
            stderr
        };
        let code = output
            .code
            .map_or_else(|| "signal".to_string(), |code| code.to_string());
        return Err(ExecFailure {
            message: format!("kernel exited with status {code}: {detail}"),
            duration: Some(duration),
        });
    }

    let stdout = if output.stdout.trim().is_empty() {
        "{}"
    } else {
        output.stdout.as_str()
    };
    let parsed: Value = match serde_json::from_str(stdout) {
        Ok(value) => value,
        Err(err) => {
            return Err(ExecFailure {
                message: format!("unable to parse kernel output as JSON: {err}"),
                duration: Some(duration),
            })
        }
    };

    if check_output {
        if let Err(message) = checker::ensure_success(&parsed) {
            return Err(ExecFailure {
                message,
                duration: Some(duration),
            });
        }
    }

    Ok(ExecSuccess {
        output: parsed,
        duration,
    })
}

/// Spawn the kernel binary and capture exit code and both streams, killing
/// the process when the timeout expires.
pub fn run_command(
    binary: &Path,
    args: &[String],
    cwd: &Path,
    env: &BTreeMap<String, String>,
    timeout: Duration,
) -> Result<CommandOutput> {
    let mut child = Command::new(binary)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .envs(env)
        .spawn()
        .with_context(|| format!("spawn {}", binary.display()))?;

    // Drain both pipes off-thread before waiting: a kernel whose output
    // document exceeds the OS pipe buffer would otherwise block on a full
    // pipe and idle until the timeout.
    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout)? {
        Some(status) => status,
        None => {
            timed_out = true;
            child.kill().ok();
            child.wait().context("wait after kill")?
        }
    };

    let stdout = join_reader(stdout_reader).context("read stdout")?;
    let stderr = join_reader(stderr_reader).context("read stderr")?;

    Ok(CommandOutput {
        code: if timed_out { None } else { status.code() },
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
        timed_out,
    })
}

fn spawn_reader<R: Read + Send + 'static>(
    stream: Option<R>,
) -> std::thread::JoinHandle<std::io::Result<Vec<u8>>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut stream) = stream {
            stream.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn join_reader(
    handle: std::thread::JoinHandle<std::io::Result<Vec<u8>>>,
) -> Result<Vec<u8>> {
    match handle.join() {
        Ok(result) => result.map_err(anyhow::Error::from),
        Err(_) => anyhow::bail!("output reader thread panicked"),
    }
}

fn write_temp_input(input: &Value) -> Result<(TempDir, PathBuf)> {
    let dir = TempDir::new().context("create input dir")?;
    let path = dir.path().join("input.json");
    let payload = serde_json::to_vec(input).context("serialize input")?;
    std::fs::write(&path, payload).with_context(|| format!("write {}", path.display()))?;
    Ok((dir, path))
}

/// Synthesize the one-step compose document wrapping a suite case in the
/// generic test-checker component.
fn write_case_compose(case: &SuiteCase) -> Result<(TempDir, PathBuf)> {
    let mut step_in = serde_json::Map::new();
    step_in.insert("input".to_string(), case.input.clone());
    step_in.insert("compose".to_string(), case.compose.clone());
    step_in.insert("expected".to_string(), case.expected.clone());
    if let Some(options) = &case.options {
        step_in.insert("options".to_string(), options.clone());
    }
    if let Some(before) = &case.before {
        step_in.insert("before".to_string(), before.clone());
    }
    let doc = json!({
        "compose": [
            { "call": TEST_CHECKER_CALL, "in": Value::Object(step_in) }
        ]
    });

    let dir = TempDir::new().context("create case dir")?;
    let path = dir.path().join("compose.json");
    let payload = serde_json::to_string_pretty(&doc).context("serialize case compose")?;
    std::fs::write(&path, payload).with_context(|| format!("write {}", path.display()))?;
    Ok((dir, path))
}
