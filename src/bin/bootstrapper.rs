//! In-pod bootstrap state machine (spec §4.7): checkout → train → capture.
//!
//! Runs inside the training `Pod` the `ModelTraining` controller creates.
//! Ports `legion.toolchain.bootstrapper` — three stages, each mapped to a
//! fixed process exit code so the pod's terminal phase and a human reading
//! `kubectl logs` can tell which stage failed without parsing anything.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use clap::Parser;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

#[derive(Parser, Debug)]
#[command(name = "bootstrapper", about = "Runs one model training inside its pod")]
struct Args {
    /// Toolchain name, e.g. "python".
    toolchain: String,
    /// Repo-relative path to the training entrypoint.
    entry_point: String,
    /// Extra arguments forwarded to the toolchain's train stage.
    arguments: Vec<String>,
}

#[derive(Debug, Error)]
enum BootstrapError {
    #[error("cannot fetch source code: {0}")]
    CannotFetchSourceCode(String),
    #[error("cannot build model: {0}")]
    CannotBuildModel(String),
    #[error("general failure: {0}")]
    GeneralFailure(String),
}

impl BootstrapError {
    fn exit_code(&self) -> i32 {
        match self {
            BootstrapError::CannotFetchSourceCode(_) => 2,
            BootstrapError::CannotBuildModel(_) => 3,
            BootstrapError::GeneralFailure(_) => 5,
        }
    }
}

impl From<std::io::Error> for BootstrapError {
    fn from(err: std::io::Error) -> Self {
        BootstrapError::GeneralFailure(err.to_string())
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let result = run(&args).await;

    if let Err(err) = result {
        eprintln!("bootstrap failed: {err}");
        std::process::exit(err.exit_code());
    }
}

async fn run(args: &Args) -> Result<(), BootstrapError> {
    let checkout_dir = checkout_repo().await?;
    train_code(args, &checkout_dir).await?;
    capture_container().await?;
    Ok(())
}

fn announce_stage(name: &str) {
    println!("===== Starting stage: {name} =====");
}

fn required_env(name: &str) -> Result<String, BootstrapError> {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BootstrapError::CannotFetchSourceCode(format!("missing required env var {name}")))
}

/// Stage 1: clone the training repo at the requested ref into a fresh
/// checkout directory.
async fn checkout_repo() -> Result<PathBuf, BootstrapError> {
    announce_stage("checkout");

    let uri = required_env("GIT_CHECKOUT_REPO_URI")?;
    let git_ref = required_env("GIT_CHECKOUT_REPO_REF")?;
    let git_bin = required_env("GIT_BIN")?;
    let sub_folder = env::var("GIT_CHECKOUT_SUB_FOLDER").unwrap_or_else(|_| "src".to_string());

    let target = PathBuf::from(&sub_folder);
    if target.exists() {
        return Err(BootstrapError::CannotFetchSourceCode(format!(
            "checkout target {} already exists",
            target.display()
        )));
    }

    run_streamed(&git_bin, &["clone", "-n", &uri, &sub_folder])
        .await
        .map_err(|err| BootstrapError::CannotFetchSourceCode(err.to_string()))?;

    run_streamed(&git_bin, &["-C", &sub_folder, "reset", "--hard", &git_ref])
        .await
        .map_err(|err| BootstrapError::CannotFetchSourceCode(err.to_string()))?;

    Ok(target)
}

/// Stage 2: run the training entrypoint with the toolchain-appropriate
/// interpreter.
async fn train_code(args: &Args, checkout_dir: &Path) -> Result<(), BootstrapError> {
    announce_stage("train");

    let entry_path = checkout_dir.join(&args.entry_point);
    let extension = entry_path.extension().and_then(|ext| ext.to_str()).unwrap_or_default();

    match extension {
        "ipynb" => {
            let output_dir = checkout_dir.join("nb-result.html");
            run_streamed(
                "jupyter",
                &[
                    "nbconvert",
                    "--to",
                    "html",
                    "--execute",
                    entry_path.to_str().unwrap_or_default(),
                    "--output",
                    output_dir.to_str().unwrap_or_default(),
                ],
            )
            .await
            .map_err(|err| BootstrapError::CannotBuildModel(err.to_string()))?;
        }
        "py" | "pyc" => {
            let interpreter = env::var("PYTHON_INTERPRETER")
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| BootstrapError::CannotBuildModel("missing required env var PYTHON_INTERPRETER".into()))?;

            let mut call_args = vec![entry_path.to_str().unwrap_or_default().to_string()];
            call_args.extend(args.arguments.iter().cloned());
            let call_args_ref: Vec<&str> = call_args.iter().map(String::as_str).collect();

            run_streamed(&interpreter, &call_args_ref)
                .await
                .map_err(|err| BootstrapError::CannotBuildModel(err.to_string()))?;
        }
        other => {
            return Err(BootstrapError::CannotBuildModel(format!(
                "unsupported entrypoint extension: {other}"
            )));
        }
    }

    Ok(())
}

/// Stage 3: snapshot the trained container with the external builder.
async fn capture_container() -> Result<(), BootstrapError> {
    announce_stage("capture");

    run_streamed("legionctl", &["build"])
        .await
        .map_err(|err| BootstrapError::CannotBuildModel(err.to_string()))?;

    Ok(())
}

/// Runs `program` to completion, tee-ing stdout/stderr to the parent's own
/// streams and to scratch files, via two genuinely concurrent reader tasks
/// joined with [`tokio::try_join!`]. This is the fix for the sequential-read
/// deadlock in the source this was ported from, which spawned two reader
/// threads but invoked them with `.run()` instead of `.start()`.
async fn run_streamed(program: &str, args: &[&str]) -> std::io::Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    let scratch = tempfile::tempdir()?;
    let stdout_log = scratch.path().join("stdout.log");
    let stderr_log = scratch.path().join("stderr.log");

    let stdout_task = tokio::spawn(tee_lines(stdout, stdout_log, false));
    let stderr_task = tokio::spawn(tee_lines(stderr, stderr_log, true));

    let (stdout_result, stderr_result) = tokio::try_join!(stdout_task, stderr_task)
        .map_err(|join_err| std::io::Error::other(join_err.to_string()))?;
    stdout_result?;
    stderr_result?;

    let status = child.wait().await?;
    if !status.success() {
        return Err(std::io::Error::other(format!(
            "{program} exited with {status}"
        )));
    }
    Ok(())
}

async fn tee_lines<R>(reader: R, log_path: PathBuf, is_stderr: bool) -> std::io::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut log_file = tokio::fs::File::create(&log_path).await?;

    while let Some(line) = lines.next_line().await? {
        if is_stderr {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
        log_file.write_all(line.as_bytes()).await?;
        log_file.write_all(b"\n").await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_mapping_matches_the_cli_contract() {
        assert_eq!(BootstrapError::CannotFetchSourceCode("x".into()).exit_code(), 2);
        assert_eq!(BootstrapError::CannotBuildModel("x".into()).exit_code(), 3);
        assert_eq!(BootstrapError::GeneralFailure("x".into()).exit_code(), 5);
    }

    #[tokio::test]
    async fn train_code_rejects_an_unrecognized_entrypoint_extension_without_spawning_anything() {
        let args = Args {
            toolchain: "python".to_string(),
            entry_point: "model.rs".to_string(),
            arguments: Vec::new(),
        };
        let checkout_dir = std::env::temp_dir();

        let err = train_code(&args, &checkout_dir).await.unwrap_err();
        assert!(matches!(err, BootstrapError::CannotBuildModel(ref msg) if msg.contains("rs")));
    }
}
