//! Git project operations and deploy hooks.
//!
//! All commands run with the project directory as working directory.
//! `git_pull` and `deploy_hook` run their steps in one session block.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ToolContext, check_git_ref, check_git_remote, check_remote_dir, check_script_name};
use crate::error::GatewayError;
use crate::transport::{ExecOutput, ExecRequest, compose_command};

const FETCH_TIMEOUT: Duration = Duration::from_secs(120);
const RESET_TIMEOUT: Duration = Duration::from_secs(60);
const PULL_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitStatusArgs {
    pub target: String,
    pub project_dir: String,
    #[serde(default = "default_true")]
    pub short: bool,
}

fn default_true() -> bool {
    true
}

impl GitStatusArgs {
    pub(crate) fn validate(&self) -> Result<(), GatewayError> {
        check_remote_dir(&self.project_dir, "project_dir")
    }
}

pub(crate) async fn status(
    ctx: &ToolContext<'_>,
    args: GitStatusArgs,
) -> Result<super::ExecResponse, GatewayError> {
    let command = if args.short {
        "git status --short --branch"
    } else {
        "git status"
    };
    let output = ctx
        .transport
        .exec(ctx.target, ExecRequest::new(command).cwd(args.project_dir))
        .await?;
    Ok(output.into())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitCheckoutArgs {
    pub target: String,
    pub project_dir: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub create_branch: bool,
}

impl GitCheckoutArgs {
    pub(crate) fn validate(&self) -> Result<(), GatewayError> {
        check_remote_dir(&self.project_dir, "project_dir")?;
        check_git_ref(&self.git_ref, "ref")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitCheckoutResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    #[serde(rename = "ref")]
    pub git_ref: String,
}

pub(crate) async fn checkout(
    ctx: &ToolContext<'_>,
    args: GitCheckoutArgs,
) -> Result<GitCheckoutResponse, GatewayError> {
    let command = if args.create_branch {
        format!("git checkout -b {}", args.git_ref)
    } else {
        format!("git checkout {}", args.git_ref)
    };
    let output = ctx
        .transport
        .exec(ctx.target, ExecRequest::new(command).cwd(args.project_dir))
        .await?;
    Ok(GitCheckoutResponse {
        stdout: output.stdout,
        stderr: output.stderr,
        exit_code: output.exit_code,
        git_ref: args.git_ref,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitPullArgs {
    pub target: String,
    pub project_dir: String,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub fetch_all: bool,
    /// Only takes effect together with `branch`.
    #[serde(default)]
    pub reset_hard: bool,
}

fn default_remote() -> String {
    "origin".to_string()
}

impl GitPullArgs {
    pub(crate) fn validate(&self) -> Result<(), GatewayError> {
        check_remote_dir(&self.project_dir, "project_dir")?;
        check_git_remote(&self.remote)?;
        if let Some(branch) = self.branch.as_deref() {
            check_git_ref(branch, "branch")?;
        }
        Ok(())
    }

    /// The commands to run, in order, with their individual bounds.
    fn steps(&self) -> Vec<(String, Duration)> {
        let mut steps = Vec::with_capacity(3);
        if self.fetch_all {
            steps.push(("git fetch --all --prune".to_string(), FETCH_TIMEOUT));
        }
        if self.reset_hard
            && let Some(branch) = self.branch.as_deref()
        {
            steps.push((
                format!("git reset --hard {}/{branch}", self.remote),
                RESET_TIMEOUT,
            ));
        }
        let pull = match self.branch.as_deref() {
            Some(branch) => format!("git pull {} {branch}", self.remote),
            None => "git pull".to_string(),
        };
        steps.push((pull, PULL_TIMEOUT));
        steps
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitPullResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub branch: Option<String>,
}

/// Fetch, reset and pull in one session, stopping at the first step that
/// exits non-zero. Output is concatenated across steps and the reported
/// exit code is that step's, including `-1` when no status came back.
pub(crate) async fn pull(
    ctx: &ToolContext<'_>,
    args: GitPullArgs,
) -> Result<GitPullResponse, GatewayError> {
    let mut steps = Vec::new();
    let mut budget = Duration::ZERO;
    for (command, timeout) in args.steps() {
        let line = compose_command(&ExecRequest::new(command).cwd(args.project_dir.clone()))?;
        budget += timeout;
        steps.push((line, timeout));
    }

    let merged = ctx
        .transport
        .with_session(ctx.target, budget, move |remote| {
            let mut merged = ExecOutput::default();
            for (line, timeout) in &steps {
                let step = remote.exec(line, *timeout)?;
                merged.stdout.push_str(&step.stdout);
                merged.stderr.push_str(&step.stderr);
                if step.exit_code != 0 {
                    merged.exit_code = step.exit_code;
                    break;
                }
            }
            Ok(merged)
        })
        .await?;

    Ok(GitPullResponse {
        stdout: merged.stdout,
        stderr: merged.stderr,
        exit_code: merged.exit_code,
        branch: args.branch,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployHookArgs {
    pub target: String,
    pub project_dir: String,
    #[serde(default = "default_script")]
    pub script: String,
    #[serde(default)]
    pub env: Option<BTreeMap<String, String>>,
    /// Seconds for the whole deploy.
    #[serde(default = "default_deploy_timeout")]
    pub timeout: u64,
}

fn default_script() -> String {
    "deploy.sh".to_string()
}

fn default_deploy_timeout() -> u64 {
    600
}

impl DeployHookArgs {
    pub(crate) fn validate(&self) -> Result<(), GatewayError> {
        check_remote_dir(&self.project_dir, "project_dir")?;
        check_script_name(&self.script)?;
        if self.timeout == 0 {
            return Err(GatewayError::invalid("timeout must be at least 1 second"));
        }
        compose_command(&self.run_request())?;
        Ok(())
    }

    fn run_request(&self) -> ExecRequest {
        ExecRequest::new(format!("bash -e ./{}", self.script))
            .cwd(self.project_dir.clone())
            .env(self.env.clone().unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployHookResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub script_path: String,
}

/// Mark the script executable (best effort), then run it under `bash -e`.
pub(crate) async fn deploy_hook(
    ctx: &ToolContext<'_>,
    args: DeployHookArgs,
) -> Result<DeployHookResponse, GatewayError> {
    let chmod = compose_command(
        &ExecRequest::new(format!("chmod +x {}", args.script)).cwd(args.project_dir.clone()),
    )?;
    let run = compose_command(&args.run_request())?;
    let chmod_timeout = ctx.transport.default_timeout();
    let run_timeout = Duration::from_secs(args.timeout);

    let output = ctx
        .transport
        .with_session(ctx.target, chmod_timeout + run_timeout, move |remote| {
            let chmod = remote.exec(&chmod, chmod_timeout)?;
            if chmod.exit_code != 0 {
                tracing::debug!(
                    exit_code = chmod.exit_code,
                    "chmod of deploy script failed, running anyway"
                );
            }
            remote.exec(&run, run_timeout)
        })
        .await?;

    Ok(DeployHookResponse {
        stdout: output.stdout,
        stderr: output.stderr,
        exit_code: output.exit_code,
        script_path: format!("{}/{}", args.project_dir, args.script),
    })
}
