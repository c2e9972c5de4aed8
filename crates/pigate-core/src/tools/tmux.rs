//! tmux session management.
//!
//! Session names supplied by callers are always prefixed with `mcp_` so the
//! gateway can only touch sessions it created.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ToolContext, check_remote_dir, check_session_name};
use crate::error::GatewayError;
use crate::transport::{ExecOutput, ExecRequest, compose_command};

pub const SESSION_PREFIX: &str = "mcp_";

/// Bound on the existence probe in [`ensure`].
const HAS_SESSION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmuxEnsureArgs {
    pub target: String,
    pub session: String,
    #[serde(default)]
    pub cwd: Option<String>,
}

impl TmuxEnsureArgs {
    pub(crate) fn validate(&self) -> Result<(), GatewayError> {
        check_session_name(&self.session)?;
        if let Some(cwd) = self.cwd.as_deref() {
            check_remote_dir(cwd, "cwd")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmuxSendKeysArgs {
    pub target: String,
    pub session: String,
    pub keys: String,
    #[serde(default = "default_enter")]
    pub enter: bool,
}

fn default_enter() -> bool {
    true
}

impl TmuxSendKeysArgs {
    pub(crate) fn validate(&self) -> Result<(), GatewayError> {
        check_session_name(&self.session)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmuxKillArgs {
    pub target: String,
    pub session: String,
}

impl TmuxKillArgs {
    pub(crate) fn validate(&self) -> Result<(), GatewayError> {
        check_session_name(&self.session)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmuxResponse {
    pub session: String,
    pub ok: bool,
    pub detail: String,
}

impl TmuxResponse {
    fn from_output(session: String, output: &ExecOutput) -> Self {
        Self {
            session,
            ok: output.exit_code == 0,
            detail: detail(output),
        }
    }
}

pub fn full_session_name(session: &str) -> String {
    format!("{SESSION_PREFIX}{session}")
}

/// Wrap `value` in single quotes for the remote shell.
pub(crate) fn single_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn detail(output: &ExecOutput) -> String {
    if output.stderr.is_empty() {
        output.stdout.clone()
    } else {
        output.stderr.clone()
    }
}

/// Probe for the session and create it when missing, in one session block.
pub(crate) async fn ensure(
    ctx: &ToolContext<'_>,
    args: TmuxEnsureArgs,
) -> Result<TmuxResponse, GatewayError> {
    let session = full_session_name(&args.session);
    let probe = format!("tmux has-session -t {session}");
    let mut create = ExecRequest::new(format!("tmux new-session -d -s {session}"));
    if let Some(cwd) = args.cwd {
        create = create.cwd(cwd);
    }
    let create = compose_command(&create)?;
    let create_timeout = ctx.transport.default_timeout();

    let response = ctx
        .transport
        .with_session(
            ctx.target,
            HAS_SESSION_TIMEOUT + create_timeout,
            move |remote| {
                let exists = remote.exec(&probe, HAS_SESSION_TIMEOUT)?;
                if exists.exit_code == 0 {
                    return Ok(TmuxResponse {
                        session,
                        ok: true,
                        detail: "ensured".to_string(),
                    });
                }
                let created = remote.exec(&create, create_timeout)?;
                if created.exit_code != 0 {
                    return Ok(TmuxResponse::from_output(session, &created));
                }
                Ok(TmuxResponse {
                    session,
                    ok: true,
                    detail: "ensured".to_string(),
                })
            },
        )
        .await?;
    Ok(response)
}

pub(crate) async fn send_keys(
    ctx: &ToolContext<'_>,
    args: TmuxSendKeysArgs,
) -> Result<TmuxResponse, GatewayError> {
    let session = full_session_name(&args.session);
    let mut command = format!("tmux send-keys -t {session} {}", single_quote(&args.keys));
    if args.enter {
        command.push_str(" Enter");
    }
    let output = ctx
        .transport
        .exec(ctx.target, ExecRequest::new(command))
        .await?;
    Ok(TmuxResponse::from_output(session, &output))
}

pub(crate) async fn kill(
    ctx: &ToolContext<'_>,
    args: TmuxKillArgs,
) -> Result<TmuxResponse, GatewayError> {
    let session = full_session_name(&args.session);
    let output = ctx
        .transport
        .exec(
            ctx.target,
            ExecRequest::new(format!("tmux kill-session -t {session}")),
        )
        .await?;
    Ok(TmuxResponse::from_output(session, &output))
}
