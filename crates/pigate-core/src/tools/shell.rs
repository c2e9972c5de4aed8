//! Raw command execution and file transfer.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use super::{ExecResponse, ToolContext, check_remote_dir};
use crate::error::GatewayError;
use crate::transport::{ExecRequest, compose_command};

/// Highest permission value accepted for uploads (`0o7777`).
const MAX_MODE: u32 = 0o7777;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshExecArgs {
    pub target: String,
    pub command: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: Option<BTreeMap<String, String>>,
    /// Seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl SshExecArgs {
    pub(crate) fn validate(&self) -> Result<(), GatewayError> {
        if self.command.trim().is_empty() {
            return Err(GatewayError::invalid("command must not be empty"));
        }
        if let Some(cwd) = self.cwd.as_deref() {
            check_remote_dir(cwd, "cwd")?;
        }
        if self.timeout == Some(0) {
            return Err(GatewayError::invalid("timeout must be at least 1 second"));
        }
        compose_command(&self.request())?;
        Ok(())
    }

    fn request(&self) -> ExecRequest {
        let mut request = ExecRequest::new(self.command.clone())
            .env(self.env.clone().unwrap_or_default());
        if let Some(cwd) = &self.cwd {
            request = request.cwd(cwd.clone());
        }
        if let Some(secs) = self.timeout {
            request = request.timeout(Duration::from_secs(secs));
        }
        request
    }
}

pub(crate) async fn ssh_exec(
    ctx: &ToolContext<'_>,
    args: SshExecArgs,
) -> Result<ExecResponse, GatewayError> {
    let output = ctx.transport.exec(ctx.target, args.request()).await?;
    Ok(output.into())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScpPutArgs {
    pub target: String,
    pub remote_path: String,
    pub content_b64: String,
    /// Numeric permission bits, e.g. `420` for `0o644`.
    #[serde(default)]
    pub mode: Option<u32>,
}

impl ScpPutArgs {
    pub(crate) fn validate(&self) -> Result<(), GatewayError> {
        if self.remote_path.trim().is_empty() {
            return Err(GatewayError::invalid("remote_path must not be empty"));
        }
        if let Some(mode) = self.mode
            && mode > MAX_MODE
        {
            return Err(GatewayError::invalid(format!(
                "mode {mode:#o} is out of range"
            )));
        }
        self.content()?;
        Ok(())
    }

    fn content(&self) -> Result<Vec<u8>, GatewayError> {
        STANDARD
            .decode(self.content_b64.trim())
            .map_err(|e| GatewayError::invalid(format!("content_b64 is not valid base64: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScpPutResponse {
    pub remote_path: String,
    pub size: usize,
    pub mode: Option<u32>,
}

pub(crate) async fn scp_put(
    ctx: &ToolContext<'_>,
    args: ScpPutArgs,
) -> Result<ScpPutResponse, GatewayError> {
    let data = args.content()?;
    let size = data.len();
    ctx.transport
        .put_bytes(ctx.target, data, args.remote_path.clone(), args.mode)
        .await?;
    Ok(ScpPutResponse {
        remote_path: args.remote_path,
        size,
        mode: args.mode,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScpGetArgs {
    pub target: String,
    pub remote_path: String,
}

impl ScpGetArgs {
    pub(crate) fn validate(&self) -> Result<(), GatewayError> {
        if self.remote_path.trim().is_empty() {
            return Err(GatewayError::invalid("remote_path must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScpGetResponse {
    pub remote_path: String,
    pub content_b64: String,
}

pub(crate) async fn scp_get(
    ctx: &ToolContext<'_>,
    args: ScpGetArgs,
) -> Result<ScpGetResponse, GatewayError> {
    let data = ctx
        .transport
        .get_bytes(ctx.target, args.remote_path.clone())
        .await?;
    Ok(ScpGetResponse {
        remote_path: args.remote_path,
        content_b64: STANDARD.encode(data),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRequest;
    use serde_json::json;

    #[test]
    fn test_exec_args_defaults() {
        let args: SshExecArgs =
            serde_json::from_value(json!({"target": "pi", "command": "uptime"})).unwrap();
        assert_eq!(args.cwd, None);
        assert_eq!(args.timeout, None);
        assert!(args.validate().is_ok());
        assert_eq!(args.request().timeout, None);
    }

    #[test]
    fn test_exec_rejects_bad_env_key_at_boundary() {
        let err = ToolRequest::parse(
            "ssh_exec",
            json!({"target": "pi", "command": "env", "env": {"NOT-OK": "1"}}),
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArguments(_)));
    }

    #[test]
    fn test_exec_rejects_zero_timeout_and_bad_cwd() {
        for args in [
            json!({"target": "pi", "command": "ls", "timeout": 0}),
            json!({"target": "pi", "command": "ls", "cwd": "/tmp && reboot"}),
            json!({"target": "pi", "command": "   "}),
            json!({"target": "pi", "command": "ls", "timeout": -5}),
        ] {
            assert!(
                matches!(
                    ToolRequest::parse("ssh_exec", args.clone()),
                    Err(GatewayError::InvalidArguments(_))
                ),
                "{args} should be rejected"
            );
        }
    }

    #[test]
    fn test_put_rejects_bad_base64_and_mode() {
        let bad_b64 = json!({"target": "pi", "remote_path": "/tmp/x", "content_b64": "%%%"});
        assert!(matches!(
            ToolRequest::parse("scp_put", bad_b64),
            Err(GatewayError::InvalidArguments(m)) if m.contains("base64")
        ));

        let bad_mode =
            json!({"target": "pi", "remote_path": "/tmp/x", "content_b64": "", "mode": 65535});
        assert!(matches!(
            ToolRequest::parse("scp_put", bad_mode),
            Err(GatewayError::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_put_accepts_empty_file() {
        let args =
            json!({"target": "pi", "remote_path": "/tmp/empty", "content_b64": "", "mode": 420});
        assert!(ToolRequest::parse("scp_put", args).is_ok());
    }
}
