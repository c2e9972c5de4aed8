//! systemd unit control.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{ToolContext, check_unit_name};
use crate::error::GatewayError;
use crate::transport::ExecRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Reload,
    Enable,
    Disable,
    Status,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
            ServiceAction::Reload => "reload",
            ServiceAction::Enable => "enable",
            ServiceAction::Disable => "disable",
            ServiceAction::Status => "status",
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemdServiceArgs {
    pub target: String,
    /// Unit name, e.g. `myproj.service`.
    pub name: String,
    pub action: ServiceAction,
}

impl SystemdServiceArgs {
    pub(crate) fn validate(&self) -> Result<(), GatewayError> {
        check_unit_name(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub name: String,
    pub action: ServiceAction,
    pub ok: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

pub(crate) async fn service_action(
    ctx: &ToolContext<'_>,
    args: SystemdServiceArgs,
) -> Result<ServiceResponse, GatewayError> {
    let command = format!("systemctl {} {}", args.action, args.name);
    let output = ctx
        .transport
        .exec(ctx.target, ExecRequest::new(command))
        .await?;
    Ok(ServiceResponse {
        name: args.name,
        action: args.action,
        ok: output.exit_code == 0,
        exit_code: output.exit_code,
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRequest;
    use serde_json::json;

    #[test]
    fn test_unknown_action_rejected() {
        let err = ToolRequest::parse(
            "systemd_service",
            json!({"target": "pi", "name": "nginx", "action": "mask"}),
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArguments(_)));
    }

    #[test]
    fn test_unit_name_checked() {
        let err = ToolRequest::parse(
            "systemd_service",
            json!({"target": "pi", "name": "nginx && reboot", "action": "restart"}),
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArguments(_)));
    }

    #[test]
    fn test_action_display() {
        assert_eq!(ServiceAction::Restart.to_string(), "restart");
    }
}
