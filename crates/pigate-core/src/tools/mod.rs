//! Tool catalog and typed tool arguments.
//!
//! A [`ToolCall`] arrives as a name plus a JSON object. It is decoded once,
//! at the boundary, into a [`ToolRequest`]: one variant per tool, with every
//! argument typed and range-checked. Nothing past [`ToolRequest::parse`]
//! ever looks at raw JSON arguments again.
//!
//! ```text
//! ToolCall { name, arguments }
//!     → ToolRequest::parse          // NotFound / InvalidArguments
//!     → ToolRequest::check_policy   // tool allowlist, shell policy, GPIO matrix
//!     → ToolRequest::execute        // one session block on the target
//! ```

pub mod git;
pub mod gpio;
pub mod shell;
pub mod systemd;
pub mod tmux;

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use pigate_config::{PolicyDocument, PolicyStore, TargetConfig};
use pigate_config::policy::PolicyDecision;

use crate::error::GatewayError;
use crate::transport::Transport;

pub use git::{DeployHookArgs, GitCheckoutArgs, GitPullArgs, GitStatusArgs};
pub use gpio::{GpioBlinkArgs, GpioPwmArgs, GpioReadArgs, GpioWriteArgs, MacroRunArgs};
pub use shell::{ScpGetArgs, ScpPutArgs, SshExecArgs};
pub use systemd::{ServiceAction, SystemdServiceArgs};
pub use tmux::{TmuxEnsureArgs, TmuxKillArgs, TmuxSendKeysArgs};

/// Outcome of a structured tool (GPIO, macros).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StructuredResult {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// `{stdout, stderr, exit_code}` shape shared by the shell-like tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl From<crate::transport::ExecOutput> for ExecResponse {
    fn from(out: crate::transport::ExecOutput) -> Self {
        Self {
            stdout: out.stdout,
            stderr: out.stderr,
            exit_code: out.exit_code,
        }
    }
}

/// A tool invocation as it arrives on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Static description of one tool.
#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
}

/// Every tool the gateway knows, in listing order.
pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "ssh_exec",
        description: "Execute a command over SSH on a configured target",
        required: &["target", "command"],
        optional: &["cwd", "env", "timeout"],
    },
    ToolSpec {
        name: "scp_put",
        description: "Upload a base64-encoded file to the target over SFTP",
        required: &["target", "remote_path", "content_b64"],
        optional: &["mode"],
    },
    ToolSpec {
        name: "scp_get",
        description: "Download a file from the target over SFTP as base64",
        required: &["target", "remote_path"],
        optional: &[],
    },
    ToolSpec {
        name: "tmux_ensure",
        description: "Ensure a tmux session exists (create if needed)",
        required: &["target", "session"],
        optional: &["cwd"],
    },
    ToolSpec {
        name: "tmux_send_keys",
        description: "Send keys/command to a tmux session (adds Enter by default)",
        required: &["target", "session", "keys"],
        optional: &["enter"],
    },
    ToolSpec {
        name: "tmux_kill",
        description: "Kill a tmux session",
        required: &["target", "session"],
        optional: &[],
    },
    ToolSpec {
        name: "systemd_service",
        description: "Manage a systemd service on the target",
        required: &["target", "name", "action"],
        optional: &[],
    },
    ToolSpec {
        name: "git_status",
        description: "Show git status for a project directory",
        required: &["target", "project_dir"],
        optional: &["short"],
    },
    ToolSpec {
        name: "git_checkout",
        description: "Checkout a branch or tag in a project directory",
        required: &["target", "project_dir", "ref"],
        optional: &["create_branch"],
    },
    ToolSpec {
        name: "git_pull",
        description: "Fetch, optionally hard-reset, and pull a project directory",
        required: &["target", "project_dir"],
        optional: &["remote", "branch", "fetch_all", "reset_hard"],
    },
    ToolSpec {
        name: "deploy_hook",
        description: "Run a deploy script inside a project directory",
        required: &["target", "project_dir"],
        optional: &["script", "env", "timeout"],
    },
    ToolSpec {
        name: "gpio_write",
        description: "Drive an allowed output pin high or low",
        required: &["target", "pin", "value"],
        optional: &["mode"],
    },
    ToolSpec {
        name: "gpio_read",
        description: "Read the level of an allowed input pin",
        required: &["target", "pin"],
        optional: &["mode", "pull"],
    },
    ToolSpec {
        name: "gpio_pwm",
        description: "Run PWM on an allowed pin for a bounded duration",
        required: &["target", "pin", "duty"],
        optional: &["mode", "freq", "duration"],
    },
    ToolSpec {
        name: "gpio_blink",
        description: "Blink an allowed output pin",
        required: &["target", "pin"],
        optional: &["mode", "count", "on_time", "off_time"],
    },
    ToolSpec {
        name: "macro_run",
        description: "Validate and run a sequence of GPIO steps as one agent call",
        required: &["target", "steps"],
        optional: &["mode"],
    },
];

/// Look up a tool by name.
pub fn find_tool(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|t| t.name == name)
}

/// A tool as advertised to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

impl From<&ToolSpec> for ToolDescriptor {
    fn from(spec: &ToolSpec) -> Self {
        let owned = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            name: spec.name.to_string(),
            description: spec.description.to_string(),
            required: owned(spec.required),
            optional: owned(spec.optional),
        }
    }
}

/// Tools the policy lets a caller see, optionally scoped to one target.
pub fn list_tools(policy: &PolicyDocument, target: Option<&str>) -> Vec<ToolDescriptor> {
    TOOLS
        .iter()
        .filter(|spec| policy.tool_allowed(spec.name, target).is_allowed())
        .map(ToolDescriptor::from)
        .collect()
}

/// What a tool needs at execution time.
pub struct ToolContext<'a> {
    pub transport: &'a Transport,
    pub target: &'a TargetConfig,
    /// Re-read by tools that must re-validate right before touching the
    /// target.
    pub policy: &'a PolicyStore,
}

/// A fully decoded and validated tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRequest {
    SshExec(SshExecArgs),
    ScpPut(ScpPutArgs),
    ScpGet(ScpGetArgs),
    TmuxEnsure(TmuxEnsureArgs),
    TmuxSendKeys(TmuxSendKeysArgs),
    TmuxKill(TmuxKillArgs),
    SystemdService(SystemdServiceArgs),
    GitStatus(GitStatusArgs),
    GitCheckout(GitCheckoutArgs),
    GitPull(GitPullArgs),
    DeployHook(DeployHookArgs),
    GpioWrite(GpioWriteArgs),
    GpioRead(GpioReadArgs),
    GpioPwm(GpioPwmArgs),
    GpioBlink(GpioBlinkArgs),
    MacroRun(MacroRunArgs),
}

impl ToolRequest {
    /// Decode and validate the arguments of the named tool.
    ///
    /// Unknown names are [`GatewayError::NotFound`]; anything wrong with the
    /// arguments is [`GatewayError::InvalidArguments`].
    pub fn parse(name: &str, arguments: Value) -> Result<Self, GatewayError> {
        let args = match arguments {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        let request = match name {
            "ssh_exec" => ToolRequest::SshExec(decode(args)?),
            "scp_put" => ToolRequest::ScpPut(decode(args)?),
            "scp_get" => ToolRequest::ScpGet(decode(args)?),
            "tmux_ensure" => ToolRequest::TmuxEnsure(decode(args)?),
            "tmux_send_keys" => ToolRequest::TmuxSendKeys(decode(args)?),
            "tmux_kill" => ToolRequest::TmuxKill(decode(args)?),
            "systemd_service" => ToolRequest::SystemdService(decode(args)?),
            "git_status" => ToolRequest::GitStatus(decode(args)?),
            "git_checkout" => ToolRequest::GitCheckout(decode(args)?),
            "git_pull" => ToolRequest::GitPull(decode(args)?),
            "deploy_hook" => ToolRequest::DeployHook(decode(args)?),
            "gpio_write" => ToolRequest::GpioWrite(decode(args)?),
            "gpio_read" => ToolRequest::GpioRead(decode(args)?),
            "gpio_pwm" => ToolRequest::GpioPwm(decode(args)?),
            "gpio_blink" => ToolRequest::GpioBlink(decode(args)?),
            "macro_run" => ToolRequest::MacroRun(decode(args)?),
            other => return Err(GatewayError::NotFound(format!("unknown tool '{other}'"))),
        };

        request.validate()?;
        Ok(request)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolRequest::SshExec(_) => "ssh_exec",
            ToolRequest::ScpPut(_) => "scp_put",
            ToolRequest::ScpGet(_) => "scp_get",
            ToolRequest::TmuxEnsure(_) => "tmux_ensure",
            ToolRequest::TmuxSendKeys(_) => "tmux_send_keys",
            ToolRequest::TmuxKill(_) => "tmux_kill",
            ToolRequest::SystemdService(_) => "systemd_service",
            ToolRequest::GitStatus(_) => "git_status",
            ToolRequest::GitCheckout(_) => "git_checkout",
            ToolRequest::GitPull(_) => "git_pull",
            ToolRequest::DeployHook(_) => "deploy_hook",
            ToolRequest::GpioWrite(_) => "gpio_write",
            ToolRequest::GpioRead(_) => "gpio_read",
            ToolRequest::GpioPwm(_) => "gpio_pwm",
            ToolRequest::GpioBlink(_) => "gpio_blink",
            ToolRequest::MacroRun(_) => "macro_run",
        }
    }

    /// Name of the target the call acts on.
    pub fn target(&self) -> &str {
        match self {
            ToolRequest::SshExec(a) => &a.target,
            ToolRequest::ScpPut(a) => &a.target,
            ToolRequest::ScpGet(a) => &a.target,
            ToolRequest::TmuxEnsure(a) => &a.target,
            ToolRequest::TmuxSendKeys(a) => &a.target,
            ToolRequest::TmuxKill(a) => &a.target,
            ToolRequest::SystemdService(a) => &a.target,
            ToolRequest::GitStatus(a) => &a.target,
            ToolRequest::GitCheckout(a) => &a.target,
            ToolRequest::GitPull(a) => &a.target,
            ToolRequest::DeployHook(a) => &a.target,
            ToolRequest::GpioWrite(a) => &a.target,
            ToolRequest::GpioRead(a) => &a.target,
            ToolRequest::GpioPwm(a) => &a.target,
            ToolRequest::GpioBlink(a) => &a.target,
            ToolRequest::MacroRun(a) => &a.target,
        }
    }

    fn validate(&self) -> Result<(), GatewayError> {
        if self.target().trim().is_empty() {
            return Err(GatewayError::invalid("target must not be empty"));
        }
        match self {
            ToolRequest::SshExec(a) => a.validate(),
            ToolRequest::ScpPut(a) => a.validate(),
            ToolRequest::ScpGet(a) => a.validate(),
            ToolRequest::TmuxEnsure(a) => a.validate(),
            ToolRequest::TmuxSendKeys(a) => a.validate(),
            ToolRequest::TmuxKill(a) => a.validate(),
            ToolRequest::SystemdService(a) => a.validate(),
            ToolRequest::GitStatus(a) => a.validate(),
            ToolRequest::GitCheckout(a) => a.validate(),
            ToolRequest::GitPull(a) => a.validate(),
            ToolRequest::DeployHook(a) => a.validate(),
            ToolRequest::GpioWrite(a) => a.validate(),
            ToolRequest::GpioRead(_) => Ok(()),
            ToolRequest::GpioPwm(a) => a.validate(),
            ToolRequest::GpioBlink(a) => a.validate(),
            ToolRequest::MacroRun(a) => a.validate(),
        }
    }

    /// Apply every policy rule that governs this call against one snapshot.
    ///
    /// Denials come back as [`GatewayError::PolicyDenied`] carrying the
    /// reason.
    pub fn check_policy(&self, policy: &PolicyDocument) -> Result<(), GatewayError> {
        let target = self.target();
        decision(policy.tool_allowed(self.name(), Some(target)))?;

        match self {
            ToolRequest::SshExec(a) => decision(policy.shell_command_allowed(&a.command)),
            ToolRequest::GpioWrite(a) => a.plan(policy.gpio(target)).map(drop),
            ToolRequest::GpioRead(a) => a.plan(policy.gpio(target)).map(drop),
            ToolRequest::GpioPwm(a) => a.plan(policy.gpio(target)).map(drop),
            ToolRequest::GpioBlink(a) => a.plan(policy.gpio(target)).map(drop),
            ToolRequest::MacroRun(a) => a.plan(policy.gpio(target)).map(drop),
            _ => Ok(()),
        }
    }

    /// Run the call against its target and return the response JSON.
    pub async fn execute(self, ctx: &ToolContext<'_>) -> Result<Value, GatewayError> {
        match self {
            ToolRequest::SshExec(a) => to_json(shell::ssh_exec(ctx, a).await?),
            ToolRequest::ScpPut(a) => to_json(shell::scp_put(ctx, a).await?),
            ToolRequest::ScpGet(a) => to_json(shell::scp_get(ctx, a).await?),
            ToolRequest::TmuxEnsure(a) => to_json(tmux::ensure(ctx, a).await?),
            ToolRequest::TmuxSendKeys(a) => to_json(tmux::send_keys(ctx, a).await?),
            ToolRequest::TmuxKill(a) => to_json(tmux::kill(ctx, a).await?),
            ToolRequest::SystemdService(a) => to_json(systemd::service_action(ctx, a).await?),
            ToolRequest::GitStatus(a) => to_json(git::status(ctx, a).await?),
            ToolRequest::GitCheckout(a) => to_json(git::checkout(ctx, a).await?),
            ToolRequest::GitPull(a) => to_json(git::pull(ctx, a).await?),
            ToolRequest::DeployHook(a) => to_json(git::deploy_hook(ctx, a).await?),
            ToolRequest::GpioWrite(a) => to_json(gpio::run(ctx, |p| a.plan(p)).await?),
            ToolRequest::GpioRead(a) => to_json(gpio::run(ctx, |p| a.plan(p)).await?),
            ToolRequest::GpioPwm(a) => to_json(gpio::run(ctx, |p| a.plan(p)).await?),
            ToolRequest::GpioBlink(a) => to_json(gpio::run(ctx, |p| a.plan(p)).await?),
            ToolRequest::MacroRun(a) => to_json(gpio::run(ctx, |p| a.plan(p)).await?),
        }
    }
}

fn decode<T: DeserializeOwned>(args: Value) -> Result<T, GatewayError> {
    serde_json::from_value(args).map_err(|e| GatewayError::invalid(e.to_string()))
}

fn to_json<T: Serialize>(response: T) -> Result<Value, GatewayError> {
    serde_json::to_value(response)
        .map_err(|e| GatewayError::Remote(format!("cannot encode response: {e}")))
}

fn decision(decision: PolicyDecision) -> Result<(), GatewayError> {
    match decision {
        PolicyDecision::Allowed => Ok(()),
        PolicyDecision::Denied(reason) => Err(GatewayError::PolicyDenied(reason)),
    }
}

// ── Boundary validators ─────────────────────────────────────────────────

static SESSION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid pattern"));

static UNIT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9@._:-]{1,255}$").expect("valid pattern"));

static GIT_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._/-]+$").expect("valid pattern"));

static GIT_REMOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("valid pattern"));

static SCRIPT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("valid pattern"));

static REMOTE_DIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._/~+@-]+$").expect("valid pattern"));

fn check(pattern: &Regex, value: &str, field: &str) -> Result<(), GatewayError> {
    // A leading dash would be read as an option by the remote command.
    if value.starts_with('-') || !pattern.is_match(value) {
        return Err(GatewayError::invalid(format!(
            "{field} {value:?} contains disallowed characters"
        )));
    }
    Ok(())
}

pub(crate) fn check_session_name(value: &str) -> Result<(), GatewayError> {
    check(&SESSION_NAME, value, "session")
}

pub(crate) fn check_unit_name(value: &str) -> Result<(), GatewayError> {
    check(&UNIT_NAME, value, "name")
}

pub(crate) fn check_git_ref(value: &str, field: &str) -> Result<(), GatewayError> {
    check(&GIT_REF, value, field)?;
    if value.contains("..") {
        return Err(GatewayError::invalid(format!("{field} must not contain '..'")));
    }
    Ok(())
}

pub(crate) fn check_git_remote(value: &str) -> Result<(), GatewayError> {
    check(&GIT_REMOTE, value, "remote")
}

pub(crate) fn check_script_name(value: &str) -> Result<(), GatewayError> {
    check(&SCRIPT_NAME, value, "script")?;
    if value == "." || value == ".." {
        return Err(GatewayError::invalid("script must name a file"));
    }
    Ok(())
}

/// Directories end up after `cd` in the remote command line, so they are
/// held to plain path characters.
pub(crate) fn check_remote_dir(value: &str, field: &str) -> Result<(), GatewayError> {
    check(&REMOTE_DIR, value, field)
}
