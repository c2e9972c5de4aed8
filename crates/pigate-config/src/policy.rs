//! Policy engine — tool, shell-command and GPIO allowlists.
//!
//! A [`PolicyDocument`] is parsed from TOML and validated as a whole; a
//! document that fails validation is never handed out. Evaluation is a pure
//! function of the document and the request.
//!
//! ## TOML Example
//!
//! ```toml
//! enabled_tools = ["ssh_exec", "gpio_write"]
//!
//! [per_target_tools]
//! lab1 = ["gpio_write"]
//!
//! [shell]
//! allow_prefixes = ["git ", "ls"]
//! deny_substrings = ["rm -rf", "shutdown"]
//!
//! [gpio.lab1]
//! default_mode = "BCM"
//! agent_path = "/opt/pigate/gpio_agent.py"
//!
//! [gpio.lab1.allowed_pins]
//! BCM = [17, 18]
//!
//! [gpio.lab1.capabilities]
//! 17 = ["write", "read"]
//! 18 = ["pwm"]
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// The outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allowed,
    /// Denied, with a reason suitable for callers and the audit log.
    Denied(String),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allowed)
    }
}

/// GPIO pin numbering scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum AddressingMode {
    #[serde(rename = "BCM")]
    Bcm,
    #[serde(rename = "BOARD")]
    Board,
}

impl AddressingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressingMode::Bcm => "BCM",
            AddressingMode::Board => "BOARD",
        }
    }
}

impl fmt::Display for AddressingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AddressingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BCM" => Ok(AddressingMode::Bcm),
            "BOARD" => Ok(AddressingMode::Board),
            _ => Err(format!("mode must be BCM or BOARD, got {s:?}")),
        }
    }
}

/// An operation a pin is certified safe for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Read,
    Write,
    Pwm,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Read => "read",
            Capability::Write => "write",
            Capability::Pwm => "pwm",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-target GPIO capability matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpioPolicy {
    pub default_mode: AddressingMode,
    pub allowed_pins: BTreeMap<AddressingMode, BTreeSet<u32>>,
    pub capabilities: BTreeMap<u32, BTreeSet<Capability>>,
    /// Remote path of the agent script that actuates pins.
    pub agent_path: String,
}

impl GpioPolicy {
    /// Whether `pin` is allowlisted under `mode`.
    pub fn pin_allowed(&self, mode: AddressingMode, pin: u32) -> bool {
        self.allowed_pins
            .get(&mode)
            .is_some_and(|pins| pins.contains(&pin))
    }

    /// Capabilities certified for `pin` (empty when the pin has no entry).
    pub fn capabilities_of(&self, pin: u32) -> BTreeSet<Capability> {
        self.capabilities.get(&pin).cloned().unwrap_or_default()
    }
}

/// Command-level rules for the raw shell tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellPolicy {
    /// When non-empty, the trimmed command must start with one of these.
    #[serde(default)]
    pub allow_prefixes: Vec<String>,

    /// A command containing any of these anywhere is denied.
    #[serde(default)]
    pub deny_substrings: Vec<String>,
}

/// The complete, validated policy.
///
/// The default document is empty and therefore maximally permissive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyDocument {
    /// When non-empty, only these tools may be called.
    pub enabled_tools: BTreeSet<String>,
    /// Per-target tool allowlists; a target listed here may only use these.
    pub per_target_tools: BTreeMap<String, BTreeSet<String>>,
    pub shell: ShellPolicy,
    pub gpio: BTreeMap<String, GpioPolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    enabled_tools: Vec<String>,
    #[serde(default)]
    per_target_tools: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    shell: ShellPolicy,
    #[serde(default)]
    gpio: BTreeMap<String, GpioPolicyFile>,
}

#[derive(Debug, Deserialize)]
struct GpioPolicyFile {
    #[serde(default)]
    default_mode: Option<String>,
    #[serde(default)]
    allowed_pins: BTreeMap<String, Vec<i64>>,
    #[serde(default)]
    capabilities: BTreeMap<String, Vec<Capability>>,
    #[serde(default)]
    agent_path: String,
}

impl PolicyDocument {
    /// Load and validate a policy document from a TOML file.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Load the document, treating a missing file as the default policy.
    pub async fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %path.display(),
                    "Policy file not found, using permissive defaults"
                );
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Parse and validate a policy document from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let file: PolicyFile = toml::from_str(s)?;

        for (i, prefix) in file.shell.allow_prefixes.iter().enumerate() {
            if prefix.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "shell.allow_prefixes[{i}] must not be blank"
                )));
            }
        }
        for (i, needle) in file.shell.deny_substrings.iter().enumerate() {
            if needle.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "shell.deny_substrings[{i}] must not be empty"
                )));
            }
        }

        let mut gpio = BTreeMap::new();
        for (target, raw) in file.gpio {
            let policy = compile_gpio(&target, raw)?;
            gpio.insert(target, policy);
        }

        Ok(Self {
            enabled_tools: file.enabled_tools.into_iter().collect(),
            per_target_tools: file
                .per_target_tools
                .into_iter()
                .map(|(target, tools)| (target, tools.into_iter().collect()))
                .collect(),
            shell: file.shell,
            gpio,
        })
    }

    /// Decide whether `tool` may be called, optionally for a given target.
    pub fn tool_allowed(&self, tool: &str, target: Option<&str>) -> PolicyDecision {
        if !self.enabled_tools.is_empty() && !self.enabled_tools.contains(tool) {
            return PolicyDecision::Denied(format!("tool '{tool}' is not enabled"));
        }
        if let Some(target) = target
            && let Some(tools) = self.per_target_tools.get(target)
            && !tools.contains(tool)
        {
            return PolicyDecision::Denied(format!(
                "tool '{tool}' is not enabled for target '{target}'"
            ));
        }
        PolicyDecision::Allowed
    }

    /// Decide whether a raw shell command may run.
    ///
    /// Deny-substrings are checked first and always win.
    pub fn shell_command_allowed(&self, command: &str) -> PolicyDecision {
        if let Some(needle) = self
            .shell
            .deny_substrings
            .iter()
            .find(|s| command.contains(s.as_str()))
        {
            return PolicyDecision::Denied(format!(
                "command contains denied substring {needle:?}"
            ));
        }
        if !self.shell.allow_prefixes.is_empty() {
            let trimmed = command.trim();
            if !self
                .shell
                .allow_prefixes
                .iter()
                .any(|p| trimmed.starts_with(p.as_str()))
            {
                return PolicyDecision::Denied(
                    "command does not match any allowed prefix".to_string(),
                );
            }
        }
        PolicyDecision::Allowed
    }

    /// GPIO capability matrix for `target`, if one is configured.
    pub fn gpio(&self, target: &str) -> Option<&GpioPolicy> {
        self.gpio.get(target)
    }
}

fn compile_gpio(target: &str, raw: GpioPolicyFile) -> Result<GpioPolicy, ConfigError> {
    let default_mode = match raw.default_mode.as_deref() {
        None => AddressingMode::Bcm,
        Some(s) => s.parse().map_err(|e: String| {
            ConfigError::Validation(format!("gpio.{target}.default_mode: {e}"))
        })?,
    };

    if raw.agent_path.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "gpio.{target}.agent_path must not be empty"
        )));
    }

    let mut allowed_pins: BTreeMap<AddressingMode, BTreeSet<u32>> = BTreeMap::new();
    for (mode_key, pins) in raw.allowed_pins {
        let mode: AddressingMode = mode_key.parse().map_err(|e: String| {
            ConfigError::Validation(format!("gpio.{target}.allowed_pins: {e}"))
        })?;
        let set = allowed_pins.entry(mode).or_default();
        for pin in pins {
            let pin = u32::try_from(pin).map_err(|_| {
                ConfigError::Validation(format!(
                    "gpio.{target}.allowed_pins.{mode}: pin {pin} is out of range"
                ))
            })?;
            set.insert(pin);
        }
    }

    let mut capabilities = BTreeMap::new();
    for (pin_key, caps) in raw.capabilities {
        let pin: u32 = pin_key.trim().parse().map_err(|_| {
            ConfigError::Validation(format!(
                "gpio.{target}.capabilities: key {pin_key:?} is not a pin number"
            ))
        })?;
        let in_any_mode = allowed_pins.values().any(|pins| pins.contains(&pin));
        if !in_any_mode {
            return Err(ConfigError::Validation(format!(
                "gpio.{target}.capabilities: pin {pin} is not in allowed_pins for any mode"
            )));
        }
        capabilities.insert(pin, caps.into_iter().collect());
    }

    Ok(GpioPolicy {
        default_mode,
        allowed_pins,
        capabilities,
        agent_path: raw.agent_path,
    })
}
