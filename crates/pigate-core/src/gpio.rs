//! GPIO capability validation and agent command building.
//!
//! Nothing reaches the remote agent unless the pin, addressing mode and
//! operation have been certified for that target in the policy document.
//! Validation is pure: it reads only the [`GpioPolicy`] it is given.
//!
//! The agent is a fixed script on the target. It receives one base64
//! encoded JSON payload `{"op": ..., "data": {...}}` as its only argument
//! and prints one JSON object `{"ok": bool, ...}` on stdout.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use pigate_config::policy::{AddressingMode, Capability, GpioPolicy};

use crate::error::GatewayError;
use crate::tools::StructuredResult;
use crate::transport::ExecOutput;

/// Internal pull resistor setting for reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pull {
    Up,
    Down,
    Off,
}

/// One single-pin operation.
#[derive(Debug, Clone, PartialEq)]
pub enum GpioOp {
    Write {
        pin: u32,
        high: bool,
    },
    Read {
        pin: u32,
        pull: Option<Pull>,
    },
    Pwm {
        pin: u32,
        duty: f64,
        freq: f64,
        duration: f64,
    },
    Blink {
        pin: u32,
        count: u32,
        on_time: f64,
        off_time: f64,
    },
}

impl GpioOp {
    pub fn name(&self) -> &'static str {
        match self {
            GpioOp::Write { .. } => "write",
            GpioOp::Read { .. } => "read",
            GpioOp::Pwm { .. } => "pwm",
            GpioOp::Blink { .. } => "blink",
        }
    }

    pub fn pin(&self) -> u32 {
        match self {
            GpioOp::Write { pin, .. }
            | GpioOp::Read { pin, .. }
            | GpioOp::Pwm { pin, .. }
            | GpioOp::Blink { pin, .. } => *pin,
        }
    }

    /// Capability the pin must carry for this operation.
    pub fn capability(&self) -> Capability {
        match self {
            GpioOp::Write { .. } | GpioOp::Blink { .. } => Capability::Write,
            GpioOp::Read { .. } => Capability::Read,
            GpioOp::Pwm { .. } => Capability::Pwm,
        }
    }

    /// Range checks on everything but the pin. Failures are
    /// [`GatewayError::InvalidArguments`].
    pub fn check_ranges(&self) -> Result<(), GatewayError> {
        match *self {
            GpioOp::Write { .. } | GpioOp::Read { .. } => Ok(()),
            GpioOp::Pwm {
                duty,
                freq,
                duration,
                ..
            } => {
                if !(0.0..=100.0).contains(&duty) {
                    return Err(GatewayError::invalid("duty must be within 0..=100"));
                }
                if !(freq.is_finite() && freq > 0.0) {
                    return Err(GatewayError::invalid("freq must be greater than 0"));
                }
                non_negative(duration, "duration")
            }
            GpioOp::Blink {
                count,
                on_time,
                off_time,
                ..
            } => {
                if count == 0 {
                    return Err(GatewayError::invalid("count must be at least 1"));
                }
                non_negative(on_time, "on_time")?;
                non_negative(off_time, "off_time")
            }
        }
    }

    fn data(&self, mode: AddressingMode) -> Value {
        match self {
            GpioOp::Write { pin, high } => json!({
                "pin": pin,
                "value": u8::from(*high),
                "mode": mode,
                "direction": "out",
            }),
            GpioOp::Read { pin, pull } => json!({
                "pin": pin,
                "mode": mode,
                "direction": "in",
                "pull": pull,
            }),
            GpioOp::Pwm {
                pin,
                duty,
                freq,
                duration,
            } => json!({
                "pin": pin,
                "duty": duty,
                "freq": freq,
                "duration": duration,
                "mode": mode,
            }),
            GpioOp::Blink {
                pin,
                count,
                on_time,
                off_time,
            } => json!({
                "pin": pin,
                "count": count,
                "on_time": on_time,
                "off_time": off_time,
                "mode": mode,
            }),
        }
    }
}

fn non_negative(value: f64, field: &str) -> Result<(), GatewayError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(GatewayError::invalid(format!("{field} must be >= 0")))
    }
}

/// Check that `pin` may be used for `capability` on `target`.
///
/// Returns the resolved addressing mode. An unset mode falls back to the
/// target's default.
pub fn validate_pin(
    policy: Option<&GpioPolicy>,
    target: &str,
    pin: u32,
    requested_mode: Option<&str>,
    capability: Capability,
) -> Result<AddressingMode, GatewayError> {
    let policy = policy.ok_or_else(|| {
        GatewayError::denied(format!("GPIO policy missing for target '{target}'"))
    })?;

    let mode = match requested_mode {
        None => policy.default_mode,
        Some(raw) => raw.parse::<AddressingMode>().map_err(GatewayError::denied)?,
    };

    if !policy.pin_allowed(mode, pin) {
        return Err(GatewayError::denied(format!(
            "pin {pin} not allowed for mode {mode} on target '{target}'"
        )));
    }

    let caps = policy.capabilities_of(pin);
    if !caps.contains(&capability) {
        let has: Vec<&str> = caps.iter().map(Capability::as_str).collect();
        return Err(GatewayError::denied(format!(
            "pin {pin} lacks capability '{capability}' (has: {has:?})"
        )));
    }

    Ok(mode)
}

/// One step of a macro as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroStep {
    pub op: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl MacroStep {
    /// Decode `data` into the typed operation, with the same defaults and
    /// range checks as the single-pin tools. An unknown op or a bad pin is
    /// a policy denial; a bad field value is an argument error.
    pub fn to_op(&self) -> Result<GpioOp, GatewayError> {
        if !matches!(self.op.as_str(), "write" | "read" | "pwm" | "blink") {
            return Err(GatewayError::denied(format!("unknown op '{}'", self.op)));
        }
        let pin = self
            .data
            .get("pin")
            .and_then(Value::as_u64)
            .and_then(|p| u32::try_from(p).ok())
            .ok_or_else(|| GatewayError::denied("invalid pin"))?;

        let op = match self.op.as_str() {
            "write" => GpioOp::Write {
                pin,
                high: self.level()?,
            },
            "read" => GpioOp::Read {
                pin,
                pull: match self.data.get("pull") {
                    None | Some(Value::Null) => None,
                    Some(raw) => Some(
                        Pull::deserialize(raw)
                            .map_err(|_| GatewayError::invalid("pull must be up, down or off"))?,
                    ),
                },
            },
            "pwm" => GpioOp::Pwm {
                pin,
                duty: self.number("duty", None)?,
                freq: self.number("freq", Some(1000.0))?,
                duration: self.number("duration", Some(0.2))?,
            },
            _ => GpioOp::Blink {
                pin,
                count: match self.data.get("count") {
                    None | Some(Value::Null) => 5,
                    Some(raw) => raw
                        .as_u64()
                        .and_then(|c| u32::try_from(c).ok())
                        .ok_or_else(|| GatewayError::invalid("count must be an integer"))?,
                },
                on_time: self.number("on_time", Some(0.5))?,
                off_time: self.number("off_time", Some(0.5))?,
            },
        };
        op.check_ranges()?;
        Ok(op)
    }

    fn level(&self) -> Result<bool, GatewayError> {
        match self.data.get("value") {
            Some(Value::Bool(b)) => Ok(*b),
            Some(raw) => match raw.as_u64() {
                Some(0) => Ok(false),
                Some(1) => Ok(true),
                _ => Err(GatewayError::invalid(format!("value must be 0 or 1, got {raw}"))),
            },
            None => Err(GatewayError::invalid("value is required")),
        }
    }

    fn number(&self, field: &str, default: Option<f64>) -> Result<f64, GatewayError> {
        match self.data.get(field) {
            None | Some(Value::Null) => {
                default.ok_or_else(|| GatewayError::invalid(format!("{field} is required")))
            }
            Some(raw) => raw
                .as_f64()
                .ok_or_else(|| GatewayError::invalid(format!("{field} must be a number"))),
        }
    }
}

/// A validated, ready-to-run agent call.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentInvocation {
    pub agent_path: String,
    pub payload: Value,
}

impl AgentInvocation {
    /// `python3 "<agent>" "<base64 payload>"`.
    pub fn command(&self) -> String {
        format!(
            "python3 \"{}\" \"{}\"",
            self.agent_path,
            encode_payload(&self.payload)
        )
    }
}

/// Compact JSON, then standard base64.
pub fn encode_payload(payload: &Value) -> String {
    STANDARD.encode(payload.to_string())
}

/// Validate a single-pin operation and build its agent call.
pub fn plan_op(
    policy: Option<&GpioPolicy>,
    target: &str,
    op: &GpioOp,
    mode: Option<&str>,
) -> Result<AgentInvocation, GatewayError> {
    let resolved = validate_pin(policy, target, op.pin(), mode, op.capability())?;
    let agent_path = agent_path(policy)?;
    Ok(AgentInvocation {
        agent_path,
        payload: json!({ "op": op.name(), "data": op.data(resolved) }),
    })
}

/// Validate every macro step, then build one agent call for the whole list.
///
/// A step's mode is its own `data.mode`, else `mode`, else the target
/// default. Each step ships as the typed operation's data with the resolved
/// mode, so unknown keys are dropped. If any step fails, nothing is built.
pub fn plan_macro(
    policy: Option<&GpioPolicy>,
    target: &str,
    steps: &[MacroStep],
    mode: Option<&str>,
) -> Result<AgentInvocation, GatewayError> {
    let mut resolved_steps = Vec::with_capacity(steps.len());

    for (index, step) in steps.iter().enumerate() {
        let resolved_step = plan_step(policy, target, step, mode).map_err(|e| match e {
            GatewayError::PolicyDenied(reason) => {
                GatewayError::denied(format!("step {index}: {reason}"))
            }
            GatewayError::InvalidArguments(reason) => {
                GatewayError::invalid(format!("step {index}: {reason}"))
            }
            other => other,
        })?;
        resolved_steps.push(resolved_step);
    }

    let agent_path = agent_path(policy)?;
    Ok(AgentInvocation {
        agent_path,
        payload: json!({ "op": "macro", "data": { "steps": resolved_steps } }),
    })
}

fn plan_step(
    policy: Option<&GpioPolicy>,
    target: &str,
    step: &MacroStep,
    mode: Option<&str>,
) -> Result<Value, GatewayError> {
    let op = step.to_op()?;
    let step_mode = match step.data.get("mode") {
        None | Some(Value::Null) => mode,
        Some(Value::String(s)) => Some(s.as_str()),
        Some(_) => return Err(GatewayError::denied("mode must be a string")),
    };
    let resolved = validate_pin(policy, target, op.pin(), step_mode, op.capability())?;
    Ok(json!({ "op": op.name(), "data": op.data(resolved) }))
}

fn agent_path(policy: Option<&GpioPolicy>) -> Result<String, GatewayError> {
    policy
        .map(|p| p.agent_path.clone())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| GatewayError::denied("agent_path missing in policy"))
}

/// Interpret the agent's stdout.
///
/// Empty or non-JSON output, or an object without a boolean `ok`, is an
/// [`GatewayError::Agent`] failure rather than silent success.
pub fn parse_agent_reply(output: &ExecOutput) -> Result<StructuredResult, GatewayError> {
    let text = output.stdout.trim();
    if text.is_empty() {
        return Err(GatewayError::Agent(format!(
            "agent produced no output (exit {}): {}",
            output.exit_code,
            output.stderr.trim()
        )));
    }

    let reply: Value = serde_json::from_str(text)
        .map_err(|e| GatewayError::Agent(format!("invalid agent output: {e}")))?;
    let ok = reply
        .get("ok")
        .and_then(Value::as_bool)
        .ok_or_else(|| GatewayError::Agent("agent reply has no boolean 'ok'".to_string()))?;

    if ok {
        return Ok(StructuredResult::success(reply));
    }

    let error = reply
        .get("error")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| output.stderr.trim().to_string());
    Ok(StructuredResult::failure(error))
}
