//! GPIO tool arguments.
//!
//! Range checks on the operation fields run here at the boundary, through
//! [`GpioOp::check_ranges`]. Macro steps get the same checks via
//! [`MacroStep::to_op`]. Pin, mode and capability checks belong to
//! [`crate::gpio`] and run against the policy twice: once in the
//! dispatcher's policy pass and once more on a fresh snapshot immediately
//! before the agent is invoked.

use serde::{Deserialize, Serialize};

use pigate_config::policy::GpioPolicy;

use super::{StructuredResult, ToolContext};
use crate::error::GatewayError;
use crate::gpio::{
    AgentInvocation, GpioOp, MacroStep, Pull, parse_agent_reply, plan_macro, plan_op,
};
use crate::transport::ExecRequest;

/// Output level as either `0`/`1` or a boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PinLevel {
    Bool(bool),
    Number(u64),
}

impl PinLevel {
    fn is_high(&self) -> Result<bool, GatewayError> {
        match *self {
            PinLevel::Bool(b) => Ok(b),
            PinLevel::Number(0) => Ok(false),
            PinLevel::Number(1) => Ok(true),
            PinLevel::Number(n) => Err(GatewayError::invalid(format!(
                "value must be 0 or 1, got {n}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpioWriteArgs {
    pub target: String,
    pub pin: u32,
    pub value: PinLevel,
    #[serde(default)]
    pub mode: Option<String>,
}

impl GpioWriteArgs {
    pub(crate) fn validate(&self) -> Result<(), GatewayError> {
        self.value.is_high().map(drop)
    }

    pub(crate) fn plan(
        &self,
        policy: Option<&GpioPolicy>,
    ) -> Result<AgentInvocation, GatewayError> {
        let op = GpioOp::Write {
            pin: self.pin,
            high: self.value.is_high()?,
        };
        plan_op(policy, &self.target, &op, self.mode.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpioReadArgs {
    pub target: String,
    pub pin: u32,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub pull: Option<Pull>,
}

impl GpioReadArgs {
    pub(crate) fn plan(
        &self,
        policy: Option<&GpioPolicy>,
    ) -> Result<AgentInvocation, GatewayError> {
        let op = GpioOp::Read {
            pin: self.pin,
            pull: self.pull,
        };
        plan_op(policy, &self.target, &op, self.mode.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpioPwmArgs {
    pub target: String,
    pub pin: u32,
    /// Duty cycle in percent.
    pub duty: f64,
    /// Hz.
    #[serde(default = "default_freq")]
    pub freq: f64,
    /// Seconds.
    #[serde(default = "default_pwm_duration")]
    pub duration: f64,
    #[serde(default)]
    pub mode: Option<String>,
}

fn default_freq() -> f64 {
    1000.0
}

fn default_pwm_duration() -> f64 {
    0.2
}

impl GpioPwmArgs {
    fn op(&self) -> GpioOp {
        GpioOp::Pwm {
            pin: self.pin,
            duty: self.duty,
            freq: self.freq,
            duration: self.duration,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), GatewayError> {
        self.op().check_ranges()
    }

    pub(crate) fn plan(
        &self,
        policy: Option<&GpioPolicy>,
    ) -> Result<AgentInvocation, GatewayError> {
        plan_op(policy, &self.target, &self.op(), self.mode.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpioBlinkArgs {
    pub target: String,
    pub pin: u32,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default = "default_half_period")]
    pub on_time: f64,
    #[serde(default = "default_half_period")]
    pub off_time: f64,
    #[serde(default)]
    pub mode: Option<String>,
}

fn default_count() -> u32 {
    5
}

fn default_half_period() -> f64 {
    0.5
}

impl GpioBlinkArgs {
    fn op(&self) -> GpioOp {
        GpioOp::Blink {
            pin: self.pin,
            count: self.count,
            on_time: self.on_time,
            off_time: self.off_time,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), GatewayError> {
        self.op().check_ranges()
    }

    pub(crate) fn plan(
        &self,
        policy: Option<&GpioPolicy>,
    ) -> Result<AgentInvocation, GatewayError> {
        plan_op(policy, &self.target, &self.op(), self.mode.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroRunArgs {
    pub target: String,
    pub steps: Vec<MacroStep>,
    #[serde(default)]
    pub mode: Option<String>,
}

impl MacroRunArgs {
    pub(crate) fn validate(&self) -> Result<(), GatewayError> {
        if self.steps.is_empty() {
            return Err(GatewayError::invalid("steps must not be empty"));
        }
        // Unknown ops and bad pins are left to the policy pass.
        for (index, step) in self.steps.iter().enumerate() {
            if let Err(GatewayError::InvalidArguments(reason)) = step.to_op() {
                return Err(GatewayError::invalid(format!("step {index}: {reason}")));
            }
        }
        Ok(())
    }

    pub(crate) fn plan(
        &self,
        policy: Option<&GpioPolicy>,
    ) -> Result<AgentInvocation, GatewayError> {
        plan_macro(policy, &self.target, &self.steps, self.mode.as_deref())
    }
}

/// Re-plan against the current policy, then run the agent once.
///
/// The plan built here is the one that runs: if the policy changed since
/// the dispatcher's check and the call no longer validates, it is denied
/// without touching the target.
pub(crate) async fn run<F>(
    ctx: &ToolContext<'_>,
    plan: F,
) -> Result<StructuredResult, GatewayError>
where
    F: FnOnce(Option<&GpioPolicy>) -> Result<AgentInvocation, GatewayError>,
{
    let invocation = {
        let policy = ctx.policy.current();
        plan(policy.gpio(&ctx.target.name))?
    };
    let output = ctx
        .transport
        .exec(ctx.target, ExecRequest::new(invocation.command()))
        .await?;
    parse_agent_reply(&output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRequest;
    use serde_json::json;

    fn rejects(tool: &str, args: serde_json::Value) -> bool {
        matches!(
            ToolRequest::parse(tool, args),
            Err(GatewayError::InvalidArguments(_))
        )
    }

    #[test]
    fn test_write_value_forms() {
        for value in [json!(0), json!(1), json!(true), json!(false)] {
            let args = json!({"target": "lab1", "pin": 17, "value": value});
            assert!(ToolRequest::parse("gpio_write", args).is_ok());
        }
        assert!(rejects("gpio_write", json!({"target": "lab1", "pin": 17, "value": 2})));
        assert!(rejects("gpio_write", json!({"target": "lab1", "pin": 17, "value": "high"})));
        assert!(rejects("gpio_write", json!({"target": "lab1", "pin": -3, "value": 1})));
    }

    #[test]
    fn test_pwm_ranges() {
        assert!(rejects("gpio_pwm", json!({"target": "lab1", "pin": 22, "duty": 101})));
        assert!(rejects("gpio_pwm", json!({"target": "lab1", "pin": 22, "duty": 50, "freq": 0})));
        assert!(rejects(
            "gpio_pwm",
            json!({"target": "lab1", "pin": 22, "duty": 50, "duration": -1})
        ));

        let ok =
            ToolRequest::parse("gpio_pwm", json!({"target": "lab1", "pin": 22, "duty": 50}))
                .unwrap();
        let ToolRequest::GpioPwm(args) = ok else {
            panic!("wrong variant");
        };
        assert_eq!(args.freq, 1000.0);
        assert_eq!(args.duration, 0.2);
    }

    #[test]
    fn test_blink_defaults_and_ranges() {
        let ok = ToolRequest::parse("gpio_blink", json!({"target": "lab1", "pin": 17})).unwrap();
        let ToolRequest::GpioBlink(args) = ok else {
            panic!("wrong variant");
        };
        assert_eq!(args.count, 5);
        assert_eq!(args.on_time, 0.5);
        assert!(rejects("gpio_blink", json!({"target": "lab1", "pin": 17, "count": 0})));
    }

    #[test]
    fn test_read_pull_values() {
        let args = json!({"target": "lab1", "pin": 22, "pull": "up"});
        assert!(ToolRequest::parse("gpio_read", args).is_ok());
        assert!(rejects("gpio_read", json!({"target": "lab1", "pin": 22, "pull": "sideways"})));
    }

    #[test]
    fn test_macro_needs_steps() {
        assert!(rejects("macro_run", json!({"target": "lab1", "steps": []})));
        assert!(ToolRequest::parse(
            "macro_run",
            json!({"target": "lab1", "steps": [{"op": "write", "data": {"pin": 17, "value": 1}}]})
        )
        .is_ok());
    }

    #[test]
    fn test_macro_step_values_checked_at_parse() {
        let steps = json!([{"op": "pwm", "data": {"pin": 22, "duty": 500}}]);
        assert!(rejects("macro_run", json!({"target": "lab1", "steps": steps})));

        // Policy questions wait for the policy pass.
        let steps = json!([{"op": "i2c", "data": {"pin": 22}}]);
        assert!(ToolRequest::parse("macro_run", json!({"target": "lab1", "steps": steps})).is_ok());
    }
}
