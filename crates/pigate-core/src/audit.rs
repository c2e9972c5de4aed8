//! Structured audit events.
//!
//! Every call that reaches the gateway produces exactly one audit event,
//! emitted as a `tracing` event with target [`AUDIT_TARGET`] and
//! `audit = true` so log pipelines can split them from diagnostics.
//!
//! Audit fields are limited to tool, target, caller, source address,
//! outcome, error kind and denial reason. Credentials, key paths, env
//! values and file contents never appear.

use std::fmt;
use std::net::IpAddr;

use tracing::{error, info, warn};

use crate::error::{ErrorKind, GatewayError};

/// `tracing` target of every audit event.
pub const AUDIT_TARGET: &str = "pigate::audit";

/// How a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The tool ran. A non-zero remote exit code is still `Ok`.
    Ok,
    /// Refused by authentication, rate limiting or policy.
    Denied,
    /// Accepted but failed.
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Denied => "denied",
            Outcome::Error => "error",
        }
    }

    /// Classify a failure.
    pub fn of(err: &GatewayError) -> Self {
        match err.kind() {
            ErrorKind::Unauthorized | ErrorKind::RateLimited | ErrorKind::PolicyDenied => {
                Outcome::Denied
            }
            _ => Outcome::Error,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit event, borrowed from the call that produced it.
#[derive(Debug, Clone)]
pub struct AuditRecord<'a> {
    pub tool: Option<&'a str>,
    pub target: Option<&'a str>,
    pub caller: Option<&'a str>,
    pub source: IpAddr,
    pub outcome: Outcome,
    pub error_kind: Option<ErrorKind>,
    /// Only set for denials.
    pub reason: Option<&'a str>,
}

impl<'a> AuditRecord<'a> {
    /// Build the record for a finished call.
    pub fn for_result<T>(
        tool: Option<&'a str>,
        target: Option<&'a str>,
        caller: Option<&'a str>,
        source: IpAddr,
        result: &'a Result<T, GatewayError>,
    ) -> Self {
        let (outcome, error_kind, reason) = match result {
            Ok(_) => (Outcome::Ok, None, None),
            Err(err) => {
                let outcome = Outcome::of(err);
                let reason = match err {
                    GatewayError::PolicyDenied(reason) | GatewayError::Unauthorized(reason) => {
                        Some(reason.as_str())
                    }
                    _ => None,
                };
                (outcome, Some(err.kind()), reason)
            }
        };
        Self {
            tool,
            target,
            caller,
            source,
            outcome,
            error_kind,
            reason,
        }
    }

    /// Event name, stable for log queries.
    pub fn event(&self) -> &'static str {
        match (self.outcome, self.error_kind) {
            (Outcome::Ok, _) => "tool_call",
            (_, Some(ErrorKind::Unauthorized | ErrorKind::RateLimited)) => "auth_denied",
            (Outcome::Denied, _) => "tool_blocked",
            (Outcome::Error, _) => "tool_error",
        }
    }

    /// Emit the event. Successes log at info, denials at warn, errors at
    /// error.
    pub fn emit(&self) {
        let event = self.event();
        let outcome = self.outcome.as_str();
        let error_kind = self.error_kind.map(|k| k.as_str());
        match self.outcome {
            Outcome::Ok => info!(
                target: AUDIT_TARGET,
                audit = true,
                event,
                tool = self.tool,
                target_host = self.target,
                caller = self.caller,
                source = %self.source,
                outcome,
                "audit event"
            ),
            Outcome::Denied => warn!(
                target: AUDIT_TARGET,
                audit = true,
                event,
                tool = self.tool,
                target_host = self.target,
                caller = self.caller,
                source = %self.source,
                outcome,
                error_kind,
                reason = self.reason,
                "audit event"
            ),
            Outcome::Error => error!(
                target: AUDIT_TARGET,
                audit = true,
                event,
                tool = self.tool,
                target_host = self.target,
                caller = self.caller,
                source = %self.source,
                outcome,
                error_kind,
                "audit event"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const SRC: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn test_outcome_classification() {
        assert_eq!(Outcome::of(&GatewayError::RateLimited), Outcome::Denied);
        assert_eq!(Outcome::of(&GatewayError::denied("x")), Outcome::Denied);
        assert_eq!(Outcome::of(&GatewayError::Timeout("x".into())), Outcome::Error);
        assert_eq!(Outcome::of(&GatewayError::invalid("x")), Outcome::Error);
    }

    #[test]
    fn test_event_names() {
        let ok: Result<(), GatewayError> = Ok(());
        let record =
            AuditRecord::for_result(Some("ssh_exec"), Some("pi"), Some("api-key:0"), SRC, &ok);
        assert_eq!(record.event(), "tool_call");
        assert_eq!(record.reason, None);

        let denied: Result<(), GatewayError> = Err(GatewayError::denied("tool 'x' is not enabled"));
        let record = AuditRecord::for_result(Some("x"), None, Some("api-key:0"), SRC, &denied);
        assert_eq!(record.event(), "tool_blocked");
        assert_eq!(record.reason, Some("tool 'x' is not enabled"));

        let limited: Result<(), GatewayError> = Err(GatewayError::RateLimited);
        let record = AuditRecord::for_result(None, None, Some("api-key:0"), SRC, &limited);
        assert_eq!(record.event(), "auth_denied");

        let failed: Result<(), GatewayError> = Err(GatewayError::Remote("eof".into()));
        let record = AuditRecord::for_result(Some("scp_get"), Some("pi"), None, SRC, &failed);
        assert_eq!(record.event(), "tool_error");
        assert_eq!(record.error_kind, Some(ErrorKind::Remote));
        assert_eq!(record.reason, None);
    }
}
