//! Call dispatcher: the single entry point for tool invocations.
//!
//! ```text
//! invoke(meta, call)
//!     → admit               // authenticate, then rate limit
//!     → dispatch(admitted, call)
//!         → ToolRequest::parse          // NotFound / InvalidArguments
//!         → TargetRegistry::get         // NotFound
//!         → check_policy (one snapshot) // PolicyDenied
//!         → execute                     // Remote / Timeout / Agent
//!     → one audit event
//! ```

use std::net::IpAddr;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use pigate_config::{PolicyStore, TargetRegistry};

use crate::audit::AuditRecord;
use crate::auth::{Admitted, Authenticator, Call};
use crate::error::GatewayError;
use crate::rate_limit::RateLimiter;
use crate::tools::{ToolCall, ToolContext, ToolDescriptor, ToolRequest, list_tools};
use crate::transport::Transport;

/// Caller-supplied metadata that travels with a call.
#[derive(Debug, Clone, Copy)]
pub struct CallMeta<'a> {
    /// Raw `Authorization` header value.
    pub authorization: Option<&'a str>,
    pub source: IpAddr,
}

/// Routes admitted calls to tools. Cheap to share behind an [`Arc`].
pub struct Dispatcher {
    registry: Arc<TargetRegistry>,
    policy: Arc<PolicyStore>,
    transport: Transport,
    authenticator: Arc<Authenticator>,
    limiter: Arc<RateLimiter>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<TargetRegistry>,
        policy: Arc<PolicyStore>,
        transport: Transport,
        authenticator: Arc<Authenticator>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            registry,
            policy,
            transport,
            authenticator,
            limiter,
        }
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &Arc<PolicyStore> {
        &self.policy
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Authenticate and rate-limit one call.
    ///
    /// A refusal is audited here, so a call that fails admission produces
    /// its one audit event without ever reaching [`dispatch`](Self::dispatch).
    pub fn admit(&self, meta: CallMeta<'_>) -> Result<Call<Admitted>, GatewayError> {
        let mut caller = None;
        let result = Call::new(meta.source, meta.authorization)
            .verify(&self.authenticator)
            .and_then(|verified| {
                caller = Some(verified.context().caller_identity.clone());
                verified.admit(&self.limiter)
            });

        if result.is_err() {
            AuditRecord::for_result(None, None, caller.as_deref(), meta.source, &result).emit();
        }
        result
    }

    /// Admit, then dispatch.
    pub async fn invoke(&self, meta: CallMeta<'_>, call: ToolCall) -> Result<Value, GatewayError> {
        let admitted = self.admit(meta)?;
        self.dispatch(&admitted, call).await
    }

    /// Run a tool call for an already admitted caller.
    pub async fn dispatch(
        &self,
        call: &Call<Admitted>,
        tool: ToolCall,
    ) -> Result<Value, GatewayError> {
        let target = tool
            .arguments
            .get("target")
            .and_then(Value::as_str)
            .map(str::to_string);

        let result = self.run(&tool.name, tool.arguments).await;
        if let Err(err) = &result {
            debug!(tool = %tool.name, error = %err, "Tool call failed");
        }

        AuditRecord::for_result(
            Some(&tool.name),
            target.as_deref(),
            Some(call.identity()),
            call.source(),
            &result,
        )
        .emit();
        result
    }

    async fn run(&self, name: &str, arguments: Value) -> Result<Value, GatewayError> {
        let request = ToolRequest::parse(name, arguments)?;

        let target = self.registry.get(request.target()).ok_or_else(|| {
            GatewayError::NotFound(format!("unknown target '{}'", request.target()))
        })?;

        request.check_policy(&self.policy.current())?;

        let ctx = ToolContext {
            transport: &self.transport,
            target,
            policy: &self.policy,
        };
        request.execute(&ctx).await
    }

    /// Tools the current policy exposes, optionally scoped to one target.
    pub fn list_tools(&self, target: Option<&str>) -> Vec<ToolDescriptor> {
        list_tools(&self.policy.current(), target)
    }
}
