#![deny(unsafe_code)]

//! pigate core — policy-gated remote execution over SSH.
//!
//! A caller names a tool and a target. The gateway authenticates the call,
//! rate-limits it, checks the tool and its arguments against the active
//! policy, and only then opens an SSH session to the target to run it.
//!
//! ```text
//! HTTP request ──▶ server::guard ──▶ Dispatcher::admit   (auth, rate limit)
//!                                         │
//!                                         ▼
//!                 Dispatcher::dispatch ──▶ ToolRequest::parse
//!                                         ──▶ check_policy (tools, shell, GPIO)
//!                                         ──▶ execute ──▶ Transport ──▶ target
//!                                         ──▶ audit event
//! ```

/// Structured audit events.
pub mod audit;
/// Type-state call lifecycle (`Unverified → Verified → Admitted`) and
/// credential verification.
pub mod auth;
/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Gateway runtime: load, serve, reload, shut down.
pub mod daemon;
/// Tool call dispatcher.
pub mod dispatch;
/// Error taxonomy shared by every layer.
pub mod error;
/// GPIO capability validation and agent command building.
pub mod gpio;
/// Subscriber setup.
pub mod logging;
/// Fixed-window rate limiting.
pub mod rate_limit;
/// HTTP router.
pub mod server;
/// Tool catalog and typed arguments.
pub mod tools;
/// Per-call SSH sessions.
pub mod transport;

pub use auth::{Authenticator, Call, SecurityContext};
pub use daemon::{Gateway, ShutdownSignal};
pub use dispatch::{CallMeta, Dispatcher};
pub use error::{ErrorKind, GatewayError};
pub use rate_limit::RateLimiter;
pub use tools::{ToolCall, ToolRequest};
pub use transport::{Connector, ExecOutput, RemoteSession, SshConnector, Transport, TransportError};
