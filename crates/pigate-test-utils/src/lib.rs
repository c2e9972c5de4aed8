#![deny(unsafe_code)]

//! Shared test utilities for the pigate workspace.
//!
//! Provides config builders, an in-memory SSH stand-in, a gateway fixture
//! backed by temporary host and policy files, and an audit event capture
//! layer, so that tests never need a reachable machine.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! pigate-test-utils = { workspace = true }
//! ```

pub mod audit;
pub mod config;
pub mod fake;
pub mod gateway;
pub mod tracing_setup;

pub use audit::{AuditCollector, AuditEntry, AuditReader};
pub use config::TestConfigBuilder;
pub use fake::FakeConnector;
pub use gateway::{TEST_API_KEY, TestGateway};
