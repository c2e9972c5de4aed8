//! Fuzz target for the policy and gateway config parsers.
//!
//! Run with: cargo +nightly fuzz run fuzz_policy_parser
//!
//! Feeds arbitrary text to `PolicyDocument::parse()` and `AppConfig::parse()`.
//! Neither may panic, and an accepted policy must evaluate without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pigate_config::{AppConfig, PolicyDocument};

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    let _ = AppConfig::parse(s);

    if let Ok(policy) = PolicyDocument::parse(s) {
        let _ = policy.tool_allowed("ssh_exec", Some("pi1"));
        let _ = policy.shell_command_allowed("ls -la");
        if let Some(gpio) = policy.gpio("pi1") {
            let _ = gpio.capabilities_of(17);
        }
    }
});
