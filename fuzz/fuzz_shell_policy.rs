//! Fuzz target for shell-command policy evaluation.
//!
//! Run with: cargo +nightly fuzz run fuzz_shell_policy
//!
//! Any command containing a deny substring must be denied, whatever
//! prefix it starts with.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pigate_config::PolicyDocument;

const POLICY: &str = r#"
[shell]
allow_prefixes = ["git ", "ls", "systemctl status"]
deny_substrings = ["rm -rf", "shutdown", "reboot", ";", "&&", "|"]
"#;

fuzz_target!(|data: &[u8]| {
    let Ok(command) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(policy) = PolicyDocument::parse(POLICY) else {
        return;
    };

    let decision = policy.shell_command_allowed(command);
    let denied_text = policy
        .shell
        .deny_substrings
        .iter()
        .any(|s| command.contains(s.as_str()));
    if denied_text {
        assert!(!decision.is_allowed(), "deny substring slipped through: {command:?}");
    }
});
