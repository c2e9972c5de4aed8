//! Fuzz target for tool argument decoding and validation.
//!
//! Run with: cargo +nightly fuzz run fuzz_tool_request
//!
//! The first byte picks a tool, the rest is parsed as JSON arguments.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pigate_core::ToolRequest;
use pigate_core::tools::TOOLS;

fuzz_target!(|data: &[u8]| {
    let Some((&pick, rest)) = data.split_first() else {
        return;
    };
    let Ok(arguments) = serde_json::from_slice::<serde_json::Value>(rest) else {
        return;
    };
    let tool = TOOLS[usize::from(pick) % TOOLS.len()].name;

    if let Ok(request) = ToolRequest::parse(tool, arguments) {
        assert_eq!(request.name(), tool);
        assert!(!request.target().trim().is_empty());
    }
});
