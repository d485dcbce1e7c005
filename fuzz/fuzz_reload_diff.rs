//! Fuzz target for reload change detection.
//!
//! Run with: cargo +nightly fuzz run fuzz_reload_diff
//!
//! Splits the input on a NUL byte into a "before" and "after" config. A
//! config compared with itself must never need a restart.

#![no_main]

use edgedns_config::AppConfig;
use edgedns_config::diff::restart_required;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let (before, after) = s.split_once('\0').unwrap_or((s, s));
    let (Ok(before), Ok(after)) = (AppConfig::parse(before), AppConfig::parse(after)) else {
        return;
    };

    let lb = before.listener_bindings();
    assert!(restart_required(&lb, &before.service, &lb, &before.service).is_empty());

    let la = after.listener_bindings();
    let _ = restart_required(&lb, &before.service, &la, &after.service);
});
