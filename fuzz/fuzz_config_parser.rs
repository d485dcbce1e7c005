//! Fuzz target for the TOML configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Feeds arbitrary input to `AppConfig::parse()`, which runs both TOML
//! decoding and validation, including the opaque `[service]` extras.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Only panics matter here.
        let _ = edgedns_config::AppConfig::parse(s);
    }
});
