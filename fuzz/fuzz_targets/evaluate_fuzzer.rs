//! Fuzz target for the expression evaluator
//!
//! Feeds arbitrary bytes to `evaluate_bytes` and `render_response` to find:
//! - Parser panics or stack overflows on deep nesting
//! - Error positions outside the input
//! - Non-finite values leaking into the wire response
//!
//! The fuzzer should NEVER panic. Invalid input must yield an error.

#![no_main]

use calcwire_core::{evaluate_bytes, render_response, ERROR_SENTINEL};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    match evaluate_bytes(data) {
        Ok(value) => {
            let response = render_response(data);
            if value.is_finite() {
                let text = std::str::from_utf8(&response).unwrap();
                assert!(text.parse::<f64>().is_ok(), "unparseable response {text:?}");
            } else {
                assert_eq!(response, ERROR_SENTINEL);
            }
        },
        Err(e) => {
            assert!(e.position() <= data.len(), "{e} beyond input of {} bytes", data.len());
            assert_eq!(render_response(data), ERROR_SENTINEL);
        },
    }
});
