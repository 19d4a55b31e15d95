#![no_main]

use libfuzzer_sys::fuzz_target;
use rtcheck_core::config::fuzz_parse_options;

fuzz_target!(|data: &[u8]| {
    fuzz_parse_options(data);
});
