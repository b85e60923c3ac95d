#![no_main]

use libfuzzer_sys::fuzz_target;
use riptide_parser::h1::request::{Limits, Request};

fuzz_target!(|data: &[u8]| {
    let mut request = Request::new();
    let limits = Limits::default();
    let _ = request.advance(data, &limits);
});
