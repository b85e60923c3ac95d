#![no_main]

use libfuzzer_sys::fuzz_target;
use riptide_parser::ws::decode_header;
use riptide_parser::RawRequest;

fuzz_target!(|data: &[u8]| {
    let mut cursor = RawRequest::new(data);
    let _ = decode_header(&mut cursor, true, 16 * 1024 * 1024);
});
