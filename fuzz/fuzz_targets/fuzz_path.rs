// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fuzz target for DevicePath parsing and manipulation

#![no_main]

use fsmirror_core::path::DevicePath;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let Ok(path) = DevicePath::parse(input) else {
            return;
        };

        // Parsing the rendered path must give the same path back.
        let again = DevicePath::parse(&path.to_string()).expect("reparse");
        assert_eq!(path, again);

        let _ = path.name();
        let _ = path.parent();
        let _ = path.is_root();
        let _ = path.find_last_of('/');

        if let Some((_, segment)) = input.split_once('/') {
            if let Ok(joined) = path.join(segment) {
                assert!(!joined.subpath().contains("//"));
            }
        }
    }
});
