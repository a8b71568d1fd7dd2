// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use fieldstore::config::{ARCHIVE_MAGIC, ARCHIVE_VERSION};
use fieldstore::{Deserializer, EntityRecord, SparseAttributeBag, VariableRegistry};
use libfuzzer_sys::fuzz_target;
use std::sync::OnceLock;

fn registry() -> &'static VariableRegistry {
    static REGISTRY: OnceLock<VariableRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let registry = VariableRegistry::new();
        let _ = registry.register::<f64>("PRESSURE");
        let _ = registry.register::<[f64; 3]>("VELOCITY");
        let _ = registry.register::<String>("NAME");
        let _ = registry.register::<Vec<u32>>("FLAGS");
        registry
    })
}

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes after a valid header
    let mut archive = ARCHIVE_MAGIC.to_vec();
    archive.extend_from_slice(&ARCHIVE_VERSION.to_le_bytes());
    archive.extend_from_slice(data);

    for input in [data, archive.as_slice()] {
        let Ok(mut d) = Deserializer::new(input, registry()) else {
            continue;
        };
        if let Ok(record) = EntityRecord::load(&mut d) {
            let _ = record.clone();
            let _ = SparseAttributeBag::load(&mut d);
        }
    }
});
