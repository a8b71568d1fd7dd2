// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::cast_precision_loss)] // Test data conversions
#![allow(clippy::cast_possible_truncation)] // Test parameters
#![allow(clippy::float_cmp)] // Test assertions with constants
#![allow(clippy::missing_panics_doc)] // Tests panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::too_many_lines)] // Test code
#![allow(clippy::similar_names)] // Test variable naming

//! Ring-buffer behavior of entity records.

use fieldstore::{EntityRecord, Error, Schema, SchemaBuilder, StoreConfig, Variable};
use std::sync::Arc;

struct Fields {
    pressure: Variable<f64>,
    velocity: Variable<[f64; 3]>,
    label: Variable<String>,
    schema: Arc<Schema>,
}

fn fields() -> Fields {
    let pressure = Variable::<f64>::new("PRESSURE");
    let velocity = Variable::<[f64; 3]>::new("VELOCITY");
    let label = Variable::<String>::with_zero("LABEL", "unset".to_string());
    let schema = SchemaBuilder::new()
        .with_variable(&pressure)
        .and_then(|b| b.with_variable(&velocity))
        .and_then(|b| b.with_variable(&label))
        .unwrap()
        .build();
    Fields {
        pressure,
        velocity,
        label,
        schema,
    }
}

/// Fill step `i` with values derived from `i + base`.
fn fill(record: &mut EntityRecord, f: &Fields, base: f64) {
    for step in 0..record.buffer_depth() {
        let v = base + step as f64;
        record.set_at(&f.pressure, step, v).unwrap();
        record.set_at(&f.velocity, step, [v, -v, 2.0 * v]).unwrap();
        record.set_at(&f.label, step, format!("step-{}", v)).unwrap();
    }
}

fn snapshot(record: &EntityRecord, f: &Fields, steps: usize) -> Vec<(f64, [f64; 3], String)> {
    (0..steps)
        .map(|step| {
            (
                *record.get_at(&f.pressure, step).unwrap(),
                *record.get_at(&f.velocity, step).unwrap(),
                record.get_at(&f.label, step).unwrap().clone(),
            )
        })
        .collect()
}

#[test]
fn pressure_velocity_push_front() {
    let pressure = Variable::<f64>::new("PRESSURE");
    let velocity = Variable::<[f64; 3]>::new("VELOCITY");
    let schema = SchemaBuilder::new()
        .with_variable(&pressure)
        .unwrap()
        .with_variable(&velocity)
        .unwrap()
        .build();
    assert_eq!(schema.data_size(), 4);

    let mut record = EntityRecord::with_depth(schema, 2).unwrap();
    record.set(&pressure, 1.5).unwrap();
    record.set(&velocity, [1.0, 2.0, 3.0]).unwrap();
    record.push_front().unwrap();

    assert_eq!(*record.get_at(&pressure, 0).unwrap(), 0.0);
    assert_eq!(*record.get_at(&velocity, 0).unwrap(), [0.0, 0.0, 0.0]);
    assert_eq!(*record.get_at(&pressure, 1).unwrap(), 1.5);
    assert_eq!(*record.get_at(&velocity, 1).unwrap(), [1.0, 2.0, 3.0]);
}

#[test]
fn push_front_zeroes_and_shifts_history() {
    let f = fields();
    for depth in 1..=5 {
        let mut record = EntityRecord::with_depth(f.schema.clone(), depth).unwrap();
        fill(&mut record, &f, 10.0);
        let before = snapshot(&record, &f, depth);

        record.push_front().unwrap();
        let after = snapshot(&record, &f, depth);
        assert_eq!(after[0], (0.0, [0.0; 3], "unset".to_string()));
        assert_eq!(&after[1..], &before[..depth - 1]);
    }
}

#[test]
fn clone_front_carries_current_forward() {
    let f = fields();
    for depth in 2..=5 {
        let mut record = EntityRecord::with_depth(f.schema.clone(), depth).unwrap();
        fill(&mut record, &f, 1.0);
        for _ in 0..(2 * depth + 1) {
            let before = snapshot(&record, &f, depth);
            record.clone_front().unwrap();
            let after = snapshot(&record, &f, depth);
            assert_eq!(after[0], before[0]);
            assert_eq!(after[1], before[0]);
            assert_eq!(&after[2..], &before[1..depth - 1]);
            record.set(&f.pressure, after[0].0 + 100.0).unwrap();
        }
    }
}

#[test]
fn resize_noop_and_round_trip() {
    let f = fields();
    for depth in 1..=4 {
        for rotation in 0..depth {
            for other in 1..=6 {
                let mut record = EntityRecord::with_depth(f.schema.clone(), depth).unwrap();
                for _ in 0..rotation {
                    record.push_front().unwrap();
                }
                fill(&mut record, &f, 5.0);
                let original = record.clone();

                record.resize(depth).unwrap();
                assert_eq!(record, original);

                record.resize(other).unwrap();
                assert_eq!(record.buffer_depth(), other);
                let common = depth.min(other);
                assert_eq!(snapshot(&record, &f, common), snapshot(&original, &f, common));
                for step in depth..other {
                    assert_eq!(*record.get_at(&f.pressure, step).unwrap(), 0.0);
                    assert_eq!(record.get_at(&f.label, step).unwrap(), "unset");
                }

                record.resize(depth).unwrap();
                assert_eq!(snapshot(&record, &f, common), snapshot(&original, &f, common));
                if other >= depth {
                    assert_eq!(record, original);
                }
            }
        }
    }
}

#[test]
fn rebind_is_a_hard_reset() {
    let f = fields();
    let mut record = EntityRecord::with_depth(f.schema.clone(), 3).unwrap();
    fill(&mut record, &f, 1.0);

    let temperature = Variable::<f64>::new("TEMPERATURE");
    let extended = f.schema.to_builder().with_variable(&temperature).unwrap().build();
    record.set_variables_list_with_depth(extended, 2).unwrap();

    assert_eq!(record.buffer_depth(), 2);
    assert_eq!(record.current_index(), 0);
    assert_eq!(*record.get(&f.pressure).unwrap(), 0.0);
    assert_eq!(*record.get_at(&temperature, 1).unwrap(), 0.0);
}

#[test]
fn errors_are_reported_not_undefined() {
    let f = fields();
    let mut record = EntityRecord::with_depth(f.schema.clone(), 2).unwrap();
    let stranger = Variable::<f64>::new("STRANGER");

    assert!(matches!(record.get(&stranger), Err(Error::VariableNotInSchema(_))));
    assert!(matches!(
        record.set_at(&f.pressure, 5, 1.0),
        Err(Error::StepOutOfRange { step: 5, depth: 2 })
    ));
    assert!(matches!(record.resize(0), Err(Error::InvalidBufferDepth(0))));
    assert!(!record.has(&stranger));

    let config = StoreConfig::default().with_buffer_depth(0);
    assert!(EntityRecord::with_config(f.schema.clone(), &config).is_err());
}

/// Records sharing one schema are independent across threads.
#[test]
fn parallel_records_on_shared_schema() {
    let f = fields();
    let mut records: Vec<EntityRecord> = (0..64)
        .map(|_| EntityRecord::with_depth(f.schema.clone(), 2).unwrap())
        .collect();

    crossbeam::scope(|scope| {
        for (chunk_index, chunk) in records.chunks_mut(16).enumerate() {
            let f = &f;
            scope.spawn(move |_| {
                for (i, record) in chunk.iter_mut().enumerate() {
                    let id = (chunk_index * 16 + i) as f64;
                    for _ in 0..10 {
                        record.clone_front().unwrap();
                        *record.get_mut(&f.pressure).unwrap() += id;
                    }
                }
            });
        }
    })
    .unwrap();

    for (i, record) in records.iter().enumerate() {
        assert_eq!(*record.get(&f.pressure).unwrap(), 10.0 * i as f64);
        assert_eq!(*record.get_at(&f.pressure, 1).unwrap(), 9.0 * i as f64);
    }
}
