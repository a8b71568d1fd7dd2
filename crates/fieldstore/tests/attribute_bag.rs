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

//! Sparse attribute bag: merge, erase and value lifetimes.

use fieldstore::archive::ArchiveResult;
use fieldstore::{Deserializer, Error, Persist, Serializer, SparseAttributeBag, Variable};
use std::sync::atomic::{AtomicUsize, Ordering};

static LIVE: AtomicUsize = AtomicUsize::new(0);

/// Counts live instances, including the zero held by its variable.
#[derive(Debug, PartialEq)]
struct Counted(u32);

impl Counted {
    fn new(value: u32) -> Self {
        LIVE.fetch_add(1, Ordering::SeqCst);
        Counted(value)
    }
}

impl Clone for Counted {
    fn clone(&self) -> Self {
        Counted::new(self.0)
    }
}

impl Drop for Counted {
    fn drop(&mut self) {
        LIVE.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Persist for Counted {
    fn save(&self, s: &mut Serializer) {
        s.write_u32(self.0);
    }

    fn load(d: &mut Deserializer<'_>) -> ArchiveResult<Self> {
        Ok(Counted::new(d.read_u32()?))
    }
}

#[test]
fn merge_releases_every_value_once() {
    {
        let owner = Variable::with_zero("OWNER", Counted::new(0));
        let rank = Variable::with_zero("RANK", Counted::new(0));
        let tag = Variable::with_zero("TAG", Counted::new(0));

        let mut left = SparseAttributeBag::new();
        left.set(&owner, Counted::new(1)).unwrap();
        left.set(&rank, Counted::new(2)).unwrap();

        let mut right = SparseAttributeBag::new();
        right.set(&rank, Counted::new(20)).unwrap();
        right.set(&tag, Counted::new(30)).unwrap();

        let mut kept = left.clone();
        kept.merge(&right, false);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept.get(&rank).unwrap().0, 2);
        assert_eq!(kept.get(&tag).unwrap().0, 30);

        let mut replaced = left.clone();
        replaced.merge(&right, true);
        assert_eq!(replaced.len(), 3);
        assert_eq!(replaced.get(&rank).unwrap().0, 20);
        assert_eq!(replaced.get(&owner).unwrap().0, 1);

        // 3 zeros, 4 set values, 3 in `kept`, 3 in `replaced`.
        assert_eq!(LIVE.load(Ordering::SeqCst), 3 + 4 + 3 + 3);

        assert!(replaced.erase(&tag));
        assert!(!replaced.erase(&tag));
        replaced.clear();
        assert!(replaced.is_empty());
    }
    assert_eq!(LIVE.load(Ordering::SeqCst), 0);
}

#[test]
fn components_address_the_parent_entry() {
    let normal = Variable::<[f64; 3]>::new("NORMAL");
    let normal_x = normal.component("NORMAL_X", 0).unwrap();
    let normal_z = normal.component("NORMAL_Z", 2).unwrap();

    let mut bag = SparseAttributeBag::new();
    assert!(!bag.has(&normal_z));
    *bag.get_mut(&normal_z).unwrap() = 4.0;
    bag.set(&normal_x, -1.0).unwrap();

    assert_eq!(bag.len(), 1);
    assert!(bag.has(&normal));
    assert_eq!(*bag.get(&normal).unwrap(), [-1.0, 0.0, 4.0]);

    assert!(bag.erase(&normal_x));
    assert!(!bag.has(&normal_z));
    assert_eq!(*bag.get(&normal_z).unwrap(), 0.0);
}

#[test]
fn type_mismatch_under_one_name_is_an_error() {
    let as_float = Variable::<f64>::new("DENSITY");
    let as_int = Variable::<i64>::new("DENSITY");

    let mut bag = SparseAttributeBag::new();
    bag.set(&as_float, 7.8).unwrap();
    assert!(matches!(bag.get(&as_int), Err(Error::TypeMismatch { .. })));
    assert!(matches!(bag.set(&as_int, 8), Err(Error::TypeMismatch { .. })));
    assert_eq!(*bag.get(&as_float).unwrap(), 7.8);
}

#[test]
fn equality_ignores_insertion_order() {
    let a = Variable::<i32>::new("A");
    let b = Variable::<String>::new("B");

    let mut first = SparseAttributeBag::new();
    first.set(&a, 1).unwrap();
    first.set(&b, "x".to_string()).unwrap();

    let mut second = SparseAttributeBag::new();
    second.set(&b, "x".to_string()).unwrap();
    second.set(&a, 1).unwrap();
    assert_eq!(first, second);

    second.set(&a, 2).unwrap();
    assert_ne!(first, second);
}
