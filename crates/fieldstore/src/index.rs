// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Open-addressing key -> offset index.
//!
//! Slot of a key: `(key >> hash_function_index) & (table_size - 1)`. There is
//! no probing and no chaining: every stored key owns exactly one slot. When an
//! insertion lands on an occupied slot the whole table is rebuilt, first by
//! trying the next shift values for the current size, then by doubling the
//! size. Stored offsets are never renumbered by a rebuild.

use crate::config::{INITIAL_INDEX_SIZE, MAX_HASH_FUNCTION_INDEX, UNASSIGNED_POSITION};

/// Empty-slot marker in `keys`; registered keys are never 0.
const EMPTY_KEY: u64 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VariableIndex {
    keys: Vec<u64>,
    positions: Vec<usize>,
    ordinals: Vec<usize>,
    hash_function_index: u32,
    initial_size: usize,
}

/// One resolved index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot {
    /// Offset in blocks inside one step.
    pub position: usize,
    /// Insertion order of the variable in its schema.
    pub ordinal: usize,
}

impl Default for VariableIndex {
    fn default() -> Self {
        Self::with_initial_size(INITIAL_INDEX_SIZE)
    }
}

impl VariableIndex {
    /// `initial_size` is the table allocated by the first insertion; it must be
    /// a power of two.
    pub(crate) fn with_initial_size(initial_size: usize) -> Self {
        debug_assert!(initial_size.is_power_of_two());
        Self {
            keys: Vec::new(),
            positions: Vec::new(),
            ordinals: Vec::new(),
            hash_function_index: 0,
            initial_size,
        }
    }

    #[inline]
    fn slot_of(key: u64, table_size: usize, hash_function_index: u32) -> usize {
        ((key >> hash_function_index) as usize) & (table_size - 1)
    }

    /// Entry stored for `key`, if any.
    #[inline]
    pub(crate) fn find(&self, key: u64) -> Option<Slot> {
        if self.keys.is_empty() || key == EMPTY_KEY {
            return None;
        }
        let slot = Self::slot_of(key, self.keys.len(), self.hash_function_index);
        if self.keys[slot] != key {
            return None;
        }
        debug_assert_ne!(self.positions[slot], UNASSIGNED_POSITION);
        Some(Slot {
            position: self.positions[slot],
            ordinal: self.ordinals[slot],
        })
    }

    pub(crate) fn contains(&self, key: u64) -> bool {
        self.find(key).is_some()
    }

    /// Insert a new key. Keys already present are left untouched.
    pub(crate) fn insert(&mut self, key: u64, position: usize, ordinal: usize) {
        debug_assert_ne!(key, EMPTY_KEY);
        if self.keys.is_empty() {
            self.allocate(self.initial_size);
        }
        let slot = Self::slot_of(key, self.keys.len(), self.hash_function_index);
        if self.keys[slot] == key {
            return;
        }
        if self.keys[slot] == EMPTY_KEY {
            self.keys[slot] = key;
            self.positions[slot] = position;
            self.ordinals[slot] = ordinal;
            return;
        }

        let mut entries = self.entries();
        entries.push((key, Slot { position, ordinal }));
        self.rebuild(&entries);
    }

    fn allocate(&mut self, size: usize) {
        self.keys = vec![EMPTY_KEY; size];
        self.positions = vec![UNASSIGNED_POSITION; size];
        self.ordinals = vec![UNASSIGNED_POSITION; size];
    }

    fn entries(&self) -> Vec<(u64, Slot)> {
        (0..self.keys.len())
            .filter(|&slot| self.keys[slot] != EMPTY_KEY)
            .map(|slot| {
                let entry = Slot {
                    position: self.positions[slot],
                    ordinal: self.ordinals[slot],
                };
                (self.keys[slot], entry)
            })
            .collect()
    }

    /// Find the smallest `(size, shift)` mapping every entry to its own slot.
    fn rebuild(&mut self, entries: &[(u64, Slot)]) {
        let mut size = self.keys.len().max(self.initial_size);
        let mut occupied = Vec::new();
        loop {
            for hash_function_index in 0..MAX_HASH_FUNCTION_INDEX {
                occupied.clear();
                occupied.resize(size, false);
                let distinct = entries.iter().all(|(key, _)| {
                    let slot = Self::slot_of(*key, size, hash_function_index);
                    !std::mem::replace(&mut occupied[slot], true)
                });
                if distinct {
                    self.allocate(size);
                    self.hash_function_index = hash_function_index;
                    for (key, entry) in entries {
                        let slot = Self::slot_of(*key, size, hash_function_index);
                        self.keys[slot] = *key;
                        self.positions[slot] = entry.position;
                        self.ordinals[slot] = entry.ordinal;
                    }
                    log::debug!(
                        "[index] rebuilt: {} keys, table size {}, hash function index {}",
                        entries.len(),
                        size,
                        hash_function_index
                    );
                    return;
                }
            }
            size *= 2;
        }
    }

    pub(crate) fn table_size(&self) -> usize {
        self.keys.len()
    }

    pub(crate) fn hash_function_index(&self) -> u32 {
        self.hash_function_index
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.keys.iter().filter(|&&key| key != EMPTY_KEY).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_index_finds_nothing() {
        let index = VariableIndex::default();
        assert_eq!(index.table_size(), 0);
        assert!(index.find(0x1234_5600).is_none());
        assert!(index.find(EMPTY_KEY).is_none());
    }

    #[test]
    fn test_first_insert_allocates_initial_size() {
        let mut index = VariableIndex::default();
        index.insert(0x100, 0, 0);
        assert_eq!(index.table_size(), INITIAL_INDEX_SIZE);
        assert_eq!(
            index.find(0x100),
            Some(Slot {
                position: 0,
                ordinal: 0
            })
        );
    }

    #[test]
    fn test_collision_rebuilds_and_keeps_positions() {
        let mut index = VariableIndex::default();
        // All multiples of 0x100: identical under shifts 0..8 for small tables.
        let keys: Vec<u64> = (1..=20u64).map(|i| i.wrapping_mul(0x9e37_79b9_7f4a_7c00)).collect();
        for (ordinal, key) in keys.iter().enumerate() {
            index.insert(*key, ordinal * 3, ordinal);
            for (seen, k) in keys.iter().take(ordinal + 1).enumerate() {
                let slot = index.find(*k).expect("inserted key");
                assert_eq!(slot.position, seen * 3);
                assert_eq!(slot.ordinal, seen);
            }
        }
        assert_eq!(index.len(), keys.len());
        assert!(index.table_size().is_power_of_two());
        assert!(index.table_size() >= keys.len());
        assert!(index.hash_function_index() < MAX_HASH_FUNCTION_INDEX);
    }

    #[test]
    fn test_absent_key_sharing_a_slot_is_not_found() {
        let mut index = VariableIndex::default();
        index.insert(0x200, 5, 0);
        // Same slot as 0x200 under shift 0, size 2.
        assert!(!index.contains(0x400));
        assert!(index.contains(0x200));
    }

    #[test]
    fn test_duplicate_insert_is_ignored() {
        let mut index = VariableIndex::default();
        index.insert(0x300, 1, 0);
        index.insert(0x300, 9, 4);
        assert_eq!(index.len(), 1);
        assert_eq!(index.find(0x300).map(|s| s.position), Some(1));
    }
}
