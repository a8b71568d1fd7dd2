// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-entity multi-step storage.
//!
//! An [`EntityRecord`] owns one block buffer of `data_size * buffer_depth`
//! blocks laid out by its [`Schema`]. Step 0 starts at `current` (a block
//! offset, always a multiple of `data_size`); step `i` lives `i * data_size`
//! blocks later, wrapping at the end of the buffer:
//!
//! ```text
//!            current
//!               v
//! +-----------+-----------+-----------+
//! |  step 2   |  step 0   |  step 1   |     depth 3
//! +-----------+-----------+-----------+
//! ```
//!
//! Advancing a time step moves `current` back by one step and rewrites only
//! the new current step.
//!
//! Every variable footprint of every step holds a live value from the moment
//! the record is bound until it is dropped or rebound.

use crate::archive::{Deserializer, Serializer};
use crate::config::{StoreConfig, BLOCK_SIZE, DEFAULT_BUFFER_DEPTH};
use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::variable::{Variable, VariableDescriptor, VariableValue};
use std::fmt;
use std::mem::MaybeUninit;
use std::ops::Range;
use std::sync::Arc;

type Block = MaybeUninit<u64>;

/// Pointer to block `block` of a buffer starting at `base`.
///
/// # Safety
///
/// `block * BLOCK_SIZE` must stay inside the allocation behind `base`.
#[inline]
unsafe fn block_ptr(base: *mut u8, block: usize) -> *mut u8 {
    base.add(block * BLOCK_SIZE)
}

// Step-wide lifetime helpers. Each one requires `base` (and `src`) to address a
// buffer laid out by `schema` that contains the step starting at the given
// block offset, with values live or raw as stated.

/// Construct zero values into a raw step.
unsafe fn construct_zero_step(schema: &Schema, base: *mut u8, step: usize) {
    for (variable, offset) in schema.layout() {
        variable.construct_zero(block_ptr(base, step + offset));
    }
}

/// Overwrite every value of a live step with its zero.
unsafe fn assign_zero_step(schema: &Schema, base: *mut u8, step: usize) {
    for (variable, offset) in schema.layout() {
        variable.assign_zero(block_ptr(base, step + offset));
    }
}

/// Drop every value of a live step in place.
unsafe fn destruct_step(schema: &Schema, base: *mut u8, step: usize) {
    for (variable, offset) in schema.layout() {
        variable.destruct(block_ptr(base, step + offset));
    }
}

/// Clone a live step into a raw one.
unsafe fn copy_construct_step(
    schema: &Schema,
    src: *mut u8,
    src_step: usize,
    dst: *mut u8,
    dst_step: usize,
) {
    for (variable, offset) in schema.layout() {
        variable.copy_construct(
            block_ptr(src, src_step + offset),
            block_ptr(dst, dst_step + offset),
        );
    }
}

/// Assign a live step onto another live step (distinct steps).
unsafe fn assign_step(
    schema: &Schema,
    src: *mut u8,
    src_step: usize,
    dst: *mut u8,
    dst_step: usize,
) {
    for (variable, offset) in schema.layout() {
        variable.assign(
            block_ptr(src, src_step + offset),
            block_ptr(dst, dst_step + offset),
        );
    }
}

/// Steps holding values. An empty schema stores nothing at any depth.
fn live_steps(schema: &Schema, depth: usize) -> Range<usize> {
    if schema.is_empty() {
        0..0
    } else {
        0..depth
    }
}

fn raw_blocks(len: usize) -> Vec<Block> {
    vec![MaybeUninit::uninit(); len]
}

fn buffer_len(schema: &Schema, depth: usize) -> Result<usize> {
    if depth == 0 {
        return Err(Error::InvalidBufferDepth(depth));
    }
    schema
        .data_size()
        .checked_mul(depth)
        .ok_or(Error::InvalidBufferDepth(depth))
}

/// Fresh buffer of `len` blocks with every step zero-initialized.
fn zeroed_buffer(schema: &Schema, depth: usize, len: usize) -> Vec<Block> {
    debug_assert_eq!(len, schema.data_size() * depth);
    let mut data = raw_blocks(len);
    let base = data.as_mut_ptr().cast::<u8>();
    for step in live_steps(schema, depth) {
        // SAFETY: `data` holds `depth` raw steps of `data_size` blocks.
        unsafe { construct_zero_step(schema, base, step * schema.data_size()) };
    }
    data
}

/// Buffered values of one mesh entity.
///
/// # Example
///
/// ```
/// use fieldstore::{EntityRecord, SchemaBuilder, Variable};
///
/// let pressure = Variable::<f64>::new("PRESSURE");
/// let schema = SchemaBuilder::new().with_variable(&pressure).unwrap().build();
///
/// let mut record = EntityRecord::with_depth(schema, 2).unwrap();
/// record.set(&pressure, 1.5).unwrap();
/// record.clone_front().unwrap();
/// *record.get_mut(&pressure).unwrap() += 1.0;
///
/// assert_eq!(*record.get(&pressure).unwrap(), 2.5);
/// assert_eq!(*record.get_at(&pressure, 1).unwrap(), 1.5);
/// ```
pub struct EntityRecord {
    schema: Option<Arc<Schema>>,
    buffer_depth: usize,
    data: Vec<Block>,
    /// Block offset of step 0.
    current: usize,
}

impl Default for EntityRecord {
    /// Unbound record; every access fails with [`Error::NoSchema`].
    fn default() -> Self {
        Self {
            schema: None,
            buffer_depth: DEFAULT_BUFFER_DEPTH,
            data: Vec::new(),
            current: 0,
        }
    }
}

impl EntityRecord {
    /// Record with the default buffer depth, zero-initialized.
    pub fn new(schema: Arc<Schema>) -> Self {
        let len = schema.data_size() * DEFAULT_BUFFER_DEPTH;
        let data = zeroed_buffer(&schema, DEFAULT_BUFFER_DEPTH, len);
        Self {
            schema: Some(schema),
            buffer_depth: DEFAULT_BUFFER_DEPTH,
            data,
            current: 0,
        }
    }

    pub fn with_depth(schema: Arc<Schema>, depth: usize) -> Result<Self> {
        let mut record = Self::default();
        record.set_variables_list_with_depth(schema, depth)?;
        Ok(record)
    }

    pub fn with_config(schema: Arc<Schema>, config: &StoreConfig) -> Result<Self> {
        Self::with_depth(schema, config.buffer_depth)
    }

    // ========================================================================
    // Binding
    // ========================================================================

    /// Rebind to `schema`, keeping the buffer depth. All values are reset.
    pub fn set_variables_list(&mut self, schema: Arc<Schema>) -> Result<()> {
        let depth = self.buffer_depth;
        self.set_variables_list_with_depth(schema, depth)
    }

    /// Rebind to `schema` with a new depth. All values are reset.
    pub fn set_variables_list_with_depth(&mut self, schema: Arc<Schema>, depth: usize) -> Result<()> {
        let len = buffer_len(&schema, depth)?;
        self.release();
        let data = zeroed_buffer(&schema, depth, len);
        log::debug!(
            "[record] bound to schema ({} variables, {} blocks) depth {}",
            schema.len(),
            schema.data_size(),
            depth
        );
        self.data = data;
        self.buffer_depth = depth;
        self.current = 0;
        self.schema = Some(schema);
        Ok(())
    }

    /// Drop every value and detach from the schema.
    fn release(&mut self) {
        let Some(schema) = self.schema.take() else {
            return;
        };
        let mut data = std::mem::take(&mut self.data);
        self.current = 0;
        let base = data.as_mut_ptr().cast::<u8>();
        for step in live_steps(&schema, self.buffer_depth) {
            // SAFETY: every step of the detached buffer is live.
            unsafe { destruct_step(&schema, base, step * schema.data_size()) };
        }
    }

    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.schema.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.schema.is_some()
    }

    pub fn buffer_depth(&self) -> usize {
        self.buffer_depth
    }

    /// Physical slot holding step 0.
    pub fn current_index(&self) -> usize {
        match self.schema.as_deref() {
            Some(schema) if schema.data_size() > 0 => self.current / schema.data_size(),
            _ => 0,
        }
    }

    /// True iff `descriptor` is stored by the bound schema.
    pub fn has(&self, descriptor: &VariableDescriptor) -> bool {
        self.schema.as_deref().is_some_and(|schema| schema.has(descriptor))
    }

    // ========================================================================
    // Typed access
    // ========================================================================

    fn bound_schema(&self) -> Result<&Schema> {
        self.schema.as_deref().ok_or(Error::NoSchema)
    }

    /// Block offset of `step`, which must be below the depth.
    #[inline]
    fn physical_block(&self, data_size: usize, step: usize) -> usize {
        let block = self.current + step * data_size;
        if block >= self.data.len() {
            block - self.data.len()
        } else {
            block
        }
    }

    /// Byte offset of `descriptor` at `step`, after every check.
    fn value_offset(&self, descriptor: &Arc<VariableDescriptor>, step: usize) -> Result<usize> {
        let schema = self.bound_schema()?;
        let location = schema.locate(descriptor)?;
        if step >= self.buffer_depth {
            return Err(Error::StepOutOfRange {
                step,
                depth: self.buffer_depth,
            });
        }
        Ok(self.physical_block(schema.data_size(), step) * BLOCK_SIZE + location.byte)
    }

    /// Current value.
    pub fn get<T: VariableValue>(&self, variable: &Variable<T>) -> Result<&T> {
        self.get_at(variable, 0)
    }

    pub fn get_mut<T: VariableValue>(&mut self, variable: &Variable<T>) -> Result<&mut T> {
        self.get_at_mut(variable, 0)
    }

    pub fn set<T: VariableValue>(&mut self, variable: &Variable<T>, value: T) -> Result<()> {
        self.set_at(variable, 0, value)
    }

    /// Value `step` steps in the past.
    pub fn get_at<T: VariableValue>(&self, variable: &Variable<T>, step: usize) -> Result<&T> {
        let offset = self.value_offset(variable.descriptor(), step)?;
        // SAFETY: `locate` matched the storage type against the schema entry and
        // `Variable<T>` guarantees the accessed type is `T`; the slot is live and
        // inside `data`; the buffer is 8-aligned and `T` needs at most 8.
        Ok(unsafe { &*self.data.as_ptr().cast::<u8>().add(offset).cast::<T>() })
    }

    pub fn get_at_mut<T: VariableValue>(
        &mut self,
        variable: &Variable<T>,
        step: usize,
    ) -> Result<&mut T> {
        let offset = self.value_offset(variable.descriptor(), step)?;
        // SAFETY: as in `get_at`; `&mut self` makes the borrow exclusive.
        Ok(unsafe { &mut *self.data.as_mut_ptr().cast::<u8>().add(offset).cast::<T>() })
    }

    pub fn set_at<T: VariableValue>(
        &mut self,
        variable: &Variable<T>,
        step: usize,
        value: T,
    ) -> Result<()> {
        *self.get_at_mut(variable, step)? = value;
        Ok(())
    }

    // ========================================================================
    // Step management
    // ========================================================================

    /// Move step 0 one slot back (wrapping). Returns the previous offset.
    fn rotate(&mut self, data_size: usize) -> usize {
        let previous = self.current;
        self.current = if self.current == 0 {
            self.data.len().saturating_sub(data_size)
        } else {
            self.current - data_size
        };
        previous
    }

    /// Start a new step whose values are all zero.
    ///
    /// The oldest step is recycled as the new step 0.
    pub fn push_front(&mut self) -> Result<()> {
        let schema = self.schema.clone().ok_or(Error::NoSchema)?;
        self.rotate(schema.data_size());
        let base = self.data.as_mut_ptr().cast::<u8>();
        // SAFETY: `current` addresses a live step inside `data`.
        unsafe { assign_zero_step(&schema, base, self.current) };
        Ok(())
    }

    /// Start a new step initialized with a copy of the current one.
    ///
    /// No-op with a depth of 1.
    pub fn clone_front(&mut self) -> Result<()> {
        let schema = self.schema.clone().ok_or(Error::NoSchema)?;
        if self.buffer_depth == 1 {
            return Ok(());
        }
        let previous = self.rotate(schema.data_size());
        let base = self.data.as_mut_ptr().cast::<u8>();
        // SAFETY: both steps are live, inside `data` and distinct (depth > 1).
        unsafe { assign_step(&schema, base, previous, base, self.current) };
        Ok(())
    }

    /// Copy every value of step `src` onto step `dst`.
    pub fn copy_step(&mut self, src: usize, dst: usize) -> Result<()> {
        let schema = self.schema.clone().ok_or(Error::NoSchema)?;
        for step in [src, dst] {
            if step >= self.buffer_depth {
                return Err(Error::StepOutOfRange {
                    step,
                    depth: self.buffer_depth,
                });
            }
        }
        if src == dst {
            return Ok(());
        }
        let src = self.physical_block(schema.data_size(), src);
        let dst = self.physical_block(schema.data_size(), dst);
        let base = self.data.as_mut_ptr().cast::<u8>();
        // SAFETY: distinct live steps inside `data`.
        unsafe { assign_step(&schema, base, src, base, dst) };
        Ok(())
    }

    /// Reset every value of every step to its zero.
    pub fn clear(&mut self) -> Result<()> {
        let schema = self.schema.clone().ok_or(Error::NoSchema)?;
        let base = self.data.as_mut_ptr().cast::<u8>();
        for step in live_steps(&schema, self.buffer_depth) {
            // SAFETY: every step is live.
            unsafe { assign_zero_step(&schema, base, step * schema.data_size()) };
        }
        Ok(())
    }

    /// Change the number of buffered steps.
    ///
    /// Growing keeps steps `0..old_depth` and appends zeroed steps as the
    /// oldest ones. Shrinking keeps steps `0..new_depth`, drops the rest and
    /// moves step 0 to slot 0.
    pub fn resize(&mut self, new_depth: usize) -> Result<()> {
        if new_depth == 0 {
            return Err(Error::InvalidBufferDepth(new_depth));
        }
        if new_depth == self.buffer_depth {
            return Ok(());
        }
        let Some(schema) = self.schema.clone() else {
            self.buffer_depth = new_depth;
            return Ok(());
        };
        if schema.is_empty() {
            self.buffer_depth = new_depth;
            self.current = 0;
            return Ok(());
        }
        let data_size = schema.data_size();
        let new_len = buffer_len(&schema, new_depth)?;
        log::debug!(
            "[record] resize depth {} -> {} (current slot {})",
            self.buffer_depth,
            new_depth,
            self.current_index()
        );

        if new_depth < self.buffer_depth {
            self.shrink(&schema, new_depth, new_len);
        } else {
            self.grow(&schema, new_depth, new_len);
        }
        debug_assert!(data_size == 0 || self.current % data_size == 0);
        Ok(())
    }

    fn shrink(&mut self, schema: &Schema, new_depth: usize, new_len: usize) {
        let data_size = schema.data_size();
        let old_depth = self.buffer_depth;
        let kept: Vec<usize> = (0..new_depth)
            .map(|step| self.physical_block(data_size, step))
            .collect();
        let dropped: Vec<usize> = (new_depth..old_depth)
            .map(|step| self.physical_block(data_size, step))
            .collect();

        let mut data = raw_blocks(new_len);
        for (step, block) in kept.iter().enumerate() {
            let src = &self.data[*block..*block + data_size];
            data[step * data_size..(step + 1) * data_size].copy_from_slice(src);
        }
        // Kept values now live in `data`; the old buffer only owns dropped steps.
        let mut old = std::mem::replace(&mut self.data, data);
        self.buffer_depth = new_depth;
        self.current = 0;

        let base = old.as_mut_ptr().cast::<u8>();
        for block in dropped {
            // SAFETY: dropped steps were not moved out and are still live.
            unsafe { destruct_step(schema, base, block) };
        }
    }

    fn grow(&mut self, schema: &Schema, new_depth: usize, new_len: usize) {
        let data_size = schema.data_size();
        let old_len = self.data.len();
        let inserted = new_len - old_len;
        let current = self.current;

        // [0, current) stays, [current, old_len) moves up by `inserted`, the
        // gap [current, current + inserted) receives the new oldest steps.
        let mut data = raw_blocks(new_len);
        data[..current].copy_from_slice(&self.data[..current]);
        data[current + inserted..].copy_from_slice(&self.data[current..]);
        let base = data.as_mut_ptr().cast::<u8>();
        for step in 0..new_depth - self.buffer_depth {
            // SAFETY: the gap holds raw steps inside `data`.
            unsafe { construct_zero_step(schema, base, current + step * data_size) };
        }

        self.data = data;
        self.buffer_depth = new_depth;
        self.current = current + inserted;
    }

    // ========================================================================
    // Archive
    // ========================================================================

    /// Write the schema (shared), depth, current slot, then every variable
    /// for every physical slot.
    pub fn save(&self, s: &mut Serializer) {
        let Some(schema) = &self.schema else {
            s.write_bool(false);
            return;
        };
        s.write_bool(true);
        schema.save_shared(s);
        s.write_u64(self.buffer_depth as u64);
        s.write_u64(self.current_index() as u64);
        let base = self.data.as_ptr().cast::<u8>();
        for (variable, offset) in schema.layout() {
            for slot in 0..self.buffer_depth {
                let block = slot * schema.data_size() + offset;
                // SAFETY: every slot is live and typed by `variable`.
                unsafe { variable.save_value(base.add(block * BLOCK_SIZE), s) };
            }
        }
    }

    /// Load a record written by [`EntityRecord::save`].
    pub fn load(d: &mut Deserializer<'_>) -> Result<Self> {
        if !d.read_bool()? {
            return Ok(Self::default());
        }
        let schema = Schema::load_shared(d)?;
        let depth = usize::try_from(d.read_u64()?).map_err(|_| d.invalid("buffer depth".into()))?;
        // Every stored value takes at least one byte, which bounds a corrupt depth.
        if !schema.is_empty() && depth > d.remaining() {
            return Err(d.invalid(format!("buffer depth {} exceeds remaining input", depth)).into());
        }
        let current = d.read_u64()?;
        if current >= depth as u64 {
            return Err(d.invalid(format!("current slot {} outside depth {}", current, depth)).into());
        }

        let mut record = Self::with_depth(schema.clone(), depth)?;
        record.current = current as usize * schema.data_size();
        let base = record.data.as_mut_ptr().cast::<u8>();
        for (variable, offset) in schema.layout() {
            for slot in 0..depth {
                let block = slot * schema.data_size() + offset;
                // SAFETY: the slot is live (zero-initialized) and typed by `variable`.
                unsafe { variable.load_value_into(block_ptr(base, block), d)? };
            }
        }
        Ok(record)
    }
}

impl Drop for EntityRecord {
    fn drop(&mut self) {
        self.release();
    }
}

impl Clone for EntityRecord {
    fn clone(&self) -> Self {
        let Some(schema) = &self.schema else {
            return Self {
                schema: None,
                buffer_depth: self.buffer_depth,
                data: Vec::new(),
                current: 0,
            };
        };
        let mut data = raw_blocks(self.data.len());
        let src = self.data.as_ptr().cast::<u8>().cast_mut();
        let dst = data.as_mut_ptr().cast::<u8>();
        for slot in live_steps(schema, self.buffer_depth) {
            let block = slot * schema.data_size();
            // SAFETY: live source slot, raw destination slot, same layout.
            // `src` is only read through.
            unsafe { copy_construct_step(schema, src, block, dst, block) };
        }
        Self {
            schema: Some(schema.clone()),
            buffer_depth: self.buffer_depth,
            data,
            current: self.current,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        match (&self.schema, &source.schema) {
            (Some(mine), Some(theirs))
                if Arc::ptr_eq(mine, theirs) && self.buffer_depth == source.buffer_depth =>
            {
                let src = source.data.as_ptr().cast::<u8>().cast_mut();
                let dst = self.data.as_mut_ptr().cast::<u8>();
                for slot in live_steps(mine, self.buffer_depth) {
                    let block = slot * mine.data_size();
                    // SAFETY: both buffers are live with the same layout; `src`
                    // is only read through.
                    unsafe { assign_step(mine, src, block, dst, block) };
                }
                self.current = source.current;
            }
            _ => *self = source.clone(),
        }
    }
}

impl PartialEq for EntityRecord {
    /// Same schema layout, same depth and equal values step by step.
    ///
    /// Values compare with their own `PartialEq`: a record holding a NaN is
    /// not equal to itself, even after a lossless save/load.
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = match (&self.schema, &other.schema) {
            (None, None) => return true,
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        if self.buffer_depth != other.buffer_depth || !(Arc::ptr_eq(a, b) || **a == **b) {
            return false;
        }
        let data_size = a.data_size();
        let mine = self.data.as_ptr().cast::<u8>();
        let theirs = other.data.as_ptr().cast::<u8>();
        live_steps(a, self.buffer_depth).all(|step| {
            let x = self.physical_block(data_size, step);
            let y = other.physical_block(data_size, step);
            a.layout().all(|(variable, offset)| {
                // SAFETY: equal schemas share one layout; both slots are live.
                unsafe {
                    variable.equals(
                        mine.add((x + offset) * BLOCK_SIZE),
                        theirs.add((y + offset) * BLOCK_SIZE),
                    )
                }
            })
        })
    }
}

impl fmt::Display for EntityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(schema) = &self.schema else {
            return write!(f, "EntityRecord (unbound)");
        };
        writeln!(
            f,
            "EntityRecord: depth {}, current slot {}",
            self.buffer_depth,
            self.current_index()
        )?;
        let base = self.data.as_ptr().cast::<u8>();
        for step in live_steps(schema, self.buffer_depth) {
            write!(f, "  step {}:", step)?;
            let block = self.physical_block(schema.data_size(), step);
            for (variable, offset) in schema.layout() {
                // SAFETY: live slot typed by `variable`.
                let value = unsafe { variable.display_value(base.add((block + offset) * BLOCK_SIZE)) };
                write!(f, " {} = {:?};", variable.name(), value)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl fmt::Debug for EntityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRecord")
            .field("variables", &self.schema.as_ref().map_or(0, |s| s.len()))
            .field("buffer_depth", &self.buffer_depth)
            .field("current_slot", &self.current_index())
            .finish()
    }
}
