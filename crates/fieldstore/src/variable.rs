// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Variable descriptors: named, typed field identities.
//!
//! A [`VariableDescriptor`] is the type-erased half: name, key, size, optional
//! component linkage and a [`ValueVTable`] of monomorphized lifetime functions.
//! [`Variable<T>`] is the typed half handed to callers. Raw storage is only
//! ever touched through a `Variable<T>` whose type has been checked against
//! the stored descriptor, so the erased functions always see the right type.
//!
//! # Key layout
//!
//! ```text
//!  63                                       8 7            1   0
//! +------------------------------------------+--------------+---+
//! |        FNV-1a(name) (low 56 bits)         | component idx | C |
//! +------------------------------------------+--------------+---+
//! ```
//!
//! Key 0 is reserved for unregistered variables.

use crate::archive::{ArchiveResult, Deserializer, Persist, Serializer};
use crate::config::{blocks_for, BLOCK_ALIGN};
use crate::error::{Error, Result};
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::Arc;

const FNV1A_OFFSET_BASIS_64: u64 = 0xcbf2_9ce4_8422_2325;
const FNV1A_PRIME_64: u64 = 0x0000_0100_0000_01b3;

/// Bits of the key reserved for the component index (bits 1..=7).
const COMPONENT_INDEX_MASK: u64 = 0x7f;

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV1A_OFFSET_BASIS_64;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV1A_PRIME_64);
    }
    hash
}

/// Derive the key for `name`; never returns 0.
pub(crate) fn generate_key(name: &str, component_index: Option<u32>) -> u64 {
    let mut key = fnv1a_64(name.as_bytes()) << 8;
    if key == 0 {
        key = 1 << 8;
    }
    if let Some(index) = component_index {
        key |= (u64::from(index) & COMPONENT_INDEX_MASK) << 1;
        key |= 1;
    }
    key
}

/// Values storable under a variable.
///
/// Blanket-implemented; alignment above [`BLOCK_ALIGN`] is rejected when the
/// vtable is instantiated.
pub trait VariableValue: Clone + fmt::Debug + PartialEq + Persist + Send + Sync + 'static {}

impl<T> VariableValue for T where T: Clone + fmt::Debug + PartialEq + Persist + Send + Sync + 'static {}

/// Composite values whose components can be addressed individually.
///
/// # Safety
///
/// `Self` must be laid out as exactly `COMPONENTS` contiguous `Component`
/// values starting at offset 0 (arrays, or `#[repr(C)]` structs of identical
/// fields).
pub unsafe trait Composite: VariableValue {
    type Component: VariableValue;
    const COMPONENTS: usize;

    fn component(&self, index: usize) -> Option<&Self::Component>;
}

// SAFETY: arrays are contiguous by definition.
unsafe impl<T: VariableValue, const N: usize> Composite for [T; N] {
    type Component = T;
    const COMPONENTS: usize = N;

    fn component(&self, index: usize) -> Option<&T> {
        self.get(index)
    }
}

/// Lifetime/print/serialize operations for one concrete value type.
///
/// Every pointer argument must point at a properly aligned `T` for the `T`
/// this table was built for; "live" means initialized, "raw" means
/// uninitialized memory large enough for a `T`.
pub struct ValueVTable {
    type_id: fn() -> TypeId,
    type_name: fn() -> &'static str,
    clone_boxed: unsafe fn(*const u8) -> NonNull<u8>,
    copy_construct: unsafe fn(*const u8, *mut u8),
    assign: unsafe fn(*const u8, *mut u8),
    destruct: unsafe fn(*mut u8),
    delete: unsafe fn(*mut u8),
    equals: unsafe fn(*const u8, *const u8) -> bool,
    save: unsafe fn(*const u8, &mut Serializer),
    load_into: unsafe fn(*mut u8, &mut Deserializer<'_>) -> ArchiveResult<()>,
    load_boxed: fn(&mut Deserializer<'_>) -> ArchiveResult<NonNull<u8>>,
    fmt: unsafe fn(*const u8, &mut fmt::Formatter<'_>) -> fmt::Result,
}

struct VTableFor<T>(PhantomData<T>);

impl<T: VariableValue> VTableFor<T> {
    const ALIGN_OK: () = assert!(
        std::mem::align_of::<T>() <= BLOCK_ALIGN,
        "variable value alignment exceeds the storage block alignment"
    );

    const VTABLE: ValueVTable = ValueVTable {
        type_id: TypeId::of::<T>,
        type_name: std::any::type_name::<T>,
        clone_boxed: Self::clone_boxed,
        copy_construct: Self::copy_construct,
        assign: Self::assign,
        destruct: Self::destruct,
        delete: Self::delete,
        equals: Self::equals,
        save: Self::save,
        load_into: Self::load_into,
        load_boxed: Self::load_boxed,
        fmt: Self::fmt,
    };

    unsafe fn clone_boxed(src: *const u8) -> NonNull<u8> {
        let value = Box::new((*src.cast::<T>()).clone());
        NonNull::from(Box::leak(value)).cast()
    }

    unsafe fn copy_construct(src: *const u8, dst: *mut u8) {
        dst.cast::<T>().write((*src.cast::<T>()).clone());
    }

    unsafe fn assign(src: *const u8, dst: *mut u8) {
        (*dst.cast::<T>()).clone_from(&*src.cast::<T>());
    }

    unsafe fn destruct(dst: *mut u8) {
        std::ptr::drop_in_place(dst.cast::<T>());
    }

    unsafe fn delete(dst: *mut u8) {
        drop(Box::from_raw(dst.cast::<T>()));
    }

    unsafe fn equals(a: *const u8, b: *const u8) -> bool {
        *a.cast::<T>() == *b.cast::<T>()
    }

    unsafe fn save(src: *const u8, s: &mut Serializer) {
        (*src.cast::<T>()).save(s);
    }

    unsafe fn load_into(dst: *mut u8, d: &mut Deserializer<'_>) -> ArchiveResult<()> {
        (*dst.cast::<T>()).load_into(d)
    }

    fn load_boxed(d: &mut Deserializer<'_>) -> ArchiveResult<NonNull<u8>> {
        let value = Box::new(T::load(d)?);
        Ok(NonNull::from(Box::leak(value)).cast())
    }

    unsafe fn fmt(src: *const u8, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*src.cast::<T>(), f)
    }
}

fn vtable_of<T: VariableValue>() -> &'static ValueVTable {
    #[allow(clippy::let_unit_value)]
    let () = VTableFor::<T>::ALIGN_OK;
    &VTableFor::<T>::VTABLE
}

/// Type-erased variable descriptor.
///
/// Immutable once created; shared by `Arc` between schemas, records, bags and
/// the registry.
pub struct VariableDescriptor {
    name: String,
    key: u64,
    size: usize,
    source: Option<Arc<VariableDescriptor>>,
    component_index: Option<u32>,
    zero: Box<dyn Any + Send + Sync>,
    vtable: &'static ValueVTable,
}

impl VariableDescriptor {
    fn new<T: VariableValue>(
        name: String,
        key: u64,
        zero: T,
        source: Option<(Arc<VariableDescriptor>, u32)>,
    ) -> Self {
        let (source, component_index) = match source {
            Some((parent, index)) => (Some(parent), Some(index)),
            None => (None, None),
        };
        Self {
            name,
            key,
            size: std::mem::size_of::<T>(),
            source,
            component_index,
            zero: Box::new(zero),
            vtable: vtable_of::<T>(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    /// Key of the variable that owns the storage: the parent for a component.
    pub fn source_key(&self) -> u64 {
        self.source.as_ref().map_or(self.key, |source| source.key)
    }

    /// Size in bytes of one value.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Footprint in storage blocks. Zero-sized values still take one block,
    /// so every stored variable owns a distinct offset.
    pub fn blocks(&self) -> usize {
        blocks_for(self.size).max(1)
    }

    pub fn is_component(&self) -> bool {
        self.source.is_some()
    }

    pub fn component_index(&self) -> Option<u32> {
        self.component_index
    }

    pub fn is_registered(&self) -> bool {
        self.key != 0
    }

    /// Parent descriptor of a component.
    pub fn source(&self) -> Option<&Arc<VariableDescriptor>> {
        self.source.as_ref()
    }

    /// Descriptor that owns the storage: the parent for a component, `self` otherwise.
    pub fn storage(self: &Arc<Self>) -> &Arc<VariableDescriptor> {
        self.source.as_ref().unwrap_or(self)
    }

    /// Name of the stored value type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        (self.vtable.type_name)()
    }

    /// `TypeId` of the stored value type.
    pub fn value_type_id(&self) -> TypeId {
        (self.vtable.type_id)()
    }

    /// Byte offset of this component inside its parent value (0 otherwise).
    pub(crate) fn component_byte_offset(&self) -> usize {
        self.component_index
            .map_or(0, |index| index as usize * self.size)
    }

    fn zero_ptr(&self) -> *const u8 {
        (&*self.zero as *const (dyn Any + Send + Sync)).cast::<u8>()
    }

    pub(crate) fn zero_ref<T: 'static>(&self) -> Option<&T> {
        self.zero.downcast_ref::<T>()
    }

    // Erased operations. Callers guarantee every pointer addresses a value of
    // this descriptor's type (see `ValueVTable`).

    /// Heap copy of the live value at `src`.
    pub(crate) unsafe fn clone_value(&self, src: *const u8) -> NonNull<u8> {
        (self.vtable.clone_boxed)(src)
    }

    /// Heap copy of the zero value.
    pub(crate) fn clone_zero(&self) -> NonNull<u8> {
        // SAFETY: `zero` was built with the same `T` as the vtable.
        unsafe { (self.vtable.clone_boxed)(self.zero_ptr()) }
    }

    /// Write the zero value into raw memory.
    pub(crate) unsafe fn construct_zero(&self, dst: *mut u8) {
        (self.vtable.copy_construct)(self.zero_ptr(), dst);
    }

    /// Overwrite a live value with the zero value.
    pub(crate) unsafe fn assign_zero(&self, dst: *mut u8) {
        (self.vtable.assign)(self.zero_ptr(), dst);
    }

    pub(crate) unsafe fn copy_construct(&self, src: *const u8, dst: *mut u8) {
        (self.vtable.copy_construct)(src, dst);
    }

    pub(crate) unsafe fn assign(&self, src: *const u8, dst: *mut u8) {
        (self.vtable.assign)(src, dst);
    }

    /// Drop in place without freeing.
    pub(crate) unsafe fn destruct(&self, dst: *mut u8) {
        (self.vtable.destruct)(dst);
    }

    /// Drop and free a value obtained from `clone_value`/`clone_zero`/`load_value`.
    pub(crate) unsafe fn delete(&self, dst: *mut u8) {
        (self.vtable.delete)(dst);
    }

    pub(crate) unsafe fn equals(&self, a: *const u8, b: *const u8) -> bool {
        (self.vtable.equals)(a, b)
    }

    pub(crate) unsafe fn save_value(&self, src: *const u8, s: &mut Serializer) {
        (self.vtable.save)(src, s);
    }

    pub(crate) unsafe fn load_value_into(
        &self,
        dst: *mut u8,
        d: &mut Deserializer<'_>,
    ) -> ArchiveResult<()> {
        (self.vtable.load_into)(dst, d)
    }

    pub(crate) fn load_value(&self, d: &mut Deserializer<'_>) -> ArchiveResult<NonNull<u8>> {
        (self.vtable.load_boxed)(d)
    }

    /// `Debug` adapter for the live value at `src`.
    pub(crate) unsafe fn display_value(&self, src: *const u8) -> ValueDisplay<'_> {
        ValueDisplay {
            descriptor: self,
            src,
        }
    }
}

/// Borrowed printable view of an erased value.
pub(crate) struct ValueDisplay<'a> {
    descriptor: &'a VariableDescriptor,
    src: *const u8,
}

impl fmt::Debug for ValueDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // SAFETY: constructed by `display_value`, whose caller vouched for `src`.
        unsafe { (self.descriptor.vtable.fmt)(self.src, f) }
    }
}

impl PartialEq for VariableDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for VariableDescriptor {}

impl Hash for VariableDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Debug for VariableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("VariableDescriptor");
        s.field("name", &self.name)
            .field("key", &format_args!("{:#018x}", self.key))
            .field("type", &self.type_name())
            .field("size", &self.size);
        if let (Some(source), Some(index)) = (&self.source, self.component_index) {
            s.field("source", &source.name).field("component", &index);
        }
        // SAFETY: `zero` matches the vtable type.
        s.field("zero", unsafe { &self.display_value(self.zero_ptr()) });
        s.finish()
    }
}

impl fmt::Display for VariableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Typed handle to a variable.
///
/// Cheap to clone. Derefs to the shared descriptor, so it can be passed
/// wherever an `&Arc<VariableDescriptor>` is expected.
///
/// # Example
///
/// ```
/// use fieldstore::Variable;
///
/// let velocity = Variable::<[f64; 3]>::new("VELOCITY");
/// let velocity_x = velocity.component("VELOCITY_X", 0).unwrap();
/// assert_eq!(velocity_x.source_key(), velocity.key());
/// assert!(velocity_x.is_component());
/// ```
pub struct Variable<T> {
    descriptor: Arc<VariableDescriptor>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: VariableValue> Variable<T> {
    /// Variable whose zero value is `T::default()`.
    pub fn new(name: impl Into<String>) -> Self
    where
        T: Default,
    {
        Self::with_zero(name, T::default())
    }

    /// Variable with an explicit zero value.
    pub fn with_zero(name: impl Into<String>, zero: T) -> Self {
        let name = name.into();
        let key = generate_key(&name, None);
        Self::wrap(VariableDescriptor::new(name, key, zero, None))
    }

    /// Variable carrying key 0; schemas refuse it.
    pub fn unregistered(name: impl Into<String>) -> Self
    where
        T: Default,
    {
        Self::wrap(VariableDescriptor::new(name.into(), 0, T::default(), None))
    }

    /// Typed view of an erased descriptor, checking the value type.
    pub fn from_descriptor(descriptor: Arc<VariableDescriptor>) -> Result<Self> {
        if descriptor.value_type_id() != TypeId::of::<T>() {
            return Err(Error::TypeMismatch {
                variable: descriptor.name.clone(),
                expected: descriptor.type_name(),
                found: std::any::type_name::<T>(),
            });
        }
        Ok(Self {
            descriptor,
            _marker: PhantomData,
        })
    }

    fn wrap(descriptor: VariableDescriptor) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            _marker: PhantomData,
        }
    }

    pub fn descriptor(&self) -> &Arc<VariableDescriptor> {
        &self.descriptor
    }

    pub fn zero(&self) -> &T {
        match self.descriptor.zero_ref::<T>() {
            Some(zero) => zero,
            // `Variable<T>` is only built over descriptors of type `T`.
            None => unreachable!("descriptor zero does not match its variable type"),
        }
    }
}

impl<P: Composite> Variable<P> {
    /// Component variable addressing element `index` of this variable.
    pub fn component(
        &self,
        name: impl Into<String>,
        index: u32,
    ) -> Result<Variable<P::Component>> {
        let name = name.into();
        if self.descriptor.is_component() {
            return Err(Error::NestedComponent(name));
        }
        let zero = self
            .zero()
            .component(index as usize)
            .filter(|_| u64::from(index) <= COMPONENT_INDEX_MASK)
            .cloned()
            .ok_or_else(|| Error::ComponentOutOfRange {
                variable: name.clone(),
                index,
                count: P::COMPONENTS,
            })?;
        let key = generate_key(&name, Some(index));
        Ok(Variable::wrap(VariableDescriptor::new(
            name,
            key,
            zero,
            Some((self.descriptor.clone(), index)),
        )))
    }
}

impl<T> Clone for Variable<T> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Deref for Variable<T> {
    type Target = Arc<VariableDescriptor>;

    fn deref(&self) -> &Self::Target {
        &self.descriptor
    }
}

impl<T> fmt::Debug for Variable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.descriptor, f)
    }
}

impl<T> PartialEq for Variable<T> {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor.key == other.descriptor.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_nonzero_and_distinct() {
        let pressure = Variable::<f64>::new("PRESSURE");
        let temperature = Variable::<f64>::new("TEMPERATURE");
        assert_ne!(pressure.key(), 0);
        assert_ne!(pressure.key(), temperature.key());
        assert_eq!(pressure.key(), Variable::<f64>::new("PRESSURE").key());
        assert_eq!(pressure.source_key(), pressure.key());
        assert!(!pressure.is_component());
        assert_eq!(pressure.component_index(), None);
    }

    #[test]
    fn test_unregistered_has_key_zero() {
        let v = Variable::<f64>::unregistered("DENSITY");
        assert_eq!(v.key(), 0);
        assert!(!v.is_registered());
    }

    #[test]
    fn test_component_linkage() {
        let velocity = Variable::<[f64; 3]>::with_zero("VELOCITY", [1.0, 2.0, 3.0]);
        let vy = velocity.component("VELOCITY_Y", 1).expect("component");
        assert!(vy.is_component());
        assert_eq!(vy.component_index(), Some(1));
        assert_eq!(vy.source_key(), velocity.key());
        assert_ne!(vy.key(), velocity.key());
        assert_eq!(vy.key() & 1, 1);
        assert_eq!(*vy.zero(), 2.0);
        assert_eq!(vy.size(), 8);
        assert_eq!(vy.component_byte_offset(), 8);
        assert!(Arc::ptr_eq(vy.source().expect("source"), velocity.descriptor()));
    }

    #[test]
    fn test_component_out_of_range() {
        let velocity = Variable::<[f64; 3]>::new("VELOCITY");
        assert!(matches!(
            velocity.component("VELOCITY_W", 3),
            Err(Error::ComponentOutOfRange {
                index: 3,
                count: 3,
                ..
            })
        ));
    }

    #[test]
    fn test_nested_component_rejected() {
        let stress = Variable::<[[f64; 3]; 2]>::new("STRESS");
        let row = stress.component("STRESS_ROW_0", 0).expect("row");
        assert!(matches!(
            row.component("STRESS_00", 0),
            Err(Error::NestedComponent(_))
        ));
    }

    #[test]
    fn test_sizes_and_blocks() {
        let flag = Variable::<bool>::new("ACTIVE");
        let velocity = Variable::<[f64; 3]>::new("VELOCITY");
        let label = Variable::<String>::new("LABEL");
        assert_eq!(flag.size(), 1);
        assert_eq!(flag.blocks(), 1);
        assert_eq!(velocity.blocks(), 3);
        assert_eq!(label.blocks(), std::mem::size_of::<String>() / 8);
        assert_eq!(Variable::<[f64; 0]>::new("EMPTY").blocks(), 1);
    }

    #[test]
    fn test_from_descriptor_checks_type() {
        let pressure = Variable::<f64>::new("PRESSURE");
        let erased = pressure.descriptor().clone();
        assert!(Variable::<f64>::from_descriptor(erased.clone()).is_ok());
        assert!(matches!(
            Variable::<i64>::from_descriptor(erased),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_erased_clone_and_delete() {
        let label = Variable::<String>::with_zero("LABEL", "none".to_string());
        let boxed = label.clone_zero();
        // SAFETY: `boxed` holds a `String` produced by the same descriptor.
        unsafe {
            assert_eq!(*boxed.as_ptr().cast::<String>(), "none");
            label.delete(boxed.as_ptr());
        }
    }

    #[test]
    fn test_debug_shows_zero() {
        let pressure = Variable::<f64>::with_zero("PRESSURE", 101325.0);
        let text = format!("{:?}", pressure);
        assert!(text.contains("PRESSURE"));
        assert!(text.contains("101325"));
        assert_eq!(pressure.to_string(), "PRESSURE");
    }
}
