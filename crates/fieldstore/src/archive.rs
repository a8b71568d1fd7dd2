// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Little-endian save/load archive for schemas, records and attribute bags.
//!
//! The archive is a flat byte stream: a 4-byte magic, a format version, then
//! whatever the caller saves. Variables cross the boundary by *name* only; the
//! [`Deserializer`] resolves names back to descriptors through an injected
//! [`VariableResolver`]. Values shared by several records (schemas) are written
//! once and referenced by id afterwards.
//!
//! Moving the bytes to disk or across the network is the caller's business.

use crate::config::{ARCHIVE_MAGIC, ARCHIVE_VERSION};
use crate::registry::VariableResolver;
use crate::variable::VariableDescriptor;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Archive-level error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveError {
    ReadFailed { offset: usize, reason: String },
    InvalidData { offset: usize, reason: String },
    BadHeader { reason: String },
    UnknownVariable(String),
    UnknownReference(u32),
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveError::ReadFailed { offset, reason } => {
                write!(f, "read failed at offset {}: {}", offset, reason)
            }
            ArchiveError::InvalidData { offset, reason } => {
                write!(f, "invalid data at offset {}: {}", offset, reason)
            }
            ArchiveError::BadHeader { reason } => write!(f, "bad archive header: {}", reason),
            ArchiveError::UnknownVariable(name) => write!(f, "unknown variable: {}", name),
            ArchiveError::UnknownReference(id) => write!(f, "unknown shared reference #{}", id),
        }
    }
}

impl std::error::Error for ArchiveError {}

pub type ArchiveResult<T> = core::result::Result<T, ArchiveError>;

/// Values that can be written to and read back from an archive.
pub trait Persist: Sized {
    fn save(&self, s: &mut Serializer);

    fn load(d: &mut Deserializer<'_>) -> ArchiveResult<Self>;

    /// Overwrite `self` in place. The default reloads and assigns.
    fn load_into(&mut self, d: &mut Deserializer<'_>) -> ArchiveResult<()> {
        *self = Self::load(d)?;
        Ok(())
    }
}

/// Marker written in front of a shared value.
const SHARED_INLINE: u8 = 0;
const SHARED_BACKREF: u8 = 1;

/// Outcome of [`Serializer::share`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shared {
    /// First occurrence: the caller must write the value body next.
    New(u32),
    /// Already written: only the id was emitted.
    Existing(u32),
}

/// Generate write methods for primitive types.
macro_rules! impl_write_le {
    ($name:ident, $type:ty) => {
        pub fn $name(&mut self, value: $type) {
            self.buffer.extend_from_slice(&value.to_le_bytes());
        }
    };
}

/// Generate read methods for primitive types.
///
/// Each generated method checks the remaining length, decodes little-endian
/// bytes and advances the offset.
macro_rules! impl_read_le {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self) -> ArchiveResult<$type> {
            let bytes = self.take($size)?;
            let mut raw = [0u8; $size];
            raw.copy_from_slice(bytes);
            Ok(<$type>::from_le_bytes(raw))
        }
    };
}

/// Growable archive writer.
pub struct Serializer {
    buffer: Vec<u8>,
    shared: HashMap<usize, u32>,
    // Keeps shared values alive so their addresses stay unique for the session.
    pinned: Vec<Arc<dyn Any + Send + Sync>>,
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer {
    pub fn new() -> Self {
        let mut s = Self {
            buffer: Vec::with_capacity(256),
            shared: HashMap::new(),
            pinned: Vec::new(),
        };
        s.buffer.extend_from_slice(&ARCHIVE_MAGIC);
        s.write_u16(ARCHIVE_VERSION);
        s
    }

    impl_write_le!(write_u8, u8);
    impl_write_le!(write_u16, u16);
    impl_write_le!(write_u32, u32);
    impl_write_le!(write_u64, u64);
    impl_write_le!(write_i8, i8);
    impl_write_le!(write_i16, i16);
    impl_write_le!(write_i32, i32);
    impl_write_le!(write_i64, i64);
    impl_write_le!(write_f32, f32);
    impl_write_le!(write_f64, f64);

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    /// Lengths and counts are always written as u64.
    pub fn write_len(&mut self, len: usize) {
        self.write_u64(len as u64);
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_len(value.len());
        self.buffer.extend_from_slice(value.as_bytes());
    }

    pub fn save<P: Persist>(&mut self, value: &P) {
        value.save(self);
    }

    /// Emit a reference marker for a shared value.
    ///
    /// Returns [`Shared::New`] the first time `value` is seen; the caller then
    /// writes the body. Later calls emit the id only.
    pub fn share<T: Any + Send + Sync>(&mut self, value: &Arc<T>) -> Shared {
        let addr = Arc::as_ptr(value) as usize;
        if let Some(&id) = self.shared.get(&addr) {
            self.write_u8(SHARED_BACKREF);
            self.write_u32(id);
            return Shared::Existing(id);
        }
        let id = self.pinned.len() as u32;
        self.shared.insert(addr, id);
        self.pinned.push(value.clone());
        self.write_u8(SHARED_INLINE);
        self.write_u32(id);
        Shared::New(id)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Outcome of [`Deserializer::shared`].
pub enum SharedRead<T> {
    /// Body follows; register it with [`Deserializer::register_shared`].
    New(u32),
    Existing(Arc<T>),
}

/// Bounds-checked archive reader.
pub struct Deserializer<'a> {
    buffer: &'a [u8],
    offset: usize,
    resolver: &'a dyn VariableResolver,
    shared: Vec<Arc<dyn Any + Send + Sync>>,
}

impl<'a> Deserializer<'a> {
    /// Open an archive, validating its header.
    pub fn new(buffer: &'a [u8], resolver: &'a dyn VariableResolver) -> ArchiveResult<Self> {
        let mut d = Self {
            buffer,
            offset: 0,
            resolver,
            shared: Vec::new(),
        };
        let magic = d.take(ARCHIVE_MAGIC.len()).map_err(|_| ArchiveError::BadHeader {
            reason: "archive shorter than header".into(),
        })?;
        if magic != ARCHIVE_MAGIC {
            return Err(ArchiveError::BadHeader {
                reason: format!("magic {:02x?}", magic),
            });
        }
        let version = d.read_u16()?;
        if version != ARCHIVE_VERSION {
            return Err(ArchiveError::BadHeader {
                reason: format!("unsupported version {}", version),
            });
        }
        Ok(d)
    }

    fn take(&mut self, len: usize) -> ArchiveResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.buffer.len())
            .ok_or_else(|| ArchiveError::ReadFailed {
                offset: self.offset,
                reason: format!("need {} bytes, {} remaining", len, self.remaining()),
            })?;
        let bytes = &self.buffer[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    impl_read_le!(read_u8, u8, 1);
    impl_read_le!(read_u16, u16, 2);
    impl_read_le!(read_u32, u32, 4);
    impl_read_le!(read_u64, u64, 8);
    impl_read_le!(read_i8, i8, 1);
    impl_read_le!(read_i16, i16, 2);
    impl_read_le!(read_i32, i32, 4);
    impl_read_le!(read_i64, i64, 8);
    impl_read_le!(read_f32, f32, 4);
    impl_read_le!(read_f64, f64, 8);

    pub fn read_bool(&mut self) -> ArchiveResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(self.invalid(format!("bool byte {}", other))),
        }
    }

    /// Read a length and check it against the bytes left, so corrupt input
    /// cannot trigger huge allocations.
    pub fn read_len(&mut self) -> ArchiveResult<usize> {
        let raw = self.read_u64()?;
        usize::try_from(raw)
            .ok()
            .filter(|&len| len <= self.remaining())
            .ok_or_else(|| self.invalid(format!("length {} exceeds remaining input", raw)))
    }

    pub fn read_string(&mut self) -> ArchiveResult<String> {
        let len = self.read_len()?;
        let start = self.offset;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ArchiveError::InvalidData {
            offset: start,
            reason: "string is not valid UTF-8".into(),
        })
    }

    pub fn load<P: Persist>(&mut self) -> ArchiveResult<P> {
        P::load(self)
    }

    /// Read a variable name and resolve it.
    pub fn read_variable(&mut self) -> ArchiveResult<Arc<VariableDescriptor>> {
        let name = self.read_string()?;
        self.resolver
            .resolve(&name)
            .ok_or(ArchiveError::UnknownVariable(name))
    }

    /// Read a shared-value marker written by [`Serializer::share`].
    pub fn shared<T: Any + Send + Sync>(&mut self) -> ArchiveResult<SharedRead<T>> {
        let tag = self.read_u8()?;
        let id = self.read_u32()?;
        match tag {
            SHARED_INLINE if id as usize == self.shared.len() => Ok(SharedRead::New(id)),
            SHARED_INLINE => Err(self.invalid(format!("shared id {} out of sequence", id))),
            SHARED_BACKREF => {
                let value = self
                    .shared
                    .get(id as usize)
                    .cloned()
                    .ok_or(ArchiveError::UnknownReference(id))?;
                value
                    .downcast::<T>()
                    .map(SharedRead::Existing)
                    .map_err(|_| ArchiveError::UnknownReference(id))
            }
            other => Err(self.invalid(format!("shared tag {}", other))),
        }
    }

    /// Make a freshly loaded shared value available to later back-references.
    pub fn register_shared<T: Any + Send + Sync>(&mut self, value: &Arc<T>) {
        self.shared.push(value.clone());
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.offset)
    }

    /// Error unless every byte was consumed.
    pub fn finish(self) -> ArchiveResult<()> {
        if self.remaining() == 0 {
            Ok(())
        } else {
            Err(self.invalid(format!("{} trailing bytes", self.remaining())))
        }
    }

    pub(crate) fn invalid(&self, reason: String) -> ArchiveError {
        ArchiveError::InvalidData {
            offset: self.offset,
            reason,
        }
    }
}

macro_rules! impl_persist_primitive {
    ($($type:ty => $write:ident, $read:ident;)*) => {
        $(
            impl Persist for $type {
                fn save(&self, s: &mut Serializer) {
                    s.$write(*self);
                }

                fn load(d: &mut Deserializer<'_>) -> ArchiveResult<Self> {
                    d.$read()
                }
            }
        )*
    };
}

impl_persist_primitive! {
    bool => write_bool, read_bool;
    u8 => write_u8, read_u8;
    u16 => write_u16, read_u16;
    u32 => write_u32, read_u32;
    u64 => write_u64, read_u64;
    i8 => write_i8, read_i8;
    i16 => write_i16, read_i16;
    i32 => write_i32, read_i32;
    i64 => write_i64, read_i64;
    f32 => write_f32, read_f32;
    f64 => write_f64, read_f64;
}

impl Persist for usize {
    fn save(&self, s: &mut Serializer) {
        s.write_u64(*self as u64);
    }

    fn load(d: &mut Deserializer<'_>) -> ArchiveResult<Self> {
        let raw = d.read_u64()?;
        usize::try_from(raw).map_err(|_| d.invalid(format!("usize overflow: {}", raw)))
    }
}

impl Persist for String {
    fn save(&self, s: &mut Serializer) {
        s.write_str(self);
    }

    fn load(d: &mut Deserializer<'_>) -> ArchiveResult<Self> {
        d.read_string()
    }
}

impl<T: Persist> Persist for Vec<T> {
    fn save(&self, s: &mut Serializer) {
        s.write_len(self.len());
        for item in self {
            item.save(s);
        }
    }

    fn load(d: &mut Deserializer<'_>) -> ArchiveResult<Self> {
        let len = d.read_len()?;
        (0..len).map(|_| T::load(d)).collect()
    }
}

impl<T: Persist, const N: usize> Persist for [T; N] {
    fn save(&self, s: &mut Serializer) {
        for item in self {
            item.save(s);
        }
    }

    fn load(d: &mut Deserializer<'_>) -> ArchiveResult<Self> {
        let items = (0..N)
            .map(|_| T::load(d))
            .collect::<ArchiveResult<Vec<T>>>()?;
        items
            .try_into()
            .map_err(|_| d.invalid(format!("expected {} array elements", N)))
    }

    fn load_into(&mut self, d: &mut Deserializer<'_>) -> ArchiveResult<()> {
        for item in self.iter_mut() {
            item.load_into(d)?;
        }
        Ok(())
    }
}

impl<T: Persist> Persist for Option<T> {
    fn save(&self, s: &mut Serializer) {
        match self {
            Some(value) => {
                s.write_bool(true);
                value.save(s);
            }
            None => s.write_bool(false),
        }
    }

    fn load(d: &mut Deserializer<'_>) -> ArchiveResult<Self> {
        if d.read_bool()? {
            T::load(d).map(Some)
        } else {
            Ok(None)
        }
    }
}
