//! The garbage-collected object heap of a module instance.
//!
//! References on the operand stack are compact handles into this
//! arena rather than raw pointers: handle `0` is the null reference,
//! odd handles carry an unboxed 31-bit scalar, and even handles index
//! heap objects. This keeps every reference one cell wide and makes
//! root traversal a scan over the frame reference maps.
//!
//! The heap itself does not collect; an external tracing collector
//! drives collection through [`crate::ExecEnv::traverse_gc_rootset`]
//! and the handles it is given.

use crate::{
    types::{is_subtype_of, CompositeType, SubType},
    value::HeapType,
};
use spin::Mutex;
use std::collections::BTreeMap;

/// A garbage-collected reference: the null reference, an unboxed
/// 31-bit scalar, or a handle to a heap object.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GcRef(u32);

impl GcRef {
    /// The null reference.
    pub const NULL: Self = Self(0);

    /// Recreates a reference from its cell representation.
    #[inline]
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// The cell representation of the reference.
    #[inline]
    pub fn to_bits(self) -> u32 {
        self.0
    }

    /// Returns `true` for the null reference.
    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Creates an i31 reference from the low 31 bits of `value`.
    #[inline]
    pub fn from_i31(value: u32) -> Self {
        Self((value << 1) | 1)
    }

    /// Returns `true` if this is an unboxed i31 reference.
    #[inline]
    pub fn is_i31(self) -> bool {
        self.0 & 1 != 0
    }

    /// The zero-extended payload of an i31 reference.
    #[inline]
    pub fn i31_get_u(self) -> u32 {
        self.0 >> 1
    }

    /// The sign-extended payload of an i31 reference.
    #[inline]
    pub fn i31_get_s(self) -> i32 {
        let value = self.0 >> 1;
        if value & 0x4000_0000 != 0 {
            (value | 0x8000_0000) as i32
        } else {
            value as i32
        }
    }

    fn from_index(index: usize) -> Self {
        Self(((index as u32) + 1) << 1)
    }

    /// The arena index of a heap object handle.
    #[inline]
    pub fn index(self) -> Option<usize> {
        if self.is_null() || self.is_i31() {
            return None;
        }
        Some((self.0 >> 1) as usize - 1)
    }
}

/// A struct object: its defined type and raw field cells.
#[derive(Debug)]
pub struct StructObj {
    /// Index of the struct type in the module type section.
    pub type_idx: u32,
    /// Raw field values; packed fields are stored masked.
    pub fields: Box<[u64]>,
}

/// An array object: its defined type and raw element cells.
#[derive(Debug)]
pub struct ArrayObj {
    /// Index of the array type in the module type section.
    pub type_idx: u32,
    /// Raw element values; packed elements are stored masked.
    pub elems: Vec<u64>,
}

/// An object allocated on the instance heap.
#[derive(Debug)]
pub enum HeapObj {
    /// A structure.
    Struct(StructObj),
    /// An array.
    Array(ArrayObj),
    /// A function reference bound to an instance function index.
    Func {
        /// The bound function index.
        func_idx: u32,
        /// The function's defined type index.
        type_idx: u32,
    },
    /// An external reference wrapping an internal one.
    Extern {
        /// The wrapped internal reference.
        inner: GcRef,
    },
    /// An immutable string, stored as WTF-8.
    Str {
        /// The WTF-8 encoded contents.
        wtf8: Box<[u8]>,
    },
    /// A WTF-8 view of a string.
    ViewWtf8 {
        /// The viewed string.
        target: GcRef,
    },
    /// A WTF-16 view of a string with precomputed code units.
    ViewWtf16 {
        /// The viewed string.
        target: GcRef,
        /// The WTF-16 code units of the string.
        units: Box<[u16]>,
    },
    /// A code-point iterator view of a string.
    ViewIter {
        /// The viewed string.
        target: GcRef,
        /// Current byte position into the WTF-8 contents.
        pos: u32,
    },
}

/// The arena holding all heap objects of one module instance.
#[derive(Debug, Default)]
pub struct GcHeap {
    objects: Mutex<Vec<HeapObj>>,
    funcrefs: Mutex<BTreeMap<u32, GcRef>>,
}

impl GcHeap {
    /// Creates an empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates `obj` and returns its handle.
    pub fn alloc(&self, obj: HeapObj) -> GcRef {
        let mut objects = self.objects.lock();
        let index = objects.len();
        objects.push(obj);
        GcRef::from_index(index)
    }

    /// Returns the interned function reference object for `func_idx`,
    /// allocating it on first use so that `ref.func` yields identical
    /// references for identical indices.
    pub fn intern_funcref(&self, func_idx: u32, type_idx: u32) -> GcRef {
        let mut funcrefs = self.funcrefs.lock();
        if let Some(existing) = funcrefs.get(&func_idx) {
            return *existing;
        }
        let handle = self.alloc(HeapObj::Func { func_idx, type_idx });
        funcrefs.insert(func_idx, handle);
        handle
    }

    /// Runs `f` on the object behind `handle`.
    ///
    /// Returns `None` for null, i31 or dangling handles.
    pub fn with_obj<R>(&self, handle: GcRef, f: impl FnOnce(&HeapObj) -> R) -> Option<R> {
        let objects = self.objects.lock();
        objects.get(handle.index()?).map(f)
    }

    /// Runs `f` on the object behind `handle` with mutable access.
    pub fn with_obj_mut<R>(&self, handle: GcRef, f: impl FnOnce(&mut HeapObj) -> R) -> Option<R> {
        let mut objects = self.objects.lock();
        objects.get_mut(handle.index()?).map(f)
    }

    /// The function index and type index bound to a funcref object.
    pub fn func_of(&self, handle: GcRef) -> Option<(u32, u32)> {
        self.with_obj(handle, |obj| match obj {
            HeapObj::Func { func_idx, type_idx } => Some((*func_idx, *type_idx)),
            _ => None,
        })?
    }

    /// Reads struct field `idx` raw.
    pub fn struct_field(&self, handle: GcRef, idx: u32) -> Option<u64> {
        self.with_obj(handle, |obj| match obj {
            HeapObj::Struct(s) => s.fields.get(idx as usize).copied(),
            _ => None,
        })?
    }

    /// Writes struct field `idx` raw.
    pub fn struct_set_field(&self, handle: GcRef, idx: u32, value: u64) -> Option<()> {
        self.with_obj_mut(handle, |obj| match obj {
            HeapObj::Struct(s) => s.fields.get_mut(idx as usize).map(|slot| *slot = value),
            _ => None,
        })?
    }

    /// The length of an array object.
    pub fn array_len(&self, handle: GcRef) -> Option<u32> {
        self.with_obj(handle, |obj| match obj {
            HeapObj::Array(a) => Some(a.elems.len() as u32),
            _ => None,
        })?
    }

    /// Reads array element `idx` raw.
    pub fn array_get(&self, handle: GcRef, idx: u32) -> Option<u64> {
        self.with_obj(handle, |obj| match obj {
            HeapObj::Array(a) => a.elems.get(idx as usize).copied(),
            _ => None,
        })?
    }

    /// Writes array element `idx` raw.
    pub fn array_set(&self, handle: GcRef, idx: u32, value: u64) -> Option<()> {
        self.with_obj_mut(handle, |obj| match obj {
            HeapObj::Array(a) => a.elems.get_mut(idx as usize).map(|slot| *slot = value),
            _ => None,
        })?
    }

    /// Fills `len` elements of an array starting at `start`.
    ///
    /// The caller has already bounds-checked the range.
    pub fn array_fill(&self, handle: GcRef, start: u32, len: u32, value: u64) -> Option<()> {
        self.with_obj_mut(handle, |obj| match obj {
            HeapObj::Array(a) => {
                let start = start as usize;
                let end = start + len as usize;
                a.elems.get_mut(start..end)?.fill(value);
                Some(())
            }
            _ => None,
        })?
    }

    /// Copies `len` elements between two (possibly identical) arrays.
    ///
    /// The caller has already bounds-checked both ranges.
    pub fn array_copy(
        &self,
        dst: GcRef,
        dst_off: u32,
        src: GcRef,
        src_off: u32,
        len: u32,
    ) -> Option<()> {
        let mut objects = self.objects.lock();
        let len = len as usize;
        let src_off = src_off as usize;
        let dst_off = dst_off as usize;
        let tmp: Vec<u64> = match objects.get(src.index()?)? {
            HeapObj::Array(a) => a.elems.get(src_off..src_off + len)?.to_vec(),
            _ => return None,
        };
        match objects.get_mut(dst.index()?)? {
            HeapObj::Array(a) => {
                a.elems.get_mut(dst_off..dst_off + len)?.copy_from_slice(&tmp);
                Some(())
            }
            _ => None,
        }
    }

    /// The internal reference wrapped by an externref object.
    pub fn extern_inner(&self, handle: GcRef) -> Option<GcRef> {
        self.with_obj(handle, |obj| match obj {
            HeapObj::Extern { inner } => Some(*inner),
            _ => None,
        })?
    }

    /// Runs `f` on the WTF-8 contents of a string or string view.
    pub fn with_str<R>(&self, handle: GcRef, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let objects = self.objects.lock();
        let mut index = handle.index()?;
        // Views point at their string; chase one level of indirection
        // inside the same lock scope.
        if let Some(
            HeapObj::ViewWtf8 { target }
            | HeapObj::ViewWtf16 { target, .. }
            | HeapObj::ViewIter { target, .. },
        ) = objects.get(index)
        {
            index = target.index()?;
        }
        match objects.get(index)? {
            HeapObj::Str { wtf8 } => Some(f(wtf8)),
            _ => None,
        }
    }

    /// Runs `f` on the precomputed code units of a WTF-16 view.
    pub fn with_wtf16_units<R>(&self, handle: GcRef, f: impl FnOnce(&[u16]) -> R) -> Option<R> {
        let objects = self.objects.lock();
        match objects.get(handle.index()?)? {
            HeapObj::ViewWtf16 { units, .. } => Some(f(units)),
            _ => None,
        }
    }

    /// The current position of an iterator view.
    pub fn iter_pos(&self, handle: GcRef) -> Option<u32> {
        self.with_obj(handle, |obj| match obj {
            HeapObj::ViewIter { pos, .. } => Some(*pos),
            _ => None,
        })?
    }

    /// Updates the position of an iterator view.
    pub fn set_iter_pos(&self, handle: GcRef, new_pos: u32) -> Option<()> {
        self.with_obj_mut(handle, |obj| match obj {
            HeapObj::ViewIter { pos, .. } => {
                *pos = new_pos;
                Some(())
            }
            _ => None,
        })?
    }

    /// Returns `true` if `handle` refers to a live heap object.
    pub fn is_heap_ref(&self, handle: GcRef) -> bool {
        match handle.index() {
            Some(index) => index < self.objects.lock().len(),
            None => false,
        }
    }

    /// Checks a non-null reference against a heap type, concrete or
    /// abstract, honouring the declared subtype chains.
    pub fn is_type_of(&self, handle: GcRef, target: HeapType, types: &[SubType]) -> bool {
        if handle.is_null() {
            return false;
        }
        if handle.is_i31() {
            return matches!(target, HeapType::Any | HeapType::Eq | HeapType::I31);
        }
        let type_idx = self.with_obj(handle, |obj| match obj {
            HeapObj::Struct(s) => Some(s.type_idx),
            HeapObj::Array(a) => Some(a.type_idx),
            HeapObj::Func { type_idx, .. } => Some(*type_idx),
            _ => None,
        });
        let type_idx = match type_idx {
            Some(idx) => idx,
            None => return false,
        };
        match target {
            HeapType::Concrete(super_idx) => match type_idx {
                Some(idx) => is_subtype_of(types, idx, super_idx),
                None => false,
            },
            HeapType::Any => !matches!(
                self.kind_class(handle),
                ObjClass::Func | ObjClass::Extern
            ),
            HeapType::Eq => matches!(self.kind_class(handle), ObjClass::Struct | ObjClass::Array),
            HeapType::I31 => false,
            HeapType::Struct => matches!(self.kind_class(handle), ObjClass::Struct),
            HeapType::Array => matches!(self.kind_class(handle), ObjClass::Array),
            HeapType::Func => match type_idx {
                Some(idx) => matches!(
                    types.get(idx as usize).map(|ty| &ty.composite),
                    Some(CompositeType::Func(_))
                ),
                None => false,
            },
            HeapType::Extern => matches!(self.kind_class(handle), ObjClass::Extern),
            HeapType::String => matches!(self.kind_class(handle), ObjClass::Str),
            HeapType::StringViewWtf8 => matches!(self.kind_class(handle), ObjClass::ViewWtf8),
            HeapType::StringViewWtf16 => matches!(self.kind_class(handle), ObjClass::ViewWtf16),
            HeapType::StringViewIter => matches!(self.kind_class(handle), ObjClass::ViewIter),
            HeapType::None | HeapType::NoFunc | HeapType::NoExtern => false,
        }
    }

    fn kind_class(&self, handle: GcRef) -> ObjClass {
        self.with_obj(handle, |obj| match obj {
            HeapObj::Struct(_) => ObjClass::Struct,
            HeapObj::Array(_) => ObjClass::Array,
            HeapObj::Func { .. } => ObjClass::Func,
            HeapObj::Extern { .. } => ObjClass::Extern,
            HeapObj::Str { .. } => ObjClass::Str,
            HeapObj::ViewWtf8 { .. } => ObjClass::ViewWtf8,
            HeapObj::ViewWtf16 { .. } => ObjClass::ViewWtf16,
            HeapObj::ViewIter { .. } => ObjClass::ViewIter,
        })
        .unwrap_or(ObjClass::Extern)
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum ObjClass {
    Struct,
    Array,
    Func,
    Extern,
    Str,
    ViewWtf8,
    ViewWtf16,
    ViewIter,
}
