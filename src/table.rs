//! Table instances.

use crate::{gc::GcRef, types::TableType};
use runwasm_core::TrapCode;
use spin::RwLock;

/// A table instance holding reference elements.
#[derive(Debug)]
pub struct TableInstance {
    ty: TableType,
    elems: RwLock<Vec<GcRef>>,
}

impl TableInstance {
    /// Allocates a table of `ty.min` null elements.
    pub fn new(ty: TableType) -> Self {
        Self {
            ty,
            elems: RwLock::new(vec![GcRef::NULL; ty.min as usize]),
        }
    }

    /// The type this table was created with.
    pub fn ty(&self) -> &TableType {
        &self.ty
    }

    /// Current size in elements.
    pub fn size(&self) -> u32 {
        self.elems.read().len() as u32
    }

    /// Reads the element at `index`.
    pub fn get(&self, index: u32) -> Result<GcRef, TrapCode> {
        self.elems
            .read()
            .get(index as usize)
            .copied()
            .ok_or(TrapCode::TableOutOfBounds)
    }

    /// Writes the element at `index`.
    pub fn set(&self, index: u32, value: GcRef) -> Result<(), TrapCode> {
        self.elems
            .write()
            .get_mut(index as usize)
            .map(|slot| *slot = value)
            .ok_or(TrapCode::TableOutOfBounds)
    }

    /// Grows the table by `delta` elements initialized to `init`.
    ///
    /// Returns the previous size, or `None` when the grow request
    /// exceeds the declared maximum.
    pub fn grow(&self, delta: u32, init: GcRef) -> Option<u32> {
        let mut elems = self.elems.write();
        let old_size = elems.len() as u32;
        let new_size = old_size.checked_add(delta)?;
        if new_size > self.ty.max.unwrap_or(u32::MAX) {
            return None;
        }
        elems.resize(new_size as usize, init);
        Some(old_size)
    }

    /// `table.fill`: sets `len` elements starting at `dst`.
    pub fn fill(&self, dst: u32, value: GcRef, len: u32) -> Result<(), TrapCode> {
        let mut elems = self.elems.write();
        let range = Self::check_range(elems.len(), dst, len)?;
        elems[range.0..range.1].fill(value);
        Ok(())
    }

    /// `table.init`: copies from an element-segment slice.
    pub fn init(&self, dst: u32, src: &[GcRef], src_offset: u32, len: u32) -> Result<(), TrapCode> {
        let src_range = Self::check_range(src.len(), src_offset, len)?;
        let mut elems = self.elems.write();
        let dst_range = Self::check_range(elems.len(), dst, len)?;
        elems[dst_range.0..dst_range.1].copy_from_slice(&src[src_range.0..src_range.1]);
        Ok(())
    }

    /// `table.copy` between two (possibly identical) tables.
    pub fn copy(dst: &Self, dst_off: u32, src: &Self, src_off: u32, len: u32) -> Result<(), TrapCode> {
        // Snapshot the source first; this also makes the overlapping
        // same-table copy behave like memmove.
        let snapshot: Vec<GcRef> = {
            let elems = src.elems.read();
            let range = Self::check_range(elems.len(), src_off, len)?;
            elems[range.0..range.1].to_vec()
        };
        let mut elems = dst.elems.write();
        let range = Self::check_range(elems.len(), dst_off, len)?;
        elems[range.0..range.1].copy_from_slice(&snapshot);
        Ok(())
    }

    fn check_range(size: usize, start: u32, len: u32) -> Result<(usize, usize), TrapCode> {
        let end = (start as u64)
            .checked_add(len as u64)
            .ok_or(TrapCode::TableOutOfBounds)?;
        if end > size as u64 {
            return Err(TrapCode::TableOutOfBounds);
        }
        Ok((start as usize, end as usize))
    }
}
