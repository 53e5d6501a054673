//! Linear memory instances.
//!
//! Memory data lives behind a readers-writer lock: plain loads and
//! stores take the read side, `memory.grow` and atomic
//! read-modify-write windows take the write side. Because the length
//! is re-read under the lock on every access, a concurrent grow is
//! always observed by the bounds check.

use crate::types::MemoryType;
use memory_units::{ByteSize, Bytes, Pages};
use runwasm_core::{self as core, LittleEndianConvert, Trap, TrapCode, WrapInto};
use spin::RwLock;
use std::{
    collections::HashMap,
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

/// Outcome codes of `atomic.wait`, as pushed onto the operand stack.
pub const WAIT_OK: u32 = 0;
pub const WAIT_NOT_EQUAL: u32 = 1;
pub const WAIT_TIMED_OUT: u32 = 2;

/// A linear memory instance.
#[derive(Debug)]
pub struct MemoryInstance {
    ty: MemoryType,
    data: RwLock<Vec<u8>>,
    shared: Option<SharedState>,
}

/// Wait/notify bookkeeping of a shared memory.
#[derive(Debug, Default)]
struct SharedState {
    queues: Mutex<HashMap<u64, Arc<WaitQueue>>>,
}

#[derive(Debug, Default)]
struct WaitQueue {
    state: Mutex<WaitQueueState>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct WaitQueueState {
    waiters: u32,
    pending_wakes: u32,
}

impl MemoryInstance {
    /// Allocates a memory of `ty.min_pages` zeroed pages.
    pub fn new(ty: MemoryType) -> Self {
        let initial = Bytes::from(Pages(ty.min_pages as usize)).0;
        Self {
            ty,
            data: RwLock::new(vec![0; initial]),
            shared: ty.shared.then(SharedState::default),
        }
    }

    /// The type this memory was created with.
    pub fn ty(&self) -> &MemoryType {
        &self.ty
    }

    /// Returns `true` if this memory is shared between threads.
    pub fn is_shared(&self) -> bool {
        self.shared.is_some()
    }

    /// Current size in bytes.
    pub fn data_size(&self) -> usize {
        self.data.read().len()
    }

    /// Current size in pages.
    pub fn page_count(&self) -> u64 {
        (self.data_size() / Pages::BYTE_SIZE.0) as u64
    }

    /// Grows the memory by `delta` pages.
    ///
    /// Returns the previous page count, or `None` if the grow request
    /// exceeds the declared maximum.
    pub fn grow(&self, delta: u64) -> Option<u64> {
        let mut data = self.data.write();
        let old_pages = (data.len() / Pages::BYTE_SIZE.0) as u64;
        let new_pages = old_pages.checked_add(delta)?;
        let max_pages = self
            .ty
            .max_pages
            .map(u64::from)
            .unwrap_or(if self.ty.memory64 { 1 << 48 } else { 1 << 16 });
        if new_pages > max_pages {
            return None;
        }
        let new_len = usize::try_from(new_pages).ok()?.checked_mul(Pages::BYTE_SIZE.0)?;
        data.resize(new_len, 0);
        log::debug!("memory grown from {old_pages} to {new_pages} pages");
        Some(old_pages)
    }

    /// Loads a `T` at `ptr + offset`.
    pub fn load<T>(&self, ptr: u64, offset: u64) -> Result<T, TrapCode>
    where
        T: LittleEndianConvert,
    {
        core::load(&self.data.read(), ptr, offset)
    }

    /// Loads a narrow `U` at `ptr + offset` and extends it into `T`.
    pub fn load_extend<T, U>(&self, ptr: u64, offset: u64) -> Result<T, TrapCode>
    where
        U: LittleEndianConvert + core::ExtendInto<T>,
    {
        core::load_extend::<T, U>(&self.data.read(), ptr, offset)
    }

    /// Stores a `T` at `ptr + offset`.
    pub fn store<T>(&self, ptr: u64, offset: u64, value: T) -> Result<(), TrapCode>
    where
        T: LittleEndianConvert,
    {
        core::store(&mut self.data.write(), ptr, offset, value)
    }

    /// Wraps `T` into the narrow `U` and stores it at `ptr + offset`.
    pub fn store_wrap<T, U>(&self, ptr: u64, offset: u64, value: T) -> Result<(), TrapCode>
    where
        T: WrapInto<U>,
        U: LittleEndianConvert,
    {
        core::store_wrap::<T, U>(&mut self.data.write(), ptr, offset, value)
    }

    /// Checks that `[dst, dst+len)` fits the current memory size.
    fn check_range(data_len: usize, start: u64, len: u64) -> Result<usize, TrapCode> {
        let end = start.checked_add(len).ok_or(TrapCode::MemoryOutOfBounds)?;
        if end > data_len as u64 {
            return Err(TrapCode::MemoryOutOfBounds);
        }
        Ok(start as usize)
    }

    /// `memory.fill`: sets `len` bytes at `dst` to `value`.
    pub fn fill(&self, dst: u64, value: u8, len: u64) -> Result<(), TrapCode> {
        let mut data = self.data.write();
        let start = Self::check_range(data.len(), dst, len)?;
        data[start..start + len as usize].fill(value);
        Ok(())
    }

    /// `memory.init`: copies from a passive data segment into memory.
    pub fn init(&self, dst: u64, src: &[u8], src_offset: u64, len: u64) -> Result<(), TrapCode> {
        let src_start = Self::check_range(src.len(), src_offset, len)?;
        let mut data = self.data.write();
        let dst_start = Self::check_range(data.len(), dst, len)?;
        data[dst_start..dst_start + len as usize]
            .copy_from_slice(&src[src_start..src_start + len as usize]);
        Ok(())
    }

    /// `memory.copy` within one memory; the regions may overlap.
    pub fn copy_within(&self, dst: u64, src: u64, len: u64) -> Result<(), TrapCode> {
        let mut data = self.data.write();
        let src_start = Self::check_range(data.len(), src, len)?;
        let dst_start = Self::check_range(data.len(), dst, len)?;
        data.copy_within(src_start..src_start + len as usize, dst_start);
        Ok(())
    }

    /// `memory.copy` between two distinct memories.
    pub fn copy_between(dst: &Self, dst_off: u64, src: &Self, src_off: u64, len: u64) -> Result<(), TrapCode> {
        if std::ptr::eq(dst, src) {
            return dst.copy_within(dst_off, src_off, len);
        }
        let src_data = src.data.read();
        let src_start = Self::check_range(src_data.len(), src_off, len)?;
        let mut dst_data = dst.data.write();
        let dst_start = Self::check_range(dst_data.len(), dst_off, len)?;
        dst_data[dst_start..dst_start + len as usize]
            .copy_from_slice(&src_data[src_start..src_start + len as usize]);
        Ok(())
    }

    /// Reads `buf.len()` bytes starting at `addr`.
    pub fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> Result<(), TrapCode> {
        let data = self.data.read();
        let start = Self::check_range(data.len(), addr, buf.len() as u64)?;
        buf.copy_from_slice(&data[start..start + buf.len()]);
        Ok(())
    }

    /// Writes `buf` starting at `addr`.
    pub fn write_bytes(&self, addr: u64, buf: &[u8]) -> Result<(), TrapCode> {
        let mut data = self.data.write();
        let start = Self::check_range(data.len(), addr, buf.len() as u64)?;
        data[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    /// Bounds- and alignment-checks an atomic access of `size` bytes
    /// at the effective address `addr`.
    fn check_atomic(data_len: usize, addr: u64, size: u64) -> Result<usize, TrapCode> {
        let start = Self::check_range(data_len, addr, size)?;
        if addr % size != 0 {
            return Err(TrapCode::UnalignedAtomic);
        }
        Ok(start)
    }

    /// An atomic read-modify-write window: loads a `T` at the
    /// effective address `addr`, applies `f`, stores the result if
    /// `Some`, and returns the old value. The memory's lock is held
    /// for the whole window.
    pub fn atomic_rmw<T>(&self, addr: u64, f: impl FnOnce(T) -> Option<T>) -> Result<T, TrapCode>
    where
        T: LittleEndianConvert + Copy,
    {
        let mut data = self.data.write();
        let start = Self::check_atomic(data.len(), addr, std::mem::size_of::<T>() as u64)?;
        let old: T = core::load_at(&data, start)?;
        if let Some(new) = f(old) {
            core::store_at(&mut data, start, new)?;
        }
        Ok(old)
    }

    fn queue(&self, addr: u64) -> Option<Arc<WaitQueue>> {
        let shared = self.shared.as_ref()?;
        let mut queues = shared.queues.lock().unwrap_or_else(|e| e.into_inner());
        Some(queues.entry(addr).or_default().clone())
    }

    /// `memory.atomic.wait32` / `wait64`.
    ///
    /// `timeout` in nanoseconds; negative means wait forever. Returns
    /// 0 (woken), 1 (value mismatch) or 2 (timed out).
    pub fn atomic_wait<T>(&self, addr: u64, expected: T, timeout: i64) -> Result<u32, Trap>
    where
        T: LittleEndianConvert + Copy + PartialEq,
    {
        let size = std::mem::size_of::<T>() as u64;
        {
            let data = self.data.read();
            Self::check_atomic(data.len(), addr, size)?;
        }
        let Some(queue) = self.queue(addr) else {
            return Err(Trap::new("atomic wait on non-shared memory"));
        };
        let deadline = (timeout >= 0).then(|| Instant::now() + Duration::from_nanos(timeout as u64));

        let mut state = queue.state.lock().unwrap_or_else(|e| e.into_inner());
        // The value check happens under the queue lock so a notifier
        // that stores and notifies cannot slip between check and sleep.
        {
            let data = self.data.read();
            let start = Self::check_atomic(data.len(), addr, size)?;
            let current: T = core::load_at(&data, start)?;
            if current != expected {
                return Ok(WAIT_NOT_EQUAL);
            }
        }
        state.waiters += 1;
        loop {
            if state.pending_wakes > 0 {
                state.pending_wakes -= 1;
                state.waiters -= 1;
                return Ok(WAIT_OK);
            }
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        state.waiters -= 1;
                        return Ok(WAIT_TIMED_OUT);
                    }
                    let (guard, _) = queue
                        .cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    guard
                }
                None => queue.cond.wait(state).unwrap_or_else(|e| e.into_inner()),
            };
        }
    }

    /// `memory.atomic.notify`: wakes up to `count` waiters at `addr`
    /// and returns the number of waiters woken.
    pub fn atomic_notify(&self, addr: u64, count: u32) -> Result<u32, TrapCode> {
        {
            let data = self.data.read();
            Self::check_atomic(data.len(), addr, 4)?;
        }
        let Some(queue) = self.queue(addr) else {
            // Unshared memory has no waiters by construction.
            return Ok(0);
        };
        let mut state = queue.state.lock().unwrap_or_else(|e| e.into_inner());
        let available = state.waiters.saturating_sub(state.pending_wakes);
        let woken = count.min(available);
        state.pending_wakes += woken;
        drop(state);
        queue.cond.notify_all();
        Ok(woken)
    }
}
