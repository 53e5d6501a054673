//! Per-thread execution state: the contiguous wasm stack, interpreter
//! frames, the control stack, the reference map, thread-manager
//! signals, auxiliary-stack bounds and the block-address cache.
//!
//! The wasm stack is one pre-sized cell buffer. Frames are bump
//! allocated range descriptors over it; freeing a frame is a pointer
//! pop. A parallel byte map marks, per cell, whether the cell holds a
//! reference the garbage collector must trace, which turns root
//! enumeration into a linear scan over live frames.

use crate::{
    gc::{GcHeap, GcRef},
    Config, RunMode,
};
use runwasm_core::{Trap, TrapCode};
use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Condvar, Mutex,
    },
    time::Instant,
};

/// Thread-manager signal bits.
const SIG_TERMINATE: u32 = 1;
const SIG_SUSPEND: u32 = 2;
const SIG_STEP: u32 = 4;

/// Label kinds of active control-stack entries.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum LabelKind {
    /// The synthetic outermost block of a function activation.
    Function,
    /// A `block` region.
    Block,
    /// A `loop` region; branches re-enter at its beginning.
    Loop,
    /// An `if`/`else` region.
    If,
    /// A `try` region that may still catch.
    Try,
    /// A `try` region that caught; only a rethrow target now.
    Catch,
    /// Like [`LabelKind::Catch`] for `catch_all`.
    CatchAll,
}

/// An active structured region on the control stack.
#[derive(Debug)]
pub(crate) struct BranchBlock {
    /// The label kind.
    pub label: LabelKind,
    /// Result cells of a forward branch; parameter cells for loops.
    pub cell_num: u32,
    /// Code offset where the block body begins.
    pub begin_addr: usize,
    /// Forward-branch target; [`TARGET_UNKNOWN`] until resolved.
    pub target_addr: usize,
    /// Operand-stack snapshot minus the block's parameter cells.
    pub frame_sp: usize,
    /// Handler opcode offsets of a `try` block.
    pub handlers: Option<Box<[usize]>>,
}

/// Placeholder for a lazily resolved forward-branch target.
pub(crate) const TARGET_UNKNOWN: usize = usize::MAX;

/// An interpreter frame: a range descriptor over the wasm stack.
#[derive(Debug)]
pub(crate) struct Frame {
    /// Executing function index; `None` for the glue entry frame.
    pub func_idx: Option<u32>,
    /// Saved instruction pointer, synced at suspension points.
    pub ip: usize,
    /// Cell index of the local area (params then declared locals).
    pub lp: usize,
    /// Cell index where the operand stack begins.
    pub sp_bottom: usize,
    /// Saved operand stack pointer, synced at suspension points.
    pub sp: usize,
    /// One past the last usable operand cell.
    pub sp_boundary: usize,
    /// Control-stack watermark at frame entry.
    pub csp_bottom: usize,
    /// Maximum control-stack entries of this frame.
    pub csp_boundary: usize,
    /// Set when profiling is enabled.
    pub start_time: Option<Instant>,
}

#[derive(Debug, Default)]
struct SignalState {
    flags: AtomicU32,
    lock: Mutex<()>,
    cond: Condvar,
}

/// A cloneable handle for asserting signals on an [`ExecEnv`] from
/// another thread.
#[derive(Clone, Debug)]
pub struct SignalHandle(Arc<SignalState>);

impl SignalHandle {
    /// Asks the interpreter to return at its next suspension point.
    pub fn terminate(&self) {
        self.0.flags.fetch_or(SIG_TERMINATE, Ordering::SeqCst);
        self.notify();
    }

    /// Blocks the interpreter at its next suspension point.
    pub fn suspend(&self) {
        self.0.flags.fetch_or(SIG_SUSPEND, Ordering::SeqCst);
    }

    /// Requests a single-step stop at the next suspension point.
    pub fn step(&self) {
        self.0.flags.fetch_or(SIG_STEP, Ordering::SeqCst);
    }

    /// Resumes a suspended interpreter.
    pub fn resume(&self) {
        self.0.flags.fetch_and(!SIG_SUSPEND, Ordering::SeqCst);
        self.notify();
    }

    fn notify(&self) {
        let _guard = self.0.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.0.cond.notify_all();
    }
}

/// One entry of the direct-mapped block-address cache.
#[derive(Copy, Clone, Debug)]
struct BlockAddr {
    key: u64,
    else_addr: u32,
    end_addr: u32,
}

const BLOCK_CACHE_SETS: usize = 64;
const EMPTY_KEY: u64 = u64::MAX;

/// Direct-mapped, two-way cache of lazily discovered block boundaries.
#[derive(Debug)]
pub(crate) struct BlockCache {
    sets: Box<[[BlockAddr; 2]]>,
}

impl BlockCache {
    fn new() -> Self {
        let empty = BlockAddr {
            key: EMPTY_KEY,
            else_addr: 0,
            end_addr: 0,
        };
        Self {
            sets: vec![[empty; 2]; BLOCK_CACHE_SETS].into_boxed_slice(),
        }
    }

    fn set_of(key: u64) -> usize {
        (key as usize) & (BLOCK_CACHE_SETS - 1)
    }

    /// Looks up `(else_addr, end_addr)` for a block keyed by function
    /// index and code offset.
    pub fn lookup(&self, key: u64) -> Option<(Option<usize>, usize)> {
        let set = &self.sets[Self::set_of(key)];
        for way in set {
            if way.key == key {
                let else_addr = (way.else_addr != u32::MAX).then_some(way.else_addr as usize);
                return Some((else_addr, way.end_addr as usize));
            }
        }
        None
    }

    /// Inserts a resolved block boundary, evicting the older way.
    pub fn insert(&mut self, key: u64, else_addr: Option<usize>, end_addr: usize) {
        let set = &mut self.sets[Self::set_of(key)];
        set[1] = set[0];
        set[0] = BlockAddr {
            key,
            else_addr: else_addr.map(|a| a as u32).unwrap_or(u32::MAX),
            end_addr: end_addr as u32,
        };
    }

    /// Drops any entry for `key`; `try` re-resolves its handler list
    /// on every entry.
    pub fn invalidate(&mut self, key: u64) {
        let set = &mut self.sets[Self::set_of(key)];
        for way in set {
            if way.key == key {
                way.key = EMPTY_KEY;
            }
        }
    }
}

/// Per-thread execution environment: the wasm stack and everything
/// the interpreter needs besides the module instance.
#[derive(Debug)]
pub struct ExecEnv {
    pub(crate) cells: Vec<u32>,
    pub(crate) refs: Vec<u8>,
    pub(crate) cell_top: usize,
    pub(crate) ctrl: Vec<BranchBlock>,
    pub(crate) frames: Vec<Frame>,
    /// The live operand stack pointer of the innermost frame.
    pub(crate) sp: usize,
    pub(crate) block_cache: BlockCache,
    pub(crate) profiling: bool,
    pub(crate) mode: RunMode,
    pub(crate) aux_stack_bottom: u64,
    pub(crate) aux_stack_boundary: u64,
    /// Parameter staging area for tail calls; lives here so the hot
    /// path never allocates.
    pub(crate) scratch: Vec<u32>,
    signals: Arc<SignalState>,
}

impl ExecEnv {
    /// Creates an execution environment per `config`.
    pub fn new(config: &Config) -> Self {
        Self {
            cells: vec![0; config.value_stack_cells],
            refs: vec![0; config.value_stack_cells],
            cell_top: 0,
            ctrl: Vec::with_capacity(64),
            frames: Vec::with_capacity(16),
            sp: 0,
            block_cache: BlockCache::new(),
            profiling: config.profiling,
            mode: config.mode,
            aux_stack_bottom: 0,
            aux_stack_boundary: 0,
            scratch: Vec::new(),
            signals: Arc::new(SignalState::default()),
        }
    }

    /// A handle for asserting thread-manager signals on this
    /// environment from other threads.
    pub fn signal_handle(&self) -> SignalHandle {
        SignalHandle(self.signals.clone())
    }

    /// Configures the auxiliary stack bounds; the aux stack grows
    /// downwards from `bottom` towards `boundary`.
    pub fn set_aux_stack(&mut self, bottom: u64, boundary: u64) {
        self.aux_stack_bottom = bottom;
        self.aux_stack_boundary = boundary;
    }

    /// Polls the suspend/terminate/step flags. Only called at the
    /// designated suspension-point opcodes.
    #[inline]
    pub(crate) fn check_suspend_flags(&self) -> Result<(), Trap> {
        let flags = self.signals.flags.load(Ordering::SeqCst);
        if flags == 0 {
            return Ok(());
        }
        self.check_suspend_flags_slow()
    }

    #[cold]
    fn check_suspend_flags_slow(&self) -> Result<(), Trap> {
        loop {
            let flags = self.signals.flags.load(Ordering::SeqCst);
            if flags & SIG_TERMINATE != 0 {
                return Err(Trap::terminated());
            }
            if flags & SIG_STEP != 0 {
                // A step request behaves like a one-shot suspend
                // taken before the next opcode.
                self.signals.flags.fetch_and(!SIG_STEP, Ordering::SeqCst);
                self.signals.flags.fetch_or(SIG_SUSPEND, Ordering::SeqCst);
                continue;
            }
            if flags & SIG_SUSPEND != 0 {
                let guard = self.signals.lock.lock().unwrap_or_else(|e| e.into_inner());
                if self.signals.flags.load(Ordering::SeqCst) & SIG_SUSPEND != 0 {
                    drop(self.signals.cond.wait(guard).unwrap_or_else(|e| e.into_inner()));
                }
                continue;
            }
            return Ok(());
        }
    }

    /// Bump-allocates a frame of `lp_cells` local cells, `stack_cells`
    /// operand cells and up to `max_blocks` control entries.
    ///
    /// # Errors
    ///
    /// Fails with the "wasm operand stack overflow" trap when the
    /// frame does not fit the remaining wasm stack.
    pub(crate) fn alloc_frame(
        &mut self,
        func_idx: Option<u32>,
        lp_cells: u32,
        stack_cells: u32,
        max_blocks: u32,
    ) -> Result<(), TrapCode> {
        let lp = self.cell_top;
        let size = (lp_cells + stack_cells) as usize;
        let new_top = lp.checked_add(size).ok_or(TrapCode::StackOverflow)?;
        if new_top > self.cells.len() {
            return Err(TrapCode::StackOverflow);
        }
        // Cells are initialized by the caller (param copy plus local
        // zeroing); only the reference map must start clean here.
        self.refs[lp..new_top].fill(0);
        let sp_bottom = lp + lp_cells as usize;
        self.frames.push(Frame {
            func_idx,
            ip: 0,
            lp,
            sp_bottom,
            sp: sp_bottom,
            sp_boundary: new_top,
            csp_bottom: self.ctrl.len(),
            csp_boundary: self.ctrl.len() + max_blocks as usize,
            start_time: self.profiling.then(Instant::now),
        });
        self.cell_top = new_top;
        self.sp = sp_bottom;
        Ok(())
    }

    /// Frees the innermost frame and returns it.
    pub(crate) fn free_frame(&mut self) -> Frame {
        let frame = self
            .frames
            .pop()
            .expect("free_frame called with an empty frame chain");
        self.ctrl.truncate(frame.csp_bottom);
        self.cell_top = frame.lp;
        frame
    }

    /// The innermost frame.
    #[inline]
    pub(crate) fn cur_frame(&self) -> &Frame {
        self.frames
            .last()
            .expect("interpreter running without a frame")
    }

    /// The innermost frame, mutably.
    #[inline]
    pub(crate) fn cur_frame_mut(&mut self) -> &mut Frame {
        self.frames
            .last_mut()
            .expect("interpreter running without a frame")
    }

    // Typed operand-stack primitives. Pops are destructive; bounds
    // are guaranteed by validation and only enforced by the vector
    // indexing itself.

    #[inline]
    pub(crate) fn push_u32(&mut self, value: u32) {
        self.cells[self.sp] = value;
        self.sp += 1;
    }

    #[inline]
    pub(crate) fn pop_u32(&mut self) -> u32 {
        self.sp -= 1;
        self.cells[self.sp]
    }

    #[inline]
    pub(crate) fn push_u64(&mut self, value: u64) {
        self.cells[self.sp] = value as u32;
        self.cells[self.sp + 1] = (value >> 32) as u32;
        self.sp += 2;
    }

    #[inline]
    pub(crate) fn pop_u64(&mut self) -> u64 {
        self.sp -= 2;
        u64::from(self.cells[self.sp]) | (u64::from(self.cells[self.sp + 1]) << 32)
    }

    /// Pushes a traced reference and marks its reference-map byte.
    #[inline]
    pub(crate) fn push_ref(&mut self, value: GcRef) {
        self.cells[self.sp] = value.to_bits();
        self.refs[self.sp] = 1;
        self.sp += 1;
    }

    /// Pushes an i31 reference; i31 cells are never traced.
    #[inline]
    pub(crate) fn push_i31ref(&mut self, value: GcRef) {
        self.cells[self.sp] = value.to_bits();
        self.sp += 1;
    }

    /// Pops a reference and clears its reference-map byte.
    #[inline]
    pub(crate) fn pop_ref(&mut self) -> GcRef {
        self.sp -= 1;
        self.refs[self.sp] = 0;
        GcRef::from_bits(self.cells[self.sp])
    }

    /// Reads the reference `depth_cells` below the stack top without
    /// popping it.
    #[inline]
    pub(crate) fn peek_ref(&self, depth_cells: usize) -> GcRef {
        GcRef::from_bits(self.cells[self.sp - depth_cells])
    }

    /// Drops `n` cells, clearing their reference-map bytes.
    #[inline]
    pub(crate) fn drop_cells(&mut self, n: usize) {
        self.sp -= n;
        self.refs[self.sp..self.sp + n].fill(0);
    }

    /// Pushes a new control-stack entry. `frame_sp` records the
    /// operand stack minus the block's parameter cells.
    pub(crate) fn push_csp(
        &mut self,
        label: LabelKind,
        param_cells: u32,
        cell_num: u32,
        begin_addr: usize,
        target_addr: usize,
    ) {
        debug_assert!(self.ctrl.len() < self.cur_frame().csp_boundary);
        self.ctrl.push(BranchBlock {
            label,
            cell_num,
            begin_addr,
            target_addr,
            frame_sp: self.sp - param_cells as usize,
            handlers: None,
        });
    }

    /// Unwinds `n + 1` control entries, keeping the outermost of them
    /// on the stack: copies its arity cells (and their reference-map
    /// bytes) down to the recorded entry stack pointer, clears the
    /// vacated region, and returns the entry's branch target.
    pub(crate) fn pop_csp_n(&mut self, n: usize) -> usize {
        let sp_old = self.sp;
        self.ctrl.truncate(self.ctrl.len() - n);
        let (target_addr, frame_sp, cell_num) = {
            let block = self
                .ctrl
                .last()
                .expect("branch depth exceeds the open control stack");
            (block.target_addr, block.frame_sp, block.cell_num as usize)
        };
        if cell_num > 0 && frame_sp != sp_old - cell_num {
            let src = sp_old - cell_num;
            self.cells.copy_within(src..sp_old, frame_sp);
            self.refs.copy_within(src..sp_old, frame_sp);
        }
        let new_sp = frame_sp + cell_num;
        self.refs[new_sp..sp_old.max(new_sp)].fill(0);
        self.sp = new_sp;
        target_addr
    }

    /// Current control-stack height.
    #[inline]
    pub(crate) fn csp(&self) -> usize {
        self.ctrl.len()
    }

    /// Hands every live reference cell of every frame to `visitor`.
    ///
    /// This is the root traversal an external tracing collector runs;
    /// the innermost frame must have its registers synced, which holds
    /// at every point a collection can be triggered from.
    pub fn traverse_gc_rootset(&self, heap: &GcHeap, visitor: &mut dyn FnMut(GcRef)) {
        for frame in self.frames.iter().rev() {
            for idx in frame.lp..frame.sp {
                if self.refs[idx] != 0 {
                    let handle = GcRef::from_bits(self.cells[idx]);
                    if heap.is_heap_ref(handle) {
                        visitor(handle);
                    }
                }
            }
        }
    }

    /// A post-mortem view of the call stack from the synced frame
    /// registers: `(function index, saved ip)` pairs, innermost first.
    pub fn call_stack(&self) -> Vec<(Option<u32>, usize)> {
        self.frames
            .iter()
            .rev()
            .map(|frame| (frame.func_idx, frame.ip))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> ExecEnv {
        ExecEnv::new(&Config {
            value_stack_cells: 64,
            ..Config::default()
        })
    }

    #[test]
    fn frame_allocation_overflows_gracefully() {
        let mut env = env();
        env.alloc_frame(None, 8, 16, 2).unwrap();
        assert_eq!(
            env.alloc_frame(Some(0), 32, 32, 2),
            Err(TrapCode::StackOverflow)
        );
        // The failed allocation left the stack untouched.
        assert_eq!(env.cell_top, 24);
        env.free_frame();
        assert_eq!(env.cell_top, 0);
    }

    #[test]
    fn ref_map_follows_pushes_and_pops() {
        let mut env = env();
        env.alloc_frame(None, 0, 8, 2).unwrap();
        env.push_u32(7);
        env.push_ref(GcRef::from_bits(42));
        assert_eq!(env.refs[env.sp - 1], 1);
        assert_eq!(env.refs[env.sp - 2], 0);
        let popped = env.pop_ref();
        assert_eq!(popped.to_bits(), 42);
        assert_eq!(env.refs[env.sp], 0);
    }

    #[test]
    fn pop_csp_n_copies_arity_cells() {
        let mut env = env();
        env.alloc_frame(None, 0, 16, 4).unwrap();
        env.push_csp(LabelKind::Function, 0, 1, 0, 99);
        env.push_u32(1);
        env.push_u32(2);
        env.push_csp(LabelKind::Block, 0, 1, 5, 50);
        env.push_u32(3);
        env.push_u32(4);
        // Branch out of the inner block: one result cell moves down.
        let target = env.pop_csp_n(0);
        assert_eq!(target, 50);
        assert_eq!(env.sp, env.cur_frame().sp_bottom + 3);
        assert_eq!(env.cells[env.sp - 1], 4);
        assert_eq!(env.csp(), 2);
    }
}
