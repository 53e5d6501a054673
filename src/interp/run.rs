//! The opcode dispatcher.
//!
//! One `exec` activation drives a whole call tree: an outer loop
//! (re)enters the innermost frame and an inner switch-in-loop decodes
//! and executes opcodes until the frame calls, returns or traps.
//! Registers of interest are `ip` (a local), `env.sp` (live operand
//! stack pointer) and the control stack height; they are synced into
//! the frame only at suspension points — calls, host bridging and the
//! trap exit — so the post-mortem call-stack walker sees a consistent
//! chain.

use super::{leb, opcodes as op, scan};
use crate::{
    exec_env::{ExecEnv, LabelKind, TARGET_UNKNOWN},
    gc::{ArrayObj, GcRef, HeapObj, StructObj},
    host::HostAbi,
    instance::{FuncInstance, ModuleInstance},
    memory::MemoryInstance,
    module::Module,
    stringref as sr,
    types::{is_subtype_of, StorageType},
    value::{HeapType, ValType, Value},
};
use runwasm_core::{
    Float, Integer, Trap, TrapCode, TruncateSaturateInto, TryTruncateInto, F32, F64,
};
use std::sync::atomic::{fence, Ordering};

/// Enters the dispatcher for a top-level call to a defined function.
/// The glue frame is current and holds the argument cells.
pub(super) fn enter(
    env: &mut ExecEnv,
    inst: &ModuleInstance,
    func_idx: u32,
) -> Result<(), Trap> {
    let module = inst.module().clone();
    push_wasm_frame(env, &module, func_idx)?;
    env.check_suspend_flags()?;
    exec(env, inst, &module)
}

/// A top-level call to an import: bridge straight to the host with
/// the glue frame as the caller.
pub(super) fn call_host_from_entry(
    env: &mut ExecEnv,
    inst: &ModuleInstance,
    func_idx: u32,
) -> Result<(), Trap> {
    let module = inst.module().clone();
    call_host(env, inst, &module, func_idx, false)
}

fn cache_key(func_idx: u32, offset: usize) -> u64 {
    (u64::from(func_idx) << 32) | offset as u64
}

/// Decodes a blocktype into `(param_cells, result_cells)`.
fn read_block_type(module: &Module, code: &[u8], ip: &mut usize) -> (u32, u32) {
    let byte = code[*ip];
    if byte == 0x40 {
        *ip += 1;
        return (0, 0);
    }
    if byte & 0x80 == 0 && byte & 0x40 != 0 {
        // Single-byte negative s33: a shorthand value type.
        *ip += 1;
        let cells = match byte {
            0x7E | 0x7C => 2,
            0x63 | 0x64 => {
                leb::skip(code, ip);
                1
            }
            _ => 1,
        };
        return (0, cells);
    }
    let type_idx = leb::read_i64(code, ip) as u32;
    let ty = module.func_type(type_idx);
    (ty.param_cell_num(), ty.ret_cell_num())
}

/// Maps a heap-type s33 immediate onto [`HeapType`].
fn heap_type_from_code(value: i64) -> HeapType {
    if value >= 0 {
        return HeapType::Concrete(value as u32);
    }
    match value {
        -13 => HeapType::NoFunc,
        -14 => HeapType::NoExtern,
        -15 => HeapType::None,
        -16 => HeapType::Func,
        -17 => HeapType::Extern,
        -18 => HeapType::Any,
        -19 => HeapType::Eq,
        -20 => HeapType::I31,
        -21 => HeapType::Struct,
        -22 => HeapType::Array,
        -28 => HeapType::String,
        -29 => HeapType::StringViewWtf8,
        -30 => HeapType::StringViewWtf16,
        -31 => HeapType::StringViewIter,
        _ => HeapType::None,
    }
}

/// Marks the reference-map bytes of reference-typed params and locals.
fn init_frame_refs(env: &mut ExecEnv, module: &Module, func_idx: u32, lp: usize) {
    let body = module
        .func_body(func_idx)
        .expect("frame refs initialized for a defined function");
    for (ty, off) in body.local_types.iter().zip(body.local_offsets.iter()) {
        if ty.is_traced_ref() {
            env.refs[lp + *off as usize] = 1;
        }
    }
}

/// Prepares a callee frame for `func_idx`, consuming the argument
/// cells off the caller's operand stack.
fn push_wasm_frame(env: &mut ExecEnv, module: &Module, func_idx: u32) -> Result<(), TrapCode> {
    let body = module
        .func_body(func_idx)
        .expect("imports are routed to the host bridge");
    let param = body.param_cell_num as usize;
    let src = env.sp - param;
    env.cur_frame_mut().sp = src;
    env.alloc_frame(
        Some(func_idx),
        body.param_cell_num + body.local_cell_num,
        body.max_stack_cell_num,
        body.max_block_num,
    )?;
    let lp = env.cur_frame().lp;
    env.cells.copy_within(src..src + param, lp);
    env.refs[src..src + param].fill(0);
    let local_end = lp + (body.param_cell_num + body.local_cell_num) as usize;
    env.cells[lp + param..local_end].fill(0);
    init_frame_refs(env, module, func_idx, lp);
    env.push_csp(
        LabelKind::Function,
        0,
        body.ret_cell_num,
        0,
        body.code.len().saturating_sub(1),
    );
    Ok(())
}

/// Like [`push_wasm_frame`] for tail calls: the caller frame is
/// already freed and the arguments staged in `env.scratch`.
fn push_wasm_frame_tail(env: &mut ExecEnv, module: &Module, func_idx: u32) -> Result<(), TrapCode> {
    let body = module
        .func_body(func_idx)
        .expect("imports are routed to the host bridge");
    env.alloc_frame(
        Some(func_idx),
        body.param_cell_num + body.local_cell_num,
        body.max_stack_cell_num,
        body.max_block_num,
    )?;
    let lp = env.cur_frame().lp;
    let param = body.param_cell_num as usize;
    env.cells[lp..lp + param].copy_from_slice(&env.scratch[..param]);
    let local_end = lp + (body.param_cell_num + body.local_cell_num) as usize;
    env.cells[lp + param..local_end].fill(0);
    init_frame_refs(env, module, func_idx, lp);
    env.push_csp(
        LabelKind::Function,
        0,
        body.ret_cell_num,
        0,
        body.code.len().saturating_sub(1),
    );
    Ok(())
}

/// Accrues profiling counters for a finished frame.
fn accrue_stats(env: &ExecEnv, inst: &ModuleInstance, freed: &crate::exec_env::Frame) {
    let (Some(func_idx), Some(start)) = (freed.func_idx, freed.start_time) else {
        return;
    };
    let elapsed = start.elapsed().as_nanos() as u64;
    let stats = inst.func_stats(func_idx);
    stats.exec_time_ns.fetch_add(elapsed, Ordering::Relaxed);
    stats.exec_count.fetch_add(1, Ordering::Relaxed);
    if let Some(parent) = env.frames.last().and_then(|frame| frame.func_idx) {
        inst.func_stats(parent)
            .children_time_ns
            .fetch_add(elapsed, Ordering::Relaxed);
    }
}

/// Bridges an import call to the host.
///
/// For a normal call the arguments sit on the caller's stack top; for
/// a tail call the caller frame is already freed and the arguments
/// staged in `env.scratch`. Results are pushed onto the now-current
/// frame with their reference-map bytes set per the signature.
fn call_host(
    env: &mut ExecEnv,
    inst: &ModuleInstance,
    module: &Module,
    func_idx: u32,
    tail: bool,
) -> Result<(), Trap> {
    let func_type = module.func_type(module.func_type_idx(func_idx));
    let param_cells = func_type.param_cell_num() as usize;
    let ret_cells = func_type.ret_cell_num() as usize;

    if !tail {
        let src = env.sp - param_cells;
        env.scratch.clear();
        let args = &env.cells[src..src + param_cells];
        env.scratch.extend_from_slice(args);
        env.refs[src..src + param_cells].fill(0);
        env.sp = src;
        env.cur_frame_mut().sp = src;
    }

    // The native frame holds the argument and result cells only: no
    // operand stack, no control stack.
    let lp_cells = (param_cells.max(ret_cells) as u32).max(2);
    env.alloc_frame(Some(func_idx), lp_cells, 0, 0)?;
    let lp = env.cur_frame().lp;
    env.cells[lp..lp + lp_cells as usize].fill(0);
    env.cells[lp..lp + param_cells].copy_from_slice(&env.scratch[..param_cells]);
    let mut offset = lp;
    for ty in func_type.params() {
        if ty.is_traced_ref() {
            env.refs[offset] = 1;
        }
        offset += ty.cell_num() as usize;
    }

    let host = match inst.func_inst(func_idx) {
        Some(FuncInstance::Host { func, .. }) => func.clone(),
        _ => {
            env.free_frame();
            return Err(Trap::from(TrapCode::UnknownFunction));
        }
    };

    let mut results = vec![0_u32; ret_cells];
    let outcome = match &host.abi {
        HostAbi::Raw(f) => {
            let buffer = &mut env.cells[lp..lp + lp_cells as usize];
            let outcome = f(buffer);
            if outcome.is_ok() {
                results.copy_from_slice(&env.cells[lp..lp + ret_cells]);
            }
            outcome
        }
        HostAbi::Cells(f) => f(&env.cells[lp..lp + param_cells], &mut results),
        HostAbi::Typed(f) => {
            let mut values = Vec::with_capacity(func_type.params().len());
            let mut offset = lp;
            for ty in func_type.params() {
                values.push(Value::from_cells(*ty, &env.cells[offset..]));
                offset += ty.cell_num() as usize;
            }
            f(&values).map(|ret| {
                if let Some(value) = ret {
                    value.to_cells(&mut results);
                }
            })
        }
    };

    let freed = env.free_frame();
    accrue_stats(env, inst, &freed);

    match outcome {
        Err(trap) => {
            log::debug!("host function {func_idx} failed: {trap}");
            inst.set_exception(&trap.to_string());
            Err(trap)
        }
        Ok(()) => {
            env.sp = env.cur_frame().sp;
            let mut offset = 0;
            for ty in func_type.results() {
                match ty {
                    ValType::I64 | ValType::F64 => {
                        let bits =
                            u64::from(results[offset]) | (u64::from(results[offset + 1]) << 32);
                        env.push_u64(bits);
                        offset += 2;
                    }
                    ValType::Ref(rt) => {
                        let handle = GcRef::from_bits(results[offset]);
                        if rt.heap == HeapType::I31 {
                            env.push_i31ref(handle);
                        } else {
                            env.push_ref(handle);
                        }
                        offset += 1;
                    }
                    _ => {
                        env.push_u32(results[offset]);
                        offset += 1;
                    }
                }
            }
            let sp_now = env.sp;
            env.cur_frame_mut().sp = sp_now;
            Ok(())
        }
    }
}

/// Resolves the lazily discovered forward target of the block on top
/// of the control stack.
fn resolve_branch_target(
    env: &mut ExecEnv,
    code: &[u8],
    func_idx: u32,
) -> Result<usize, TrapCode> {
    let begin = env
        .ctrl
        .last()
        .expect("branch into an open block")
        .begin_addr;
    let key = cache_key(func_idx, begin);
    let end = match env.block_cache.lookup(key) {
        Some((_, end)) => end,
        None => {
            let (else_addr, end) =
                scan::find_block_end(code, begin).ok_or(TrapCode::UnsupportedOpcode)?;
            env.block_cache.insert(key, else_addr, end);
            end
        }
    };
    env.ctrl
        .last_mut()
        .expect("branch into an open block")
        .target_addr = end;
    Ok(end)
}

/// Undoes `n` control entries and resets the operand stack to the
/// entry snapshot of the new top, relabelling it.
fn unwind_csp(env: &mut ExecEnv, n: usize, relabel: LabelKind) {
    let keep = env.ctrl.len() - n;
    env.ctrl.truncate(keep);
    let block = env
        .ctrl
        .last_mut()
        .expect("exception unwind keeps the function label");
    block.label = relabel;
    let new_sp = block.frame_sp;
    let old_sp = env.sp;
    env.refs[new_sp..old_sp].fill(0);
    env.sp = new_sp;
}

enum CatchOutcome {
    /// A handler matched; dispatch continues at the returned offset.
    Caught(usize),
    /// No handler in this frame; the exception was copied to the
    /// caller and the frame must perform a function return.
    Uncaught,
}

/// Walks the control stack from the innermost entry outward looking
/// for a handler of `tag`, the way the exception unwinder is
/// specified: TRY may catch, CATCH/CATCH_ALL are only rethrow
/// targets, BLOCK/IF/LOOP are transparent, DELEGATE re-enters the
/// search in the delegated-to region, FUNCTION propagates.
fn find_catch_handler(
    env: &mut ExecEnv,
    inst: &ModuleInstance,
    code: &[u8],
    tag: u32,
) -> CatchOutcome {
    let tag_cells = inst.tag_sig(tag).param_cell_num() as usize;
    let save_vals = |env: &ExecEnv| env.cells[env.sp - tag_cells..env.sp].to_vec();
    let mut depth = 0_usize;
    loop {
        let idx = env.csp() - 1 - depth;
        match env.ctrl[idx].label {
            LabelKind::Block
            | LabelKind::If
            | LabelKind::Loop
            | LabelKind::Catch
            | LabelKind::CatchAll => depth += 1,
            LabelKind::Try => {
                let handlers = env.ctrl[idx]
                    .handlers
                    .clone()
                    .unwrap_or_else(|| Box::new([]));
                let mut action = None;
                for &handler in handlers.iter() {
                    match code[handler] {
                        op::CATCH => {
                            let mut at = handler + 1;
                            let lookup = leb::read_u32(code, &mut at);
                            if lookup == tag {
                                action = Some((LabelKind::Catch, at, None));
                                break;
                            }
                        }
                        op::CATCH_ALL => {
                            action = Some((LabelKind::CatchAll, handler + 1, None));
                            break;
                        }
                        op::DELEGATE => {
                            let mut at = handler + 1;
                            let lookup_depth = leb::read_u32(code, &mut at);
                            action = Some((LabelKind::Catch, at, Some(lookup_depth)));
                            break;
                        }
                        _ => {}
                    }
                }
                match action {
                    Some((relabel, body_ip, None)) => {
                        let vals = save_vals(env);
                        unwind_csp(env, depth, relabel);
                        env.push_u32(tag);
                        for &cell in &vals {
                            env.push_u32(cell);
                        }
                        if relabel == LabelKind::Catch {
                            // A second copy feeds the handler body;
                            // the first stays for rethrow.
                            for &cell in &vals {
                                env.push_u32(cell);
                            }
                        }
                        return CatchOutcome::Caught(body_ip);
                    }
                    Some((_, _, Some(lookup_depth))) => {
                        // Delegate: pop to the delegated-to region and
                        // resume the search there.
                        let vals = save_vals(env);
                        unwind_csp(env, depth, LabelKind::Catch);
                        let keep = env.csp() - 1 - lookup_depth as usize;
                        env.ctrl.truncate(keep);
                        for &cell in &vals {
                            env.push_u32(cell);
                        }
                        depth = 0;
                    }
                    None => depth += 1,
                }
            }
            LabelKind::Function => {
                let vals = save_vals(env);
                unwind_csp(env, depth, LabelKind::Function);
                let caller_idx = env.frames.len() - 2;
                let mut dst = env.frames[caller_idx].sp;
                for &cell in &vals {
                    env.cells[dst] = cell;
                    env.refs[dst] = 0;
                    dst += 1;
                }
                env.cells[dst] = tag;
                env.refs[dst] = 0;
                dst += 1;
                env.frames[caller_idx].sp = dst;
                inst.set_exception(TrapCode::UncaughtException.trap_message());
                return CatchOutcome::Uncaught;
            }
        }
    }
}

fn effective(addr: u64, offset: u64) -> Result<u64, TrapCode> {
    addr.checked_add(offset).ok_or(TrapCode::MemoryOutOfBounds)
}

macro_rules! rmw_apply {
    ( $( fn $name:ident($ty:ty); )* ) => {
        $(
            fn $name(group: u32, cur: $ty, operand: $ty, expect: $ty) -> Option<$ty> {
                Some(match group {
                    0 => cur.wrapping_add(operand),
                    1 => cur.wrapping_sub(operand),
                    2 => cur & operand,
                    3 => cur | operand,
                    4 => cur ^ operand,
                    5 => operand,
                    _ => {
                        if cur == expect {
                            operand
                        } else {
                            return None;
                        }
                    }
                })
            }
        )*
    };
}
rmw_apply! {
    fn rmw_apply_u8(u8);
    fn rmw_apply_u16(u16);
    fn rmw_apply_u32(u32);
    fn rmw_apply_u64(u64);
}

/// Executes one `0xFE`-prefixed atomic opcode.
fn exec_atomic(
    env: &mut ExecEnv,
    inst: &ModuleInstance,
    code: &[u8],
    ip: &mut usize,
) -> Result<(), Trap> {
    use op::atomic as a;
    let sub = leb::read_u32(code, ip);
    if sub == a::FENCE {
        *ip += 1;
        fence(Ordering::SeqCst);
        return Ok(());
    }
    let align = leb::read_u32(code, ip);
    let memidx = if align & op::OPT_MEMIDX_FLAG != 0 {
        leb::read_u32(code, ip)
    } else {
        0
    };
    let offset = leb::read_u64(code, ip);
    let mem = inst.memory(memidx).clone();
    let pop_addr = |env: &mut ExecEnv| {
        if mem.ty().memory64 {
            env.pop_u64()
        } else {
            u64::from(env.pop_u32())
        }
    };

    match sub {
        a::NOTIFY => {
            let count = env.pop_u32();
            let ea = effective(pop_addr(env), offset)?;
            let woken = mem.atomic_notify(ea, count)?;
            env.push_u32(woken);
        }
        a::WAIT32 => {
            let timeout = env.pop_u64() as i64;
            let expected = env.pop_u32();
            let ea = effective(pop_addr(env), offset)?;
            let outcome = mem.atomic_wait::<u32>(ea, expected, timeout)?;
            env.check_suspend_flags()?;
            env.push_u32(outcome);
        }
        a::WAIT64 => {
            let timeout = env.pop_u64() as i64;
            let expected = env.pop_u64();
            let ea = effective(pop_addr(env), offset)?;
            let outcome = mem.atomic_wait::<u64>(ea, expected, timeout)?;
            env.check_suspend_flags()?;
            env.push_u32(outcome);
        }
        a::I32_LOAD | a::I32_LOAD8_U | a::I32_LOAD16_U => {
            let ea = effective(pop_addr(env), offset)?;
            let value = match sub {
                a::I32_LOAD8_U => u32::from(mem.atomic_rmw::<u8>(ea, |_| None)?),
                a::I32_LOAD16_U => u32::from(mem.atomic_rmw::<u16>(ea, |_| None)?),
                _ => mem.atomic_rmw::<u32>(ea, |_| None)?,
            };
            env.push_u32(value);
        }
        a::I64_LOAD | a::I64_LOAD8_U | a::I64_LOAD16_U | a::I64_LOAD32_U => {
            let ea = effective(pop_addr(env), offset)?;
            let value = match sub {
                a::I64_LOAD8_U => u64::from(mem.atomic_rmw::<u8>(ea, |_| None)?),
                a::I64_LOAD16_U => u64::from(mem.atomic_rmw::<u16>(ea, |_| None)?),
                a::I64_LOAD32_U => u64::from(mem.atomic_rmw::<u32>(ea, |_| None)?),
                _ => mem.atomic_rmw::<u64>(ea, |_| None)?,
            };
            env.push_u64(value);
        }
        a::I32_STORE | a::I32_STORE8 | a::I32_STORE16 => {
            let value = env.pop_u32();
            let ea = effective(pop_addr(env), offset)?;
            match sub {
                a::I32_STORE8 => drop(mem.atomic_rmw::<u8>(ea, |_| Some(value as u8))?),
                a::I32_STORE16 => drop(mem.atomic_rmw::<u16>(ea, |_| Some(value as u16))?),
                _ => drop(mem.atomic_rmw::<u32>(ea, |_| Some(value))?),
            }
        }
        a::I64_STORE | a::I64_STORE8 | a::I64_STORE16 | a::I64_STORE32 => {
            let value = env.pop_u64();
            let ea = effective(pop_addr(env), offset)?;
            match sub {
                a::I64_STORE8 => drop(mem.atomic_rmw::<u8>(ea, |_| Some(value as u8))?),
                a::I64_STORE16 => drop(mem.atomic_rmw::<u16>(ea, |_| Some(value as u16))?),
                a::I64_STORE32 => drop(mem.atomic_rmw::<u32>(ea, |_| Some(value as u32))?),
                _ => drop(mem.atomic_rmw::<u64>(ea, |_| Some(value))?),
            }
        }
        a::RMW_ADD_BASE..=a::RMW_END => {
            let group = (sub - a::RMW_ADD_BASE) / 7;
            let width = (sub - a::RMW_ADD_BASE) % 7;
            let is64 = matches!(width, 1 | 4 | 5 | 6);
            let is_cmpxchg = group == 6;
            let (operand, expect) = if is64 {
                let replacement = env.pop_u64();
                let expect = if is_cmpxchg { env.pop_u64() } else { 0 };
                (replacement, expect)
            } else {
                let replacement = u64::from(env.pop_u32());
                let expect = if is_cmpxchg { u64::from(env.pop_u32()) } else { 0 };
                (replacement, expect)
            };
            let ea = effective(pop_addr(env), offset)?;
            let old = match width {
                0 => u64::from(mem.atomic_rmw::<u32>(ea, |cur| {
                    rmw_apply_u32(group, cur, operand as u32, expect as u32)
                })?),
                1 => mem.atomic_rmw::<u64>(ea, |cur| rmw_apply_u64(group, cur, operand, expect))?,
                2 | 4 => u64::from(mem.atomic_rmw::<u8>(ea, |cur| {
                    rmw_apply_u8(group, cur, operand as u8, expect as u8)
                })?),
                3 | 5 => u64::from(mem.atomic_rmw::<u16>(ea, |cur| {
                    rmw_apply_u16(group, cur, operand as u16, expect as u16)
                })?),
                _ => u64::from(mem.atomic_rmw::<u32>(ea, |cur| {
                    rmw_apply_u32(group, cur, operand as u32, expect as u32)
                })?),
            };
            if is64 {
                env.push_u64(old);
            } else {
                env.push_u32(old as u32);
            }
        }
        _ => return Err(Trap::from(TrapCode::UnsupportedOpcode)),
    }
    Ok(())
}

/// Executes one `0xFC`-prefixed misc opcode: saturating truncations
/// and the bulk memory and table operations.
fn exec_misc(
    env: &mut ExecEnv,
    inst: &ModuleInstance,
    code: &[u8],
    ip: &mut usize,
) -> Result<(), TrapCode> {
    use op::misc as m;
    let sub = leb::read_u32(code, ip);
    let pop_addr = |env: &mut ExecEnv, mem: &MemoryInstance| {
        if mem.ty().memory64 {
            env.pop_u64()
        } else {
            u64::from(env.pop_u32())
        }
    };
    match sub {
        m::I32_TRUNC_SAT_F32_S => {
            let v = F32::from_bits(env.pop_u32()).to_float();
            let r: i32 = v.truncate_saturate_into();
            env.push_u32(r as u32);
        }
        m::I32_TRUNC_SAT_F32_U => {
            let v = F32::from_bits(env.pop_u32()).to_float();
            let r: u32 = v.truncate_saturate_into();
            env.push_u32(r);
        }
        m::I32_TRUNC_SAT_F64_S => {
            let v = F64::from_bits(env.pop_u64()).to_float();
            let r: i32 = v.truncate_saturate_into();
            env.push_u32(r as u32);
        }
        m::I32_TRUNC_SAT_F64_U => {
            let v = F64::from_bits(env.pop_u64()).to_float();
            let r: u32 = v.truncate_saturate_into();
            env.push_u32(r);
        }
        m::I64_TRUNC_SAT_F32_S => {
            let v = F32::from_bits(env.pop_u32()).to_float();
            let r: i64 = v.truncate_saturate_into();
            env.push_u64(r as u64);
        }
        m::I64_TRUNC_SAT_F32_U => {
            let v = F32::from_bits(env.pop_u32()).to_float();
            let r: u64 = v.truncate_saturate_into();
            env.push_u64(r);
        }
        m::I64_TRUNC_SAT_F64_S => {
            let v = F64::from_bits(env.pop_u64()).to_float();
            let r: i64 = v.truncate_saturate_into();
            env.push_u64(r as u64);
        }
        m::I64_TRUNC_SAT_F64_U => {
            let v = F64::from_bits(env.pop_u64()).to_float();
            let r: u64 = v.truncate_saturate_into();
            env.push_u64(r);
        }
        m::MEMORY_INIT => {
            let seg_idx = leb::read_u32(code, ip);
            let memidx = leb::read_u32(code, ip);
            let mem = inst.memory(memidx);
            let len = u64::from(env.pop_u32());
            let src = u64::from(env.pop_u32());
            let dst = pop_addr(env, mem);
            mem.init(dst, inst.data_bytes(seg_idx), src, len)?;
        }
        m::DATA_DROP => {
            let seg_idx = leb::read_u32(code, ip);
            inst.drop_data(seg_idx);
        }
        m::MEMORY_COPY => {
            let dst_idx = leb::read_u32(code, ip);
            let src_idx = leb::read_u32(code, ip);
            let dst_mem = inst.memory(dst_idx);
            let src_mem = inst.memory(src_idx);
            let len = pop_addr(env, dst_mem);
            let src = pop_addr(env, src_mem);
            let dst = pop_addr(env, dst_mem);
            if dst_idx == src_idx {
                dst_mem.copy_within(dst, src, len)?;
            } else {
                MemoryInstance::copy_between(dst_mem, dst, src_mem, src, len)?;
            }
        }
        m::MEMORY_FILL => {
            let memidx = leb::read_u32(code, ip);
            let mem = inst.memory(memidx);
            let len = pop_addr(env, mem);
            let value = env.pop_u32();
            let dst = pop_addr(env, mem);
            mem.fill(dst, value as u8, len)?;
        }
        m::TABLE_INIT => {
            let seg_idx = leb::read_u32(code, ip);
            let table_idx = leb::read_u32(code, ip);
            let len = env.pop_u32();
            let src = env.pop_u32();
            let dst = env.pop_u32();
            let refs = inst.elem_refs(seg_idx);
            inst.table(table_idx).init(dst, &refs, src, len)?;
        }
        m::ELEM_DROP => {
            let seg_idx = leb::read_u32(code, ip);
            inst.drop_elem(seg_idx);
        }
        m::TABLE_COPY => {
            let dst_idx = leb::read_u32(code, ip);
            let src_idx = leb::read_u32(code, ip);
            let len = env.pop_u32();
            let src = env.pop_u32();
            let dst = env.pop_u32();
            crate::TableInstance::copy(inst.table(dst_idx), dst, inst.table(src_idx), src, len)?;
        }
        m::TABLE_GROW => {
            let table_idx = leb::read_u32(code, ip);
            let delta = env.pop_u32();
            let init = env.pop_ref();
            match inst.table(table_idx).grow(delta, init) {
                Some(old) => env.push_u32(old),
                None => env.push_u32(u32::MAX),
            }
        }
        m::TABLE_SIZE => {
            let table_idx = leb::read_u32(code, ip);
            let size = inst.table(table_idx).size();
            env.push_u32(size);
        }
        m::TABLE_FILL => {
            let table_idx = leb::read_u32(code, ip);
            let len = env.pop_u32();
            let value = env.pop_ref();
            let dst = env.pop_u32();
            inst.table(table_idx).fill(dst, value, len)?;
        }
        _ => return Err(TrapCode::UnsupportedOpcode),
    }
    Ok(())
}

/// Pops a value of the given storage type, masked for packed storage.
fn pop_storage(env: &mut ExecEnv, storage: StorageType) -> u64 {
    match storage {
        StorageType::I8 => u64::from(env.pop_u32() & 0xFF),
        StorageType::I16 => u64::from(env.pop_u32() & 0xFFFF),
        StorageType::Val(ValType::I64 | ValType::F64) => env.pop_u64(),
        StorageType::Val(ValType::Ref(_)) => u64::from(env.pop_ref().to_bits()),
        StorageType::Val(_) => u64::from(env.pop_u32()),
    }
}

/// Pushes a raw storage value, widening packed storage with the
/// requested signedness.
fn push_storage(env: &mut ExecEnv, storage: StorageType, raw: u64, signed: bool) {
    match storage {
        StorageType::I8 => {
            let v = if signed {
                raw as u8 as i8 as i32 as u32
            } else {
                u32::from(raw as u8)
            };
            env.push_u32(v);
        }
        StorageType::I16 => {
            let v = if signed {
                raw as u16 as i16 as i32 as u32
            } else {
                u32::from(raw as u16)
            };
            env.push_u32(v);
        }
        StorageType::Val(ValType::I64 | ValType::F64) => env.push_u64(raw),
        StorageType::Val(ValType::Ref(rt)) => {
            let handle = GcRef::from_bits(raw as u32);
            if rt.heap == HeapType::I31 {
                env.push_i31ref(handle);
            } else {
                env.push_ref(handle);
            }
        }
        StorageType::Val(_) => env.push_u32(raw as u32),
    }
}

/// Outcome of a gc-prefixed opcode for the main dispatch loop.
enum GcFlow {
    Next,
    Branch(u32),
}

/// Executes one `0xFB`-prefixed opcode: struct/array/i31/ref-cast
/// operations, the extern conversions, and the stringref set.
fn exec_gc(
    env: &mut ExecEnv,
    inst: &ModuleInstance,
    module: &Module,
    code: &[u8],
    ip: &mut usize,
) -> Result<GcFlow, Trap> {
    use op::gc as g;
    let sub = leb::read_u32(code, ip);
    if sub >= 0x80 {
        exec_string(env, inst, module, code, ip, sub)?;
        return Ok(GcFlow::Next);
    }
    let heap = &inst.heap;
    match sub {
        g::STRUCT_NEW | g::STRUCT_NEW_DEFAULT => {
            let type_idx = leb::read_u32(code, ip);
            let struct_type = module.types[type_idx as usize]
                .as_struct()
                .expect("validated struct type index")
                .clone();
            let mut fields = vec![0_u64; struct_type.fields.len()];
            if sub == g::STRUCT_NEW {
                for (slot, field) in fields.iter_mut().zip(struct_type.fields.iter()).rev() {
                    *slot = pop_storage(env, field.storage);
                }
            }
            let handle = heap.alloc(HeapObj::Struct(StructObj {
                type_idx,
                fields: fields.into_boxed_slice(),
            }));
            env.push_ref(handle);
        }
        g::STRUCT_GET | g::STRUCT_GET_S | g::STRUCT_GET_U => {
            let type_idx = leb::read_u32(code, ip);
            let field_idx = leb::read_u32(code, ip);
            let storage = module.types[type_idx as usize]
                .as_struct()
                .expect("validated struct type index")
                .fields[field_idx as usize]
                .storage;
            let obj = env.pop_ref();
            if obj.is_null() {
                return Err(Trap::from(TrapCode::NullStructureReference));
            }
            let raw = heap
                .struct_field(obj, field_idx)
                .ok_or(TrapCode::NullStructureReference)?;
            push_storage(env, storage, raw, sub == g::STRUCT_GET_S);
        }
        g::STRUCT_SET => {
            let type_idx = leb::read_u32(code, ip);
            let field_idx = leb::read_u32(code, ip);
            let storage = module.types[type_idx as usize]
                .as_struct()
                .expect("validated struct type index")
                .fields[field_idx as usize]
                .storage;
            let value = pop_storage(env, storage);
            let obj = env.pop_ref();
            if obj.is_null() {
                return Err(Trap::from(TrapCode::NullStructureReference));
            }
            heap.struct_set_field(obj, field_idx, value)
                .ok_or(TrapCode::NullStructureReference)?;
        }
        g::ARRAY_NEW | g::ARRAY_NEW_DEFAULT | g::ARRAY_NEW_FIXED => {
            let type_idx = leb::read_u32(code, ip);
            let storage = module.types[type_idx as usize]
                .as_array()
                .expect("validated array type index")
                .elem
                .storage;
            let len = if sub == g::ARRAY_NEW_FIXED {
                leb::read_u32(code, ip)
            } else {
                env.pop_u32()
            };
            let mut elems = vec![0_u64; len as usize];
            if sub == g::ARRAY_NEW {
                let init = pop_storage(env, storage);
                elems.fill(init);
            } else if sub == g::ARRAY_NEW_FIXED {
                for slot in elems.iter_mut().rev() {
                    *slot = pop_storage(env, storage);
                }
            }
            let handle = heap.alloc(HeapObj::Array(ArrayObj { type_idx, elems }));
            env.push_ref(handle);
        }
        g::ARRAY_NEW_DATA => {
            let type_idx = leb::read_u32(code, ip);
            let seg_idx = leb::read_u32(code, ip);
            let storage = module.types[type_idx as usize]
                .as_array()
                .expect("validated array type index")
                .elem
                .storage;
            let len = env.pop_u32();
            let seg_offset = env.pop_u32() as usize;
            let elem_size = storage.byte_size() as usize;
            let bytes = inst.data_bytes(seg_idx);
            let total = elem_size * len as usize;
            let src = bytes
                .get(seg_offset..seg_offset.saturating_add(total))
                .ok_or(TrapCode::DataSegmentOutOfBounds)?;
            let elems = src
                .chunks_exact(elem_size)
                .map(|chunk| {
                    let mut raw = [0_u8; 8];
                    raw[..elem_size].copy_from_slice(chunk);
                    u64::from_le_bytes(raw)
                })
                .collect();
            let handle = heap.alloc(HeapObj::Array(ArrayObj { type_idx, elems }));
            env.push_ref(handle);
        }
        g::ARRAY_NEW_ELEM => return Err(Trap::from(TrapCode::UnsupportedOpcode)),
        g::ARRAY_GET | g::ARRAY_GET_S | g::ARRAY_GET_U => {
            let type_idx = leb::read_u32(code, ip);
            let storage = module.types[type_idx as usize]
                .as_array()
                .expect("validated array type index")
                .elem
                .storage;
            let elem_idx = env.pop_u32();
            let obj = env.pop_ref();
            if obj.is_null() {
                return Err(Trap::from(TrapCode::NullArrayReference));
            }
            let len = heap.array_len(obj).ok_or(TrapCode::NullArrayReference)?;
            if elem_idx >= len {
                return Err(Trap::from(TrapCode::ArrayOutOfBounds));
            }
            let raw = heap
                .array_get(obj, elem_idx)
                .ok_or(TrapCode::ArrayOutOfBounds)?;
            push_storage(env, storage, raw, sub == g::ARRAY_GET_S);
        }
        g::ARRAY_SET => {
            let type_idx = leb::read_u32(code, ip);
            let storage = module.types[type_idx as usize]
                .as_array()
                .expect("validated array type index")
                .elem
                .storage;
            let value = pop_storage(env, storage);
            let elem_idx = env.pop_u32();
            let obj = env.pop_ref();
            if obj.is_null() {
                return Err(Trap::from(TrapCode::NullArrayReference));
            }
            let len = heap.array_len(obj).ok_or(TrapCode::NullArrayReference)?;
            if elem_idx >= len {
                return Err(Trap::from(TrapCode::ArrayOutOfBounds));
            }
            heap.array_set(obj, elem_idx, value)
                .ok_or(TrapCode::ArrayOutOfBounds)?;
        }
        g::ARRAY_LEN => {
            let obj = env.pop_ref();
            if obj.is_null() {
                return Err(Trap::from(TrapCode::NullArrayReference));
            }
            let len = heap.array_len(obj).ok_or(TrapCode::NullArrayReference)?;
            env.push_u32(len);
        }
        g::ARRAY_FILL => {
            let type_idx = leb::read_u32(code, ip);
            let storage = module.types[type_idx as usize]
                .as_array()
                .expect("validated array type index")
                .elem
                .storage;
            let len = env.pop_u32();
            let value = pop_storage(env, storage);
            let start = env.pop_u32();
            let obj = env.pop_ref();
            if obj.is_null() {
                return Err(Trap::from(TrapCode::NullArrayReference));
            }
            let total = heap.array_len(obj).ok_or(TrapCode::NullArrayReference)?;
            if u64::from(start) + u64::from(len) > u64::from(total) {
                return Err(Trap::from(TrapCode::ArrayOutOfBounds));
            }
            if len > 0 {
                heap.array_fill(obj, start, len, value)
                    .ok_or(TrapCode::ArrayOutOfBounds)?;
            }
        }
        g::ARRAY_COPY => {
            leb::skip(code, ip);
            leb::skip(code, ip);
            let len = env.pop_u32();
            let src_off = env.pop_u32();
            let src = env.pop_ref();
            let dst_off = env.pop_u32();
            let dst = env.pop_ref();
            if src.is_null() || dst.is_null() {
                return Err(Trap::from(TrapCode::NullArrayReference));
            }
            let src_len = heap.array_len(src).ok_or(TrapCode::NullArrayReference)?;
            let dst_len = heap.array_len(dst).ok_or(TrapCode::NullArrayReference)?;
            if u64::from(src_off) + u64::from(len) > u64::from(src_len)
                || u64::from(dst_off) + u64::from(len) > u64::from(dst_len)
            {
                return Err(Trap::from(TrapCode::ArrayOutOfBounds));
            }
            if len > 0 {
                heap.array_copy(dst, dst_off, src, src_off, len)
                    .ok_or(TrapCode::ArrayOutOfBounds)?;
            }
        }
        g::REF_I31 => {
            let value = env.pop_u32();
            env.push_i31ref(GcRef::from_i31(value & 0x7FFF_FFFF));
        }
        g::I31_GET_S | g::I31_GET_U => {
            let obj = env.pop_ref();
            if obj.is_null() {
                return Err(Trap::from(TrapCode::NullI31Reference));
            }
            let value = if sub == g::I31_GET_S {
                obj.i31_get_s() as u32
            } else {
                obj.i31_get_u()
            };
            env.push_u32(value);
        }
        g::REF_TEST | g::REF_TEST_NULLABLE | g::REF_CAST | g::REF_CAST_NULLABLE => {
            let target = heap_type_from_code(leb::read_i64(code, ip));
            let obj = env.peek_ref(1);
            if obj.is_null() {
                match sub {
                    g::REF_TEST | g::REF_TEST_NULLABLE => {
                        env.pop_ref();
                        env.push_u32(u32::from(sub == g::REF_TEST_NULLABLE));
                    }
                    g::REF_CAST => return Err(Trap::from(TrapCode::CastFailure)),
                    _ => {}
                }
            } else {
                let castable = heap.is_type_of(obj, target, &module.types);
                match sub {
                    g::REF_TEST | g::REF_TEST_NULLABLE => {
                        env.pop_ref();
                        env.push_u32(u32::from(castable));
                    }
                    _ => {
                        if !castable {
                            return Err(Trap::from(TrapCode::CastFailure));
                        }
                    }
                }
            }
        }
        g::BR_ON_CAST | g::BR_ON_CAST_FAIL => {
            env.check_suspend_flags()?;
            let castflags = code[*ip];
            *ip += 1;
            let depth = leb::read_u32(code, ip);
            let _src_type = leb::read_i64(code, ip);
            let target = heap_type_from_code(leb::read_i64(code, ip));
            let obj = env.peek_ref(1);
            let branch = if obj.is_null() {
                // castflags: bit 0 = source nullable, bit 1 = target
                // nullable; null branches when the target admits it.
                (sub == g::BR_ON_CAST && castflags & 0b10 != 0)
                    || (sub == g::BR_ON_CAST_FAIL && castflags & 0b10 == 0)
            } else {
                let castable = heap.is_type_of(obj, target, &module.types);
                castable == (sub == g::BR_ON_CAST)
            };
            if branch {
                return Ok(GcFlow::Branch(depth));
            }
        }
        g::ANY_CONVERT_EXTERN => {
            let obj = env.pop_ref();
            if obj.is_null() {
                env.push_ref(GcRef::NULL);
            } else {
                let inner = heap.extern_inner(obj).unwrap_or(GcRef::NULL);
                if inner.is_i31() {
                    env.push_i31ref(inner);
                } else {
                    env.push_ref(inner);
                }
            }
        }
        g::EXTERN_CONVERT_ANY => {
            let obj = env.pop_ref();
            if obj.is_null() {
                env.push_ref(GcRef::NULL);
            } else {
                let handle = heap.alloc(HeapObj::Extern { inner: obj });
                env.push_ref(handle);
            }
        }
        _ => return Err(Trap::from(TrapCode::UnsupportedOpcode)),
    }
    Ok(GcFlow::Next)
}

/// Resolves a stringref operand to its WTF-8 bytes.
fn pop_str(env: &mut ExecEnv, inst: &ModuleInstance) -> Result<Vec<u8>, Trap> {
    let obj = env.pop_ref();
    if obj.is_null() {
        return Err(Trap::from(TrapCode::NullReference));
    }
    inst.heap
        .with_str(obj, |bytes| bytes.to_vec())
        .ok_or_else(|| Trap::new("create string object failed"))
}

fn alloc_str(env: &mut ExecEnv, inst: &ModuleInstance, bytes: Vec<u8>) {
    let handle = inst.heap.alloc(HeapObj::Str {
        wtf8: bytes.into_boxed_slice(),
    });
    env.push_ref(handle);
}

/// Builds string contents from raw bytes per the encoding flavor.
fn string_from_bytes(bytes: &[u8], sub: u32) -> Result<Vec<u8>, Trap> {
    use op::gc as g;
    match sub {
        g::STRING_NEW_UTF8 | g::STRING_NEW_UTF8_ARRAY => match std::str::from_utf8(bytes) {
            Ok(_) => Ok(bytes.to_vec()),
            Err(_) => Err(Trap::new("create string object failed")),
        },
        g::STRING_NEW_WTF8 | g::STRING_NEW_WTF8_ARRAY => {
            if sr::is_wtf8(bytes) {
                Ok(bytes.to_vec())
            } else {
                Err(Trap::new("create string object failed"))
            }
        }
        g::STRING_NEW_LOSSY_UTF8 | g::STRING_NEW_LOSSY_UTF8_ARRAY => {
            Ok(String::from_utf8_lossy(bytes).into_owned().into_bytes())
        }
        _ => {
            // WTF-16: pairs of little-endian code units.
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            Ok(sr::from_wtf16(&units))
        }
    }
}

/// Encodes string contents per the encoding flavor, trapping on
/// isolated surrogates for strict UTF-8.
fn encode_bytes(bytes: &[u8], sub: u32) -> Result<Vec<u8>, Trap> {
    use op::gc as g;
    match sub {
        g::STRING_ENCODE_UTF8
        | g::STRINGVIEW_WTF8_ENCODE_UTF8
        | g::STRING_ENCODE_UTF8_ARRAY => match sr::check_utf8(bytes) {
            sr::Utf8Encode::Verbatim => Ok(bytes.to_vec()),
            sr::Utf8Encode::IsolatedSurrogate => Err(Trap::new("isolated surrogate is seen")),
        },
        g::STRING_ENCODE_LOSSY_UTF8
        | g::STRINGVIEW_WTF8_ENCODE_LOSSY_UTF8
        | g::STRING_ENCODE_LOSSY_UTF8_ARRAY => Ok(sr::to_lossy_utf8(bytes)),
        _ => Ok(bytes.to_vec()),
    }
}

/// Executes one stringref opcode (gc prefix, sub-opcode `0x80+`).
fn exec_string(
    env: &mut ExecEnv,
    inst: &ModuleInstance,
    module: &Module,
    code: &[u8],
    ip: &mut usize,
    sub: u32,
) -> Result<(), Trap> {
    use op::gc as g;
    let heap = &inst.heap;
    match sub {
        g::STRING_NEW_UTF8 | g::STRING_NEW_WTF16 | g::STRING_NEW_LOSSY_UTF8 | g::STRING_NEW_WTF8 => {
            let memidx = leb::read_u32(code, ip);
            let len = env.pop_u32();
            let addr = u64::from(env.pop_u32());
            let mut bytes = vec![0_u8; len as usize];
            inst.memory(memidx).read_bytes(addr, &mut bytes)?;
            let contents = string_from_bytes(&bytes, sub)?;
            alloc_str(env, inst, contents);
        }
        g::STRING_CONST => {
            let literal_idx = leb::read_u32(code, ip);
            let contents = module.strings[literal_idx as usize].to_vec();
            alloc_str(env, inst, contents);
        }
        g::STRING_MEASURE_UTF8 | g::STRING_MEASURE_WTF8 | g::STRING_MEASURE_WTF16 => {
            let bytes = pop_str(env, inst)?;
            let measured: i32 = match sub {
                g::STRING_MEASURE_UTF8 => match sr::check_utf8(&bytes) {
                    sr::Utf8Encode::Verbatim => bytes.len() as i32,
                    sr::Utf8Encode::IsolatedSurrogate => -1,
                },
                g::STRING_MEASURE_WTF8 => bytes.len() as i32,
                _ => sr::measure_wtf16(&bytes) as i32,
            };
            env.push_u32(measured as u32);
        }
        g::STRING_ENCODE_UTF8
        | g::STRING_ENCODE_WTF16
        | g::STRING_ENCODE_LOSSY_UTF8
        | g::STRING_ENCODE_WTF8 => {
            let memidx = leb::read_u32(code, ip);
            let addr = u64::from(env.pop_u32());
            let bytes = pop_str(env, inst)?;
            let written = if sub == g::STRING_ENCODE_WTF16 {
                let units = sr::to_wtf16(&bytes);
                let mut out = Vec::with_capacity(units.len() * 2);
                for unit in &units {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
                inst.memory(memidx).write_bytes(addr, &out)?;
                units.len()
            } else {
                let out = encode_bytes(&bytes, sub)?;
                inst.memory(memidx).write_bytes(addr, &out)?;
                out.len()
            };
            env.push_u32(written as u32);
        }
        g::STRING_CONCAT => {
            let rhs = pop_str(env, inst)?;
            let mut lhs = pop_str(env, inst)?;
            lhs.extend_from_slice(&rhs);
            alloc_str(env, inst, lhs);
        }
        g::STRING_EQ => {
            let rhs = pop_str(env, inst)?;
            let lhs = pop_str(env, inst)?;
            env.push_u32(u32::from(lhs == rhs));
        }
        g::STRING_IS_USV_SEQUENCE => {
            let bytes = pop_str(env, inst)?;
            env.push_u32(u32::from(sr::is_usv_sequence(&bytes)));
        }
        g::STRING_AS_WTF8 => {
            let target = env.pop_ref();
            if target.is_null() {
                return Err(Trap::from(TrapCode::NullReference));
            }
            let handle = heap.alloc(HeapObj::ViewWtf8 { target });
            env.push_ref(handle);
        }
        g::STRINGVIEW_WTF8_ADVANCE => {
            let bytes_count = env.pop_u32();
            let pos = env.pop_u32();
            let bytes = pop_str(env, inst)?;
            env.push_u32(sr::advance(&bytes, pos, bytes_count));
        }
        g::STRINGVIEW_WTF8_ENCODE_UTF8
        | g::STRINGVIEW_WTF8_ENCODE_LOSSY_UTF8
        | g::STRINGVIEW_WTF8_ENCODE_WTF8 => {
            let memidx = leb::read_u32(code, ip);
            let bytes_count = env.pop_u32();
            let pos = env.pop_u32();
            let addr = u64::from(env.pop_u32());
            let bytes = pop_str(env, inst)?;
            let start = sr::advance(&bytes, pos, 0) as usize;
            let next_pos = sr::advance(&bytes, pos, bytes_count);
            let out = encode_bytes(&bytes[start..next_pos as usize], sub)?;
            inst.memory(memidx).write_bytes(addr, &out)?;
            env.push_u32(next_pos);
            env.push_u32(out.len() as u32);
        }
        g::STRINGVIEW_WTF8_SLICE => {
            let end = env.pop_u32();
            let start = env.pop_u32();
            let bytes = pop_str(env, inst)?;
            let start = sr::advance(&bytes, start, 0) as usize;
            let end = (sr::advance(&bytes, end, 0) as usize).max(start);
            alloc_str(env, inst, bytes[start..end].to_vec());
        }
        g::STRING_AS_WTF16 => {
            let target = env.peek_ref(1);
            if target.is_null() {
                return Err(Trap::from(TrapCode::NullReference));
            }
            let units = pop_str(env, inst).map(|bytes| sr::to_wtf16(&bytes))?;
            let handle = heap.alloc(HeapObj::ViewWtf16 {
                target,
                units: units.into_boxed_slice(),
            });
            env.push_ref(handle);
        }
        g::STRINGVIEW_WTF16_LENGTH => {
            let view = env.pop_ref();
            let len = heap
                .with_wtf16_units(view, |units| units.len() as u32)
                .ok_or(TrapCode::NullReference)?;
            env.push_u32(len);
        }
        g::STRINGVIEW_WTF16_GET_CODEUNIT => {
            let index = env.pop_u32();
            let view = env.pop_ref();
            let unit = heap
                .with_wtf16_units(view, |units| units.get(index as usize).copied())
                .ok_or(TrapCode::NullReference)?;
            let unit = unit.ok_or_else(|| Trap::new("out of bounds stringview access"))?;
            env.push_u32(u32::from(unit));
        }
        g::STRINGVIEW_WTF16_ENCODE => {
            let memidx = leb::read_u32(code, ip);
            let len = env.pop_u32() as usize;
            let pos = env.pop_u32() as usize;
            let addr = u64::from(env.pop_u32());
            let view = env.pop_ref();
            let units = heap
                .with_wtf16_units(view, |units| units.to_vec())
                .ok_or(TrapCode::NullReference)?;
            let start = pos.min(units.len());
            let end = (pos + len).min(units.len());
            let mut out = Vec::with_capacity((end - start) * 2);
            for unit in &units[start..end] {
                out.extend_from_slice(&unit.to_le_bytes());
            }
            inst.memory(memidx).write_bytes(addr, &out)?;
            env.push_u32((end - start) as u32);
        }
        g::STRINGVIEW_WTF16_SLICE => {
            let end = env.pop_u32() as usize;
            let start = env.pop_u32() as usize;
            let view = env.pop_ref();
            let units = heap
                .with_wtf16_units(view, |units| units.to_vec())
                .ok_or(TrapCode::NullReference)?;
            let start = start.min(units.len());
            let end = end.min(units.len()).max(start);
            alloc_str(env, inst, sr::from_wtf16(&units[start..end]));
        }
        g::STRING_AS_ITER => {
            let target = env.pop_ref();
            if target.is_null() {
                return Err(Trap::from(TrapCode::NullReference));
            }
            let handle = heap.alloc(HeapObj::ViewIter { target, pos: 0 });
            env.push_ref(handle);
        }
        g::STRINGVIEW_ITER_NEXT => {
            let view = env.pop_ref();
            let pos = heap.iter_pos(view).ok_or(TrapCode::NullReference)?;
            let bytes = heap
                .with_str(view, |bytes| bytes.to_vec())
                .ok_or(TrapCode::NullReference)?;
            match sr::decode_cp(&bytes, pos as usize) {
                Some((cp, width)) => {
                    heap.set_iter_pos(view, pos + width as u32);
                    env.push_u32(cp);
                }
                None => env.push_u32(u32::MAX),
            }
        }
        g::STRINGVIEW_ITER_ADVANCE | g::STRINGVIEW_ITER_REWIND => {
            let count = env.pop_u32();
            let view = env.pop_ref();
            let pos = heap.iter_pos(view).ok_or(TrapCode::NullReference)? as usize;
            let bytes = heap
                .with_str(view, |bytes| bytes.to_vec())
                .ok_or(TrapCode::NullReference)?;
            let mut moved = 0_u32;
            let mut at = pos;
            if sub == g::STRINGVIEW_ITER_ADVANCE {
                while moved < count {
                    match sr::decode_cp(&bytes, at) {
                        Some((_, width)) => {
                            at += width;
                            moved += 1;
                        }
                        None => break,
                    }
                }
            } else {
                while moved < count && at > 0 {
                    let mut back = at - 1;
                    while back > 0 && bytes[back] & 0xC0 == 0x80 {
                        back -= 1;
                    }
                    at = back;
                    moved += 1;
                }
            }
            heap.set_iter_pos(view, at as u32);
            env.push_u32(moved);
        }
        g::STRINGVIEW_ITER_SLICE => {
            let count = env.pop_u32();
            let view = env.pop_ref();
            let pos = heap.iter_pos(view).ok_or(TrapCode::NullReference)?;
            let bytes = heap
                .with_str(view, |bytes| bytes.to_vec())
                .ok_or(TrapCode::NullReference)?;
            alloc_str(env, inst, sr::slice_codepoints(&bytes, pos, count));
        }
        g::STRING_NEW_UTF8_ARRAY
        | g::STRING_NEW_WTF16_ARRAY
        | g::STRING_NEW_LOSSY_UTF8_ARRAY
        | g::STRING_NEW_WTF8_ARRAY => {
            let end = env.pop_u32();
            let start = env.pop_u32();
            let array = env.pop_ref();
            if array.is_null() {
                return Err(Trap::from(TrapCode::NullArrayReference));
            }
            let len = heap.array_len(array).ok_or(TrapCode::NullArrayReference)?;
            if start > end || end > len {
                return Err(Trap::from(TrapCode::ArrayOutOfBounds));
            }
            let bytes = if sub == g::STRING_NEW_WTF16_ARRAY {
                let mut out = Vec::with_capacity(((end - start) * 2) as usize);
                for idx in start..end {
                    let unit = heap.array_get(array, idx).unwrap_or(0) as u16;
                    out.extend_from_slice(&unit.to_le_bytes());
                }
                out
            } else {
                (start..end)
                    .map(|idx| heap.array_get(array, idx).unwrap_or(0) as u8)
                    .collect()
            };
            let contents = string_from_bytes(&bytes, sub)?;
            alloc_str(env, inst, contents);
        }
        g::STRING_ENCODE_UTF8_ARRAY
        | g::STRING_ENCODE_WTF16_ARRAY
        | g::STRING_ENCODE_LOSSY_UTF8_ARRAY
        | g::STRING_ENCODE_WTF8_ARRAY => {
            let start = env.pop_u32();
            let array = env.pop_ref();
            let bytes = pop_str(env, inst)?;
            if array.is_null() {
                return Err(Trap::from(TrapCode::NullArrayReference));
            }
            let len = heap.array_len(array).ok_or(TrapCode::NullArrayReference)?;
            let written = if sub == g::STRING_ENCODE_WTF16_ARRAY {
                let units = sr::to_wtf16(&bytes);
                if u64::from(start) + units.len() as u64 > u64::from(len) {
                    return Err(Trap::from(TrapCode::ArrayOutOfBounds));
                }
                for (offset, unit) in units.iter().enumerate() {
                    heap.array_set(array, start + offset as u32, u64::from(*unit))
                        .ok_or(TrapCode::ArrayOutOfBounds)?;
                }
                units.len()
            } else {
                let out = encode_bytes(&bytes, sub)?;
                if u64::from(start) + out.len() as u64 > u64::from(len) {
                    return Err(Trap::from(TrapCode::ArrayOutOfBounds));
                }
                for (offset, byte) in out.iter().enumerate() {
                    heap.array_set(array, start + offset as u32, u64::from(*byte))
                        .ok_or(TrapCode::ArrayOutOfBounds)?;
                }
                out.len()
            };
            env.push_u32(written as u32);
        }
        _ => return Err(Trap::from(TrapCode::UnsupportedOpcode)),
    }
    Ok(())
}

/// The dispatcher proper. See the module docs for the register and
/// suspension-point discipline.
#[allow(clippy::too_many_lines)]
fn exec(env: &mut ExecEnv, inst: &ModuleInstance, module: &Module) -> Result<(), Trap> {
    let mut pending_tag: Option<u32> = None;

    'outer: loop {
        let (frame_func, frame_ip, frame_sp, lp) = {
            let frame = env.cur_frame();
            (frame.func_idx, frame.ip, frame.sp, frame.lp)
        };
        env.sp = frame_sp;
        let Some(func_idx) = frame_func else {
            return Ok(());
        };
        let body = module
            .func_body(func_idx)
            .expect("interpreter frames only execute defined functions");
        let code: &[u8] = &body.code;
        let ret_cells = body.ret_cell_num as usize;
        let mut ip = frame_ip;

        macro_rules! throw {
            ($code:expr) => {{
                env.cur_frame_mut().ip = ip;
                let sp_now = env.sp;
                env.cur_frame_mut().sp = sp_now;
                return Err(Trap::from($code));
            }};
        }

        macro_rules! check {
            ($expr:expr) => {
                match $expr {
                    Ok(value) => value,
                    Err(code) => throw!(code),
                }
            };
        }

        macro_rules! check_trap {
            ($expr:expr) => {
                match $expr {
                    Ok(value) => value,
                    Err(trap) => {
                        env.cur_frame_mut().ip = ip;
                        let sp_now = env.sp;
                        env.cur_frame_mut().sp = sp_now;
                        return Err(trap);
                    }
                }
            };
        }

        macro_rules! do_return {
            () => {{
                let src = env.sp - ret_cells;
                let prev_idx = env.frames.len() - 2;
                let dst = env.frames[prev_idx].sp;
                env.cells.copy_within(src..src + ret_cells, dst);
                env.refs.copy_within(src..src + ret_cells, dst);
                env.frames[prev_idx].sp = dst + ret_cells;
                let freed = env.free_frame();
                accrue_stats(env, inst, &freed);
                continue 'outer;
            }};
        }

        macro_rules! propagate_uncaught {
            () => {{
                let freed = env.free_frame();
                accrue_stats(env, inst, &freed);
                if env.cur_frame().func_idx.is_none() {
                    // Reached the host without a handler; the
                    // exception slot already names the condition.
                    return Err(Trap::from(TrapCode::UncaughtException));
                }
                inst.take_exception();
                env.sp = env.cur_frame().sp;
                let tag = env.pop_u32();
                let sp_now = env.sp;
                env.cur_frame_mut().sp = sp_now;
                pending_tag = Some(tag);
                continue 'outer;
            }};
        }

        macro_rules! do_branch {
            ($depth:expr) => {{
                let target = env.pop_csp_n($depth as usize);
                ip = if target == TARGET_UNKNOWN {
                    check!(resolve_branch_target(env, code, func_idx))
                } else {
                    target
                };
            }};
        }

        macro_rules! do_call {
            ($callee:expr, $tail:expr) => {{
                let callee: u32 = $callee;
                if callee >= module.func_count() {
                    throw!(TrapCode::UnknownFunction);
                }
                let is_import = inst
                    .func_inst(callee)
                    .map(FuncInstance::is_import)
                    .unwrap_or(false);
                if $tail {
                    let param_cells =
                        module.func_type(module.func_type_idx(callee)).param_cell_num() as usize;
                    let src = env.sp - param_cells;
                    env.scratch.clear();
                    let args = &env.cells[src..src + param_cells];
                    env.scratch.extend_from_slice(args);
                    let freed = env.free_frame();
                    accrue_stats(env, inst, &freed);
                    if is_import {
                        check_trap!(call_host(env, inst, module, callee, true));
                    } else {
                        check!(push_wasm_frame_tail(env, module, callee));
                    }
                    continue 'outer;
                } else {
                    env.cur_frame_mut().ip = ip;
                    if is_import {
                        check_trap!(call_host(env, inst, module, callee, false));
                        // Resume this frame in place; sp is current.
                    } else {
                        check!(push_wasm_frame(env, module, callee));
                        continue 'outer;
                    }
                }
            }};
        }

        macro_rules! memarg {
            () => {{
                let align = leb::read_u32(code, &mut ip);
                let memidx = if align & op::OPT_MEMIDX_FLAG != 0 {
                    leb::read_u32(code, &mut ip)
                } else {
                    0
                };
                let offset = leb::read_u64(code, &mut ip);
                (memidx, offset)
            }};
        }

        macro_rules! pop_addr {
            ($mem:expr) => {{
                if $mem.ty().memory64 {
                    env.pop_u64()
                } else {
                    u64::from(env.pop_u32())
                }
            }};
        }

        macro_rules! load {
            ($T:ty, push32) => {{
                let (memidx, offset) = memarg!();
                let mem = inst.memory(memidx);
                let addr = pop_addr!(mem);
                let value = check!(mem.load::<$T>(addr, offset));
                env.push_u32(value as i32 as u32);
            }};
            ($T:ty, push64) => {{
                let (memidx, offset) = memarg!();
                let mem = inst.memory(memidx);
                let addr = pop_addr!(mem);
                let value = check!(mem.load::<$T>(addr, offset));
                env.push_u64(value as i64 as u64);
            }};
        }

        macro_rules! store {
            ($T:ty, pop32) => {{
                let (memidx, offset) = memarg!();
                let value = env.pop_u32();
                let mem = inst.memory(memidx);
                let addr = pop_addr!(mem);
                check!(mem.store::<$T>(addr, offset, value as $T));
            }};
            ($T:ty, pop64) => {{
                let (memidx, offset) = memarg!();
                let value = env.pop_u64();
                let mem = inst.memory(memidx);
                let addr = pop_addr!(mem);
                check!(mem.store::<$T>(addr, offset, value as $T));
            }};
        }

        macro_rules! binop32 {
            ($ty:ty, $f:expr) => {{
                let rhs = env.pop_u32() as $ty;
                let lhs = env.pop_u32() as $ty;
                env.push_u32(($f)(lhs, rhs) as u32);
            }};
        }

        macro_rules! binop32_trap {
            ($ty:ty, $f:expr) => {{
                let rhs = env.pop_u32() as $ty;
                let lhs = env.pop_u32() as $ty;
                let value = check!(($f)(lhs, rhs));
                env.push_u32(value as u32);
            }};
        }

        macro_rules! binop64 {
            ($ty:ty, $f:expr) => {{
                let rhs = env.pop_u64() as $ty;
                let lhs = env.pop_u64() as $ty;
                env.push_u64(($f)(lhs, rhs) as u64);
            }};
        }

        macro_rules! binop64_trap {
            ($ty:ty, $f:expr) => {{
                let rhs = env.pop_u64() as $ty;
                let lhs = env.pop_u64() as $ty;
                let value = check!(($f)(lhs, rhs));
                env.push_u64(value as u64);
            }};
        }

        macro_rules! cmp32 {
            ($ty:ty, $f:expr) => {{
                let rhs = env.pop_u32() as $ty;
                let lhs = env.pop_u32() as $ty;
                env.push_u32(u32::from(($f)(lhs, rhs)));
            }};
        }

        macro_rules! cmp64 {
            ($ty:ty, $f:expr) => {{
                let rhs = env.pop_u64() as $ty;
                let lhs = env.pop_u64() as $ty;
                env.push_u32(u32::from(($f)(lhs, rhs)));
            }};
        }

        macro_rules! unop32 {
            ($ty:ty, $f:expr) => {{
                let value = env.pop_u32() as $ty;
                env.push_u32(($f)(value) as u32);
            }};
        }

        macro_rules! unop64 {
            ($ty:ty, $f:expr) => {{
                let value = env.pop_u64() as $ty;
                env.push_u64(($f)(value) as u64);
            }};
        }

        macro_rules! fbinop32 {
            ($f:expr) => {{
                let rhs = F32::from_bits(env.pop_u32());
                let lhs = F32::from_bits(env.pop_u32());
                env.push_u32(($f)(lhs, rhs).to_bits());
            }};
        }

        macro_rules! fbinop64 {
            ($f:expr) => {{
                let rhs = F64::from_bits(env.pop_u64());
                let lhs = F64::from_bits(env.pop_u64());
                env.push_u64(($f)(lhs, rhs).to_bits());
            }};
        }

        macro_rules! funop32 {
            ($f:expr) => {{
                let value = F32::from_bits(env.pop_u32());
                env.push_u32(($f)(value).to_bits());
            }};
        }

        macro_rules! funop64 {
            ($f:expr) => {{
                let value = F64::from_bits(env.pop_u64());
                env.push_u64(($f)(value).to_bits());
            }};
        }

        macro_rules! fcmp32 {
            ($f:expr) => {{
                let rhs = F32::from_bits(env.pop_u32()).to_float();
                let lhs = F32::from_bits(env.pop_u32()).to_float();
                env.push_u32(u32::from(($f)(lhs, rhs)));
            }};
        }

        macro_rules! fcmp64 {
            ($f:expr) => {{
                let rhs = F64::from_bits(env.pop_u64()).to_float();
                let lhs = F64::from_bits(env.pop_u64()).to_float();
                env.push_u32(u32::from(($f)(lhs, rhs)));
            }};
        }

        if let Some(tag) = pending_tag.take() {
            match find_catch_handler(env, inst, code, tag) {
                CatchOutcome::Caught(handler_ip) => ip = handler_ip,
                CatchOutcome::Uncaught => propagate_uncaught!(),
            }
        }

        loop {
            let opcode = code[ip];
            ip += 1;
            match opcode {
                op::UNREACHABLE => throw!(TrapCode::Unreachable),
                op::NOP => {}

                op::BLOCK => {
                    let (param_cells, result_cells) = read_block_type(module, code, &mut ip);
                    let target = match env.block_cache.lookup(cache_key(func_idx, ip)) {
                        Some((_, end)) => end,
                        None => TARGET_UNKNOWN,
                    };
                    env.push_csp(LabelKind::Block, param_cells, result_cells, ip, target);
                }
                op::LOOP => {
                    let (param_cells, _) = read_block_type(module, code, &mut ip);
                    env.push_csp(LabelKind::Loop, param_cells, param_cells, ip, ip);
                }
                op::IF => {
                    let (param_cells, result_cells) = read_block_type(module, code, &mut ip);
                    let key = cache_key(func_idx, ip);
                    let (else_addr, end_addr) = match env.block_cache.lookup(key) {
                        Some(found) => found,
                        None => {
                            let Some(found) = scan::find_block_end(code, ip) else {
                                throw!(TrapCode::UnsupportedOpcode);
                            };
                            env.block_cache.insert(key, found.0, found.1);
                            found
                        }
                    };
                    let cond = env.pop_u32();
                    if cond != 0 {
                        env.push_csp(LabelKind::If, param_cells, result_cells, ip, end_addr);
                    } else if let Some(else_addr) = else_addr {
                        env.push_csp(LabelKind::If, param_cells, result_cells, ip, end_addr);
                        ip = else_addr + 1;
                    } else {
                        ip = end_addr + 1;
                    }
                }
                op::ELSE => {
                    // Reached from the taken `if` arm: jump to `end`.
                    ip = env
                        .ctrl
                        .last()
                        .expect("else inside an open if block")
                        .target_addr;
                }
                op::END => {
                    if env.csp() > env.cur_frame().csp_bottom + 1 {
                        env.ctrl.pop();
                    } else {
                        do_return!();
                    }
                }
                op::BR => {
                    env.check_suspend_flags()?;
                    let depth = leb::read_u32(code, &mut ip);
                    do_branch!(depth);
                }
                op::BR_IF => {
                    env.check_suspend_flags()?;
                    let depth = leb::read_u32(code, &mut ip);
                    let cond = env.pop_u32();
                    if cond != 0 {
                        do_branch!(depth);
                    }
                }
                op::BR_TABLE => {
                    env.check_suspend_flags()?;
                    let count = leb::read_u32(code, &mut ip);
                    let picked = env.pop_u32().min(count);
                    let mut depth = 0;
                    for entry in 0..=count {
                        let value = leb::read_u32(code, &mut ip);
                        if entry == picked {
                            depth = value;
                        }
                    }
                    do_branch!(depth);
                }
                op::RETURN => do_return!(),

                op::CALL => {
                    env.check_suspend_flags()?;
                    let callee = leb::read_u32(code, &mut ip);
                    do_call!(callee, false);
                }
                op::RETURN_CALL => {
                    env.check_suspend_flags()?;
                    let callee = leb::read_u32(code, &mut ip);
                    do_call!(callee, true);
                }
                op::CALL_INDIRECT | op::RETURN_CALL_INDIRECT => {
                    env.check_suspend_flags()?;
                    let tail = opcode == op::RETURN_CALL_INDIRECT;
                    let declared_tidx = leb::read_u32(code, &mut ip);
                    let table_idx = leb::read_u32(code, &mut ip);
                    let table = inst.table(table_idx);
                    let elem_idx = env.pop_u32();
                    if elem_idx >= table.size() {
                        throw!(TrapCode::UndefinedElement);
                    }
                    let elem = check!(table.get(elem_idx));
                    if elem.is_null() {
                        throw!(TrapCode::UninitializedElement);
                    }
                    let Some((callee, actual_tidx)) = inst.heap.func_of(elem) else {
                        throw!(TrapCode::UninitializedElement);
                    };
                    if callee >= module.func_count() {
                        throw!(TrapCode::UnknownFunction);
                    }
                    let matches = actual_tidx == declared_tidx
                        || is_subtype_of(&module.types, actual_tidx, declared_tidx)
                        || module.func_type(actual_tidx) == module.func_type(declared_tidx);
                    if !matches {
                        throw!(TrapCode::IndirectCallTypeMismatch);
                    }
                    do_call!(callee, tail);
                }
                op::CALL_REF | op::RETURN_CALL_REF => {
                    env.check_suspend_flags()?;
                    let tail = opcode == op::RETURN_CALL_REF;
                    let _type_idx = leb::read_u32(code, &mut ip);
                    let funcref = env.pop_ref();
                    if funcref.is_null() {
                        throw!(TrapCode::NullFunctionReference);
                    }
                    let Some((callee, _)) = inst.heap.func_of(funcref) else {
                        throw!(TrapCode::NullFunctionReference);
                    };
                    do_call!(callee, tail);
                }

                op::THROW => {
                    let tag = leb::read_u32(code, &mut ip);
                    match find_catch_handler(env, inst, code, tag) {
                        CatchOutcome::Caught(handler_ip) => ip = handler_ip,
                        CatchOutcome::Uncaught => propagate_uncaught!(),
                    }
                }
                op::RETHROW => {
                    let depth = leb::read_u32(code, &mut ip) as usize;
                    let idx = env.csp() - 1 - depth;
                    let record_sp = env.ctrl[idx].frame_sp;
                    let tag = env.cells[record_sp];
                    let payload_cells = inst.tag_sig(tag).param_cell_num() as usize;
                    for i in 0..payload_cells {
                        let cell = env.cells[record_sp + 1 + i];
                        env.push_u32(cell);
                    }
                    match find_catch_handler(env, inst, code, tag) {
                        CatchOutcome::Caught(handler_ip) => ip = handler_ip,
                        CatchOutcome::Uncaught => propagate_uncaught!(),
                    }
                }
                op::TRY => {
                    let (param_cells, result_cells) = read_block_type(module, code, &mut ip);
                    env.block_cache.invalidate(cache_key(func_idx, ip));
                    env.push_csp(LabelKind::Try, param_cells, result_cells, ip, TARGET_UNKNOWN);
                    let mut handlers = Vec::new();
                    let mut cursor = ip;
                    loop {
                        let Some(handler) = scan::next_handler(code, cursor) else {
                            throw!(TrapCode::UnsupportedOpcode);
                        };
                        match code[handler] {
                            op::CATCH => {
                                handlers.push(handler);
                                let mut at = handler + 1;
                                leb::skip(code, &mut at);
                                cursor = at;
                            }
                            op::CATCH_ALL => {
                                handlers.push(handler);
                                cursor = handler + 1;
                            }
                            op::DELEGATE => {
                                handlers.push(handler);
                                let mut at = handler + 1;
                                leb::skip(code, &mut at);
                                env.ctrl
                                    .last_mut()
                                    .expect("try block just pushed")
                                    .target_addr = at;
                                break;
                            }
                            _ => {
                                env.ctrl
                                    .last_mut()
                                    .expect("try block just pushed")
                                    .target_addr = handler;
                                break;
                            }
                        }
                    }
                    env.ctrl
                        .last_mut()
                        .expect("try block just pushed")
                        .handlers = Some(handlers.into_boxed_slice());
                }
                op::CATCH => {
                    // End of the protected body: branch to the try end.
                    leb::skip(code, &mut ip);
                    ip = env.pop_csp_n(0);
                }
                op::CATCH_ALL => {
                    ip = env.pop_csp_n(0);
                }
                op::DELEGATE => {
                    leb::skip(code, &mut ip);
                    env.ctrl.pop();
                }

                op::DROP => env.drop_cells(1),
                op::DROP_64 => env.drop_cells(2),
                op::SELECT => {
                    let cond = env.pop_u32();
                    let rhs = env.pop_u32();
                    let lhs = env.pop_u32();
                    env.push_u32(if cond != 0 { lhs } else { rhs });
                }
                op::SELECT_64 => {
                    let cond = env.pop_u32();
                    let rhs = env.pop_u64();
                    let lhs = env.pop_u64();
                    env.push_u64(if cond != 0 { lhs } else { rhs });
                }
                op::SELECT_T => {
                    let count = leb::read_u32(code, &mut ip);
                    debug_assert_eq!(count, 1);
                    let ty_byte = code[ip];
                    ip += 1;
                    if ty_byte == 0x63 || ty_byte == 0x64 {
                        leb::skip(code, &mut ip);
                    }
                    let cond = env.pop_u32();
                    match ty_byte {
                        0x7E | 0x7C => {
                            let rhs = env.pop_u64();
                            let lhs = env.pop_u64();
                            env.push_u64(if cond != 0 { lhs } else { rhs });
                        }
                        0x7F | 0x7D => {
                            let rhs = env.pop_u32();
                            let lhs = env.pop_u32();
                            env.push_u32(if cond != 0 { lhs } else { rhs });
                        }
                        _ => {
                            let rhs = env.pop_ref();
                            let lhs = env.pop_ref();
                            env.push_ref(if cond != 0 { lhs } else { rhs });
                        }
                    }
                }

                op::LOCAL_GET => {
                    let idx = leb::read_u32(code, &mut ip) as usize;
                    let off = lp + body.local_offsets[idx] as usize;
                    match body.local_types[idx] {
                        ValType::I64 | ValType::F64 => {
                            let bits =
                                u64::from(env.cells[off]) | (u64::from(env.cells[off + 1]) << 32);
                            env.push_u64(bits);
                        }
                        ValType::Ref(rt) => {
                            let handle = GcRef::from_bits(env.cells[off]);
                            if rt.heap == HeapType::I31 {
                                env.push_i31ref(handle);
                            } else {
                                env.push_ref(handle);
                            }
                        }
                        _ => {
                            let value = env.cells[off];
                            env.push_u32(value);
                        }
                    }
                }
                op::LOCAL_SET => {
                    let idx = leb::read_u32(code, &mut ip) as usize;
                    let off = lp + body.local_offsets[idx] as usize;
                    match body.local_types[idx] {
                        ValType::I64 | ValType::F64 => {
                            let bits = env.pop_u64();
                            env.cells[off] = bits as u32;
                            env.cells[off + 1] = (bits >> 32) as u32;
                        }
                        ValType::Ref(_) => {
                            let handle = env.pop_ref();
                            env.cells[off] = handle.to_bits();
                        }
                        _ => {
                            env.cells[off] = env.pop_u32();
                        }
                    }
                }
                op::LOCAL_TEE => {
                    let idx = leb::read_u32(code, &mut ip) as usize;
                    let off = lp + body.local_offsets[idx] as usize;
                    match body.local_types[idx].cell_num() {
                        2 => {
                            env.cells[off] = env.cells[env.sp - 2];
                            env.cells[off + 1] = env.cells[env.sp - 1];
                        }
                        _ => env.cells[off] = env.cells[env.sp - 1],
                    }
                }

                op::GLOBAL_GET => {
                    let idx = leb::read_u32(code, &mut ip);
                    let ty = module.globals[idx as usize].ty.ty;
                    let offset = inst.global_offsets[idx as usize];
                    match ty {
                        ValType::I64 | ValType::F64 => env.push_u64(inst.globals.get64(offset)),
                        ValType::Ref(rt) => {
                            let handle = GcRef::from_bits(inst.globals.get32(offset));
                            if rt.heap == HeapType::I31 {
                                env.push_i31ref(handle);
                            } else {
                                env.push_ref(handle);
                            }
                        }
                        _ => env.push_u32(inst.globals.get32(offset)),
                    }
                }
                op::GLOBAL_SET => {
                    let idx = leb::read_u32(code, &mut ip);
                    let ty = module.globals[idx as usize].ty.ty;
                    let offset = inst.global_offsets[idx as usize];
                    if module.aux_stack_global == Some(idx) {
                        // The auxiliary (shadow) stack grows downward;
                        // its pointer must stay within its bounds.
                        let value = env.pop_u32();
                        if u64::from(value) < env.aux_stack_boundary {
                            throw!(TrapCode::AuxStackOverflow);
                        }
                        if u64::from(value) > env.aux_stack_bottom {
                            throw!(TrapCode::AuxStackUnderflow);
                        }
                        inst.globals.set32(offset, value);
                    } else {
                        match ty {
                            ValType::I64 | ValType::F64 => {
                                inst.globals.set64(offset, env.pop_u64());
                            }
                            ValType::Ref(_) => {
                                let handle = env.pop_ref();
                                inst.globals.set32(offset, handle.to_bits());
                            }
                            _ => inst.globals.set32(offset, env.pop_u32()),
                        }
                    }
                }

                op::TABLE_GET => {
                    let table_idx = leb::read_u32(code, &mut ip);
                    let elem_idx = env.pop_u32();
                    let value = check!(inst.table(table_idx).get(elem_idx));
                    env.push_ref(value);
                }
                op::TABLE_SET => {
                    let table_idx = leb::read_u32(code, &mut ip);
                    let value = env.pop_ref();
                    let elem_idx = env.pop_u32();
                    check!(inst.table(table_idx).set(elem_idx, value));
                }

                op::I32_LOAD => load!(u32, push32),
                op::F32_LOAD => load!(u32, push32),
                op::I64_LOAD => load!(u64, push64),
                op::F64_LOAD => load!(u64, push64),
                op::I32_LOAD8_S => load!(i8, push32),
                op::I32_LOAD8_U => load!(u8, push32),
                op::I32_LOAD16_S => load!(i16, push32),
                op::I32_LOAD16_U => load!(u16, push32),
                op::I64_LOAD8_S => load!(i8, push64),
                op::I64_LOAD8_U => load!(u8, push64),
                op::I64_LOAD16_S => load!(i16, push64),
                op::I64_LOAD16_U => load!(u16, push64),
                op::I64_LOAD32_S => load!(i32, push64),
                op::I64_LOAD32_U => load!(u32, push64),

                op::I32_STORE | op::F32_STORE => store!(u32, pop32),
                op::I64_STORE | op::F64_STORE => store!(u64, pop64),
                op::I32_STORE8 => store!(u8, pop32),
                op::I32_STORE16 => store!(u16, pop32),
                op::I64_STORE8 => store!(u8, pop64),
                op::I64_STORE16 => store!(u16, pop64),
                op::I64_STORE32 => store!(u32, pop64),

                op::MEMORY_SIZE => {
                    let memidx = leb::read_u32(code, &mut ip);
                    let mem = inst.memory(memidx);
                    let pages = mem.page_count();
                    if mem.ty().memory64 {
                        env.push_u64(pages);
                    } else {
                        env.push_u32(pages as u32);
                    }
                }
                op::MEMORY_GROW => {
                    let memidx = leb::read_u32(code, &mut ip);
                    let mem = inst.memory(memidx);
                    let memory64 = mem.ty().memory64;
                    let delta = if memory64 {
                        env.pop_u64()
                    } else {
                        u64::from(env.pop_u32())
                    };
                    let grown = mem.grow(delta);
                    if memory64 {
                        env.push_u64(grown.unwrap_or(u64::MAX));
                    } else {
                        env.push_u32(grown.map(|old| old as u32).unwrap_or(u32::MAX));
                    }
                }

                op::I32_CONST => {
                    let value = leb::read_i32(code, &mut ip);
                    env.push_u32(value as u32);
                }
                op::I64_CONST => {
                    let value = leb::read_i64(code, &mut ip);
                    env.push_u64(value as u64);
                }
                op::F32_CONST => {
                    let bits = u32::from_le_bytes(
                        code[ip..ip + 4].try_into().expect("f32 immediate"),
                    );
                    ip += 4;
                    env.push_u32(bits);
                }
                op::F64_CONST => {
                    let bits = u64::from_le_bytes(
                        code[ip..ip + 8].try_into().expect("f64 immediate"),
                    );
                    ip += 8;
                    env.push_u64(bits);
                }

                op::I32_EQZ => unop32!(u32, |v| u32::from(v == 0)),
                op::I32_EQ => cmp32!(u32, |l, r| l == r),
                op::I32_NE => cmp32!(u32, |l, r| l != r),
                op::I32_LT_S => cmp32!(i32, |l, r| l < r),
                op::I32_LT_U => cmp32!(u32, |l, r| l < r),
                op::I32_GT_S => cmp32!(i32, |l, r| l > r),
                op::I32_GT_U => cmp32!(u32, |l, r| l > r),
                op::I32_LE_S => cmp32!(i32, |l, r| l <= r),
                op::I32_LE_U => cmp32!(u32, |l, r| l <= r),
                op::I32_GE_S => cmp32!(i32, |l, r| l >= r),
                op::I32_GE_U => cmp32!(u32, |l, r| l >= r),
                op::I64_EQZ => {
                    let value = env.pop_u64();
                    env.push_u32(u32::from(value == 0));
                }
                op::I64_EQ => cmp64!(u64, |l, r| l == r),
                op::I64_NE => cmp64!(u64, |l, r| l != r),
                op::I64_LT_S => cmp64!(i64, |l, r| l < r),
                op::I64_LT_U => cmp64!(u64, |l, r| l < r),
                op::I64_GT_S => cmp64!(i64, |l, r| l > r),
                op::I64_GT_U => cmp64!(u64, |l, r| l > r),
                op::I64_LE_S => cmp64!(i64, |l, r| l <= r),
                op::I64_LE_U => cmp64!(u64, |l, r| l <= r),
                op::I64_GE_S => cmp64!(i64, |l, r| l >= r),
                op::I64_GE_U => cmp64!(u64, |l, r| l >= r),
                op::F32_EQ => fcmp32!(|l, r| l == r),
                op::F32_NE => fcmp32!(|l, r| l != r),
                op::F32_LT => fcmp32!(|l, r| l < r),
                op::F32_GT => fcmp32!(|l, r| l > r),
                op::F32_LE => fcmp32!(|l, r| l <= r),
                op::F32_GE => fcmp32!(|l, r| l >= r),
                op::F64_EQ => fcmp64!(|l, r| l == r),
                op::F64_NE => fcmp64!(|l, r| l != r),
                op::F64_LT => fcmp64!(|l, r| l < r),
                op::F64_GT => fcmp64!(|l, r| l > r),
                op::F64_LE => fcmp64!(|l, r| l <= r),
                op::F64_GE => fcmp64!(|l, r| l >= r),

                op::I32_CLZ => unop32!(i32, Integer::leading_zeros),
                op::I32_CTZ => unop32!(i32, Integer::trailing_zeros),
                op::I32_POPCNT => unop32!(i32, Integer::count_ones),
                op::I32_ADD => binop32!(i32, runwasm_core::ArithmeticOps::add),
                op::I32_SUB => binop32!(i32, runwasm_core::ArithmeticOps::sub),
                op::I32_MUL => binop32!(i32, runwasm_core::ArithmeticOps::mul),
                op::I32_DIV_S => binop32_trap!(i32, Integer::div),
                op::I32_DIV_U => binop32_trap!(u32, Integer::div),
                op::I32_REM_S => binop32_trap!(i32, Integer::rem),
                op::I32_REM_U => binop32_trap!(u32, Integer::rem),
                op::I32_AND => binop32!(u32, |l, r| l & r),
                op::I32_OR => binop32!(u32, |l, r| l | r),
                op::I32_XOR => binop32!(u32, |l, r| l ^ r),
                op::I32_SHL => binop32!(i32, Integer::shl),
                op::I32_SHR_S => binop32!(i32, Integer::shr),
                op::I32_SHR_U => binop32!(u32, Integer::shr),
                op::I32_ROTL => binop32!(i32, Integer::rotl),
                op::I32_ROTR => binop32!(i32, Integer::rotr),
                op::I64_CLZ => unop64!(i64, Integer::leading_zeros),
                op::I64_CTZ => unop64!(i64, Integer::trailing_zeros),
                op::I64_POPCNT => unop64!(i64, Integer::count_ones),
                op::I64_ADD => binop64!(i64, runwasm_core::ArithmeticOps::add),
                op::I64_SUB => binop64!(i64, runwasm_core::ArithmeticOps::sub),
                op::I64_MUL => binop64!(i64, runwasm_core::ArithmeticOps::mul),
                op::I64_DIV_S => binop64_trap!(i64, Integer::div),
                op::I64_DIV_U => binop64_trap!(u64, Integer::div),
                op::I64_REM_S => binop64_trap!(i64, Integer::rem),
                op::I64_REM_U => binop64_trap!(u64, Integer::rem),
                op::I64_AND => binop64!(u64, |l, r| l & r),
                op::I64_OR => binop64!(u64, |l, r| l | r),
                op::I64_XOR => binop64!(u64, |l, r| l ^ r),
                op::I64_SHL => binop64!(i64, Integer::shl),
                op::I64_SHR_S => binop64!(i64, Integer::shr),
                op::I64_SHR_U => binop64!(u64, Integer::shr),
                op::I64_ROTL => binop64!(i64, Integer::rotl),
                op::I64_ROTR => binop64!(i64, Integer::rotr),

                op::F32_ABS => funop32!(Float::abs),
                op::F32_NEG => {
                    let bits = env.pop_u32();
                    env.push_u32(bits ^ 0x8000_0000);
                }
                op::F32_CEIL => funop32!(Float::ceil),
                op::F32_FLOOR => funop32!(Float::floor),
                op::F32_TRUNC => funop32!(Float::trunc),
                op::F32_NEAREST => funop32!(Float::nearest),
                op::F32_SQRT => funop32!(Float::sqrt),
                op::F32_ADD => fbinop32!(runwasm_core::ArithmeticOps::add),
                op::F32_SUB => fbinop32!(runwasm_core::ArithmeticOps::sub),
                op::F32_MUL => fbinop32!(runwasm_core::ArithmeticOps::mul),
                op::F32_DIV => fbinop32!(Float::div),
                op::F32_MIN => fbinop32!(Float::min),
                op::F32_MAX => fbinop32!(Float::max),
                op::F32_COPYSIGN => fbinop32!(Float::copysign),
                op::F64_ABS => funop64!(Float::abs),
                op::F64_NEG => {
                    let bits = env.pop_u64();
                    env.push_u64(bits ^ 0x8000_0000_0000_0000);
                }
                op::F64_CEIL => funop64!(Float::ceil),
                op::F64_FLOOR => funop64!(Float::floor),
                op::F64_TRUNC => funop64!(Float::trunc),
                op::F64_NEAREST => funop64!(Float::nearest),
                op::F64_SQRT => funop64!(Float::sqrt),
                op::F64_ADD => fbinop64!(runwasm_core::ArithmeticOps::add),
                op::F64_SUB => fbinop64!(runwasm_core::ArithmeticOps::sub),
                op::F64_MUL => fbinop64!(runwasm_core::ArithmeticOps::mul),
                op::F64_DIV => fbinop64!(Float::div),
                op::F64_MIN => fbinop64!(Float::min),
                op::F64_MAX => fbinop64!(Float::max),
                op::F64_COPYSIGN => fbinop64!(Float::copysign),

                op::I32_WRAP_I64 => {
                    let value = env.pop_u64();
                    env.push_u32(value as u32);
                }
                op::I32_TRUNC_F32_S => {
                    let value = F32::from_bits(env.pop_u32()).to_float();
                    let truncated: i32 = check!(value.try_truncate_into());
                    env.push_u32(truncated as u32);
                }
                op::I32_TRUNC_F32_U => {
                    let value = F32::from_bits(env.pop_u32()).to_float();
                    let truncated: u32 = check!(value.try_truncate_into());
                    env.push_u32(truncated);
                }
                op::I32_TRUNC_F64_S => {
                    let value = F64::from_bits(env.pop_u64()).to_float();
                    let truncated: i32 = check!(value.try_truncate_into());
                    env.push_u32(truncated as u32);
                }
                op::I32_TRUNC_F64_U => {
                    let value = F64::from_bits(env.pop_u64()).to_float();
                    let truncated: u32 = check!(value.try_truncate_into());
                    env.push_u32(truncated);
                }
                op::I64_EXTEND_I32_S => {
                    let value = env.pop_u32() as i32;
                    env.push_u64(value as i64 as u64);
                }
                op::I64_EXTEND_I32_U => {
                    let value = env.pop_u32();
                    env.push_u64(u64::from(value));
                }
                op::I64_TRUNC_F32_S => {
                    let value = F32::from_bits(env.pop_u32()).to_float();
                    let truncated: i64 = check!(value.try_truncate_into());
                    env.push_u64(truncated as u64);
                }
                op::I64_TRUNC_F32_U => {
                    let value = F32::from_bits(env.pop_u32()).to_float();
                    let truncated: u64 = check!(value.try_truncate_into());
                    env.push_u64(truncated);
                }
                op::I64_TRUNC_F64_S => {
                    let value = F64::from_bits(env.pop_u64()).to_float();
                    let truncated: i64 = check!(value.try_truncate_into());
                    env.push_u64(truncated as u64);
                }
                op::I64_TRUNC_F64_U => {
                    let value = F64::from_bits(env.pop_u64()).to_float();
                    let truncated: u64 = check!(value.try_truncate_into());
                    env.push_u64(truncated);
                }
                op::F32_CONVERT_I32_S => {
                    let value = env.pop_u32() as i32;
                    env.push_u32(F32::from_float(value as f32).to_bits());
                }
                op::F32_CONVERT_I32_U => {
                    let value = env.pop_u32();
                    env.push_u32(F32::from_float(value as f32).to_bits());
                }
                op::F32_CONVERT_I64_S => {
                    let value = env.pop_u64() as i64;
                    env.push_u32(F32::from_float(value as f32).to_bits());
                }
                op::F32_CONVERT_I64_U => {
                    let value = env.pop_u64();
                    env.push_u32(F32::from_float(value as f32).to_bits());
                }
                op::F32_DEMOTE_F64 => {
                    let value = F64::from_bits(env.pop_u64()).to_float();
                    env.push_u32(F32::from_float(value as f32).to_bits());
                }
                op::F64_CONVERT_I32_S => {
                    let value = env.pop_u32() as i32;
                    env.push_u64(F64::from_float(f64::from(value)).to_bits());
                }
                op::F64_CONVERT_I32_U => {
                    let value = env.pop_u32();
                    env.push_u64(F64::from_float(f64::from(value)).to_bits());
                }
                op::F64_CONVERT_I64_S => {
                    let value = env.pop_u64() as i64;
                    env.push_u64(F64::from_float(value as f64).to_bits());
                }
                op::F64_CONVERT_I64_U => {
                    let value = env.pop_u64();
                    env.push_u64(F64::from_float(value as f64).to_bits());
                }
                op::F64_PROMOTE_F32 => {
                    let value = F32::from_bits(env.pop_u32()).to_float();
                    env.push_u64(F64::from_float(f64::from(value)).to_bits());
                }
                // Reinterprets carry the cell bits unchanged.
                op::I32_REINTERPRET_F32
                | op::I64_REINTERPRET_F64
                | op::F32_REINTERPRET_I32
                | op::F64_REINTERPRET_I64 => {}

                op::I32_EXTEND8_S => unop32!(i32, |v: i32| v as i8 as i32),
                op::I32_EXTEND16_S => unop32!(i32, |v: i32| v as i16 as i32),
                op::I64_EXTEND8_S => unop64!(i64, |v: i64| v as i8 as i64),
                op::I64_EXTEND16_S => unop64!(i64, |v: i64| v as i16 as i64),
                op::I64_EXTEND32_S => unop64!(i64, |v: i64| v as i32 as i64),

                op::REF_NULL => {
                    leb::skip(code, &mut ip);
                    env.push_ref(GcRef::NULL);
                }
                op::REF_IS_NULL => {
                    let value = env.pop_ref();
                    env.push_u32(u32::from(value.is_null()));
                }
                op::REF_FUNC => {
                    let ref_func_idx = leb::read_u32(code, &mut ip);
                    let handle = inst.funcref(ref_func_idx);
                    env.push_ref(handle);
                }
                op::REF_EQ => {
                    let rhs = env.pop_ref();
                    let lhs = env.pop_ref();
                    env.push_u32(u32::from(lhs == rhs));
                }
                op::REF_AS_NON_NULL => {
                    if env.peek_ref(1).is_null() {
                        throw!(TrapCode::NullReference);
                    }
                }
                op::BR_ON_NULL => {
                    env.check_suspend_flags()?;
                    let depth = leb::read_u32(code, &mut ip);
                    let value = env.pop_ref();
                    if value.is_null() {
                        do_branch!(depth);
                    } else {
                        env.push_ref(value);
                    }
                }
                op::BR_ON_NON_NULL => {
                    env.check_suspend_flags()?;
                    let depth = leb::read_u32(code, &mut ip);
                    if env.peek_ref(1).is_null() {
                        env.pop_ref();
                    } else {
                        do_branch!(depth);
                    }
                }

                op::MISC_PREFIX => check!(exec_misc(env, inst, code, &mut ip)),
                op::ATOMIC_PREFIX => check_trap!(exec_atomic(env, inst, code, &mut ip)),
                op::GC_PREFIX => {
                    match check_trap!(exec_gc(env, inst, module, code, &mut ip)) {
                        GcFlow::Next => {}
                        GcFlow::Branch(depth) => do_branch!(depth),
                    }
                }
                op::SIMD_PREFIX => throw!(TrapCode::UnsupportedOpcode),

                _ => throw!(TrapCode::UnsupportedOpcode),
            }
        }
    }
}
