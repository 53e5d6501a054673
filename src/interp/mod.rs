//! The bytecode interpreter.
//!
//! [`call_wasm`] is the host entry point: it seeds a glue frame with
//! the caller's argument cells, routes into the dispatcher (the only
//! execution backend of this build; the routing seam is where a JIT
//! would attach), and copies the return cells back out. Everything
//! else lives in the dispatcher in [`run`].

pub(crate) mod leb;
pub(crate) mod opcodes;
mod run;
pub(crate) mod scan;

use crate::{ExecEnv, ModuleInstance, RunMode, Value};
use runwasm_core::{Trap, TrapCode};

/// Calls function `func_idx` of `inst` with argument cells `argv`.
///
/// `argv` must hold at least the function's parameter cells; on
/// success the leading cells are overwritten with the return cells.
/// On failure the trap is also recorded in the instance exception
/// slot for post-mortem inspection.
///
/// # Errors
///
/// Any trap raised by the called function, including resource
/// failures ("wasm operand stack overflow") and cooperative
/// termination.
pub fn call_wasm(
    inst: &ModuleInstance,
    env: &mut ExecEnv,
    func_idx: u32,
    argv: &mut [u32],
) -> Result<(), Trap> {
    let Some(func) = inst.func_inst(func_idx) else {
        let trap = Trap::from(TrapCode::UnknownFunction);
        inst.set_exception(TrapCode::UnknownFunction.trap_message());
        return Err(trap);
    };
    let func_type = inst.func_type_of(func_idx);
    let param_cells = func_type.param_cell_num() as usize;
    let ret_cells = func_type.ret_cell_num() as usize;
    if argv.len() < param_cells {
        let message = format!(
            "invalid argument count {}, must be no smaller than {param_cells}",
            argv.len(),
        );
        inst.set_exception(&message);
        return Err(Trap::new(message));
    }
    if let Some((bottom, boundary)) = inst.module().aux_stack_bounds {
        env.set_aux_stack(bottom, boundary);
    }

    // The glue frame: no locals, no control stack, an operand area
    // just big enough for the argument and return cells.
    let glue_cells = param_cells.max(ret_cells).max(2) as u32;
    env.alloc_frame(None, 0, glue_cells, 0)?;
    for cell in &argv[..param_cells] {
        env.push_u32(*cell);
    }
    // Reference-typed parameters arrive as heap handles; mark their
    // cells so a collection during the call can trace them.
    let sp_bottom = env.cur_frame().sp_bottom;
    let mut offset = 0;
    for ty in func_type.params() {
        if ty.is_traced_ref() {
            env.refs[sp_bottom + offset] = 1;
        }
        offset += ty.cell_num() as usize;
    }

    let is_import = func.is_import();
    let result = match env.mode {
        RunMode::Interpreter => {
            if is_import {
                run::call_host_from_entry(env, inst, func_idx)
            } else {
                run::enter(env, inst, func_idx)
            }
        }
    };

    match result {
        Ok(()) => {
            let base = env.sp - ret_cells;
            for i in 0..ret_cells {
                argv[i] = env.cells[base + i];
            }
            env.free_frame();
            Ok(())
        }
        Err(trap) => {
            if !trap.is_terminated() {
                inst.set_exception(&trap.to_string());
                log::debug!(
                    "wasm function {func_idx} trapped: {trap}; call stack: {:?}",
                    env.call_stack(),
                );
            }
            // Unwind everything this activation allocated.
            while !env.frames.is_empty() {
                let frame = env.free_frame();
                if frame.func_idx.is_none() {
                    break;
                }
            }
            Err(trap)
        }
    }
}

/// Calls the exported function `name` with typed `args`.
///
/// # Errors
///
/// - If no function export under `name` exists.
/// - If the argument count or types mismatch the signature.
/// - Any trap raised during execution.
pub fn invoke(
    inst: &ModuleInstance,
    env: &mut ExecEnv,
    name: &str,
    args: &[Value],
) -> Result<Vec<Value>, Trap> {
    let Some(func_idx) = inst.exported_func(name) else {
        return Err(Trap::new(format!("no exported function named {name:?}")));
    };
    let func_type = inst.func_type_of(func_idx).clone();
    if args.len() != func_type.params().len() {
        return Err(Trap::new(format!(
            "expected {} arguments, got {}",
            func_type.params().len(),
            args.len(),
        )));
    }

    let cells = func_type
        .param_cell_num()
        .max(func_type.ret_cell_num()) as usize;
    let mut argv = vec![0_u32; cells.max(2)];
    let mut offset = 0;
    for value in args {
        offset += value.to_cells(&mut argv[offset..]);
    }
    call_wasm(inst, env, func_idx, &mut argv)?;

    let mut results = Vec::with_capacity(func_type.results().len());
    let mut offset = 0;
    for ty in func_type.results() {
        results.push(Value::from_cells(*ty, &argv[offset..]));
        offset += ty.cell_num() as usize;
    }
    Ok(results)
}
