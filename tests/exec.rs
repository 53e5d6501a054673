//! Core execution semantics: numerics, control flow, locals,
//! globals, memory access and the classic recursion scenario.

mod common;

use assert_matches::assert_matches;
use common::{instantiate, run_i32, Asm};
use runwasm::{
    invoke, Export, FuncType, GlobalType, InitExpr, MemoryType, ModuleBuilder, TrapCode, ValType,
    Value,
};

#[test]
fn fib_10_is_55() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.push_func_type(FuncType::new([ValType::I32], [ValType::I32]));
    // if n < 2 { return n } else { return fib(n-1) + fib(n-2) }
    let code = Asm::new()
        .local_get(0)
        .i32_const(2)
        .i32_lt_s()
        .if_void()
        .local_get(0)
        .ret()
        .end()
        .local_get(0)
        .i32_const(1)
        .i32_sub()
        .call(0)
        .local_get(0)
        .i32_const(2)
        .i32_sub()
        .call(0)
        .i32_add()
        .finish();
    let func = builder.push_function(ty, vec![], 16, 8, code);
    builder.export("fib", Export::Func(func));
    let (inst, mut env) = instantiate(builder.finish());

    assert_eq!(run_i32(&inst, &mut env, "fib", &[Value::I32(10)]), Ok(55));
    assert_eq!(run_i32(&inst, &mut env, "fib", &[Value::I32(1)]), Ok(1));
}

#[test]
fn store_load_round_trip_and_bounds() {
    let mut builder = ModuleBuilder::new();
    builder.push_memory(MemoryType::new(1, None));
    let ty = builder.push_func_type(FuncType::new([ValType::I32, ValType::I32], [ValType::I32]));
    let code = Asm::new()
        .local_get(0)
        .local_get(1)
        .i32_store(0)
        .local_get(0)
        .i32_load(0)
        .finish();
    let func = builder.push_function(ty, vec![], 16, 4, code);
    builder.export("store_load", Export::Func(func));
    let (inst, mut env) = instantiate(builder.finish());

    let value = 0xDEAD_BEEF_u32 as i32;
    assert_eq!(
        run_i32(&inst, &mut env, "store_load", &[Value::I32(0), Value::I32(value)]),
        Ok(value)
    );
    assert_eq!(
        run_i32(
            &inst,
            &mut env,
            "store_load",
            &[Value::I32(65532), Value::I32(value)]
        ),
        Ok(value)
    );
    let trap = run_i32(
        &inst,
        &mut env,
        "store_load",
        &[Value::I32(65533), Value::I32(value)],
    )
    .unwrap_err();
    assert_eq!(trap.to_string(), "out of bounds memory access");
    assert_matches!(trap.trap_code(), Some(TrapCode::MemoryOutOfBounds));
    assert_eq!(
        inst.copy_exception().as_deref(),
        Some("out of bounds memory access")
    );
}

#[test]
fn integer_division_traps() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.push_func_type(FuncType::new([ValType::I32, ValType::I32], [ValType::I32]));
    let code = Asm::new().local_get(0).local_get(1).i32_div_s().finish();
    let func = builder.push_function(ty, vec![], 8, 2, code);
    builder.export("div", Export::Func(func));
    let (inst, mut env) = instantiate(builder.finish());

    assert_eq!(
        run_i32(&inst, &mut env, "div", &[Value::I32(-7), Value::I32(2)]),
        Ok(-3)
    );
    let trap = run_i32(&inst, &mut env, "div", &[Value::I32(1), Value::I32(0)]).unwrap_err();
    assert_eq!(trap.to_string(), "integer divide by zero");
    let trap = run_i32(
        &inst,
        &mut env,
        "div",
        &[Value::I32(i32::MIN), Value::I32(-1)],
    )
    .unwrap_err();
    assert_eq!(trap.to_string(), "integer overflow");
}

#[test]
fn rem_s_min_by_minus_one_is_zero() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.push_func_type(FuncType::new([], [ValType::I32]));
    let code = Asm::new()
        .i32_const(i32::MIN)
        .i32_const(-1)
        .i32_rem_s()
        .finish();
    let func = builder.push_function(ty, vec![], 8, 2, code);
    builder.export("rem", Export::Func(func));
    let (inst, mut env) = instantiate(builder.finish());
    assert_eq!(run_i32(&inst, &mut env, "rem", &[]), Ok(0));
}

#[test]
fn truncation_traps_and_saturates() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.push_func_type(FuncType::new([ValType::F32], [ValType::I32]));
    let trunc = builder.push_function(
        ty,
        vec![],
        8,
        2,
        Asm::new().local_get(0).i32_trunc_f32_s().finish(),
    );
    let sat = builder.push_function(
        ty,
        vec![],
        8,
        2,
        Asm::new().local_get(0).i32_trunc_sat_f32_s().finish(),
    );
    builder.export("trunc", Export::Func(trunc));
    builder.export("trunc_sat", Export::Func(sat));
    let (inst, mut env) = instantiate(builder.finish());

    assert_eq!(
        run_i32(&inst, &mut env, "trunc", &[Value::from(-1.5_f32)]),
        Ok(-1)
    );
    let trap = run_i32(&inst, &mut env, "trunc", &[Value::from(f32::NAN)]).unwrap_err();
    assert_eq!(trap.to_string(), "invalid conversion to integer");
    let trap = run_i32(&inst, &mut env, "trunc", &[Value::from(2147483648.0_f32)]).unwrap_err();
    assert_eq!(trap.to_string(), "integer overflow");

    assert_eq!(
        run_i32(&inst, &mut env, "trunc_sat", &[Value::from(f32::NAN)]),
        Ok(0)
    );
    assert_eq!(
        run_i32(&inst, &mut env, "trunc_sat", &[Value::from(f32::INFINITY)]),
        Ok(i32::MAX)
    );
    assert_eq!(
        run_i32(
            &inst,
            &mut env,
            "trunc_sat",
            &[Value::from(f32::NEG_INFINITY)]
        ),
        Ok(i32::MIN)
    );
}

#[test]
fn local_round_trip_preserves_nan_payload() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.push_func_type(FuncType::new([], [ValType::F64]));
    let payload = 0x7FF4_0000_0000_CAFE_u64;
    let code = Asm::new()
        .f64_const_bits(payload)
        .local_set(0)
        .local_get(0)
        .finish();
    let func = builder.push_function(ty, vec![ValType::F64], 8, 2, code);
    builder.export("nan", Export::Func(func));
    let (inst, mut env) = instantiate(builder.finish());

    let results = invoke(&inst, &mut env, "nan", &[]).unwrap();
    match results.as_slice() {
        [Value::F64(value)] => assert_eq!(value.to_bits(), payload),
        other => panic!("unexpected results {other:?}"),
    }
}

#[test]
fn float_min_max_and_copysign() {
    let mut builder = ModuleBuilder::new();
    let f32ty = builder.push_func_type(FuncType::new([ValType::F32, ValType::F32], [ValType::F32]));
    let f64ty = builder.push_func_type(FuncType::new([ValType::F64, ValType::F64], [ValType::F64]));
    let min = builder.push_function(
        f32ty,
        vec![],
        8,
        2,
        Asm::new().local_get(0).local_get(1).f32_min().finish(),
    );
    let max = builder.push_function(
        f64ty,
        vec![],
        8,
        2,
        Asm::new().local_get(0).local_get(1).f64_max().finish(),
    );
    let copysign = builder.push_function(
        f64ty,
        vec![],
        8,
        2,
        Asm::new().local_get(0).local_get(1).f64_copysign().finish(),
    );
    builder.export("min32", Export::Func(min));
    builder.export("max64", Export::Func(max));
    builder.export("copysign", Export::Func(copysign));
    let (inst, mut env) = instantiate(builder.finish());

    let results = invoke(
        &inst,
        &mut env,
        "min32",
        &[Value::from(0.0_f32), Value::from(-0.0_f32)],
    )
    .unwrap();
    assert_matches!(results.as_slice(), [Value::F32(v)] if v.to_bits() == 0x8000_0000);

    let results = invoke(
        &inst,
        &mut env,
        "max64",
        &[Value::from(-0.0_f64), Value::from(0.0_f64)],
    )
    .unwrap();
    assert_matches!(results.as_slice(), [Value::F64(v)] if v.to_bits() == 0);

    let results = invoke(
        &inst,
        &mut env,
        "copysign",
        &[Value::from(1.5_f64), Value::from(-0.0_f64)],
    )
    .unwrap();
    assert_matches!(results.as_slice(), [Value::F64(v)] if v.to_bits() == (-1.5_f64).to_bits());
}

#[test]
fn block_branching_and_br_table() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.push_func_type(FuncType::new([ValType::I32], [ValType::I32]));
    // br_table selecting one of three constants.
    let code = Asm::new()
        .block_void()
        .block_void()
        .block_void()
        .local_get(0)
        .br_table(&[0, 1], 2)
        .end()
        .i32_const(10)
        .ret()
        .end()
        .i32_const(20)
        .ret()
        .end()
        .i32_const(30)
        .finish();
    let func = builder.push_function(ty, vec![], 8, 8, code);
    builder.export("pick", Export::Func(func));
    let (inst, mut env) = instantiate(builder.finish());

    assert_eq!(run_i32(&inst, &mut env, "pick", &[Value::I32(0)]), Ok(10));
    assert_eq!(run_i32(&inst, &mut env, "pick", &[Value::I32(1)]), Ok(20));
    assert_eq!(run_i32(&inst, &mut env, "pick", &[Value::I32(2)]), Ok(30));
    // Out-of-range indices clamp to the default.
    assert_eq!(run_i32(&inst, &mut env, "pick", &[Value::I32(99)]), Ok(30));
}

#[test]
fn loop_counts_down_with_backward_branches() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.push_func_type(FuncType::new([ValType::I32], [ValType::I32]));
    // acc = 0; while (n != 0) { acc += n; n -= 1 } return acc
    let code = Asm::new()
        .block_void()
        .loop_void()
        .local_get(0)
        .i32_eqz()
        .br_if(1)
        .local_get(1)
        .local_get(0)
        .i32_add()
        .local_set(1)
        .local_get(0)
        .i32_const(1)
        .i32_sub()
        .local_set(0)
        .br(0)
        .end()
        .end()
        .local_get(1)
        .finish();
    let func = builder.push_function(ty, vec![ValType::I32], 8, 8, code);
    builder.export("sum", Export::Func(func));
    let (inst, mut env) = instantiate(builder.finish());

    assert_eq!(run_i32(&inst, &mut env, "sum", &[Value::I32(10)]), Ok(55));
    assert_eq!(run_i32(&inst, &mut env, "sum", &[Value::I32(0)]), Ok(0));
}

#[test]
fn globals_and_select() {
    let mut builder = ModuleBuilder::new();
    let counter = builder.push_global(
        GlobalType {
            ty: ValType::I32,
            mutable: true,
        },
        InitExpr::I32(5),
    );
    let ty = builder.push_func_type(FuncType::new([ValType::I32], [ValType::I32]));
    // global += select(cond: arg, 10, 1); return global
    let code = Asm::new()
        .global_get(counter)
        .i32_const(10)
        .i32_const(1)
        .local_get(0)
        .select()
        .i32_add()
        .global_set(counter)
        .global_get(counter)
        .finish();
    let func = builder.push_function(ty, vec![], 8, 2, code);
    builder.export("bump", Export::Func(func));
    let (inst, mut env) = instantiate(builder.finish());

    assert_eq!(run_i32(&inst, &mut env, "bump", &[Value::I32(1)]), Ok(15));
    assert_eq!(run_i32(&inst, &mut env, "bump", &[Value::I32(0)]), Ok(16));
    assert_eq!(inst.read_global(counter), Value::I32(16));
}

#[test]
fn memory_size_and_grow_are_observable() {
    let mut builder = ModuleBuilder::new();
    builder.push_memory(MemoryType::new(1, Some(3)));
    let ty = builder.push_func_type(FuncType::new([ValType::I32], [ValType::I32]));
    let code = Asm::new().local_get(0).memory_grow().finish();
    let grow = builder.push_function(ty, vec![], 8, 2, code);
    let size = builder.push_function(
        ty,
        vec![],
        8,
        2,
        Asm::new().memory_size().finish(),
    );
    builder.export("grow", Export::Func(grow));
    builder.export("size", Export::Func(size));
    let (inst, mut env) = instantiate(builder.finish());

    assert_eq!(run_i32(&inst, &mut env, "size", &[Value::I32(0)]), Ok(1));
    assert_eq!(run_i32(&inst, &mut env, "grow", &[Value::I32(2)]), Ok(1));
    assert_eq!(run_i32(&inst, &mut env, "size", &[Value::I32(0)]), Ok(3));
    // Past the declared maximum: -1.
    assert_eq!(run_i32(&inst, &mut env, "grow", &[Value::I32(1)]), Ok(-1));
}

#[test]
fn sign_extension_and_widening() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.push_func_type(FuncType::new([ValType::I32], [ValType::I32]));
    let code = Asm::new().local_get(0).i32_extend8_s().finish();
    let func = builder.push_function(ty, vec![], 8, 2, code);
    builder.export("ext8", Export::Func(func));

    let ty64 = builder.push_func_type(FuncType::new([ValType::I32], [ValType::I64]));
    let code = Asm::new()
        .local_get(0)
        .i64_extend_i32_s()
        .i64_const(1)
        .i64_add()
        .finish();
    let widen = builder.push_function(ty64, vec![], 8, 2, code);
    builder.export("widen", Export::Func(widen));
    let (inst, mut env) = instantiate(builder.finish());

    assert_eq!(run_i32(&inst, &mut env, "ext8", &[Value::I32(0x80)]), Ok(-128));
    assert_eq!(run_i32(&inst, &mut env, "ext8", &[Value::I32(0x7F)]), Ok(127));

    let results = invoke(&inst, &mut env, "widen", &[Value::I32(-2)]).unwrap();
    assert_eq!(results, vec![Value::I64(-1)]);
}

#[test]
fn unreachable_traps_with_its_message() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.push_func_type(FuncType::new([], []));
    let func = builder.push_function(ty, vec![], 4, 2, Asm::new().unreachable().finish());
    builder.export("boom", Export::Func(func));
    let (inst, mut env) = instantiate(builder.finish());

    let trap = invoke(&inst, &mut env, "boom", &[]).unwrap_err();
    assert_eq!(trap.to_string(), "unreachable");
}

#[test]
fn operand_stack_overflow_is_reported() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.push_func_type(FuncType::new([], []));
    // Infinite non-tail recursion must exhaust the wasm stack.
    let func = builder.push_function(ty, vec![], 8, 2, Asm::new().call(0).finish());
    builder.export("recurse", Export::Func(func));
    let (inst, mut env) = instantiate(builder.finish());

    let trap = invoke(&inst, &mut env, "recurse", &[]).unwrap_err();
    assert_eq!(trap.to_string(), "wasm operand stack overflow");
}
