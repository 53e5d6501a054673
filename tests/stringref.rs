//! Stringref: constants, measuring, encoding, concatenation,
//! equality, views and iterators.

mod common;

use common::{instantiate, run_i32, Asm};
use runwasm::{Export, FuncType, MemoryType, ModuleBuilder, ValType, Value};

#[test]
fn const_concat_eq_and_measure() {
    let mut builder = ModuleBuilder::new();
    let hello = builder.push_string(b"hello ");
    let world = builder.push_string(b"world");
    let full = builder.push_string(b"hello world");
    let ty = builder.push_func_type(FuncType::new([], [ValType::I32]));

    let eq_code = Asm::new()
        .string_const(hello)
        .string_const(world)
        .string_concat()
        .string_const(full)
        .string_eq()
        .finish();
    let eq_fn = builder.push_function(ty, vec![], 16, 2, eq_code);
    builder.export("concat_eq", Export::Func(eq_fn));

    let measure_code = Asm::new()
        .string_const(full)
        .string_measure_utf8()
        .finish();
    let measure_fn = builder.push_function(ty, vec![], 16, 2, measure_code);
    builder.export("measure", Export::Func(measure_fn));

    let ne_code = Asm::new()
        .string_const(hello)
        .string_const(world)
        .string_eq()
        .finish();
    let ne_fn = builder.push_function(ty, vec![], 16, 2, ne_code);
    builder.export("differ", Export::Func(ne_fn));
    let (inst, mut env) = instantiate(builder.finish());

    assert_eq!(run_i32(&inst, &mut env, "concat_eq", &[]), Ok(1));
    assert_eq!(run_i32(&inst, &mut env, "measure", &[]), Ok(11));
    assert_eq!(run_i32(&inst, &mut env, "differ", &[]), Ok(0));
}

#[test]
fn new_from_memory_and_encode_back() {
    let mut builder = ModuleBuilder::new();
    builder.push_memory(MemoryType::new(1, None));
    builder.push_data(runwasm::DataSegment {
        active: Some((0, runwasm::InitExpr::I32(0))),
        bytes: Box::new(*b"rust\xC3\xA9"),
    });
    let ty = builder.push_func_type(FuncType::new([], [ValType::I32]));
    // s = string.new_utf8(mem[0..6]); written = encode_utf8(s, 100);
    // return written * 256 + mem[100]
    let code = Asm::new()
        .i32_const(0)
        .i32_const(6)
        .string_new_utf8()
        .i32_const(100)
        .string_encode_utf8()
        .i32_const(256)
        .i32_mul()
        .i32_const(100)
        .i32_load8_u(0)
        .i32_add()
        .finish();
    let func = builder.push_function(ty, vec![], 16, 2, code);
    builder.export("round_trip", Export::Func(func));
    let (inst, mut env) = instantiate(builder.finish());

    assert_eq!(
        run_i32(&inst, &mut env, "round_trip", &[]),
        Ok(6 * 256 + i32::from(b'r'))
    );
    assert_eq!(inst.memory(0).load::<u8>(104, 0), Ok(0xC3));
}

#[test]
fn usv_checks_and_surrogate_handling() {
    let mut builder = ModuleBuilder::new();
    builder.push_memory(MemoryType::new(1, None));
    // A lone surrogate U+D800 in WTF-8.
    let lone = builder.push_string(&[0xED, 0xA0, 0x80]);
    let clean = builder.push_string(b"ok");
    let ty = builder.push_func_type(FuncType::new([], [ValType::I32]));

    let usv_code = Asm::new()
        .string_const(clean)
        .string_is_usv_sequence()
        .i32_const(2)
        .i32_mul()
        .string_const(lone)
        .string_is_usv_sequence()
        .i32_add()
        .finish();
    let usv = builder.push_function(ty, vec![], 16, 2, usv_code);
    builder.export("usv", Export::Func(usv));

    // Strict UTF-8 encoding of a lone surrogate traps.
    let trap_code = Asm::new()
        .string_const(lone)
        .i32_const(0)
        .string_encode_utf8()
        .finish();
    let trap_fn = builder.push_function(ty, vec![], 16, 2, trap_code);
    builder.export("strict", Export::Func(trap_fn));

    // The lossy encoder replaces it with U+FFFD.
    let lossy_code = Asm::new()
        .string_const(lone)
        .i32_const(0)
        .string_encode_lossy_utf8()
        .finish();
    let lossy_fn = builder.push_function(ty, vec![], 16, 2, lossy_code);
    builder.export("lossy", Export::Func(lossy_fn));
    let (inst, mut env) = instantiate(builder.finish());

    assert_eq!(run_i32(&inst, &mut env, "usv", &[]), Ok(2));
    let trap = run_i32(&inst, &mut env, "strict", &[]).unwrap_err();
    assert_eq!(trap.to_string(), "isolated surrogate is seen");
    assert_eq!(run_i32(&inst, &mut env, "lossy", &[]), Ok(3));
    assert_eq!(inst.memory(0).load::<u8>(0, 0), Ok(0xEF));
}

#[test]
fn wtf16_views_expose_code_units() {
    let mut builder = ModuleBuilder::new();
    // "a😀" is one BMP unit plus a surrogate pair: 3 units.
    let text = builder.push_string("a\u{1F600}".as_bytes());
    let ty = builder.push_func_type(FuncType::new([ValType::I32], [ValType::I32]));
    let len_code = Asm::new()
        .string_const(text)
        .string_as_wtf16()
        .stringview_wtf16_length()
        .finish();
    let len_fn = builder.push_function(ty, vec![], 16, 2, len_code);
    builder.export("len16", Export::Func(len_fn));

    let unit_code = Asm::new()
        .string_const(text)
        .string_as_wtf16()
        .local_get(0)
        .stringview_wtf16_get_codeunit()
        .finish();
    let unit_fn = builder.push_function(ty, vec![], 16, 2, unit_code);
    builder.export("unit", Export::Func(unit_fn));

    let measure_code = Asm::new()
        .string_const(text)
        .string_measure_wtf16()
        .finish();
    let measure_fn = builder.push_function(ty, vec![], 16, 2, measure_code);
    builder.export("measure16", Export::Func(measure_fn));
    let (inst, mut env) = instantiate(builder.finish());

    assert_eq!(run_i32(&inst, &mut env, "len16", &[Value::I32(0)]), Ok(3));
    assert_eq!(run_i32(&inst, &mut env, "measure16", &[Value::I32(0)]), Ok(3));
    assert_eq!(
        run_i32(&inst, &mut env, "unit", &[Value::I32(0)]),
        Ok(i32::from(b'a'))
    );
    assert_eq!(run_i32(&inst, &mut env, "unit", &[Value::I32(1)]), Ok(0xD83D));
    assert_eq!(run_i32(&inst, &mut env, "unit", &[Value::I32(2)]), Ok(0xDE00));
}

#[test]
fn iterators_walk_code_points() {
    let mut builder = ModuleBuilder::new();
    let text = builder.push_string("ab\u{1F600}".as_bytes());
    let iter_local = ValType::Ref(runwasm::RefType {
        nullable: true,
        heap: runwasm::HeapType::StringViewIter,
    });
    let ty = builder.push_func_type(FuncType::new([], [ValType::I32]));
    // it = iter(text); skip 2; next() == 0x1F600; next() == -1 adds 1
    let code = Asm::new()
        .string_const(text)
        .string_as_iter()
        .local_set(0)
        .local_get(0)
        .i32_const(2)
        .stringview_iter_advance()
        .drop()
        .local_get(0)
        .stringview_iter_next()
        .local_get(0)
        .stringview_iter_next()
        .i32_const(-1)
        .i32_eq()
        .i32_add()
        .finish();
    let func = builder.push_function(ty, vec![iter_local], 16, 2, code);
    builder.export("walk", Export::Func(func));
    let (inst, mut env) = instantiate(builder.finish());

    assert_eq!(
        run_i32(&inst, &mut env, "walk", &[]),
        Ok(0x1F600 + 1)
    );
}
