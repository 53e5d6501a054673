//! GC object operations: structs, arrays, i31, casts and the extern
//! conversions.

mod common;

use common::{instantiate, run_i32, Asm};
use runwasm::{
    ArrayType, CompositeType, DataSegment, Export, FieldType, FuncType, ModuleBuilder,
    StorageType, StructType, SubType, ValType, Value,
};

const HEAP_ANY: i64 = -18;
const HEAP_EQ: i64 = -19;
const HEAP_I31: i64 = -20;
const HEAP_STRUCT: i64 = -21;
const HEAP_ARRAY: i64 = -22;

fn struct_type(fields: Vec<FieldType>) -> SubType {
    SubType {
        is_final: true,
        supertype: None,
        composite: CompositeType::Struct(StructType {
            fields: fields.into_boxed_slice(),
        }),
    }
}

fn array_type(storage: StorageType) -> SubType {
    SubType {
        is_final: true,
        supertype: None,
        composite: CompositeType::Array(ArrayType {
            elem: FieldType {
                storage,
                mutable: true,
            },
        }),
    }
}

fn val_field(ty: ValType) -> FieldType {
    FieldType {
        storage: StorageType::Val(ty),
        mutable: true,
    }
}

#[test]
fn struct_fields_round_trip() {
    let mut builder = ModuleBuilder::new();
    let point = builder.push_type(struct_type(vec![
        val_field(ValType::I32),
        val_field(ValType::I64),
    ]));
    let ty = builder.push_func_type(FuncType::new([ValType::I32], [ValType::I32]));
    // s = struct.new(arg, 100); s.f0 = s.f0 + wrap(s.f1); return s.f0
    let code = Asm::new()
        .local_get(0)
        .i64_const(100)
        .struct_new(point)
        .local_set(1)
        .local_get(1)
        .local_get(1)
        .struct_get(point, 0)
        .local_get(1)
        .struct_get(point, 1)
        .i32_wrap_i64()
        .i32_add()
        .struct_set(point, 0)
        .local_get(1)
        .struct_get(point, 0)
        .finish();
    let func = builder.push_function(
        ty,
        vec![ValType::Ref(runwasm::RefType {
            nullable: true,
            heap: runwasm::HeapType::Concrete(point),
        })],
        16,
        2,
        code,
    );
    builder.export("points", Export::Func(func));
    let (inst, mut env) = instantiate(builder.finish());

    assert_eq!(run_i32(&inst, &mut env, "points", &[Value::I32(7)]), Ok(107));
}

#[test]
fn packed_struct_fields_extend_correctly() {
    let mut builder = ModuleBuilder::new();
    let packed = builder.push_type(struct_type(vec![FieldType {
        storage: StorageType::I8,
        mutable: true,
    }]));
    let ty = builder.push_func_type(FuncType::new([ValType::I32], [ValType::I32]));
    let ref_local = ValType::Ref(runwasm::RefType {
        nullable: true,
        heap: runwasm::HeapType::Concrete(packed),
    });
    // Store the argument into an i8 field and read it back signed
    // and unsigned; return get_s * 0x10000 + get_u... keep it simple:
    // return get_s when arg0 selects 0, get_u otherwise.
    let code = Asm::new()
        .i32_const(0x80)
        .struct_new(packed)
        .local_set(1)
        .local_get(0)
        .if_i32()
        .local_get(1)
        .struct_get_u(packed, 0)
        .else_()
        .local_get(1)
        .struct_get_s(packed, 0)
        .end()
        .finish();
    let func = builder.push_function(ty, vec![ref_local], 16, 4, code);
    builder.export("packed", Export::Func(func));
    let (inst, mut env) = instantiate(builder.finish());

    assert_eq!(run_i32(&inst, &mut env, "packed", &[Value::I32(1)]), Ok(0x80));
    assert_eq!(run_i32(&inst, &mut env, "packed", &[Value::I32(0)]), Ok(-128));
}

#[test]
fn struct_ops_trap_on_null() {
    let mut builder = ModuleBuilder::new();
    let point = builder.push_type(struct_type(vec![val_field(ValType::I32)]));
    let ty = builder.push_func_type(FuncType::new([], [ValType::I32]));
    let code = Asm::new().ref_null_any().struct_get(point, 0).finish();
    let func = builder.push_function(ty, vec![], 16, 2, code);
    builder.export("null_get", Export::Func(func));
    let (inst, mut env) = instantiate(builder.finish());

    let trap = run_i32(&inst, &mut env, "null_get", &[]).unwrap_err();
    assert_eq!(trap.to_string(), "null structure reference");
}

#[test]
fn arrays_support_new_get_set_len_and_bounds() {
    let mut builder = ModuleBuilder::new();
    let ints = builder.push_type(array_type(StorageType::Val(ValType::I32)));
    let arr_local = ValType::Ref(runwasm::RefType {
        nullable: true,
        heap: runwasm::HeapType::Concrete(ints),
    });
    let ty = builder.push_func_type(FuncType::new([ValType::I32], [ValType::I32]));
    // a = array.new(41, len 5); a[3] = a[3] + 1; return a[3] + len*0
    let code = Asm::new()
        .i32_const(41)
        .i32_const(5)
        .array_new(ints)
        .local_set(1)
        .local_get(1)
        .i32_const(3)
        .local_get(1)
        .i32_const(3)
        .array_get(ints)
        .i32_const(1)
        .i32_add()
        .array_set(ints)
        .local_get(1)
        .local_get(0)
        .array_get(ints)
        .finish();
    let func = builder.push_function(ty, vec![arr_local], 16, 2, code);
    builder.export("arrays", Export::Func(func));
    let (inst, mut env) = instantiate(builder.finish());

    assert_eq!(run_i32(&inst, &mut env, "arrays", &[Value::I32(3)]), Ok(42));
    assert_eq!(run_i32(&inst, &mut env, "arrays", &[Value::I32(0)]), Ok(41));
    let trap = run_i32(&inst, &mut env, "arrays", &[Value::I32(5)]).unwrap_err();
    assert_eq!(trap.to_string(), "out of bounds array access");
}

#[test]
fn array_fill_copy_and_len() {
    let mut builder = ModuleBuilder::new();
    let ints = builder.push_type(array_type(StorageType::Val(ValType::I32)));
    let arr_local = ValType::Ref(runwasm::RefType {
        nullable: true,
        heap: runwasm::HeapType::Concrete(ints),
    });
    let ty = builder.push_func_type(FuncType::new([], [ValType::I32]));
    // a = [1, 2, 3, 4]; fill a[0..2] = 9; b = new_default(4);
    // copy b[0..4] = a[0..4]; return b[0]+b[1]+b[2]+b[3] + len(b)*100
    let code = Asm::new()
        .i32_const(1)
        .i32_const(2)
        .i32_const(3)
        .i32_const(4)
        .array_new_fixed(ints, 4)
        .local_set(0)
        .local_get(0)
        .i32_const(0)
        .i32_const(9)
        .i32_const(2)
        .array_fill(ints)
        .i32_const(0)
        .i32_const(4)
        .array_new(ints)
        .local_set(1)
        .local_get(1)
        .i32_const(0)
        .local_get(0)
        .i32_const(0)
        .i32_const(4)
        .array_copy(ints, ints)
        .local_get(1)
        .i32_const(0)
        .array_get(ints)
        .local_get(1)
        .i32_const(1)
        .array_get(ints)
        .i32_add()
        .local_get(1)
        .i32_const(2)
        .array_get(ints)
        .i32_add()
        .local_get(1)
        .i32_const(3)
        .array_get(ints)
        .i32_add()
        .local_get(1)
        .array_len()
        .i32_const(100)
        .i32_mul()
        .i32_add()
        .finish();
    let func = builder.push_function(ty, vec![arr_local, arr_local], 24, 2, code);
    builder.export("fill_copy", Export::Func(func));
    let (inst, mut env) = instantiate(builder.finish());

    // 9 + 9 + 3 + 4 + 400.
    assert_eq!(run_i32(&inst, &mut env, "fill_copy", &[]), Ok(425));
}

#[test]
fn array_new_data_reads_a_passive_segment() {
    let mut builder = ModuleBuilder::new();
    let bytes = builder.push_type(array_type(StorageType::I8));
    builder.push_data(DataSegment {
        active: None,
        bytes: Box::new([10, 20, 30, 40]),
    });
    let arr_local = ValType::Ref(runwasm::RefType {
        nullable: true,
        heap: runwasm::HeapType::Concrete(bytes),
    });
    let ty = builder.push_func_type(FuncType::new([], [ValType::I32]));
    // a = array.new_data(seg 0, offset 1, len 3); return a[0] + a[2]
    let code = Asm::new()
        .i32_const(1)
        .i32_const(3)
        .array_new_data(bytes, 0)
        .local_set(0)
        .local_get(0)
        .i32_const(0)
        .array_get_u(bytes)
        .local_get(0)
        .i32_const(2)
        .array_get_u(bytes)
        .i32_add()
        .finish();
    let func = builder.push_function(ty, vec![arr_local], 16, 2, code);
    builder.export("from_data", Export::Func(func));
    let (inst, mut env) = instantiate(builder.finish());

    assert_eq!(run_i32(&inst, &mut env, "from_data", &[]), Ok(60));
}

#[test]
fn i31_refs_tag_and_extend() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.push_func_type(FuncType::new([ValType::I32, ValType::I32], [ValType::I32]));
    let code = Asm::new()
        .local_get(0)
        .ref_i31()
        .local_get(1)
        .if_i32()
        .i31_get_u()
        .else_()
        .i31_get_s()
        .end()
        .finish();
    let func = builder.push_function(ty, vec![], 16, 4, code);
    builder.export("i31", Export::Func(func));
    let (inst, mut env) = instantiate(builder.finish());

    assert_eq!(
        run_i32(&inst, &mut env, "i31", &[Value::I32(5), Value::I32(0)]),
        Ok(5)
    );
    // 0x7FFF_FFFF is -1 signed in 31 bits, max unsigned.
    assert_eq!(
        run_i32(
            &inst,
            &mut env,
            "i31",
            &[Value::I32(0x7FFF_FFFF), Value::I32(0)]
        ),
        Ok(-1)
    );
    assert_eq!(
        run_i32(
            &inst,
            &mut env,
            "i31",
            &[Value::I32(0x7FFF_FFFF), Value::I32(1)]
        ),
        Ok(0x7FFF_FFFF)
    );
}

#[test]
fn ref_test_distinguishes_heap_kinds() {
    let mut builder = ModuleBuilder::new();
    let point = builder.push_type(struct_type(vec![val_field(ValType::I32)]));
    let ty = builder.push_func_type(FuncType::new([ValType::I32], [ValType::I32]));
    // Build struct or i31 per the argument, ref.test against struct.
    let code = Asm::new()
        .local_get(0)
        .if_i32()
        .i32_const(1)
        .struct_new(point)
        .ref_test(HEAP_STRUCT)
        .else_()
        .i32_const(1)
        .ref_i31()
        .ref_test(HEAP_STRUCT)
        .end()
        .finish();
    let func = builder.push_function(ty, vec![], 16, 4, code);
    builder.export("is_struct", Export::Func(func));

    let eq_code = Asm::new()
        .i32_const(1)
        .ref_i31()
        .ref_test(HEAP_EQ)
        .i32_const(2)
        .i32_mul()
        .i32_const(1)
        .ref_i31()
        .ref_test(HEAP_I31)
        .i32_add()
        .finish();
    let eq_fn = builder.push_function(ty, vec![], 16, 2, eq_code);
    builder.export("eq_and_i31", Export::Func(eq_fn));
    let (inst, mut env) = instantiate(builder.finish());

    assert_eq!(run_i32(&inst, &mut env, "is_struct", &[Value::I32(1)]), Ok(1));
    assert_eq!(run_i32(&inst, &mut env, "is_struct", &[Value::I32(0)]), Ok(0));
    assert_eq!(
        run_i32(&inst, &mut env, "eq_and_i31", &[Value::I32(0)]),
        Ok(3)
    );
}

#[test]
fn ref_cast_traps_on_mismatch() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.push_func_type(FuncType::new([], [ValType::I32]));
    let code = Asm::new()
        .i32_const(1)
        .ref_i31()
        .ref_cast(HEAP_ARRAY)
        .drop()
        .i32_const(0)
        .finish();
    let func = builder.push_function(ty, vec![], 16, 2, code);
    builder.export("bad_cast", Export::Func(func));

    let null_code = Asm::new()
        .ref_null_any()
        .ref_cast(HEAP_ANY)
        .drop()
        .i32_const(0)
        .finish();
    let null_cast = builder.push_function(ty, vec![], 16, 2, null_code);
    builder.export("null_cast", Export::Func(null_cast));
    let (inst, mut env) = instantiate(builder.finish());

    let trap = run_i32(&inst, &mut env, "bad_cast", &[]).unwrap_err();
    assert_eq!(trap.to_string(), "cast failure");
    let trap = run_i32(&inst, &mut env, "null_cast", &[]).unwrap_err();
    assert_eq!(trap.to_string(), "cast failure");
}

#[test]
fn br_on_cast_branches_by_runtime_type() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.push_func_type(FuncType::new([], [ValType::I32]));

    // An i31 tested against i31: the branch carries the reference.
    let hit = Asm::new()
        .block_anyref()
        .i32_const(5)
        .ref_i31()
        .br_on_cast(0, 0, HEAP_ANY, HEAP_I31)
        .drop()
        .ref_null_any()
        .end()
        .ref_test(HEAP_I31)
        .finish();
    let hit = builder.push_function(ty, vec![], 16, 4, hit);
    builder.export("hit", Export::Func(hit));

    // Null against a non-nullable target: falls through.
    let strict = Asm::new()
        .block_anyref()
        .ref_null_any()
        .br_on_cast(0, 0, HEAP_ANY, HEAP_I31)
        .drop()
        .ref_null_any()
        .end()
        .ref_is_null()
        .finish();
    let strict = builder.push_function(ty, vec![], 16, 4, strict);
    builder.export("null_strict", Export::Func(strict));

    // Null against a nullable target: the branch carries the null.
    let nullable = Asm::new()
        .block_anyref()
        .ref_null_any()
        .br_on_cast(0b10, 0, HEAP_ANY, HEAP_I31)
        .drop()
        .i32_const(1)
        .ref_i31()
        .end()
        .ref_is_null()
        .finish();
    let nullable = builder.push_function(ty, vec![], 16, 4, nullable);
    builder.export("null_nullable", Export::Func(nullable));
    let (inst, mut env) = instantiate(builder.finish());

    assert_eq!(run_i32(&inst, &mut env, "hit", &[]), Ok(1));
    assert_eq!(run_i32(&inst, &mut env, "null_strict", &[]), Ok(1));
    assert_eq!(run_i32(&inst, &mut env, "null_nullable", &[]), Ok(1));
}

#[test]
fn extern_conversions_round_trip() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.push_func_type(FuncType::new([ValType::I32], [ValType::I32]));
    let code = Asm::new()
        .local_get(0)
        .ref_i31()
        .extern_convert_any()
        .any_convert_extern()
        .i31_get_u()
        .finish();
    let func = builder.push_function(ty, vec![], 16, 2, code);
    builder.export("round_trip", Export::Func(func));
    let (inst, mut env) = instantiate(builder.finish());

    assert_eq!(
        run_i32(&inst, &mut env, "round_trip", &[Value::I32(123)]),
        Ok(123)
    );
}

#[test]
fn funcrefs_are_identical_across_uses() {
    let mut builder = ModuleBuilder::new();
    let ty = builder.push_func_type(FuncType::new([], [ValType::I32]));
    let probe = builder.push_function(ty, vec![], 8, 2, Asm::new().i32_const(0).finish());
    let code = Asm::new()
        .ref_func(probe)
        .ref_func(probe)
        .ref_eq()
        .finish();
    let func = builder.push_function(ty, vec![], 16, 2, code);
    builder.export("same", Export::Func(func));
    let (inst, mut env) = instantiate(builder.finish());

    assert_eq!(run_i32(&inst, &mut env, "same", &[]), Ok(1));
}
