//! Shared test support: a small assembler for raw function bodies
//! and helpers to build and instantiate modules.
//!
//! The loader/validator is out of scope for the runtime, so tests
//! assemble WebAssembly binary code directly and provide the
//! validation byproducts (stack and block maxima) by hand.

#![allow(dead_code)]

use runwasm::{Config, ExecEnv, Imports, Module, ModuleInstance, Trap, Value};
use std::sync::Arc;

/// Assembles a raw code stream.
#[derive(Default)]
pub struct Asm {
    bytes: Vec<u8>,
}

impl Asm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.bytes.push(0x0B);
        self.bytes
    }

    pub fn op(mut self, opcode: u8) -> Self {
        self.bytes.push(opcode);
        self
    }

    fn uleb(mut self, mut value: u64) -> Self {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.bytes.push(byte);
                break;
            }
            self.bytes.push(byte | 0x80);
        }
        self
    }

    fn sleb(mut self, mut value: i64) -> Self {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            let sign_clear = byte & 0x40 == 0;
            if (value == 0 && sign_clear) || (value == -1 && !sign_clear) {
                self.bytes.push(byte);
                break;
            }
            self.bytes.push(byte | 0x80);
        }
        self
    }

    // Constants.

    pub fn i32_const(self, value: i32) -> Self {
        self.op(0x41).sleb(value as i64)
    }

    pub fn i64_const(self, value: i64) -> Self {
        self.op(0x42).sleb(value)
    }

    pub fn f32_const(mut self, value: f32) -> Self {
        self.bytes.push(0x43);
        self.bytes.extend_from_slice(&value.to_bits().to_le_bytes());
        self
    }

    pub fn f32_const_bits(mut self, bits: u32) -> Self {
        self.bytes.push(0x43);
        self.bytes.extend_from_slice(&bits.to_le_bytes());
        self
    }

    pub fn f64_const(mut self, value: f64) -> Self {
        self.bytes.push(0x44);
        self.bytes.extend_from_slice(&value.to_bits().to_le_bytes());
        self
    }

    pub fn f64_const_bits(mut self, bits: u64) -> Self {
        self.bytes.push(0x44);
        self.bytes.extend_from_slice(&bits.to_le_bytes());
        self
    }

    // Control.

    pub fn block_void(self) -> Self {
        self.op(0x02).op(0x40)
    }

    pub fn block_i32(self) -> Self {
        self.op(0x02).op(0x7F)
    }

    pub fn block_anyref(self) -> Self {
        self.op(0x02).op(0x6E)
    }

    pub fn loop_void(self) -> Self {
        self.op(0x03).op(0x40)
    }

    pub fn if_void(self) -> Self {
        self.op(0x04).op(0x40)
    }

    pub fn if_i32(self) -> Self {
        self.op(0x04).op(0x7F)
    }

    pub fn else_(self) -> Self {
        self.op(0x05)
    }

    pub fn end(self) -> Self {
        self.op(0x0B)
    }

    pub fn br(self, depth: u32) -> Self {
        self.op(0x0C).uleb(depth.into())
    }

    pub fn br_if(self, depth: u32) -> Self {
        self.op(0x0D).uleb(depth.into())
    }

    pub fn br_table(self, depths: &[u32], default: u32) -> Self {
        let mut asm = self.op(0x0E).uleb(depths.len() as u64);
        for depth in depths {
            asm = asm.uleb((*depth).into());
        }
        asm.uleb(default.into())
    }

    pub fn ret(self) -> Self {
        self.op(0x0F)
    }

    pub fn call(self, func: u32) -> Self {
        self.op(0x10).uleb(func.into())
    }

    pub fn call_indirect(self, type_idx: u32, table: u32) -> Self {
        self.op(0x11).uleb(type_idx.into()).uleb(table.into())
    }

    pub fn return_call(self, func: u32) -> Self {
        self.op(0x12).uleb(func.into())
    }

    pub fn return_call_indirect(self, type_idx: u32, table: u32) -> Self {
        self.op(0x13).uleb(type_idx.into()).uleb(table.into())
    }

    pub fn call_ref(self, type_idx: u32) -> Self {
        self.op(0x14).uleb(type_idx.into())
    }

    pub fn unreachable(self) -> Self {
        self.op(0x00)
    }

    // Exception handling.

    pub fn try_void(self) -> Self {
        self.op(0x06).op(0x40)
    }

    pub fn catch(self, tag: u32) -> Self {
        self.op(0x07).uleb(tag.into())
    }

    pub fn catch_all(self) -> Self {
        self.op(0x19)
    }

    pub fn throw(self, tag: u32) -> Self {
        self.op(0x08).uleb(tag.into())
    }

    pub fn rethrow(self, depth: u32) -> Self {
        self.op(0x09).uleb(depth.into())
    }

    pub fn delegate(self, depth: u32) -> Self {
        self.op(0x18).uleb(depth.into())
    }

    // Parametric.

    pub fn drop(self) -> Self {
        self.op(0x1A)
    }

    pub fn drop64(self) -> Self {
        self.op(0x1D)
    }

    pub fn select(self) -> Self {
        self.op(0x1B)
    }

    // Variables.

    pub fn local_get(self, idx: u32) -> Self {
        self.op(0x20).uleb(idx.into())
    }

    pub fn local_set(self, idx: u32) -> Self {
        self.op(0x21).uleb(idx.into())
    }

    pub fn local_tee(self, idx: u32) -> Self {
        self.op(0x22).uleb(idx.into())
    }

    pub fn global_get(self, idx: u32) -> Self {
        self.op(0x23).uleb(idx.into())
    }

    pub fn global_set(self, idx: u32) -> Self {
        self.op(0x24).uleb(idx.into())
    }

    pub fn table_get(self, table: u32) -> Self {
        self.op(0x25).uleb(table.into())
    }

    pub fn table_set(self, table: u32) -> Self {
        self.op(0x26).uleb(table.into())
    }

    // Memory.

    fn memarg(self, align: u32, offset: u64) -> Self {
        self.uleb(align.into()).uleb(offset)
    }

    pub fn i32_load(self, offset: u64) -> Self {
        self.op(0x28).memarg(2, offset)
    }

    pub fn i64_load(self, offset: u64) -> Self {
        self.op(0x29).memarg(3, offset)
    }

    pub fn f64_load(self, offset: u64) -> Self {
        self.op(0x2B).memarg(3, offset)
    }

    pub fn i32_load8_u(self, offset: u64) -> Self {
        self.op(0x2D).memarg(0, offset)
    }

    pub fn i32_load16_s(self, offset: u64) -> Self {
        self.op(0x2E).memarg(1, offset)
    }

    pub fn i32_store(self, offset: u64) -> Self {
        self.op(0x36).memarg(2, offset)
    }

    pub fn i64_store(self, offset: u64) -> Self {
        self.op(0x37).memarg(3, offset)
    }

    pub fn i32_store8(self, offset: u64) -> Self {
        self.op(0x3A).memarg(0, offset)
    }

    pub fn memory_size(self) -> Self {
        self.op(0x3F).uleb(0)
    }

    pub fn memory_grow(self) -> Self {
        self.op(0x40).uleb(0)
    }

    // Misc prefix.

    fn misc(self, sub: u32) -> Self {
        self.op(0xFC).uleb(sub.into())
    }

    pub fn i32_trunc_sat_f32_s(self) -> Self {
        self.misc(0)
    }

    pub fn i32_trunc_sat_f64_u(self) -> Self {
        self.misc(3)
    }

    pub fn i64_trunc_sat_f64_s(self) -> Self {
        self.misc(6)
    }

    pub fn memory_init(self, seg: u32) -> Self {
        self.misc(8).uleb(seg.into()).uleb(0)
    }

    pub fn data_drop(self, seg: u32) -> Self {
        self.misc(9).uleb(seg.into())
    }

    pub fn memory_copy(self) -> Self {
        self.misc(10).uleb(0).uleb(0)
    }

    pub fn memory_fill(self) -> Self {
        self.misc(11).uleb(0)
    }

    pub fn table_init(self, seg: u32, table: u32) -> Self {
        self.misc(12).uleb(seg.into()).uleb(table.into())
    }

    pub fn elem_drop(self, seg: u32) -> Self {
        self.misc(13).uleb(seg.into())
    }

    pub fn table_copy(self, dst: u32, src: u32) -> Self {
        self.misc(14).uleb(dst.into()).uleb(src.into())
    }

    pub fn table_grow(self, table: u32) -> Self {
        self.misc(15).uleb(table.into())
    }

    pub fn table_size(self, table: u32) -> Self {
        self.misc(16).uleb(table.into())
    }

    pub fn table_fill(self, table: u32) -> Self {
        self.misc(17).uleb(table.into())
    }

    // Atomic prefix.

    fn atomic(self, sub: u32, align: u32, offset: u64) -> Self {
        self.op(0xFE).uleb(sub.into()).memarg(align, offset)
    }

    pub fn atomic_notify(self, offset: u64) -> Self {
        self.atomic(0x00, 2, offset)
    }

    pub fn atomic_wait32(self, offset: u64) -> Self {
        self.atomic(0x01, 2, offset)
    }

    pub fn atomic_fence(self) -> Self {
        self.op(0xFE).uleb(0x03).op(0x00)
    }

    pub fn i32_atomic_load(self, offset: u64) -> Self {
        self.atomic(0x10, 2, offset)
    }

    pub fn i32_atomic_store(self, offset: u64) -> Self {
        self.atomic(0x17, 2, offset)
    }

    pub fn i32_atomic_rmw_add(self, offset: u64) -> Self {
        self.atomic(0x1E, 2, offset)
    }

    pub fn i64_atomic_rmw_add(self, offset: u64) -> Self {
        self.atomic(0x1F, 3, offset)
    }

    pub fn i32_atomic_rmw8_add_u(self, offset: u64) -> Self {
        self.atomic(0x20, 0, offset)
    }

    pub fn i32_atomic_rmw_xchg(self, offset: u64) -> Self {
        self.atomic(0x41, 2, offset)
    }

    pub fn i32_atomic_rmw_cmpxchg(self, offset: u64) -> Self {
        self.atomic(0x48, 2, offset)
    }

    // References.

    pub fn ref_null_func(self) -> Self {
        self.op(0xD0).sleb(-16)
    }

    pub fn ref_null_any(self) -> Self {
        self.op(0xD0).sleb(-18)
    }

    pub fn ref_is_null(self) -> Self {
        self.op(0xD1)
    }

    pub fn ref_func(self, func: u32) -> Self {
        self.op(0xD2).uleb(func.into())
    }

    pub fn ref_eq(self) -> Self {
        self.op(0xD3)
    }

    pub fn ref_as_non_null(self) -> Self {
        self.op(0xD4)
    }

    pub fn br_on_null(self, depth: u32) -> Self {
        self.op(0xD5).uleb(depth.into())
    }

    // GC prefix.

    fn gc(self, sub: u32) -> Self {
        self.op(0xFB).uleb(sub.into())
    }

    pub fn struct_new(self, type_idx: u32) -> Self {
        self.gc(0).uleb(type_idx.into())
    }

    pub fn struct_new_default(self, type_idx: u32) -> Self {
        self.gc(1).uleb(type_idx.into())
    }

    pub fn struct_get(self, type_idx: u32, field: u32) -> Self {
        self.gc(2).uleb(type_idx.into()).uleb(field.into())
    }

    pub fn struct_get_s(self, type_idx: u32, field: u32) -> Self {
        self.gc(3).uleb(type_idx.into()).uleb(field.into())
    }

    pub fn struct_get_u(self, type_idx: u32, field: u32) -> Self {
        self.gc(4).uleb(type_idx.into()).uleb(field.into())
    }

    pub fn struct_set(self, type_idx: u32, field: u32) -> Self {
        self.gc(5).uleb(type_idx.into()).uleb(field.into())
    }

    pub fn array_new(self, type_idx: u32) -> Self {
        self.gc(6).uleb(type_idx.into())
    }

    pub fn array_new_fixed(self, type_idx: u32, len: u32) -> Self {
        self.gc(8).uleb(type_idx.into()).uleb(len.into())
    }

    pub fn array_new_data(self, type_idx: u32, seg: u32) -> Self {
        self.gc(9).uleb(type_idx.into()).uleb(seg.into())
    }

    pub fn array_get(self, type_idx: u32) -> Self {
        self.gc(11).uleb(type_idx.into())
    }

    pub fn array_get_u(self, type_idx: u32) -> Self {
        self.gc(13).uleb(type_idx.into())
    }

    pub fn array_set(self, type_idx: u32) -> Self {
        self.gc(14).uleb(type_idx.into())
    }

    pub fn array_len(self) -> Self {
        self.gc(15)
    }

    pub fn array_fill(self, type_idx: u32) -> Self {
        self.gc(16).uleb(type_idx.into())
    }

    pub fn array_copy(self, dst_type: u32, src_type: u32) -> Self {
        self.gc(17).uleb(dst_type.into()).uleb(src_type.into())
    }

    pub fn ref_test(self, heap: i64) -> Self {
        self.gc(20).sleb(heap)
    }

    pub fn ref_test_nullable(self, heap: i64) -> Self {
        self.gc(21).sleb(heap)
    }

    pub fn ref_cast(self, heap: i64) -> Self {
        self.gc(22).sleb(heap)
    }

    pub fn br_on_cast(self, flags: u8, depth: u32, src: i64, dst: i64) -> Self {
        self.gc(24).op(flags).uleb(depth.into()).sleb(src).sleb(dst)
    }

    pub fn br_on_cast_fail(self, flags: u8, depth: u32, src: i64, dst: i64) -> Self {
        self.gc(25).op(flags).uleb(depth.into()).sleb(src).sleb(dst)
    }

    pub fn any_convert_extern(self) -> Self {
        self.gc(26)
    }

    pub fn extern_convert_any(self) -> Self {
        self.gc(27)
    }

    pub fn ref_i31(self) -> Self {
        self.gc(28)
    }

    pub fn i31_get_s(self) -> Self {
        self.gc(29)
    }

    pub fn i31_get_u(self) -> Self {
        self.gc(30)
    }

    // Stringref (gc prefix, 0x80+).

    pub fn string_new_utf8(self) -> Self {
        self.gc(0x80).uleb(0)
    }

    pub fn string_const(self, literal: u32) -> Self {
        self.gc(0x82).uleb(literal.into())
    }

    pub fn string_measure_utf8(self) -> Self {
        self.gc(0x83)
    }

    pub fn string_measure_wtf16(self) -> Self {
        self.gc(0x85)
    }

    pub fn string_encode_utf8(self) -> Self {
        self.gc(0x86).uleb(0)
    }

    pub fn string_encode_lossy_utf8(self) -> Self {
        self.gc(0x8D).uleb(0)
    }

    pub fn string_concat(self) -> Self {
        self.gc(0x88)
    }

    pub fn string_eq(self) -> Self {
        self.gc(0x89)
    }

    pub fn string_is_usv_sequence(self) -> Self {
        self.gc(0x8A)
    }

    pub fn string_as_wtf16(self) -> Self {
        self.gc(0x98)
    }

    pub fn stringview_wtf16_length(self) -> Self {
        self.gc(0x99)
    }

    pub fn stringview_wtf16_get_codeunit(self) -> Self {
        self.gc(0x9A)
    }

    pub fn string_as_iter(self) -> Self {
        self.gc(0xA0)
    }

    pub fn stringview_iter_next(self) -> Self {
        self.gc(0xA1)
    }

    pub fn stringview_iter_advance(self) -> Self {
        self.gc(0xA2)
    }

    // Numeric helpers used across the suites.

    pub fn i32_eqz(self) -> Self {
        self.op(0x45)
    }

    pub fn i32_eq(self) -> Self {
        self.op(0x46)
    }

    pub fn i32_lt_s(self) -> Self {
        self.op(0x48)
    }

    pub fn i32_add(self) -> Self {
        self.op(0x6A)
    }

    pub fn i32_sub(self) -> Self {
        self.op(0x6B)
    }

    pub fn i32_mul(self) -> Self {
        self.op(0x6C)
    }

    pub fn i32_div_s(self) -> Self {
        self.op(0x6D)
    }

    pub fn i32_rem_s(self) -> Self {
        self.op(0x6F)
    }

    pub fn i32_shl(self) -> Self {
        self.op(0x74)
    }

    pub fn i32_rotl(self) -> Self {
        self.op(0x77)
    }

    pub fn i64_add(self) -> Self {
        self.op(0x7C)
    }

    pub fn i64_mul(self) -> Self {
        self.op(0x7E)
    }

    pub fn f32_add(self) -> Self {
        self.op(0x92)
    }

    pub fn f32_min(self) -> Self {
        self.op(0x96)
    }

    pub fn f64_add(self) -> Self {
        self.op(0xA0)
    }

    pub fn f64_max(self) -> Self {
        self.op(0xA5)
    }

    pub fn f64_copysign(self) -> Self {
        self.op(0xA6)
    }

    pub fn i32_trunc_f32_s(self) -> Self {
        self.op(0xA8)
    }

    pub fn i64_extend_i32_s(self) -> Self {
        self.op(0xAC)
    }

    pub fn i32_wrap_i64(self) -> Self {
        self.op(0xA7)
    }

    pub fn f64_promote_f32(self) -> Self {
        self.op(0xBB)
    }

    pub fn i32_extend8_s(self) -> Self {
        self.op(0xC0)
    }
}

/// Instantiates `module` with no imports and a default environment.
pub fn instantiate(module: Module) -> (ModuleInstance, ExecEnv) {
    instantiate_with(module, &Imports::new())
}

/// Instantiates `module` against `imports`.
pub fn instantiate_with(module: Module, imports: &Imports) -> (ModuleInstance, ExecEnv) {
    let instance =
        ModuleInstance::instantiate(Arc::new(module), imports).expect("instantiation failed");
    let env = ExecEnv::new(&Config::default());
    (instance, env)
}

/// Invokes export `name` and expects a single `i32` result.
pub fn run_i32(
    inst: &ModuleInstance,
    env: &mut ExecEnv,
    name: &str,
    args: &[Value],
) -> Result<i32, Trap> {
    let results = runwasm::invoke(inst, env, name, args)?;
    match results.as_slice() {
        [Value::I32(value)] => Ok(*value),
        other => panic!("expected a single i32 result, got {other:?}"),
    }
}
