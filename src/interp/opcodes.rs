//! Opcode byte values of the WebAssembly binary encoding.
//!
//! Plain bytes rather than an enum: the dispatcher decodes a raw code
//! stream and matches on these constants directly.
//!
//! The loader resolves the width-ambiguous untyped `drop`/`select`
//! opcodes against validation results and emits [`DROP_64`] and
//! [`SELECT_64`] (bytes unused by the standard encoding) for the
//! two-cell forms.

#![allow(missing_docs)]

// Control instructions.
pub const UNREACHABLE: u8 = 0x00;
pub const NOP: u8 = 0x01;
pub const BLOCK: u8 = 0x02;
pub const LOOP: u8 = 0x03;
pub const IF: u8 = 0x04;
pub const ELSE: u8 = 0x05;
pub const TRY: u8 = 0x06;
pub const CATCH: u8 = 0x07;
pub const THROW: u8 = 0x08;
pub const RETHROW: u8 = 0x09;
pub const END: u8 = 0x0B;
pub const BR: u8 = 0x0C;
pub const BR_IF: u8 = 0x0D;
pub const BR_TABLE: u8 = 0x0E;
pub const RETURN: u8 = 0x0F;
pub const CALL: u8 = 0x10;
pub const CALL_INDIRECT: u8 = 0x11;
pub const RETURN_CALL: u8 = 0x12;
pub const RETURN_CALL_INDIRECT: u8 = 0x13;
pub const CALL_REF: u8 = 0x14;
pub const RETURN_CALL_REF: u8 = 0x15;
pub const DELEGATE: u8 = 0x18;
pub const CATCH_ALL: u8 = 0x19;

// Parametric instructions.
pub const DROP: u8 = 0x1A;
pub const SELECT: u8 = 0x1B;
pub const SELECT_T: u8 = 0x1C;
/// Loader-resolved two-cell `drop`.
pub const DROP_64: u8 = 0x1D;
/// Loader-resolved two-cell `select`.
pub const SELECT_64: u8 = 0x1E;

// Variable instructions.
pub const LOCAL_GET: u8 = 0x20;
pub const LOCAL_SET: u8 = 0x21;
pub const LOCAL_TEE: u8 = 0x22;
pub const GLOBAL_GET: u8 = 0x23;
pub const GLOBAL_SET: u8 = 0x24;
pub const TABLE_GET: u8 = 0x25;
pub const TABLE_SET: u8 = 0x26;

// Memory instructions.
pub const I32_LOAD: u8 = 0x28;
pub const I64_LOAD: u8 = 0x29;
pub const F32_LOAD: u8 = 0x2A;
pub const F64_LOAD: u8 = 0x2B;
pub const I32_LOAD8_S: u8 = 0x2C;
pub const I32_LOAD8_U: u8 = 0x2D;
pub const I32_LOAD16_S: u8 = 0x2E;
pub const I32_LOAD16_U: u8 = 0x2F;
pub const I64_LOAD8_S: u8 = 0x30;
pub const I64_LOAD8_U: u8 = 0x31;
pub const I64_LOAD16_S: u8 = 0x32;
pub const I64_LOAD16_U: u8 = 0x33;
pub const I64_LOAD32_S: u8 = 0x34;
pub const I64_LOAD32_U: u8 = 0x35;
pub const I32_STORE: u8 = 0x36;
pub const I64_STORE: u8 = 0x37;
pub const F32_STORE: u8 = 0x38;
pub const F64_STORE: u8 = 0x39;
pub const I32_STORE8: u8 = 0x3A;
pub const I32_STORE16: u8 = 0x3B;
pub const I64_STORE8: u8 = 0x3C;
pub const I64_STORE16: u8 = 0x3D;
pub const I64_STORE32: u8 = 0x3E;
pub const MEMORY_SIZE: u8 = 0x3F;
pub const MEMORY_GROW: u8 = 0x40;

// Numeric instructions.
pub const I32_CONST: u8 = 0x41;
pub const I64_CONST: u8 = 0x42;
pub const F32_CONST: u8 = 0x43;
pub const F64_CONST: u8 = 0x44;

pub const I32_EQZ: u8 = 0x45;
pub const I32_EQ: u8 = 0x46;
pub const I32_NE: u8 = 0x47;
pub const I32_LT_S: u8 = 0x48;
pub const I32_LT_U: u8 = 0x49;
pub const I32_GT_S: u8 = 0x4A;
pub const I32_GT_U: u8 = 0x4B;
pub const I32_LE_S: u8 = 0x4C;
pub const I32_LE_U: u8 = 0x4D;
pub const I32_GE_S: u8 = 0x4E;
pub const I32_GE_U: u8 = 0x4F;
pub const I64_EQZ: u8 = 0x50;
pub const I64_EQ: u8 = 0x51;
pub const I64_NE: u8 = 0x52;
pub const I64_LT_S: u8 = 0x53;
pub const I64_LT_U: u8 = 0x54;
pub const I64_GT_S: u8 = 0x55;
pub const I64_GT_U: u8 = 0x56;
pub const I64_LE_S: u8 = 0x57;
pub const I64_LE_U: u8 = 0x58;
pub const I64_GE_S: u8 = 0x59;
pub const I64_GE_U: u8 = 0x5A;
pub const F32_EQ: u8 = 0x5B;
pub const F32_NE: u8 = 0x5C;
pub const F32_LT: u8 = 0x5D;
pub const F32_GT: u8 = 0x5E;
pub const F32_LE: u8 = 0x5F;
pub const F32_GE: u8 = 0x60;
pub const F64_EQ: u8 = 0x61;
pub const F64_NE: u8 = 0x62;
pub const F64_LT: u8 = 0x63;
pub const F64_GT: u8 = 0x64;
pub const F64_LE: u8 = 0x65;
pub const F64_GE: u8 = 0x66;

pub const I32_CLZ: u8 = 0x67;
pub const I32_CTZ: u8 = 0x68;
pub const I32_POPCNT: u8 = 0x69;
pub const I32_ADD: u8 = 0x6A;
pub const I32_SUB: u8 = 0x6B;
pub const I32_MUL: u8 = 0x6C;
pub const I32_DIV_S: u8 = 0x6D;
pub const I32_DIV_U: u8 = 0x6E;
pub const I32_REM_S: u8 = 0x6F;
pub const I32_REM_U: u8 = 0x70;
pub const I32_AND: u8 = 0x71;
pub const I32_OR: u8 = 0x72;
pub const I32_XOR: u8 = 0x73;
pub const I32_SHL: u8 = 0x74;
pub const I32_SHR_S: u8 = 0x75;
pub const I32_SHR_U: u8 = 0x76;
pub const I32_ROTL: u8 = 0x77;
pub const I32_ROTR: u8 = 0x78;
pub const I64_CLZ: u8 = 0x79;
pub const I64_CTZ: u8 = 0x7A;
pub const I64_POPCNT: u8 = 0x7B;
pub const I64_ADD: u8 = 0x7C;
pub const I64_SUB: u8 = 0x7D;
pub const I64_MUL: u8 = 0x7E;
pub const I64_DIV_S: u8 = 0x7F;
pub const I64_DIV_U: u8 = 0x80;
pub const I64_REM_S: u8 = 0x81;
pub const I64_REM_U: u8 = 0x82;
pub const I64_AND: u8 = 0x83;
pub const I64_OR: u8 = 0x84;
pub const I64_XOR: u8 = 0x85;
pub const I64_SHL: u8 = 0x86;
pub const I64_SHR_S: u8 = 0x87;
pub const I64_SHR_U: u8 = 0x88;
pub const I64_ROTL: u8 = 0x89;
pub const I64_ROTR: u8 = 0x8A;
pub const F32_ABS: u8 = 0x8B;
pub const F32_NEG: u8 = 0x8C;
pub const F32_CEIL: u8 = 0x8D;
pub const F32_FLOOR: u8 = 0x8E;
pub const F32_TRUNC: u8 = 0x8F;
pub const F32_NEAREST: u8 = 0x90;
pub const F32_SQRT: u8 = 0x91;
pub const F32_ADD: u8 = 0x92;
pub const F32_SUB: u8 = 0x93;
pub const F32_MUL: u8 = 0x94;
pub const F32_DIV: u8 = 0x95;
pub const F32_MIN: u8 = 0x96;
pub const F32_MAX: u8 = 0x97;
pub const F32_COPYSIGN: u8 = 0x98;
pub const F64_ABS: u8 = 0x99;
pub const F64_NEG: u8 = 0x9A;
pub const F64_CEIL: u8 = 0x9B;
pub const F64_FLOOR: u8 = 0x9C;
pub const F64_TRUNC: u8 = 0x9D;
pub const F64_NEAREST: u8 = 0x9E;
pub const F64_SQRT: u8 = 0x9F;
pub const F64_ADD: u8 = 0xA0;
pub const F64_SUB: u8 = 0xA1;
pub const F64_MUL: u8 = 0xA2;
pub const F64_DIV: u8 = 0xA3;
pub const F64_MIN: u8 = 0xA4;
pub const F64_MAX: u8 = 0xA5;
pub const F64_COPYSIGN: u8 = 0xA6;

pub const I32_WRAP_I64: u8 = 0xA7;
pub const I32_TRUNC_F32_S: u8 = 0xA8;
pub const I32_TRUNC_F32_U: u8 = 0xA9;
pub const I32_TRUNC_F64_S: u8 = 0xAA;
pub const I32_TRUNC_F64_U: u8 = 0xAB;
pub const I64_EXTEND_I32_S: u8 = 0xAC;
pub const I64_EXTEND_I32_U: u8 = 0xAD;
pub const I64_TRUNC_F32_S: u8 = 0xAE;
pub const I64_TRUNC_F32_U: u8 = 0xAF;
pub const I64_TRUNC_F64_S: u8 = 0xB0;
pub const I64_TRUNC_F64_U: u8 = 0xB1;
pub const F32_CONVERT_I32_S: u8 = 0xB2;
pub const F32_CONVERT_I32_U: u8 = 0xB3;
pub const F32_CONVERT_I64_S: u8 = 0xB4;
pub const F32_CONVERT_I64_U: u8 = 0xB5;
pub const F32_DEMOTE_F64: u8 = 0xB6;
pub const F64_CONVERT_I32_S: u8 = 0xB7;
pub const F64_CONVERT_I32_U: u8 = 0xB8;
pub const F64_CONVERT_I64_S: u8 = 0xB9;
pub const F64_CONVERT_I64_U: u8 = 0xBA;
pub const F64_PROMOTE_F32: u8 = 0xBB;
pub const I32_REINTERPRET_F32: u8 = 0xBC;
pub const I64_REINTERPRET_F64: u8 = 0xBD;
pub const F32_REINTERPRET_I32: u8 = 0xBE;
pub const F64_REINTERPRET_I64: u8 = 0xBF;

pub const I32_EXTEND8_S: u8 = 0xC0;
pub const I32_EXTEND16_S: u8 = 0xC1;
pub const I64_EXTEND8_S: u8 = 0xC2;
pub const I64_EXTEND16_S: u8 = 0xC3;
pub const I64_EXTEND32_S: u8 = 0xC4;

// Reference instructions.
pub const REF_NULL: u8 = 0xD0;
pub const REF_IS_NULL: u8 = 0xD1;
pub const REF_FUNC: u8 = 0xD2;
pub const REF_EQ: u8 = 0xD3;
pub const REF_AS_NON_NULL: u8 = 0xD4;
pub const BR_ON_NULL: u8 = 0xD5;
pub const BR_ON_NON_NULL: u8 = 0xD6;

// Prefix bytes.
pub const GC_PREFIX: u8 = 0xFB;
pub const MISC_PREFIX: u8 = 0xFC;
pub const SIMD_PREFIX: u8 = 0xFD;
pub const ATOMIC_PREFIX: u8 = 0xFE;

/// Sub-opcodes of the `0xFC` misc prefix.
pub mod misc {
    pub const I32_TRUNC_SAT_F32_S: u32 = 0;
    pub const I32_TRUNC_SAT_F32_U: u32 = 1;
    pub const I32_TRUNC_SAT_F64_S: u32 = 2;
    pub const I32_TRUNC_SAT_F64_U: u32 = 3;
    pub const I64_TRUNC_SAT_F32_S: u32 = 4;
    pub const I64_TRUNC_SAT_F32_U: u32 = 5;
    pub const I64_TRUNC_SAT_F64_S: u32 = 6;
    pub const I64_TRUNC_SAT_F64_U: u32 = 7;
    pub const MEMORY_INIT: u32 = 8;
    pub const DATA_DROP: u32 = 9;
    pub const MEMORY_COPY: u32 = 10;
    pub const MEMORY_FILL: u32 = 11;
    pub const TABLE_INIT: u32 = 12;
    pub const ELEM_DROP: u32 = 13;
    pub const TABLE_COPY: u32 = 14;
    pub const TABLE_GROW: u32 = 15;
    pub const TABLE_SIZE: u32 = 16;
    pub const TABLE_FILL: u32 = 17;
}

/// Sub-opcodes of the `0xFE` atomic prefix.
pub mod atomic {
    pub const NOTIFY: u32 = 0x00;
    pub const WAIT32: u32 = 0x01;
    pub const WAIT64: u32 = 0x02;
    pub const FENCE: u32 = 0x03;

    pub const I32_LOAD: u32 = 0x10;
    pub const I64_LOAD: u32 = 0x11;
    pub const I32_LOAD8_U: u32 = 0x12;
    pub const I32_LOAD16_U: u32 = 0x13;
    pub const I64_LOAD8_U: u32 = 0x14;
    pub const I64_LOAD16_U: u32 = 0x15;
    pub const I64_LOAD32_U: u32 = 0x16;
    pub const I32_STORE: u32 = 0x17;
    pub const I64_STORE: u32 = 0x18;
    pub const I32_STORE8: u32 = 0x19;
    pub const I32_STORE16: u32 = 0x1A;
    pub const I64_STORE8: u32 = 0x1B;
    pub const I64_STORE16: u32 = 0x1C;
    pub const I64_STORE32: u32 = 0x1D;

    // Read-modify-write groups: 7 widths each, in the fixed order
    // i32, i64, i32_8u, i32_16u, i64_8u, i64_16u, i64_32u.
    pub const RMW_ADD_BASE: u32 = 0x1E;
    pub const RMW_SUB_BASE: u32 = 0x25;
    pub const RMW_AND_BASE: u32 = 0x2C;
    pub const RMW_OR_BASE: u32 = 0x33;
    pub const RMW_XOR_BASE: u32 = 0x3A;
    pub const RMW_XCHG_BASE: u32 = 0x41;
    pub const RMW_CMPXCHG_BASE: u32 = 0x48;
    pub const RMW_END: u32 = 0x4E;
}

/// Sub-opcodes of the `0xFB` gc prefix.
pub mod gc {
    pub const STRUCT_NEW: u32 = 0;
    pub const STRUCT_NEW_DEFAULT: u32 = 1;
    pub const STRUCT_GET: u32 = 2;
    pub const STRUCT_GET_S: u32 = 3;
    pub const STRUCT_GET_U: u32 = 4;
    pub const STRUCT_SET: u32 = 5;
    pub const ARRAY_NEW: u32 = 6;
    pub const ARRAY_NEW_DEFAULT: u32 = 7;
    pub const ARRAY_NEW_FIXED: u32 = 8;
    pub const ARRAY_NEW_DATA: u32 = 9;
    pub const ARRAY_NEW_ELEM: u32 = 10;
    pub const ARRAY_GET: u32 = 11;
    pub const ARRAY_GET_S: u32 = 12;
    pub const ARRAY_GET_U: u32 = 13;
    pub const ARRAY_SET: u32 = 14;
    pub const ARRAY_LEN: u32 = 15;
    pub const ARRAY_FILL: u32 = 16;
    pub const ARRAY_COPY: u32 = 17;
    pub const REF_TEST: u32 = 20;
    pub const REF_TEST_NULLABLE: u32 = 21;
    pub const REF_CAST: u32 = 22;
    pub const REF_CAST_NULLABLE: u32 = 23;
    pub const BR_ON_CAST: u32 = 24;
    pub const BR_ON_CAST_FAIL: u32 = 25;
    pub const ANY_CONVERT_EXTERN: u32 = 26;
    pub const EXTERN_CONVERT_ANY: u32 = 27;
    pub const REF_I31: u32 = 28;
    pub const I31_GET_S: u32 = 29;
    pub const I31_GET_U: u32 = 30;

    // Stringref sub-opcodes share the gc prefix from 0x80 up.
    pub const STRING_NEW_UTF8: u32 = 0x80;
    pub const STRING_NEW_WTF16: u32 = 0x81;
    pub const STRING_CONST: u32 = 0x82;
    pub const STRING_MEASURE_UTF8: u32 = 0x83;
    pub const STRING_MEASURE_WTF8: u32 = 0x84;
    pub const STRING_MEASURE_WTF16: u32 = 0x85;
    pub const STRING_ENCODE_UTF8: u32 = 0x86;
    pub const STRING_ENCODE_WTF16: u32 = 0x87;
    pub const STRING_CONCAT: u32 = 0x88;
    pub const STRING_EQ: u32 = 0x89;
    pub const STRING_IS_USV_SEQUENCE: u32 = 0x8A;
    pub const STRING_NEW_LOSSY_UTF8: u32 = 0x8B;
    pub const STRING_NEW_WTF8: u32 = 0x8C;
    pub const STRING_ENCODE_LOSSY_UTF8: u32 = 0x8D;
    pub const STRING_ENCODE_WTF8: u32 = 0x8E;
    pub const STRING_AS_WTF8: u32 = 0x90;
    pub const STRINGVIEW_WTF8_ADVANCE: u32 = 0x91;
    pub const STRINGVIEW_WTF8_ENCODE_UTF8: u32 = 0x92;
    pub const STRINGVIEW_WTF8_SLICE: u32 = 0x93;
    pub const STRINGVIEW_WTF8_ENCODE_LOSSY_UTF8: u32 = 0x94;
    pub const STRINGVIEW_WTF8_ENCODE_WTF8: u32 = 0x95;
    pub const STRING_AS_WTF16: u32 = 0x98;
    pub const STRINGVIEW_WTF16_LENGTH: u32 = 0x99;
    pub const STRINGVIEW_WTF16_GET_CODEUNIT: u32 = 0x9A;
    pub const STRINGVIEW_WTF16_ENCODE: u32 = 0x9B;
    pub const STRINGVIEW_WTF16_SLICE: u32 = 0x9C;
    pub const STRING_AS_ITER: u32 = 0xA0;
    pub const STRINGVIEW_ITER_NEXT: u32 = 0xA1;
    pub const STRINGVIEW_ITER_ADVANCE: u32 = 0xA2;
    pub const STRINGVIEW_ITER_REWIND: u32 = 0xA3;
    pub const STRINGVIEW_ITER_SLICE: u32 = 0xA4;
    pub const STRING_NEW_UTF8_ARRAY: u32 = 0xB0;
    pub const STRING_NEW_WTF16_ARRAY: u32 = 0xB1;
    pub const STRING_ENCODE_UTF8_ARRAY: u32 = 0xB2;
    pub const STRING_ENCODE_WTF16_ARRAY: u32 = 0xB3;
    pub const STRING_NEW_LOSSY_UTF8_ARRAY: u32 = 0xB4;
    pub const STRING_NEW_WTF8_ARRAY: u32 = 0xB5;
    pub const STRING_ENCODE_LOSSY_UTF8_ARRAY: u32 = 0xB6;
    pub const STRING_ENCODE_WTF8_ARRAY: u32 = 0xB7;
}

/// Memarg alignment bit signalling a following memory-index LEB in
/// multi-memory modules.
pub const OPT_MEMIDX_FLAG: u32 = 1 << 6;
