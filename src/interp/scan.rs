//! Lazy block-boundary discovery.
//!
//! The loader does not precompute block ends; when the interpreter
//! enters a `block`/`if`/`try` whose boundary is not in the per-env
//! block-address cache it linearly scans the code, skipping each
//! instruction's immediates, until the matching `else`/`end`/handler
//! opcode at nesting depth zero.

use super::{leb, opcodes as op};

/// Skips the value-type byte of a `select_t` immediate, which may be
/// a reference type carrying a heap-type LEB.
fn skip_valtype(code: &[u8], ip: &mut usize) -> Option<()> {
    let byte = *code.get(*ip)?;
    *ip += 1;
    if byte == 0x63 || byte == 0x64 {
        leb::skip(code, ip);
    }
    Some(())
}

/// Skips a blocktype: empty, a value type, or an s33 type index.
fn skip_blocktype(code: &[u8], ip: &mut usize) -> Option<()> {
    let byte = *code.get(*ip)?;
    if byte & 0x80 != 0 {
        // Multi-byte s33: a type index past 63.
        leb::skip(code, ip);
        return Some(());
    }
    skip_valtype(code, ip)
}

/// Skips a memarg: alignment (with the optional memory-index flag)
/// followed by the offset.
fn skip_memarg(code: &[u8], ip: &mut usize) -> Option<()> {
    let align = leb::read_u32(code, ip);
    if align & op::OPT_MEMIDX_FLAG != 0 {
        leb::skip(code, ip);
    }
    leb::skip(code, ip);
    Some(())
}

/// Skips the instruction at `ip` (opcode and immediates).
///
/// Returns `None` on opcodes outside the supported instruction set.
fn skip_instr(code: &[u8], ip: &mut usize) -> Option<()> {
    let opcode = *code.get(*ip)?;
    *ip += 1;
    match opcode {
        op::BLOCK | op::LOOP | op::IF | op::TRY => skip_blocktype(code, ip)?,
        op::BR
        | op::BR_IF
        | op::CALL
        | op::RETURN_CALL
        | op::CALL_REF
        | op::RETURN_CALL_REF
        | op::THROW
        | op::RETHROW
        | op::CATCH
        | op::DELEGATE
        | op::LOCAL_GET
        | op::LOCAL_SET
        | op::LOCAL_TEE
        | op::GLOBAL_GET
        | op::GLOBAL_SET
        | op::TABLE_GET
        | op::TABLE_SET
        | op::REF_NULL
        | op::REF_FUNC
        | op::BR_ON_NULL
        | op::BR_ON_NON_NULL
        | op::MEMORY_SIZE
        | op::MEMORY_GROW
        | op::I32_CONST
        | op::I64_CONST => leb::skip(code, ip),
        op::CALL_INDIRECT | op::RETURN_CALL_INDIRECT => {
            leb::skip(code, ip);
            leb::skip(code, ip);
        }
        op::BR_TABLE => {
            let count = leb::read_u32(code, ip);
            for _ in 0..=count {
                leb::skip(code, ip);
            }
        }
        op::SELECT_T => {
            let count = leb::read_u32(code, ip);
            for _ in 0..count {
                skip_valtype(code, ip)?;
            }
        }
        op::F32_CONST => *ip += 4,
        op::F64_CONST => *ip += 8,
        op::I32_LOAD..=op::I64_STORE32 => skip_memarg(code, ip)?,
        op::MISC_PREFIX => {
            let sub = leb::read_u32(code, ip);
            match sub {
                op::misc::I32_TRUNC_SAT_F32_S..=op::misc::I64_TRUNC_SAT_F64_U => {}
                op::misc::MEMORY_INIT
                | op::misc::MEMORY_COPY
                | op::misc::TABLE_INIT
                | op::misc::TABLE_COPY => {
                    leb::skip(code, ip);
                    leb::skip(code, ip);
                }
                op::misc::DATA_DROP
                | op::misc::MEMORY_FILL
                | op::misc::ELEM_DROP
                | op::misc::TABLE_GROW
                | op::misc::TABLE_SIZE
                | op::misc::TABLE_FILL => leb::skip(code, ip),
                _ => return None,
            }
        }
        op::ATOMIC_PREFIX => {
            let sub = leb::read_u32(code, ip);
            match sub {
                op::atomic::FENCE => *ip += 1,
                op::atomic::NOTIFY..=op::atomic::WAIT64
                | op::atomic::I32_LOAD..=op::atomic::RMW_END => skip_memarg(code, ip)?,
                _ => return None,
            }
        }
        op::GC_PREFIX => {
            let sub = leb::read_u32(code, ip);
            match sub {
                op::gc::STRUCT_NEW
                | op::gc::STRUCT_NEW_DEFAULT
                | op::gc::ARRAY_NEW
                | op::gc::ARRAY_NEW_DEFAULT
                | op::gc::ARRAY_GET
                | op::gc::ARRAY_GET_S
                | op::gc::ARRAY_GET_U
                | op::gc::ARRAY_SET
                | op::gc::ARRAY_FILL
                | op::gc::REF_TEST
                | op::gc::REF_TEST_NULLABLE
                | op::gc::REF_CAST
                | op::gc::REF_CAST_NULLABLE => leb::skip(code, ip),
                op::gc::STRUCT_GET
                | op::gc::STRUCT_GET_S
                | op::gc::STRUCT_GET_U
                | op::gc::STRUCT_SET
                | op::gc::ARRAY_NEW_FIXED
                | op::gc::ARRAY_NEW_DATA
                | op::gc::ARRAY_NEW_ELEM
                | op::gc::ARRAY_COPY => {
                    leb::skip(code, ip);
                    leb::skip(code, ip);
                }
                op::gc::ARRAY_LEN
                | op::gc::ANY_CONVERT_EXTERN
                | op::gc::EXTERN_CONVERT_ANY
                | op::gc::REF_I31
                | op::gc::I31_GET_S
                | op::gc::I31_GET_U => {}
                op::gc::BR_ON_CAST | op::gc::BR_ON_CAST_FAIL => {
                    *ip += 1;
                    leb::skip(code, ip);
                    leb::skip(code, ip);
                    leb::skip(code, ip);
                }
                op::gc::STRING_NEW_UTF8
                | op::gc::STRING_NEW_WTF16
                | op::gc::STRING_NEW_LOSSY_UTF8
                | op::gc::STRING_NEW_WTF8
                | op::gc::STRING_CONST
                | op::gc::STRING_ENCODE_UTF8
                | op::gc::STRING_ENCODE_WTF16
                | op::gc::STRING_ENCODE_LOSSY_UTF8
                | op::gc::STRING_ENCODE_WTF8
                | op::gc::STRINGVIEW_WTF8_ENCODE_UTF8
                | op::gc::STRINGVIEW_WTF8_ENCODE_LOSSY_UTF8
                | op::gc::STRINGVIEW_WTF8_ENCODE_WTF8
                | op::gc::STRINGVIEW_WTF16_ENCODE => leb::skip(code, ip),
                op::gc::STRING_MEASURE_UTF8
                | op::gc::STRING_MEASURE_WTF8
                | op::gc::STRING_MEASURE_WTF16
                | op::gc::STRING_CONCAT
                | op::gc::STRING_EQ
                | op::gc::STRING_IS_USV_SEQUENCE
                | op::gc::STRING_AS_WTF8
                | op::gc::STRING_AS_WTF16
                | op::gc::STRING_AS_ITER
                | op::gc::STRINGVIEW_WTF8_ADVANCE
                | op::gc::STRINGVIEW_WTF8_SLICE
                | op::gc::STRINGVIEW_WTF16_LENGTH
                | op::gc::STRINGVIEW_WTF16_GET_CODEUNIT
                | op::gc::STRINGVIEW_WTF16_SLICE
                | op::gc::STRINGVIEW_ITER_NEXT
                | op::gc::STRINGVIEW_ITER_ADVANCE
                | op::gc::STRINGVIEW_ITER_REWIND
                | op::gc::STRINGVIEW_ITER_SLICE => {}
                op::gc::STRING_NEW_UTF8_ARRAY
                | op::gc::STRING_NEW_WTF16_ARRAY
                | op::gc::STRING_ENCODE_UTF8_ARRAY
                | op::gc::STRING_ENCODE_WTF16_ARRAY
                | op::gc::STRING_NEW_LOSSY_UTF8_ARRAY
                | op::gc::STRING_NEW_WTF8_ARRAY
                | op::gc::STRING_ENCODE_LOSSY_UTF8_ARRAY
                | op::gc::STRING_ENCODE_WTF8_ARRAY => {}
                _ => return None,
            }
        }
        op::SIMD_PREFIX => return None,
        // Every remaining supported opcode has no immediates.
        _ => {}
    }
    Some(())
}

/// Scans from `from` (the first opcode after a blocktype) for the
/// matching `end`, recording a depth-zero `else` on the way.
///
/// Returns `(else_addr, end_addr)`, both opcode offsets.
pub(crate) fn find_block_end(code: &[u8], from: usize) -> Option<(Option<usize>, usize)> {
    let mut ip = from;
    let mut depth = 0_u32;
    let mut else_addr = None;
    loop {
        let at = ip;
        let opcode = *code.get(ip)?;
        match opcode {
            op::BLOCK | op::LOOP | op::IF | op::TRY => depth += 1,
            op::ELSE if depth == 0 => else_addr = Some(at),
            op::END => {
                if depth == 0 {
                    return Some((else_addr, at));
                }
                depth -= 1;
            }
            // `delegate` terminates its try block without an `end`.
            op::DELEGATE => {
                if depth == 0 {
                    return Some((else_addr, at));
                }
                depth -= 1;
            }
            _ => {}
        }
        skip_instr(code, &mut ip)?;
    }
}

/// Scans from `from` for the next handler boundary of a `try` body at
/// depth zero: a `catch`, `catch_all`, `delegate` or `end` opcode.
pub(crate) fn next_handler(code: &[u8], from: usize) -> Option<usize> {
    let mut ip = from;
    let mut depth = 0_u32;
    loop {
        let at = ip;
        let opcode = *code.get(ip)?;
        match opcode {
            op::BLOCK | op::LOOP | op::IF | op::TRY => depth += 1,
            op::CATCH | op::CATCH_ALL if depth == 0 => return Some(at),
            op::END => {
                if depth == 0 {
                    return Some(at);
                }
                depth -= 1;
            }
            op::DELEGATE => {
                if depth == 0 {
                    return Some(at);
                }
                depth -= 1;
            }
            _ => {}
        }
        skip_instr(code, &mut ip)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_else_and_end_of_an_if() {
        // if (blocktype empty) i32.const 1 else i32.const 2 end end
        let code = [
            op::IF, 0x40, op::I32_CONST, 1, op::ELSE, op::I32_CONST, 2, op::END, op::END,
        ];
        // Scan starts after the blocktype byte.
        let (else_addr, end_addr) = find_block_end(&code, 2).unwrap();
        assert_eq!(else_addr, Some(4));
        assert_eq!(end_addr, 7);
    }

    #[test]
    fn nesting_is_respected() {
        // block $a block $b end end
        let code = [op::BLOCK, 0x40, op::BLOCK, 0x40, op::END, op::END];
        let (else_addr, end_addr) = find_block_end(&code, 2).unwrap();
        assert_eq!(else_addr, None);
        assert_eq!(end_addr, 5);
    }

    #[test]
    fn immediates_containing_opcode_bytes_are_skipped() {
        // i32.const 0x0B (the `end` byte) must not terminate the scan.
        let code = [op::BLOCK, 0x40, op::I32_CONST, 0x0B, op::END];
        let (_, end_addr) = find_block_end(&code, 2).unwrap();
        assert_eq!(end_addr, 4);
    }

    #[test]
    fn handler_scan_stops_at_catch() {
        // try (empty) nop catch 0 nop end
        let code = [op::TRY, 0x40, op::NOP, op::CATCH, 0, op::NOP, op::END];
        assert_eq!(next_handler(&code, 2), Some(3));
        // Continuing past the catch immediate finds the end.
        assert_eq!(next_handler(&code, 5), Some(6));
    }
}
