//! Core primitives of the runwasm WebAssembly interpreter.
//!
//! This crate knows nothing about modules, stores or execution state.
//! It provides the trap model, NaN-preserving float wrappers, the
//! numeric conversion and operation traits with WebAssembly semantics,
//! and little-endian load/store helpers over raw byte slices.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod host_error;
mod memory;
mod nan_preserving_float;
mod trap;
mod value;

pub use self::{
    host_error::HostError,
    memory::{
        effective_address,
        load,
        load_at,
        load_extend,
        load_extend_at,
        store,
        store_at,
        store_wrap,
        store_wrap_at,
        LittleEndianConvert,
        LoadInto,
        StoreFrom,
    },
    nan_preserving_float::{F32, F64},
    trap::{Trap, TrapCode},
    value::{
        ArithmeticOps,
        ExtendInto,
        Float,
        Integer,
        SignExtendFrom,
        TransmuteInto,
        TruncateSaturateInto,
        TryTruncateInto,
        WrapInto,
    },
};
