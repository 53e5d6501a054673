//! A WebAssembly bytecode interpreter.
//!
//! runwasm executes validated WebAssembly binary code directly: a
//! typed operand stack of 32-bit cells, a control stack of structured
//! regions, linear memories with shared-memory atomics, reference
//! types with a garbage-collected object heap, exception handling,
//! and tail calls. Module parsing and validation happen upstream; a
//! decoded [`Module`] is built through [`ModuleBuilder`] and turned
//! into a runnable [`ModuleInstance`].
//!
//! ```
//! use runwasm::{
//!     call_wasm, Config, ExecEnv, FuncType, Imports, ModuleBuilder,
//!     ModuleInstance, ValType,
//! };
//! use std::sync::Arc;
//!
//! // (func (export "answer") (result i32) i32.const 42)
//! let mut builder = ModuleBuilder::new();
//! let ty = builder.push_func_type(FuncType::new([], [ValType::I32]));
//! let func = builder.push_function(ty, vec![], 1, 1, vec![0x41, 42, 0x0B]);
//! builder.export("answer", runwasm::Export::Func(func));
//!
//! let instance =
//!     ModuleInstance::instantiate(Arc::new(builder.finish()), &Imports::new()).unwrap();
//! let mut env = ExecEnv::new(&Config::default());
//! let mut argv = [0_u32; 2];
//! call_wasm(&instance, &mut env, func, &mut argv).unwrap();
//! assert_eq!(argv[0], 42);
//! ```

mod exec_env;
mod gc;
mod global;
mod host;
mod instance;
mod interp;
mod memory;
mod module;
mod stringref;
mod table;
mod types;
mod value;

use core::fmt;

pub use self::{
    exec_env::{ExecEnv, SignalHandle},
    gc::{GcHeap, GcRef, HeapObj},
    host::{HostAbi, HostFunc},
    instance::{FuncInstance, FuncStats, Imports, ModuleInstance},
    interp::{call_wasm, invoke},
    memory::MemoryInstance,
    module::{
        DataSegment, ElemSegment, Export, FuncBody, ImportFunc, InitExpr, Module, ModuleBuilder,
    },
    table::TableInstance,
    types::{
        is_subtype_of, ArrayType, CompositeType, FieldType, FuncType, GlobalType, MemoryType,
        StorageType, StructType, SubType, TableType, TagType,
    },
    value::{HeapType, RefType, ValType, Value},
};
pub use runwasm_core::{HostError, Trap, TrapCode, F32, F64};

/// Which execution backend [`call_wasm`] routes to.
///
/// The interpreter is the only backend of this build; the enum keeps
/// the routing seam a JIT tier would plug into.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RunMode {
    /// Execute with the bytecode interpreter.
    #[default]
    Interpreter,
}

/// Engine configuration consumed by [`ExecEnv::new`].
#[derive(Clone, Debug)]
pub struct Config {
    /// Capacity of the per-thread wasm stack in 32-bit cells.
    pub value_stack_cells: usize,
    /// Record per-function execution time and call counts.
    pub profiling: bool,
    /// The execution backend.
    pub mode: RunMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            value_stack_cells: 128 * 1024,
            profiling: false,
            mode: RunMode::Interpreter,
        }
    }
}

/// Errors of the embedding surface: instantiation and linking.
///
/// Execution failures surface as [`Trap`]s.
#[derive(Debug)]
pub enum Error {
    /// Module instantiation failed.
    Instantiation(String),
    /// Execution trapped while applying active segments or running
    /// the start function.
    Trap(Trap),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Instantiation(message) => write!(f, "instantiation error: {message}"),
            Self::Trap(trap) => fmt::Display::fmt(trap, f),
        }
    }
}

impl std::error::Error for Error {}

impl From<Trap> for Error {
    fn from(trap: Trap) -> Self {
        Self::Trap(trap)
    }
}
