//! Module instantiation and instance state.

use crate::{
    gc::{GcHeap, GcRef},
    global::Globals,
    host::HostFunc,
    memory::MemoryInstance,
    module::{InitExpr, Module},
    table::TableInstance,
    types::FuncType,
    value::Value,
    Error,
};
use runwasm_core::TrapCode;
use spin::Mutex;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

/// The import object: host functions to link against the module's
/// function imports.
#[derive(Default)]
pub struct Imports {
    map: BTreeMap<(Box<str>, Box<str>), HostFunc>,
}

impl Imports {
    /// Creates an empty import object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines a host function under `module`/`field`.
    pub fn define(mut self, module: &str, field: &str, func: HostFunc) -> Self {
        self.map.insert((module.into(), field.into()), func);
        self
    }

    fn get(&self, module: &str, field: &str) -> Option<&HostFunc> {
        self.map.get(&(module.into(), field.into()))
    }
}

/// A function of the instance function space.
#[derive(Debug)]
pub enum FuncInstance {
    /// A defined function; `body_idx` indexes [`Module::functions`].
    Wasm {
        /// Index into the module's defined-function table.
        body_idx: u32,
        /// The function's signature index.
        type_idx: u32,
    },
    /// A linked host function.
    Host {
        /// The linked host entry point.
        func: HostFunc,
        /// The import's declared signature index.
        type_idx: u32,
    },
}

impl FuncInstance {
    /// The signature index of the function.
    pub fn type_idx(&self) -> u32 {
        match self {
            Self::Wasm { type_idx, .. } | Self::Host { type_idx, .. } => *type_idx,
        }
    }

    /// Returns `true` for linked imports.
    pub fn is_import(&self) -> bool {
        matches!(self, Self::Host { .. })
    }
}

/// Per-function execution counters, populated when profiling is on.
#[derive(Debug, Default)]
pub struct FuncStats {
    /// Total time spent in the function, nanoseconds.
    pub exec_time_ns: AtomicU64,
    /// Number of completed activations.
    pub exec_count: AtomicU64,
    /// Time spent in functions this one called, nanoseconds.
    pub children_time_ns: AtomicU64,
}

/// An instantiated module: the mutable state shared by all threads
/// executing in it.
#[derive(Debug)]
pub struct ModuleInstance {
    pub(crate) module: Arc<Module>,
    pub(crate) functions: Box<[FuncInstance]>,
    pub(crate) stats: Box<[FuncStats]>,
    pub(crate) memories: Box<[Arc<MemoryInstance>]>,
    pub(crate) tables: Box<[Arc<TableInstance>]>,
    pub(crate) globals: Globals,
    pub(crate) global_offsets: Box<[u32]>,
    pub(crate) dropped_data: Box<[AtomicBool]>,
    pub(crate) dropped_elems: Box<[AtomicBool]>,
    pub(crate) heap: GcHeap,
    exception: Mutex<Option<String>>,
}

impl ModuleInstance {
    /// Instantiates `module` against `imports`: links imports,
    /// allocates memories and tables, evaluates global initializers
    /// and applies the active data and element segments.
    pub fn instantiate(module: Arc<Module>, imports: &Imports) -> Result<Self, Error> {
        let heap = GcHeap::new();

        let mut functions = Vec::with_capacity(module.func_count() as usize);
        for import in module.imports.iter() {
            match imports.get(&import.module, &import.field) {
                Some(func) => functions.push(FuncInstance::Host {
                    func: func.clone(),
                    type_idx: import.type_idx,
                }),
                None => {
                    return Err(Error::Instantiation(format!(
                        "unresolved function import ({}, {})",
                        import.module, import.field
                    )))
                }
            }
        }
        for (body_idx, body) in module.functions.iter().enumerate() {
            functions.push(FuncInstance::Wasm {
                body_idx: body_idx as u32,
                type_idx: body.type_idx,
            });
        }
        let stats = (0..functions.len()).map(|_| FuncStats::default()).collect();

        let memories: Box<[Arc<MemoryInstance>]> = module
            .memories
            .iter()
            .map(|ty| Arc::new(MemoryInstance::new(*ty)))
            .collect();
        let tables: Box<[Arc<TableInstance>]> = module
            .tables
            .iter()
            .map(|ty| Arc::new(TableInstance::new(*ty)))
            .collect();

        // Globals evaluate in declaration order; later initializers
        // may read earlier globals.
        let mut global_offsets = Vec::with_capacity(module.globals.len());
        let mut cell_count = 0;
        for def in module.globals.iter() {
            global_offsets.push(cell_count);
            cell_count += def.ty.ty.cell_num();
        }
        let globals = Globals::new(cell_count);

        let instance = Self {
            functions: functions.into_boxed_slice(),
            stats,
            memories,
            tables,
            globals,
            global_offsets: global_offsets.into_boxed_slice(),
            dropped_data: module.datas.iter().map(|_| AtomicBool::new(false)).collect(),
            dropped_elems: module.elems.iter().map(|_| AtomicBool::new(false)).collect(),
            heap,
            exception: Mutex::new(None),
            module,
        };

        for (idx, def) in instance.module.globals.iter().enumerate() {
            let value = instance.eval_init(&def.init)?;
            instance.write_global(idx as u32, value);
        }

        let module = instance.module.clone();
        for data in module.datas.iter() {
            if let Some((mem_idx, offset)) = &data.active {
                let offset = instance.eval_init_addr(offset)?;
                instance
                    .memory(*mem_idx)
                    .write_bytes(offset, &data.bytes)
                    .map_err(|code| Error::Trap(code.into()))?;
            }
        }
        for (seg_idx, elem) in module.elems.iter().enumerate() {
            if let Some((table_idx, offset)) = &elem.active {
                let offset = instance.eval_init_addr(offset)? as u32;
                let refs = instance.elem_refs(seg_idx as u32);
                instance
                    .table(*table_idx)
                    .init(offset, &refs, 0, refs.len() as u32)
                    .map_err(|code| Error::Trap(code.into()))?;
            }
        }

        log::debug!(
            "instantiated module: {} functions, {} memories, {} tables",
            instance.functions.len(),
            instance.memories.len(),
            instance.tables.len(),
        );
        Ok(instance)
    }

    /// The module this instance was created from.
    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    /// The garbage-collected heap of this instance.
    pub fn heap(&self) -> &GcHeap {
        &self.heap
    }

    /// Per-function execution counters.
    pub fn func_stats(&self, func_idx: u32) -> &FuncStats {
        &self.stats[func_idx as usize]
    }

    /// Runs the module start function, if one is declared.
    ///
    /// # Errors
    ///
    /// Any trap raised by the start function.
    pub fn run_start(&self, env: &mut crate::ExecEnv) -> Result<(), runwasm_core::Trap> {
        if let Some(start) = self.module.start {
            let mut argv = [0_u32; 2];
            crate::interp::call_wasm(self, env, start, &mut argv)?;
        }
        Ok(())
    }

    /// Looks up an exported function index by name.
    pub fn exported_func(&self, name: &str) -> Option<u32> {
        match self.module.exports.get(name) {
            Some(crate::module::Export::Func(idx)) => Some(*idx),
            _ => None,
        }
    }

    pub(crate) fn func_inst(&self, func_idx: u32) -> Option<&FuncInstance> {
        self.functions.get(func_idx as usize)
    }

    pub(crate) fn func_type_of(&self, func_idx: u32) -> &FuncType {
        self.module.func_type(self.module.func_type_idx(func_idx))
    }

    /// The memory at `idx`; validation guarantees the index.
    pub fn memory(&self, idx: u32) -> &Arc<MemoryInstance> {
        &self.memories[idx as usize]
    }

    /// The table at `idx`; validation guarantees the index.
    pub fn table(&self, idx: u32) -> &Arc<TableInstance> {
        &self.tables[idx as usize]
    }

    /// The payload signature of exception tag `tag_idx`.
    pub(crate) fn tag_sig(&self, tag_idx: u32) -> &FuncType {
        self.module.func_type(self.module.tags[tag_idx as usize].type_idx)
    }

    /// Bytes of data segment `idx`; dropped segments read as empty.
    pub(crate) fn data_bytes(&self, idx: u32) -> &[u8] {
        if self.dropped_data[idx as usize].load(Ordering::Acquire) {
            return &[];
        }
        &self.module.datas[idx as usize].bytes
    }

    pub(crate) fn drop_data(&self, idx: u32) {
        self.dropped_data[idx as usize].store(true, Ordering::Release);
    }

    /// Element references of segment `idx`, interned into the heap;
    /// dropped segments read as empty.
    pub(crate) fn elem_refs(&self, idx: u32) -> Vec<GcRef> {
        if self.dropped_elems[idx as usize].load(Ordering::Acquire) {
            return Vec::new();
        }
        self.module.elems[idx as usize]
            .funcs
            .iter()
            .map(|func| match func {
                Some(func_idx) => self.funcref(*func_idx),
                None => GcRef::NULL,
            })
            .collect()
    }

    pub(crate) fn drop_elem(&self, idx: u32) {
        self.dropped_elems[idx as usize].store(true, Ordering::Release);
    }

    /// The interned funcref object for `func_idx`.
    pub(crate) fn funcref(&self, func_idx: u32) -> GcRef {
        self.heap
            .intern_funcref(func_idx, self.module.func_type_idx(func_idx))
    }

    /// Records a trap message in the instance exception slot.
    pub fn set_exception(&self, message: &str) {
        log::trace!("exception set on instance: {message}");
        *self.exception.lock() = Some(message.into());
    }

    /// Clears and returns the recorded exception, if any.
    pub fn take_exception(&self) -> Option<String> {
        self.exception.lock().take()
    }

    /// Returns the recorded exception without clearing it.
    pub fn copy_exception(&self) -> Option<String> {
        self.exception.lock().clone()
    }

    /// Reads global `idx` as a typed value.
    pub fn read_global(&self, idx: u32) -> Value {
        let ty = self.module.globals[idx as usize].ty.ty;
        let offset = self.global_offsets[idx as usize];
        match ty.cell_num() {
            1 => Value::from_cells(ty, &[self.globals.get32(offset)]),
            _ => {
                let bits = self.globals.get64(offset);
                Value::from_cells(ty, &[bits as u32, (bits >> 32) as u32])
            }
        }
    }

    /// Writes global `idx` from a typed value.
    pub fn write_global(&self, idx: u32, value: Value) {
        let offset = self.global_offsets[idx as usize];
        let mut cells = [0_u32; 2];
        match value.to_cells(&mut cells) {
            1 => self.globals.set32(offset, cells[0]),
            _ => self
                .globals
                .set64(offset, u64::from(cells[0]) | (u64::from(cells[1]) << 32)),
        }
    }

    fn eval_init(&self, init: &InitExpr) -> Result<Value, Error> {
        Ok(match init {
            InitExpr::I32(value) => Value::I32(*value),
            InitExpr::I64(value) => Value::I64(*value),
            InitExpr::F32(value) => Value::F32(*value),
            InitExpr::F64(value) => Value::F64(*value),
            InitExpr::GlobalGet(idx) => self.read_global(*idx),
            InitExpr::RefNull => Value::Ref(GcRef::NULL),
            InitExpr::RefFunc(func_idx) => {
                if *func_idx >= self.module.func_count() {
                    return Err(Error::Trap(TrapCode::UnknownFunction.into()));
                }
                Value::Ref(self.funcref(*func_idx))
            }
        })
    }

    fn eval_init_addr(&self, init: &InitExpr) -> Result<u64, Error> {
        match self.eval_init(init)? {
            Value::I32(value) => Ok(value as u32 as u64),
            Value::I64(value) => Ok(value as u64),
            _ => Err(Error::Instantiation(
                "segment offset must be an integer constant".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        module::{DataSegment, Export, ModuleBuilder},
        types::{FuncType, GlobalType, MemoryType},
        value::ValType,
    };

    #[test]
    fn instantiation_applies_active_data_segments() {
        let mut builder = ModuleBuilder::new();
        builder.push_memory(MemoryType::new(1, None));
        builder.push_data(DataSegment {
            active: Some((0, InitExpr::I32(16))),
            bytes: Box::new([0xAA, 0xBB]),
        });
        let instance =
            ModuleInstance::instantiate(Arc::new(builder.finish()), &Imports::new()).unwrap();
        assert_eq!(instance.memory(0).load::<u16>(16, 0), Ok(0xBBAA));
    }

    #[test]
    fn out_of_bounds_active_segment_fails() {
        let mut builder = ModuleBuilder::new();
        builder.push_memory(MemoryType::new(1, None));
        builder.push_data(DataSegment {
            active: Some((0, InitExpr::I32(65535))),
            bytes: Box::new([1, 2]),
        });
        let result = ModuleInstance::instantiate(Arc::new(builder.finish()), &Imports::new());
        assert!(matches!(result, Err(Error::Trap(_))));
    }

    #[test]
    fn globals_initialize_in_order() {
        let mut builder = ModuleBuilder::new();
        builder.push_global(
            GlobalType {
                ty: ValType::I64,
                mutable: false,
            },
            InitExpr::I64(-7),
        );
        builder.push_global(
            GlobalType {
                ty: ValType::I64,
                mutable: true,
            },
            InitExpr::GlobalGet(0),
        );
        let instance =
            ModuleInstance::instantiate(Arc::new(builder.finish()), &Imports::new()).unwrap();
        assert_eq!(instance.read_global(1), Value::I64(-7));
    }

    #[test]
    fn missing_import_is_reported() {
        let mut builder = ModuleBuilder::new();
        let ty = builder.push_func_type(FuncType::new([], []));
        builder.push_import("env", "missing", ty);
        builder.export("f", Export::Func(0));
        let result = ModuleInstance::instantiate(Arc::new(builder.finish()), &Imports::new());
        assert!(matches!(result, Err(Error::Instantiation(_))));
    }
}
