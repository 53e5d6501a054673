//! The decoded module model.
//!
//! Parsing and validation are the loader's job and happen upstream;
//! a [`Module`] is the decoded, validated result: type and entity
//! tables plus per-function descriptors that carry everything the
//! interpreter needs to allocate and run a frame (cell counts, local
//! offsets, maximum stack and block depths, raw code bytes).
//!
//! Embedders and tests construct modules through [`ModuleBuilder`].

use crate::{
    types::{FuncType, GlobalType, MemoryType, SubType, TableType, TagType},
    value::ValType,
};
use runwasm_core::{F32, F64};
use std::collections::BTreeMap;

/// A constant initializer expression.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum InitExpr {
    /// `i32.const`
    I32(i32),
    /// `i64.const`
    I64(i64),
    /// `f32.const`
    F32(F32),
    /// `f64.const`
    F64(F64),
    /// `global.get` of a previously defined global.
    GlobalGet(u32),
    /// `ref.null`
    RefNull,
    /// `ref.func`
    RefFunc(u32),
}

/// A function import slot.
#[derive(Clone, Debug)]
pub struct ImportFunc {
    /// Import module name.
    pub module: Box<str>,
    /// Import field name.
    pub field: Box<str>,
    /// Signature index in the type section.
    pub type_idx: u32,
}

/// A defined (non-imported) function.
#[derive(Clone, Debug)]
pub struct FuncBody {
    /// Signature index in the type section.
    pub type_idx: u32,
    /// Types of params followed by declared locals.
    pub local_types: Box<[ValType]>,
    /// Cell offset of each param-or-local in the local area.
    pub local_offsets: Box<[u32]>,
    /// Number of cells the parameters occupy.
    pub param_cell_num: u32,
    /// Number of cells the declared locals occupy.
    pub local_cell_num: u32,
    /// Number of cells the results occupy.
    pub ret_cell_num: u32,
    /// Operand-stack high watermark, from validation.
    pub max_stack_cell_num: u32,
    /// Maximum simultaneously open blocks, from validation.
    pub max_block_num: u32,
    /// The raw code: opcodes and immediates, ending in `end`.
    pub code: Box<[u8]>,
}

impl FuncBody {
    fn new(
        types: &[SubType],
        type_idx: u32,
        locals: &[ValType],
        max_stack_cell_num: u32,
        max_block_num: u32,
        code: Box<[u8]>,
    ) -> Self {
        let func_type = types[type_idx as usize]
            .as_func()
            .expect("function declared with a non-function type");
        let mut local_types = Vec::with_capacity(func_type.params().len() + locals.len());
        local_types.extend_from_slice(func_type.params());
        local_types.extend_from_slice(locals);

        let mut local_offsets = Vec::with_capacity(local_types.len());
        let mut offset = 0;
        for ty in &local_types {
            local_offsets.push(offset);
            offset += ty.cell_num();
        }
        let param_cell_num = func_type.param_cell_num();
        let local_cell_num = offset - param_cell_num;

        Self {
            type_idx,
            local_types: local_types.into_boxed_slice(),
            local_offsets: local_offsets.into_boxed_slice(),
            param_cell_num,
            local_cell_num,
            ret_cell_num: func_type.ret_cell_num(),
            max_stack_cell_num,
            max_block_num,
            code,
        }
    }
}

/// A global definition.
#[derive(Clone, Debug)]
pub struct GlobalDef {
    /// The global's type.
    pub ty: GlobalType,
    /// The constant initializer.
    pub init: InitExpr,
}

/// A data segment.
#[derive(Clone, Debug)]
pub struct DataSegment {
    /// `Some((memory, offset))` for active segments.
    pub active: Option<(u32, InitExpr)>,
    /// The segment bytes.
    pub bytes: Box<[u8]>,
}

/// An element segment of function indices.
#[derive(Clone, Debug)]
pub struct ElemSegment {
    /// `Some((table, offset))` for active segments.
    pub active: Option<(u32, InitExpr)>,
    /// Function indices; `None` encodes a null element.
    pub funcs: Box<[Option<u32>]>,
}

/// An exported entity.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Export {
    /// An exported function.
    Func(u32),
    /// An exported memory.
    Memory(u32),
    /// An exported table.
    Table(u32),
    /// An exported global.
    Global(u32),
    /// An exported exception tag.
    Tag(u32),
}

/// A decoded, validated module.
#[derive(Clone, Debug, Default)]
pub struct Module {
    /// The type section.
    pub types: Box<[SubType]>,
    /// Function imports; they occupy the leading function indices.
    pub imports: Box<[ImportFunc]>,
    /// Defined functions, indexed after the imports.
    pub functions: Box<[FuncBody]>,
    /// Declared tables.
    pub tables: Box<[TableType]>,
    /// Declared memories.
    pub memories: Box<[MemoryType]>,
    /// Declared globals.
    pub globals: Box<[GlobalDef]>,
    /// Declared exception tags.
    pub tags: Box<[TagType]>,
    /// Element segments.
    pub elems: Box<[ElemSegment]>,
    /// Data segments.
    pub datas: Box<[DataSegment]>,
    /// Exports by name.
    pub exports: BTreeMap<Box<str>, Export>,
    /// String literals backing `string.const`.
    pub strings: Box<[Box<[u8]>]>,
    /// The start function, if any.
    pub start: Option<u32>,
    /// The global acting as the auxiliary stack pointer, if the
    /// loader identified one.
    pub aux_stack_global: Option<u32>,
    /// Auxiliary stack bounds as `(bottom, boundary)`; the aux stack
    /// grows downwards from `bottom` towards `boundary`.
    pub aux_stack_bounds: Option<(u64, u64)>,
}

impl Module {
    /// Total number of functions, imports included.
    pub fn func_count(&self) -> u32 {
        (self.imports.len() + self.functions.len()) as u32
    }

    /// The signature index of function `func_idx`.
    pub fn func_type_idx(&self, func_idx: u32) -> u32 {
        let imports = self.imports.len() as u32;
        if func_idx < imports {
            self.imports[func_idx as usize].type_idx
        } else {
            self.functions[(func_idx - imports) as usize].type_idx
        }
    }

    /// The signature of the type-section entry `type_idx`.
    pub fn func_type(&self, type_idx: u32) -> &FuncType {
        self.types[type_idx as usize]
            .as_func()
            .expect("validation ensures the index refers to a function type")
    }

    /// The body of defined function `func_idx`, or `None` for imports.
    pub fn func_body(&self, func_idx: u32) -> Option<&FuncBody> {
        let imports = self.imports.len() as u32;
        func_idx
            .checked_sub(imports)
            .and_then(|local| self.functions.get(local as usize))
    }
}

/// Builder assembling a decoded [`Module`].
#[derive(Default)]
pub struct ModuleBuilder {
    types: Vec<SubType>,
    imports: Vec<ImportFunc>,
    functions: Vec<(u32, Vec<ValType>, u32, u32, Box<[u8]>)>,
    tables: Vec<TableType>,
    memories: Vec<MemoryType>,
    globals: Vec<GlobalDef>,
    tags: Vec<TagType>,
    elems: Vec<ElemSegment>,
    datas: Vec<DataSegment>,
    exports: BTreeMap<Box<str>, Export>,
    strings: Vec<Box<[u8]>>,
    start: Option<u32>,
    aux_stack_global: Option<u32>,
    aux_stack_bounds: Option<(u64, u64)>,
}

impl ModuleBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a type-section entry, returning its index.
    pub fn push_type(&mut self, ty: SubType) -> u32 {
        self.types.push(ty);
        (self.types.len() - 1) as u32
    }

    /// Adds a function type, returning its index.
    pub fn push_func_type(&mut self, ty: FuncType) -> u32 {
        self.push_type(SubType::func(ty))
    }

    /// Adds a function import, returning its function index.
    pub fn push_import(&mut self, module: &str, field: &str, type_idx: u32) -> u32 {
        assert!(
            self.functions.is_empty(),
            "imports must be declared before defined functions"
        );
        self.imports.push(ImportFunc {
            module: module.into(),
            field: field.into(),
            type_idx,
        });
        (self.imports.len() - 1) as u32
    }

    /// Adds a defined function, returning its function index.
    ///
    /// `max_stack_cell_num` and `max_block_num` are the validation
    /// results a loader would provide.
    pub fn push_function(
        &mut self,
        type_idx: u32,
        locals: Vec<ValType>,
        max_stack_cell_num: u32,
        max_block_num: u32,
        code: Vec<u8>,
    ) -> u32 {
        self.functions
            .push((type_idx, locals, max_stack_cell_num, max_block_num, code.into()));
        (self.imports.len() + self.functions.len() - 1) as u32
    }

    /// Adds a table, returning its index.
    pub fn push_table(&mut self, ty: TableType) -> u32 {
        self.tables.push(ty);
        (self.tables.len() - 1) as u32
    }

    /// Adds a memory, returning its index.
    pub fn push_memory(&mut self, ty: MemoryType) -> u32 {
        self.memories.push(ty);
        (self.memories.len() - 1) as u32
    }

    /// Adds a global, returning its index.
    pub fn push_global(&mut self, ty: GlobalType, init: InitExpr) -> u32 {
        self.globals.push(GlobalDef { ty, init });
        (self.globals.len() - 1) as u32
    }

    /// Adds an exception tag, returning its index.
    pub fn push_tag(&mut self, tag: TagType) -> u32 {
        self.tags.push(tag);
        (self.tags.len() - 1) as u32
    }

    /// Adds an element segment, returning its index.
    pub fn push_elem(&mut self, elem: ElemSegment) -> u32 {
        self.elems.push(elem);
        (self.elems.len() - 1) as u32
    }

    /// Adds a data segment, returning its index.
    pub fn push_data(&mut self, data: DataSegment) -> u32 {
        self.datas.push(data);
        (self.datas.len() - 1) as u32
    }

    /// Adds a string literal, returning its index.
    pub fn push_string(&mut self, bytes: &[u8]) -> u32 {
        self.strings.push(bytes.into());
        (self.strings.len() - 1) as u32
    }

    /// Exports an entity under `name`.
    pub fn export(&mut self, name: &str, export: Export) -> &mut Self {
        self.exports.insert(name.into(), export);
        self
    }

    /// Declares the start function.
    pub fn start(&mut self, func_idx: u32) -> &mut Self {
        self.start = Some(func_idx);
        self
    }

    /// Declares global `global_idx` as the auxiliary stack pointer
    /// with the given `(bottom, boundary)` bounds.
    pub fn aux_stack(&mut self, global_idx: u32, bottom: u64, boundary: u64) -> &mut Self {
        self.aux_stack_global = Some(global_idx);
        self.aux_stack_bounds = Some((bottom, boundary));
        self
    }

    /// Finishes the module.
    pub fn finish(self) -> Module {
        let functions = self
            .functions
            .into_iter()
            .map(|(type_idx, locals, max_stack, max_blocks, code)| {
                FuncBody::new(&self.types, type_idx, &locals, max_stack, max_blocks, code)
            })
            .collect();
        Module {
            types: self.types.into_boxed_slice(),
            imports: self.imports.into_boxed_slice(),
            functions,
            tables: self.tables.into_boxed_slice(),
            memories: self.memories.into_boxed_slice(),
            globals: self.globals.into_boxed_slice(),
            tags: self.tags.into_boxed_slice(),
            elems: self.elems.into_boxed_slice(),
            datas: self.datas.into_boxed_slice(),
            exports: self.exports,
            strings: self.strings.into_boxed_slice(),
            start: self.start,
            aux_stack_global: self.aux_stack_global,
            aux_stack_bounds: self.aux_stack_bounds,
        }
    }
}
