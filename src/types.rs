use crate::value::{RefType, ValType};

/// Signature of a function: parameter and result types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FuncType {
    params: Box<[ValType]>,
    results: Box<[ValType]>,
    param_cell_num: u32,
    ret_cell_num: u32,
}

impl FuncType {
    /// Creates a new function type.
    pub fn new<P, R>(params: P, results: R) -> Self
    where
        P: Into<Box<[ValType]>>,
        R: Into<Box<[ValType]>>,
    {
        let params = params.into();
        let results = results.into();
        let param_cell_num = params.iter().map(ValType::cell_num).sum();
        let ret_cell_num = results.iter().map(ValType::cell_num).sum();
        Self {
            params,
            results,
            param_cell_num,
            ret_cell_num,
        }
    }

    /// The parameter types.
    pub fn params(&self) -> &[ValType] {
        &self.params
    }

    /// The result types.
    pub fn results(&self) -> &[ValType] {
        &self.results
    }

    /// Number of operand-stack cells the parameters occupy.
    pub fn param_cell_num(&self) -> u32 {
        self.param_cell_num
    }

    /// Number of operand-stack cells the results occupy.
    pub fn ret_cell_num(&self) -> u32 {
        self.ret_cell_num
    }
}

/// Storage type of a struct field or array element.
///
/// Packed types widen to `i32` when read onto the operand stack.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StorageType {
    /// Packed 8-bit storage.
    I8,
    /// Packed 16-bit storage.
    I16,
    /// An unpacked value type.
    Val(ValType),
}

impl StorageType {
    /// Number of operand-stack cells a value of this storage occupies
    /// once unpacked.
    pub fn cell_num(&self) -> u32 {
        match self {
            Self::I8 | Self::I16 => 1,
            Self::Val(ty) => ty.cell_num(),
        }
    }

    /// Returns `true` if values of this storage are references.
    pub fn is_ref(&self) -> bool {
        matches!(self, Self::Val(ValType::Ref(_)))
    }

    /// Byte width of the storage inside an array or struct.
    pub fn byte_size(&self) -> u32 {
        match self {
            Self::I8 => 1,
            Self::I16 => 2,
            Self::Val(ValType::I32 | ValType::F32 | ValType::Ref(_)) => 4,
            Self::Val(ValType::I64 | ValType::F64) => 8,
        }
    }
}

/// A struct field: storage plus mutability.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FieldType {
    /// Storage of the field.
    pub storage: StorageType,
    /// Whether `struct.set` may write the field.
    pub mutable: bool,
}

/// A defined structure type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructType {
    /// The field types in declaration order.
    pub fields: Box<[FieldType]>,
}

/// A defined array type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArrayType {
    /// The element type.
    pub elem: FieldType,
}

/// The composite shape of a defined type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompositeType {
    /// A function signature.
    Func(FuncType),
    /// A structure.
    Struct(StructType),
    /// An array.
    Array(ArrayType),
}

/// An entry of the module type section: a composite type with its
/// position in the declared subtype hierarchy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubType {
    /// Whether further subtypes of this type may be declared.
    pub is_final: bool,
    /// Declared supertype, if any.
    pub supertype: Option<u32>,
    /// The composite shape.
    pub composite: CompositeType,
}

impl SubType {
    /// A final function type without supertypes.
    pub fn func(ty: FuncType) -> Self {
        Self {
            is_final: true,
            supertype: None,
            composite: CompositeType::Func(ty),
        }
    }

    /// The function signature, if this is a function type.
    pub fn as_func(&self) -> Option<&FuncType> {
        match &self.composite {
            CompositeType::Func(ty) => Some(ty),
            _ => None,
        }
    }

    /// The struct shape, if this is a structure type.
    pub fn as_struct(&self) -> Option<&StructType> {
        match &self.composite {
            CompositeType::Struct(ty) => Some(ty),
            _ => None,
        }
    }

    /// The array shape, if this is an array type.
    pub fn as_array(&self) -> Option<&ArrayType> {
        match &self.composite {
            CompositeType::Array(ty) => Some(ty),
            _ => None,
        }
    }
}

/// Checks whether defined type `sub_idx` equals `super_idx` or has it
/// on its declared supertype chain.
pub fn is_subtype_of(types: &[SubType], sub_idx: u32, super_idx: u32) -> bool {
    let mut current = sub_idx;
    loop {
        if current == super_idx {
            return true;
        }
        match types.get(current as usize).and_then(|ty| ty.supertype) {
            Some(parent) => current = parent,
            None => return false,
        }
    }
}

/// An exception tag: its payload signature is a function type whose
/// parameters describe the thrown values.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TagType {
    /// Index of the payload signature in the type section.
    pub type_idx: u32,
}

/// Type of a global variable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GlobalType {
    /// The value type of the global.
    pub ty: ValType,
    /// Whether `global.set` may write the global.
    pub mutable: bool,
}

/// Type of a table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TableType {
    /// The element reference type.
    pub elem: RefType,
    /// Initial size in elements.
    pub min: u32,
    /// Optional maximum size in elements.
    pub max: Option<u32>,
}

/// Type of a linear memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryType {
    /// Initial size in 64 KiB pages.
    pub min_pages: u32,
    /// Optional maximum size in pages.
    pub max_pages: Option<u32>,
    /// Whether the memory is shared between threads.
    pub shared: bool,
    /// Whether addresses are 64-bit.
    pub memory64: bool,
}

impl MemoryType {
    /// A plain unshared 32-bit memory with the given page limits.
    pub fn new(min_pages: u32, max_pages: Option<u32>) -> Self {
        Self {
            min_pages,
            max_pages,
            shared: false,
            memory64: false,
        }
    }

    /// A shared memory; shared memories must declare a maximum.
    pub fn shared(min_pages: u32, max_pages: u32) -> Self {
        Self {
            min_pages,
            max_pages: Some(max_pages),
            shared: true,
            memory64: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn func_type_cell_accounting() {
        let ty = FuncType::new(
            [ValType::I32, ValType::I64, ValType::FUNC_REF],
            [ValType::F64],
        );
        assert_eq!(ty.param_cell_num(), 4);
        assert_eq!(ty.ret_cell_num(), 2);
    }

    #[test]
    fn subtype_chain_walk() {
        let base = SubType {
            is_final: false,
            supertype: None,
            composite: CompositeType::Struct(StructType { fields: Box::new([]) }),
        };
        let mid = SubType {
            is_final: false,
            supertype: Some(0),
            composite: base.composite.clone(),
        };
        let leaf = SubType {
            is_final: true,
            supertype: Some(1),
            composite: base.composite.clone(),
        };
        let types = [base, mid, leaf];
        assert!(is_subtype_of(&types, 2, 0));
        assert!(is_subtype_of(&types, 1, 0));
        assert!(is_subtype_of(&types, 0, 0));
        assert!(!is_subtype_of(&types, 0, 2));
    }
}
