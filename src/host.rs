//! Host (native) function bridging.
//!
//! An import can be linked against one of three calling conventions:
//!
//! - [`HostAbi::Raw`]: the callee consumes and rewrites the argv cell
//!   buffer in place, results overwriting the leading cells.
//! - [`HostAbi::Cells`]: the callee reads argument cells and writes
//!   result cells through separate buffers.
//! - [`HostAbi::Typed`]: the default marshalled convention; cells are
//!   unpacked into typed [`Value`]s per the import signature and the
//!   result is packed back.

use crate::value::Value;
use runwasm_core::Trap;
use std::{fmt, sync::Arc};

/// A host function consuming the raw argv cell buffer.
pub type RawHostFn = dyn Fn(&mut [u32]) -> Result<(), Trap> + Send + Sync;

/// A host function with separate argument and result cell buffers.
pub type CellsHostFn = dyn Fn(&[u32], &mut [u32]) -> Result<(), Trap> + Send + Sync;

/// A host function taking marshalled values.
pub type TypedHostFn = dyn Fn(&[Value]) -> Result<Option<Value>, Trap> + Send + Sync;

/// The calling convention and entry point of a linked import.
#[derive(Clone)]
pub enum HostAbi {
    /// The callee consumes the argv cell buffer directly.
    Raw(Arc<RawHostFn>),
    /// The callee follows the runtime's native cell convention.
    Cells(Arc<CellsHostFn>),
    /// The default marshalled convention.
    Typed(Arc<TypedHostFn>),
}

/// A host function bound to an import slot.
#[derive(Clone)]
pub struct HostFunc {
    /// The linked entry point.
    pub abi: HostAbi,
}

impl HostFunc {
    /// Wraps a function of the default marshalled convention.
    pub fn wrap<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Option<Value>, Trap> + Send + Sync + 'static,
    {
        Self {
            abi: HostAbi::Typed(Arc::new(f)),
        }
    }

    /// Wraps a raw-convention function.
    pub fn wrap_raw<F>(f: F) -> Self
    where
        F: Fn(&mut [u32]) -> Result<(), Trap> + Send + Sync + 'static,
    {
        Self {
            abi: HostAbi::Raw(Arc::new(f)),
        }
    }

    /// Wraps a cells-convention function.
    pub fn wrap_cells<F>(f: F) -> Self
    where
        F: Fn(&[u32], &mut [u32]) -> Result<(), Trap> + Send + Sync + 'static,
    {
        Self {
            abi: HostAbi::Cells(Arc::new(f)),
        }
    }
}

impl fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let abi = match self.abi {
            HostAbi::Raw(_) => "raw",
            HostAbi::Cells(_) => "cells",
            HostAbi::Typed(_) => "typed",
        };
        f.debug_struct("HostFunc").field("abi", &abi).finish()
    }
}
